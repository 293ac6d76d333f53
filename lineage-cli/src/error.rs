//! CLI error types and result alias.

use lineage_migrate::MigrationError;
use miette::Diagnostic;
use thiserror::Error;

/// Result type alias for CLI operations
pub type CliResult<T> = Result<T, CliError>;

/// CLI error types
#[derive(Error, Debug, Diagnostic)]
pub enum CliError {
    /// IO error
    #[error("IO error: {0}")]
    #[diagnostic(code(lineage::io))]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    #[diagnostic(code(lineage::config))]
    Config(String),

    /// Migration engine error
    #[error("Migration error: {0}")]
    #[diagnostic(code(lineage::migration))]
    Migration(#[from] MigrationError),

    /// Check found problems
    #[error("Check failed: {0}")]
    #[diagnostic(code(lineage::check), help("run `lineage fix` to repair"))]
    CheckFailed(String),

    /// Operator declined a confirmation
    #[error("Aborted: {0}")]
    #[diagnostic(code(lineage::aborted))]
    Aborted(String),

    /// Command error
    #[error("Command error: {0}")]
    #[diagnostic(code(lineage::command))]
    Command(String),
}

impl CliError {
    /// Follow-up advice printed after the error, if any.
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            CliError::Migration(e) if e.is_fatal() => {
                Some("The revision directory cannot be repaired automatically; fix it by hand")
            }
            CliError::Migration(e) if e.is_recoverable() => {
                Some("Re-run `lineage fix` to resume or repair")
            }
            CliError::CheckFailed(_) => Some("Run `lineage fix` to repair"),
            _ => None,
        }
    }

    /// Process exit code: 2 for unrecoverable lineage damage, 1 otherwise.
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Migration(e) if e.is_fatal() => 2,
            _ => 1,
        }
    }
}

impl From<toml::de::Error> for CliError {
    fn from(err: toml::de::Error) -> Self {
        CliError::Config(format!("Failed to parse TOML: {}", err))
    }
}

impl From<toml::ser::Error> for CliError {
    fn from(err: toml::ser::Error) -> Self {
        CliError::Config(format!("Failed to serialize TOML: {}", err))
    }
}

impl From<serde_json::Error> for CliError {
    fn from(err: serde_json::Error) -> Self {
        CliError::Command(format!("Failed to render JSON: {}", err))
    }
}
