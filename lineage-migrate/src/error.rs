//! Error types for the reconciliation engine.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for engine operations.
pub type MigrateResult<T> = Result<T, MigrationError>;

/// Errors that can occur while loading, analyzing or applying revisions.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// File system error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A revision directory could not be read or parsed.
    #[error("Corrupt revision file {path}: {reason}")]
    CorruptRevisionFile {
        /// Path of the offending file or directory.
        path: PathBuf,
        /// What was wrong with it.
        reason: String,
    },

    /// A revision references a parent that is not in the graph.
    #[error("Revision '{revision}' references missing parent '{missing_parent}'")]
    OrphanRevision {
        /// The revision with the dangling link.
        revision: String,
        /// The parent identifier that could not be found.
        missing_parent: String,
    },

    /// The revision graph contains a cycle.
    #[error("Cycle detected in revision graph involving: {}", .0.join(", "))]
    CycleDetected(Vec<String>),

    /// The graph has more than one head.
    #[error("Multiple heads present: {}", .0.join(", "))]
    MultipleHeads(Vec<String>),

    /// Two environments share no mergeable history.
    #[error(
        "Environments '{source_env}' and '{target_env}' have disjoint lineages \
         (unreconcilable revisions: {}); manual reconciliation required",
        .revisions.join(", ")
    )]
    DisjointLineage {
        /// Source environment.
        source_env: String,
        /// Target environment.
        target_env: String,
        /// Revisions that prevent automatic reconciliation.
        revisions: Vec<String>,
    },

    /// An apply run stopped at a failing step.
    #[error(
        "Apply on '{env}' failed at step '{failed_step}' (last successful: {}): {reason}",
        .last_successful.as_deref().unwrap_or("none")
    )]
    PartialApplyFailure {
        /// Environment the run targeted.
        env: String,
        /// Identifier of the step that failed.
        failed_step: String,
        /// Identifier of the last committed step of this run, if any.
        last_successful: Option<String>,
        /// Applied heads immediately before the failing step.
        prior_state: Vec<String>,
        /// Whether the failing step's transaction was rolled back cleanly.
        rolled_back: bool,
        /// Underlying failure.
        reason: String,
    },

    /// The bookkeeping record changed underneath a write.
    #[error("Write conflict on '{env}': expected applied state [{}], found [{}]", .expected.join(", "), .found.join(", "))]
    WriteConflict {
        /// Environment whose bookkeeping was written.
        env: String,
        /// State the writer expected.
        expected: Vec<String>,
        /// State actually found.
        found: Vec<String>,
    },

    /// Fewer than two heads were supplied for a merge.
    #[error("Merge requires at least two heads, got {0}")]
    InsufficientHeads(usize),

    /// A revision with this identifier already exists.
    #[error("Revision '{0}' already exists")]
    DuplicateIdentifier(String),

    /// An environment's bookkeeping could not be read.
    #[error("Bookkeeping for '{env}' unavailable: {reason}")]
    BookkeepingUnavailable {
        /// Environment name.
        env: String,
        /// Underlying failure.
        reason: String,
    },

    /// Branches being merged alter the same object.
    #[error("Unresolved conflict: '{object}' is changed on several branches ({})", .revisions.join(", "))]
    UnresolvedConflict {
        /// Object path touched by more than one branch.
        object: String,
        /// Revisions touching it.
        revisions: Vec<String>,
    },

    /// A revision identifier is not part of the graph.
    #[error("Revision '{0}' not found")]
    UnknownRevision(String),

    /// No environment with this name is configured.
    #[error("Environment '{0}' is not configured")]
    UnknownEnvironment(String),

    /// An apply run was cancelled between steps.
    #[error("Apply on '{env}' cancelled (last successful: {})", .last_successful.as_deref().unwrap_or("none"))]
    Cancelled {
        /// Environment the run targeted.
        env: String,
        /// Identifier of the last committed step, if any.
        last_successful: Option<String>,
    },

    /// Database operation error.
    #[error("Database error: {0}")]
    Database(String),

    /// Lock acquisition failed.
    #[error("Failed to acquire migration lock: {0}")]
    LockFailed(String),

    /// The dialect cannot express an operation.
    #[error("Unsupported by {dialect}: {operation}")]
    Unsupported {
        /// Dialect name.
        dialect: String,
        /// Operation description.
        operation: String,
    },

    /// Invalid plan or descriptor.
    #[error("Invalid plan: {0}")]
    InvalidPlan(String),

    /// No changes to migrate.
    #[error("No schema changes detected")]
    NoChanges,

    /// General migration error.
    #[error("Migration error: {0}")]
    Other(String),
}

impl MigrationError {
    /// Create a corrupt revision file error.
    pub fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::CorruptRevisionFile {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a bookkeeping unavailable error.
    pub fn bookkeeping(env: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::BookkeepingUnavailable {
            env: env.into(),
            reason: reason.into(),
        }
    }

    /// Create a database error.
    pub fn database(msg: impl Into<String>) -> Self {
        Self::Database(msg.into())
    }

    /// Create a lock failed error.
    pub fn lock_failed(msg: impl Into<String>) -> Self {
        Self::LockFailed(msg.into())
    }

    /// Create an unsupported operation error.
    pub fn unsupported(dialect: impl Into<String>, operation: impl Into<String>) -> Self {
        Self::Unsupported {
            dialect: dialect.into(),
            operation: operation.into(),
        }
    }

    /// Create an invalid plan error.
    pub fn invalid_plan(msg: impl Into<String>) -> Self {
        Self::InvalidPlan(msg.into())
    }

    /// Create an other error.
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Structural graph errors that abort a whole reconciliation.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::CorruptRevisionFile { .. }
                | Self::OrphanRevision { .. }
                | Self::CycleDetected(_)
                | Self::DisjointLineage { .. }
        )
    }

    /// Check if this is a recoverable error.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::MultipleHeads(_)
                | Self::PartialApplyFailure { .. }
                | Self::WriteConflict { .. }
                | Self::LockFailed(_)
                | Self::Cancelled { .. }
                | Self::NoChanges
        )
    }
}

#[cfg(feature = "sqlite")]
impl From<tokio_rusqlite::Error> for MigrationError {
    fn from(err: tokio_rusqlite::Error) -> Self {
        Self::Database(err.to_string())
    }
}
