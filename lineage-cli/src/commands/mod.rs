//! CLI command implementations.

pub mod autogen;
pub mod check;
pub mod fix;
pub mod init;
pub mod report;
pub mod status;
pub mod sync;

use std::path::{Path, PathBuf};

use lineage_migrate::{
    DescriptorFile, Dialect, Reconciler, RevisionStore, SqliteEnvironment,
};
use tracing::debug;

use crate::config::Config;
use crate::error::{CliError, CliResult};
use crate::output;

/// A loaded project: its configuration and a reconciler over its
/// environments.
pub struct Project {
    /// Parsed configuration
    pub config: Config,
    /// Directory containing the configuration file
    pub root: PathBuf,
    /// Reconciler over every configured environment
    pub reconciler: Reconciler,
}

impl Project {
    /// Load the configuration at `config_path` and open every environment.
    pub async fn open(config_path: &Path) -> CliResult<Self> {
        if !config_path.exists() {
            return Err(CliError::Config(format!(
                "{} not found. Run `lineage init` first.",
                config_path.display()
            )));
        }
        let config = Config::load(config_path)?;
        let root = config_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        let dialect = config.dialect()?;
        if dialect != Dialect::Sqlite {
            return Err(CliError::Config(format!(
                "dialect '{}' has no built-in backend; the CLI manages SQLite environments only",
                dialect
            )));
        }

        let store = RevisionStore::new(root.join(&config.migrations.directory));
        let mut reconciler = Reconciler::new(store).with_filter(config.schema_filter());
        if let Some(target) = &config.migrations.target {
            reconciler = reconciler.with_target(DescriptorFile::new(root.join(target)));
        }

        for env in &config.environments {
            let path = env.database_path(&root, &config.database.state_dir);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            debug!(env = %env.name, path = %path.display(), "Opening environment");
            let db = SqliteEnvironment::open(env.name.clone(), &path).await?;
            reconciler = reconciler.with_environment(db.environment());
        }

        Ok(Self {
            config,
            root,
            reconciler,
        })
    }

    /// The named environment, or the primary one.
    pub fn env_name(&self, env: Option<&str>) -> CliResult<String> {
        let name = env.unwrap_or(&self.config.database.primary).to_string();
        if self.config.environment(&name).is_none() {
            return Err(CliError::Config(format!(
                "Environment '{}' is not defined in [[environments]]",
                name
            )));
        }
        Ok(name)
    }

    /// Ask before mutating a production environment unless `yes` was given.
    pub fn confirm_mutation(&self, env: &str, action: &str, yes: bool) -> CliResult<()> {
        if yes || !self.config.requires_confirmation(env) {
            return Ok(());
        }
        output::warn(&format!("'{}' is a production environment.", env));
        if output::confirm(&format!("{} on '{}'?", action, env)) {
            Ok(())
        } else {
            Err(CliError::Aborted(format!("{} on '{}' was not confirmed", action, env)))
        }
    }
}
