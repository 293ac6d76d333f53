//! CLI configuration handling.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use lineage_migrate::{Dialect, SchemaFilter};

use crate::error::{CliError, CliResult};

/// Default config file name (lives in project root)
pub const CONFIG_FILE_NAME: &str = "lineage.toml";

/// Default migrations directory (relative to project root)
pub const MIGRATIONS_DIR: &str = "migrations";

/// Default directory for environment databases (relative to project root)
pub const STATE_DIR: &str = ".lineage";

/// Lineage CLI configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Database configuration
    pub database: DatabaseConfig,

    /// Migration configuration
    pub migrations: MigrationConfig,

    /// Automatic repair switches
    pub auto_fix: AutoFixConfig,

    /// Configured environments
    pub environments: Vec<EnvironmentConfig>,
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> CliResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            CliError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> CliResult<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Create a default config for a dialect with one development environment
    pub fn default_for_dialect(dialect: Dialect) -> Self {
        let mut config = Self::default();
        config.database.dialect = dialect.to_string();
        config.environments.push(EnvironmentConfig {
            name: config.database.primary.clone(),
            path: None,
        });
        config
    }

    /// Check cross-field consistency
    pub fn validate(&self) -> CliResult<()> {
        self.dialect()?;
        let mut seen = std::collections::BTreeSet::new();
        for env in &self.environments {
            if !seen.insert(env.name.as_str()) {
                return Err(CliError::Config(format!(
                    "Environment '{}' is defined more than once",
                    env.name
                )));
            }
        }
        if !self.environments.is_empty() && self.environment(&self.database.primary).is_none() {
            return Err(CliError::Config(format!(
                "Primary environment '{}' is not defined in [[environments]]",
                self.database.primary
            )));
        }
        Ok(())
    }

    /// The configured dialect
    pub fn dialect(&self) -> CliResult<Dialect> {
        self.database
            .dialect
            .parse()
            .map_err(|e: lineage_migrate::MigrationError| CliError::Config(e.to_string()))
    }

    /// Look up an environment by name
    pub fn environment(&self, name: &str) -> Option<&EnvironmentConfig> {
        self.environments.iter().find(|e| e.name == name)
    }

    /// Environment names other than `name`
    pub fn other_environments(&self, name: &str) -> Vec<String> {
        self.environments
            .iter()
            .filter(|e| e.name != name)
            .map(|e| e.name.clone())
            .collect()
    }

    /// Whether changes to `env` need confirmation
    pub fn requires_confirmation(&self, env: &str) -> bool {
        self.auto_fix.interactive_on_production
            && self.auto_fix.production_envs.iter().any(|p| p == env)
    }

    /// Table filter for schema comparison
    pub fn schema_filter(&self) -> SchemaFilter {
        SchemaFilter::new()
            .include_tables(self.migrations.include_tables.clone())
            .exclude_tables(self.migrations.exclude_tables.clone())
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQL dialect (sqlite, postgresql, mysql)
    pub dialect: String,

    /// Environment reconciled when none is named
    pub primary: String,

    /// Directory for environment databases without an explicit path
    pub state_dir: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            dialect: "sqlite".to_string(),
            primary: "development".to_string(),
            state_dir: PathBuf::from(STATE_DIR),
        }
    }
}

/// Migration configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationConfig {
    /// Directory for revision scripts
    pub directory: PathBuf,

    /// Target schema descriptor (`.json` or `.toml`)
    pub target: Option<PathBuf>,

    /// Only compare these tables (empty = all)
    pub include_tables: Vec<String>,

    /// Never compare these tables
    pub exclude_tables: Vec<String>,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from(MIGRATIONS_DIR),
            target: None,
            include_tables: Vec::new(),
            exclude_tables: Vec::new(),
        }
    }
}

/// Automatic repair switches
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoFixConfig {
    /// Merge multiple heads
    pub auto_merge_heads: bool,

    /// Generate a revision for schema drift
    pub auto_generate: bool,

    /// Apply missing revisions
    pub auto_upgrade: bool,

    /// Ask before changing a production environment
    pub interactive_on_production: bool,

    /// Environments treated as production
    pub production_envs: Vec<String>,
}

impl Default for AutoFixConfig {
    fn default() -> Self {
        Self {
            auto_merge_heads: true,
            auto_generate: true,
            auto_upgrade: true,
            interactive_on_production: true,
            production_envs: vec!["production".to_string()],
        }
    }
}

/// One environment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    /// Environment name
    pub name: String,

    /// SQLite database file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl EnvironmentConfig {
    /// Database file, resolved against the project root
    pub fn database_path(&self, root: &Path, state_dir: &Path) -> PathBuf {
        match &self.path {
            Some(path) => root.join(path),
            None => root.join(state_dir).join(format!("{}.db", self.name)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let config: Config = toml::from_str(
            r#"
            [database]
            dialect = "sqlite"
            primary = "dev"

            [migrations]
            directory = "db/migrations"
            target = "schema.json"
            exclude_tables = ["audit_log"]

            [auto_fix]
            auto_generate = false
            production_envs = ["prod"]

            [[environments]]
            name = "dev"
            path = "dev.db"

            [[environments]]
            name = "prod"
            "#,
        )
        .unwrap();

        config.validate().unwrap();
        assert_eq!(config.dialect().unwrap(), Dialect::Sqlite);
        assert_eq!(config.migrations.directory, PathBuf::from("db/migrations"));
        assert!(!config.auto_fix.auto_generate);
        assert!(config.auto_fix.auto_upgrade);
        assert!(config.requires_confirmation("prod"));
        assert!(!config.requires_confirmation("dev"));
        assert_eq!(config.other_environments("dev"), vec!["prod"]);
        assert!(!config.schema_filter().should_include_table("audit_log"));

        let root = Path::new("/srv/app");
        let prod = config.environment("prod").unwrap();
        assert_eq!(
            prod.database_path(root, &config.database.state_dir),
            PathBuf::from("/srv/app/.lineage/prod.db")
        );
    }

    #[test]
    fn test_defaults() {
        let config = Config::default_for_dialect(Dialect::Sqlite);
        assert_eq!(config.database.primary, "development");
        assert_eq!(config.environments.len(), 1);
        assert!(config.auto_fix.auto_merge_heads);
        config.validate().unwrap();
    }

    #[test]
    fn test_rejects_unknown_primary() {
        let config: Config = toml::from_str(
            r#"
            [database]
            primary = "staging"

            [[environments]]
            name = "dev"
            "#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_unknown_dialect() {
        let mut config = Config::default();
        config.database.dialect = "oracle".to_string();
        assert!(config.validate().is_err());
    }
}
