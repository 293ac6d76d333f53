//! `lineage init` command - Initialize a new Lineage project.

use std::path::Path;

use lineage_migrate::Dialect;

use crate::cli::InitArgs;
use crate::config::{CONFIG_FILE_NAME, Config};
use crate::error::CliResult;
use crate::output::{self, confirm, success};

/// Run the init command
pub async fn run(args: InitArgs) -> CliResult<()> {
    output::header("Initialize Lineage Project");

    std::fs::create_dir_all(&args.path)?;
    let project_path = args
        .path
        .canonicalize()
        .unwrap_or_else(|_| args.path.clone());

    let config_path = project_path.join(CONFIG_FILE_NAME);
    if config_path.exists() {
        output::warn(&format!(
            "Project already initialized. {} exists.",
            CONFIG_FILE_NAME
        ));
        if !args.yes && !confirm("Reinitialize project?") {
            return Ok(());
        }
    }

    let dialect: Dialect = args.dialect.into();
    let config = Config::default_for_dialect(dialect);

    create_project_structure(&project_path, &config)?;
    config.save(&config_path)?;

    output::kv("Config", &config_path.display().to_string());
    output::kv("Dialect", dialect.as_str());
    output::newline();
    success("Project initialized successfully");

    output::newline();
    output::section("Next steps");
    output::list_item("Point `[migrations] target` at a schema descriptor (.json or .toml)");
    output::list_item("Run `lineage autogen -m \"initial\"` to create the first revision");
    output::list_item("Run `lineage fix` to apply it");
    Ok(())
}

fn create_project_structure(root: &Path, config: &Config) -> CliResult<()> {
    std::fs::create_dir_all(root.join(&config.migrations.directory))?;
    std::fs::create_dir_all(root.join(&config.database.state_dir))?;
    Ok(())
}
