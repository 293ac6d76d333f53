//! `lineage status` command - Show heads and applied state.

use std::path::Path;

use lineage_migrate::ReconcileOptions;

use crate::cli::StatusArgs;
use crate::commands::{Project, report};
use crate::error::CliResult;
use crate::output;

/// Run the status command
pub async fn run(args: StatusArgs, config_path: &Path) -> CliResult<()> {
    let project = Project::open(config_path).await?;
    let env = project.env_name(None)?;
    let options = ReconcileOptions::new().check_envs(project.config.other_environments(&env));
    let result = project.reconciler.check(&env, &options).await?;

    if args.json {
        return output::json(&result.conflicts);
    }

    output::header("Lineage Status");
    output::kv(
        "Migrations",
        &project.reconciler.store().migrations_dir().display().to_string(),
    );
    output::newline();
    report::print_conflicts(&result.conflicts);
    Ok(())
}
