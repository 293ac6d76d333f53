//! `lineage autogen` command - Generate a revision from schema drift.

use std::path::Path;

use lineage_migrate::MigrationError;

use crate::cli::AutogenArgs;
use crate::commands::{Project, report};
use crate::error::CliResult;
use crate::output::{self, success};

/// Run the autogen command
pub async fn run(args: AutogenArgs, config_path: &Path) -> CliResult<()> {
    let project = Project::open(config_path).await?;
    let env = project.env_name(args.env.as_deref())?;

    output::header("Autogenerate Revision");
    match project.reconciler.autogen(&env, &args.message).await {
        Ok(generated) => {
            report::print_plan(&generated.plan);
            output::newline();
            output::kv("Parents", &generated.revision.parents.join(", "));
            output::kv("Path", &generated.path.display().to_string());
            output::newline();
            success(&format!("Revision '{}' created", generated.revision.id));
            Ok(())
        }
        Err(MigrationError::NoChanges) => {
            output::info("No changes detected; no revision written");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}
