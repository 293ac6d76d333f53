//! `lineage sync` command - Propagate a lineage between environments.

use std::path::Path;

use lineage_migrate::SyncOptions;

use crate::cli::SyncArgs;
use crate::commands::{Project, report};
use crate::error::{CliError, CliResult};
use crate::output::{self, success};

/// Run the sync command
pub async fn run(args: SyncArgs, config_path: &Path) -> CliResult<()> {
    if args.from == args.to {
        return Err(CliError::Command(
            "--from and --to must name different environments".to_string(),
        ));
    }
    let project = Project::open(config_path).await?;
    let from = project.env_name(Some(&args.from))?;
    let to = project.env_name(Some(&args.to))?;

    let applies = args.apply && !args.dry_run;
    if applies {
        project.confirm_mutation(&to, &format!("Sync from '{}'", from), args.yes)?;
    }

    let options = SyncOptions::new().auto_fix(args.apply).dry_run(args.dry_run);
    let result = project.reconciler.sync_env(&from, &to, &options).await?;

    if args.json {
        return output::json(&result);
    }

    output::header(&format!("Sync: {} → {}", from, to));
    report::print_sync(&result);
    output::newline();
    if result.has_changes() {
        success(&format!("'{}' now matches '{}'", to, from));
    } else if !result.plan.is_empty() && !applies {
        output::info("Run with --apply to execute the plan");
    }
    Ok(())
}
