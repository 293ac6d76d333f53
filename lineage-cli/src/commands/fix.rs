//! `lineage fix` command - Repair heads, pending revisions and schema drift.

use std::path::Path;

use lineage_migrate::ReconcileOptions;

use crate::cli::FixArgs;
use crate::commands::{Project, report};
use crate::error::CliResult;
use crate::output::{self, success};

/// Run the fix command
pub async fn run(args: FixArgs, config_path: &Path) -> CliResult<()> {
    let project = Project::open(config_path).await?;
    let env = project.env_name(args.env.as_deref())?;
    let switches = &project.config.auto_fix;

    let others = project.config.other_environments(&env);
    let protected: Vec<String> = others
        .iter()
        .filter(|name| !args.yes && project.config.requires_confirmation(name))
        .cloned()
        .collect();

    let options = ReconcileOptions::new()
        .auto_fix(true)
        .dry_run(args.dry_run)
        .auto_merge_heads(switches.auto_merge_heads && !args.no_merge)
        .auto_generate(switches.auto_generate && !args.no_generate)
        .auto_upgrade(switches.auto_upgrade && !args.no_upgrade)
        .check_envs(others)
        .protect_envs(protected.clone());

    if !args.dry_run {
        project.confirm_mutation(&env, "Apply fixes", args.yes)?;
    }

    let result = project.reconciler.reconcile(&env, &options).await?;

    if args.json {
        return output::json(&result);
    }

    output::header(&format!("Fix: {}", env));
    report::print_reconcile(&result);
    output::newline();
    if options.auto_upgrade && !protected.is_empty() && !args.dry_run {
        output::info(&format!(
            "Not upgraded without --yes: {}",
            protected.join(", ")
        ));
    }
    if args.dry_run {
        output::info("Dry run: nothing was changed");
    } else if result.has_changes() {
        success(&format!("{} fix(es) applied to '{}'", result.fixes.len(), env));
    } else {
        success("Nothing to fix");
    }
    Ok(())
}
