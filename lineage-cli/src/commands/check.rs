//! `lineage check` command - Report problems without changing anything.

use std::path::Path;

use lineage_migrate::{ReconcileOptions, ReconcileReport};

use crate::cli::CheckArgs;
use crate::commands::{Project, report};
use crate::error::{CliError, CliResult};
use crate::output::{self, success};

/// Run the check command
pub async fn run(args: CheckArgs, config_path: &Path) -> CliResult<()> {
    let project = Project::open(config_path).await?;
    let env = project.env_name(args.env.as_deref())?;
    let check_envs = if args.check_envs.is_empty() {
        project.config.other_environments(&env)
    } else {
        args.check_envs
    };

    let options = ReconcileOptions::new().check_envs(check_envs);
    let result = project.reconciler.check(&env, &options).await?;

    if args.json {
        output::json(&result)?;
    } else {
        output::header(&format!("Check: {}", env));
        report::print_reconcile(&result);
        output::newline();
    }

    let problems = problems(&result);
    if problems.is_empty() {
        if !args.json {
            success("No problems found");
        }
        Ok(())
    } else {
        Err(CliError::CheckFailed(problems.join("; ")))
    }
}

/// One line per kind of problem in the report
pub fn problems(report: &ReconcileReport) -> Vec<String> {
    let conflicts = &report.conflicts;
    let mut problems = Vec::new();
    if conflicts.has_multiple_heads() {
        problems.push(format!("{} heads", conflicts.script_heads.len()));
    }
    if !conflicts.missing_links.is_empty() {
        problems.push(format!("{} missing parent link(s)", conflicts.missing_links.len()));
    }
    for env in conflicts.environments.iter().filter(|e| !e.is_consistent()) {
        if env.error.is_some() {
            problems.push(format!("'{}' unavailable", env.name));
        } else if !env.detached.is_empty() {
            problems.push(format!("'{}' has detached revisions", env.name));
        } else {
            problems.push(format!("'{}' has {} pending revision(s)", env.name, env.pending.len()));
        }
    }
    for divergence in conflicts.divergence.iter().filter(|d| d.is_diverged()) {
        problems.push(format!("'{}' diverges from '{}'", divergence.env, report.env));
    }
    if report.schema_error.is_some() {
        problems.push("schema comparison failed".to_string());
    }
    if let Some(plan) = report.schema_plan.as_ref().filter(|p| !p.is_empty()) {
        problems.push(format!("schema drift ({})", plan.summary()));
    }
    problems
}
