//! Human-readable rendering of engine reports.

use lineage_migrate::{ConflictReport, DiffPlan, Fix, ReconcileReport, SyncReport};

use crate::output::{self, style_error, style_pending, style_success};

/// Operations shown before the list is truncated
const MAX_OPERATIONS: usize = 5;

/// Print conflicts, schema differences, environment consistency and fixes.
pub fn print_reconcile(report: &ReconcileReport) {
    print_conflicts(&report.conflicts);

    output::newline();
    output::section("Schema");
    match (&report.schema_plan, &report.schema_error) {
        (_, Some(error)) => output::list_item(&style_error(error)),
        (Some(plan), None) => print_plan(plan),
        (None, None) => output::dim("  No target schema configured"),
    }

    if !report.fixes.is_empty() {
        output::newline();
        output::section("Fixes applied");
        for fix in &report.fixes {
            output::list_item(&describe_fix(fix));
        }
    }

    if let Some(applied) = &report.applied {
        output::newline();
        output::kv("Applied", &applied.to_string());
    }
    output::kv("Duration", &format!("{}ms", report.duration_ms));
}

/// Print heads, missing links and per-environment state.
pub fn print_conflicts(conflicts: &ConflictReport) {
    output::section("Revisions");
    match conflicts.script_heads.len() {
        0 => output::dim("  No revisions"),
        1 => output::kv("Head", &conflicts.script_heads[0]),
        _ => output::kv(
            "Heads",
            &style_error(&format!(
                "{} (multiple heads)",
                conflicts.script_heads.join(", ")
            )),
        ),
    }
    for link in &conflicts.missing_links {
        output::list_item(&style_error(&format!(
            "{} names missing parent {}",
            link.revision, link.parent
        )));
    }

    output::newline();
    output::section("Environments");
    for env in &conflicts.environments {
        let state = env
            .applied
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_else(|| "unknown".to_string());
        let status = if let Some(error) = &env.error {
            style_error(error)
        } else if !env.detached.is_empty() {
            style_error(&format!("detached: {}", env.detached.join(", ")))
        } else if !env.pending.is_empty() {
            style_pending(&format!("{} pending", env.pending.len()))
        } else {
            style_success("up to date")
        };
        output::list_item(&format!("{} at {} ({})", env.name, state, status));
    }

    for divergence in &conflicts.divergence {
        let line = match (&divergence.report, &divergence.error) {
            (_, Some(error)) => style_error(&format!("{}: {}", divergence.env, error)),
            (Some(report), None) if report.is_diverged() => style_pending(&format!(
                "{}: {} only here, {} only there (common ancestor {})",
                divergence.env,
                report.only_in_a.len(),
                report.only_in_b.len(),
                report.common_ancestor.as_deref().unwrap_or("none")
            )),
            _ => style_success(&format!("{}: identical lineage", divergence.env)),
        };
        output::list_item(&line);
    }
}

/// Print the plan summary and its first operations.
pub fn print_plan(plan: &DiffPlan) {
    if plan.is_empty() {
        output::list_item(&style_success("Live schema matches target"));
        return;
    }
    output::kv("Changes", &plan.summary());
    for (i, op) in plan.iter().take(MAX_OPERATIONS).enumerate() {
        output::numbered_item(i + 1, &op.to_string());
    }
    if plan.len() > MAX_OPERATIONS {
        output::dim(&format!("  ... and {} more", plan.len() - MAX_OPERATIONS));
    }
}

/// Print a sync outcome.
pub fn print_sync(report: &SyncReport) {
    output::kv("Status", &report.status.to_string());
    if let Some(ancestor) = &report.divergence.common_ancestor {
        output::kv("Common ancestor", ancestor);
    }
    if let Some(merge) = &report.merge {
        let persisted = if report.merge_persisted {
            "written"
        } else {
            "not written"
        };
        output::kv(
            "Merge",
            &format!("{} joining {} ({})", merge.id, merge.parents.join(", "), persisted),
        );
    }
    if report.plan.is_empty() {
        output::dim("  Nothing to apply");
    } else {
        output::section("Plan");
        for (i, id) in report.plan.iter().enumerate() {
            output::numbered_item(i + 1, id);
        }
    }
    if let Some(applied) = &report.applied {
        output::kv(
            "Applied",
            &format!("{} revision(s) in {}ms", applied.applied.len(), applied.duration_ms),
        );
    }
}

fn describe_fix(fix: &Fix) -> String {
    match fix {
        Fix::MergedHeads { revision, parents } => {
            format!("Merged heads {} into {}", parents.join(", "), revision)
        }
        Fix::Upgraded { env, revisions } => {
            format!("Applied {} to {}", revisions.join(", "), env)
        }
        Fix::Generated { revision, summary } => {
            format!("Generated {} ({})", revision, summary)
        }
    }
}
