//! Propagating applied revisions from one environment to another.

use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::apply::{ApplyOrchestrator, ApplyReport, CancelHandle, Environment};
use crate::error::{MigrateResult, MigrationError};
use crate::graph::{DivergenceReport, LineageRelation, LineageView, lineage_divergence};
use crate::history::AppliedState;
use crate::merge::MergeSynthesizer;
use crate::revision::{Revision, RevisionGraph};
use crate::store::RevisionStore;

/// Options for a sync run.
#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    /// Apply the plan instead of only reporting it.
    pub auto_fix: bool,
    /// Compute the plan but never write anything.
    pub dry_run: bool,
    /// Cancellation for the apply phase.
    pub cancel: CancelHandle,
}

impl SyncOptions {
    /// Report-only options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set whether to apply.
    pub fn auto_fix(mut self, auto_fix: bool) -> Self {
        self.auto_fix = auto_fix;
        self
    }

    /// Set dry-run mode.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Use a caller-held cancellation handle.
    pub fn cancel(mut self, cancel: CancelHandle) -> Self {
        self.cancel = cancel;
        self
    }

    fn applies(&self) -> bool {
        self.auto_fix && !self.dry_run
    }
}

/// Outcome classification of a sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// Nothing to do.
    InSync,
    /// Target lacked source revisions; they were applied.
    Upgraded,
    /// Target lacks source revisions; plan not applied.
    Behind,
    /// Target has revisions the source lacks and nothing is missing.
    Ahead,
    /// Both sides have independent revisions; a join was planned.
    Forked,
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::InSync => "in sync",
            Self::Upgraded => "upgraded",
            Self::Behind => "behind",
            Self::Ahead => "ahead",
            Self::Forked => "forked",
        };
        f.write_str(name)
    }
}

/// What a sync found and did.
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    /// Source environment.
    pub source: String,
    /// Target environment.
    pub target: String,
    /// Classification.
    pub status: SyncStatus,
    /// Lineage comparison (`a` = source, `b` = target).
    pub divergence: DivergenceReport,
    /// Revisions to apply to the target, in order.
    pub plan: Vec<String>,
    /// Merge revision synthesized to join forked lineages.
    pub merge: Option<Revision>,
    /// Whether `merge` was written to the revision store.
    pub merge_persisted: bool,
    /// Apply outcome, when the plan was applied.
    pub applied: Option<ApplyReport>,
}

impl SyncReport {
    /// Whether the target was changed.
    pub fn has_changes(&self) -> bool {
        self.applied.as_ref().is_some_and(ApplyReport::has_changes)
    }
}

/// Compares two environments and brings the target up to the source.
#[derive(Debug, Default)]
pub struct EnvironmentSynchronizer {
    store: Option<RevisionStore>,
    merger: MergeSynthesizer,
    orchestrator: ApplyOrchestrator,
}

impl EnvironmentSynchronizer {
    /// Create a synchronizer that keeps merges in memory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Persist synthesized merges through `store`.
    pub fn with_store(mut self, store: RevisionStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Use a configured merge synthesizer.
    pub fn with_merger(mut self, merger: MergeSynthesizer) -> Self {
        self.merger = merger;
        self
    }

    /// Sync `target` to `source`.
    ///
    /// Fails with `DisjointLineage`, applying nothing, when the two applied
    /// lineages cannot be joined.
    #[instrument(skip_all, fields(source = %source.name(), target = %target.name()))]
    pub async fn sync(
        &self,
        graph: &RevisionGraph,
        source: &Environment,
        target: &Environment,
        options: &SyncOptions,
    ) -> MigrateResult<SyncReport> {
        let source_state = source.applied_state().await?;
        let target_state = target.applied_state().await?;

        let divergence = lineage_divergence(
            LineageView::new(source.name(), graph, &source_state),
            LineageView::new(target.name(), graph, &target_state),
        )?;
        if !divergence.unknown_to_a.is_empty() {
            return Err(MigrationError::DisjointLineage {
                source_env: source.name().to_string(),
                target_env: target.name().to_string(),
                revisions: divergence.unknown_to_a.clone(),
            });
        }

        let mut report = SyncReport {
            source: source.name().to_string(),
            target: target.name().to_string(),
            status: SyncStatus::InSync,
            divergence,
            plan: Vec::new(),
            merge: None,
            merge_persisted: false,
            applied: None,
        };

        match report.divergence.relation() {
            LineageRelation::Identical => {}
            LineageRelation::ABehind => report.status = SyncStatus::Ahead,
            LineageRelation::BBehind => {
                report.status = SyncStatus::Behind;
                report.plan = report.divergence.only_in_a.clone();
                if options.applies() {
                    let applied = self
                        .orchestrator
                        .apply(graph, &report.plan, target, &options.cancel)
                        .await?;
                    report.status = SyncStatus::Upgraded;
                    report.applied = Some(applied);
                }
            }
            LineageRelation::Forked => {
                report.status = SyncStatus::Forked;
                self.join(graph, &source_state, &target_state, target, options, &mut report)
                    .await?;
            }
        }

        info!(status = %report.status, plan = ?report.plan, "Sync finished");
        Ok(report)
    }

    async fn join(
        &self,
        graph: &RevisionGraph,
        source_state: &AppliedState,
        target_state: &AppliedState,
        target: &Environment,
        options: &SyncOptions,
        report: &mut SyncReport,
    ) -> MigrateResult<()> {
        let wanted = graph.lineage_closure(source_state.heads().chain(target_state.heads()))?;
        let done = graph.lineage_closure(target_state.heads())?;

        // Prefer a revision already joining both lineages.
        if let Some(join) = first_descendant_of_all(graph, &wanted)? {
            let mut missing = graph.lineage_closure([join.as_str()])?;
            missing.retain(|id| !done.contains(id));
            report.plan = graph.topological_order(&missing);
        } else {
            let heads = frontier(graph, &wanted)?;
            let merge = self.merger.synthesize(heads, graph)?.into_revision();
            let mut missing: BTreeSet<String> = wanted.difference(&done).cloned().collect();
            missing.insert(merge.id.clone());
            let extended = graph.with_revision(merge.clone())?;
            report.plan = extended.topological_order(&missing);
            report.merge = Some(merge);
        }

        if !options.applies() {
            return Ok(());
        }

        let graph = match &report.merge {
            Some(merge) => match &self.store {
                Some(store) => {
                    let (extended, _) = store.append_revision(graph, merge).await?;
                    report.merge_persisted = true;
                    extended
                }
                None => {
                    warn!(id = %merge.id, "No revision store configured; merge kept in memory");
                    graph.with_revision(merge.clone())?
                }
            },
            None => graph.clone(),
        };

        let applied = self
            .orchestrator
            .apply(&graph, &report.plan, target, &options.cancel)
            .await?;
        report.applied = Some(applied);
        Ok(())
    }
}

/// First revision, in topological order, whose lineage covers `wanted`.
fn first_descendant_of_all(
    graph: &RevisionGraph,
    wanted: &BTreeSet<String>,
) -> MigrateResult<Option<String>> {
    let all: BTreeSet<String> = graph.ids().map(String::from).collect();
    for id in graph.topological_order(&all) {
        if wanted.contains(&id) {
            continue;
        }
        if graph.lineage_closure([id.as_str()])?.is_superset(wanted) {
            return Ok(Some(id));
        }
    }
    Ok(None)
}

/// Members of `set` that are not an ancestor of another member.
fn frontier(graph: &RevisionGraph, set: &BTreeSet<String>) -> MigrateResult<Vec<String>> {
    let mut covered = BTreeSet::new();
    for id in set {
        covered.extend(graph.ancestors(id)?);
    }
    Ok(set.iter().filter(|id| !covered.contains(*id)).cloned().collect())
}
