//! Reconciliation engine.
//!
//! The [`Reconciler`] ties the revision store, the configured environments
//! and the target schema together. Hosts call [`Reconciler::reconcile`] once
//! at startup; the CLI drives the finer-grained `check`, `fix`, `sync_env` and
//! `autogen` operations.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::apply::{ApplyOrchestrator, CancelHandle, Environment};
use crate::diff::{DiffPlan, SchemaDiffer};
use crate::error::{MigrateResult, MigrationError};
use crate::file::timestamp_id;
use crate::graph::{
    DivergenceReport, LineageView, detached_heads, find_heads, find_missing, lineage_divergence,
};
use crate::history::AppliedState;
use crate::merge::MergeSynthesizer;
use crate::revision::{Revision, RevisionGraph, RevisionPayload};
use crate::schema::{SchemaFilter, TargetSchemaProvider};
use crate::store::RevisionStore;
use crate::sync::{EnvironmentSynchronizer, SyncOptions, SyncReport};

/// Options for [`Reconciler::reconcile`].
#[derive(Debug, Clone)]
pub struct ReconcileOptions {
    /// Apply the corrective plan instead of only reporting it.
    pub auto_fix: bool,
    /// Environments compared against the reconciled one. With
    /// `auto_upgrade` they are brought up to the head too.
    pub check_envs: Vec<String>,
    /// Check environments that are reported but never upgraded.
    pub protected_envs: Vec<String>,
    /// Compute plans without applying anything.
    pub dry_run: bool,
    /// Merge multiple script heads when fixing.
    pub auto_merge_heads: bool,
    /// Generate a revision for schema drift when fixing.
    pub auto_generate: bool,
    /// Apply missing revisions when fixing.
    pub auto_upgrade: bool,
    /// Cancellation for apply phases.
    pub cancel: CancelHandle,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            auto_fix: false,
            check_envs: Vec::new(),
            protected_envs: Vec::new(),
            dry_run: false,
            auto_merge_heads: true,
            auto_generate: true,
            auto_upgrade: true,
            cancel: CancelHandle::default(),
        }
    }
}

impl ReconcileOptions {
    /// Report-only options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set whether to apply fixes.
    pub fn auto_fix(mut self, auto_fix: bool) -> Self {
        self.auto_fix = auto_fix;
        self
    }

    /// Set the environments to compare against.
    pub fn check_envs<I, S>(mut self, envs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.check_envs = envs.into_iter().map(Into::into).collect();
        self
    }

    /// Set the check environments that must not be upgraded.
    pub fn protect_envs<I, S>(mut self, envs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.protected_envs = envs.into_iter().map(Into::into).collect();
        self
    }

    /// Set dry-run mode.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Set whether multiple heads are merged.
    pub fn auto_merge_heads(mut self, enabled: bool) -> Self {
        self.auto_merge_heads = enabled;
        self
    }

    /// Set whether schema drift produces a revision.
    pub fn auto_generate(mut self, enabled: bool) -> Self {
        self.auto_generate = enabled;
        self
    }

    /// Set whether missing revisions are applied.
    pub fn auto_upgrade(mut self, enabled: bool) -> Self {
        self.auto_upgrade = enabled;
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

/// A revision whose parent is not in the script directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MissingLink {
    /// The revision.
    pub revision: String,
    /// The parent it names.
    pub parent: String,
}

/// Consistency of one environment against the script graph.
#[derive(Debug, Clone, Serialize)]
pub struct EnvironmentStatus {
    /// Environment name.
    pub name: String,
    /// Applied heads, when the bookkeeping could be read.
    pub applied: Option<AppliedState>,
    /// Applied identifiers the graph does not know.
    pub detached: Vec<String>,
    /// Revisions not yet applied, parent-before-child.
    pub pending: Vec<String>,
    /// Why the environment could not be checked.
    pub error: Option<String>,
}

impl EnvironmentStatus {
    /// Whether the environment is at the script head with nothing detached.
    pub fn is_consistent(&self) -> bool {
        self.error.is_none() && self.detached.is_empty() && self.pending.is_empty()
    }
}

/// Lineage comparison between the reconciled environment and another.
#[derive(Debug, Clone, Serialize)]
pub struct EnvironmentDivergence {
    /// The other environment.
    pub env: String,
    /// The comparison, when it could be made.
    pub report: Option<DivergenceReport>,
    /// Why it could not be made.
    pub error: Option<String>,
}

impl EnvironmentDivergence {
    /// Whether the two environments differ in any way.
    pub fn is_diverged(&self) -> bool {
        self.error.is_some() || self.report.as_ref().is_some_and(DivergenceReport::is_diverged)
    }
}

/// Everything `check` found wrong, without fixing any of it.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConflictReport {
    /// Heads of the script graph.
    pub script_heads: Vec<String>,
    /// Revisions naming a parent that does not exist.
    pub missing_links: Vec<MissingLink>,
    /// Per-environment consistency, reconciled environment first.
    pub environments: Vec<EnvironmentStatus>,
    /// Comparisons against the `check_envs`.
    pub divergence: Vec<EnvironmentDivergence>,
}

impl ConflictReport {
    /// Whether the graph has more than one head.
    pub fn has_multiple_heads(&self) -> bool {
        self.script_heads.len() > 1
    }

    /// Whether nothing needs attention.
    pub fn is_clean(&self) -> bool {
        !self.has_multiple_heads()
            && self.missing_links.is_empty()
            && self.environments.iter().all(EnvironmentStatus::is_consistent)
            && !self.divergence.iter().any(EnvironmentDivergence::is_diverged)
    }

    /// Status of a named environment.
    pub fn environment(&self, name: &str) -> Option<&EnvironmentStatus> {
        self.environments.iter().find(|e| e.name == name)
    }
}

/// A corrective action taken by `reconcile`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Fix {
    /// Script heads were joined by a new merge revision.
    MergedHeads {
        /// The merge revision.
        revision: String,
        /// The joined heads.
        parents: Vec<String>,
    },
    /// Missing revisions were applied.
    Upgraded {
        /// Environment upgraded.
        env: String,
        /// Revisions applied, in order.
        revisions: Vec<String>,
    },
    /// A revision was generated from schema drift.
    Generated {
        /// The new revision.
        revision: String,
        /// Plan summary.
        summary: String,
    },
}

/// Outcome of `check` or `reconcile`.
#[derive(Debug, Clone, Serialize)]
pub struct ReconcileReport {
    /// Environment reconciled.
    pub env: String,
    /// Whether this was a dry run.
    pub dry_run: bool,
    /// What was found before any fix.
    pub conflicts: ConflictReport,
    /// Live-to-target schema plan, when a target is configured.
    pub schema_plan: Option<DiffPlan>,
    /// Why the schema plan could not be computed.
    pub schema_error: Option<String>,
    /// Actions taken.
    pub fixes: Vec<Fix>,
    /// Applied state once the run finished.
    pub applied: Option<AppliedState>,
    /// Duration in milliseconds.
    pub duration_ms: u64,
}

impl ReconcileReport {
    /// Whether anything needs attention.
    pub fn is_clean(&self) -> bool {
        self.conflicts.is_clean()
            && self.schema_error.is_none()
            && self.schema_plan.as_ref().is_none_or(DiffPlan::is_empty)
    }

    /// Whether any fix was applied.
    pub fn has_changes(&self) -> bool {
        !self.fixes.is_empty()
    }
}

/// A revision created by `autogen`.
#[derive(Debug, Clone)]
pub struct AutogenReport {
    /// The new revision.
    pub revision: Revision,
    /// The plan it was rendered from.
    pub plan: DiffPlan,
    /// Where it was written.
    pub path: PathBuf,
    /// The graph including it.
    pub graph: RevisionGraph,
}

type RevisionIdGenerator = Arc<dyn Fn(&RevisionGraph) -> String + Send + Sync>;

/// Drives detection and repair across the configured environments.
pub struct Reconciler {
    store: RevisionStore,
    environments: Vec<Environment>,
    target: Option<Arc<dyn TargetSchemaProvider>>,
    differ: SchemaDiffer,
    merger: MergeSynthesizer,
    orchestrator: ApplyOrchestrator,
    revision_ids: RevisionIdGenerator,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("store", &self.store)
            .field("environments", &self.environments)
            .field("has_target", &self.target.is_some())
            .field("differ", &self.differ)
            .field("merger", &self.merger)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    /// Create a reconciler over a revision store with no environments.
    pub fn new(store: RevisionStore) -> Self {
        Self {
            store,
            environments: Vec::new(),
            target: None,
            differ: SchemaDiffer::new(),
            merger: MergeSynthesizer::new(),
            orchestrator: ApplyOrchestrator::new(),
            revision_ids: Arc::new(timestamp_id),
        }
    }

    /// Add an environment.
    pub fn with_environment(mut self, env: Environment) -> Self {
        self.environments.push(env);
        self
    }

    /// Set the source of the desired schema.
    pub fn with_target(mut self, target: impl TargetSchemaProvider + 'static) -> Self {
        self.target = Some(Arc::new(target));
        self
    }

    /// Exclude tables from schema comparison.
    pub fn with_filter(mut self, filter: SchemaFilter) -> Self {
        self.differ = SchemaDiffer::new().with_filter(filter);
        self
    }

    /// Use a configured merge synthesizer.
    pub fn with_merger(mut self, merger: MergeSynthesizer) -> Self {
        self.merger = merger;
        self
    }

    /// Use a custom identifier generator for generated revisions.
    pub fn with_revision_ids(
        mut self,
        generator: impl Fn(&RevisionGraph) -> String + Send + Sync + 'static,
    ) -> Self {
        self.revision_ids = Arc::new(generator);
        self
    }

    /// The revision store.
    pub fn store(&self) -> &RevisionStore {
        &self.store
    }

    /// Configured environments.
    pub fn environments(&self) -> &[Environment] {
        &self.environments
    }

    /// Look up an environment by name.
    pub fn environment(&self, name: &str) -> MigrateResult<&Environment> {
        self.environments
            .iter()
            .find(|e| e.name() == name)
            .ok_or_else(|| MigrationError::UnknownEnvironment(name.to_string()))
    }

    /// Report heads, applied state, divergence and schema drift for `env`.
    ///
    /// Nothing is written. Problems with individual environments or the live
    /// schema are recorded in the report; only an unreadable or cyclic script
    /// directory is an error.
    #[instrument(skip(self, options))]
    pub async fn check(&self, env: &str, options: &ReconcileOptions) -> MigrateResult<ReconcileReport> {
        let started = Instant::now();
        let primary = self.environment(env)?;

        let revisions = self.store.scripts().list_revisions().await?;
        let missing_links = find_missing_links(&revisions);
        let graph = if missing_links.is_empty() {
            RevisionGraph::build(revisions)?
        } else {
            warn!(count = missing_links.len(), "Revisions with missing parents");
            RevisionGraph::empty()
        };

        let mut conflicts = ConflictReport {
            script_heads: find_heads(&graph)?,
            missing_links,
            ..Default::default()
        };

        let mut names = vec![env.to_string()];
        for name in &options.check_envs {
            if !names.contains(name) {
                names.push(name.clone());
            }
        }
        for name in &names {
            conflicts.environments.push(self.environment_status(&graph, name).await);
        }

        let primary_state = conflicts.environments[0].applied.clone();
        for name in names.iter().skip(1) {
            let status = conflicts.environment(name).cloned();
            conflicts.divergence.push(divergence_against(
                &graph,
                env,
                primary_state.as_ref(),
                name,
                status.as_ref(),
            ));
        }

        let (schema_plan, schema_error) = match self.schema_plan(primary).await {
            Ok(plan) => (plan, None),
            Err(e) => {
                warn!(env, error = %e, "Schema comparison failed");
                (None, Some(e.to_string()))
            }
        };

        Ok(ReconcileReport {
            env: env.to_string(),
            dry_run: options.dry_run,
            applied: primary_state,
            conflicts,
            schema_plan,
            schema_error,
            fixes: Vec::new(),
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// Detect, and with `auto_fix` repair, inconsistencies for `env`.
    ///
    /// Fixes run in order: merge multiple heads, apply missing revisions,
    /// generate and apply a revision for remaining schema drift. Each is
    /// gated by its own switch.
    #[instrument(skip(self, options), fields(auto_fix = options.auto_fix, dry_run = options.dry_run))]
    pub async fn reconcile(
        &self,
        env: &str,
        options: &ReconcileOptions,
    ) -> MigrateResult<ReconcileReport> {
        let started = Instant::now();
        let mut report = self.check(env, options).await?;
        if !report.conflicts.missing_links.is_empty() {
            let link = &report.conflicts.missing_links[0];
            return Err(MigrationError::OrphanRevision {
                revision: link.revision.clone(),
                missing_parent: link.parent.clone(),
            });
        }
        if !options.applies() {
            return Ok(report);
        }

        let primary = self.environment(env)?;
        let mut graph = self.store.load_graph().await?;

        if report.conflicts.has_multiple_heads() {
            let heads = report.conflicts.script_heads.clone();
            if !options.auto_merge_heads {
                return Err(MigrationError::MultipleHeads(heads));
            }
            let merge = self.merger.synthesize(heads, &graph)?.into_revision();
            let (extended, _) = self.store.append_revision(&graph, &merge).await?;
            graph = extended;
            report.fixes.push(Fix::MergedHeads {
                revision: merge.id.clone(),
                parents: merge.parents.clone(),
            });
        }

        if options.auto_upgrade {
            self.upgrade(&graph, primary, &options.cancel, &mut report).await?;
        }

        if options.auto_generate && self.target.is_some() {
            let state = primary.applied_state().await?;
            if find_missing(&graph, &state)?.is_empty() {
                match self.generate(&graph, primary, "autogenerated").await {
                    Ok(generated) => {
                        report.fixes.push(Fix::Generated {
                            revision: generated.revision.id.clone(),
                            summary: generated.plan.summary(),
                        });
                        graph = generated.graph;
                        if options.auto_upgrade {
                            self.upgrade(&graph, primary, &options.cancel, &mut report)
                                .await?;
                        }
                    }
                    Err(MigrationError::NoChanges) => {}
                    Err(e) => return Err(e),
                }
            } else {
                warn!(env, "Environment not at head; skipping autogenerate");
            }
        }

        if options.auto_upgrade {
            self.upgrade_check_envs(&graph, env, options, &mut report).await?;
        }

        report.applied = Some(primary.applied_state().await?);
        report.duration_ms = started.elapsed().as_millis() as u64;
        info!(env, fixes = report.fixes.len(), "Reconciled");
        Ok(report)
    }

    /// Merge heads (when `auto_merge`) and apply missing revisions to `env`.
    pub async fn fix(&self, env: &str, auto_merge: bool) -> MigrateResult<ReconcileReport> {
        let options = ReconcileOptions::new()
            .auto_fix(true)
            .auto_merge_heads(auto_merge)
            .auto_generate(false);
        self.reconcile(env, &options).await
    }

    /// Bring `to` up to the lineage applied on `from`.
    pub async fn sync_env(
        &self,
        from: &str,
        to: &str,
        options: &SyncOptions,
    ) -> MigrateResult<SyncReport> {
        let source = self.environment(from)?;
        let target = self.environment(to)?;
        let graph = self.store.load_graph().await?;
        EnvironmentSynchronizer::new()
            .with_store(self.store.clone())
            .with_merger(self.merger.clone())
            .sync(&graph, source, target, options)
            .await
    }

    /// Write a revision that brings `env`'s live schema to the target.
    ///
    /// `env` must be at the single script head. Fails with `NoChanges` when
    /// the schemas already match.
    pub async fn autogen(&self, env: &str, label: &str) -> MigrateResult<AutogenReport> {
        let primary = self.environment(env)?;
        let graph = self.store.load_graph().await?;
        let state = primary.applied_state().await?;
        let pending = find_missing(&graph, &state)?;
        if !pending.is_empty() {
            return Err(MigrationError::invalid_plan(format!(
                "environment '{}' has {} unapplied revision(s); upgrade before generating",
                env,
                pending.len()
            )));
        }
        self.generate(&graph, primary, label).await
    }

    async fn generate(
        &self,
        graph: &RevisionGraph,
        env: &Environment,
        label: &str,
    ) -> MigrateResult<AutogenReport> {
        let heads = find_heads(graph)?;
        if heads.len() > 1 {
            return Err(MigrationError::MultipleHeads(heads));
        }
        let plan = self
            .schema_plan(env)
            .await?
            .ok_or_else(|| MigrationError::other("no target schema configured"))?;
        if plan.is_empty() {
            return Err(MigrationError::NoChanges);
        }

        let sql = env.executor().dialect().renderer().render_plan(&plan)?;
        let revision = Revision::new((self.revision_ids)(graph), heads, label)
            .with_payload(RevisionPayload::new(sql.up, sql.down))
            .with_touches(plan.touched_objects());
        let (graph, path) = self.store.append_revision(graph, &revision).await?;
        info!(id = %revision.id, summary = %plan.summary(), "Generated revision");

        Ok(AutogenReport {
            revision,
            plan,
            path,
            graph,
        })
    }

    async fn upgrade(
        &self,
        graph: &RevisionGraph,
        env: &Environment,
        cancel: &CancelHandle,
        report: &mut ReconcileReport,
    ) -> MigrateResult<()> {
        let state = env.applied_state().await?;
        let missing = find_missing(graph, &state)?;
        if missing.is_empty() {
            return Ok(());
        }
        let applied = self.orchestrator.apply(graph, &missing, env, cancel).await?;
        if applied.has_changes() {
            report.fixes.push(Fix::Upgraded {
                env: env.name().to_string(),
                revisions: applied.applied,
            });
        }
        Ok(())
    }

    async fn upgrade_check_envs(
        &self,
        graph: &RevisionGraph,
        env: &str,
        options: &ReconcileOptions,
        report: &mut ReconcileReport,
    ) -> MigrateResult<()> {
        for name in &options.check_envs {
            if name == env || options.protected_envs.contains(name) {
                continue;
            }
            let consistent = report
                .conflicts
                .environment(name)
                .is_some_and(|status| status.error.is_none() && status.detached.is_empty());
            if !consistent {
                warn!(env = %name, "Skipping upgrade of inconsistent environment");
                continue;
            }
            let other = self.environment(name)?;
            self.upgrade(graph, other, &options.cancel, report).await?;
        }
        Ok(())
    }

    async fn schema_plan(&self, env: &Environment) -> MigrateResult<Option<DiffPlan>> {
        let Some(target) = &self.target else {
            return Ok(None);
        };
        let target = target.target_schema().await?;
        let current = env.executor().introspect().await?;
        Ok(Some(self.differ.diff(&current, &target)?))
    }

    async fn environment_status(&self, graph: &RevisionGraph, name: &str) -> EnvironmentStatus {
        let mut status = EnvironmentStatus {
            name: name.to_string(),
            applied: None,
            detached: Vec::new(),
            pending: Vec::new(),
            error: None,
        };
        let state = match self.environment(name) {
            Ok(env) => env.applied_state().await,
            Err(e) => Err(e),
        };
        match state {
            Ok(state) => {
                status.detached = detached_heads(graph, &state);
                if status.detached.is_empty() {
                    match find_missing(graph, &state) {
                        Ok(pending) => status.pending = pending,
                        Err(e) => status.error = Some(e.to_string()),
                    }
                }
                status.applied = Some(state);
            }
            Err(e) => status.error = Some(e.to_string()),
        }
        status
    }
}

fn find_missing_links(revisions: &[Revision]) -> Vec<MissingLink> {
    let ids: BTreeSet<&str> = revisions.iter().map(|r| r.id.as_str()).collect();
    let mut links: Vec<MissingLink> = revisions
        .iter()
        .flat_map(|r| {
            r.parents
                .iter()
                .filter(|p| !ids.contains(p.as_str()))
                .map(|p| MissingLink {
                    revision: r.id.clone(),
                    parent: p.clone(),
                })
        })
        .collect();
    links.sort_by(|a, b| (&a.revision, &a.parent).cmp(&(&b.revision, &b.parent)));
    links
}

fn divergence_against(
    graph: &RevisionGraph,
    env: &str,
    state: Option<&AppliedState>,
    other: &str,
    other_status: Option<&EnvironmentStatus>,
) -> EnvironmentDivergence {
    let mut entry = EnvironmentDivergence {
        env: other.to_string(),
        report: None,
        error: None,
    };
    let other_state = other_status.and_then(|s| s.applied.as_ref());
    match (state, other_state) {
        (Some(a), Some(b)) => {
            match lineage_divergence(LineageView::new(env, graph, a), LineageView::new(other, graph, b)) {
                Ok(report) => entry.report = Some(report),
                Err(e) => entry.error = Some(e.to_string()),
            }
        }
        _ => {
            entry.error = Some(format!("applied state of '{}' or '{}' is unavailable", env, other));
        }
    }
    entry
}
