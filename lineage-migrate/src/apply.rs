//! Transactional, fail-fast application of revisions and schema plans.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::diff::{DiffOperation, SchemaDiffer};
use crate::error::{MigrateResult, MigrationError};
use crate::history::{AppliedState, Bookkeeping};
use crate::revision::{Revision, RevisionGraph};
use crate::schema::SchemaDescriptor;
use crate::sql::Dialect;

/// Executes DDL against one database.
#[async_trait::async_trait]
pub trait SchemaExecutor: Send + Sync {
    /// Dialect of the database.
    fn dialect(&self) -> Dialect;

    /// Open a transaction scoped to a single step.
    async fn begin(&self) -> MigrateResult<Box<dyn StepTransaction>>;

    /// Describe the live schema.
    async fn introspect(&self) -> MigrateResult<SchemaDescriptor>;
}

/// A transaction wrapping one apply step.
#[async_trait::async_trait]
pub trait StepTransaction: Send {
    /// Execute a (possibly multi-statement) SQL body.
    async fn execute(&mut self, sql: &str) -> MigrateResult<()>;

    /// Execute structural operations rendered together as `statements`.
    async fn execute_operations(
        &mut self,
        _ops: &[DiffOperation],
        statements: &[String],
    ) -> MigrateResult<()> {
        for statement in statements {
            self.execute(statement).await?;
        }
        Ok(())
    }

    /// Commit the step.
    async fn commit(self: Box<Self>) -> MigrateResult<()>;

    /// Roll the step back.
    async fn rollback(self: Box<Self>) -> MigrateResult<()>;
}

/// A named database: its bookkeeping plus its executor.
#[derive(Clone)]
pub struct Environment {
    name: String,
    bookkeeping: Arc<dyn Bookkeeping>,
    executor: Arc<dyn SchemaExecutor>,
}

impl Environment {
    /// Create an environment.
    pub fn new(
        name: impl Into<String>,
        bookkeeping: Arc<dyn Bookkeeping>,
        executor: Arc<dyn SchemaExecutor>,
    ) -> Self {
        Self {
            name: name.into(),
            bookkeeping,
            executor,
        }
    }

    /// Environment identifier.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Its bookkeeping record.
    pub fn bookkeeping(&self) -> &dyn Bookkeeping {
        self.bookkeeping.as_ref()
    }

    /// Its executor.
    pub fn executor(&self) -> &dyn SchemaExecutor {
        self.executor.as_ref()
    }

    /// Read the applied state, reporting failures as `BookkeepingUnavailable`.
    pub async fn applied_state(&self) -> MigrateResult<AppliedState> {
        self.bookkeeping.load().await.map_err(|e| match e {
            e @ MigrationError::BookkeepingUnavailable { .. } => e,
            other => MigrationError::bookkeeping(&self.name, other.to_string()),
        })
    }
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Environment")
            .field("name", &self.name)
            .field("dialect", &self.executor.dialect())
            .finish_non_exhaustive()
    }
}

/// Phase of an apply run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyPhase {
    /// Not started.
    Pending,
    /// Lock held, steps executing.
    Applying,
    /// Every step committed.
    Committed,
    /// A step failed and its transaction was rolled back.
    RolledBack,
    /// A step failed and its rollback failed too.
    Failed,
}

impl ApplyPhase {
    /// Whether `next` may follow this phase.
    pub fn can_transition(self, next: ApplyPhase) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Applying)
                | (Self::Applying, Self::Committed | Self::RolledBack | Self::Failed)
        )
    }

    /// Whether the run is over.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Committed | Self::RolledBack | Self::Failed)
    }

    /// Terminal phase described by an apply error, if it is one.
    pub fn of_error(err: &MigrationError) -> Option<ApplyPhase> {
        match err {
            MigrationError::PartialApplyFailure { rolled_back, .. } => Some(if *rolled_back {
                Self::RolledBack
            } else {
                Self::Failed
            }),
            _ => None,
        }
    }
}

impl fmt::Display for ApplyPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Applying => "applying",
            Self::Committed => "committed",
            Self::RolledBack => "rolled back",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Cooperative cancellation, checked between steps only.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    cancelled: Arc<AtomicBool>,
}

impl CancelHandle {
    /// Create a handle that is not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Outcome of a completed apply run.
#[derive(Debug, Clone, Serialize)]
pub struct ApplyReport {
    /// Environment applied to.
    pub env: String,
    /// Final phase.
    pub phase: ApplyPhase,
    /// Steps executed in this run, in order.
    pub applied: Vec<String>,
    /// Steps skipped because they were already applied.
    pub skipped: Vec<String>,
    /// Applied state after the run.
    pub state: AppliedState,
    /// Duration in milliseconds.
    pub duration_ms: u64,
}

impl ApplyReport {
    /// Whether the run changed anything.
    pub fn has_changes(&self) -> bool {
        !self.applied.is_empty()
    }
}

struct ApplyRun {
    env: String,
    phase: ApplyPhase,
    started: Instant,
    applied: Vec<String>,
    skipped: Vec<String>,
}

impl ApplyRun {
    fn new(env: &str) -> Self {
        Self {
            env: env.to_string(),
            phase: ApplyPhase::Pending,
            started: Instant::now(),
            applied: Vec::new(),
            skipped: Vec::new(),
        }
    }

    fn transition(&mut self, next: ApplyPhase) {
        debug_assert!(self.phase.can_transition(next), "{} -> {}", self.phase, next);
        debug!(env = %self.env, from = %self.phase, to = %next, "Apply phase");
        self.phase = next;
    }

    fn last_successful(&self) -> Option<String> {
        self.applied.last().cloned()
    }

    fn finish(mut self, state: AppliedState) -> ApplyReport {
        self.transition(ApplyPhase::Committed);
        ApplyReport {
            env: self.env,
            phase: self.phase,
            applied: self.applied,
            skipped: self.skipped,
            state,
            duration_ms: self.started.elapsed().as_millis() as u64,
        }
    }

    fn fail(
        &mut self,
        failed_step: &str,
        prior_state: &AppliedState,
        failure: StepFailure,
    ) -> MigrationError {
        self.transition(if failure.rolled_back {
            ApplyPhase::RolledBack
        } else {
            ApplyPhase::Failed
        });
        warn!(
            env = %self.env,
            step = failed_step,
            rolled_back = failure.rolled_back,
            error = %failure.error,
            "Apply step failed"
        );
        match failure.error {
            // The caller retries conflicts after re-acquiring the lock.
            e @ MigrationError::WriteConflict { .. } if failure.rolled_back => e,
            e => MigrationError::PartialApplyFailure {
                env: self.env.clone(),
                failed_step: failed_step.to_string(),
                last_successful: self.last_successful(),
                prior_state: prior_state.to_vec(),
                rolled_back: failure.rolled_back,
                reason: e.to_string(),
            },
        }
    }

    fn cancelled(&self) -> MigrationError {
        info!(env = %self.env, "Apply cancelled between steps");
        MigrationError::Cancelled {
            env: self.env.clone(),
            last_successful: self.last_successful(),
        }
    }
}

struct StepFailure {
    error: MigrationError,
    rolled_back: bool,
}

/// Runs ordered steps against an environment, one transaction per step.
///
/// A run holds the environment lock from before the applied state is read
/// until it finishes, fails or is cancelled. The first failing step is rolled
/// back and nothing after it is attempted.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApplyOrchestrator;

impl ApplyOrchestrator {
    /// Create an orchestrator.
    pub fn new() -> Self {
        Self
    }

    /// Apply the revisions `steps` (ids in `graph`, parent-before-child).
    ///
    /// Steps already covered by the environment's applied lineage are
    /// skipped, so re-running a fully applied plan returns the unchanged
    /// state.
    #[instrument(skip(self, graph, steps, env, cancel), fields(env = %env.name(), steps = steps.len()))]
    pub async fn apply(
        &self,
        graph: &RevisionGraph,
        steps: &[String],
        env: &Environment,
        cancel: &CancelHandle,
    ) -> MigrateResult<ApplyReport> {
        let mut run = ApplyRun::new(env.name());
        let _lock = env.bookkeeping().acquire_lock().await?;

        let mut state = env.applied_state().await?;
        let mut done = graph.lineage_closure(state.heads())?;
        run.transition(ApplyPhase::Applying);

        for id in steps {
            if done.contains(id) {
                run.skipped.push(id.clone());
                continue;
            }
            let revision = graph
                .get(id)
                .ok_or_else(|| MigrationError::UnknownRevision(id.clone()))?;
            if let Some(missing) = revision.parents.iter().find(|p| !done.contains(*p)) {
                return Err(MigrationError::invalid_plan(format!(
                    "step '{}' requires unapplied parent '{}'",
                    id, missing
                )));
            }
            if cancel.is_cancelled() {
                return Err(run.cancelled());
            }

            match self.apply_revision(env, revision, &state).await {
                Ok(next) => {
                    info!(env = %env.name(), revision = %id, "Applied revision");
                    state = next;
                    done.insert(id.clone());
                    run.applied.push(id.clone());
                }
                Err(failure) => return Err(run.fail(id, &state, failure)),
            }
        }

        Ok(run.finish(state))
    }

    async fn apply_revision(
        &self,
        env: &Environment,
        revision: &Revision,
        state: &AppliedState,
    ) -> Result<AppliedState, StepFailure> {
        let mut tx = env.executor().begin().await.map_err(|error| StepFailure {
            error,
            rolled_back: true,
        })?;

        let next = state.advance(revision);
        let mut result = Ok(());
        if !revision.payload.is_noop() {
            result = tx.execute(&revision.payload.upgrade).await;
        }
        if result.is_ok() {
            result = env.bookkeeping().persist(state, &next).await;
        }

        match result {
            Ok(()) => match tx.commit().await {
                Ok(()) => Ok(next),
                Err(error) => {
                    // Put the record back so it matches the database.
                    if let Err(e) = env.bookkeeping().persist(&next, state).await {
                        warn!(env = %env.name(), error = %e, "Failed to restore applied state");
                    }
                    Err(StepFailure {
                        error,
                        rolled_back: false,
                    })
                }
            },
            Err(error) => {
                let rolled_back = tx.rollback().await.is_ok();
                Err(StepFailure { error, rolled_back })
            }
        }
    }

    /// Bring the live schema of `env` to `target`, one transaction per step.
    ///
    /// The live schema is introspected under the environment lock, so a
    /// repeated call against an already converged database is a no-op.
    /// Applied revision state is left untouched.
    #[instrument(skip(self, target, differ, env, cancel), fields(env = %env.name()))]
    pub async fn apply_schema(
        &self,
        target: &SchemaDescriptor,
        differ: &SchemaDiffer,
        env: &Environment,
        cancel: &CancelHandle,
    ) -> MigrateResult<ApplyReport> {
        let mut run = ApplyRun::new(env.name());
        let _lock = env.bookkeeping().acquire_lock().await?;

        let state = env.applied_state().await?;
        let current = env.executor().introspect().await?;
        let plan = differ.diff(&current, target)?;

        // Render everything up front so an unsupported operation fails the
        // run before anything executes.
        let renderer = env.executor().dialect().renderer();
        let steps = schema_steps(plan.operations(), renderer.inlines_constraints());
        let mut rendered = Vec::with_capacity(steps.len());
        for (step, ops) in steps {
            let statements = renderer.render_operations(&ops)?;
            rendered.push((step, ops, statements));
        }
        run.transition(ApplyPhase::Applying);

        for (step, ops, statements) in rendered {
            if cancel.is_cancelled() {
                return Err(run.cancelled());
            }

            let mut tx = match env.executor().begin().await {
                Ok(tx) => tx,
                Err(error) => {
                    let failure = StepFailure {
                        error,
                        rolled_back: true,
                    };
                    return Err(run.fail(&step, &state, failure));
                }
            };
            let failure = match tx.execute_operations(&ops, &statements).await {
                Ok(()) => match tx.commit().await {
                    Ok(()) => None,
                    Err(error) => Some(StepFailure {
                        error,
                        rolled_back: false,
                    }),
                },
                Err(error) => {
                    let rolled_back = tx.rollback().await.is_ok();
                    Some(StepFailure { error, rolled_back })
                }
            };
            if let Some(failure) = failure {
                return Err(run.fail(&step, &state, failure));
            }

            debug!(env = %env.name(), step = %step, "Applied schema operation");
            run.applied.push(step);
        }

        Ok(run.finish(state))
    }
}

/// Split `ops` into named apply steps.
///
/// With a renderer that inlines constraints, a created table shares its step
/// with the constraints added to it, and a dropped table with the
/// constraints and indexes dropped from it. Every other operation is its own
/// step.
fn schema_steps(ops: &[DiffOperation], inline: bool) -> Vec<(String, Vec<DiffOperation>)> {
    if !inline {
        return ops.iter().map(|op| (op.to_string(), vec![op.clone()])).collect();
    }
    let created: BTreeSet<&str> = ops
        .iter()
        .filter(|op| matches!(op, DiffOperation::AddTable { .. }))
        .map(DiffOperation::table)
        .collect();
    let dropped: BTreeSet<&str> = ops
        .iter()
        .filter(|op| matches!(op, DiffOperation::DropTable { .. }))
        .map(DiffOperation::table)
        .collect();

    let mut steps = Vec::new();
    for op in ops {
        match op {
            DiffOperation::AddTable { table } => {
                let mut group = vec![op.clone()];
                group.extend(
                    ops.iter()
                        .filter(|other| match other {
                            DiffOperation::AddConstraint { table: owner, .. } => {
                                owner == &table.name
                            }
                            _ => false,
                        })
                        .cloned(),
                );
                steps.push((op.to_string(), group));
            }
            DiffOperation::AddConstraint { table, .. } if created.contains(table.as_str()) => {}
            DiffOperation::DropTable { table } => {
                let mut group: Vec<DiffOperation> = ops
                    .iter()
                    .filter(|other| match other {
                        DiffOperation::DropConstraint { table: owner, .. }
                        | DiffOperation::DropIndex { table: owner, .. } => owner == &table.name,
                        _ => false,
                    })
                    .cloned()
                    .collect();
                group.push(op.clone());
                steps.push((op.to_string(), group));
            }
            DiffOperation::DropConstraint { table, .. } | DiffOperation::DropIndex { table, .. }
                if dropped.contains(table.as_str()) => {}
            other => steps.push((other.to_string(), vec![other.clone()])),
        }
    }
    steps
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::{EnvironmentLock, MemoryBookkeeping};
    use crate::memory::MemoryEnvironment;
    use crate::revision::RevisionPayload;
    use crate::schema::{ColumnDescriptor, ConstraintDescriptor, TableDescriptor};
    use pretty_assertions::assert_eq;

    fn linear() -> RevisionGraph {
        RevisionGraph::build(vec![
            Revision::new("r1", Vec::<String>::new(), "init")
                .with_payload(RevisionPayload::new("CREATE TABLE users (id INTEGER);", "")),
            Revision::new("r2", ["r1"], "email")
                .with_payload(RevisionPayload::new("ALTER TABLE users ADD COLUMN email TEXT;", "")),
            Revision::new("r3", ["r2"], "posts")
                .with_payload(RevisionPayload::new("CREATE TABLE posts (id INTEGER);", "")),
        ])
        .unwrap()
    }

    fn ids(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_phase_transitions() {
        assert!(ApplyPhase::Pending.can_transition(ApplyPhase::Applying));
        assert!(ApplyPhase::Applying.can_transition(ApplyPhase::RolledBack));
        assert!(!ApplyPhase::Pending.can_transition(ApplyPhase::Committed));
        assert!(!ApplyPhase::Committed.can_transition(ApplyPhase::Applying));
        assert!(ApplyPhase::Failed.is_terminal());
    }

    #[tokio::test]
    async fn test_apply_in_order() {
        let mem = MemoryEnvironment::new("dev");
        let report = ApplyOrchestrator::new()
            .apply(&linear(), &ids(&["r1", "r2", "r3"]), &mem.env, &CancelHandle::new())
            .await
            .unwrap();

        assert_eq!(report.phase, ApplyPhase::Committed);
        assert_eq!(report.applied, vec!["r1", "r2", "r3"]);
        assert_eq!(report.state, AppliedState::at("r3"));
        assert_eq!(mem.bookkeeping.snapshot(), AppliedState::at("r3"));
        assert_eq!(mem.executor.executed().len(), 3);
        assert_eq!(mem.executor.commits(), 3);
    }

    #[tokio::test]
    async fn test_reapply_is_noop() {
        let mem = MemoryEnvironment::with_state("dev", AppliedState::at("r3"));
        let report = ApplyOrchestrator::new()
            .apply(&linear(), &ids(&["r1", "r2", "r3"]), &mem.env, &CancelHandle::new())
            .await
            .unwrap();

        assert!(!report.has_changes());
        assert_eq!(report.skipped, vec!["r1", "r2", "r3"]);
        assert_eq!(report.state, AppliedState::at("r3"));
        assert!(mem.executor.executed().is_empty());
    }

    #[tokio::test]
    async fn test_failure_halts_and_rolls_back() {
        let mem = MemoryEnvironment::new("prod");
        mem.executor.fail_on("ADD COLUMN email", "duplicate column");

        let err = ApplyOrchestrator::new()
            .apply(&linear(), &ids(&["r1", "r2", "r3"]), &mem.env, &CancelHandle::new())
            .await
            .unwrap_err();

        match &err {
            MigrationError::PartialApplyFailure {
                failed_step,
                last_successful,
                prior_state,
                rolled_back,
                ..
            } => {
                assert_eq!(failed_step, "r2");
                assert_eq!(last_successful.as_deref(), Some("r1"));
                assert_eq!(prior_state, &vec!["r1".to_string()]);
                assert!(rolled_back);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(ApplyPhase::of_error(&err), Some(ApplyPhase::RolledBack));
        assert_eq!(mem.bookkeeping.snapshot(), AppliedState::at("r1"));
        assert_eq!(mem.executor.rollbacks(), 1);
        assert_eq!(mem.executor.executed().len(), 1);

        // Retry resumes from the first unapplied step.
        mem.executor.clear_failures();
        let report = ApplyOrchestrator::new()
            .apply(&linear(), &ids(&["r1", "r2", "r3"]), &mem.env, &CancelHandle::new())
            .await
            .unwrap();
        assert_eq!(report.skipped, vec!["r1"]);
        assert_eq!(report.applied, vec!["r2", "r3"]);
    }

    #[tokio::test]
    async fn test_cancel_between_steps() {
        let mem = MemoryEnvironment::new("dev");
        let cancel = CancelHandle::new();
        cancel.cancel();

        let err = ApplyOrchestrator::new()
            .apply(&linear(), &ids(&["r1"]), &mem.env, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, MigrationError::Cancelled { last_successful: None, .. }));
        assert!(mem.bookkeeping.snapshot().is_empty());
    }

    /// Bookkeeping that requests cancellation once `revision` is recorded.
    struct CancelAfter {
        inner: MemoryBookkeeping,
        revision: &'static str,
        cancel: CancelHandle,
    }

    #[async_trait::async_trait]
    impl Bookkeeping for CancelAfter {
        fn env(&self) -> &str {
            self.inner.env()
        }

        async fn load(&self) -> MigrateResult<AppliedState> {
            self.inner.load().await
        }

        async fn persist(&self, expected: &AppliedState, next: &AppliedState) -> MigrateResult<()> {
            self.inner.persist(expected, next).await?;
            if next.heads().any(|head| head == self.revision) {
                self.cancel.cancel();
            }
            Ok(())
        }

        async fn acquire_lock(&self) -> MigrateResult<EnvironmentLock> {
            self.inner.acquire_lock().await
        }
    }

    #[tokio::test]
    async fn test_cancel_after_committed_step_resumes() {
        let mem = MemoryEnvironment::new("dev");
        let cancel = CancelHandle::new();
        let env = Environment::new(
            "dev",
            Arc::new(CancelAfter {
                inner: mem.bookkeeping.clone(),
                revision: "r1",
                cancel: cancel.clone(),
            }),
            Arc::new(mem.executor.clone()),
        );
        let orchestrator = ApplyOrchestrator::new();

        let err = orchestrator
            .apply(&linear(), &ids(&["r1", "r2", "r3"]), &env, &cancel)
            .await
            .unwrap_err();
        match err {
            MigrationError::Cancelled { last_successful, .. } => {
                assert_eq!(last_successful.as_deref(), Some("r1"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(mem.bookkeeping.snapshot(), AppliedState::at("r1"));
        assert_eq!(mem.executor.executed(), vec!["CREATE TABLE users (id INTEGER);"]);

        let report = orchestrator
            .apply(&linear(), &ids(&["r1", "r2", "r3"]), &mem.env, &CancelHandle::new())
            .await
            .unwrap();
        assert_eq!(report.skipped, vec!["r1"]);
        assert_eq!(report.applied, vec!["r2", "r3"]);
        assert_eq!(mem.executor.executed().len(), 3);
    }

    #[tokio::test]
    async fn test_concurrent_runs_apply_each_step_once() {
        let mem = MemoryEnvironment::new("dev");
        let graph = linear();
        let steps = ids(&["r1", "r2", "r3"]);
        let orchestrator = ApplyOrchestrator::new();
        let (cancel_a, cancel_b) = (CancelHandle::new(), CancelHandle::new());

        let (a, b) = tokio::join!(
            orchestrator.apply(&graph, &steps, &mem.env, &cancel_a),
            orchestrator.apply(&graph, &steps, &mem.env, &cancel_b),
        );
        let (a, b) = (a.unwrap(), b.unwrap());

        let mut applied = vec![a.applied.len(), b.applied.len()];
        applied.sort();
        assert_eq!(applied, vec![0, 3]);
        assert_eq!(a.skipped.len() + b.skipped.len(), 3);
        assert_eq!(mem.executor.executed().len(), 3);
        assert_eq!(mem.bookkeeping.snapshot(), AppliedState::at("r3"));
    }

    #[tokio::test]
    async fn test_unapplied_parent_rejected() {
        let mem = MemoryEnvironment::new("dev");
        let err = ApplyOrchestrator::new()
            .apply(&linear(), &ids(&["r2"]), &mem.env, &CancelHandle::new())
            .await
            .unwrap_err();
        assert!(matches!(err, MigrationError::InvalidPlan(_)));
    }

    #[tokio::test]
    async fn test_apply_schema_converges() {
        let users = TableDescriptor::new("users").column(ColumnDescriptor::new("id", "INTEGER"));
        let mem = MemoryEnvironment::new("dev");
        mem.executor.set_schema(SchemaDescriptor::new().with_table(users.clone()));
        let target = SchemaDescriptor::new()
            .with_table(users.column(ColumnDescriptor::new("email", "TEXT")));

        let orchestrator = ApplyOrchestrator::new();
        let differ = SchemaDiffer::new();
        let report = orchestrator
            .apply_schema(&target, &differ, &mem.env, &CancelHandle::new())
            .await
            .unwrap();
        assert_eq!(report.applied, vec!["AddColumn(users.email)"]);

        let again = orchestrator
            .apply_schema(&target, &differ, &mem.env, &CancelHandle::new())
            .await
            .unwrap();
        assert!(!again.has_changes());
    }

    fn authored_posts() -> SchemaDescriptor {
        SchemaDescriptor::new()
            .with_table(TableDescriptor::new("users").column(ColumnDescriptor::new("id", "INTEGER")))
            .with_table(
                TableDescriptor::new("posts")
                    .column(ColumnDescriptor::new("id", "INTEGER"))
                    .column(ColumnDescriptor::new("author_id", "INTEGER"))
                    .constraint(ConstraintDescriptor::foreign_key(
                        "posts_author_fk",
                        ["author_id"],
                        "users",
                        ["id"],
                    )),
            )
    }

    fn step_names(steps: &[(String, Vec<DiffOperation>)]) -> Vec<(&str, usize)> {
        steps.iter().map(|(name, ops)| (name.as_str(), ops.len())).collect()
    }

    #[test]
    fn test_schema_steps_group_inlined_constraints() {
        let differ = SchemaDiffer::new();
        let plan = differ.diff(&SchemaDescriptor::new(), &authored_posts()).unwrap();

        let separate = schema_steps(plan.operations(), false);
        assert_eq!(
            step_names(&separate),
            vec![
                ("AddTable(posts)", 1),
                ("AddTable(users)", 1),
                ("AddConstraint(posts.posts_author_fk)", 1),
            ]
        );

        let inlined = schema_steps(plan.operations(), true);
        assert_eq!(
            step_names(&inlined),
            vec![("AddTable(posts)", 2), ("AddTable(users)", 1)]
        );

        let teardown = differ.diff(&authored_posts(), &SchemaDescriptor::new()).unwrap();
        let dropped = schema_steps(teardown.operations(), true);
        assert_eq!(
            step_names(&dropped),
            vec![("DropTable(posts)", 2), ("DropTable(users)", 1)]
        );
        assert!(matches!(dropped[0].1[0], DiffOperation::DropConstraint { .. }));
    }
}
