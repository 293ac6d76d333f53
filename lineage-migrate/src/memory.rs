//! In-process executor.
//!
//! Records executed SQL instead of running it, keeps a structural live
//! schema that schema operations update on commit, and can be told to fail
//! any statement containing a given fragment.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::apply::{Environment, SchemaExecutor, StepTransaction};
use crate::diff::{DiffOperation, DiffPlan};
use crate::error::{MigrateResult, MigrationError};
use crate::history::{AppliedState, MemoryBookkeeping};
use crate::schema::SchemaDescriptor;
use crate::sql::Dialect;

#[derive(Debug, Default)]
struct MemoryState {
    schema: SchemaDescriptor,
    executed: Vec<String>,
    failures: Vec<(String, String)>,
    commits: usize,
    rollbacks: usize,
}

/// Executor that records statements in memory.
#[derive(Debug, Clone)]
pub struct MemoryExecutor {
    dialect: Dialect,
    state: Arc<Mutex<MemoryState>>,
}

impl Default for MemoryExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryExecutor {
    /// Create an executor with an empty live schema.
    pub fn new() -> Self {
        Self {
            dialect: Dialect::Postgres,
            state: Arc::new(Mutex::new(MemoryState::default())),
        }
    }

    /// Render schema operations in another dialect.
    pub fn with_dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = dialect;
        self
    }

    /// Replace the live schema.
    pub fn set_schema(&self, schema: SchemaDescriptor) {
        self.state.lock().schema = schema;
    }

    /// Fail any statement containing `fragment`.
    pub fn fail_on(&self, fragment: impl Into<String>, reason: impl Into<String>) {
        self.state
            .lock()
            .failures
            .push((fragment.into(), reason.into()));
    }

    /// Remove injected failures.
    pub fn clear_failures(&self) {
        self.state.lock().failures.clear();
    }

    /// Committed statements, in order.
    pub fn executed(&self) -> Vec<String> {
        self.state.lock().executed.clone()
    }

    /// Number of committed transactions.
    pub fn commits(&self) -> usize {
        self.state.lock().commits
    }

    /// Number of rolled back transactions.
    pub fn rollbacks(&self) -> usize {
        self.state.lock().rollbacks
    }
}

#[async_trait::async_trait]
impl SchemaExecutor for MemoryExecutor {
    fn dialect(&self) -> Dialect {
        self.dialect
    }

    async fn begin(&self) -> MigrateResult<Box<dyn StepTransaction>> {
        let schema = self.state.lock().schema.clone();
        Ok(Box::new(MemoryTransaction {
            state: Arc::clone(&self.state),
            statements: Vec::new(),
            schema,
        }))
    }

    async fn introspect(&self) -> MigrateResult<SchemaDescriptor> {
        Ok(self.state.lock().schema.clone())
    }
}

struct MemoryTransaction {
    state: Arc<Mutex<MemoryState>>,
    statements: Vec<String>,
    schema: SchemaDescriptor,
}

#[async_trait::async_trait]
impl StepTransaction for MemoryTransaction {
    async fn execute(&mut self, sql: &str) -> MigrateResult<()> {
        let failure = self
            .state
            .lock()
            .failures
            .iter()
            .find(|(fragment, _)| sql.contains(fragment.as_str()))
            .map(|(_, reason)| reason.clone());
        if let Some(reason) = failure {
            return Err(MigrationError::database(reason));
        }
        self.statements.push(sql.to_string());
        Ok(())
    }

    async fn execute_operations(
        &mut self,
        ops: &[DiffOperation],
        statements: &[String],
    ) -> MigrateResult<()> {
        for statement in statements {
            self.execute(statement).await?;
        }
        self.schema = DiffPlan::from_operations(ops.to_vec()).apply_to(&self.schema)?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> MigrateResult<()> {
        let Self {
            state,
            statements,
            schema,
        } = *self;
        let mut state = state.lock();
        state.executed.extend(statements);
        state.schema = schema;
        state.commits += 1;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> MigrateResult<()> {
        self.state.lock().rollbacks += 1;
        Ok(())
    }
}

/// An environment backed by [`MemoryBookkeeping`] and [`MemoryExecutor`],
/// with handles to both.
#[derive(Debug, Clone)]
pub struct MemoryEnvironment {
    /// The environment.
    pub env: Environment,
    /// Its bookkeeping.
    pub bookkeeping: MemoryBookkeeping,
    /// Its executor.
    pub executor: MemoryExecutor,
}

impl MemoryEnvironment {
    /// Create an environment with nothing applied.
    pub fn new(name: &str) -> Self {
        Self::with_state(name, AppliedState::empty())
    }

    /// Create an environment with an initial applied state.
    pub fn with_state(name: &str, state: AppliedState) -> Self {
        let bookkeeping = MemoryBookkeeping::with_state(name, state);
        let executor = MemoryExecutor::new();
        let env = Environment::new(
            name,
            Arc::new(bookkeeping.clone()),
            Arc::new(executor.clone()),
        );
        Self {
            env,
            bookkeeping,
            executor,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnDescriptor, TableDescriptor};

    #[tokio::test]
    async fn test_commit_records_statements() {
        let executor = MemoryExecutor::new();
        let mut tx = executor.begin().await.unwrap();
        tx.execute("CREATE TABLE users (id INTEGER);").await.unwrap();
        assert!(executor.executed().is_empty());
        tx.commit().await.unwrap();
        assert_eq!(executor.executed(), vec!["CREATE TABLE users (id INTEGER);"]);
    }

    #[tokio::test]
    async fn test_rollback_discards() {
        let executor = MemoryExecutor::new();
        let mut tx = executor.begin().await.unwrap();
        let op = DiffOperation::AddTable {
            table: TableDescriptor::new("users").column(ColumnDescriptor::new("id", "INTEGER")),
        };
        tx.execute_operations(&[op], &["CREATE TABLE users (id INTEGER);".to_string()])
            .await
            .unwrap();
        tx.rollback().await.unwrap();

        assert!(executor.introspect().await.unwrap().is_empty());
        assert_eq!(executor.rollbacks(), 1);
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let executor = MemoryExecutor::new();
        executor.fail_on("DROP", "permission denied");
        let mut tx = executor.begin().await.unwrap();
        let err = tx.execute("DROP TABLE users;").await.unwrap_err();
        assert!(err.to_string().contains("permission denied"));
    }
}
