//! Per-environment applied-revision bookkeeping.

use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{MigrateResult, MigrationError};
use crate::revision::Revision;

/// The revision(s) an environment has committed.
///
/// Normally a single head. More than one head only appears transiently while
/// an environment is partway through applying both sides of a merge.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AppliedState {
    heads: BTreeSet<String>,
}

impl AppliedState {
    /// Nothing applied yet.
    pub fn empty() -> Self {
        Self::default()
    }

    /// State pointing at a single revision.
    pub fn at(id: impl Into<String>) -> Self {
        Self {
            heads: BTreeSet::from([id.into()]),
        }
    }

    /// State from a set of heads.
    pub fn from_heads<I, S>(heads: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            heads: heads.into_iter().map(Into::into).collect(),
        }
    }

    /// Applied heads in ascending order.
    pub fn heads(&self) -> impl Iterator<Item = &str> {
        self.heads.iter().map(String::as_str)
    }

    /// Applied heads as owned identifiers.
    pub fn to_vec(&self) -> Vec<String> {
        self.heads.iter().cloned().collect()
    }

    /// Number of applied heads.
    pub fn len(&self) -> usize {
        self.heads.len()
    }

    /// Whether nothing has been applied.
    pub fn is_empty(&self) -> bool {
        self.heads.is_empty()
    }

    /// Whether `id` is one of the applied heads.
    pub fn contains(&self, id: &str) -> bool {
        self.heads.contains(id)
    }

    /// The head, if exactly one is applied.
    pub fn single(&self) -> Option<&str> {
        if self.heads.len() == 1 {
            self.heads.iter().next().map(String::as_str)
        } else {
            None
        }
    }

    /// Whether more than one head is applied.
    pub fn is_drifted(&self) -> bool {
        self.heads.len() > 1
    }

    /// State after committing `revision`: its parents are replaced by it.
    pub fn advance(&self, revision: &Revision) -> Self {
        let mut heads = self.heads.clone();
        for parent in &revision.parents {
            heads.remove(parent);
        }
        heads.insert(revision.id.clone());
        Self { heads }
    }
}

impl fmt::Display for AppliedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.heads.is_empty() {
            write!(f, "<none>")
        } else {
            write!(f, "{}", self.to_vec().join(", "))
        }
    }
}

/// Persisted applied state for one environment.
#[async_trait::async_trait]
pub trait Bookkeeping: Send + Sync {
    /// Environment this record belongs to.
    fn env(&self) -> &str;

    /// Read the currently applied state.
    async fn load(&self) -> MigrateResult<AppliedState>;

    /// Replace `expected` with `next`, failing with `WriteConflict` if the
    /// stored state is no longer `expected`.
    async fn persist(&self, expected: &AppliedState, next: &AppliedState) -> MigrateResult<()>;

    /// Acquire the exclusive advisory lock for this environment.
    async fn acquire_lock(&self) -> MigrateResult<EnvironmentLock>;
}

/// Exclusive lock scoped to one environment; released on drop.
pub struct EnvironmentLock {
    env: String,
    release_fn: Option<Box<dyn FnOnce() + Send>>,
}

impl EnvironmentLock {
    /// Create a new environment lock.
    pub fn new(env: impl Into<String>, release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            env: env.into(),
            release_fn: Some(Box::new(release)),
        }
    }

    /// The environment this lock guards.
    pub fn env(&self) -> &str {
        &self.env
    }
}

impl fmt::Debug for EnvironmentLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvironmentLock").field("env", &self.env).finish()
    }
}

impl Drop for EnvironmentLock {
    fn drop(&mut self) {
        if let Some(release) = self.release_fn.take() {
            release();
        }
        debug!(env = %self.env, "Released environment lock");
    }
}

pub(crate) fn conflict(env: &str, expected: &AppliedState, found: &AppliedState) -> MigrationError {
    MigrationError::WriteConflict {
        env: env.to_string(),
        expected: expected.to_vec(),
        found: found.to_vec(),
    }
}

/// In-process bookkeeping, for hosts that keep state themselves and for tests.
#[derive(Debug, Clone)]
pub struct MemoryBookkeeping {
    env: String,
    state: Arc<Mutex<AppliedState>>,
    lock: Arc<tokio::sync::Mutex<()>>,
    unavailable: Arc<Mutex<Option<String>>>,
}

impl MemoryBookkeeping {
    /// Create an empty record for `env`.
    pub fn new(env: impl Into<String>) -> Self {
        Self::with_state(env, AppliedState::empty())
    }

    /// Create a record for `env` with an initial state.
    pub fn with_state(env: impl Into<String>, state: AppliedState) -> Self {
        Self {
            env: env.into(),
            state: Arc::new(Mutex::new(state)),
            lock: Arc::new(tokio::sync::Mutex::new(())),
            unavailable: Arc::new(Mutex::new(None)),
        }
    }

    /// Make subsequent loads fail with `BookkeepingUnavailable`.
    pub fn set_unavailable(&self, reason: Option<String>) {
        *self.unavailable.lock() = reason;
    }

    /// Current state without going through the async interface.
    pub fn snapshot(&self) -> AppliedState {
        self.state.lock().clone()
    }
}

#[async_trait::async_trait]
impl Bookkeeping for MemoryBookkeeping {
    fn env(&self) -> &str {
        &self.env
    }

    async fn load(&self) -> MigrateResult<AppliedState> {
        if let Some(reason) = self.unavailable.lock().clone() {
            return Err(MigrationError::bookkeeping(&self.env, reason));
        }
        Ok(self.state.lock().clone())
    }

    async fn persist(&self, expected: &AppliedState, next: &AppliedState) -> MigrateResult<()> {
        let mut state = self.state.lock();
        if *state != *expected {
            return Err(conflict(&self.env, expected, &state));
        }
        *state = next.clone();
        Ok(())
    }

    async fn acquire_lock(&self) -> MigrateResult<EnvironmentLock> {
        let guard = self.lock.clone().lock_owned().await;
        debug!(env = %self.env, "Acquired environment lock");
        Ok(EnvironmentLock::new(self.env.clone(), move || drop(guard)))
    }
}

/// On-disk bookkeeping record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct BookkeepingRecord {
    #[serde(default)]
    applied: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    updated_at: Option<DateTime<Utc>>,
}

/// File-backed bookkeeping: `<state_dir>/<env>.toml` plus a `<env>.lock`
/// file held while an apply run is in progress.
#[derive(Debug, Clone)]
pub struct FileBookkeeping {
    env: String,
    state_dir: PathBuf,
    lock_timeout: Duration,
}

impl FileBookkeeping {
    /// Create a file-backed record for `env` inside `state_dir`.
    pub fn new(env: impl Into<String>, state_dir: impl Into<PathBuf>) -> Self {
        Self {
            env: env.into(),
            state_dir: state_dir.into(),
            lock_timeout: Duration::from_secs(10),
        }
    }

    /// Set how long to wait for a held lock.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Path of the state record.
    pub fn state_path(&self) -> PathBuf {
        self.state_dir.join(format!("{}.toml", self.env))
    }

    /// Path of the lock file.
    pub fn lock_path(&self) -> PathBuf {
        self.state_dir.join(format!("{}.lock", self.env))
    }

    async fn read_record(&self) -> MigrateResult<AppliedState> {
        let path = self.state_path();
        if !path.exists() {
            return Ok(AppliedState::empty());
        }
        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| MigrationError::bookkeeping(&self.env, e.to_string()))?;
        let record: BookkeepingRecord = toml::from_str(&content).map_err(|e| {
            MigrationError::bookkeeping(&self.env, format!("Failed to parse {}: {}", path.display(), e))
        })?;
        Ok(AppliedState::from_heads(record.applied))
    }
}

#[async_trait::async_trait]
impl Bookkeeping for FileBookkeeping {
    fn env(&self) -> &str {
        &self.env
    }

    async fn load(&self) -> MigrateResult<AppliedState> {
        self.read_record().await
    }

    async fn persist(&self, expected: &AppliedState, next: &AppliedState) -> MigrateResult<()> {
        let current = self.read_record().await?;
        if current != *expected {
            return Err(conflict(&self.env, expected, &current));
        }

        tokio::fs::create_dir_all(&self.state_dir).await?;

        let record = BookkeepingRecord {
            applied: next.to_vec(),
            updated_at: Some(Utc::now()),
        };
        let content = toml::to_string_pretty(&record)
            .map_err(|e| MigrationError::other(format!("Failed to serialize state: {}", e)))?;

        // Write-then-rename keeps the record readable at every point.
        let tmp = self.state_dir.join(format!(".{}.toml.tmp", self.env));
        tokio::fs::write(&tmp, content).await?;
        tokio::fs::rename(&tmp, self.state_path()).await?;
        Ok(())
    }

    async fn acquire_lock(&self) -> MigrateResult<EnvironmentLock> {
        tokio::fs::create_dir_all(&self.state_dir).await?;

        let lock_path = self.lock_path();
        let started = Instant::now();
        loop {
            match std::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&lock_path)
            {
                Ok(_) => break,
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if started.elapsed() >= self.lock_timeout {
                        return Err(MigrationError::lock_failed(format!(
                            "'{}' is locked by another run ({})",
                            self.env,
                            lock_path.display()
                        )));
                    }
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
                Err(e) => return Err(MigrationError::Io(e)),
            }
        }

        debug!(env = %self.env, "Acquired environment lock");
        Ok(EnvironmentLock::new(self.env.clone(), move || {
            if let Err(e) = std::fs::remove_file(&lock_path) {
                warn!(path = %lock_path.display(), error = %e, "Failed to remove lock file");
            }
        }))
    }
}
