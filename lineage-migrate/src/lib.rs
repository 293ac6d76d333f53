//! # lineage-migrate
//!
//! Migration graph reconciliation engine.
//!
//! This crate provides functionality for:
//! - Loading revision scripts into a validated lineage graph
//! - Head detection and missing-revision planning per environment
//! - Structural schema diffing between a live database and a target
//! - Merge synthesis for divergent heads
//! - Transactional, lock-guarded apply with per-environment bookkeeping
//! - Cross-environment divergence reports and sync
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐     ┌────────────────┐     ┌─────────────────┐
//! │ Revision     │────▶│ Graph Analyzer │────▶│ Merge           │
//! │ Store        │     │ (heads, gaps)  │     │ Synthesizer     │
//! └──────────────┘     └────────────────┘     └─────────────────┘
//!        │                     │                       │
//!        ▼                     ▼                       ▼
//! ┌──────────────┐     ┌────────────────┐     ┌─────────────────┐
//! │ Bookkeeping  │◀────│ Apply          │◀────│ Environment     │
//! │ (per env)    │     │ Orchestrator   │     │ Synchronizer    │
//! └──────────────┘     └────────────────┘     └─────────────────┘
//!                              ▲
//!                              │
//!                      ┌────────────────┐
//!                      │ Schema Differ  │
//!                      └────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use lineage_migrate::{ReconcileOptions, Reconciler, RevisionStore, SqliteEnvironment};
//!
//! async fn startup() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = SqliteEnvironment::open("production", "app.db").await?;
//!     let reconciler = Reconciler::new(RevisionStore::new("./migrations"))
//!         .with_environment(db.environment());
//!
//!     let report = reconciler
//!         .reconcile("production", &ReconcileOptions::new().auto_fix(true))
//!         .await?;
//!     println!("{} fix(es) applied", report.fixes.len());
//!     Ok(())
//! }
//! ```
//!
//! ## Revision Files
//!
//! ```text
//! migrations/
//! ├── 20240101120000_create_users/
//! │   ├── revision.toml
//! │   ├── up.sql
//! │   └── down.sql
//! └── 20240102093000_merge_heads/
//!     └── revision.toml
//! ```

pub mod apply;
pub mod diff;
pub mod engine;
pub mod error;
pub mod file;
pub mod graph;
pub mod history;
pub mod memory;
pub mod merge;
pub mod revision;
pub mod schema;
#[cfg(feature = "sqlite")]
pub mod sqlite;
pub mod sql;
pub mod store;
pub mod sync;

// Re-exports
pub use apply::{
    ApplyOrchestrator, ApplyPhase, ApplyReport, CancelHandle, Environment, SchemaExecutor,
    StepTransaction,
};
pub use diff::{DiffKind, DiffOperation, DiffPlan, SchemaDiffer};
pub use engine::{
    AutogenReport, ConflictReport, EnvironmentDivergence, EnvironmentStatus, Fix, MissingLink,
    ReconcileOptions, ReconcileReport, Reconciler,
};
pub use error::{MigrateResult, MigrationError};
pub use file::{MANIFEST_FILE, ScriptDirectory, timestamp_id};
pub use graph::{
    DivergenceReport, HeadStatus, LineageRelation, LineageView, detached_heads, find_heads,
    find_missing, find_missing_to, head_status, lineage_divergence, single_head,
};
pub use history::{
    AppliedState, Bookkeeping, EnvironmentLock, FileBookkeeping, MemoryBookkeeping,
};
pub use memory::{MemoryEnvironment, MemoryExecutor};
pub use merge::{BranchConflict, MergeRevision, MergeSynthesizer};
pub use revision::{Revision, RevisionGraph, RevisionPayload};
pub use schema::{
    BOOKKEEPING_TABLE, ColumnDescriptor, ConstraintDescriptor, ConstraintKind, DescriptorFile,
    IndexDescriptor, SchemaDescriptor, SchemaFilter, TableDescriptor, TargetSchemaProvider,
};
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteEnvironment;
pub use sql::{
    DdlRenderer, Dialect, MigrationSql, MySqlRenderer, PostgresRenderer, SqliteRenderer,
};
pub use store::RevisionStore;
pub use sync::{EnvironmentSynchronizer, SyncOptions, SyncReport, SyncStatus};
