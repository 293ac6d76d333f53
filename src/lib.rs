//! # Lineage
//!
//! Keeps database migration lineages consistent across environments.
//!
//! Lineage provides:
//! - A revision graph loaded from a directory of migration scripts
//! - Head detection and merge synthesis when branches fork
//! - Per-environment applied state with transactional, resumable apply
//! - Schema diffing between a live database and a target descriptor
//! - Environment synchronization along the shared lineage
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use lineage::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), MigrationError> {
//!     let store = RevisionStore::new("./migrations");
//!     let dev = SqliteEnvironment::open("development", ".lineage/development.db").await?;
//!
//!     let reconciler = Reconciler::new(store).with_environment(dev.environment());
//!     let report = reconciler.fix("development", true).await?;
//!     println!("{} fix(es) applied", report.fixes.len());
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

/// Migration engine: revision graph, diffing, apply and sync.
pub mod migrate {
    pub use lineage_migrate::*;
}

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::migrate::{
        AppliedState, DescriptorFile, DiffPlan, Environment, EnvironmentSynchronizer,
        MergeSynthesizer, MigrateResult, MigrationError, ReconcileOptions, Reconciler, Revision,
        RevisionGraph, RevisionStore, SchemaDescriptor, SyncOptions, find_heads, find_missing,
    };
    #[cfg(feature = "sqlite")]
    pub use crate::migrate::SqliteEnvironment;
}

// Re-export key types at the crate root
pub use migrate::{MigrateResult, MigrationError};
