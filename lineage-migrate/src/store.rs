//! The revision store: the lineage graph plus per-environment bookkeeping.

use std::path::{Path, PathBuf};

use tracing::{info, instrument};

use crate::error::{MigrateResult, MigrationError};
use crate::file::ScriptDirectory;
use crate::history::{AppliedState, Bookkeeping};
use crate::revision::{Revision, RevisionGraph};

/// Loads and persists the revision graph and applied state.
///
/// The graph is rebuilt on every [`load_graph`](Self::load_graph); nothing is
/// cached between calls.
#[derive(Debug, Clone)]
pub struct RevisionStore {
    scripts: ScriptDirectory,
}

impl RevisionStore {
    /// Create a store over a migrations directory.
    pub fn new(migrations_dir: impl Into<PathBuf>) -> Self {
        Self {
            scripts: ScriptDirectory::new(migrations_dir),
        }
    }

    /// The underlying script directory.
    pub fn scripts(&self) -> &ScriptDirectory {
        &self.scripts
    }

    /// The migrations directory.
    pub fn migrations_dir(&self) -> &Path {
        self.scripts.migrations_dir()
    }

    /// Load and validate the revision graph.
    #[instrument(skip(self), fields(dir = %self.scripts.migrations_dir().display()))]
    pub async fn load_graph(&self) -> MigrateResult<RevisionGraph> {
        let revisions = self.scripts.list_revisions().await?;
        let graph = RevisionGraph::build(revisions)?;
        info!(revisions = graph.len(), "Loaded revision graph");
        Ok(graph)
    }

    /// Read an environment's applied state.
    pub async fn load_applied_state(&self, env: &dyn Bookkeeping) -> MigrateResult<AppliedState> {
        env.load().await.map_err(|e| match e {
            e @ MigrationError::BookkeepingUnavailable { .. } => e,
            other => MigrationError::bookkeeping(env.env(), other.to_string()),
        })
    }

    /// Record that `revision_id` is now applied on top of `expected`.
    ///
    /// `revision_id` must be in `graph`; its parents are replaced by it in the
    /// applied set.
    pub async fn persist_applied_state(
        &self,
        env: &dyn Bookkeeping,
        graph: &RevisionGraph,
        expected: &AppliedState,
        revision_id: &str,
    ) -> MigrateResult<AppliedState> {
        let revision = graph
            .get(revision_id)
            .ok_or_else(|| MigrationError::UnknownRevision(revision_id.to_string()))?;
        let next = expected.advance(revision);
        env.persist(expected, &next).await?;
        Ok(next)
    }

    /// Append a new revision, returning the extended graph.
    pub async fn append_revision(
        &self,
        graph: &RevisionGraph,
        revision: &Revision,
    ) -> MigrateResult<(RevisionGraph, PathBuf)> {
        // Validate before touching disk so a bad revision leaves no directory.
        let extended = graph.with_revision(revision.clone())?;
        let path = self.scripts.write_revision(revision).await?;
        info!(id = %revision.id, parents = ?revision.parents, "Appended revision");
        Ok((extended, path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::MemoryBookkeeping;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_append_then_load() {
        let dir = TempDir::new().unwrap();
        let store = RevisionStore::new(dir.path());

        let graph = store.load_graph().await.unwrap();
        assert!(graph.is_empty());

        let (graph, _) = store
            .append_revision(&graph, &Revision::new("r1", Vec::<String>::new(), "init"))
            .await
            .unwrap();
        let (graph, _) = store
            .append_revision(&graph, &Revision::new("r2", ["r1"], "users"))
            .await
            .unwrap();

        let reloaded = store.load_graph().await.unwrap();
        assert_eq!(reloaded.len(), graph.len());
        assert_eq!(reloaded.get("r2").unwrap().parents, vec!["r1"]);
    }

    #[tokio::test]
    async fn test_append_orphan_leaves_no_files() {
        let dir = TempDir::new().unwrap();
        let store = RevisionStore::new(dir.path());
        let err = store
            .append_revision(&RevisionGraph::empty(), &Revision::new("r2", ["r1"], "x"))
            .await
            .unwrap_err();
        assert!(matches!(err, MigrationError::OrphanRevision { .. }));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_append_duplicate() {
        let dir = TempDir::new().unwrap();
        let store = RevisionStore::new(dir.path());
        let r1 = Revision::new("r1", Vec::<String>::new(), "init");
        let (graph, _) = store
            .append_revision(&RevisionGraph::empty(), &r1)
            .await
            .unwrap();
        let err = store.append_revision(&graph, &r1).await.unwrap_err();
        assert!(matches!(err, MigrationError::DuplicateIdentifier(_)));
    }

    #[tokio::test]
    async fn test_persist_applied_state() {
        let dir = TempDir::new().unwrap();
        let store = RevisionStore::new(dir.path());
        let graph = RevisionGraph::build(vec![
            Revision::new("r1", Vec::<String>::new(), "init"),
            Revision::new("r2", ["r1"], "next"),
        ])
        .unwrap();
        let env = MemoryBookkeeping::with_state("dev", AppliedState::at("r1"));

        let state = store.load_applied_state(&env).await.unwrap();
        let next = store
            .persist_applied_state(&env, &graph, &state, "r2")
            .await
            .unwrap();
        assert_eq!(next, AppliedState::at("r2"));

        let err = store
            .persist_applied_state(&env, &graph, &state, "r2")
            .await
            .unwrap_err();
        assert!(matches!(err, MigrationError::WriteConflict { .. }));
    }
}
