//! Revisions and the validated revision graph.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{MigrateResult, MigrationError};

/// Forward and backward operation bodies of a revision.
///
/// The engine never interprets these beyond handing them to an executor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionPayload {
    /// Statements that apply the revision.
    pub upgrade: String,
    /// Statements that reverse the revision.
    pub downgrade: String,
}

impl RevisionPayload {
    /// Create a payload from up/down bodies.
    pub fn new(upgrade: impl Into<String>, downgrade: impl Into<String>) -> Self {
        Self {
            upgrade: upgrade.into(),
            downgrade: downgrade.into(),
        }
    }

    /// Whether the forward body contains anything to execute.
    pub fn is_noop(&self) -> bool {
        self.upgrade.trim().is_empty()
    }
}

/// A single migration step with identity and parent links.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revision {
    /// Stable, unique identifier.
    pub id: String,
    /// Parent identifiers: none for a root, two or more for a merge.
    pub parents: Vec<String>,
    /// Human readable label.
    pub label: String,
    /// Opaque operation bodies.
    pub payload: RevisionPayload,
    /// Object paths (`table` or `table.column`) this revision changes.
    #[serde(default)]
    pub touches: Vec<String>,
    /// SHA-256 of the upgrade body.
    pub checksum: String,
}

impl Revision {
    /// Create a revision with an empty payload.
    pub fn new<I, S>(id: impl Into<String>, parents: I, label: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let payload = RevisionPayload::default();
        Self {
            id: id.into(),
            parents: parents.into_iter().map(Into::into).collect(),
            label: label.into(),
            checksum: compute_checksum(&payload.upgrade),
            payload,
            touches: Vec::new(),
        }
    }

    /// Set the operation payload.
    pub fn with_payload(mut self, payload: RevisionPayload) -> Self {
        self.checksum = compute_checksum(&payload.upgrade);
        self.payload = payload;
        self
    }

    /// Set the touched object paths.
    pub fn with_touches<I, S>(mut self, touches: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.touches = touches.into_iter().map(Into::into).collect();
        self.touches.sort();
        self.touches.dedup();
        self
    }

    /// Whether this revision has no parents.
    pub fn is_root(&self) -> bool {
        self.parents.is_empty()
    }

    /// Whether this revision joins two or more lineages.
    pub fn is_merge(&self) -> bool {
        self.parents.len() >= 2
    }

    /// Verify the checksum matches the content.
    pub fn verify_checksum(&self) -> bool {
        compute_checksum(&self.payload.upgrade) == self.checksum
    }
}

/// Compute a SHA256 checksum of the content.
pub(crate) fn compute_checksum(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

/// Identifier-to-revision mapping with derived child adjacency.
///
/// Construction validates that every parent exists and that no revision is
/// its own ancestor. All iteration is in ascending identifier order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RevisionGraph {
    revisions: BTreeMap<String, Revision>,
    children: BTreeMap<String, BTreeSet<String>>,
}

impl RevisionGraph {
    /// Create an empty graph.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build and validate a graph.
    pub fn build(revisions: impl IntoIterator<Item = Revision>) -> MigrateResult<Self> {
        let mut map = BTreeMap::new();
        for revision in revisions {
            if map.contains_key(&revision.id) {
                return Err(MigrationError::DuplicateIdentifier(revision.id));
            }
            map.insert(revision.id.clone(), revision);
        }

        let mut children: BTreeMap<String, BTreeSet<String>> =
            map.keys().map(|id| (id.clone(), BTreeSet::new())).collect();

        for revision in map.values() {
            for parent in &revision.parents {
                match children.get_mut(parent) {
                    Some(set) => {
                        set.insert(revision.id.clone());
                    }
                    None => {
                        return Err(MigrationError::OrphanRevision {
                            revision: revision.id.clone(),
                            missing_parent: parent.clone(),
                        });
                    }
                }
            }
        }

        let graph = Self {
            revisions: map,
            children,
        };
        graph.check_acyclic()?;
        Ok(graph)
    }

    /// Return a new graph that also contains `revision`.
    pub fn with_revision(&self, revision: Revision) -> MigrateResult<Self> {
        if self.contains(&revision.id) {
            return Err(MigrationError::DuplicateIdentifier(revision.id));
        }
        Self::build(self.revisions.values().cloned().chain(Some(revision)))
    }

    fn check_acyclic(&self) -> MigrateResult<()> {
        let all: BTreeSet<String> = self.revisions.keys().cloned().collect();
        let ordered = self.topological_order(&all);
        if ordered.len() == all.len() {
            return Ok(());
        }
        let emitted: BTreeSet<&String> = ordered.iter().collect();
        let stuck = all.iter().filter(|id| !emitted.contains(id)).cloned().collect();
        Err(MigrationError::CycleDetected(stuck))
    }

    /// Get a revision by identifier.
    pub fn get(&self, id: &str) -> Option<&Revision> {
        self.revisions.get(id)
    }

    /// Check if the graph contains an identifier.
    pub fn contains(&self, id: &str) -> bool {
        self.revisions.contains_key(id)
    }

    /// Number of revisions.
    pub fn len(&self) -> usize {
        self.revisions.len()
    }

    /// Whether the graph has no revisions.
    pub fn is_empty(&self) -> bool {
        self.revisions.is_empty()
    }

    /// Iterate over revisions in identifier order.
    pub fn revisions(&self) -> impl Iterator<Item = &Revision> {
        self.revisions.values()
    }

    /// Iterate over identifiers in ascending order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.revisions.keys().map(String::as_str)
    }

    /// Children of a revision.
    pub fn children(&self, id: &str) -> impl Iterator<Item = &str> {
        self.children
            .get(id)
            .into_iter()
            .flat_map(|set| set.iter().map(String::as_str))
    }

    /// Revisions with no parents.
    pub fn roots(&self) -> Vec<&str> {
        self.revisions
            .values()
            .filter(|r| r.is_root())
            .map(|r| r.id.as_str())
            .collect()
    }

    /// Revisions with no children.
    pub fn leaves(&self) -> Vec<&str> {
        self.children
            .iter()
            .filter(|(_, set)| set.is_empty())
            .map(|(id, _)| id.as_str())
            .collect()
    }

    /// All strict ancestors of a revision.
    pub fn ancestors(&self, id: &str) -> MigrateResult<BTreeSet<String>> {
        let revision = self
            .get(id)
            .ok_or_else(|| MigrationError::UnknownRevision(id.to_string()))?;

        let mut seen = BTreeSet::new();
        let mut stack: Vec<&str> = revision.parents.iter().map(String::as_str).collect();
        while let Some(current) = stack.pop() {
            if !seen.insert(current.to_string()) {
                continue;
            }
            if let Some(rev) = self.get(current) {
                stack.extend(rev.parents.iter().map(String::as_str));
            }
        }
        Ok(seen)
    }

    /// The given revisions together with all of their ancestors.
    pub fn lineage_closure<'a, I>(&self, heads: I) -> MigrateResult<BTreeSet<String>>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut closure = BTreeSet::new();
        for head in heads {
            if closure.contains(head) {
                continue;
            }
            let ancestors = self.ancestors(head)?;
            closure.extend(ancestors);
            closure.insert(head.to_string());
        }
        Ok(closure)
    }

    /// Parent-before-child ordering of `subset`, ties broken by ascending id.
    ///
    /// Only edges inside the subset constrain the order. Members caught in a
    /// cycle are omitted, which is how cycles are detected.
    pub fn topological_order(&self, subset: &BTreeSet<String>) -> Vec<String> {
        let mut in_degree: BTreeMap<&str, usize> = BTreeMap::new();
        for id in subset {
            let Some(revision) = self.get(id) else {
                continue;
            };
            let degree = revision
                .parents
                .iter()
                .filter(|p| subset.contains(*p))
                .count();
            in_degree.insert(id.as_str(), degree);
        }

        let mut ready: BinaryHeap<Reverse<&str>> = in_degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(id, _)| Reverse(*id))
            .collect();

        let mut ordered = Vec::with_capacity(in_degree.len());
        while let Some(Reverse(id)) = ready.pop() {
            ordered.push(id.to_string());
            for child in self.children(id) {
                if let Some(degree) = in_degree.get_mut(child) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.push(Reverse(child));
                    }
                }
            }
        }
        ordered
    }

    /// `base`, or `base-N` for the first `N` not already in the graph.
    pub fn unique_id(&self, base: &str) -> String {
        if !self.contains(base) {
            return base.to_string();
        }
        (1..)
            .map(|n| format!("{}-{}", base, n))
            .find(|candidate| !self.contains(candidate))
            .unwrap_or_else(|| base.to_string())
    }

    /// Length of the longest parent chain from a root to `id`.
    pub fn depth(&self, id: &str) -> MigrateResult<usize> {
        let mut subset = self.ancestors(id)?;
        subset.insert(id.to_string());
        let mut depths: BTreeMap<String, usize> = BTreeMap::new();
        for rev_id in self.topological_order(&subset) {
            let depth = self
                .get(&rev_id)
                .map(|r| {
                    r.parents
                        .iter()
                        .filter_map(|p| depths.get(p))
                        .map(|d| d + 1)
                        .max()
                        .unwrap_or(0)
                })
                .unwrap_or(0);
            depths.insert(rev_id, depth);
        }
        Ok(depths.get(id).copied().unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rev(id: &str, parents: &[&str]) -> Revision {
        Revision::new(id, parents.iter().copied(), id)
    }

    #[test]
    fn test_revision_checksum() {
        let revision = rev("r1", &[]).with_payload(RevisionPayload::new(
            "CREATE TABLE users (id INTEGER);",
            "DROP TABLE users;",
        ));
        assert!(revision.verify_checksum());
        assert!(revision.is_root());
        assert!(!revision.is_merge());
    }

    #[test]
    fn test_build_linear_graph() {
        let graph = RevisionGraph::build(vec![rev("r1", &[]), rev("r2", &["r1"])]).unwrap();
        assert_eq!(graph.len(), 2);
        assert_eq!(graph.roots(), vec!["r1"]);
        assert_eq!(graph.leaves(), vec!["r2"]);
        assert_eq!(graph.children("r1").collect::<Vec<_>>(), vec!["r2"]);
    }

    #[test]
    fn test_orphan_detected() {
        let err = RevisionGraph::build(vec![rev("r2", &["r1"])]).unwrap_err();
        assert!(matches!(
            err,
            MigrationError::OrphanRevision { ref revision, ref missing_parent }
                if revision == "r2" && missing_parent == "r1"
        ));
    }

    #[test]
    fn test_cycle_detected() {
        let err = RevisionGraph::build(vec![
            rev("r0", &[]),
            rev("r1", &["r0", "r2"]),
            rev("r2", &["r1"]),
        ])
        .unwrap_err();
        match err {
            MigrationError::CycleDetected(ids) => assert_eq!(ids, vec!["r1", "r2"]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_duplicate_rejected() {
        let err = RevisionGraph::build(vec![rev("r1", &[]), rev("r1", &[])]).unwrap_err();
        assert!(matches!(err, MigrationError::DuplicateIdentifier(id) if id == "r1"));
    }

    #[test]
    fn test_topological_tie_break() {
        let graph = RevisionGraph::build(vec![
            rev("a", &[]),
            rev("c", &["a"]),
            rev("b", &["a"]),
            rev("d", &["b", "c"]),
        ])
        .unwrap();
        let all: BTreeSet<String> = graph.ids().map(String::from).collect();
        assert_eq!(graph.topological_order(&all), vec!["a", "b", "c", "d"]);
        assert_eq!(graph.depth("d").unwrap(), 2);
    }

    #[test]
    fn test_lineage_closure() {
        let graph = RevisionGraph::build(vec![
            rev("r1", &[]),
            rev("r2", &["r1"]),
            rev("r3", &["r1"]),
        ])
        .unwrap();
        let closure = graph.lineage_closure(["r2"]).unwrap();
        assert_eq!(closure.into_iter().collect::<Vec<_>>(), vec!["r1", "r2"]);
        assert!(graph.lineage_closure(["nope"]).is_err());
    }

    #[test]
    fn test_with_revision_is_non_destructive() {
        let graph = RevisionGraph::build(vec![rev("r1", &[])]).unwrap();
        let extended = graph.with_revision(rev("r2", &["r1"])).unwrap();
        assert_eq!(graph.len(), 1);
        assert_eq!(extended.len(), 2);
        assert!(extended.with_revision(rev("r2", &["r1"])).is_err());
    }

    #[test]
    fn test_unique_id() {
        let graph = RevisionGraph::build(vec![rev("20240101", &[]), rev("20240101-1", &["20240101"])])
            .unwrap();
        assert_eq!(graph.unique_id("20240102"), "20240102");
        assert_eq!(graph.unique_id("20240101"), "20240101-2");
    }
}
