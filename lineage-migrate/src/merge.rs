//! Merge revision synthesis.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, info};

use crate::error::{MigrateResult, MigrationError};
use crate::file::timestamp_id;
use crate::revision::{Revision, RevisionGraph, RevisionPayload};

/// A synthesized revision joining two or more heads.
///
/// It becomes part of the graph only once the store has persisted it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeRevision {
    revision: Revision,
}

impl MergeRevision {
    /// The merge's identifier.
    pub fn id(&self) -> &str {
        &self.revision.id
    }

    /// The joined heads, ascending.
    pub fn parents(&self) -> &[String] {
        &self.revision.parents
    }

    /// Borrow the underlying revision.
    pub fn revision(&self) -> &Revision {
        &self.revision
    }

    /// Take the underlying revision.
    pub fn into_revision(self) -> Revision {
        self.revision
    }
}

/// An object changed on more than one branch being merged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchConflict {
    /// The overlapping object path.
    pub object: String,
    /// Branch revisions touching it, ascending.
    pub revisions: Vec<String>,
}

impl From<BranchConflict> for MigrationError {
    fn from(conflict: BranchConflict) -> Self {
        MigrationError::UnresolvedConflict {
            object: conflict.object,
            revisions: conflict.revisions,
        }
    }
}

type IdGenerator = Arc<dyn Fn(&RevisionGraph) -> String + Send + Sync>;

/// Builds merge revisions for multiple heads.
#[derive(Clone)]
pub struct MergeSynthesizer {
    id_generator: IdGenerator,
    label: String,
    payload: Option<RevisionPayload>,
}

impl Default for MergeSynthesizer {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MergeSynthesizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MergeSynthesizer")
            .field("label", &self.label)
            .field("payload", &self.payload)
            .finish_non_exhaustive()
    }
}

impl MergeSynthesizer {
    /// Create a synthesizer with timestamp identifiers and no payload.
    pub fn new() -> Self {
        Self {
            id_generator: Arc::new(timestamp_id),
            label: "merge heads".to_string(),
            payload: None,
        }
    }

    /// Use a custom identifier generator.
    pub fn with_id_generator(
        mut self,
        generator: impl Fn(&RevisionGraph) -> String + Send + Sync + 'static,
    ) -> Self {
        self.id_generator = Arc::new(generator);
        self
    }

    /// Set the merge label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Supply an explicit reconciliation payload.
    ///
    /// With a payload, branches touching the same objects are accepted: the
    /// payload is taken as the resolution.
    pub fn with_payload(mut self, payload: RevisionPayload) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Synthesize a merge of `heads`.
    ///
    /// Parents are the distinct heads in ascending order. Fails with
    /// `InsufficientHeads` for fewer than two heads and with
    /// `UnresolvedConflict` when branches touch the same object and no
    /// reconciliation payload was supplied.
    pub fn synthesize<I, S>(&self, heads: I, graph: &RevisionGraph) -> MigrateResult<MergeRevision>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let parents: BTreeSet<String> = heads.into_iter().map(Into::into).collect();
        if parents.len() < 2 {
            return Err(MigrationError::InsufficientHeads(parents.len()));
        }
        if let Some(unknown) = parents.iter().find(|id| !graph.contains(id)) {
            return Err(MigrationError::UnknownRevision(unknown.clone()));
        }

        let touches = if self.payload.is_some() {
            let conflicts = self.find_conflicts(&parents, graph)?;
            conflicts.into_iter().map(|c| c.object).collect()
        } else {
            if let Some(conflict) = self.find_conflicts(&parents, graph)?.into_iter().next() {
                return Err(conflict.into());
            }
            Vec::new()
        };

        let id = (self.id_generator)(graph);
        if graph.contains(&id) {
            return Err(MigrationError::DuplicateIdentifier(id));
        }

        let revision = Revision::new(id, parents, self.label.clone())
            .with_payload(self.payload.clone().unwrap_or_default())
            .with_touches(touches);

        info!(id = %revision.id, parents = ?revision.parents, "Synthesized merge revision");
        Ok(MergeRevision { revision })
    }

    /// Objects touched by more than one of the branches leading to `heads`.
    ///
    /// A branch is everything in a head's lineage that is not shared by all
    /// of the heads. A table path overlaps any path below it.
    pub fn find_conflicts(
        &self,
        heads: &BTreeSet<String>,
        graph: &RevisionGraph,
    ) -> MigrateResult<Vec<BranchConflict>> {
        let mut closures = Vec::with_capacity(heads.len());
        for head in heads {
            closures.push(graph.lineage_closure([head.as_str()])?);
        }

        let shared: BTreeSet<String> = match closures.split_first() {
            Some((first, rest)) => first
                .iter()
                .filter(|id| rest.iter().all(|c| c.contains(*id)))
                .cloned()
                .collect(),
            None => BTreeSet::new(),
        };

        let branch_touches: Vec<Vec<(&str, &str)>> = closures
            .iter()
            .map(|closure| {
                closure
                    .difference(&shared)
                    .filter_map(|id| graph.get(id))
                    .flat_map(|rev| rev.touches.iter().map(|t| (t.as_str(), rev.id.as_str())))
                    .collect()
            })
            .collect();

        let mut conflicts: Vec<BranchConflict> = Vec::new();
        for (i, left) in branch_touches.iter().enumerate() {
            for right in &branch_touches[i + 1..] {
                for (left_path, left_rev) in left {
                    for (right_path, right_rev) in right {
                        if !paths_overlap(left_path, right_path) {
                            continue;
                        }
                        let object = if left_path.len() <= right_path.len() {
                            left_path
                        } else {
                            right_path
                        };
                        let mut revisions = vec![left_rev.to_string(), right_rev.to_string()];
                        revisions.sort();
                        debug!(object, ?revisions, "Branch conflict");
                        conflicts.push(BranchConflict {
                            object: object.to_string(),
                            revisions,
                        });
                    }
                }
            }
        }

        conflicts.sort_by(|a, b| (&a.object, &a.revisions).cmp(&(&b.object, &b.revisions)));
        conflicts.dedup();
        Ok(conflicts)
    }
}

fn paths_overlap(a: &str, b: &str) -> bool {
    let nested = |outer: &str, inner: &str| {
        inner
            .strip_prefix(outer)
            .is_some_and(|rest| rest.starts_with('.'))
    };
    a == b || nested(a, b) || nested(b, a)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::find_heads;

    fn fixed(id: &'static str) -> MergeSynthesizer {
        MergeSynthesizer::new().with_id_generator(move |_| id.to_string())
    }

    fn forked() -> RevisionGraph {
        RevisionGraph::build(vec![
            Revision::new("r1", Vec::<String>::new(), "init").with_touches(["users"]),
            Revision::new("r2", ["r1"], "email").with_touches(["users.email"]),
            Revision::new("r3", ["r1"], "posts").with_touches(["posts"]),
        ])
        .unwrap()
    }

    #[test]
    fn test_merge_yields_single_head() {
        let graph = forked();
        let heads = find_heads(&graph).unwrap();
        assert_eq!(heads, vec!["r2", "r3"]);

        let merge = fixed("r4").synthesize(heads, &graph).unwrap();
        assert_eq!(merge.id(), "r4");
        assert_eq!(merge.parents(), ["r2", "r3"]);
        assert!(merge.revision().payload.is_noop());

        let merged = graph.with_revision(merge.into_revision()).unwrap();
        assert_eq!(find_heads(&merged).unwrap(), vec!["r4"]);
    }

    #[test]
    fn test_parents_sorted_and_deduped() {
        let merge = fixed("m").synthesize(["r3", "r2", "r3"], &forked()).unwrap();
        assert_eq!(merge.parents(), ["r2", "r3"]);
    }

    #[test]
    fn test_insufficient_heads() {
        let err = fixed("m").synthesize(["r2"], &forked()).unwrap_err();
        assert!(matches!(err, MigrationError::InsufficientHeads(1)));
        let err = fixed("m")
            .synthesize(Vec::<String>::new(), &forked())
            .unwrap_err();
        assert!(matches!(err, MigrationError::InsufficientHeads(0)));
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let err = fixed("r1").synthesize(["r2", "r3"], &forked()).unwrap_err();
        assert!(matches!(err, MigrationError::DuplicateIdentifier(_)));
    }

    #[test]
    fn test_conflicting_branches() {
        let graph = forked()
            .with_revision(Revision::new("r2b", ["r3"], "drop users").with_touches(["users"]))
            .unwrap();
        let err = fixed("m").synthesize(["r2", "r2b"], &graph).unwrap_err();
        match err {
            MigrationError::UnresolvedConflict { object, revisions } => {
                assert_eq!(object, "users");
                assert_eq!(revisions, vec!["r2", "r2b"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_payload_resolves_conflict() {
        let graph = forked()
            .with_revision(
                Revision::new("r3b", ["r3"], "email too").with_touches(["users.email"]),
            )
            .unwrap();
        let merge = fixed("m")
            .with_payload(RevisionPayload::new("ALTER TABLE users ...;", ""))
            .synthesize(["r2", "r3b"], &graph)
            .unwrap();
        assert_eq!(merge.revision().touches, vec!["users.email"]);
        assert!(!merge.revision().payload.is_noop());
    }

    #[test]
    fn test_paths_overlap() {
        assert!(paths_overlap("users", "users.email"));
        assert!(paths_overlap("users.email", "users.email"));
        assert!(!paths_overlap("users", "users_archive"));
        assert!(!paths_overlap("users.email", "users.name"));
    }
}
