//! Graph analysis over a validated [`RevisionGraph`].
//!
//! Every function here is pure. Where several orders are valid the result is
//! ordered parent-before-child with ties broken by ascending identifier, so
//! plans are reproducible across runs.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::error::{MigrateResult, MigrationError};
use crate::history::AppliedState;
use crate::revision::RevisionGraph;

/// Shape of the graph's head set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum HeadStatus {
    /// The graph has no revisions.
    Empty,
    /// Exactly one head: the healthy state.
    Single(String),
    /// Two or more heads: needs a merge.
    Multiple(Vec<String>),
}

/// Revisions with no children, ascending.
///
/// A non-empty graph without heads can only be cyclic.
pub fn find_heads(graph: &RevisionGraph) -> MigrateResult<Vec<String>> {
    let heads: Vec<String> = graph.leaves().into_iter().map(String::from).collect();
    if heads.is_empty() && !graph.is_empty() {
        return Err(MigrationError::CycleDetected(
            graph.ids().map(String::from).collect(),
        ));
    }
    Ok(heads)
}

/// Classify the head set.
pub fn head_status(graph: &RevisionGraph) -> MigrateResult<HeadStatus> {
    let mut heads = find_heads(graph)?;
    Ok(match heads.len() {
        0 => HeadStatus::Empty,
        1 => HeadStatus::Single(heads.remove(0)),
        _ => HeadStatus::Multiple(heads),
    })
}

/// The single head, `None` for an empty graph, or `MultipleHeads`.
pub fn single_head(graph: &RevisionGraph) -> MigrateResult<Option<String>> {
    match head_status(graph)? {
        HeadStatus::Empty => Ok(None),
        HeadStatus::Single(head) => Ok(Some(head)),
        HeadStatus::Multiple(heads) => Err(MigrationError::MultipleHeads(heads)),
    }
}

/// Applied heads that the graph does not know about.
pub fn detached_heads(graph: &RevisionGraph, applied: &AppliedState) -> Vec<String> {
    applied
        .heads()
        .filter(|id| !graph.contains(id))
        .map(String::from)
        .collect()
}

/// The upgrade path from `applied` to the graph's single head.
pub fn find_missing(graph: &RevisionGraph, applied: &AppliedState) -> MigrateResult<Vec<String>> {
    match single_head(graph)? {
        Some(head) => find_missing_to(graph, applied, &head),
        None => Ok(Vec::new()),
    }
}

/// The upgrade path from `applied` to `target`, parent before child.
pub fn find_missing_to(
    graph: &RevisionGraph,
    applied: &AppliedState,
    target: &str,
) -> MigrateResult<Vec<String>> {
    let done = graph.lineage_closure(applied.heads())?;
    let wanted = graph.lineage_closure([target])?;
    let missing: BTreeSet<String> = wanted.difference(&done).cloned().collect();
    Ok(graph.topological_order(&missing))
}

/// One environment's view of the lineage.
#[derive(Debug, Clone, Copy)]
pub struct LineageView<'a> {
    /// Environment name.
    pub env: &'a str,
    /// Revision graph known to that environment.
    pub graph: &'a RevisionGraph,
    /// What it has applied.
    pub state: &'a AppliedState,
}

impl<'a> LineageView<'a> {
    /// Bundle an environment's graph and state.
    pub fn new(env: &'a str, graph: &'a RevisionGraph, state: &'a AppliedState) -> Self {
        Self { env, graph, state }
    }
}

/// How two environments' applied lineages relate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LineageRelation {
    /// Both have applied exactly the same revisions.
    Identical,
    /// `a` lacks revisions `b` has, and has nothing of its own.
    ABehind,
    /// `b` lacks revisions `a` has, and has nothing of its own.
    BBehind,
    /// Both have revisions the other lacks.
    Forked,
}

/// Revisions present on one side but not the other, relative to their most
/// recent common ancestor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DivergenceReport {
    /// Name of side `a`.
    pub env_a: String,
    /// Name of side `b`.
    pub env_b: String,
    /// Deepest shared revision, if any.
    pub common_ancestor: Option<String>,
    /// Revisions only `a` has applied, parent before child.
    pub only_in_a: Vec<String>,
    /// Revisions only `b` has applied, parent before child.
    pub only_in_b: Vec<String>,
    /// Members of `only_in_b` absent from `a`'s graph.
    pub unknown_to_a: Vec<String>,
    /// Members of `only_in_a` absent from `b`'s graph.
    pub unknown_to_b: Vec<String>,
}

impl DivergenceReport {
    /// Whether either side has anything the other lacks.
    pub fn is_diverged(&self) -> bool {
        !self.only_in_a.is_empty() || !self.only_in_b.is_empty()
    }

    /// Classify the relationship.
    pub fn relation(&self) -> LineageRelation {
        match (self.only_in_a.is_empty(), self.only_in_b.is_empty()) {
            (true, true) => LineageRelation::Identical,
            (true, false) => LineageRelation::ABehind,
            (false, true) => LineageRelation::BBehind,
            (false, false) => LineageRelation::Forked,
        }
    }
}

/// Compare two environments' applied lineages.
///
/// A side with nothing applied is simply behind. Two non-empty lineages
/// without a shared revision, or an applied head missing from its own graph,
/// are `DisjointLineage`.
pub fn lineage_divergence(a: LineageView<'_>, b: LineageView<'_>) -> MigrateResult<DivergenceReport> {
    let disjoint = |revisions: Vec<String>| MigrationError::DisjointLineage {
        source_env: a.env.to_string(),
        target_env: b.env.to_string(),
        revisions,
    };

    let detached: Vec<String> = detached_heads(a.graph, a.state)
        .into_iter()
        .chain(detached_heads(b.graph, b.state))
        .collect();
    if !detached.is_empty() {
        return Err(disjoint(detached));
    }

    let closure_a = a.graph.lineage_closure(a.state.heads())?;
    let closure_b = b.graph.lineage_closure(b.state.heads())?;

    let common: BTreeSet<String> = closure_a.intersection(&closure_b).cloned().collect();
    if common.is_empty() && !closure_a.is_empty() && !closure_b.is_empty() {
        return Err(disjoint(a.state.heads().chain(b.state.heads()).map(String::from).collect()));
    }

    let only_a: BTreeSet<String> = closure_a.difference(&closure_b).cloned().collect();
    let only_b: BTreeSet<String> = closure_b.difference(&closure_a).cloned().collect();

    let only_in_a = a.graph.topological_order(&only_a);
    let only_in_b = b.graph.topological_order(&only_b);

    let unknown_to_a = only_in_b.iter().filter(|id| !a.graph.contains(id)).cloned().collect();
    let unknown_to_b = only_in_a.iter().filter(|id| !b.graph.contains(id)).cloned().collect();

    Ok(DivergenceReport {
        env_a: a.env.to_string(),
        env_b: b.env.to_string(),
        common_ancestor: most_recent_common(a.graph, &common)?,
        only_in_a,
        only_in_b,
        unknown_to_a,
        unknown_to_b,
    })
}

/// The deepest member of `common`, ties broken by ascending id.
fn most_recent_common(
    graph: &RevisionGraph,
    common: &BTreeSet<String>,
) -> MigrateResult<Option<String>> {
    let mut best: Option<(usize, &String)> = None;
    for id in common {
        let depth = graph.depth(id)?;
        if best.is_none_or(|(d, _)| depth > d) {
            best = Some((depth, id));
        }
    }
    Ok(best.map(|(_, id)| id.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::revision::Revision;
    use pretty_assertions::assert_eq;

    fn graph(edges: &[(&str, &[&str])]) -> RevisionGraph {
        RevisionGraph::build(
            edges
                .iter()
                .map(|(id, parents)| Revision::new(*id, parents.iter().copied(), *id)),
        )
        .unwrap()
    }

    fn linear(n: usize) -> RevisionGraph {
        let ids: Vec<String> = (1..=n).map(|i| format!("r{}", i)).collect();
        RevisionGraph::build(ids.iter().enumerate().map(|(i, id)| {
            let parents: Vec<String> = if i == 0 { vec![] } else { vec![ids[i - 1].clone()] };
            Revision::new(id.clone(), parents, id.clone())
        }))
        .unwrap()
    }

    #[test]
    fn test_single_root_has_one_head() {
        for n in 1..6 {
            assert_eq!(find_heads(&linear(n)).unwrap(), vec![format!("r{}", n)]);
        }
        assert_eq!(head_status(&RevisionGraph::empty()).unwrap(), HeadStatus::Empty);
    }

    #[test]
    fn test_branches_have_multiple_heads() {
        let g = graph(&[("r1", &[]), ("r2", &["r1"]), ("r3", &["r1"])]);
        assert_eq!(
            head_status(&g).unwrap(),
            HeadStatus::Multiple(vec!["r2".into(), "r3".into()])
        );
        assert!(matches!(
            find_missing(&g, &AppliedState::empty()),
            Err(MigrationError::MultipleHeads(_))
        ));
    }

    #[test]
    fn test_find_missing_upgrade_path() {
        let g = linear(5);
        assert_eq!(
            find_missing(&g, &AppliedState::at("r3")).unwrap(),
            vec!["r4", "r5"]
        );
        assert_eq!(
            find_missing(&g, &AppliedState::empty()).unwrap(),
            vec!["r1", "r2", "r3", "r4", "r5"]
        );
        assert!(find_missing(&g, &AppliedState::at("r5")).unwrap().is_empty());
    }

    #[test]
    fn test_find_missing_through_merge() {
        let g = graph(&[
            ("r1", &[]),
            ("r2", &["r1"]),
            ("r3", &["r1"]),
            ("r4", &["r2", "r3"]),
        ]);
        assert_eq!(
            find_missing(&g, &AppliedState::at("r2")).unwrap(),
            vec!["r3", "r4"]
        );
    }

    #[test]
    fn test_find_missing_unknown_applied() {
        let g = linear(2);
        assert!(matches!(
            find_missing(&g, &AppliedState::at("zz")),
            Err(MigrationError::UnknownRevision(id)) if id == "zz"
        ));
        assert_eq!(detached_heads(&g, &AppliedState::at("zz")), vec!["zz"]);
    }

    #[test]
    fn test_divergence_with_self_is_empty() {
        let g = linear(3);
        let state = AppliedState::at("r3");
        let report =
            lineage_divergence(LineageView::new("dev", &g, &state), LineageView::new("dev", &g, &state))
                .unwrap();
        assert!(!report.is_diverged());
        assert_eq!(report.relation(), LineageRelation::Identical);
        assert_eq!(report.common_ancestor.as_deref(), Some("r3"));
    }

    #[test]
    fn test_divergence_behind() {
        let g = linear(5);
        let dev = AppliedState::at("r5");
        let prod = AppliedState::at("r3");
        let report =
            lineage_divergence(LineageView::new("dev", &g, &dev), LineageView::new("prod", &g, &prod))
                .unwrap();
        assert_eq!(report.relation(), LineageRelation::BBehind);
        assert_eq!(report.only_in_a, vec!["r4", "r5"]);
        assert_eq!(report.common_ancestor.as_deref(), Some("r3"));
    }

    #[test]
    fn test_divergence_forked() {
        let g = graph(&[("r1", &[]), ("r2", &["r1"]), ("r3", &["r2"]), ("r3b", &["r2"])]);
        let dev = AppliedState::at("r3");
        let prod = AppliedState::at("r3b");
        let report =
            lineage_divergence(LineageView::new("dev", &g, &dev), LineageView::new("prod", &g, &prod))
                .unwrap();
        assert_eq!(report.relation(), LineageRelation::Forked);
        assert_eq!(report.common_ancestor.as_deref(), Some("r2"));
        assert!(report.unknown_to_a.is_empty());
    }

    #[test]
    fn test_divergence_fresh_environment_is_behind() {
        let g = linear(2);
        let dev = AppliedState::at("r2");
        let fresh = AppliedState::empty();
        let report =
            lineage_divergence(LineageView::new("dev", &g, &dev), LineageView::new("ci", &g, &fresh))
                .unwrap();
        assert_eq!(report.relation(), LineageRelation::BBehind);
        assert_eq!(report.common_ancestor, None);
    }

    #[test]
    fn test_divergence_disjoint() {
        let a = graph(&[("a1", &[]), ("a2", &["a1"])]);
        let b = graph(&[("b1", &[])]);
        let err = lineage_divergence(
            LineageView::new("dev", &a, &AppliedState::at("a2")),
            LineageView::new("prod", &b, &AppliedState::at("b1")),
        )
        .unwrap_err();
        assert!(matches!(err, MigrationError::DisjointLineage { .. }));
    }
}
