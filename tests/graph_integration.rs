//! Graph and schema diff behavior through the public facade.

use lineage::prelude::*;
use lineage::migrate::{
    ColumnDescriptor, ConstraintDescriptor, DiffKind, IndexDescriptor, MemoryEnvironment,
    SchemaDiffer, SyncStatus, TableDescriptor,
};
use pretty_assertions::assert_eq;

fn graph(edges: &[(&str, &[&str])]) -> RevisionGraph {
    RevisionGraph::build(
        edges
            .iter()
            .map(|(id, parents)| Revision::new(*id, parents.iter().copied(), *id)),
    )
    .unwrap()
}

fn users() -> TableDescriptor {
    TableDescriptor::new("users")
        .column(ColumnDescriptor::new("id", "INTEGER").not_null())
        .column(ColumnDescriptor::new("name", "TEXT"))
        .constraint(ConstraintDescriptor::primary_key("users_pkey", ["id"]))
}

#[test]
fn test_fork_and_merge_heads() {
    let linear = graph(&[("r1", &[]), ("r2", &["r1"])]);
    assert_eq!(find_heads(&linear).unwrap(), vec!["r2"]);

    let forked = graph(&[("r1", &[]), ("r2", &["r1"]), ("r3", &["r1"])]);
    assert_eq!(find_heads(&forked).unwrap(), vec!["r2", "r3"]);

    let merge = MergeSynthesizer::new()
        .with_id_generator(|_| "r4".to_string())
        .synthesize(["r3", "r2"], &forked)
        .unwrap();
    assert_eq!(merge.parents(), ["r2", "r3"]);

    let merged = forked.with_revision(merge.into_revision()).unwrap();
    assert_eq!(find_heads(&merged).unwrap(), vec!["r4"]);
    assert_eq!(
        find_missing(&merged, &AppliedState::at("r2")).unwrap(),
        vec!["r3", "r4"]
    );
}

#[test]
fn test_diff_converges() {
    let current = SchemaDescriptor::new().with_table(users());
    let target = SchemaDescriptor::new()
        .with_table(
            users()
                .column(ColumnDescriptor::new("email", "TEXT"))
                .index(IndexDescriptor::new("users_email_idx", ["email"]).unique()),
        )
        .with_table(
            TableDescriptor::new("posts")
                .column(ColumnDescriptor::new("id", "INTEGER").not_null())
                .column(ColumnDescriptor::new("author_id", "INTEGER"))
                .constraint(ConstraintDescriptor::primary_key("posts_pkey", ["id"]))
                .constraint(ConstraintDescriptor::foreign_key(
                    "posts_author_id_fkey",
                    ["author_id"],
                    "users",
                    ["id"],
                )),
        );

    let differ = SchemaDiffer::new();
    let plan = differ.diff(&current, &target).unwrap();
    let kinds: Vec<DiffKind> = plan.iter().map(|op| op.kind()).collect();
    assert_eq!(
        kinds,
        vec![
            DiffKind::AddTable,
            DiffKind::AddColumn,
            DiffKind::AddIndex,
            DiffKind::AddConstraint,
        ]
    );

    let converged = plan.apply_to(&current).unwrap();
    assert!(differ.diff(&converged, &target).unwrap().is_empty());
    assert!(differ.diff(&target, &target).unwrap().is_empty());

    let reverted = plan.inverse().apply_to(&converged).unwrap();
    assert!(differ.diff(&reverted, &current).unwrap().is_empty());
}

#[tokio::test]
async fn test_sync_plans_missing_suffix() {
    let linear = graph(&[
        ("r1", &[]),
        ("r2", &["r1"]),
        ("r3", &["r2"]),
        ("r4", &["r3"]),
        ("r5", &["r4"]),
    ]);
    let dev = MemoryEnvironment::with_state("dev", AppliedState::at("r5"));
    let prod = MemoryEnvironment::with_state("prod", AppliedState::at("r3"));
    let sync = EnvironmentSynchronizer::new();

    let report = sync
        .sync(&linear, &dev.env, &prod.env, &SyncOptions::new())
        .await
        .unwrap();
    assert_eq!(report.status, SyncStatus::Behind);
    assert_eq!(report.plan, vec!["r4", "r5"]);

    let report = sync
        .sync(&linear, &dev.env, &prod.env, &SyncOptions::new().auto_fix(true))
        .await
        .unwrap();
    assert_eq!(report.status, SyncStatus::Upgraded);
    assert_eq!(prod.env.applied_state().await.unwrap(), AppliedState::at("r5"));

    let drifted = MemoryEnvironment::with_state("prod", AppliedState::at("r3b"));
    let err = sync
        .sync(&linear, &dev.env, &drifted.env, &SyncOptions::new().auto_fix(true))
        .await
        .unwrap_err();
    assert!(matches!(err, MigrationError::DisjointLineage { .. }));
}
