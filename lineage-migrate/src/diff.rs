//! Structural schema diffing.
//!
//! [`SchemaDiffer::diff`] compares a current snapshot against a target
//! snapshot by name: tables by table name, then columns, indexes and
//! constraints by their names within each table.
//!
//! # Renames
//!
//! No rename inference is performed. A column that disappears while another
//! of the same type appears in the same table yields an independent
//! `DropColumn` and `AddColumn`. Callers that need renames must express them
//! explicitly in a revision payload.
//!
//! # Ordering
//!
//! Operations are emitted in phases so that nothing runs before what it
//! depends on:
//!
//! 1. `DropConstraint` (foreign keys first)
//! 2. `DropIndex`
//! 3. `DropColumn`
//! 4. `DropTable`
//! 5. `AddTable` (columns and primary/unique keys only)
//! 6. `AddColumn`
//! 7. `AlterColumn`
//! 8. `AddIndex`
//! 9. `AddConstraint` (foreign keys last)
//!
//! Within a phase operations are sorted by table name and then by the
//! declaration order of the snapshot they come from, so a given pair of
//! descriptors always produces the same plan.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{MigrateResult, MigrationError};
use crate::schema::{
    ColumnDescriptor, ConstraintDescriptor, IndexDescriptor, SchemaDescriptor, SchemaFilter,
    TableDescriptor,
};

/// Kind of a structural operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DiffKind {
    /// Create a table.
    AddTable,
    /// Drop a table.
    DropTable,
    /// Add a column.
    AddColumn,
    /// Drop a column.
    DropColumn,
    /// Change a column's type, nullability or default.
    AlterColumn,
    /// Create an index.
    AddIndex,
    /// Drop an index.
    DropIndex,
    /// Add a constraint.
    AddConstraint,
    /// Drop a constraint.
    DropConstraint,
}

impl DiffKind {
    fn label(self, count: usize) -> String {
        let (verb, noun) = match self {
            Self::AddTable => ("Create", "table"),
            Self::DropTable => ("Drop", "table"),
            Self::AddColumn => ("Add", "column"),
            Self::DropColumn => ("Drop", "column"),
            Self::AlterColumn => ("Alter", "column"),
            Self::AddIndex => ("Create", "index"),
            Self::DropIndex => ("Drop", "index"),
            Self::AddConstraint => ("Add", "constraint"),
            Self::DropConstraint => ("Drop", "constraint"),
        };
        let noun = match (count, noun) {
            (1, noun) => noun.to_string(),
            (_, "index") => "indexes".to_string(),
            (_, noun) => format!("{}s", noun),
        };
        format!("{} {} {}", verb, count, noun)
    }
}

/// A single structural change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum DiffOperation {
    /// Create a table with its columns and primary/unique keys. Indexes and
    /// foreign keys follow as separate operations.
    AddTable {
        /// The table to create.
        table: TableDescriptor,
    },
    /// Drop a table. Its indexes and foreign keys are dropped beforehand.
    DropTable {
        /// The table as it existed.
        table: TableDescriptor,
    },
    /// Add a column.
    AddColumn {
        /// Owning table.
        table: String,
        /// The new column.
        column: ColumnDescriptor,
    },
    /// Drop a column.
    DropColumn {
        /// Owning table.
        table: String,
        /// The column as it existed.
        column: ColumnDescriptor,
    },
    /// Change a column in place.
    AlterColumn {
        /// Owning table.
        table: String,
        /// Column before the change.
        before: ColumnDescriptor,
        /// Column after the change.
        after: ColumnDescriptor,
    },
    /// Create an index.
    AddIndex {
        /// Owning table.
        table: String,
        /// The index.
        index: IndexDescriptor,
    },
    /// Drop an index.
    DropIndex {
        /// Owning table.
        table: String,
        /// The index as it existed.
        index: IndexDescriptor,
    },
    /// Add a constraint.
    AddConstraint {
        /// Owning table.
        table: String,
        /// The constraint.
        constraint: ConstraintDescriptor,
    },
    /// Drop a constraint.
    DropConstraint {
        /// Owning table.
        table: String,
        /// The constraint as it existed.
        constraint: ConstraintDescriptor,
    },
}

impl DiffOperation {
    /// Kind of this operation.
    pub fn kind(&self) -> DiffKind {
        match self {
            Self::AddTable { .. } => DiffKind::AddTable,
            Self::DropTable { .. } => DiffKind::DropTable,
            Self::AddColumn { .. } => DiffKind::AddColumn,
            Self::DropColumn { .. } => DiffKind::DropColumn,
            Self::AlterColumn { .. } => DiffKind::AlterColumn,
            Self::AddIndex { .. } => DiffKind::AddIndex,
            Self::DropIndex { .. } => DiffKind::DropIndex,
            Self::AddConstraint { .. } => DiffKind::AddConstraint,
            Self::DropConstraint { .. } => DiffKind::DropConstraint,
        }
    }

    /// Name of the table this operation targets.
    pub fn table(&self) -> &str {
        match self {
            Self::AddTable { table } | Self::DropTable { table } => &table.name,
            Self::AddColumn { table, .. }
            | Self::DropColumn { table, .. }
            | Self::AlterColumn { table, .. }
            | Self::AddIndex { table, .. }
            | Self::DropIndex { table, .. }
            | Self::AddConstraint { table, .. }
            | Self::DropConstraint { table, .. } => table,
        }
    }

    /// Object path: `table` or `table.object`.
    pub fn path(&self) -> String {
        let object = match self {
            Self::AddTable { .. } | Self::DropTable { .. } => return self.table().to_string(),
            Self::AddColumn { column, .. } | Self::DropColumn { column, .. } => &column.name,
            Self::AlterColumn { after, .. } => &after.name,
            Self::AddIndex { index, .. } | Self::DropIndex { index, .. } => &index.name,
            Self::AddConstraint { constraint, .. } | Self::DropConstraint { constraint, .. } => {
                &constraint.name
            }
        };
        format!("{}.{}", self.table(), object)
    }

    /// The operation that undoes this one.
    pub fn inverse(&self) -> Self {
        match self.clone() {
            Self::AddTable { table } => Self::DropTable { table },
            Self::DropTable { table } => Self::AddTable { table },
            Self::AddColumn { table, column } => Self::DropColumn { table, column },
            Self::DropColumn { table, column } => Self::AddColumn { table, column },
            Self::AlterColumn {
                table,
                before,
                after,
            } => Self::AlterColumn {
                table,
                before: after,
                after: before,
            },
            Self::AddIndex { table, index } => Self::DropIndex { table, index },
            Self::DropIndex { table, index } => Self::AddIndex { table, index },
            Self::AddConstraint { table, constraint } => Self::DropConstraint { table, constraint },
            Self::DropConstraint { table, constraint } => Self::AddConstraint { table, constraint },
        }
    }

    fn apply(&self, schema: &mut SchemaDescriptor) -> MigrateResult<()> {
        match self {
            Self::AddTable { table } => {
                if schema.tables.contains_key(&table.name) {
                    return Err(self.invalid("table already exists"));
                }
                schema.tables.insert(table.name.clone(), table.clone());
            }
            Self::DropTable { table } => {
                if schema.tables.remove(&table.name).is_none() {
                    return Err(self.invalid("no such table"));
                }
            }
            Self::AddColumn { column, .. } => {
                let table = self.table_mut(schema)?;
                if table.get_column(&column.name).is_some() {
                    return Err(self.invalid("column already exists"));
                }
                table.columns.push(column.clone());
            }
            Self::DropColumn { column, .. } => {
                let table = self.table_mut(schema)?;
                let before = table.columns.len();
                table.columns.retain(|c| c.name != column.name);
                if table.columns.len() == before {
                    return Err(self.invalid("no such column"));
                }
            }
            Self::AlterColumn { after, .. } => {
                let table = self.table_mut(schema)?;
                match table.columns.iter_mut().find(|c| c.name == after.name) {
                    Some(column) => *column = after.clone(),
                    None => return Err(self.invalid("no such column")),
                }
            }
            Self::AddIndex { index, .. } => {
                let table = self.table_mut(schema)?;
                if table.get_index(&index.name).is_some() {
                    return Err(self.invalid("index already exists"));
                }
                table.indexes.push(index.clone());
            }
            Self::DropIndex { index, .. } => {
                let table = self.table_mut(schema)?;
                let before = table.indexes.len();
                table.indexes.retain(|i| i.name != index.name);
                if table.indexes.len() == before {
                    return Err(self.invalid("no such index"));
                }
            }
            Self::AddConstraint { constraint, .. } => {
                let table = self.table_mut(schema)?;
                if table.get_constraint(&constraint.name).is_some() {
                    return Err(self.invalid("constraint already exists"));
                }
                table.constraints.push(constraint.clone());
            }
            Self::DropConstraint { constraint, .. } => {
                let table = self.table_mut(schema)?;
                let before = table.constraints.len();
                table.constraints.retain(|c| c.name != constraint.name);
                if table.constraints.len() == before {
                    return Err(self.invalid("no such constraint"));
                }
            }
        }
        Ok(())
    }

    fn table_mut<'a>(&self, schema: &'a mut SchemaDescriptor) -> MigrateResult<&'a mut TableDescriptor> {
        let name = self.table();
        schema
            .tables
            .get_mut(name)
            .ok_or_else(|| MigrationError::invalid_plan(format!("{}: no such table '{}'", self, name)))
    }

    fn invalid(&self, reason: &str) -> MigrationError {
        MigrationError::invalid_plan(format!("{}: {}", self, reason))
    }
}

impl fmt::Display for DiffOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self.kind(), self.path())
    }
}

/// Ordered operations bridging a current schema to a target schema.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffPlan {
    operations: Vec<DiffOperation>,
}

impl DiffPlan {
    /// Wrap an already ordered list of operations.
    pub fn from_operations(operations: Vec<DiffOperation>) -> Self {
        Self { operations }
    }

    /// Whether the plan has no operations.
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Number of operations.
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// The operations in execution order.
    pub fn operations(&self) -> &[DiffOperation] {
        &self.operations
    }

    /// Iterate over the operations.
    pub fn iter(&self) -> impl Iterator<Item = &DiffOperation> {
        self.operations.iter()
    }

    /// Object paths touched by the plan.
    pub fn touched_objects(&self) -> BTreeSet<String> {
        self.operations.iter().map(DiffOperation::path).collect()
    }

    /// The plan that undoes this one.
    pub fn inverse(&self) -> Self {
        Self {
            operations: self.operations.iter().rev().map(DiffOperation::inverse).collect(),
        }
    }

    /// Simulate the plan against a snapshot.
    pub fn apply_to(&self, schema: &SchemaDescriptor) -> MigrateResult<SchemaDescriptor> {
        let mut result = schema.clone();
        for op in &self.operations {
            op.apply(&mut result)?;
        }
        Ok(result)
    }

    /// Get a human-readable summary of the plan.
    pub fn summary(&self) -> String {
        let mut counts = std::collections::BTreeMap::new();
        for op in &self.operations {
            *counts.entry(op.kind()).or_insert(0usize) += 1;
        }

        if counts.is_empty() {
            "No changes".to_string()
        } else {
            counts
                .into_iter()
                .map(|(kind, count)| kind.label(count))
                .collect::<Vec<_>>()
                .join(", ")
        }
    }
}

impl<'a> IntoIterator for &'a DiffPlan {
    type Item = &'a DiffOperation;
    type IntoIter = std::slice::Iter<'a, DiffOperation>;

    fn into_iter(self) -> Self::IntoIter {
        self.operations.iter()
    }
}

/// Compares schema snapshots.
#[derive(Debug, Clone, Default)]
pub struct SchemaDiffer {
    filter: SchemaFilter,
}

impl SchemaDiffer {
    /// Create a differ with the default filter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a custom table filter.
    pub fn with_filter(mut self, filter: SchemaFilter) -> Self {
        self.filter = filter;
        self
    }

    /// The active filter.
    pub fn filter(&self) -> &SchemaFilter {
        &self.filter
    }

    /// Compute the operations that turn `current` into `target`.
    pub fn diff(&self, current: &SchemaDescriptor, target: &SchemaDescriptor) -> MigrateResult<DiffPlan> {
        let current = current.filtered(&self.filter);
        let target = target.filtered(&self.filter);
        current.validate()?;
        target.validate()?;

        let mut phases = Phases::default();

        for (name, table) in &current.tables {
            if !target.tables.contains_key(name) {
                phases.drop_table(table);
            }
        }

        for (name, table) in &target.tables {
            match current.tables.get(name) {
                None => phases.add_table(table),
                Some(existing) => phases.alter_table(existing, table),
            }
        }

        Ok(phases.into_plan())
    }
}

#[derive(Default)]
struct Phases {
    drop_constraints: Vec<DiffOperation>,
    drop_indexes: Vec<DiffOperation>,
    drop_columns: Vec<DiffOperation>,
    drop_tables: Vec<DiffOperation>,
    add_tables: Vec<DiffOperation>,
    add_columns: Vec<DiffOperation>,
    alter_columns: Vec<DiffOperation>,
    add_indexes: Vec<DiffOperation>,
    add_constraints: Vec<DiffOperation>,
}

impl Phases {
    fn add_table(&mut self, table: &TableDescriptor) {
        let name = &table.name;
        self.add_tables.push(DiffOperation::AddTable {
            table: table_shell(table),
        });
        for index in &table.indexes {
            self.add_indexes.push(DiffOperation::AddIndex {
                table: name.clone(),
                index: index.clone(),
            });
        }
        for constraint in table.constraints.iter().filter(|c| c.is_foreign_key()) {
            self.add_constraints.push(DiffOperation::AddConstraint {
                table: name.clone(),
                constraint: constraint.clone(),
            });
        }
    }

    fn drop_table(&mut self, table: &TableDescriptor) {
        let name = &table.name;
        for constraint in table.constraints.iter().filter(|c| c.is_foreign_key()) {
            self.drop_constraints.push(DiffOperation::DropConstraint {
                table: name.clone(),
                constraint: constraint.clone(),
            });
        }
        for index in &table.indexes {
            self.drop_indexes.push(DiffOperation::DropIndex {
                table: name.clone(),
                index: index.clone(),
            });
        }
        self.drop_tables.push(DiffOperation::DropTable {
            table: table_shell(table),
        });
    }

    fn alter_table(&mut self, current: &TableDescriptor, target: &TableDescriptor) {
        let name = &target.name;

        for column in &current.columns {
            if target.get_column(&column.name).is_none() {
                self.drop_columns.push(DiffOperation::DropColumn {
                    table: name.clone(),
                    column: column.clone(),
                });
            }
        }
        for column in &target.columns {
            match current.get_column(&column.name) {
                None => self.add_columns.push(DiffOperation::AddColumn {
                    table: name.clone(),
                    column: column.clone(),
                }),
                Some(existing) if existing.differs_from(column) => {
                    self.alter_columns.push(DiffOperation::AlterColumn {
                        table: name.clone(),
                        before: existing.clone(),
                        after: column.clone(),
                    })
                }
                Some(_) => {}
            }
        }

        // A changed index or constraint is dropped and recreated.
        for index in &current.indexes {
            if target.get_index(&index.name) != Some(index) {
                self.drop_indexes.push(DiffOperation::DropIndex {
                    table: name.clone(),
                    index: index.clone(),
                });
            }
        }
        for index in &target.indexes {
            if current.get_index(&index.name) != Some(index) {
                self.add_indexes.push(DiffOperation::AddIndex {
                    table: name.clone(),
                    index: index.clone(),
                });
            }
        }

        for constraint in &current.constraints {
            if target.get_constraint(&constraint.name) != Some(constraint) {
                self.drop_constraints.push(DiffOperation::DropConstraint {
                    table: name.clone(),
                    constraint: constraint.clone(),
                });
            }
        }
        for constraint in &target.constraints {
            if current.get_constraint(&constraint.name) != Some(constraint) {
                self.add_constraints.push(DiffOperation::AddConstraint {
                    table: name.clone(),
                    constraint: constraint.clone(),
                });
            }
        }
    }

    fn into_plan(mut self) -> DiffPlan {
        // Stable sorts keep table order and declaration order otherwise.
        self.drop_constraints.sort_by_key(|op| !is_foreign_key_op(op));
        self.add_constraints.sort_by_key(is_foreign_key_op);

        let operations = [
            self.drop_constraints,
            self.drop_indexes,
            self.drop_columns,
            self.drop_tables,
            self.add_tables,
            self.add_columns,
            self.alter_columns,
            self.add_indexes,
            self.add_constraints,
        ]
        .into_iter()
        .flatten()
        .collect();

        DiffPlan { operations }
    }
}

fn is_foreign_key_op(op: &DiffOperation) -> bool {
    match op {
        DiffOperation::AddConstraint { constraint, .. }
        | DiffOperation::DropConstraint { constraint, .. } => constraint.is_foreign_key(),
        _ => false,
    }
}

/// A table with its columns and non-foreign-key constraints only.
fn table_shell(table: &TableDescriptor) -> TableDescriptor {
    TableDescriptor {
        name: table.name.clone(),
        columns: table.columns.clone(),
        indexes: Vec::new(),
        constraints: table
            .constraints
            .iter()
            .filter(|c| !c.is_foreign_key())
            .cloned()
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::BOOKKEEPING_TABLE;
    use pretty_assertions::assert_eq;

    fn users() -> TableDescriptor {
        TableDescriptor::new("users")
            .column(ColumnDescriptor::new("id", "INTEGER").not_null())
            .column(ColumnDescriptor::new("name", "TEXT"))
            .constraint(ConstraintDescriptor::primary_key("users_pkey", ["id"]))
    }

    fn posts() -> TableDescriptor {
        TableDescriptor::new("posts")
            .column(ColumnDescriptor::new("id", "INTEGER").not_null())
            .column(ColumnDescriptor::new("author_id", "INTEGER"))
            .index(IndexDescriptor::new("posts_author_idx", ["author_id"]))
            .constraint(ConstraintDescriptor::primary_key("posts_pkey", ["id"]))
            .constraint(ConstraintDescriptor::foreign_key(
                "posts_author_fk",
                ["author_id"],
                "users",
                ["id"],
            ))
    }

    fn kinds(plan: &DiffPlan) -> Vec<DiffKind> {
        plan.iter().map(DiffOperation::kind).collect()
    }

    fn converges(current: &SchemaDescriptor, target: &SchemaDescriptor) {
        let differ = SchemaDiffer::new();
        let plan = differ.diff(current, target).unwrap();
        let migrated = plan.apply_to(current).unwrap();
        assert!(differ.diff(&migrated, target).unwrap().is_empty());
    }

    #[test]
    fn test_identical_is_empty() {
        let schema = SchemaDescriptor::new().with_table(users()).with_table(posts());
        let plan = SchemaDiffer::new().diff(&schema, &schema).unwrap();
        assert!(plan.is_empty());
        assert_eq!(plan.summary(), "No changes");
    }

    #[test]
    fn test_add_email_column() {
        let current = SchemaDescriptor::new().with_table(users());
        let target = SchemaDescriptor::new()
            .with_table(users().column(ColumnDescriptor::new("email", "TEXT")));

        let plan = SchemaDiffer::new().diff(&current, &target).unwrap();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan.operations()[0].to_string(), "AddColumn(users.email)");
        converges(&current, &target);
    }

    #[test]
    fn test_new_table_precedes_its_index_and_foreign_key() {
        let current = SchemaDescriptor::new().with_table(users());
        let target = SchemaDescriptor::new().with_table(users()).with_table(posts());

        let plan = SchemaDiffer::new().diff(&current, &target).unwrap();
        assert_eq!(
            kinds(&plan),
            vec![DiffKind::AddTable, DiffKind::AddIndex, DiffKind::AddConstraint]
        );
        match &plan.operations()[0] {
            DiffOperation::AddTable { table } => {
                assert!(table.constraints.iter().all(|c| !c.is_foreign_key()));
                assert!(table.indexes.is_empty());
            }
            other => panic!("unexpected {other}"),
        }
        converges(&current, &target);
    }

    #[test]
    fn test_drops_are_ordered_before_what_they_reference() {
        let current = SchemaDescriptor::new().with_table(users()).with_table(posts());
        let target = SchemaDescriptor::new().with_table(
            TableDescriptor::new("users")
                .column(ColumnDescriptor::new("id", "INTEGER").not_null())
                .constraint(ConstraintDescriptor::primary_key("users_pkey", ["id"])),
        );

        let plan = SchemaDiffer::new().diff(&current, &target).unwrap();
        assert_eq!(
            plan.iter().map(|op| op.to_string()).collect::<Vec<_>>(),
            vec![
                "DropConstraint(posts.posts_author_fk)",
                "DropIndex(posts.posts_author_idx)",
                "DropColumn(users.name)",
                "DropTable(posts)",
            ]
        );
        converges(&current, &target);
    }

    #[test]
    fn test_index_on_dropped_column_goes_first() {
        let current = SchemaDescriptor::new().with_table(
            users().index(IndexDescriptor::new("users_name_idx", ["name"])),
        );
        let target = SchemaDescriptor::new().with_table(
            TableDescriptor::new("users")
                .column(ColumnDescriptor::new("id", "INTEGER").not_null())
                .constraint(ConstraintDescriptor::primary_key("users_pkey", ["id"])),
        );

        let plan = SchemaDiffer::new().diff(&current, &target).unwrap();
        assert_eq!(kinds(&plan), vec![DiffKind::DropIndex, DiffKind::DropColumn]);
    }

    #[test]
    fn test_no_rename_inference() {
        let current = SchemaDescriptor::new().with_table(users());
        let target = SchemaDescriptor::new().with_table(
            TableDescriptor::new("users")
                .column(ColumnDescriptor::new("id", "INTEGER").not_null())
                .column(ColumnDescriptor::new("full_name", "TEXT"))
                .constraint(ConstraintDescriptor::primary_key("users_pkey", ["id"])),
        );

        let plan = SchemaDiffer::new().diff(&current, &target).unwrap();
        assert_eq!(kinds(&plan), vec![DiffKind::DropColumn, DiffKind::AddColumn]);
    }

    #[test]
    fn test_alter_and_changed_index() {
        let current = SchemaDescriptor::new()
            .with_table(users().index(IndexDescriptor::new("users_name_idx", ["name"])));
        let target = SchemaDescriptor::new().with_table(
            TableDescriptor::new("users")
                .column(ColumnDescriptor::new("id", "INTEGER").not_null())
                .column(ColumnDescriptor::new("name", "TEXT").not_null())
                .index(IndexDescriptor::new("users_name_idx", ["name"]).unique())
                .constraint(ConstraintDescriptor::primary_key("users_pkey", ["id"])),
        );

        let plan = SchemaDiffer::new().diff(&current, &target).unwrap();
        assert_eq!(
            kinds(&plan),
            vec![DiffKind::DropIndex, DiffKind::AlterColumn, DiffKind::AddIndex]
        );
        assert_eq!(plan.summary(), "Alter 1 column, Create 1 index, Drop 1 index");
        converges(&current, &target);
    }

    #[test]
    fn test_inverse_restores_current() {
        let current = SchemaDescriptor::new().with_table(users()).with_table(posts());
        let target = SchemaDescriptor::new()
            .with_table(users().column(ColumnDescriptor::new("email", "TEXT").not_null()));

        let differ = SchemaDiffer::new();
        let plan = differ.diff(&current, &target).unwrap();
        let migrated = plan.apply_to(&current).unwrap();
        let restored = plan.inverse().apply_to(&migrated).unwrap();
        assert!(differ.diff(&restored, &current).unwrap().is_empty());
    }

    #[test]
    fn test_bookkeeping_table_ignored() {
        let current = SchemaDescriptor::new()
            .with_table(users())
            .with_table(TableDescriptor::new(BOOKKEEPING_TABLE));
        let target = SchemaDescriptor::new().with_table(users());
        assert!(SchemaDiffer::new().diff(&current, &target).unwrap().is_empty());
    }

    #[test]
    fn test_apply_to_rejects_stale_plan() {
        let plan = DiffPlan::from_operations(vec![DiffOperation::DropColumn {
            table: "users".into(),
            column: ColumnDescriptor::new("email", "TEXT"),
        }]);
        let err = plan
            .apply_to(&SchemaDescriptor::new().with_table(users()))
            .unwrap_err();
        assert!(matches!(err, MigrationError::InvalidPlan(_)));
    }

    #[test]
    fn test_touched_objects() {
        let current = SchemaDescriptor::new().with_table(users());
        let target = SchemaDescriptor::new().with_table(users()).with_table(posts());
        let plan = SchemaDiffer::new().diff(&current, &target).unwrap();
        assert_eq!(
            plan.touched_objects().into_iter().collect::<Vec<_>>(),
            vec!["posts", "posts.posts_author_fk", "posts.posts_author_idx"]
        );
    }
}
