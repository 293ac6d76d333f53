//! DDL rendering, one strategy per dialect.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::diff::{DiffOperation, DiffPlan};
use crate::error::{MigrateResult, MigrationError};
use crate::schema::{
    BOOKKEEPING_TABLE, ColumnDescriptor, ConstraintDescriptor, ConstraintKind, IndexDescriptor,
    TableDescriptor,
};

/// Supported SQL dialects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// PostgreSQL.
    #[default]
    Postgres,
    /// SQLite.
    Sqlite,
    /// MySQL / MariaDB.
    Mysql,
}

impl Dialect {
    /// Dialect name as used in configuration.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::Sqlite => "sqlite",
            Self::Mysql => "mysql",
        }
    }

    /// The DDL renderer for this dialect.
    pub fn renderer(self) -> Box<dyn DdlRenderer> {
        match self {
            Self::Postgres => Box::new(PostgresRenderer),
            Self::Sqlite => Box::new(SqliteRenderer),
            Self::Mysql => Box::new(MySqlRenderer),
        }
    }

    /// CREATE statement for the bookkeeping table.
    pub fn bookkeeping_table_sql(self) -> String {
        match self {
            Self::Postgres => format!(
                "CREATE TABLE IF NOT EXISTS \"{}\" (\n    \"revision_id\" TEXT PRIMARY KEY,\n    \"applied_at\" TIMESTAMPTZ NOT NULL DEFAULT NOW()\n);",
                BOOKKEEPING_TABLE
            ),
            Self::Sqlite => format!(
                "CREATE TABLE IF NOT EXISTS \"{}\" (\n    \"revision_id\" TEXT PRIMARY KEY,\n    \"applied_at\" TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP\n);",
                BOOKKEEPING_TABLE
            ),
            Self::Mysql => format!(
                "CREATE TABLE IF NOT EXISTS `{}` (\n    `revision_id` VARCHAR(255) PRIMARY KEY,\n    `applied_at` TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP\n);",
                BOOKKEEPING_TABLE
            ),
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dialect {
    type Err = MigrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(Self::Postgres),
            "sqlite" => Ok(Self::Sqlite),
            "mysql" | "mariadb" => Ok(Self::Mysql),
            other => Err(MigrationError::other(format!("Unknown dialect '{}'", other))),
        }
    }
}

/// Generated SQL for a migration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationSql {
    /// SQL to apply the migration.
    pub up: String,
    /// SQL to rollback the migration.
    pub down: String,
}

impl MigrationSql {
    /// Check if the migration is empty.
    pub fn is_empty(&self) -> bool {
        self.up.trim().is_empty()
    }
}

/// Renders structural operations as dialect DDL.
pub trait DdlRenderer: Send + Sync {
    /// The dialect rendered.
    fn dialect(&self) -> Dialect;

    /// Whether constraints on a created table can only be rendered inside
    /// its `CREATE TABLE`.
    fn inlines_constraints(&self) -> bool {
        false
    }

    /// Statements for a single operation.
    fn render_operation(&self, op: &DiffOperation) -> MigrateResult<Vec<String>>;

    /// Statements for an ordered list of operations.
    fn render_operations(&self, ops: &[DiffOperation]) -> MigrateResult<Vec<String>> {
        let mut stmts = Vec::new();
        for op in ops {
            stmts.extend(self.render_operation(op)?);
        }
        Ok(stmts)
    }

    /// Up SQL for `plan`, and down SQL from its inverse.
    fn render_plan(&self, plan: &DiffPlan) -> MigrateResult<MigrationSql> {
        let up = self.render_operations(plan.operations())?;
        let down = self.render_operations(plan.inverse().operations())?;
        Ok(MigrationSql {
            up: up.join("\n\n"),
            down: down.join("\n\n"),
        })
    }
}

fn column_list(columns: &[String], quote: fn(&str) -> String) -> String {
    columns.iter().map(|c| quote(c)).collect::<Vec<_>>().join(", ")
}

fn double_quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

fn backtick(ident: &str) -> String {
    format!("`{}`", ident.replace('`', "``"))
}

fn column_definition(column: &ColumnDescriptor, quote: fn(&str) -> String) -> String {
    let mut parts = vec![quote(&column.name), column.data_type.clone()];
    if !column.nullable {
        parts.push("NOT NULL".to_string());
    }
    if let Some(default) = &column.default {
        parts.push(format!("DEFAULT {}", default));
    }
    parts.join(" ")
}

fn constraint_body(constraint: &ConstraintDescriptor, quote: fn(&str) -> String) -> String {
    let columns = column_list(&constraint.columns, quote);
    match &constraint.kind {
        ConstraintKind::PrimaryKey => format!("PRIMARY KEY ({})", columns),
        ConstraintKind::Unique => format!("UNIQUE ({})", columns),
        ConstraintKind::ForeignKey {
            references_table,
            references_columns,
            on_delete,
        } => {
            let mut sql = format!(
                "FOREIGN KEY ({}) REFERENCES {} ({})",
                columns,
                quote(references_table),
                column_list(references_columns, quote)
            );
            if let Some(action) = on_delete {
                sql.push_str(&format!(" ON DELETE {}", action));
            }
            sql
        }
    }
}

fn create_table(
    table: &TableDescriptor,
    extra: &[&ConstraintDescriptor],
    quote: fn(&str) -> String,
) -> String {
    let mut lines: Vec<String> = table
        .columns
        .iter()
        .map(|c| column_definition(c, quote))
        .collect();
    for constraint in table.constraints.iter().chain(extra.iter().copied()) {
        lines.push(format!(
            "CONSTRAINT {} {}",
            quote(&constraint.name),
            constraint_body(constraint, quote)
        ));
    }
    format!(
        "CREATE TABLE {} (\n    {}\n);",
        quote(&table.name),
        lines.join(",\n    ")
    )
}

fn create_index(table: &str, index: &IndexDescriptor, quote: fn(&str) -> String) -> String {
    let unique = if index.unique { "UNIQUE " } else { "" };
    format!(
        "CREATE {}INDEX {} ON {} ({});",
        unique,
        quote(&index.name),
        quote(table),
        column_list(&index.columns, quote)
    )
}

/// PostgreSQL DDL.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresRenderer;

impl PostgresRenderer {
    fn alter_column(&self, table: &str, before: &ColumnDescriptor, after: &ColumnDescriptor) -> Vec<String> {
        let prefix = format!(
            "ALTER TABLE {} ALTER COLUMN {}",
            double_quote(table),
            double_quote(&after.name)
        );
        let mut stmts = Vec::new();

        if before.normalized_type() != after.normalized_type() {
            stmts.push(format!(
                "{} TYPE {} USING {}::{};",
                prefix,
                after.data_type,
                double_quote(&after.name),
                after.data_type
            ));
        }
        if before.nullable != after.nullable {
            let action = if after.nullable { "DROP NOT NULL" } else { "SET NOT NULL" };
            stmts.push(format!("{} {};", prefix, action));
        }
        if before.default != after.default {
            match &after.default {
                Some(default) => stmts.push(format!("{} SET DEFAULT {};", prefix, default)),
                None => stmts.push(format!("{} DROP DEFAULT;", prefix)),
            }
        }
        stmts
    }
}

impl DdlRenderer for PostgresRenderer {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    fn render_operation(&self, op: &DiffOperation) -> MigrateResult<Vec<String>> {
        let q = double_quote;
        let stmts = match op {
            DiffOperation::AddTable { table } => vec![create_table(table, &[], q)],
            DiffOperation::DropTable { table } => vec![format!("DROP TABLE {};", q(&table.name))],
            DiffOperation::AddColumn { table, column } => vec![format!(
                "ALTER TABLE {} ADD COLUMN {};",
                q(table),
                column_definition(column, q)
            )],
            DiffOperation::DropColumn { table, column } => vec![format!(
                "ALTER TABLE {} DROP COLUMN {};",
                q(table),
                q(&column.name)
            )],
            DiffOperation::AlterColumn {
                table,
                before,
                after,
            } => self.alter_column(table, before, after),
            DiffOperation::AddIndex { table, index } => vec![create_index(table, index, q)],
            DiffOperation::DropIndex { index, .. } => vec![format!("DROP INDEX {};", q(&index.name))],
            DiffOperation::AddConstraint { table, constraint } => vec![format!(
                "ALTER TABLE {} ADD CONSTRAINT {} {};",
                q(table),
                q(&constraint.name),
                constraint_body(constraint, q)
            )],
            DiffOperation::DropConstraint { table, constraint } => vec![format!(
                "ALTER TABLE {} DROP CONSTRAINT {};",
                q(table),
                q(&constraint.name)
            )],
        };
        Ok(stmts)
    }
}

/// MySQL DDL.
#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlRenderer;

impl DdlRenderer for MySqlRenderer {
    fn dialect(&self) -> Dialect {
        Dialect::Mysql
    }

    fn render_operation(&self, op: &DiffOperation) -> MigrateResult<Vec<String>> {
        let q = backtick;
        let stmts = match op {
            DiffOperation::AddTable { table } => vec![create_table(table, &[], q)],
            DiffOperation::DropTable { table } => vec![format!("DROP TABLE {};", q(&table.name))],
            DiffOperation::AddColumn { table, column } => vec![format!(
                "ALTER TABLE {} ADD COLUMN {};",
                q(table),
                column_definition(column, q)
            )],
            DiffOperation::DropColumn { table, column } => vec![format!(
                "ALTER TABLE {} DROP COLUMN {};",
                q(table),
                q(&column.name)
            )],
            // MODIFY restates the whole column definition.
            DiffOperation::AlterColumn { table, after, .. } => vec![format!(
                "ALTER TABLE {} MODIFY COLUMN {};",
                q(table),
                column_definition(after, q)
            )],
            DiffOperation::AddIndex { table, index } => vec![create_index(table, index, q)],
            DiffOperation::DropIndex { table, index } => vec![format!(
                "DROP INDEX {} ON {};",
                q(&index.name),
                q(table)
            )],
            DiffOperation::AddConstraint { table, constraint } => vec![format!(
                "ALTER TABLE {} ADD CONSTRAINT {} {};",
                q(table),
                q(&constraint.name),
                constraint_body(constraint, q)
            )],
            DiffOperation::DropConstraint { table, constraint } => {
                let action = match constraint.kind {
                    ConstraintKind::PrimaryKey => "DROP PRIMARY KEY".to_string(),
                    ConstraintKind::Unique => format!("DROP INDEX {}", q(&constraint.name)),
                    ConstraintKind::ForeignKey { .. } => {
                        format!("DROP FOREIGN KEY {}", q(&constraint.name))
                    }
                };
                vec![format!("ALTER TABLE {} {};", q(table), action)]
            }
        };
        Ok(stmts)
    }
}

/// SQLite DDL.
///
/// SQLite cannot alter columns or add/drop constraints on an existing table.
/// Foreign keys of a table created in the same plan are folded into its
/// `CREATE TABLE`, and constraint drops on a table dropped in the same plan
/// are left to the `DROP TABLE`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteRenderer;

impl SqliteRenderer {
    fn unsupported(op: &DiffOperation) -> MigrationError {
        MigrationError::unsupported("sqlite", op.to_string())
    }
}

impl DdlRenderer for SqliteRenderer {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn inlines_constraints(&self) -> bool {
        true
    }

    fn render_operation(&self, op: &DiffOperation) -> MigrateResult<Vec<String>> {
        let q = double_quote;
        let stmts = match op {
            DiffOperation::AddTable { table } => vec![create_table(table, &[], q)],
            DiffOperation::DropTable { table } => vec![format!("DROP TABLE {};", q(&table.name))],
            DiffOperation::AddColumn { table, column } => {
                if !column.nullable && column.default.is_none() {
                    return Err(MigrationError::unsupported(
                        "sqlite",
                        format!("{} (NOT NULL column without a default)", op),
                    ));
                }
                vec![format!(
                    "ALTER TABLE {} ADD COLUMN {};",
                    q(table),
                    column_definition(column, q)
                )]
            }
            DiffOperation::DropColumn { table, column } => vec![format!(
                "ALTER TABLE {} DROP COLUMN {};",
                q(table),
                q(&column.name)
            )],
            DiffOperation::AddIndex { table, index } => vec![create_index(table, index, q)],
            DiffOperation::DropIndex { index, .. } => vec![format!("DROP INDEX {};", q(&index.name))],
            DiffOperation::AlterColumn { .. }
            | DiffOperation::AddConstraint { .. }
            | DiffOperation::DropConstraint { .. } => return Err(Self::unsupported(op)),
        };
        Ok(stmts)
    }

    fn render_operations(&self, ops: &[DiffOperation]) -> MigrateResult<Vec<String>> {
        let created: BTreeSet<&str> = ops
            .iter()
            .filter(|op| matches!(op, DiffOperation::AddTable { .. }))
            .map(DiffOperation::table)
            .collect();
        let dropped: BTreeSet<&str> = ops
            .iter()
            .filter(|op| matches!(op, DiffOperation::DropTable { .. }))
            .map(DiffOperation::table)
            .collect();

        let mut stmts = Vec::new();
        for op in ops {
            match op {
                DiffOperation::AddTable { table } => {
                    let folded: Vec<&ConstraintDescriptor> = ops
                        .iter()
                        .filter_map(|other| match other {
                            DiffOperation::AddConstraint {
                                table: owner,
                                constraint,
                            } if owner == &table.name => Some(constraint),
                            _ => None,
                        })
                        .collect();
                    stmts.push(create_table(table, &folded, double_quote));
                }
                DiffOperation::AddConstraint { table, .. } if created.contains(table.as_str()) => {}
                DiffOperation::DropConstraint { table, .. } | DiffOperation::DropIndex { table, .. }
                    if dropped.contains(table.as_str()) => {}
                other => stmts.extend(self.render_operation(other)?),
            }
        }
        Ok(stmts)
    }
}
