//! Structural schema snapshots.
//!
//! A [`SchemaDescriptor`] is produced either by introspecting a live database
//! or by the model layer describing the desired state. The engine only ever
//! compares descriptors by value; it never looks at model internals.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{MigrateResult, MigrationError};

/// Name of the bookkeeping table, always excluded from diffs.
pub const BOOKKEEPING_TABLE: &str = "_lineage_version";

/// A structural snapshot of a schema.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaDescriptor {
    /// Tables keyed by name.
    #[serde(default)]
    pub tables: BTreeMap<String, TableDescriptor>,
}

impl SchemaDescriptor {
    /// Create an empty descriptor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a table.
    pub fn with_table(mut self, table: TableDescriptor) -> Self {
        self.tables.insert(table.name.clone(), table);
        self
    }

    /// Get a table by name.
    pub fn table(&self, name: &str) -> Option<&TableDescriptor> {
        self.tables.get(name)
    }

    /// Whether there are no tables.
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// A copy containing only the tables `filter` admits.
    pub fn filtered(&self, filter: &SchemaFilter) -> Self {
        Self {
            tables: self
                .tables
                .iter()
                .filter(|(name, _)| filter.should_include_table(name))
                .map(|(name, table)| (name.clone(), table.clone()))
                .collect(),
        }
    }

    /// Check internal consistency: unique names, keys matching table names,
    /// and index/constraint columns that exist.
    ///
    /// Index names must be unique across the whole schema. Within a table an
    /// index and a constraint may not share a name either.
    pub fn validate(&self) -> MigrateResult<()> {
        let mut indexes: BTreeMap<&str, &str> = BTreeMap::new();
        for (key, table) in &self.tables {
            if key != &table.name {
                return Err(MigrationError::invalid_plan(format!(
                    "table keyed as '{}' is named '{}'",
                    key, table.name
                )));
            }
            table.validate()?;
            for index in &table.indexes {
                if let Some(owner) = indexes.insert(&index.name, &table.name) {
                    return Err(MigrationError::invalid_plan(format!(
                        "index '{}' is declared on both '{}' and '{}'",
                        index.name, owner, table.name
                    )));
                }
            }
        }
        Ok(())
    }

    /// Parse a descriptor from JSON.
    pub fn from_json(content: &str) -> MigrateResult<Self> {
        serde_json::from_str(content)
            .map_err(|e| MigrationError::invalid_plan(format!("invalid schema JSON: {}", e)))
    }

    /// Parse a descriptor from TOML.
    pub fn from_toml(content: &str) -> MigrateResult<Self> {
        toml::from_str(content)
            .map_err(|e| MigrationError::invalid_plan(format!("invalid schema TOML: {}", e)))
    }

    /// Serialize as pretty JSON.
    pub fn to_json(&self) -> MigrateResult<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| MigrationError::other(format!("Failed to serialize schema: {}", e)))
    }
}

/// A table: columns, indexes and constraints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDescriptor {
    /// Table name.
    pub name: String,
    /// Columns in declaration order.
    #[serde(default)]
    pub columns: Vec<ColumnDescriptor>,
    /// Indexes.
    #[serde(default)]
    pub indexes: Vec<IndexDescriptor>,
    /// Constraints.
    #[serde(default)]
    pub constraints: Vec<ConstraintDescriptor>,
}

impl TableDescriptor {
    /// Create an empty table.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            indexes: Vec::new(),
            constraints: Vec::new(),
        }
    }

    /// Add a column.
    pub fn column(mut self, column: ColumnDescriptor) -> Self {
        self.columns.push(column);
        self
    }

    /// Add an index.
    pub fn index(mut self, index: IndexDescriptor) -> Self {
        self.indexes.push(index);
        self
    }

    /// Add a constraint.
    pub fn constraint(mut self, constraint: ConstraintDescriptor) -> Self {
        self.constraints.push(constraint);
        self
    }

    /// Find a column by name.
    pub fn get_column(&self, name: &str) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Find an index by name.
    pub fn get_index(&self, name: &str) -> Option<&IndexDescriptor> {
        self.indexes.iter().find(|i| i.name == name)
    }

    /// Find a constraint by name.
    pub fn get_constraint(&self, name: &str) -> Option<&ConstraintDescriptor> {
        self.constraints.iter().find(|c| c.name == name)
    }

    /// Tables this one references through foreign keys (excluding itself).
    pub fn referenced_tables(&self) -> BTreeSet<&str> {
        self.constraints
            .iter()
            .filter_map(|c| c.referenced_table())
            .filter(|t| *t != self.name)
            .collect()
    }

    fn validate(&self) -> MigrateResult<()> {
        let mut names = BTreeSet::new();
        for column in &self.columns {
            if !names.insert(column.name.as_str()) {
                return Err(MigrationError::invalid_plan(format!(
                    "duplicate column '{}.{}'",
                    self.name, column.name
                )));
            }
        }

        let mut objects = BTreeSet::new();
        let object_names = self.indexes.iter().map(|i| &i.name);
        for name in object_names.chain(self.constraints.iter().map(|c| &c.name)) {
            if !objects.insert(name.as_str()) {
                return Err(MigrationError::invalid_plan(format!(
                    "duplicate index or constraint '{}' on '{}'",
                    name, self.name
                )));
            }
        }

        let index_columns = self.indexes.iter().map(|i| (&i.name, &i.columns));
        let constraint_columns = self.constraints.iter().map(|c| (&c.name, &c.columns));
        for (object, columns) in index_columns.chain(constraint_columns) {
            if let Some(missing) = columns.iter().find(|c| !names.contains(c.as_str())) {
                return Err(MigrationError::invalid_plan(format!(
                    "'{}' on '{}' references unknown column '{}'",
                    object, self.name, missing
                )));
            }
        }
        Ok(())
    }
}

/// A column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    /// Column name.
    pub name: String,
    /// Dialect type name, e.g. `INTEGER` or `VARCHAR(255)`.
    pub data_type: String,
    /// Whether NULL is allowed.
    #[serde(default = "default_nullable")]
    pub nullable: bool,
    /// Default value expression.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

fn default_nullable() -> bool {
    true
}

impl ColumnDescriptor {
    /// Create a nullable column without a default.
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            nullable: true,
            default: None,
        }
    }

    /// Mark the column NOT NULL.
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Set a default expression.
    pub fn default_value(mut self, expr: impl Into<String>) -> Self {
        self.default = Some(expr.into());
        self
    }

    /// Type normalized for comparison: uppercase, single spaces.
    pub fn normalized_type(&self) -> String {
        self.data_type
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_uppercase()
    }

    /// Whether type, nullability or default differ from `other`.
    pub fn differs_from(&self, other: &ColumnDescriptor) -> bool {
        self.normalized_type() != other.normalized_type()
            || self.nullable != other.nullable
            || self.default.as_deref().map(str::trim) != other.default.as_deref().map(str::trim)
    }
}

/// An index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDescriptor {
    /// Index name.
    pub name: String,
    /// Indexed columns, in order.
    pub columns: Vec<String>,
    /// Whether the index enforces uniqueness.
    #[serde(default)]
    pub unique: bool,
}

impl IndexDescriptor {
    /// Create a non-unique index.
    pub fn new<I, S>(name: impl Into<String>, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            columns: columns.into_iter().map(Into::into).collect(),
            unique: false,
        }
    }

    /// Make the index unique.
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

/// Constraint flavor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConstraintKind {
    /// Primary key.
    PrimaryKey,
    /// Unique constraint.
    Unique,
    /// Foreign key.
    ForeignKey {
        /// Referenced table.
        references_table: String,
        /// Referenced columns.
        references_columns: Vec<String>,
        /// ON DELETE action.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        on_delete: Option<String>,
    },
}

/// A named constraint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstraintDescriptor {
    /// Constraint name.
    pub name: String,
    /// Constrained columns.
    pub columns: Vec<String>,
    /// Kind-specific details.
    pub kind: ConstraintKind,
}

impl ConstraintDescriptor {
    /// Create a primary key.
    pub fn primary_key<I, S>(name: impl Into<String>, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            columns: columns.into_iter().map(Into::into).collect(),
            kind: ConstraintKind::PrimaryKey,
        }
    }

    /// Create a unique constraint.
    pub fn unique<I, S>(name: impl Into<String>, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            columns: columns.into_iter().map(Into::into).collect(),
            kind: ConstraintKind::Unique,
        }
    }

    /// Create a foreign key.
    pub fn foreign_key<I, S, J, T>(
        name: impl Into<String>,
        columns: I,
        references_table: impl Into<String>,
        references_columns: J,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        J: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self {
            name: name.into(),
            columns: columns.into_iter().map(Into::into).collect(),
            kind: ConstraintKind::ForeignKey {
                references_table: references_table.into(),
                references_columns: references_columns.into_iter().map(Into::into).collect(),
                on_delete: None,
            },
        }
    }

    /// The referenced table, for foreign keys.
    pub fn referenced_table(&self) -> Option<&str> {
        match &self.kind {
            ConstraintKind::ForeignKey {
                references_table, ..
            } => Some(references_table),
            _ => None,
        }
    }

    /// Whether this is a foreign key.
    pub fn is_foreign_key(&self) -> bool {
        matches!(self.kind, ConstraintKind::ForeignKey { .. })
    }
}

/// Which tables take part in a comparison.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaFilter {
    /// Tables to include (empty = all).
    #[serde(default)]
    pub include_tables: Vec<String>,
    /// Tables to exclude.
    #[serde(default)]
    pub exclude_tables: Vec<String>,
}

impl Default for SchemaFilter {
    fn default() -> Self {
        Self {
            include_tables: Vec::new(),
            exclude_tables: vec![BOOKKEEPING_TABLE.to_string()],
        }
    }
}

impl SchemaFilter {
    /// Create the default filter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Include only these tables.
    pub fn include_tables(mut self, tables: Vec<String>) -> Self {
        self.include_tables = tables;
        self
    }

    /// Exclude these tables in addition to the bookkeeping table.
    pub fn exclude_tables(mut self, tables: Vec<String>) -> Self {
        self.exclude_tables.extend(tables);
        self
    }

    /// Check if a table should be included.
    pub fn should_include_table(&self, name: &str) -> bool {
        if name == BOOKKEEPING_TABLE || self.exclude_tables.iter().any(|t| t == name) {
            return false;
        }
        self.include_tables.is_empty() || self.include_tables.iter().any(|t| t == name)
    }
}

/// Source of the desired schema (the model layer's output).
#[async_trait::async_trait]
pub trait TargetSchemaProvider: Send + Sync {
    /// Describe the schema the models declare.
    async fn target_schema(&self) -> MigrateResult<SchemaDescriptor>;
}

#[async_trait::async_trait]
impl TargetSchemaProvider for SchemaDescriptor {
    async fn target_schema(&self) -> MigrateResult<SchemaDescriptor> {
        Ok(self.clone())
    }
}

/// A descriptor stored on disk as `.json` or `.toml`.
#[derive(Debug, Clone)]
pub struct DescriptorFile {
    path: PathBuf,
}

impl DescriptorFile {
    /// Point at a descriptor file.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait::async_trait]
impl TargetSchemaProvider for DescriptorFile {
    async fn target_schema(&self) -> MigrateResult<SchemaDescriptor> {
        let content = tokio::fs::read_to_string(&self.path).await?;
        let descriptor = match self.path.extension().and_then(|e| e.to_str()) {
            Some("json") => SchemaDescriptor::from_json(&content)?,
            _ => SchemaDescriptor::from_toml(&content)?,
        };
        descriptor.validate()?;
        Ok(descriptor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users() -> TableDescriptor {
        TableDescriptor::new("users")
            .column(ColumnDescriptor::new("id", "INTEGER").not_null())
            .column(ColumnDescriptor::new("name", "TEXT"))
            .constraint(ConstraintDescriptor::primary_key("users_pkey", ["id"]))
    }

    #[test]
    fn test_filter_excludes_bookkeeping() {
        let filter = SchemaFilter::default();
        assert!(!filter.should_include_table(BOOKKEEPING_TABLE));
        assert!(filter.should_include_table("users"));

        let filter = SchemaFilter::new().include_tables(vec!["users".into()]);
        assert!(!filter.should_include_table("posts"));
    }

    #[test]
    fn test_filtered_descriptor() {
        let schema = SchemaDescriptor::new()
            .with_table(users())
            .with_table(TableDescriptor::new(BOOKKEEPING_TABLE));
        let filtered = schema.filtered(&SchemaFilter::default());
        assert_eq!(filtered.tables.len(), 1);
        assert!(filtered.table("users").is_some());
    }

    #[test]
    fn test_validate_unknown_index_column() {
        let schema = SchemaDescriptor::new()
            .with_table(users().index(IndexDescriptor::new("users_email_idx", ["email"])));
        assert!(schema.validate().is_err());
        assert!(SchemaDescriptor::new().with_table(users()).validate().is_ok());
    }

    #[test]
    fn test_validate_duplicate_object_names() {
        let twice = users()
            .index(IndexDescriptor::new("users_name_idx", ["name"]))
            .index(IndexDescriptor::new("users_name_idx", ["id", "name"]));
        let err = SchemaDescriptor::new().with_table(twice).validate().unwrap_err();
        assert!(err.to_string().contains("duplicate index or constraint 'users_name_idx'"));

        let clash = users().index(IndexDescriptor::new("users_pkey", ["name"]));
        assert!(SchemaDescriptor::new().with_table(clash).validate().is_err());

        let shared = SchemaDescriptor::new()
            .with_table(users().index(IndexDescriptor::new("name_idx", ["name"])))
            .with_table(
                TableDescriptor::new("teams")
                    .column(ColumnDescriptor::new("name", "TEXT"))
                    .index(IndexDescriptor::new("name_idx", ["name"])),
            );
        let err = shared.validate().unwrap_err();
        assert!(err.to_string().contains("'teams' and 'users'"));
    }

    #[test]
    fn test_column_comparison_is_normalized() {
        let a = ColumnDescriptor::new("name", "varchar(255)");
        let b = ColumnDescriptor::new("name", "VARCHAR(255)");
        assert!(!a.differs_from(&b));
        assert!(a.differs_from(&b.clone().not_null()));
    }

    #[test]
    fn test_json_descriptor() {
        let json = r#"{
            "tables": {
                "users": {
                    "name": "users",
                    "columns": [{"name": "id", "data_type": "INTEGER", "nullable": false}],
                    "constraints": [{"name": "users_pkey", "columns": ["id"], "kind": {"type": "primary_key"}}]
                }
            }
        }"#;
        let schema = SchemaDescriptor::from_json(json).unwrap();
        let users = schema.table("users").unwrap();
        assert!(!users.columns[0].nullable);
        assert_eq!(users.constraints[0].kind, ConstraintKind::PrimaryKey);
    }

    #[test]
    fn test_referenced_tables() {
        let posts = TableDescriptor::new("posts")
            .column(ColumnDescriptor::new("author_id", "INTEGER"))
            .constraint(ConstraintDescriptor::foreign_key(
                "posts_author_fk",
                ["author_id"],
                "users",
                ["id"],
            ));
        assert_eq!(posts.referenced_tables().into_iter().collect::<Vec<_>>(), vec!["users"]);
    }
}
