//! SQLite backend.
//!
//! One [`SqliteEnvironment`] is both the executor and the bookkeeping for a
//! single database file. Applied revisions are rows of `_lineage_version`,
//! written inside the same transaction as the step that applied them.
//!
//! Introspection reads `PRAGMA` tables, which do not keep constraint names.
//! Names given with a table-level `CONSTRAINT <name>` clause are recovered
//! from the stored `CREATE TABLE` text. Unnamed constraints fall back to a
//! convention:
//!
//! - primary key: `<table>_pkey`
//! - unique constraint: `<table>_<columns>_key`
//! - foreign key: `<table>_<columns>_fkey`
//!
//! Explicitly created indexes keep their own names.
//!
//! # Locking
//!
//! [`SqliteEnvironment::acquire_lock`](Bookkeeping::acquire_lock) serializes
//! apply runs that share one `SqliteEnvironment` (or its clones) within a
//! process. Separate handles to the same file, in this process or another,
//! do not share that lock. Between them every step still runs under
//! `BEGIN IMMEDIATE`, and the bookkeeping write compares the applied state
//! read at the start of the step, so a concurrent writer surfaces as
//! `WriteConflict` and the losing step rolls back.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, LazyLock};

use regex_lite::Regex;
use tokio_rusqlite::Connection;
use tracing::debug;

use crate::apply::{Environment, SchemaExecutor, StepTransaction};
use crate::error::{MigrateResult, MigrationError};
use crate::history::{AppliedState, Bookkeeping, EnvironmentLock, conflict};
use crate::schema::{
    BOOKKEEPING_TABLE, ColumnDescriptor, ConstraintDescriptor, ConstraintKind, IndexDescriptor,
    SchemaDescriptor, TableDescriptor,
};
use crate::sql::Dialect;

/// A SQLite database acting as one environment.
#[derive(Clone)]
pub struct SqliteEnvironment {
    name: String,
    conn: Connection,
    lock: Arc<tokio::sync::Mutex<()>>,
}

impl std::fmt::Debug for SqliteEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteEnvironment")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl SqliteEnvironment {
    /// Open (or create) a database file.
    pub async fn open(name: impl Into<String>, path: impl AsRef<Path>) -> MigrateResult<Self> {
        let conn = Connection::open(path.as_ref())
            .await
            .map_err(MigrationError::from)?;
        Self::init(name.into(), conn).await
    }

    /// Open a private in-memory database.
    pub async fn open_in_memory(name: impl Into<String>) -> MigrateResult<Self> {
        let conn = Connection::open_in_memory()
            .await
            .map_err(MigrationError::from)?;
        Self::init(name.into(), conn).await
    }

    async fn init(name: String, conn: Connection) -> MigrateResult<Self> {
        let init_sql = format!(
            "PRAGMA foreign_keys = ON;\n{}",
            Dialect::Sqlite.bookkeeping_table_sql()
        );
        conn.call(move |conn| {
            conn.execute_batch(&init_sql)?;
            Ok(())
        })
        .await
        .map_err(MigrationError::from)?;
        debug!(env = %name, "Opened SQLite environment");

        Ok(Self {
            name,
            conn,
            lock: Arc::new(tokio::sync::Mutex::new(())),
        })
    }

    /// Wrap as an [`Environment`].
    pub fn environment(&self) -> Environment {
        Environment::new(
            self.name.clone(),
            Arc::new(self.clone()),
            Arc::new(self.clone()),
        )
    }

    /// Run SQL outside any apply run.
    pub async fn execute_batch(&self, sql: &str) -> MigrateResult<()> {
        let sql = sql.to_string();
        self.conn
            .call(move |conn| Ok(conn.execute_batch(&sql)?))
            .await
            .map_err(MigrationError::from)
    }
}

fn read_state(conn: &rusqlite::Connection) -> rusqlite::Result<AppliedState> {
    let mut stmt = conn.prepare(&format!(
        "SELECT revision_id FROM \"{}\" ORDER BY revision_id",
        BOOKKEEPING_TABLE
    ))?;
    let ids = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(AppliedState::from_heads(ids))
}

/// Replace the record when it still equals `expected`; otherwise return what
/// was found.
fn write_state(
    conn: &rusqlite::Connection,
    expected: &AppliedState,
    next: &AppliedState,
) -> rusqlite::Result<Option<AppliedState>> {
    let found = read_state(conn)?;
    if &found != expected {
        return Ok(Some(found));
    }
    conn.execute(&format!("DELETE FROM \"{}\"", BOOKKEEPING_TABLE), [])?;
    let insert = format!("INSERT INTO \"{}\" (revision_id) VALUES (?1)", BOOKKEEPING_TABLE);
    for head in next.heads() {
        conn.execute(&insert, [head])?;
    }
    Ok(None)
}

#[async_trait::async_trait]
impl Bookkeeping for SqliteEnvironment {
    fn env(&self) -> &str {
        &self.name
    }

    async fn load(&self) -> MigrateResult<AppliedState> {
        self.conn
            .call(|conn| Ok(read_state(conn)?))
            .await
            .map_err(|e| MigrationError::bookkeeping(&self.name, e.to_string()))
    }

    async fn persist(&self, expected: &AppliedState, next: &AppliedState) -> MigrateResult<()> {
        let (expected_owned, next_owned) = (expected.clone(), next.clone());
        let found = self
            .conn
            .call(move |conn| {
                // Join the step's transaction when one is open.
                let standalone = conn.is_autocommit();
                if standalone {
                    conn.execute_batch("BEGIN IMMEDIATE")?;
                }
                let result = write_state(conn, &expected_owned, &next_owned);
                if standalone {
                    match &result {
                        Ok(None) => conn.execute_batch("COMMIT")?,
                        _ => conn.execute_batch("ROLLBACK")?,
                    }
                }
                Ok(result?)
            })
            .await
            .map_err(|e| MigrationError::bookkeeping(&self.name, e.to_string()))?;

        match found {
            Some(found) => Err(conflict(&self.name, expected, &found)),
            None => Ok(()),
        }
    }

    async fn acquire_lock(&self) -> MigrateResult<EnvironmentLock> {
        let guard = Arc::clone(&self.lock).lock_owned().await;
        debug!(env = %self.name, "Acquired environment lock");
        Ok(EnvironmentLock::new(self.name.clone(), move || drop(guard)))
    }
}

#[async_trait::async_trait]
impl SchemaExecutor for SqliteEnvironment {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    async fn begin(&self) -> MigrateResult<Box<dyn StepTransaction>> {
        self.conn
            .call(|conn| Ok(conn.execute_batch("BEGIN IMMEDIATE")?))
            .await
            .map_err(MigrationError::from)?;
        Ok(Box::new(SqliteTransaction {
            conn: self.conn.clone(),
        }))
    }

    async fn introspect(&self) -> MigrateResult<SchemaDescriptor> {
        self.conn
            .call(|conn| Ok(introspect_schema(conn)?))
            .await
            .map_err(MigrationError::from)
    }
}

struct SqliteTransaction {
    conn: Connection,
}

impl SqliteTransaction {
    async fn batch(&self, sql: &str) -> MigrateResult<()> {
        let sql = sql.to_string();
        self.conn
            .call(move |conn| Ok(conn.execute_batch(&sql)?))
            .await
            .map_err(MigrationError::from)
    }
}

#[async_trait::async_trait]
impl StepTransaction for SqliteTransaction {
    async fn execute(&mut self, sql: &str) -> MigrateResult<()> {
        debug!(sql, "Executing step");
        self.batch(sql).await
    }

    async fn commit(self: Box<Self>) -> MigrateResult<()> {
        self.batch("COMMIT").await
    }

    async fn rollback(self: Box<Self>) -> MigrateResult<()> {
        self.batch("ROLLBACK").await
    }
}

fn introspect_schema(conn: &rusqlite::Connection) -> rusqlite::Result<SchemaDescriptor> {
    let mut stmt = conn.prepare(
        "SELECT name, sql FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
    )?;
    let tables = stmt
        .query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut schema = SchemaDescriptor::new();
    for (name, sql) in tables.into_iter().filter(|(n, _)| n != BOOKKEEPING_TABLE) {
        let declared = DeclaredConstraints::parse(sql.as_deref().unwrap_or_default());
        schema = schema.with_table(introspect_table(conn, &name, &declared)?);
    }
    Ok(schema)
}

/// `CONSTRAINT <name> PRIMARY KEY | UNIQUE | FOREIGN KEY (<columns>)`
static CONSTRAINT_CLAUSE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)\bCONSTRAINT\s+("(?:[^"]|"")+"|`(?:[^`]|``)+`|\[[^\]]+\]|[A-Za-z_][A-Za-z0-9_$]*)\s+(PRIMARY\s+KEY|UNIQUE|FOREIGN\s+KEY)\s*\(([^)]*)\)"#,
    )
    .ok()
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum DeclaredKind {
    PrimaryKey,
    Unique,
    ForeignKey,
}

/// Constraint names declared in a `CREATE TABLE` body, keyed by kind and
/// lower-cased column list.
#[derive(Debug)]
struct DeclaredConstraints(BTreeMap<(DeclaredKind, Vec<String>), String>);

impl DeclaredConstraints {
    fn parse(sql: &str) -> Self {
        let mut names = BTreeMap::new();
        let Some(re) = CONSTRAINT_CLAUSE.as_ref() else {
            return Self(names);
        };
        for caps in re.captures_iter(sql) {
            let kind = match caps[2].get(..1).map(str::to_ascii_uppercase).as_deref() {
                Some("P") => DeclaredKind::PrimaryKey,
                Some("U") => DeclaredKind::Unique,
                _ => DeclaredKind::ForeignKey,
            };
            let columns = caps[3].split(',').map(column_key).collect();
            names.entry((kind, columns)).or_insert_with(|| unquote(&caps[1]));
        }
        Self(names)
    }

    /// The declared name, or `fallback` for an unnamed constraint.
    fn name(&self, kind: DeclaredKind, columns: &[String], fallback: String) -> String {
        let key: (DeclaredKind, Vec<String>) =
            (kind, columns.iter().map(|c| c.to_lowercase()).collect());
        self.0.get(&key).cloned().unwrap_or(fallback)
    }
}

fn unquote(ident: &str) -> String {
    let ident = ident.trim();
    let inner = ident.get(1..ident.len().saturating_sub(1)).unwrap_or_default();
    match (ident.as_bytes().first(), ident.as_bytes().last()) {
        _ if ident.len() < 2 => ident.to_string(),
        (Some(b'"'), Some(b'"')) => inner.replace("\"\"", "\""),
        (Some(b'`'), Some(b'`')) => inner.replace("``", "`"),
        (Some(b'['), Some(b']')) => inner.to_string(),
        _ => ident.to_string(),
    }
}

fn column_key(part: &str) -> String {
    let part = part.trim();
    let ident = match part.as_bytes().first() {
        Some(&open @ (b'"' | b'`' | b'[')) => {
            let close = if open == b'[' { ']' } else { open as char };
            match part[1..].rfind(close) {
                Some(end) => &part[..end + 2],
                None => part,
            }
        }
        _ => part.split_whitespace().next().unwrap_or(part),
    };
    unquote(ident).to_lowercase()
}

fn introspect_table(
    conn: &rusqlite::Connection,
    name: &str,
    declared: &DeclaredConstraints,
) -> rusqlite::Result<TableDescriptor> {
    let mut table = TableDescriptor::new(name);

    let mut stmt = conn.prepare(
        "SELECT name, type, \"notnull\", dflt_value, pk FROM pragma_table_info(?1) ORDER BY cid",
    )?;
    let mut primary: Vec<(i64, String)> = Vec::new();
    let rows = stmt.query_map([name], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, i64>(2)?,
            row.get::<_, Option<String>>(3)?,
            row.get::<_, i64>(4)?,
        ))
    })?;
    for row in rows {
        let (column, data_type, not_null, default, pk) = row?;
        let mut descriptor = ColumnDescriptor::new(&column, data_type);
        if not_null != 0 {
            descriptor = descriptor.not_null();
        }
        if let Some(default) = default {
            descriptor = descriptor.default_value(default);
        }
        if pk > 0 {
            primary.push((pk, column));
        }
        table = table.column(descriptor);
    }
    if !primary.is_empty() {
        primary.sort();
        let columns: Vec<String> = primary.into_iter().map(|(_, c)| c).collect();
        let constraint_name =
            declared.name(DeclaredKind::PrimaryKey, &columns, format!("{}_pkey", name));
        table = table.constraint(ConstraintDescriptor::primary_key(constraint_name, columns));
    }

    let mut stmt =
        conn.prepare("SELECT name, \"unique\", origin FROM pragma_index_list(?1) ORDER BY name")?;
    let indexes = stmt
        .query_map([name], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    for (index, unique, origin) in indexes {
        let mut stmt = conn.prepare("SELECT name FROM pragma_index_info(?1) ORDER BY seqno")?;
        let columns = stmt
            .query_map([&index], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        match origin.as_str() {
            "c" => {
                let mut descriptor = IndexDescriptor::new(index, columns);
                if unique != 0 {
                    descriptor = descriptor.unique();
                }
                table = table.index(descriptor);
            }
            "u" => {
                let fallback = format!("{}_{}_key", name, columns.join("_"));
                let constraint_name = declared.name(DeclaredKind::Unique, &columns, fallback);
                table = table.constraint(ConstraintDescriptor::unique(constraint_name, columns));
            }
            _ => {}
        }
    }

    let mut stmt = conn.prepare(
        "SELECT id, \"table\", \"from\", \"to\", on_delete FROM pragma_foreign_key_list(?1) ORDER BY id, seq",
    )?;
    let rows = stmt
        .query_map([name], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut foreign: BTreeMap<i64, ConstraintDescriptor> = BTreeMap::new();
    for (id, references, from, to, on_delete) in rows {
        let fk = foreign.entry(id).or_insert_with(|| ConstraintDescriptor {
            name: String::new(),
            columns: Vec::new(),
            kind: ConstraintKind::ForeignKey {
                references_table: references,
                references_columns: Vec::new(),
                on_delete: (on_delete != "NO ACTION").then_some(on_delete),
            },
        });
        fk.columns.push(from);
        if let (Some(to), ConstraintKind::ForeignKey {
            references_columns, ..
        }) = (to, &mut fk.kind)
        {
            references_columns.push(to);
        }
    }
    for mut fk in foreign.into_values() {
        let fallback = format!("{}_{}_fkey", name, fk.columns.join("_"));
        fk.name = declared.name(DeclaredKind::ForeignKey, &fk.columns, fallback);
        table = table.constraint(fk);
    }

    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apply::{ApplyOrchestrator, CancelHandle};
    use crate::diff::SchemaDiffer;
    use crate::revision::{Revision, RevisionGraph, RevisionPayload};
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn graph() -> RevisionGraph {
        RevisionGraph::build(vec![
            Revision::new("r1", Vec::<String>::new(), "users").with_payload(RevisionPayload::new(
                "CREATE TABLE users (id INTEGER NOT NULL PRIMARY KEY, name TEXT);",
                "DROP TABLE users;",
            )),
            Revision::new("r2", ["r1"], "email").with_payload(RevisionPayload::new(
                "ALTER TABLE users ADD COLUMN email TEXT;",
                "ALTER TABLE users DROP COLUMN email;",
            )),
        ])
        .unwrap()
    }

    fn ids(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_fresh_database_is_empty() {
        let db = SqliteEnvironment::open_in_memory("dev").await.unwrap();
        assert!(db.load().await.unwrap().is_empty());
        assert!(db.introspect().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_apply_records_state() {
        let dir = TempDir::new().unwrap();
        let db = SqliteEnvironment::open("dev", dir.path().join("dev.db"))
            .await
            .unwrap();
        let env = db.environment();

        let report = ApplyOrchestrator::new()
            .apply(&graph(), &ids(&["r1", "r2"]), &env, &CancelHandle::new())
            .await
            .unwrap();
        assert_eq!(report.applied, ids(&["r1", "r2"]));
        assert_eq!(db.load().await.unwrap(), AppliedState::at("r2"));

        let reopened = SqliteEnvironment::open("dev", dir.path().join("dev.db"))
            .await
            .unwrap();
        assert_eq!(reopened.load().await.unwrap(), AppliedState::at("r2"));
        let users = reopened.introspect().await.unwrap();
        assert!(users.table("users").unwrap().get_column("email").is_some());
    }

    #[tokio::test]
    async fn test_failed_step_rolls_back() {
        let db = SqliteEnvironment::open_in_memory("dev").await.unwrap();
        let env = db.environment();
        let graph = graph()
            .with_revision(Revision::new("r3", ["r2"], "broken").with_payload(
                RevisionPayload::new(
                    "CREATE TABLE audit (id INTEGER);\nALTER TABLE missing ADD COLUMN x TEXT;",
                    "",
                ),
            ))
            .unwrap();

        let err = ApplyOrchestrator::new()
            .apply(&graph, &ids(&["r1", "r2", "r3"]), &env, &CancelHandle::new())
            .await
            .unwrap_err();
        match err {
            MigrationError::PartialApplyFailure {
                failed_step,
                last_successful,
                rolled_back,
                ..
            } => {
                assert_eq!(failed_step, "r3");
                assert_eq!(last_successful.as_deref(), Some("r2"));
                assert!(rolled_back);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(db.load().await.unwrap(), AppliedState::at("r2"));
        assert!(db.introspect().await.unwrap().table("audit").is_none());
    }

    #[tokio::test]
    async fn test_persist_detects_conflict() {
        let db = SqliteEnvironment::open_in_memory("dev").await.unwrap();
        db.persist(&AppliedState::empty(), &AppliedState::at("r1"))
            .await
            .unwrap();

        let err = db
            .persist(&AppliedState::empty(), &AppliedState::at("r2"))
            .await
            .unwrap_err();
        assert!(matches!(err, MigrationError::WriteConflict { .. }));
        assert_eq!(db.load().await.unwrap(), AppliedState::at("r1"));
    }

    #[tokio::test]
    async fn test_apply_schema_converges() {
        let db = SqliteEnvironment::open_in_memory("dev").await.unwrap();
        let env = db.environment();
        let target = SchemaDescriptor::new().with_table(
            TableDescriptor::new("users")
                .column(ColumnDescriptor::new("id", "INTEGER").not_null())
                .column(ColumnDescriptor::new("email", "TEXT"))
                .column(ColumnDescriptor::new("name", "TEXT").default_value("''"))
                .index(IndexDescriptor::new("users_name_idx", ["name"]))
                .constraint(ConstraintDescriptor::primary_key("users_pkey", ["id"]))
                .constraint(ConstraintDescriptor::unique("users_email_key", ["email"])),
        );
        let differ = SchemaDiffer::new();

        let report = ApplyOrchestrator::new()
            .apply_schema(&target, &differ, &env, &CancelHandle::new())
            .await
            .unwrap();
        assert_eq!(report.applied.len(), 2);

        let live = db.introspect().await.unwrap();
        assert!(differ.diff(&live, &target).unwrap().is_empty());

        let again = ApplyOrchestrator::new()
            .apply_schema(&target, &differ, &env, &CancelHandle::new())
            .await
            .unwrap();
        assert!(again.applied.is_empty());
    }

    #[tokio::test]
    async fn test_introspect_foreign_keys() {
        let db = SqliteEnvironment::open_in_memory("dev").await.unwrap();
        db.execute_batch(
            "CREATE TABLE users (id INTEGER PRIMARY KEY);
             CREATE TABLE posts (
                 id INTEGER PRIMARY KEY,
                 author_id INTEGER NOT NULL REFERENCES users (id) ON DELETE CASCADE
             );",
        )
        .await
        .unwrap();

        let schema = db.introspect().await.unwrap();
        let posts = schema.table("posts").unwrap();
        let fk = posts.get_constraint("posts_author_id_fkey").unwrap();
        assert_eq!(fk.columns, vec!["author_id"]);
        assert_eq!(
            fk.kind,
            ConstraintKind::ForeignKey {
                references_table: "users".into(),
                references_columns: vec!["id".into()],
                on_delete: Some("CASCADE".into()),
            }
        );
        assert!(schema.table(BOOKKEEPING_TABLE).is_none());
    }

    fn authored_posts() -> SchemaDescriptor {
        SchemaDescriptor::new()
            .with_table(
                TableDescriptor::new("users")
                    .column(ColumnDescriptor::new("id", "INTEGER").not_null())
                    .constraint(ConstraintDescriptor::primary_key("pk_users", ["id"])),
            )
            .with_table(
                TableDescriptor::new("posts")
                    .column(ColumnDescriptor::new("id", "INTEGER").not_null())
                    .column(ColumnDescriptor::new("author_id", "INTEGER"))
                    .column(ColumnDescriptor::new("slug", "TEXT"))
                    .constraint(ConstraintDescriptor::primary_key("posts_pkey", ["id"]))
                    .constraint(ConstraintDescriptor::unique("uq_posts_slug", ["slug"]))
                    .constraint(ConstraintDescriptor::foreign_key(
                        "posts_author_fk",
                        ["author_id"],
                        "users",
                        ["id"],
                    )),
            )
    }

    #[tokio::test]
    async fn test_introspect_declared_constraint_names() {
        let db = SqliteEnvironment::open_in_memory("dev").await.unwrap();
        db.execute_batch(
            "CREATE TABLE users (id INTEGER, CONSTRAINT [pk users] PRIMARY KEY (id));
             CREATE TABLE posts (
                 id INTEGER,
                 author_id INTEGER,
                 slug TEXT,
                 CONSTRAINT pk_posts PRIMARY KEY (id),
                 constraint `uq ``slug``` unique (\"SLUG\"),
                 CONSTRAINT \"posts_author_fk\" FOREIGN KEY (author_id) REFERENCES users (id)
             );
             CREATE TABLE tags (id INTEGER PRIMARY KEY, name TEXT UNIQUE);",
        )
        .await
        .unwrap();

        let schema = db.introspect().await.unwrap();
        let names = |table: &str| -> Vec<String> {
            let mut names: Vec<String> = schema
                .table(table)
                .unwrap()
                .constraints
                .iter()
                .map(|c| c.name.clone())
                .collect();
            names.sort();
            names
        };
        assert_eq!(names("users"), vec!["pk users"]);
        assert_eq!(names("posts"), vec!["pk_posts", "posts_author_fk", "uq `slug`"]);
        assert_eq!(names("tags"), vec!["tags_name_key", "tags_pkey"]);
    }

    #[tokio::test]
    async fn test_apply_schema_with_foreign_keys_converges() {
        let db = SqliteEnvironment::open_in_memory("dev").await.unwrap();
        let env = db.environment();
        let target = authored_posts();
        let differ = SchemaDiffer::new();

        let report = ApplyOrchestrator::new()
            .apply_schema(&target, &differ, &env, &CancelHandle::new())
            .await
            .unwrap();
        assert_eq!(report.applied, vec!["AddTable(posts)", "AddTable(users)"]);

        let live = db.introspect().await.unwrap();
        assert!(differ.diff(&live, &target).unwrap().is_empty());

        let again = ApplyOrchestrator::new()
            .apply_schema(&target, &differ, &env, &CancelHandle::new())
            .await
            .unwrap();
        assert!(again.applied.is_empty());
    }

    #[tokio::test]
    async fn test_separate_handles_detect_stale_writes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dev.db");
        let first = SqliteEnvironment::open("dev", &path).await.unwrap();
        let second = SqliteEnvironment::open("dev", &path).await.unwrap();

        let stale = second.load().await.unwrap();
        let _held = second.acquire_lock().await.unwrap();
        ApplyOrchestrator::new()
            .apply(&graph(), &ids(&["r1"]), &first.environment(), &CancelHandle::new())
            .await
            .unwrap();

        let err = second
            .persist(&stale, &AppliedState::at("r2"))
            .await
            .unwrap_err();
        assert!(matches!(err, MigrationError::WriteConflict { .. }));
        assert_eq!(second.load().await.unwrap(), AppliedState::at("r1"));
    }
}
