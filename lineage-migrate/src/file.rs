//! Revision script directory management.
//!
//! Each revision lives in its own directory:
//!
//! ```text
//! migrations/
//! ├── 20240101120000_create_users/
//! │   ├── revision.toml   # id, parents, label, touches, checksum
//! │   ├── up.sql
//! │   └── down.sql
//! └── 20240102093000_merge_heads/
//!     ├── revision.toml
//!     └── up.sql          # empty for a pure lineage join
//! ```

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{MigrateResult, MigrationError};
use crate::revision::{Revision, RevisionGraph, RevisionPayload};

/// Name of the metadata file inside a revision directory.
pub const MANIFEST_FILE: &str = "revision.toml";
const UP_FILE: &str = "up.sql";
const DOWN_FILE: &str = "down.sql";

/// Metadata persisted alongside a revision's SQL bodies.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RevisionManifest {
    id: String,
    #[serde(default)]
    parents: Vec<String>,
    #[serde(default)]
    label: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    touches: Vec<String>,
    /// SHA-256 of `up.sql` when written; absent for hand-written revisions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    checksum: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    created_at: Option<DateTime<Utc>>,
}

/// Reader/writer for the revision script directory.
#[derive(Debug, Clone)]
pub struct ScriptDirectory {
    migrations_dir: PathBuf,
}

impl ScriptDirectory {
    /// Create a new script directory handle.
    pub fn new(migrations_dir: impl Into<PathBuf>) -> Self {
        Self {
            migrations_dir: migrations_dir.into(),
        }
    }

    /// Get the migrations directory.
    pub fn migrations_dir(&self) -> &Path {
        &self.migrations_dir
    }

    /// Ensure the migrations directory exists.
    pub async fn ensure_dir(&self) -> MigrateResult<()> {
        tokio::fs::create_dir_all(&self.migrations_dir)
            .await
            .map_err(MigrationError::Io)?;
        Ok(())
    }

    /// Read every revision, sorted by directory name.
    ///
    /// A missing directory is an empty history. Any unreadable revision is
    /// reported as corrupt rather than skipped.
    pub async fn list_revisions(&self) -> MigrateResult<Vec<Revision>> {
        let mut revisions = Vec::new();

        if !self.migrations_dir.exists() {
            return Ok(revisions);
        }

        let mut entries = tokio::fs::read_dir(&self.migrations_dir)
            .await
            .map_err(MigrationError::Io)?;

        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(MigrationError::Io)? {
            let path = entry.path();
            if is_revision_dir(&path) {
                paths.push(path);
            }
        }

        paths.sort();

        for path in paths {
            revisions.push(self.read_revision(&path).await?);
        }

        debug!(
            dir = %self.migrations_dir.display(),
            count = revisions.len(),
            "Loaded revision scripts"
        );
        Ok(revisions)
    }

    /// Read a revision from a directory.
    async fn read_revision(&self, path: &Path) -> MigrateResult<Revision> {
        let manifest_path = path.join(MANIFEST_FILE);
        if !manifest_path.exists() {
            return Err(MigrationError::corrupt(path, "missing revision.toml"));
        }

        let content = tokio::fs::read_to_string(&manifest_path)
            .await
            .map_err(|e| MigrationError::corrupt(&manifest_path, e.to_string()))?;
        let manifest: RevisionManifest = toml::from_str(&content)
            .map_err(|e| MigrationError::corrupt(&manifest_path, e.to_string()))?;

        if manifest.id.trim().is_empty() {
            return Err(MigrationError::corrupt(&manifest_path, "empty revision id"));
        }
        if manifest.parents.iter().any(|p| p == &manifest.id) {
            return Err(MigrationError::corrupt(
                &manifest_path,
                "revision lists itself as a parent",
            ));
        }

        let up_sql = read_optional(&path.join(UP_FILE)).await?;
        let down_sql = read_optional(&path.join(DOWN_FILE)).await?;

        let mut revision = Revision::new(manifest.id, manifest.parents, manifest.label)
            .with_payload(RevisionPayload::new(up_sql, down_sql))
            .with_touches(manifest.touches);
        if let Some(recorded) = manifest.checksum {
            revision.checksum = recorded;
            if !revision.verify_checksum() {
                return Err(MigrationError::corrupt(
                    path.join(UP_FILE),
                    "up.sql does not match the checksum in revision.toml; \
                     remove the checksum line to accept the edit",
                ));
            }
        }
        Ok(revision)
    }

    /// Write a revision to disk, returning its directory.
    pub async fn write_revision(&self, revision: &Revision) -> MigrateResult<PathBuf> {
        self.ensure_dir().await?;

        let dir_name = format!("{}_{}", revision.id, slugify(&revision.label));
        let revision_dir = self.migrations_dir.join(&dir_name);

        match tokio::fs::create_dir(&revision_dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(MigrationError::DuplicateIdentifier(revision.id.clone()));
            }
            Err(e) => return Err(MigrationError::Io(e)),
        }

        let manifest = RevisionManifest {
            id: revision.id.clone(),
            parents: revision.parents.clone(),
            label: revision.label.clone(),
            touches: revision.touches.clone(),
            checksum: Some(revision.checksum.clone()),
            created_at: Some(Utc::now()),
        };
        let manifest = toml::to_string_pretty(&manifest)
            .map_err(|e| MigrationError::other(format!("Failed to serialize manifest: {}", e)))?;

        tokio::fs::write(revision_dir.join(MANIFEST_FILE), manifest)
            .await
            .map_err(MigrationError::Io)?;
        tokio::fs::write(revision_dir.join(UP_FILE), &revision.payload.upgrade)
            .await
            .map_err(MigrationError::Io)?;

        if !revision.payload.downgrade.is_empty() {
            tokio::fs::write(revision_dir.join(DOWN_FILE), &revision.payload.downgrade)
                .await
                .map_err(MigrationError::Io)?;
        }

        debug!(id = %revision.id, path = %revision_dir.display(), "Wrote revision");
        Ok(revision_dir)
    }

    /// Generate a new revision ID not already used in `graph`.
    pub fn generate_id(&self, graph: &RevisionGraph) -> String {
        timestamp_id(graph)
    }
}

/// Timestamp identifier (`%Y%m%d%H%M%S`), suffixed on collision.
pub fn timestamp_id(graph: &RevisionGraph) -> String {
    graph.unique_id(&Utc::now().format("%Y%m%d%H%M%S").to_string())
}

async fn read_optional(path: &Path) -> MigrateResult<String> {
    if !path.exists() {
        return Ok(String::new());
    }
    tokio::fs::read_to_string(path)
        .await
        .map_err(|e| MigrationError::corrupt(path, e.to_string()))
}

/// Check if a path looks like a revision directory.
fn is_revision_dir(path: &Path) -> bool {
    if !path.is_dir() {
        return false;
    }
    path.join(MANIFEST_FILE).exists() || path.join(UP_FILE).exists()
}

/// Turn a label into a directory-safe suffix.
fn slugify(label: &str) -> String {
    let slug: String = label
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    let slug = slug.trim_matches('_');
    let slug: String = slug.chars().take(48).collect();
    if slug.is_empty() {
        "revision".to_string()
    } else {
        slug
    }
}
