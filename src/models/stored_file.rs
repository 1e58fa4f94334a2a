//! Represents a logical file backed by a content-addressed blob.

use crate::models::tracking::{self, Tracked, Tracking};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Number of leading digest characters consumed by the shard directories.
pub const SHARD_PREFIX_LEN: usize = 6;

/// Width of a single shard directory name.
const SHARD_WIDTH: usize = 2;

/// Directory holding the blob for `digest`: `base/d[0:2]/d[2:4]/d[4:6]`.
///
/// Digests shorter than six characters yield empty segments rather than
/// panicking; such records have never been written.
pub fn shard_dir(base_path: &Path, digest: &str) -> PathBuf {
    let mut path = base_path.to_path_buf();
    for start in (0..SHARD_PREFIX_LEN).step_by(SHARD_WIDTH) {
        path.push(digest.get(start..start + SHARD_WIDTH).unwrap_or(""));
    }
    path
}

/// Leaf filename for `digest`: everything after the shard prefix.
pub fn leaf_name(digest: &str) -> &str {
    digest.get(SHARD_PREFIX_LEN..).unwrap_or("")
}

/// Metadata for one stored file.
///
/// The record never stores its on-disk location: `get_path` and
/// `get_file_name` derive it from `digest` and `base_path` each time.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq, Eq)]
pub struct StoredFile {
    /// Unique identifier assigned at creation.
    pub id: Uuid,

    /// User-declared type or extension, e.g. `png` or `json`.
    pub file_type: String,

    /// Name the file was uploaded under.
    pub original_name: String,

    /// Hex SHA-256 digest of the backing content. Only `BlobStore::write` changes it.
    pub digest: String,

    /// Root directory of the sharded blob tree.
    pub base_path: String,

    /// Length of the backing payload in bytes.
    pub size_bytes: i64,

    #[serde(flatten)]
    #[sqlx(flatten)]
    pub tracking: Tracking,
}

impl StoredFile {
    /// A new, not yet written record rooted at `base_path`.
    pub fn new(
        base_path: impl Into<String>,
        file_type: impl Into<String>,
        original_name: impl Into<String>,
        added_by: &str,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            file_type: file_type.into(),
            original_name: original_name.into(),
            digest: String::new(),
            base_path: base_path.into(),
            size_bytes: 0,
            tracking: Tracking::new(added_by, now),
        }
    }

    /// Shard directory for the current digest. No I/O.
    pub fn get_path(&self) -> PathBuf {
        shard_dir(Path::new(&self.base_path), &self.digest)
    }

    /// Leaf filename for the current digest. No I/O.
    pub fn get_file_name(&self) -> &str {
        leaf_name(&self.digest)
    }

    /// Full path of the backing blob.
    pub fn blob_path(&self) -> PathBuf {
        self.get_path().join(self.get_file_name())
    }

    /// Attachment name offered to downloaders: `<leaf>.<file_type>`.
    pub fn download_name(&self) -> String {
        let ext = self.file_type.trim_start_matches('.');
        if ext.is_empty() {
            self.get_file_name().to_string()
        } else {
            format!("{}.{}", self.get_file_name(), ext)
        }
    }

    /// `true` once a write has bound the record to a blob.
    pub fn is_written(&self) -> bool {
        self.digest.len() > SHARD_PREFIX_LEN
    }

    pub fn mark_current(&mut self, actor: &str, now: DateTime<Utc>) {
        tracking::mark_current(self, actor, now);
    }

    pub fn mark_removed(&mut self, actor: &str, now: DateTime<Utc>) {
        tracking::mark_removed(self, actor, now);
    }

    /// JSON-facing view with the derived location fields filled in.
    pub fn view(&self) -> FileView {
        FileView {
            id: self.id,
            file_type: self.file_type.clone(),
            original_name: self.original_name.clone(),
            digest: self.digest.clone(),
            base_path: self.base_path.clone(),
            file_path: self.get_path().to_string_lossy().into_owned(),
            file_name: self.get_file_name().to_string(),
            size_bytes: self.size_bytes,
            tracking: self.tracking().clone(),
        }
    }
}

impl Tracked for StoredFile {
    fn tracking(&self) -> &Tracking {
        &self.tracking
    }

    fn tracking_mut(&mut self) -> &mut Tracking {
        &mut self.tracking
    }
}

/// Serialized form of a [`StoredFile`] returned by the HTTP layer.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct FileView {
    pub id: Uuid,
    pub file_type: String,
    pub original_name: String,
    pub digest: String,
    pub base_path: String,
    pub file_path: String,
    pub file_name: String,
    pub size_bytes: i64,
    #[serde(flatten)]
    pub tracking: Tracking,
}
