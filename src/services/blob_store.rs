//! src/services/blob_store.rs
//!
//! BlobStore — content-addressed payload storage. Payloads are keyed by their
//! SHA-256 digest and live at `base_path/{d0..2}/{d2..4}/{d4..6}/{d6..}`.
//! Identical payloads are stored once. A slot already holding different
//! bytes is treated as a collision: the hash input is extended with a fixed
//! marker and the write retries at the new digest, up to a bounded number
//! of times. Record metadata goes through the injected [`FileRecordRepo`].

use crate::{
    models::stored_file::StoredFile,
    services::file_repo::FileRecordRepo,
};
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Appended to the hash input each time a slot is taken by other content.
const COLLISION_MARKER: &[u8] = b"1";

/// Default cap on collision retries for a single write.
pub const DEFAULT_MAX_COLLISION_RETRIES: u32 = 1000;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage failure at `{}`: {source}", path.display())]
    StorageFailure {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("no blob at `{}`", path.display())]
    NotFound { path: PathBuf },
    #[error("digest collision chain exceeded {attempts} retries (last digest `{digest}`)")]
    HashCollisionExhausted { attempts: u32, digest: String },
    #[error("file record `{0}` not found")]
    RecordNotFound(Uuid),
    #[error(transparent)]
    Metadata(#[from] sqlx::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

fn storage_failure(path: &Path) -> impl FnOnce(io::Error) -> StoreError + '_ {
    move |source| StoreError::StorageFailure {
        path: path.to_path_buf(),
        source,
    }
}

/// How a successful write was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The payload was written to a previously empty slot.
    Stored,
    /// Identical bytes were already on disk; nothing was rewritten.
    Duplicate,
}

/// Hex SHA-256 digest of `data`.
pub fn compute_digest(data: &[u8]) -> String {
    hex_digest(&Sha256::new_with_prefix(data))
}

fn hex_digest(hasher: &Sha256) -> String {
    format!("{:x}", hasher.clone().finalize())
}

/// Content-addressed blob storage plus the record bookkeeping around it.
#[derive(Clone)]
pub struct BlobStore {
    /// Root directory new records are bound to.
    base_path: PathBuf,

    /// Metadata persistence port.
    records: Arc<dyn FileRecordRepo>,

    max_collision_retries: u32,
}

impl BlobStore {
    pub fn new(
        base_path: impl Into<PathBuf>,
        records: Arc<dyn FileRecordRepo>,
        max_collision_retries: u32,
    ) -> Self {
        Self {
            base_path: base_path.into(),
            records,
            max_collision_retries,
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub fn records(&self) -> &Arc<dyn FileRecordRepo> {
        &self.records
    }

    /// A fresh record rooted at this store's base path. Not yet persisted.
    pub fn new_record(&self, file_type: &str, original_name: &str, actor: &str) -> StoredFile {
        StoredFile::new(
            self.base_path.to_string_lossy(),
            file_type,
            original_name,
            actor,
            Utc::now(),
        )
    }

    /// Create a record for `data`, write it, and return both.
    pub async fn ingest(
        &self,
        file_type: &str,
        original_name: &str,
        actor: &str,
        data: &[u8],
    ) -> StoreResult<(StoredFile, WriteOutcome)> {
        let mut file = self.new_record(file_type, original_name, actor);
        let outcome = self.write(&mut file, data).await?;
        Ok((file, outcome))
    }

    /// Bind `file` to the blob holding `data`, storing the bytes if needed.
    ///
    /// On success the record is marked current and persisted. On failure the
    /// record's `digest` is left at the last slot attempted and nothing is
    /// persisted.
    pub async fn write(&self, file: &mut StoredFile, data: &[u8]) -> StoreResult<WriteOutcome> {
        let mut hasher = Sha256::new_with_prefix(data);
        let mut collisions: u32 = 0;

        loop {
            file.digest = hex_digest(&hasher);
            let dir = file.get_path();
            let target = dir.join(file.get_file_name());

            fs::create_dir_all(&dir)
                .await
                .map_err(storage_failure(&dir))?;

            match fs::read(&target).await {
                Ok(existing) if existing == data => {
                    debug!(digest = %file.digest, path = %target.display(), "duplicate blob, linking");
                    self.commit(file, data.len()).await?;
                    return Ok(WriteOutcome::Duplicate);
                }
                Ok(_) => {
                    collisions += 1;
                    if collisions > self.max_collision_retries {
                        return Err(StoreError::HashCollisionExhausted {
                            attempts: self.max_collision_retries,
                            digest: file.digest.clone(),
                        });
                    }
                    warn!(
                        digest = %file.digest,
                        attempt = collisions,
                        "hash collision, perturbing digest"
                    );
                    hasher.update(COLLISION_MARKER);
                    continue;
                }
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => return Err(storage_failure(&target)(err)),
            }

            if self.publish(&dir, &target, data).await? {
                info!(digest = %file.digest, bytes = data.len(), "stored new blob");
                self.commit(file, data.len()).await?;
                return Ok(WriteOutcome::Stored);
            }

            // Another writer filled the slot first; inspect what it wrote.
            debug!(digest = %file.digest, "slot filled concurrently, re-checking");
        }
    }

    /// Write `data` to a temp file beside `target`, then hard-link it into
    /// place. Returns `false` if `target` appeared in the meantime.
    async fn publish(&self, dir: &Path, target: &Path, data: &[u8]) -> StoreResult<bool> {
        let tmp_path = dir.join(format!(".tmp-{}", Uuid::new_v4()));
        let mut tmp = File::create(&tmp_path)
            .await
            .map_err(storage_failure(&tmp_path))?;

        if let Err(err) = tmp.write_all(data).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(storage_failure(&tmp_path)(err));
        }
        if let Err(err) = tmp.sync_all().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(storage_failure(&tmp_path)(err));
        }
        drop(tmp);

        let linked = fs::hard_link(&tmp_path, target).await;
        if let Err(err) = fs::remove_file(&tmp_path).await {
            debug!("failed to remove temp file {}: {}", tmp_path.display(), err);
        }

        match linked {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(err) => Err(storage_failure(target)(err)),
        }
    }

    async fn commit(&self, file: &mut StoredFile, len: usize) -> StoreResult<()> {
        file.size_bytes = len as i64;
        let actor = file.tracking.added_by.clone();
        file.mark_current(&actor, Utc::now());
        self.records.save(file).await
    }

    /// Read the blob backing `file`.
    ///
    /// The location is recomputed from `digest` and `base_path`.
    pub async fn read(&self, file: &StoredFile) -> StoreResult<Vec<u8>> {
        let path = file.blob_path();
        if !file.is_written() {
            return Err(StoreError::NotFound { path });
        }

        fs::read(&path).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                StoreError::NotFound { path: path.clone() }
            } else {
                storage_failure(&path)(err)
            }
        })
    }

    /// Load a record by id.
    pub async fn open(&self, id: Uuid) -> StoreResult<StoredFile> {
        self.records
            .get(id)
            .await?
            .ok_or(StoreError::RecordNotFound(id))
    }

    /// Record bound to the blob at `file_path/file_name`, if any.
    pub async fn locate(&self, file_path: &str, file_name: &str) -> StoreResult<Option<StoredFile>> {
        self.records.find_by_location(file_path, file_name).await
    }

    pub async fn list(&self, include_removed: bool) -> StoreResult<Vec<StoredFile>> {
        self.records.list(include_removed).await
    }

    /// Logically delete `file`. The blob stays on disk.
    pub async fn remove(&self, file: &mut StoredFile, actor: &str) -> StoreResult<()> {
        file.mark_removed(actor, Utc::now());
        self.records.save(file).await?;
        info!(id = %file.id, actor, "file record removed");
        Ok(())
    }

    /// Reinstate a removed record as current.
    pub async fn restore(&self, file: &mut StoredFile, actor: &str) -> StoreResult<()> {
        file.mark_current(actor, Utc::now());
        self.records.save(file).await?;
        info!(id = %file.id, actor, "file record restored");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::stored_file::{leaf_name, shard_dir},
        services::file_repo::{SqliteFileRepo, tests::memory_pool},
    };
    use tempfile::TempDir;

    const HELLO_DIGEST: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

    async fn test_store(base: &Path, max_collision_retries: u32) -> BlobStore {
        let repo = SqliteFileRepo::new(memory_pool().await);
        BlobStore::new(base, Arc::new(repo), max_collision_retries)
    }

    /// Digest reached after `perturbations` collision retries for `data`.
    fn chain_digest(data: &[u8], perturbations: usize) -> String {
        let mut input = data.to_vec();
        input.extend(COLLISION_MARKER.repeat(perturbations));
        compute_digest(&input)
    }

    fn blob_at(base: &Path, digest: &str) -> PathBuf {
        shard_dir(base, digest).join(leaf_name(digest))
    }

    fn plant(base: &Path, digest: &str, contents: &[u8]) {
        let path = blob_at(base, digest);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }

    fn entries(dir: &Path) -> Vec<String> {
        std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn digest_is_stable() {
        assert_eq!(compute_digest(b"hello"), HELLO_DIGEST);
        assert_eq!(compute_digest(b"hello"), compute_digest(b"hello"));
        assert_ne!(compute_digest(b"hello"), compute_digest(b"hello!"));
        assert_eq!(compute_digest(b"").len(), 64);
    }

    #[tokio::test]
    async fn hello_is_stored_once_under_sharded_path() {
        let tmp = TempDir::new().unwrap();
        let store = test_store(tmp.path(), DEFAULT_MAX_COLLISION_RETRIES).await;

        let (first, outcome) = store.ingest("txt", "hello.txt", "alice", b"hello").await.unwrap();
        assert_eq!(outcome, WriteOutcome::Stored);
        assert_eq!(first.digest, HELLO_DIGEST);

        let expected = tmp.path().join("2c").join("f2").join("4d").join(&HELLO_DIGEST[6..]);
        assert_eq!(first.blob_path(), expected);
        assert_eq!(std::fs::read(&expected).unwrap(), b"hello");

        let (second, outcome) = store.ingest("txt", "again.txt", "bob", b"hello").await.unwrap();
        assert_eq!(outcome, WriteOutcome::Duplicate);
        assert_eq!(second.digest, first.digest);
        assert_eq!(second.get_path(), first.get_path());
        assert_eq!(second.get_file_name(), first.get_file_name());
        assert_ne!(second.id, first.id);

        assert_eq!(entries(&first.get_path()), vec![HELLO_DIGEST[6..].to_string()]);
    }

    #[tokio::test]
    async fn rewriting_same_record_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let store = test_store(tmp.path(), DEFAULT_MAX_COLLISION_RETRIES).await;

        let mut file = store.new_record("bin", "blob.bin", "alice");
        assert_eq!(store.write(&mut file, b"payload").await.unwrap(), WriteOutcome::Stored);
        let digest = file.digest.clone();
        assert_eq!(store.write(&mut file, b"payload").await.unwrap(), WriteOutcome::Duplicate);
        assert_eq!(file.digest, digest);
        assert_eq!(file.size_bytes, 7);

        let saved = store.open(file.id).await.unwrap();
        assert_eq!(saved.digest, digest);
        assert!(saved.tracking.is_current);
    }

    #[tokio::test]
    async fn round_trip_returns_original_bytes() {
        let tmp = TempDir::new().unwrap();
        let store = test_store(tmp.path(), DEFAULT_MAX_COLLISION_RETRIES).await;

        let payloads: [&[u8]; 4] = [b"", b"a", b"\x00\xff\x10binary", &[7u8; 4096]];
        for payload in payloads {
            let (file, _) = store.ingest("bin", "", "alice", payload).await.unwrap();
            assert_eq!(store.read(&file).await.unwrap(), payload);
        }
    }

    #[tokio::test]
    async fn collision_moves_payload_to_perturbed_digest() {
        let tmp = TempDir::new().unwrap();
        let store = test_store(tmp.path(), DEFAULT_MAX_COLLISION_RETRIES).await;

        // Another payload already occupies the slot for "report".
        let natural = compute_digest(b"report");
        plant(tmp.path(), &natural, b"someone else's bytes");

        let (file, outcome) = store.ingest("pdf", "report.pdf", "alice", b"report").await.unwrap();
        assert_eq!(outcome, WriteOutcome::Stored);
        assert_ne!(file.digest, natural);
        assert_eq!(file.digest, chain_digest(b"report", 1));

        assert_eq!(store.read(&file).await.unwrap(), b"report");
        assert_eq!(
            std::fs::read(blob_at(tmp.path(), &natural)).unwrap(),
            b"someone else's bytes"
        );

        // The same payload walks the same chain and lands on its duplicate.
        let (again, outcome) = store.ingest("pdf", "copy.pdf", "bob", b"report").await.unwrap();
        assert_eq!(outcome, WriteOutcome::Duplicate);
        assert_eq!(again.digest, file.digest);
    }

    #[tokio::test]
    async fn collision_chain_is_bounded() {
        let tmp = TempDir::new().unwrap();
        let store = test_store(tmp.path(), 2).await;

        for step in 0..3 {
            plant(tmp.path(), &chain_digest(b"doomed", step), b"occupied");
        }

        let mut file = store.new_record("bin", "doomed.bin", "alice");
        let err = store.write(&mut file, b"doomed").await.unwrap_err();
        match err {
            StoreError::HashCollisionExhausted { attempts, digest } => {
                assert_eq!(attempts, 2);
                assert_eq!(digest, chain_digest(b"doomed", 2));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(file.digest, chain_digest(b"doomed", 2));
        assert!(store.open(file.id).await.is_err());
    }

    #[tokio::test]
    async fn read_after_external_delete_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let store = test_store(tmp.path(), DEFAULT_MAX_COLLISION_RETRIES).await;

        let (file, _) = store.ingest("txt", "gone.txt", "alice", b"ephemeral").await.unwrap();
        std::fs::remove_file(file.blob_path()).unwrap();

        let err = store.read(&file).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn read_of_unwritten_record_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let store = test_store(tmp.path(), DEFAULT_MAX_COLLISION_RETRIES).await;

        let file = store.new_record("txt", "never.txt", "alice");
        let err = store.read(&file).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn read_uses_record_base_path() {
        let tmp = TempDir::new().unwrap();
        let other = TempDir::new().unwrap();
        let store = test_store(tmp.path(), DEFAULT_MAX_COLLISION_RETRIES).await;

        let (mut file, _) = store.ingest("txt", "moved.txt", "alice", b"moved").await.unwrap();
        plant(other.path(), &file.digest, b"moved");
        std::fs::remove_file(file.blob_path()).unwrap();

        file.base_path = other.path().to_string_lossy().into_owned();
        assert_eq!(store.read(&file).await.unwrap(), b"moved");
    }

    #[tokio::test]
    async fn unusable_base_path_is_storage_failure() {
        let tmp = TempDir::new().unwrap();
        let blocker = tmp.path().join("blocker");
        std::fs::write(&blocker, b"not a directory").unwrap();
        let store = test_store(&blocker, DEFAULT_MAX_COLLISION_RETRIES).await;

        let mut file = store.new_record("txt", "x.txt", "alice");
        let err = store.write(&mut file, b"hello").await.unwrap_err();
        assert!(matches!(err, StoreError::StorageFailure { .. }));
        // Left at the attempted slot; nothing persisted.
        assert_eq!(file.digest, HELLO_DIGEST);
        assert!(matches!(
            store.open(file.id).await,
            Err(StoreError::RecordNotFound(_))
        ));
    }

    #[tokio::test]
    async fn remove_keeps_blob_and_restore_reinstates() {
        let tmp = TempDir::new().unwrap();
        let store = test_store(tmp.path(), DEFAULT_MAX_COLLISION_RETRIES).await;

        let (mut file, _) = store.ingest("txt", "keep.txt", "alice", b"keep me").await.unwrap();
        store.remove(&mut file, "bob").await.unwrap();

        let saved = store.open(file.id).await.unwrap();
        assert!(!saved.tracking.is_current);
        assert_eq!(saved.tracking.removed_by.as_deref(), Some("bob"));
        assert!(file.blob_path().exists());
        assert_eq!(store.read(&saved).await.unwrap(), b"keep me");
        assert!(store.list(false).await.unwrap().is_empty());

        store.restore(&mut file, "carol").await.unwrap();
        let saved = store.open(file.id).await.unwrap();
        assert!(saved.tracking.is_current);
        assert!(saved.tracking.removed_by.is_none());
        assert_eq!(store.list(false).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn locate_maps_path_back_to_record() {
        let tmp = TempDir::new().unwrap();
        let store = test_store(tmp.path(), DEFAULT_MAX_COLLISION_RETRIES).await;

        let (file, _) = store.ingest("json", "doc.json", "alice", b"{}").await.unwrap();
        let path = file.get_path().to_string_lossy().into_owned();
        let found = store.locate(&path, file.get_file_name()).await.unwrap().unwrap();
        assert_eq!(found.id, file.id);
    }

    #[tokio::test]
    async fn concurrent_identical_writers_converge() {
        let tmp = TempDir::new().unwrap();
        let store = test_store(tmp.path(), DEFAULT_MAX_COLLISION_RETRIES).await;

        let mut handles = Vec::new();
        for i in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .ingest("txt", &format!("race-{i}.txt"), "alice", b"same bytes")
                    .await
                    .unwrap()
            }));
        }

        let mut stored = 0;
        for handle in handles {
            let (file, outcome) = handle.await.unwrap();
            assert_eq!(file.digest, compute_digest(b"same bytes"));
            if outcome == WriteOutcome::Stored {
                stored += 1;
            }
        }
        assert_eq!(stored, 1);

        let dir = shard_dir(tmp.path(), &compute_digest(b"same bytes"));
        assert_eq!(entries(&dir).len(), 1);
        assert_eq!(store.list(false).await.unwrap().len(), 8);
    }
}
