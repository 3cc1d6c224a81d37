//! src/services/store.rs
//!
//! Storage client adapter — one uniform shape over the two storage backends
//! the lifecycle touches: the source blob store holding the managed
//! containers, and the destination object store uploads land in. The shipped
//! implementations are local-disk backed (`base_path/{container}/{key}` for
//! the source store, one flat bucket directory for the destination); payload
//! writes go through a temp file and an atomic rename so readers never
//! observe partial content.

use crate::models::object::StoredObject;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object `{key}` not found in container `{container}`")]
    NotFound { container: String, key: String },
    #[error("integrity mismatch uploading `{key}`: expected {expected}, got {actual}")]
    IntegrityMismatch {
        key: String,
        expected: String,
        actual: String,
    },
    #[error("invalid object key")]
    InvalidKey,
    #[error(transparent)]
    TransientIo(#[from] io::Error),
}

impl StoreError {
    /// True for the benign "already gone" case. Callers performing deletes or
    /// copy-from operations treat this as a no-op, never as a failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    /// True for backend/network failures worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::TransientIo(_))
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Lowercase hex MD5 digest of a payload, the integrity hash carried through
/// an upload.
pub fn md5_hex(bytes: &[u8]) -> String {
    format!("{:x}", md5::compute(bytes))
}

/// Source blob store: the containers objects live in while they move through
/// the lifecycle.
///
/// Every mutation is idempotent from the caller's point of view: `delete` and
/// `copy` report a vanished source as `NotFound`, which all callers downgrade
/// to a no-op. Overlapping sweeps converge through these semantics alone;
/// no lock is ever held across calls.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Flat listing of every object in a container. The adapter exhausts any
    /// internal paging; callers get one finite snapshot per call.
    async fn list(&self, container: &str) -> StoreResult<Vec<StoredObject>>;

    /// Fetch the full payload. `NotFound` if the key vanished (raced with a
    /// concurrent deleter).
    async fn download(&self, container: &str, key: &str) -> StoreResult<Bytes>;

    /// Copy an object between containers under the same key, overwriting any
    /// existing destination object. `NotFound` if the source vanished.
    async fn copy(&self, src_container: &str, dst_container: &str, key: &str) -> StoreResult<()>;

    /// Delete an object. `NotFound` if already absent.
    async fn delete(&self, container: &str, key: &str) -> StoreResult<()>;

    /// Last-modified timestamp, used only for age computation.
    async fn stat_time(&self, container: &str, key: &str) -> StoreResult<DateTime<Utc>>;
}

/// Destination object store: one bucket, keyed identically to the source.
#[async_trait]
pub trait ObjectSink: Send + Sync {
    /// Upload a fully-buffered payload under `key`. The sink recomputes the
    /// content hash of what it received and fails with `IntegrityMismatch`
    /// when it disagrees with `integrity_hash`; nothing is published in that
    /// case. Backend failures surface as `TransientIo` (retryable).
    async fn upload(&self, key: &str, bytes: Bytes, integrity_hash: &str) -> StoreResult<()>;

    /// Readiness probe: verify the bucket is reachable and writable.
    async fn probe(&self) -> StoreResult<()>;
}

const MAX_OBJECT_KEY_LEN: usize = 1024;

/// Basic key validation to avoid trivial path traversal vectors.
///
/// Rejects empty keys, keys that begin with `/`, keys containing `..`, and
/// control or backslash bytes.
fn ensure_key_safe(key: &str) -> StoreResult<()> {
    if key.is_empty() || key.len() > MAX_OBJECT_KEY_LEN {
        return Err(StoreError::InvalidKey);
    }
    if key.starts_with('/') || key.contains("..") {
        return Err(StoreError::InvalidKey);
    }
    if key
        .bytes()
        .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0')
    {
        return Err(StoreError::InvalidKey);
    }
    Ok(())
}

/// Map an I/O error on `container/key` to the adapter error kinds.
fn map_object_err(err: io::Error, container: &str, key: &str) -> StoreError {
    if err.kind() == ErrorKind::NotFound {
        StoreError::NotFound {
            container: container.to_string(),
            key: key.to_string(),
        }
    } else {
        StoreError::TransientIo(err)
    }
}

/// Write `bytes` to `path` through a temp file, fsync, then atomic rename.
async fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let parent = path.parent().ok_or_else(|| {
        io::Error::new(ErrorKind::Other, "object path missing parent directory")
    })?;
    fs::create_dir_all(parent).await?;
    let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
    let mut file = File::create(&tmp_path).await?;

    if let Err(err) = file.write_all(bytes).await {
        let _ = fs::remove_file(&tmp_path).await;
        return Err(err);
    }
    if let Err(err) = file.flush().await {
        let _ = fs::remove_file(&tmp_path).await;
        return Err(err);
    }
    if let Err(err) = file.sync_all().await {
        let _ = fs::remove_file(&tmp_path).await;
        return Err(err);
    }

    if let Err(err) = fs::rename(&tmp_path, path).await {
        if err.kind() == ErrorKind::AlreadyExists {
            fs::remove_file(path).await?;
            fs::rename(&tmp_path, path).await?;
        } else {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(err);
        }
    }
    Ok(())
}

/// Recursively remove empty directories upward from `start`, stopping at
/// `stop`, a non-empty directory, or any unexpected error.
async fn prune_empty_dirs(start: &Path, stop: &Path) {
    let mut current = start.to_path_buf();
    while current.starts_with(stop) && current != stop {
        match fs::remove_dir(&current).await {
            Ok(_) => {
                if let Some(parent) = current.parent() {
                    current = parent.to_path_buf();
                } else {
                    break;
                }
            }
            Err(err) if err.kind() == ErrorKind::NotFound => break,
            Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
            Err(err) => {
                debug!("failed to prune directory {}: {}", current.display(), err);
                break;
            }
        }
    }
}

/// Local-disk source store. Each container is a directory under `base_path`;
/// nested keys map to nested directories.
#[derive(Clone, Debug)]
pub struct FsBlobStore {
    base_path: PathBuf,
}

impl FsBlobStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    fn container_root(&self, container: &str) -> PathBuf {
        self.base_path.join(container)
    }

    fn object_path(&self, container: &str, key: &str) -> StoreResult<PathBuf> {
        ensure_key_safe(key)?;
        Ok(self.container_root(container).join(key))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    /// Walk the container directory tree and return every payload file,
    /// sorted by key. A container directory that does not exist yet lists as
    /// empty; entries that vanish mid-walk are skipped.
    async fn list(&self, container: &str) -> StoreResult<Vec<StoredObject>> {
        let root = self.container_root(container);
        let mut pending = vec![root.clone()];
        let mut objects = Vec::new();

        while let Some(dir) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(err) if err.kind() == ErrorKind::NotFound => continue,
                Err(err) => return Err(err.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                let meta = match entry.metadata().await {
                    Ok(meta) => meta,
                    Err(err) if err.kind() == ErrorKind::NotFound => continue,
                    Err(err) => return Err(err.into()),
                };
                if meta.is_dir() {
                    pending.push(path);
                    continue;
                }
                if entry.file_name().to_string_lossy().starts_with(".tmp-") {
                    continue;
                }
                let key = match path.strip_prefix(&root) {
                    Ok(rel) => rel
                        .iter()
                        .map(|part| part.to_string_lossy().into_owned())
                        .collect::<Vec<_>>()
                        .join("/"),
                    Err(_) => continue,
                };
                objects.push(StoredObject {
                    key,
                    size_bytes: meta.len() as i64,
                    content_hash: None,
                    last_modified: meta.modified()?.into(),
                });
            }
        }

        objects.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(objects)
    }

    async fn download(&self, container: &str, key: &str) -> StoreResult<Bytes> {
        let path = self.object_path(container, key)?;
        let bytes = fs::read(&path)
            .await
            .map_err(|err| map_object_err(err, container, key))?;
        Ok(Bytes::from(bytes))
    }

    async fn copy(&self, src_container: &str, dst_container: &str, key: &str) -> StoreResult<()> {
        let src = self.object_path(src_container, key)?;
        let dst = self.object_path(dst_container, key)?;
        let bytes = fs::read(&src)
            .await
            .map_err(|err| map_object_err(err, src_container, key))?;
        write_atomic(&dst, &bytes).await?;
        Ok(())
    }

    async fn delete(&self, container: &str, key: &str) -> StoreResult<()> {
        let path = self.object_path(container, key)?;
        fs::remove_file(&path)
            .await
            .map_err(|err| map_object_err(err, container, key))?;

        if let Some(parent) = path.parent() {
            let root = self.container_root(container);
            prune_empty_dirs(parent, &root).await;
        }
        Ok(())
    }

    async fn stat_time(&self, container: &str, key: &str) -> StoreResult<DateTime<Utc>> {
        let path = self.object_path(container, key)?;
        let meta = fs::metadata(&path)
            .await
            .map_err(|err| map_object_err(err, container, key))?;
        Ok(meta.modified()?.into())
    }
}

/// Local-disk destination store: one bucket directory.
#[derive(Clone, Debug)]
pub struct FsObjectSink {
    bucket_path: PathBuf,
}

impl FsObjectSink {
    pub fn new(bucket_path: impl Into<PathBuf>) -> Self {
        Self {
            bucket_path: bucket_path.into(),
        }
    }
}

#[async_trait]
impl ObjectSink for FsObjectSink {
    async fn upload(&self, key: &str, bytes: Bytes, integrity_hash: &str) -> StoreResult<()> {
        ensure_key_safe(key)?;
        let actual = md5_hex(&bytes);
        if !actual.eq_ignore_ascii_case(integrity_hash) {
            return Err(StoreError::IntegrityMismatch {
                key: key.to_string(),
                expected: integrity_hash.to_string(),
                actual,
            });
        }
        let path = self.bucket_path.join(key);
        write_atomic(&path, &bytes).await?;
        Ok(())
    }

    /// Best-effort write/read/delete of a probe file under the bucket root.
    async fn probe(&self) -> StoreResult<()> {
        fs::create_dir_all(&self.bucket_path).await?;
        let probe_path = self.bucket_path.join(format!(".readyz-{}", Uuid::new_v4()));
        fs::write(&probe_path, b"readyz").await?;
        let bytes = fs::read(&probe_path).await?;
        let _ = fs::remove_file(&probe_path).await;
        if bytes != b"readyz" {
            return Err(StoreError::TransientIo(io::Error::new(
                ErrorKind::InvalidData,
                "probe file content mismatch",
            )));
        }
        Ok(())
    }
}
