use std::path::{Component, Path, PathBuf};

use coffer_shared::FileId;
use tokio::fs;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::ServerError;

/// Verify that a resolved path stays within the expected base directory.
fn ensure_within(base: &Path, target: &Path) -> Result<PathBuf, ServerError> {
    let canonical_base = base.canonicalize().unwrap_or_else(|_| base.to_path_buf());
    let mut resolved = canonical_base.clone();
    for component in target.strip_prefix(base).unwrap_or(target).components() {
        match component {
            Component::Normal(c) => resolved.push(c),
            Component::ParentDir => {
                return Err(ServerError::BadRequest("Path traversal detected".to_string()));
            }
            _ => {}
        }
    }
    if !resolved.starts_with(&canonical_base) {
        return Err(ServerError::BadRequest("Path traversal detected".to_string()));
    }
    Ok(resolved)
}

/// On-disk store for uploaded file snapshots, one `file-<id>.blob` per file.
///
/// Snapshots are opaque (usually encrypted) bytes; the store never looks
/// inside them.
#[derive(Debug, Clone)]
pub struct BlobStore {
    base_path: PathBuf,
    max_size: usize,
}

impl BlobStore {
    pub async fn new(base_path: PathBuf, max_size: usize) -> Result<Self, ServerError> {
        fs::create_dir_all(&base_path).await.map_err(|e| {
            ServerError::SnapshotStorage(format!(
                "Failed to create snapshot directory '{}': {}",
                base_path.display(),
                e
            ))
        })?;

        info!(path = %base_path.display(), "Snapshot store initialized");

        Ok(Self {
            base_path,
            max_size,
        })
    }

    /// Write the bytes of a new snapshot next to the live one without
    /// replacing it. Nothing is visible to readers until
    /// [`StagedSnapshot::publish`].
    ///
    /// Every call gets its own staging file, so concurrent uploads of the
    /// same file never share one.
    pub async fn stage_snapshot(
        &self,
        file_id: &FileId,
        data: &[u8],
    ) -> Result<StagedSnapshot, ServerError> {
        if data.is_empty() {
            return Err(ServerError::BadRequest("Empty snapshot".to_string()));
        }
        if data.len() > self.max_size {
            return Err(ServerError::SnapshotTooLarge {
                size: data.len(),
                max: self.max_size,
            });
        }

        let target = self.snapshot_path(file_id)?;
        let staging = target.with_extension(format!("blob.{}.tmp", Uuid::new_v4().simple()));

        if let Err(e) = fs::write(&staging, data).await {
            let _ = fs::remove_file(&staging).await;
            return Err(ServerError::SnapshotStorage(format!(
                "Failed to write snapshot {file_id}: {e}"
            )));
        }

        debug!(file_id = %file_id, size = data.len(), "Staged snapshot");
        Ok(StagedSnapshot {
            file_id: file_id.clone(),
            staging,
            target,
        })
    }

    /// Read the snapshot of `file_id`.
    ///
    /// A registered file without a snapshot on disk is an inconsistency, so
    /// it surfaces as a storage error rather than a not-found.
    pub async fn read_snapshot(&self, file_id: &FileId) -> Result<Vec<u8>, ServerError> {
        let path = self.snapshot_path(file_id)?;

        let data = fs::read(&path).await.map_err(|e| {
            ServerError::SnapshotStorage(format!("Failed to read snapshot {file_id}: {e}"))
        })?;

        debug!(file_id = %file_id, size = data.len(), "Read snapshot");
        Ok(data)
    }

    fn snapshot_path(&self, file_id: &FileId) -> Result<PathBuf, ServerError> {
        if !file_id.is_safe() {
            return Err(ServerError::BadRequest(format!("Invalid file id: {file_id}")));
        }
        let raw = self.base_path.join(format!("file-{}.blob", file_id.as_str()));
        ensure_within(&self.base_path, &raw)
    }
}

/// Snapshot bytes written to a private staging file, waiting to replace
/// the live snapshot.
///
/// Publishing and discarding are synchronous so they can run inside a
/// registry transaction on the blocking pool.
#[derive(Debug)]
pub struct StagedSnapshot {
    file_id: FileId,
    staging: PathBuf,
    target: PathBuf,
}

impl StagedSnapshot {
    /// Atomically move the staged bytes over the live snapshot.
    pub fn publish(&self) -> Result<(), ServerError> {
        std::fs::rename(&self.staging, &self.target).map_err(|e| {
            ServerError::SnapshotStorage(format!("Failed to move snapshot {}: {e}", self.file_id))
        })?;
        debug!(file_id = %self.file_id, "Published snapshot");
        Ok(())
    }

    /// Remove the staged bytes, leaving the live snapshot as it was.
    pub fn discard(self) {
        match std::fs::remove_file(&self.staging) {
            Ok(()) => debug!(file_id = %self.file_id, "Discarded staged snapshot"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                file_id = %self.file_id,
                path = %self.staging.display(),
                error = %e,
                "Unable to remove staged snapshot"
            ),
        }
    }

    #[cfg(test)]
    pub fn path(&self) -> &Path {
        &self.staging
    }
}
