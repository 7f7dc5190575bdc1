//! File lifecycle operations: upload, reset, keys, and the small registry
//! edits around them.
//!
//! SQLite work is synchronous and runs on the blocking pool. Snapshot bytes
//! go through the async [`BlobStore`]. On upload the snapshot is staged
//! first and only published inside the registry transaction, so a refused
//! or failed upload leaves both the registry and the live snapshot as they
//! were.

use std::path::{Path, PathBuf};

use bytes::Bytes;
use coffer_shared::{FileId, GroupId};
use coffer_store::{Database, File, FileUpdate, GroupLog, NewFile, StoreError};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::blob_store::{BlobStore, StagedSnapshot};
use crate::error::ServerError;
use crate::registry::{self, UploadPlan};

/// Run `f` on the blocking pool.
pub async fn blocking<T, F>(f: F) -> Result<T, ServerError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, ServerError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ServerError::Internal(format!("Blocking task failed: {e}")))?
}

/// Metadata sent alongside a snapshot upload.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub file_id: FileId,
    pub name: String,
    /// Group the client believes it follows. `None` after a reset.
    pub group_id: Option<String>,
    pub encrypt_meta: Option<String>,
    pub sync_version: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct KeyRegistration {
    pub file_id: FileId,
    pub key_id: String,
    pub salt: Option<String>,
    pub test: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct KeyInfo {
    pub id: Option<String>,
    pub salt: Option<String>,
    pub test: Option<String>,
}

/// One row of the file listing.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileSummary {
    pub deleted: u8,
    pub file_id: String,
    pub group_id: Option<String>,
    pub name: String,
    pub encrypt_key_id: Option<String>,
}

impl From<File> for FileSummary {
    fn from(file: File) -> Self {
        Self {
            deleted: u8::from(file.deleted),
            file_id: file.id,
            group_id: file.group_id,
            name: file.name,
            encrypt_key_id: file.encrypt_keyid,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileInfo {
    pub deleted: u8,
    pub file_id: String,
    pub group_id: Option<String>,
    pub name: String,
    pub encrypt_meta: Option<serde_json::Value>,
}

impl From<File> for FileInfo {
    fn from(file: File) -> Self {
        let encrypt_meta = file
            .encrypt_meta
            .as_deref()
            .and_then(|meta| serde_json::from_str(meta).ok());
        Self {
            deleted: u8::from(file.deleted),
            file_id: file.id,
            group_id: file.group_id,
            name: file.name,
            encrypt_meta,
        }
    }
}

/// Fetch a live file, mapping absence to `FileNotFound`.
fn load_live(db: &Database, file_id: &FileId) -> Result<File, ServerError> {
    db.get_file(file_id.as_str()).map_err(|e| match e {
        StoreError::NotFound => ServerError::FileNotFound,
        other => other.into(),
    })
}

fn plan_for(db: &Database, request: &UploadRequest) -> Result<UploadPlan, ServerError> {
    let file = db.get_file_raw(request.file_id.as_str())?;
    let declared_key = registry::meta_key_id(request.encrypt_meta.as_deref());
    registry::plan_upload(
        file.as_ref(),
        request.group_id.as_deref(),
        declared_key.as_deref(),
    )
}

// ---------------------------------------------------------------------------
// Upload / download
// ---------------------------------------------------------------------------

/// Store a snapshot and bring the registry in line with it. Returns the
/// group the client must sync against from now on.
pub async fn upload_file(
    server_files: PathBuf,
    blobs: &BlobStore,
    request: UploadRequest,
    data: Bytes,
) -> Result<GroupId, ServerError> {
    let dir = server_files.clone();
    let check = request.clone();
    blocking(move || {
        let db = Database::open_in(&dir)?;
        plan_for(&db, &check).map(|_| ())
    })
    .await?;

    let staged = blobs.stage_snapshot(&request.file_id, &data).await?;

    blocking(move || finish_upload(&server_files, &request, staged)).await
}

/// Commit a staged snapshot, or throw it away if the upload is refused.
pub fn finish_upload(
    server_files: &Path,
    request: &UploadRequest,
    staged: StagedSnapshot,
) -> Result<GroupId, ServerError> {
    let result = commit_upload(server_files, request, &staged);
    if result.is_err() {
        staged.discard();
    }
    result
}

/// Apply an upload to the registry and publish its snapshot.
///
/// The plan is re-derived under the write lock and the snapshot replaces
/// the live one before that lock is released, so a reset racing the upload
/// sees either the old registry row and old snapshot or both new ones.
fn commit_upload(
    server_files: &Path,
    request: &UploadRequest,
    staged: &StagedSnapshot,
) -> Result<GroupId, ServerError> {
    let db = Database::open_in(server_files)?;

    let plan = db.immediate(|db| -> Result<UploadPlan, ServerError> {
        let plan = plan_for(db, request)?;
        match &plan {
            UploadPlan::Create { group_id } => db.insert_file(&NewFile {
                id: request.file_id.to_string(),
                group_id: group_id.to_string(),
                sync_version: request.sync_version,
                name: request.name.clone(),
                encrypt_meta: request.encrypt_meta.clone(),
            })?,
            UploadPlan::Replace { group_id } | UploadPlan::Regroup { group_id } => {
                db.update_file(
                    request.file_id.as_str(),
                    &FileUpdate {
                        group_id: Some(Some(group_id.to_string())),
                        sync_version: Some(request.sync_version),
                        encrypt_meta: Some(request.encrypt_meta.clone()),
                        name: Some(request.name.clone()),
                        ..Default::default()
                    },
                )?;
            }
        }
        staged.publish()?;
        Ok(plan)
    })?;

    info!(
        file_id = %request.file_id,
        group_id = %plan.group_id(),
        plan = ?plan,
        "Snapshot uploaded"
    );
    Ok(plan.group_id().clone())
}

pub async fn download_file(
    server_files: PathBuf,
    blobs: &BlobStore,
    file_id: FileId,
) -> Result<Vec<u8>, ServerError> {
    let id = file_id.clone();
    blocking(move || {
        let db = Database::open_in(&server_files)?;
        load_live(&db, &id).map(|_| ())
    })
    .await?;

    blobs.read_snapshot(&file_id).await
}

// ---------------------------------------------------------------------------
// Reset
// ---------------------------------------------------------------------------

/// Detach a file from its group and drop the group's storage.
///
/// The registry change is what matters; failing to remove the old group
/// file only costs disk space and is logged.
pub fn reset_file(server_files: &Path, file_id: &FileId) -> Result<(), ServerError> {
    let db = Database::open_in(server_files)?;

    let old_group = db.immediate(|db| -> Result<Option<String>, ServerError> {
        let file = load_live(db, file_id)?;
        db.update_file(
            file_id.as_str(),
            &FileUpdate {
                group_id: Some(None),
                ..Default::default()
            },
        )?;
        Ok(file.group_id)
    })?;

    if let Some(group) = old_group {
        let group = GroupId::from(group.as_str());
        if let Err(e) = GroupLog::destroy(server_files, &group) {
            warn!(group_id = %group, error = %e, "Unable to delete sync data for group");
        }
        info!(file_id = %file_id, group_id = %group, "File reset");
    } else {
        debug!(file_id = %file_id, "Reset of a file without a group");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Keys
// ---------------------------------------------------------------------------

/// Register (or rotate) the file's encryption key.
///
/// The key id, salt and test value are written together with the stored
/// metadata's `keyId`, in one statement.
pub fn register_key(server_files: &Path, registration: &KeyRegistration) -> Result<(), ServerError> {
    let db = Database::open_in(server_files)?;
    let id = &registration.file_id;

    db.immediate(|db| -> Result<(), ServerError> {
        let file = load_live(db, id)?;
        let meta = registry::rewrite_meta_key(file.encrypt_meta.as_deref(), &registration.key_id)?;
        db.update_file(
            id.as_str(),
            &FileUpdate {
                encrypt_keyid: Some(Some(registration.key_id.clone())),
                encrypt_salt: Some(registration.salt.clone()),
                encrypt_test: Some(registration.test.clone()),
                encrypt_meta: Some(Some(meta)),
                ..Default::default()
            },
        )?;
        Ok(())
    })?;

    info!(file_id = %id, key_id = %registration.key_id, "Encryption key registered");
    Ok(())
}

pub fn get_key(server_files: &Path, file_id: &FileId) -> Result<KeyInfo, ServerError> {
    let db = Database::open_in(server_files)?;
    let file = load_live(&db, file_id)?;
    Ok(KeyInfo {
        id: file.encrypt_keyid,
        salt: file.encrypt_salt,
        test: file.encrypt_test,
    })
}

// ---------------------------------------------------------------------------
// Registry edits
// ---------------------------------------------------------------------------

pub fn rename_file(server_files: &Path, file_id: &FileId, name: &str) -> Result<(), ServerError> {
    let db = Database::open_in(server_files)?;
    db.immediate(|db| -> Result<(), ServerError> {
        load_live(db, file_id)?;
        db.update_file(
            file_id.as_str(),
            &FileUpdate {
                name: Some(name.to_string()),
                ..Default::default()
            },
        )?;
        Ok(())
    })
}

/// Soft delete. The row, its group and its snapshot stay on disk, and the
/// file keeps showing up in [`list_files`] with its flag set.
pub fn delete_file(server_files: &Path, file_id: &FileId) -> Result<(), ServerError> {
    let db = Database::open_in(server_files)?;
    db.immediate(|db| -> Result<(), ServerError> {
        load_live(db, file_id)?;
        db.update_file(
            file_id.as_str(),
            &FileUpdate {
                deleted: Some(true),
                ..Default::default()
            },
        )?;
        Ok(())
    })?;
    info!(file_id = %file_id, "File deleted");
    Ok(())
}

pub fn list_files(server_files: &Path) -> Result<Vec<FileSummary>, ServerError> {
    let db = Database::open_in(server_files)?;
    Ok(db.list_files()?.into_iter().map(FileSummary::from).collect())
}

pub fn file_info(server_files: &Path, file_id: &FileId) -> Result<FileInfo, ServerError> {
    let db = Database::open_in(server_files)?;
    load_live(&db, file_id).map(FileInfo::from)
}
