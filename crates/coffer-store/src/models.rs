//! Records persisted in the account database.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// File
// ---------------------------------------------------------------------------

/// A registered budget file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct File {
    /// Client-chosen file identifier.
    pub id: String,
    /// Current sync group. `None` after a reset until the next upload.
    pub group_id: Option<String>,
    /// Id of the registered encryption key.
    pub encrypt_keyid: Option<String>,
    /// Encryption metadata of the uploaded snapshot (JSON, `{"keyId": ..}`).
    pub encrypt_meta: Option<String>,
    /// Key-derivation salt.
    pub encrypt_salt: Option<String>,
    /// Value encrypted with the key, used by clients to verify a password.
    pub encrypt_test: Option<String>,
    /// Sync format version the snapshot was written with.
    pub sync_version: Option<i64>,
    /// Display name.
    pub name: String,
    /// Soft-delete flag.
    pub deleted: bool,
}

impl File {
    /// Key id recorded inside `encrypt_meta`, if any.
    ///
    /// Unparseable metadata yields `None`, which then disagrees with any
    /// registered key and surfaces as a key mismatch.
    pub fn meta_key_id(&self) -> Option<String> {
        let meta = self.encrypt_meta.as_deref()?;
        let value: serde_json::Value = serde_json::from_str(meta).ok()?;
        value.get("keyId")?.as_str().map(str::to_string)
    }
}

/// Row inserted on the first upload of a file.
#[derive(Debug, Clone)]
pub struct NewFile {
    pub id: String,
    pub group_id: String,
    pub sync_version: Option<i64>,
    pub name: String,
    pub encrypt_meta: Option<String>,
}

/// Partial update of a [`File`]. Outer `None` leaves a column untouched,
/// `Some(None)` writes NULL.
#[derive(Debug, Clone, Default)]
pub struct FileUpdate {
    pub group_id: Option<Option<String>>,
    pub encrypt_keyid: Option<Option<String>>,
    pub encrypt_meta: Option<Option<String>>,
    pub encrypt_salt: Option<Option<String>>,
    pub encrypt_test: Option<Option<String>>,
    pub sync_version: Option<Option<i64>>,
    pub name: Option<String>,
    pub deleted: Option<bool>,
}

impl FileUpdate {
    pub fn is_empty(&self) -> bool {
        self.group_id.is_none()
            && self.encrypt_keyid.is_none()
            && self.encrypt_meta.is_none()
            && self.encrypt_salt.is_none()
            && self.encrypt_test.is_none()
            && self.sync_version.is_none()
            && self.name.is_none()
            && self.deleted.is_none()
    }
}
