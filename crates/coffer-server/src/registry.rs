//! File lifecycle state machine.
//!
//! Everything here is a pure decision over a registry row and what the
//! client declared. Nothing touches storage; [`crate::lifecycle`] and
//! [`crate::sync`] apply the outcome.

use coffer_shared::constants::SYNC_FORMAT_VERSION;
use coffer_shared::GroupId;
use coffer_store::File;

use crate::error::ServerError;

/// Where a file is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileState {
    /// No registry row.
    Uninitialized,
    /// Row exists but its sync group was cleared by a reset.
    AwaitingUpload,
    /// Row has a group and a current sync format.
    Active,
    /// Snapshot was written with an unsupported sync format.
    StaleVersion,
    Deleted,
}

impl FileState {
    pub fn of(file: Option<&File>) -> Self {
        match file {
            None => FileState::Uninitialized,
            Some(f) if f.deleted => FileState::Deleted,
            Some(f) if !is_current_version(f.sync_version) => FileState::StaleVersion,
            Some(f) if f.group_id.is_none() => FileState::AwaitingUpload,
            Some(_) => FileState::Active,
        }
    }
}

fn is_current_version(version: Option<i64>) -> bool {
    matches!(version, Some(v) if v >= SYNC_FORMAT_VERSION)
}

/// Decide whether a sync against `file` may proceed and, if so, which group
/// it targets. Checks run in a fixed order and the first failure wins.
pub fn validate_sync(
    file: Option<&File>,
    declared_group: Option<&str>,
    declared_key: Option<&str>,
) -> Result<GroupId, ServerError> {
    match FileState::of(file) {
        FileState::Uninitialized | FileState::Deleted => return Err(ServerError::FileNotFound),
        FileState::StaleVersion => return Err(ServerError::FileOldVersion),
        FileState::AwaitingUpload => return Err(ServerError::FileNeedsUpload),
        FileState::Active => {}
    }

    let Some(file) = file else {
        return Err(ServerError::FileNotFound);
    };
    let Some(group_id) = file.group_id.as_deref() else {
        return Err(ServerError::FileNeedsUpload);
    };

    if file.meta_key_id().as_deref() != file.encrypt_keyid.as_deref() {
        return Err(ServerError::FileKeyMismatch);
    }

    if declared_group != Some(group_id) {
        return Err(ServerError::FileHasReset);
    }

    if declared_key != file.encrypt_keyid.as_deref() {
        return Err(ServerError::FileHasNewKey);
    }

    Ok(GroupId::from(group_id))
}

/// What an accepted upload does to the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadPlan {
    /// First upload: insert a row in a fresh group.
    Create { group_id: GroupId },
    /// Re-upload into the group the client already follows.
    Replace { group_id: GroupId },
    /// First upload after a reset: mint a fresh group for the existing row.
    Regroup { group_id: GroupId },
}

impl UploadPlan {
    pub fn group_id(&self) -> &GroupId {
        match self {
            UploadPlan::Create { group_id }
            | UploadPlan::Replace { group_id }
            | UploadPlan::Regroup { group_id } => group_id,
        }
    }
}

/// Decide how a snapshot upload is applied.
///
/// `declared_key` is the key id inside the uploaded encryption metadata.
pub fn plan_upload(
    file: Option<&File>,
    declared_group: Option<&str>,
    declared_key: Option<&str>,
) -> Result<UploadPlan, ServerError> {
    let file = match (FileState::of(file), file) {
        (FileState::Deleted, _) => return Err(ServerError::FileNotFound),
        (_, Some(file)) => file,
        (_, None) => {
            return Ok(UploadPlan::Create {
                group_id: GroupId::new(),
            })
        }
    };

    if declared_group != file.group_id.as_deref() {
        return Err(ServerError::FileHasReset);
    }

    if declared_key != file.encrypt_keyid.as_deref() {
        return Err(ServerError::FileHasNewKey);
    }

    Ok(match declared_group {
        Some(group) => UploadPlan::Replace {
            group_id: GroupId::from(group),
        },
        None => UploadPlan::Regroup {
            group_id: GroupId::new(),
        },
    })
}

/// Encryption metadata with its `keyId` replaced, other fields kept.
///
/// Missing or non-object metadata starts from an empty object.
pub fn rewrite_meta_key(meta: Option<&str>, key_id: &str) -> Result<String, ServerError> {
    let mut value = meta
        .and_then(|m| serde_json::from_str::<serde_json::Value>(m).ok())
        .filter(serde_json::Value::is_object)
        .unwrap_or_else(|| serde_json::json!({}));

    value["keyId"] = serde_json::Value::String(key_id.to_string());

    serde_json::to_string(&value).map_err(|e| ServerError::Internal(format!("encode meta: {e}")))
}

/// Key id inside client-supplied encryption metadata.
pub fn meta_key_id(meta: Option<&str>) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(meta?).ok()?;
    value.get("keyId")?.as_str().map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const GROUP: &str = "6f9b1a52-3c1e-4c3f-9a55-0d1c1b0e2a11";

    fn active(key: Option<&str>) -> File {
        File {
            id: "budget".into(),
            group_id: Some(GROUP.into()),
            encrypt_keyid: key.map(str::to_string),
            encrypt_meta: key.map(|k| format!(r#"{{"keyId":"{k}"}}"#)),
            encrypt_salt: None,
            encrypt_test: None,
            sync_version: Some(SYNC_FORMAT_VERSION),
            name: "Budget".into(),
            deleted: false,
        }
    }

    #[test]
    fn test_states() {
        let mut file = active(None);
        assert_eq!(FileState::of(None), FileState::Uninitialized);
        assert_eq!(FileState::of(Some(&file)), FileState::Active);

        file.group_id = None;
        assert_eq!(FileState::of(Some(&file)), FileState::AwaitingUpload);

        file.sync_version = Some(1);
        assert_eq!(FileState::of(Some(&file)), FileState::StaleVersion);

        file.deleted = true;
        assert_eq!(FileState::of(Some(&file)), FileState::Deleted);
    }

    #[test]
    fn test_sync_accepts_matching_declaration() {
        let file = active(Some("k1"));
        let group = validate_sync(Some(&file), Some(GROUP), Some("k1")).unwrap();
        assert_eq!(group.as_str(), GROUP);
    }

    #[test]
    fn test_sync_validation_order() {
        assert!(matches!(
            validate_sync(None, Some(GROUP), None),
            Err(ServerError::FileNotFound)
        ));

        let mut deleted = active(None);
        deleted.deleted = true;
        assert!(matches!(
            validate_sync(Some(&deleted), Some(GROUP), None),
            Err(ServerError::FileNotFound)
        ));

        // Old version beats every later check.
        let mut old = active(Some("k1"));
        old.sync_version = None;
        old.group_id = None;
        assert!(matches!(
            validate_sync(Some(&old), Some("other"), Some("k2")),
            Err(ServerError::FileOldVersion)
        ));

        let mut reset = active(Some("k1"));
        reset.group_id = None;
        assert!(matches!(
            validate_sync(Some(&reset), Some(GROUP), Some("k1")),
            Err(ServerError::FileNeedsUpload)
        ));

        let mut mismatched = active(Some("k1"));
        mismatched.encrypt_meta = Some(r#"{"keyId":"k0"}"#.into());
        assert!(matches!(
            validate_sync(Some(&mismatched), Some("other"), Some("k1")),
            Err(ServerError::FileKeyMismatch)
        ));

        let file = active(Some("k1"));
        assert!(matches!(
            validate_sync(Some(&file), Some("other"), Some("k2")),
            Err(ServerError::FileHasReset)
        ));
        assert!(matches!(
            validate_sync(Some(&file), Some(GROUP), Some("k2")),
            Err(ServerError::FileHasNewKey)
        ));
        assert!(matches!(
            validate_sync(Some(&file), Some(GROUP), None),
            Err(ServerError::FileHasNewKey)
        ));
    }

    #[test]
    fn test_unencrypted_file_syncs_without_key() {
        let file = active(None);
        assert!(validate_sync(Some(&file), Some(GROUP), None).is_ok());
    }

    #[test]
    fn test_upload_plans() {
        assert!(matches!(
            plan_upload(None, None, None),
            Ok(UploadPlan::Create { .. })
        ));

        let file = active(Some("k1"));
        assert_eq!(
            plan_upload(Some(&file), Some(GROUP), Some("k1")).unwrap(),
            UploadPlan::Replace {
                group_id: GroupId::from(GROUP)
            }
        );

        let mut reset = active(Some("k1"));
        reset.group_id = None;
        let plan = plan_upload(Some(&reset), None, Some("k1")).unwrap();
        assert!(matches!(plan, UploadPlan::Regroup { .. }));
        assert!(plan.group_id().is_safe());
    }

    #[test]
    fn test_upload_rejections() {
        let file = active(Some("k1"));
        assert!(matches!(
            plan_upload(Some(&file), None, Some("k1")),
            Err(ServerError::FileHasReset)
        ));
        assert!(matches!(
            plan_upload(Some(&file), Some(GROUP), Some("k2")),
            Err(ServerError::FileHasNewKey)
        ));

        let mut deleted = active(None);
        deleted.deleted = true;
        assert!(matches!(
            plan_upload(Some(&deleted), Some(GROUP), None),
            Err(ServerError::FileNotFound)
        ));
    }

    #[test]
    fn test_rewrite_meta_key() {
        let meta = r#"{"keyId":"k1","algorithm":"aes-256-gcm","iv":"abc"}"#;
        let rewritten = rewrite_meta_key(Some(meta), "k2").unwrap();
        let value: serde_json::Value = serde_json::from_str(&rewritten).unwrap();
        assert_eq!(value["keyId"], "k2");
        assert_eq!(value["algorithm"], "aes-256-gcm");
        assert_eq!(value["iv"], "abc");

        assert_eq!(meta_key_id(Some(&rewrite_meta_key(None, "k3").unwrap())), Some("k3".into()));
        assert_eq!(
            meta_key_id(Some(&rewrite_meta_key(Some("[1,2]"), "k4").unwrap())),
            Some("k4".into())
        );
    }

    proptest! {
        #[test]
        fn stale_group_is_always_reset(declared in "[a-z0-9-]{1,40}", key in proptest::option::of("[a-z0-9]{1,8}")) {
            prop_assume!(declared != GROUP);
            let file = active(key.as_deref());
            prop_assert!(matches!(
                validate_sync(Some(&file), Some(&declared), key.as_deref()),
                Err(ServerError::FileHasReset)
            ));
        }
    }
}
