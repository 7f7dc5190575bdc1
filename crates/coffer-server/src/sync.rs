//! The sync call: validate, append, answer with everything newer than
//! `since` plus the group's trie.
//!
//! Runs synchronously; the HTTP layer moves it onto the blocking pool.

use std::path::Path;

use coffer_shared::protocol::{non_empty, MessageEnvelope, SyncRequest, SyncResponse};
use coffer_shared::{GroupId, Message, Timestamp};
use coffer_store::{Appended, Database, GroupLog};
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::registry;

/// Per-request batch limits.
#[derive(Debug, Clone, Copy)]
pub struct SyncLimits {
    pub max_messages: usize,
    pub max_message_bytes: usize,
}

impl From<&ServerConfig> for SyncLimits {
    fn from(config: &ServerConfig) -> Self {
        Self {
            max_messages: config.max_batch_messages,
            max_message_bytes: config.max_message_bytes,
        }
    }
}

/// Decode a protobuf body and process it.
pub fn handle_sync(
    server_files: &Path,
    limits: SyncLimits,
    body: &[u8],
) -> Result<SyncResponse, ServerError> {
    let request =
        SyncRequest::from_bytes(body).map_err(|e| ServerError::MalformedRequest(e.to_string()))?;
    process_sync(server_files, limits, request)
}

pub fn process_sync(
    server_files: &Path,
    limits: SyncLimits,
    request: SyncRequest,
) -> Result<SyncResponse, ServerError> {
    check_limits(limits, &request.messages)?;

    let since = non_empty(&request.since).ok_or(ServerError::SinceRequired)?;
    let since = Timestamp::parse(since)
        .map_err(|e| ServerError::MalformedTimestamp(e.to_string()))?;

    let declared = Declared {
        file_id: non_empty(&request.file_id),
        group_id: non_empty(&request.group_id),
        key_id: non_empty(&request.key_id),
    };

    let messages = request
        .messages
        .into_iter()
        .map(Message::try_from)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ServerError::MalformedTimestamp(e.to_string()))?;

    let group = declared.current_group(server_files)?;
    let (log, appended) = append_to_group(server_files, &group, declared, &messages)?;
    let outgoing = log.list_since(&since)?;

    let merkle = appended
        .trie
        .to_json()
        .map_err(|e| ServerError::Internal(format!("encode trie: {e}")))?;

    info!(
        file_id = declared.file_id.unwrap_or_default(),
        group_id = %group,
        received = messages.len(),
        added = appended.added,
        returned = outgoing.len(),
        "Sync"
    );

    Ok(SyncResponse {
        messages: outgoing.into_iter().map(MessageEnvelope::from).collect(),
        merkle,
    })
}

/// What the client says it is syncing.
#[derive(Debug, Clone, Copy)]
struct Declared<'a> {
    file_id: Option<&'a str>,
    group_id: Option<&'a str>,
    key_id: Option<&'a str>,
}

impl Declared<'_> {
    /// The group this sync may write to, according to the registry right now.
    fn current_group(&self, server_files: &Path) -> Result<GroupId, ServerError> {
        let db = Database::open_in(server_files)?;
        let file = match self.file_id {
            Some(id) => db.get_file_raw(id)?,
            None => None,
        };
        registry::validate_sync(file.as_ref(), self.group_id, self.key_id)
    }
}

/// Append under the group's write lock, re-validating the registry once the
/// lock is held. A reset landing after the first validation is caught here.
fn append_to_group(
    server_files: &Path,
    group: &GroupId,
    declared: Declared<'_>,
    messages: &[Message],
) -> Result<(GroupLog, Appended), ServerError> {
    let mut log = GroupLog::open(server_files, group)?;
    match log.append_checked(messages, || declared.current_group(server_files).map(|_| ())) {
        Ok(appended) => Ok((log, appended)),
        Err(e) => {
            drop(log);
            discard_if_detached(server_files, declared.file_id, group);
            Err(e)
        }
    }
}

/// Delete a group file that no registry row points at any more. Opening the
/// log re-creates the file when a reset removed it in the meantime.
fn discard_if_detached(server_files: &Path, file_id: Option<&str>, group: &GroupId) {
    let attached = Database::open_in(server_files)
        .and_then(|db| match file_id {
            Some(id) => db.get_file_raw(id),
            None => Ok(None),
        })
        .map(|file| file.and_then(|f| f.group_id).as_deref() == Some(group.as_str()));

    match attached {
        Ok(true) => {}
        Ok(false) => match GroupLog::destroy(server_files, group) {
            Ok(()) => info!(group_id = %group, "Dropped storage of detached group"),
            Err(e) => warn!(group_id = %group, error = %e, "Unable to delete sync data for group"),
        },
        Err(e) => warn!(group_id = %group, error = %e, "Unable to check group after failed sync"),
    }
}

fn check_limits(limits: SyncLimits, messages: &[MessageEnvelope]) -> Result<(), ServerError> {
    if messages.len() > limits.max_messages {
        debug!(count = messages.len(), "Rejecting oversized batch");
        return Err(ServerError::BatchTooLarge(format!(
            "{} messages (max {})",
            messages.len(),
            limits.max_messages
        )));
    }
    if let Some(big) = messages
        .iter()
        .find(|m| m.content.len() > limits.max_message_bytes)
    {
        return Err(ServerError::BatchTooLarge(format!(
            "message of {} bytes (max {})",
            big.content.len(),
            limits.max_message_bytes
        )));
    }
    Ok(())
}
