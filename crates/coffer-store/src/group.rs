//! Per-group message log.
//!
//! Every sync group lives in its own SQLite file, `group-<id>.sqlite`, that
//! holds the deduplicated message log together with the group's
//! reconciliation trie. Keeping both in one file lets a single transaction
//! cover "insert messages, fold them into the trie, prune, persist", so the
//! trie and the log can never disagree about membership.
//!
//! Concurrent writers to the same group are serialized by SQLite itself
//! (`BEGIN IMMEDIATE` plus a busy timeout); different groups are different
//! files and never contend.

use std::path::{Path, PathBuf};

use coffer_shared::{GroupId, Message, Timestamp, Trie};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, TransactionBehavior};

use crate::database::BUSY_TIMEOUT;
use crate::error::{Result, StoreError};
use crate::migrations;

/// Outcome of [`GroupLog::append`].
#[derive(Debug, Clone)]
pub struct Appended {
    /// Messages that were not already in the log.
    pub added: usize,
    /// The trie as persisted by this append.
    pub trie: Trie,
}

/// Handle on one group's log. Open per request, drop when done.
pub struct GroupLog {
    conn: Connection,
    group_id: GroupId,
}

/// Path of the storage file for `group_id` under `dir`.
pub fn group_path(dir: &Path, group_id: &GroupId) -> PathBuf {
    dir.join(format!("group-{}.sqlite", group_id.as_str()))
}

impl GroupLog {
    /// Open (or create) the log of `group_id` inside `dir`.
    pub fn open(dir: &Path, group_id: &GroupId) -> Result<Self> {
        if !group_id.is_safe() {
            return Err(StoreError::InvalidGroup(group_id.to_string()));
        }
        std::fs::create_dir_all(dir)?;
        let path = group_path(dir, group_id);

        let conn = Connection::open(&path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        migrations::run_group_migrations(&conn)?;

        tracing::debug!(group_id = %group_id, path = %path.display(), "opened group log");

        Ok(Self {
            conn,
            group_id: group_id.clone(),
        })
    }

    /// Add a batch of messages.
    ///
    /// Duplicates (same timestamp) are skipped silently. Each genuinely new
    /// message is folded into the trie, the trie is pruned once and written
    /// back, all inside one immediate transaction: either the whole batch
    /// and its trie land, or nothing does.
    pub fn append(&mut self, messages: &[Message]) -> Result<Appended> {
        self.append_checked(messages, || Ok(()))
    }

    /// [`append`](Self::append), with `check` run once the group's write
    /// lock is held. If it fails the transaction is rolled back untouched.
    pub fn append_checked<E, F>(
        &mut self,
        messages: &[Message],
        check: F,
    ) -> std::result::Result<Appended, E>
    where
        F: FnOnce() -> std::result::Result<(), E>,
        E: From<StoreError>,
    {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(StoreError::from)?;

        check()?;

        let (added, trie) = write_batch(&tx, messages)?;
        tx.commit().map_err(StoreError::from)?;

        tracing::debug!(
            group_id = %self.group_id,
            received = messages.len(),
            added,
            "appended messages"
        );

        Ok(Appended { added, trie })
    }

    /// All messages strictly newer than `since`, oldest first.
    pub fn list_since(&self, since: &Timestamp) -> Result<Vec<Message>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT timestamp, is_encrypted, content
             FROM messages_binary
             WHERE timestamp > ?1
             ORDER BY timestamp ASC",
        )?;

        let rows = stmt.query_map(params![since.to_string()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, bool>(1)?,
                row.get::<_, Vec<u8>>(2)?,
            ))
        })?;

        let mut messages = Vec::new();
        for row in rows {
            let (timestamp, is_encrypted, content) = row?;
            messages.push(Message {
                timestamp: Timestamp::parse(&timestamp)?,
                is_encrypted,
                content,
            });
        }
        Ok(messages)
    }

    /// The persisted trie, or an empty one for a fresh group.
    pub fn merkle(&self) -> Result<Trie> {
        load_trie(&self.conn)
    }

    /// Number of messages stored.
    pub fn len(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM messages_binary", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Delete a group's storage wholesale. A group that was never written
    /// is not an error.
    ///
    /// Waits for an append already holding the group's write lock to
    /// finish first. Appends that start later must notice on their own
    /// (see [`append_checked`](Self::append_checked)) that the group is gone.
    pub fn destroy(dir: &Path, group_id: &GroupId) -> Result<()> {
        if !group_id.is_safe() {
            return Err(StoreError::InvalidGroup(group_id.to_string()));
        }
        let path = group_path(dir, group_id);

        match Connection::open_with_flags(&path, OpenFlags::SQLITE_OPEN_READ_WRITE) {
            Ok(conn) => {
                conn.busy_timeout(BUSY_TIMEOUT)?;
                conn.execute_batch("BEGIN IMMEDIATE; ROLLBACK;")?;
            }
            Err(_) if !path.exists() => {}
            Err(e) => return Err(e.into()),
        }

        for suffix in ["", "-wal", "-shm"] {
            let mut target = path.clone().into_os_string();
            target.push(suffix);
            match std::fs::remove_file(&target) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        tracing::debug!(group_id = %group_id, "destroyed group storage");
        Ok(())
    }
}

fn write_batch(conn: &Connection, messages: &[Message]) -> Result<(usize, Trie)> {
    let mut trie = load_trie(conn)?;
    let mut added = 0;

    {
        let mut insert = conn.prepare_cached(
            "INSERT OR IGNORE INTO messages_binary (timestamp, is_encrypted, content)
             VALUES (?1, ?2, ?3)",
        )?;
        for message in messages {
            let changes = insert.execute(params![
                message.timestamp.to_string(),
                message.is_encrypted,
                message.content,
            ])?;
            if changes > 0 {
                trie.insert(&message.timestamp);
                added += 1;
            }
        }
    }

    let trie = trie.prune();
    conn.execute(
        "INSERT INTO messages_merkles (id, merkle) VALUES (1, ?1)
         ON CONFLICT (id) DO UPDATE SET merkle = excluded.merkle",
        params![trie.to_json()?],
    )?;
    Ok((added, trie))
}

fn load_trie(conn: &Connection) -> Result<Trie> {
    let merkle: Option<String> = conn
        .query_row(
            "SELECT merkle FROM messages_merkles WHERE id = 1",
            [],
            |row| row.get(0),
        )
        .optional()?;

    match merkle {
        Some(json) => Ok(Trie::from_json(&json)?),
        None => Ok(Trie::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::seq::SliceRandom;

    fn message(ts: &str, content: &[u8]) -> Message {
        Message {
            timestamp: Timestamp::parse(ts).unwrap(),
            is_encrypted: false,
            content: content.to_vec(),
        }
    }

    fn open() -> (GroupLog, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let log = GroupLog::open(dir.path(), &GroupId::new()).unwrap();
        (log, dir)
    }

    fn sample() -> Vec<Message> {
        vec![
            message("2018-11-13T13:20:40.000Z-0000-0123456789ABCDEF", b"a"),
            message("2018-11-13T13:21:40.000Z-0000-0123456789ABCDEF", b"b"),
            message("2018-11-14T09:00:00.000Z-0003-0000testinguuid2", b"c"),
        ]
    }

    #[test]
    fn test_fresh_group_is_empty() {
        let (log, _dir) = open();
        assert!(log.merkle().unwrap().is_empty());
        assert!(log.is_empty().unwrap());
        assert!(log.list_since(&Timestamp::zero()).unwrap().is_empty());
    }

    #[test]
    fn test_append_then_list_since() {
        let (mut log, _dir) = open();
        let appended = log.append(&sample()).unwrap();
        assert_eq!(appended.added, 3);
        assert_eq!(appended.trie, log.merkle().unwrap());

        let all = log.list_since(&Timestamp::zero()).unwrap();
        assert_eq!(all, sample());

        let since = Timestamp::parse("2018-11-13T13:21:40.000Z-0000-0123456789ABCDEF").unwrap();
        let newer = log.list_since(&since).unwrap();
        assert_eq!(newer, sample()[2..].to_vec());
    }

    #[test]
    fn test_duplicates_are_dropped_not_merged() {
        let (mut log, _dir) = open();
        log.append(&sample()).unwrap();

        let mut replay = sample();
        replay[0].content = b"different".to_vec();
        let appended = log.append(&replay).unwrap();

        assert_eq!(appended.added, 0);
        assert_eq!(log.len().unwrap(), 3);
        assert_eq!(log.list_since(&Timestamp::zero()).unwrap()[0].content, b"a");
    }

    #[test]
    fn test_duplicate_inside_one_batch() {
        let (mut log, _dir) = open();
        let mut batch = sample();
        batch.push(batch[0].clone());

        let appended = log.append(&batch).unwrap();
        assert_eq!(appended.added, 3);

        let (mut other, _other_dir) = open();
        let expected = other.append(&sample()).unwrap();
        assert_eq!(appended.trie, expected.trie);
    }

    #[test]
    fn test_empty_append_still_persists_trie() {
        let (mut log, _dir) = open();
        let appended = log.append(&[]).unwrap();
        assert_eq!(appended.added, 0);
        assert!(appended.trie.is_empty());
    }

    #[test]
    fn test_appended_trie_is_pruned() {
        let (mut log, _dir) = open();
        let appended = log.append(&sample()).unwrap();

        let mut unpruned = Trie::new();
        for m in sample() {
            unpruned.insert(&m.timestamp);
        }
        assert_eq!(appended.trie, unpruned.prune());
        assert_eq!(appended.trie.root_hash(), unpruned.root_hash());
    }

    #[test]
    fn test_arrival_order_does_not_change_trie() {
        let (mut log_a, _dir_a) = open();
        let (mut log_b, _dir_b) = open();

        let mut messages = sample();
        log_a.append(&messages).unwrap();

        messages.shuffle(&mut rand::thread_rng());
        for m in &messages {
            log_b.append(std::slice::from_ref(m)).unwrap();
        }

        assert_eq!(
            log_a.merkle().unwrap().root_hash(),
            log_b.merkle().unwrap().root_hash()
        );
    }

    #[test]
    fn test_failed_batch_leaves_no_trace() {
        let (mut log, _dir) = open();
        log.append(&sample()[..1]).unwrap();
        let before = log.merkle().unwrap();

        // break the trie document so the next append fails mid-transaction
        log.conn
            .execute("UPDATE messages_merkles SET merkle = 'not json'", [])
            .unwrap();
        assert!(log.append(&sample()).is_err());

        log.conn
            .execute(
                "UPDATE messages_merkles SET merkle = ?1",
                params![before.to_json().unwrap()],
            )
            .unwrap();
        assert_eq!(log.len().unwrap(), 1);
        assert_eq!(log.merkle().unwrap(), before);
    }

    #[test]
    fn test_failed_check_writes_nothing() {
        let (mut log, _dir) = open();
        log.append(&sample()[..1]).unwrap();
        let before = log.merkle().unwrap();

        let result = log.append_checked(&sample(), || {
            Err(StoreError::InvalidGroup("detached".into()))
        });
        assert!(matches!(result, Err(StoreError::InvalidGroup(_))));
        assert_eq!(log.len().unwrap(), 1);
        assert_eq!(log.merkle().unwrap(), before);

        let appended = log.append_checked(&sample(), || Ok::<(), StoreError>(())).unwrap();
        assert_eq!(appended.added, 2);
    }

    #[test]
    fn test_destroy_waits_for_inflight_append() {
        let dir = tempfile::tempdir().unwrap();
        let group = GroupId::new();
        let path = group_path(dir.path(), &group);
        let log = GroupLog::open(dir.path(), &group).unwrap();
        log.conn.execute_batch("BEGIN IMMEDIATE").unwrap();

        let target = dir.path().to_path_buf();
        let waiting = group.clone();
        let destroyer = std::thread::spawn(move || GroupLog::destroy(&target, &waiting));

        std::thread::sleep(std::time::Duration::from_millis(200));
        assert!(path.exists());

        log.conn.execute_batch("COMMIT").unwrap();
        destroyer.join().unwrap().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_reopen_sees_persisted_state() {
        let dir = tempfile::tempdir().unwrap();
        let group = GroupId::new();
        {
            let mut log = GroupLog::open(dir.path(), &group).unwrap();
            log.append(&sample()).unwrap();
        }
        let log = GroupLog::open(dir.path(), &group).unwrap();
        assert_eq!(log.len().unwrap(), 3);
        assert!(!log.merkle().unwrap().is_empty());
    }

    #[test]
    fn test_rejects_unsafe_group_ids() {
        let dir = tempfile::tempdir().unwrap();
        let evil = GroupId::from("../../account");
        assert!(matches!(
            GroupLog::open(dir.path(), &evil),
            Err(StoreError::InvalidGroup(_))
        ));
        assert!(GroupLog::destroy(dir.path(), &evil).is_err());
    }

    #[test]
    fn test_destroy_removes_storage() {
        let dir = tempfile::tempdir().unwrap();
        let group = GroupId::new();
        {
            let mut log = GroupLog::open(dir.path(), &group).unwrap();
            log.append(&sample()).unwrap();
        }
        GroupLog::destroy(dir.path(), &group).unwrap();
        assert!(!group_path(dir.path(), &group).exists());

        // destroying twice is fine
        GroupLog::destroy(dir.path(), &group).unwrap();

        let log = GroupLog::open(dir.path(), &group).unwrap();
        assert!(log.is_empty().unwrap());
    }

    fn batch_strategy() -> impl Strategy<Value = Vec<Message>> {
        proptest::collection::vec(
            (1_500_000_000_000u64..1_600_000_000_000, 0u16..3, any::<bool>()),
            0..25,
        )
        .prop_map(|items| {
            items
                .into_iter()
                .map(|(millis, counter, is_encrypted)| Message {
                    timestamp: Timestamp::new(millis, counter, "1"),
                    is_encrypted,
                    content: millis.to_le_bytes().to_vec(),
                })
                .collect()
        })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_append_is_idempotent(batch in batch_strategy()) {
            let (mut log, _dir) = open();
            let once = log.append(&batch).unwrap();
            let contents = log.list_since(&Timestamp::zero()).unwrap();

            let twice = log.append(&batch).unwrap();
            prop_assert_eq!(twice.added, 0);
            prop_assert_eq!(twice.trie, once.trie);
            prop_assert_eq!(log.list_since(&Timestamp::zero()).unwrap(), contents);
        }

        #[test]
        fn prop_list_since_is_monotonic(
            batch in batch_strategy(),
            a in 1_500_000_000_000u64..1_600_000_000_000,
            b in 1_500_000_000_000u64..1_600_000_000_000,
        ) {
            let (mut log, _dir) = open();
            log.append(&batch).unwrap();

            let (lo, hi) = (a.min(b), a.max(b));
            let wide = log.list_since(&Timestamp::new(lo, 0, "0")).unwrap();
            let narrow = log.list_since(&Timestamp::new(hi, 0, "0")).unwrap();

            prop_assert!(narrow.len() <= wide.len());
            for m in &narrow {
                prop_assert!(wide.contains(m));
            }
            prop_assert!(wide.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
        }
    }
}
