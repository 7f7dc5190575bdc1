//! v001 -- Group message log and its persisted trie.

use rusqlite::Connection;

const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Messages, keyed by canonical timestamp text
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages_binary (
    timestamp    TEXT PRIMARY KEY NOT NULL,
    is_encrypted BOOLEAN NOT NULL,
    content      BLOB NOT NULL
);

-- ----------------------------------------------------------------
-- Single-row trie document
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages_merkles (
    id     INTEGER PRIMARY KEY,
    merkle TEXT NOT NULL
);
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
