//! v001 -- File registry.

use rusqlite::Connection;

const UP_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS files (
    id            TEXT PRIMARY KEY NOT NULL,
    group_id      TEXT,                       -- NULL while awaiting upload
    sync_version  SMALLINT,
    encrypt_meta  TEXT,                       -- JSON: {"keyId": ..}
    encrypt_keyid TEXT,
    encrypt_salt  TEXT,
    encrypt_test  TEXT,
    deleted       BOOLEAN NOT NULL DEFAULT FALSE,
    name          TEXT NOT NULL DEFAULT ''
);
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
