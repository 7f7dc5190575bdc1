//! Database migration runners.
//!
//! The account database and every group database track their schema with
//! the `user_version` pragma, so each migration runs exactly once per file.

pub mod v001_files;
pub mod v001_group_log;

use rusqlite::Connection;

use crate::error::{Result, StoreError};

/// Current account schema version.
const ACCOUNT_VERSION: u32 = 1;

/// Current group schema version.
const GROUP_VERSION: u32 = 1;

/// Bring the account database (file registry) up to date.
pub fn run_migrations(conn: &Connection) -> Result<()> {
    let current: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

    tracing::debug!(
        current_version = current,
        target_version = ACCOUNT_VERSION,
        "checking account migrations"
    );

    if current < 1 {
        tracing::info!("applying migration v001_files");
        v001_files::up(conn).map_err(|e| StoreError::Migration(e.to_string()))?;
        conn.pragma_update(None, "user_version", 1)?;
    }

    Ok(())
}

/// Bring a group database (message log + trie) up to date.
pub fn run_group_migrations(conn: &Connection) -> Result<()> {
    let current: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

    if current < GROUP_VERSION {
        tracing::debug!("applying migration v001_group_log");
        v001_group_log::up(conn).map_err(|e| StoreError::Migration(e.to_string()))?;
        conn.pragma_update(None, "user_version", GROUP_VERSION)?;
    }

    Ok(())
}
