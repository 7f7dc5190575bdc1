//! # coffer-store
//!
//! SQLite persistence for the sync relay.
//!
//! * the **account database** (`account.sqlite`) holds the file registry,
//!   accessed through [`Database`];
//! * every sync group gets its own `group-<id>.sqlite` holding the message
//!   log and its reconciliation trie, accessed through [`GroupLog`].
//!
//! All handles are synchronous `rusqlite` connections, opened per request.

pub mod database;
pub mod files;
pub mod group;
pub mod migrations;
pub mod models;

mod error;

pub use database::Database;
pub use error::{Result, StoreError};
pub use group::{Appended, GroupLog};
pub use models::*;
