//! # coffer-shared
//!
//! Types shared by the relay and its storage layer: message identity
//! (hybrid logical clock timestamps), the reconciliation trie, and the sync
//! wire protocol.

pub mod clock;
pub mod constants;
pub mod error;
pub mod merkle;
pub mod protocol;
pub mod timestamp;
pub mod types;

pub use clock::Clock;
pub use merkle::Trie;
pub use protocol::Message;
pub use timestamp::Timestamp;
pub use types::{FileId, GroupId};
