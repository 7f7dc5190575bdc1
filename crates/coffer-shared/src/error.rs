use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TimestampError {
    #[error("Malformed timestamp: {0:?}")]
    Malformed(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClockError {
    #[error("Clock drift: {millis} ms is more than {max_drift} ms ahead of {now}")]
    Drift { millis: u64, now: u64, max_drift: u64 },

    #[error("Timestamp counter overflow")]
    Overflow,

    #[error("Received a timestamp from our own node {0}")]
    DuplicateNode(String),
}

#[derive(Error, Debug)]
pub enum TrieError {
    #[error("Trie serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Failed to decode sync message: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("Invalid message: {0}")]
    Timestamp(#[from] TimestampError),
}
