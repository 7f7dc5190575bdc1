//! Sync wire protocol.
//!
//! Requests and responses are protobuf documents sent with the
//! `application/actual-sync` media type. Content bytes are opaque to the
//! relay; they are usually ciphertext produced by the client.

use prost::Message as _;

use crate::error::ProtocolError;
use crate::timestamp::Timestamp;

/// A message as it travels on the wire.
#[derive(Clone, PartialEq, prost::Message)]
pub struct MessageEnvelope {
    /// Canonical timestamp text
    #[prost(string, tag = "1")]
    pub timestamp: String,
    #[prost(bool, tag = "2")]
    pub is_encrypted: bool,
    #[prost(bytes = "vec", tag = "3")]
    pub content: Vec<u8>,
}

/// A client's sync call. Empty strings mean "not provided".
#[derive(Clone, PartialEq, prost::Message)]
pub struct SyncRequest {
    #[prost(message, repeated, tag = "1")]
    pub messages: Vec<MessageEnvelope>,
    #[prost(string, tag = "2")]
    pub file_id: String,
    #[prost(string, tag = "3")]
    pub group_id: String,
    #[prost(string, tag = "5")]
    pub key_id: String,
    #[prost(string, tag = "6")]
    pub since: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct SyncResponse {
    #[prost(message, repeated, tag = "1")]
    pub messages: Vec<MessageEnvelope>,
    /// Serialized reconciliation trie (JSON)
    #[prost(string, tag = "2")]
    pub merkle: String,
}

/// A message once its timestamp has been validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub timestamp: Timestamp,
    pub is_encrypted: bool,
    pub content: Vec<u8>,
}

impl TryFrom<MessageEnvelope> for Message {
    type Error = ProtocolError;

    fn try_from(envelope: MessageEnvelope) -> Result<Self, Self::Error> {
        Ok(Self {
            timestamp: Timestamp::parse(&envelope.timestamp)?,
            is_encrypted: envelope.is_encrypted,
            content: envelope.content,
        })
    }
}

impl From<Message> for MessageEnvelope {
    fn from(message: Message) -> Self {
        Self {
            timestamp: message.timestamp.to_string(),
            is_encrypted: message.is_encrypted,
            content: message.content,
        }
    }
}

impl SyncRequest {
    pub fn from_bytes(data: &[u8]) -> Result<Self, ProtocolError> {
        Ok(Self::decode(data)?)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.encode_to_vec()
    }
}

impl SyncResponse {
    pub fn from_bytes(data: &[u8]) -> Result<Self, ProtocolError> {
        Ok(Self::decode(data)?)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.encode_to_vec()
    }
}

/// Map the proto3 "empty means unset" convention onto `Option`.
pub fn non_empty(value: &str) -> Option<&str> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}
