//! Relay messages.
//!
//! A [`RelayMessage`] is what a sender leaves in a recipient's relay queue.
//! The relay never inspects `data`; it only preserves order per recipient.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::{PrincipalId, TypesError};

/// Logical type of a relayed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// A new request; the correlation id is freshly assigned by the sender.
    Request,
    /// A response; the correlation id names the request being answered.
    Response,
}

/// A message queued for delivery to a single recipient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayMessage {
    /// Request or response.
    pub kind: MessageKind,
    /// Correlates a response with the request it answers.
    pub correlation_id: String,
    /// Principal that published the message.
    pub sender_id: PrincipalId,
    /// Principal whose queue holds the message.
    pub recipient_id: PrincipalId,
    /// Unix timestamp (seconds) when the message was created.
    pub created_at: i64,
    /// Opaque structured payload.
    pub data: serde_json::Value,
}

impl RelayMessage {
    /// Create a message stamped with the current time.
    pub fn new(
        kind: MessageKind,
        correlation_id: impl Into<String>,
        sender_id: PrincipalId,
        recipient_id: PrincipalId,
        data: serde_json::Value,
    ) -> Self {
        Self {
            kind,
            correlation_id: correlation_id.into(),
            sender_id,
            recipient_id,
            created_at: current_timestamp(),
            data,
        }
    }

    /// Serialize to MessagePack bytes (named fields).
    pub fn to_bytes(&self) -> Result<Vec<u8>, TypesError> {
        rmp_serde::to_vec_named(self).map_err(TypesError::Serialization)
    }

    /// Deserialize from MessagePack bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TypesError> {
        rmp_serde::from_slice(bytes).map_err(TypesError::Deserialization)
    }
}

fn current_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
