//! Error types for pairlink wire types.

use thiserror::Error;

/// Errors that can occur while encoding or decoding pairlink types.
#[derive(Debug, Error)]
pub enum TypesError {
    /// MessagePack serialization failed
    #[error("serialization failed: {0}")]
    Serialization(#[source] rmp_serde::encode::Error),

    /// MessagePack deserialization failed
    #[error("deserialization failed: {0}")]
    Deserialization(#[source] rmp_serde::decode::Error),

    /// JSON frame could not be encoded or decoded
    #[error("invalid frame: {0}")]
    Frame(#[source] serde_json::Error),

    /// Invalid data format
    #[error("invalid data: {0}")]
    InvalidData(String),
}
