//! Error types for pairlink-relay.

use link_types::{PrincipalId, TypesError};
use std::path::PathBuf;

/// Main error type for pairing and relay operations.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    /// Unknown pairing request or principal.
    #[error("not found: {what}")]
    NotFound {
        /// What could not be found.
        what: String,
    },

    /// A bounded wait was exceeded.
    #[error("operation timed out")]
    Timeout,

    /// The operation was aborted before it could complete.
    #[error("operation cancelled")]
    Cancelled,

    /// The device already has an owner.
    #[error("device {device} is already paired")]
    AlreadyPaired {
        /// The device that already has an owner.
        device: PrincipalId,
    },

    /// Pairing requester or target has the wrong role.
    #[error("invalid pairing target: {reason}")]
    InvalidPairingTarget {
        /// Why the pairing was refused.
        reason: String,
    },

    /// An inbound frame failed to parse or validate.
    #[error("malformed message: {reason}")]
    MalformedMessage {
        /// Parse or validation failure.
        reason: String,
    },

    /// Credential missing or not recognised.
    #[error("unauthorized")]
    Unauthorized,

    /// Authenticated, but not allowed to do this.
    #[error("forbidden: {reason}")]
    Forbidden {
        /// Why the action is not allowed.
        reason: String,
    },

    /// Sender and recipient are not in the same network.
    #[error("cross-network requests are not allowed")]
    CrossNetwork,

    /// Rate limit exceeded.
    #[error("rate limit exceeded: {reason}")]
    RateLimited {
        /// Reason for rate limiting.
        reason: String,
    },

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),
}

impl LinkError {
    /// Shorthand for [`LinkError::NotFound`].
    pub fn not_found(what: impl Into<String>) -> Self {
        LinkError::NotFound { what: what.into() }
    }

    /// Shorthand for [`LinkError::Forbidden`].
    pub fn forbidden(reason: impl Into<String>) -> Self {
        LinkError::Forbidden {
            reason: reason.into(),
        }
    }
}

impl From<TypesError> for LinkError {
    fn from(e: TypesError) -> Self {
        LinkError::MalformedMessage {
            reason: e.to_string(),
        }
    }
}

/// Storage layer errors.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A queued message could not be encoded or decoded.
    #[error("encoding error: {0}")]
    Encoding(#[from] TypesError),

    /// Migration error.
    #[error("migration error: {0}")]
    Migration(String),

    /// Database path error.
    #[error("invalid database path: {path}")]
    InvalidPath {
        /// The invalid path.
        path: PathBuf,
    },
}

/// Result type alias for pairing and relay operations.
pub type Result<T> = std::result::Result<T, LinkError>;

/// Result type alias for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;
