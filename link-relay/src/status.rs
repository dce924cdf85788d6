//! Application status codes.
//!
//! Every response, HTTP or session frame, carries one of these codes next to
//! the transport-level status.

use crate::error::LinkError;
use axum::http::StatusCode;
use link_types::ResponseFrame;

/// Application-level outcome of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplicationStatus {
    /// Success.
    Success,
    /// Success; existing state was modified.
    Updated,
    /// Pairing request accepted.
    PairAccepted,
    /// Pairing request rejected or expired.
    PairRejected,
    /// Inbound request failed to parse or validate.
    Malformed,
    /// Missing or unknown credential.
    Unauthorized,
    /// Authenticated but not allowed.
    Forbidden,
    /// Unknown pairing request or principal.
    NotFound,
    /// A bounded wait elapsed.
    Timeout,
    /// Device already has an owner.
    AlreadyPaired,
    /// Operation cancelled.
    Cancelled,
    /// Pairing requester or target has the wrong role.
    InvalidPairingTarget,
    /// Sender and recipient are not in the same network.
    CrossNetwork,
    /// Rate limit exceeded.
    RateLimited,
    /// Unexpected server-side failure.
    Internal,
}

impl ApplicationStatus {
    /// Numeric application status code.
    pub fn code(self) -> u16 {
        match self {
            Self::Success => 0,
            Self::Updated => 1,
            Self::PairAccepted => 100,
            Self::PairRejected => 101,
            Self::Malformed => 400,
            Self::Unauthorized => 401,
            Self::Forbidden => 403,
            Self::NotFound => 404,
            Self::Timeout => 408,
            Self::AlreadyPaired => 409,
            Self::Cancelled => 410,
            Self::InvalidPairingTarget => 422,
            Self::CrossNetwork => 423,
            Self::RateLimited => 429,
            Self::Internal => 500,
        }
    }

    /// HTTP status used when this outcome is returned over HTTP.
    pub fn http_status(self) -> StatusCode {
        match self {
            Self::Success | Self::Updated | Self::PairAccepted | Self::PairRejected => {
                StatusCode::OK
            }
            Self::Malformed => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden | Self::CrossNetwork => StatusCode::FORBIDDEN,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Timeout => StatusCode::REQUEST_TIMEOUT,
            Self::AlreadyPaired => StatusCode::CONFLICT,
            Self::Cancelled => StatusCode::GONE,
            Self::InvalidPairingTarget => StatusCode::UNPROCESSABLE_ENTITY,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether the code reports success.
    pub fn is_ok(self) -> bool {
        self.code() < 400
    }
}

impl From<&LinkError> for ApplicationStatus {
    fn from(err: &LinkError) -> Self {
        match err {
            LinkError::NotFound { .. } => Self::NotFound,
            LinkError::Timeout => Self::Timeout,
            LinkError::Cancelled => Self::Cancelled,
            LinkError::AlreadyPaired { .. } => Self::AlreadyPaired,
            LinkError::InvalidPairingTarget { .. } => Self::InvalidPairingTarget,
            LinkError::MalformedMessage { .. } => Self::Malformed,
            LinkError::Unauthorized => Self::Unauthorized,
            LinkError::Forbidden { .. } => Self::Forbidden,
            LinkError::CrossNetwork => Self::CrossNetwork,
            LinkError::RateLimited { .. } => Self::RateLimited,
            LinkError::Storage(_) | LinkError::Config(_) => Self::Internal,
        }
    }
}

/// Error response frame for `err`.
///
/// Internal failures are reported without their details.
pub fn error_frame(err: &LinkError) -> ResponseFrame {
    let status = ApplicationStatus::from(err);
    let message = match status {
        ApplicationStatus::Internal => "internal error".to_string(),
        _ => err.to_string(),
    };
    ResponseFrame::failure(status.code(), message)
}
