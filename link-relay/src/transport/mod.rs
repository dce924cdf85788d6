//! Duplex session transports.
//!
//! A session only needs to exchange text frames with its peer and to know
//! whether the peer is still there. [`WsTransport`] adapts an axum
//! WebSocket; [`MockTransport`] is an in-process pair for tests.

mod mock;
mod ws;

pub use mock::{MockPeer, MockTransport};
pub use ws::WsTransport;

use async_trait::async_trait;
use tokio::sync::watch;

/// Normal closure (RFC 6455).
pub const CLOSE_NORMAL: u16 = 1000;

/// Transport-level failures.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The peer went away. Ends a session normally.
    #[error("peer disconnected")]
    Disconnected,

    /// A frame could not be sent.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// A frame could not be received.
    #[error("receive failed: {0}")]
    ReceiveFailed(String),

    /// A frame arrived but is not valid text. The connection stays usable.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),
}

/// One live duplex connection.
#[async_trait]
pub trait SessionTransport: Send {
    /// Next text frame from the peer.
    ///
    /// Must be cancel-safe: dropping the future loses no frame.
    async fn receive_frame(&mut self) -> Result<String, TransportError>;

    /// Send a text frame to the peer.
    async fn send_frame(&mut self, frame: String) -> Result<(), TransportError>;

    /// Whether the connection is still usable.
    fn is_live(&self) -> bool;

    /// Subscription to the liveness flag. Reads `false` once the connection
    /// is no longer usable.
    fn liveness(&self) -> watch::Receiver<bool>;

    /// Close the connection. Errors are ignored.
    async fn close(&mut self, code: u16, reason: &str);
}
