//! In-process transport for tests.

use super::{SessionTransport, TransportError};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};

type Inbound = Result<String, TransportError>;

#[derive(Debug)]
struct Shared {
    live: watch::Sender<bool>,
    close_frame: Mutex<Option<(u16, String)>>,
}

/// Server side of an in-process connection.
#[derive(Debug)]
pub struct MockTransport {
    inbound: mpsc::UnboundedReceiver<Inbound>,
    outbound: mpsc::UnboundedSender<String>,
    shared: Arc<Shared>,
}

/// Client side of an in-process connection.
#[derive(Debug)]
pub struct MockPeer {
    inbound: Option<mpsc::UnboundedSender<Inbound>>,
    outbound: mpsc::UnboundedReceiver<String>,
    shared: Arc<Shared>,
}

impl MockTransport {
    /// A connected transport and the peer that drives it.
    pub fn pair() -> (MockTransport, MockPeer) {
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            live: watch::Sender::new(true),
            close_frame: Mutex::new(None),
        });

        let transport = MockTransport {
            inbound: in_rx,
            outbound: out_tx,
            shared: shared.clone(),
        };
        let peer = MockPeer {
            inbound: Some(in_tx),
            outbound: out_rx,
            shared,
        };
        (transport, peer)
    }
}

#[async_trait]
impl SessionTransport for MockTransport {
    async fn receive_frame(&mut self) -> Result<String, TransportError> {
        match self.inbound.recv().await {
            Some(frame) => frame,
            None => {
                self.shared.live.send_replace(false);
                Err(TransportError::Disconnected)
            }
        }
    }

    async fn send_frame(&mut self, frame: String) -> Result<(), TransportError> {
        self.outbound
            .send(frame)
            .map_err(|_| TransportError::Disconnected)
    }

    fn is_live(&self) -> bool {
        *self.shared.live.borrow()
    }

    fn liveness(&self) -> watch::Receiver<bool> {
        self.shared.live.subscribe()
    }

    async fn close(&mut self, code: u16, reason: &str) {
        self.shared.live.send_replace(false);
        *self
            .shared
            .close_frame
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some((code, reason.to_string()));
    }
}

impl MockPeer {
    /// Send a text frame to the server.
    pub fn send(&self, frame: impl Into<String>) {
        if let Some(tx) = &self.inbound {
            let _ = tx.send(Ok(frame.into()));
        }
    }

    /// Make the server's next receive fail with `error`.
    pub fn fail(&self, error: TransportError) {
        if let Some(tx) = &self.inbound {
            let _ = tx.send(Err(error));
        }
    }

    /// Next frame from the server; `None` once the server side is gone.
    pub async fn recv(&mut self) -> Option<String> {
        self.outbound.recv().await
    }

    /// Stop sending. The server sees `Disconnected` after queued frames.
    pub fn hang_up(&mut self) {
        self.inbound = None;
    }

    /// Flip the liveness flag the server watches.
    pub fn set_live(&self, live: bool) {
        self.shared.live.send_replace(live);
    }

    /// Close code and reason, once the server has closed.
    pub fn close_frame(&self) -> Option<(u16, String)> {
        self.shared
            .close_frame
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}
