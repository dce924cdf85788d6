//! WebSocket transport over axum.

use super::{SessionTransport, TransportError};
use async_trait::async_trait;
use axum::extract::ws::{CloseFrame, Message, WebSocket};
use std::borrow::Cow;
use tokio::sync::watch;

/// A session transport backed by an upgraded WebSocket.
#[derive(Debug)]
pub struct WsTransport {
    socket: WebSocket,
    live: watch::Sender<bool>,
}

impl WsTransport {
    /// Wrap an upgraded socket.
    pub fn new(socket: WebSocket) -> Self {
        Self {
            socket,
            live: watch::Sender::new(true),
        }
    }
}

#[async_trait]
impl SessionTransport for WsTransport {
    async fn receive_frame(&mut self) -> Result<String, TransportError> {
        loop {
            match self.socket.recv().await {
                Some(Ok(Message::Text(text))) => return Ok(text),
                Some(Ok(Message::Binary(bytes))) => return text_from_binary(bytes),
                // axum answers pings itself.
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                Some(Ok(Message::Close(_))) | None => {
                    self.live.send_replace(false);
                    return Err(TransportError::Disconnected);
                }
                Some(Err(e)) => {
                    self.live.send_replace(false);
                    return Err(TransportError::ReceiveFailed(e.to_string()));
                }
            }
        }
    }

    async fn send_frame(&mut self, frame: String) -> Result<(), TransportError> {
        self.socket.send(Message::Text(frame)).await.map_err(|e| {
            self.live.send_replace(false);
            TransportError::SendFailed(e.to_string())
        })
    }

    fn is_live(&self) -> bool {
        *self.live.borrow()
    }

    fn liveness(&self) -> watch::Receiver<bool> {
        self.live.subscribe()
    }

    async fn close(&mut self, code: u16, reason: &str) {
        self.live.send_replace(false);
        let frame = CloseFrame {
            code,
            reason: Cow::Owned(reason.to_string()),
        };
        if let Err(e) = self.socket.send(Message::Close(Some(frame))).await {
            tracing::debug!("WebSocket close failed: {}", e);
        }
    }
}

/// A binary frame's bytes as text. Invalid UTF-8 is a malformed frame.
fn text_from_binary(bytes: Vec<u8>) -> Result<String, TransportError> {
    String::from_utf8(bytes)
        .map_err(|e| TransportError::MalformedFrame(format!("binary frame is not UTF-8: {e}")))
}
