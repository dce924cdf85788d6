//! Per-recipient message relay.
//!
//! Each recipient has a bounded FIFO queue in the [`QueueBackend`], keyed
//! `relay:queue:{recipient}`. Publishing never waits for a consumer. When a
//! push takes a queue past `max_size`, the oldest `overflow_buffer`
//! messages are dropped in one trim.

use crate::config::RelayConfig;
use crate::error::{Result, StorageError};
use crate::storage::QueueBackend;
use link_types::{PrincipalId, RelayMessage};
use std::sync::Arc;
use std::time::Duration;

/// Queue key for a recipient.
pub fn queue_key(recipient: PrincipalId) -> String {
    format!("relay:queue:{recipient}")
}

/// Bounded per-recipient message queues.
#[derive(Clone)]
pub struct MessageRelay {
    backend: Arc<dyn QueueBackend>,
    max_size: usize,
    overflow_buffer: usize,
}

impl std::fmt::Debug for MessageRelay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageRelay")
            .field("max_size", &self.max_size)
            .field("overflow_buffer", &self.overflow_buffer)
            .finish_non_exhaustive()
    }
}

impl MessageRelay {
    /// Create a relay over `backend` with the configured bounds.
    pub fn new(backend: Arc<dyn QueueBackend>, config: &RelayConfig) -> Self {
        Self {
            backend,
            max_size: config.max_queue_size,
            overflow_buffer: config.overflow_buffer,
        }
    }

    /// Append `message` to the recipient's queue.
    ///
    /// Returns the queue length after any overflow trim.
    pub async fn publish(&self, recipient: PrincipalId, message: &RelayMessage) -> Result<usize> {
        let bytes = message.to_bytes().map_err(StorageError::Encoding)?;
        let key = queue_key(recipient);

        let (len, dropped) = self
            .backend
            .push_capped(&key, bytes, self.max_size, self.overflow_buffer)
            .await?;
        if dropped > 0 {
            tracing::warn!(
                "Relay queue for {} overflowed; dropped {} oldest messages",
                recipient,
                dropped
            );
        }
        Ok(len)
    }

    /// Pop the oldest message for `recipient`, waiting up to `timeout`.
    ///
    /// `Ok(None)` means nothing arrived in time.
    pub async fn consume(
        &self,
        recipient: PrincipalId,
        timeout: Duration,
    ) -> Result<Option<RelayMessage>> {
        let key = queue_key(recipient);
        let Some(bytes) = self.backend.blocking_pop(&key, timeout).await? else {
            return Ok(None);
        };
        let message = RelayMessage::from_bytes(&bytes).map_err(StorageError::Encoding)?;
        Ok(Some(message))
    }

    /// An endless consumer for `recipient`, polling in `timeout` slices.
    pub fn consumer(&self, recipient: PrincipalId, timeout: Duration) -> RelayConsumer {
        RelayConsumer {
            relay: self.clone(),
            recipient,
            timeout,
        }
    }

    /// Number of messages waiting for `recipient`.
    pub async fn pending(&self, recipient: PrincipalId) -> Result<usize> {
        self.backend.len(&queue_key(recipient)).await
    }
}

/// Restartable consume sequence for one recipient.
///
/// Each [`next`](Self::next) call blocks for at most one timeout slice.
/// Dropping the pending future releases the backend wait.
#[derive(Debug)]
pub struct RelayConsumer {
    relay: MessageRelay,
    recipient: PrincipalId,
    timeout: Duration,
}

impl RelayConsumer {
    /// Next message, or `None` if the slice elapsed.
    ///
    /// Messages that fail to decode are logged and skipped.
    pub async fn next(&mut self) -> Result<Option<RelayMessage>> {
        loop {
            match self.relay.consume(self.recipient, self.timeout).await {
                Err(crate::error::LinkError::Storage(StorageError::Encoding(e))) => {
                    tracing::warn!(
                        "Dropping undecodable relay message for {}: {}",
                        self.recipient,
                        e
                    );
                }
                other => return other,
            }
        }
    }

    /// Recipient this consumer drains.
    pub fn recipient(&self) -> PrincipalId {
        self.recipient
    }
}
