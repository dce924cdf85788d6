//! Storage collaborators for pairlink-relay.
//!
//! Two concerns live here:
//! - [`PairingStore`]: the durable user → device pairing edges.
//! - [`QueueBackend`]: bounded per-key FIFO lists backing relay queues.

mod memory;
mod sqlite;

pub use memory::{MemoryPairingStore, MemoryQueueBackend};
pub use sqlite::SqlitePairingStore;

use crate::error::LinkError;
use async_trait::async_trait;
use link_types::PrincipalId;
use std::time::Duration;

/// Trait for pairing edge storage backends.
#[async_trait]
pub trait PairingStore: Send + Sync {
    /// Record that `user` owns `device`.
    ///
    /// Fails with [`LinkError::AlreadyPaired`] if the device already has an
    /// owner.
    async fn create_edge(&self, user: PrincipalId, device: PrincipalId) -> Result<(), LinkError>;

    /// Remove the edge for `device`. Returns whether an edge existed.
    async fn remove_edge(&self, device: PrincipalId) -> Result<bool, LinkError>;

    /// Owner of `device`, if paired.
    async fn find_owner(&self, device: PrincipalId) -> Result<Option<PrincipalId>, LinkError>;

    /// Devices owned by `user`, in pairing order.
    async fn find_devices(&self, user: PrincipalId) -> Result<Vec<PrincipalId>, LinkError>;

    /// Whether `a` and `b` belong to the same network.
    ///
    /// True when they are the same principal, when one owns the other, or
    /// when both are devices of the same owner.
    async fn same_network(&self, a: PrincipalId, b: PrincipalId) -> Result<bool, LinkError> {
        if a == b {
            return Ok(true);
        }
        let owner_a = self.find_owner(a).await?;
        let owner_b = self.find_owner(b).await?;
        Ok(owner_a == Some(b)
            || owner_b == Some(a)
            || matches!((owner_a, owner_b), (Some(x), Some(y)) if x == y))
    }
}

/// Trait for bounded per-key FIFO list backends.
///
/// Pushes to one key are serialized, so pops observe global push order.
#[async_trait]
pub trait QueueBackend: Send + Sync {
    /// Append `bytes` to the list at `key`. Returns the new length.
    async fn push(&self, key: &str, bytes: Vec<u8>) -> Result<usize, LinkError>;

    /// Keep only the elements in `start..=end`.
    ///
    /// Negative indices count from the end (`-1` is the last element).
    async fn trim(&self, key: &str, start: i64, end: i64) -> Result<(), LinkError>;

    /// Append `bytes` and, if the list is now longer than `max`, drop its
    /// oldest `drop` elements, all as one step.
    ///
    /// Returns the length after the push and the number of elements dropped.
    async fn push_capped(
        &self,
        key: &str,
        bytes: Vec<u8>,
        max: usize,
        drop: usize,
    ) -> Result<(usize, usize), LinkError>;

    /// Pop the oldest element, waiting up to `timeout` for one to arrive.
    ///
    /// Returns `None` on timeout. Dropping the future releases the wait.
    async fn blocking_pop(&self, key: &str, timeout: Duration) -> Result<Option<Vec<u8>>, LinkError>;

    /// Current length of the list at `key`.
    async fn len(&self, key: &str) -> Result<usize, LinkError>;
}
