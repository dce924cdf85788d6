//! In-memory storage backends.
//!
//! `MemoryQueueBackend` is the relay's queue store: volatile and bounded by
//! the relay's trim policy. `MemoryPairingStore` is a drop-in for the SQLite
//! store in tests and ephemeral deployments.

use super::{PairingStore, QueueBackend};
use crate::error::LinkError;
use async_trait::async_trait;
use dashmap::DashMap;
use link_types::PrincipalId;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

/// One list plus the wake-up for consumers blocked on it.
#[derive(Debug, Default)]
struct KeyQueue {
    items: Mutex<VecDeque<Vec<u8>>>,
    pushed: Notify,
}

impl KeyQueue {
    fn items(&self) -> MutexGuard<'_, VecDeque<Vec<u8>>> {
        self.items.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Volatile per-key FIFO lists.
#[derive(Debug, Default)]
pub struct MemoryQueueBackend {
    queues: DashMap<String, Arc<KeyQueue>>,
}

impl MemoryQueueBackend {
    /// Create an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys that have been touched.
    pub fn key_count(&self) -> usize {
        self.queues.len()
    }

    fn queue(&self, key: &str) -> Arc<KeyQueue> {
        Arc::clone(&self.queues.entry(key.to_owned()).or_default())
    }
}

#[async_trait]
impl QueueBackend for MemoryQueueBackend {
    async fn push(&self, key: &str, bytes: Vec<u8>) -> Result<usize, LinkError> {
        let queue = self.queue(key);
        let len = {
            let mut items = queue.items();
            items.push_back(bytes);
            items.len()
        };
        queue.pushed.notify_waiters();
        Ok(len)
    }

    async fn trim(&self, key: &str, start: i64, end: i64) -> Result<(), LinkError> {
        let queue = self.queue(key);
        let mut items = queue.items();
        let len = items.len() as i64;

        let start = resolve_index(start, len).max(0);
        let end = resolve_index(end, len).min(len - 1);

        if start > end {
            items.clear();
        } else {
            items.truncate(end as usize + 1);
            items.drain(..start as usize);
        }
        Ok(())
    }

    async fn push_capped(
        &self,
        key: &str,
        bytes: Vec<u8>,
        max: usize,
        drop: usize,
    ) -> Result<(usize, usize), LinkError> {
        let queue = self.queue(key);
        let (len, dropped) = {
            let mut items = queue.items();
            items.push_back(bytes);
            let dropped = if items.len() > max {
                let n = drop.min(items.len());
                items.drain(..n);
                n
            } else {
                0
            };
            (items.len(), dropped)
        };
        queue.pushed.notify_waiters();
        Ok((len, dropped))
    }

    async fn blocking_pop(&self, key: &str, timeout: Duration) -> Result<Option<Vec<u8>>, LinkError> {
        let queue = self.queue(key);
        let deadline = Instant::now() + timeout;

        loop {
            // Register for the wake-up before looking, so a push between the
            // check and the await is not missed.
            let notified = queue.pushed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let popped = queue.items().pop_front();
            if let Some(item) = popped {
                return Ok(Some(item));
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn len(&self, key: &str) -> Result<usize, LinkError> {
        Ok(self.queues.get(key).map_or(0, |q| q.items().len()))
    }
}

/// Redis-style index: negative values count from the end.
fn resolve_index(index: i64, len: i64) -> i64 {
    if index < 0 {
        len + index
    } else {
        index
    }
}

/// A user → device pairing edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Edge {
    user: PrincipalId,
    device: PrincipalId,
}

/// Volatile pairing edge store.
#[derive(Debug, Default)]
pub struct MemoryPairingStore {
    edges: Mutex<Vec<Edge>>,
}

impl MemoryPairingStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn edges(&self) -> MutexGuard<'_, Vec<Edge>> {
        self.edges.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl PairingStore for MemoryPairingStore {
    async fn create_edge(&self, user: PrincipalId, device: PrincipalId) -> Result<(), LinkError> {
        let mut edges = self.edges();
        if edges.iter().any(|e| e.device == device) {
            return Err(LinkError::AlreadyPaired { device });
        }
        edges.push(Edge { user, device });
        Ok(())
    }

    async fn remove_edge(&self, device: PrincipalId) -> Result<bool, LinkError> {
        let mut edges = self.edges();
        let before = edges.len();
        edges.retain(|e| e.device != device);
        Ok(edges.len() != before)
    }

    async fn find_owner(&self, device: PrincipalId) -> Result<Option<PrincipalId>, LinkError> {
        Ok(self
            .edges()
            .iter()
            .find(|e| e.device == device)
            .map(|e| e.user))
    }

    async fn find_devices(&self, user: PrincipalId) -> Result<Vec<PrincipalId>, LinkError> {
        Ok(self
            .edges()
            .iter()
            .filter(|e| e.user == user)
            .map(|e| e.device)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn drain(backend: &MemoryQueueBackend, key: &str) -> Vec<u8> {
        let mut out = Vec::new();
        while let Some(item) = backend.blocking_pop(key, Duration::ZERO).await.unwrap() {
            out.extend(item);
        }
        out
    }

    #[tokio::test]
    async fn push_returns_new_length_and_pops_fifo() {
        let backend = MemoryQueueBackend::new();
        assert_eq!(backend.push("q", vec![1]).await.unwrap(), 1);
        assert_eq!(backend.push("q", vec![2]).await.unwrap(), 2);
        assert_eq!(backend.push("q", vec![3]).await.unwrap(), 3);

        assert_eq!(drain(&backend, "q").await, vec![1, 2, 3]);
        assert_eq!(backend.len("q").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn keys_are_independent() {
        let backend = MemoryQueueBackend::new();
        backend.push("a", vec![1]).await.unwrap();
        backend.push("b", vec![2]).await.unwrap();

        assert_eq!(drain(&backend, "b").await, vec![2]);
        assert_eq!(backend.len("a").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn trim_keeps_inclusive_range_with_negative_end() {
        let backend = MemoryQueueBackend::new();
        for n in 0..10u8 {
            backend.push("q", vec![n]).await.unwrap();
        }

        backend.trim("q", 3, -1).await.unwrap();
        assert_eq!(drain(&backend, "q").await, vec![3, 4, 5, 6, 7, 8, 9]);
    }

    #[tokio::test]
    async fn trim_out_of_range_clears() {
        let backend = MemoryQueueBackend::new();
        backend.push("q", vec![1]).await.unwrap();
        backend.push("q", vec![2]).await.unwrap();

        backend.trim("q", 5, -1).await.unwrap();
        assert_eq!(backend.len("q").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn trim_middle_range() {
        let backend = MemoryQueueBackend::new();
        for n in 0..6u8 {
            backend.push("q", vec![n]).await.unwrap();
        }

        backend.trim("q", 1, 3).await.unwrap();
        assert_eq!(drain(&backend, "q").await, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn push_capped_drops_oldest_once_over_max() {
        let backend = MemoryQueueBackend::new();
        for n in 0..4u8 {
            assert_eq!(backend.push_capped("q", vec![n], 4, 2).await.unwrap(), (n as usize + 1, 0));
        }

        assert_eq!(backend.push_capped("q", vec![4], 4, 2).await.unwrap(), (3, 2));
        assert_eq!(drain(&backend, "q").await, vec![2, 3, 4]);
    }

    #[tokio::test(start_paused = true)]
    async fn blocking_pop_times_out_on_empty_queue() {
        let backend = MemoryQueueBackend::new();
        let started = Instant::now();

        let popped = backend.blocking_pop("q", Duration::from_secs(2)).await.unwrap();

        assert!(popped.is_none());
        assert!(started.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test]
    async fn blocking_pop_wakes_on_push() {
        let backend = Arc::new(MemoryQueueBackend::new());

        let consumer = {
            let backend = backend.clone();
            tokio::spawn(async move { backend.blocking_pop("q", Duration::from_secs(30)).await })
        };
        tokio::task::yield_now().await;

        backend.push("q", b"hello".to_vec()).await.unwrap();

        let popped = consumer.await.unwrap().unwrap();
        assert_eq!(popped.as_deref(), Some(&b"hello"[..]));
    }

    #[tokio::test]
    async fn pairing_edges() {
        let store = MemoryPairingStore::new();
        let user = PrincipalId::new(1);
        let phone = PrincipalId::new(2);
        let laptop = PrincipalId::new(3);

        store.create_edge(user, phone).await.unwrap();
        store.create_edge(user, laptop).await.unwrap();

        assert_eq!(store.find_owner(phone).await.unwrap(), Some(user));
        assert_eq!(store.find_devices(user).await.unwrap(), vec![phone, laptop]);
        assert!(matches!(
            store.create_edge(PrincipalId::new(9), phone).await,
            Err(LinkError::AlreadyPaired { device }) if device == phone
        ));

        assert!(store.remove_edge(phone).await.unwrap());
        assert!(!store.remove_edge(phone).await.unwrap());
        assert_eq!(store.find_owner(phone).await.unwrap(), None);
    }

    #[tokio::test]
    async fn same_network_rules() {
        let store = MemoryPairingStore::new();
        let alice = PrincipalId::new(1);
        let phone = PrincipalId::new(2);
        let laptop = PrincipalId::new(3);
        let bob = PrincipalId::new(4);
        let bobs_tv = PrincipalId::new(5);

        store.create_edge(alice, phone).await.unwrap();
        store.create_edge(alice, laptop).await.unwrap();
        store.create_edge(bob, bobs_tv).await.unwrap();

        assert!(store.same_network(alice, alice).await.unwrap());
        assert!(store.same_network(alice, phone).await.unwrap());
        assert!(store.same_network(phone, alice).await.unwrap());
        assert!(store.same_network(phone, laptop).await.unwrap());
        assert!(!store.same_network(alice, bob).await.unwrap());
        assert!(!store.same_network(phone, bobs_tv).await.unwrap());
        assert!(!store.same_network(alice, bobs_tv).await.unwrap());
    }
}
