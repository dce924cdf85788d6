//! Keyed store with async wake-ups.
//!
//! [`WaitableRegistry`] lets one task publish a value for a key while any
//! number of other tasks wait for the next value of that key (or of any key).
//! It is the rendezvous point behind pairing-request delivery.
//!
//! ## Guarantees
//!
//! - `set` stores the value and resolves matching waiters under one lock, so
//!   a waiter registered before `set` returns can never miss the value.
//! - Waiters for one key (and global waiters) are resolved in registration
//!   order.
//! - A waiter whose filter rejects a value stays registered for the next one.
//! - Dropping a `wait_for` future (task abort, `select!` losing branch,
//!   timeout) deregisters its waiter before the drop returns.

use crate::error::{LinkError, Result};
use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::oneshot;

/// Predicate applied to candidate values before a waiter is woken.
pub type Filter<V> = Arc<dyn Fn(&V) -> bool + Send + Sync>;

/// What a waiter is waiting on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitTarget<K> {
    /// The next value set for this key.
    Keyed(K),
    /// The next value set for any key.
    Global,
}

/// Result of [`WaitableRegistry::wait_for`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome<V> {
    /// A matching value.
    Value(V),
    /// The timeout elapsed first.
    Empty,
    /// The registry was shut down while waiting.
    Cancelled,
}

impl<V> WaitOutcome<V> {
    /// Transform the carried value.
    pub fn map<U>(self, f: impl FnOnce(V) -> U) -> WaitOutcome<U> {
        match self {
            WaitOutcome::Value(v) => WaitOutcome::Value(f(v)),
            WaitOutcome::Empty => WaitOutcome::Empty,
            WaitOutcome::Cancelled => WaitOutcome::Cancelled,
        }
    }

    /// The value, if one arrived.
    pub fn into_value(self) -> Option<V> {
        match self {
            WaitOutcome::Value(v) => Some(v),
            WaitOutcome::Empty | WaitOutcome::Cancelled => None,
        }
    }

    /// The value, with `Empty` as [`LinkError::Timeout`] and `Cancelled` as
    /// [`LinkError::Cancelled`].
    pub fn into_result(self) -> Result<V> {
        match self {
            WaitOutcome::Value(v) => Ok(v),
            WaitOutcome::Empty => Err(LinkError::Timeout),
            WaitOutcome::Cancelled => Err(LinkError::Cancelled),
        }
    }
}

struct Waiter<V> {
    id: u64,
    filter: Option<Filter<V>>,
    tx: oneshot::Sender<V>,
}

impl<V> Waiter<V> {
    fn accepts(&self, value: &V) -> bool {
        self.filter.as_ref().map_or(true, |f| f(value))
    }
}

struct Inner<K, V> {
    values: HashMap<K, V>,
    keyed: HashMap<K, VecDeque<Waiter<V>>>,
    global: VecDeque<Waiter<V>>,
    next_waiter_id: u64,
    closed: bool,
}

impl<K: Eq + Hash + Clone, V> Inner<K, V> {
    fn register(
        &mut self,
        target: &WaitTarget<K>,
        filter: Option<Filter<V>>,
    ) -> (u64, oneshot::Receiver<V>) {
        let id = self.next_waiter_id;
        self.next_waiter_id += 1;

        let (tx, rx) = oneshot::channel();
        let waiter = Waiter { id, filter, tx };
        match target {
            WaitTarget::Keyed(key) => self.keyed.entry(key.clone()).or_default().push_back(waiter),
            WaitTarget::Global => self.global.push_back(waiter),
        }
        (id, rx)
    }
}

/// A keyed value store whose readers can wait for future writes.
pub struct WaitableRegistry<K, V> {
    inner: Mutex<Inner<K, V>>,
}

impl<K, V> std::fmt::Debug for WaitableRegistry<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        f.debug_struct("WaitableRegistry")
            .field("values", &inner.values.len())
            .field("keyed_waiters", &inner.keyed.values().map(VecDeque::len).sum::<usize>())
            .field("global_waiters", &inner.global.len())
            .field("closed", &inner.closed)
            .finish()
    }
}

impl<K, V> Default for WaitableRegistry<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> WaitableRegistry<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                values: HashMap::new(),
                keyed: HashMap::new(),
                global: VecDeque::new(),
                next_waiter_id: 0,
                closed: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<K, V>> {
        // Critical sections never panic midway, so a poisoned lock still
        // holds consistent state.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Store `value` under `key` and wake matching waiters.
    pub fn set(&self, key: K, value: V) {
        let mut guard = self.lock();
        let inner = &mut *guard;

        inner.values.insert(key.clone(), value.clone());

        let drained = match inner.keyed.get_mut(&key) {
            Some(waiters) => {
                wake_matching(waiters, &value);
                waiters.is_empty()
            }
            None => false,
        };
        if drained {
            inner.keyed.remove(&key);
        }

        wake_matching(&mut inner.global, &value);
    }

    /// Current value for `key`, without waiting.
    pub fn get(&self, key: &K) -> Option<V> {
        self.lock().values.get(key).cloned()
    }

    /// Remove the value for `key`. Waiters are not woken.
    pub fn remove(&self, key: &K) -> Option<V> {
        self.lock().values.remove(key)
    }

    /// Snapshot of all current values accepted by `pred`.
    pub fn values_matching(&self, pred: impl Fn(&V) -> bool) -> Vec<V> {
        self.lock()
            .values
            .values()
            .filter(|v| pred(*v))
            .cloned()
            .collect()
    }

    /// Number of stored values.
    pub fn len(&self) -> usize {
        self.lock().values.len()
    }

    /// Whether no values are stored.
    pub fn is_empty(&self) -> bool {
        self.lock().values.is_empty()
    }

    /// Number of outstanding waiters for `target`.
    pub fn waiter_count(&self, target: &WaitTarget<K>) -> usize {
        let inner = self.lock();
        match target {
            WaitTarget::Keyed(key) => inner.keyed.get(key).map_or(0, VecDeque::len),
            WaitTarget::Global => inner.global.len(),
        }
    }

    /// Wait for a value matching `target` and `filter`.
    ///
    /// A keyed wait whose key already holds an accepted value returns it
    /// without suspending. Otherwise the call suspends until a matching
    /// `set`, until `timeout` elapses ([`WaitOutcome::Empty`]), or until the
    /// registry is shut down ([`WaitOutcome::Cancelled`]).
    pub async fn wait_for(
        &self,
        target: WaitTarget<K>,
        filter: Option<Filter<V>>,
        timeout: Option<Duration>,
    ) -> WaitOutcome<V> {
        let (id, rx) = {
            let mut inner = self.lock();

            if inner.closed {
                return WaitOutcome::Cancelled;
            }

            if let WaitTarget::Keyed(key) = &target {
                if let Some(value) = inner.values.get(key) {
                    if filter.as_ref().map_or(true, |f| f(value)) {
                        return WaitOutcome::Value(value.clone());
                    }
                }
            }

            inner.register(&target, filter)
        };

        let _registration = Registration {
            registry: self,
            target: &target,
            id,
        };
        receive(rx, timeout).await
    }

    /// Every current value accepted by `filter`, or else the next one set.
    ///
    /// The snapshot and the registration happen under one lock, so a value
    /// set between "nothing matches" and "start waiting" is not missed.
    pub async fn current_or_next(
        &self,
        filter: Filter<V>,
        timeout: Option<Duration>,
    ) -> WaitOutcome<Vec<V>> {
        let target = WaitTarget::Global;
        let (id, rx) = {
            let mut inner = self.lock();

            if inner.closed {
                return WaitOutcome::Cancelled;
            }

            let current: Vec<V> = inner.values.values().filter(|v| filter(*v)).cloned().collect();
            if !current.is_empty() {
                return WaitOutcome::Value(current);
            }

            inner.register(&target, Some(filter))
        };

        let _registration = Registration {
            registry: self,
            target: &target,
            id,
        };
        receive(rx, timeout).await.map(|value| vec![value])
    }

    /// Whether [`shutdown`](Self::shutdown) has run.
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Drop every waiter; pending and future waits resolve to `Cancelled`.
    pub fn shutdown(&self) {
        let mut inner = self.lock();
        inner.closed = true;
        inner.keyed.clear();
        inner.global.clear();
    }

    fn deregister(&self, target: &WaitTarget<K>, id: u64) {
        let mut guard = self.lock();
        let inner = &mut *guard;
        match target {
            WaitTarget::Keyed(key) => {
                let drained = match inner.keyed.get_mut(key) {
                    Some(waiters) => {
                        waiters.retain(|w| w.id != id);
                        waiters.is_empty()
                    }
                    None => false,
                };
                if drained {
                    inner.keyed.remove(key);
                }
            }
            WaitTarget::Global => inner.global.retain(|w| w.id != id),
        }
    }
}

async fn receive<V>(rx: oneshot::Receiver<V>, timeout: Option<Duration>) -> WaitOutcome<V> {
    let received = match timeout {
        Some(limit) => match tokio::time::timeout(limit, rx).await {
            Ok(received) => received,
            Err(_) => return WaitOutcome::Empty,
        },
        None => rx.await,
    };

    match received {
        Ok(value) => WaitOutcome::Value(value),
        // Sender dropped by `shutdown`.
        Err(_) => WaitOutcome::Cancelled,
    }
}

/// Resolve, in order, every waiter that accepts `value`; keep the rest.
fn wake_matching<V: Clone>(waiters: &mut VecDeque<Waiter<V>>, value: &V) {
    let mut kept = VecDeque::with_capacity(waiters.len());
    while let Some(waiter) = waiters.pop_front() {
        if waiter.tx.is_closed() {
            continue;
        }
        if waiter.accepts(value) {
            // The receiver can only be gone if its future is mid-drop.
            let _ = waiter.tx.send(value.clone());
        } else {
            kept.push_back(waiter);
        }
    }
    *waiters = kept;
}

/// Removes a waiter when its `wait_for` future finishes or is dropped.
struct Registration<'a, K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    registry: &'a WaitableRegistry<K, V>,
    target: &'a WaitTarget<K>,
    id: u64,
}

impl<K, V> Drop for Registration<'_, K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn drop(&mut self) {
        self.registry.deregister(self.target, self.id);
    }
}
