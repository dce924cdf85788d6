//! Pairing request lifecycle.
//!
//! A [`PairingRequest`] is created `Pending` and ends `Accepted` or
//! `Rejected`, either by an explicit response from the target device or by
//! its TTL timer. Only live (pending) requests are held by the
//! [`PairingCoordinator`]; anyone holding an `Arc<PairingRequest>` still sees
//! the terminal state after it has been retired.
//!
//! ## State machine
//!
//! ```text
//!   Pending ──accept──► Accepted
//!      │
//!      ├──reject──────► Rejected
//!      └──ttl─────────► Rejected
//! ```
//!
//! Retiring a request removes it from the live registry first. Whoever
//! removes it owns the transition, so concurrent accept/reject/expiry calls
//! resolve to "first one wins" and an edge is recorded at most once.

use crate::auth::Principal;
use crate::error::{LinkError, Result};
use crate::registry::{Filter, WaitableRegistry};
use crate::storage::PairingStore;
use link_types::{PrincipalId, RequestId};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// State of a pairing request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PairingState {
    /// Waiting for the device to respond.
    Pending,
    /// The device accepted; an edge was recorded.
    Accepted,
    /// The device rejected, the TTL elapsed, or the edge could not be recorded.
    Rejected,
}

/// A request from a user to pair with a device.
#[derive(Debug)]
pub struct PairingRequest {
    id: RequestId,
    requester: Principal,
    target: Principal,
    created_at: i64,
    state: watch::Sender<PairingState>,
}

impl PairingRequest {
    fn new(requester: Principal, target: Principal) -> Self {
        let created_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        let (state, _) = watch::channel(PairingState::Pending);
        Self {
            id: RequestId::new(),
            requester,
            target,
            created_at,
            state,
        }
    }

    /// Request id.
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// The user asking to pair.
    pub fn requester(&self) -> &Principal {
        &self.requester
    }

    /// The device being asked.
    pub fn target(&self) -> &Principal {
        &self.target
    }

    /// Unix timestamp (seconds) of creation.
    pub fn created_at(&self) -> i64 {
        self.created_at
    }

    /// Current state.
    pub fn state(&self) -> PairingState {
        *self.state.borrow()
    }

    /// Whether the request is still pending.
    pub fn is_pending(&self) -> bool {
        self.state() == PairingState::Pending
    }

    /// Move out of `Pending`. Returns false if already terminal.
    fn transition(&self, to: PairingState) -> bool {
        self.state.send_if_modified(|state| {
            if *state == PairingState::Pending {
                *state = to;
                true
            } else {
                false
            }
        })
    }

    /// Resolves once the request is no longer pending.
    async fn settled(&self) {
        let mut rx = self.state.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|state| *state != PairingState::Pending).await;
    }
}

/// Rejects a claimed request if its owner is dropped before settling it.
struct RejectOnDrop<'a>(&'a PairingRequest);

impl Drop for RejectOnDrop<'_> {
    fn drop(&mut self) {
        self.0.transition(PairingState::Rejected);
    }
}

/// Owns all live pairing requests and their TTL timers.
pub struct PairingCoordinator {
    live: WaitableRegistry<RequestId, Arc<PairingRequest>>,
    timers: Mutex<HashMap<RequestId, JoinHandle<()>>>,
    store: Arc<dyn PairingStore>,
    ttl: Duration,
}

impl std::fmt::Debug for PairingCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PairingCoordinator")
            .field("live", &self.live)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl PairingCoordinator {
    /// Create a coordinator recording accepted pairings in `store`.
    pub fn new(store: Arc<dyn PairingStore>, ttl: Duration) -> Self {
        Self {
            live: WaitableRegistry::new(),
            timers: Mutex::new(HashMap::new()),
            store,
            ttl,
        }
    }

    fn timers(&self) -> MutexGuard<'_, HashMap<RequestId, JoinHandle<()>>> {
        self.timers.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Create a pending request and start its TTL timer.
    ///
    /// Wakes any device blocked in [`list_pending_for`](Self::list_pending_for)
    /// for `target`. Must be called from within a tokio runtime.
    pub fn send_request(
        self: &Arc<Self>,
        requester: Principal,
        target: Principal,
    ) -> Result<Arc<PairingRequest>> {
        if requester.is_device {
            return Err(LinkError::InvalidPairingTarget {
                reason: "requester must not be a device".into(),
            });
        }
        if !target.is_device {
            return Err(LinkError::InvalidPairingTarget {
                reason: format!("{} is not a device", target.username),
            });
        }

        if self.live.is_closed() {
            return Err(LinkError::Cancelled);
        }

        let request = Arc::new(PairingRequest::new(requester, target));
        let id = request.id();
        self.live.set(id, Arc::clone(&request));

        let coordinator = Arc::downgrade(self);
        let ttl = self.ttl;
        // `expire` takes this lock too, so it cannot run before the insert.
        let mut timers = self.timers();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            expire(coordinator, id);
        });
        timers.insert(id, timer);
        drop(timers);

        tracing::info!(
            "Pairing request {} from {} to device {}",
            id,
            request.requester().id,
            request.target().id
        );
        Ok(request)
    }

    /// The live request with this id.
    pub fn get_by_id(&self, id: RequestId) -> Result<Arc<PairingRequest>> {
        self.live
            .get(&id)
            .ok_or_else(|| LinkError::not_found(format!("pairing request {id}")))
    }

    /// Accept a live request and record the pairing edge.
    ///
    /// If the edge cannot be recorded the request ends `Rejected` and the
    /// store's error is returned. The edge write runs on its own task, so
    /// dropping this future once the request is claimed still settles it
    /// from the write's outcome.
    pub async fn accept(&self, id: RequestId) -> Result<Arc<PairingRequest>> {
        let request = self.claim(id)?;
        let store = Arc::clone(&self.store);
        let settling = Arc::clone(&request);

        let write = tokio::spawn(async move {
            let guard = RejectOnDrop(&settling);
            let user = settling.requester().id;
            let device = settling.target().id;
            let recorded = store.create_edge(user, device).await;
            match &recorded {
                Ok(()) => {
                    settling.transition(PairingState::Accepted);
                    tracing::info!("Pairing request {} accepted: {} owns {}", id, user, device);
                }
                Err(e) => tracing::warn!("Pairing request {} could not be recorded: {}", id, e),
            }
            drop(guard);
            recorded
        });

        match write.await {
            Ok(recorded) => recorded.map(|()| request),
            Err(e) => {
                tracing::error!("Edge write for pairing request {} failed: {}", id, e);
                request.transition(PairingState::Rejected);
                Err(LinkError::Cancelled)
            }
        }
    }

    /// Reject a live request.
    pub fn reject(&self, id: RequestId) -> Result<Arc<PairingRequest>> {
        let request = self.claim(id)?;
        request.transition(PairingState::Rejected);
        tracing::info!("Pairing request {} rejected", id);
        Ok(request)
    }

    /// All pending requests for `target`, or the next one to arrive.
    ///
    /// Returns an empty list if nothing arrives within `timeout`, and
    /// [`LinkError::Cancelled`] once the coordinator is shut down.
    pub async fn list_pending_for(
        &self,
        target: PrincipalId,
        timeout: Duration,
    ) -> Result<Vec<Arc<PairingRequest>>> {
        let filter: Filter<Arc<PairingRequest>> =
            Arc::new(move |request: &Arc<PairingRequest>| {
                request.target().id == target && request.is_pending()
            });

        let mut pending = match self
            .live
            .current_or_next(filter, Some(timeout))
            .await
            .into_result()
        {
            Ok(pending) => pending,
            Err(LinkError::Timeout) => Vec::new(),
            Err(e) => return Err(e),
        };
        pending.sort_by_key(|request| request.created_at());
        Ok(pending)
    }

    /// Wait up to `timeout` for `request` to leave `Pending`.
    ///
    /// Returns the state observed afterwards; a timeout is not an error.
    pub async fn wait_for_state_change(
        &self,
        request: &PairingRequest,
        timeout: Duration,
    ) -> PairingState {
        let _ = tokio::time::timeout(timeout, request.settled()).await;
        request.state()
    }

    /// Number of pending requests.
    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    /// Whether [`shutdown`](Self::shutdown) has run.
    pub fn is_shut_down(&self) -> bool {
        self.live.is_closed()
    }

    /// Abort every TTL timer, reject what is still pending and release
    /// all waiters.
    pub fn shutdown(&self) {
        for (_, timer) in self.timers().drain() {
            timer.abort();
        }
        for request in self.live.values_matching(|_| true) {
            if self.live.remove(&request.id()).is_some() {
                request.transition(PairingState::Rejected);
            }
        }
        self.live.shutdown();
    }

    /// Take ownership of a live request's transition.
    fn claim(&self, id: RequestId) -> Result<Arc<PairingRequest>> {
        let request = self
            .live
            .remove(&id)
            .ok_or_else(|| LinkError::not_found(format!("pairing request {id}")))?;
        if let Some(timer) = self.timers().remove(&id) {
            timer.abort();
        }
        Ok(request)
    }

    #[cfg(test)]
    fn timer_count(&self) -> usize {
        self.timers().len()
    }
}

fn expire(coordinator: Weak<PairingCoordinator>, id: RequestId) {
    let Some(coordinator) = coordinator.upgrade() else {
        return;
    };
    // Drop our own handle first so `claim` does not abort this task.
    coordinator.timers().remove(&id);

    if coordinator.reject(id).is_ok() {
        tracing::info!("Pairing request {} expired", id);
    }
}
