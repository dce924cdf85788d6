//! Business rules on top of the pairing coordinator and the relay.
//!
//! [`LinkService`] is what the HTTP handlers and the session multiplexer
//! call. It checks roles, ownership, network membership and rate limits,
//! then delegates to [`PairingCoordinator`] or [`MessageRelay`].

use crate::auth::{Principal, PrincipalDirectory};
use crate::config::{ConfigError, Config};
use crate::error::{LinkError, Result};
use crate::limits::RateLimits;
use crate::pairing::{PairingCoordinator, PairingRequest, PairingState};
use crate::relay::MessageRelay;
use crate::server::LinkMetrics;
use crate::storage::{PairingStore, QueueBackend};
use link_types::{MessageKind, PrincipalId, RelayMessage, RequestId};
use serde::{Deserialize, Serialize};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

/// How a pairing requester names the device.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum DeviceRef {
    /// By principal id.
    Id(PrincipalId),
    /// By username.
    Username(String),
}

impl std::fmt::Display for DeviceRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceRef::Id(id) => write!(f, "device {id}"),
            DeviceRef::Username(name) => write!(f, "device {name:?}"),
        }
    }
}

/// Result of a pairing attempt, as seen by the requester.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PairingOutcome {
    /// The request that was sent.
    pub request_id: RequestId,
    /// The device asked.
    pub device: PrincipalId,
    /// Final state. Never `Pending`.
    pub state: PairingState,
}

/// Collaborators the service is built from.
pub struct Collaborators {
    /// Pairing edge storage.
    pub store: Arc<dyn PairingStore>,
    /// Principal lookups.
    pub directory: Arc<dyn PrincipalDirectory>,
    /// Relay queue storage.
    pub queues: Arc<dyn QueueBackend>,
}

/// Pairing and relay operations with their business rules applied.
pub struct LinkService {
    pairing: Arc<PairingCoordinator>,
    relay: MessageRelay,
    store: Arc<dyn PairingStore>,
    directory: Arc<dyn PrincipalDirectory>,
    limits: RateLimits,
    metrics: Arc<LinkMetrics>,
    response_wait: Duration,
    poll_timeout: Duration,
}

impl std::fmt::Debug for LinkService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkService")
            .field("pairing", &self.pairing)
            .field("relay", &self.relay)
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}

impl LinkService {
    /// Build the service from config and collaborators.
    pub fn new(
        config: &Config,
        collaborators: Collaborators,
        metrics: Arc<LinkMetrics>,
    ) -> std::result::Result<Self, ConfigError> {
        let Collaborators {
            store,
            directory,
            queues,
        } = collaborators;

        Ok(Self {
            pairing: Arc::new(PairingCoordinator::new(
                store.clone(),
                config.pairing.request_ttl(),
            )),
            relay: MessageRelay::new(queues, &config.relay),
            store,
            directory,
            limits: RateLimits::new(&config.limits)?,
            metrics,
            response_wait: config.pairing.response_wait(),
            poll_timeout: config.pairing.poll_timeout(),
        })
    }

    /// The pairing coordinator.
    pub fn pairing(&self) -> &Arc<PairingCoordinator> {
        &self.pairing
    }

    /// The message relay.
    pub fn relay(&self) -> &MessageRelay {
        &self.relay
    }

    /// The rate limiters.
    pub fn limits(&self) -> &RateLimits {
        &self.limits
    }

    /// Shared operational counters.
    pub fn metrics(&self) -> &LinkMetrics {
        &self.metrics
    }

    /// Ask a device to pair with `requester` and wait for its answer.
    ///
    /// Waits up to `pairing.response_wait_secs`. A request still pending
    /// after that is rejected, so the outcome is always terminal.
    pub async fn request_pairing(
        &self,
        requester: &Principal,
        device: DeviceRef,
    ) -> Result<PairingOutcome> {
        if requester.is_device {
            return Err(LinkError::forbidden("devices cannot request pairing"));
        }

        let target = match &device {
            DeviceRef::Id(id) => self.directory.lookup(*id).await?,
            DeviceRef::Username(name) => self.directory.find_by_username(name).await?,
        }
        .ok_or_else(|| LinkError::not_found(device.to_string()))?;

        if !target.is_device {
            return Err(LinkError::InvalidPairingTarget {
                reason: format!("{} is not a device", target.username),
            });
        }
        if self.store.find_owner(target.id).await?.is_some() {
            return Err(LinkError::AlreadyPaired { device: target.id });
        }

        let request = self.pairing.send_request(requester.clone(), target)?;
        self.metrics
            .pair_requests_total
            .fetch_add(1, Ordering::Relaxed);

        let mut state = self
            .pairing
            .wait_for_state_change(&request, self.response_wait)
            .await;
        if state == PairingState::Pending {
            // TTL longer than our wait. A concurrent response may still win.
            let _ = self.pairing.reject(request.id());
            state = request.state();
        }
        if state == PairingState::Rejected && self.pairing.is_shut_down() {
            return Err(LinkError::Cancelled);
        }
        if state == PairingState::Accepted {
            self.metrics.pairings_total.fetch_add(1, Ordering::Relaxed);
        }

        Ok(PairingOutcome {
            request_id: request.id(),
            device: request.target().id,
            state,
        })
    }

    /// Pending requests for a device, long-polling if there are none.
    pub async fn pending_for_device(
        &self,
        device: &Principal,
        timeout: Option<Duration>,
    ) -> Result<Vec<Arc<PairingRequest>>> {
        if !device.is_device {
            return Err(LinkError::forbidden("only devices receive pairing requests"));
        }
        let timeout = timeout.unwrap_or(self.poll_timeout);
        self.pairing.list_pending_for(device.id, timeout).await
    }

    /// Accept or reject a request addressed to `device`.
    pub async fn respond(
        &self,
        device: &Principal,
        request_id: RequestId,
        accept: bool,
    ) -> Result<Arc<PairingRequest>> {
        let request = self.pairing.get_by_id(request_id)?;
        if request.target().id != device.id {
            return Err(LinkError::forbidden(
                "only the target device may respond to a pairing request",
            ));
        }

        if accept {
            self.pairing.accept(request_id).await
        } else {
            self.pairing.reject(request_id)
        }
    }

    /// The user that owns `device`, if paired.
    pub async fn owner_of(&self, device: &Principal) -> Result<Option<Principal>> {
        if !device.is_device {
            return Err(LinkError::forbidden("only devices have owners"));
        }
        match self.store.find_owner(device.id).await? {
            Some(owner) => self.directory.lookup(owner).await,
            None => Ok(None),
        }
    }

    /// Devices paired to `user`.
    pub async fn devices_of(&self, user: &Principal) -> Result<Vec<Principal>> {
        if user.is_device {
            return Err(LinkError::forbidden("devices do not own devices"));
        }
        let mut devices = Vec::new();
        for id in self.store.find_devices(user.id).await? {
            match self.directory.lookup(id).await? {
                Some(device) => devices.push(device),
                None => tracing::warn!("Paired device {} is not in the directory", id),
            }
        }
        Ok(devices)
    }

    /// Remove the pairing of `device`.
    ///
    /// Allowed for the owning user and for the device itself.
    pub async fn unpair(&self, caller: &Principal, device: PrincipalId) -> Result<()> {
        let owner = self
            .store
            .find_owner(device)
            .await?
            .ok_or_else(|| LinkError::not_found(format!("pairing for device {device}")))?;
        if caller.id != owner && caller.id != device {
            return Err(LinkError::forbidden("not the owner of this device"));
        }

        self.store.remove_edge(device).await?;
        tracing::info!("Device {} unpaired from {} by {}", device, owner, caller.id);
        Ok(())
    }

    /// Queue a message for `recipient`.
    ///
    /// The recipient must exist and share a network with the sender.
    pub async fn publish_message(
        &self,
        sender: &Principal,
        recipient: PrincipalId,
        kind: MessageKind,
        correlation_id: String,
        data: serde_json::Value,
    ) -> Result<()> {
        let limited = self
            .limits
            .check_global()
            .and_then(|()| self.limits.check_message(sender.id));
        if let Err(e) = limited {
            tracing::warn!("Publish from {} rate limited: {}", sender.id, e);
            self.metrics.rate_limit_hits.fetch_add(1, Ordering::Relaxed);
            return Err(LinkError::RateLimited {
                reason: e.to_string(),
            });
        }

        if self.directory.lookup(recipient).await?.is_none() {
            return Err(LinkError::not_found(format!("principal {recipient}")));
        }
        if !self.store.same_network(sender.id, recipient).await? {
            return Err(LinkError::CrossNetwork);
        }

        let message = RelayMessage::new(kind, correlation_id, sender.id, recipient, data);
        self.relay.publish(recipient, &message).await?;
        self.metrics
            .messages_published_total
            .fetch_add(1, Ordering::Relaxed);

        tracing::debug!(
            "Queued {:?} {} from {} to {}",
            message.kind,
            message.correlation_id,
            sender.id,
            recipient
        );
        Ok(())
    }
}
