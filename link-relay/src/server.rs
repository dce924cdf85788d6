//! Top-level server state.
//!
//! [`PairLink`] owns everything a request handler needs: configuration,
//! the [`LinkService`], the authenticator and the session multiplexer.

use crate::auth::{Authenticator, Principal, PrincipalDirectory};
use crate::config::{Config, ConfigError};
use crate::service::{Collaborators, LinkService};
use crate::session::SessionMultiplexer;
use crate::storage::{PairingStore, QueueBackend};
use crate::transport::{SessionTransport, TransportError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Operational metrics for monitoring pairing and relay activity.
///
/// Counters are monotonically increasing (reset only on restart).
/// `active_sessions` is a gauge.
#[derive(Debug, Default)]
pub struct LinkMetrics {
    /// Pairing requests sent to a device.
    pub pair_requests_total: AtomicU64,
    /// Pairing requests that ended accepted.
    pub pairings_total: AtomicU64,
    /// Relay messages queued.
    pub messages_published_total: AtomicU64,
    /// Relay messages handed to a live session.
    pub messages_delivered_total: AtomicU64,
    /// Sessions started.
    pub sessions_total: AtomicU64,
    /// Sessions currently running.
    pub active_sessions: AtomicU64,
    /// Total rate limit rejections (per sender + global).
    pub rate_limit_hits: AtomicU64,
    /// Sessions that ended on a transport error.
    pub errors_total: AtomicU64,
}

impl LinkMetrics {
    /// Sessions currently running.
    pub fn active_sessions(&self) -> u64 {
        self.active_sessions.load(Ordering::Relaxed)
    }
}

/// Main server state.
pub struct PairLink {
    config: Config,
    service: Arc<LinkService>,
    authenticator: Arc<dyn Authenticator>,
    sessions: SessionMultiplexer,
    metrics: Arc<LinkMetrics>,
}

impl std::fmt::Debug for PairLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PairLink")
            .field("config", &self.config)
            .field("service", &self.service)
            .field("metrics", &self.metrics)
            .finish_non_exhaustive()
    }
}

impl PairLink {
    /// Assemble the server from config and its storage collaborators.
    ///
    /// `auth` both authenticates bearer tokens and resolves principals.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if the rate limits cannot be built.
    pub fn new<A>(
        config: Config,
        store: Arc<dyn PairingStore>,
        queues: Arc<dyn QueueBackend>,
        auth: Arc<A>,
    ) -> Result<Self, ConfigError>
    where
        A: Authenticator + PrincipalDirectory + 'static,
    {
        let metrics = Arc::new(LinkMetrics::default());
        let service = Arc::new(LinkService::new(
            &config,
            Collaborators {
                store,
                directory: auth.clone(),
                queues,
            },
            metrics.clone(),
        )?);
        let sessions = SessionMultiplexer::new(service.clone(), config.relay.consume_timeout());

        Ok(Self {
            config,
            service,
            authenticator: auth,
            sessions,
            metrics,
        })
    }

    /// Get the server configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Pairing and relay operations.
    pub fn service(&self) -> &Arc<LinkService> {
        &self.service
    }

    /// Bearer token authentication.
    pub fn authenticator(&self) -> &dyn Authenticator {
        self.authenticator.as_ref()
    }

    /// Session runner for upgraded connections.
    pub fn sessions(&self) -> &SessionMultiplexer {
        &self.sessions
    }

    /// Get access to the operational metrics.
    pub fn metrics(&self) -> &LinkMetrics {
        &self.metrics
    }

    /// Run a relay session for an authenticated principal.
    pub async fn run_session<T: SessionTransport>(
        &self,
        transport: T,
        principal: Principal,
    ) -> Result<(), TransportError> {
        self.sessions.run_session(transport, principal).await
    }

    /// Cancel pending pairing requests and wake every waiter.
    pub fn shutdown(&self) {
        tracing::info!(
            "Shutting down with {} pending pairing requests",
            self.service.pairing().live_count()
        );
        self.service.pairing().shutdown();
    }
}
