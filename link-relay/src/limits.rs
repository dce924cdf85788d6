//! Rate limiting for relay publishes.
//!
//! Two limiters guard [`LinkService::publish_message`](crate::service::LinkService::publish_message):
//! - a keyed limiter per sending [`PrincipalId`] (messages per minute)
//! - a direct limiter across all senders (requests per second)
//!
//! Both use the governor crate; the keyed one is backed by DashMap.

use crate::config::{ConfigError, LimitsConfig};
use governor::clock::DefaultClock;
use governor::middleware::NoOpMiddleware;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use link_types::PrincipalId;
use std::num::NonZeroU32;
use std::sync::Arc;

/// Type alias for a keyed rate limiter using DashMap.
type KeyedLimiter<K> = RateLimiter<
    K,
    dashmap::DashMap<K, InMemoryState>,
    DefaultClock,
    NoOpMiddleware<governor::clock::QuantaInstant>,
>;

/// Type alias for a direct (non-keyed) rate limiter.
type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Rate limiters for relay publishes.
#[derive(Clone)]
pub struct RateLimits {
    /// Limits publishes per sender.
    message_limiter: Arc<KeyedLimiter<PrincipalId>>,

    /// Caps aggregate publish throughput even when every sender is within
    /// its own quota.
    global_limiter: Arc<DirectLimiter>,
}

impl std::fmt::Debug for RateLimits {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimits")
            .field("message_limiter", &"KeyedLimiter<PrincipalId>")
            .field("global_limiter", &"DirectLimiter")
            .finish()
    }
}

impl RateLimits {
    /// Create rate limiters from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if a configured rate is zero.
    pub fn new(config: &LimitsConfig) -> Result<Self, ConfigError> {
        let messages_per_minute = NonZeroU32::new(config.messages_per_minute)
            .ok_or_else(|| ConfigError::Invalid("limits.messages_per_minute must be > 0".into()))?;
        let global_rps = NonZeroU32::new(config.global_requests_per_second).ok_or_else(|| {
            ConfigError::Invalid("limits.global_requests_per_second must be > 0".into())
        })?;

        Ok(Self {
            message_limiter: Arc::new(RateLimiter::keyed(Quota::per_minute(messages_per_minute))),
            global_limiter: Arc::new(RateLimiter::direct(Quota::per_second(global_rps))),
        })
    }

    /// Check if `sender` may publish another message.
    pub fn check_message(&self, sender: PrincipalId) -> Result<(), RateLimitError> {
        self.message_limiter
            .check_key(&sender)
            .map_err(|_| RateLimitError::MessageLimitExceeded)
    }

    /// Check if the global publish rate is within limits.
    pub fn check_global(&self) -> Result<(), RateLimitError> {
        self.global_limiter
            .check()
            .map_err(|_| RateLimitError::GlobalLimitExceeded)
    }

    /// Number of tracked sender keys (for metrics).
    pub fn message_keys_count(&self) -> usize {
        self.message_limiter.len()
    }

    /// Evict idle senders from the keyed limiter.
    ///
    /// `retain_recent()` removes entries whose cells have fully recharged.
    pub fn shrink(&self) {
        self.message_limiter.retain_recent();
    }
}

/// Rate limit error types.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RateLimitError {
    /// Too many messages from this sender.
    #[error("message rate limit exceeded")]
    MessageLimitExceeded,
    /// Global publish rate exceeded across all senders.
    #[error("global rate limit exceeded")]
    GlobalLimitExceeded,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits(messages_per_minute: u32, global_requests_per_second: u32) -> RateLimits {
        RateLimits::new(&LimitsConfig {
            messages_per_minute,
            global_requests_per_second,
            ..LimitsConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn message_limit_allows_within_quota() {
        let limits = limits(5, 1000);
        let sender = PrincipalId::new(1);

        for _ in 0..5 {
            assert!(limits.check_message(sender).is_ok());
        }
        assert_eq!(
            limits.check_message(sender),
            Err(RateLimitError::MessageLimitExceeded)
        );
        assert_eq!(limits.message_keys_count(), 1);
    }

    #[test]
    fn different_senders_have_independent_limits() {
        let limits = limits(2, 1000);
        let a = PrincipalId::new(1);
        let b = PrincipalId::new(2);

        assert!(limits.check_message(a).is_ok());
        assert!(limits.check_message(a).is_ok());
        assert!(limits.check_message(a).is_err());

        assert!(limits.check_message(b).is_ok());
        assert!(limits.check_message(b).is_ok());
        assert!(limits.check_message(b).is_err());
    }

    #[test]
    fn global_rate_limiter_rejects_excess() {
        let limits = limits(100, 5);

        for _ in 0..5 {
            assert!(limits.check_global().is_ok());
        }
        assert_eq!(
            limits.check_global(),
            Err(RateLimitError::GlobalLimitExceeded)
        );
    }

    #[test]
    fn zero_rates_are_rejected() {
        let zero_messages = RateLimits::new(&LimitsConfig {
            messages_per_minute: 0,
            global_requests_per_second: 10,
            ..LimitsConfig::default()
        });
        assert!(matches!(zero_messages, Err(ConfigError::Invalid(_))));

        let zero_global = RateLimits::new(&LimitsConfig {
            messages_per_minute: 10,
            global_requests_per_second: 0,
            ..LimitsConfig::default()
        });
        assert!(matches!(zero_global, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn shrink_keeps_limiter_usable() {
        let limits = limits(10, 1000);
        let _ = limits.check_message(PrincipalId::new(1));

        limits.shrink();

        assert!(limits.check_message(PrincipalId::new(1)).is_ok());
    }

    #[test]
    fn rate_limit_error_display() {
        assert_eq!(
            RateLimitError::MessageLimitExceeded.to_string(),
            "message rate limit exceeded"
        );
        assert_eq!(
            RateLimitError::GlobalLimitExceeded.to_string(),
            "global rate limit exceeded"
        );
    }
}
