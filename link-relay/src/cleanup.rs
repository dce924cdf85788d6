//! Background cleanup task for idle rate limiter entries.
//!
//! The keyed limiter holds one cell per sender it has ever seen. This task
//! periodically evicts the cells that have fully recharged.

use crate::limits::RateLimits;
use std::time::Duration;
use tokio::time::interval;

/// Spawn a background cleanup task.
///
/// Returns a handle that can be used to abort the task.
pub fn spawn_cleanup_task(limits: RateLimits, every: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!("Cleanup task started (interval: {}s)", every.as_secs());

        let mut timer = interval(every);
        // The first tick completes immediately.
        timer.tick().await;

        loop {
            timer.tick().await;

            let before = limits.message_keys_count();
            limits.shrink();
            let after = limits.message_keys_count();
            if before > after {
                tracing::info!("Cleanup: evicted {} idle senders", before - after);
            } else {
                tracing::debug!("Cleanup: no idle senders");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LimitsConfig;
    use link_types::PrincipalId;

    #[tokio::test]
    async fn cleanup_task_keeps_running_until_aborted() {
        let limits = RateLimits::new(&LimitsConfig::default()).unwrap();
        let _ = limits.check_message(PrincipalId::new(1));

        let handle = spawn_cleanup_task(limits.clone(), Duration::from_millis(5));
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(!handle.is_finished());
        assert!(limits.check_message(PrincipalId::new(1)).is_ok());

        handle.abort();
        assert!(handle.await.unwrap_err().is_cancelled());
    }
}
