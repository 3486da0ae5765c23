//! Bounded reconnection for disconnected handles
//!
//! Capped exponential backoff: the delay before attempt `n` is
//! `initial * multiplier^n`, clamped to `max`. The loop stops when the handle
//! reconnects, when `max_attempts` is exhausted, or when shutdown is signalled.

use super::errors::CacheError;
use super::handle::BackendHandle;
use super::traits::BackendStore;
use crate::config::ReconnectConfig;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Backoff schedule for reconnect attempts
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
    /// `None` retries until shutdown, still rate-limited by `max_backoff`
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from(&ReconnectConfig::default())
    }
}

impl From<&ReconnectConfig> for ReconnectPolicy {
    fn from(config: &ReconnectConfig) -> Self {
        Self {
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
            multiplier: config.multiplier,
            max_attempts: config.max_attempts,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before the zero-based `attempt`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.max(1.0).powi(attempt.min(64) as i32);
        let millis = self.initial_backoff.as_millis() as f64 * factor;
        let capped = millis.min(self.max_backoff.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }

    fn exhausted(&self, attempts: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempts >= max)
    }
}

/// Retry `handle.connect()` on the policy's schedule.
///
/// Returns true once the handle is connected again, false if attempts ran
/// out or shutdown was requested first. A connect that completes after
/// shutdown is closed again and counts as false.
pub(crate) async fn reconnect_with_backoff(
    handle: &BackendHandle,
    policy: &ReconnectPolicy,
    mut shutdown: watch::Receiver<bool>,
) -> bool {
    let role = handle.role();
    let mut attempt: u32 = 0;

    loop {
        if *shutdown.borrow() {
            return false;
        }
        if policy.exhausted(attempt) {
            warn!(role = %role, attempts = attempt, "Giving up reconnecting cache backend");
            return false;
        }

        let delay = policy.delay_for(attempt);
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return false;
                }
                continue;
            }
        }
        attempt += 1;

        // someone else (a health check) got there first
        if handle.is_connected() {
            debug!(role = %role, "Cache backend already reconnected");
            return true;
        }

        match handle.connect().await {
            Ok(()) if *shutdown.borrow() => {
                // shutdown raced the connect; don't leave a live connection behind
                if let Err(e) = handle.store().close().await {
                    warn!(role = %role, error = %e, "Error closing cache backend after shutdown");
                }
                handle.mark_disconnected(&CacheError::ConnectionError("shut down".to_string()));
                return false;
            }
            Ok(()) => {
                info!(role = %role, attempts = attempt, "Cache backend reconnected");
                return true;
            }
            Err(e) => {
                warn!(
                    role = %role,
                    attempt = attempt,
                    backoff_ms = policy.delay_for(attempt).as_millis() as u64,
                    error = %e,
                    "Cache backend reconnect attempt failed"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::handle::{BackendRole, ConnectionState};
    use crate::cache::stores::MemoryStore;
    use std::sync::Arc;

    fn policy(max_attempts: Option<u32>) -> ReconnectPolicy {
        ReconnectPolicy {
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(1000),
            multiplier: 2.0,
            max_attempts,
        }
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let p = policy(None);
        assert_eq!(p.delay_for(0), Duration::from_millis(100));
        assert_eq!(p.delay_for(1), Duration::from_millis(200));
        assert_eq!(p.delay_for(3), Duration::from_millis(800));
        assert_eq!(p.delay_for(4), Duration::from_millis(1000));
        assert_eq!(p.delay_for(1000), Duration::from_millis(1000));
    }

    #[test]
    fn test_multiplier_below_one_never_shrinks_delay() {
        let p = ReconnectPolicy {
            multiplier: 0.5,
            ..policy(None)
        };
        assert_eq!(p.delay_for(5), Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_succeeds_against_reachable_store() {
        let handle = BackendHandle::new(BackendRole::Cloud, Arc::new(MemoryStore::new()));
        let (_tx, rx) = watch::channel(false);

        assert!(reconnect_with_backoff(&handle, &policy(Some(3)), rx).await);
        assert_eq!(handle.state(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_exits_when_handle_already_connected() {
        let store = Arc::new(MemoryStore::new());
        let handle = BackendHandle::new(BackendRole::Local, store.clone());
        handle.connect().await.unwrap();
        // a fresh connect would reopen the store
        store.close().await.unwrap();
        let (_tx, rx) = watch::channel(false);

        assert!(reconnect_with_backoff(&handle, &policy(None), rx).await);
        assert!(store.ping().await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_stops_on_shutdown() {
        let handle = BackendHandle::new(BackendRole::Cloud, Arc::new(MemoryStore::new()));
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();

        assert!(!reconnect_with_backoff(&handle, &policy(None), rx).await);
        assert_eq!(handle.state(), ConnectionState::Disconnected);
    }
}
