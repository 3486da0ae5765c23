//! Backend handles and their connection state
//!
//! A [`BackendHandle`] pairs one [`BackendStore`] with its last-known health.
//! State transitions:
//!
//! ```text
//! Disconnected --initiate--> Connecting --success--> Connected
//!      ^                         |                      |
//!      +--------failure----------+                      |
//!      +-----------------error / timeout----------------+
//! ```
//!
//! Reads of the state never touch the network; only connection attempts and
//! operation outcomes reported by the [`HybridManager`](super::HybridManager)
//! move it.

use super::errors::{CacheError, CacheResult};
use super::traits::BackendStore;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Which of the two backends a handle represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendRole {
    /// Low latency, may be unavailable
    Local,
    /// Higher latency, durable
    Cloud,
}

impl BackendRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Cloud => "cloud",
        }
    }

    pub fn other(&self) -> Self {
        match self {
            Self::Local => Self::Cloud,
            Self::Cloud => Self::Local,
        }
    }
}

impl fmt::Display for BackendRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Connection lifecycle of a handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Point-in-time health of one handle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendHealth {
    /// False when no URL was configured for this role
    pub configured: bool,
    pub state: ConnectionState,
    pub connected: bool,
    pub last_error: Option<String>,
    pub last_health_check_at: Option<DateTime<Utc>>,
}

impl BackendHealth {
    pub(crate) fn not_configured() -> Self {
        Self {
            configured: false,
            state: ConnectionState::Disconnected,
            connected: false,
            last_error: Some("backend not configured".to_string()),
            last_health_check_at: None,
        }
    }
}

/// Last-known connected/disconnected state of both handles
///
/// Recomputed on demand from handle state; never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub local: BackendHealth,
    pub cloud: BackendHealth,
}

impl HealthSnapshot {
    pub fn any_connected(&self) -> bool {
        self.local.connected || self.cloud.connected
    }

    pub fn role(&self, role: BackendRole) -> &BackendHealth {
        match role {
            BackendRole::Local => &self.local,
            BackendRole::Cloud => &self.cloud,
        }
    }
}

#[derive(Debug)]
struct HandleState {
    connection: ConnectionState,
    last_error: Option<String>,
    last_health_check_at: Option<DateTime<Utc>>,
}

/// One physical connection to a backing store, owned by the manager
pub struct BackendHandle {
    role: BackendRole,
    store: Arc<dyn BackendStore>,
    state: Mutex<HandleState>,
    reconnecting: AtomicBool,
}

impl fmt::Debug for BackendHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("BackendHandle")
            .field("role", &self.role)
            .field("store", &self.store)
            .field("state", &state.connection)
            .field("last_error", &state.last_error)
            .finish()
    }
}

impl BackendHandle {
    /// New handle in the `Disconnected` state
    pub fn new(role: BackendRole, store: Arc<dyn BackendStore>) -> Self {
        Self {
            role,
            store,
            state: Mutex::new(HandleState {
                connection: ConnectionState::Disconnected,
                last_error: None,
                last_health_check_at: None,
            }),
            reconnecting: AtomicBool::new(false),
        }
    }

    pub fn role(&self) -> BackendRole {
        self.role
    }

    pub fn store(&self) -> &Arc<dyn BackendStore> {
        &self.store
    }

    pub fn state(&self) -> ConnectionState {
        self.state.lock().connection
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn health(&self) -> BackendHealth {
        let state = self.state.lock();
        BackendHealth {
            configured: true,
            state: state.connection,
            connected: state.connection == ConnectionState::Connected,
            last_error: state.last_error.clone(),
            last_health_check_at: state.last_health_check_at,
        }
    }

    /// Attempt a connection, moving through `Connecting`.
    ///
    /// Returns the store's result so callers can log it.
    pub async fn connect(&self) -> CacheResult<()> {
        self.state.lock().connection = ConnectionState::Connecting;
        let result = match self.store.connect().await {
            Ok(()) => self.store.ping().await,
            Err(e) => Err(e),
        };
        match &result {
            Ok(()) => {
                self.mark_connected();
            }
            Err(e) => {
                self.mark_disconnected(e);
            }
        }
        result
    }

    /// Record a successful connection or probe. Returns true if the handle
    /// was not connected before.
    pub fn mark_connected(&self) -> bool {
        let mut state = self.state.lock();
        let changed = state.connection != ConnectionState::Connected;
        state.connection = ConnectionState::Connected;
        state.last_error = None;
        state.last_health_check_at = Some(Utc::now());
        changed
    }

    /// Record a lost connection. Returns true if the handle was connected
    /// (or connecting) before.
    pub fn mark_disconnected(&self, error: &CacheError) -> bool {
        let mut state = self.state.lock();
        let changed = state.connection != ConnectionState::Disconnected;
        state.connection = ConnectionState::Disconnected;
        state.last_error = Some(error.to_string());
        state.last_health_check_at = Some(Utc::now());
        changed
    }

    /// Fold an operation outcome into the handle's health.
    ///
    /// Connection failures and timeouts disconnect the handle; other errors
    /// are remembered but leave it connected. Returns true if this outcome
    /// disconnected a previously connected handle.
    pub fn observe<T>(&self, result: &CacheResult<T>) -> bool {
        match result {
            Ok(_) => false,
            Err(e) if e.is_connection_failure() => self.mark_disconnected(e),
            Err(e) => {
                self.state.lock().last_error = Some(e.to_string());
                false
            }
        }
    }

    /// Claim the right to run the reconnect loop. Only one loop per handle.
    pub(crate) fn try_begin_reconnect(&self) -> bool {
        self.reconnecting
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn end_reconnect(&self) {
        self.reconnecting.store(false, Ordering::Release);
    }

    pub fn is_reconnecting(&self) -> bool {
        self.reconnecting.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::stores::MemoryStore;

    fn handle() -> BackendHandle {
        BackendHandle::new(BackendRole::Local, Arc::new(MemoryStore::new()))
    }

    #[test]
    fn test_new_handle_is_disconnected() {
        let h = handle();
        assert_eq!(h.state(), ConnectionState::Disconnected);
        assert!(!h.health().connected);
        assert!(h.health().last_health_check_at.is_none());
    }

    #[tokio::test]
    async fn test_connect_transitions_to_connected() {
        let h = handle();
        h.connect().await.unwrap();
        let health = h.health();
        assert_eq!(health.state, ConnectionState::Connected);
        assert!(health.connected);
        assert!(health.last_error.is_none());
        assert!(health.last_health_check_at.is_some());
    }

    #[test]
    fn test_connection_failure_disconnects() {
        let h = handle();
        h.mark_connected();
        let changed = h.observe::<()>(&Err(CacheError::ConnectionError("reset".into())));
        assert!(changed);
        assert_eq!(h.state(), ConnectionState::Disconnected);
        assert!(h.health().last_error.unwrap().contains("reset"));
    }

    #[test]
    fn test_operation_error_keeps_handle_connected() {
        let h = handle();
        h.mark_connected();
        let changed = h.observe::<()>(&Err(CacheError::BackendError("WRONGTYPE".into())));
        assert!(!changed);
        assert!(h.is_connected());
        assert!(h.health().last_error.is_some());
    }

    #[test]
    fn test_reconnect_claim_is_exclusive() {
        let h = handle();
        assert!(h.try_begin_reconnect());
        assert!(!h.try_begin_reconnect());
        h.end_reconnect();
        assert!(h.try_begin_reconnect());
    }

    #[test]
    fn test_role_helpers() {
        assert_eq!(BackendRole::Local.other(), BackendRole::Cloud);
        assert_eq!(BackendRole::Cloud.to_string(), "cloud");
        assert_eq!(
            serde_json::to_string(&ConnectionState::Connecting).unwrap(),
            "\"connecting\""
        );
    }
}
