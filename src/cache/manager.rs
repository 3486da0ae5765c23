//! Hybrid manager: one logical store over a local and a cloud backend
//!
//! ## Routing
//!
//! - **Reads** go to connected handles in read-preference order. A miss or an
//!   error on the first handle falls back to the second. Handles already
//!   known to be disconnected are skipped without a network call.
//! - **Writes** in `dual` mode go to every connected handle concurrently and
//!   succeed if at least one handle accepted them. In `local-only` mode they
//!   go to the local handle only.
//! - **Pattern scans** prefer the local handle when it is connected.
//!
//! ## Failure semantics
//!
//! A single backend's error never escapes: it is logged and folded into that
//! handle's health. Connection failures disconnect the handle and start a
//! bounded reconnect loop. An operation fails (with
//! [`CacheError::Unavailable`] or the last backend error) only when every
//! relevant handle was unavailable or failed.
//!
//! ## Lifecycle
//!
//! Construct once, share by cloning (the manager is an `Arc` inside), call
//! [`HybridManager::ensure_ready`] before use. Concurrent first callers await
//! the same in-flight initialization.

use super::errors::{CacheError, CacheResult};
use super::handle::{BackendHandle, BackendHealth, BackendRole, HealthSnapshot};
use super::reconnect::{reconnect_with_backoff, ReconnectPolicy};
use super::stores::redis::redact_url;
use super::stores::{MemoryStore, RedisStore};
use super::traits::{BackendStore, BatchOp, BatchValue, TTL_MISSING};
use crate::config::{
    ConfigResult, ConfigurationError, HybridCacheConfig, ReadPreference, WriteMode,
    MEMORY_URL_SCHEME,
};
use futures::future::{join_all, BoxFuture};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, OnceCell};
use tracing::{debug, error, info, warn};

/// Dual-backend cache manager
#[derive(Clone)]
pub struct HybridManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    config: Arc<HybridCacheConfig>,
    local: Option<BackendHandle>,
    cloud: Option<BackendHandle>,
    reconnect_policy: ReconnectPolicy,
    initialized: OnceCell<()>,
    availability: watch::Sender<bool>,
    shutdown: watch::Sender<bool>,
}

impl std::fmt::Debug for HybridManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HybridManager")
            .field("write_mode", &self.inner.config.write_mode)
            .field("read_preference", &self.inner.config.read_preference)
            .field("local", &self.inner.local)
            .field("cloud", &self.inner.cloud)
            .field("initialized", &self.inner.initialized.initialized())
            .finish()
    }
}

impl HybridManager {
    /// Build a manager and its stores from configuration, without connecting.
    ///
    /// Fails only for misconfiguration (e.g. an unparseable URL).
    pub fn from_config(config: Arc<HybridCacheConfig>) -> ConfigResult<Self> {
        config.validate()?;
        let local = config
            .local_url
            .as_deref()
            .map(|url| build_store("local_url", url, &config))
            .transpose()?;
        let cloud = config
            .cloud_url
            .as_deref()
            .map(|url| build_store("cloud_url", url, &config))
            .transpose()?;
        Ok(Self::with_stores(config, local, cloud))
    }

    /// Build a manager over caller-supplied stores
    pub fn with_stores(
        config: Arc<HybridCacheConfig>,
        local: Option<Arc<dyn BackendStore>>,
        cloud: Option<Arc<dyn BackendStore>>,
    ) -> Self {
        let (availability, _) = watch::channel(false);
        let (shutdown, _) = watch::channel(false);
        let reconnect_policy = ReconnectPolicy::from(&config.reconnect);

        Self {
            inner: Arc::new(ManagerInner {
                local: local.map(|store| BackendHandle::new(BackendRole::Local, store)),
                cloud: cloud.map(|store| BackendHandle::new(BackendRole::Cloud, store)),
                config,
                reconnect_policy,
                initialized: OnceCell::new(),
                availability,
                shutdown,
            }),
        }
    }

    pub fn config(&self) -> &HybridCacheConfig {
        &self.inner.config
    }

    /// Connect both handles concurrently.
    ///
    /// Idempotent: only the first call does real work and concurrent callers
    /// await that same attempt. A handle that fails to connect leaves the
    /// manager degraded (not failed) and gets a background reconnect loop.
    pub async fn initialize(&self) {
        self.inner
            .initialized
            .get_or_init(|| self.inner.connect_all())
            .await;
    }

    /// Lazily initialize on first use; cheap once initialized
    pub async fn ensure_ready(&self) {
        self.initialize().await;
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.initialized.initialized()
    }

    /// Last-known state of both handles. Never touches the network.
    pub fn get_health(&self) -> HealthSnapshot {
        self.inner.health()
    }

    /// Whether any handle is currently connected
    pub fn is_available(&self) -> bool {
        self.inner.local_connected() || self.inner.cloud_connected()
    }

    /// Receiver that observes "any backend connected" as it changes
    pub fn subscribe_availability(&self) -> watch::Receiver<bool> {
        self.inner.availability.subscribe()
    }

    /// Actively ping every configured handle and update its state
    pub async fn check_health(&self) -> HealthSnapshot {
        if *self.inner.shutdown.borrow() {
            debug!("Skipping cache health check after shutdown");
            return self.get_health();
        }
        let probes = self.inner.handles().map(|handle| async move {
            let result = handle.store().ping().await;
            match &result {
                Ok(()) => {
                    if handle.mark_connected() {
                        info!(role = %handle.role(), "Cache backend healthy again");
                        self.inner.publish_availability();
                    }
                }
                Err(e) => {
                    warn!(role = %handle.role(), error = %e, "Cache backend health check failed");
                    self.inner.observe(handle, &result);
                    if !handle.is_connected() {
                        self.inner.spawn_reconnect(handle.role());
                    }
                }
            }
        });
        join_all(probes).await;
        self.get_health()
    }

    /// Raw store for `role`, if configured and connected.
    ///
    /// Escape hatch for primitives the facade doesn't wrap (rate limiting,
    /// queues, pub/sub). Callers handle `None` explicitly.
    pub fn get_client(&self, role: BackendRole) -> Option<Arc<dyn BackendStore>> {
        self.inner
            .handle(role)
            .filter(|h| h.is_connected())
            .map(|h| Arc::clone(h.store()))
    }

    /// First connected store in read-preference order
    pub fn get_primary_client(&self) -> Option<Arc<dyn BackendStore>> {
        self.inner
            .readable()
            .first()
            .map(|h| Arc::clone(h.store()))
    }

    /// Every connected store, in read-preference order
    pub fn get_clients(&self) -> Vec<(BackendRole, Arc<dyn BackendStore>)> {
        self.inner
            .readable()
            .into_iter()
            .map(|h| (h.role(), Arc::clone(h.store())))
            .collect()
    }

    pub async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        self.read_with_fallback("GET", key, |store| store.get(key), Option::is_some)
            .await
    }

    pub async fn exists(&self, key: &str) -> CacheResult<bool> {
        self.read_with_fallback("EXISTS", key, |store| store.exists(key), |found| *found)
            .await
    }

    pub async fn ttl(&self, key: &str) -> CacheResult<i64> {
        self.read_with_fallback("TTL", key, |store| store.ttl(key), |ttl| *ttl != TTL_MISSING)
            .await
    }

    pub async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> CacheResult<()> {
        let targets = self.inner.write_targets();
        self.write_to("SET", key, targets, |store| store.set(key, value, ttl))
            .await
    }

    pub async fn del(&self, key: &str) -> CacheResult<()> {
        let targets = self.inner.write_targets();
        self.write_to("DEL", key, targets, |store| store.del(key))
            .await
            .map(|_| ())
    }

    /// Increment a counter. The returned value comes from the first handle
    /// (in read-preference order) that accepted the increment.
    pub async fn incr_by(&self, key: &str, delta: i64) -> CacheResult<i64> {
        let targets = self.inner.write_targets();
        self.write_to("INCRBY", key, targets, |store| store.incr_by(key, delta))
            .await
    }

    pub async fn expire(&self, key: &str, ttl: Duration) -> CacheResult<bool> {
        let targets = self.inner.write_targets();
        self.write_to("EXPIRE", key, targets, |store| store.expire(key, ttl))
            .await
    }

    /// Keys matching `pattern`, scanned on a single handle: local when it is
    /// connected, otherwise cloud
    pub async fn keys(&self, pattern: &str) -> CacheResult<Vec<String>> {
        let mut last_error = None;
        for handle in self.inner.scan_order() {
            let result = handle.store().keys(pattern).await;
            self.inner.observe(handle, &result);
            match result {
                Ok(keys) => return Ok(keys),
                Err(e) => {
                    warn!(role = %handle.role(), pattern = pattern, error = %e, "Cache KEYS failed on backend");
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| unavailable("KEYS")))
    }

    /// Execute a batch in one round trip per handle.
    ///
    /// Batches containing writes follow write routing. Read-only batches go
    /// to the preferred handle, and keys it misses are retried on the other.
    pub async fn pipeline(&self, ops: &[BatchOp]) -> CacheResult<Vec<BatchValue>> {
        if ops.is_empty() {
            return Ok(Vec::new());
        }
        if ops.iter().any(BatchOp::is_write) {
            let targets = self.inner.write_targets();
            return self
                .write_to("PIPELINE", "<batch>", targets, |store| store.pipeline(ops))
                .await;
        }

        let mut results: Option<Vec<BatchValue>> = None;
        let mut last_error = None;
        for handle in self.inner.readable() {
            let pending: Vec<usize> = match &results {
                None => (0..ops.len()).collect(),
                Some(values) => values
                    .iter()
                    .enumerate()
                    .filter(|(_, v)| matches!(v, BatchValue::Value(None)))
                    .map(|(i, _)| i)
                    .collect(),
            };
            if pending.is_empty() {
                break;
            }

            let batch: Vec<BatchOp> = pending.iter().map(|&i| ops[i].clone()).collect();
            let result = handle.store().pipeline(&batch).await;
            self.inner.observe(handle, &result);
            match result {
                Ok(values) => {
                    let merged = results.get_or_insert_with(|| {
                        vec![BatchValue::Value(None); ops.len()]
                    });
                    for (index, value) in pending.into_iter().zip(values) {
                        merged[index] = value;
                    }
                }
                Err(e) => {
                    warn!(role = %handle.role(), ops = ops.len(), error = %e, "Cache PIPELINE failed on backend");
                    last_error = Some(e);
                }
            }
        }

        results.ok_or_else(|| last_error.unwrap_or_else(|| unavailable("PIPELINE")))
    }

    /// Remove every key from every connected handle, regardless of write mode
    pub async fn flush(&self) -> CacheResult<()> {
        let targets = self.inner.readable();
        warn!(targets = targets.len(), "Flushing entire cache keyspace");
        self.write_to("FLUSHDB", "*", targets, |store| store.flush())
            .await
    }

    /// Stop reconnect loops and close both handles within `grace`.
    ///
    /// Handles are marked disconnected even if closing times out.
    pub async fn shutdown(&self, grace: Duration) -> CacheResult<()> {
        self.inner.shutdown.send_replace(true);
        info!(grace_ms = grace.as_millis() as u64, "Shutting down hybrid cache manager");

        let closes = join_all(self.inner.handles().map(|handle| async move {
            if let Err(e) = handle.store().close().await {
                warn!(role = %handle.role(), error = %e, "Error closing cache backend");
            }
            handle.mark_disconnected(&CacheError::ConnectionError("shut down".to_string()));
        }));
        let outcome = tokio::time::timeout(grace, closes).await;

        for handle in self.inner.handles() {
            handle.mark_disconnected(&CacheError::ConnectionError("shut down".to_string()));
        }
        self.inner.publish_availability();

        outcome.map(|_| ()).map_err(|_| {
            warn!("Cache shutdown grace period elapsed before all backends closed");
            CacheError::Timeout(format!(
                "closing cache backends exceeded {}ms",
                grace.as_millis()
            ))
        })
    }

    async fn read_with_fallback<'a, T, F, H>(
        &'a self,
        op: &'static str,
        key: &'a str,
        call: F,
        is_hit: H,
    ) -> CacheResult<T>
    where
        F: Fn(&'a dyn BackendStore) -> BoxFuture<'a, CacheResult<T>>,
        H: Fn(&T) -> bool,
    {
        let mut miss = None;
        let mut last_error = None;

        for handle in self.inner.readable() {
            let result = call(handle.store().as_ref()).await;
            self.inner.observe(handle, &result);
            match result {
                Ok(value) if is_hit(&value) => return Ok(value),
                Ok(value) => {
                    if miss.is_none() {
                        miss = Some(value);
                    }
                }
                Err(e) => {
                    warn!(role = %handle.role(), key = key, op = op, error = %e, "Cache read failed on backend, falling back");
                    last_error = Some(e);
                }
            }
        }

        match (miss, last_error) {
            (Some(value), _) => Ok(value),
            (None, Some(e)) => Err(e),
            (None, None) => Err(unavailable(op)),
        }
    }

    async fn write_to<'a, T, F>(
        &'a self,
        op: &'static str,
        key: &'a str,
        targets: Vec<&'a BackendHandle>,
        call: F,
    ) -> CacheResult<T>
    where
        F: Fn(&'a dyn BackendStore) -> BoxFuture<'a, CacheResult<T>>,
    {
        if targets.is_empty() {
            return Err(unavailable(op));
        }

        let results = join_all(targets.iter().map(|&handle| call(handle.store().as_ref()))).await;

        let mut accepted = None;
        let mut last_error = None;
        for (handle, result) in targets.iter().zip(results) {
            self.inner.observe(handle, &result);
            match result {
                Ok(value) => {
                    if accepted.is_none() {
                        accepted = Some(value);
                    }
                }
                Err(e) => {
                    warn!(role = %handle.role(), key = key, op = op, error = %e, "Cache write failed on backend");
                    last_error = Some(e);
                }
            }
        }

        match accepted {
            Some(value) => {
                debug!(key = key, op = op, targets = targets.len(), "Cache write accepted");
                Ok(value)
            }
            None => {
                error!(key = key, op = op, "Cache write failed on every backend");
                Err(last_error.unwrap_or_else(|| unavailable(op)))
            }
        }
    }
}

impl ManagerInner {
    fn handle(&self, role: BackendRole) -> Option<&BackendHandle> {
        match role {
            BackendRole::Local => self.local.as_ref(),
            BackendRole::Cloud => self.cloud.as_ref(),
        }
    }

    fn handles(&self) -> impl Iterator<Item = &BackendHandle> {
        self.local.iter().chain(self.cloud.iter())
    }

    fn local_connected(&self) -> bool {
        self.local.as_ref().is_some_and(BackendHandle::is_connected)
    }

    fn cloud_connected(&self) -> bool {
        self.cloud.as_ref().is_some_and(BackendHandle::is_connected)
    }

    fn read_order(&self) -> [BackendRole; 2] {
        match self.config.read_preference {
            ReadPreference::Local => [BackendRole::Local, BackendRole::Cloud],
            ReadPreference::Cloud => [BackendRole::Cloud, BackendRole::Local],
        }
    }

    /// Connected handles in read-preference order
    fn readable(&self) -> Vec<&BackendHandle> {
        self.read_order()
            .into_iter()
            .filter_map(|role| self.handle(role))
            .filter(|h| h.is_connected())
            .collect()
    }

    /// Connected handles that receive writes, in read-preference order
    fn write_targets(&self) -> Vec<&BackendHandle> {
        match self.config.write_mode {
            WriteMode::Dual => self.readable(),
            WriteMode::LocalOnly => self
                .local
                .iter()
                .filter(|h| h.is_connected())
                .collect(),
        }
    }

    /// Connected handles for key scans, local first
    fn scan_order(&self) -> Vec<&BackendHandle> {
        [BackendRole::Local, BackendRole::Cloud]
            .into_iter()
            .filter_map(|role| self.handle(role))
            .filter(|h| h.is_connected())
            .collect()
    }

    fn health(&self) -> HealthSnapshot {
        let of = |handle: Option<&BackendHandle>| {
            handle
                .map(BackendHandle::health)
                .unwrap_or_else(BackendHealth::not_configured)
        };
        HealthSnapshot {
            local: of(self.local.as_ref()),
            cloud: of(self.cloud.as_ref()),
        }
    }

    fn publish_availability(&self) {
        let available = self.local_connected() || self.cloud_connected();
        self.availability.send_if_modified(|current| {
            let changed = *current != available;
            *current = available;
            changed
        });
    }

    async fn connect_all(self: &Arc<Self>) {
        let attempts = join_all(self.handles().map(|handle| async move {
            let result = handle.connect().await;
            (handle.role(), handle.store().provider_name(), result)
        }))
        .await;

        for (role, provider, result) in attempts {
            match result {
                Ok(()) => info!(role = %role, provider = provider, "Cache backend connected"),
                Err(e) => {
                    warn!(role = %role, provider = provider, error = %e, "Cache backend unavailable at startup, continuing degraded");
                    self.spawn_reconnect(role);
                }
            }
        }
        self.publish_availability();

        let health = self.health();
        if health.any_connected() {
            info!(
                local = health.local.connected,
                cloud = health.cloud.connected,
                write_mode = %self.config.write_mode,
                read_preference = %self.config.read_preference,
                "Hybrid cache initialized"
            );
        } else {
            error!("Hybrid cache initialized with no reachable backend; caching disabled until reconnect");
        }
    }

    /// Fold an operation outcome into the handle's health, reacting to a
    /// fresh disconnect
    fn observe<T>(self: &Arc<Self>, handle: &BackendHandle, result: &CacheResult<T>) {
        if handle.observe(result) {
            if let Err(e) = result {
                warn!(role = %handle.role(), error = %e, "Cache backend disconnected");
            }
            self.publish_availability();
            self.spawn_reconnect(handle.role());
        }
    }

    fn spawn_reconnect(self: &Arc<Self>, role: BackendRole) {
        if *self.shutdown.borrow() {
            return;
        }
        let Some(handle) = self.handle(role) else {
            return;
        };
        if !handle.try_begin_reconnect() {
            return;
        }

        let inner = Arc::clone(self);
        tokio::spawn(async move {
            if let Some(handle) = inner.handle(role) {
                let reconnected =
                    reconnect_with_backoff(handle, &inner.reconnect_policy, inner.shutdown.subscribe())
                        .await;
                handle.end_reconnect();
                if reconnected {
                    inner.publish_availability();
                }
            }
        });
    }
}

fn unavailable(op: &str) -> CacheError {
    CacheError::Unavailable(format!("no connected cache backend for {}", op))
}

fn build_store(
    field: &str,
    url: &str,
    config: &HybridCacheConfig,
) -> ConfigResult<Arc<dyn BackendStore>> {
    if url == MEMORY_URL_SCHEME {
        return Ok(Arc::new(MemoryStore::new()));
    }
    let store = RedisStore::from_url(url, config.connect_timeout(), config.operation_timeout())
        .map_err(|e| ConfigurationError::invalid_value(field, redact_url(url), e.to_string()))?;
    Ok(Arc::new(store))
}
