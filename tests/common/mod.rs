//! Shared fixtures for hybrid cache integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use hybrid_cache::cache::{
    BackendStore, BatchOp, BatchValue, CacheError, CacheResult, CacheService, HybridManager,
    MemoryStore,
};
use hybrid_cache::config::HybridCacheConfig;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// How a [`FlakyStore`] answers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureMode {
    Healthy,
    /// `connect` and every operation fail with `ConnectionError`
    RejectConnections,
    /// `connect` works, every operation fails with `BackendError`
    RejectOperations,
}

/// Fault-injecting store: a [`MemoryStore`] behind a switch, counting calls
#[derive(Debug, Clone)]
pub struct FlakyStore {
    inner: MemoryStore,
    mode: Arc<Mutex<FailureMode>>,
    connect_attempts: Arc<AtomicUsize>,
    operations: Arc<AtomicUsize>,
    connect_delay: Duration,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::with_mode(FailureMode::Healthy)
    }

    pub fn with_mode(mode: FailureMode) -> Self {
        Self {
            inner: MemoryStore::new(),
            mode: Arc::new(Mutex::new(mode)),
            connect_attempts: Arc::new(AtomicUsize::new(0)),
            operations: Arc::new(AtomicUsize::new(0)),
            connect_delay: Duration::ZERO,
        }
    }

    /// Make `connect` take a while so concurrent callers overlap
    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = delay;
        self
    }

    pub fn set_mode(&self, mode: FailureMode) {
        *self.mode.lock() = mode;
    }

    pub fn connect_attempts(&self) -> usize {
        self.connect_attempts.load(Ordering::SeqCst)
    }

    /// Non-connect calls that reached this store
    pub fn operations(&self) -> usize {
        self.operations.load(Ordering::SeqCst)
    }

    /// Backing data, bypassing the failure switch
    pub fn data(&self) -> &MemoryStore {
        &self.inner
    }

    pub fn as_store(&self) -> Option<Arc<dyn BackendStore>> {
        Some(Arc::new(self.clone()))
    }

    fn gate(&self) -> CacheResult<()> {
        self.operations.fetch_add(1, Ordering::SeqCst);
        match *self.mode.lock() {
            FailureMode::Healthy => Ok(()),
            FailureMode::RejectConnections => {
                Err(CacheError::ConnectionError("connection refused".to_string()))
            }
            FailureMode::RejectOperations => {
                Err(CacheError::BackendError("injected failure".to_string()))
            }
        }
    }
}

#[async_trait]
impl BackendStore for FlakyStore {
    async fn connect(&self) -> CacheResult<()> {
        self.connect_attempts.fetch_add(1, Ordering::SeqCst);
        if !self.connect_delay.is_zero() {
            tokio::time::sleep(self.connect_delay).await;
        }
        let mode = *self.mode.lock();
        if mode == FailureMode::RejectConnections {
            return Err(CacheError::ConnectionError("connection refused".to_string()));
        }
        self.inner.connect().await
    }

    async fn ping(&self) -> CacheResult<()> {
        let mode = *self.mode.lock();
        if mode == FailureMode::RejectConnections {
            return Err(CacheError::ConnectionError("connection refused".to_string()));
        }
        self.inner.ping().await
    }

    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        self.gate()?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> CacheResult<()> {
        self.gate()?;
        self.inner.set(key, value, ttl).await
    }

    async fn del(&self, key: &str) -> CacheResult<u64> {
        self.gate()?;
        self.inner.del(key).await
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        self.gate()?;
        self.inner.exists(key).await
    }

    async fn incr_by(&self, key: &str, delta: i64) -> CacheResult<i64> {
        self.gate()?;
        self.inner.incr_by(key, delta).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> CacheResult<bool> {
        self.gate()?;
        self.inner.expire(key, ttl).await
    }

    async fn keys(&self, pattern: &str) -> CacheResult<Vec<String>> {
        self.gate()?;
        self.inner.keys(pattern).await
    }

    async fn ttl(&self, key: &str) -> CacheResult<i64> {
        self.gate()?;
        self.inner.ttl(key).await
    }

    async fn pipeline(&self, ops: &[BatchOp]) -> CacheResult<Vec<BatchValue>> {
        self.gate()?;
        self.inner.pipeline(ops).await
    }

    async fn flush(&self) -> CacheResult<()> {
        self.gate()?;
        self.inner.flush().await
    }

    async fn close(&self) -> CacheResult<()> {
        self.inner.close().await
    }

    fn provider_name(&self) -> &'static str {
        "flaky"
    }
}

/// In-memory config with a fast reconnect schedule
pub fn test_config() -> HybridCacheConfig {
    let mut config = HybridCacheConfig::in_memory();
    config.reconnect.initial_backoff_ms = 50;
    config.reconnect.max_backoff_ms = 200;
    config
}

pub fn manager_over(
    config: HybridCacheConfig,
    local: &FlakyStore,
    cloud: &FlakyStore,
) -> HybridManager {
    HybridManager::with_stores(Arc::new(config), local.as_store(), cloud.as_store())
}

/// Facade over two fresh stores, returned for fault injection and inspection
pub fn service_over(config: HybridCacheConfig) -> (CacheService, FlakyStore, FlakyStore) {
    let local = FlakyStore::new();
    let cloud = FlakyStore::new();
    let service = CacheService::new(manager_over(config, &local, &cloud));
    (service, local, cloud)
}

pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("hybrid_cache=debug")
        .with_test_writer()
        .try_init();
}
