//! In-process backend store
//!
//! Implements the full [`BackendStore`] contract (per-key TTL, glob `keys`,
//! atomic `incr_by`, pipelines) on top of a `DashMap`. Useful as the local
//! backend in development and as the store behind unit and integration tests.
//!
//! **Important**: state lives in this process only. Two application
//! instances each using a `MemoryStore` do not see each other's writes.

use crate::cache::errors::{CacheError, CacheResult};
use crate::cache::pattern::glob_match;
use crate::cache::traits::{BackendStore, BatchOp, BatchValue, TTL_MISSING, TTL_NO_EXPIRY};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Writes between sweeps of expired entries nobody reads again
const SWEEP_EVERY_WRITES: u64 = 1024;

#[derive(Debug, Clone)]
struct StoredValue {
    value: String,
    expires_at: Option<Instant>,
}

impl StoredValue {
    fn new(value: String, ttl: Option<Duration>) -> Self {
        Self {
            value,
            expires_at: ttl.and_then(deadline),
        }
    }

    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// Expiry instant for `ttl` from now; `None` (never expires) when the clock
/// can't represent it
fn deadline(ttl: Duration) -> Option<Instant> {
    Instant::now().checked_add(ttl)
}

/// In-memory store with Redis-compatible semantics
#[derive(Debug, Clone)]
pub struct MemoryStore {
    entries: Arc<DashMap<String, StoredValue>>,
    open: Arc<AtomicBool>,
    writes: Arc<AtomicU64>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create an empty, open store
    pub fn new() -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            open: Arc::new(AtomicBool::new(true)),
            writes: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Number of live (unexpired) keys
    pub fn len(&self) -> usize {
        self.purge_expired();
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn ensure_open(&self) -> CacheResult<()> {
        if self.open.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(CacheError::ConnectionError("memory store is closed".to_string()))
        }
    }

    /// Live value for `key`, evicting it first if it has expired
    fn live(&self, key: &str) -> Option<StoredValue> {
        let entry = self.entries.get(key)?.value().clone();
        if entry.is_expired() {
            self.entries.remove_if(key, |_, v| v.is_expired());
            return None;
        }
        Some(entry)
    }

    fn get_sync(&self, key: &str) -> Option<String> {
        self.live(key).map(|v| v.value)
    }

    fn set_sync(&self, key: &str, value: &str, ttl: Option<Duration>) {
        self.entries
            .insert(key.to_string(), StoredValue::new(value.to_string(), ttl));
        if (self.writes.fetch_add(1, Ordering::Relaxed) + 1) % SWEEP_EVERY_WRITES == 0 {
            self.purge_expired();
        }
    }

    /// Drop every expired entry, read or not
    fn purge_expired(&self) {
        let before = self.entries.len();
        self.entries.retain(|_, v| !v.is_expired());
        let purged = before.saturating_sub(self.entries.len());
        if purged > 0 {
            debug!(purged = purged, "Purged expired entries (memory)");
        }
    }

    fn del_sync(&self, key: &str) -> u64 {
        match self.entries.remove(key) {
            Some((_, v)) if !v.is_expired() => 1,
            _ => 0,
        }
    }
}

#[async_trait]
impl BackendStore for MemoryStore {
    async fn connect(&self) -> CacheResult<()> {
        self.open.store(true, Ordering::Release);
        Ok(())
    }

    async fn ping(&self) -> CacheResult<()> {
        self.ensure_open()
    }

    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        self.ensure_open()?;
        let result = self.get_sync(key);
        if result.is_some() {
            debug!(key = key, "Cache HIT (memory)");
        } else {
            debug!(key = key, "Cache MISS (memory)");
        }
        Ok(result)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> CacheResult<()> {
        self.ensure_open()?;
        self.set_sync(key, value, ttl);
        debug!(key = key, ttl_seconds = ttl.map(|t| t.as_secs()), "Cache SET (memory)");
        Ok(())
    }

    async fn del(&self, key: &str) -> CacheResult<u64> {
        self.ensure_open()?;
        Ok(self.del_sync(key))
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        self.ensure_open()?;
        Ok(self.live(key).is_some())
    }

    async fn incr_by(&self, key: &str, delta: i64) -> CacheResult<i64> {
        self.ensure_open()?;
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired() {
                    occupied.insert(StoredValue::new(delta.to_string(), None));
                    return Ok(delta);
                }
                let current: i64 = occupied.get().value.parse().map_err(|_| {
                    CacheError::BackendError(format!(
                        "value at '{}' is not an integer or out of range",
                        key
                    ))
                })?;
                let next = current.checked_add(delta).ok_or_else(|| {
                    CacheError::BackendError("increment or decrement would overflow".to_string())
                })?;
                occupied.get_mut().value = next.to_string();
                Ok(next)
            }
            Entry::Vacant(vacant) => {
                vacant.insert(StoredValue::new(delta.to_string(), None));
                Ok(delta)
            }
        }
    }

    async fn expire(&self, key: &str, ttl: Duration) -> CacheResult<bool> {
        self.ensure_open()?;
        match self.entries.get_mut(key) {
            Some(mut entry) if !entry.is_expired() => {
                entry.expires_at = deadline(ttl);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn keys(&self, pattern: &str) -> CacheResult<Vec<String>> {
        self.ensure_open()?;
        self.purge_expired();
        Ok(self
            .entries
            .iter()
            .filter(|e| !e.is_expired() && glob_match(pattern, e.key()))
            .map(|e| e.key().clone())
            .collect())
    }

    async fn ttl(&self, key: &str) -> CacheResult<i64> {
        self.ensure_open()?;
        Ok(match self.live(key) {
            None => TTL_MISSING,
            Some(StoredValue {
                expires_at: None, ..
            }) => TTL_NO_EXPIRY,
            Some(StoredValue {
                expires_at: Some(at),
                ..
            }) => {
                let remaining = at.saturating_duration_since(Instant::now());
                // round like the Redis server does
                ((remaining.as_millis() + 500) / 1000) as i64
            }
        })
    }

    async fn pipeline(&self, ops: &[BatchOp]) -> CacheResult<Vec<BatchValue>> {
        self.ensure_open()?;
        Ok(ops
            .iter()
            .map(|op| match op {
                BatchOp::Get { key } => BatchValue::Value(self.get_sync(key)),
                BatchOp::Set { key, value, ttl } => {
                    self.set_sync(key, value, *ttl);
                    BatchValue::Ok
                }
                BatchOp::Del { key } => BatchValue::Deleted(self.del_sync(key)),
            })
            .collect())
    }

    async fn flush(&self) -> CacheResult<()> {
        self.ensure_open()?;
        self.entries.clear();
        Ok(())
    }

    async fn close(&self) -> CacheResult<()> {
        self.open.store(false, Ordering::Release);
        Ok(())
    }

    fn provider_name(&self) -> &'static str {
        "memory"
    }
}
