//! Cache facade
//!
//! [`CacheService`] is the only interface application code should use. It
//! encodes values as JSON, routes through the [`HybridManager`] and never
//! surfaces an infrastructure failure: every operation returns a value or its
//! documented sentinel.
//!
//! | Operation | On failure |
//! |---|---|
//! | `set`, `delete`, `invalidate`, `set_many`, `flush` | no-op |
//! | `get`, `get_many` | `None` |
//! | `exists`, `expire` | `false` |
//! | `ttl` | `-1` |
//! | `increment` | `0` |
//!
//! A miss and a failure are indistinguishable through `get`; use
//! [`CacheService::stats`] or the logs to tell them apart.

use super::manager::HybridManager;
use super::pattern::invalidate_pattern;
use super::traits::{BatchOp, BatchValue, TTL_NO_EXPIRY};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};

/// TTL applied when callers don't pass one
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// Counters for facade outcomes since construction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Backend or serialization failures swallowed by the facade
    pub errors: u64,
    /// Operations skipped because no backend was available
    pub skipped: u64,
    /// `get_or_set` fetch function invocations
    pub fetches: u64,
}

#[derive(Debug, Default)]
struct StatCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    errors: AtomicU64,
    skipped: AtomicU64,
    fetches: AtomicU64,
}

impl StatCounters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Best-effort JSON cache over a [`HybridManager`]
#[derive(Debug, Clone)]
pub struct CacheService {
    manager: HybridManager,
    availability: watch::Receiver<bool>,
    default_ttl: Duration,
    stats: Arc<StatCounters>,
}

impl CacheService {
    /// Wrap a manager, taking the default TTL from its configuration
    pub fn new(manager: HybridManager) -> Self {
        let default_ttl = manager.config().default_ttl();
        Self::with_default_ttl(manager, default_ttl)
    }

    pub fn with_default_ttl(manager: HybridManager, default_ttl: Duration) -> Self {
        Self {
            availability: manager.subscribe_availability(),
            manager,
            default_ttl,
            stats: Arc::new(StatCounters::default()),
        }
    }

    pub fn manager(&self) -> &HybridManager {
        &self.manager
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Last published availability. Never touches the network.
    pub fn is_available(&self) -> bool {
        *self.availability.borrow()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.stats.hits.load(Ordering::Relaxed),
            misses: self.stats.misses.load(Ordering::Relaxed),
            errors: self.stats.errors.load(Ordering::Relaxed),
            skipped: self.stats.skipped.load(Ordering::Relaxed),
            fetches: self.stats.fetches.load(Ordering::Relaxed),
        }
    }

    /// Store `value` as JSON under `key`. `ttl = None` uses the default TTL.
    pub async fn set<T>(&self, key: &str, value: &T, ttl: Option<Duration>)
    where
        T: Serialize + ?Sized,
    {
        let encoded = match serde_json::to_string(value) {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!(key = key, error = %e, "Cache value serialization failed, skipping set");
                StatCounters::bump(&self.stats.errors);
                return;
            }
        };
        if !self.ready().await {
            return;
        }

        let ttl = ttl.unwrap_or(self.default_ttl);
        match self.manager.set(key, &encoded, Some(ttl)).await {
            Ok(()) => debug!(key = key, ttl_secs = ttl.as_secs(), "Cache set"),
            Err(e) => self.record_error("set", key, &e),
        }
    }

    /// Decoded value for `key`, or `None` on miss, expiry, backend failure or
    /// decode failure
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        if !self.ready().await {
            return None;
        }

        match self.manager.get(key).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(value) => {
                    StatCounters::bump(&self.stats.hits);
                    debug!(key = key, "Cache hit");
                    Some(value)
                }
                Err(e) => {
                    warn!(key = key, error = %e, "Cached value could not be decoded, treating as miss");
                    StatCounters::bump(&self.stats.errors);
                    None
                }
            },
            Ok(None) => {
                StatCounters::bump(&self.stats.misses);
                debug!(key = key, "Cache miss");
                None
            }
            Err(e) => {
                self.record_error("get", key, &e);
                None
            }
        }
    }

    /// Remove `key`. Absent keys are not an error.
    pub async fn delete(&self, key: &str) {
        if !self.ready().await {
            return;
        }
        if let Err(e) = self.manager.del(key).await {
            self.record_error("delete", key, &e);
        }
    }

    pub async fn exists(&self, key: &str) -> bool {
        if !self.ready().await {
            return false;
        }
        self.manager.exists(key).await.unwrap_or_else(|e| {
            self.record_error("exists", key, &e);
            false
        })
    }

    /// Seconds until `key` expires: `-1` without expiry (or on failure),
    /// `-2` when absent
    pub async fn ttl(&self, key: &str) -> i64 {
        if !self.ready().await {
            return TTL_NO_EXPIRY;
        }
        self.manager.ttl(key).await.unwrap_or_else(|e| {
            self.record_error("ttl", key, &e);
            TTL_NO_EXPIRY
        })
    }

    /// Increment the counter at `key` by `by`, returning the new value.
    ///
    /// Returns `0` on failure, which is indistinguishable from a counter that
    /// legitimately reached zero.
    pub async fn increment(&self, key: &str, by: i64) -> i64 {
        if !self.ready().await {
            return 0;
        }
        self.manager.incr_by(key, by).await.unwrap_or_else(|e| {
            self.record_error("increment", key, &e);
            0
        })
    }

    /// Set the TTL of an existing key. `false` if absent or on failure.
    pub async fn expire(&self, key: &str, ttl: Duration) -> bool {
        if !self.ready().await {
            return false;
        }
        self.manager.expire(key, ttl).await.unwrap_or_else(|e| {
            self.record_error("expire", key, &e);
            false
        })
    }

    /// Delete every key matching a KEYS-style glob, returning how many were
    /// deleted. A failed scan makes this a no-op.
    pub async fn invalidate(&self, pattern: &str) -> usize {
        if !self.ready().await {
            return 0;
        }
        match invalidate_pattern(&self.manager, pattern).await {
            Ok(report) => {
                if report.failed > 0 {
                    StatCounters::bump(&self.stats.errors);
                }
                report.deleted
            }
            Err(e) => {
                self.record_error("invalidate", pattern, &e);
                0
            }
        }
    }

    /// Read-through helper: cached value on hit, otherwise `fetch()` stored
    /// under `key` and returned.
    ///
    /// `fetch` runs at most once per call. Concurrent callers missing the same
    /// key each run their own `fetch` and the last write wins; there is no
    /// per-key coalescing. Errors from `fetch` are returned unchanged and
    /// nothing is cached for them.
    pub async fn get_or_set<T, E, F, Fut>(
        &self,
        key: &str,
        fetch: F,
        ttl: Option<Duration>,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(cached) = self.get::<T>(key).await {
            return Ok(cached);
        }

        StatCounters::bump(&self.stats.fetches);
        let value = fetch().await?;
        self.set(key, &value, ttl).await;
        Ok(value)
    }

    /// Store several entries in one round trip per backend. Entries whose
    /// value fails to serialize are skipped.
    pub async fn set_many<K, V, I>(&self, entries: I)
    where
        K: Into<String>,
        V: Serialize,
        I: IntoIterator<Item = (K, V, Option<Duration>)>,
    {
        let ops: Vec<BatchOp> = entries
            .into_iter()
            .filter_map(|(key, value, ttl)| {
                let key = key.into();
                match serde_json::to_string(&value) {
                    Ok(value) => Some(BatchOp::Set {
                        key,
                        value,
                        ttl: Some(ttl.unwrap_or(self.default_ttl)),
                    }),
                    Err(e) => {
                        warn!(key = %key, error = %e, "Cache value serialization failed, skipping entry");
                        StatCounters::bump(&self.stats.errors);
                        None
                    }
                }
            })
            .collect();

        if ops.is_empty() || !self.ready().await {
            return;
        }
        match self.manager.pipeline(&ops).await {
            Ok(_) => debug!(entries = ops.len(), "Cache set_many"),
            Err(e) => self.record_error("set_many", "<batch>", &e),
        }
    }

    /// Values for `keys` in order; `None` for misses and undecodable values.
    /// A failed batch yields all `None`.
    pub async fn get_many<T, K>(&self, keys: &[K]) -> Vec<Option<T>>
    where
        T: DeserializeOwned,
        K: AsRef<str>,
    {
        let none = || -> Vec<Option<T>> { keys.iter().map(|_| None).collect() };
        if keys.is_empty() || !self.ready().await {
            return none();
        }

        let ops: Vec<BatchOp> = keys
            .iter()
            .map(|key| BatchOp::Get {
                key: key.as_ref().to_string(),
            })
            .collect();

        let values = match self.manager.pipeline(&ops).await {
            Ok(values) => values,
            Err(e) => {
                self.record_error("get_many", "<batch>", &e);
                return none();
            }
        };

        keys.iter()
            .zip(values)
            .map(|(key, value)| match value {
                BatchValue::Value(Some(raw)) => match serde_json::from_str(&raw) {
                    Ok(decoded) => {
                        StatCounters::bump(&self.stats.hits);
                        Some(decoded)
                    }
                    Err(e) => {
                        warn!(key = key.as_ref(), error = %e, "Cached value could not be decoded, treating as miss");
                        StatCounters::bump(&self.stats.errors);
                        None
                    }
                },
                _ => {
                    StatCounters::bump(&self.stats.misses);
                    None
                }
            })
            .collect()
    }

    /// Clear the entire keyspace on every connected backend.
    ///
    /// Destructive; meant for administration and tests.
    pub async fn flush(&self) {
        if !self.ready().await {
            return;
        }
        if let Err(e) = self.manager.flush().await {
            self.record_error("flush", "*", &e);
        }
    }

    /// Initialize on first use, then consult the availability gate
    async fn ready(&self) -> bool {
        self.manager.ensure_ready().await;
        let available = *self.availability.borrow();
        if !available {
            StatCounters::bump(&self.stats.skipped);
            debug!("No cache backend available, skipping cache operation");
        }
        available
    }

    fn record_error(&self, op: &str, key: &str, error: &super::CacheError) {
        StatCounters::bump(&self.stats.errors);
        warn!(op = op, key = key, error = %error, "Cache operation failed, continuing without cache");
    }
}
