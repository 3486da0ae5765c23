//! Backend store trait definition

use super::errors::CacheResult;
use async_trait::async_trait;
use std::time::Duration;

/// `ttl()` result for a key that exists without an expiry
pub const TTL_NO_EXPIRY: i64 = -1;

/// `ttl()` result for a key that does not exist
pub const TTL_MISSING: i64 = -2;

/// A single operation inside a pipelined batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    Get { key: String },
    Set {
        key: String,
        value: String,
        ttl: Option<Duration>,
    },
    Del { key: String },
}

impl BatchOp {
    /// Whether executing this op mutates the keyspace
    pub fn is_write(&self) -> bool {
        !matches!(self, Self::Get { .. })
    }

    pub fn key(&self) -> &str {
        match self {
            Self::Get { key } | Self::Set { key, .. } | Self::Del { key } => key,
        }
    }
}

/// Result of one [`BatchOp`], positionally aligned with the submitted ops
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchValue {
    /// Reply to a `Get`
    Value(Option<String>),
    /// Acknowledgement of a `Set`
    Ok,
    /// Number of keys removed by a `Del`
    Deleted(u64),
}

/// Contract for one physical key-value connection
///
/// Implemented by concrete stores (Redis, in-memory). Every method may fail
/// with a [`CacheError`](super::CacheError); the [`HybridManager`](super::HybridManager)
/// turns those into health transitions and routing decisions.
#[async_trait]
pub trait BackendStore: Send + Sync + std::fmt::Debug {
    /// Establish (or re-establish) the underlying connection
    async fn connect(&self) -> CacheResult<()>;

    /// Round-trip liveness probe against a connected store
    async fn ping(&self) -> CacheResult<()>;

    /// Get a value by key. `Ok(None)` on miss.
    async fn get(&self, key: &str) -> CacheResult<Option<String>>;

    /// Set a value. `ttl = None` stores the key without expiry.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> CacheResult<()>;

    /// Delete a key, returning how many keys were removed (0 or 1)
    async fn del(&self, key: &str) -> CacheResult<u64>;

    async fn exists(&self, key: &str) -> CacheResult<bool>;

    /// Atomic increment; an absent key starts at 0
    async fn incr_by(&self, key: &str, delta: i64) -> CacheResult<i64>;

    /// Set or overwrite the TTL of an existing key. `Ok(false)` when the key
    /// is absent.
    async fn expire(&self, key: &str, ttl: Duration) -> CacheResult<bool>;

    /// All keys matching a KEYS-style glob. Cost is linear in the keyspace.
    async fn keys(&self, pattern: &str) -> CacheResult<Vec<String>>;

    /// Seconds remaining, [`TTL_NO_EXPIRY`] or [`TTL_MISSING`]
    async fn ttl(&self, key: &str) -> CacheResult<i64>;

    /// Execute several operations in a single round trip
    async fn pipeline(&self, ops: &[BatchOp]) -> CacheResult<Vec<BatchValue>>;

    /// Remove every key in the store's database
    async fn flush(&self) -> CacheResult<()>;

    /// Drop the connection. Subsequent calls fail until `connect()` succeeds.
    async fn close(&self) -> CacheResult<()>;

    /// Name of the store implementation, for logs
    fn provider_name(&self) -> &'static str;
}
