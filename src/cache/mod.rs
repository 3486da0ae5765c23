//! # Hybrid Cache
//!
//! A best-effort cache over two independent key-value backends: a low-latency
//! "local" store that may be unavailable and a durable "cloud" store.
//!
//! ## Layers
//!
//! ```text
//! application -> CacheService -> HybridManager -> BackendHandle x2 -> BackendStore
//!                     ^                 |
//!                     +-- availability -+   (watch channel)
//! ```
//!
//! - [`BackendStore`]: one physical connection ([`RedisStore`], [`MemoryStore`])
//! - [`HybridManager`]: read preference, dual write, health, reconnection
//! - [`CacheService`]: JSON values, read-through `get_or_set`, batches, and a
//!   no-throw contract
//!
//! ## Example
//!
//! ```rust,no_run
//! use hybrid_cache::cache::{CacheService, HybridManager};
//! use hybrid_cache::config::ConfigManager;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ConfigManager::load()?;
//! let cache = CacheService::new(HybridManager::from_config(config.config_arc())?);
//!
//! let page: Vec<String> = cache
//!     .get_or_set(
//!         "alunos:page:1:limit:50:sort:nome",
//!         || async { Ok::<_, std::io::Error>(vec!["Ana".to_string()]) },
//!         Some(Duration::from_secs(60)),
//!     )
//!     .await?;
//! cache.invalidate("alunos:*").await;
//! # let _ = page;
//! # Ok(())
//! # }
//! ```

pub mod errors;
pub mod handle;
pub mod manager;
pub mod pattern;
pub mod reconnect;
pub mod service;
pub mod stores;
pub mod traits;

pub use errors::{CacheError, CacheResult};
pub use handle::{BackendHealth, BackendRole, ConnectionState, HealthSnapshot};
pub use manager::HybridManager;
pub use pattern::{glob_match, invalidate_pattern, InvalidationReport};
pub use reconnect::ReconnectPolicy;
pub use service::{CacheService, CacheStats, DEFAULT_TTL};
pub use stores::{MemoryStore, RedisStore};
pub use traits::{BackendStore, BatchOp, BatchValue, TTL_MISSING, TTL_NO_EXPIRY};
