#![allow(clippy::doc_markdown)] // Allow technical terms like Redis, KEYS in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Hybrid Cache
//!
//! Dual-backend (local + cloud) Redis cache with a best-effort facade.
//!
//! ## Overview
//!
//! Application code talks to [`cache::CacheService`]. Behind it a
//! [`cache::HybridManager`] owns one handle per backend, routes reads by
//! preference with fallback, writes to both backends independently, and
//! tracks each handle's health with bounded-backoff reconnection. A cache
//! outage costs latency, never a failed request.
//!
//! ## Module Organization
//!
//! - [`cache`] - Stores, handles, the hybrid manager and the facade
//! - [`config`] - Configuration loading and validation
//! - [`logging`] - Structured logging setup
//! - [`shutdown`] - Signal handling and graceful close
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use hybrid_cache::cache::{CacheService, HybridManager};
//! use hybrid_cache::config::HybridCacheConfig;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = HybridManager::from_config(Arc::new(HybridCacheConfig::in_memory()))?;
//! let cache = CacheService::new(manager);
//!
//! cache.set("greeting", &"hello", None).await;
//! assert_eq!(cache.get::<String>("greeting").await.as_deref(), Some("hello"));
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod logging;
pub mod shutdown;

pub use cache::{CacheError, CacheResult, CacheService, HybridManager};
pub use config::{ConfigManager, ConfigurationError, HybridCacheConfig};
