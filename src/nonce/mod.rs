//! Replay-detection registry for request nonces.
//!
//! # Implementations
//!
//! - [`CacheNonceStore`]: delegates to a shared [`CacheBackend`] (Redis in
//!   production). Entries expire through the cache's TTL; every call is
//!   bounded by a timeout.
//! - [`InMemoryNonceStore`]: bounded in-process map used when no shared cache
//!   is reachable. Expired entries are swept lazily and the least recently
//!   accessed quarter is evicted when the store is full.
//!
//! # Atomicity
//!
//! [`NonceStore::check_and_mark`] is the claim operation: among concurrent
//! callers presenting the same unused nonce, exactly one receives `true`.
//! The cache store relies on the backend's set-if-absent; the in-process
//! store holds its mutex across the test and the insert.

pub mod cache;
pub mod memory;
pub mod redis_cache;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{AppError, AppResult};

pub use cache::{CacheBackend, CacheError, CacheNonceStore};
pub use memory::InMemoryNonceStore;
pub use redis_cache::RedisCache;

/// Errors from a nonce store. The validator treats every one as a rejection.
#[derive(Error, Debug)]
pub enum NonceStoreError {
    #[error("Nonce cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Nonce cache operation timed out after {0:?}")]
    Timeout(Duration),
}

/// Point-in-time statistics of a nonce store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NonceStats {
    /// Backend name (e.g. `redis`, `in-process`)
    pub backend: &'static str,
    /// Entries currently held (including expired ones not yet swept)
    pub total_entries: usize,
    /// Entries whose expiry has not passed
    pub active_entries: usize,
    /// Entries past their expiry awaiting cleanup
    pub expired_entries: usize,
    /// Capacity bound, for bounded stores
    pub max_size: Option<usize>,
    /// Nonces recorded through this store since startup
    pub recorded_total: u64,
    /// True when expiry is delegated to the backend's TTL, in which case the
    /// entry counts are not tracked locally and stay at zero
    pub ttl_managed: bool,
}

/// Capability interface of a replay-detection registry.
///
/// `expires_at` values are absolute Unix timestamps in seconds.
#[async_trait]
pub trait NonceStore: Send + Sync {
    /// Backend name, reported in request contexts and debug diagnostics.
    fn backend_name(&self) -> &'static str;

    /// Whether `nonce` has been recorded and has not yet expired.
    async fn is_used(&self, nonce: &str) -> Result<bool, NonceStoreError>;

    /// Record `nonce` as used until `expires_at`.
    async fn mark_used(&self, nonce: &str, expires_at: i64) -> Result<(), NonceStoreError>;

    /// Atomically record `nonce` unless it is already in use.
    ///
    /// Returns `true` if this call recorded the nonce, `false` if another
    /// caller holds it.
    async fn check_and_mark(&self, nonce: &str, expires_at: i64)
    -> Result<bool, NonceStoreError>;

    /// Current statistics.
    async fn stats(&self) -> NonceStats;
}

/// Connect to the shared cache configured by `SIGNATURE_AUTH_CACHE_URL`.
///
/// Returns `None` (after logging why) when no URL is configured or the
/// connection cannot be established in time.
pub async fn connect_shared_cache(config: &Config) -> Option<Arc<dyn CacheBackend>> {
    let Some(url) = config.cache_url.as_deref() else {
        info!("No shared nonce cache configured (SIGNATURE_AUTH_CACHE_URL unset)");
        return None;
    };

    match RedisCache::connect(url, config.cache_timeout).await {
        Ok(cache) => Some(Arc::new(cache)),
        Err(e) => {
            warn!(error = %e, "Shared nonce cache unavailable");
            None
        }
    }
}

/// Choose the nonce store for this process.
///
/// 1. A shared cache that supports TTLs and answers the liveness check is used.
/// 2. Otherwise the in-process store is used if fallback is enabled.
/// 3. Otherwise startup fails with `AppError::CacheBackendUnavailable`.
pub async fn select_nonce_store(
    cache: Option<Arc<dyn CacheBackend>>,
    config: &Config,
) -> AppResult<Arc<dyn NonceStore>> {
    let unavailable_reason = match cache {
        Some(cache) => {
            let store = CacheNonceStore::new(
                cache,
                config.nonce_cache_prefix.clone(),
                config.cache_timeout,
            );
            match store.check_liveness().await {
                Ok(()) => {
                    info!(backend = store.backend_name(), "Using shared cache for nonce tracking");
                    return Ok(Arc::new(store));
                }
                Err(e) => {
                    warn!(error = %e, "Shared nonce cache failed liveness check");
                    e.to_string()
                }
            }
        }
        None => "no shared cache configured".to_string(),
    };

    if config.use_cache_fallback {
        warn!(
            max_size = config.fallback_max_size,
            "Using in-process nonce store; replay protection is not shared between instances"
        );
        return Ok(Arc::new(InMemoryNonceStore::new(config.fallback_max_size)));
    }

    Err(AppError::CacheBackendUnavailable(format!(
        "{unavailable_reason}; in-process fallback is disabled \
         (set SIGNATURE_AUTH_USE_CACHE_FALLBACK=true or configure SIGNATURE_AUTH_CACHE_URL)"
    )))
}
