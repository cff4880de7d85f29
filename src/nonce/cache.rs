//! Shared-cache nonce store.
//!
//! Keys have the form `{prefix}:{nonce}`; presence of a key means the nonce
//! is used. Expiry is delegated to the cache's TTL, so the store never sweeps.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, error};

use super::{NonceStats, NonceStore, NonceStoreError};
use crate::error::nonce_hint;
use crate::utils::unix_now;

/// Errors reported by a [`CacheBackend`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("cache connection failed: {0}")]
    Connection(String),

    #[error("cache command failed: {0}")]
    Command(String),

    #[error("cache backend does not support {0}")]
    Unsupported(&'static str),
}

/// Key-value cache capability injected into [`CacheNonceStore`].
///
/// Implementations must be safe to call from many tasks at once. `add` must
/// be atomic: of several concurrent `add` calls for one key, at most one
/// returns `true`.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Short backend name (e.g. `redis`).
    fn name(&self) -> &'static str;

    /// Whether `set`/`add` honour their `ttl` argument.
    fn ttl_supported(&self) -> bool;

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError>;

    /// Store `value` only if `key` is absent. Returns whether it was stored.
    async fn add(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, CacheError>;

    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    /// Liveness check: write and remove a short-lived `{prefix}_liveness` key.
    async fn check_liveness(&self, prefix: &str) -> Result<(), CacheError> {
        let key = format!("{prefix}_liveness");
        self.set(&key, "liveness", Duration::from_secs(1)).await?;
        self.delete(&key).await
    }
}

/// Nonce store backed by a shared [`CacheBackend`].
pub struct CacheNonceStore {
    backend: Arc<dyn CacheBackend>,
    prefix: String,
    op_timeout: Duration,
    recorded: AtomicU64,
}

impl CacheNonceStore {
    /// Create a store using `prefix` for its keys. Every backend call is
    /// bounded by `op_timeout`.
    pub fn new(backend: Arc<dyn CacheBackend>, prefix: impl Into<String>, op_timeout: Duration) -> Self {
        Self {
            backend,
            prefix: prefix.into(),
            op_timeout,
            recorded: AtomicU64::new(0),
        }
    }

    /// Check that the backend supports TTLs and answers the liveness check.
    pub async fn check_liveness(&self) -> Result<(), NonceStoreError> {
        if !self.backend.ttl_supported() {
            return Err(CacheError::Unsupported("key expiry (TTL)").into());
        }
        self.bounded(self.backend.check_liveness(&self.prefix)).await
    }

    fn key(&self, nonce: &str) -> String {
        format!("{}:{}", self.prefix, nonce)
    }

    /// Run a backend call under the operation timeout.
    async fn bounded<T, F>(&self, op: F) -> Result<T, NonceStoreError>
    where
        F: Future<Output = Result<T, CacheError>>,
    {
        match timeout(self.op_timeout, op).await {
            Ok(result) => result.map_err(|e| {
                error!(error = %e, backend = self.backend.name(), "Nonce cache call failed");
                NonceStoreError::from(e)
            }),
            Err(_) => {
                error!(
                    timeout_ms = self.op_timeout.as_millis() as u64,
                    backend = self.backend.name(),
                    "Nonce cache call timed out"
                );
                Err(NonceStoreError::Timeout(self.op_timeout))
            }
        }
    }
}

/// Remaining lifetime of an entry, never less than one second.
fn ttl_until(expires_at: i64, now: i64) -> Duration {
    let secs = expires_at.saturating_sub(now).max(1);
    Duration::from_secs(u64::try_from(secs).unwrap_or(1))
}

#[async_trait]
impl NonceStore for CacheNonceStore {
    fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    async fn is_used(&self, nonce: &str) -> Result<bool, NonceStoreError> {
        let key = self.key(nonce);
        let value = self.bounded(self.backend.get(&key)).await?;
        Ok(value.is_some())
    }

    async fn mark_used(&self, nonce: &str, expires_at: i64) -> Result<(), NonceStoreError> {
        let key = self.key(nonce);
        let ttl = ttl_until(expires_at, unix_now());
        self.bounded(self.backend.set(&key, &expires_at.to_string(), ttl))
            .await?;
        self.recorded.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn check_and_mark(
        &self,
        nonce: &str,
        expires_at: i64,
    ) -> Result<bool, NonceStoreError> {
        let key = self.key(nonce);
        let ttl = ttl_until(expires_at, unix_now());
        let stored = self
            .bounded(self.backend.add(&key, &expires_at.to_string(), ttl))
            .await?;

        if stored {
            self.recorded.fetch_add(1, Ordering::Relaxed);
        } else {
            debug!(nonce = %nonce_hint(nonce), "Nonce already claimed in shared cache");
        }
        Ok(stored)
    }

    async fn stats(&self) -> NonceStats {
        NonceStats {
            backend: self.backend.name(),
            recorded_total: self.recorded.load(Ordering::Relaxed),
            ttl_managed: true,
            ..NonceStats::default()
        }
    }
}


#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::testing::{FailingCache, MemoryCache, SlowCache};
    use super::*;

    fn store_with(cache: Arc<MemoryCache>) -> CacheNonceStore {
        CacheNonceStore::new(cache, "sig_nonce", Duration::from_millis(500))
    }

    #[tokio::test]
    async fn test_keys_are_prefixed() {
        let cache = Arc::new(MemoryCache::default());
        let store = store_with(cache.clone());

        store.mark_used("abc", unix_now() + 360).await.unwrap();

        assert!(cache.contains("sig_nonce:abc"));
        assert!(store.is_used("abc").await.unwrap());
        assert!(!store.is_used("other").await.unwrap());
    }

    #[tokio::test]
    async fn test_ttl_follows_expiry() {
        let cache = Arc::new(MemoryCache::default());
        let store = store_with(cache.clone());

        store.mark_used("abc", unix_now() + 360).await.unwrap();

        let ttl = cache.ttl_of("sig_nonce:abc").unwrap();
        assert!(ttl > Duration::from_secs(350) && ttl <= Duration::from_secs(360));
    }

    #[tokio::test]
    async fn test_check_and_mark_claims_once() {
        let cache = Arc::new(MemoryCache::default());
        let store = store_with(cache);
        let expires_at = unix_now() + 360;

        assert!(store.check_and_mark("n1", expires_at).await.unwrap());
        assert!(!store.check_and_mark("n1", expires_at).await.unwrap());
        assert_eq!(store.stats().await.recorded_total, 1);
    }

    #[tokio::test]
    async fn test_stats_are_ttl_managed() {
        let store = store_with(Arc::new(MemoryCache::default()));
        let stats = store.stats().await;
        assert_eq!(stats.backend, "memory-cache");
        assert!(stats.ttl_managed);
        assert_eq!(stats.max_size, None);
    }

    #[tokio::test]
    async fn test_backend_errors_propagate() {
        let store = CacheNonceStore::new(Arc::new(FailingCache), "p", Duration::from_millis(500));
        assert!(matches!(
            store.is_used("n").await,
            Err(NonceStoreError::Cache(CacheError::Connection(_)))
        ));
        assert!(store.check_and_mark("n", unix_now() + 10).await.is_err());
    }

    #[tokio::test]
    async fn test_slow_backend_times_out() {
        let cache = SlowCache {
            delay: Duration::from_millis(300),
        };
        let store = CacheNonceStore::new(Arc::new(cache), "p", Duration::from_millis(20));

        assert!(matches!(
            store.is_used("n").await,
            Err(NonceStoreError::Timeout(_))
        ));
    }

    #[tokio::test]
    async fn test_liveness_check_requires_ttl_support() {
        let store = store_with(Arc::new(MemoryCache::without_ttl()));
        assert!(matches!(
            store.check_liveness().await,
            Err(NonceStoreError::Cache(CacheError::Unsupported(_)))
        ));

        let store = store_with(Arc::new(MemoryCache::default()));
        assert!(store.check_liveness().await.is_ok());
    }

    #[test]
    fn test_ttl_until_is_at_least_one_second() {
        assert_eq!(ttl_until(100, 200), Duration::from_secs(1));
        assert_eq!(ttl_until(460, 100), Duration::from_secs(360));
    }
}
