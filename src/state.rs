//! Shared application state for Axum handlers.
//!
//! Holds the configuration, the signature authentication layer and the
//! selected nonce store, plus a background-refreshed snapshot of nonce store
//! statistics for `/health/signature`.
//!
//! # Structured Concurrency
//!
//! Background tasks are managed using `tokio_util::task::TaskTracker` and
//! `CancellationToken`. Call `shutdown()` to stop them before exit.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock as SyncRwLock;
use tokio::sync::RwLock;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, trace};

use crate::config::Config;
use crate::error::AppResult;
use crate::metrics;
use crate::middleware::SignatureAuth;
use crate::models::Product;
use crate::nonce::{NonceStats, NonceStore, memory};

/// Last nonce store statistics seen by the background task.
#[derive(Debug, Clone, Default)]
pub struct CachedStats {
    pub stats: Option<NonceStats>,
    pub last_updated: Option<Instant>,
}

impl CachedStats {
    /// Check if the snapshot hasn't been updated in `ttl`.
    pub fn is_stale(&self, ttl: Duration) -> bool {
        match self.last_updated {
            Some(updated) => updated.elapsed() > ttl,
            None => true,
        }
    }
}

/// Shared application state, cloned into every handler.
///
/// ```rust,ignore
/// let state = AppState::new(config, nonce_store)?;
/// // ... serve ...
/// state.shutdown().await;
/// ```
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    /// Signature authentication layer mounted by the router
    pub auth: SignatureAuth,
    pub nonce_store: Arc<dyn NonceStore>,
    pub started_at: Instant,
    /// In-memory catalogue backing the demonstration shop routes
    pub products: Arc<SyncRwLock<Vec<Product>>>,
    stats_cache: Arc<RwLock<CachedStats>>,
    task_tracker: TaskTracker,
    cancellation_token: CancellationToken,
}

impl AppState {
    /// Build the state around an already selected nonce store and spawn the
    /// stats refresh task.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if the configured header names are invalid.
    pub fn new(config: Config, nonce_store: Arc<dyn NonceStore>) -> AppResult<Self> {
        let auth = SignatureAuth::from_config(&config, nonce_store.clone())?;

        let state = Self {
            config: Arc::new(config),
            auth,
            nonce_store,
            started_at: Instant::now(),
            products: Arc::new(SyncRwLock::new(Vec::new())),
            stats_cache: Arc::new(RwLock::new(CachedStats::default())),
            task_tracker: TaskTracker::new(),
            cancellation_token: CancellationToken::new(),
        };

        state.spawn_stats_refresh_task();
        Ok(state)
    }

    /// Whether nonces are tracked by the in-process fallback rather than a
    /// shared cache.
    pub fn fallback_active(&self) -> bool {
        self.nonce_store.backend_name() == memory::BACKEND_NAME
    }

    pub async fn cached_stats(&self) -> CachedStats {
        self.stats_cache.read().await.clone()
    }

    /// Fetch fresh statistics and update the snapshot.
    pub async fn refresh_stats(&self) -> NonceStats {
        refresh_stats_impl(&self.nonce_store, &self.stats_cache).await
    }

    fn spawn_stats_refresh_task(&self) {
        let store = self.nonce_store.clone();
        let stats_cache = self.stats_cache.clone();
        let auth = self.auth.clone();
        let period = self.config.stats_report_interval;
        let cancel = self.cancellation_token.clone();

        self.task_tracker.spawn(async move {
            let mut ticker = interval(period);

            loop {
                tokio::select! {
                    biased;

                    _ = cancel.cancelled() => {
                        debug!("Stats refresh task received cancellation signal");
                        break;
                    }
                    _ = ticker.tick() => {
                        let stats = refresh_stats_impl(&store, &stats_cache).await;
                        metrics::set_nonce_store_stats(&stats);
                        auth.prune_failure_state();
                    }
                }
            }

            debug!("Stats refresh task shutting down");
        });
    }

    /// Signal background tasks to stop and wait for them.
    pub async fn shutdown(&self) {
        info!("Initiating graceful shutdown of background tasks");
        self.cancellation_token.cancel();
        self.task_tracker.close();
        self.task_tracker.wait().await;
        info!("All background tasks have completed");
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

async fn refresh_stats_impl(
    store: &Arc<dyn NonceStore>,
    stats_cache: &Arc<RwLock<CachedStats>>,
) -> NonceStats {
    let stats = store.stats().await;

    let mut cache = stats_cache.write().await;
    cache.stats = Some(stats.clone());
    cache.last_updated = Some(Instant::now());
    trace!(backend = stats.backend, active = stats.active_entries, "Nonce store stats refreshed");

    stats
}
