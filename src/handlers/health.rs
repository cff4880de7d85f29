//! Health endpoints.
//!
//! - `GET /health` - Liveness, degraded when running on the in-process
//!   nonce fallback
//! - `GET /health/signature` - Nonce store backend and statistics
//!
//! Both live under excluded prefixes and are never signature-checked.

use axum::Json;
use axum::extract::State;
use chrono::Utc;
use tracing::instrument;

use crate::models::{HealthResponse, SignatureHealthResponse};
use crate::state::AppState;

/// Health check endpoint. Always returns 200 OK.
///
/// ```json
/// {
///   "status": "healthy",
///   "version": "0.1.0",
///   "uptime_seconds": 42,
///   "timestamp": "2024-01-15T10:30:00Z"
/// }
/// ```
#[instrument(skip(state))]
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let status = if state.fallback_active() && state.config.cache_url.is_some() {
        "degraded"
    } else {
        "healthy"
    };

    Json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.uptime_seconds(),
        timestamp: Utc::now(),
    })
}

/// Nonce store report.
///
/// Serves the background snapshot while it is fresh and queries the store
/// directly otherwise.
#[instrument(skip(state))]
pub async fn signature_health(State(state): State<AppState>) -> Json<SignatureHealthResponse> {
    let cached = state.cached_stats().await;
    let (stats, stats_age_seconds) = match cached.stats {
        Some(stats) if !cached.is_stale(state.config.stats_report_interval * 2) => {
            let age = cached.last_updated.map(|t| t.elapsed().as_secs());
            (stats, age)
        }
        _ => (state.refresh_stats().await, Some(0)),
    };

    let fallback_active = state.fallback_active();
    Json(SignatureHealthResponse {
        backend: state.nonce_store.backend_name(),
        shared_cache: !fallback_active,
        fallback_active,
        validity_window_secs: state.auth.validator().window_secs(),
        stats,
        stats_age_seconds,
        timestamp: Utc::now(),
    })
}
