//! Application routing configuration with middleware stack.
//!
//! # Middleware Stack (outermost first)
//!
//! ```text
//! Request
//!    │
//!    ▼
//! ┌──────────────────┐
//! │   Request ID     │ ← Guarantees a UUID X-Request-Id
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │     Tracing      │ ← HTTP request/response logging
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │  Signature Auth  │ ← signed 401 on protected paths, signs JSON responses
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │      CORS        │ ← Cross-origin headers
//! └────────┬─────────┘
//!          ▼
//!      Handler
//! ```
//!
//! # Route Groups
//!
//! - `/health`, `/health/signature` - Health & nonce store report (never signed)
//! - `/api/...` - Demonstration collaborator routes (signature required)

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::handlers;
use crate::middleware::RequestIdLayer;
use crate::state::AppState;

/// Build the application router with all routes and middleware configured.
pub fn build_router(state: AppState) -> Router {
    let config = &state.config;
    let cors = build_cors_layer(&config.cors_allowed_origins);

    let mut router = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/health/signature", get(handlers::signature_health))
        .route("/api/ping", get(handlers::ping))
        .route("/api/echo", post(handlers::echo))
        .route("/api/text", get(handlers::plain_text))
        .route(
            "/api/shop/products/",
            get(handlers::list_products).post(handlers::create_product),
        );

    // Applied bottom to top: the last layer added runs first.

    router = router.layer(DefaultBodyLimit::max(config.max_request_body_size));
    router = router.layer(cors);

    info!(
        protected = ?config.protected_paths,
        excluded = ?config.excluded_paths,
        window_secs = config.validity_window.as_secs(),
        failure_limit = config.failure_limit,
        "Signature authentication enabled"
    );
    router = router.layer(state.auth.clone());

    router = router.layer(TraceLayer::new_for_http());
    router = router.layer(RequestIdLayer::new());

    router.with_state(state)
}

/// Build CORS layer from configuration. `*` allows any origin.
fn build_cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let allow_any = allowed_origins.iter().any(|o| o == "*");

    if allow_any {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::sync::Arc;

    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use serde_json::Value;
    use tower::ServiceExt;

    use super::*;
    use crate::config::Config;
    use crate::nonce::InMemoryNonceStore;
    use crate::signature::SecretKey;

    #[test]
    fn test_build_cors_layer_variants() {
        let _any = build_cors_layer(&["*".to_string()]);
        let _specific = build_cors_layer(&[
            "https://example.com".to_string(),
            "not a url".to_string(),
        ]);
    }

    #[tokio::test]
    async fn test_health_routes_skip_signature() {
        let config = Config {
            secret_key: SecretKey::new("s3cr3t-key-padding-to-32-chars!!"),
            ..Config::default()
        };
        let state = AppState::new(config, Arc::new(InMemoryNonceStore::new(10))).unwrap();
        let app = build_router(state.clone());

        let response = app
            .clone()
            .oneshot(Request::builder().uri("/health/signature").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-request-id"));
        assert!(!response.headers().contains_key("x-signature"));

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["backend"], "in-process");
        assert_eq!(value["fallback_active"], true);

        let response = app
            .oneshot(Request::builder().uri("/api/ping").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        state.shutdown().await;
    }
}
