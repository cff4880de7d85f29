//! # Signature Auth
//!
//! HMAC-SHA256 request signing for Axum services, featuring:
//!
//! - **Request validation**: signature over method, path, canonical body,
//!   timestamp and nonce, checked in constant time
//! - **Replay protection**: single-use nonces in a shared Redis cache, with a
//!   bounded in-process fallback
//! - **Response signing**: JSON responses carry their own signature headers
//!   and optional processing metadata
//! - **Observability**: structured logging, Prometheus metrics, health report
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Axum HTTP Server                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Middleware (Request ID → Trace → Signature Auth)           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  RequestValidator            ResponseSigner                 │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Signature codec (canonical JSON, HMAC-SHA256)              │
//! ├─────────────────────────────────────────────────────────────┤
//! │  NonceStore: Redis cache  |  in-process fallback            │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use signature_auth::{AppState, Config, build_router, nonce};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let cache = nonce::connect_shared_cache(&config).await;
//!     let store = nonce::select_nonce_store(cache, &config).await?;
//!
//!     let state = AppState::new(config, store)?;
//!     let app = build_router(state);
//!
//!     // Start the server...
//!     Ok(())
//! }
//! ```
//!
//! ## Signing a Request
//!
//! ```rust
//! use signature_auth::SignatureHelper;
//! use serde_json::json;
//!
//! let helper = SignatureHelper::new("s3cr3t-key-padding-to-32-chars!!").unwrap();
//! let headers = helper.sign_request("POST", "/api/echo", Some(&json!({"name": "x"})));
//! assert_eq!(headers.signature.len(), 64);
//! ```

pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod nonce;
pub mod routes;
pub mod signature;
pub mod signer;
pub mod state;
pub mod utils;
pub mod validator;

// Re-exports for convenience
pub use config::Config;
pub use error::{AppError, AppResult, AuthError};
pub use middleware::{PathScope, SignatureAuth};
pub use nonce::{InMemoryNonceStore, NonceStats, NonceStore, RedisCache};
pub use routes::build_router;
pub use signature::{SecretKey, SignatureHelper, SignedHeaders};
pub use signer::{ResolvedUser, ResponseSigner};
pub use state::AppState;
pub use validator::{AuthContext, RequestValidator};
