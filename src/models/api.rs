use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::nonce::NonceStats;

/// Response for `GET /health`.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// "healthy", or "degraded" when running on the in-process fallback
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub timestamp: DateTime<Utc>,
}

/// Response for `GET /health/signature`.
#[derive(Debug, Serialize)]
pub struct SignatureHealthResponse {
    /// Active nonce store backend (`redis`, `in-process`, ...)
    pub backend: &'static str,
    /// Nonces are shared between instances
    pub shared_cache: bool,
    /// The in-process store is standing in for the shared cache
    pub fallback_active: bool,
    pub validity_window_secs: u64,
    pub stats: NonceStats,
    /// Age of the background snapshot used for `stats`
    pub stats_age_seconds: Option<u64>,
    pub timestamp: DateTime<Utc>,
}

/// Response for `GET /api/ping`.
#[derive(Debug, Serialize)]
pub struct PingResponse {
    pub message: String,
    pub request_id: Uuid,
    pub client_ip: String,
}

/// Response for `POST /api/echo`.
#[derive(Debug, Serialize)]
pub struct EchoResponse {
    pub received: Value,
    pub received_at: DateTime<Utc>,
}

/// A product in the demonstration catalogue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Product {
    pub id: Uuid,
    pub name: String,
    pub price_cents: u64,
    pub created_at: DateTime<Utc>,
}

/// Request body for `POST /api/shop/products/`.
#[derive(Debug, Deserialize)]
pub struct CreateProductRequest {
    pub name: String,
    #[serde(default)]
    pub price_cents: u64,
}

/// Query parameters for `GET /api/shop/products/`.
#[derive(Debug, Deserialize)]
pub struct ListProductsQuery {
    /// Maximum number of products to return
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    20
}

/// Response for `GET /api/shop/products/`.
#[derive(Debug, Serialize)]
pub struct ProductListResponse {
    pub products: Vec<Product>,
    pub count: usize,
}
