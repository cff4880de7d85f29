//! Demonstration collaborator routes mounted under `/api/`.
//!
//! These handlers only see requests that passed signature validation. They
//! read the [`AuthContext`] extension and, where a caller identity is known,
//! attach a [`ResolvedUser`] so the signer can report it.

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::{Extension, Json};
use chrono::Utc;
use serde_json::Value;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{
    CreateProductRequest, EchoResponse, ListProductsQuery, PingResponse, Product,
    ProductListResponse,
};
use crate::signer::ResolvedUser;
use crate::state::AppState;
use crate::validator::AuthContext;

/// Header naming the acting user on the demonstration routes.
pub const USER_HEADER: &str = "x-user";

/// Longest accepted product name.
pub const MAX_PRODUCT_NAME_LENGTH: usize = 255;

/// Capacity of the in-memory catalogue.
pub const MAX_PRODUCTS: usize = 1_000;

/// Upper bound for `limit` on product listings.
pub const MAX_LIST_LIMIT: usize = 100;

fn resolved_user(headers: &HeaderMap) -> Option<ResolvedUser> {
    headers
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(|v| ResolvedUser(v.to_string()))
}

/// `GET /api/ping`
#[instrument(skip_all)]
pub async fn ping(Extension(ctx): Extension<AuthContext>) -> Json<PingResponse> {
    Json(PingResponse {
        message: "pong".to_string(),
        request_id: ctx.request_id,
        client_ip: ctx.client_ip,
    })
}

/// `POST /api/echo`
#[instrument(skip_all)]
pub async fn echo(Json(received): Json<Value>) -> Json<EchoResponse> {
    Json(EchoResponse {
        received,
        received_at: Utc::now(),
    })
}

/// `GET /api/text`: a plain-text response, which is never signed.
pub async fn plain_text() -> &'static str {
    "signed requests welcome"
}

/// `GET /api/shop/products/`
#[instrument(skip(state))]
pub async fn list_products(
    State(state): State<AppState>,
    Query(query): Query<ListProductsQuery>,
) -> Json<ProductListResponse> {
    let limit = query.limit.clamp(1, MAX_LIST_LIMIT);
    let products: Vec<Product> = state.products.read().iter().take(limit).cloned().collect();

    Json(ProductListResponse {
        count: products.len(),
        products,
    })
}

/// `POST /api/shop/products/`
#[instrument(skip_all)]
pub async fn create_product(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CreateProductRequest>,
) -> AppResult<(StatusCode, Option<Extension<ResolvedUser>>, Json<Product>)> {
    let name = request.name.trim();
    if name.is_empty() {
        return Err(AppError::BadRequest("Product name cannot be empty".to_string()));
    }
    if name.chars().count() > MAX_PRODUCT_NAME_LENGTH {
        return Err(AppError::BadRequest(format!(
            "Product name cannot exceed {MAX_PRODUCT_NAME_LENGTH} characters"
        )));
    }

    let product = Product {
        id: Uuid::new_v4(),
        name: name.to_string(),
        price_cents: request.price_cents,
        created_at: Utc::now(),
    };
    {
        let mut products = state.products.write();
        if products.len() >= MAX_PRODUCTS {
            return Err(AppError::BadRequest(format!(
                "Product catalogue is full ({MAX_PRODUCTS} products)"
            )));
        }
        products.push(product.clone());
    }
    info!(product_id = %product.id, "Product created");

    Ok((
        StatusCode::CREATED,
        resolved_user(&headers).map(Extension),
        Json(product),
    ))
}
