//! Integration tests for the signature authentication service.
//!
//! Most tests drive the router in-process with `tower::ServiceExt::oneshot`.
//! `test_http_round_trip` serves the app on an ephemeral port and talks to it
//! with `reqwest`. The Redis tests start a container with testcontainers and
//! are ignored by default (they need Docker):
//!
//! Run with: `cargo test --test integration_tests -- --include-ignored`
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{HeaderMap, Request, StatusCode};
use reqwest::Client;
use serde_json::{Value, json};
use testcontainers::core::{IntoContainerPort, WaitFor};
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, GenericImage};
use tower::ServiceExt;

use signature_auth::nonce::{self, CacheNonceStore};
use signature_auth::signature::SecretKey;
use signature_auth::utils::unix_now;
use signature_auth::{
    AppState, Config, InMemoryNonceStore, NonceStore, RedisCache, SignatureHelper, build_router,
};

const SECRET: &str = "s3cr3t-key-padding-to-32-chars!!";

fn test_config() -> Config {
    Config {
        secret_key: SecretKey::new(SECRET),
        failure_limit: 0,
        metrics_port: 0,
        ..Config::default()
    }
}

fn app_with(config: Config, store: Arc<dyn NonceStore>) -> (AppState, Router) {
    let state = AppState::new(config, store).unwrap();
    let router = build_router(state.clone());
    (state, router)
}

fn app() -> (AppState, Router) {
    app_with(test_config(), Arc::new(InMemoryNonceStore::new(1_000)))
}

fn helper() -> SignatureHelper {
    SignatureHelper::new(SECRET).unwrap()
}

fn signed_request(method: &str, path: &str, body: Option<&Value>) -> Request<Body> {
    let headers = helper().sign_request(method, path, body);
    build_request(method, path, body, headers.header_pairs())
}

fn build_request(
    method: &str,
    path: &str,
    body: Option<&Value>,
    headers: impl IntoIterator<Item = (&'static str, String)>,
) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(path)
        .header("content-type", "application/json");
    for (name, value) in headers {
        builder = builder.header(name, value);
    }
    let body = body.map(|b| Body::from(b.to_string())).unwrap_or_default();
    builder.body(body).unwrap()
}

async fn read_body(response: axum::response::Response) -> (StatusCode, HeaderMap, Vec<u8>) {
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, headers, bytes.to_vec())
}

fn assert_signed(status: StatusCode, headers: &HeaderMap, body: &[u8]) {
    let header = |name: &str| headers.get(name).unwrap().to_str().unwrap().to_string();
    assert!(
        helper().verify_response(
            body,
            status.as_u16(),
            &header("x-signature"),
            &header("x-timestamp"),
            &header("x-nonce"),
        ),
        "response signature should verify"
    );
}

// =============================================================================
// Request authentication
// =============================================================================

#[tokio::test]
async fn test_signed_request_is_accepted_and_response_signed() {
    let (state, app) = app();
    let body = json!({"name": "x", "price_cents": 250});

    let req = signed_request("POST", "/api/shop/products/", Some(&body));
    let (status, headers, bytes) = read_body(app.oneshot(req).await.unwrap()).await;

    assert_eq!(status, StatusCode::CREATED);
    assert_signed(status, &headers, &bytes);

    let value: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(value["name"], "x");
    assert_eq!(value["authenticated"], true);
    assert_eq!(value["user"], "Anonymous");
    assert_eq!(
        value["request_id"],
        headers.get("x-request-id").unwrap().to_str().unwrap()
    );
    assert!(value.get("cache_backend").is_none());

    state.shutdown().await;
}

#[tokio::test]
async fn test_replayed_request_is_rejected() {
    let (state, app) = app();
    let body = json!({"name": "x"});
    let headers = helper().sign_request_at("POST", "/api/shop/products/", Some(&body), unix_now(), "n1");

    let first = build_request("POST", "/api/shop/products/", Some(&body), headers.header_pairs());
    let response = app.clone().oneshot(first).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let replay = build_request("POST", "/api/shop/products/", Some(&body), headers.header_pairs());
    let (status, resp_headers, bytes) = read_body(app.oneshot(replay).await.unwrap()).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_signed(status, &resp_headers, &bytes);
    let value: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(value["message"], "Replay attack detected");
    assert_eq!(value["code"], "SIGNATURE_INVALID");
    assert_eq!(value["user"], "Anonymous");
    assert!(value.get("debug").is_none());

    state.shutdown().await;
}

#[tokio::test]
async fn test_body_key_order_does_not_matter() {
    let (state, app) = app();
    let signed_body = json!({"a": 1, "b": 2});
    let headers = helper().sign_request("POST", "/api/echo", Some(&signed_body));

    let req = Request::builder()
        .method("POST")
        .uri("/api/echo")
        .header("content-type", "application/json")
        .header("x-signature", headers.signature)
        .header("x-timestamp", headers.timestamp)
        .header("x-nonce", headers.nonce)
        .body(Body::from(r#"{ "b": 2,  "a": 1 }"#))
        .unwrap();

    let response = app.oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    state.shutdown().await;
}

#[tokio::test]
async fn test_tampered_body_is_rejected() {
    let (state, app) = app();
    let headers = helper().sign_request("POST", "/api/echo", Some(&json!({"amount": 10})));
    let req = build_request(
        "POST",
        "/api/echo",
        Some(&json!({"amount": 1000})),
        headers.header_pairs(),
    );

    let (status, _, bytes) = read_body(app.oneshot(req).await.unwrap()).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let value: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(value["message"], "Invalid signature");

    state.shutdown().await;
}

#[tokio::test]
async fn test_expired_request_is_rejected() {
    let (state, app) = app();
    let headers = helper().sign_request_at("GET", "/api/ping", None, unix_now() - 301, "old");
    let req = build_request("GET", "/api/ping", None, headers.header_pairs());

    let (status, _, bytes) = read_body(app.oneshot(req).await.unwrap()).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let value: Value = serde_json::from_slice(&bytes).unwrap();
    assert!(value["message"].as_str().unwrap().starts_with("Request expired"));

    state.shutdown().await;
}

#[tokio::test]
async fn test_debug_mode_exposes_diagnostics() {
    let config = Config {
        debug_mode: true,
        ..test_config()
    };
    let (state, app) = app_with(config, Arc::new(InMemoryNonceStore::new(10)));

    let req = Request::builder()
        .uri("/api/ping")
        .header("x-signature", "abc")
        .body(Body::empty())
        .unwrap();
    let (status, _, bytes) = read_body(app.oneshot(req).await.unwrap()).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let value: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(value["debug"]["missing"], json!(["timestamp", "nonce"]));
    assert_eq!(value["cache_backend"], "in-process");
    assert_eq!(value["authenticated"], false);

    state.shutdown().await;
}

#[tokio::test]
async fn test_custom_header_names() {
    let config = Config {
        signature_header: "x-api-signature".to_string(),
        timestamp_header: "x-api-timestamp".to_string(),
        nonce_header: "x-api-nonce".to_string(),
        response_signature_header: "x-api-signature".to_string(),
        response_timestamp_header: "x-api-timestamp".to_string(),
        response_nonce_header: "x-api-nonce".to_string(),
        ..test_config()
    };
    let (state, app) = app_with(config, Arc::new(InMemoryNonceStore::new(10)));
    let signed = helper().sign_request("GET", "/api/ping", None);

    let req = build_request(
        "GET",
        "/api/ping",
        None,
        [
            ("x-api-signature", signed.signature),
            ("x-api-timestamp", signed.timestamp),
            ("x-api-nonce", signed.nonce),
        ],
    );
    let response = app.oneshot(req).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-api-signature"));
    assert!(!response.headers().contains_key("x-signature"));

    state.shutdown().await;
}

// =============================================================================
// Collaborator routes
// =============================================================================

#[tokio::test]
async fn test_resolved_user_reported_in_response() {
    let (state, app) = app();
    let body = json!({"name": "lamp"});
    let mut req = signed_request("POST", "/api/shop/products/", Some(&body));
    req.headers_mut().insert("x-user", "alice".parse().unwrap());

    let (status, _, bytes) = read_body(app.clone().oneshot(req).await.unwrap()).await;
    assert_eq!(status, StatusCode::CREATED);
    let value: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(value["user"], "alice");

    let req = signed_request("GET", "/api/shop/products/", None);
    let (status, _, bytes) = read_body(app.oneshot(req).await.unwrap()).await;
    assert_eq!(status, StatusCode::OK);
    let value: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(value["count"], 1);
    assert_eq!(value["products"][0]["name"], "lamp");

    state.shutdown().await;
}

#[tokio::test]
async fn test_invalid_product_is_signed_bad_request() {
    let (state, app) = app();
    let req = signed_request("POST", "/api/shop/products/", Some(&json!({"name": "  "})));

    let (status, headers, bytes) = read_body(app.oneshot(req).await.unwrap()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_signed(status, &headers, &bytes);

    state.shutdown().await;
}

#[tokio::test]
async fn test_plain_text_response_is_not_signed() {
    let (state, app) = app();
    let response = app
        .oneshot(signed_request("GET", "/api/text", None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(!response.headers().contains_key("x-signature"));

    state.shutdown().await;
}

#[tokio::test]
async fn test_health_is_not_protected() {
    let (state, app) = app();
    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    let (status, headers, bytes) = read_body(response).await;
    assert_eq!(status, StatusCode::OK);
    assert!(!headers.contains_key("x-signature"));
    let value: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(value["status"], "healthy");

    state.shutdown().await;
}

// =============================================================================
// Concurrency
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_duplicates_single_winner() {
    let (state, app) = app();
    let body = json!({"name": "race"});
    let headers = helper().sign_request("POST", "/api/shop/products/", Some(&body));

    let mut handles = Vec::new();
    for _ in 0..50 {
        let app = app.clone();
        let req = build_request("POST", "/api/shop/products/", Some(&body), headers.header_pairs());
        handles.push(tokio::spawn(async move { app.oneshot(req).await.unwrap().status() }));
    }

    let mut created = 0;
    let mut rejected = 0;
    for handle in handles {
        match handle.await.unwrap() {
            StatusCode::CREATED => created += 1,
            StatusCode::UNAUTHORIZED => rejected += 1,
            other => panic!("unexpected status {other}"),
        }
    }
    assert_eq!(created, 1);
    assert_eq!(rejected, 49);
    assert_eq!(state.products.read().len(), 1);

    state.shutdown().await;
}

// =============================================================================
// Real HTTP server
// =============================================================================

async fn serve(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
            .await
            .unwrap();
    });
    addr
}

#[tokio::test]
async fn test_http_round_trip() {
    let (state, app) = app();
    let addr = serve(app).await;
    let client = Client::new();

    let signed = helper().sign_request("GET", "/api/ping", None);
    let mut request = client.get(format!("http://{addr}/api/ping"));
    for (name, value) in signed.header_pairs() {
        request = request.header(name, value);
    }
    let response = request.send().await.unwrap();

    let status = response.status().as_u16();
    let header = |name: &str| {
        response
            .headers()
            .get(name)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string()
    };
    let (signature, timestamp, nonce) = (header("x-signature"), header("x-timestamp"), header("x-nonce"));
    let bytes = response.bytes().await.unwrap();

    assert_eq!(status, 200);
    assert!(helper().verify_response(&bytes, status, &signature, &timestamp, &nonce));
    let value: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(value["message"], "pong");
    assert_eq!(value["client_ip"], "127.0.0.1");

    let unsigned = client
        .get(format!("http://{addr}/api/ping"))
        .send()
        .await
        .unwrap();
    assert_eq!(unsigned.status(), reqwest::StatusCode::UNAUTHORIZED);

    state.shutdown().await;
}

// =============================================================================
// Redis-backed nonce store (requires Docker)
// =============================================================================

struct RedisContainer;

impl RedisContainer {
    const IMAGE: &'static str = "redis";
    const TAG: &'static str = "7-alpine";
    const PORT: u16 = 6379;

    async fn start() -> (ContainerAsync<GenericImage>, String) {
        let container = GenericImage::new(Self::IMAGE, Self::TAG)
            .with_exposed_port(Self::PORT.tcp())
            .with_wait_for(WaitFor::message_on_stdout("Ready to accept connections"))
            .start()
            .await
            .expect("Failed to start Redis container");

        let port = container
            .get_host_port_ipv4(Self::PORT)
            .await
            .expect("Failed to get Redis port");

        (container, format!("redis://127.0.0.1:{port}"))
    }
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_redis_store_claims_once_and_expires() {
    let (_container, url) = RedisContainer::start().await;
    let cache = RedisCache::connect(&url, Duration::from_secs(2)).await.unwrap();
    let store = CacheNonceStore::new(Arc::new(cache), "it_nonce", Duration::from_secs(2));
    store.check_liveness().await.unwrap();

    let expires_at = unix_now() + 1;
    assert!(!store.is_used("n1").await.unwrap());
    assert!(store.check_and_mark("n1", expires_at).await.unwrap());
    assert!(!store.check_and_mark("n1", expires_at).await.unwrap());
    assert!(store.is_used("n1").await.unwrap());

    tokio::time::sleep(Duration::from_millis(2_100)).await;
    assert!(!store.is_used("n1").await.unwrap());
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_redis_selected_and_shared_between_instances() {
    let (_container, url) = RedisContainer::start().await;
    let config = Config {
        cache_url: Some(url),
        cache_timeout: Duration::from_secs(2),
        use_cache_fallback: false,
        ..test_config()
    };

    // Two app instances, each with its own connection to the shared cache.
    let mut instances = Vec::new();
    for _ in 0..2 {
        let cache = nonce::connect_shared_cache(&config).await;
        let store = nonce::select_nonce_store(cache, &config).await.unwrap();
        assert_eq!(store.backend_name(), "redis");
        instances.push(app_with(config.clone(), store));
    }
    let (state_b, app_b) = instances.pop().unwrap();
    let (state_a, app_a) = instances.pop().unwrap();

    let headers = helper().sign_request("GET", "/api/ping", None);
    let first = build_request("GET", "/api/ping", None, headers.header_pairs());
    assert_eq!(app_a.oneshot(first).await.unwrap().status(), StatusCode::OK);

    let replay = build_request("GET", "/api/ping", None, headers.header_pairs());
    assert_eq!(
        app_b.oneshot(replay).await.unwrap().status(),
        StatusCode::UNAUTHORIZED
    );

    state_a.shutdown().await;
    state_b.shutdown().await;
}
