//! Request ID middleware.
//!
//! Runs outside the signature layer. A client-supplied `X-Request-Id` is kept
//! only if it parses as a UUID; otherwise a fresh UUIDv4 replaces it. The
//! resulting id is written back into the request headers (where the validator
//! reads it for the authentication context) and echoed on the response.
//!
//! ```bash
//! curl -H "X-Request-Id: 3f0c5c3e-7d4a-4b59-9a49-0d2cbb2f7f4e" http://localhost:3000/api/ping
//! ```

use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::header::HeaderValue;
use axum::http::{Request, Response};
use tower::{Layer, Service};
use tracing::{Span, debug};
use uuid::Uuid;

/// Header name for request ID.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Request ID layer for Tower middleware stack.
#[derive(Clone, Default)]
pub struct RequestIdLayer;

impl RequestIdLayer {
    pub fn new() -> Self {
        Self
    }
}

impl<S> Layer<S> for RequestIdLayer {
    type Service = RequestIdService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequestIdService { inner }
    }
}

/// Request ID service wrapper.
#[derive(Clone)]
pub struct RequestIdService<S> {
    inner: S,
}

impl<S> Service<Request<Body>> for RequestIdService<S>
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response<Body>;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<Body>) -> Self::Future {
        let request_id = request_id_or_new(&req);
        let header_value = uuid_header_value(request_id);

        req.headers_mut()
            .insert(REQUEST_ID_HEADER, header_value.clone());

        Span::current().record("request_id", tracing::field::display(request_id));
        debug!(request_id = %request_id, path = %req.uri().path(), "Processing request");

        let mut inner = self.inner.clone();

        Box::pin(async move {
            let mut response = inner.call(req).await?;
            response.headers_mut().insert(REQUEST_ID_HEADER, header_value);
            Ok(response)
        })
    }
}

/// The request's UUID request id, or a fresh v4 if absent or not a UUID.
pub fn request_id_or_new<B>(req: &Request<B>) -> Uuid {
    req.request_id().unwrap_or_else(Uuid::new_v4)
}

fn uuid_header_value(id: Uuid) -> HeaderValue {
    // Hyphenated UUIDs are always visible ASCII.
    let mut buf = Uuid::encode_buffer();
    HeaderValue::from_str(id.hyphenated().encode_lower(&mut buf))
        .unwrap_or_else(|_| HeaderValue::from_static("00000000-0000-0000-0000-000000000000"))
}

/// Extension trait to extract the request ID from requests.
pub trait RequestIdExt {
    /// The `X-Request-Id` header, if present and a valid UUID.
    fn request_id(&self) -> Option<Uuid>;
}

impl<B> RequestIdExt for Request<B> {
    fn request_id(&self) -> Option<Uuid> {
        self.headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| Uuid::parse_str(s.trim()).ok())
    }
}
