//! Signature authentication middleware.
//!
//! # Request Path
//!
//! ```text
//! request ─► PathScope ─► buffer body ─► RequestValidator ─┬─► handler ─► ResponseSigner ─► response
//!               │                                          │
//!               └─ unprotected: pass through               └─ failure: signed 401
//! ```
//!
//! Excluded prefixes win over protected prefixes. The buffered body is
//! re-attached so handlers can still extract it. Authenticated requests carry
//! an [`AuthContext`] extension.
//!
//! # Responses
//!
//! Only JSON responses on protected paths are enhanced and signed. Other
//! content types pass through untouched.
//!
//! # Brute Force Protection
//!
//! Off by default. When enabled, each failed validation consumes one cell of a
//! per-client-IP quota. Once it is exhausted, failures from that IP still get
//! the uniform signed 401, with an added `Retry-After` header. Successful
//! requests never consume quota. The client IP comes from `X-Forwarded-For`
//! when present, so the quota is only meaningful behind a proxy that
//! overwrites that header.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use axum::body::{Body, Bytes, to_bytes};
use axum::http::{HeaderValue, Request, Response, StatusCode, header};
use governor::clock::{Clock, DefaultClock};
use governor::state::keyed::DefaultKeyedStateStore;
use governor::{Quota, RateLimiter};
use tower::{Layer, Service};
use tracing::{debug, error, info, warn};

use super::ip::extract_client_ip;
use super::request_id::request_id_or_new;
use crate::config::Config;
use crate::error::{AppResult, AuthError};
use crate::metrics;
use crate::nonce::NonceStore;
use crate::signer::{ANONYMOUS_USER, ResolvedUser, ResponseMetadata, ResponseSigner, is_json_content_type};
use crate::validator::{AuthContext, RequestValidator};

/// Default bound on buffered request bodies (10 MiB).
pub const DEFAULT_MAX_BODY_SIZE: usize = 10 * 1024 * 1024;

/// Per-IP limiter counting authentication failures.
type FailureLimiter = RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

/// Path-prefix based opt-in/opt-out of signature authentication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathScope {
    protected: Vec<String>,
    excluded: Vec<String>,
}

impl PathScope {
    pub fn new(protected: Vec<String>, excluded: Vec<String>) -> Self {
        Self {
            protected,
            excluded,
        }
    }

    /// Whether requests to `path` must be signed.
    pub fn is_protected(&self, path: &str) -> bool {
        if self.excluded.iter().any(|p| path.starts_with(p.as_str())) {
            return false;
        }
        self.protected.iter().any(|p| path.starts_with(p.as_str()))
    }
}

/// Signature authentication layer.
#[derive(Clone)]
pub struct SignatureAuth {
    validator: Arc<RequestValidator>,
    signer: Arc<ResponseSigner>,
    scope: Arc<PathScope>,
    failure_limiter: Option<Arc<FailureLimiter>>,
    max_body_size: usize,
}

impl SignatureAuth {
    /// Create a layer without failure throttling.
    pub fn new(validator: RequestValidator, signer: ResponseSigner, scope: PathScope) -> Self {
        Self {
            validator: Arc::new(validator),
            signer: Arc::new(signer),
            scope: Arc::new(scope),
            failure_limiter: None,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
        }
    }

    /// Build the layer from configuration around an already selected store.
    pub fn from_config(config: &Config, store: Arc<dyn NonceStore>) -> AppResult<Self> {
        let validator = RequestValidator::from_config(config, store)?;
        let signer = ResponseSigner::from_config(config)?;
        let scope = PathScope::new(config.protected_paths.clone(), config.excluded_paths.clone());

        Ok(Self::new(validator, signer, scope)
            .with_failure_limit(config.failure_limit)
            .with_max_body_size(config.max_request_body_size))
    }

    /// Allow `per_minute` failures per client IP before adding `Retry-After`
    /// to the 401. Zero disables throttling.
    pub fn with_failure_limit(mut self, per_minute: u32) -> Self {
        self.failure_limiter = NonZeroU32::new(per_minute)
            .map(|limit| Arc::new(RateLimiter::keyed(Quota::per_minute(limit))));
        self
    }

    pub fn with_max_body_size(mut self, bytes: usize) -> Self {
        self.max_body_size = bytes;
        self
    }

    pub fn validator(&self) -> &RequestValidator {
        &self.validator
    }

    pub fn scope(&self) -> &PathScope {
        &self.scope
    }

    /// Drop failure-tracking state for IPs whose quota has fully recovered.
    pub fn prune_failure_state(&self) {
        if let Some(limiter) = &self.failure_limiter {
            limiter.retain_recent();
            limiter.shrink_to_fit();
        }
    }

    /// Answer a failed validation with the signed 401. A client past its
    /// failure quota gets the same response plus `Retry-After`.
    fn reject<B>(&self, req: &Request<B>, err: AuthError) -> Response<Body> {
        let client_ip = extract_client_ip(req).into_owned();
        let request_id = request_id_or_new(req);
        let path = req.uri().path();

        let retry_after = self.failure_limiter.as_ref().and_then(|limiter| {
            limiter.check_key(&client_ip).err().map(|not_until| {
                not_until
                    .wait_time_from(DefaultClock::default().now())
                    .as_secs()
                    .max(1)
            })
        });

        if let Some(retry_after) = retry_after {
            warn!(
                path,
                client_ip = %client_ip,
                request_id = %request_id,
                reason = err.reason(),
                retry_after_secs = retry_after,
                "Client exceeded authentication failure limit"
            );
            metrics::record_throttled();
        } else {
            warn!(
                path,
                method = %req.method(),
                client_ip = %client_ip,
                request_id = %request_id,
                reason = err.reason(),
                "Signature validation failed: {err}"
            );
            metrics::record_rejection(err.reason());
        }
        metrics::record_response_signed(StatusCode::UNAUTHORIZED.as_u16());

        let mut response =
            self.signer
                .error_response(&err, request_id, self.validator.store().backend_name());
        // The signature covers the body only, so the header can follow it.
        if let Some(retry_after) = retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(retry_after));
        }
        response
    }

    /// Enhance and sign a handler's JSON response; others pass through.
    async fn sign_response(&self, response: Response<Body>, ctx: &AuthContext) -> Response<Body> {
        if !is_json_content_type(response.headers()) {
            return response;
        }

        let (parts, body) = response.into_parts();
        let bytes = match to_bytes(body, usize::MAX).await {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(error = %e, request_id = %ctx.request_id, "Failed to buffer response body");
                return internal_error_response();
            }
        };

        let user = parts
            .extensions
            .get::<ResolvedUser>()
            .map(|u| u.0.trim().to_string())
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| ANONYMOUS_USER.to_string());

        let meta = ResponseMetadata {
            request_id: ctx.request_id,
            user: &user,
            cache_backend: ctx.cache_backend,
        };

        let status = parts.status.as_u16();
        let response = self.signer.finalize(parts, bytes, Some(&meta));
        metrics::record_response_signed(status);
        response
    }
}

fn internal_error_response() -> Response<Body> {
    let mut response = Response::new(Body::from(
        r#"{"error":"internal_error","message":"An internal error occurred."}"#,
    ));
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

impl<S> Layer<S> for SignatureAuth {
    type Service = SignatureAuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        SignatureAuthService {
            inner,
            auth: self.clone(),
        }
    }
}

/// Signature authentication service wrapper.
#[derive(Clone)]
pub struct SignatureAuthService<S> {
    inner: S,
    auth: SignatureAuth,
}

impl<S> Service<Request<Body>> for SignatureAuthService<S>
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

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let auth = self.auth.clone();
        let mut inner = self.inner.clone();

        Box::pin(async move {
            if !auth.scope.is_protected(req.uri().path()) {
                return inner.call(req).await;
            }

            let started = Instant::now();
            let (parts, body) = req.into_parts();

            // Validation borrows a body-less head across awaits; `Body` is not `Sync`.
            let head = Request::from_parts(parts, ());
            let (bytes, outcome) = match to_bytes(body, auth.max_body_size).await {
                Ok(bytes) => {
                    let outcome = auth.validator.validate(&head, &bytes).await;
                    (bytes, outcome)
                }
                Err(e) => {
                    let err = AuthError::ValidationInternal(format!("failed to read request body: {e}"));
                    (Bytes::new(), Err(err))
                }
            };

            metrics::record_validation_duration(started.elapsed().as_secs_f64());

            let ctx = match outcome {
                Ok(ctx) => ctx,
                Err(err) => return Ok(auth.reject(&head, err)),
            };

            let (parts, ()) = head.into_parts();
            let mut req = Request::from_parts(parts, Body::from(bytes));

            if auth.signer.debug_mode() {
                info!(request_id = %ctx.request_id, client_ip = %ctx.client_ip, "Request authenticated");
            } else {
                debug!(request_id = %ctx.request_id, client_ip = %ctx.client_ip, "Request authenticated");
            }
            metrics::record_authenticated();

            req.extensions_mut().insert(ctx.clone());
            let response = inner.call(req).await?;

            Ok(auth.sign_response(response, &ctx).await)
        })
    }
}
