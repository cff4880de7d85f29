//! Per-request signature validation.
//!
//! A request moves through [`ValidationStage`]s in a fixed order and stops at
//! the first failing check:
//!
//! ```text
//! START -> HEADERS_EXTRACTED -> TIMESTAMP_CHECKED -> NONCE_CHECKED
//!       -> SIGNATURE_VERIFIED -> AUTHENTICATED
//! ```
//!
//! 1. signature, timestamp and nonce headers present and non-empty
//! 2. timestamp parses as integer seconds
//! 3. `|now - timestamp| <= window` (future timestamps count too)
//! 4. nonce not already used
//! 5. signature matches the recomputed one (constant-time)
//! 6. nonce claimed atomically until `timestamp + window + grace`
//!
//! Any nonce store failure rejects the request.

use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderMap, HeaderName, Request, header};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error};
use uuid::Uuid;

use crate::config::Config;
use crate::error::{AppError, AppResult, AuthError, nonce_hint};
use crate::middleware::ip::extract_client_ip;
use crate::middleware::request_id::request_id_or_new;
use crate::nonce::NonceStore;
use crate::signature::codec::{canonicalize_body, compute_request_signature, verify};
use crate::signature::helper::{NONCE_HEADER, SIGNATURE_HEADER, TIMESTAMP_HEADER};
use crate::signature::SecretKey;
use crate::utils::unix_now;

/// Default accepted clock skew in seconds.
pub const DEFAULT_WINDOW_SECS: u64 = 300;

/// Default extra lifetime of a recorded nonce beyond the window.
pub const DEFAULT_GRACE_SECS: u64 = 60;

/// Progress of a request through validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationStage {
    Start,
    HeadersExtracted,
    TimestampChecked,
    NonceChecked,
    SignatureVerified,
    Authenticated,
}

/// Context attached to an authenticated request as an extension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthContext {
    pub request_id: Uuid,
    /// When authentication completed.
    pub timestamp: DateTime<Utc>,
    pub client_ip: String,
    /// Nonce store backend that recorded the nonce.
    pub cache_backend: &'static str,
    pub authenticated: bool,
}

/// Names of the three request headers carrying the signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureHeaders {
    pub signature: HeaderName,
    pub timestamp: HeaderName,
    pub nonce: HeaderName,
}

impl Default for SignatureHeaders {
    fn default() -> Self {
        Self {
            signature: HeaderName::from_static(SIGNATURE_HEADER),
            timestamp: HeaderName::from_static(TIMESTAMP_HEADER),
            nonce: HeaderName::from_static(NONCE_HEADER),
        }
    }
}

impl SignatureHeaders {
    /// Parse configured header names.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if a name is not a valid header name.
    pub fn parse(signature: &str, timestamp: &str, nonce: &str) -> AppResult<Self> {
        Ok(Self {
            signature: parse_header_name(signature)?,
            timestamp: parse_header_name(timestamp)?,
            nonce: parse_header_name(nonce)?,
        })
    }
}

pub(crate) fn parse_header_name(name: &str) -> AppResult<HeaderName> {
    HeaderName::from_bytes(name.trim().to_ascii_lowercase().as_bytes())
        .map_err(|e| AppError::ConfigError(format!("Invalid header name {name:?}: {e}")))
}

/// Validates signed requests against a shared secret and a nonce store.
#[derive(Clone)]
pub struct RequestValidator {
    secret: SecretKey,
    headers: SignatureHeaders,
    window: u64,
    grace: u64,
    store: Arc<dyn NonceStore>,
}

impl RequestValidator {
    /// Create a validator with the default headers, window and grace period.
    pub fn new(secret: SecretKey, store: Arc<dyn NonceStore>) -> Self {
        Self {
            secret,
            headers: SignatureHeaders::default(),
            window: DEFAULT_WINDOW_SECS,
            grace: DEFAULT_GRACE_SECS,
            store,
        }
    }

    /// Create a validator from application configuration.
    pub fn from_config(config: &Config, store: Arc<dyn NonceStore>) -> AppResult<Self> {
        let headers = SignatureHeaders::parse(
            &config.signature_header,
            &config.timestamp_header,
            &config.nonce_header,
        )?;
        Ok(Self::new(config.secret_key.clone(), store)
            .with_headers(headers)
            .with_window(config.validity_window)
            .with_grace(config.grace_period))
    }

    pub fn with_headers(mut self, headers: SignatureHeaders) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window.as_secs();
        self
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace.as_secs();
        self
    }

    pub fn window_secs(&self) -> u64 {
        self.window
    }

    pub fn store(&self) -> &Arc<dyn NonceStore> {
        &self.store
    }

    /// Validate a request whose body has been buffered into `body`.
    pub async fn validate<B>(&self, req: &Request<B>, body: &[u8]) -> Result<AuthContext, AuthError> {
        self.validate_at(req, body, unix_now()).await
    }

    /// Validate as of Unix time `now`.
    pub async fn validate_at<B>(
        &self,
        req: &Request<B>,
        body: &[u8],
        now: i64,
    ) -> Result<AuthContext, AuthError> {
        // START -> HEADERS_EXTRACTED
        let (signature, timestamp_raw, nonce) = self.extract_headers(req.headers())?;

        // HEADERS_EXTRACTED -> TIMESTAMP_CHECKED
        let timestamp: i64 = timestamp_raw.trim().parse().map_err(|_| {
            AuthError::InvalidTimestampFormat {
                timestamp: timestamp_raw.to_string(),
            }
        })?;
        let age = now.abs_diff(timestamp);
        if age > self.window {
            return Err(AuthError::RequestExpired {
                age,
                max_age: self.window,
            });
        }

        // TIMESTAMP_CHECKED -> NONCE_CHECKED
        let used = self.store.is_used(nonce).await.map_err(|e| {
            error!(error = %e, nonce = %nonce_hint(nonce), "Nonce lookup failed");
            AuthError::ValidationInternal(e.to_string())
        })?;
        if used {
            return Err(AuthError::ReplayDetected {
                nonce_hint: nonce_hint(nonce),
            });
        }

        // NONCE_CHECKED -> SIGNATURE_VERIFIED
        let content_type = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok());
        let canonical_body = canonicalize_body(content_type, body);
        // Raw request-line path: percent-encoded, no query.
        let expected = compute_request_signature(
            req.method().as_str(),
            req.uri().path(),
            &canonical_body,
            timestamp_raw,
            nonce,
            &self.secret,
        );
        if !verify(&expected, signature) {
            return Err(AuthError::InvalidSignature);
        }

        // SIGNATURE_VERIFIED -> AUTHENTICATED
        let expires_at = self.expires_at(timestamp);
        let claimed = self
            .store
            .check_and_mark(nonce, expires_at)
            .await
            .map_err(|e| {
                error!(error = %e, nonce = %nonce_hint(nonce), "Recording nonce failed");
                AuthError::ValidationInternal(e.to_string())
            })?;
        if !claimed {
            // Lost a race with a concurrent request carrying the same nonce.
            return Err(AuthError::ReplayDetected {
                nonce_hint: nonce_hint(nonce),
            });
        }

        debug!(nonce = %nonce_hint(nonce), age, "Signature verified");

        Ok(AuthContext {
            request_id: request_id_or_new(req),
            timestamp: Utc::now(),
            client_ip: extract_client_ip(req).into_owned(),
            cache_backend: self.store.backend_name(),
            authenticated: true,
        })
    }

    fn expires_at(&self, timestamp: i64) -> i64 {
        let lifetime = i64::try_from(self.window.saturating_add(self.grace)).unwrap_or(i64::MAX);
        timestamp.saturating_add(lifetime)
    }

    fn extract_headers<'a>(
        &self,
        headers: &'a HeaderMap,
    ) -> Result<(&'a str, &'a str, &'a str), AuthError> {
        let get = |name: &HeaderName| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .filter(|v| !v.is_empty())
        };

        let signature = get(&self.headers.signature);
        let timestamp = get(&self.headers.timestamp);
        let nonce = get(&self.headers.nonce);

        match (signature, timestamp, nonce) {
            (Some(s), Some(t), Some(n)) => Ok((s, t, n)),
            _ => {
                let missing = [
                    ("signature", signature.is_none()),
                    ("timestamp", timestamp.is_none()),
                    ("nonce", nonce.is_none()),
                ]
                .into_iter()
                .filter_map(|(name, absent)| absent.then_some(name))
                .collect();
                Err(AuthError::MissingHeaders(missing))
            }
        }
    }
}
