//! Response enhancement and signing.
//!
//! JSON responses on protected paths get three headers carrying an
//! HMAC-SHA256 signature over `{status}|{content}|{timestamp}|{nonce}`, where
//! the nonce is a fresh UUID and the timestamp is the current time. Response
//! nonces are not recorded in the nonce store.
//!
//! Before signing, successful responses may be enhanced with processing
//! metadata. Only fields absent from the payload are added; a non-object
//! payload is wrapped as `{"data": ...}`.

use axum::body::{Body, Bytes};
use axum::http::{HeaderMap, HeaderValue, Response, StatusCode, header};
use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value, json};
use tracing::{error, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::error::{AppResult, AuthError};
use crate::signature::SecretKey;
use crate::signature::codec::compute_response_signature;
use crate::signature::helper::SignedHeaders;
use crate::utils::unix_now;
use crate::validator::SignatureHeaders;

/// `error` field of every authentication failure body.
pub const AUTH_FAILED_ERROR: &str = "Authentication Failed";

/// `code` field of every authentication failure body.
pub const AUTH_FAILED_CODE: &str = "SIGNATURE_INVALID";

/// Body sent if an authentication failure body cannot be serialized.
const FALLBACK_ERROR_BODY: &str = r#"{"error":"Authentication Failed","code":"SIGNATURE_INVALID"}"#;

/// User name reported when no user was resolved.
pub const ANONYMOUS_USER: &str = "Anonymous";

/// Identity of the user a handler acted for.
///
/// Handlers insert it as a response extension; the signer reports it in the
/// `user` metadata field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedUser(pub String);

/// Per-request values injected into enhanced responses.
#[derive(Debug, Clone)]
pub struct ResponseMetadata<'a> {
    pub request_id: Uuid,
    pub user: &'a str,
    pub cache_backend: &'static str,
}

/// Whether a `Content-Type` denotes JSON.
pub fn is_json_content_type(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.to_ascii_lowercase().contains("application/json"))
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}

/// Signs (and optionally enhances) outgoing responses.
#[derive(Clone)]
pub struct ResponseSigner {
    secret: SecretKey,
    headers: SignatureHeaders,
    enhance: bool,
    debug_mode: bool,
}

impl ResponseSigner {
    pub fn new(secret: SecretKey) -> Self {
        Self {
            secret,
            headers: SignatureHeaders::default(),
            enhance: true,
            debug_mode: false,
        }
    }

    pub fn from_config(config: &Config) -> AppResult<Self> {
        let headers = SignatureHeaders::parse(
            &config.response_signature_header,
            &config.response_timestamp_header,
            &config.response_nonce_header,
        )?;
        Ok(Self::new(config.secret_key.clone())
            .with_headers(headers)
            .with_enhancement(config.enhancement_enabled())
            .with_debug(config.debug_mode))
    }

    pub fn with_headers(mut self, headers: SignatureHeaders) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_enhancement(mut self, enabled: bool) -> Self {
        self.enhance = enabled;
        self
    }

    pub fn with_debug(mut self, enabled: bool) -> Self {
        self.debug_mode = enabled;
        self
    }

    pub fn debug_mode(&self) -> bool {
        self.debug_mode
    }

    /// Add absent metadata fields to a JSON payload.
    ///
    /// Returns `None` when enhancement is disabled, the body is not valid
    /// JSON, or every field is already present.
    pub fn enhance(&self, body: &[u8], meta: &ResponseMetadata<'_>) -> Option<Vec<u8>> {
        if !self.enhance {
            return None;
        }

        let data: Value = if body.is_empty() {
            Value::Object(Map::new())
        } else {
            serde_json::from_slice(body).ok()?
        };

        let present = |key: &str| data.as_object().is_some_and(|obj| obj.contains_key(key));

        let mut metadata = Map::new();
        if !present("timestamp") {
            metadata.insert("timestamp".into(), json!(now_rfc3339()));
        }
        if !present("request_id") {
            metadata.insert("request_id".into(), json!(meta.request_id.to_string()));
        }
        if !present("authenticated") {
            metadata.insert("authenticated".into(), json!(true));
        }
        if !present("user") {
            metadata.insert("user".into(), json!(meta.user));
        }
        if self.debug_mode && !present("cache_backend") {
            metadata.insert("cache_backend".into(), json!(meta.cache_backend));
        }

        if metadata.is_empty() {
            return None;
        }

        let enhanced = match data {
            Value::Object(mut obj) => {
                obj.extend(metadata);
                Value::Object(obj)
            }
            other => {
                let mut wrapped = Map::new();
                wrapped.insert("data".into(), other);
                wrapped.extend(metadata);
                Value::Object(wrapped)
            }
        };

        match serde_json::to_vec(&enhanced) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                error!(error = %e, "Failed to serialize enhanced response");
                None
            }
        }
    }

    /// Sign a response with the current time and a fresh UUID nonce.
    pub fn sign(&self, status: u16, content: &[u8]) -> SignedHeaders {
        self.sign_at(status, content, unix_now(), &Uuid::new_v4().to_string())
    }

    pub fn sign_at(&self, status: u16, content: &[u8], timestamp: i64, nonce: &str) -> SignedHeaders {
        let timestamp = timestamp.to_string();
        let signature = compute_response_signature(status, content, &timestamp, nonce, &self.secret);
        SignedHeaders {
            signature,
            timestamp,
            nonce: nonce.to_string(),
        }
    }

    /// Write signature headers using the configured response header names.
    pub fn apply(&self, headers: &mut HeaderMap, signed: &SignedHeaders) {
        for (name, value) in [
            (&self.headers.signature, &signed.signature),
            (&self.headers.timestamp, &signed.timestamp),
            (&self.headers.nonce, &signed.nonce),
        ] {
            match HeaderValue::from_str(value) {
                Ok(v) => {
                    headers.insert(name.clone(), v);
                }
                Err(e) => warn!(header = %name, error = %e, "Skipping unencodable signature header"),
            }
        }
    }

    /// Enhance (when `meta` is given) and sign a buffered response.
    pub fn finalize(
        &self,
        mut parts: axum::http::response::Parts,
        body: Bytes,
        meta: Option<&ResponseMetadata<'_>>,
    ) -> Response<Body> {
        let content = match meta.and_then(|m| self.enhance(&body, m)) {
            Some(enhanced) => Bytes::from(enhanced),
            None => body,
        };

        parts.headers.insert(header::CONTENT_LENGTH, HeaderValue::from(content.len()));

        let signed = self.sign(parts.status.as_u16(), &content);
        self.apply(&mut parts.headers, &signed);

        Response::from_parts(parts, Body::from(content))
    }

    /// Body of an authentication failure.
    pub fn error_body(&self, err: &AuthError, request_id: Uuid, cache_backend: &'static str) -> Value {
        let mut body = json!({
            "error": AUTH_FAILED_ERROR,
            "message": err.to_string(),
            "code": AUTH_FAILED_CODE,
            "timestamp": now_rfc3339(),
            "request_id": request_id.to_string(),
            "user": ANONYMOUS_USER,
        });

        if self.debug_mode
            && let Some(obj) = body.as_object_mut()
        {
            obj.insert("debug".into(), err.details());
            obj.insert("cache_backend".into(), json!(cache_backend));
            obj.insert("authenticated".into(), json!(false));
        }
        body
    }

    /// Signed 401 response for an authentication failure. Never enhanced.
    pub fn error_response(
        &self,
        err: &AuthError,
        request_id: Uuid,
        cache_backend: &'static str,
    ) -> Response<Body> {
        let body = self.error_body(err, request_id, cache_backend);
        let content = error_content(serde_json::to_vec(&body));

        let mut response = Response::new(Body::empty());
        *response.status_mut() = StatusCode::UNAUTHORIZED;
        response
            .headers_mut()
            .insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let (parts, _) = response.into_parts();
        self.finalize(parts, content, None)
    }
}

fn error_content(serialized: serde_json::Result<Vec<u8>>) -> Bytes {
    match serialized {
        Ok(bytes) => Bytes::from(bytes),
        Err(e) => {
            error!(error = %e, "Failed to serialize authentication failure body");
            Bytes::from_static(FALLBACK_ERROR_BODY.as_bytes())
        }
    }
}
