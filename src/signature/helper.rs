//! Client-side signing helpers.
//!
//! Clients of a protected API sign each request with the same shared secret
//! and verify the signature headers attached to every JSON response:
//!
//! ```rust
//! use signature_auth::signature::SignatureHelper;
//! use serde_json::json;
//!
//! let helper = SignatureHelper::new("Zq8vR1mTxW4pLn7sHc2dGf9jBk6yUe3o").unwrap();
//! let headers = helper.sign_request("POST", "/api/shop/products/", Some(&json!({"name": "x"})));
//!
//! for (name, value) in headers.header_pairs() {
//!     println!("{name}: {value}");
//! }
//! ```

use serde_json::Value;
use uuid::Uuid;

use super::codec::{canonical_json, compute_request_signature, compute_response_signature, verify};
use super::secret::SecretKey;
use crate::error::{AppError, AppResult};
use crate::utils::unix_now;

/// Default header carrying the hex signature.
pub const SIGNATURE_HEADER: &str = "x-signature";

/// Default header carrying the Unix timestamp in seconds.
pub const TIMESTAMP_HEADER: &str = "x-timestamp";

/// Default header carrying the nonce.
pub const NONCE_HEADER: &str = "x-nonce";

/// Signature headers for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedHeaders {
    pub signature: String,
    pub timestamp: String,
    pub nonce: String,
}

impl SignedHeaders {
    /// Header name/value pairs using the default header names.
    pub fn header_pairs(&self) -> [(&'static str, String); 3] {
        [
            (SIGNATURE_HEADER, self.signature.clone()),
            (TIMESTAMP_HEADER, self.timestamp.clone()),
            (NONCE_HEADER, self.nonce.clone()),
        ]
    }
}

/// Signs requests and verifies responses with a shared secret.
#[derive(Debug, Clone)]
pub struct SignatureHelper {
    secret: SecretKey,
}

impl SignatureHelper {
    /// Create a helper for the given secret.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if the secret is empty.
    pub fn new(secret: impl Into<String>) -> AppResult<Self> {
        let secret = SecretKey::new(secret);
        if secret.is_empty() {
            return Err(AppError::ConfigError("Secret key is required".to_string()));
        }
        Ok(Self { secret })
    }

    /// Sign a request with the current time and a fresh UUID nonce.
    ///
    /// A JSON body is signed in canonical form, so the caller may send it
    /// with any key order or whitespace.
    pub fn sign_request(&self, method: &str, path: &str, body: Option<&Value>) -> SignedHeaders {
        let nonce = Uuid::new_v4().to_string();
        self.sign_request_at(method, path, body, unix_now(), &nonce)
    }

    /// Sign a JSON (or empty) request with an explicit timestamp and nonce.
    pub fn sign_request_at(
        &self,
        method: &str,
        path: &str,
        body: Option<&Value>,
        timestamp: i64,
        nonce: &str,
    ) -> SignedHeaders {
        let canonical = body.map(canonical_json).unwrap_or_default();
        self.sign_raw_at(method, path, &canonical, timestamp, nonce)
    }

    /// Sign a request whose body is sent as-is (non-JSON content types).
    pub fn sign_raw_at(
        &self,
        method: &str,
        path: &str,
        body: &str,
        timestamp: i64,
        nonce: &str,
    ) -> SignedHeaders {
        let timestamp = timestamp.to_string();
        let signature =
            compute_request_signature(method, path, body, &timestamp, nonce, &self.secret);

        SignedHeaders {
            signature,
            timestamp,
            nonce: nonce.to_string(),
        }
    }

    /// Verify the signature headers of a response.
    pub fn verify_response(
        &self,
        content: &[u8],
        status_code: u16,
        signature: &str,
        timestamp: &str,
        nonce: &str,
    ) -> bool {
        let expected =
            compute_response_signature(status_code, content, timestamp, nonce, &self.secret);
        verify(&expected, signature)
    }

    /// Check whether a signature timestamp is older than `max_age` seconds.
    ///
    /// Unparsable timestamps count as expired. Future timestamps are not
    /// expired here; the server applies the symmetric check.
    pub fn is_signature_expired(&self, timestamp: &str, max_age: u64) -> bool {
        match timestamp.trim().parse::<i64>() {
            Ok(ts) => unix_now().saturating_sub(ts) > i64::try_from(max_age).unwrap_or(i64::MAX),
            Err(_) => true,
        }
    }
}
