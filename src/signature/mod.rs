//! Request and response signing primitives.
//!
//! - [`codec`]: body canonicalization, HMAC-SHA256 signatures, constant-time verification
//! - [`secret`]: the shared [`SecretKey`] and key-strength checks
//! - [`helper`]: client-side [`SignatureHelper`] for producing request headers
//!   and verifying signed responses

pub mod codec;
pub mod helper;
pub mod secret;

pub use codec::{
    canonical_json, canonicalize_body, compute_request_signature, compute_response_signature,
    verify,
};
pub use helper::{SignatureHelper, SignedHeaders};
pub use secret::{KeyStrength, KeyValidation, SecretKey, generate_secret_key, validate_secret_key};
