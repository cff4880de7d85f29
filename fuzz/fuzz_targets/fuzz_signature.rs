//! Fuzz target for request canonicalization and header parsing.
//!
//! ```bash
//! cargo +nightly install cargo-fuzz
//! cargo +nightly fuzz run fuzz_signature -- -max_total_time=60
//! ```
//!
//! Checks that, for arbitrary input:
//!
//! - `canonicalize_body` never panics and is idempotent on JSON bodies
//! - header name parsing and key strength checks never panic
//! - a request signed over the input verifies against itself

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use signature_auth::signature::{
    SecretKey, canonicalize_body, compute_request_signature, validate_secret_key, verify,
};
use signature_auth::validator::SignatureHeaders;

#[derive(Debug, Arbitrary)]
struct Input<'a> {
    content_type: Option<&'a str>,
    body: &'a [u8],
    header_names: (&'a str, &'a str, &'a str),
    secret: &'a str,
    timestamp: &'a str,
    nonce: &'a str,
}

fuzz_target!(|input: Input<'_>| {
    let canonical = canonicalize_body(input.content_type, input.body);

    let json = Some("application/json");
    if serde_json::from_slice::<serde_json::Value>(input.body).is_ok() {
        let first = canonicalize_body(json, input.body);
        assert_eq!(canonicalize_body(json, first.as_bytes()), first);
    }

    let (signature, timestamp, nonce) = input.header_names;
    let _ = SignatureHeaders::parse(signature, timestamp, nonce);
    let _ = validate_secret_key(input.secret);

    let secret = SecretKey::new(input.secret);
    let expected =
        compute_request_signature("POST", "/api/fuzz", &canonical, input.timestamp, input.nonce, &secret);
    assert!(verify(&expected, &expected));
});
