//! HMAC-SHA256 signatures over canonicalized request and response messages.
//!
//! # Message Formats
//!
//! ```text
//! request:  {METHOD}|{path}|{canonical body}|{timestamp}|{nonce}
//! response: {status}|{content}|{timestamp}|{nonce}
//! ```
//!
//! The method is upper-cased. The path is signed exactly as it appears on the
//! request line, percent-encoding included and query string excluded:
//! `/api/caf%C3%A9` is signed as those bytes, not as `/api/café`. Clients must
//! sign the encoded form they send. The timestamp is signed exactly as it was
//! sent in the header (decimal Unix seconds), not re-formatted.
//!
//! # Body Canonicalization
//!
//! - Empty body: the empty string
//! - JSON content type: parsed and re-encoded with sorted keys, no
//!   insignificant whitespace and every non-ASCII character `\u`-escaped
//! - Numbers: integers are written exactly as sent, however large; other
//!   numbers use the shortest round-trip form, in scientific notation when
//!   the exponent is below -4 or at least 16 (`0.0001`, `1e-05`, `1.5e+16`,
//!   `2.0`)
//! - Any other content type: the body decoded as UTF-8
//! - Undecodable bodies (invalid JSON or invalid UTF-8): lowercase hex of the raw bytes
//!
//! All functions in this module are pure.

use std::fmt::Write as _;

use hmac::{Hmac, Mac};
use serde_json::{Number, Value};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use super::secret::SecretKey;

type HmacSha256 = Hmac<Sha256>;

/// Delimiter joining the fields of a signed message.
pub const MESSAGE_DELIMITER: char = '|';

/// Name of the signing algorithm, reported in debug diagnostics.
pub const SIGNATURE_ALGORITHM: &str = "HMAC-SHA256";

/// Canonicalize a request body for signing.
///
/// `content_type` is the raw `Content-Type` header value, if any. Only
/// `application/json` (case-insensitive, parameters allowed) triggers JSON
/// canonicalization.
pub fn canonicalize_body(content_type: Option<&str>, body: &[u8]) -> String {
    if body.is_empty() {
        return String::new();
    }

    let is_json = content_type
        .is_some_and(|ct| ct.to_ascii_lowercase().contains("application/json"));

    if is_json {
        return match serde_json::from_slice::<Value>(body) {
            Ok(value) => canonical_json(&value),
            Err(_) => hex::encode(body),
        };
    }

    match std::str::from_utf8(body) {
        Ok(text) => text.to_string(),
        Err(_) => hex::encode(body),
    }
}

/// Encode a JSON value canonically: sorted object keys, compact separators,
/// ASCII-only output.
///
/// Key order of the input never affects the output, and canonicalizing the
/// output again yields the same string.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => write_number(n, out),
        Value::String(s) => write_ascii_string(s, out),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();

            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_ascii_string(key, out);
                out.push(':');
                if let Some(v) = map.get(key) {
                    write_canonical(v, out);
                }
            }
            out.push('}');
        }
    }
}

fn write_number(n: &Number, out: &mut String) {
    // With `arbitrary_precision` this is the literal from the source text.
    let literal = n.to_string();
    if !literal.contains(['.', 'e', 'E']) {
        out.push_str(if literal == "-0" { "0" } else { &literal });
        return;
    }

    // Literals beyond f64 range stay verbatim so they remain distinct.
    match literal.parse::<f64>() {
        Ok(f) if f.is_finite() => write_float(f, out),
        _ => out.push_str(&literal),
    }
}

fn write_float(f: f64, out: &mut String) {
    let scientific = format!("{f:e}");
    let (mantissa, exponent) = scientific.split_once('e').unwrap_or((&scientific, "0"));
    let exponent: i32 = exponent.parse().unwrap_or(0);

    if (-4..16).contains(&exponent) {
        let fixed = f.to_string();
        out.push_str(&fixed);
        if !fixed.contains('.') {
            out.push_str(".0");
        }
    } else {
        let sign = if exponent < 0 { '-' } else { '+' };
        let _ = write!(out, "{mantissa}e{sign}{:02}", exponent.unsigned_abs());
    }
}

/// Write a JSON string literal, escaping everything outside printable ASCII.
///
/// Characters beyond the Basic Multilingual Plane become UTF-16 surrogate
/// pairs (`\ud83d\ude00`).
fn write_ascii_string(s: &str, out: &mut String) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0c}' => out.push_str("\\f"),
            ' '..='\u{7f}' => out.push(c),
            _ => {
                let mut units = [0u16; 2];
                for unit in c.encode_utf16(&mut units) {
                    // Writing to a String cannot fail.
                    let _ = write!(out, "\\u{unit:04x}");
                }
            }
        }
    }
    out.push('"');
}

/// Build the request message that gets signed.
pub fn request_message(
    method: &str,
    path: &str,
    canonical_body: &str,
    timestamp: &str,
    nonce: &str,
) -> String {
    let d = MESSAGE_DELIMITER;
    format!(
        "{}{d}{path}{d}{canonical_body}{d}{timestamp}{d}{nonce}",
        method.to_uppercase()
    )
}

/// Compute the hex-encoded request signature.
pub fn compute_request_signature(
    method: &str,
    path: &str,
    canonical_body: &str,
    timestamp: &str,
    nonce: &str,
    secret: &SecretKey,
) -> String {
    let message = request_message(method, path, canonical_body, timestamp, nonce);
    hmac_sha256_hex(secret.expose(), &[message.as_bytes()])
}

/// Compute the hex-encoded response signature.
///
/// `content` is signed as raw bytes, so a UTF-8 body signs identically to
/// its text form.
pub fn compute_response_signature(
    status_code: u16,
    content: &[u8],
    timestamp: &str,
    nonce: &str,
    secret: &SecretKey,
) -> String {
    let d = MESSAGE_DELIMITER;
    let head = format!("{status_code}{d}");
    let tail = format!("{d}{timestamp}{d}{nonce}");
    hmac_sha256_hex(secret.expose(), &[head.as_bytes(), content, tail.as_bytes()])
}

/// Compare an expected signature against a provided one in constant time.
///
/// Only the length can short-circuit the comparison; the content of the two
/// strings never does.
pub fn verify(expected: &str, provided: &str) -> bool {
    expected.as_bytes().ct_eq(provided.as_bytes()).into()
}

#[allow(clippy::expect_used)]
fn hmac_sha256_hex(key: &[u8], parts: &[&[u8]]) -> String {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can accept keys of any length");
    for part in parts {
        mac.update(part);
    }
    hex::encode(mac.finalize().into_bytes())
}
