//! Client IP extraction for authentication logging and failure throttling.
//!
//! # Source Priority
//!
//! 1. `X-Forwarded-For` (first, non-empty entry of the list)
//! 2. `X-Real-IP`
//! 3. The peer address from Axum's `ConnectInfo<SocketAddr>` extension
//! 4. [`UNKNOWN_IP`]
//!
//! # Security Warning: IP Spoofing Risk
//!
//! The forwarding headers are client-controlled unless a reverse proxy
//! overwrites them. Deploy behind a proxy that sets them, for example:
//!
//! ```nginx
//! proxy_set_header X-Real-IP $remote_addr;
//! proxy_set_header X-Forwarded-For $remote_addr;
//! ```
//!
//! Otherwise a client can rotate spoofed addresses to dodge per-IP failure
//! throttling. The extracted address is never used for authorization.

use std::borrow::Cow;
use std::net::SocketAddr;

use axum::extract::ConnectInfo;
use axum::http::Request;

/// Fallback IP value when no client IP can be determined.
///
/// All such requests share one throttling key.
pub const UNKNOWN_IP: &str = "unknown";

const FORWARDED_FOR: &str = "x-forwarded-for";
const REAL_IP: &str = "x-real-ip";

/// Trimmed, non-empty value of a forwarding header. For `X-Forwarded-For`
/// ("client, proxy1, proxy2") only the first entry counts.
fn forwarded_ip<'a, B>(req: &'a Request<B>, name: &str) -> Option<&'a str> {
    let value = req.headers().get(name)?.to_str().ok()?;
    let ip = value.split(',').next()?.trim();
    (!ip.is_empty()).then_some(ip)
}

/// Extract the client IP of a request.
///
/// Returns a borrowed [`UNKNOWN_IP`] when nothing is available, so the
/// common no-header case does not allocate.
pub fn extract_client_ip<B>(req: &Request<B>) -> Cow<'static, str> {
    if let Some(ip) = forwarded_ip(req, FORWARDED_FOR).or_else(|| forwarded_ip(req, REAL_IP)) {
        return Cow::Owned(ip.to_string());
    }

    match req.extensions().get::<ConnectInfo<SocketAddr>>() {
        Some(ConnectInfo(peer)) => Cow::Owned(peer.ip().to_string()),
        None => Cow::Borrowed(UNKNOWN_IP),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::body::Body;

    #[test]
    fn test_first_forwarded_entry_wins() {
        let req = Request::builder()
            .header("x-forwarded-for", "  192.168.1.1  , 10.0.0.1")
            .body(Body::empty())
            .unwrap();

        assert_eq!(extract_client_ip(&req), "192.168.1.1");
    }

    #[test]
    fn test_real_ip_header() {
        let req = Request::builder()
            .header("x-real-ip", "::1")
            .body(Body::empty())
            .unwrap();

        assert_eq!(extract_client_ip(&req), "::1");
    }

    #[test]
    fn test_xff_priority_over_real_ip() {
        let req = Request::builder()
            .header("x-forwarded-for", "10.0.0.1")
            .header("x-real-ip", "192.168.1.1")
            .body(Body::empty())
            .unwrap();

        assert_eq!(extract_client_ip(&req), "10.0.0.1");
    }

    #[test]
    fn test_empty_xff_falls_through() {
        let req = Request::builder()
            .header("x-forwarded-for", "   ")
            .header("x-real-ip", "192.168.1.1")
            .body(Body::empty())
            .unwrap();

        assert_eq!(extract_client_ip(&req), "192.168.1.1");
    }

    #[test]
    fn test_peer_address_fallback() {
        let mut req = Request::builder().body(Body::empty()).unwrap();
        req.extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 54321))));

        assert_eq!(extract_client_ip(&req), "127.0.0.1");
    }

    #[test]
    fn test_unknown_is_borrowed() {
        let req = Request::builder().body(Body::empty()).unwrap();

        let ip = extract_client_ip(&req);
        assert_eq!(ip, "unknown");
        assert!(matches!(ip, Cow::Borrowed(_)));
    }
}
