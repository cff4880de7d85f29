//! HTTP middleware for signature authentication and request tracing.
//!
//! - **Signature Authentication**: validates signed requests on protected paths,
//!   signs JSON responses, throttles clients that keep failing
//! - **Request ID**: UUID request ids propagated to handlers and responses
//! - **Client IP**: forwarding-header aware client address extraction
//!
//! # Architecture
//!
//! ```text
//! Request → Request ID → Trace → Signature Auth → Handler → Response
//!               ↓                      ↓
//!       X-Request-Id header   401 signed (+ Retry-After)
//! ```

pub mod ip;
pub mod request_id;
pub mod signature;

pub use ip::{UNKNOWN_IP, extract_client_ip};
pub use request_id::{REQUEST_ID_HEADER, RequestIdExt, RequestIdLayer};
pub use signature::{PathScope, SignatureAuth, SignatureAuthService};
