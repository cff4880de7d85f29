//! Application configuration loaded from environment variables.
//!
//! # Configuration Hierarchy
//!
//! All configuration is loaded from environment variables with sensible defaults
//! for development. In production, configure via environment variables or a `.env` file.
//! The only required variable is `SIGNATURE_AUTH_SECRET_KEY`.
//!
//! # Signature Authentication
//!
//! - `SIGNATURE_AUTH_SECRET_KEY`: shared HMAC secret (required)
//! - `SIGNATURE_AUTH_VALIDITY_WINDOW`: accepted clock skew in seconds (default: 300)
//! - `SIGNATURE_AUTH_PROTECTED_PATHS` / `SIGNATURE_AUTH_EXCLUDED_PATHS`: comma-separated
//!   path prefixes; exclusions win
//!
//! # Nonce Storage
//!
//! - `SIGNATURE_AUTH_CACHE_URL`: Redis URL for the shared nonce cache
//! - `SIGNATURE_AUTH_USE_CACHE_FALLBACK`: use an in-process store when the cache is
//!   unreachable (default: true)

use std::env;
use std::time::Duration;

use axum::http::HeaderName;

use crate::error::{AppError, AppResult};
use crate::signature::SecretKey;
use crate::signature::helper::{NONCE_HEADER, SIGNATURE_HEADER, TIMESTAMP_HEADER};

/// Default protected path prefixes.
pub const DEFAULT_PROTECTED_PATHS: &str = "/api/";

/// Default excluded path prefixes.
pub const DEFAULT_EXCLUDED_PATHS: &str = "/admin/,/static/,/media/,/health/,/docs/,/favicon.ico";

/// Application configuration loaded from environment variables.
///
/// # Example
///
/// ```rust,ignore
/// let config = Config::from_env()?;
/// println!("Server will listen on {}", config.server_addr());
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    // =========================================================================
    // Server Configuration
    // =========================================================================
    /// Server host address (default: "0.0.0.0")
    pub host: String,

    /// Server port (default: 3000)
    pub port: u16,

    /// Maximum request body size in bytes that will be buffered (default: 10MB)
    pub max_request_body_size: usize,

    /// Allowed CORS origins; "*" allows all
    pub cors_allowed_origins: Vec<String>,

    // =========================================================================
    // Signature Configuration
    // =========================================================================
    /// Shared HMAC secret
    pub secret_key: SecretKey,

    /// Maximum accepted `|now - timestamp|` (default: 300s)
    pub validity_window: Duration,

    /// Extra lifetime of a recorded nonce beyond the window (default: 60s)
    pub grace_period: Duration,

    /// Path prefixes that require a signature (default: ["/api/"])
    pub protected_paths: Vec<String>,

    /// Path prefixes that never require a signature; checked before
    /// `protected_paths`
    pub excluded_paths: Vec<String>,

    pub signature_header: String,
    pub timestamp_header: String,
    pub nonce_header: String,

    pub response_signature_header: String,
    pub response_timestamp_header: String,
    pub response_nonce_header: String,

    // =========================================================================
    // Nonce Cache Configuration
    // =========================================================================
    /// Key prefix for nonces in the shared cache (default: "sig_nonce")
    pub nonce_cache_prefix: String,

    /// Redis URL of the shared nonce cache (unset = no shared cache)
    pub cache_url: Option<String>,

    /// Bound on each shared-cache call (default: 500ms)
    pub cache_timeout: Duration,

    /// Fall back to the in-process store when the shared cache is unusable
    pub use_cache_fallback: bool,

    /// Capacity of the in-process store (default: 10000)
    pub fallback_max_size: usize,

    // =========================================================================
    // Response Configuration
    // =========================================================================
    /// Inject processing metadata into JSON responses
    pub auto_enhance_responses: bool,

    /// Second switch for metadata injection; both must be on
    pub add_processing_metadata: bool,

    /// Expose failure diagnostics in 401 bodies. Never enable in production.
    pub debug_mode: bool,

    // =========================================================================
    // Abuse Protection
    // =========================================================================
    /// Failed authentication attempts allowed per client IP per minute
    /// before 401s carry `Retry-After` (0 = disabled, default: 0)
    pub failure_limit: u32,

    // =========================================================================
    // Observability Configuration
    // =========================================================================
    /// Log level (e.g., "info", "debug", "trace")
    pub log_level: String,

    /// Interval for the background nonce-store stats refresh (default: 30s)
    pub stats_report_interval: Duration,

    /// Port for Prometheus metrics endpoint (default: 9090, 0 = disabled)
    pub metrics_port: u16,
}

impl Config {
    /// Load configuration from environment variables with sensible defaults.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if any configuration is invalid
    /// (e.g., missing secret key, non-numeric PORT value, malformed header name).
    pub fn from_env() -> AppResult<Self> {
        // Load an .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let signature_header = Self::env_or("SIGNATURE_AUTH_SIGNATURE_HEADER", SIGNATURE_HEADER);
        let timestamp_header = Self::env_or("SIGNATURE_AUTH_TIMESTAMP_HEADER", TIMESTAMP_HEADER);
        let nonce_header = Self::env_or("SIGNATURE_AUTH_NONCE_HEADER", NONCE_HEADER);

        let config = Self {
            // Server
            host: Self::env_or("HOST", "0.0.0.0"),
            port: Self::parse_env("PORT", 3000)?,
            max_request_body_size: Self::parse_env("MAX_REQUEST_BODY_SIZE", 10 * 1024 * 1024)?, // 10MB
            cors_allowed_origins: split_list(&Self::env_or("CORS_ALLOWED_ORIGINS", "*")),

            // Signature
            secret_key: SecretKey::new(env::var("SIGNATURE_AUTH_SECRET_KEY").unwrap_or_default()),
            validity_window: Duration::from_secs(Self::parse_env(
                "SIGNATURE_AUTH_VALIDITY_WINDOW",
                300,
            )?),
            grace_period: Duration::from_secs(Self::parse_env("SIGNATURE_AUTH_GRACE_PERIOD", 60)?),
            protected_paths: split_list(&Self::env_or(
                "SIGNATURE_AUTH_PROTECTED_PATHS",
                DEFAULT_PROTECTED_PATHS,
            )),
            excluded_paths: split_list(&Self::env_or(
                "SIGNATURE_AUTH_EXCLUDED_PATHS",
                DEFAULT_EXCLUDED_PATHS,
            )),
            response_signature_header: Self::env_or(
                "SIGNATURE_AUTH_RESPONSE_SIGNATURE_HEADER",
                &signature_header,
            ),
            response_timestamp_header: Self::env_or(
                "SIGNATURE_AUTH_RESPONSE_TIMESTAMP_HEADER",
                &timestamp_header,
            ),
            response_nonce_header: Self::env_or("SIGNATURE_AUTH_RESPONSE_NONCE_HEADER", &nonce_header),
            signature_header,
            timestamp_header,
            nonce_header,

            // Nonce cache
            nonce_cache_prefix: Self::env_or("SIGNATURE_AUTH_NONCE_CACHE_PREFIX", "sig_nonce"),
            cache_url: env::var("SIGNATURE_AUTH_CACHE_URL")
                .ok()
                .filter(|u| !u.trim().is_empty()),
            cache_timeout: Duration::from_millis(Self::parse_env(
                "SIGNATURE_AUTH_CACHE_TIMEOUT_MS",
                500,
            )?),
            use_cache_fallback: Self::parse_flag("SIGNATURE_AUTH_USE_CACHE_FALLBACK", true)?,
            fallback_max_size: Self::parse_env("SIGNATURE_AUTH_FALLBACK_MAX_SIZE", 10_000)?,

            // Responses
            auto_enhance_responses: Self::parse_flag("SIGNATURE_AUTH_AUTO_ENHANCE_RESPONSES", true)?,
            add_processing_metadata: Self::parse_flag(
                "SIGNATURE_AUTH_ADD_PROCESSING_METADATA",
                true,
            )?,
            debug_mode: Self::parse_flag("SIGNATURE_AUTH_DEBUG", false)?,

            // Abuse protection
            failure_limit: Self::parse_env("SIGNATURE_AUTH_FAILURE_LIMIT", 0)?,

            // Observability
            log_level: Self::env_or("RUST_LOG", "info"),
            stats_report_interval: Duration::from_secs(Self::parse_env(
                "STATS_REPORT_INTERVAL_SECS",
                30,
            )?),
            metrics_port: Self::parse_env("METRICS_PORT", 9090)?,
        };

        // Validate configuration before returning
        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values for consistency and correctness.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if validation fails.
    pub fn validate(&self) -> AppResult<()> {
        if self.secret_key.is_empty() {
            return Err(AppError::ConfigError(
                "SIGNATURE_AUTH_SECRET_KEY is required".to_string(),
            ));
        }

        if self.validity_window.is_zero() {
            return Err(AppError::ConfigError(
                "SIGNATURE_AUTH_VALIDITY_WINDOW must be greater than 0".to_string(),
            ));
        }

        if self.fallback_max_size == 0 {
            return Err(AppError::ConfigError(
                "SIGNATURE_AUTH_FALLBACK_MAX_SIZE must be greater than 0".to_string(),
            ));
        }

        if self.max_request_body_size == 0 {
            return Err(AppError::ConfigError(
                "MAX_REQUEST_BODY_SIZE must be greater than 0".to_string(),
            ));
        }

        if self.cache_timeout.is_zero() {
            return Err(AppError::ConfigError(
                "SIGNATURE_AUTH_CACHE_TIMEOUT_MS must be greater than 0".to_string(),
            ));
        }

        if self.stats_report_interval.is_zero() {
            return Err(AppError::ConfigError(
                "STATS_REPORT_INTERVAL_SECS must be greater than 0".to_string(),
            ));
        }

        for (var, name) in [
            ("SIGNATURE_AUTH_SIGNATURE_HEADER", &self.signature_header),
            ("SIGNATURE_AUTH_TIMESTAMP_HEADER", &self.timestamp_header),
            ("SIGNATURE_AUTH_NONCE_HEADER", &self.nonce_header),
            ("SIGNATURE_AUTH_RESPONSE_SIGNATURE_HEADER", &self.response_signature_header),
            ("SIGNATURE_AUTH_RESPONSE_TIMESTAMP_HEADER", &self.response_timestamp_header),
            ("SIGNATURE_AUTH_RESPONSE_NONCE_HEADER", &self.response_nonce_header),
        ] {
            if HeaderName::from_bytes(name.as_bytes()).is_err() {
                return Err(AppError::ConfigError(format!(
                    "{var} is not a valid header name: {name:?}"
                )));
            }
        }

        for (var, prefixes) in [
            ("SIGNATURE_AUTH_PROTECTED_PATHS", &self.protected_paths),
            ("SIGNATURE_AUTH_EXCLUDED_PATHS", &self.excluded_paths),
        ] {
            if let Some(bad) = prefixes.iter().find(|p| !p.starts_with('/')) {
                return Err(AppError::ConfigError(format!(
                    "{var} entries must start with '/': {bad:?}"
                )));
            }
        }

        Ok(())
    }

    /// Get the full server address for binding.
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Whether successful JSON responses get processing metadata injected.
    pub fn enhancement_enabled(&self) -> bool {
        self.auto_enhance_responses && self.add_processing_metadata
    }

    /// Check if Prometheus metrics export is enabled.
    pub fn metrics_enabled(&self) -> bool {
        self.metrics_port > 0
    }

    /// Get the metrics endpoint address.
    ///
    /// Returns `None` if metrics are disabled (port = 0).
    pub fn metrics_addr(&self) -> Option<std::net::SocketAddr> {
        if self.metrics_enabled() {
            Some(std::net::SocketAddr::from((
                [0, 0, 0, 0],
                self.metrics_port,
            )))
        } else {
            None
        }
    }

    fn env_or(name: &str, default: &str) -> String {
        env::var(name).unwrap_or_else(|_| default.to_string())
    }

    /// Parse an environment variable into the specified type with a default value.
    fn parse_env<T>(name: &str, default: T) -> AppResult<T>
    where
        T: std::str::FromStr + ToString,
        T::Err: std::fmt::Display,
    {
        match env::var(name) {
            Ok(val) => val
                .trim()
                .parse()
                .map_err(|e| AppError::ConfigError(format!("Invalid {name}: {e}"))),
            Err(_) => Ok(default),
        }
    }

    fn parse_flag(name: &str, default: bool) -> AppResult<bool> {
        match env::var(name) {
            Ok(val) => parse_flag_value(name, &val),
            Err(_) => Ok(default),
        }
    }
}

/// Split a comma-separated list, trimming entries and dropping empty ones.
fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Accepts `true/false`, `1/0`, `yes/no` and `on/off` (case-insensitive).
fn parse_flag_value(name: &str, raw: &str) -> AppResult<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        other => Err(AppError::ConfigError(format!(
            "Invalid {name}: expected a boolean, got {other:?}"
        ))),
    }
}

/// Default configuration for testing and development.
///
/// The secret key is empty, so `validate()` fails until one is set.
/// Production deployments should use `Config::from_env()` instead.
impl Default for Config {
    fn default() -> Self {
        Self {
            // Server
            host: "0.0.0.0".to_string(),
            port: 3000,
            max_request_body_size: 10 * 1024 * 1024, // 10MB
            cors_allowed_origins: vec!["*".to_string()],
            // Signature
            secret_key: SecretKey::new(""),
            validity_window: Duration::from_secs(300),
            grace_period: Duration::from_secs(60),
            protected_paths: split_list(DEFAULT_PROTECTED_PATHS),
            excluded_paths: split_list(DEFAULT_EXCLUDED_PATHS),
            signature_header: SIGNATURE_HEADER.to_string(),
            timestamp_header: TIMESTAMP_HEADER.to_string(),
            nonce_header: NONCE_HEADER.to_string(),
            response_signature_header: SIGNATURE_HEADER.to_string(),
            response_timestamp_header: TIMESTAMP_HEADER.to_string(),
            response_nonce_header: NONCE_HEADER.to_string(),
            // Nonce cache
            nonce_cache_prefix: "sig_nonce".to_string(),
            cache_url: None,
            cache_timeout: Duration::from_millis(500),
            use_cache_fallback: true,
            fallback_max_size: 10_000,
            // Responses
            auto_enhance_responses: true,
            add_processing_metadata: true,
            debug_mode: false,
            // Abuse protection
            failure_limit: 0,
            // Observability
            log_level: "info".to_string(),
            stats_report_interval: Duration::from_secs(30),
            metrics_port: 9090,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        Config {
            secret_key: SecretKey::new("Zq8vR1mTxW4pLn7sHc2dGf9jBk6yUe3o"),
            ..Config::default()
        }
    }

    #[test]
    fn test_default_config_values() {
        let config = Config::default();

        assert_eq!(config.port, 3000);
        assert_eq!(config.validity_window, Duration::from_secs(300));
        assert_eq!(config.grace_period, Duration::from_secs(60));
        assert_eq!(config.protected_paths, vec!["/api/"]);
        assert_eq!(config.excluded_paths.len(), 6);
        assert_eq!(config.signature_header, "x-signature");
        assert_eq!(config.nonce_cache_prefix, "sig_nonce");
        assert!(config.use_cache_fallback);
        assert!(!config.debug_mode);
        assert!(config.cache_url.is_none());
    }

    #[test]
    fn test_server_addr_format() {
        let config = Config {
            host: "localhost".to_string(),
            port: 8080,
            ..Config::default()
        };

        assert_eq!(config.server_addr(), "localhost:8080");
    }

    #[test]
    fn test_validate_requires_secret() {
        let result = Config::default().validate();
        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("SIGNATURE_AUTH_SECRET_KEY")
        );
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_validate_window_zero() {
        let config = Config {
            validity_window: Duration::ZERO,
            ..valid_config()
        };

        let result = config.validate();
        assert!(result.unwrap_err().to_string().contains("VALIDITY_WINDOW"));
    }

    #[test]
    fn test_validate_fallback_size_zero() {
        let config = Config {
            fallback_max_size: 0,
            ..valid_config()
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_header_name() {
        let config = Config {
            nonce_header: "x nonce".to_string(),
            ..valid_config()
        };

        let result = config.validate();
        assert!(result.unwrap_err().to_string().contains("SIGNATURE_AUTH_NONCE_HEADER"));
    }

    #[test]
    fn test_validate_rejects_relative_prefix() {
        let config = Config {
            protected_paths: vec!["api/".to_string()],
            ..valid_config()
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_split_list_trims_and_drops_empty() {
        assert_eq!(
            split_list(" /api/ ,, /v2/,"),
            vec!["/api/".to_string(), "/v2/".to_string()]
        );
    }

    #[test]
    fn test_parse_flag_value() {
        assert!(parse_flag_value("X", "TRUE").unwrap());
        assert!(parse_flag_value("X", "1").unwrap());
        assert!(parse_flag_value("X", " on ").unwrap());
        assert!(!parse_flag_value("X", "no").unwrap());
        assert!(parse_flag_value("X", "maybe").is_err());
    }

    #[test]
    fn test_enhancement_needs_both_switches() {
        assert!(valid_config().enhancement_enabled());

        let config = Config {
            add_processing_metadata: false,
            ..valid_config()
        };
        assert!(!config.enhancement_enabled());
    }

    #[test]
    fn test_metrics_addr() {
        assert!(valid_config().metrics_addr().is_some());

        let config = Config {
            metrics_port: 0,
            ..valid_config()
        };
        assert!(config.metrics_addr().is_none());
    }
}
