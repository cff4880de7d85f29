//! Shared secret handling and key-strength classification.

use std::fmt;

use rand::RngCore;
use serde::Serialize;

/// Minimum recommended key length; shorter keys are classified as weak.
pub const MIN_KEY_LENGTH: usize = 32;

/// Keys at least this long (without weak patterns) are classified as strong.
pub const STRONG_KEY_LENGTH: usize = 64;

/// Substrings that mark a key as weak regardless of its length.
pub const WEAK_PATTERNS: [&str; 10] = [
    "password", "secret", "key", "test", "demo", "example", "123456", "qwerty", "abc", "admin",
];

/// Random bytes drawn by [`generate_secret_key`] (hex-encoded to twice as many characters).
const GENERATED_KEY_BYTES: usize = 48;

/// The process-wide HMAC secret.
///
/// Immutable after startup. `Debug` and `Display` never print the value and
/// the type does not implement `Serialize`.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretKey(String);

impl SecretKey {
    /// Wrap a secret value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Raw key bytes for HMAC computation.
    pub fn expose(&self) -> &[u8] {
        self.0.as_bytes()
    }

    /// Raw key text, for strength validation.
    pub fn expose_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.chars().count()
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretKey(***)")
    }
}

impl fmt::Display for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

/// Key strength classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyStrength {
    Invalid,
    Weak,
    Medium,
    Strong,
}

impl fmt::Display for KeyStrength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            KeyStrength::Invalid => "invalid",
            KeyStrength::Weak => "weak",
            KeyStrength::Medium => "medium",
            KeyStrength::Strong => "strong",
        };
        f.write_str(s)
    }
}

/// Result of [`validate_secret_key`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyValidation {
    /// `false` only for an empty key, which is a fatal startup error.
    pub valid: bool,
    pub strength: KeyStrength,
    pub warnings: Vec<String>,
    pub recommendations: Vec<String>,
}

/// Classify the strength of a secret key.
///
/// - empty: invalid
/// - shorter than [`MIN_KEY_LENGTH`]: weak
/// - shorter than [`STRONG_KEY_LENGTH`]: medium
/// - otherwise strong
///
/// Any of [`WEAK_PATTERNS`] (case-insensitive) downgrades the key to weak.
pub fn validate_secret_key(key: &str) -> KeyValidation {
    if key.is_empty() {
        return KeyValidation {
            valid: false,
            strength: KeyStrength::Invalid,
            warnings: vec!["Secret key is empty".to_string()],
            recommendations: vec![],
        };
    }

    let length = key.chars().count();
    let mut warnings = Vec::new();
    let mut recommendations = Vec::new();

    let mut strength = if length < MIN_KEY_LENGTH {
        warnings.push(format!(
            "Secret key is shorter than recommended ({MIN_KEY_LENGTH}+ characters)"
        ));
        KeyStrength::Weak
    } else if length < STRONG_KEY_LENGTH {
        KeyStrength::Medium
    } else {
        KeyStrength::Strong
    };

    let lowered = key.to_lowercase();
    for pattern in WEAK_PATTERNS {
        if lowered.contains(pattern) {
            warnings.push(format!("Contains weak pattern: {pattern}"));
            strength = KeyStrength::Weak;
        }
    }

    if strength == KeyStrength::Weak {
        recommendations.push("Generate a new key with generate_secret_key()".to_string());
    }
    if length < STRONG_KEY_LENGTH {
        recommendations.push(format!(
            "Use at least {STRONG_KEY_LENGTH} characters for production"
        ));
    }

    KeyValidation {
        valid: true,
        strength,
        warnings,
        recommendations,
    }
}

/// Generate a cryptographically random secret key (96 hex characters).
///
/// Draws are repeated until the key contains none of [`WEAK_PATTERNS`], so a
/// generated key always classifies as strong.
pub fn generate_secret_key() -> String {
    let mut rng = rand::rng();
    let mut bytes = [0u8; GENERATED_KEY_BYTES];
    loop {
        rng.fill_bytes(&mut bytes);
        let key = hex::encode(bytes);
        if !WEAK_PATTERNS.iter().any(|p| key.contains(p)) {
            return key;
        }
    }
}
