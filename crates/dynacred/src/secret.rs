//! Secret handling
//!
//! [`SensitiveString`] keeps passwords out of `Debug`/`Display`/serialized
//! output. [`SecretRedactor`] scrubs known secrets from free-form text such
//! as driver error messages before they leave the engine.

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

/// Replacement text for redacted secrets
pub const REDACTED_PASSWORD: &str = "[password]";

/// A wrapper around `SecretString` that provides safe handling of sensitive values.
///
/// This type:
/// - Redacts the value in `Debug` and `Display` output to prevent credential leaks in logs
/// - Serializes as `"***REDACTED***"` to prevent accidental exposure in config dumps
/// - Provides `expose_secret()` method to access the actual value when needed
///
/// # Example
///
/// ```rust
/// use dynacred::SensitiveString;
///
/// let secret = SensitiveString::new("manager");
///
/// // Safe to log - shows "[REDACTED]"
/// println!("{:?}", secret);
///
/// // Access the actual value when needed
/// let actual = secret.expose_secret();
/// ```
#[derive(Clone)]
pub struct SensitiveString(SecretString);

impl SensitiveString {
    /// Create a new sensitive string from any string-like value
    pub fn new(value: impl Into<String>) -> Self {
        Self(SecretString::new(value.into().into_boxed_str()))
    }

    /// Expose the secret value.
    ///
    /// Use sparingly - only when the actual value is needed (e.g., for authentication).
    pub fn expose_secret(&self) -> &str {
        self.0.expose_secret()
    }

    /// Whether the secret is the empty string
    pub fn is_empty(&self) -> bool {
        self.0.expose_secret().is_empty()
    }
}

impl Default for SensitiveString {
    fn default() -> Self {
        Self::new(String::new())
    }
}

impl std::fmt::Debug for SensitiveString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl std::fmt::Display for SensitiveString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl From<String> for SensitiveString {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&str> for SensitiveString {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Serialize as redacted to prevent accidental exposure in config dumps/logs
impl Serialize for SensitiveString {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str("***REDACTED***")
    }
}

/// Deserialize from the actual string value
impl<'de> Deserialize<'de> for SensitiveString {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Ok(Self::new(value))
    }
}

/// Replaces known secret values in text with [`REDACTED_PASSWORD`].
///
/// Each secret is also matched in its URL-encoded form, since connection
/// strings carry credentials escaped.
#[derive(Clone, Default)]
pub struct SecretRedactor {
    secrets: Vec<SensitiveString>,
}

impl std::fmt::Debug for SecretRedactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretRedactor")
            .field("secrets", &self.secrets.len())
            .finish()
    }
}

impl SecretRedactor {
    /// Create an empty redactor
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a secret; empty values are ignored
    pub fn add(&mut self, secret: &str) {
        if secret.is_empty() {
            return;
        }
        let encoded: String = url::form_urlencoded::byte_serialize(secret.as_bytes()).collect();
        for value in [secret.to_string(), encoded] {
            if !self.secrets.iter().any(|s| s.expose_secret() == value) {
                self.secrets.push(SensitiveString::new(value));
            }
        }
        // Longest first so a secret that contains another is replaced whole.
        self.secrets
            .sort_by_key(|s| std::cmp::Reverse(s.expose_secret().len()));
    }

    /// Builder form of [`SecretRedactor::add`]
    pub fn with(mut self, secret: &str) -> Self {
        self.add(secret);
        self
    }

    /// Return `text` with every known secret replaced
    pub fn redact(&self, text: &str) -> String {
        let mut out = text.to_string();
        for secret in &self.secrets {
            let value = secret.expose_secret();
            if out.contains(value) {
                out = out.replace(value, REDACTED_PASSWORD);
            }
        }
        out
    }

    /// Whether no secrets are registered
    pub fn is_empty(&self) -> bool {
        self.secrets.is_empty()
    }
}
