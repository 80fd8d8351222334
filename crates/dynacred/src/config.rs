//! Engine configuration
//!
//! The host hands over a generic string-keyed map. [`OracleConfig::from_map`]
//! pulls each known key out explicitly, applies defaults and validates the
//! result. Unknown keys are ignored.
//!
//! | Key | Type | Default |
//! |-----|------|---------|
//! | `connection_url` | string, required | |
//! | `username` / `password` | string | empty |
//! | `max_open_connections` | integer | 4 |
//! | `max_idle_connections` | integer | `max_open_connections` |
//! | `max_connection_lifetime` | seconds or duration string | no limit |
//! | `username_template` | string | built-in template |
//! | `disable_escaping` | bool | false |
//! | `split_statements` | bool | true |
//! | `disconnect_sessions` | bool | true |
//! | `password_length` | integer 8..=30 | 30 |
//! | `password_case` | `"upper"` or `"lower"` | `"upper"` |
//! | `credential_producer` | `"template"`, `"pattern"` or `"pattern_display"` | `"template"` |

use regex::Regex;
use serde_json::{Map, Value as JsonValue};
use std::collections::HashMap;
use std::sync::LazyLock;
use std::time::Duration;
use validator::Validate;

use crate::credentials::{PasswordCase, PasswordPolicy, DEFAULT_PASSWORD_LENGTH};
use crate::error::{LifecycleError, Result};
use crate::secret::SensitiveString;
use crate::statements::interpolate;
use dynacred_rdbc::prelude::{ConnectionConfig, PoolConfig};

/// `user/password@//host:port/service`
static CONNECTION_URL_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^.+@//(.+):(.+)/(.+)$").unwrap());

/// Default pool size when `max_open_connections` is absent or zero
pub const DEFAULT_MAX_OPEN_CONNECTIONS: u32 = 4;

/// Which [`CredentialGenerator`](crate::credentials::CredentialGenerator) to build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProducerKind {
    /// Render `username_template`
    #[default]
    Template,
    /// Fixed lowercase `v_display_role_random_time` pattern
    Pattern,
    /// Lowercase display name padded with random characters
    PatternDisplay,
}

impl std::str::FromStr for ProducerKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "template" => Ok(Self::Template),
            "pattern" => Ok(Self::Pattern),
            "pattern_display" => Ok(Self::PatternDisplay),
            other => Err(format!(
                "unknown credential_producer {:?}, expected \"template\", \"pattern\" or \"pattern_display\"",
                other
            )),
        }
    }
}

/// Decoded and validated engine configuration
#[derive(Debug, Clone, Validate)]
pub struct OracleConfig {
    /// Connection URL with credentials substituted
    pub connection_url: SensitiveString,
    /// Administrative username
    pub username: String,
    /// Administrative password
    pub password: SensitiveString,
    /// Database host
    #[validate(length(min = 1))]
    pub host: String,
    /// Listener port
    #[validate(range(min = 1))]
    pub port: u16,
    /// Service name
    #[validate(length(min = 1))]
    pub service: String,
    /// Upper bound on open connections
    #[validate(range(min = 1))]
    pub max_open_connections: u32,
    /// Upper bound on idle connections, never above `max_open_connections`
    pub max_idle_connections: u32,
    /// Recycle connections older than this; `None` means no limit
    pub max_connection_lifetime: Option<Duration>,
    /// Custom username template
    pub username_template: Option<String>,
    /// Substitute credentials into the URL without percent-escaping
    pub disable_escaping: bool,
    /// Split statement templates on `;`
    pub split_statements: bool,
    /// Kill live sessions before revocation
    pub disconnect_sessions: bool,
    /// Generated password length
    #[validate(range(min = 8, max = 30))]
    pub password_length: usize,
    /// Case of the generated password's first character
    pub password_case: PasswordCase,
    /// Username generation strategy
    pub credential_producer: ProducerKind,
}

// ============================================================================
// Field extraction
// ============================================================================

fn config_err(message: impl Into<String>) -> LifecycleError {
    LifecycleError::Config(message.into())
}

fn string_field(map: &Map<String, JsonValue>, key: &str) -> Result<Option<String>> {
    match map.get(key) {
        None | Some(JsonValue::Null) => Ok(None),
        Some(JsonValue::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(config_err(format!(
            "'{}' must be a string, got {}",
            key,
            json_type(other)
        ))),
    }
}

fn bool_field(map: &Map<String, JsonValue>, key: &str, default: bool) -> Result<bool> {
    match map.get(key) {
        None | Some(JsonValue::Null) => Ok(default),
        Some(JsonValue::Bool(b)) => Ok(*b),
        Some(JsonValue::String(s)) => match s.as_str() {
            "1" | "t" | "T" | "TRUE" | "true" | "True" => Ok(true),
            "0" | "f" | "F" | "FALSE" | "false" | "False" => Ok(false),
            _ => Err(config_err(format!(
                "failed to parse '{}' field: invalid boolean {:?}",
                key, s
            ))),
        },
        Some(other) => Err(config_err(format!(
            "invalid type for key [{}]: {}",
            key,
            json_type(other)
        ))),
    }
}

fn u64_field(map: &Map<String, JsonValue>, key: &str) -> Result<Option<u64>> {
    match map.get(key) {
        None | Some(JsonValue::Null) => Ok(None),
        Some(JsonValue::Number(n)) => n
            .as_u64()
            .map(Some)
            .ok_or_else(|| config_err(format!("'{}' must be a non-negative integer, got {}", key, n))),
        Some(JsonValue::String(s)) => s
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| config_err(format!("'{}' must be a non-negative integer, got {:?}", key, s))),
        Some(other) => Err(config_err(format!(
            "'{}' must be an integer, got {}",
            key,
            json_type(other)
        ))),
    }
}

fn u32_field(map: &Map<String, JsonValue>, key: &str) -> Result<Option<u32>> {
    u64_field(map, key)?
        .map(|v| u32::try_from(v).map_err(|_| config_err(format!("'{}' is too large: {}", key, v))))
        .transpose()
}

/// Seconds as an integer, or a duration string such as `"90s"` or `"5m"`
fn duration_field(map: &Map<String, JsonValue>, key: &str) -> Result<Option<Duration>> {
    let duration = match map.get(key) {
        None | Some(JsonValue::Null) => return Ok(None),
        Some(JsonValue::Number(n)) => n
            .as_u64()
            .map(Duration::from_secs)
            .ok_or_else(|| config_err(format!("invalid {}: {}", key, n)))?,
        Some(JsonValue::String(s)) => {
            let s = s.trim();
            match s.parse::<u64>() {
                Ok(secs) => Duration::from_secs(secs),
                Err(_) => humantime::parse_duration(s)
                    .map_err(|e| config_err(format!("invalid {}: {}", key, e)))?,
            }
        }
        Some(other) => {
            return Err(config_err(format!(
                "invalid {}: unsupported type {}",
                key,
                json_type(other)
            )))
        }
    };
    Ok(if duration.is_zero() { None } else { Some(duration) })
}

fn json_type(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "bool",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}

fn escape(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

/// Split a resolved URL into host, port and service
fn parse_connection_url(url: &str) -> Result<(String, u16, String)> {
    let captures = CONNECTION_URL_REGEX.captures(url).ok_or_else(|| {
        config_err(
            "error parsing connection URL: invalid connection URL format, expect username/password@//{{server}}:{{port}}/{{DBName}}",
        )
    })?;
    let host = captures[1].to_string();
    let port = captures[2]
        .parse::<u16>()
        .map_err(|e| config_err(format!("error parsing port: {}", e)))?;
    let service = captures[3].to_string();
    Ok((host, port, service))
}

impl OracleConfig {
    /// Decode, default and validate a configuration map
    pub fn from_map(map: &Map<String, JsonValue>) -> Result<Self> {
        let raw_url = string_field(map, "connection_url")?.unwrap_or_default();
        if raw_url.is_empty() {
            return Err(config_err("connection_url cannot be empty"));
        }

        let mut username = string_field(map, "username")?.unwrap_or_default();
        let mut password = string_field(map, "password")?.unwrap_or_default();
        let disable_escaping = bool_field(map, "disable_escaping", false)?;

        let (url_username, url_password) = if disable_escaping {
            (username.clone(), password.clone())
        } else {
            (escape(&username), escape(&password))
        };
        let values: HashMap<&str, String> =
            HashMap::from([("username", url_username), ("password", url_password)]);
        let connection_url = interpolate(&raw_url, &values);

        let (host, port, service) = parse_connection_url(&connection_url)?;

        // Literal `user/password@//...` URLs carry the login themselves.
        if username.is_empty() {
            if let Some((user, pass)) = connection_url
                .split_once("@//")
                .and_then(|(prefix, _)| prefix.split_once('/'))
            {
                username = user.to_string();
                password = pass.to_string();
            }
        }

        let mut max_open = u32_field(map, "max_open_connections")?.unwrap_or(0);
        if max_open == 0 {
            max_open = DEFAULT_MAX_OPEN_CONNECTIONS;
        }
        let mut max_idle = u32_field(map, "max_idle_connections")?.unwrap_or(0);
        if max_idle == 0 || max_idle > max_open {
            max_idle = max_open;
        }

        let max_connection_lifetime = duration_field(map, "max_connection_lifetime")?;
        let username_template = string_field(map, "username_template")?.filter(|t| !t.is_empty());

        let password_length = match u64_field(map, "password_length")? {
            Some(len) => usize::try_from(len)
                .map_err(|_| config_err(format!("password_length is too large: {}", len)))?,
            None => DEFAULT_PASSWORD_LENGTH,
        };
        let password_case = match string_field(map, "password_case")? {
            Some(case) => case.parse().map_err(config_err)?,
            None => PasswordCase::default(),
        };
        let credential_producer = match string_field(map, "credential_producer")? {
            Some(kind) => kind.parse().map_err(config_err)?,
            None => ProducerKind::default(),
        };

        let config = Self {
            connection_url: SensitiveString::new(connection_url),
            username,
            password: SensitiveString::new(password),
            host,
            port,
            service,
            max_open_connections: max_open,
            max_idle_connections: max_idle,
            max_connection_lifetime,
            username_template,
            disable_escaping,
            split_statements: bool_field(map, "split_statements", true)?,
            disconnect_sessions: bool_field(map, "disconnect_sessions", true)?,
            password_length,
            password_case,
            credential_producer,
        };
        config
            .validate()
            .map_err(|e| config_err(e.to_string()))?;
        Ok(config)
    }

    /// Whether both root username and password are known
    pub fn has_root_credentials(&self) -> bool {
        !self.username.is_empty() && !self.password.is_empty()
    }

    /// Password shape for generated passwords
    pub fn password_policy(&self) -> PasswordPolicy {
        PasswordPolicy::new(self.password_length, self.password_case)
    }

    /// Connection settings for the administrative login
    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig::new(format!(
            "oracle://{}:{}/{}",
            self.host, self.port, self.service
        ))
        .with_credentials(self.username.clone(), self.password.expose_secret())
    }

    /// Pool limits for the administrative pool
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig::from_connection(self.connection_config())
            .with_max_size(self.max_open_connections as usize)
            .with_max_idle(self.max_idle_connections as usize)
            .with_max_lifetime(self.max_connection_lifetime)
    }
}
