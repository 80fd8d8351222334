//! Credential generation
//!
//! A [`CredentialGenerator`] produces the identity material for a new
//! account. Two strategies exist:
//!
//! - [`TemplateCredentialGenerator`] renders a [`UsernameTemplate`]
//!   (the default)
//! - [`PatternCredentialGenerator`] builds lowercase names from fixed
//!   display/role/random/time components
//!
//! Both share a [`PasswordPolicy`] and validate every username before it can
//! reach a statement: a letter first, then only letters, digits and `_`.

use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::error::{LifecycleError, Result};
use crate::template::{UsernameMetadata, UsernameTemplate};
use dynacred_rdbc::security::validate_generated_username;

/// Maximum username length for generated accounts
pub const USERNAME_LENGTH: usize = 30;

/// Maximum length of the display/role components of a pattern username
pub const DISPLAY_NAME_MAX_LENGTH: usize = 10;

/// Default generated password length
pub const DEFAULT_PASSWORD_LENGTH: usize = 30;

/// Format of expiration strings, e.g. `2024-05-01 13:45:00+0000`
pub const EXPIRATION_FORMAT: &str = "%Y-%m-%d %H:%M:%S%z";

const UPPER: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const LOWER: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
const PASSWORD_CHARSET: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789_";
const PATTERN_RANDOM_CHARSET: &[u8] = b"_abcdefghijklmnopqrstuvwxyz0123456789";
const LOWER_ALNUM: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Format an expiration timestamp the way statements expect it
pub fn format_expiration(expiration: DateTime<Utc>) -> String {
    expiration.format(EXPIRATION_FORMAT).to_string()
}

/// Produces usernames, passwords and expiration strings
pub trait CredentialGenerator: Send + Sync + std::fmt::Debug {
    /// Generate a fresh username for the given request metadata
    fn generate_username(&self, metadata: &UsernameMetadata) -> Result<String>;

    /// Generate a fresh password
    fn generate_password(&self) -> Result<String>;

    /// Render an expiration timestamp
    fn generate_expiration(&self, expiration: DateTime<Utc>) -> Result<String> {
        Ok(format_expiration(expiration))
    }
}

/// Case required of a password's first character
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PasswordCase {
    /// First character is `A-Z`
    #[default]
    Upper,
    /// First character is `a-z`
    Lower,
}

impl std::str::FromStr for PasswordCase {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "upper" => Ok(Self::Upper),
            "lower" => Ok(Self::Lower),
            other => Err(format!(
                "unknown password_case {:?}, expected \"upper\" or \"lower\"",
                other
            )),
        }
    }
}

/// Password shape: a letter of the configured case, then `[A-Za-z0-9_]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PasswordPolicy {
    /// Total length
    pub length: usize,
    /// Case of the first character
    pub case: PasswordCase,
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self {
            length: DEFAULT_PASSWORD_LENGTH,
            case: PasswordCase::Upper,
        }
    }
}

impl PasswordPolicy {
    /// Create a policy
    pub fn new(length: usize, case: PasswordCase) -> Self {
        Self { length, case }
    }

    /// Generate a password from the OS random source
    pub fn generate(&self) -> Result<String> {
        if self.length == 0 {
            return Err(LifecycleError::generation("password", "length must be > 0"));
        }
        let first = match self.case {
            PasswordCase::Upper => UPPER,
            PasswordCase::Lower => LOWER,
        };
        let mut password = random_string(first, 1)?;
        password.push_str(&random_string(PASSWORD_CHARSET, self.length - 1)?);
        Ok(password)
    }
}

/// Draw `len` characters uniformly from `alphabet` using the OS source
fn random_string(alphabet: &[u8], len: usize) -> Result<String> {
    // Bytes at or above `limit` would bias the modulo and are rejected.
    let limit = 256 - (256 % alphabet.len());
    let mut out = String::with_capacity(len);
    let mut buf = [0u8; 64];

    while out.len() < len {
        OsRng
            .try_fill_bytes(&mut buf)
            .map_err(|e| LifecycleError::generation("random bytes", e.to_string()))?;
        for &b in buf.iter() {
            if out.len() == len {
                break;
            }
            if (b as usize) < limit {
                out.push(alphabet[b as usize % alphabet.len()] as char);
            }
        }
    }
    Ok(out)
}

/// Renders usernames from a [`UsernameTemplate`]
#[derive(Debug, Clone)]
pub struct TemplateCredentialGenerator {
    template: UsernameTemplate,
    password: PasswordPolicy,
}

impl TemplateCredentialGenerator {
    /// Create a generator from a parsed template
    pub fn new(template: UsernameTemplate, password: PasswordPolicy) -> Self {
        Self { template, password }
    }

    /// Parse `template` and check that it renders
    pub fn from_source(template: &str, password: PasswordPolicy) -> Result<Self> {
        let template = UsernameTemplate::parse(template)
            .map_err(|e| LifecycleError::Config(format!("unable to parse username template: {}", e)))?;
        template
            .render(&UsernameMetadata::default())
            .map_err(|e| LifecycleError::Config(format!("invalid username template: {}", e)))?;
        Ok(Self::new(template, password))
    }
}

impl CredentialGenerator for TemplateCredentialGenerator {
    fn generate_username(&self, metadata: &UsernameMetadata) -> Result<String> {
        let username = self
            .template
            .render(metadata)
            .map_err(|e| LifecycleError::generation("username", e.to_string()))?;
        check_username(&username)?;
        Ok(username)
    }

    fn generate_password(&self) -> Result<String> {
        self.password.generate()
    }
}

fn check_username(username: &str) -> Result<()> {
    validate_generated_username(username)
        .map_err(|e| LifecycleError::generation("username", e.to_string()))
}

/// Lowercase usernames built from fixed components.
///
/// The role-aware form is `v_{display}_{role}_{random}_{unix time}` with
/// display and role cut to [`DISPLAY_NAME_MAX_LENGTH`]; the display-only
/// form is `{display}_` followed by random `[_a-z0-9]` characters, with a
/// `v` in front when the display name does not start with a letter. Both
/// are exactly [`USERNAME_LENGTH`] characters long. Characters outside
/// `[a-z0-9_]` in the display or role name become `_`.
#[derive(Debug, Clone)]
pub struct PatternCredentialGenerator {
    include_role: bool,
    password: PasswordPolicy,
}

fn sanitize_component(value: &str) -> String {
    value
        .chars()
        .take(DISPLAY_NAME_MAX_LENGTH)
        .map(|c| {
            let c = c.to_ascii_lowercase();
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

impl PatternCredentialGenerator {
    /// Role-aware generator
    pub fn new(password: PasswordPolicy) -> Self {
        Self {
            include_role: true,
            password,
        }
    }

    /// Display-name-only generator
    pub fn display_only(password: PasswordPolicy) -> Self {
        Self {
            include_role: false,
            password,
        }
    }

    fn role_aware(&self, metadata: &UsernameMetadata) -> Result<String> {
        let mut username = String::from("v");
        for component in [&metadata.display_name, &metadata.role_name] {
            let component = sanitize_component(component);
            if !component.is_empty() {
                username.push('_');
                username.push_str(&component);
            }
        }
        username.push('_');
        username.push_str(&random_string(LOWER_ALNUM, 20)?);
        username.push('_');
        username.push_str(&Utc::now().timestamp().to_string());
        username.truncate(USERNAME_LENGTH);
        check_username(&username)?;
        Ok(username)
    }

    fn display(&self, metadata: &UsernameMetadata) -> Result<String> {
        let display = sanitize_component(&metadata.display_name);
        let mut username = String::with_capacity(USERNAME_LENGTH);
        if !display.starts_with(|c: char| c.is_ascii_lowercase()) {
            username.push('v');
        }
        username.push_str(&display);
        username.push('_');
        let fill = USERNAME_LENGTH - username.len();
        username.push_str(&random_string(PATTERN_RANDOM_CHARSET, fill)?);
        check_username(&username)?;
        Ok(username)
    }
}

impl CredentialGenerator for PatternCredentialGenerator {
    fn generate_username(&self, metadata: &UsernameMetadata) -> Result<String> {
        if self.include_role {
            self.role_aware(metadata)
        } else {
            self.display(metadata)
        }
    }

    fn generate_password(&self) -> Result<String> {
        self.password.generate()
    }
}
