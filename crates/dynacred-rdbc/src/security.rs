//! SQL injection guards for dynacred-rdbc.
//!
//! Credential statements are text templates, so values substituted into them
//! cannot be bound as parameters. These helpers check or escape the values
//! before substitution:
//! - Identifier validation, with a stricter rule for generated usernames
//! - String literal escaping for session-view lookups
//! - Quoted-password validation for `IDENTIFIED BY "..."` clauses

use crate::error::Error;

/// Maximum identifier length in bytes (Oracle 12.2 and later)
pub const MAX_IDENTIFIER_LEN: usize = 128;

/// Validate an unquoted SQL identifier such as a database username.
///
/// Enforces Oracle's rules for nonquoted identifiers:
/// - Must not be empty
/// - At most [`MAX_IDENTIFIER_LEN`] bytes
/// - Must start with an ASCII letter
/// - May only contain ASCII alphanumerics, `_`, `$` and `#`
///
/// # Examples
///
/// ```
/// use dynacred_rdbc::security::validate_sql_identifier;
///
/// assert!(validate_sql_identifier("V_TOKEN_MYROLE_ABC123").is_ok());
/// assert!(validate_sql_identifier("APP$USER#1").is_ok());
///
/// // Rejects injection attempts
/// assert!(validate_sql_identifier("x; DROP USER system").is_err());
/// assert!(validate_sql_identifier("").is_err());
/// assert!(validate_sql_identifier("1ABC").is_err());
/// ```
pub fn validate_sql_identifier(name: &str) -> crate::Result<()> {
    if name.is_empty() {
        return Err(Error::config("SQL identifier cannot be empty"));
    }

    if name.len() > MAX_IDENTIFIER_LEN {
        return Err(Error::config(format!(
            "SQL identifier too long: {} bytes (max {})",
            name.len(),
            MAX_IDENTIFIER_LEN
        )));
    }

    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => {}
        _ => {
            return Err(Error::config(format!(
                "invalid SQL identifier '{}': must start with a letter",
                name
            )));
        }
    }

    for c in chars {
        if !(c.is_ascii_alphanumeric() || c == '_' || c == '$' || c == '#') {
            return Err(Error::config(format!(
                "invalid SQL identifier '{}': contains invalid character '{}'",
                name, c
            )));
        }
    }

    Ok(())
}

/// Validate a username produced by a credential generator.
///
/// Stricter than [`validate_sql_identifier`]: generated names start with an
/// ASCII letter and contain only ASCII alphanumerics and `_`, so they are
/// valid both quoted and unquoted.
///
/// ```
/// use dynacred_rdbc::security::validate_generated_username;
///
/// assert!(validate_generated_username("V_TOKEN_MYROLENA_4F7Q2ZKB").is_ok());
/// assert!(validate_generated_username("V_A$B#C").is_err());
/// assert!(validate_generated_username("4F7Q2ZKB_MYROLENAME").is_err());
/// ```
pub fn validate_generated_username(name: &str) -> crate::Result<()> {
    validate_sql_identifier(name)?;
    if let Some(c) = name.chars().find(|c| *c == '$' || *c == '#') {
        return Err(Error::config(format!(
            "invalid username '{}': contains invalid character '{}'",
            name, c
        )));
    }
    Ok(())
}

/// Escape a string value for safe interpolation into a SQL string literal.
///
/// Replaces `'` with `''`.
///
/// # Examples
///
/// ```
/// use dynacred_rdbc::security::escape_string_literal;
///
/// assert_eq!(escape_string_literal("V_APP"), "V_APP");
/// assert_eq!(escape_string_literal("x') OR 1=1--"), "x'') OR 1=1--");
/// ```
pub fn escape_string_literal(value: &str) -> String {
    if !value.contains('\'') {
        return value.to_string();
    }
    value.replace('\'', "''")
}

/// Validate a secret that will be written inside a double-quoted identifier,
/// as in `ALTER USER x IDENTIFIED BY "secret"`.
///
/// A double quote would end the quoted context and a NUL truncates the
/// statement in some drivers, so both are rejected.
///
/// # Examples
///
/// ```
/// use dynacred_rdbc::security::validate_quoted_secret;
///
/// assert!(validate_quoted_secret("A1b2_C3d4").is_ok());
/// assert!(validate_quoted_secret("abc\" ACCOUNT UNLOCK --").is_err());
/// ```
pub fn validate_quoted_secret(secret: &str) -> crate::Result<()> {
    if secret.is_empty() {
        return Err(Error::config("password cannot be empty"));
    }
    if secret.contains('"') || secret.contains('\0') {
        return Err(Error::config(
            "password must not contain double quotes or NUL characters",
        ));
    }
    Ok(())
}
