//! Statement templates
//!
//! Operators supply SQL as text with `{{username}}`, `{{password}}` and
//! `{{expiration}}` markers. [`parse_statements`] turns the raw entries into
//! an ordered list of statements and [`StatementBindings::render`] fills in
//! the markers.

use std::collections::HashMap;

/// Statement terminator honored when splitting is enabled
pub const STATEMENT_DELIMITER: char = ';';

/// Rotation statement used when none is supplied
pub const DEFAULT_ROTATION_STATEMENT: &str = r#"ALTER USER {{username}} IDENTIFIED BY "{{password}}""#;

/// Revocation used when the engine disconnects sessions itself
pub const DEFAULT_REVOCATION_STATEMENTS: [&str; 3] = [
    "REVOKE CONNECT FROM {{username}}",
    "REVOKE CREATE SESSION FROM {{username}}",
    "DROP USER {{username}}",
];

/// Revocation used when sessions are not disconnected beforehand, or when
/// statements are not split: lock the account, kill its sessions, drop it
pub const DEFAULT_SESSION_REVOCATION_STATEMENTS: [&str; 3] = [
    "ALTER USER {{username}} ACCOUNT LOCK",
    "begin
  for x in ( select inst_id, sid, serial# from gv$session where username = UPPER('{{username}}') )
  loop
    execute immediate 'alter system kill session ''' || x.sid || ',' || x.serial# || ',@' || x.inst_id || ''' immediate';
  end loop;
  dbms_lock.sleep(1);
end;",
    "DROP USER {{username}}",
];

/// Split, trim and drop empty entries.
///
/// With `split` disabled every entry is kept whole (trimmed). With `split`
/// enabled every entry is cut on [`STATEMENT_DELIMITER`] and the fragments
/// of all entries are flattened in order.
///
/// # Examples
///
/// ```
/// use dynacred::statements::parse_statements;
///
/// assert!(parse_statements(&["", ";;;;"], true).is_empty());
/// assert_eq!(parse_statements(&[";alter user X;"], true), vec!["alter user X"]);
/// assert_eq!(
///     parse_statements(&["foo;bar;baz", "qux ; quux ; quuz"], true),
///     vec!["foo", "bar", "baz", "qux", "quux", "quuz"],
/// );
/// ```
pub fn parse_statements<S: AsRef<str>>(raw: &[S], split: bool) -> Vec<String> {
    let mut statements = Vec::new();
    for entry in raw {
        let entry = entry.as_ref();
        if split {
            statements.extend(
                entry
                    .split(STATEMENT_DELIMITER)
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string),
            );
        } else {
            let entry = entry.trim();
            if !entry.is_empty() {
                statements.push(entry.to_string());
            }
        }
    }
    statements
}

/// Resolve the revocation statements for a delete.
///
/// Custom statements are parsed with `split`. Without custom statements the
/// built-in sequence is used as is; the session-killing variant is chosen
/// when either `split` or `disconnect_sessions` is off.
pub fn revocation_statements<S: AsRef<str>>(
    custom: &[S],
    split: bool,
    disconnect_sessions: bool,
) -> Vec<String> {
    let custom = parse_statements(custom, split);
    if !custom.is_empty() {
        return custom;
    }
    let defaults = if !split || !disconnect_sessions {
        &DEFAULT_SESSION_REVOCATION_STATEMENTS
    } else {
        &DEFAULT_REVOCATION_STATEMENTS
    };
    defaults.iter().map(|s| s.to_string()).collect()
}

/// Resolve rotation statements, falling back to
/// [`DEFAULT_ROTATION_STATEMENT`] when none are supplied.
pub fn rotation_statements<S: AsRef<str>>(custom: &[S], split: bool) -> Vec<String> {
    let has_custom = custom.iter().any(|s| !s.as_ref().trim().is_empty());
    if has_custom {
        parse_statements(custom, split)
    } else {
        vec![DEFAULT_ROTATION_STATEMENT.to_string()]
    }
}

/// Replace every `{{key}}` marker whose key is in `values`.
///
/// Substitution is a single pass over the template, so bound values are
/// never re-scanned for markers. Unknown markers are left verbatim.
pub fn interpolate(template: &str, values: &HashMap<&str, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find("}}") {
            Some(end) => {
                let key = &after[..end];
                match values.get(key) {
                    Some(value) => out.push_str(value),
                    None => {
                        out.push_str("{{");
                        out.push_str(key);
                        out.push_str("}}");
                    }
                }
                rest = &after[end + 2..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

/// Values bound into statement templates
#[derive(Clone, Default)]
pub struct StatementBindings {
    values: HashMap<&'static str, String>,
}

impl std::fmt::Debug for StatementBindings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut keys: Vec<&&str> = self.values.keys().collect();
        keys.sort();
        f.debug_struct("StatementBindings")
            .field("keys", &keys)
            .finish()
    }
}

impl StatementBindings {
    /// Empty bindings
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind the username, also under the legacy `name` key
    pub fn username(mut self, username: impl Into<String>) -> Self {
        let username = username.into();
        self.values.insert("name", username.clone());
        self.values.insert("username", username);
        self
    }

    /// Bind the password
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.values.insert("password", password.into());
        self
    }

    /// Bind the expiration string
    pub fn expiration(mut self, expiration: impl Into<String>) -> Self {
        self.values.insert("expiration", expiration.into());
        self
    }

    /// Render one statement
    pub fn render(&self, template: &str) -> String {
        let values: HashMap<&str, String> = self
            .values
            .iter()
            .map(|(k, v)| (*k, v.clone()))
            .collect();
        interpolate(template, &values)
    }
}
