//! Scripted in-memory backend for testing
//!
//! [`MockBackend`] behaves like a small Oracle instance, which is enough to
//! exercise credential lifecycle code without a database:
//!
//! - DDL (`CREATE`, `ALTER`, `DROP`, `GRANT`, `REVOKE`, PL/SQL blocks)
//!   commits as it runs, even inside a transaction, and implicitly commits
//!   any pending DML first
//! - DML is held per connection until commit and discarded on rollback
//! - `CREATE USER` / `ALTER USER` / `DROP USER` maintain an account table
//!   that new connections authenticate against
//! - every open connection owns a row in `gv$session`/`v$session`, which
//!   `ALTER SYSTEM KILL SESSION` removes
//! - statements can be made to fail, or paused on a gate; a paused
//!   statement whose future is dropped is never applied, the way the Oracle
//!   backend breaks off an abandoned call
//!
//! # Example
//!
//! ```rust,ignore
//! use dynacred_rdbc::testing::MockBackend;
//!
//! let backend = MockBackend::new().with_account("system", "manager");
//! let factory = backend.factory();
//!
//! let config = ConnectionConfig::new("oracle://mock:1521/XE")
//!     .with_credentials("system", "manager");
//! let conn = factory.connect(&config).await?;
//! conn.execute("CREATE USER app IDENTIFIED BY \"pw\"").await?;
//! assert!(backend.has_account("APP"));
//! ```

use async_trait::async_trait;
use parking_lot::Mutex;
use regex::Regex;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, LazyLock};
use tokio::sync::{Notify, Semaphore};

use crate::connection::{
    Connection, ConnectionConfig, ConnectionFactory, DatabaseType, Transaction,
};
use crate::error::{Error, Result};
use crate::types::{Row, Value};

static CREATE_USER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)^\s*CREATE\s+USER\s+"?([A-Za-z][A-Za-z0-9_$#]*)"?\s+IDENTIFIED\s+BY\s+(?:"([^"]*)"|(\S+))"#).unwrap()
});

static ALTER_USER_PASSWORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)^\s*ALTER\s+USER\s+"?([A-Za-z][A-Za-z0-9_$#]*)"?\s+IDENTIFIED\s+BY\s+(?:"([^"]*)"|(\S+))"#).unwrap()
});

static ALTER_USER_LOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)^\s*ALTER\s+USER\s+"?([A-Za-z][A-Za-z0-9_$#]*)"?\s+ACCOUNT\s+(LOCK|UNLOCK)\b"#).unwrap()
});

static DROP_USER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)^\s*DROP\s+USER\s+"?([A-Za-z][A-Za-z0-9_$#]*)"?"#).unwrap()
});

static GRANT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)^\s*GRANT\s+(.+?)\s+TO\s+"?([A-Za-z][A-Za-z0-9_$#]*)"?\s*$"#).unwrap()
});

static REVOKE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)^\s*REVOKE\s+(.+?)\s+FROM\s+"?([A-Za-z][A-Za-z0-9_$#]*)"?\s*$"#).unwrap()
});

static KILL_SESSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)^\s*ALTER\s+SYSTEM\s+KILL\s+SESSION\s+'(\d+)\s*,\s*(\d+)(?:\s*,\s*@(\d+))?'"#).unwrap()
});

static SESSION_USER_FILTER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)username\s*=\s*(?:UPPER\s*\(\s*)?'((?:[^']|'')*)'"#).unwrap()
});

const KILLED: &str = "ORA-00028: your session has been killed";
const NOT_CONNECTED: &str = "ORA-03114: not connected to ORACLE";

/// An account in the mock account table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockAccount {
    /// Current password (case-sensitive)
    pub password: String,
    /// Whether `ACCOUNT LOCK` is in effect
    pub locked: bool,
    /// Granted roles and privileges, uppercased
    pub grants: BTreeSet<String>,
}

/// A row of the mock session view
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockSession {
    /// Instance number
    pub inst_id: i64,
    /// Session id
    pub sid: i64,
    /// Serial number
    pub serial: i64,
    /// Owning user, uppercased
    pub username: String,
}

#[derive(Default)]
struct State {
    accounts: HashMap<String, MockAccount>,
    sessions: Vec<MockSession>,
    next_sid: i64,
    executed: Vec<String>,
    committed: Vec<String>,
    failures: Vec<(String, String)>,
    rows: Vec<(String, Vec<Row>)>,
    pauses: Vec<(String, PauseHandle)>,
    cluster_view_available: bool,
    available: bool,
}

/// Scripted Oracle-like backend shared by every connection it hands out
#[derive(Clone)]
pub struct MockBackend {
    state: Arc<Mutex<State>>,
    connects: Arc<AtomicU64>,
    closes: Arc<AtomicU64>,
    commits: Arc<AtomicU64>,
    rollbacks: Arc<AtomicU64>,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MockBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MockBackend")
            .field("accounts", &state.accounts.keys().collect::<Vec<_>>())
            .field("sessions", &state.sessions.len())
            .field("executed", &state.executed.len())
            .finish()
    }
}

impl MockBackend {
    /// Create an empty backend
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                next_sid: 100,
                cluster_view_available: true,
                available: true,
                ..State::default()
            })),
            connects: Arc::new(AtomicU64::new(0)),
            closes: Arc::new(AtomicU64::new(0)),
            commits: Arc::new(AtomicU64::new(0)),
            rollbacks: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Seed an account that may log in
    pub fn with_account(self, username: &str, password: &str) -> Self {
        self.state.lock().accounts.insert(
            username.to_ascii_uppercase(),
            MockAccount {
                password: password.to_string(),
                locked: false,
                grants: BTreeSet::from(["CREATE SESSION".to_string(), "DBA".to_string()]),
            },
        );
        self
    }

    /// Add a session row owned by `username` that no connection backs
    pub fn with_session(self, inst_id: i64, sid: i64, serial: i64, username: &str) -> Self {
        self.state.lock().sessions.push(MockSession {
            inst_id,
            sid,
            serial,
            username: username.to_ascii_uppercase(),
        });
        self
    }

    /// Return `rows` for any query containing `needle` (case-insensitive)
    pub fn with_rows(self, needle: &str, rows: Vec<Row>) -> Self {
        self.state
            .lock()
            .rows
            .push((needle.to_ascii_lowercase(), rows));
        self
    }

    /// Make queries against `gv$session` fail as on a single-instance database
    pub fn without_cluster_view(self) -> Self {
        self.state.lock().cluster_view_available = false;
        self
    }

    /// Fail every statement containing `needle` (case-insensitive)
    pub fn fail_on(&self, needle: &str, message: impl Into<String>) {
        self.state
            .lock()
            .failures
            .push((needle.to_ascii_lowercase(), message.into()));
    }

    /// Remove all injected failures
    pub fn clear_failures(&self) {
        self.state.lock().failures.clear();
    }

    /// Block every statement containing `needle` until the handle is released
    ///
    /// The gate sits before the statement takes effect, so dropping the
    /// waiting future discards the statement.
    pub fn pause_on(&self, needle: &str) -> PauseHandle {
        let handle = PauseHandle::new();
        self.state
            .lock()
            .pauses
            .push((needle.to_ascii_lowercase(), handle.clone()));
        handle
    }

    /// Make the listener reachable or unreachable
    pub fn set_available(&self, available: bool) {
        self.state.lock().available = available;
    }

    /// Connection factory backed by this database
    pub fn factory(&self) -> Arc<dyn ConnectionFactory> {
        Arc::new(MockConnectionFactory::new(self.clone()))
    }

    /// Whether `username` exists
    pub fn has_account(&self, username: &str) -> bool {
        self.state
            .lock()
            .accounts
            .contains_key(&username.to_ascii_uppercase())
    }

    /// Snapshot of an account
    pub fn account(&self, username: &str) -> Option<MockAccount> {
        self.state
            .lock()
            .accounts
            .get(&username.to_ascii_uppercase())
            .cloned()
    }

    /// Whether `username` could open a new connection with `password`
    pub fn can_login(&self, username: &str, password: &str) -> bool {
        self.state.lock().authenticate(username, password).is_ok()
    }

    /// Session rows currently owned by `username`
    pub fn sessions_of(&self, username: &str) -> Vec<MockSession> {
        let username = username.to_ascii_uppercase();
        self.state
            .lock()
            .sessions
            .iter()
            .filter(|s| s.username == username)
            .cloned()
            .collect()
    }

    /// Every statement that ran successfully, in order
    pub fn executed(&self) -> Vec<String> {
        self.state.lock().executed.clone()
    }

    /// Every statement whose effects are durable, in commit order
    pub fn committed(&self) -> Vec<String> {
        self.state.lock().committed.clone()
    }

    /// Number of successful logins
    pub fn connects(&self) -> u64 {
        self.connects.load(Ordering::Relaxed)
    }

    /// Number of connections closed
    pub fn closes(&self) -> u64 {
        self.closes.load(Ordering::Relaxed)
    }

    /// Number of explicit commits
    pub fn commits(&self) -> u64 {
        self.commits.load(Ordering::Relaxed)
    }

    /// Number of rollbacks, explicit or on drop
    pub fn rollbacks(&self) -> u64 {
        self.rollbacks.load(Ordering::Relaxed)
    }

    async fn before_statement(&self, sql: &str) -> Result<()> {
        let (pauses, failure) = {
            let state = self.state.lock();
            let lower = sql.to_ascii_lowercase();
            let pauses: Vec<PauseHandle> = state
                .pauses
                .iter()
                .filter(|(needle, _)| lower.contains(needle.as_str()))
                .map(|(_, handle)| handle.clone())
                .collect();
            let failure = state
                .failures
                .iter()
                .find(|(needle, _)| lower.contains(needle.as_str()))
                .map(|(_, message)| message.clone());
            (pauses, failure)
        };

        for pause in pauses {
            pause.wait().await;
        }

        match failure {
            Some(message) => Err(Error::query(message)),
            None => Ok(()),
        }
    }

    fn open_session(&self, config: &ConnectionConfig) -> Result<i64> {
        let mut state = self.state.lock();
        if !state.available {
            return Err(Error::connection("ORA-12541: TNS:no listener"));
        }
        let username = config.username.clone().unwrap_or_default();
        let password = config.password.clone().unwrap_or_default();
        state.authenticate(&username, &password)?;

        state.next_sid += 1;
        let sid = state.next_sid;
        state.sessions.push(MockSession {
            inst_id: 1,
            sid,
            serial: sid * 7 + 3,
            username: username.to_ascii_uppercase(),
        });
        self.connects.fetch_add(1, Ordering::Relaxed);
        Ok(sid)
    }
}

impl State {
    fn authenticate(&self, username: &str, password: &str) -> Result<()> {
        let account = match self.accounts.get(&username.to_ascii_uppercase()) {
            Some(account) if account.password == password => account,
            _ => {
                return Err(Error::authentication(
                    "ORA-01017: invalid username/password; logon denied",
                ))
            }
        };
        if account.locked {
            return Err(Error::authentication("ORA-28000: the account is locked"));
        }
        let can_connect = account
            .grants
            .iter()
            .any(|g| g == "CREATE SESSION" || g == "CONNECT");
        if !can_connect {
            return Err(Error::authentication(
                "ORA-01045: user lacks CREATE SESSION privilege; logon denied",
            ));
        }
        Ok(())
    }

    fn session_alive(&self, sid: i64) -> bool {
        self.sessions.iter().any(|s| s.sid == sid)
    }

    fn account_mut(&mut self, username: &str, code: &str) -> Result<&mut MockAccount> {
        let key = username.to_ascii_uppercase();
        match self.accounts.get_mut(&key) {
            Some(account) => Ok(account),
            None if code == "ORA-01917" => Err(Error::query(format!(
                "ORA-01917: user or role '{}' does not exist",
                key
            ))),
            None => Err(Error::query(format!("ORA-01918: user '{}' does not exist", key))),
        }
    }

    fn run_query(&self, sql: &str) -> Result<Vec<Row>> {
        let lower = sql.to_ascii_lowercase();

        if let Some((_, rows)) = self
            .rows
            .iter()
            .find(|(needle, _)| lower.contains(needle.as_str()))
        {
            return Ok(rows.clone());
        }

        if lower.contains("gv$session") {
            if !self.cluster_view_available {
                return Err(Error::query("ORA-00942: table or view does not exist"));
            }
            return Ok(self.session_rows(sql, true));
        }
        if lower.contains("v$session") {
            return Ok(self.session_rows(sql, false));
        }
        if lower.contains("from dual") {
            return Ok(vec![Row::new(vec!["1".into()], vec![Value::Int64(1)])]);
        }
        Ok(Vec::new())
    }

    fn session_rows(&self, sql: &str, cluster: bool) -> Vec<Row> {
        let filter = SESSION_USER_FILTER
            .captures(sql)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().replace("''", "'").to_ascii_uppercase());

        self.sessions
            .iter()
            .filter(|s| filter.as_ref().map_or(true, |u| &s.username == u))
            .map(|s| {
                if cluster {
                    Row::new(
                        vec![
                            "INST_ID".into(),
                            "SID".into(),
                            "SERIAL#".into(),
                            "USERNAME".into(),
                        ],
                        vec![
                            Value::Int64(s.inst_id),
                            Value::Int64(s.sid),
                            Value::Int64(s.serial),
                            Value::String(s.username.clone()),
                        ],
                    )
                } else {
                    Row::new(
                        vec!["SID".into(), "SERIAL#".into(), "USERNAME".into()],
                        vec![
                            Value::Int64(s.sid),
                            Value::Int64(s.serial),
                            Value::String(s.username.clone()),
                        ],
                    )
                }
            })
            .collect()
    }

    /// Apply a statement that commits on its own
    fn apply_ddl(&mut self, sql: &str) -> Result<()> {
        if let Some(c) = CREATE_USER.captures(sql) {
            let name = c[1].to_ascii_uppercase();
            if self.accounts.contains_key(&name) {
                return Err(Error::query(format!(
                    "ORA-01920: user name '{}' conflicts with another user or role name",
                    name
                )));
            }
            let password = c.get(2).or_else(|| c.get(3)).map_or("", |m| m.as_str());
            self.accounts.insert(
                name,
                MockAccount {
                    password: password.to_string(),
                    locked: false,
                    grants: BTreeSet::new(),
                },
            );
        } else if let Some(c) = ALTER_USER_PASSWORD.captures(sql) {
            let password = c
                .get(2)
                .or_else(|| c.get(3))
                .map_or(String::new(), |m| m.as_str().to_string());
            let account = self.account_mut(&c[1], "ORA-01918")?;
            account.password = password;
            if sql.to_ascii_uppercase().contains("ACCOUNT UNLOCK") {
                account.locked = false;
            }
        } else if let Some(c) = ALTER_USER_LOCK.captures(sql) {
            let lock = c[2].eq_ignore_ascii_case("LOCK");
            self.account_mut(&c[1], "ORA-01918")?.locked = lock;
        } else if let Some(c) = DROP_USER.captures(sql) {
            let name = c[1].to_ascii_uppercase();
            self.account_mut(&name, "ORA-01918")?;
            if self.sessions.iter().any(|s| s.username == name) {
                return Err(Error::query(
                    "ORA-01940: cannot drop a user that is currently connected",
                ));
            }
            self.accounts.remove(&name);
        } else if let Some(c) = GRANT.captures(sql) {
            let privileges = split_privileges(&c[1]);
            self.account_mut(&c[2], "ORA-01917")?
                .grants
                .extend(privileges);
        } else if let Some(c) = REVOKE.captures(sql) {
            let privileges = split_privileges(&c[1]);
            let account = self.account_mut(&c[2], "ORA-01917")?;
            for privilege in privileges {
                account.grants.remove(&privilege);
            }
        } else if let Some(c) = KILL_SESSION.captures(sql) {
            let sid: i64 = c[1].parse().unwrap_or(-1);
            let serial: i64 = c[2].parse().unwrap_or(-1);
            let inst: Option<i64> = c.get(3).and_then(|m| m.as_str().parse().ok());
            let before = self.sessions.len();
            self.sessions.retain(|s| {
                !(s.sid == sid && s.serial == serial && inst.map_or(true, |i| i == s.inst_id))
            });
            if self.sessions.len() == before {
                return Err(Error::query("ORA-00030: User session ID does not exist."));
            }
        } else if is_plsql_block(sql) && sql.to_ascii_lowercase().contains("kill session") {
            // Session-killing loop over gv$session.
            if let Some(user) = SESSION_USER_FILTER
                .captures(sql)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().replace("''", "'").to_ascii_uppercase())
            {
                self.sessions.retain(|s| s.username != user);
            }
        }

        self.committed.push(sql.to_string());
        Ok(())
    }
}

fn split_privileges(list: &str) -> Vec<String> {
    list.split(',')
        .map(|p| p.split_whitespace().collect::<Vec<_>>().join(" ").to_ascii_uppercase())
        .filter(|p| !p.is_empty())
        .collect()
}

fn first_keyword(sql: &str) -> String {
    sql.trim_start()
        .split(|c: char| !c.is_ascii_alphabetic())
        .next()
        .unwrap_or_default()
        .to_ascii_uppercase()
}

fn is_plsql_block(sql: &str) -> bool {
    matches!(first_keyword(sql).as_str(), "BEGIN" | "DECLARE")
}

/// Whether a statement commits implicitly
fn is_ddl(sql: &str) -> bool {
    matches!(
        first_keyword(sql).as_str(),
        "CREATE"
            | "ALTER"
            | "DROP"
            | "GRANT"
            | "REVOKE"
            | "TRUNCATE"
            | "RENAME"
            | "COMMENT"
            | "AUDIT"
            | "NOAUDIT"
            | "PURGE"
            | "BEGIN"
            | "DECLARE"
    )
}

fn is_dml(sql: &str) -> bool {
    matches!(
        first_keyword(sql).as_str(),
        "INSERT" | "UPDATE" | "DELETE" | "MERGE"
    )
}

/// Gate that holds matching statements until released
#[derive(Clone)]
pub struct PauseHandle {
    reached: Arc<Notify>,
    gate: Arc<Semaphore>,
}

impl PauseHandle {
    fn new() -> Self {
        Self {
            reached: Arc::new(Notify::new()),
            gate: Arc::new(Semaphore::new(0)),
        }
    }

    async fn wait(&self) {
        if self.gate.is_closed() {
            return;
        }
        self.reached.notify_one();
        // Closing the semaphore is the release signal.
        let _ = self.gate.acquire().await;
    }

    /// Wait until a statement hits the gate
    pub async fn reached(&self) {
        self.reached.notified().await;
    }

    /// Let every held and future matching statement through
    pub fn release(&self) {
        self.gate.close();
    }
}

/// Factory handing out [`MockConnection`]s
pub struct MockConnectionFactory {
    backend: MockBackend,
}

impl MockConnectionFactory {
    /// Create a factory for `backend`
    pub fn new(backend: MockBackend) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl ConnectionFactory for MockConnectionFactory {
    async fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn Connection>> {
        let sid = self.backend.open_session(config)?;
        Ok(Box::new(MockConnection {
            backend: self.backend.clone(),
            session: Arc::new(SessionState {
                sid,
                closed: AtomicBool::new(false),
                pending: Mutex::new(Vec::new()),
            }),
        }))
    }

    fn database_type(&self) -> DatabaseType {
        DatabaseType::Mock
    }
}

struct SessionState {
    sid: i64,
    closed: AtomicBool,
    pending: Mutex<Vec<String>>,
}

impl SessionState {
    fn check_open(&self, backend: &MockBackend) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::connection(NOT_CONNECTED));
        }
        if !backend.state.lock().session_alive(self.sid) {
            return Err(Error::connection(KILLED));
        }
        Ok(())
    }

    /// Move pending DML into the committed log
    fn commit_pending(&self, state: &mut State) {
        let pending: Vec<String> = self.pending.lock().drain(..).collect();
        state.committed.extend(pending);
    }

    async fn execute(&self, backend: &MockBackend, sql: &str, autocommit: bool) -> Result<u64> {
        self.check_open(backend)?;
        backend.before_statement(sql).await?;
        self.check_open(backend)?;

        let mut state = backend.state.lock();
        if is_ddl(sql) {
            self.commit_pending(&mut state);
            state.apply_ddl(sql)?;
        } else if is_dml(sql) {
            if autocommit {
                state.committed.push(sql.to_string());
            } else {
                self.pending.lock().push(sql.to_string());
            }
        }
        state.executed.push(sql.to_string());
        Ok(if is_dml(sql) { 1 } else { 0 })
    }

    async fn query(&self, backend: &MockBackend, sql: &str) -> Result<Vec<Row>> {
        self.check_open(backend)?;
        backend.before_statement(sql).await?;
        self.check_open(backend)?;

        let mut state = backend.state.lock();
        let rows = state.run_query(sql)?;
        state.executed.push(sql.to_string());
        Ok(rows)
    }
}

/// Connection to a [`MockBackend`]
pub struct MockConnection {
    backend: MockBackend,
    session: Arc<SessionState>,
}

#[async_trait]
impl Connection for MockConnection {
    async fn query(&self, sql: &str) -> Result<Vec<Row>> {
        self.session.query(&self.backend, sql).await
    }

    async fn execute(&self, sql: &str) -> Result<u64> {
        self.session.execute(&self.backend, sql, true).await
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        self.session.check_open(&self.backend)?;
        Ok(Box::new(MockTransaction {
            backend: self.backend.clone(),
            session: self.session.clone(),
            finished: AtomicBool::new(false),
        }))
    }

    async fn is_valid(&self) -> bool {
        let available = self.backend.state.lock().available;
        available && self.session.check_open(&self.backend).is_ok()
    }

    async fn close(&self) -> Result<()> {
        if self.session.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let sid = self.session.sid;
        self.backend.state.lock().sessions.retain(|s| s.sid != sid);
        self.session.pending.lock().clear();
        self.backend.closes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// Transaction on a [`MockConnection`]
///
/// Pending DML is discarded if the transaction is dropped unfinished.
pub struct MockTransaction {
    backend: MockBackend,
    session: Arc<SessionState>,
    finished: AtomicBool,
}

#[async_trait]
impl Transaction for MockTransaction {
    async fn query(&self, sql: &str) -> Result<Vec<Row>> {
        self.session.query(&self.backend, sql).await
    }

    async fn execute(&self, sql: &str) -> Result<u64> {
        self.session.execute(&self.backend, sql, false).await
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.session.check_open(&self.backend)?;
        self.backend.before_statement("COMMIT").await?;
        {
            let mut state = self.backend.state.lock();
            self.session.commit_pending(&mut state);
        }
        self.finished.store(true, Ordering::Release);
        self.backend.commits.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.session.pending.lock().clear();
        self.finished.store(true, Ordering::Release);
        self.backend.rollbacks.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

impl Drop for MockTransaction {
    fn drop(&mut self) {
        if !self.finished.load(Ordering::Acquire) {
            self.session.pending.lock().clear();
            self.backend.rollbacks.fetch_add(1, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root_config() -> ConnectionConfig {
        ConnectionConfig::new("oracle://mock:1521/XE").with_credentials("system", "manager")
    }

    #[tokio::test]
    async fn test_login_requires_known_account() {
        let backend = MockBackend::new().with_account("system", "manager");
        let factory = backend.factory();

        assert!(factory.connect(&root_config()).await.is_ok());

        let bad = ConnectionConfig::new("oracle://mock:1521/XE").with_credentials("system", "x");
        let err = factory.connect(&bad).await.err().unwrap();
        assert!(err.to_string().contains("ORA-01017"));
        assert_eq!(backend.connects(), 1);
    }

    #[tokio::test]
    async fn test_ddl_commits_inside_transaction() {
        let backend = MockBackend::new().with_account("system", "manager");
        let conn = backend.factory().connect(&root_config()).await.unwrap();

        let tx = conn.begin().await.unwrap();
        tx.execute("INSERT INTO audit_log VALUES (1)").await.unwrap();
        tx.execute("CREATE USER app IDENTIFIED BY \"Secret_1\"").await.unwrap();
        tx.execute("INSERT INTO audit_log VALUES (2)").await.unwrap();
        tx.rollback().await.unwrap();

        assert!(backend.has_account("APP"));
        assert_eq!(
            backend.committed(),
            vec![
                "INSERT INTO audit_log VALUES (1)".to_string(),
                "CREATE USER app IDENTIFIED BY \"Secret_1\"".to_string(),
            ]
        );
        assert_eq!(backend.rollbacks(), 1);
    }

    #[tokio::test]
    async fn test_created_account_can_login_after_grant() {
        let backend = MockBackend::new().with_account("system", "manager");
        let conn = backend.factory().connect(&root_config()).await.unwrap();

        conn.execute("CREATE USER app IDENTIFIED BY \"Secret_1\"").await.unwrap();
        assert!(!backend.can_login("app", "Secret_1"));

        conn.execute("GRANT CONNECT TO app").await.unwrap();
        assert!(backend.can_login("APP", "Secret_1"));
        assert!(!backend.can_login("APP", "secret_1"));

        conn.execute("ALTER USER app ACCOUNT LOCK").await.unwrap();
        assert!(!backend.can_login("APP", "Secret_1"));
    }

    #[tokio::test]
    async fn test_drop_user_blocked_by_session() {
        let backend = MockBackend::new()
            .with_account("system", "manager")
            .with_account("app", "pw");
        let factory = backend.factory();
        let root = factory.connect(&root_config()).await.unwrap();
        let _app = factory
            .connect(&ConnectionConfig::new("oracle://mock:1521/XE").with_credentials("app", "pw"))
            .await
            .unwrap();

        let err = root.execute("DROP USER app").await.unwrap_err();
        assert!(err.to_string().contains("ORA-01940"));

        let rows = root
            .query("SELECT inst_id, sid, serial#, username FROM gv$session WHERE username = UPPER('app')")
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        let sid = rows[0].get_by_name("sid").and_then(Value::as_i64).unwrap();
        let serial = rows[0].get_by_name("serial#").and_then(Value::as_i64).unwrap();

        root.execute(&format!("ALTER SYSTEM KILL SESSION '{},{},@1' IMMEDIATE", sid, serial))
            .await
            .unwrap();
        root.execute("DROP USER app").await.unwrap();
        assert!(!backend.has_account("app"));
    }

    #[tokio::test]
    async fn test_cluster_view_can_be_disabled() {
        let backend = MockBackend::new()
            .with_account("system", "manager")
            .without_cluster_view();
        let conn = backend.factory().connect(&root_config()).await.unwrap();

        assert!(conn.query("SELECT * FROM gv$session").await.is_err());
        let rows = conn
            .query("SELECT sid, serial#, username FROM v$session WHERE username = UPPER('system')")
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].len(), 3);
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let backend = MockBackend::new().with_account("system", "manager");
        let conn = backend.factory().connect(&root_config()).await.unwrap();
        backend.fail_on("grant", "ORA-01031: insufficient privileges");

        let err = conn.execute("GRANT DBA TO system").await.unwrap_err();
        assert!(err.to_string().contains("ORA-01031"));

        backend.clear_failures();
        conn.execute("GRANT DBA TO system").await.unwrap();
    }

    #[tokio::test]
    async fn test_dropped_transaction_rolls_back() {
        let backend = MockBackend::new().with_account("system", "manager");
        let conn = backend.factory().connect(&root_config()).await.unwrap();

        {
            let tx = conn.begin().await.unwrap();
            tx.execute("UPDATE accounts SET x = 1").await.unwrap();
        }

        assert!(backend.committed().is_empty());
        assert_eq!(backend.rollbacks(), 1);
    }

    #[tokio::test]
    async fn test_abandoned_paused_ddl_is_not_applied() {
        let backend = MockBackend::new().with_account("system", "manager");
        let conn = backend.factory().connect(&root_config()).await.unwrap();
        let pause = backend.pause_on("create user");

        let tx = conn.begin().await.unwrap();
        let reached = pause.clone();
        tokio::select! {
            _ = tx.execute("CREATE USER app IDENTIFIED BY \"Secret_1\"") => {
                panic!("statement ran past the gate");
            }
            _ = reached.reached() => {}
        }
        tx.rollback().await.unwrap();
        pause.release();
        tokio::task::yield_now().await;

        assert!(!backend.has_account("APP"));
        assert!(backend.committed().is_empty());
        assert!(!backend
            .executed()
            .iter()
            .any(|sql| sql.starts_with("CREATE USER")));
    }

    #[tokio::test]
    async fn test_closed_connection_rejects_statements() {
        let backend = MockBackend::new().with_account("system", "manager");
        let conn = backend.factory().connect(&root_config()).await.unwrap();
        conn.close().await.unwrap();
        conn.close().await.unwrap();

        assert!(conn.query("SELECT 1 FROM DUAL").await.is_err());
        assert!(!conn.is_valid().await);
        assert_eq!(backend.closes(), 1);
    }
}
