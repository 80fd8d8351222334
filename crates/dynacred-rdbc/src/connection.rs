//! Connection traits for dynacred-rdbc
//!
//! Core abstractions for database connectivity:
//! - Connection: statement execution with implicit commit
//! - Transaction: statements grouped under one commit/rollback
//! - ConnectionFactory: opens physical connections from a [`ConnectionConfig`]
//! - InterruptOnDrop: breaks off a blocking driver call whose caller went away

use async_trait::async_trait;
use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::types::Row;

/// A connection to a database
///
/// Statements executed directly on a connection are committed as they run.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Execute a query that returns rows
    async fn query(&self, sql: &str) -> Result<Vec<Row>>;

    /// Execute a statement and commit it, returns affected row count
    async fn execute(&self, sql: &str) -> Result<u64>;

    /// Execute a query and return the first row (convenience method)
    async fn query_one(&self, sql: &str) -> Result<Option<Row>> {
        let rows = self.query(sql).await?;
        Ok(rows.into_iter().next())
    }

    /// Begin a transaction
    ///
    /// The connection must not be used directly until the returned
    /// transaction has been committed or rolled back.
    async fn begin(&self) -> Result<Box<dyn Transaction>>;

    /// Check if connection is valid/alive
    async fn is_valid(&self) -> bool;

    /// Close the connection
    async fn close(&self) -> Result<()>;
}

/// A database transaction
///
/// Backends whose DDL commits implicitly (Oracle) cannot roll back DDL
/// statements executed through a transaction; only DML is undone.
#[async_trait]
pub trait Transaction: Send + Sync {
    /// Execute a query that returns rows
    async fn query(&self, sql: &str) -> Result<Vec<Row>>;

    /// Execute a statement within the transaction
    async fn execute(&self, sql: &str) -> Result<u64>;

    /// Commit the transaction
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Rollback the transaction
    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// Configuration for creating connections
#[derive(Clone)]
pub struct ConnectionConfig {
    /// Endpoint URL without credentials (e.g., oracle://db.internal:1521/XEPDB1)
    pub url: String,
    /// Login user
    pub username: Option<String>,
    /// Login password
    pub password: Option<String>,
    /// Connection timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// Application name (shown in v$session.program, etc)
    pub application_name: Option<String>,
    /// Additional connection properties
    pub properties: HashMap<String, String>,
}

impl std::fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never let the login password reach logs.
        let redacted_url = match url::Url::parse(&self.url) {
            Ok(mut parsed) => {
                if parsed.password().is_some() {
                    let _ = parsed.set_password(Some("***"));
                }
                parsed.to_string()
            }
            Err(_) => "***".to_string(),
        };

        f.debug_struct("ConnectionConfig")
            .field("url", &redacted_url)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("connect_timeout_ms", &self.connect_timeout_ms)
            .field("application_name", &self.application_name)
            .field("properties", &self.properties)
            .finish()
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            username: None,
            password: None,
            connect_timeout_ms: 10_000,
            application_name: Some("dynacred".into()),
            properties: HashMap::new(),
        }
    }
}

impl ConnectionConfig {
    /// Create configuration with just a URL
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Set login credentials
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Set connection timeout
    pub fn with_connect_timeout(mut self, ms: u64) -> Self {
        self.connect_timeout_ms = ms;
        self
    }

    /// Set application name
    pub fn with_application_name(mut self, name: impl Into<String>) -> Self {
        self.application_name = Some(name.into());
        self
    }

    /// Add a connection property
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Split the URL into host, port and service/database name.
    pub fn endpoint(&self) -> Result<Endpoint> {
        let parsed = url::Url::parse(&self.url)
            .map_err(|e| Error::config(format!("invalid connection URL: {}", e)))?;

        let host = parsed
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| Error::config("connection URL has no host"))?
            .to_string();
        let port = parsed
            .port()
            .ok_or_else(|| Error::config("connection URL has no port"))?;
        let service = parsed.path().trim_start_matches('/').to_string();
        if service.is_empty() {
            return Err(Error::config("connection URL has no service name"));
        }

        Ok(Endpoint {
            host,
            port,
            service,
        })
    }
}

/// Network location of a database service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Host name or address
    pub host: String,
    /// Listener port
    pub port: u16,
    /// Service or database name
    pub service: String,
}

impl Endpoint {
    /// Easy Connect descriptor (`//host:port/service`)
    pub fn easy_connect(&self) -> String {
        format!("//{}:{}/{}", self.host, self.port, self.service)
    }
}

/// Factory for creating connections
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    /// Create a new connection
    async fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn Connection>>;

    /// Get the database type
    fn database_type(&self) -> DatabaseType;
}

/// Database type identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatabaseType {
    /// Oracle Database
    Oracle,
    /// Scripted in-memory backend
    Mock,
}

impl std::fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Oracle => write!(f, "Oracle"),
            Self::Mock => write!(f, "Mock"),
        }
    }
}

/// Runs a callback when dropped while still armed
///
/// Blocking drivers hold one across each in-flight call. If the awaiting
/// future is dropped (cancellation or a deadline) before the call returns,
/// the callback interrupts the statement on the server.
pub struct InterruptOnDrop<F: FnOnce()> {
    on_drop: Option<F>,
}

impl<F: FnOnce()> InterruptOnDrop<F> {
    /// Arm a guard
    pub fn new(on_drop: F) -> Self {
        Self {
            on_drop: Some(on_drop),
        }
    }

    /// The call finished; nothing to interrupt
    pub fn disarm(mut self) {
        self.on_drop = None;
    }
}

impl<F: FnOnce()> Drop for InterruptOnDrop<F> {
    fn drop(&mut self) {
        if let Some(on_drop) = self.on_drop.take() {
            on_drop();
        }
    }
}
