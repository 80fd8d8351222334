//! Oracle backend implementation for dynacred-rdbc
//!
//! Wraps the blocking `oracle` driver (ODPI-C) behind the async traits by
//! running every call on tokio's blocking pool.
//!
//! Oracle has no explicit BEGIN: statements join the session's current
//! transaction until COMMIT/ROLLBACK, and DDL commits implicitly. Direct
//! [`Connection::execute`] calls therefore commit right away.
//!
//! Dropping a statement future before it resolves breaks the call off with
//! `break_execution`, so a cancelled statement fails with ORA-01013 instead
//! of running to completion behind the caller's back.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::connection::{
    Connection, ConnectionConfig, ConnectionFactory, DatabaseType, InterruptOnDrop, Transaction,
};
use crate::error::{Error, Result};
use crate::types::{Row, Value};

use oracle::sql_type::OracleType;

/// Run a blocking driver call on the blocking pool
async fn blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::internal(format!("blocking task failed: {}", e)))?
}

/// Run a statement call that is broken off if the caller stops waiting
async fn interruptible<T, F>(conn: &Arc<oracle::Connection>, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&oracle::Connection) -> Result<T> + Send + 'static,
{
    let breaker = conn.clone();
    let guard = InterruptOnDrop::new(move || {
        debug!("statement abandoned, breaking execution");
        // OCIBreak only signals the server; it does not wait for the call.
        if let Err(e) = breaker.break_execution() {
            warn!(error = %e, "failed to break in-flight statement");
        }
    });
    let conn = conn.clone();
    let result = blocking(move || f(&*conn)).await;
    guard.disarm();
    result
}

fn query_error(e: oracle::Error) -> Error {
    Error::query_with_source(e.to_string(), e)
}

/// Convert one column of an Oracle row
fn sql_value_to_value(row: &oracle::Row, idx: usize, oracle_type: &OracleType) -> Result<Value> {
    let value = match oracle_type {
        OracleType::Int64 | OracleType::Number(_, _) => {
            match row.get::<usize, Option<i64>>(idx) {
                Ok(v) => v.map_or(Value::Null, Value::Int64),
                Err(_) => row
                    .get::<usize, Option<f64>>(idx)
                    .map_err(|e| Error::type_conversion(e.to_string()))?
                    .map_or(Value::Null, Value::Float64),
            }
        }
        OracleType::BinaryDouble | OracleType::BinaryFloat | OracleType::Float(_) => row
            .get::<usize, Option<f64>>(idx)
            .map_err(|e| Error::type_conversion(e.to_string()))?
            .map_or(Value::Null, Value::Float64),
        OracleType::Boolean => row
            .get::<usize, Option<bool>>(idx)
            .map_err(|e| Error::type_conversion(e.to_string()))?
            .map_or(Value::Null, Value::Bool),
        _ => row
            .get::<usize, Option<String>>(idx)
            .map_err(|e| Error::type_conversion(e.to_string()))?
            .map_or(Value::Null, Value::String),
    };
    Ok(value)
}

fn run_query(conn: &oracle::Connection, sql: &str) -> Result<Vec<Row>> {
    let result_set = conn.query(sql, &[]).map_err(query_error)?;
    let columns: Vec<(String, OracleType)> = result_set
        .column_info()
        .iter()
        .map(|c| (c.name().to_string(), c.oracle_type().clone()))
        .collect();
    let names: Vec<String> = columns.iter().map(|(name, _)| name.clone()).collect();

    let mut rows = Vec::new();
    for row in result_set {
        let row = row.map_err(query_error)?;
        let mut values = Vec::with_capacity(columns.len());
        for (idx, (_, oracle_type)) in columns.iter().enumerate() {
            values.push(sql_value_to_value(&row, idx, oracle_type)?);
        }
        rows.push(Row::new(names.clone(), values));
    }
    Ok(rows)
}

fn run_execute(conn: &oracle::Connection, sql: &str) -> Result<u64> {
    let stmt = conn.execute(sql, &[]).map_err(query_error)?;
    stmt.row_count().map_err(query_error)
}

/// Oracle connection implementation
pub struct OracleConnection {
    conn: Arc<oracle::Connection>,
    closed: Arc<AtomicBool>,
}

impl OracleConnection {
    /// Connect using the credentials and endpoint in `config`
    pub async fn connect(config: &ConnectionConfig) -> Result<Self> {
        let endpoint = config.endpoint()?;
        let username = config
            .username
            .clone()
            .ok_or_else(|| Error::config("username is required"))?;
        let password = config
            .password
            .clone()
            .ok_or_else(|| Error::config("password is required"))?;
        let connect_string = endpoint.easy_connect();

        let open = blocking(move || {
            oracle::Connection::connect(&username, &password, &connect_string).map_err(|e| {
                match e.db_error().map(|db| db.code()) {
                    Some(1017) | Some(28000) | Some(1045) => Error::authentication(e.to_string()),
                    _ => Error::connection_with_source(e.to_string(), e),
                }
            })
        });

        let conn = tokio::time::timeout(Duration::from_millis(config.connect_timeout_ms), open)
            .await
            .map_err(|_| {
                Error::timeout(format!(
                    "connect to {} timed out after {}ms",
                    endpoint.easy_connect(),
                    config.connect_timeout_ms
                ))
            })??;

        debug!(endpoint = %endpoint.easy_connect(), "opened Oracle connection");

        Ok(Self {
            conn: Arc::new(conn),
            closed: Arc::new(AtomicBool::new(false)),
        })
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::connection("connection is closed"));
        }
        Ok(())
    }
}

#[async_trait]
impl Connection for OracleConnection {
    async fn query(&self, sql: &str) -> Result<Vec<Row>> {
        self.check_open()?;
        let sql = sql.to_string();
        interruptible(&self.conn, move |conn| run_query(conn, &sql)).await
    }

    async fn execute(&self, sql: &str) -> Result<u64> {
        self.check_open()?;
        let sql = sql.to_string();
        interruptible(&self.conn, move |conn| {
            let affected = run_execute(conn, &sql)?;
            conn.commit()
                .map_err(|e| Error::Transaction {
                    message: e.to_string(),
                    source: Some(Box::new(e)),
                })?;
            Ok(affected)
        })
        .await
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        self.check_open()?;
        Ok(Box::new(OracleTransaction {
            conn: self.conn.clone(),
            finished: AtomicBool::new(false),
        }))
    }

    async fn is_valid(&self) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return false;
        }
        let conn = self.conn.clone();
        blocking(move || conn.ping().map_err(query_error))
            .await
            .is_ok()
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let conn = self.conn.clone();
        blocking(move || {
            conn.close()
                .map_err(|e| Error::connection_with_source("error closing connection", e))
        })
        .await
    }
}

/// Oracle transaction implementation
///
/// An unfinished transaction is rolled back when dropped.
pub struct OracleTransaction {
    conn: Arc<oracle::Connection>,
    finished: AtomicBool,
}

#[async_trait]
impl Transaction for OracleTransaction {
    async fn query(&self, sql: &str) -> Result<Vec<Row>> {
        let sql = sql.to_string();
        interruptible(&self.conn, move |conn| run_query(conn, &sql)).await
    }

    async fn execute(&self, sql: &str) -> Result<u64> {
        let sql = sql.to_string();
        interruptible(&self.conn, move |conn| run_execute(conn, &sql)).await
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let conn = self.conn.clone();
        blocking(move || {
            conn.commit().map_err(|e| Error::Transaction {
                message: e.to_string(),
                source: Some(Box::new(e)),
            })
        })
        .await?;
        self.finished.store(true, Ordering::Release);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        let conn = self.conn.clone();
        let result = blocking(move || {
            conn.rollback().map_err(|e| Error::Transaction {
                message: e.to_string(),
                source: Some(Box::new(e)),
            })
        })
        .await;
        self.finished.store(true, Ordering::Release);
        result
    }
}

impl Drop for OracleTransaction {
    fn drop(&mut self) {
        if self.finished.load(Ordering::Acquire) {
            return;
        }
        let conn = self.conn.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(move || {
                    if let Err(e) = conn.rollback() {
                        warn!(error = %e, "rollback of abandoned transaction failed");
                    }
                });
            }
            Err(_) => {
                if let Err(e) = conn.rollback() {
                    warn!(error = %e, "rollback of abandoned transaction failed");
                }
            }
        }
    }
}

/// Factory for Oracle connections
#[derive(Debug, Clone, Copy, Default)]
pub struct OracleConnectionFactory;

#[async_trait]
impl ConnectionFactory for OracleConnectionFactory {
    async fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn Connection>> {
        let conn = OracleConnection::connect(config).await?;
        Ok(Box::new(conn))
    }

    fn database_type(&self) -> DatabaseType {
        DatabaseType::Oracle
    }
}
