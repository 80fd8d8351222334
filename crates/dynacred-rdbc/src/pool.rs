//! Connection pool for dynacred-rdbc
//!
//! Bounded connection pooling with:
//! - A hard cap on open connections and a separate cap on idle ones
//! - Connection recycling by age and idle time
//! - Health checking on borrow/return
//! - Statistics
//!
//! # Example
//!
//! ```rust,ignore
//! use dynacred_rdbc::prelude::*;
//!
//! let pool = SimpleConnectionPool::new(
//!     PoolConfig::new("oracle://db:1521/XEPDB1").with_max_size(4),
//!     Arc::new(OracleConnectionFactory),
//! ).await?;
//!
//! let conn = pool.get().await?;
//! conn.execute("ALTER USER V_APP ACCOUNT UNLOCK").await?;
//! conn.release().await;
//! ```

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, OnceCell, Semaphore};
use tracing::{debug, warn};

use crate::connection::{Connection, ConnectionConfig, ConnectionFactory, Transaction};
use crate::error::{Error, Result};
use crate::types::Row;

/// Connection pool trait
#[async_trait]
pub trait ConnectionPool: Send + Sync {
    /// Get a connection from the pool
    async fn get(&self) -> Result<PooledConnection>;

    /// Return a connection to the pool
    async fn return_connection(&self, conn: Box<dyn Connection>, created_at: Instant);

    /// Get current pool size (idle + in use)
    fn size(&self) -> usize;

    /// Get number of idle connections
    fn idle(&self) -> usize;

    /// Get number of connections in use
    fn in_use(&self) -> usize {
        self.size().saturating_sub(self.idle())
    }

    /// Get pool statistics
    fn stats(&self) -> PoolStats;

    /// Whether the pool has been shut down
    fn is_closed(&self) -> bool;

    /// Close all connections and shutdown the pool
    async fn close(&self) -> Result<()>;
}

/// A connection borrowed from the pool
///
/// Dropping the wrapper hands the connection back on a background task;
/// [`PooledConnection::release`] does the same inline.
pub struct PooledConnection {
    /// The underlying connection
    conn: Option<Box<dyn Connection>>,
    /// When the physical connection was opened
    created_at: Instant,
    /// Reference to the pool for return
    pool: Arc<dyn ConnectionPool>,
}

impl PooledConnection {
    /// Create a new pooled connection wrapper
    pub fn new(
        conn: Box<dyn Connection>,
        created_at: Instant,
        pool: Arc<dyn ConnectionPool>,
    ) -> Self {
        Self {
            conn: Some(conn),
            created_at,
            pool,
        }
    }

    /// Get the underlying connection
    pub fn connection(&self) -> &(dyn Connection + 'static) {
        match self.conn.as_deref() {
            Some(conn) => conn,
            None => &DETACHED,
        }
    }

    /// Return the connection to the pool and wait until it is accounted for
    pub async fn release(mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.return_connection(conn, self.created_at).await;
        }
    }
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // The connection may carry credentials; only its state is shown.
        f.debug_struct("PooledConnection")
            .field("attached", &self.conn.is_some())
            .field("age", &self.created_at.elapsed())
            .finish_non_exhaustive()
    }
}

impl std::ops::Deref for PooledConnection {
    type Target = dyn Connection;

    fn deref(&self) -> &Self::Target {
        self.connection()
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            let pool = self.pool.clone();
            let created_at = self.created_at;
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(async move {
                        pool.return_connection(conn, created_at).await;
                    });
                }
                Err(_) => warn!("pooled connection dropped outside a runtime, discarding"),
            }
        }
    }
}

/// Stand-in returned after the real connection has left the wrapper
struct Detached;

static DETACHED: Detached = Detached;

#[async_trait]
impl Connection for Detached {
    async fn query(&self, _sql: &str) -> Result<Vec<Row>> {
        Err(Error::connection("connection already returned to pool"))
    }

    async fn execute(&self, _sql: &str) -> Result<u64> {
        Err(Error::connection("connection already returned to pool"))
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        Err(Error::connection("connection already returned to pool"))
    }

    async fn is_valid(&self) -> bool {
        false
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Pool configuration
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Connection configuration
    pub connection: ConnectionConfig,
    /// Maximum number of open connections
    pub max_size: usize,
    /// Maximum number of idle connections kept for reuse
    pub max_idle: usize,
    /// Maximum time to wait for a connection
    pub acquire_timeout: Duration,
    /// Maximum connection lifetime, `None` for unlimited
    pub max_lifetime: Option<Duration>,
    /// Idle timeout, `None` for unlimited
    pub idle_timeout: Option<Duration>,
    /// Whether to test connections on borrow
    pub test_on_borrow: bool,
    /// Whether to test connections on return
    pub test_on_return: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            max_size: 4,
            max_idle: 4,
            acquire_timeout: Duration::from_secs(30),
            max_lifetime: None,
            idle_timeout: None,
            test_on_borrow: true,
            test_on_return: false,
        }
    }
}

impl PoolConfig {
    /// Create pool config from a connection URL
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            connection: ConnectionConfig::new(url),
            ..Default::default()
        }
    }

    /// Create pool config from a full connection configuration
    pub fn from_connection(connection: ConnectionConfig) -> Self {
        Self {
            connection,
            ..Default::default()
        }
    }

    /// Set maximum pool size
    pub fn with_max_size(mut self, size: usize) -> Self {
        self.max_size = size;
        self
    }

    /// Set maximum number of idle connections
    pub fn with_max_idle(mut self, idle: usize) -> Self {
        self.max_idle = idle;
        self
    }

    /// Set acquire timeout
    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Set maximum connection lifetime
    pub fn with_max_lifetime(mut self, lifetime: Option<Duration>) -> Self {
        self.max_lifetime = lifetime;
        self
    }

    /// Set idle timeout
    pub fn with_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Enable/disable test on borrow
    pub fn with_test_on_borrow(mut self, test: bool) -> Self {
        self.test_on_borrow = test;
        self
    }

    /// Enable/disable test on return
    pub fn with_test_on_return(mut self, test: bool) -> Self {
        self.test_on_return = test;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.max_size == 0 {
            return Err(Error::config("max_size must be at least 1"));
        }
        if self.max_idle > self.max_size {
            return Err(Error::config(format!(
                "max_idle ({}) must not exceed max_size ({})",
                self.max_idle, self.max_size
            )));
        }
        Ok(())
    }
}

/// Pool statistics
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    /// Total number of connections created
    pub connections_created: u64,
    /// Total number of connections closed
    pub connections_closed: u64,
    /// Total number of connection acquisitions
    pub acquisitions: u64,
    /// Number of times pool was exhausted
    pub exhausted_count: u64,
    /// Total wait time for connections (in milliseconds)
    pub total_wait_time_ms: u64,
    /// Number of health check failures
    pub health_check_failures: u64,
}

/// Atomic pool stats for concurrent updates
#[derive(Debug, Default)]
#[allow(missing_docs)]
pub struct AtomicPoolStats {
    pub connections_created: AtomicU64,
    pub connections_closed: AtomicU64,
    pub acquisitions: AtomicU64,
    pub exhausted_count: AtomicU64,
    pub total_wait_time_ms: AtomicU64,
    pub health_check_failures: AtomicU64,
}

impl AtomicPoolStats {
    /// Create new atomic stats
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a connection creation
    pub fn record_created(&self) {
        self.connections_created.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a connection close
    pub fn record_closed(&self) {
        self.connections_closed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an acquisition
    pub fn record_acquisition(&self, wait_time_ms: u64) {
        self.acquisitions.fetch_add(1, Ordering::Relaxed);
        self.total_wait_time_ms
            .fetch_add(wait_time_ms, Ordering::Relaxed);
    }

    /// Record pool exhaustion
    pub fn record_exhausted(&self) {
        self.exhausted_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Record health check failure
    pub fn record_health_check_failure(&self) {
        self.health_check_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot current stats
    pub fn snapshot(&self) -> PoolStats {
        PoolStats {
            connections_created: self.connections_created.load(Ordering::Relaxed),
            connections_closed: self.connections_closed.load(Ordering::Relaxed),
            acquisitions: self.acquisitions.load(Ordering::Relaxed),
            exhausted_count: self.exhausted_count.load(Ordering::Relaxed),
            total_wait_time_ms: self.total_wait_time_ms.load(Ordering::Relaxed),
            health_check_failures: self.health_check_failures.load(Ordering::Relaxed),
        }
    }

    /// Calculate average wait time in milliseconds
    pub fn avg_wait_time_ms(&self) -> f64 {
        let acquisitions = self.acquisitions.load(Ordering::Relaxed);
        if acquisitions == 0 {
            0.0
        } else {
            self.total_wait_time_ms.load(Ordering::Relaxed) as f64 / acquisitions as f64
        }
    }
}

/// Semaphore-bounded connection pool.
///
/// Connections are opened lazily, at most `max_size` at a time. Returned
/// connections are kept idle up to `max_idle`; beyond that they are closed.
/// Connections older than `max_lifetime` are closed instead of reused.
pub struct SimpleConnectionPool {
    /// Pool configuration
    config: PoolConfig,
    /// Connection factory
    factory: Arc<dyn ConnectionFactory>,
    /// Idle connections (LIFO)
    idle: Mutex<Vec<PoolEntry>>,
    /// Semaphore to limit total connections
    semaphore: Semaphore,
    /// Current total connection count
    total_connections: AtomicUsize,
    /// Current idle connection count
    idle_connections: AtomicUsize,
    /// Statistics
    stats: Arc<AtomicPoolStats>,
    /// Shutdown flag
    shutdown: AtomicBool,
    /// Self reference for creating PooledConnections
    self_ref: OnceCell<Weak<Self>>,
}

/// Internal pool entry with metadata
struct PoolEntry {
    /// The connection
    conn: Box<dyn Connection>,
    /// When the connection was created
    created_at: Instant,
    /// When last used
    last_used: Instant,
}

impl SimpleConnectionPool {
    /// Create a new connection pool.
    ///
    /// No connection is opened until the first [`ConnectionPool::get`].
    pub async fn new(config: PoolConfig, factory: Arc<dyn ConnectionFactory>) -> Result<Arc<Self>> {
        config.validate()?;

        let pool = Arc::new(Self {
            semaphore: Semaphore::new(config.max_size),
            idle: Mutex::new(Vec::with_capacity(config.max_idle)),
            config,
            factory,
            total_connections: AtomicUsize::new(0),
            idle_connections: AtomicUsize::new(0),
            stats: Arc::new(AtomicPoolStats::new()),
            shutdown: AtomicBool::new(false),
            self_ref: OnceCell::new(),
        });

        let _ = pool.self_ref.set(Arc::downgrade(&pool));

        Ok(pool)
    }

    fn get_self_arc(&self) -> Option<Arc<Self>> {
        self.self_ref.get().and_then(|w| w.upgrade())
    }

    /// Create a new connection using the factory
    async fn create_connection(&self) -> Result<Box<dyn Connection>> {
        let conn = self.factory.connect(&self.config.connection).await?;
        self.total_connections.fetch_add(1, Ordering::AcqRel);
        self.stats.record_created();
        debug!(
            total = self.total_connections.load(Ordering::Acquire),
            "opened pooled connection"
        );
        Ok(conn)
    }

    async fn discard(&self, conn: Box<dyn Connection>) {
        if let Err(e) = conn.close().await {
            debug!(error = %e, "error closing pooled connection");
        }
        self.total_connections.fetch_sub(1, Ordering::AcqRel);
        self.stats.record_closed();
    }

    fn is_expired(&self, created_at: Instant) -> bool {
        self.config
            .max_lifetime
            .is_some_and(|lifetime| created_at.elapsed() > lifetime)
    }

    /// Check if a connection should be recycled
    fn should_recycle(&self, entry: &PoolEntry) -> bool {
        self.is_expired(entry.created_at)
            || self
                .config
                .idle_timeout
                .is_some_and(|timeout| entry.last_used.elapsed() > timeout)
    }

    /// Get pool configuration
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }
}

#[async_trait]
impl ConnectionPool for SimpleConnectionPool {
    async fn get(&self) -> Result<PooledConnection> {
        if self.shutdown.load(Ordering::Acquire) {
            return Err(Error::PoolExhausted {
                message: "pool is shut down".to_string(),
            });
        }

        let start = Instant::now();

        let permit = tokio::time::timeout(self.config.acquire_timeout, self.semaphore.acquire())
            .await
            .map_err(|_| {
                self.stats.record_exhausted();
                Error::PoolExhausted {
                    message: format!(
                        "timeout waiting for connection ({}ms)",
                        self.config.acquire_timeout.as_millis()
                    ),
                }
            })?
            .map_err(|_| Error::PoolExhausted {
                message: "pool semaphore closed".to_string(),
            })?;

        let reused = loop {
            let entry = {
                let mut idle = self.idle.lock().await;
                idle.pop()
            };
            let Some(entry) = entry else {
                break None;
            };
            self.idle_connections.fetch_sub(1, Ordering::AcqRel);

            if self.should_recycle(&entry) {
                self.discard(entry.conn).await;
                continue;
            }
            if self.config.test_on_borrow && !entry.conn.is_valid().await {
                self.stats.record_health_check_failure();
                self.discard(entry.conn).await;
                continue;
            }
            break Some((entry.conn, entry.created_at));
        };

        // The permit is released on error by dropping it here.
        let (conn, created_at) = match reused {
            Some(found) => found,
            None => (self.create_connection().await?, Instant::now()),
        };

        self.stats
            .record_acquisition(start.elapsed().as_millis() as u64);

        let pool_arc = match self.get_self_arc() {
            Some(pool) => pool,
            None => {
                self.discard(conn).await;
                return Err(Error::PoolExhausted {
                    message: "pool has been dropped".to_string(),
                });
            }
        };

        // Released again in return_connection.
        permit.forget();

        Ok(PooledConnection::new(conn, created_at, pool_arc))
    }

    async fn return_connection(&self, conn: Box<dyn Connection>, created_at: Instant) {
        if self.shutdown.load(Ordering::Acquire) {
            self.discard(conn).await;
            self.semaphore.add_permits(1);
            return;
        }

        if self.is_expired(created_at) {
            debug!("closing connection past max lifetime");
            self.discard(conn).await;
            self.semaphore.add_permits(1);
            return;
        }

        if self.config.test_on_return && !conn.is_valid().await {
            self.stats.record_health_check_failure();
            self.discard(conn).await;
            self.semaphore.add_permits(1);
            return;
        }

        let overflow = {
            let mut idle = self.idle.lock().await;
            if idle.len() < self.config.max_idle {
                idle.push(PoolEntry {
                    conn,
                    created_at,
                    last_used: Instant::now(),
                });
                self.idle_connections.fetch_add(1, Ordering::AcqRel);
                None
            } else {
                Some(conn)
            }
        };

        if let Some(conn) = overflow {
            self.discard(conn).await;
        }
        self.semaphore.add_permits(1);
    }

    fn size(&self) -> usize {
        self.total_connections.load(Ordering::Acquire)
    }

    fn idle(&self) -> usize {
        self.idle_connections.load(Ordering::Acquire)
    }

    fn stats(&self) -> PoolStats {
        self.stats.snapshot()
    }

    fn is_closed(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    async fn close(&self) -> Result<()> {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let drained: Vec<PoolEntry> = {
            let mut idle = self.idle.lock().await;
            idle.drain(..).collect()
        };
        self.idle_connections.store(0, Ordering::Release);

        for entry in drained {
            self.discard(entry.conn).await;
        }

        debug!(
            in_use = self.total_connections.load(Ordering::Acquire),
            "pool closed"
        );
        Ok(())
    }
}
