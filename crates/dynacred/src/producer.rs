//! Administrative connection ownership
//!
//! [`ConnectionProducer`] holds the decoded configuration and the pool
//! behind the single administrative login. The pool is opened lazily on the
//! first [`ConnectionProducer::connection`] call and reopened only when a
//! later call finds it missing or closed; nothing reconnects in the middle
//! of an operation.
//!
//! The producer has no lock of its own. It lives inside the manager's
//! state and every method needs `&mut self`, so callers must hold the
//! manager's write lock to reach it.

use std::sync::Arc;
use tracing::{debug, info, warn};

use dynacred_rdbc::prelude::{ConnectionFactory, ConnectionPool, PooledConnection, SimpleConnectionPool};

use crate::config::OracleConfig;
use crate::context::RequestContext;
use crate::error::{LifecycleError, Operation, Result};

/// Owner of the administrative connection pool
pub struct ConnectionProducer {
    factory: Arc<dyn ConnectionFactory>,
    config: Option<OracleConfig>,
    pool: Option<Arc<SimpleConnectionPool>>,
}

impl std::fmt::Debug for ConnectionProducer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionProducer")
            .field("database_type", &self.factory.database_type())
            .field("initialized", &self.config.is_some())
            .field("connected", &self.pool.is_some())
            .finish()
    }
}

impl ConnectionProducer {
    /// Create an uninitialized producer
    pub fn new(factory: Arc<dyn ConnectionFactory>) -> Self {
        Self {
            factory,
            config: None,
            pool: None,
        }
    }

    /// Install `config`, replacing any previous one.
    ///
    /// Any open pool is closed first. With `verify`, a connection is opened
    /// and probed; if that fails the producer is left uninitialized.
    pub async fn initialize(
        &mut self,
        ctx: &RequestContext,
        config: OracleConfig,
        verify: bool,
    ) -> Result<()> {
        self.close().await;
        self.config = Some(config);

        if !verify {
            return Ok(());
        }

        let verified = match self.connection(ctx, Operation::Initialize).await {
            Ok(conn) => {
                let alive = ctx
                    .run(conn.is_valid())
                    .await
                    .map_err(|i| LifecycleError::cancelled(Operation::Initialize, i));
                conn.release().await;
                match alive {
                    Ok(true) => Ok(()),
                    Ok(false) => Err(LifecycleError::Connection {
                        category: dynacred_rdbc::error::ErrorCategory::Connection,
                        message: "error verifying connection: ping failed".to_string(),
                    }),
                    Err(e) => Err(e),
                }
            }
            Err(e) => Err(e),
        };

        if let Err(e) = verified {
            self.close().await;
            self.config = None;
            return Err(e);
        }

        if let Some(config) = &self.config {
            info!(host = %config.host, port = config.port, service = %config.service, "verified administrative connection");
        }
        Ok(())
    }

    /// Whether a configuration is installed
    pub fn is_initialized(&self) -> bool {
        self.config.is_some()
    }

    /// The installed configuration
    pub fn config(&self) -> Option<&OracleConfig> {
        self.config.as_ref()
    }

    /// Whether the pool is currently open
    pub fn is_connected(&self) -> bool {
        self.pool.as_ref().is_some_and(|p| !p.is_closed())
    }

    /// Borrow a connection, opening the pool if needed
    pub async fn connection(
        &mut self,
        ctx: &RequestContext,
        operation: Operation,
    ) -> Result<PooledConnection> {
        let config = self.config.as_ref().ok_or(LifecycleError::NotInitialized)?;

        let pool = match &self.pool {
            Some(pool) if !pool.is_closed() => pool.clone(),
            _ => {
                let pool = SimpleConnectionPool::new(config.pool_config(), self.factory.clone())
                    .await
                    .map_err(|e| LifecycleError::connection(&e))?;
                debug!(
                    max_open = config.max_open_connections,
                    max_idle = config.max_idle_connections,
                    max_lifetime = ?config.max_connection_lifetime,
                    "opened administrative pool"
                );
                self.pool = Some(pool.clone());
                pool
            }
        };

        ctx.run(pool.get())
            .await
            .map_err(|i| LifecycleError::cancelled(operation, i))?
            .map_err(|e| LifecycleError::acquire(operation, &e))
    }

    /// Install a new configuration and drop the pool opened with the old one
    pub async fn replace_config(&mut self, config: OracleConfig) {
        self.config = Some(config);
        self.close().await;
    }

    /// Close the pool. Best effort; the handle is cleared either way.
    pub async fn close(&mut self) {
        if let Some(pool) = self.pool.take() {
            if let Err(e) = pool.close().await {
                warn!(error = %e, "error closing administrative pool");
            } else {
                debug!("closed administrative pool");
            }
        }
    }
}
