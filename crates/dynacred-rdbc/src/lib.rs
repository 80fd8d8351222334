//! # dynacred-rdbc
//!
//! Relational database connectivity for the dynacred credential engine.
//!
//! ## Features
//!
//! - **Async traits**: `Connection`, `Transaction` and `ConnectionFactory`
//!   over blocking or async drivers
//! - **Connection Pooling**: bounded pool with max-open, max-idle and
//!   max-lifetime limits
//! - **SQL safety**: identifier validation and literal escaping for
//!   statements that are rendered from templates
//! - **Testing backend**: an in-memory database that mimics Oracle's
//!   implicit DDL commits, accounts and sessions
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use dynacred_rdbc::prelude::*;
//! use dynacred_rdbc::oracle::OracleConnectionFactory;
//!
//! let config = ConnectionConfig::new("oracle://db.internal:1521/XEPDB1")
//!     .with_credentials("system", "manager");
//! let pool = SimpleConnectionPool::new(
//!     PoolConfig::from_connection(config).with_max_size(4),
//!     Arc::new(OracleConnectionFactory),
//! )
//! .await?;
//!
//! let conn = pool.get().await?;
//! let tx = conn.begin().await?;
//! tx.execute("ALTER USER app IDENTIFIED BY \"n3w_Pa55\"").await?;
//! tx.commit().await?;
//! ```
//!
//! ## Feature Flags
//!
//! - `oracle` - Oracle Database support via the `oracle` crate (ODPI-C)
//! - `testing` - `MockBackend` and friends for downstream tests

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod connection;
pub mod error;
pub mod pool;
pub mod security;
pub mod types;

#[cfg(feature = "oracle")]
pub mod oracle;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    // Error types
    pub use crate::error::{Error, ErrorCategory, Result};

    // Value and row types
    pub use crate::types::{Row, Value};

    // Connection traits and config
    pub use crate::connection::{
        Connection, ConnectionConfig, ConnectionFactory, DatabaseType, Endpoint, Transaction,
    };

    // Pool types
    pub use crate::pool::{
        AtomicPoolStats, ConnectionPool, PoolConfig, PoolStats, PooledConnection,
        SimpleConnectionPool,
    };
}

// Re-export commonly used items at crate root
pub use error::{Error, Result};
pub use types::Value;
