//! Tests for dynacred-rdbc pool module

use dynacred_rdbc::prelude::*;
use dynacred_rdbc::testing::MockBackend;
use std::sync::Arc;
use std::time::Duration;

fn backend() -> MockBackend {
    MockBackend::new().with_account("system", "manager")
}

fn pool_config() -> PoolConfig {
    PoolConfig::from_connection(
        ConnectionConfig::new("oracle://mock:1521/XE").with_credentials("system", "manager"),
    )
}

// ==================== PoolConfig Tests ====================

#[test]
fn test_pool_config_default() {
    let config = PoolConfig::default();

    assert_eq!(config.max_size, 4);
    assert_eq!(config.max_idle, 4);
    assert_eq!(config.acquire_timeout, Duration::from_secs(30));
    assert_eq!(config.max_lifetime, None);
    assert_eq!(config.idle_timeout, None);
    assert!(config.test_on_borrow);
    assert!(!config.test_on_return);
}

#[test]
fn test_pool_config_new() {
    let config = PoolConfig::new("oracle://localhost:1521/XE");
    assert_eq!(config.connection.url, "oracle://localhost:1521/XE");
}

// ==================== SimpleConnectionPool Tests ====================

#[tokio::test]
async fn test_pool_opens_lazily() {
    let backend = backend();
    let pool = SimpleConnectionPool::new(pool_config(), backend.factory())
        .await
        .unwrap();

    assert_eq!(pool.size(), 0);
    assert_eq!(backend.connects(), 0);

    let conn = pool.get().await.unwrap();
    assert_eq!(pool.size(), 1);
    assert_eq!(pool.in_use(), 1);
    assert_eq!(backend.connects(), 1);

    conn.release().await;
    assert_eq!(pool.idle(), 1);
    assert_eq!(pool.in_use(), 0);
}

#[tokio::test]
async fn test_pool_reuses_idle_connection() {
    let backend = backend();
    let pool = SimpleConnectionPool::new(pool_config(), backend.factory())
        .await
        .unwrap();

    let conn = pool.get().await.unwrap();
    conn.release().await;
    let conn = pool.get().await.unwrap();
    conn.release().await;

    assert_eq!(backend.connects(), 1);
    assert_eq!(pool.stats().acquisitions, 2);
}

#[tokio::test]
async fn test_pool_rejects_invalid_credentials() {
    let backend = MockBackend::new().with_account("system", "other");
    let pool = SimpleConnectionPool::new(pool_config(), backend.factory())
        .await
        .unwrap();

    let err = pool.get().await.err().unwrap();
    assert_eq!(err.category(), ErrorCategory::Authentication);
    assert_eq!(pool.size(), 0);

    // The permit was returned, so the pool is not wedged.
    let err = pool.get().await.err().unwrap();
    assert_eq!(err.category(), ErrorCategory::Authentication);
}

#[tokio::test]
async fn test_pool_closes_connections_beyond_max_idle() {
    let backend = backend();
    let pool = SimpleConnectionPool::new(
        pool_config().with_max_size(3).with_max_idle(1),
        backend.factory(),
    )
    .await
    .unwrap();

    let a = pool.get().await.unwrap();
    let b = pool.get().await.unwrap();
    let c = pool.get().await.unwrap();
    assert_eq!(pool.size(), 3);

    a.release().await;
    b.release().await;
    c.release().await;

    assert_eq!(pool.idle(), 1);
    assert_eq!(pool.size(), 1);
    assert_eq!(backend.closes(), 2);
}

#[tokio::test]
async fn test_pooled_connection_debug_hides_connection() {
    let backend = backend();
    let pool = SimpleConnectionPool::new(pool_config(), backend.factory())
        .await
        .unwrap();

    let conn = pool.get().await.unwrap();
    let shown = format!("{:?}", conn);
    assert!(shown.starts_with("PooledConnection"), "{}", shown);
    assert!(shown.contains("attached: true"), "{}", shown);
    assert!(!shown.contains("manager"), "{}", shown);
    conn.release().await;

    // A failed checkout can be unwrapped for its error.
    pool.close().await.unwrap();
    let err = pool.get().await.unwrap_err();
    assert_eq!(err.category(), ErrorCategory::PoolExhausted);
}

#[tokio::test]
async fn test_pool_exhaustion_times_out() {
    let backend = backend();
    let pool = SimpleConnectionPool::new(
        pool_config()
            .with_max_size(1)
            .with_max_idle(1)
            .with_acquire_timeout(Duration::from_millis(50)),
        backend.factory(),
    )
    .await
    .unwrap();

    let held = pool.get().await.unwrap();
    let err = pool.get().await.err().unwrap();
    assert_eq!(err.category(), ErrorCategory::PoolExhausted);
    assert_eq!(pool.stats().exhausted_count, 1);

    held.release().await;
    assert!(pool.get().await.is_ok());
}

#[tokio::test]
async fn test_pool_recycles_expired_connections() {
    let backend = backend();
    let pool = SimpleConnectionPool::new(
        pool_config().with_max_lifetime(Some(Duration::from_millis(20))),
        backend.factory(),
    )
    .await
    .unwrap();

    let conn = pool.get().await.unwrap();
    tokio::time::sleep(Duration::from_millis(40)).await;
    conn.release().await;

    assert_eq!(pool.idle(), 0);
    assert_eq!(backend.closes(), 1);

    let conn = pool.get().await.unwrap();
    assert!(conn.is_valid().await);
    assert_eq!(backend.connects(), 2);
}

#[tokio::test]
async fn test_pool_discards_killed_connection_on_borrow() {
    let backend = backend();
    let pool = SimpleConnectionPool::new(pool_config(), backend.factory())
        .await
        .unwrap();

    let conn = pool.get().await.unwrap();
    conn.release().await;

    let session = backend.sessions_of("system").remove(0);
    let admin = backend
        .factory()
        .connect(
            &ConnectionConfig::new("oracle://mock:1521/XE").with_credentials("system", "manager"),
        )
        .await
        .unwrap();
    admin
        .execute(&format!(
            "ALTER SYSTEM KILL SESSION '{},{},@{}' IMMEDIATE",
            session.sid, session.serial, session.inst_id
        ))
        .await
        .unwrap();

    let conn = pool.get().await.unwrap();
    assert!(conn.is_valid().await);
    assert_eq!(pool.stats().health_check_failures, 1);
}

#[tokio::test]
async fn test_pool_close() {
    let backend = backend();
    let pool = SimpleConnectionPool::new(pool_config(), backend.factory())
        .await
        .unwrap();

    let idle = pool.get().await.unwrap();
    let busy = pool.get().await.unwrap();
    idle.release().await;

    pool.close().await.unwrap();
    assert!(pool.is_closed());
    assert_eq!(backend.closes(), 1);

    // In-use connections are closed when they come back.
    busy.release().await;
    assert_eq!(backend.closes(), 2);
    assert_eq!(pool.size(), 0);

    let err = pool.get().await.err().unwrap();
    assert_eq!(err.category(), ErrorCategory::PoolExhausted);

    // Closing twice is harmless.
    pool.close().await.unwrap();
}

#[tokio::test]
async fn test_dropped_connection_returns_to_pool() {
    let backend = backend();
    let pool = SimpleConnectionPool::new(
        pool_config().with_max_size(1).with_max_idle(1),
        backend.factory(),
    )
    .await
    .unwrap();

    {
        let _conn = pool.get().await.unwrap();
    }

    // Drop returns the connection on a background task.
    let conn = tokio::time::timeout(Duration::from_secs(1), pool.get())
        .await
        .unwrap()
        .unwrap();
    assert!(conn.is_valid().await);
    assert_eq!(backend.connects(), 1);
}

#[tokio::test]
async fn test_pool_as_trait_object() {
    let backend = backend();
    let pool: Arc<dyn ConnectionPool> = SimpleConnectionPool::new(pool_config(), backend.factory())
        .await
        .unwrap();

    let conn = pool.get().await.unwrap();
    let rows = conn.query("SELECT 1 FROM DUAL").await.unwrap();
    assert_eq!(rows.len(), 1);
}
