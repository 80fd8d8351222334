//! Serialization and cancellation of concurrent lifecycle operations

mod common;

use common::*;
use dynacred::prelude::*;
use std::sync::Arc;
use std::time::Duration;

const SLOW_STATEMENT: &str = "GRANT RESOURCE TO {{username}}";

fn slow_request() -> NewUserRequest {
    let mut req = new_user_request("Xv9_slow_pass");
    req.statements.push(SLOW_STATEMENT.to_string());
    req
}

fn created_users(backend: &dynacred_rdbc::testing::MockBackend) -> usize {
    backend
        .committed()
        .iter()
        .filter(|s| s.starts_with("CREATE USER"))
        .count()
}

#[tokio::test]
async fn test_operations_do_not_interleave() {
    init_tracing();
    let backend = backend();
    let manager = Arc::new(manager(&backend).await);
    let pause = backend.pause_on("grant resource");

    let first = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.new_user(&RequestContext::new(), slow_request()).await })
    };
    pause.reached().await;

    let second = {
        let manager = manager.clone();
        tokio::spawn(async move {
            manager
                .new_user(&RequestContext::new(), new_user_request("Xv9_fast_pass"))
                .await
        })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(created_users(&backend), 1);
    assert!(!second.is_finished());

    pause.release();
    let first = first.await.unwrap().unwrap();
    let second = second.await.unwrap().unwrap();

    assert_ne!(first.username, second.username);
    assert_eq!(created_users(&backend), 2);
    // One administrative connection served both requests.
    assert_eq!(backend.connects(), 1);
}

#[tokio::test]
async fn test_cancel_mid_statement_rolls_back() {
    init_tracing();
    let backend = backend();
    let manager = manager(&backend).await;
    let pause = backend.pause_on("grant resource");
    let ctx = RequestContext::new();

    let canceller = {
        let ctx = ctx.clone();
        let pause = pause.clone();
        tokio::spawn(async move {
            pause.reached().await;
            ctx.cancel();
        })
    };

    let err = manager.new_user(&ctx, slow_request()).await.unwrap_err();
    canceller.await.unwrap();
    pause.release();

    assert!(err.is_cancelled());
    assert!(matches!(
        err,
        LifecycleError::Cancelled {
            operation: Operation::NewUser,
            ..
        }
    ));
    assert_eq!(backend.rollbacks(), 1);

    // The shared connection is still usable afterwards.
    manager
        .new_user(&RequestContext::new(), new_user_request("Xv9_after_pass"))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_cancel_during_create_user_leaves_no_account() {
    init_tracing();
    let backend = backend();
    let manager = manager(&backend).await;
    let pause = backend.pause_on("create user");
    let ctx = RequestContext::new();

    let canceller = {
        let ctx = ctx.clone();
        let pause = pause.clone();
        tokio::spawn(async move {
            pause.reached().await;
            ctx.cancel();
        })
    };

    let err = manager
        .new_user(&ctx, new_user_request("Xv9_cancelled_pass"))
        .await
        .unwrap_err();
    canceller.await.unwrap();
    pause.release();
    tokio::task::yield_now().await;

    assert!(err.is_cancelled());
    assert!(!backend
        .executed()
        .iter()
        .any(|s| s.starts_with("CREATE USER")));
    assert_eq!(created_users(&backend), 0);
}

#[tokio::test]
async fn test_deadline_while_waiting_for_lock() {
    init_tracing();
    let backend = backend();
    let manager = Arc::new(manager(&backend).await);
    let pause = backend.pause_on("grant resource");

    let holder = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.new_user(&RequestContext::new(), slow_request()).await })
    };
    pause.reached().await;

    let ctx = RequestContext::new().with_timeout(Duration::from_millis(30));
    let err = manager
        .delete_user(
            &ctx,
            DeleteUserRequest {
                username: "V_OTHER".into(),
                statements: vec![],
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        LifecycleError::Cancelled {
            operation: Operation::DeleteUser,
            ..
        }
    ));
    assert!(!backend
        .executed()
        .iter()
        .any(|s| s.contains("V_OTHER")));

    pause.release();
    holder.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_cancelled_before_start_does_nothing() {
    init_tracing();
    let backend = backend();
    let manager = manager(&backend).await;
    let ctx = RequestContext::new();
    ctx.cancel();

    let err = manager
        .new_user(&ctx, new_user_request("Xv9_never_pass"))
        .await
        .unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(created_users(&backend), 0);
}
