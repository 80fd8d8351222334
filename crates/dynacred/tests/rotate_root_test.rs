//! Root credential rotation

mod common;

use common::*;
use dynacred::prelude::*;
use serde_json::{json, Value as JsonValue};

fn password_of(config: &serde_json::Map<String, JsonValue>) -> String {
    config
        .get("password")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string()
}

#[tokio::test]
async fn test_rotate_root_updates_config_and_reconnects() {
    init_tracing();
    let backend = backend();
    let manager = manager(&backend).await;
    assert_eq!(backend.connects(), 1);

    let resp = manager
        .rotate_root_credentials(&RequestContext::new(), RotateRootRequest::default())
        .await
        .unwrap();

    let new_password = password_of(&resp.config);
    assert_eq!(new_password.len(), 30);
    assert_ne!(new_password, ROOT_PASSWORD);
    assert_eq!(resp.config.get("username"), Some(&json!(ROOT_USER)));
    assert_eq!(
        resp.config.get("connection_url"),
        Some(&json!("{{username}}/{{password}}@//mock:1521/XE"))
    );
    assert!(backend.can_login(ROOT_USER, &new_password));
    assert!(!backend.can_login(ROOT_USER, ROOT_PASSWORD));

    // The old pool is gone; the next operation logs in with the new password.
    manager
        .new_user(&RequestContext::new(), new_user_request("Xv9_create_pass"))
        .await
        .unwrap();
    assert_eq!(backend.connects(), 2);
}

#[tokio::test]
async fn test_rotate_root_failure_keeps_old_credential() {
    init_tracing();
    let backend = backend();
    let manager = manager(&backend).await;
    backend.fail_on("alter user system", "ORA-28007: the password cannot be reused");

    let err = manager
        .rotate_root_credentials(&RequestContext::new(), RotateRootRequest::default())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        LifecycleError::Execution {
            operation: Operation::RotateRoot,
            index: Some(0),
            ..
        }
    ));
    assert!(backend.can_login(ROOT_USER, ROOT_PASSWORD));

    backend.clear_failures();
    manager
        .new_user(&RequestContext::new(), new_user_request("Xv9_create_pass"))
        .await
        .unwrap();
    assert_eq!(backend.connects(), 1);
}

#[tokio::test]
async fn test_rotate_root_custom_statements() {
    init_tracing();
    let backend = backend();
    let manager = manager(&backend).await;

    let resp = manager
        .rotate_root_credentials(
            &RequestContext::new(),
            RotateRootRequest {
                statements: vec![
                    r#"ALTER USER {{username}} IDENTIFIED BY "{{password}}"; ALTER USER {{username}} ACCOUNT UNLOCK"#
                        .into(),
                ],
            },
        )
        .await
        .unwrap();

    let new_password = password_of(&resp.config);
    assert!(backend.can_login(ROOT_USER, &new_password));
    assert!(backend
        .committed()
        .contains(&format!("ALTER USER {} ACCOUNT UNLOCK", ROOT_USER)));
}

#[tokio::test]
async fn test_rotated_config_reinitializes() {
    init_tracing();
    let backend = backend();
    let manager = manager(&backend).await;

    let resp = manager
        .rotate_root_credentials(&RequestContext::new(), RotateRootRequest::default())
        .await
        .unwrap();

    let restarted = LifecycleManager::new(backend.factory());
    restarted
        .initialize(
            &RequestContext::new(),
            InitializeRequest {
                config: resp.config,
                verify_connection: true,
            },
        )
        .await
        .unwrap();
    assert!(restarted.is_initialized().await);
}

#[tokio::test]
async fn test_rotate_root_password_policy() {
    init_tracing();
    let backend = backend();
    let manager = manager_with(
        &backend,
        json!({ "password_length": 12, "password_case": "lower" }),
    )
    .await;

    let resp = manager
        .rotate_root_credentials(&RequestContext::new(), RotateRootRequest::default())
        .await
        .unwrap();
    let new_password = password_of(&resp.config);
    assert_eq!(new_password.len(), 12);
    assert!(new_password.starts_with(|c: char| c.is_ascii_lowercase()));
    assert!(backend.can_login(ROOT_USER, &new_password));
}
