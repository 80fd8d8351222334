//! End-to-end lifecycle tests against the in-memory database

mod common;

use common::*;
use dynacred::prelude::*;
use regex::Regex;
use serde_json::json;

// ==================== NewUser ====================

#[tokio::test]
async fn test_create_user_with_default_template() {
    init_tracing();
    let backend = backend();
    let manager = manager(&backend).await;

    let resp = manager
        .new_user(&RequestContext::new(), new_user_request("Xv9_create_pass"))
        .await
        .unwrap();

    let pattern = Regex::new(r"^V_TOKEN_READONLY_[A-Z0-9]{13}$").unwrap();
    assert!(pattern.is_match(&resp.username), "{}", resp.username);
    assert!(resp.username.len() <= 30);
    assert!(backend.can_login(&resp.username, "Xv9_create_pass"));
    assert!(backend
        .committed()
        .contains(&format!("GRANT CONNECT TO {}", resp.username)));
}

#[tokio::test]
async fn test_create_connectable_user_then_revoke() {
    init_tracing();
    let backend = backend();
    let manager = manager(&backend).await;
    let ctx = RequestContext::new();

    let resp = manager
        .new_user(
            &ctx,
            NewUserRequest {
                username_config: UsernameMetadata::new("token", "myrolenamewithextracharacters"),
                password: "Xv9_create_pass".into(),
                expiration: chrono::Utc::now() + chrono::Duration::minutes(5),
                statements: vec![
                    r#"CREATE USER {{username}} IDENTIFIED BY "{{password}}"; GRANT CONNECT TO {{username}};"#
                        .to_string(),
                ],
            },
        )
        .await
        .unwrap();
    assert!(Regex::new(r"^V_TOKEN_MYROLENA_[A-Z0-9]{13}$")
        .unwrap()
        .is_match(&resp.username));

    let _session = login(&backend, &resp.username, "Xv9_create_pass").await;

    manager
        .delete_user(
            &ctx,
            DeleteUserRequest {
                username: resp.username.clone(),
                statements: vec![],
            },
        )
        .await
        .unwrap();
    assert!(!backend.can_login(&resp.username, "Xv9_create_pass"));
}

#[tokio::test]
async fn test_create_user_reports_failing_statement() {
    init_tracing();
    let backend = backend();
    let manager = manager(&backend).await;
    backend.fail_on("grant connect", "ORA-01031: insufficient privileges");

    let err = manager
        .new_user(&RequestContext::new(), new_user_request("Xv9_create_pass"))
        .await
        .unwrap_err();

    match &err {
        LifecycleError::Execution {
            operation, index, ..
        } => {
            assert_eq!(*operation, Operation::NewUser);
            assert_eq!(*index, Some(1));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(err.to_string().contains("ORA-01031"));
    assert_eq!(backend.rollbacks(), 1);
}

#[tokio::test]
async fn test_create_user_with_custom_template() {
    init_tracing();
    let backend = backend();
    let manager = manager_with(
        &backend,
        json!({
            "username_template": "{{ printf \"APP_%s_%s\" (.RoleName | uppercase) (random 6) }}",
        }),
    )
    .await;

    let resp = manager
        .new_user(&RequestContext::new(), new_user_request("Xv9_create_pass"))
        .await
        .unwrap();
    assert!(Regex::new(r"^APP_READONLY_[A-Za-z0-9]{6}$")
        .unwrap()
        .is_match(&resp.username));
}

#[tokio::test]
async fn test_create_user_with_pattern_producer() {
    init_tracing();
    let backend = backend();
    let manager = manager_with(&backend, json!({ "credential_producer": "pattern" })).await;

    let resp = manager
        .new_user(&RequestContext::new(), new_user_request("Xv9_create_pass"))
        .await
        .unwrap();
    assert!(resp.username.starts_with("v_token_readonly_"));
    assert!(resp.username.len() <= 30);
    assert!(backend.has_account(&resp.username));
}

#[tokio::test]
async fn test_create_user_with_display_pattern_producer() {
    init_tracing();
    let backend = backend();
    let manager = manager_with(&backend, json!({ "credential_producer": "pattern_display" })).await;

    let mut req = new_user_request("Xv9_create_pass");
    req.username_config = UsernameMetadata::new("_svc", "readonly");
    let resp = manager.new_user(&RequestContext::new(), req).await.unwrap();

    assert!(resp.username.starts_with("v_svc_"), "{}", resp.username);
    assert_eq!(resp.username.len(), 30);
    assert!(backend.has_account(&resp.username));
}

#[tokio::test]
async fn test_create_user_without_split() {
    init_tracing();
    let backend = backend();
    let manager = manager_with(&backend, json!({ "split_statements": false })).await;
    backend.fail_on("; grant", "ORA-00922: missing or invalid option");

    let err = manager
        .new_user(&RequestContext::new(), new_user_request("Xv9_create_pass"))
        .await
        .unwrap_err();
    assert!(matches!(err, LifecycleError::Execution { index: Some(0), .. }));
}

#[tokio::test]
async fn test_empty_statements_never_connect() {
    init_tracing();
    let backend = backend();
    let manager = LifecycleManager::new(backend.factory());
    manager
        .initialize(
            &RequestContext::new(),
            InitializeRequest {
                config: config_map(json!({})),
                verify_connection: false,
            },
        )
        .await
        .unwrap();

    let mut req = new_user_request("Xv9_create_pass");
    req.statements = vec![];
    let err = manager
        .new_user(&RequestContext::new(), req)
        .await
        .unwrap_err();

    assert!(matches!(err, LifecycleError::EmptyStatements { .. }));
    assert_eq!(backend.connects(), 0);
}

// ==================== DeleteUser ====================

#[tokio::test]
async fn test_revoke_connected_user() {
    init_tracing();
    let backend = backend();
    let manager = manager(&backend).await;
    let ctx = RequestContext::new();

    let created = manager
        .new_user(&ctx, new_user_request("Xv9_create_pass"))
        .await
        .unwrap();
    let _session = login(&backend, &created.username, "Xv9_create_pass").await;
    assert_eq!(backend.sessions_of(&created.username).len(), 1);

    manager
        .delete_user(
            &ctx,
            DeleteUserRequest {
                username: created.username.clone(),
                statements: vec![],
            },
        )
        .await
        .unwrap();

    assert!(!backend.has_account(&created.username));
    assert!(backend.sessions_of(&created.username).is_empty());
    assert!(!backend.can_login(&created.username, "Xv9_create_pass"));
}

#[tokio::test]
async fn test_revoke_without_disconnect_uses_session_block() {
    init_tracing();
    let backend = backend();
    let manager = manager_with(&backend, json!({ "disconnect_sessions": false })).await;
    let ctx = RequestContext::new();

    let created = manager
        .new_user(&ctx, new_user_request("Xv9_create_pass"))
        .await
        .unwrap();
    let _session = login(&backend, &created.username, "Xv9_create_pass").await;

    manager
        .delete_user(
            &ctx,
            DeleteUserRequest {
                username: created.username.clone(),
                statements: vec![],
            },
        )
        .await
        .unwrap();

    let executed = backend.executed();
    assert!(executed
        .iter()
        .any(|s| s == &format!("ALTER USER {} ACCOUNT LOCK", created.username)));
    assert!(executed.iter().any(|s| s.contains("dbms_lock.sleep(1)")));
    assert!(!backend.has_account(&created.username));
}

#[tokio::test]
async fn test_partial_revocation_is_reported() {
    init_tracing();
    let backend = backend();
    let manager = manager(&backend).await;
    let ctx = RequestContext::new();

    let created = manager
        .new_user(&ctx, new_user_request("Xv9_create_pass"))
        .await
        .unwrap();
    backend.fail_on("drop user", "ORA-01031: insufficient privileges");

    let err = manager
        .delete_user(
            &ctx,
            DeleteUserRequest {
                username: created.username.clone(),
                statements: vec![],
            },
        )
        .await
        .unwrap_err();

    assert!(err.is_partial());
    match err {
        LifecycleError::PartialRevocation {
            committed,
            failed_index,
            ..
        } => {
            assert_eq!(committed, 2);
            assert_eq!(failed_index, 2);
        }
        other => panic!("unexpected error: {other}"),
    }
    // Privileges are gone even though the account still exists.
    assert!(backend.has_account(&created.username));
    assert!(!backend.can_login(&created.username, "Xv9_create_pass"));
}

#[tokio::test]
async fn test_revoke_requires_username() {
    init_tracing();
    let backend = backend();
    let manager = manager(&backend).await;

    let err = manager
        .delete_user(
            &RequestContext::new(),
            DeleteUserRequest {
                username: String::new(),
                statements: vec![],
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, LifecycleError::MissingArgument("username")));
}

// ==================== UpdateUser / SetCredentials ====================

#[tokio::test]
async fn test_rotate_dynamic_user_password() {
    init_tracing();
    let backend = backend();
    let manager = manager(&backend).await;
    let ctx = RequestContext::new();

    let created = manager
        .new_user(&ctx, new_user_request("Xv9_create_pass"))
        .await
        .unwrap();

    manager
        .update_user(
            &ctx,
            UpdateUserRequest {
                username: created.username.clone(),
                password: Some(ChangePassword {
                    new_password: "Yw8_rotated_pass".into(),
                    statements: vec![],
                }),
                expiration: Some(ChangeExpiration {
                    new_expiration: chrono::Utc::now(),
                    statements: vec![],
                }),
            },
        )
        .await
        .unwrap();

    assert!(backend.can_login(&created.username, "Yw8_rotated_pass"));
    assert!(!backend.can_login(&created.username, "Xv9_create_pass"));
}

#[tokio::test]
async fn test_set_credentials_on_static_account() {
    init_tracing();
    let backend = backend().with_account("APP_STATIC", "old_pass");
    let manager = manager(&backend).await;

    let resp = manager
        .set_credentials(
            &RequestContext::new(),
            SetCredentialsRequest {
                username: "APP_STATIC".into(),
                password: "Zz7_static_pass".into(),
                statements: vec![
                    r#"ALTER USER {{username}} IDENTIFIED BY "{{password}}" ACCOUNT UNLOCK"#.into(),
                ],
            },
        )
        .await
        .unwrap();

    assert_eq!(resp.username, "APP_STATIC");
    assert!(backend.can_login("APP_STATIC", "Zz7_static_pass"));
}

// ==================== Redaction ====================

#[tokio::test]
async fn test_errors_never_carry_passwords() {
    init_tracing();
    let backend = backend();
    let manager = manager(&backend).await;
    backend.fail_on(
        "alter user",
        "ORA-00922: missing or invalid option near \"Yw8_rotated_pass\"",
    );

    let err = manager
        .update_user(
            &RequestContext::new(),
            UpdateUserRequest {
                username: "APP".into(),
                password: Some(ChangePassword {
                    new_password: "Yw8_rotated_pass".into(),
                    statements: vec![],
                }),
                expiration: None,
            },
        )
        .await
        .unwrap_err();

    let message = err.to_string();
    assert!(!message.contains("Yw8_rotated_pass"), "{message}");
    assert!(message.contains("[password]"), "{message}");
}

#[tokio::test]
async fn test_root_password_redacted_from_connection_errors() {
    init_tracing();
    let backend = backend();
    let manager = manager(&backend).await;
    backend.fail_on(
        "create user",
        format!("ORA-99999: session for system/{} rejected", ROOT_PASSWORD),
    );

    let err = manager
        .new_user(&RequestContext::new(), new_user_request("Xv9_create_pass"))
        .await
        .unwrap_err();
    assert!(!err.to_string().contains(ROOT_PASSWORD));
}
