//! Shared fixtures for dynacred integration tests
#![allow(dead_code)]

use dynacred::prelude::*;
use dynacred_rdbc::prelude::{Connection, ConnectionConfig, ConnectionFactory};
use dynacred_rdbc::testing::MockBackend;
use serde_json::{json, Map, Value as JsonValue};
use std::sync::Once;

static INIT: Once = Once::new();

/// Initialize test logging (idempotent)
pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init()
            .ok();
    });
}

pub const ROOT_USER: &str = "system";
pub const ROOT_PASSWORD: &str = "manager";

pub const CREATE_STATEMENT: &str =
    r#"CREATE USER {{username}} IDENTIFIED BY "{{password}}"; GRANT CONNECT TO {{username}}"#;

/// Database with only the administrative account
pub fn backend() -> MockBackend {
    MockBackend::new().with_account(ROOT_USER, ROOT_PASSWORD)
}

/// Configuration map pointing at the mock listener
pub fn config_map(extra: JsonValue) -> Map<String, JsonValue> {
    let mut map = match json!({
        "connection_url": "{{username}}/{{password}}@//mock:1521/XE",
        "username": ROOT_USER,
        "password": ROOT_PASSWORD,
    }) {
        JsonValue::Object(map) => map,
        _ => unreachable!(),
    };
    if let JsonValue::Object(extra) = extra {
        map.extend(extra);
    }
    map
}

/// Manager initialized against `backend` with the default configuration
pub async fn manager(backend: &MockBackend) -> LifecycleManager {
    manager_with(backend, json!({})).await
}

/// Manager initialized against `backend` with `extra` merged into the config
pub async fn manager_with(backend: &MockBackend, extra: JsonValue) -> LifecycleManager {
    let manager = LifecycleManager::new(backend.factory());
    manager
        .initialize(
            &RequestContext::new(),
            InitializeRequest {
                config: config_map(extra),
                verify_connection: true,
            },
        )
        .await
        .expect("initialize");
    manager
}

pub fn new_user_request(password: &str) -> NewUserRequest {
    NewUserRequest {
        username_config: UsernameMetadata::new("token", "readonly"),
        password: password.into(),
        expiration: chrono::Utc::now() + chrono::Duration::hours(1),
        statements: vec![CREATE_STATEMENT.to_string()],
    }
}

/// Open a connection as `username`, creating a live session row
pub async fn login(backend: &MockBackend, username: &str, password: &str) -> Box<dyn Connection> {
    backend
        .factory()
        .connect(
            &ConnectionConfig::new("oracle://mock:1521/XE").with_credentials(username, password),
        )
        .await
        .expect("login")
}
