//! # dynacred
//!
//! Dynamic credential lifecycle engine for Oracle Database.
//!
//! A host secrets manager drives the engine through [`LifecycleManager`]:
//! it creates short-lived database users on demand, rotates their passwords,
//! revokes them, and rotates the engine's own administrative password.
//!
//! ## Features
//!
//! - **Username templates**: a small pipeline language (`printf`, `random`,
//!   `truncate`, `uppercase`, `replace`, ...) rendered from the caller's
//!   display and role names
//! - **Statement templates**: `{{username}}`, `{{password}}` and
//!   `{{expiration}}` placeholders, optional `;` splitting, built-in
//!   rotation and revocation defaults
//! - **Transactional creation and rotation**: all statements commit or
//!   none do; cancellation rolls back
//! - **Session termination**: live sessions are killed before a user is
//!   dropped
//! - **Redaction**: passwords never appear in returned errors
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use dynacred::prelude::*;
//! use serde_json::json;
//!
//! let manager = LifecycleManager::oracle();
//! let ctx = RequestContext::new();
//!
//! let config = json!({
//!     "connection_url": "{{username}}/{{password}}@//db.internal:1521/XEPDB1",
//!     "username": "system",
//!     "password": "manager",
//! });
//! manager
//!     .initialize(&ctx, InitializeRequest {
//!         config: config.as_object().cloned().unwrap_or_default(),
//!         verify_connection: true,
//!     })
//!     .await?;
//!
//! let created = manager
//!     .new_user(&ctx, NewUserRequest {
//!         username_config: UsernameMetadata::new("token", "readonly"),
//!         password: "Xv9_generated_elsewhere".into(),
//!         expiration: chrono::Utc::now() + chrono::Duration::hours(1),
//!         statements: vec![
//!             r#"CREATE USER {{username}} IDENTIFIED BY "{{password}}"; GRANT CONNECT TO {{username}}"#.into(),
//!         ],
//!     })
//!     .await?;
//! ```
//!
//! ## Feature Flags
//!
//! - `oracle` - connect through the `oracle` crate; without it the engine
//!   runs against any [`dynacred_rdbc::connection::ConnectionFactory`]

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod config;
pub mod context;
pub mod credentials;
pub mod error;
pub mod executor;
pub mod manager;
pub mod producer;
pub mod secret;
pub mod session;
pub mod statements;
pub mod template;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::{OracleConfig, ProducerKind};
    pub use crate::context::{Interrupted, RequestContext};
    pub use crate::credentials::{
        CredentialGenerator, PasswordCase, PasswordPolicy, PatternCredentialGenerator,
        TemplateCredentialGenerator,
    };
    pub use crate::error::{LifecycleError, Operation, Result};
    pub use crate::manager::{
        ChangeExpiration, ChangePassword, DeleteUserRequest, InitializeRequest,
        InitializeResponse, LifecycleManager, NewUserRequest, NewUserResponse,
        RotateRootRequest, RotateRootResponse, SetCredentialsRequest, SetCredentialsResponse,
        UpdateUserRequest,
    };
    pub use crate::secret::{SecretRedactor, SensitiveString};
    pub use crate::template::UsernameMetadata;
}

pub use config::OracleConfig;
pub use context::RequestContext;
pub use error::{LifecycleError, Operation, Result};
pub use manager::{
    ChangeExpiration, ChangePassword, DeleteUserRequest, InitializeRequest, InitializeResponse,
    LifecycleManager, NewUserRequest, NewUserResponse, RotateRootRequest, RotateRootResponse,
    SetCredentialsRequest, SetCredentialsResponse, UpdateUserRequest,
};
pub use secret::{SecretRedactor, SensitiveString};
pub use template::UsernameMetadata;

#[cfg(test)]
mod tests {
    use super::prelude::*;

    #[test]
    fn test_prelude_imports() {
        let _ctx = RequestContext::new();
        let _meta = UsernameMetadata::new("token", "role");
        let _policy = PasswordPolicy::default();
        assert_eq!(Operation::RotateRoot.to_string(), "rotate_root_credentials");
    }
}
