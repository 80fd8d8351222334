//! Lifecycle manager
//!
//! [`LifecycleManager`] is the entry point the host process calls. All
//! engine state, including the administrative connection, sits behind one
//! `tokio::sync::RwLock`. Every lifecycle operation takes the write half for
//! its whole duration (generation, connection checkout, execution), so two
//! operations never interleave on the shared connection. Only
//! [`LifecycleManager::is_initialized`] and
//! [`LifecycleManager::generate_password`] take the read half.
//!
//! Errors leave the manager with every password it knows about replaced by
//! `[password]`.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value as JsonValue};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use dynacred_rdbc::prelude::ConnectionFactory;
use dynacred_rdbc::security::validate_quoted_secret;

use crate::config::{OracleConfig, ProducerKind};
use crate::context::RequestContext;
use crate::credentials::{
    CredentialGenerator, PatternCredentialGenerator, TemplateCredentialGenerator,
};
use crate::error::{LifecycleError, Operation, Result};
use crate::executor::{run_direct, run_in_transaction};
use crate::producer::ConnectionProducer;
use crate::secret::{SecretRedactor, SensitiveString};
use crate::session::SessionTerminator;
use crate::statements::{
    parse_statements, revocation_statements, rotation_statements, StatementBindings,
};
use crate::template::{UsernameMetadata, DEFAULT_USERNAME_TEMPLATE};

/// Name under which the engine registers with the host
pub const TYPE_NAME: &str = "oracle";

// ============================================================================
// Requests and responses
// ============================================================================

/// Initialize input
#[derive(Debug, Clone, Default)]
pub struct InitializeRequest {
    /// Generic configuration map
    pub config: Map<String, JsonValue>,
    /// Open and probe a connection before returning
    pub verify_connection: bool,
}

/// Initialize output
#[derive(Debug, Clone)]
pub struct InitializeResponse {
    /// Configuration to persist, returned as given
    pub config: Map<String, JsonValue>,
}

/// NewUser input
#[derive(Debug, Clone)]
pub struct NewUserRequest {
    /// Metadata the username is rendered from
    pub username_config: UsernameMetadata,
    /// Password for the new account
    pub password: SensitiveString,
    /// When the credential expires
    pub expiration: DateTime<Utc>,
    /// Creation statements
    pub statements: Vec<String>,
}

/// NewUser output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUserResponse {
    /// Generated username
    pub username: String,
}

/// Password part of an UpdateUser request
#[derive(Debug, Clone)]
pub struct ChangePassword {
    /// Password to set
    pub new_password: SensitiveString,
    /// Rotation statements; the built-in statement is used when empty
    pub statements: Vec<String>,
}

/// Expiration part of an UpdateUser request
#[derive(Debug, Clone)]
pub struct ChangeExpiration {
    /// New expiration
    pub new_expiration: DateTime<Utc>,
    /// Ignored; Oracle accounts carry no expiry
    pub statements: Vec<String>,
}

/// UpdateUser input
#[derive(Debug, Clone)]
pub struct UpdateUserRequest {
    /// Account to change
    pub username: String,
    /// Password change
    pub password: Option<ChangePassword>,
    /// Expiration change
    pub expiration: Option<ChangeExpiration>,
}

/// DeleteUser input
#[derive(Debug, Clone)]
pub struct DeleteUserRequest {
    /// Account to revoke
    pub username: String,
    /// Revocation statements; built-in statements are used when empty
    pub statements: Vec<String>,
}

/// RotateRootCredentials input
#[derive(Debug, Clone, Default)]
pub struct RotateRootRequest {
    /// Rotation statements; the built-in statement is used when empty
    pub statements: Vec<String>,
}

/// RotateRootCredentials output
#[derive(Debug, Clone)]
pub struct RotateRootResponse {
    /// Configuration to persist, carrying the new password
    pub config: Map<String, JsonValue>,
}

/// SetCredentials input
#[derive(Debug, Clone)]
pub struct SetCredentialsRequest {
    /// Existing account
    pub username: String,
    /// Password to set
    pub password: SensitiveString,
    /// Rotation statements; the built-in statement is used when empty
    pub statements: Vec<String>,
}

/// SetCredentials output
#[derive(Debug, Clone)]
pub struct SetCredentialsResponse {
    /// Echoed username
    pub username: String,
    /// Echoed password
    pub password: SensitiveString,
}

// ============================================================================
// Manager
// ============================================================================

#[derive(Debug, Clone)]
struct Settings {
    generator: Arc<dyn CredentialGenerator>,
    split_statements: bool,
    disconnect_sessions: bool,
}

#[derive(Debug)]
struct EngineState {
    producer: ConnectionProducer,
    settings: Option<Settings>,
    raw_config: Map<String, JsonValue>,
}

impl EngineState {
    fn settings(&self) -> Result<Settings> {
        match (&self.settings, self.producer.is_initialized()) {
            (Some(settings), true) => Ok(settings.clone()),
            _ => Err(LifecycleError::NotInitialized),
        }
    }

    fn root_password(&self) -> Option<&str> {
        self.producer.config().map(|c| c.password.expose_secret())
    }
}

/// Credential lifecycle engine
#[derive(Debug)]
pub struct LifecycleManager {
    state: RwLock<EngineState>,
    generator_override: Option<Arc<dyn CredentialGenerator>>,
}

fn build_generator(config: &OracleConfig) -> Result<Arc<dyn CredentialGenerator>> {
    let policy = config.password_policy();
    let generator: Arc<dyn CredentialGenerator> = match config.credential_producer {
        ProducerKind::Template => Arc::new(TemplateCredentialGenerator::from_source(
            config
                .username_template
                .as_deref()
                .unwrap_or(DEFAULT_USERNAME_TEMPLATE),
            policy,
        )?),
        ProducerKind::Pattern => Arc::new(PatternCredentialGenerator::new(policy)),
        ProducerKind::PatternDisplay => Arc::new(PatternCredentialGenerator::display_only(policy)),
    };
    Ok(generator)
}

fn check_password(password: &SensitiveString) -> Result<()> {
    if password.is_empty() {
        return Err(LifecycleError::MissingArgument("password"));
    }
    validate_quoted_secret(password.expose_secret()).map_err(|e| {
        LifecycleError::InvalidArgument {
            argument: "password",
            message: e.to_string(),
        }
    })
}

impl LifecycleManager {
    /// Create an uninitialized manager over `factory`
    pub fn new(factory: Arc<dyn ConnectionFactory>) -> Self {
        Self {
            state: RwLock::new(EngineState {
                producer: ConnectionProducer::new(factory),
                settings: None,
                raw_config: Map::new(),
            }),
            generator_override: None,
        }
    }

    /// Manager backed by the Oracle driver
    #[cfg(feature = "oracle")]
    pub fn oracle() -> Self {
        Self::new(Arc::new(dynacred_rdbc::oracle::OracleConnectionFactory))
    }

    /// Use `generator` instead of the one selected by configuration
    pub fn with_generator(mut self, generator: Arc<dyn CredentialGenerator>) -> Self {
        self.generator_override = Some(generator);
        self
    }

    /// Engine type name
    pub fn type_name(&self) -> &'static str {
        TYPE_NAME
    }

    /// Whether a previous [`initialize`](Self::initialize) succeeded
    pub async fn is_initialized(&self) -> bool {
        self.state.read().await.settings().is_ok()
    }

    /// Generate a password under the configured policy
    pub async fn generate_password(&self) -> Result<String> {
        let settings = self.state.read().await.settings()?;
        settings.generator.generate_password()
    }

    /// Decode the configuration, build the generator and optionally verify
    /// connectivity. Calling again replaces the previous configuration.
    pub async fn initialize(
        &self,
        ctx: &RequestContext,
        req: InitializeRequest,
    ) -> Result<InitializeResponse> {
        let mut redactor = SecretRedactor::new();
        if let Some(JsonValue::String(password)) = req.config.get("password") {
            redactor.add(password);
        }
        let result = self.initialize_inner(ctx, req).await;
        result.map_err(|e| e.redact(&redactor))
    }

    async fn initialize_inner(
        &self,
        ctx: &RequestContext,
        req: InitializeRequest,
    ) -> Result<InitializeResponse> {
        let config = OracleConfig::from_map(&req.config)?;
        let generator = match &self.generator_override {
            Some(generator) => generator.clone(),
            None => build_generator(&config)?,
        };
        let settings = Settings {
            generator,
            split_statements: config.split_statements,
            disconnect_sessions: config.disconnect_sessions,
        };

        let mut state = ctx
            .run(self.state.write())
            .await
            .map_err(|i| LifecycleError::cancelled(Operation::Initialize, i))?;

        state.settings = None;
        state
            .producer
            .initialize(ctx, config, req.verify_connection)
            .await?;
        info!(
            verify_connection = req.verify_connection,
            split_statements = settings.split_statements,
            disconnect_sessions = settings.disconnect_sessions,
            "initialized"
        );
        state.settings = Some(settings);
        state.raw_config = req.config.clone();
        Ok(InitializeResponse { config: req.config })
    }

    /// Create a dynamic user with a generated name
    pub async fn new_user(
        &self,
        ctx: &RequestContext,
        req: NewUserRequest,
    ) -> Result<NewUserResponse> {
        let mut redactor = SecretRedactor::new().with(req.password.expose_secret());
        let result = self.new_user_inner(ctx, &req, &mut redactor).await;
        result.map_err(|e| e.redact(&redactor))
    }

    async fn new_user_inner(
        &self,
        ctx: &RequestContext,
        req: &NewUserRequest,
        redactor: &mut SecretRedactor,
    ) -> Result<NewUserResponse> {
        let operation = Operation::NewUser;
        check_password(&req.password)?;

        let mut state = ctx
            .run(self.state.write())
            .await
            .map_err(|i| LifecycleError::cancelled(operation, i))?;
        let settings = state.settings()?;
        if let Some(root) = state.root_password() {
            redactor.add(root);
        }

        let statements = parse_statements(&req.statements, settings.split_statements);
        if statements.is_empty() {
            return Err(LifecycleError::EmptyStatements { operation });
        }

        let username = settings.generator.generate_username(&req.username_config)?;
        let expiration = settings.generator.generate_expiration(req.expiration)?;
        let bindings = StatementBindings::new()
            .username(username.clone())
            .password(req.password.expose_secret())
            .expiration(expiration);

        let conn = state.producer.connection(ctx, operation).await?;
        let result = run_in_transaction(ctx, &*conn, operation, &statements, &bindings).await;
        conn.release().await;
        result?;

        info!(username = %username, statements = statements.len(), "created user");
        Ok(NewUserResponse { username })
    }

    /// Change a dynamic user's password. An expiration-only change is
    /// accepted and does nothing.
    pub async fn update_user(&self, ctx: &RequestContext, req: UpdateUserRequest) -> Result<()> {
        match (&req.password, &req.expiration) {
            (None, None) => Err(LifecycleError::NoChangeRequested),
            (Some(change), _) => {
                self.change_password(
                    ctx,
                    Operation::UpdateUser,
                    &req.username,
                    &change.new_password,
                    &change.statements,
                )
                .await
            }
            (None, Some(_)) => {
                debug!(username = %req.username, "expiration change ignored");
                Ok(())
            }
        }
    }

    /// Rotate the password of an existing, externally named account
    pub async fn set_credentials(
        &self,
        ctx: &RequestContext,
        req: SetCredentialsRequest,
    ) -> Result<SetCredentialsResponse> {
        self.change_password(
            ctx,
            Operation::SetCredentials,
            &req.username,
            &req.password,
            &req.statements,
        )
        .await?;
        Ok(SetCredentialsResponse {
            username: req.username,
            password: req.password,
        })
    }

    async fn change_password(
        &self,
        ctx: &RequestContext,
        operation: Operation,
        username: &str,
        password: &SensitiveString,
        statements: &[String],
    ) -> Result<()> {
        let mut redactor = SecretRedactor::new().with(password.expose_secret());
        let result = self
            .change_password_inner(ctx, operation, username, password, statements, &mut redactor)
            .await;
        result.map_err(|e| e.redact(&redactor))
    }

    async fn change_password_inner(
        &self,
        ctx: &RequestContext,
        operation: Operation,
        username: &str,
        password: &SensitiveString,
        statements: &[String],
        redactor: &mut SecretRedactor,
    ) -> Result<()> {
        if username.is_empty() {
            return Err(LifecycleError::MissingArgument("username"));
        }
        check_password(password)?;

        let mut state = ctx
            .run(self.state.write())
            .await
            .map_err(|i| LifecycleError::cancelled(operation, i))?;
        let settings = state.settings()?;
        if let Some(root) = state.root_password() {
            redactor.add(root);
        }

        let statements = rotation_statements(statements, settings.split_statements);
        if statements.is_empty() {
            return Err(LifecycleError::EmptyStatements { operation });
        }
        let bindings = StatementBindings::new()
            .username(username)
            .password(password.expose_secret());

        let conn = state.producer.connection(ctx, operation).await?;
        let result = run_in_transaction(ctx, &*conn, operation, &statements, &bindings).await;
        conn.release().await;
        result?;

        info!(%operation, username = %username, "changed password");
        Ok(())
    }

    /// Revoke a dynamic user.
    ///
    /// Revocation statements commit one at a time. A failure after the
    /// first one is reported as [`LifecycleError::PartialRevocation`] and
    /// the account may be left partly revoked.
    pub async fn delete_user(&self, ctx: &RequestContext, req: DeleteUserRequest) -> Result<()> {
        let mut redactor = SecretRedactor::new();
        let result = self.delete_user_inner(ctx, &req, &mut redactor).await;
        result.map_err(|e| e.redact(&redactor))
    }

    async fn delete_user_inner(
        &self,
        ctx: &RequestContext,
        req: &DeleteUserRequest,
        redactor: &mut SecretRedactor,
    ) -> Result<()> {
        let operation = Operation::DeleteUser;
        if req.username.is_empty() {
            return Err(LifecycleError::MissingArgument("username"));
        }

        let mut state = ctx
            .run(self.state.write())
            .await
            .map_err(|i| LifecycleError::cancelled(operation, i))?;
        let settings = state.settings()?;
        if let Some(root) = state.root_password() {
            redactor.add(root);
        }

        let statements = revocation_statements(
            &req.statements,
            settings.split_statements,
            settings.disconnect_sessions,
        );
        if statements.is_empty() {
            return Err(LifecycleError::EmptyStatements { operation });
        }
        let bindings = StatementBindings::new().username(req.username.as_str());

        let conn = state.producer.connection(ctx, operation).await?;
        let result = async {
            if settings.disconnect_sessions {
                SessionTerminator::new()
                    .disconnect(ctx, &*conn, &req.username)
                    .await?;
            }
            run_direct(ctx, &*conn, &req.username, &statements, &bindings).await
        }
        .await;
        conn.release().await;
        result?;

        info!(username = %req.username, statements = statements.len(), "revoked user");
        Ok(())
    }

    /// Rotate the administrative password.
    ///
    /// The stored configuration changes only after the rotation commits;
    /// the pool opened with the old password is then closed.
    pub async fn rotate_root_credentials(
        &self,
        ctx: &RequestContext,
        req: RotateRootRequest,
    ) -> Result<RotateRootResponse> {
        let mut redactor = SecretRedactor::new();
        let result = self.rotate_root_inner(ctx, &req, &mut redactor).await;
        result.map_err(|e| e.redact(&redactor))
    }

    async fn rotate_root_inner(
        &self,
        ctx: &RequestContext,
        req: &RotateRootRequest,
        redactor: &mut SecretRedactor,
    ) -> Result<RotateRootResponse> {
        let operation = Operation::RotateRoot;

        let mut state = ctx
            .run(self.state.write())
            .await
            .map_err(|i| LifecycleError::cancelled(operation, i))?;
        let settings = state.settings()?;
        let config = state
            .producer
            .config()
            .cloned()
            .ok_or(LifecycleError::NotInitialized)?;
        redactor.add(config.password.expose_secret());
        if !config.has_root_credentials() {
            return Err(LifecycleError::MissingRootCredential);
        }

        let statements = rotation_statements(&req.statements, settings.split_statements);
        if statements.is_empty() {
            return Err(LifecycleError::EmptyStatements { operation });
        }

        let new_password = settings.generator.generate_password()?;
        redactor.add(&new_password);
        let bindings = StatementBindings::new()
            .username(config.username.as_str())
            .password(new_password.as_str());

        let conn = state.producer.connection(ctx, operation).await?;
        let result = run_in_transaction(ctx, &*conn, operation, &statements, &bindings).await;
        conn.release().await;
        result?;

        // Committed: from here on the database only accepts the new password.
        let mut raw_config = state.raw_config.clone();
        raw_config.insert(
            "username".to_string(),
            JsonValue::String(config.username.clone()),
        );
        raw_config.insert("password".to_string(), JsonValue::String(new_password));
        let updated = OracleConfig::from_map(&raw_config).map_err(|e| {
            LifecycleError::Config(format!(
                "root password rotated but configuration could not be rebuilt: {}",
                e
            ))
        })?;
        state.producer.replace_config(updated).await;
        state.raw_config = raw_config.clone();

        info!(username = %config.username, "rotated root credentials");
        Ok(RotateRootResponse { config: raw_config })
    }

    /// Close the administrative pool. Safe to call repeatedly.
    pub async fn close(&self) {
        self.state.write().await.producer.close().await;
    }
}
