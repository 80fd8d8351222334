//! Lifecycle error taxonomy
//!
//! Every error returned by [`LifecycleManager`](crate::LifecycleManager) is a
//! [`LifecycleError`] that has been passed through
//! [`LifecycleError::redact`], so no password it knows about appears in the
//! message text.

use dynacred_rdbc::error::ErrorCategory;
use thiserror::Error;

use crate::context::Interrupted;
use crate::secret::SecretRedactor;

/// Result type for lifecycle operations
pub type Result<T> = std::result::Result<T, LifecycleError>;

/// Lifecycle operation, used to label errors and log events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Initialize
    Initialize,
    /// Create a dynamic user
    NewUser,
    /// Rotate a dynamic user's password
    UpdateUser,
    /// Revoke a dynamic user
    DeleteUser,
    /// Rotate the administrative credential
    RotateRoot,
    /// Rotate a static user's password
    SetCredentials,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Initialize => write!(f, "initialize"),
            Self::NewUser => write!(f, "new_user"),
            Self::UpdateUser => write!(f, "update_user"),
            Self::DeleteUser => write!(f, "delete_user"),
            Self::RotateRoot => write!(f, "rotate_root_credentials"),
            Self::SetCredentials => write!(f, "set_credentials"),
        }
    }
}

fn describe_step(index: &Option<usize>) -> String {
    match index {
        Some(index) => format!("statement {}", index),
        None => "transaction control".to_string(),
    }
}

/// Errors returned by lifecycle operations
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// Missing or malformed configuration
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The administrative connection could not be opened or verified
    #[error("connection error ({category}): {message}")]
    Connection {
        /// Classification of the underlying driver error
        category: ErrorCategory,
        /// Driver error text
        message: String,
    },

    /// An operation ran before a successful initialize
    #[error("plugin has not been initialized")]
    NotInitialized,

    /// No usable statements after defaulting and preprocessing
    #[error("{operation}: no statements to execute")]
    EmptyStatements {
        /// Operation that had nothing to run
        operation: Operation,
    },

    /// Username or password could not be produced or failed validation
    #[error("failed to generate {what}: {message}")]
    Generation {
        /// What was being generated, e.g. `"username"`
        what: &'static str,
        /// Why generation failed
        message: String,
    },

    /// A statement, or the surrounding BEGIN/COMMIT, failed
    #[error("{operation}: {} failed ({category}): {message}", describe_step(.index))]
    Execution {
        /// Operation whose statements were running
        operation: Operation,
        /// Zero-based position of the failing statement, `None` for begin/commit
        index: Option<usize>,
        /// Classification of the driver error
        category: ErrorCategory,
        /// Redacted driver error text
        message: String,
    },

    /// A revocation failed after earlier statements already committed
    #[error(
        "revocation of {username} partially applied: {committed} statement(s) committed before statement {failed_index} failed: {message}"
    )]
    PartialRevocation {
        /// Account being revoked
        username: String,
        /// Number of statements that committed
        committed: usize,
        /// Zero-based position of the failing statement
        failed_index: usize,
        /// Redacted error text
        message: String,
    },

    /// Live sessions could not be terminated
    #[error("failed to disconnect sessions of {username} ({killed} killed): {message}")]
    SessionTermination {
        /// Account whose sessions were being killed
        username: String,
        /// Sessions killed before the failure
        killed: usize,
        /// Redacted error text
        message: String,
    },

    /// UpdateUser was called with neither a password nor an expiration change
    #[error("no change requested")]
    NoChangeRequested,

    /// A required request argument was empty
    #[error("missing required argument: {0}")]
    MissingArgument(&'static str),

    /// A request argument was present but unusable
    #[error("invalid {argument}: {message}")]
    InvalidArgument {
        /// Name of the offending argument
        argument: &'static str,
        /// What is wrong with it
        message: String,
    },

    /// Root rotation requested without a configured username/password
    #[error("cannot rotate root credentials without a configured username and password")]
    MissingRootCredential,

    /// The request was cancelled or its deadline passed
    #[error("{operation}: {message}")]
    Cancelled {
        /// Operation that was interrupted
        operation: Operation,
        /// Cancellation or deadline description
        message: String,
    },
}

impl LifecycleError {
    /// Wrap a connectivity failure
    pub fn connection(err: &dynacred_rdbc::Error) -> Self {
        Self::Connection {
            category: err.category(),
            message: err.to_string(),
        }
    }

    /// Wrap a connectivity failure, classifying interruptions as cancellation
    pub fn acquire(operation: Operation, err: &dynacred_rdbc::Error) -> Self {
        if err.is_interrupted() {
            Self::Cancelled {
                operation,
                message: err.to_string(),
            }
        } else {
            Self::connection(err)
        }
    }

    /// A statement or transaction-control failure
    pub fn execution(
        operation: Operation,
        index: Option<usize>,
        err: &dynacred_rdbc::Error,
    ) -> Self {
        Self::Execution {
            operation,
            index,
            category: err.category(),
            message: err.to_string(),
        }
    }

    /// A generation failure
    pub fn generation(what: &'static str, message: impl Into<String>) -> Self {
        Self::Generation {
            what,
            message: message.into(),
        }
    }

    /// An interrupted request
    pub fn cancelled(operation: Operation, interrupted: Interrupted) -> Self {
        Self::Cancelled {
            operation,
            message: interrupted.to_string(),
        }
    }

    /// Whether the request was cancelled or timed out
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// Whether the account may be left partially revoked
    pub fn is_partial(&self) -> bool {
        matches!(self, Self::PartialRevocation { .. })
    }

    /// Scrub every secret known to `redactor` from the message text
    pub fn redact(self, redactor: &SecretRedactor) -> Self {
        if redactor.is_empty() {
            return self;
        }
        let r = |s: String| redactor.redact(&s);
        match self {
            Self::Config(message) => Self::Config(r(message)),
            Self::Connection { category, message } => Self::Connection {
                category,
                message: r(message),
            },
            Self::Generation { what, message } => Self::Generation {
                what,
                message: r(message),
            },
            Self::Execution {
                operation,
                index,
                category,
                message,
            } => Self::Execution {
                operation,
                index,
                category,
                message: r(message),
            },
            Self::PartialRevocation {
                username,
                committed,
                failed_index,
                message,
            } => Self::PartialRevocation {
                username,
                committed,
                failed_index,
                message: r(message),
            },
            Self::SessionTermination {
                username,
                killed,
                message,
            } => Self::SessionTermination {
                username,
                killed,
                message: r(message),
            },
            Self::InvalidArgument { argument, message } => Self::InvalidArgument {
                argument,
                message: r(message),
            },
            Self::Cancelled { operation, message } => Self::Cancelled {
                operation,
                message: r(message),
            },
            other @ (Self::NotInitialized
            | Self::EmptyStatements { .. }
            | Self::NoChangeRequested
            | Self::MissingArgument(_)
            | Self::MissingRootCredential) => other,
        }
    }
}
