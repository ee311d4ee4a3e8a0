//! Core error types for Corral

use std::path::PathBuf;
use std::sync::Arc;

use corral_protocol::{ErrorBody, ErrorOutcome, ProtocolError};
use thiserror::Error;

use crate::types::ModuleId;

/// Top-level error type for the Corral client
#[derive(Error, Debug)]
pub enum CorralError {
    /// Protocol error
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Connection error
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// Business error reported by the server, or local misuse of the same kind
    #[error("{0}")]
    Domain(#[from] DomainError),

    /// Extension registry error
    #[error("Extension error: {0}")]
    Extension(#[from] ExtensionError),

    /// Type registry error
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CorralError {
    /// The domain failure behind this error, if any
    pub fn domain(&self) -> Option<&DomainError> {
        match self {
            CorralError::Domain(e) => Some(e),
            CorralError::Extension(ExtensionError::Setup(root)) => root.domain(),
            _ => None,
        }
    }

    /// Whether the connection is gone
    pub fn is_closed(&self) -> bool {
        matches!(self, CorralError::Connection(ConnectionError::Closed))
    }
}

/// Connection-related errors
#[derive(Error, Debug)]
pub enum ConnectionError {
    /// Connection refused or unreachable
    #[error("Failed to connect to {address}: {reason}")]
    ConnectFailed { address: String, reason: String },

    /// Connect attempt exceeded the configured timeout
    #[error("Connection to {0} timed out")]
    Timeout(String),

    /// The connection was closed locally or dropped by the peer
    #[error("Connection closed")]
    Closed,

    /// A detached connection task panicked or was aborted
    #[error("Connection task failed: {0}")]
    TaskFailed(String),
}

/// Typed failures mapped 1:1 from the server's error envelope
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("authorization failed: {0}")]
    AuthFailure(String),

    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("already in state: {0}")]
    AlreadyInState(String),

    #[error("does not exist: {0}")]
    NotExists(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("server error: {0}")]
    Unknown(String),
}

impl DomainError {
    /// Map an error envelope to its typed failure.
    ///
    /// Returns None for a `Success` code, which carries no failure.
    pub fn from_body(body: ErrorBody) -> Option<Self> {
        let ErrorBody { code, message } = body;
        let error = match code {
            ErrorOutcome::Success => return None,
            ErrorOutcome::AuthFailure => DomainError::AuthFailure(message),
            ErrorOutcome::AccessDenied => DomainError::AccessDenied(message),
            ErrorOutcome::AlreadyInState => DomainError::AlreadyInState(message),
            ErrorOutcome::NotExists => DomainError::NotExists(message),
            ErrorOutcome::AlreadyExists => DomainError::AlreadyExists(message),
            ErrorOutcome::UnknownServerError => DomainError::Unknown(message),
        };
        Some(error)
    }

    /// The outcome code this failure corresponds to
    pub fn outcome(&self) -> ErrorOutcome {
        match self {
            DomainError::AuthFailure(_) => ErrorOutcome::AuthFailure,
            DomainError::AccessDenied(_) => ErrorOutcome::AccessDenied,
            DomainError::AlreadyInState(_) => ErrorOutcome::AlreadyInState,
            DomainError::NotExists(_) => ErrorOutcome::NotExists,
            DomainError::AlreadyExists(_) => ErrorOutcome::AlreadyExists,
            DomainError::Unknown(_) => ErrorOutcome::UnknownServerError,
        }
    }

    /// Server-supplied message, verbatim
    pub fn message(&self) -> &str {
        match self {
            DomainError::AuthFailure(m)
            | DomainError::AccessDenied(m)
            | DomainError::AlreadyInState(m)
            | DomainError::NotExists(m)
            | DomainError::AlreadyExists(m)
            | DomainError::Unknown(m) => m,
        }
    }

    /// Caller-facing category label
    pub fn category(&self) -> &'static str {
        self.outcome().label()
    }
}

/// Extension registry errors
#[derive(Error, Debug, Clone)]
pub enum ExtensionError {
    /// Module enumeration failed; every `connection()` call reports the same cause
    #[error("Extension registry setup failed: {0}")]
    Setup(Arc<CorralError>),

    /// The module was not known when the registry was set up
    #[error("Unknown extension module: {0}")]
    UnknownModule(ModuleId),

    /// No module with this name was reported by the controller
    #[error("Unknown extension module: {0}")]
    UnknownName(String),

    /// The server disconnected the module's channel
    #[error("Extension module disconnected: {0}")]
    Disconnected(ModuleId),
}

/// Type registry errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// A descriptor with this name is already registered
    #[error("Type already registered: {0}")]
    Duplicate(String),

    /// A descriptor names a parent that has not been registered
    #[error("Type {name} names unknown parent {parent}")]
    UnknownParent { name: String, parent: String },

    /// No descriptor with this name
    #[error("Unknown type: {0}")]
    Unknown(String),

    /// The descriptor exists but cannot produce the requested type
    #[error("Type {name} cannot be decoded as {requested}")]
    Mismatch { name: String, requested: String },
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}
