//! Error types for the reconciliation system.
//!
//! This module provides the error hierarchy for every stage of a run:
//! configuration loading, the remote client facade, and reconciliation.
//! Reconciliation failures always carry the entity kind and natural key so a
//! host can act on them without consulting logs.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for the reconciliation system.
#[derive(Debug, Error)]
pub enum CfError {
    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Remote control plane errors raised outside of a reconciliation.
    #[error("Cloud Foundry API error: {0}")]
    Api(#[from] ApiError),

    /// Reconciliation errors.
    #[error("{0}")]
    Reconcile(#[from] ReconcileError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file was not found.
    #[error("Configuration file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The configuration file could not be parsed.
    #[error("Failed to parse configuration: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// Validation failed.
    #[error("Configuration validation failed: {message}")]
    ValidationError {
        /// Description of the validation error.
        message: String,
        /// Field that failed validation.
        field: Option<String>,
    },

    /// Environment variable is missing.
    #[error("Missing environment variable: {name}")]
    MissingEnvVar {
        /// Name of the missing variable.
        name: String,
    },

    /// Duplicate resource definition.
    #[error("Duplicate {resource_type} declaration: {name}")]
    DuplicateName {
        /// Type of resource (organization, space, ...).
        resource_type: String,
        /// The duplicated name.
        name: String,
    },
}

/// Errors reported by the remote client facade.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ApiError {
    /// Authentication failed.
    #[error("authentication failed: {message}")]
    AuthenticationFailed {
        /// Description of the auth failure.
        message: String,
    },

    /// API request failed.
    #[error("request failed: {status} - {message}")]
    RequestFailed {
        /// HTTP status code.
        status: u16,
        /// Error message from the API.
        message: String,
    },

    /// Rate limited.
    #[error("rate limited, retry after {retry_after_secs} seconds")]
    RateLimited {
        /// Seconds to wait before retrying.
        retry_after_secs: u64,
    },

    /// Network error.
    #[error("network error: {message}")]
    NetworkError {
        /// Description of the network error.
        message: String,
    },

    /// Invalid response from API.
    #[error("invalid response: {message}")]
    InvalidResponse {
        /// Description of the response issue.
        message: String,
    },

    /// A natural key lookup matched more than one record.
    #[error("{count} records share the name '{name}'")]
    Ambiguous {
        /// Looked up natural key.
        name: String,
        /// Number of matching records.
        count: usize,
    },

    /// The facade has no such operation for this kind.
    #[error("{operation} is not supported for {kind}")]
    Unsupported {
        /// Attempted operation.
        operation: String,
        /// Entity kind label.
        kind: String,
    },
}

/// Reconciliation errors.
///
/// Each variant is fatal to the invocation that raised it.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// A required referenced entity does not exist.
    #[error("{kind} '{name}' not found (required by {required_by})")]
    NotFound {
        /// Kind of the missing entity.
        kind: String,
        /// Natural key of the missing entity.
        name: String,
        /// Declaration that referenced it.
        required_by: String,
    },

    /// Declared attributes violate a required combination.
    #[error("invalid {kind} '{name}': {message}")]
    Validation {
        /// Entity kind.
        kind: String,
        /// Natural key.
        name: String,
        /// Description of the violation.
        message: String,
    },

    /// Deletion of a system-reserved entity without `force`.
    #[error("cannot delete system {kind} '{name}' without force")]
    ProtectedEntity {
        /// Entity kind.
        kind: String,
        /// Natural key.
        name: String,
    },

    /// The control plane rejected a call.
    #[error("cannot {operation} {kind} '{name}': {source}")]
    Remote {
        /// Entity kind.
        kind: String,
        /// Natural key.
        name: String,
        /// Attempted operation (lookup, create, update, delete, add, remove).
        operation: String,
        /// Underlying facade error.
        #[source]
        source: ApiError,
    },

    /// Login or session failure.
    #[error("authentication against {endpoint} failed: {source}")]
    Auth {
        /// Control plane endpoint.
        endpoint: String,
        /// Underlying facade error.
        #[source]
        source: ApiError,
    },
}

/// Result type alias for crate operations.
pub type Result<T> = std::result::Result<T, CfError>;

/// Result type alias for client facade operations.
pub type ApiResult<T> = std::result::Result<T, ApiError>;

impl CfError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Short machine-readable category for host output.
    #[must_use]
    pub const fn category(&self) -> &'static str {
        match self {
            Self::Config(_) => "config_error",
            Self::Api(ApiError::AuthenticationFailed { .. })
            | Self::Reconcile(ReconcileError::Auth { .. }) => "auth_error",
            Self::Api(_) | Self::Reconcile(ReconcileError::Remote { .. }) => "remote_error",
            Self::Reconcile(ReconcileError::NotFound { .. }) => "not_found",
            Self::Reconcile(ReconcileError::Validation { .. }) => "validation_error",
            Self::Reconcile(ReconcileError::ProtectedEntity { .. }) => "protected_entity",
            Self::Io(_) | Self::Internal(_) => "internal_error",
        }
    }
}

impl ConfigError {
    /// Creates a validation error for a specific field.
    #[must_use]
    pub fn validation(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Creates a validation error without a specific field.
    #[must_use]
    pub fn validation_general(message: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: None,
        }
    }
}

impl ApiError {
    /// Creates a request error.
    #[must_use]
    pub fn request(status: u16, message: impl Into<String>) -> Self {
        Self::RequestFailed {
            status,
            message: message.into(),
        }
    }

    /// Creates a network error.
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::NetworkError {
            message: message.into(),
        }
    }

    /// Creates an invalid response error.
    #[must_use]
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidResponse {
            message: message.into(),
        }
    }

    /// Creates an unsupported operation error.
    #[must_use]
    pub fn unsupported(operation: impl Into<String>, kind: impl Into<String>) -> Self {
        Self::Unsupported {
            operation: operation.into(),
            kind: kind.into(),
        }
    }

    /// Returns true if this error is a transient transport fault.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::NetworkError { .. })
    }

    /// Returns the suggested retry delay in seconds, if applicable.
    #[must_use]
    pub const fn retry_delay_secs(&self) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after_secs } => Some(*retry_after_secs),
            Self::NetworkError { .. } => Some(1),
            _ => None,
        }
    }

    /// Returns true for a 404 response.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::RequestFailed { status: 404, .. })
    }
}

impl ReconcileError {
    /// Creates a not-found error for a referenced entity.
    #[must_use]
    pub fn not_found(
        kind: impl Into<String>,
        name: impl Into<String>,
        required_by: impl Into<String>,
    ) -> Self {
        Self::NotFound {
            kind: kind.into(),
            name: name.into(),
            required_by: required_by.into(),
        }
    }

    /// Creates a validation error.
    #[must_use]
    pub fn validation(
        kind: impl Into<String>,
        name: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Validation {
            kind: kind.into(),
            name: name.into(),
            message: message.into(),
        }
    }

    /// Wraps a facade error with the entity and operation it interrupted.
    #[must_use]
    pub fn remote(
        kind: impl Into<String>,
        name: impl Into<String>,
        operation: impl Into<String>,
        source: ApiError,
    ) -> Self {
        Self::Remote {
            kind: kind.into(),
            name: name.into(),
            operation: operation.into(),
            source,
        }
    }

    /// Entity kind and natural key the failure concerns, if any.
    #[must_use]
    pub fn subject(&self) -> Option<(&str, &str)> {
        match self {
            Self::NotFound { kind, name, .. }
            | Self::Validation { kind, name, .. }
            | Self::ProtectedEntity { kind, name }
            | Self::Remote { kind, name, .. } => Some((kind.as_str(), name.as_str())),
            Self::Auth { .. } => None,
        }
    }

    /// Operation that failed, if the failure came from a remote call.
    #[must_use]
    pub fn operation(&self) -> Option<&str> {
        match self {
            Self::Remote { operation, .. } => Some(operation.as_str()),
            Self::ProtectedEntity { .. } => Some("delete"),
            Self::Auth { .. } => Some("login"),
            Self::NotFound { .. } | Self::Validation { .. } => None,
        }
    }
}
