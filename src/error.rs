//! Error types for the Halldyll VPN gateway orchestrator.
//!
//! This module provides the error hierarchy for every stage of a run:
//! configuration and graph construction, provider calls, planning,
//! provisioning, and state storage.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// The main error type for the orchestrator.
#[derive(Debug, Error)]
pub enum VpnError {
    /// Configuration-related errors, including graph construction errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Cloud provider errors.
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Planning errors.
    #[error("Planning error: {0}")]
    Plan(#[from] PlanError),

    /// Provisioning errors.
    #[error("Provisioning error: {0}")]
    Provision(#[from] ProvisionError),

    /// State management errors.
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration errors.
///
/// All of these are detected before any provider call and are never retried.
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

    /// A (kind, key) pair was declared twice.
    #[error("Duplicate {kind} key: {key}")]
    DuplicateKey {
        /// Resource kind.
        kind: String,
        /// The duplicated logical key.
        key: String,
    },

    /// A reference points at a node that does not exist or has the wrong kind.
    #[error("{from} references {target}, which {reason}")]
    InvalidReference {
        /// Referencing node.
        from: String,
        /// Referenced node.
        target: String,
        /// Why the reference is invalid.
        reason: String,
    },

    /// Circular dependency detected.
    #[error("Circular dependency detected: {cycle}")]
    CyclicDependency {
        /// Description of the cycle.
        cycle: String,
    },
}

/// Whether a provider failure is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Retry with backoff.
    Transient,
    /// Fail the node immediately.
    Permanent,
}

/// Errors returned by a cloud provider.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// The request timed out.
    #[error("Request timed out: {message}")]
    Timeout {
        /// Description of the timeout.
        message: String,
    },

    /// Rate limited.
    #[error("Rate limited, retry after {retry_after_secs} seconds")]
    RateLimited {
        /// Seconds to wait before retrying.
        retry_after_secs: u64,
    },

    /// Another operation is modifying the same resource.
    #[error("Conflicting concurrent modification: {message}")]
    Conflict {
        /// Description of the conflict.
        message: String,
    },

    /// Network error.
    #[error("Network error: {message}")]
    Network {
        /// Description of the network error.
        message: String,
    },

    /// The provider failed internally.
    #[error("Provider server error {status}: {message}")]
    ServerError {
        /// HTTP status code.
        status: u16,
        /// Error message from the provider.
        message: String,
    },

    /// A property value was rejected.
    #[error("Invalid property value: {message}")]
    InvalidProperty {
        /// Description of the rejected value.
        message: String,
    },

    /// Subscription quota exceeded.
    #[error("Quota exceeded: {message}")]
    QuotaExceeded {
        /// Description of the quota issue.
        message: String,
    },

    /// The resource name is already taken.
    #[error("Resource name already in use: {name}")]
    NameCollision {
        /// The colliding name.
        name: String,
    },

    /// Authentication failed.
    #[error("Authentication failed: {message}")]
    Authentication {
        /// Description of the auth failure.
        message: String,
    },

    /// The resource reached a terminal failed provisioning state.
    #[error("Provisioning failed: {message}")]
    ProvisioningFailed {
        /// Provider-reported failure.
        message: String,
    },

    /// Invalid response from the provider.
    #[error("Invalid response from provider: {message}")]
    InvalidResponse {
        /// Description of the response issue.
        message: String,
    },
}

/// Planning errors.
#[derive(Debug, Error)]
pub enum PlanError {
    /// A reference was resolved before its target reached `Created`.
    #[error("Reference to {reference} is not resolved yet")]
    UnresolvedReference {
        /// The referenced node.
        reference: String,
    },

    /// Topology was modified after finalization.
    #[error("Graph topology is frozen; cannot add {node}")]
    TopologyFrozen {
        /// Node that was being added.
        node: String,
    },

    /// The resolver was given a graph that has not been finalized.
    #[error("Graph must be finalized before planning")]
    GraphNotFinalized,
}

/// Provisioning errors.
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// A node failed to provision.
    #[error("Failed to provision {node}: {reason}")]
    ProvisioningFailure {
        /// Node that failed.
        node: String,
        /// Reason for failure.
        reason: String,
    },

    /// Outputs were requested from a graph that has not converged.
    #[error("Graph has not converged; unresolved nodes: {}", nodes.join(", "))]
    IncompleteGraph {
        /// Nodes that are not `Created`.
        nodes: Vec<String>,
    },

    /// The run was cancelled before it could finish.
    #[error("Run aborted: {reason}")]
    Aborted {
        /// Why the run stopped.
        reason: String,
    },
}

/// State management errors.
#[derive(Debug, Error)]
pub enum StateError {
    /// State is corrupted.
    #[error("State is corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// State could not be written.
    #[error("Failed to write state: {message}")]
    WriteFailed {
        /// Description of the write failure.
        message: String,
    },

    /// Serialization error.
    #[error("State serialization error: {message}")]
    SerializationError {
        /// Description of the serialization error.
        message: String,
    },

    /// State version mismatch.
    #[error("State version mismatch: expected {expected}, found {found}")]
    VersionMismatch {
        /// Expected state version.
        expected: String,
        /// Found state version.
        found: String,
    },
}

/// Result type alias for orchestrator operations.
pub type Result<T> = std::result::Result<T, VpnError>;

impl VpnError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns true if this error was raised by configuration or graph checks.
    #[must_use]
    pub const fn is_configuration(&self) -> bool {
        matches!(self, Self::Config(_))
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
}

impl ProviderError {
    /// Classifies this error as transient or permanent.
    #[must_use]
    pub const fn class(&self) -> ErrorClass {
        match self {
            Self::Timeout { .. }
            | Self::RateLimited { .. }
            | Self::Conflict { .. }
            | Self::Network { .. }
            | Self::ServerError { .. } => ErrorClass::Transient,
            Self::InvalidProperty { .. }
            | Self::QuotaExceeded { .. }
            | Self::NameCollision { .. }
            | Self::Authentication { .. }
            | Self::ProvisioningFailed { .. }
            | Self::InvalidResponse { .. } => ErrorClass::Permanent,
        }
    }

    /// Returns true if this error is retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self.class(), ErrorClass::Transient)
    }

    /// Returns the provider-suggested minimum delay before retrying.
    #[must_use]
    pub const fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after_secs } => Some(Duration::from_secs(*retry_after_secs)),
            _ => None,
        }
    }

    /// Short name of the error kind, used in run reports.
    #[must_use]
    pub const fn kind_name(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "timeout",
            Self::RateLimited { .. } => "rate_limited",
            Self::Conflict { .. } => "conflict",
            Self::Network { .. } => "network",
            Self::ServerError { .. } => "server_error",
            Self::InvalidProperty { .. } => "invalid_property",
            Self::QuotaExceeded { .. } => "quota_exceeded",
            Self::NameCollision { .. } => "name_collision",
            Self::Authentication { .. } => "authentication",
            Self::ProvisioningFailed { .. } => "provisioning_failed",
            Self::InvalidResponse { .. } => "invalid_response",
        }
    }

    /// Creates a network error.
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Creates an invalid-response error.
    #[must_use]
    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::InvalidResponse {
            message: message.into(),
        }
    }
}

impl StateError {
    /// Creates a serialization error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::SerializationError {
            message: message.into(),
        }
    }
}
