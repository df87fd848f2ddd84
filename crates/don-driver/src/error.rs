//! Error types for the OVS network driver

use thiserror::Error;

/// Failure of a lifecycle operation
#[derive(Error, Debug)]
pub enum DriverError {
    /// Options that cannot describe a network (unknown mode, malformed values)
    #[error("Invalid network configuration: {0}")]
    InvalidConfiguration(String),

    /// Network unknown locally and not recoverable from the Docker registry
    #[error("Not found: {0}")]
    NotFound(String),

    /// OVSDB or the Docker daemon could not be reached at startup
    #[error("Dependency unavailable: {0}")]
    DependencyUnavailable(String),

    /// A switch or kernel mutation failed
    #[error("Failed to {operation} {target}: {source:#}")]
    OperationFailed {
        operation: &'static str,
        target: String,
        #[source]
        source: anyhow::Error,
    },
}

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, DriverError>;

impl DriverError {
    /// Create an invalid configuration error
    pub fn invalid(msg: impl Into<String>) -> Self {
        DriverError::InvalidConfiguration(msg.into())
    }

    /// Create a not found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        DriverError::NotFound(msg.into())
    }

    /// Wrap a dependency failure with the identifier it concerns
    pub fn operation(
        operation: &'static str,
        target: impl Into<String>,
        source: impl Into<anyhow::Error>,
    ) -> Self {
        DriverError::OperationFailed {
            operation,
            target: target.into(),
            source: source.into(),
        }
    }

    /// Short machine-readable category
    pub fn kind(&self) -> &'static str {
        match self {
            DriverError::InvalidConfiguration(_) => "invalid_configuration",
            DriverError::NotFound(_) => "not_found",
            DriverError::DependencyUnavailable(_) => "dependency_unavailable",
            DriverError::OperationFailed { .. } => "operation_failed",
        }
    }
}
