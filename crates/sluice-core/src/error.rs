//! Error types for sluice
//!
//! Explicit error types with context, using thiserror.
//!
//! Admission and per-request execution errors never escape the core as
//! process-level failures; they become response statuses. Initialization
//! errors are the one class allowed to fail startup.

use thiserror::Error;

/// Result type alias for sluice operations
pub type Result<T> = std::result::Result<T, Error>;

/// Sluice error types
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Admission Errors
    // =========================================================================
    #[error("Admission rejected: queue at capacity {capacity}")]
    AdmissionRejected { capacity: usize },

    #[error("Disposed: {component}")]
    Disposed { component: String },

    // =========================================================================
    // Execution Errors
    // =========================================================================
    #[error("Execution fault: {reason}")]
    ExecutionFault { reason: String },

    // =========================================================================
    // Initialization Errors
    // =========================================================================
    #[error("Initialization failed: {reason}")]
    InitializationFailed { reason: String },

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    #[error("Invalid configuration: {field}, reason: {reason}")]
    InvalidConfiguration { field: String, reason: String },

    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {reason}")]
    Internal { reason: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Create an execution fault error
    pub fn execution_fault(reason: impl Into<String>) -> Self {
        Self::ExecutionFault {
            reason: reason.into(),
        }
    }

    /// Create an initialization failed error
    pub fn initialization_failed(reason: impl Into<String>) -> Self {
        Self::InitializationFailed {
            reason: reason.into(),
        }
    }

    /// Create a disposed error
    pub fn disposed(component: impl Into<String>) -> Self {
        Self::Disposed {
            component: component.into(),
        }
    }

    /// Create an internal error
    pub fn internal(reason: impl Into<String>) -> Self {
        Self::Internal {
            reason: reason.into(),
        }
    }

    /// Check if this error must abort startup
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::InitializationFailed { .. } | Self::InvalidConfiguration { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::initialization_failed("recipe unreachable");
        assert!(err.to_string().contains("recipe unreachable"));

        let err = Error::AdmissionRejected { capacity: 4 };
        assert!(err.to_string().contains('4'));
    }

    #[test]
    fn test_error_is_fatal() {
        assert!(Error::initialization_failed("boom").is_fatal());
        assert!(!Error::execution_fault("boom").is_fatal());
        assert!(!Error::AdmissionRejected { capacity: 1 }.is_fatal());
        assert!(!Error::disposed("admission queue").is_fatal());
    }
}
