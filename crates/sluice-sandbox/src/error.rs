//! Error types for sandbox operations
//!
//! Explicit error variants with context.

use std::fmt;

/// Result type for sandbox operations
pub type SandboxResult<T> = Result<T, SandboxError>;

/// Sandbox errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SandboxError {
    /// The backend code raised a fault during a run
    ExecutionFault { reason: String },

    /// Execution exceeded its time budget and was killed
    ExecTimeout { timeout_ms: u64 },

    /// Execution produced more output than allowed; `size` counts the bytes
    /// read before the execution was stopped
    OutputTooLarge { size: usize, limit: usize },

    /// No entrypoint is installed yet
    NotInstalled,

    /// Bundle path is absolute or escapes the backend directory
    InvalidBundlePath { path: String },

    /// Installing the bundle failed
    InstallFailed { path: String, reason: String },

    /// IO error
    IoError { reason: String },
}

impl fmt::Display for SandboxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ExecutionFault { reason } => {
                write!(f, "backend execution fault: {}", reason)
            }
            Self::ExecTimeout { timeout_ms } => {
                write!(f, "backend execution timed out after {}ms", timeout_ms)
            }
            Self::OutputTooLarge { size, limit } => {
                write!(
                    f,
                    "backend output too large: {} bytes read (limit: {} bytes)",
                    size, limit
                )
            }
            Self::NotInstalled => write!(f, "no backend entrypoint installed"),
            Self::InvalidBundlePath { path } => {
                write!(f, "invalid bundle path: {}", path)
            }
            Self::InstallFailed { path, reason } => {
                write!(f, "failed to install {}: {}", path, reason)
            }
            Self::IoError { reason } => {
                write!(f, "IO error: {}", reason)
            }
        }
    }
}

impl std::error::Error for SandboxError {}

impl From<std::io::Error> for SandboxError {
    fn from(err: std::io::Error) -> Self {
        Self::IoError {
            reason: err.to_string(),
        }
    }
}

impl SandboxError {
    /// Check if this error came out of installing a bundle
    pub fn is_install_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidBundlePath { .. } | Self::InstallFailed { .. }
        )
    }
}

impl From<SandboxError> for sluice_core::Error {
    fn from(err: SandboxError) -> Self {
        if err.is_install_error() {
            sluice_core::Error::InitializationFailed {
                reason: err.to_string(),
            }
        } else {
            sluice_core::Error::ExecutionFault {
                reason: err.to_string(),
            }
        }
    }
}
