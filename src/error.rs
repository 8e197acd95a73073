use crate::device::DeviceState;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Coarse classification of a failure, used for recovery routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// The backend did not respond within the configured deadline.
    BackendTimeout,
    /// The backend's supervising daemon is stuck in internal synchronization.
    WedgedBackend,
    /// The supervising process is gone but the backend never reflected shutdown.
    ZombieDevice,
    /// The backend does not implement the requested operation.
    UnsupportedOperation,
    /// The backend understood the request and refused it.
    BackendRejected,
    /// An apparent success whose post-condition could not be observed.
    InconsistentState,
    /// Anything the backend reported that we could not classify.
    Unknown,
}

impl ErrorCategory {
    /// Whether the shutdown recovery machine can act on this failure.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ErrorCategory::BackendTimeout
                | ErrorCategory::WedgedBackend
                | ErrorCategory::ZombieDevice
        )
    }
}

#[derive(Error, Debug)]
pub enum SimguardError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("operation '{operation}' timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("backend wedged during '{operation}': {message}")]
    Wedged {
        operation: &'static str,
        message: String,
    },

    #[error("zombie device session during '{operation}': {message}")]
    Zombie {
        operation: &'static str,
        message: String,
    },

    #[error("operation '{operation}' is unsupported by the backend: {message}")]
    Unsupported {
        operation: &'static str,
        message: String,
    },

    #[error("backend rejected '{operation}': {message}")]
    Rejected {
        operation: &'static str,
        message: String,
        underlying: Option<String>,
    },

    #[error("inconsistent state after '{operation}': {message}")]
    Inconsistent {
        operation: &'static str,
        message: String,
    },

    #[error("unknown backend failure in '{operation}': {message}")]
    Unknown {
        operation: &'static str,
        message: String,
        underlying: Option<String>,
    },

    #[error("invalid device state transition {from:?} -> {to:?}")]
    IllegalTransition { from: DeviceState, to: DeviceState },

    #[error("invalid path {path:?}: {reason}")]
    InvalidPath { path: PathBuf, reason: String },

    #[error("shutdown failed after {attempts} attempts: {message}")]
    ShutdownExhausted { attempts: u32, message: String },
}

impl SimguardError {
    pub fn timeout(operation: &'static str, after: Duration) -> Self {
        Self::Timeout { operation, after }
    }

    pub fn wedged<S: Into<String>>(operation: &'static str, message: S) -> Self {
        Self::Wedged {
            operation,
            message: message.into(),
        }
    }

    pub fn zombie<S: Into<String>>(operation: &'static str, message: S) -> Self {
        Self::Zombie {
            operation,
            message: message.into(),
        }
    }

    pub fn unsupported<S: Into<String>>(operation: &'static str, message: S) -> Self {
        Self::Unsupported {
            operation,
            message: message.into(),
        }
    }

    pub fn rejected<S: Into<String>>(
        operation: &'static str,
        message: S,
        underlying: Option<String>,
    ) -> Self {
        Self::Rejected {
            operation,
            message: message.into(),
            underlying,
        }
    }

    pub fn inconsistent<S: Into<String>>(operation: &'static str, message: S) -> Self {
        Self::Inconsistent {
            operation,
            message: message.into(),
        }
    }

    pub fn unknown<S: Into<String>>(
        operation: &'static str,
        message: S,
        underlying: Option<String>,
    ) -> Self {
        Self::Unknown {
            operation,
            message: message.into(),
            underlying,
        }
    }

    pub fn invalid_path<P: Into<PathBuf>, S: Into<String>>(path: P, reason: S) -> Self {
        Self::InvalidPath {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Map this error onto the recovery taxonomy.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Timeout { .. } => ErrorCategory::BackendTimeout,
            Self::Wedged { .. } => ErrorCategory::WedgedBackend,
            Self::Zombie { .. } => ErrorCategory::ZombieDevice,
            Self::Unsupported { .. } => ErrorCategory::UnsupportedOperation,
            Self::Rejected { .. } => ErrorCategory::BackendRejected,
            Self::Inconsistent { .. } | Self::IllegalTransition { .. } => {
                ErrorCategory::InconsistentState
            }
            _ => ErrorCategory::Unknown,
        }
    }

    pub fn is_recoverable(&self) -> bool {
        self.category().is_recoverable()
    }

    /// The raw backend error payload, when one was supplied.
    pub fn underlying(&self) -> Option<&str> {
        match self {
            Self::Rejected { underlying, .. } | Self::Unknown { underlying, .. } => {
                underlying.as_deref()
            }
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, SimguardError>;
