//! Error types for Hono device operations
//!
//! Each layer has its own error enum. [`DeviceError`] collects them for
//! callers that drive the whole stack, such as the CLI.

use crate::config::ConfigError;
use crate::session::SessionError;
use crate::transport::TransportError;
use thiserror::Error;

/// Main error type for device operations
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },
}

impl DeviceError {
    /// Create invalid input error
    pub fn invalid_input<S: Into<String>>(message: S) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Whether retrying the same operation could succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            DeviceError::Transport(e) | DeviceError::Session(SessionError::Transport(e)) => {
                matches!(
                    e,
                    TransportError::ConnectionFailed(_)
                        | TransportError::NotConnected
                        | TransportError::Timeout(_)
                )
            }
            DeviceError::Session(SessionError::Timeout(_)) => true,
            _ => false,
        }
    }

    /// Process exit status for the CLI: `EX_TEMPFAIL` (75) when a retry
    /// could succeed, 1 otherwise
    pub fn exit_code(&self) -> i32 {
        if self.is_retryable() {
            75
        } else {
            1
        }
    }
}

/// Result type for device operations
pub type DeviceResult<T> = Result<T, DeviceError>;
