//! Error type for session operations
//!
//! Every fatal condition surfaces as a [`SessionError`] at the controller
//! boundary and maps to a non-zero process exit code.

use crate::config::ConfigError;
use crate::session::state::SessionState;
use crate::transport::{OperationKind, TransportError};
use thiserror::Error;

/// Main error type for session lifecycle operations
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("Connect failed: {0}")]
    Connect(#[source] TransportError),

    #[error("{operation} failed: {source}")]
    Operation {
        operation: OperationKind,
        #[source]
        source: TransportError,
    },

    #[error("Cannot {operation} while the session is {state}")]
    InvalidState {
        operation: OperationKind,
        state: SessionState,
    },

    #[error("Message loop failed: {message}")]
    MessageLoop { message: String },

    #[error("Failed to install signal handlers: {0}")]
    Signal(#[source] std::io::Error),
}

impl SessionError {
    /// Create an operation error
    pub fn operation(operation: OperationKind, source: TransportError) -> Self {
        Self::Operation { operation, source }
    }

    /// Create a message loop error
    pub fn message_loop<S: Into<String>>(message: S) -> Self {
        Self::MessageLoop {
            message: message.into(),
        }
    }

    /// Process exit code for this error
    ///
    /// Configuration problems exit with 2, connect failures with 3 and every
    /// other failure with 1.
    pub fn exit_code(&self) -> i32 {
        match self {
            SessionError::Configuration(_) => 2,
            SessionError::Connect(_) => 3,
            _ => 1,
        }
    }
}
