//! Error types for the network layer.
//!
//! Runtime errors from the host are wrapped so that callers of the server
//! only have one error type to match on.

use meridian_core::CoreError;

/// Enumeration of possible server errors.
///
/// Categorizes errors into network-related and internal server errors
/// to help with debugging and error handling.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Binding, accepting, WebSocket upgrade or upstream connection failures
    #[error("Network error: {0}")]
    Network(String),

    /// Failures raised by the host or its services
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<CoreError> for ServerError {
    fn from(error: CoreError) -> Self {
        match error {
            CoreError::Transport(msg) => ServerError::Network(msg),
            other => ServerError::Internal(other.to_string()),
        }
    }
}

impl From<std::io::Error> for ServerError {
    fn from(error: std::io::Error) -> Self {
        ServerError::Network(error.to_string())
    }
}
