//! Error types for the Meridian core runtime.
//!
//! [`CoreError`] separates recoverable conditions (a bad frame, an unknown
//! RPC target, a failed argument conversion) from programming errors in
//! service code. Recoverable errors are logged and the offending unit of work
//! is skipped; fatal ones abort the operation that triggered them and surface
//! from [`Host::tick`](crate::host::Host::tick).

use crate::types::EntityId;

/// Misuse of the entity/component store.
///
/// Every variant indicates a bug in the calling service, so all of them are
/// fatal.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ComponentMisuse {
    #[error("component '{component}' is already bound to entity {entity}")]
    AlreadyBound {
        entity: EntityId,
        component: &'static str,
    },
    #[error("component '{component}' of entity {entity} was used after it was invalidated")]
    Invalidated {
        entity: EntityId,
        component: &'static str,
    },
    #[error("entity {0} does not exist")]
    UnknownEntity(EntityId),
    #[error("'{operation}' is only allowed on the authoritative side")]
    NotAuthoritative { operation: &'static str },
}

/// Errors produced by the core runtime.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),
    #[error("Unknown RPC target '{service}.{method}'")]
    UnknownTarget { service: String, method: String },
    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),
    #[error("Argument {index} ('{token}') cannot be converted to {expected}")]
    ArgumentConversion {
        index: usize,
        expected: &'static str,
        token: String,
    },
    #[error("Component misuse: {0}")]
    ComponentMisuse(#[from] ComponentMisuse),
    #[error("Service configuration error: {0}")]
    ServiceConfiguration(String),
    #[error("Invalid data: {0}")]
    InvalidData(String),
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Host is not running")]
    NotRunning,
}

impl CoreError {
    /// Whether this error reflects a programming error that must abort the
    /// triggering operation instead of being logged and skipped.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CoreError::ComponentMisuse(_) | CoreError::ServiceConfiguration(_)
        )
    }
}

/// Result alias used across the core crate.
pub type Result<T, E = CoreError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn misuse_and_configuration_are_fatal() {
        let misuse: CoreError = ComponentMisuse::UnknownEntity(EntityId::new()).into();
        assert!(misuse.is_fatal());
        assert!(CoreError::ServiceConfiguration("dup".into()).is_fatal());
        assert!(!CoreError::MalformedFrame("x".into()).is_fatal());
        assert!(!CoreError::UnknownTarget {
            service: "A".into(),
            method: "B".into()
        }
        .is_fatal());
    }
}
