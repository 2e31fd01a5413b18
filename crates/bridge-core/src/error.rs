//! Error types for ipc-bridge.
//!
//! Registration and removal errors are returned synchronously. Failures of an
//! in-flight `invoke` are delivered through its [`PendingResponse`](crate::PendingResponse).

use std::time::Duration;
use thiserror::Error;

/// Main error type for the bridge.
#[derive(Debug, Error)]
pub enum BridgeError {
    // Construction errors
    #[error("Invalid transport: {message}")]
    InvalidTransport { message: String },

    #[error("Runtime error: {message}")]
    Runtime { message: String },

    // Lifecycle errors
    #[error("IPC bridge instance has been destroyed")]
    InstanceDestroyed,

    #[error("A handler is already registered for command '{action}'")]
    DuplicateHandler { action: String },

    // Correlation errors
    #[error("Command '{action}' timed out after {timeout:?}")]
    Timeout { action: String, timeout: Duration },

    /// The remote command handler failed. Only its message crosses the channel.
    #[error("{message}")]
    RemoteHandler { message: String },

    // Transport errors
    #[error("Transport error: {message}")]
    Transport { message: String },

    #[error("IO error: {message}")]
    Io {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    #[error("Validation error for {field}: {message}")]
    Validation { field: String, message: String },
}

/// Result type alias for bridge operations.
pub type Result<T> = std::result::Result<T, BridgeError>;

impl From<std::io::Error> for BridgeError {
    fn from(err: std::io::Error) -> Self {
        BridgeError::Io {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        BridgeError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl BridgeError {
    /// Create a transport error from anything displayable.
    pub fn transport(message: impl std::fmt::Display) -> Self {
        BridgeError::Transport {
            message: message.to_string(),
        }
    }

    /// Check if this error is a command timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, BridgeError::Timeout { .. })
    }

    /// Check if this error was caused by a destroyed instance.
    pub fn is_destroyed(&self) -> bool {
        matches!(self, BridgeError::InstanceDestroyed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_handler_display_is_bare_message() {
        let err = BridgeError::RemoteHandler {
            message: "X".to_string(),
        };
        assert_eq!(err.to_string(), "X");
    }

    #[test]
    fn test_timeout_display_names_action() {
        let err = BridgeError::Timeout {
            action: "cm1".to_string(),
            timeout: Duration::from_millis(250),
        };
        assert!(err.to_string().contains("cm1"));
        assert!(err.is_timeout());
        assert!(!err.is_destroyed());
    }

    #[test]
    fn test_duplicate_handler_display() {
        let err = BridgeError::DuplicateHandler {
            action: "save".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "A handler is already registered for command 'save'"
        );
    }

    #[test]
    fn test_json_error_conversion() {
        let parse_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: BridgeError = parse_err.into();
        assert!(matches!(err, BridgeError::Json { .. }));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed");
        let err: BridgeError = io_err.into();
        assert!(err.to_string().contains("pipe closed"));
    }
}
