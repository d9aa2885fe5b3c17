//! Error types for the waymark bridge.
//!
//! The variants follow the failure taxonomy the bridge cares about: an engine
//! that has not loaded yet, a cross-origin read, an object that looked like a
//! map but failed on use, and a host that lacks a rendering primitive. None of
//! them is fatal; callers log and move on to the next instance or tick.

use std::path::PathBuf;
use thiserror::Error;

use crate::host::HostError;

/// Main error type for the bridge.
#[derive(Debug, Error)]
pub enum BridgeError {
    // Expected, retried next tick
    #[error("Engine not present yet: {engine}")]
    EngineAbsent { engine: String },

    #[error("Cross-context access denied: {message}")]
    CrossContext { message: String },

    // Candidate objects
    #[error("Malformed instance: {message}")]
    MalformedInstance { message: String },

    #[error("Host API missing: {primitive}")]
    HostApiMissing { primitive: String },

    // Data validation
    #[error("Invalid bounds: {message}")]
    InvalidBounds { message: String },

    #[error("Unknown registry entry: {id}")]
    UnknownEntry { id: String },

    // Host access failures that don't fit a more specific bucket
    #[error("Host error: {0}")]
    Host(#[source] HostError),

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    // Generic errors
    #[error("{0}")]
    Other(String),
}

/// Result type alias for bridge operations.
pub type Result<T> = std::result::Result<T, BridgeError>;

impl From<std::io::Error> for BridgeError {
    fn from(err: std::io::Error) -> Self {
        BridgeError::Io {
            message: err.to_string(),
            path: None,
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

impl From<HostError> for BridgeError {
    fn from(err: HostError) -> Self {
        match err {
            HostError::AccessDenied(message) => BridgeError::CrossContext { message },
            HostError::Unsupported(primitive) => BridgeError::HostApiMissing { primitive },
            other => BridgeError::Host(other),
        }
    }
}

impl BridgeError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        BridgeError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Create a malformed-instance error from anything printable.
    pub fn malformed(message: impl Into<String>) -> Self {
        BridgeError::MalformedInstance {
            message: message.into(),
        }
    }

    /// Errors that are part of normal operation and should not be logged
    /// above debug level. The next scheduled tick retries them.
    pub fn is_expected(&self) -> bool {
        matches!(
            self,
            BridgeError::EngineAbsent { .. } | BridgeError::CrossContext { .. }
        )
    }

    /// Errors that mean "this candidate object is not usable", as opposed to
    /// a problem with the bridge or the host as a whole.
    pub fn is_candidate_error(&self) -> bool {
        matches!(
            self,
            BridgeError::MalformedInstance { .. }
                | BridgeError::InvalidBounds { .. }
                | BridgeError::Host(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BridgeError::EngineAbsent {
            engine: "EngineA".to_string(),
        };
        assert_eq!(err.to_string(), "Engine not present yet: EngineA");

        let err = BridgeError::InvalidBounds {
            message: "north is NaN".to_string(),
        };
        assert_eq!(err.to_string(), "Invalid bounds: north is NaN");
    }

    #[test]
    fn test_host_error_conversion() {
        let err: BridgeError = HostError::AccessDenied("frame 3".to_string()).into();
        assert!(matches!(err, BridgeError::CrossContext { .. }));
        assert!(err.is_expected());

        let err: BridgeError = HostError::Unsupported("canvas".to_string()).into();
        assert!(matches!(err, BridgeError::HostApiMissing { .. }));
        assert!(!err.is_expected());

        let err: BridgeError = HostError::Threw {
            method: "getBounds".to_string(),
            message: "boom".to_string(),
        }
        .into();
        assert!(err.is_candidate_error());
    }

    #[test]
    fn test_json_error_conversion() {
        let parse = serde_json::from_str::<serde_json::Value>("{not json");
        let err: BridgeError = parse.unwrap_err().into();
        assert!(matches!(err, BridgeError::Json { .. }));
    }
}
