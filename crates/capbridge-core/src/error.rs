//! Error types for capbridge

use thiserror::Error;

/// Main error type for capbridge operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("Bridge error: {0}")]
    Bridge(#[from] BridgeError),

    #[error("Host error: {0}")]
    Host(#[from] HostError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True when the underlying channel to the other side is gone or unresponsive.
    pub fn is_transport_failure(&self) -> bool {
        matches!(
            self,
            Error::Bridge(
                BridgeError::TransportClosed(_) | BridgeError::HostTerminated | BridgeError::Timeout
            )
        )
    }
}

/// Errors crossing the trust boundary
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Transport closed: {0}")]
    TransportClosed(String),

    #[error("Host process terminated before replying")]
    HostTerminated,

    #[error("Request timeout")]
    Timeout,

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Host rejected request: {message} (code {code})")]
    HostRejected { code: i32, message: String },
}

/// Host-side collaborator errors
#[derive(Error, Debug)]
pub enum HostError {
    #[error("Dialog failed: {0}")]
    DialogFailed(String),

    #[error("Watch error: {0}")]
    WatchFailed(String),

    #[error("Path not granted: {0}")]
    PathNotGranted(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(String),

    #[error("Invalid dialog filter {pattern:?}: {reason}")]
    InvalidFilter { pattern: String, reason: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

impl serde::Serialize for Error {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_failures_are_distinguishable() {
        assert!(Error::Bridge(BridgeError::HostTerminated).is_transport_failure());
        assert!(Error::Bridge(BridgeError::TransportClosed("gone".into())).is_transport_failure());
        assert!(Error::Bridge(BridgeError::Timeout).is_transport_failure());

        let rejected = Error::Bridge(BridgeError::HostRejected {
            code: -32603,
            message: "dialog failed".into(),
        });
        assert!(!rejected.is_transport_failure());
        assert!(!Error::Internal("x".into()).is_transport_failure());
    }

    #[test]
    fn test_error_serializes_as_message() {
        let err = Error::Host(HostError::PathNotGranted("/etc/passwd".into()));
        let json = serde_json::to_string(&err).unwrap();
        assert_eq!(json, "\"Host error: Path not granted: /etc/passwd\"");
    }
}
