//! Error types for spillway-connect
//!
//! `ConnectError` is what the runtime (export workers, import supervisor)
//! reports to the operator. `ConnectorError` is what plugin code (decoders,
//! importers, formatters) returns.

use spillway_protocol::{ProtocolError, SourceId, StreamOffset};
use std::fmt;
use thiserror::Error;

/// Result type alias for the spillway-connect runtime
pub type Result<T> = std::result::Result<T, ConnectError>;

/// Result type alias for connector operations
pub type ConnectorResult<T> = std::result::Result<T, ConnectorError>;

/// Main error type for the spillway-connect runtime
#[derive(Error, Debug)]
pub enum ConnectError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// The producer rejected a request, or replied out of protocol
    #[error("Protocol violation on source {source_id}: {message}")]
    ProtocolViolation { source_id: SourceId, message: String },

    /// The same block was restarted more often than the retry budget allows
    #[error(
        "Source {source_id}: block at offset {offset} restarted {attempts} times, giving up: {reason}"
    )]
    RestartsExhausted {
        source_id: SourceId,
        offset: StreamOffset,
        attempts: u32,
        reason: String,
    },

    /// Transport between worker and producer failed
    #[error("Transport error: {0}")]
    Transport(String),

    /// Wire encoding error
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Connector error (from individual connectors)
    #[error(transparent)]
    Connector(#[from] ConnectorError),
}

/// Errors that can occur in connector operations
#[derive(Debug, Error)]
pub enum ConnectorError {
    /// Configuration validation failed
    #[error("configuration error: {0}")]
    Config(String),

    /// A required property is absent
    #[error("configuration error: missing required property '{0}'")]
    MissingProperty(String),

    /// Connection to external system failed
    #[error("connection error: {0}")]
    Connection(String),

    /// Malformed external record, reported under the abort policy
    #[error("format error on {resource}: {reason} (record: {record:?})")]
    Format {
        resource: String,
        record: String,
        reason: String,
    },

    /// Schema mismatch or validation error
    #[error("schema error: {0}")]
    Schema(String),

    /// Transient error that may succeed on retry
    #[error("transient error (retryable): {0}")]
    Transient(String),

    /// Fatal error that will not succeed on retry
    #[error("fatal error: {0}")]
    Fatal(String),

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML error
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl ConnectorError {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connection(_) | Self::Transient(_)
        )
    }

    /// Check if this error stems from configuration
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_) | Self::MissingProperty(_))
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a missing-property configuration error
    pub fn missing_property(name: impl Into<String>) -> Self {
        Self::MissingProperty(name.into())
    }

    /// Create a connection error
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Create a transient error
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    /// Create a fatal error
    pub fn fatal(msg: impl Into<String>) -> Self {
        Self::Fatal(msg.into())
    }
}

impl ConnectError {
    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a protocol violation error
    pub fn protocol_violation(source_id: SourceId, msg: impl Into<String>) -> Self {
        Self::ProtocolViolation {
            source_id,
            message: msg.into(),
        }
    }

    /// Create a transport error
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Check if this is a protocol violation
    pub fn is_protocol_violation(&self) -> bool {
        matches!(self, Self::ProtocolViolation { .. })
    }
}

/// Connector status for health checks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectorStatus {
    /// Running normally
    Running,
    /// Stopped (decoder stop, invalidation, shutdown)
    Stopped,
    /// Ended on an error the operator has to look at
    Failed,
}

impl fmt::Display for ConnectorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ConnectError::protocol_violation(SourceId::new(1, 2), "ack 10 != 14");
        assert_eq!(
            err.to_string(),
            "Protocol violation on source p1/t2: ack 10 != 14"
        );

        let err = ConnectorError::missing_property("path");
        assert_eq!(
            err.to_string(),
            "configuration error: missing required property 'path'"
        );
    }

    #[test]
    fn test_restarts_exhausted_display() {
        let err = ConnectError::RestartsExhausted {
            source_id: SourceId::new(0, 5),
            offset: StreamOffset::new(96),
            attempts: 4,
            reason: "sink unavailable".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("p0/t5"));
        assert!(msg.contains("offset 96"));
        assert!(msg.contains("4 times"));
    }

    #[test]
    fn test_connector_error_retryable() {
        assert!(ConnectorError::Connection("timeout".to_string()).is_retryable());
        assert!(ConnectorError::Transient("temp failure".to_string()).is_retryable());
        assert!(!ConnectorError::Config("bad config".to_string()).is_retryable());
        assert!(!ConnectorError::Fatal("unrecoverable".to_string()).is_retryable());
    }

    #[test]
    fn test_config_classification() {
        assert!(ConnectorError::missing_property("path").is_config());
        assert!(ConnectorError::config("bad delimiter").is_config());
        assert!(!ConnectorError::fatal("x").is_config());
    }
}
