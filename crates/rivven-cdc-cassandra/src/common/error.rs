//! Error types for Cassandra CDC operations
//!
//! Includes error classification so callers can tell a stopping pipeline
//! (`Cancelled`) apart from a processing failure, and so metrics can be
//! labelled by category.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error categories for metrics and alerting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Commit log reading and decoding
    Replication,
    /// Schema lookups and type mapping
    Schema,
    /// Invalid settings
    Configuration,
    /// Broker emission
    Emission,
    /// Filesystem errors (relocation, offsets)
    Storage,
    /// Serialization errors (JSON, YAML)
    Serialization,
    /// Pipeline shutdown
    Lifecycle,
    /// Other/unknown errors
    Other,
}

/// CDC-specific errors
#[derive(Error, Debug)]
pub enum CdcError {
    /// Commit log segment could not be read
    #[error("Replication error: {0}")]
    Replication(String),

    /// A single cell or mutation could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// Column type tag has no registered deserializer
    #[error("Unsupported type: {0}")]
    UnsupportedType(String),

    /// Schema lookup error
    #[error("Schema error: {0}")]
    Schema(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Broker emission failed
    #[error("Emit error: {0}")]
    Emit(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML configuration error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Timeout error
    #[error("Timeout: {0}")]
    Timeout(String),

    /// The pipeline is shutting down
    #[error("Cancelled: pipeline is shutting down")]
    Cancelled,

    /// Invalid state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl CdcError {
    /// Create a new replication error
    pub fn replication(msg: impl Into<String>) -> Self {
        Self::Replication(msg.into())
    }

    /// Create a new decode error
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    /// Create an unsupported type error
    pub fn unsupported_type(type_tag: impl Into<String>) -> Self {
        Self::UnsupportedType(type_tag.into())
    }

    /// Create a new schema error
    pub fn schema(msg: impl Into<String>) -> Self {
        Self::Schema(msg.into())
    }

    /// Create a new config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new emit error
    pub fn emit(msg: impl Into<String>) -> Self {
        Self::Emit(msg.into())
    }

    /// Create a new serialization error
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Create a timeout error
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// Create an invalid state error
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    /// Create a generic error
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// True when the error signals pipeline shutdown rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Check if this error is retriable.
    ///
    /// Returns true for transient errors that may succeed on retry.
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::Timeout(_) | Self::Emit(_) => true,

            Self::Io(e) => {
                use std::io::ErrorKind;
                matches!(
                    e.kind(),
                    ErrorKind::ConnectionReset
                        | ErrorKind::ConnectionAborted
                        | ErrorKind::TimedOut
                        | ErrorKind::Interrupted
                        | ErrorKind::WouldBlock
                )
            }

            Self::Replication(_)
            | Self::Decode(_)
            | Self::UnsupportedType(_)
            | Self::Schema(_)
            | Self::Config(_)
            | Self::Serialization(_)
            | Self::Json(_)
            | Self::Yaml(_)
            | Self::Cancelled
            | Self::InvalidState(_)
            | Self::Other(_) => false,
        }
    }

    /// Get the error category for metrics and alerting.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Replication(_) | Self::Decode(_) => ErrorCategory::Replication,
            Self::UnsupportedType(_) | Self::Schema(_) => ErrorCategory::Schema,
            Self::Config(_) | Self::Yaml(_) => ErrorCategory::Configuration,
            Self::Emit(_) | Self::Timeout(_) => ErrorCategory::Emission,
            Self::Io(_) => ErrorCategory::Storage,
            Self::Serialization(_) | Self::Json(_) => ErrorCategory::Serialization,
            Self::Cancelled => ErrorCategory::Lifecycle,
            Self::InvalidState(_) | Self::Other(_) => ErrorCategory::Other,
        }
    }

    /// Get a metric-safe error code.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Replication(_) => "replication_error",
            Self::Decode(_) => "decode_error",
            Self::UnsupportedType(_) => "unsupported_type",
            Self::Schema(_) => "schema_error",
            Self::Config(_) => "config_error",
            Self::Emit(_) => "emit_error",
            Self::Serialization(_) => "serialization_error",
            Self::Json(_) => "json_error",
            Self::Yaml(_) => "yaml_error",
            Self::Io(_) => "io_error",
            Self::Timeout(_) => "timeout",
            Self::Cancelled => "cancelled",
            Self::InvalidState(_) => "invalid_state",
            Self::Other(_) => "unknown",
        }
    }
}

/// Result type for CDC operations
pub type Result<T> = std::result::Result<T, CdcError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CdcError::replication("truncated segment");
        assert!(err.to_string().contains("Replication error"));
        assert!(err.to_string().contains("truncated segment"));

        let err = CdcError::unsupported_type("org.example.CustomType");
        assert_eq!(err.to_string(), "Unsupported type: org.example.CustomType");
    }

    #[test]
    fn test_cancelled_is_distinct() {
        assert!(CdcError::Cancelled.is_cancelled());
        assert!(!CdcError::decode("bad cell").is_cancelled());
        assert!(!CdcError::Cancelled.is_retriable());
        assert_eq!(CdcError::Cancelled.category(), ErrorCategory::Lifecycle);
    }

    #[test]
    fn test_error_is_retriable() {
        assert!(CdcError::timeout("5s").is_retriable());
        assert!(CdcError::emit("broker unavailable").is_retriable());
        assert!(CdcError::Io(std::io::Error::from(std::io::ErrorKind::TimedOut)).is_retriable());

        assert!(!CdcError::config("bad config").is_retriable());
        assert!(!CdcError::unsupported_type("custom").is_retriable());
        assert!(!CdcError::Io(std::io::Error::from(std::io::ErrorKind::NotFound)).is_retriable());
    }

    #[test]
    fn test_error_category() {
        assert_eq!(
            CdcError::replication("x").category(),
            ErrorCategory::Replication
        );
        assert_eq!(CdcError::decode("x").category(), ErrorCategory::Replication);
        assert_eq!(
            CdcError::unsupported_type("x").category(),
            ErrorCategory::Schema
        );
        assert_eq!(
            CdcError::config("x").category(),
            ErrorCategory::Configuration
        );
        assert_eq!(CdcError::timeout("x").category(), ErrorCategory::Emission);
        assert_eq!(CdcError::other("x").category(), ErrorCategory::Other);
    }

    #[test]
    fn test_error_code() {
        assert_eq!(CdcError::Cancelled.error_code(), "cancelled");
        assert_eq!(CdcError::timeout("x").error_code(), "timeout");
        assert_eq!(CdcError::unsupported_type("x").error_code(), "unsupported_type");
    }
}
