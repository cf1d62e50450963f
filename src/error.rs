//! Error types for chunkscan operations
//!
//! Two error families live here. [`ScanError`] is the crate error returned by
//! configuration, reporting and scheduler bookkeeping. [`StoreError`] is what a
//! wrapped store or container reports when a read, a load or an introspection
//! fails; the scanners never propagate it, they convert it into result records.

use std::any::Any;
use thiserror::Error;

/// Main error type for chunkscan operations
#[derive(Debug, Error)]
pub enum ScanError {
    /// IO operations failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// CSV export failed
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Input validation failed
    #[error("Invalid input: {field} - {reason}. {suggestion}")]
    InvalidInput {
        field: String,
        reason: String,
        suggestion: String,
    },

    /// A coordinate or chunk shape does not match the array rank
    #[error("Incompatible dimensionality: expected {expected}, got {actual}")]
    IncompatibleDimensionality { expected: usize, actual: usize },

    /// Shape or chunk-grid description is missing or inconsistent
    #[error("Metadata error: {0}")]
    Metadata(String),

    /// Configuration validation failed
    #[error("Configuration error: {0}")]
    Config(String),

    /// Report rendering failed
    #[error("Report error: {0}")]
    Report(String),

    /// The scheduler's own bookkeeping failed
    #[error("Scheduler error: {0}")]
    Scheduler(String),
}

impl ScanError {
    /// Create an invalid input error
    pub fn invalid_input(field: impl Into<String>, reason: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::InvalidInput {
            field: field.into(),
            reason: reason.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a detailed config error
    pub fn config_error(field: impl Into<String>, reason: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Config(format!("{} - {}: {}", field.into(), reason.into(), suggestion.into()))
    }

    /// Create a metadata error
    pub fn metadata(reason: impl Into<String>) -> Self {
        Self::Metadata(reason.into())
    }

    /// Add file context to an error, preserving the original error information
    pub fn with_file_context(self, file_path: impl AsRef<std::path::Path>, operation: &str) -> Self {
        let context = format!("{} (file: {})", operation, file_path.as_ref().display());

        match self {
            Self::Io(ref err) => Self::Io(std::io::Error::new(err.kind(), format!("{}: {}", context, err))),
            Self::Config(ref msg) => Self::Config(format!("{}: {}", context, msg)),
            Self::Report(ref msg) => Self::Report(format!("{}: {}", context, msg)),
            Self::Serialization(err) => Self::Config(format!("{}: {}", context, err)),
            _ => self,
        }
    }
}

/// Failure reported by a wrapped store, element or container
///
/// `Io` carries untyped read failures whose message is classified by the
/// scanner. Stores that can tell a codec failure apart should report
/// `Decompression` directly.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Bytes could not be read
    #[error("{0}")]
    Io(String),

    /// Bytes were read but failed to decode
    #[error("{0}")]
    Decompression(String),

    /// Shape or chunk-grid description is missing or inconsistent
    #[error("{0}")]
    Metadata(String),

    /// An expected accessor or member does not exist
    #[error("{0}")]
    Missing(String),
}

impl StoreError {
    pub fn io(message: impl Into<String>) -> Self {
        Self::Io(message.into())
    }

    pub fn decompression(message: impl Into<String>) -> Self {
        Self::Decompression(message.into())
    }

    pub fn metadata(message: impl Into<String>) -> Self {
        Self::Metadata(message.into())
    }

    pub fn missing(message: impl Into<String>) -> Self {
        Self::Missing(message.into())
    }

    /// Short name of the failure class, used in structural error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Io(_) => "IOError",
            Self::Decompression(_) => "DecompressionError",
            Self::Metadata(_) => "MetadataError",
            Self::Missing(_) => "MissingError",
        }
    }

    /// The failure message without its class
    pub fn message(&self) -> &str {
        match self {
            Self::Io(msg) | Self::Decompression(msg) | Self::Metadata(msg) | Self::Missing(msg) => msg,
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Text of a caught panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Error as IoError, ErrorKind};

    #[test]
    fn test_io_error_conversion() {
        let io_error = IoError::new(ErrorKind::NotFound, "File not found");
        let scan_error: ScanError = io_error.into();

        match scan_error {
            ScanError::Io(_) => (),
            _ => panic!("Expected IO error"),
        }
    }

    #[test]
    fn test_config_error_display() {
        let error = ScanError::config_error("scheduler.max_workers", "must be greater than 0", "Use at least 1 worker");
        let display_str = format!("{}", error);
        assert_eq!(
            display_str,
            "Configuration error: scheduler.max_workers - must be greater than 0: Use at least 1 worker"
        );
    }

    #[test]
    fn test_incompatible_dimensionality_display() {
        let error = ScanError::IncompatibleDimensionality { expected: 2, actual: 3 };
        assert_eq!(error.to_string(), "Incompatible dimensionality: expected 2, got 3");
    }

    #[test]
    fn test_invalid_input_error() {
        let error = ScanError::invalid_input("budget", "cannot be 1", "Use a budget of at least 2");
        let display_str = format!("{}", error);
        assert!(display_str.contains("Invalid input: budget"));
        assert!(display_str.contains("cannot be 1"));
        assert!(display_str.contains("Use a budget of at least 2"));
    }

    #[test]
    fn test_with_file_context() {
        let error = ScanError::Config("bad value".to_string()).with_file_context("/tmp/harness.json", "load");
        assert_eq!(
            error.to_string(),
            "Configuration error: load (file: /tmp/harness.json): bad value"
        );
    }

    #[test]
    fn test_store_error_display_is_bare_message() {
        let error = StoreError::decompression("blosc: corrupt header");
        assert_eq!(error.to_string(), "blosc: corrupt header");
        assert_eq!(error.type_name(), "DecompressionError");
        assert_eq!(error.message(), "blosc: corrupt header");
    }

    #[test]
    fn test_panic_message_downcasts_payloads() {
        let literal = std::panic::catch_unwind(|| panic!("bad header")).unwrap_err();
        assert_eq!(panic_message(literal.as_ref()), "bad header");

        let formatted = std::panic::catch_unwind(|| panic!("chunk {} truncated", 3)).unwrap_err();
        assert_eq!(panic_message(formatted.as_ref()), "chunk 3 truncated");

        let opaque = std::panic::catch_unwind(|| std::panic::panic_any(42u8)).unwrap_err();
        assert_eq!(panic_message(opaque.as_ref()), "unknown panic payload");
    }

    #[test]
    fn test_store_error_from_io() {
        let error: StoreError = IoError::new(ErrorKind::UnexpectedEof, "short read").into();
        assert_eq!(error, StoreError::Io("short read".to_string()));
    }
}
