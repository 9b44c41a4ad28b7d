//! # Error Handling
//!
//! Error types for meterbase operations.
//!
//! ## Taxonomy
//!
//! 1. **Codec**: malformed keys, escapes, or values. Always surfaced.
//! 2. **Query**: unsupported operators, malformed filter text, missing meter
//!    specifiers. Surfaced before any backend round trip where possible.
//! 3. **Schema**: table lifecycle. `TableExists` is benign during schema
//!    creation and is logged by callers instead of raised.
//! 4. **Backend**: anything coming back across the `Table`/`Connection`
//!    boundary, propagated as-is.

use thiserror::Error;

/// Result type alias for meterbase operations
pub type Result<T> = std::result::Result<T, Error>;

/// Primary error type for meterbase
#[derive(Error, Debug)]
pub enum Error {
    // Codec Errors
    #[error("Codec error: {message}")]
    Codec { message: String },

    #[error("Unsupported metadata type {type_name} at key '{key}'")]
    UnsupportedMetadataType { key: String, type_name: &'static str },

    // Query Errors
    #[error("{filter} does not support the {op} operator")]
    UnsupportedOperator { filter: &'static str, op: String },

    #[error("Missing required meter specifier")]
    MissingMeterSpecifier,

    #[error("Invalid filter expression at offset {offset}: {message}")]
    InvalidFilter { offset: usize, message: String },

    // Schema Errors
    #[error("Table {table} already exists")]
    TableExists { table: String },

    #[error("Table {table} not found")]
    TableNotFound { table: String },

    // Backend Errors
    #[error("Backend error: {message}")]
    Backend { message: String, source: Option<Box<dyn std::error::Error + Send + Sync>> },

    // System Errors
    #[error("IO error: {message}")]
    Io { message: String, source: std::io::Error },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl Error {
    pub fn codec(message: impl Into<String>) -> Self {
        Error::Codec { message: message.into() }
    }

    pub fn unsupported_operator(filter: &'static str, op: impl ToString) -> Self {
        Error::UnsupportedOperator { filter, op: op.to_string() }
    }

    /// Check if error is recoverable
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::TableExists { .. } => true,
            Error::UnsupportedMetadataType { .. } => true,
            Error::Backend { .. } => true,
            Error::Codec { .. } => false,
            Error::Io { .. } => false,
            _ => false,
        }
    }

    /// Get error code for monitoring
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::Codec { .. } => "CODEC_ERROR",
            Error::UnsupportedMetadataType { .. } => "UNSUPPORTED_METADATA_TYPE",
            Error::UnsupportedOperator { .. } => "UNSUPPORTED_OPERATOR",
            Error::MissingMeterSpecifier => "MISSING_METER_SPECIFIER",
            Error::InvalidFilter { .. } => "INVALID_FILTER",
            Error::TableExists { .. } => "TABLE_EXISTS",
            Error::TableNotFound { .. } => "TABLE_NOT_FOUND",
            Error::Backend { .. } => "BACKEND_ERROR",
            Error::Io { .. } => "IO_ERROR",
            Error::Configuration { .. } => "CONFIG_ERROR",
            Error::Internal { .. } => "INTERNAL_ERROR",
        }
    }
}

// Conversion from std::io::Error
impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io {
            message: err.to_string(),
            source: err,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Codec {
            message: format!("invalid JSON value: {}", err),
        }
    }
}

/// Extension trait for adding context to results
pub trait ResultExt<T> {
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| {
            let prefix = |message: String| format!("{}: {}", f(), message);
            match e {
                Error::Codec { message } => Error::Codec { message: prefix(message) },
                Error::InvalidFilter { offset, message } => Error::InvalidFilter {
                    offset,
                    message: prefix(message),
                },
                Error::Backend { message, source } => Error::Backend {
                    message: prefix(message),
                    source,
                },
                Error::Io { message, source } => Error::Io {
                    message: prefix(message),
                    source,
                },
                Error::Configuration { message } => Error::Configuration { message: prefix(message) },
                Error::Internal { message } => Error::Internal { message: prefix(message) },
                // Structured variants pass through
                other => other,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(Error::MissingMeterSpecifier.error_code(), "MISSING_METER_SPECIFIER");
        assert_eq!(Error::codec("bad").error_code(), "CODEC_ERROR");
        assert_eq!(
            Error::unsupported_operator("RowFilter", ">").to_string(),
            "RowFilter does not support the > operator"
        );
    }

    #[test]
    fn test_recoverable() {
        assert!(Error::TableExists { table: "meter".into() }.is_recoverable());
        assert!(!Error::codec("bad escape").is_recoverable());
    }

    #[test]
    fn test_context_keeps_codec_kind() {
        let res: Result<()> = Err(Error::codec("truncated escape"));
        let err = res.with_context(|| "row key".to_string()).unwrap_err();
        assert!(matches!(err, Error::Codec { .. }));
        assert_eq!(err.to_string(), "Codec error: row key: truncated escape");
    }

    #[test]
    fn test_context_keeps_variant() {
        let res: Result<()> = Err(Error::unsupported_operator("RowFilter", ">"));
        let err = res.with_context(|| "scan meter".to_string()).unwrap_err();
        assert_eq!(err.error_code(), "UNSUPPORTED_OPERATOR");

        let res: Result<()> = Err(Error::InvalidFilter { offset: 7, message: "expected ','".into() });
        let err = res.with_context(|| "filter".to_string()).unwrap_err();
        assert!(matches!(err, Error::InvalidFilter { offset: 7, .. }));
        assert_eq!(err.to_string(), "Invalid filter expression at offset 7: filter: expected ','");

        let res: Result<()> = Err(Error::Backend { message: "closed".into(), source: None });
        let err = res.with_context(|| "table meter".to_string()).unwrap_err();
        assert!(err.is_recoverable());
        assert_eq!(err.to_string(), "Backend error: table meter: closed");
    }
}
