//! Error types for bbreplay.
//!
//! Uses `thiserror` for ergonomic error definition with rich context.
//! Only resource and setup failures are errors; trace inconsistencies are
//! recorded as anomalies by the engine and never surface here.

use std::fmt;

use thiserror::Error;

/// The main error type for bbreplay operations.
#[derive(Debug, Error)]
#[error("{kind}")]
pub struct Error {
    /// The kind of error that occurred.
    pub kind: ErrorKind,
    /// Optional context about where the error occurred.
    pub context: Option<ErrorContext>,
}

impl Error {
    /// Creates a new error with the given kind.
    #[must_use]
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            context: None,
        }
    }

    /// Adds context to this error.
    #[must_use]
    pub fn with_context(mut self, context: ErrorContext) -> Self {
        self.context = Some(context);
        self
    }

    /// Creates an I/O error.
    #[must_use]
    pub fn io(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::IoError(message.into()))
    }

    /// Creates a serialization error.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::SerializationError(message.into()))
    }

    /// Creates a deserialization error.
    #[must_use]
    pub fn deserialization(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::DeserializationError(message.into()))
    }

    /// Creates a decode error for the record at `record`.
    #[must_use]
    pub fn decode(record: u64, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::DecodeError {
            record,
            message: message.into(),
        })
    }

    /// Creates an unsupported format error.
    #[must_use]
    pub fn unsupported_format(expected: impl Into<String>, found: impl Into<String>) -> Self {
        Self::new(ErrorKind::UnsupportedFormat {
            expected: expected.into(),
            found: found.into(),
        })
    }

    /// Returns true if this is a "no trace open" error.
    #[must_use]
    pub fn is_trace_not_open(&self) -> bool {
        matches!(self.kind, ErrorKind::TraceNotOpen)
    }
}

/// Categorized error kinds for pattern matching.
#[derive(Debug, Error)]
pub enum ErrorKind {
    /// A file or stream could not be opened, read or written.
    #[error("i/o error: {0}")]
    IoError(String),

    /// A value could not be encoded.
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// A persisted stream could not be decoded.
    #[error("deserialization error: {0}")]
    DeserializationError(String),

    /// A trace record could not be decoded.
    #[error("decode error at record {record}: {message}")]
    DecodeError {
        /// Index of the failing record in the stream.
        record: u64,
        /// Description of the failure.
        message: String,
    },

    /// A persisted stream has the wrong magic or version.
    #[error("unsupported format: expected {expected}, found {found}")]
    UnsupportedFormat {
        /// The format this build reads.
        expected: String,
        /// The format found in the stream.
        found: String,
    },

    /// A run was requested before a trace source was opened.
    #[error("no trace source is open")]
    TraceNotOpen,

    /// Internal error (should not happen).
    #[error("internal error: {0}")]
    Internal(String),
}

/// Context about where an error occurred.
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    /// File path or stream name.
    pub source: Option<String>,
    /// Index of the record being processed.
    pub record: Option<u64>,
}

impl ErrorContext {
    /// Creates a new empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the source name.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Sets the record index.
    #[must_use]
    pub fn with_record(mut self, record: u64) -> Self {
        self.record = Some(record);
        self
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(source) = &self.source {
            write!(f, "at {source}")?;
        }
        if let Some(record) = self.record {
            if self.source.is_some() {
                write!(f, " ")?;
            }
            write!(f, "record {record}")?;
        }
        Ok(())
    }
}

/// Result alias used throughout bbreplay.
pub type Result<T> = std::result::Result<T, Error>;
