//! Integration tests for Error types
//!
//! Tests error construction, display, context, and error kinds.

use bbreplay_foundation::{Error, ErrorContext, ErrorKind};

// =============================================================================
// Error Construction
// =============================================================================

#[test]
fn error_io() {
    let err = Error::io("disk full");
    assert!(matches!(err.kind, ErrorKind::IoError(_)));
    assert!(format!("{err}").contains("disk full"));
}

#[test]
fn error_decode_names_the_record() {
    let err = Error::decode(17, "unexpected end of input");
    assert!(matches!(err.kind, ErrorKind::DecodeError { record: 17, .. }));
    let msg = format!("{err}");
    assert!(msg.contains("17"));
    assert!(msg.contains("unexpected end of input"));
}

#[test]
fn error_unsupported_format() {
    let err = Error::unsupported_format("bbreplay-state v1", "bbreplay-symbols v1");
    let msg = format!("{err}");
    assert!(msg.contains("bbreplay-state v1"));
    assert!(msg.contains("bbreplay-symbols v1"));
}

#[test]
fn error_trace_not_open() {
    let err = Error::new(ErrorKind::TraceNotOpen);
    assert!(err.is_trace_not_open());
    assert!(!Error::serialization("x").is_trace_not_open());
}

// =============================================================================
// Error Context
// =============================================================================

#[test]
fn context_renders_source_and_record() {
    let context = ErrorContext::new().with_source("trace.bin").with_record(3);
    assert_eq!(format!("{context}"), "at trace.bin record 3");
}

#[test]
fn context_is_attached_without_changing_kind() {
    let err = Error::deserialization("bad marker")
        .with_context(ErrorContext::new().with_source("state.bin"));
    assert!(matches!(err.kind, ErrorKind::DeserializationError(_)));
    assert_eq!(
        err.context.and_then(|c| c.source),
        Some("state.bin".to_string())
    );
}
