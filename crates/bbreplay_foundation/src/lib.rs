//! Core identifiers, trace events, and error types for bbreplay.
//!
//! This crate provides:
//! - [`ThreadId`], [`Address`], [`SyncObjectId`] - identifiers carried by traces
//! - [`TraceEvent`] / [`TraceRecord`] - the typed event contract consumed by the engine
//! - [`Error`] - resource and setup errors with context

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod event;
pub mod ids;

pub use error::{Error, ErrorContext, ErrorKind, Result};
pub use event::{SyncKind, TraceEvent, TraceRecord};
pub use ids::{Address, SyncObjectId, ThreadId};
