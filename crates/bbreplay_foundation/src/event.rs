//! Typed trace events and records.
//!
//! These are the decoded form of the raw buffer records written by the
//! instrumentation client. Every record belongs to exactly one captured
//! thread and carries the capture-time timestamp of that thread.

use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::ids::{Address, SyncObjectId, ThreadId};

// =============================================================================
// Sync Kind
// =============================================================================

/// Kind of synchronization primitive a sync record refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum SyncKind {
    /// Critical section (recursive, owner-based).
    CriticalSection,
    /// Event object (signal/broadcast).
    Event,
    /// Mutex object.
    Mutex,
}

impl SyncKind {
    /// Returns true for the kinds that share the wait ledger.
    #[must_use]
    pub const fn is_wait_object(self) -> bool {
        matches!(self, Self::Event | Self::Mutex)
    }
}

impl fmt::Display for SyncKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CriticalSection => write!(f, "critical-section"),
            Self::Event => write!(f, "event"),
            Self::Mutex => write!(f, "mutex"),
        }
    }
}

// =============================================================================
// Trace Event
// =============================================================================

/// A single decoded trace event.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum TraceEvent {
    /// A basic block started executing.
    BasicBlockStart {
        /// First instruction address of the block.
        address: Address,
    },

    /// The currently open basic block completed.
    BasicBlockEnd,

    /// A symbol was resolved for a code address.
    Symbol {
        /// Code address.
        address: Address,
        /// Symbol name.
        name: String,
    },

    /// A library (API) call was entered.
    LibraryCall {
        /// Name of the called function.
        name: String,
        /// Raw argument words captured at entry.
        args: Vec<u64>,
    },

    /// A library call returned.
    LibraryReturn {
        /// Name of the returning function.
        name: String,
        /// Raw return value.
        retval: u64,
    },

    /// Additional argument words for the innermost call.
    Args {
        /// Argument words.
        values: Vec<u64>,
    },

    /// String data (a dereferenced argument) for the innermost call.
    StringData {
        /// The captured string.
        value: String,
    },

    /// A synchronization point with its capture-time sequence number.
    Sync {
        /// Synchronization object handle.
        object: SyncObjectId,
        /// Kind of primitive.
        kind: SyncKind,
        /// Position of this acquisition in the object's capture order.
        seq: u32,
        /// Capture-time timestamp of the acquisition.
        ts: u64,
    },

    /// A window procedure was entered or left.
    WindowProcedure {
        /// Address of the window procedure.
        procedure: Address,
        /// Window message being dispatched.
        message: u32,
        /// True when the procedure returns.
        returning: bool,
    },

    /// A single memory read or write.
    MemoryAccess {
        /// Accessed address.
        address: Address,
        /// Access width in bytes.
        size: u32,
        /// True for writes.
        is_write: bool,
    },

    /// A compressed run of memory accesses performed by a loop.
    MemoryLoop {
        /// First accessed address.
        address: Address,
        /// Access width in bytes.
        size: u32,
        /// Number of iterations the loop ran.
        iterations: u32,
    },

    /// This thread created another thread.
    CreateThread {
        /// Id of the new thread.
        new_thread: ThreadId,
        /// True if the thread was created suspended.
        suspended: bool,
    },

    /// This thread resumed a suspended thread.
    ResumeThread {
        /// Id of the resumed thread.
        target: ThreadId,
    },

    /// This thread finished.
    ThreadFinished,
}

impl TraceEvent {
    /// Returns a short name for the event kind.
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::BasicBlockStart { .. } => "bb-start",
            Self::BasicBlockEnd => "bb-end",
            Self::Symbol { .. } => "symbol",
            Self::LibraryCall { .. } => "lib-call",
            Self::LibraryReturn { .. } => "lib-ret",
            Self::Args { .. } => "args",
            Self::StringData { .. } => "string",
            Self::Sync { .. } => "sync",
            Self::WindowProcedure { .. } => "wndproc",
            Self::MemoryAccess { .. } => "mem-rw",
            Self::MemoryLoop { .. } => "mem-loop",
            Self::CreateThread { .. } => "create-thread",
            Self::ResumeThread { .. } => "resume-thread",
            Self::ThreadFinished => "thread-finished",
        }
    }

    /// Returns true if this event is a gate checkpoint.
    #[must_use]
    pub fn is_sync(&self) -> bool {
        matches!(self, Self::Sync { .. })
    }

    /// Returns true if this event changes thread lifecycle state.
    #[must_use]
    pub fn is_lifecycle(&self) -> bool {
        matches!(
            self,
            Self::CreateThread { .. } | Self::ResumeThread { .. } | Self::ThreadFinished
        )
    }
}

// =============================================================================
// Trace Record
// =============================================================================

/// A trace event tagged with its owning thread and timestamp.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TraceRecord {
    /// Thread that produced the event.
    pub thread: ThreadId,
    /// Capture-time timestamp of the thread when the event was written.
    pub ts: u64,
    /// The event.
    pub event: TraceEvent,
}

impl TraceRecord {
    /// Creates a new record.
    #[must_use]
    pub fn new(thread: ThreadId, ts: u64, event: TraceEvent) -> Self {
        Self { thread, ts, event }
    }

    /// Returns the event kind name.
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        self.event.kind_name()
    }
}
