//! Recoverable trace anomalies.
//!
//! A partially corrupt trace should still produce best-effort totals, so
//! inconsistencies are recorded here and replay continues. The log keeps the
//! most recent records in a ring buffer; per-kind counters are never evicted.

use std::collections::{BTreeMap, VecDeque};

use bbreplay_foundation::{SyncKind, SyncObjectId, ThreadId};
use thiserror::Error;

use crate::context::WaitState;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

// =============================================================================
// Anomaly
// =============================================================================

/// A trace-consistency violation.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Anomaly {
    /// A return did not match the top call frame.
    #[error("return from {expected} but top frame was {}", .found.as_deref().unwrap_or("<empty>"))]
    StackMismatch {
        /// Name on the return record.
        expected: String,
        /// Name of the popped frame, if any.
        found: Option<String>,
    },

    /// A sync turn arrived after the object had already moved past it.
    #[error("{kind} {object} seq {seq} already passed (expected {expected})")]
    StaleSequence {
        /// Object.
        object: SyncObjectId,
        /// Kind of primitive.
        kind: SyncKind,
        /// Recorded sequence.
        seq: u32,
        /// Ledger value at the time.
        expected: u32,
    },

    /// A flattened stream skipped ahead of an object's expected turn.
    #[error("{kind} {object} seq {seq} ahead of expected {expected}")]
    SequenceAhead {
        /// Object.
        object: SyncObjectId,
        /// Kind of primitive.
        kind: SyncKind,
        /// Recorded sequence.
        seq: u32,
        /// Ledger value at the time.
        expected: u32,
    },

    /// A request or message referred to a thread that was never seen.
    #[error("unknown thread in {operation}")]
    UnknownThread {
        /// What referred to the thread.
        operation: String,
    },

    /// A thread finished with frames still on its call stack.
    #[error("thread finished with {depth} dangling frame(s)")]
    DanglingFrames {
        /// Number of frames left.
        depth: usize,
    },

    /// A basic block arrived while the thread was waiting.
    #[error("basic block while {state}")]
    NotRunning {
        /// The wait state at the time.
        state: WaitState,
    },

    /// A wait that no remaining thread could ever satisfy.
    #[error("wait never satisfied while {state}")]
    UnsatisfiedWait {
        /// The wait state at the time.
        state: WaitState,
        /// True if the thread was held at the running barrier.
        suspended: bool,
    },
}

impl Anomaly {
    /// Returns the kind of this anomaly.
    #[must_use]
    pub fn kind(&self) -> AnomalyKind {
        match self {
            Self::StackMismatch { .. } => AnomalyKind::StackMismatch,
            Self::StaleSequence { .. } => AnomalyKind::StaleSequence,
            Self::SequenceAhead { .. } => AnomalyKind::SequenceAhead,
            Self::UnknownThread { .. } => AnomalyKind::UnknownThread,
            Self::DanglingFrames { .. } => AnomalyKind::DanglingFrames,
            Self::NotRunning { .. } => AnomalyKind::NotRunning,
            Self::UnsatisfiedWait { .. } => AnomalyKind::UnsatisfiedWait,
        }
    }
}

/// Discriminant of [`Anomaly`], used for counting.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum AnomalyKind {
    /// See [`Anomaly::StackMismatch`].
    StackMismatch,
    /// See [`Anomaly::StaleSequence`].
    StaleSequence,
    /// See [`Anomaly::SequenceAhead`].
    SequenceAhead,
    /// See [`Anomaly::UnknownThread`].
    UnknownThread,
    /// See [`Anomaly::DanglingFrames`].
    DanglingFrames,
    /// See [`Anomaly::NotRunning`].
    NotRunning,
    /// See [`Anomaly::UnsatisfiedWait`].
    UnsatisfiedWait,
}

impl std::fmt::Display for AnomalyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::StackMismatch => "stack-mismatch",
            Self::StaleSequence => "stale-sequence",
            Self::SequenceAhead => "sequence-ahead",
            Self::UnknownThread => "unknown-thread",
            Self::DanglingFrames => "dangling-frames",
            Self::NotRunning => "not-running",
            Self::UnsatisfiedWait => "unsatisfied-wait",
        };
        write!(f, "{name}")
    }
}

/// An anomaly with the thread and time it was observed at.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AnomalyRecord {
    /// Monotonic record id.
    pub id: u64,
    /// Thread the anomaly belongs to.
    pub thread: ThreadId,
    /// Thread clock when observed.
    pub ts: u64,
    /// The anomaly.
    pub anomaly: Anomaly,
}

// =============================================================================
// Anomaly Log
// =============================================================================

/// Ring buffer of anomaly records with lifetime counters.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AnomalyLog {
    records: VecDeque<AnomalyRecord>,
    max_size: usize,
    next_id: u64,
    counts: BTreeMap<AnomalyKind, u64>,
}

impl AnomalyLog {
    /// Creates a log that retains at most `max_size` records.
    #[must_use]
    pub fn new(max_size: usize) -> Self {
        Self {
            records: VecDeque::with_capacity(max_size.min(1024)),
            max_size,
            next_id: 0,
            counts: BTreeMap::new(),
        }
    }

    /// Records an anomaly and returns its id.
    pub fn push(&mut self, thread: ThreadId, ts: u64, anomaly: Anomaly) -> u64 {
        let id = self.next_id;
        self.next_id += 1;

        tracing::warn!(%thread, ts, kind = %anomaly.kind(), "trace anomaly: {anomaly}");
        *self.counts.entry(anomaly.kind()).or_insert(0) += 1;

        self.records.push_back(AnomalyRecord {
            id,
            thread,
            ts,
            anomaly,
        });
        while self.records.len() > self.max_size {
            self.records.pop_front();
        }

        id
    }

    /// Returns the number of retained records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if nothing is retained.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Returns the number of anomalies ever recorded.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.next_id
    }

    /// Returns how many anomalies of `kind` were ever recorded.
    #[must_use]
    pub fn count(&self, kind: AnomalyKind) -> u64 {
        self.counts.get(&kind).copied().unwrap_or(0)
    }

    /// Iterates retained records, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &AnomalyRecord> {
        self.records.iter()
    }

    /// Returns the most recent `count` records.
    #[must_use]
    pub fn recent(&self, count: usize) -> Vec<&AnomalyRecord> {
        let start = self.records.len().saturating_sub(count);
        self.records.iter().skip(start).collect()
    }

    /// Returns retained records of one kind.
    #[must_use]
    pub fn by_kind(&self, kind: AnomalyKind) -> Vec<&AnomalyRecord> {
        self.records
            .iter()
            .filter(|r| r.anomaly.kind() == kind)
            .collect()
    }

    /// Returns retained records of one thread.
    #[must_use]
    pub fn for_thread(&self, thread: ThreadId) -> Vec<&AnomalyRecord> {
        self.records.iter().filter(|r| r.thread == thread).collect()
    }

    /// Returns statistics about the log.
    #[must_use]
    pub fn stats(&self) -> AnomalyStats {
        AnomalyStats {
            retained: self.records.len(),
            max_size: self.max_size,
            total: self.next_id,
            counts: self.counts.clone(),
        }
    }
}

impl Default for AnomalyLog {
    fn default() -> Self {
        Self::new(10_000)
    }
}

/// Statistics about an anomaly log.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AnomalyStats {
    /// Records currently retained.
    pub retained: usize,
    /// Ring size.
    pub max_size: usize,
    /// Anomalies ever recorded.
    pub total: u64,
    /// Lifetime count per kind.
    pub counts: BTreeMap<AnomalyKind, u64>,
}
