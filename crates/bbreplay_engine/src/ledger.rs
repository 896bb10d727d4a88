//! Synchronization ledgers and the gate that reimposes capture-time order.
//!
//! Each synchronization object gets an expected turn: the sequence number
//! of the next acquisition recorded at capture time. A thread presenting
//! its recorded `(object, seq)` pair may only cross once the object's turn
//! has reached `seq`.
//!
//! Critical sections and wait objects (events, mutexes) keep separate
//! ledgers so their sequence spaces never mix.

use std::collections::BTreeMap;

use bbreplay_foundation::{SyncKind, SyncObjectId, ThreadId};

use crate::context::{PendingSync, ThreadContext};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

// =============================================================================
// Ledger
// =============================================================================

/// Expected turn of one synchronization object.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SyncSequence {
    /// Next sequence number allowed to cross.
    pub seq: u32,
    /// Timestamp of the latest crossing.
    pub ts: u64,
}

/// Expected turns keyed by object.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SyncLedger {
    entries: BTreeMap<SyncObjectId, SyncSequence>,
}

impl SyncLedger {
    /// Creates an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the entry for `object`; unseen objects expect sequence 0.
    #[must_use]
    pub fn get(&self, object: SyncObjectId) -> SyncSequence {
        self.entries.get(&object).copied().unwrap_or_default()
    }

    /// Returns the next expected sequence of `object`.
    #[must_use]
    pub fn expected(&self, object: SyncObjectId) -> u32 {
        self.get(object).seq
    }

    /// Compares a recorded sequence against the expected turn.
    #[must_use]
    pub fn decide(&self, object: SyncObjectId, seq: u32) -> GateDecision {
        let expected = self.expected(object);
        match seq.cmp(&expected) {
            std::cmp::Ordering::Equal => GateDecision::Proceed,
            std::cmp::Ordering::Greater => GateDecision::Block { expected },
            std::cmp::Ordering::Less => GateDecision::Stale { expected },
        }
    }

    /// Applies a crossing at `seq` and returns the pre-crossing timestamp.
    ///
    /// The expected turn becomes `seq + 1` unless it is already past it.
    pub fn advance(&mut self, object: SyncObjectId, seq: u32, ts: u64) -> u64 {
        let entry = self.entries.entry(object).or_default();
        let previous_ts = entry.ts;
        entry.seq = entry.seq.max(seq.saturating_add(1));
        entry.ts = entry.ts.max(ts);
        previous_ts
    }

    /// Returns the number of objects tracked.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no object has been seen.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates entries in object order.
    pub fn iter(&self) -> impl Iterator<Item = (SyncObjectId, SyncSequence)> + '_ {
        self.entries.iter().map(|(o, s)| (*o, *s))
    }
}

/// The two independent ledgers.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Ledgers {
    /// Critical section turns.
    pub critical_sections: SyncLedger,
    /// Event and mutex turns.
    pub waits: SyncLedger,
}

impl Ledgers {
    /// Creates empty ledgers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the ledger responsible for `kind`.
    #[must_use]
    pub fn for_kind(&self, kind: SyncKind) -> &SyncLedger {
        if kind.is_wait_object() {
            &self.waits
        } else {
            &self.critical_sections
        }
    }

    /// Returns the ledger responsible for `kind`, mutably.
    pub fn for_kind_mut(&mut self, kind: SyncKind) -> &mut SyncLedger {
        if kind.is_wait_object() {
            &mut self.waits
        } else {
            &mut self.critical_sections
        }
    }

    /// Returns true if a thread blocked on `pending` may now cross.
    #[must_use]
    pub fn is_due(&self, pending: &PendingSync) -> bool {
        self.for_kind(pending.kind).expected(pending.object) >= pending.seq
    }
}

// =============================================================================
// Gate
// =============================================================================

/// Outcome of presenting a recorded sequence to the gate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GateDecision {
    /// It is this thread's turn.
    Proceed,
    /// The turn has not come yet.
    Block {
        /// The object's current expected sequence.
        expected: u32,
    },
    /// The turn already passed; treated as satisfied.
    Stale {
        /// The object's current expected sequence.
        expected: u32,
    },
}

/// One crossing of a gate, in release order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SyncCrossing {
    /// Thread that crossed.
    pub thread: ThreadId,
    /// Object crossed.
    pub object: SyncObjectId,
    /// Kind of primitive.
    pub kind: SyncKind,
    /// Recorded sequence of the crossing.
    pub seq: u32,
    /// Thread clock after the crossing.
    pub ts: u64,
}

/// Crosses `pending` for `ctx`: advances the ledger and the thread clock.
///
/// The thread clock becomes the maximum of its own clock, the ledger's
/// previous crossing timestamp and the recorded acquisition timestamp.
pub fn cross(ledgers: &mut Ledgers, ctx: &mut ThreadContext, pending: PendingSync) -> SyncCrossing {
    let ledger = ledgers.for_kind_mut(pending.kind);
    let previous_ts = ledger.advance(pending.object, pending.seq, pending.ts);
    ctx.record_crossing(previous_ts);
    ctx.observe_ts(pending.ts);
    // the ledger keeps the latest causal time seen at this object
    ledger.advance(pending.object, pending.seq, ctx.logical_clock());
    SyncCrossing {
        thread: ctx.thread(),
        object: pending.object,
        kind: pending.kind,
        seq: pending.seq,
        ts: ctx.logical_clock(),
    }
}
