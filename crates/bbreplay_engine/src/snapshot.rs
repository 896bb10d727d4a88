//! Point-in-time copy of the runner state.
//!
//! A snapshot holds everything a continuation needs except the symbol
//! table, which is saved and restored on its own.

use std::collections::BTreeMap;

use bbreplay_foundation::ThreadId;

use crate::anomaly::AnomalyLog;
use crate::context::{ThreadContext, ThreadSummary};
use crate::ledger::{Ledgers, SyncCrossing};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Live contexts, finished summaries, ledgers and diagnostics.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RunnerSnapshot {
    /// Contexts of threads that have not finished.
    pub threads: BTreeMap<ThreadId, ThreadContext>,
    /// Accumulated summaries of finished threads.
    pub finished: BTreeMap<ThreadId, ThreadSummary>,
    /// Both sync ledgers.
    pub ledgers: Ledgers,
    /// Anomalies recorded so far.
    pub anomalies: AnomalyLog,
    /// Crossing journal, empty unless journaling is enabled.
    pub crossings: Vec<SyncCrossing>,
    /// Records applied before the snapshot was taken.
    pub records_applied: u64,
}

impl RunnerSnapshot {
    /// Total basic blocks over live and finished threads.
    #[must_use]
    pub fn total_basic_blocks(&self) -> u64 {
        let live: u64 = self.threads.values().map(ThreadContext::basic_block_count).sum();
        let done: u64 = self.finished.values().map(|s| s.basic_block_count).sum();
        live + done
    }
}
