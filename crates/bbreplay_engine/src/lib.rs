//! Thread contexts, synchronization ledgers, and the replay runner for bbreplay.
//!
//! The runner consumes a captured multithreaded trace and re-establishes, per
//! thread, the shape of its execution: basic blocks, call frames, memory
//! accounting. Sync checkpoints recorded with per-object sequence numbers are
//! replayed in their captured order.
//!
//! # Architecture
//!
//! ```text
//!  TraceSource ──► Runner ──┬─► single line:  apply in trace order, never block
//!                           │
//!                           └─► multi line:   orchestrator ──► line per thread
//!                                                               │
//!                                                  gate (ledgers + resume condvar)
//!                                                               │
//!                                        ThreadContext / SymbolTable / AnomalyLog
//!                                                               │
//!                                                         RunnerObserver
//! ```
//!
//! # Modules
//!
//! - [`context`] - Per-thread replay state and per-event handlers
//! - [`ledger`] - Sequence ledgers and the sync gate
//! - [`symbols`] - Address to symbol name map
//! - [`anomaly`] - Recoverable trace inconsistencies
//! - [`observer`] - Run lifecycle notifications
//! - [`message`] - Requests consumed by the orchestrator
//! - [`source`] - Pull interface over trace records
//! - [`config`] - Runner configuration
//! - [`runner`] - The aggregate root
//! - [`snapshot`] - Point-in-time copy of runner state

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod anomaly;
pub mod config;
pub mod context;
pub mod ledger;
pub mod message;
mod multiline;
pub mod observer;
pub mod runner;
pub mod snapshot;
pub mod source;
mod state;
pub mod symbols;

// Re-export main types for convenience
pub use anomaly::{Anomaly, AnomalyKind, AnomalyLog, AnomalyRecord, AnomalyStats};
pub use config::{ReplayMode, RunPhase, RunnerConfig};
pub use context::{
    CallFrame, FrameKind, MemoryCounters, PendingSync, ThreadContext, ThreadSummary, WaitState,
};
pub use ledger::{GateDecision, Ledgers, SyncCrossing, SyncLedger, SyncSequence};
pub use message::{MessageKind, RunnerMessage, SUSPENDED_PAYLOAD};
pub use observer::{ObservedEvent, RecordingObserver, RunnerObserver};
pub use runner::{RunSummary, Runner, RunnerHandle};
pub use snapshot::RunnerSnapshot;
pub use source::{ChannelSource, IterSource, TraceSource, VecSource};
pub use state::WaitCategory;
pub use symbols::SymbolTable;
