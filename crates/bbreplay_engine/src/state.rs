//! Runner-owned replay state and per-record dispatch.
//!
//! Everything here runs with the runner's state lock held. Handlers get the
//! context of the record's thread plus whichever shared map they touch, and
//! report anything that must happen outside the lock (observer calls,
//! messages, blocking) through the returned [`Effect`].

use std::collections::BTreeMap;
use std::fmt;

use bbreplay_foundation::{ThreadId, TraceEvent, TraceRecord};

use crate::anomaly::{Anomaly, AnomalyLog};
use crate::config::RunnerConfig;
use crate::context::{CallFrame, PendingSync, ThreadContext, ThreadSummary, WaitState};
use crate::ledger::{GateDecision, Ledgers, SyncCrossing, cross};
use crate::snapshot::RunnerSnapshot;
use crate::symbols::SymbolTable;

// =============================================================================
// Dispatch Types
// =============================================================================

/// How sync checkpoints that are not yet due are treated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum GateMode {
    /// The stream order is authoritative: cross immediately, note the skip.
    Flattened,
    /// Park the thread; its line blocks at the next checkpoint.
    Blocking,
}

/// Work the caller must do after a record was applied.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Effect {
    None,
    /// A frame was popped by its matching return.
    CallReturned(CallFrame),
    /// The thread created another one.
    Created { thread: ThreadId, suspended: bool },
    /// The thread resumed another one.
    Resumed(ThreadId),
    /// The thread finished.
    Finished(ThreadSummary),
    /// The thread parked on a sync checkpoint (blocking mode only).
    Blocked,
}

/// The four pending-wait checks, in the order they are evaluated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WaitCategory {
    /// Critical section turn.
    CriticalSection,
    /// Event turn.
    Event,
    /// Mutex turn.
    Mutex,
    /// Running barrier of a thread created suspended.
    Running,
}

impl WaitCategory {
    /// Evaluation order of the checks.
    pub const ORDER: [Self; 4] = [Self::CriticalSection, Self::Event, Self::Mutex, Self::Running];

    const fn wait_state(self) -> Option<WaitState> {
        match self {
            Self::CriticalSection => Some(WaitState::WaitingCriticalSection),
            Self::Event => Some(WaitState::WaitingEvent),
            Self::Mutex => Some(WaitState::WaitingMutex),
            Self::Running => None,
        }
    }
}

impl fmt::Display for WaitCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CriticalSection => write!(f, "critsec"),
            Self::Event => write!(f, "event"),
            Self::Mutex => write!(f, "mutex"),
            Self::Running => write!(f, "running"),
        }
    }
}

/// Progress of one multi-line execution line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum LineStatus {
    Running,
    Blocked,
    Exited,
}

// =============================================================================
// Replay State
// =============================================================================

/// All shared maps owned by the runner.
#[derive(Debug, Default)]
pub(crate) struct ReplayState {
    pub(crate) threads: BTreeMap<ThreadId, ThreadContext>,
    pub(crate) finished: BTreeMap<ThreadId, ThreadSummary>,
    pub(crate) ledgers: Ledgers,
    pub(crate) symbols: SymbolTable,
    pub(crate) anomalies: AnomalyLog,
    pub(crate) crossings: Vec<SyncCrossing>,
    pub(crate) records_applied: u64,
    // multi-line bookkeeping, never persisted
    pub(crate) lines: BTreeMap<ThreadId, LineStatus>,
}

impl ReplayState {
    pub(crate) fn new(config: &RunnerConfig) -> Self {
        Self {
            anomalies: AnomalyLog::new(config.anomaly_capacity),
            ..Self::default()
        }
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Returns the live context of `thread`, creating a running one if needed.
    fn context_for(&mut self, thread: ThreadId, ts: u64) -> &mut ThreadContext {
        if !self.threads.contains_key(&thread) {
            if self.finished.contains_key(&thread) {
                // a reused id must be announced by a create record first
                self.anomalies.push(
                    thread,
                    ts,
                    Anomaly::UnknownThread {
                        operation: "event after thread finished".to_string(),
                    },
                );
            }
            tracing::debug!(%thread, "thread first seen");
        }
        self.threads
            .entry(thread)
            .or_insert_with(|| ThreadContext::new(thread))
    }

    /// Registers a thread. Existing live contexts are left untouched.
    pub(crate) fn register_thread(&mut self, thread: ThreadId, suspended: bool) -> bool {
        if self.threads.contains_key(&thread) {
            return false;
        }
        tracing::debug!(%thread, suspended, "thread created");
        let ctx = if suspended {
            ThreadContext::suspended(thread)
        } else {
            ThreadContext::new(thread)
        };
        self.threads.insert(thread, ctx);
        true
    }

    /// Releases the running barrier of `target`.
    pub(crate) fn resume_thread(&mut self, target: ThreadId, operation: &str) -> bool {
        if let Some(ctx) = self.threads.get_mut(&target) {
            if ctx.resume() {
                tracing::debug!(thread = %target, "thread resumed");
            }
            true
        } else {
            let now = self.current_clock();
            self.anomalies.push(
                target,
                now,
                Anomaly::UnknownThread {
                    operation: operation.to_string(),
                },
            );
            false
        }
    }

    /// Latest logical clock over every thread, live or finished.
    pub(crate) fn current_clock(&self) -> u64 {
        let live = self.threads.values().map(ThreadContext::logical_clock);
        let done = self.finished.values().map(|s| s.logical_clock);
        live.chain(done).max().unwrap_or(0)
    }

    /// Moves a live context to the finished map.
    pub(crate) fn finish_thread(&mut self, thread: ThreadId) -> Option<ThreadSummary> {
        let ctx = self.threads.remove(&thread)?;
        let summary = ctx.summary();
        if summary.dangling_frames > 0 {
            self.anomalies.push(
                thread,
                summary.logical_clock,
                Anomaly::DanglingFrames {
                    depth: summary.dangling_frames,
                },
            );
        }
        self.finished
            .entry(thread)
            .and_modify(|s| s.absorb(&summary))
            .or_insert_with(|| summary.clone());
        tracing::debug!(%thread, blocks = summary.basic_block_count, "thread finished");
        Some(summary)
    }

    /// Returns true if `thread` was ever seen.
    pub(crate) fn is_known(&self, thread: ThreadId) -> bool {
        self.threads.contains_key(&thread) || self.finished.contains_key(&thread)
    }

    // -------------------------------------------------------------------------
    // Dispatch
    // -------------------------------------------------------------------------

    /// Applies one record to its thread.
    pub(crate) fn apply(
        &mut self,
        record: TraceRecord,
        mode: GateMode,
        config: &RunnerConfig,
    ) -> Effect {
        let TraceRecord { thread, ts, event } = record;
        tracing::trace!(%thread, ts, kind = event.kind_name(), "apply");
        self.records_applied += 1;

        let ctx = self.context_for(thread, ts);
        ctx.observe_ts(ts);
        let now = ctx.logical_clock();

        match event {
            TraceEvent::BasicBlockStart { address } => {
                if let Err(state) = ctx.basic_block(address) {
                    self.anomalies
                        .push(thread, now, Anomaly::NotRunning { state });
                }
            }
            TraceEvent::BasicBlockEnd => {
                ctx.end_basic_block();
            }
            TraceEvent::Symbol { address, name } => {
                self.symbols.insert(address, name);
            }
            TraceEvent::LibraryCall { name, args } => {
                let filtered = config.is_filtered(&name);
                ctx.push_frame(CallFrame::library(name, args, now).with_filtered(filtered));
            }
            TraceEvent::LibraryReturn { name, retval } => match ctx.pop_frame(&name) {
                Ok(mut frame) => {
                    frame.retval = Some(retval);
                    return Effect::CallReturned(frame);
                }
                Err(mismatch) => {
                    self.anomalies.push(
                        thread,
                        now,
                        Anomaly::StackMismatch {
                            expected: mismatch.expected,
                            found: mismatch.found,
                        },
                    );
                }
            },
            TraceEvent::Args { values } => {
                if !ctx.attach_args(&values) {
                    tracing::trace!(%thread, "args without a call frame");
                }
            }
            TraceEvent::StringData { value } => {
                if !ctx.attach_string(value) {
                    tracing::trace!(%thread, "string without a call frame");
                }
            }
            TraceEvent::Sync {
                object,
                kind,
                seq,
                ts,
            } => {
                let pending = PendingSync {
                    object,
                    kind,
                    seq,
                    ts,
                };
                return self.sync(thread, pending, mode, config);
            }
            TraceEvent::WindowProcedure {
                procedure,
                message,
                returning,
            } => {
                if returning {
                    match ctx.pop_frame(&CallFrame::window_procedure_name(procedure)) {
                        Ok(frame) => return Effect::CallReturned(frame),
                        Err(mismatch) => {
                            self.anomalies.push(
                                thread,
                                now,
                                Anomaly::StackMismatch {
                                    expected: mismatch.expected,
                                    found: mismatch.found,
                                },
                            );
                        }
                    }
                } else {
                    ctx.push_frame(CallFrame::window_procedure(procedure, message, now));
                }
            }
            TraceEvent::MemoryAccess { size, is_write, .. } => {
                ctx.memory_access(size, is_write);
            }
            TraceEvent::MemoryLoop { iterations, .. } => {
                ctx.memory_loop(iterations);
            }
            TraceEvent::CreateThread {
                new_thread,
                suspended,
            } => {
                // multi-line routing may already hold the child at the barrier
                if !self.register_thread(new_thread, suspended) && !suspended {
                    self.resume_thread(new_thread, "create-thread");
                }
                return Effect::Created {
                    thread: new_thread,
                    suspended,
                };
            }
            TraceEvent::ResumeThread { target } => {
                self.resume_thread(target, "resume-thread");
                return Effect::Resumed(target);
            }
            TraceEvent::ThreadFinished => {
                if let Some(summary) = self.finish_thread(thread) {
                    return Effect::Finished(summary);
                }
            }
        }

        Effect::None
    }

    /// Presents a sync checkpoint to the gate.
    fn sync(
        &mut self,
        thread: ThreadId,
        pending: PendingSync,
        mode: GateMode,
        config: &RunnerConfig,
    ) -> Effect {
        let decision = self
            .ledgers
            .for_kind(pending.kind)
            .decide(pending.object, pending.seq);
        let Some(ctx) = self.threads.get_mut(&thread) else {
            return Effect::None;
        };

        match (decision, mode) {
            (GateDecision::Proceed, _) => {
                let crossing = cross(&mut self.ledgers, ctx, pending);
                self.journal(crossing, config);
            }
            (GateDecision::Stale { expected }, _) => {
                ctx.observe_ts(pending.ts);
                let now = ctx.logical_clock();
                self.anomalies.push(
                    thread,
                    now,
                    Anomaly::StaleSequence {
                        object: pending.object,
                        kind: pending.kind,
                        seq: pending.seq,
                        expected,
                    },
                );
            }
            (GateDecision::Block { expected }, GateMode::Flattened) => {
                let crossing = cross(&mut self.ledgers, ctx, pending);
                self.anomalies.push(
                    thread,
                    crossing.ts,
                    Anomaly::SequenceAhead {
                        object: pending.object,
                        kind: pending.kind,
                        seq: pending.seq,
                        expected,
                    },
                );
                self.journal(crossing, config);
            }
            (GateDecision::Block { expected }, GateMode::Blocking) => {
                tracing::debug!(
                    %thread,
                    object = %pending.object,
                    kind = %pending.kind,
                    seq = pending.seq,
                    expected,
                    "waiting for turn"
                );
                ctx.block_on(pending);
                return Effect::Blocked;
            }
        }
        Effect::None
    }

    fn journal(&mut self, crossing: SyncCrossing, config: &RunnerConfig) {
        if config.record_crossings {
            self.crossings.push(crossing);
        }
    }

    // -------------------------------------------------------------------------
    // Pending-wait checks
    // -------------------------------------------------------------------------

    /// Returns true if `thread` is held by the `category` check.
    pub(crate) fn is_waiting_on(&self, thread: ThreadId, category: WaitCategory) -> bool {
        self.threads.get(&thread).is_some_and(|ctx| match category.wait_state() {
            Some(state) => ctx.wait_state() == state,
            None => ctx.is_suspended(),
        })
    }

    /// Returns true if the `category` check would let `thread` through now.
    pub(crate) fn is_passable(&self, thread: ThreadId, category: WaitCategory) -> bool {
        let Some(ctx) = self.threads.get(&thread) else {
            return true;
        };
        match category.wait_state() {
            Some(state) if ctx.wait_state() == state => ctx
                .pending()
                .is_none_or(|pending| self.ledgers.is_due(&pending)),
            Some(_) => true,
            None => !ctx.is_suspended(),
        }
    }

    /// Returns true if every check would let `thread` through now.
    pub(crate) fn is_free(&self, thread: ThreadId) -> bool {
        WaitCategory::ORDER
            .iter()
            .all(|c| !self.is_waiting_on(thread, *c) || self.is_passable(thread, *c))
    }

    /// Crosses the checkpoint `thread` was parked on, once it is due.
    pub(crate) fn release(&mut self, thread: ThreadId, config: &RunnerConfig) {
        let Some(ctx) = self.threads.get_mut(&thread) else {
            return;
        };
        let Some(pending) = ctx.release() else {
            return;
        };

        match self
            .ledgers
            .for_kind(pending.kind)
            .decide(pending.object, pending.seq)
        {
            GateDecision::Proceed | GateDecision::Block { .. } => {
                let crossing = cross(&mut self.ledgers, ctx, pending);
                tracing::debug!(%thread, object = %pending.object, seq = pending.seq, "gate released");
                self.journal(crossing, config);
            }
            GateDecision::Stale { expected } => {
                ctx.observe_ts(pending.ts);
                let now = ctx.logical_clock();
                self.anomalies.push(
                    thread,
                    now,
                    Anomaly::StaleSequence {
                        object: pending.object,
                        kind: pending.kind,
                        seq: pending.seq,
                        expected,
                    },
                );
            }
        }
    }

    /// Records an unsatisfiable wait for `thread`.
    pub(crate) fn record_unsatisfied(&mut self, thread: ThreadId) {
        if let Some(ctx) = self.threads.get(&thread) {
            let anomaly = Anomaly::UnsatisfiedWait {
                state: ctx.wait_state(),
                suspended: ctx.is_suspended(),
            };
            let now = ctx.logical_clock();
            self.anomalies.push(thread, now, anomaly);
        }
    }

    // -------------------------------------------------------------------------
    // Snapshots
    // -------------------------------------------------------------------------

    pub(crate) fn snapshot(&self) -> RunnerSnapshot {
        RunnerSnapshot {
            threads: self.threads.clone(),
            finished: self.finished.clone(),
            ledgers: self.ledgers.clone(),
            anomalies: self.anomalies.clone(),
            crossings: self.crossings.clone(),
            records_applied: self.records_applied,
        }
    }

    pub(crate) fn restore(&mut self, snapshot: RunnerSnapshot) {
        self.threads = snapshot.threads;
        self.finished = snapshot.finished;
        self.ledgers = snapshot.ledgers;
        self.anomalies = snapshot.anomalies;
        self.crossings = snapshot.crossings;
        self.records_applied = snapshot.records_applied;
        self.lines.clear();
    }
}
