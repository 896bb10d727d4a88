//! The replay runner.
//!
//! The runner owns every shared map behind one lock, pulls records from an
//! opened [`TraceSource`] and applies them either in one interleaved pass
//! ([`Runner::run`]) or on one execution line per captured thread
//! ([`Runner::run_mt`]).

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bbreplay_foundation::{
    Address, Error, ErrorKind, Result, SyncKind, SyncObjectId, ThreadId, TraceRecord,
};
use parking_lot::{Condvar, Mutex};

use crate::anomaly::{Anomaly, AnomalyKind, AnomalyRecord, AnomalyStats};
use crate::config::{ReplayMode, RunPhase, RunnerConfig};
use crate::context::{FrameKind, ThreadContext, ThreadSummary, WaitState};
use crate::ledger::{Ledgers, SyncCrossing};
use crate::message::{Mailbox, MessageKind, RunnerMessage};
use crate::observer::RunnerObserver;
use crate::snapshot::RunnerSnapshot;
use crate::source::TraceSource;
use crate::state::{Effect, GateMode, ReplayState};
use crate::symbols::SymbolTable;

// =============================================================================
// Shared State
// =============================================================================

/// State shared between the runner, its handles and execution lines.
///
/// Lock order is `state` before `mailbox`.
pub(crate) struct Shared {
    pub(crate) state: Mutex<ReplayState>,
    /// Signalled whenever a ledger advances or a barrier is released.
    pub(crate) resume_cv: Condvar,
    pub(crate) mailbox: Mutex<Mailbox>,
    /// Signalled whenever a message is posted or a line changes status.
    pub(crate) message_cv: Condvar,
    stop: AtomicBool,
}

impl Shared {
    fn new(config: &RunnerConfig) -> Self {
        Self {
            state: Mutex::new(ReplayState::new(config)),
            resume_cv: Condvar::new(),
            mailbox: Mutex::new(Mailbox::default()),
            message_cv: Condvar::new(),
            stop: AtomicBool::new(false),
        }
    }

    pub(crate) fn is_stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Sets the stop flag and wakes every waiter. Must not be called with a
    /// lock held.
    pub(crate) fn request_stop(&self) {
        if !self.stop.swap(true, Ordering::SeqCst) {
            tracing::info!("stop requested");
        }
        {
            // waiters check the flag under the state lock
            let _state = self.state.lock();
        }
        self.resume_cv.notify_all();
        self.signal();
    }

    /// Queues a message. A stop request also raises the stop flag at once,
    /// so lines blocked in the gate see it while the orchestrator waits on
    /// its source. Must not be called with a lock held.
    pub(crate) fn post(&self, message: RunnerMessage) {
        tracing::debug!(thread = %message.thread, kind = %message.kind, "message posted");
        let stop = message.kind == MessageKind::RequestStop;
        self.mailbox.lock().post(message);
        self.message_cv.notify_all();
        if stop {
            self.request_stop();
        }
    }

    /// Wakes the orchestrator without posting a message.
    pub(crate) fn signal(&self) {
        self.mailbox.lock().signal();
        self.message_cv.notify_all();
    }
}

// =============================================================================
// Handle
// =============================================================================

/// Control surface usable from other threads while a run executes.
#[derive(Clone)]
pub struct RunnerHandle {
    shared: Arc<Shared>,
}

impl RunnerHandle {
    /// Asks the run to stop. Idempotent.
    ///
    /// Lines observe the request at their next checkpoint and finish their
    /// threads; the orchestrator observes it between records.
    pub fn request_to_stop(&self) {
        self.shared.request_stop();
    }

    /// Returns true once a stop was requested.
    #[must_use]
    pub fn is_stop_requested(&self) -> bool {
        self.shared.is_stop_requested()
    }

    /// Enqueues a request for the orchestrator loop.
    pub fn post_message(&self, thread: ThreadId, kind: MessageKind, payload: impl Into<String>) {
        self.shared.post(RunnerMessage::new(thread, kind, payload));
    }

    /// Returns the wait state of a live thread.
    #[must_use]
    pub fn wait_state(&self, thread: ThreadId) -> Option<WaitState> {
        self.shared
            .state
            .lock()
            .threads
            .get(&thread)
            .map(ThreadContext::wait_state)
    }

    /// Returns true if a live thread is held at the running barrier.
    #[must_use]
    pub fn is_suspended(&self, thread: ThreadId) -> Option<bool> {
        self.shared
            .state
            .lock()
            .threads
            .get(&thread)
            .map(ThreadContext::is_suspended)
    }
}

impl std::fmt::Debug for RunnerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunnerHandle")
            .field("stop_requested", &self.is_stop_requested())
            .finish()
    }
}

// =============================================================================
// Run Summary
// =============================================================================

/// Counters of a run: finished and live threads plus anomaly totals.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunSummary {
    /// Accumulated summaries of finished threads.
    pub finished: BTreeMap<ThreadId, ThreadSummary>,
    /// Summaries of threads still live.
    pub live: BTreeMap<ThreadId, ThreadSummary>,
    /// Anomaly counters.
    pub anomalies: AnomalyStats,
    /// Records applied so far.
    pub records_applied: u64,
}

impl RunSummary {
    /// Total basic blocks over all threads.
    #[must_use]
    pub fn total_basic_blocks(&self) -> u64 {
        self.finished
            .values()
            .chain(self.live.values())
            .map(|s| s.basic_block_count)
            .sum()
    }

    /// Returns the combined summary of `thread`, live and finished.
    #[must_use]
    pub fn thread(&self, thread: ThreadId) -> Option<ThreadSummary> {
        match (self.finished.get(&thread), self.live.get(&thread)) {
            (Some(done), Some(live)) => {
                let mut merged = done.clone();
                merged.absorb(live);
                Some(merged)
            }
            (Some(s), None) | (None, Some(s)) => Some(s.clone()),
            (None, None) => None,
        }
    }
}

// =============================================================================
// Runner
// =============================================================================

/// Deterministic replay engine over a basic-block trace.
pub struct Runner {
    pub(crate) config: RunnerConfig,
    pub(crate) shared: Arc<Shared>,
    pub(crate) observers: Vec<Box<dyn RunnerObserver>>,
    pub(crate) source: Option<Box<dyn TraceSource>>,
}

impl Runner {
    /// Creates a runner with no trace opened.
    #[must_use]
    pub fn new(config: RunnerConfig) -> Self {
        let shared = Arc::new(Shared::new(&config));
        Self {
            config,
            shared,
            observers: Vec::new(),
            source: None,
        }
    }

    // -------------------------------------------------------------------------
    // Setup
    // -------------------------------------------------------------------------

    /// Installs the trace source, replacing any previous one.
    pub fn open<S: TraceSource + 'static>(&mut self, source: S) {
        tracing::info!(source = source.name(), executable = %self.config.executable, "trace opened");
        self.source = Some(Box::new(source));
    }

    /// Returns true if a trace source is installed.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.source.is_some()
    }

    /// Appends an observer; observers are notified in registration order.
    pub fn add_observer<O: RunnerObserver + 'static>(&mut self, observer: O) {
        self.observers.push(Box::new(observer));
    }

    /// Returns observer names in registration order.
    #[must_use]
    pub fn list_observers(&self) -> Vec<&str> {
        self.observers.iter().map(|o| o.name()).collect()
    }

    /// Flags library calls named `name` as filtered from now on.
    pub fn filter_api_call(&mut self, name: impl Into<String>) {
        self.config.api_filters.insert(name.into());
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Returns the configured executable.
    #[must_use]
    pub fn executable(&self) -> &str {
        &self.config.executable
    }

    /// Returns the executable's file stem.
    #[must_use]
    pub fn prefix(&self) -> String {
        self.config.prefix()
    }

    /// Returns a handle for other threads.
    #[must_use]
    pub fn handle(&self) -> RunnerHandle {
        RunnerHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    // -------------------------------------------------------------------------
    // Control
    // -------------------------------------------------------------------------

    /// Asks the current or next run to stop. Idempotent.
    pub fn request_to_stop(&self) {
        self.shared.request_stop();
    }

    /// Returns true once a stop was requested.
    #[must_use]
    pub fn is_stop_requested(&self) -> bool {
        self.shared.is_stop_requested()
    }

    /// Enqueues a request for the orchestrator loop.
    pub fn post_message(&self, thread: ThreadId, kind: MessageKind, payload: impl Into<String>) {
        self.shared.post(RunnerMessage::new(thread, kind, payload));
    }

    // -------------------------------------------------------------------------
    // Replay
    // -------------------------------------------------------------------------

    /// Runs with the configured mode and phase.
    ///
    /// # Errors
    ///
    /// Returns an error if no trace is open or the source fails.
    pub fn execute(&mut self) -> Result<()> {
        match self.config.mode {
            ReplayMode::SingleLine => self.run(self.config.phase),
            ReplayMode::MultiLine => self.run_mt(),
        }
    }

    /// Applies the whole trace in one interleaved pass. Never blocks.
    ///
    /// A stop request ends the pass after the current record and finishes
    /// every live thread.
    ///
    /// # Errors
    ///
    /// Returns an error if no trace is open or the source fails.
    pub fn run(&mut self, phase: RunPhase) -> Result<()> {
        let mut source = self.source.take().ok_or_else(|| Error::new(ErrorKind::TraceNotOpen))?;
        tracing::info!(source = source.name(), ?phase, "single-line run starting");

        if phase.announces_start() {
            self.notify_start();
        }
        self.process_messages();

        let mut applied = 0u64;
        let result = loop {
            if self.shared.is_stop_requested() {
                break Ok(());
            }
            match source.next_record() {
                Ok(Some(record)) => {
                    self.apply_flattened(record);
                    self.process_messages();
                    applied += 1;
                }
                Ok(None) => break Ok(()),
                Err(e) => break Err(e),
            }
        };
        self.source = Some(source);
        result?;

        if self.shared.is_stop_requested() {
            self.finish_live_threads();
        }
        tracing::info!(records = applied, "single-line run finished");
        if phase.announces_finish() {
            self.notify_finish();
        }
        Ok(())
    }

    /// Applies exactly one record in single-line fashion.
    ///
    /// Returns false at end of stream.
    ///
    /// # Errors
    ///
    /// Returns an error if no trace is open or the source fails.
    pub fn step(&mut self) -> Result<bool> {
        let source = self
            .source
            .as_mut()
            .ok_or_else(|| Error::new(ErrorKind::TraceNotOpen))?;
        let Some(record) = source.next_record()? else {
            return Ok(false);
        };
        self.apply_flattened(record);
        self.process_messages();
        Ok(true)
    }

    fn apply_flattened(&self, record: TraceRecord) {
        let thread = record.thread;
        let effect = self
            .shared
            .state
            .lock()
            .apply(record, GateMode::Flattened, &self.config);
        notify(&self.observers, thread, &effect);
    }

    fn process_messages(&self) {
        process_messages(&self.shared, &self.observers);
    }

    fn finish_live_threads(&self) {
        let finished: Vec<ThreadSummary> = {
            let mut state = self.shared.state.lock();
            let live: Vec<ThreadId> = state.threads.keys().copied().collect();
            live.into_iter()
                .filter_map(|t| state.finish_thread(t))
                .collect()
        };
        for summary in finished {
            let thread = summary.thread;
            notify(&self.observers, thread, &Effect::Finished(summary));
        }
    }

    pub(crate) fn notify_start(&self) {
        for observer in &self.observers {
            observer.on_run_start();
        }
    }

    pub(crate) fn notify_finish(&self) {
        for observer in &self.observers {
            observer.on_run_finish();
        }
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    /// Returns counters for every thread seen so far.
    #[must_use]
    pub fn summary(&self) -> RunSummary {
        let state = self.shared.state.lock();
        RunSummary {
            finished: state.finished.clone(),
            live: state
                .threads
                .iter()
                .map(|(t, ctx)| (*t, ctx.summary()))
                .collect(),
            anomalies: state.anomalies.stats(),
            records_applied: state.records_applied,
        }
    }

    /// Basic blocks replayed for `thread`, live and finished lifetimes.
    #[must_use]
    pub fn basic_block_count(&self, thread: ThreadId) -> u64 {
        let state = self.shared.state.lock();
        let live = state
            .threads
            .get(&thread)
            .map_or(0, ThreadContext::basic_block_count);
        let done = state
            .finished
            .get(&thread)
            .map_or(0, |s| s.basic_block_count);
        live + done
    }

    /// Returns a copy of a live thread's context.
    #[must_use]
    pub fn thread(&self, thread: ThreadId) -> Option<ThreadContext> {
        self.shared.state.lock().threads.get(&thread).cloned()
    }

    /// Returns the ids of live threads.
    #[must_use]
    pub fn live_threads(&self) -> Vec<ThreadId> {
        self.shared.state.lock().threads.keys().copied().collect()
    }

    /// Returns the accumulated summary of a finished thread.
    #[must_use]
    pub fn finished_summary(&self, thread: ThreadId) -> Option<ThreadSummary> {
        self.shared.state.lock().finished.get(&thread).cloned()
    }

    /// Returns the expected sequence of a sync object.
    #[must_use]
    pub fn expected_sequence(&self, kind: SyncKind, object: SyncObjectId) -> u32 {
        self.shared.state.lock().ledgers.for_kind(kind).expected(object)
    }

    /// Returns a copy of both ledgers.
    #[must_use]
    pub fn ledgers(&self) -> Ledgers {
        self.shared.state.lock().ledgers.clone()
    }

    /// Returns the crossing journal in release order.
    #[must_use]
    pub fn crossings(&self) -> Vec<SyncCrossing> {
        self.shared.state.lock().crossings.clone()
    }

    /// Returns the retained anomaly records, oldest first.
    #[must_use]
    pub fn anomalies(&self) -> Vec<AnomalyRecord> {
        self.shared.state.lock().anomalies.iter().cloned().collect()
    }

    /// Returns the lifetime count of one anomaly kind.
    #[must_use]
    pub fn anomaly_count(&self, kind: AnomalyKind) -> u64 {
        self.shared.state.lock().anomalies.count(kind)
    }

    /// Returns the name recorded for `address`, if any.
    #[must_use]
    pub fn symbol(&self, address: Address) -> Option<String> {
        self.shared
            .state
            .lock()
            .symbols
            .get(address)
            .map(str::to_string)
    }

    // -------------------------------------------------------------------------
    // Checkpoints
    // -------------------------------------------------------------------------

    /// Copies the full runner state except the symbol table.
    #[must_use]
    pub fn snapshot(&self) -> RunnerSnapshot {
        self.shared.state.lock().snapshot()
    }

    /// Replaces the runner state with `snapshot`. The symbol table is kept.
    pub fn restore_snapshot(&self, snapshot: RunnerSnapshot) {
        tracing::info!(
            threads = snapshot.threads.len(),
            finished = snapshot.finished.len(),
            "runner state restored"
        );
        self.shared.state.lock().restore(snapshot);
    }

    /// Copies the symbol table.
    #[must_use]
    pub fn symbols(&self) -> SymbolTable {
        self.shared.state.lock().symbols.clone()
    }

    /// Replaces the symbol table.
    pub fn restore_symbols(&self, symbols: SymbolTable) {
        tracing::info!(symbols = symbols.len(), "symbol table restored");
        self.shared.state.lock().symbols = symbols;
    }
}

impl std::fmt::Debug for Runner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runner")
            .field("config", &self.config)
            .field("observers", &self.list_observers())
            .field("open", &self.is_open())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Notification and messages
// =============================================================================

/// Forwards an effect to the observers. Called without locks held.
pub(crate) fn notify(observers: &[Box<dyn RunnerObserver>], thread: ThreadId, effect: &Effect) {
    match effect {
        Effect::CallReturned(frame) => {
            for observer in observers {
                match frame.kind {
                    FrameKind::Library => observer.on_api_call(thread, frame),
                    FrameKind::WindowProcedure => observer.on_window_proc(thread, frame),
                }
            }
        }
        Effect::Finished(summary) => {
            for observer in observers {
                observer.on_thread_finish(thread, summary);
            }
        }
        Effect::None | Effect::Created { .. } | Effect::Resumed(_) | Effect::Blocked => {}
    }
}

/// Handles queued messages up to the first stop request. Called without
/// locks held.
pub(crate) fn process_messages(shared: &Shared, observers: &[Box<dyn RunnerObserver>]) {
    let messages = shared.mailbox.lock().drain();
    for message in messages {
        handle_message(shared, observers, &message);
    }
}

fn handle_message(shared: &Shared, observers: &[Box<dyn RunnerObserver>], message: &RunnerMessage) {
    let thread = message.thread;
    tracing::debug!(%thread, kind = %message.kind, "handling message");

    match message.kind {
        MessageKind::CreateThread => {
            let suspended = message.is_suspended_create();
            let mut state = shared.state.lock();
            if !state.register_thread(thread, suspended) && !suspended {
                state.resume_thread(thread, "create-thread");
            }
        }
        MessageKind::ResumeThread => {
            shared.state.lock().resume_thread(thread, "resume-thread");
        }
        MessageKind::ThreadFinished => {
            let summary = {
                let mut state = shared.state.lock();
                let summary = state.finish_thread(thread);
                if summary.is_none() && !state.is_known(thread) {
                    let now = state.current_clock();
                    state.anomalies.push(
                        thread,
                        now,
                        Anomaly::UnknownThread {
                            operation: message.kind.to_string(),
                        },
                    );
                }
                summary
            };
            if let Some(summary) = summary {
                notify(observers, thread, &Effect::Finished(summary));
            }
        }
        MessageKind::RequestStop => {
            shared.request_stop();
            return;
        }
    }
    shared.resume_cv.notify_all();
}
