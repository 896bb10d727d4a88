//! Multi-line replay: one execution line per captured thread.
//!
//! The orchestrator pulls records and routes each one to the line of its
//! thread over an unbounded channel. Lines apply their records in order and
//! park on the shared resume condition whenever a sync checkpoint is not yet
//! due or their thread is held at the running barrier. Cross-line order at
//! every sync object therefore follows the recorded sequence numbers.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::thread::{Builder, Scope, ScopedJoinHandle};

use bbreplay_foundation::{Error, ErrorKind, Result, ThreadId, TraceEvent, TraceRecord};
use crossbeam_channel::{Receiver, Sender};

use crate::config::RunnerConfig;
use crate::observer::RunnerObserver;
use crate::runner::{Runner, Shared, notify, process_messages};
use crate::source::TraceSource;
use crate::state::{Effect, GateMode, LineStatus, ReplayState, WaitCategory};

/// What every line borrows from the runner.
#[derive(Clone, Copy)]
struct LineEnv<'a> {
    shared: &'a Shared,
    config: &'a RunnerConfig,
    observers: &'a [Box<dyn RunnerObserver>],
}

impl Runner {
    /// Replays the trace with one execution line per thread.
    ///
    /// Returns once every line has exited. When input is exhausted and the
    /// remaining lines wait on turns no line can produce, each of them records
    /// an `UnsatisfiedWait` anomaly and the run stops.
    ///
    /// # Errors
    ///
    /// Returns an error if no trace is open, the source fails, or a line
    /// could not be spawned or panicked.
    pub fn run_mt(&mut self) -> Result<()> {
        let mut source = self
            .source
            .take()
            .ok_or_else(|| Error::new(ErrorKind::TraceNotOpen))?;
        tracing::info!(source = source.name(), "multi-line run starting");
        self.shared.state.lock().lines.clear();
        self.notify_start();

        let env = LineEnv {
            shared: &self.shared,
            config: &self.config,
            observers: &self.observers,
        };
        let result = std::thread::scope(|scope| orchestrate(scope, env, source.as_mut()));
        self.source = Some(source);
        let (lines, records) = result?;

        tracing::info!(lines, records, "multi-line run finished");
        self.notify_finish();
        Ok(())
    }
}

// =============================================================================
// Orchestrator
// =============================================================================

fn orchestrate<'scope, 'env>(
    scope: &'scope Scope<'scope, 'env>,
    env: LineEnv<'env>,
    source: &mut dyn TraceSource,
) -> Result<(usize, u64)> {
    let mut senders: BTreeMap<ThreadId, Sender<TraceRecord>> = BTreeMap::new();
    let mut handles: Vec<(ThreadId, ScopedJoinHandle<'scope, ()>)> = Vec::new();
    let mut records = 0u64;
    let mut failure = None;

    while !env.shared.is_stop_requested() {
        let record = match source.next_record() {
            Ok(Some(record)) => record,
            Ok(None) => break,
            Err(e) => {
                failure = Some(e);
                break;
            }
        };
        records += 1;

        if let TraceEvent::CreateThread { new_thread, .. } = &record.event {
            // the child waits at the barrier until its creator reaches this record
            env.shared.state.lock().register_thread(*new_thread, true);
        }

        let thread = record.thread;
        let sender = match senders.entry(thread) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let (tx, rx) = crossbeam_channel::unbounded();
                match spawn_line(scope, env, thread, rx) {
                    Ok(handle) => handles.push((thread, handle)),
                    Err(e) => {
                        failure = Some(e);
                        break;
                    }
                }
                entry.insert(tx)
            }
        };
        if sender.send(record).is_err() {
            tracing::debug!(%thread, "line already exited, record dropped");
        }

        process_messages(env.shared, env.observers);
    }

    // disconnecting the channels lets idle lines exit
    drop(senders);
    tracing::debug!(records, lines = handles.len(), "input exhausted");
    if failure.is_some() {
        env.shared.request_stop();
    }
    wait_for_lines(env);

    let lines = handles.len();
    let mut panicked = 0usize;
    for (thread, handle) in handles {
        if handle.join().is_err() {
            tracing::error!(%thread, "execution line panicked");
            panicked += 1;
        }
    }

    if let Some(e) = failure {
        return Err(e);
    }
    if panicked > 0 {
        return Err(Error::new(ErrorKind::Internal(format!(
            "{panicked} execution line(s) panicked"
        ))));
    }
    Ok((lines, records))
}

fn spawn_line<'scope, 'env>(
    scope: &'scope Scope<'scope, 'env>,
    env: LineEnv<'env>,
    thread: ThreadId,
    rx: Receiver<TraceRecord>,
) -> Result<ScopedJoinHandle<'scope, ()>> {
    env.shared
        .state
        .lock()
        .lines
        .insert(thread, LineStatus::Running);

    Builder::new()
        .name(format!("line-{thread}"))
        .spawn_scoped(scope, move || Line { env, thread }.run(&rx))
        .map_err(|e| {
            env.shared
                .state
                .lock()
                .lines
                .insert(thread, LineStatus::Exited);
            Error::io(format!("failed to spawn execution line for {thread}: {e}"))
        })
}

/// Waits until every line exited, resolving stalls once input is exhausted.
fn wait_for_lines(env: LineEnv<'_>) {
    loop {
        let epoch = env.shared.mailbox.lock().signals;
        process_messages(env.shared, env.observers);

        let stalled = {
            let mut state = env.shared.state.lock();
            if state.lines.values().all(|s| *s == LineStatus::Exited) {
                break;
            }
            if env.shared.is_stop_requested() {
                false
            } else {
                let blocked = stalled_threads(&state);
                for thread in &blocked {
                    state.record_unsatisfied(*thread);
                }
                !blocked.is_empty()
            }
        };
        if stalled {
            tracing::warn!("replay stalled on waits no line can satisfy");
            env.shared.request_stop();
            continue;
        }

        let mut mailbox = env.shared.mailbox.lock();
        while mailbox.signals == epoch {
            env.shared.message_cv.wait(&mut mailbox);
        }
    }
}

/// Returns the blocked threads if no line can make progress, else nothing.
fn stalled_threads(state: &ReplayState) -> Vec<ThreadId> {
    let mut blocked = Vec::new();
    for (thread, status) in &state.lines {
        match status {
            LineStatus::Running => return Vec::new(),
            LineStatus::Blocked if state.is_free(*thread) => return Vec::new(),
            LineStatus::Blocked => blocked.push(*thread),
            LineStatus::Exited => {}
        }
    }
    blocked
}

// =============================================================================
// Execution line
// =============================================================================

struct Line<'a> {
    env: LineEnv<'a>,
    thread: ThreadId,
}

/// Marks the line exited however it ends.
struct ExitGuard<'a> {
    shared: &'a Shared,
    thread: ThreadId,
}

impl Drop for ExitGuard<'_> {
    fn drop(&mut self) {
        self.shared
            .state
            .lock()
            .lines
            .insert(self.thread, LineStatus::Exited);
        self.shared.signal();
    }
}

impl Line<'_> {
    fn run(&self, rx: &Receiver<TraceRecord>) {
        let _exit = ExitGuard {
            shared: self.env.shared,
            thread: self.thread,
        };
        tracing::debug!(thread = %self.thread, "execution line started");

        loop {
            if !self.check_pending() {
                self.finish();
                return;
            }
            let Ok(record) = rx.recv() else {
                if self.env.shared.is_stop_requested() {
                    self.finish();
                }
                tracing::debug!(thread = %self.thread, "execution line drained");
                return;
            };

            let wakes = record.event.is_sync() || record.event.is_lifecycle();
            let effect = self
                .env
                .shared
                .state
                .lock()
                .apply(record, GateMode::Blocking, self.env.config);
            if wakes && effect != Effect::Blocked {
                self.env.shared.resume_cv.notify_all();
            }
            notify(self.env.observers, self.thread, &effect);
        }
    }

    /// Runs the four checks in order. Returns false once a stop was requested.
    fn check_pending(&self) -> bool {
        self.wait_crit_sec()
            && self.wait_event()
            && self.wait_mutex()
            && self.wait_running()
            && !self.env.shared.is_stop_requested()
    }

    fn wait_crit_sec(&self) -> bool {
        self.wait(WaitCategory::CriticalSection)
    }

    fn wait_event(&self) -> bool {
        self.wait(WaitCategory::Event)
    }

    fn wait_mutex(&self) -> bool {
        self.wait(WaitCategory::Mutex)
    }

    fn wait_running(&self) -> bool {
        self.wait(WaitCategory::Running)
    }

    /// Blocks until `category` lets the thread through. Returns false if a
    /// stop was requested while blocked.
    fn wait(&self, category: WaitCategory) -> bool {
        let shared = self.env.shared;
        let mut state = shared.state.lock();
        if !state.is_waiting_on(self.thread, category) {
            return true;
        }

        if !state.is_passable(self.thread, category) {
            tracing::debug!(thread = %self.thread, %category, "line blocked");
            state.lines.insert(self.thread, LineStatus::Blocked);
            shared.signal();
            while !state.is_passable(self.thread, category) {
                if shared.is_stop_requested() {
                    return false;
                }
                shared.resume_cv.wait(&mut state);
            }
            state.lines.insert(self.thread, LineStatus::Running);
        }

        if category != WaitCategory::Running {
            state.release(self.thread, self.env.config);
            drop(state);
            shared.resume_cv.notify_all();
        }
        true
    }

    /// Finishes the thread if it is still live.
    fn finish(&self) {
        let summary = self.env.shared.state.lock().finish_thread(self.thread);
        if let Some(summary) = summary {
            notify(self.env.observers, self.thread, &Effect::Finished(summary));
        }
        self.env.shared.resume_cv.notify_all();
    }
}
