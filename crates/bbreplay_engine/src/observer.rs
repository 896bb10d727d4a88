//! Run lifecycle notifications.
//!
//! Observers are invoked synchronously, in registration order, from
//! whichever line produced the notification. They must return promptly and
//! must not call back into the runner; anything slow belongs on the
//! observer's own thread.

use bbreplay_foundation::ThreadId;
use parking_lot::Mutex;

use crate::context::{CallFrame, ThreadSummary};

/// Receives run-level lifecycle events.
pub trait RunnerObserver: Send + Sync {
    /// Name shown by [`Runner::list_observers`](crate::Runner::list_observers).
    fn name(&self) -> &str {
        "observer"
    }

    /// A run is starting.
    fn on_run_start(&self);

    /// A run finished.
    fn on_run_finish(&self);

    /// A thread finished; `summary` holds its final counters.
    fn on_thread_finish(&self, thread: ThreadId, summary: &ThreadSummary);

    /// A library call frame was popped by its matching return.
    fn on_api_call(&self, _thread: ThreadId, _frame: &CallFrame) {}

    /// A window procedure frame was popped.
    fn on_window_proc(&self, _thread: ThreadId, _frame: &CallFrame) {}
}

/// A lifecycle event captured by [`RecordingObserver`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ObservedEvent {
    /// `on_run_start`.
    RunStart,
    /// `on_run_finish`.
    RunFinish,
    /// `on_thread_finish`.
    ThreadFinish(ThreadSummary),
    /// `on_api_call`, with the call name.
    ApiCall(ThreadId, String),
    /// `on_window_proc`, with the frame name.
    WindowProc(ThreadId, String),
}

/// Observer that keeps every notification in memory.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    name: String,
    events: Mutex<Vec<ObservedEvent>>,
}

impl RecordingObserver {
    /// Creates a named recorder.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            events: Mutex::new(Vec::new()),
        }
    }

    /// Returns a copy of everything observed so far.
    #[must_use]
    pub fn events(&self) -> Vec<ObservedEvent> {
        self.events.lock().clone()
    }

    /// Returns the summaries of finished threads, in notification order.
    #[must_use]
    pub fn finished(&self) -> Vec<ThreadSummary> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                ObservedEvent::ThreadFinish(s) => Some(s.clone()),
                _ => None,
            })
            .collect()
    }

    /// Counts finish notifications for `thread`.
    #[must_use]
    pub fn finish_count(&self, thread: ThreadId) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| matches!(e, ObservedEvent::ThreadFinish(s) if s.thread == thread))
            .count()
    }

    fn push(&self, event: ObservedEvent) {
        self.events.lock().push(event);
    }
}

impl RunnerObserver for RecordingObserver {
    fn name(&self) -> &str {
        &self.name
    }

    fn on_run_start(&self) {
        self.push(ObservedEvent::RunStart);
    }

    fn on_run_finish(&self) {
        self.push(ObservedEvent::RunFinish);
    }

    fn on_thread_finish(&self, _thread: ThreadId, summary: &ThreadSummary) {
        self.push(ObservedEvent::ThreadFinish(summary.clone()));
    }

    fn on_api_call(&self, thread: ThreadId, frame: &CallFrame) {
        self.push(ObservedEvent::ApiCall(thread, frame.name.clone()));
    }

    fn on_window_proc(&self, thread: ThreadId, frame: &CallFrame) {
        self.push(ObservedEvent::WindowProc(thread, frame.name.clone()));
    }
}

impl<T: RunnerObserver + ?Sized> RunnerObserver for std::sync::Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn on_run_start(&self) {
        (**self).on_run_start();
    }

    fn on_run_finish(&self) {
        (**self).on_run_finish();
    }

    fn on_thread_finish(&self, thread: ThreadId, summary: &ThreadSummary) {
        (**self).on_thread_finish(thread, summary);
    }

    fn on_api_call(&self, thread: ThreadId, frame: &CallFrame) {
        (**self).on_api_call(thread, frame);
    }

    fn on_window_proc(&self, thread: ThreadId, frame: &CallFrame) {
        (**self).on_window_proc(thread, frame);
    }
}
