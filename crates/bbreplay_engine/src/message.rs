//! Requests consumed by the orchestrator loop.

use std::collections::VecDeque;
use std::fmt;

use bbreplay_foundation::ThreadId;

/// Payload marking a create request whose thread starts suspended.
pub const SUSPENDED_PAYLOAD: &str = "suspended";

/// Kind of a runner message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// A thread was created.
    CreateThread,
    /// A suspended thread was resumed.
    ResumeThread,
    /// A thread finished.
    ThreadFinished,
    /// Stop the run.
    RequestStop,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CreateThread => write!(f, "create-thread"),
            Self::ResumeThread => write!(f, "resume-thread"),
            Self::ThreadFinished => write!(f, "thread-finished"),
            Self::RequestStop => write!(f, "request-stop"),
        }
    }
}

/// A queued request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunnerMessage {
    /// Thread the request targets.
    pub thread: ThreadId,
    /// What is requested.
    pub kind: MessageKind,
    /// Opaque payload.
    pub payload: String,
}

impl RunnerMessage {
    /// Creates a message.
    #[must_use]
    pub fn new(thread: ThreadId, kind: MessageKind, payload: impl Into<String>) -> Self {
        Self {
            thread,
            kind,
            payload: payload.into(),
        }
    }

    /// Returns true if a create request asks for a suspended thread.
    #[must_use]
    pub fn is_suspended_create(&self) -> bool {
        self.kind == MessageKind::CreateThread && self.payload == SUSPENDED_PAYLOAD
    }
}

/// The message queue plus a wake-up counter.
///
/// Lines bump `signals` when their status changes so the orchestrator can
/// wait for "anything happened" without losing wake-ups. Once a stop request
/// is drained the mailbox is halted: nothing queued behind it or posted later
/// is delivered.
#[derive(Debug, Default)]
pub(crate) struct Mailbox {
    pub(crate) queue: VecDeque<RunnerMessage>,
    pub(crate) signals: u64,
    halted: bool,
}

impl Mailbox {
    pub(crate) fn post(&mut self, message: RunnerMessage) {
        if self.halted {
            tracing::debug!(thread = %message.thread, kind = %message.kind, "message after stop dropped");
        } else {
            self.queue.push_back(message);
        }
        self.signals += 1;
    }

    pub(crate) fn signal(&mut self) {
        self.signals += 1;
    }

    /// Takes queued messages up to and including the first stop request.
    pub(crate) fn drain(&mut self) -> Vec<RunnerMessage> {
        let stop = self
            .queue
            .iter()
            .position(|m| m.kind == MessageKind::RequestStop);
        match stop {
            Some(index) => {
                let taken = self.queue.drain(..=index).collect();
                if !self.queue.is_empty() {
                    tracing::debug!(dropped = self.queue.len(), "messages behind stop dropped");
                    self.queue.clear();
                }
                self.halted = true;
                taken
            }
            None => self.queue.drain(..).collect(),
        }
    }
}
