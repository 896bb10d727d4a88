//! Per-thread replay state.
//!
//! A [`ThreadContext`] is the replay cursor of one captured thread. The
//! per-event handlers here only touch the context they are given; anything
//! shared (ledgers, symbols, anomalies) is handled by the replay state.

use std::fmt;

use bbreplay_foundation::{Address, SyncKind, SyncObjectId, ThreadId};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

// =============================================================================
// Wait State
// =============================================================================

/// What a thread is currently blocked on, if anything.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum WaitState {
    /// Free to apply its next event.
    #[default]
    Running,
    /// Waiting for its turn on a critical section.
    WaitingCriticalSection,
    /// Waiting for its turn on an event object.
    WaitingEvent,
    /// Waiting for its turn on a mutex.
    WaitingMutex,
}

impl WaitState {
    /// Returns the waiting state matching a sync kind.
    #[must_use]
    pub const fn for_kind(kind: SyncKind) -> Self {
        match kind {
            SyncKind::CriticalSection => Self::WaitingCriticalSection,
            SyncKind::Event => Self::WaitingEvent,
            SyncKind::Mutex => Self::WaitingMutex,
        }
    }

    /// Returns true if the thread is not waiting.
    #[must_use]
    pub const fn is_running(self) -> bool {
        matches!(self, Self::Running)
    }
}

impl fmt::Display for WaitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::WaitingCriticalSection => write!(f, "waiting-critsec"),
            Self::WaitingEvent => write!(f, "waiting-event"),
            Self::WaitingMutex => write!(f, "waiting-mutex"),
        }
    }
}

/// A sync checkpoint a thread is blocked on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PendingSync {
    /// Synchronization object.
    pub object: SyncObjectId,
    /// Kind of primitive.
    pub kind: SyncKind,
    /// Recorded sequence number the thread needs.
    pub seq: u32,
    /// Recorded acquisition timestamp.
    pub ts: u64,
}

// =============================================================================
// Call Frames
// =============================================================================

/// What opened a call frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum FrameKind {
    /// A library (API) call.
    Library,
    /// A window procedure dispatch.
    WindowProcedure,
}

/// An in-flight call on a thread's replay call stack.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CallFrame {
    /// Function name (or `wndproc:<address>` for window procedures).
    pub name: String,
    /// What opened the frame.
    pub kind: FrameKind,
    /// Argument words, including any attached by later args records.
    pub args: Vec<u64>,
    /// String payloads attached while the frame was on top.
    pub strings: Vec<String>,
    /// True if the name matched the configured filter list.
    pub filtered: bool,
    /// Thread clock when the frame was pushed.
    pub entered_ts: u64,
    /// Return value, set when the frame is popped by a library return.
    pub retval: Option<u64>,
}

impl CallFrame {
    /// Creates a library call frame.
    #[must_use]
    pub fn library(name: impl Into<String>, args: Vec<u64>, entered_ts: u64) -> Self {
        Self {
            name: name.into(),
            kind: FrameKind::Library,
            args,
            strings: Vec::new(),
            filtered: false,
            entered_ts,
            retval: None,
        }
    }

    /// Creates a window procedure frame.
    #[must_use]
    pub fn window_procedure(procedure: Address, message: u32, entered_ts: u64) -> Self {
        Self {
            name: Self::window_procedure_name(procedure),
            kind: FrameKind::WindowProcedure,
            args: vec![u64::from(message)],
            strings: Vec::new(),
            filtered: false,
            entered_ts,
            retval: None,
        }
    }

    /// Frame name used for a window procedure at `procedure`.
    #[must_use]
    pub fn window_procedure_name(procedure: Address) -> String {
        format!("wndproc:{procedure}")
    }

    /// Builder method to flag the frame as filtered.
    #[must_use]
    pub fn with_filtered(mut self, filtered: bool) -> Self {
        self.filtered = filtered;
        self
    }
}

/// A return whose name did not match the top of the call stack.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StackMismatch {
    /// Name carried by the return record.
    pub expected: String,
    /// Name of the frame actually popped, `None` if the stack was empty.
    pub found: Option<String>,
}

// =============================================================================
// Counters
// =============================================================================

/// Aggregate memory access accounting.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MemoryCounters {
    /// Number of reads.
    pub reads: u64,
    /// Number of writes.
    pub writes: u64,
    /// Total bytes read.
    pub bytes_read: u64,
    /// Total bytes written.
    pub bytes_written: u64,
    /// Number of loop records.
    pub loops: u64,
    /// Total iterations across loop records.
    pub loop_iterations: u64,
}

impl MemoryCounters {
    fn absorb(&mut self, other: &Self) {
        self.reads += other.reads;
        self.writes += other.writes;
        self.bytes_read += other.bytes_read;
        self.bytes_written += other.bytes_written;
        self.loops += other.loops;
        self.loop_iterations += other.loop_iterations;
    }
}

// =============================================================================
// Thread Context
// =============================================================================

/// Replay cursor of one captured thread.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ThreadContext {
    thread: ThreadId,
    basic_block_count: u64,
    completed_blocks: u64,
    open_block: Option<Address>,
    last_block: Option<Address>,
    logical_clock: u64,
    call_stack: Vec<CallFrame>,
    wait_state: WaitState,
    pending: Option<PendingSync>,
    suspended: bool,
    calls: u64,
    filtered_calls: u64,
    window_procs: u64,
    sync_crossings: u64,
    memory: MemoryCounters,
}

impl ThreadContext {
    /// Creates a running context.
    #[must_use]
    pub fn new(thread: ThreadId) -> Self {
        Self {
            thread,
            basic_block_count: 0,
            completed_blocks: 0,
            open_block: None,
            last_block: None,
            logical_clock: 0,
            call_stack: Vec::new(),
            wait_state: WaitState::Running,
            pending: None,
            suspended: false,
            calls: 0,
            filtered_calls: 0,
            window_procs: 0,
            sync_crossings: 0,
            memory: MemoryCounters::default(),
        }
    }

    /// Creates a context held at the running barrier.
    #[must_use]
    pub fn suspended(thread: ThreadId) -> Self {
        Self {
            suspended: true,
            ..Self::new(thread)
        }
    }

    /// Returns the thread id.
    #[must_use]
    pub const fn thread(&self) -> ThreadId {
        self.thread
    }

    /// Returns the number of basic blocks replayed.
    #[must_use]
    pub const fn basic_block_count(&self) -> u64 {
        self.basic_block_count
    }

    /// Returns the number of blocks that were closed.
    #[must_use]
    pub const fn completed_blocks(&self) -> u64 {
        self.completed_blocks
    }

    /// Returns the start address of the open block.
    #[must_use]
    pub const fn open_block(&self) -> Option<Address> {
        self.open_block
    }

    /// Returns the start address of the most recent block.
    #[must_use]
    pub const fn last_block(&self) -> Option<Address> {
        self.last_block
    }

    /// Returns the last-seen trace timestamp.
    #[must_use]
    pub const fn logical_clock(&self) -> u64 {
        self.logical_clock
    }

    /// Returns the in-flight call frames, outermost first.
    #[must_use]
    pub fn call_stack(&self) -> &[CallFrame] {
        &self.call_stack
    }

    /// Returns the current wait state.
    #[must_use]
    pub const fn wait_state(&self) -> WaitState {
        self.wait_state
    }

    /// Returns the checkpoint the thread is blocked on.
    #[must_use]
    pub const fn pending(&self) -> Option<PendingSync> {
        self.pending
    }

    /// Returns true if the thread sits at the running barrier.
    #[must_use]
    pub const fn is_suspended(&self) -> bool {
        self.suspended
    }

    /// Returns the memory counters.
    #[must_use]
    pub const fn memory(&self) -> &MemoryCounters {
        &self.memory
    }

    /// Returns the number of sync checkpoints crossed.
    #[must_use]
    pub const fn sync_crossings(&self) -> u64 {
        self.sync_crossings
    }

    // -------------------------------------------------------------------------
    // Clock and barrier
    // -------------------------------------------------------------------------

    /// Advances the logical clock to `ts` if it is later.
    pub fn observe_ts(&mut self, ts: u64) {
        self.logical_clock = self.logical_clock.max(ts);
    }

    /// Releases the running barrier. Returns true if it was held.
    pub fn resume(&mut self) -> bool {
        std::mem::replace(&mut self.suspended, false)
    }

    /// Parks the thread on a sync checkpoint.
    pub fn block_on(&mut self, pending: PendingSync) {
        self.wait_state = WaitState::for_kind(pending.kind);
        self.pending = Some(pending);
    }

    /// Clears the wait state after the gate released the thread.
    pub(crate) fn release(&mut self) -> Option<PendingSync> {
        self.wait_state = WaitState::Running;
        self.pending.take()
    }

    /// Accounts a crossing whose ledger timestamp was `ledger_ts`.
    pub(crate) fn record_crossing(&mut self, ledger_ts: u64) {
        self.sync_crossings += 1;
        self.observe_ts(ledger_ts);
    }

    // -------------------------------------------------------------------------
    // Handlers
    // -------------------------------------------------------------------------

    /// Starts a basic block, closing any block left open.
    ///
    /// # Errors
    ///
    /// Returns the current wait state if the thread is not running.
    pub fn basic_block(&mut self, address: Address) -> Result<(), WaitState> {
        if !self.wait_state.is_running() {
            return Err(self.wait_state);
        }
        self.end_basic_block();
        self.basic_block_count += 1;
        self.open_block = Some(address);
        self.last_block = Some(address);
        Ok(())
    }

    /// Closes the open basic block. Returns false if none was open.
    pub fn end_basic_block(&mut self) -> bool {
        if self.open_block.take().is_some() {
            self.completed_blocks += 1;
            true
        } else {
            false
        }
    }

    /// Pushes a call frame.
    pub fn push_frame(&mut self, frame: CallFrame) {
        match frame.kind {
            FrameKind::Library => {
                self.calls += 1;
                if frame.filtered {
                    self.filtered_calls += 1;
                }
            }
            FrameKind::WindowProcedure => self.window_procs += 1,
        }
        self.call_stack.push(frame);
    }

    /// Pops the top frame, which must be named `name`.
    ///
    /// The top frame is removed even when its name differs.
    ///
    /// # Errors
    ///
    /// Returns a [`StackMismatch`] if the stack was empty or the popped
    /// frame had another name.
    pub fn pop_frame(&mut self, name: &str) -> Result<CallFrame, StackMismatch> {
        match self.call_stack.pop() {
            Some(frame) if frame.name == name => Ok(frame),
            Some(frame) => Err(StackMismatch {
                expected: name.to_string(),
                found: Some(frame.name),
            }),
            None => Err(StackMismatch {
                expected: name.to_string(),
                found: None,
            }),
        }
    }

    /// Appends argument words to the top frame. Returns false if the stack is empty.
    pub fn attach_args(&mut self, values: &[u64]) -> bool {
        match self.call_stack.last_mut() {
            Some(frame) => {
                frame.args.extend_from_slice(values);
                true
            }
            None => false,
        }
    }

    /// Appends a string to the top frame. Returns false if the stack is empty.
    pub fn attach_string(&mut self, value: String) -> bool {
        match self.call_stack.last_mut() {
            Some(frame) => {
                frame.strings.push(value);
                true
            }
            None => false,
        }
    }

    /// Accounts one memory access.
    pub fn memory_access(&mut self, size: u32, is_write: bool) {
        if is_write {
            self.memory.writes += 1;
            self.memory.bytes_written += u64::from(size);
        } else {
            self.memory.reads += 1;
            self.memory.bytes_read += u64::from(size);
        }
    }

    /// Accounts a loop of memory accesses.
    pub fn memory_loop(&mut self, iterations: u32) {
        self.memory.loops += 1;
        self.memory.loop_iterations += u64::from(iterations);
    }

    /// Produces the finished-thread summary of this context.
    #[must_use]
    pub fn summary(&self) -> ThreadSummary {
        ThreadSummary {
            thread: self.thread,
            basic_block_count: self.basic_block_count,
            completed_blocks: self.completed_blocks,
            logical_clock: self.logical_clock,
            calls: self.calls,
            filtered_calls: self.filtered_calls,
            window_procs: self.window_procs,
            sync_crossings: self.sync_crossings,
            memory: self.memory,
            dangling_frames: self.call_stack.len(),
            lifetimes: 1,
        }
    }
}

// =============================================================================
// Thread Summary
// =============================================================================

/// Final counters of a finished thread.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ThreadSummary {
    /// Thread id.
    pub thread: ThreadId,
    /// Basic blocks replayed.
    pub basic_block_count: u64,
    /// Basic blocks that were explicitly or implicitly closed.
    pub completed_blocks: u64,
    /// Final logical clock.
    pub logical_clock: u64,
    /// Library calls entered.
    pub calls: u64,
    /// Library calls whose name was filtered.
    pub filtered_calls: u64,
    /// Window procedure dispatches entered.
    pub window_procs: u64,
    /// Sync checkpoints crossed.
    pub sync_crossings: u64,
    /// Memory accounting.
    pub memory: MemoryCounters,
    /// Frames still on the stack when the thread finished.
    pub dangling_frames: usize,
    /// Number of thread lifetimes merged into this summary.
    pub lifetimes: u32,
}

impl ThreadSummary {
    /// Returns true if the thread finished with an empty call stack.
    #[must_use]
    pub const fn is_consistent(&self) -> bool {
        self.dangling_frames == 0
    }

    /// Merges a later lifetime of the same thread id into this summary.
    pub fn absorb(&mut self, later: &Self) {
        self.basic_block_count += later.basic_block_count;
        self.completed_blocks += later.completed_blocks;
        self.logical_clock = self.logical_clock.max(later.logical_clock);
        self.calls += later.calls;
        self.filtered_calls += later.filtered_calls;
        self.window_procs += later.window_procs;
        self.sync_crossings += later.sync_crossings;
        self.memory.absorb(&later.memory);
        self.dangling_frames += later.dangling_frames;
        self.lifetimes += later.lifetimes;
    }
}

impl fmt::Display for ThreadSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} blocks, {} calls ({} filtered), {} syncs, ts {}",
            self.thread,
            self.basic_block_count,
            self.calls,
            self.filtered_calls,
            self.sync_crossings,
            self.logical_clock
        )
    }
}
