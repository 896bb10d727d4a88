//! Pull interface over decoded trace records.
//!
//! The runner never assumes random access: it asks for the next record
//! until the source reports end-of-stream.

use std::collections::VecDeque;

use bbreplay_foundation::{Result, TraceRecord};
use crossbeam_channel::Receiver;

/// A stream of decoded trace records.
pub trait TraceSource: Send {
    /// Returns the next record, or `None` at end-of-stream.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying decoder fails.
    fn next_record(&mut self) -> Result<Option<TraceRecord>>;

    /// Name of the stream, for logs and error context.
    fn name(&self) -> &str {
        "trace"
    }
}

impl<S: TraceSource + ?Sized> TraceSource for Box<S> {
    fn next_record(&mut self) -> Result<Option<TraceRecord>> {
        (**self).next_record()
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// An in-memory trace.
#[derive(Clone, Debug, Default)]
pub struct VecSource {
    records: VecDeque<TraceRecord>,
}

impl VecSource {
    /// Creates a source yielding `records` in order.
    #[must_use]
    pub fn new(records: Vec<TraceRecord>) -> Self {
        Self {
            records: records.into(),
        }
    }

    /// Returns the number of records not yet pulled.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.records.len()
    }
}

impl TraceSource for VecSource {
    fn next_record(&mut self) -> Result<Option<TraceRecord>> {
        Ok(self.records.pop_front())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

impl From<Vec<TraceRecord>> for VecSource {
    fn from(records: Vec<TraceRecord>) -> Self {
        Self::new(records)
    }
}

/// Adapts any iterator of records.
#[derive(Debug)]
pub struct IterSource<I> {
    iter: I,
}

impl<I> IterSource<I>
where
    I: Iterator<Item = TraceRecord> + Send,
{
    /// Wraps `iter`.
    pub fn new(iter: I) -> Self {
        Self { iter }
    }
}

impl<I> TraceSource for IterSource<I>
where
    I: Iterator<Item = TraceRecord> + Send,
{
    fn next_record(&mut self) -> Result<Option<TraceRecord>> {
        Ok(self.iter.next())
    }

    fn name(&self) -> &str {
        "iterator"
    }
}

/// Records pushed by a live decoder on another thread.
///
/// The stream ends when every sender is dropped.
#[derive(Debug)]
pub struct ChannelSource {
    rx: Receiver<TraceRecord>,
}

impl ChannelSource {
    /// Wraps a receiver.
    #[must_use]
    pub fn new(rx: Receiver<TraceRecord>) -> Self {
        Self { rx }
    }
}

impl TraceSource for ChannelSource {
    fn next_record(&mut self) -> Result<Option<TraceRecord>> {
        Ok(self.rx.recv().ok())
    }

    fn name(&self) -> &str {
        "channel"
    }
}
