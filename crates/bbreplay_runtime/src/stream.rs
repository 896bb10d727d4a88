//! `MessagePack` trace streams.
//!
//! A trace file is a plain concatenation of named `MessagePack` records, one
//! per [`TraceRecord`], with no header, so a decoder can append to it while
//! the replay reads.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;

use bbreplay_engine::TraceSource;
use bbreplay_foundation::{Error, ErrorContext, Result, TraceRecord};

use crate::serialize::write_record;

/// Reads trace records from any byte stream.
#[derive(Debug)]
pub struct MsgpackTraceReader<R> {
    reader: BufReader<R>,
    name: String,
    index: u64,
}

impl<R: Read> MsgpackTraceReader<R> {
    /// Wraps `reader`.
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
            name: "msgpack".to_string(),
            index: 0,
        }
    }

    /// Sets the name used in logs and error context.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Returns the number of records decoded so far.
    #[must_use]
    pub fn records_read(&self) -> u64 {
        self.index
    }

    fn at_end(&mut self) -> Result<bool> {
        let buf = self.reader.fill_buf().map_err(|e| {
            Error::io(e.to_string()).with_context(ErrorContext::new().with_source(&self.name))
        })?;
        Ok(buf.is_empty())
    }
}

impl<R: Read + Send> TraceSource for MsgpackTraceReader<R> {
    fn next_record(&mut self) -> Result<Option<TraceRecord>> {
        if self.at_end()? {
            return Ok(None);
        }
        let index = self.index;
        let record = rmp_serde::from_read(&mut self.reader).map_err(|e| {
            Error::decode(index, e.to_string())
                .with_context(ErrorContext::new().with_source(&self.name))
        })?;
        self.index += 1;
        Ok(Some(record))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Writes trace records to any byte sink.
#[derive(Debug)]
pub struct MsgpackTraceWriter<W: Write> {
    writer: BufWriter<W>,
    written: u64,
}

impl<W: Write> MsgpackTraceWriter<W> {
    /// Wraps `writer`.
    pub fn new(writer: W) -> Self {
        Self {
            writer: BufWriter::new(writer),
            written: 0,
        }
    }

    /// Appends one record.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or writing fails.
    pub fn write(&mut self, record: &TraceRecord) -> Result<()> {
        write_record(&mut self.writer, record)?;
        self.written += 1;
        Ok(())
    }

    /// Appends every record of `records`.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or writing fails.
    pub fn write_all<'a, I>(&mut self, records: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a TraceRecord>,
    {
        records.into_iter().try_for_each(|r| self.write(r))
    }

    /// Returns the number of records written.
    #[must_use]
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Flushes and returns the inner sink.
    ///
    /// # Errors
    ///
    /// Returns an error if flushing fails.
    pub fn finish(self) -> Result<W> {
        self.writer
            .into_inner()
            .map_err(|e| Error::io(format!("failed to flush trace: {}", e.error())))
    }
}

/// Opens a `MessagePack` trace file for replay.
///
/// # Errors
///
/// Returns an error if the file cannot be opened.
pub fn open_trace_file<P: AsRef<Path>>(path: P) -> Result<MsgpackTraceReader<File>> {
    let path = path.as_ref();
    let file = File::open(path)
        .map_err(|e| Error::io(format!("failed to open trace '{}': {e}", path.display())))?;
    tracing::debug!(path = %path.display(), "trace file opened");
    Ok(MsgpackTraceReader::new(file).with_name(path.display().to_string()))
}

/// Writes `records` to a new `MessagePack` trace file.
///
/// # Errors
///
/// Returns an error if the file cannot be created or written.
pub fn write_trace_file<P: AsRef<Path>>(path: P, records: &[TraceRecord]) -> Result<u64> {
    let path = path.as_ref();
    let file = File::create(path)
        .map_err(|e| Error::io(format!("failed to create trace '{}': {e}", path.display())))?;
    let mut writer = MsgpackTraceWriter::new(file);
    writer.write_all(records)?;
    let written = writer.written();
    writer.finish()?;
    Ok(written)
}
