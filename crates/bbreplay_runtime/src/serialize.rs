//! Checkpoint persistence using `MessagePack`.
//!
//! Two independent streams are supported: the symbol table, and the full
//! runner state. Each stream is a header record naming its format followed
//! by exactly one payload record, so streams can be concatenated or embedded
//! in a larger file. Restores decode the whole stream before the runner is
//! touched; a failed restore leaves the runner as it was.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use bbreplay_engine::{Runner, RunnerSnapshot, SymbolTable};
use bbreplay_foundation::{Error, ErrorContext, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Magic of the symbol table stream.
pub const SYMBOLS_MAGIC: &str = "bbreplay-symbols";

/// Magic of the runner state stream.
pub const STATE_MAGIC: &str = "bbreplay-state";

/// The only format version this build reads and writes.
pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct Header {
    magic: String,
    version: u32,
}

impl Header {
    fn new(magic: &str) -> Self {
        Self {
            magic: magic.to_string(),
            version: FORMAT_VERSION,
        }
    }

    fn check(&self, magic: &str) -> Result<()> {
        if self.magic == magic && self.version == FORMAT_VERSION {
            Ok(())
        } else {
            Err(Error::unsupported_format(
                format!("{magic} v{FORMAT_VERSION}"),
                format!("{} v{}", self.magic, self.version),
            ))
        }
    }
}

// =============================================================================
// Records
// =============================================================================

/// Writes one named `MessagePack` record.
pub(crate) fn write_record<W, T>(writer: &mut W, value: &T) -> Result<()>
where
    W: Write + ?Sized,
    T: Serialize + ?Sized,
{
    rmp_serde::encode::write_named(writer, value).map_err(|e| Error::serialization(e.to_string()))
}

/// Reads one `MessagePack` record.
pub(crate) fn read_record<R, T>(reader: &mut R) -> Result<T>
where
    R: Read,
    T: DeserializeOwned,
{
    rmp_serde::from_read(reader).map_err(|e| Error::deserialization(e.to_string()))
}

fn write_stream<W: Write, T: Serialize>(writer: &mut W, magic: &str, payload: &T) -> Result<()> {
    write_record(writer, &Header::new(magic))?;
    write_record(writer, payload)
}

fn read_stream<R: Read, T: DeserializeOwned>(reader: &mut R, magic: &str) -> Result<T> {
    let header: Header = read_record(reader)?;
    header.check(magic)?;
    read_record(reader)
}

// =============================================================================
// Symbols
// =============================================================================

/// Serializes a symbol table to bytes.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn symbols_to_bytes(symbols: &SymbolTable) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    write_stream(&mut bytes, SYMBOLS_MAGIC, symbols)?;
    Ok(bytes)
}

/// Deserializes a symbol table from bytes.
///
/// # Errors
///
/// Returns an error if the header is not a symbol stream of this version or
/// the payload cannot be decoded.
pub fn symbols_from_bytes(mut bytes: &[u8]) -> Result<SymbolTable> {
    read_stream(&mut bytes, SYMBOLS_MAGIC)
}

/// Writes the runner's symbol table to `writer`.
///
/// # Errors
///
/// Returns an error if serialization or writing fails.
pub fn save_symbols<W: Write>(runner: &Runner, writer: &mut W) -> Result<()> {
    let symbols = runner.symbols();
    write_stream(writer, SYMBOLS_MAGIC, &symbols)?;
    tracing::info!(symbols = symbols.len(), "symbol table saved");
    Ok(())
}

/// Replaces the runner's symbol table with the one read from `reader`.
///
/// # Errors
///
/// Returns an error if the stream is not a symbol stream of this version or
/// cannot be decoded. The runner is unchanged on error.
pub fn restore_symbols<R: Read>(runner: &Runner, reader: &mut R) -> Result<()> {
    let symbols: SymbolTable = read_stream(reader, SYMBOLS_MAGIC)?;
    runner.restore_symbols(symbols);
    Ok(())
}

// =============================================================================
// Runner state
// =============================================================================

/// Serializes a runner snapshot to bytes.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn state_to_bytes(snapshot: &RunnerSnapshot) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    write_stream(&mut bytes, STATE_MAGIC, snapshot)?;
    Ok(bytes)
}

/// Deserializes a runner snapshot from bytes.
///
/// # Errors
///
/// Returns an error if the header is not a state stream of this version or
/// the payload cannot be decoded.
pub fn state_from_bytes(mut bytes: &[u8]) -> Result<RunnerSnapshot> {
    read_stream(&mut bytes, STATE_MAGIC)
}

/// Writes the full runner state (except symbols) to `writer`.
///
/// # Errors
///
/// Returns an error if serialization or writing fails.
pub fn save_state<W: Write>(runner: &Runner, writer: &mut W) -> Result<()> {
    let snapshot = runner.snapshot();
    write_stream(writer, STATE_MAGIC, &snapshot)?;
    tracing::info!(
        threads = snapshot.threads.len(),
        finished = snapshot.finished.len(),
        records = snapshot.records_applied,
        "runner state saved"
    );
    Ok(())
}

/// Replaces the runner state with the one read from `reader`.
///
/// # Errors
///
/// Returns an error if the stream is not a state stream of this version or
/// cannot be decoded. The runner is unchanged on error.
pub fn restore_state<R: Read>(runner: &Runner, reader: &mut R) -> Result<()> {
    let snapshot: RunnerSnapshot = read_stream(reader, STATE_MAGIC)?;
    runner.restore_snapshot(snapshot);
    Ok(())
}

// =============================================================================
// Files
// =============================================================================

fn create_file(path: &Path) -> Result<BufWriter<File>> {
    let file = File::create(path).map_err(|e| {
        Error::io(format!("failed to create file '{}': {e}", path.display()))
    })?;
    Ok(BufWriter::new(file))
}

fn open_file(path: &Path) -> Result<BufReader<File>> {
    let file = File::open(path)
        .map_err(|e| Error::io(format!("failed to open file '{}': {e}", path.display())))?;
    Ok(BufReader::new(file))
}

fn flush(writer: &mut BufWriter<File>, path: &Path) -> Result<()> {
    writer
        .flush()
        .map_err(|e| Error::io(format!("failed to flush file '{}': {e}", path.display())))
}

fn in_file(path: &Path) -> impl FnOnce(Error) -> Error + '_ {
    move |e| e.with_context(ErrorContext::new().with_source(path.display().to_string()))
}

/// Saves the runner's symbol table to a file, overwriting it.
///
/// # Errors
///
/// Returns an error if the file cannot be written or serialization fails.
pub fn save_symbols_to_file<P: AsRef<Path>>(runner: &Runner, path: P) -> Result<()> {
    let path = path.as_ref();
    let mut writer = create_file(path)?;
    save_symbols(runner, &mut writer).map_err(in_file(path))?;
    flush(&mut writer, path)
}

/// Restores the runner's symbol table from a file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or is not a valid symbol stream.
pub fn restore_symbols_from_file<P: AsRef<Path>>(runner: &Runner, path: P) -> Result<()> {
    let path = path.as_ref();
    let mut reader = open_file(path)?;
    restore_symbols(runner, &mut reader).map_err(in_file(path))
}

/// Saves the full runner state to a file, overwriting it.
///
/// # Errors
///
/// Returns an error if the file cannot be written or serialization fails.
pub fn save_state_to_file<P: AsRef<Path>>(runner: &Runner, path: P) -> Result<()> {
    let path = path.as_ref();
    let mut writer = create_file(path)?;
    save_state(runner, &mut writer).map_err(in_file(path))?;
    flush(&mut writer, path)
}

/// Restores the full runner state from a file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or is not a valid state stream.
pub fn restore_state_from_file<P: AsRef<Path>>(runner: &Runner, path: P) -> Result<()> {
    let path = path.as_ref();
    let mut reader = open_file(path)?;
    restore_state(runner, &mut reader).map_err(in_file(path))
}
