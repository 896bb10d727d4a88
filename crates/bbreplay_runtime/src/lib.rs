//! State persistence and trace streams for bbreplay.
//!
//! This crate provides:
//! - [`serialize`] - Symbol table and runner state checkpoints (`MessagePack`)
//! - [`stream`] - `MessagePack` trace readers and writers

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod serialize;
pub mod stream;

pub use serialize::{
    FORMAT_VERSION, STATE_MAGIC, SYMBOLS_MAGIC, restore_state, restore_state_from_file,
    restore_symbols, restore_symbols_from_file, save_state, save_state_to_file, save_symbols,
    save_symbols_to_file, state_from_bytes, state_to_bytes, symbols_from_bytes, symbols_to_bytes,
};
pub use stream::{MsgpackTraceReader, MsgpackTraceWriter, open_trace_file, write_trace_file};
