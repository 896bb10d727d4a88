//! bbreplay - Deterministic replay of captured multithreaded basic-block traces
//!
//! This crate re-exports all layers of the bbreplay system for convenient access.
//! For detailed documentation, see the individual layer crates.
//!
//! # Architecture
//!
//! ```text
//! Layer 2: bbreplay_runtime    - Checkpoint persistence, MessagePack trace streams
//! Layer 1: bbreplay_engine     - Thread contexts, ledgers, gate, runner
//! Layer 0: bbreplay_foundation - Core types (ThreadId, TraceEvent, Error)
//! ```

pub use bbreplay_engine as engine;
pub use bbreplay_foundation as foundation;
pub use bbreplay_runtime as runtime;
