//! Configuration for the replay runner.

use std::collections::BTreeSet;
use std::path::Path;

/// Replay strategy used by [`Runner::execute`](crate::Runner::execute).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReplayMode {
    /// One interleaved pass in trace order; never blocks.
    #[default]
    SingleLine,
    /// One execution line per captured thread, gated by the ledgers.
    MultiLine,
}

/// Which part of a split single-line run this is.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RunPhase {
    /// A complete run: observers see both start and finish.
    #[default]
    None,
    /// First half of a checkpointed run: observers see only the start.
    Pre,
    /// Second half, continuing a restored runner: observers see only the finish.
    Post,
}

impl RunPhase {
    /// Returns true if this phase announces the run start.
    #[must_use]
    pub const fn announces_start(self) -> bool {
        !matches!(self, Self::Post)
    }

    /// Returns true if this phase announces the run finish.
    #[must_use]
    pub const fn announces_finish(self) -> bool {
        !matches!(self, Self::Pre)
    }
}

/// Configuration for the replay runner.
#[derive(Clone, Debug)]
pub struct RunnerConfig {
    /// Path or name of the captured executable (informational).
    pub executable: String,
    /// Library call names whose frames are flagged as filtered.
    pub api_filters: BTreeSet<String>,
    /// Strategy used by `execute`.
    pub mode: ReplayMode,
    /// Phase used by `execute` in single-line mode.
    pub phase: RunPhase,
    /// Number of anomaly records retained.
    pub anomaly_capacity: usize,
    /// Whether every gate crossing is journaled.
    pub record_crossings: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            executable: String::new(),
            api_filters: BTreeSet::new(),
            mode: ReplayMode::SingleLine,
            phase: RunPhase::None,
            anomaly_capacity: 10_000,
            record_crossings: false,
        }
    }
}

impl RunnerConfig {
    /// Creates a new default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method to set the executable.
    #[must_use]
    pub fn with_executable(mut self, executable: impl Into<String>) -> Self {
        self.executable = executable.into();
        self
    }

    /// Builder method to add a filtered library call name.
    #[must_use]
    pub fn filter_api_call(mut self, name: impl Into<String>) -> Self {
        self.api_filters.insert(name.into());
        self
    }

    /// Builder method to add several filtered library call names.
    #[must_use]
    pub fn filter_api_calls<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.api_filters.extend(names.into_iter().map(Into::into));
        self
    }

    /// Builder method to select multi-line replay.
    #[must_use]
    pub fn multi_line(mut self) -> Self {
        self.mode = ReplayMode::MultiLine;
        self
    }

    /// Builder method to set the replay mode.
    #[must_use]
    pub fn with_mode(mut self, mode: ReplayMode) -> Self {
        self.mode = mode;
        self
    }

    /// Builder method to set the single-line phase.
    #[must_use]
    pub fn with_phase(mut self, phase: RunPhase) -> Self {
        self.phase = phase;
        self
    }

    /// Builder method to set the anomaly ring size.
    #[must_use]
    pub fn with_anomaly_capacity(mut self, capacity: usize) -> Self {
        self.anomaly_capacity = capacity;
        self
    }

    /// Builder method to journal gate crossings.
    #[must_use]
    pub fn record_crossings(mut self) -> Self {
        self.record_crossings = true;
        self
    }

    /// Returns true if calls named `name` are filtered.
    #[must_use]
    pub fn is_filtered(&self, name: &str) -> bool {
        self.api_filters.contains(name)
    }

    /// Returns the executable's file stem, used to name derived outputs.
    #[must_use]
    pub fn prefix(&self) -> String {
        // captured paths are usually Windows paths
        let name = self
            .executable
            .rsplit(['\\', '/'])
            .next()
            .unwrap_or_default();
        Path::new(name)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}
