//! Unified error types for the dockhand workspace.
//!
//! Every fallible operation in the runtime returns [`DockhandError`]. The
//! orchestrator decides which variants are best-effort and which define
//! success; this module only names them.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum DockhandError {
    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A configuration value is missing or invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// The engine binary could not be located or executed.
    #[error("executable not found: {program}")]
    ExecutableNotFound {
        /// Program that could not be resolved.
        program: String,
    },

    /// A one-shot engine command exited unsuccessfully.
    #[error(
        "command `{command}` failed with {}: {stderr}",
        .exit_code.map_or_else(|| "no exit code".to_string(), |c| format!("exit code {c}"))
    )]
    CommandFailed {
        /// Rendered command line.
        command: String,
        /// Exit code, absent when the process was killed by a signal.
        exit_code: Option<i32>,
        /// Captured standard error.
        stderr: String,
    },

    /// Readiness was never observed within the retry budget.
    #[error("health check for {url} failed after {attempts} attempt(s): {last_error}")]
    HealthCheckExhausted {
        /// Probed URL.
        url: String,
        /// Number of probes issued.
        attempts: u32,
        /// Error reported by the last probe.
        last_error: String,
    },

    /// `start()` was called while a previous run is still active.
    #[error("orchestrator is already active (state: {state})")]
    AlreadyStarted {
        /// State the orchestrator was in.
        state: String,
    },

    /// A record from the engine event feed could not be understood.
    #[error("malformed event record: {reason}")]
    MalformedEvent {
        /// What was wrong with the record.
        reason: String,
    },

    /// The operation was interrupted by `stop()`.
    #[error("operation cancelled")]
    Cancelled,

    /// JSON serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },

    /// YAML configuration could not be parsed.
    #[error("YAML error: {source}")]
    Yaml {
        /// Underlying YAML error.
        #[from]
        source: serde_yaml::Error,
    },
}

impl DockhandError {
    /// Returns whether this error means the engine binary itself is absent.
    ///
    /// This is the single classification point for the legacy behaviour that
    /// treats a missing engine as a soft, successful no-op start.
    #[must_use]
    pub const fn is_engine_missing(&self) -> bool {
        matches!(self, Self::ExecutableNotFound { .. })
    }

    /// Returns whether this error was produced by cancellation.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, DockhandError>;
