//! Error types for the clock-injection engine.
//!
//! A wrapped command exiting nonzero is *not* an error: it is recorded as
//! `TestRun::failed`. Everything in here is infrastructure and aborts the
//! current invocation (and the whole matrix).

use std::path::PathBuf;
use std::time::Duration;

use crate::clock::ClockParseError;

/// Engine, provisioning and configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum SkewError {
    /// The wrapped command could not be started at all.
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Empty command line.
    #[error("no command provided to run")]
    EmptyCommand,

    /// Reading the child's output or writing a log/record failed.
    #[error("log io failed for {path}: {source}")]
    Log {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The shared clock-state file could not be written.
    #[error("clock state file {path}: {source}")]
    ClockState {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A configured shim library does not exist on disk.
    #[error("clock shim library not found: {path}")]
    ShimMissing { path: PathBuf },

    /// A provisioning step (fetch, self-test, clean, install) failed.
    #[error("shim provisioning step `{step}` failed: {message}")]
    Step {
        step: String,
        message: String,
        output: Vec<String>,
    },

    /// The shim self-test timed out and could not be recovered.
    #[error("shim self-test hung after {timeout:?} (attempt {attempts}): {reason}")]
    ProvisioningHang {
        timeout: Duration,
        attempts: u32,
        reason: String,
        output: Vec<String>,
    },

    /// Invalid clock configuration or trigger.
    #[error("invalid clock configuration: {0}")]
    Clock(#[from] ClockParseError),

    /// Invalid trigger pattern.
    #[error("invalid switch trigger `{pattern}`: {message}")]
    Trigger { pattern: String, message: String },

    /// Configuration file error.
    #[error("configuration error: {message}")]
    Config { message: String },
}

impl SkewError {
    /// Exit code for CLI.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ProvisioningHang { .. } | Self::Step { .. } => 3,
            _ => 2,
        }
    }

    /// Raw output captured before the failure, if any.
    ///
    /// Printed by the CLI so opaque failures on remote machines stay diagnosable.
    pub fn captured_output(&self) -> &[String] {
        match self {
            Self::Step { output, .. } | Self::ProvisioningHang { output, .. } => output,
            _ => &[],
        }
    }

    pub(crate) fn log(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Log {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn step(step: &str, message: impl Into<String>, output: Vec<String>) -> Self {
        Self::Step {
            step: step.to_string(),
            message: message.into(),
            output,
        }
    }
}

/// Result type for engine operations.
pub type SkewResult<T> = Result<T, SkewError>;
