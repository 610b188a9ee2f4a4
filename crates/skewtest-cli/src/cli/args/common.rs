//! Shared argument groups used across multiple commands.

use std::path::PathBuf;

use skewtest_core::Trigger;

#[derive(clap::Args, Debug, Clone, Default)]
pub struct TriggerArgs {
    /// Switch the clock when an output line starts with this text
    #[arg(long, short = 'e', env = "SKEWTEST_SWITCH")]
    pub switch: Option<String>,

    /// Switch the clock when an output line matches this regex
    #[arg(long, conflicts_with = "switch")]
    pub switch_regex: Option<String>,
}

impl TriggerArgs {
    pub fn trigger(&self) -> Option<Trigger> {
        match (&self.switch, &self.switch_regex) {
            (Some(prefix), _) => Some(Trigger::prefix(prefix.clone())),
            (None, Some(pattern)) => Some(Trigger::pattern(pattern.clone())),
            (None, None) => None,
        }
    }
}

/// Where the engine finds its configuration, shim and state.
#[derive(clap::Args, Debug, Clone, Default)]
pub struct EngineArgs {
    /// Config file (default: ./skewtest.yaml if present)
    #[arg(long, env = "SKEWTEST_CONFIG")]
    pub config: Option<PathBuf>,

    /// Clock shim library for non-switch runs
    #[arg(long, env = "SKEWTEST_PRELOAD")]
    pub preload: Option<PathBuf>,

    /// Thread-safe clock shim library for switch runs
    #[arg(long, env = "SKEWTEST_PRELOAD_MT")]
    pub preload_mt: Option<PathBuf>,

    /// Clock-state file polled by the shim in switch mode (default: ~/.faketimerc)
    #[arg(long, env = "SKEWTEST_CLOCK_FILE")]
    pub clock_file: Option<PathBuf>,

    /// Directory for raw logs and run records
    #[arg(long, env = "SKEWTEST_LOG_DIR")]
    pub log_dir: Option<PathBuf>,

    /// Working directory for the command
    #[arg(long, short = 'w')]
    pub workdir: Option<PathBuf>,
}

/// Overrides for building the shim from source.
#[derive(clap::Args, Debug, Clone, Default)]
pub struct ShimBuildArgs {
    /// Git repository of the clock shim
    #[arg(long)]
    pub shim_repo: Option<String>,

    /// Checkout directory
    #[arg(long)]
    pub shim_source: Option<PathBuf>,

    /// Install prefix
    #[arg(long, env = "SKEWTEST_SHIM_PREFIX")]
    pub shim_prefix: Option<PathBuf>,

    /// Hard timeout for the shim self-test, in seconds
    #[arg(long)]
    pub self_test_timeout: Option<u64>,
}
