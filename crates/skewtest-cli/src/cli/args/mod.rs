use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub mod common;
pub use common::*;

#[derive(Parser)]
#[command(
    name = "skewtest",
    version,
    about = "Run test commands under skewed clocks and odd timezones to expose time-dependent flaky tests"
)]
pub struct Cli {
    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run one command under one clock configuration
    Run(RunArgs),
    /// Run a command through the full scenario matrix for a project
    Matrix(MatrixArgs),
    /// Fetch, self-test and install the clock shim
    Provision(ProvisionArgs),
    /// Print the Maven command for a set of fully-qualified test methods
    MavenCommand(MavenCommandArgs),
    Version,
}

#[derive(clap::Args, Debug, Clone)]
pub struct RunArgs {
    /// Shim clock configuration, e.g. "+0", "-2d", "@2026-01-01 00:00:00", "+0 x10", "s 1".
    /// Empty runs at real time.
    #[arg(
        long,
        short = 'f',
        default_value = "",
        allow_hyphen_values = true,
        env = "SKEWTEST_FAKETIME"
    )]
    pub faketime: String,

    #[command(flatten)]
    pub trigger: TriggerArgs,

    /// TZ for the child; empty keeps the environment default
    #[arg(long, short = 'z', env = "SKEWTEST_TIMEZONE")]
    pub timezone: Option<String>,

    /// Also write the combined output to this artifact
    #[arg(long, short = 'o')]
    pub output: Option<PathBuf>,

    /// Re-run even if --output already exists
    #[arg(long)]
    pub overwrite: bool,

    #[command(flatten)]
    pub engine: EngineArgs,

    /// Command to run. A single argument is split on whitespace.
    #[arg(allow_hyphen_values = true, required = true, trailing_var_arg = true)]
    pub command: Vec<String>,
}

#[derive(clap::Args, Debug, Clone)]
pub struct MatrixArgs {
    /// Project URL or path; its last segment names the output directory
    pub project: String,

    /// Root for scenario artifacts (default from config, else ./output)
    #[arg(long, env = "SKEWTEST_OUTPUT_ROOT")]
    pub output_root: Option<PathBuf>,

    #[command(flatten)]
    pub trigger: TriggerArgs,

    /// Year used for absolute instants and switch targets (default: current year)
    #[arg(long)]
    pub year: Option<i32>,

    /// Re-run scenarios whose artifact already exists
    #[arg(long)]
    pub overwrite: bool,

    /// Print the scenario plan and exit
    #[arg(long)]
    pub list: bool,

    /// Use the installed shim as is
    #[arg(long)]
    pub no_provision: bool,

    #[command(flatten)]
    pub shim: ShimBuildArgs,

    #[command(flatten)]
    pub engine: EngineArgs,

    /// Command to run in every scenario. A single argument is split on whitespace.
    #[arg(allow_hyphen_values = true, required = true, trailing_var_arg = true)]
    pub command: Vec<String>,
}

#[derive(clap::Args, Debug, Clone)]
pub struct ProvisionArgs {
    #[arg(long, env = "SKEWTEST_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(flatten)]
    pub shim: ShimBuildArgs,
}

#[derive(clap::Args, Debug, Clone)]
pub struct MavenCommandArgs {
    /// Fully-qualified test methods, e.g. org.example.FooTest.testBar
    pub tests: Vec<String>,

    /// Read additional test names from stdin, one per line, until an empty line
    #[arg(long)]
    pub stdin: bool,

    /// Print the command as a JSON array
    #[arg(long)]
    pub json: bool,
}
