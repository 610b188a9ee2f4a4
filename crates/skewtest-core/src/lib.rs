//! Clock-injection test harness.
//!
//! Runs a test command under manipulated wall-clock time and timezones to
//! expose time-dependent flakiness:
//!
//! - Clock configurations and the shim grammar ([`clock`])
//! - The execution engine with mid-run clock switching ([`engine`])
//! - The fixed scenario matrix with idempotent resume ([`matrix`])
//! - Shim provisioning with a hang watchdog ([`provision`])
//!
//! # Configuration
//!
//! | Environment Variable | Description |
//! |---------------------|-------------|
//! | `LD_PRELOAD` | Clock shim library, set per run |
//! | `FAKETIME` | Shim configuration for non-switch runs |
//! | `FAKETIME_TIMESTAMP_FILE` | Clock-state file polled in switch mode |
//! | `TZ` | Timezone of the run |

pub mod clock;
pub mod command;
pub mod config;
pub mod engine;
pub mod error;
pub mod matrix;
pub mod provision;
pub mod record;
pub mod state;
pub mod trigger;

pub use clock::{ClockBase, ClockConfig, ClockParseError, Factor, Offset, SwitchPlan};
pub use config::{MatrixSettings, ShimSettings, SkewConfig};
pub use engine::{Engine, RunOutcome, RunRequest, ShimLibrary};
pub use error::{SkewError, SkewResult};
pub use matrix::{MatrixReport, ScenarioMatrix, ScenarioSpec, ScenarioStatus};
pub use provision::{MakeToolchain, ShimToolchain, Watchdog};
pub use record::{RunRecorder, TestRun};
pub use state::ClockStateFile;
pub use trigger::{LineMatcher, Trigger};
