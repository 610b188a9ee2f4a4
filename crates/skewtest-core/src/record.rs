//! Structured per-run records, written next to the raw log.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::clock::{ClockConfig, ClockParseError};
use crate::error::{SkewError, SkewResult};
use crate::trigger::Trigger;

/// One execution of the wrapped command.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TestRun {
    pub command: Vec<String>,
    /// Clock configuration in shim grammar; empty for real time.
    pub faketime: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub switch_trigger: Option<Trigger>,
    pub timezone: String,
    pub log_file: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub failed: bool,
    /// `None` when the child was killed by a signal.
    pub exit_code: Option<i32>,
}

impl TestRun {
    pub fn is_finished(&self) -> bool {
        self.end_time.is_some()
    }

    /// Rebuild the clock configuration this run used.
    pub fn clock_config(&self) -> Result<ClockConfig, ClockParseError> {
        ClockConfig::parse(&self.faketime, self.switch_trigger.clone())
    }

    pub(crate) fn finish(mut self, exit_code: Option<i32>) -> Self {
        self.failed = exit_code != Some(0);
        self.exit_code = exit_code;
        self.end_time = Some(Utc::now());
        self
    }
}

#[derive(Debug, Clone)]
pub struct RunRecorder {
    log_dir: PathBuf,
}

impl RunRecorder {
    pub fn new(log_dir: impl Into<PathBuf>) -> Self {
        Self {
            log_dir: log_dir.into(),
        }
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    /// Start a record. The run is not finished until the engine sets `end_time`.
    pub fn begin(&self, command: &[String], clock: &ClockConfig, timezone: Option<&str>) -> TestRun {
        TestRun {
            command: command.to_vec(),
            faketime: clock.to_string(),
            switch_trigger: clock.trigger().cloned(),
            timezone: timezone
                .filter(|tz| !tz.is_empty())
                .map(str::to_string)
                .unwrap_or_else(local_timezone),
            log_file: log_file_name(Local::now()),
            start_time: Utc::now(),
            end_time: None,
            failed: false,
            exit_code: None,
        }
    }

    pub fn log_path(&self, run: &TestRun) -> PathBuf {
        self.log_dir.join(&run.log_file)
    }

    pub fn record_path(&self, run: &TestRun) -> PathBuf {
        self.log_path(run).with_extension("json")
    }

    /// Write the record as pretty JSON next to its log.
    pub fn persist(&self, run: &TestRun) -> SkewResult<PathBuf> {
        let path = self.record_path(run);
        let json = serde_json::to_string_pretty(run).map_err(|e| {
            SkewError::log(&path, std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        })?;
        fs::create_dir_all(&self.log_dir).map_err(|e| SkewError::log(&self.log_dir, e))?;
        fs::write(&path, json).map_err(|e| SkewError::log(&path, e))?;
        Ok(path)
    }
}

/// Append one record as a JSON line.
pub fn append_jsonl(path: &Path, run: &TestRun) -> SkewResult<()> {
    let line = serde_json::to_string(run)
        .map_err(|e| SkewError::log(path, std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| SkewError::log(parent, e))?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| SkewError::log(path, e))?;
    writeln!(file, "{}", line).map_err(|e| SkewError::log(path, e))
}

/// `output-<local timestamp>-<random hex>.log`
pub fn log_file_name(now: DateTime<Local>) -> String {
    let suffix: u32 = rand::thread_rng().gen();
    format!("output-{}-{:08x}.log", now.format("%Y-%m-%dT%H-%M-%S"), suffix)
}

/// UTC offset of the environment's local timezone, e.g. `+05:30`.
pub fn local_timezone() -> String {
    Local::now().format("%:z").to_string()
}
