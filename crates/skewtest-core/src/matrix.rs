//! Scenario matrix: the fixed sequence of clock/timezone perturbations a
//! command is run under, and the sequential driver that executes it.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::{Datelike, NaiveDate};
use serde::Serialize;

use crate::clock::{ClockBase, ClockConfig, Factor, SwitchPlan};
use crate::config::MatrixSettings;
use crate::engine::{Engine, RunOutcome, RunRequest};
use crate::error::{SkewError, SkewResult};
use crate::record::{append_jsonl, TestRun};

pub const DRY_RUN: &str = "dry-run";
pub const BASELINE: &str = "test-ori";
pub const RUNS_FILE: &str = "runs.jsonl";

/// One (clock, timezone) pair and where its output lands.
#[derive(Debug, Clone, PartialEq)]
pub struct ScenarioSpec {
    pub name: String,
    pub clock: ClockConfig,
    pub timezone: Option<String>,
    /// `None` only for the dry run.
    pub output_path: Option<PathBuf>,
}

/// Zones with unusual offsets or DST rules. An absolute start pins the run
/// on a particular side of a DST transition.
enum ZoneStart {
    Real,
    On { month: u32 },
}

const TIMEZONES: &[(&str, &str, ZoneStart)] = &[
    ("UTC-ref", "UTC", ZoneStart::Real),
    ("Kolkata", "Asia/Kolkata", ZoneStart::Real),
    ("Eucla", "Australia/Eucla", ZoneStart::Real),
    ("Marquesas", "Pacific/Marquesas", ZoneStart::Real),
    ("Chatham", "Pacific/Chatham", ZoneStart::On { month: 7 }),
    ("Chatham-DST", "Pacific/Chatham", ZoneStart::On { month: 1 }),
];

/// Last path segment of a project URL or directory, ignoring a trailing `/`.
pub fn project_name(url: &str) -> &str {
    let trimmed = url.strip_suffix('/').unwrap_or(url);
    trimmed.rsplit('/').next().unwrap_or(trimmed)
}

pub fn artifact_path(output_root: &Path, project: &str, scenario: &str) -> PathBuf {
    output_root.join(project).join(format!("{}.out", scenario))
}

#[derive(Debug, Clone)]
pub struct ScenarioMatrix {
    project: String,
    project_dir: PathBuf,
    scenarios: Vec<ScenarioSpec>,
}

impl ScenarioMatrix {
    /// Enumerate every scenario for `project` in execution order.
    pub fn generate(project: &str, output_root: &Path, settings: &MatrixSettings) -> SkewResult<Self> {
        let project = project_name(project);
        if project.is_empty() {
            return Err(SkewError::Config {
                message: "project name is empty".into(),
            });
        }
        validate_factors("speed_factors", &settings.speed_factors)?;
        validate_factors("increment_factors", &settings.increment_factors)?;
        let trigger = settings.trigger()?;
        let year = settings
            .reference_year
            .unwrap_or_else(|| chrono::Local::now().year());

        let mut scenarios = vec![ScenarioSpec {
            name: DRY_RUN.to_string(),
            clock: ClockConfig::RealTime,
            timezone: None,
            output_path: None,
        }];
        let mut push = |name: String, clock: ClockConfig, timezone: Option<&str>| {
            scenarios.push(ScenarioSpec {
                output_path: Some(artifact_path(output_root, project, &name)),
                name,
                clock,
                timezone: timezone.map(str::to_string),
            });
        };

        push(BASELINE.into(), ClockConfig::RealTime, None);
        push(
            "test-fake-ref".into(),
            ClockConfig::FixedOffset(ClockBase::NEUTRAL),
            None,
        );
        push(
            "test-fake-speed-up-ref".into(),
            ClockConfig::SpeedMultiplier {
                base: ClockBase::NEUTRAL,
                factor: Factor::ONE,
            },
            None,
        );
        push(
            "test-fake-inc-ref".into(),
            ClockConfig::LinearIncrement {
                base: ClockBase::NEUTRAL,
                factor: Factor::ONE,
            },
            None,
        );

        for (name, tz, start) in TIMEZONES {
            let clock = match start {
                ZoneStart::Real => ClockConfig::RealTime,
                ZoneStart::On { month } => {
                    let at = NaiveDate::from_ymd_opt(year, *month, 1)
                        .and_then(|d| d.and_hms_opt(0, 0, 0))
                        .ok_or_else(|| SkewError::Config {
                            message: format!("invalid reference year {}", year),
                        })?;
                    ClockConfig::FixedOffset(ClockBase::At(at))
                }
            };
            push(format!("test-fake-timezone-{}", name), clock, Some(*tz));
        }

        for &f in &settings.speed_factors {
            push(
                format!("test-fake-speed-up-{}x", f),
                ClockConfig::SpeedMultiplier {
                    base: ClockBase::NEUTRAL,
                    factor: Factor::new(f64::from(f))?,
                },
                None,
            );
        }
        for &f in &settings.increment_factors {
            push(
                format!("test-fake-inc-{}i", f),
                ClockConfig::LinearIncrement {
                    base: ClockBase::NEUTRAL,
                    factor: Factor::new(f64::from(f))?,
                },
                None,
            );
        }

        if let Some(trigger) = trigger {
            for gap in settings.switch_gaps.iter() {
                let plan = SwitchPlan::before_new_year(trigger.clone(), year, gap)?;
                push(format!("test-switch-{}", gap), ClockConfig::Switchable(plan), None);
            }
        } else {
            tracing::debug!("no switch trigger configured, skipping switch scenarios");
        }

        Ok(Self {
            project: project.to_string(),
            project_dir: output_root.join(project),
            scenarios,
        })
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn project_dir(&self) -> &Path {
        &self.project_dir
    }

    pub fn scenarios(&self) -> &[ScenarioSpec] {
        &self.scenarios
    }

    /// Run every scenario in order. The first infrastructure error aborts the
    /// remaining scenarios; test failures are recorded and the matrix moves on.
    pub fn run(
        &self,
        engine: &mut Engine,
        command: &[String],
        overwrite: bool,
    ) -> SkewResult<MatrixReport> {
        let runs_file = self.project_dir.join(RUNS_FILE);
        let mut report = MatrixReport::new(&self.project);

        for (index, scenario) in self.scenarios.iter().enumerate() {
            tracing::info!(
                scenario = %scenario.name,
                index = index + 1,
                total = self.scenarios.len(),
                "running scenario"
            );
            let outcome = engine.execute(&RunRequest {
                command,
                clock: &scenario.clock,
                timezone: scenario.timezone.as_deref(),
                output: scenario.output_path.as_deref(),
                overwrite,
            })?;

            if let RunOutcome::Completed(run) = &outcome {
                append_jsonl(&runs_file, run)?;
            }
            report.add(scenario, outcome);
        }
        Ok(report)
    }
}

fn validate_factors(field: &str, factors: &[u32]) -> SkewResult<()> {
    let mut seen = HashSet::new();
    for &f in factors {
        if f == 0 {
            return Err(SkewError::Config {
                message: format!("matrix.{}: factor must be positive", field),
            });
        }
        if !seen.insert(f) {
            return Err(SkewError::Config {
                message: format!("matrix.{}: duplicate factor {}", field, f),
            });
        }
    }
    Ok(())
}

#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioStatus {
    Passed,
    Failed,
    Skipped,
}

#[derive(Debug, Serialize, Clone)]
pub struct ScenarioOutcome {
    pub name: String,
    pub status: ScenarioStatus,
    pub artifact: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run: Option<TestRun>,
}

#[derive(Debug, Serialize, Clone, Default)]
pub struct MatrixSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
}

#[derive(Debug, Serialize, Clone)]
pub struct MatrixReport {
    pub project: String,
    pub summary: MatrixSummary,
    pub outcomes: Vec<ScenarioOutcome>,
}

impl MatrixReport {
    pub fn new(project: &str) -> Self {
        Self {
            project: project.to_string(),
            summary: MatrixSummary::default(),
            outcomes: Vec::new(),
        }
    }

    pub fn add(&mut self, scenario: &ScenarioSpec, outcome: RunOutcome) {
        self.summary.total += 1;
        let (status, run) = match outcome {
            RunOutcome::Skipped { .. } => (ScenarioStatus::Skipped, None),
            RunOutcome::Completed(run) if run.failed => (ScenarioStatus::Failed, Some(run)),
            RunOutcome::Completed(run) => (ScenarioStatus::Passed, Some(run)),
        };
        match status {
            ScenarioStatus::Passed => self.summary.passed += 1,
            ScenarioStatus::Failed => self.summary.failed += 1,
            ScenarioStatus::Skipped => self.summary.skipped += 1,
        }
        self.outcomes.push(ScenarioOutcome {
            name: scenario.name.clone(),
            status,
            artifact: scenario.output_path.clone(),
            run,
        });
    }

    pub fn outcome(&self, name: &str) -> Option<&ScenarioOutcome> {
        self.outcomes.iter().find(|o| o.name == name)
    }

    /// Executed scenarios whose pass/fail differs from the real-time baseline.
    /// Empty when the baseline itself was skipped.
    pub fn divergent(&self) -> Vec<&ScenarioOutcome> {
        let Some(baseline) = self
            .outcome(BASELINE)
            .filter(|o| o.status != ScenarioStatus::Skipped)
        else {
            return Vec::new();
        };
        self.outcomes
            .iter()
            .filter(|o| o.name != DRY_RUN && o.name != BASELINE)
            .filter(|o| o.status != ScenarioStatus::Skipped && o.status != baseline.status)
            .collect()
    }
}
