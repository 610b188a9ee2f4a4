//! `skewtest.yaml` configuration.
//!
//! Every field is optional; CLI flags override whatever the file sets.
//!
//! ```yaml
//! output_root: ./output
//! shim:
//!   prefix: /usr/local
//!   self_test_timeout_secs: 60
//! matrix:
//!   speed_factors: [2, 1000, 10000]
//!   increment_factors: [2]
//!   switch_gaps: { from: 1, to: 20 }
//!   switch_prefix: "Running "
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::engine::ShimLibrary;
use crate::error::{SkewError, SkewResult};
use crate::state::ClockStateFile;
use crate::trigger::Trigger;

pub const DEFAULT_CONFIG_FILE: &str = "skewtest.yaml";
pub const DEFAULT_SHIM_REPO: &str = "https://github.com/wolfcw/libfaketime";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SkewConfig {
    pub output_root: PathBuf,
    /// Raw logs and run records; defaults to `<output_root>/logs`.
    pub log_dir: Option<PathBuf>,
    /// Shared clock-state file; defaults to `~/.faketimerc`.
    pub clock_file: Option<PathBuf>,
    pub shim: ShimSettings,
    pub matrix: MatrixSettings,
}

impl Default for SkewConfig {
    fn default() -> Self {
        Self {
            output_root: PathBuf::from("output"),
            log_dir: None,
            clock_file: None,
            shim: ShimSettings::default(),
            matrix: MatrixSettings::default(),
        }
    }
}

impl SkewConfig {
    pub fn from_yaml_str(content: &str) -> SkewResult<Self> {
        serde_yaml::from_str(content).map_err(|e| SkewError::Config {
            message: e.to_string(),
        })
    }

    pub fn load(path: &Path) -> SkewResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| SkewError::Config {
            message: format!("failed to read {}: {}", path.display(), e),
        })?;
        Self::from_yaml_str(&content).map_err(|e| SkewError::Config {
            message: format!("{}: {}", path.display(), e),
        })
    }

    /// Load `path` if given, else `./skewtest.yaml` if present, else defaults.
    pub fn discover(path: Option<&Path>) -> SkewResult<Self> {
        match path {
            Some(p) => Self::load(p),
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::load(Path::new(DEFAULT_CONFIG_FILE))
            }
            None => Ok(Self::default()),
        }
    }

    pub fn log_dir(&self) -> PathBuf {
        self.log_dir
            .clone()
            .unwrap_or_else(|| self.output_root.join("logs"))
    }

    pub fn clock_file(&self) -> PathBuf {
        self.clock_file
            .clone()
            .unwrap_or_else(ClockStateFile::default_path)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ShimSettings {
    pub repo: String,
    /// Checkout location; defaults to the user cache dir.
    pub source_dir: Option<PathBuf>,
    pub prefix: PathBuf,
    /// Explicit library paths override `prefix`.
    pub preload: Option<PathBuf>,
    pub preload_mt: Option<PathBuf>,
    pub self_test_timeout_secs: u64,
}

impl Default for ShimSettings {
    fn default() -> Self {
        Self {
            repo: DEFAULT_SHIM_REPO.to_string(),
            source_dir: None,
            prefix: PathBuf::from("/usr/local"),
            preload: None,
            preload_mt: None,
            self_test_timeout_secs: 60,
        }
    }
}

impl ShimSettings {
    pub fn source_dir(&self) -> PathBuf {
        self.source_dir.clone().unwrap_or_else(|| {
            dirs::cache_dir()
                .or_else(dirs::home_dir)
                .unwrap_or_else(|| PathBuf::from("/tmp"))
                .join("skewtest")
                .join("libfaketime")
        })
    }

    pub fn self_test_timeout(&self) -> Duration {
        Duration::from_secs(self.self_test_timeout_secs)
    }

    /// Libraries to preload when the shim is already installed.
    pub fn library(&self) -> ShimLibrary {
        self.library_over(ShimLibrary::installed_at(&self.prefix))
    }

    /// `installed` with any explicitly configured preload paths taking precedence.
    pub fn library_over(&self, installed: ShimLibrary) -> ShimLibrary {
        ShimLibrary {
            preload: self.preload.clone().or(installed.preload),
            preload_mt: self
                .preload_mt
                .clone()
                .or_else(|| self.preload.clone())
                .or(installed.preload_mt),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GapRange {
    pub from: u32,
    pub to: u32,
}

impl GapRange {
    pub fn iter(&self) -> std::ops::RangeInclusive<u32> {
        self.from..=self.to
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MatrixSettings {
    pub speed_factors: Vec<u32>,
    pub increment_factors: Vec<u32>,
    pub switch_gaps: GapRange,
    /// Year used for absolute instants; defaults to the current year.
    pub reference_year: Option<i32>,
    /// Switch scenarios are only generated when a trigger is set.
    pub switch_prefix: Option<String>,
    pub switch_pattern: Option<String>,
}

impl MatrixSettings {
    pub fn trigger(&self) -> SkewResult<Option<Trigger>> {
        match (&self.switch_prefix, &self.switch_pattern) {
            (Some(_), Some(_)) => Err(SkewError::Config {
                message: "set only one of matrix.switch_prefix and matrix.switch_pattern".into(),
            }),
            (Some(p), None) => Ok(Some(Trigger::prefix(p.clone()))),
            (None, Some(p)) => Ok(Some(Trigger::pattern(p.clone()))),
            (None, None) => Ok(None),
        }
    }
}

impl Default for MatrixSettings {
    fn default() -> Self {
        Self {
            speed_factors: vec![2, 1000, 10000],
            increment_factors: vec![2],
            switch_gaps: GapRange { from: 1, to: 20 },
            reference_year: None,
            switch_prefix: None,
            switch_pattern: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let cfg = SkewConfig::from_yaml_str("{}").unwrap();
        assert_eq!(cfg, SkewConfig::default());
        assert_eq!(cfg.log_dir(), PathBuf::from("output/logs"));
        assert_eq!(cfg.shim.self_test_timeout(), Duration::from_secs(60));
    }

    #[test]
    fn partial_file_overrides_selected_fields() {
        let cfg = SkewConfig::from_yaml_str(
            r#"
output_root: /var/skew
matrix:
  speed_factors: [5]
  switch_gaps: { from: 3, to: 4 }
  switch_prefix: "Running "
shim:
  preload: /opt/faketime/libfaketime.so.1
"#,
        )
        .unwrap();
        assert_eq!(cfg.output_root, PathBuf::from("/var/skew"));
        assert_eq!(cfg.matrix.speed_factors, vec![5]);
        assert_eq!(cfg.matrix.increment_factors, vec![2]);
        assert_eq!(cfg.matrix.switch_gaps.iter().collect::<Vec<_>>(), vec![3, 4]);
        assert_eq!(cfg.matrix.trigger().unwrap(), Some(Trigger::prefix("Running ")));
        let lib = cfg.shim.library();
        assert_eq!(lib.preload, Some(PathBuf::from("/opt/faketime/libfaketime.so.1")));
        assert_eq!(lib.preload_mt, lib.preload);
    }

    #[test]
    fn conflicting_triggers_are_rejected() {
        let cfg = SkewConfig::from_yaml_str(
            "matrix: { switch_prefix: a, switch_pattern: b }",
        )
        .unwrap();
        assert!(cfg.matrix.trigger().is_err());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = SkewConfig::from_yaml_str("outptu_root: x").unwrap_err();
        assert!(matches!(err, SkewError::Config { .. }));
    }

    #[test]
    fn default_library_follows_prefix() {
        let shim = ShimSettings {
            prefix: PathBuf::from("/opt/ft"),
            ..ShimSettings::default()
        };
        assert_eq!(
            shim.library().preload_mt,
            Some(PathBuf::from("/opt/ft/lib/faketime/libfaketimeMT.so.1"))
        );
    }

    #[test]
    fn explicit_preload_wins_over_provisioned_library() {
        let provisioned = ShimLibrary {
            preload: Some(PathBuf::from("/build/lib/libfaketime.so.1")),
            preload_mt: Some(PathBuf::from("/build/lib/libfaketimeMT.so.1")),
        };
        assert_eq!(ShimSettings::default().library_over(provisioned.clone()), provisioned);

        let shim = ShimSettings {
            preload: Some(PathBuf::from("/custom/libfaketime.so.1")),
            ..ShimSettings::default()
        };
        let lib = shim.library_over(provisioned);
        assert_eq!(lib.preload, Some(PathBuf::from("/custom/libfaketime.so.1")));
        assert_eq!(lib.preload_mt, Some(PathBuf::from("/custom/libfaketime.so.1")));
    }
}
