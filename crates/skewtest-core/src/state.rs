//! The shared clock-state file the shim re-polls in switch mode.
//!
//! There is exactly one per environment. The engine takes it by `&mut` for the
//! duration of a run, which together with strictly sequential scenarios keeps
//! a single "dirty" holder at a time.

use std::fs;
use std::path::{Path, PathBuf};

use crate::clock::NEUTRAL;
use crate::error::{SkewError, SkewResult};

#[derive(Debug)]
pub struct ClockStateFile {
    path: PathBuf,
}

impl ClockStateFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `~/.faketimerc`, the shim's default location.
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join(".faketimerc")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Atomically replace the file content.
    pub fn write(&mut self, value: &str) -> SkewResult<()> {
        write_atomic(&self.path, value.as_bytes()).map_err(|source| SkewError::ClockState {
            path: self.path.clone(),
            source,
        })
    }

    pub fn reset(&mut self) -> SkewResult<()> {
        self.write(NEUTRAL)
    }

    pub fn read(&self) -> SkewResult<String> {
        fs::read_to_string(&self.path).map_err(|source| SkewError::ClockState {
            path: self.path.clone(),
            source,
        })
    }

    /// Write `initial` and hand back a guard that resets to neutral when the
    /// run ends, however it ends.
    pub fn arm(&mut self, initial: &str) -> SkewResult<ArmedClockState<'_>> {
        self.reset()?;
        if initial != NEUTRAL {
            self.write(initial)?;
        }
        Ok(ArmedClockState {
            state: self,
            released: false,
        })
    }
}

/// Exclusive, dirty hold on the clock-state file.
#[derive(Debug)]
pub struct ArmedClockState<'a> {
    state: &'a mut ClockStateFile,
    released: bool,
}

impl ArmedClockState<'_> {
    pub fn set(&mut self, value: &str) -> SkewResult<()> {
        self.state.write(value)
    }

    pub fn path(&self) -> &Path {
        self.state.path()
    }

    /// Reset to neutral and surface any write error.
    pub fn release(mut self) -> SkewResult<()> {
        self.released = true;
        self.state.reset()
    }
}

impl Drop for ArmedClockState<'_> {
    fn drop(&mut self) {
        if !self.released {
            if let Err(e) = self.state.reset() {
                tracing::warn!(error = %e, "failed to reset clock state after aborted run");
            }
        }
    }
}

/// Write to a sibling temp file, then rename over the target.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let base = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "state".to_string());
    let tmp_path = path.with_file_name(format!(".{}.tmp-{}", base, std::process::id()));

    fs::write(&tmp_path, bytes)?;
    if let Err(err) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(err);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arm_writes_initial_and_drop_resets() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = ClockStateFile::new(dir.path().join("faketimerc"));
        {
            let mut armed = state.arm("-1d").unwrap();
            assert_eq!(fs::read_to_string(armed.path()).unwrap(), "-1d");
            armed.set("@2026-12-31 23:59:59").unwrap();
            assert_eq!(
                fs::read_to_string(armed.path()).unwrap(),
                "@2026-12-31 23:59:59"
            );
        }
        assert_eq!(state.read().unwrap(), "+0");
    }

    #[test]
    fn release_resets_and_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = ClockStateFile::new(dir.path().join("rc"));
        let mut armed = state.arm("+0").unwrap();
        armed.set("@2030-01-01 00:00:00").unwrap();
        armed.release().unwrap();
        assert_eq!(state.read().unwrap(), "+0");
        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("rc")]);
    }

    #[test]
    fn unwritable_location_is_a_clock_state_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        fs::write(&blocker, "x").unwrap();
        let mut state = ClockStateFile::new(blocker.join("rc"));
        assert!(matches!(state.reset(), Err(SkewError::ClockState { .. })));
    }
}
