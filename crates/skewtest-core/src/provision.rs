//! Provisioning watchdog for the clock shim.
//!
//! The shim's `make test` is known to hang forever on some kernels in its
//! `CLOCK_MONOTONIC` test. The self-test therefore runs under a hard timeout.
//! A hang whose last output line names the monotonic test is recovered once by
//! building with `-DFORCE_MONOTONIC_FIX`; any other hang, or a second one, is
//! fatal. `make clean` runs after every self-test attempt.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;

use crate::engine::ShimLibrary;
use crate::error::{SkewError, SkewResult};

pub const MONOTONIC_MARKER: &str = "CLOCK_MONOTONIC";
pub const MONOTONIC_FIX_FLAG: &str = "CFLAGS += -DFORCE_MONOTONIC_FIX";
pub const DEFAULT_SELF_TEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Lines captured from a step, readable after the step's future was dropped.
#[derive(Debug, Clone, Default)]
pub struct OutputCapture {
    lines: Arc<Mutex<Vec<String>>>,
}

impl OutputCapture {
    pub fn push(&self, line: impl Into<String>) {
        self.lines
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(line.into());
    }

    pub fn last_line(&self) -> Option<String> {
        self.lines
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .last()
            .cloned()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

/// Build steps for the shim.
#[async_trait]
pub trait ShimToolchain: Send + Sync {
    /// Make sources available (no-op when already present).
    async fn fetch(&self) -> SkewResult<()>;
    /// Run the shim's self-test, pushing every output line into `capture`.
    async fn self_test(&self, capture: &OutputCapture) -> SkewResult<()>;
    async fn clean(&self) -> SkewResult<()>;
    async fn apply_monotonic_fix(&self) -> SkewResult<()>;
    async fn install(&self) -> SkewResult<ShimLibrary>;
}

/// Ephemeral bookkeeping for one provisioning.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProvisioningState {
    pub attempts: u32,
    pub hang_signature_seen: bool,
    pub patched: bool,
}

pub struct Watchdog<T> {
    toolchain: T,
    timeout: Duration,
}

impl<T: ShimToolchain> Watchdog<T> {
    pub fn new(toolchain: T) -> Self {
        Self {
            toolchain,
            timeout: DEFAULT_SELF_TEST_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn toolchain(&self) -> &T {
        &self.toolchain
    }

    /// Fetch, self-test (bounded), clean, install.
    pub async fn provision(&self) -> SkewResult<ShimLibrary> {
        self.toolchain.fetch().await?;

        let mut state = ProvisioningState::default();
        loop {
            state.attempts += 1;
            let capture = OutputCapture::default();
            let outcome = tokio::time::timeout(self.timeout, self.toolchain.self_test(&capture)).await;
            let cleaned = self.toolchain.clean().await;

            match outcome {
                Ok(tested) => {
                    tested?;
                    cleaned?;
                    break;
                }
                Err(_elapsed) => cleaned?,
            }

            let last = capture.last_line();
            let recognized = last
                .as_deref()
                .is_some_and(|line| line.contains(MONOTONIC_MARKER));
            if recognized && !state.patched {
                state.hang_signature_seen = true;
                tracing::warn!(
                    attempt = state.attempts,
                    "shim {} self-test hangs; rebuilding with FORCE_MONOTONIC_FIX",
                    MONOTONIC_MARKER
                );
                self.toolchain.apply_monotonic_fix().await?;
                state.patched = true;
                continue;
            }

            let reason = if recognized {
                format!("{} test still hangs after monotonic fix", MONOTONIC_MARKER)
            } else {
                format!(
                    "unrecognized hang, last line: {}",
                    last.as_deref().unwrap_or("<no output>")
                )
            };
            return Err(SkewError::ProvisioningHang {
                timeout: self.timeout,
                attempts: state.attempts,
                reason,
                output: capture.lines(),
            });
        }

        tracing::info!(
            attempts = state.attempts,
            patched = state.patched,
            "shim self-test passed, installing"
        );
        self.toolchain.install().await
    }
}

/// libfaketime built from a git checkout with `make`.
#[derive(Debug, Clone)]
pub struct MakeToolchain {
    repo: String,
    source_dir: PathBuf,
    prefix: PathBuf,
}

impl MakeToolchain {
    pub fn new(repo: impl Into<String>, source_dir: impl Into<PathBuf>, prefix: impl Into<PathBuf>) -> Self {
        Self {
            repo: repo.into(),
            source_dir: source_dir.into(),
            prefix: prefix.into(),
        }
    }

    pub fn source_dir(&self) -> &Path {
        &self.source_dir
    }

    async fn run_step(
        &self,
        step: &str,
        program: &str,
        args: &[&str],
        cwd: &Path,
        capture: &OutputCapture,
    ) -> SkewResult<()> {
        tracing::debug!(step, program, ?args, cwd = %cwd.display(), "provisioning step");
        let mut child = Command::new(program)
            .args(args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SkewError::step(step, format!("failed to spawn {}: {}", program, e), vec![]))?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let (_, _, status) = tokio::join!(
            collect_lines(stdout, capture),
            collect_lines(stderr, capture),
            child.wait()
        );
        let status = status.map_err(|e| SkewError::step(step, e.to_string(), capture.lines()))?;
        if !status.success() {
            return Err(SkewError::step(
                step,
                format!("exited with {}", status),
                capture.lines(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl ShimToolchain for MakeToolchain {
    async fn fetch(&self) -> SkewResult<()> {
        if self.source_dir.join("Makefile").exists() {
            tracing::info!(dir = %self.source_dir.display(), "shim sources present");
            return Ok(());
        }
        let parent = self
            .source_dir
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| SkewError::step("fetch", e.to_string(), vec![]))?;
        let dest = self.source_dir.to_string_lossy().into_owned();
        self.run_step(
            "fetch",
            "git",
            &["clone", "--depth", "1", &self.repo, &dest],
            parent,
            &OutputCapture::default(),
        )
        .await
    }

    async fn self_test(&self, capture: &OutputCapture) -> SkewResult<()> {
        self.run_step("self-test", "make", &["test"], &self.source_dir, capture)
            .await
    }

    async fn clean(&self) -> SkewResult<()> {
        self.run_step(
            "clean",
            "make",
            &["clean"],
            &self.source_dir,
            &OutputCapture::default(),
        )
        .await
    }

    async fn apply_monotonic_fix(&self) -> SkewResult<()> {
        let makefile = self.source_dir.join("src").join("Makefile");
        append_flag(&makefile, MONOTONIC_FIX_FLAG).await
    }

    async fn install(&self) -> SkewResult<ShimLibrary> {
        let prefix = format!("PREFIX={}", self.prefix.display());
        self.run_step(
            "install",
            "make",
            &["install", &prefix],
            &self.source_dir,
            &OutputCapture::default(),
        )
        .await?;
        Ok(ShimLibrary::installed_at(&self.prefix))
    }
}

async fn collect_lines<R>(reader: Option<R>, capture: &OutputCapture)
where
    R: AsyncRead + Unpin,
{
    let Some(reader) = reader else { return };
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::trace!(%line, "provisioning output");
        capture.push(line);
    }
}

/// Append `flag` as its own line unless it is already there.
pub async fn append_flag(makefile: &Path, flag: &str) -> SkewResult<()> {
    let patch_err = |e: std::io::Error| {
        SkewError::step(
            "monotonic-fix",
            format!("{}: {}", makefile.display(), e),
            vec![],
        )
    };
    let mut content = tokio::fs::read_to_string(makefile).await.map_err(patch_err)?;
    if content.lines().any(|l| l.trim() == flag) {
        return Ok(());
    }
    if !content.is_empty() && !content.ends_with('\n') {
        content.push('\n');
    }
    content.push_str(flag);
    content.push('\n');

    let tmp = makefile.with_extension("skewtest-tmp");
    tokio::fs::write(&tmp, content).await.map_err(patch_err)?;
    tokio::fs::rename(&tmp, makefile).await.map_err(patch_err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn flag_is_appended_once() {
        let dir = tempfile::tempdir().unwrap();
        let makefile = dir.path().join("Makefile");
        std::fs::write(&makefile, "CFLAGS += -O2").unwrap();

        append_flag(&makefile, MONOTONIC_FIX_FLAG).await.unwrap();
        append_flag(&makefile, MONOTONIC_FIX_FLAG).await.unwrap();

        let content = std::fs::read_to_string(&makefile).unwrap();
        assert_eq!(content, format!("CFLAGS += -O2\n{}\n", MONOTONIC_FIX_FLAG));
    }

    #[tokio::test]
    async fn missing_makefile_is_a_step_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = append_flag(&dir.path().join("nope"), MONOTONIC_FIX_FLAG)
            .await
            .unwrap_err();
        assert!(matches!(err, SkewError::Step { .. }));
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn capture_keeps_last_line() {
        let capture = OutputCapture::default();
        assert_eq!(capture.last_line(), None);
        capture.push("a");
        capture.clone().push("b");
        assert_eq!(capture.last_line().as_deref(), Some("b"));
        assert_eq!(capture.lines(), vec!["a", "b"]);
    }
}
