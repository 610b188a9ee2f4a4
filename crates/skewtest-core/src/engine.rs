//! Execution engine: run one command under one clock configuration.
//!
//! The child's stdout and stderr share a single pipe, so the log is the exact
//! interleaving the child produced. Each line is echoed, logged, and offered to
//! the switch trigger before the next one is read. A trigger match rewrites the
//! clock-state file; the shim picks the new instant up on its next poll, there
//! is no restart.
//!
//! A run ends when the child exits. Output still buffered at that point is
//! drained; a background process the command left behind does not keep the
//! run open.
//!
//! A nonzero exit is recorded in the returned [`TestRun`]. Only infrastructure
//! problems (spawn, log or state I/O, missing shim) come back as errors.

use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, PipeReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use crate::clock::ClockConfig;
use crate::error::{SkewError, SkewResult};
use crate::record::{RunRecorder, TestRun};
use crate::state::{ArmedClockState, ClockStateFile};
use crate::trigger::LineMatcher;

pub const ENV_PRELOAD: &str = "LD_PRELOAD";
pub const ENV_FAKETIME: &str = "FAKETIME";
pub const ENV_TIMESTAMP_FILE: &str = "FAKETIME_TIMESTAMP_FILE";
pub const ENV_DONT_FAKE_MONOTONIC: &str = "FAKETIME_DONT_FAKE_MONOTONIC";
pub const ENV_NO_CACHE: &str = "FAKETIME_NO_CACHE";
pub const ENV_TZ: &str = "TZ";

const POLL_INTERVAL: Duration = Duration::from_millis(50);
/// How long output already in the pipe is still read once the child exited.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Location of the installed clock shim.
///
/// With no preload path the shim variables are still exported, which is
/// enough when the shim is preloaded system-wide.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShimLibrary {
    pub preload: Option<PathBuf>,
    /// Thread-safe build, used for switch mode. Falls back to `preload`.
    pub preload_mt: Option<PathBuf>,
}

impl ShimLibrary {
    /// Libraries as laid out by `make install PREFIX=<prefix>`.
    pub fn installed_at(prefix: &Path) -> Self {
        let dir = prefix.join("lib").join("faketime");
        Self {
            preload: Some(dir.join("libfaketime.so.1")),
            preload_mt: Some(dir.join("libfaketimeMT.so.1")),
        }
    }

    /// Library to preload for `clock`, checked to exist.
    pub fn library_for(&self, clock: &ClockConfig) -> SkewResult<Option<&Path>> {
        let path = match clock {
            ClockConfig::RealTime => None,
            ClockConfig::Switchable(_) => self.preload_mt.as_deref().or(self.preload.as_deref()),
            _ => self.preload.as_deref(),
        };
        match path {
            Some(p) if !p.exists() => Err(SkewError::ShimMissing {
                path: p.to_path_buf(),
            }),
            other => Ok(other),
        }
    }
}

/// Environment changes applied on top of the inherited environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChildEnv {
    pub set: Vec<(&'static str, String)>,
    pub remove: Vec<&'static str>,
}

impl ChildEnv {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.set
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Translate a clock configuration into the shim's environment contract.
pub fn compose_env(
    clock: &ClockConfig,
    timezone: Option<&str>,
    library: Option<&Path>,
    state_file: &Path,
) -> ChildEnv {
    let mut env = ChildEnv::default();
    if let Some(lib) = library {
        env.set.push((ENV_PRELOAD, lib.display().to_string()));
    }
    match clock {
        ClockConfig::RealTime => {
            env.remove.extend([ENV_FAKETIME, ENV_TIMESTAMP_FILE]);
        }
        ClockConfig::Switchable(_) => {
            // FAKETIME would shadow the state file.
            env.remove.push(ENV_FAKETIME);
            env.set
                .push((ENV_TIMESTAMP_FILE, state_file.display().to_string()));
            env.set.push((ENV_NO_CACHE, "1".into()));
            env.set.push((ENV_DONT_FAKE_MONOTONIC, "1".into()));
        }
        other => {
            env.set
                .push((ENV_FAKETIME, other.shim_value().unwrap_or_default()));
            env.set.push((ENV_DONT_FAKE_MONOTONIC, "1".into()));
        }
    }
    if let Some(tz) = timezone.filter(|tz| !tz.is_empty()) {
        env.set.push((ENV_TZ, tz.to_string()));
    }
    env
}

/// One invocation.
#[derive(Debug, Clone, Copy)]
pub struct RunRequest<'a> {
    pub command: &'a [String],
    pub clock: &'a ClockConfig,
    /// Empty or `None` keeps the environment default.
    pub timezone: Option<&'a str>,
    /// Scenario artifact; `None` for ad-hoc runs.
    pub output: Option<&'a Path>,
    pub overwrite: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// Artifact already present and overwrite not requested; nothing ran.
    Skipped { artifact: PathBuf },
    Completed(TestRun),
}

pub struct Engine {
    shim: ShimLibrary,
    state: ClockStateFile,
    recorder: RunRecorder,
    workdir: Option<PathBuf>,
    echo: Box<dyn Write + Send>,
}

impl Engine {
    pub fn new(shim: ShimLibrary, state: ClockStateFile, recorder: RunRecorder) -> Self {
        Self {
            shim,
            state,
            recorder,
            workdir: None,
            echo: Box::new(std::io::stdout()),
        }
    }

    /// Run commands from this directory instead of the current one.
    pub fn with_workdir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.workdir = Some(dir.into());
        self
    }

    /// Where child output is echoed (stdout by default).
    pub fn with_echo(mut self, echo: Box<dyn Write + Send>) -> Self {
        self.echo = echo;
        self
    }

    pub fn state(&self) -> &ClockStateFile {
        &self.state
    }

    pub fn recorder(&self) -> &RunRecorder {
        &self.recorder
    }

    pub fn execute(&mut self, req: &RunRequest<'_>) -> SkewResult<RunOutcome> {
        if let Some(artifact) = req.output {
            if artifact.exists() && !req.overwrite {
                tracing::info!(artifact = %artifact.display(), "artifact exists, skipping");
                return Ok(RunOutcome::Skipped {
                    artifact: artifact.to_path_buf(),
                });
            }
        }

        let (program, args) = req.command.split_first().ok_or(SkewError::EmptyCommand)?;
        let library = self.shim.library_for(req.clock)?;
        let matcher = req.clock.trigger().map(|t| t.matcher()).transpose()?;
        let env = compose_env(req.clock, req.timezone, library, self.state.path());

        let run = self.recorder.begin(req.command, req.clock, req.timezone);
        let log_path = self.recorder.log_path(&run);
        let mut sink = LogSink::open(&log_path, req.output)?;

        tracing::info!(
            command = ?req.command,
            clock = %req.clock,
            timezone = req.timezone.unwrap_or(""),
            log = %log_path.display(),
            "starting run"
        );

        let mut armed = match req.clock.switch_plan() {
            Some(plan) => Some(self.state.arm(&plan.initial.to_string())?),
            None => None,
        };
        let switch = req
            .clock
            .switch_plan()
            .map(|p| (p.switch_value(), matcher));

        let (mut child, reader) = spawn_merged(program, args, &env, self.workdir.as_deref())?;
        let lines = match read_lines(reader, program) {
            Ok(lines) => lines,
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(e);
            }
        };

        let pumped = pump(
            &mut child,
            lines,
            &mut sink,
            self.echo.as_mut(),
            switch.as_ref().and_then(|(value, m)| m.as_deref().map(|m| (value.as_str(), m))),
            armed.as_mut(),
        );
        let status = match pumped {
            Ok(status) => status,
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(e);
            }
        };

        if let Some(armed) = armed {
            armed.release()?;
        }
        sink.commit()?;

        let run = run.finish(status.code());
        let record = self.recorder.persist(&run)?;
        tracing::info!(
            failed = run.failed,
            exit_code = ?run.exit_code,
            record = %record.display(),
            "run finished"
        );
        Ok(RunOutcome::Completed(run))
    }
}

fn spawn_merged(
    program: &str,
    args: &[String],
    env: &ChildEnv,
    workdir: Option<&Path>,
) -> SkewResult<(Child, PipeReader)> {
    let spawn_err = |source| SkewError::Spawn {
        program: program.to_string(),
        source,
    };
    let (reader, writer) = std::io::pipe().map_err(spawn_err)?;
    let writer_err = writer.try_clone().map_err(spawn_err)?;

    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(writer)
        .stderr(writer_err);
    for key in &env.remove {
        cmd.env_remove(key);
    }
    for (key, value) in &env.set {
        cmd.env(key, value);
    }
    if let Some(dir) = workdir {
        cmd.current_dir(dir);
    }

    let child = cmd.spawn().map_err(spawn_err)?;
    // `cmd` still owns our copies of the write end; dropping it lets the
    // reader see EOF once the child exits.
    drop(cmd);
    Ok((child, reader))
}

/// Read the merged output on its own thread, one line per message.
///
/// The thread ends at EOF or once the receiver is gone. A background process
/// that inherited the write end can keep it blocked after the run is over;
/// it is left detached.
fn read_lines(reader: PipeReader, program: &str) -> SkewResult<Receiver<io::Result<Vec<u8>>>> {
    let (tx, rx) = mpsc::channel();
    thread::Builder::new()
        .name("skewtest-output".into())
        .spawn(move || {
            let mut reader = BufReader::new(reader);
            loop {
                let mut buf = Vec::new();
                match reader.read_until(b'\n', &mut buf) {
                    Ok(0) => return,
                    Ok(_) => {
                        if tx.send(Ok(buf)).is_err() {
                            return;
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(Err(e));
                        return;
                    }
                }
            }
        })
        .map_err(|source| SkewError::Spawn {
            program: program.to_string(),
            source,
        })?;
    Ok(rx)
}

/// Drive the run until the child has exited and its output is drained.
///
/// Output ends at EOF, or [`DRAIN_GRACE`] after the child exits when something
/// it left running still holds the pipe open.
fn pump(
    child: &mut Child,
    lines: Receiver<io::Result<Vec<u8>>>,
    sink: &mut LogSink,
    echo: &mut (dyn Write + Send),
    switch: Option<(&str, &dyn LineMatcher)>,
    mut armed: Option<&mut ArmedClockState<'_>>,
) -> SkewResult<ExitStatus> {
    let mut exited: Option<ExitStatus> = None;
    let mut drain_until: Option<Instant> = None;
    loop {
        let wait = match drain_until {
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    tracing::debug!("output still open after exit, detaching reader");
                    break;
                }
                (deadline - now).min(POLL_INTERVAL)
            }
            None => POLL_INTERVAL,
        };

        match lines.recv_timeout(wait) {
            Ok(Ok(buf)) => {
                let line = String::from_utf8_lossy(&buf);

                // Echo is best effort; a closed terminal must not abort the run.
                let _ = echo.write_all(line.as_bytes());
                let _ = echo.flush();
                sink.write(&line)?;

                if let (Some((value, matcher)), Some(armed)) = (switch, armed.as_deref_mut()) {
                    if matcher.matches(line.trim_end_matches(&['\r', '\n'][..])) {
                        armed.set(value)?;
                        tracing::debug!(switch_to = value, "trigger matched, clock switched");
                    }
                }
            }
            Ok(Err(e)) => return Err(SkewError::log(sink.log_path(), e)),
            Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }

        if exited.is_none() {
            if let Some(status) = child
                .try_wait()
                .map_err(|e| SkewError::log(sink.log_path(), e))?
            {
                exited = Some(status);
                drain_until = Some(Instant::now() + DRAIN_GRACE);
            }
        }
    }

    match exited {
        Some(status) => Ok(status),
        None => child.wait().map_err(|e| SkewError::log(sink.log_path(), e)),
    }
}

/// Scoped log plus the optional scenario artifact. The artifact is written
/// under a `.partial` name and only renamed into place by [`LogSink::commit`],
/// so an aborted run never looks completed to a resumed matrix.
struct LogSink {
    log: BufWriter<File>,
    log_path: PathBuf,
    artifact: Option<PendingArtifact>,
}

struct PendingArtifact {
    file: BufWriter<File>,
    partial: PathBuf,
    target: PathBuf,
}

impl LogSink {
    fn open(log_path: &Path, artifact: Option<&Path>) -> SkewResult<Self> {
        let log = create_with_parents(log_path)?;
        let artifact = match artifact {
            Some(target) => {
                let name = target
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let partial = target.with_file_name(format!("{}.partial", name));
                Some(PendingArtifact {
                    file: create_with_parents(&partial)?,
                    partial,
                    target: target.to_path_buf(),
                })
            }
            None => None,
        };
        Ok(Self {
            log,
            log_path: log_path.to_path_buf(),
            artifact,
        })
    }

    fn log_path(&self) -> &Path {
        &self.log_path
    }

    fn write(&mut self, line: &str) -> SkewResult<()> {
        self.log
            .write_all(line.as_bytes())
            .map_err(|e| SkewError::log(&self.log_path, e))?;
        if let Some(a) = self.artifact.as_mut() {
            a.file
                .write_all(line.as_bytes())
                .map_err(|e| SkewError::log(&a.partial, e))?;
        }
        Ok(())
    }

    fn commit(mut self) -> SkewResult<()> {
        self.log
            .flush()
            .map_err(|e| SkewError::log(&self.log_path, e))?;
        if let Some(mut a) = self.artifact.take() {
            a.file.flush().map_err(|e| SkewError::log(&a.partial, e))?;
            fs::rename(&a.partial, &a.target).map_err(|e| SkewError::log(&a.target, e))?;
        }
        Ok(())
    }
}

impl Drop for LogSink {
    fn drop(&mut self) {
        let _ = self.log.flush();
        if let Some(a) = self.artifact.take() {
            drop(a.file);
            let _ = fs::remove_file(&a.partial);
        }
    }
}

fn create_with_parents(path: &Path) -> SkewResult<BufWriter<File>> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| SkewError::log(parent, e))?;
    }
    File::create(path)
        .map(BufWriter::new)
        .map_err(|e| SkewError::log(path, e))
}
