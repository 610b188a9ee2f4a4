use anyhow::Context;
use skewtest_core::config::SkewConfig;
use skewtest_core::provision::{MakeToolchain, Watchdog};
use skewtest_core::{ClockStateFile, Engine, RunRecorder, ShimLibrary};

use super::super::args::{EngineArgs, ShimBuildArgs};

/// Config file (or defaults) with command-line overrides applied.
pub(crate) fn load_config(engine: &EngineArgs, shim: Option<&ShimBuildArgs>) -> anyhow::Result<SkewConfig> {
    let mut cfg = SkewConfig::discover(engine.config.as_deref()).context("failed to load config")?;

    if let Some(p) = &engine.preload {
        cfg.shim.preload = Some(p.clone());
    }
    if let Some(p) = &engine.preload_mt {
        cfg.shim.preload_mt = Some(p.clone());
    }
    if let Some(p) = &engine.clock_file {
        cfg.clock_file = Some(p.clone());
    }
    if let Some(p) = &engine.log_dir {
        cfg.log_dir = Some(p.clone());
    }
    if let Some(shim) = shim {
        apply_shim_overrides(&mut cfg, shim);
    }
    Ok(cfg)
}

pub(crate) fn apply_shim_overrides(cfg: &mut SkewConfig, shim: &ShimBuildArgs) {
    if let Some(repo) = &shim.shim_repo {
        cfg.shim.repo = repo.clone();
    }
    if let Some(dir) = &shim.shim_source {
        cfg.shim.source_dir = Some(dir.clone());
    }
    if let Some(prefix) = &shim.shim_prefix {
        cfg.shim.prefix = prefix.clone();
    }
    if let Some(secs) = shim.self_test_timeout {
        cfg.shim.self_test_timeout_secs = secs;
    }
}

pub(crate) fn build_engine(cfg: &SkewConfig, library: ShimLibrary, engine: &EngineArgs) -> Engine {
    let built = Engine::new(
        library,
        ClockStateFile::new(cfg.clock_file()),
        RunRecorder::new(cfg.log_dir()),
    );
    match &engine.workdir {
        Some(dir) => built.with_workdir(dir),
        None => built,
    }
}

/// Build and install the shim under the watchdog.
pub(crate) async fn provision_shim(cfg: &SkewConfig) -> anyhow::Result<ShimLibrary> {
    let toolchain = MakeToolchain::new(
        cfg.shim.repo.clone(),
        cfg.shim.source_dir(),
        cfg.shim.prefix.clone(),
    );
    eprintln!(
        "Provisioning clock shim from {} into {}",
        cfg.shim.repo,
        toolchain.source_dir().display()
    );
    let installed = Watchdog::new(toolchain)
        .with_timeout(cfg.shim.self_test_timeout())
        .provision()
        .await?;
    tracing::info!(
        preload = ?installed.preload,
        preload_mt = ?installed.preload_mt,
        "clock shim installed"
    );
    Ok(installed)
}
