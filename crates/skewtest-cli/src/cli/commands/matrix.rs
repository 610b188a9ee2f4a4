use anyhow::Context;
use skewtest_core::command::tokenize;
use skewtest_core::{MatrixReport, ScenarioMatrix, ScenarioStatus};

use super::super::args::MatrixArgs;
use super::engine_builder::{build_engine, load_config, provision_shim};
use crate::exit_codes;

/// Test failures inside the matrix are results, not errors: the command only
/// exits nonzero when the harness itself breaks.
pub async fn run(args: MatrixArgs) -> anyhow::Result<i32> {
    let mut cfg = load_config(&args.engine, Some(&args.shim))?;
    if let Some(root) = &args.output_root {
        cfg.output_root = root.clone();
    }
    if let Some(year) = args.year {
        cfg.matrix.reference_year = Some(year);
    }
    if args.trigger.switch.is_some() || args.trigger.switch_regex.is_some() {
        cfg.matrix.switch_prefix = args.trigger.switch.clone();
        cfg.matrix.switch_pattern = args.trigger.switch_regex.clone();
    }

    let matrix = ScenarioMatrix::generate(&args.project, &cfg.output_root, &cfg.matrix)?;

    if args.list {
        for s in matrix.scenarios() {
            println!(
                "{:<34} {:<28} {:<18} {}",
                s.name,
                if s.clock.is_injected() { s.clock.to_string() } else { "-".into() },
                s.timezone.as_deref().unwrap_or("-"),
                s.output_path
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "-".into())
            );
        }
        return Ok(exit_codes::SUCCESS);
    }

    let library = if args.no_provision {
        cfg.shim.library()
    } else {
        cfg.shim.library_over(provision_shim(&cfg).await?)
    };

    let mut engine = build_engine(&cfg, library, &args.engine);
    let command = tokenize(&args.command);
    let overwrite = args.overwrite;

    eprintln!("Project:   {}", matrix.project());
    eprintln!("Scenarios: {}", matrix.scenarios().len());
    eprintln!("Output:    {}", matrix.project_dir().display());

    let report = tokio::task::spawn_blocking(move || matrix.run(&mut engine, &command, overwrite))
        .await
        .context("matrix task failed")??;

    print_summary(&report);
    Ok(exit_codes::SUCCESS)
}

fn print_summary(report: &MatrixReport) {
    eprintln!("──────────────────");
    for o in &report.outcomes {
        let status = match o.status {
            ScenarioStatus::Passed => "pass",
            ScenarioStatus::Failed => "FAIL",
            ScenarioStatus::Skipped => "skip",
        };
        eprintln!("  {:<4} {}", status, o.name);
    }
    let s = &report.summary;
    eprintln!(
        "{} scenarios: {} passed, {} failed, {} skipped",
        s.total, s.passed, s.failed, s.skipped
    );
    let divergent = report.divergent();
    if !divergent.is_empty() {
        eprintln!("Outcome differs from test-ori in:");
        for o in divergent {
            eprintln!("  - {}", o.name);
        }
    }
}
