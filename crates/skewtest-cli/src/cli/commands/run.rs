use anyhow::Context;
use skewtest_core::command::tokenize;
use skewtest_core::{ClockConfig, RunOutcome, RunRequest};

use super::super::args::RunArgs;
use super::engine_builder::{build_engine, load_config};
use crate::exit_codes;

pub async fn run(args: RunArgs) -> anyhow::Result<i32> {
    let clock = ClockConfig::parse(&args.faketime, args.trigger.trigger())?;
    let cfg = load_config(&args.engine, None)?;
    let mut engine = build_engine(&cfg, cfg.shim.library(), &args.engine);
    let command = tokenize(&args.command);

    eprintln!("Clock:   {}", display_clock(&clock));
    if let Some(trigger) = clock.trigger() {
        eprintln!("Switch:  on {}", trigger);
    }
    eprintln!("Command: {:?}", command);

    let outcome = tokio::task::spawn_blocking(move || {
        engine.execute(&RunRequest {
            command: &command,
            clock: &clock,
            timezone: args.timezone.as_deref(),
            output: args.output.as_deref(),
            overwrite: args.overwrite,
        })
    })
    .await
    .context("run task failed")??;

    match outcome {
        RunOutcome::Skipped { artifact } => {
            eprintln!("Skipped: {} already exists", artifact.display());
            Ok(exit_codes::SUCCESS)
        }
        RunOutcome::Completed(run) => {
            println!("{}", serde_json::to_string(&run)?);
            if run.failed {
                Ok(exit_codes::COMMAND_FAILED)
            } else {
                Ok(exit_codes::SUCCESS)
            }
        }
    }
}

fn display_clock(clock: &ClockConfig) -> String {
    if clock.is_injected() {
        clock.to_string()
    } else {
        "real time".to_string()
    }
}
