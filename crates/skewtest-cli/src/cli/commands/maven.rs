use std::io::BufRead;

use anyhow::Context;
use skewtest_core::command::maven_test_command;

use super::super::args::MavenCommandArgs;
use crate::exit_codes;

pub fn run(args: MavenCommandArgs) -> anyhow::Result<i32> {
    let mut tests = args.tests;
    if args.stdin {
        for line in std::io::stdin().lock().lines() {
            let line = line.context("failed to read test names from stdin")?;
            if line.trim().is_empty() {
                break;
            }
            tests.push(line);
        }
    }

    let command = maven_test_command(&tests);
    if args.json {
        println!("{}", serde_json::to_string(&command)?);
    } else {
        println!("{}", command.join(" "));
    }
    Ok(exit_codes::SUCCESS)
}
