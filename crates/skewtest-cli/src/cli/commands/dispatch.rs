use super::super::args::*;
use crate::exit_codes;

pub async fn dispatch(cli: Cli) -> anyhow::Result<i32> {
    match cli.cmd {
        Command::Run(args) => super::run::run(args).await,
        Command::Matrix(args) => super::matrix::run(args).await,
        Command::Provision(args) => super::provision::run(args).await,
        Command::MavenCommand(args) => super::maven::run(args),
        Command::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(exit_codes::SUCCESS)
        }
    }
}
