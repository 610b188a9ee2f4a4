use clap::Parser;

mod cli;
pub mod exit_codes;

use cli::args::Cli;
use cli::commands::dispatch;
use skewtest_core::SkewError;

#[tokio::main(flavor = "multi_thread")]
async fn main() {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info");
    }
    env_logger::init();
    let cli = Cli::parse();
    let code = match dispatch(cli).await {
        Ok(code) => code,
        Err(e) => {
            let skew = e.downcast_ref::<SkewError>();
            if let Some(skew) = skew {
                for line in skew.captured_output() {
                    eprintln!("  | {}", line);
                }
            }
            eprintln!("fatal: {e:?}");
            skew.map(SkewError::exit_code)
                .unwrap_or(exit_codes::INTERNAL_ERROR)
        }
    };
    std::process::exit(code);
}
