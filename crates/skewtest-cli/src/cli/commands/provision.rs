use skewtest_core::config::SkewConfig;

use super::super::args::ProvisionArgs;
use super::engine_builder::{apply_shim_overrides, provision_shim};
use crate::exit_codes;

pub async fn run(args: ProvisionArgs) -> anyhow::Result<i32> {
    let mut cfg = SkewConfig::discover(args.config.as_deref())?;
    apply_shim_overrides(&mut cfg, &args.shim);

    let installed = provision_shim(&cfg).await?;
    for lib in [installed.preload, installed.preload_mt].into_iter().flatten() {
        println!("{}", lib.display());
    }
    Ok(exit_codes::SUCCESS)
}
