//! `acb set-name` command.

use acb_core::error::Result;
use acb_core::BuildConfig;
use acb_runtime::BuildContext;
use clap::Args;

#[derive(Args)]
pub struct SetNameArgs {
    /// New image name, e.g. example.com/app
    pub name: String,
}

pub async fn execute(args: SetNameArgs, config: &BuildConfig) -> Result<()> {
    BuildContext::open(config)?.set_name(&args.name)?;
    Ok(())
}
