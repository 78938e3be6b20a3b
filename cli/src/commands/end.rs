//! `acb end` command.

use acb_core::error::Result;
use acb_core::BuildConfig;
use acb_runtime::BuildContext;
use clap::Args;

#[derive(Args)]
pub struct EndArgs;

pub async fn execute(_args: EndArgs, config: &BuildConfig) -> Result<()> {
    BuildContext::open(config)?.end()
}
