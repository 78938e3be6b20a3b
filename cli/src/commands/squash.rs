//! `acb squash` command.

use acb_core::error::Result;
use acb_core::BuildConfig;
use acb_runtime::BuildContext;
use clap::Args;

#[derive(Args)]
pub struct SquashArgs {
    /// Allow plain HTTP discovery and skip TLS verification
    #[arg(long)]
    pub insecure: bool,
}

pub async fn execute(args: SquashArgs, config: &BuildConfig) -> Result<()> {
    let config = config.clone().with_insecure(args.insecure);
    BuildContext::open(&config)?.squash().await
}
