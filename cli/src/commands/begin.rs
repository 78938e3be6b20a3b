//! `acb begin` command.

use acb_core::error::Result;
use acb_core::BuildConfig;
use acb_runtime::BuildContext;
use clap::Args;

#[derive(Args)]
pub struct BeginArgs {
    /// Start image: a local ACI path (starting with `.` or `/`) or an image name
    pub start: Option<String>,

    /// Allow plain HTTP discovery and skip TLS verification
    #[arg(long)]
    pub insecure: bool,
}

pub async fn execute(args: BeginArgs, config: &BuildConfig) -> Result<()> {
    let config = config.clone().with_insecure(args.insecure);
    BuildContext::open(&config)?.begin(args.start.as_deref()).await
}
