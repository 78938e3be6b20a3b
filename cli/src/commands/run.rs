//! `acb run` command.

use acb_core::error::Result;
use acb_core::BuildConfig;
use acb_runtime::BuildContext;
use clap::Args;

#[derive(Args)]
pub struct RunArgs {
    /// Allow plain HTTP discovery and skip TLS verification
    #[arg(long)]
    pub insecure: bool,

    /// Command and arguments to run inside the build (use `--` before flags)
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

pub async fn execute(args: RunArgs, config: &BuildConfig) -> Result<()> {
    let config = config.clone().with_insecure(args.insecure);
    BuildContext::open(&config)?.run(args.command).await
}
