//! `acb set-exec` command.

use acb_core::error::Result;
use acb_core::BuildConfig;
use acb_runtime::BuildContext;
use clap::Args;

#[derive(Args)]
pub struct SetExecArgs {
    /// Command and arguments (use `--` before flags)
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    pub exec: Vec<String>,
}

pub async fn execute(args: SetExecArgs, config: &BuildConfig) -> Result<()> {
    BuildContext::open(config)?.set_exec(args.exec)?;
    Ok(())
}
