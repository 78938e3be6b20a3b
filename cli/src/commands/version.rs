//! `acb version` command.

use acb_core::error::Result;
use acb_core::BuildConfig;
use clap::Args;

#[derive(Args)]
pub struct VersionArgs;

pub async fn execute(_args: VersionArgs, _config: &BuildConfig) -> Result<()> {
    println!("acb version {}", acb_core::VERSION);
    Ok(())
}
