//! `acb cat-manifest` command.

use acb_core::error::Result;
use acb_core::BuildConfig;
use acb_runtime::BuildContext;
use clap::Args;

#[derive(Args)]
pub struct CatManifestArgs;

pub async fn execute(_args: CatManifestArgs, config: &BuildConfig) -> Result<()> {
    let manifest = BuildContext::open(config)?.manifest()?;
    println!("{}", serde_json::to_string_pretty(&manifest)?);
    Ok(())
}
