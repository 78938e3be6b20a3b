//! `acb write` command.

use std::path::PathBuf;

use acb_core::error::Result;
use acb_core::BuildConfig;
use acb_runtime::{BuildContext, GpgSigner, Signer};
use clap::Args;

#[derive(Args)]
pub struct WriteArgs {
    /// Output ACI file
    pub output: PathBuf,

    /// Replace the output file if it exists
    #[arg(long)]
    pub overwrite: bool,

    /// Write a detached gpg signature next to the image
    #[arg(long)]
    pub sign: bool,

    /// Flags passed to gpg instead of the defaults (after `--`)
    #[arg(last = true, requires = "sign")]
    pub gpg_flags: Vec<String>,
}

pub async fn execute(args: WriteArgs, config: &BuildConfig) -> Result<()> {
    let config = config.clone().with_overwrite(args.overwrite);
    let ctx = BuildContext::open(&config)?;

    let signer = if args.gpg_flags.is_empty() {
        GpgSigner::default()
    } else {
        GpgSigner::new(args.gpg_flags)
    };
    let signer: Option<&dyn Signer> = if args.sign { Some(&signer) } else { None };

    if let Some(signature) = ctx.write(&args.output, signer)? {
        println!("{}", signature.display());
    }
    Ok(())
}
