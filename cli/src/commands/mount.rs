//! `acb mount` command group.

use acb_core::error::Result;
use acb_core::BuildConfig;
use acb_runtime::BuildContext;
use clap::{Args, Subcommand};

#[derive(Subcommand)]
pub enum MountCommand {
    /// Add a mount point, replacing any existing one with the same name
    Add(AddArgs),
    /// Remove a mount point by name
    #[command(alias = "rm")]
    Remove(RemoveArgs),
}

#[derive(Args)]
pub struct AddArgs {
    /// Mount point name
    pub name: String,

    /// Path inside the image
    pub path: String,

    /// Mount read-only
    #[arg(long)]
    pub read_only: bool,
}

#[derive(Args)]
pub struct RemoveArgs {
    /// Mount point name
    pub name: String,
}

impl MountCommand {
    pub fn name(&self) -> &'static str {
        match self {
            MountCommand::Add(_) => "mount add",
            MountCommand::Remove(_) => "mount remove",
        }
    }
}

pub async fn execute(cmd: MountCommand, config: &BuildConfig) -> Result<()> {
    let ctx = BuildContext::open(config)?;
    match cmd {
        MountCommand::Add(args) => ctx.add_mount(&args.name, &args.path, args.read_only)?,
        MountCommand::Remove(args) => ctx.remove_mount(&args.name)?,
    };
    Ok(())
}
