//! `acb environment` command group.

use acb_core::error::Result;
use acb_core::BuildConfig;
use acb_runtime::BuildContext;
use clap::{Args, Subcommand};

#[derive(Subcommand)]
pub enum EnvironmentCommand {
    /// Set an environment variable
    Add(AddArgs),
    /// Remove an environment variable
    #[command(alias = "rm")]
    Remove(RemoveArgs),
}

#[derive(Args)]
pub struct AddArgs {
    pub name: String,
    #[arg(allow_hyphen_values = true)]
    pub value: String,
}

#[derive(Args)]
pub struct RemoveArgs {
    pub name: String,
}

impl EnvironmentCommand {
    pub fn name(&self) -> &'static str {
        match self {
            EnvironmentCommand::Add(_) => "environment add",
            EnvironmentCommand::Remove(_) => "environment remove",
        }
    }
}

pub async fn execute(cmd: EnvironmentCommand, config: &BuildConfig) -> Result<()> {
    let ctx = BuildContext::open(config)?;
    match cmd {
        EnvironmentCommand::Add(args) => ctx.add_env(&args.name, &args.value)?,
        EnvironmentCommand::Remove(args) => ctx.remove_env(&args.name)?,
    };
    Ok(())
}
