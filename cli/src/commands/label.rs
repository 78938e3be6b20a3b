//! `acb label` command group.

use acb_core::error::Result;
use acb_core::BuildConfig;
use acb_runtime::BuildContext;
use clap::{Args, Subcommand};

#[derive(Subcommand)]
pub enum LabelCommand {
    /// Set a label
    Add(AddArgs),
    /// Remove a label
    #[command(alias = "rm")]
    Remove(RemoveArgs),
}

#[derive(Args)]
pub struct AddArgs {
    pub name: String,
    pub value: String,
}

#[derive(Args)]
pub struct RemoveArgs {
    pub name: String,
}

impl LabelCommand {
    pub fn name(&self) -> &'static str {
        match self {
            LabelCommand::Add(_) => "label add",
            LabelCommand::Remove(_) => "label remove",
        }
    }
}

pub async fn execute(cmd: LabelCommand, config: &BuildConfig) -> Result<()> {
    let ctx = BuildContext::open(config)?;
    match cmd {
        LabelCommand::Add(args) => ctx.add_label(&args.name, &args.value)?,
        LabelCommand::Remove(args) => ctx.remove_label(&args.name)?,
    };
    Ok(())
}
