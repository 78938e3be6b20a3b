//! `acb dependency` command group.

use acb_core::error::Result;
use acb_core::BuildConfig;
use acb_runtime::{BuildContext, Labels};
use clap::{Args, Subcommand};

use super::parse_label;

#[derive(Subcommand)]
pub enum DependencyCommand {
    /// Add a dependency, replacing any existing one with the same name
    Add(AddArgs),
    /// Remove a dependency by name
    #[command(alias = "rm")]
    Remove(RemoveArgs),
}

#[derive(Args)]
pub struct AddArgs {
    /// Dependency image name, e.g. example.com/base
    pub name: String,

    /// Expected content key of the dependency (sha512-...)
    #[arg(long)]
    pub image_id: Option<String>,

    /// Label to match, as name=value (repeatable)
    #[arg(long = "label", short = 'l', value_parser = parse_label)]
    pub labels: Vec<(String, String)>,

    /// Expected size of the dependency archive in bytes
    #[arg(long)]
    pub size: Option<u64>,

    /// Allow plain HTTP discovery and skip TLS verification
    #[arg(long)]
    pub insecure: bool,
}

#[derive(Args)]
pub struct RemoveArgs {
    /// Dependency image name
    pub name: String,
}

impl DependencyCommand {
    pub fn name(&self) -> &'static str {
        match self {
            DependencyCommand::Add(_) => "dependency add",
            DependencyCommand::Remove(_) => "dependency remove",
        }
    }
}

pub async fn execute(cmd: DependencyCommand, config: &BuildConfig) -> Result<()> {
    match cmd {
        DependencyCommand::Add(args) => {
            let labels = Labels::from_pairs(args.labels)?;
            let config = config.clone().with_insecure(args.insecure);
            BuildContext::open(&config)?
                .add_dependency(&args.name, args.image_id.as_deref(), labels, args.size)
                .await?;
        }
        DependencyCommand::Remove(args) => {
            BuildContext::open(config)?.remove_dependency(&args.name)?;
        }
    }
    Ok(())
}
