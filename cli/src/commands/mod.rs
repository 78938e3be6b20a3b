//! CLI command definitions and dispatch.

mod begin;
mod cat_manifest;
mod dependency;
mod end;
mod environment;
mod label;
mod mount;
mod run;
mod set_exec;
mod set_name;
mod squash;
mod store;
mod version;
mod write;

use std::path::PathBuf;

use acb_core::error::Result;
use acb_core::BuildConfig;
use clap::{Parser, Subcommand};

/// acb - build ACI container images incrementally.
#[derive(Parser)]
#[command(name = "acb", version, about)]
pub struct Cli {
    /// Directory holding the build context (defaults to the current directory)
    #[arg(long, global = true, env = "ACBUILD_WORK_PATH")]
    pub work_path: Option<PathBuf>,

    /// Print debug output
    #[arg(long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Command {
    /// Start a new build, optionally from an existing image
    Begin(begin::BeginArgs),
    /// End the current build, keeping downloaded dependencies
    End(end::EndArgs),
    /// Write the current build to an ACI file
    Write(write::WriteArgs),
    /// Print the current manifest
    CatManifest(cat_manifest::CatManifestArgs),
    /// Set the image name
    SetName(set_name::SetNameArgs),
    /// Set the command the image runs
    SetExec(set_exec::SetExecArgs),
    /// Manage dependencies
    #[command(subcommand, alias = "dep")]
    Dependency(dependency::DependencyCommand),
    /// Manage mount points
    #[command(subcommand)]
    Mount(mount::MountCommand),
    /// Manage labels
    #[command(subcommand)]
    Label(label::LabelCommand),
    /// Manage environment variables
    #[command(subcommand, alias = "env")]
    Environment(environment::EnvironmentCommand),
    /// Merge every dependency into the rootfs
    Squash(squash::SquashArgs),
    /// Run a command inside the current build
    Run(run::RunArgs),
    /// Inspect and manage the dependency store
    #[command(subcommand)]
    Store(store::StoreCommand),
    /// Show version information
    Version(version::VersionArgs),
}

impl Command {
    /// Name used to prefix error output.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Begin(_) => "begin",
            Command::End(_) => "end",
            Command::Write(_) => "write",
            Command::CatManifest(_) => "cat-manifest",
            Command::SetName(_) => "set-name",
            Command::SetExec(_) => "set-exec",
            Command::Dependency(cmd) => cmd.name(),
            Command::Mount(cmd) => cmd.name(),
            Command::Label(cmd) => cmd.name(),
            Command::Environment(cmd) => cmd.name(),
            Command::Squash(_) => "squash",
            Command::Run(_) => "run",
            Command::Store(cmd) => cmd.name(),
            Command::Version(_) => "version",
        }
    }
}

impl Cli {
    /// Configuration for this invocation.
    pub fn config(&self) -> Result<BuildConfig> {
        let work_dir = match &self.work_path {
            Some(path) => path.clone(),
            None => std::env::current_dir()?,
        };
        Ok(BuildConfig::for_work_dir(work_dir).with_debug(self.debug))
    }
}

/// Parse a `name=value` label argument.
pub(crate) fn parse_label(s: &str) -> std::result::Result<(String, String), String> {
    match s.split_once('=') {
        Some((name, value)) if !name.is_empty() => Ok((name.to_string(), value.to_string())),
        _ => Err(format!("expected name=value, got {s:?}")),
    }
}

/// Dispatch a parsed CLI to the appropriate command handler.
pub async fn dispatch(cli: Cli) -> Result<()> {
    let config = cli.config()?;
    tracing::debug!(work_dir = %config.work_dir.display(), command = cli.command.name(), "Dispatching");

    match cli.command {
        Command::Begin(args) => begin::execute(args, &config).await,
        Command::End(args) => end::execute(args, &config).await,
        Command::Write(args) => write::execute(args, &config).await,
        Command::CatManifest(args) => cat_manifest::execute(args, &config).await,
        Command::SetName(args) => set_name::execute(args, &config).await,
        Command::SetExec(args) => set_exec::execute(args, &config).await,
        Command::Dependency(cmd) => dependency::execute(cmd, &config).await,
        Command::Mount(cmd) => mount::execute(cmd, &config).await,
        Command::Label(cmd) => label::execute(cmd, &config).await,
        Command::Environment(cmd) => environment::execute(cmd, &config).await,
        Command::Squash(args) => squash::execute(args, &config).await,
        Command::Run(args) => run::execute(args, &config).await,
        Command::Store(cmd) => store::execute(cmd, &config).await,
        Command::Version(args) => version::execute(args, &config).await,
    }
}
