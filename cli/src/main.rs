//! acb CLI entry point.

use clap::Parser;

use acb_cli::commands::{dispatch, Cli};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    acb_core::log::init(cli.debug);

    let name = cli.command.name();
    if let Err(e) = dispatch(cli).await {
        eprintln!("{name}: {e}");
        std::process::exit(e.exit_code());
    }
}
