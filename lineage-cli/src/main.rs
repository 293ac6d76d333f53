//! Lineage CLI - Command-line interface for the Lineage migration reconciler.

use clap::Parser;

use lineage_cli::cli::{Cli, Command};
use lineage_cli::commands;
use lineage_cli::error::CliResult;
use lineage_cli::{logging, output};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        output::newline();
        output::error(&e.to_string());
        if let Some(hint) = e.hint() {
            output::info(hint);
        }
        std::process::exit(e.exit_code());
    }
}

async fn run() -> CliResult<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let config = cli.config.as_path();
    match cli.command {
        Command::Init(args) => commands::init::run(args).await,
        Command::Check(args) => commands::check::run(args, config).await,
        Command::Fix(args) => commands::fix::run(args, config).await,
        Command::Sync(args) => commands::sync::run(args, config).await,
        Command::Autogen(args) => commands::autogen::run(args, config).await,
        Command::Status(args) => commands::status::run(args, config).await,
    }
}
