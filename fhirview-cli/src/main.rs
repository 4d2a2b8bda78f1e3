//! fhirview CLI entry point.

use clap::Parser;

use fhirview_cli::cli::{Cli, Command};
use fhirview_cli::commands;
use fhirview_cli::error::CliResult;
use fhirview_cli::output;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = run().await {
        output::newline();
        output::error(&e.to_string());
        std::process::exit(1);
    }
}

async fn run() -> CliResult<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Refresh(args) => commands::refresh::run(args).await,
        Command::Validate(args) => commands::validate::run(args).await,
        Command::Views(args) => commands::views::run(args.action).await,
    }
}
