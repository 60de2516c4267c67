//! mtgsage - Magic: The Gathering rules assistant
//!
//! Ingests the rules, glossary and card data, then answers rules questions
//! from the command line.

use anyhow::Result;
use mtgsage::cli::{self, Cli, Commands, Session};
use std::process::ExitCode;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> ExitCode {
    // Parse CLI arguments
    let cli = Cli::parse_args();

    // Setup logging; RUST_LOG wins over --verbose
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Cli) -> Result<()> {
    let session = Session::load(args.config, args.format, args.api_key.as_deref())?;

    // Execute command
    match args.command {
        Commands::Init(args) => cli::init(&session, args.force)?,
        Commands::Ingest(args) => cli::ingest(&session, &args).await?,
        Commands::Ask(args) => cli::ask(&session, &args).await?,
        Commands::Search(args) => cli::search(&session, &args).await?,
        Commands::Card(args) => cli::card(&session, &args)?,
        Commands::Rule(args) => cli::rule(&session, &args)?,
        Commands::Glossary(args) => cli::glossary(&session, &args)?,
        Commands::Stats => cli::stats(&session)?,
        Commands::Config(args) => cli::show_config(&session, &args)?,
    }

    Ok(())
}
