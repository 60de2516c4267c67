//! CLI interface using clap
//!
//! Provides the command-line interface for mtgsage

mod commands;

pub use commands::*;

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// mtgsage - Magic: The Gathering rules assistant
#[derive(Parser, Debug)]
#[command(name = "mtgsage")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Configuration file (defaults to mtgsage.toml in the data directory)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format (text, json)
    #[arg(short = 'o', long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// API key for OpenAI-compatible services
    #[arg(long, global = true, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write the default configuration and create the database
    Init(InitArgs),

    /// Parse the sources, fill the database and build the index
    Ingest(IngestArgs),

    /// Answer a rules question
    Ask(AskArgs),

    /// Search the index without generating an answer
    Search(SearchArgs),

    /// Look up a card and its rulings
    Card(CardArgs),

    /// Show a rule and its sub-rules
    Rule(RuleArgs),

    /// Look up a glossary term
    Glossary(GlossaryArgs),

    /// Show database and index statistics
    Stats,

    /// Show configuration
    Config(ConfigArgs),
}

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Arguments for init command
#[derive(Args, Debug)]
pub struct InitArgs {
    /// Overwrite an existing configuration file
    #[arg(short, long)]
    pub force: bool,
}

/// Arguments for ingest command
#[derive(Args, Debug)]
pub struct IngestArgs {
    /// Only fill the database
    #[arg(long)]
    pub skip_index: bool,

    /// Rebuild the index even when the stored one is current
    #[arg(long, conflicts_with = "skip_index")]
    pub rebuild: bool,
}

/// Arguments for ask command
#[derive(Args, Debug)]
pub struct AskArgs {
    /// The question
    #[arg(required = true, num_args = 1..)]
    pub question: Vec<String>,

    /// Print the cards, rules and passages used
    #[arg(short, long)]
    pub show_sources: bool,
}

/// Arguments for search command
#[derive(Args, Debug)]
pub struct SearchArgs {
    /// Search text
    #[arg(required = true, num_args = 1..)]
    pub query: Vec<String>,

    /// Number of results
    #[arg(short)]
    pub k: Option<usize>,

    /// Minimum similarity score
    #[arg(long)]
    pub min_score: Option<f64>,
}

/// Arguments for card command
#[derive(Args, Debug)]
#[command(group(clap::ArgGroup::new("lookup").required(true).args(["name", "oracle_id"])))]
pub struct CardArgs {
    /// Card name (case-insensitive)
    #[arg(num_args = 1..)]
    pub name: Vec<String>,

    /// Look up by oracle id instead
    #[arg(long)]
    pub oracle_id: Option<String>,
}

/// Arguments for rule command
#[derive(Args, Debug)]
pub struct RuleArgs {
    /// Rule number, such as 702.19 or 100.1a
    pub number: String,
}

/// Arguments for glossary command
#[derive(Args, Debug)]
pub struct GlossaryArgs {
    /// Glossary term (case-insensitive)
    #[arg(required = true, num_args = 1..)]
    pub term: Vec<String>,
}

/// Arguments for config command
#[derive(Args, Debug)]
pub struct ConfigArgs {
    /// Show current configuration
    #[arg(long)]
    pub show: bool,

    /// Reset to defaults
    #[arg(long, conflicts_with = "show")]
    pub reset: bool,
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
