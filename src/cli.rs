use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::db::{ExportFormat, Sentiment};
use crate::settings::Settings;

/// Top-level parser for the `negabot` binary.
#[derive(Debug, Parser)]
#[command(
    name = "negabot",
    version,
    about = "NegaBot - tweet sentiment classification service"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Settings file (JSON). Falls back to $NEGABOT_CONFIG.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Debug logging unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the HTTP API and dashboard
    Serve(ServeArgs),
    /// Classify the built-in sample tweets
    TestModel,
    /// Print prediction statistics as JSON
    Stats(StoreArgs),
    /// Write the prediction log as CSV or JSON
    Export(ExportArgs),
    /// Show the effective configuration
    Config(ConfigArgs),
}

#[derive(Debug, Args)]
pub struct ServeArgs {
    #[arg(long)]
    pub host: Option<String>,

    #[arg(short, long)]
    pub port: Option<u16>,

    /// SQLite file for the prediction log
    #[arg(long)]
    pub db: Option<PathBuf>,

    /// Model id on the hub
    #[arg(long)]
    pub model: Option<String>,
}

#[derive(Debug, Args)]
pub struct StoreArgs {
    #[arg(long)]
    pub db: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct ExportArgs {
    #[arg(short, long, default_value = "csv")]
    pub format: ExportFormat,

    /// Destination file; stdout when omitted
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    #[arg(long)]
    pub sentiment: Option<Sentiment>,

    /// Case-insensitive substring filter on the text
    #[arg(long)]
    pub search: Option<String>,

    #[arg(long)]
    pub db: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct ConfigArgs {
    /// Persist the effective configuration to the --config path
    #[arg(long)]
    pub write: bool,
}

impl Commands {
    /// Flags given on the command line win over every other settings layer.
    pub fn apply_overrides(&self, settings: &mut Settings) {
        match self {
            Commands::Serve(args) => {
                if let Some(host) = &args.host {
                    settings.host = host.clone();
                }
                if let Some(port) = args.port {
                    settings.port = port;
                }
                if let Some(db) = &args.db {
                    settings.db_path = db.clone();
                }
                if let Some(model) = &args.model {
                    settings.model_name = model.clone();
                }
            }
            Commands::Stats(StoreArgs { db: Some(db) })
            | Commands::Export(ExportArgs { db: Some(db), .. }) => {
                settings.db_path = db.clone();
            }
            _ => {}
        }
    }
}
