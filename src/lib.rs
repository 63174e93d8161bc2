pub mod cli;
pub mod db;
pub mod error;
pub mod model;
pub mod server;
pub mod service;
pub mod settings;
mod utils;

use std::{
    io::Write,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{bail, Context, Result};
use clap::Parser;
use log::{error, info, warn};
use tokio_util::sync::CancellationToken;

use cli::{Cli, Commands, ExportArgs};
use db::{Database, PredictionFilter};
use model::{HubModel, Predictor};
use service::PredictionService;
use settings::{Settings, CONFIG_ENV};

const SAMPLE_TWEETS: &[&str] = &[
    "This product is absolutely amazing! Best purchase ever!",
    "Terrible quality, broke after one day. Complete waste of money.",
    "It's okay, nothing special but does the job.",
    "Outstanding customer service and fast delivery!",
    "Awful experience, would not recommend to anyone.",
    "Pretty good value for money, satisfied with purchase.",
];

/// Everything a running server owns. Dropping it joins the store's worker.
pub struct AppState {
    pub settings: Settings,
    pub service: PredictionService,
}

impl AppState {
    /// Opens the store and loads the model. A model that fails to load
    /// leaves the service up but unhealthy.
    pub async fn start(settings: Settings) -> Result<Self> {
        let db = Database::new(settings.db_path.clone())?;

        let predictor = match HubModel::load(&settings).await {
            Ok(model) => Some(Predictor::new(Arc::new(model))),
            Err(err) => {
                error!("Failed to load model: {err:#}");
                None
            }
        };

        let service = PredictionService::new(
            predictor,
            db,
            settings.model_name.clone(),
            settings.max_batch_size,
        );

        Ok(Self { settings, service })
    }
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over the default level.
    env_logger::Builder::new()
        .filter_level(utils::logging::default_level(cli.verbose))
        .parse_default_env()
        .init();

    let config_path = cli
        .config
        .clone()
        .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from));
    let mut settings = Settings::load(config_path.as_deref())?;
    cli.command.apply_overrides(&mut settings);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start tokio runtime")?;

    runtime.block_on(dispatch(cli.command, settings, config_path))
}

async fn dispatch(command: Commands, settings: Settings, config_path: Option<PathBuf>) -> Result<()> {
    match command {
        Commands::Serve(_) => serve(settings).await,
        Commands::TestModel => test_model(&settings).await,
        Commands::Stats(_) => print_stats(&settings).await,
        Commands::Export(args) => export(&settings, &args).await,
        Commands::Config(args) => show_config(&settings, config_path.as_deref(), args.write),
    }
}

async fn serve(settings: Settings) -> Result<()> {
    info!("NegaBot starting up...");
    let state = AppState::start(settings).await?;
    let address = state.settings.bind_address();

    let shutdown = CancellationToken::new();
    let ctrl_c = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for ctrl-c: {err}");
                return;
            }
            info!("Shutdown requested");
            shutdown.cancel();
        })
    };

    let result = server::serve(state.service.clone(), &address, shutdown).await;
    ctrl_c.abort();

    drop(state);
    info!("NegaBot stopped");
    result
}

async fn test_model(settings: &Settings) -> Result<()> {
    let model = HubModel::load(settings).await?;
    let predictor = Predictor::new(Arc::new(model));

    println!("Test results for {}", predictor.model_name());
    for (number, tweet) in SAMPLE_TWEETS.iter().enumerate() {
        let prediction = predictor.predict(tweet).await?;
        println!("\n{}. Tweet: {tweet}", number + 1);
        println!(
            "   Sentiment: {} (confidence: {:.2}%)",
            prediction.sentiment,
            prediction.confidence * 100.0
        );
        println!(
            "   Probabilities: positive {:.2}%, negative {:.2}%",
            prediction.probabilities.positive * 100.0,
            prediction.probabilities.negative * 100.0
        );
    }
    Ok(())
}

async fn print_stats(settings: &Settings) -> Result<()> {
    let db = Database::new(settings.db_path.clone())?;
    let stats = db.stats(&PredictionFilter::default()).await?;
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

async fn export(settings: &Settings, args: &ExportArgs) -> Result<()> {
    let db = Database::new(settings.db_path.clone())?;
    let filter = PredictionFilter {
        sentiment: args.sentiment,
        search: args.search.clone(),
        ..PredictionFilter::default()
    };
    let body = db.export(args.format, &filter).await?;

    match &args.output {
        Some(path) => {
            std::fs::write(path, &body)
                .with_context(|| format!("failed to write export to {}", path.display()))?;
            info!("Exported {} bytes to {}", body.len(), path.display());
        }
        None => std::io::stdout()
            .write_all(&body)
            .context("failed to write export to stdout")?,
    }
    Ok(())
}

fn show_config(settings: &Settings, config_path: Option<&Path>, write: bool) -> Result<()> {
    if write {
        let Some(path) = config_path else {
            bail!("--write needs a target; pass --config <FILE> or set {CONFIG_ENV}");
        };
        settings.persist(path)?;
        info!("Settings written to {}", path.display());
    }
    println!("{}", serde_json::to_string_pretty(&settings.redacted())?);
    Ok(())
}
