//! Offline training: fits the selected models on synthetic data, writes
//! their artifacts and prints the training reports as JSON.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use serde_json::json;
use std::path::PathBuf;
use tracing::info;
use validator::Validate;

use solar_irradiance::config::Config;
use solar_irradiance::domain::WeatherRecord;
use solar_irradiance::ml::forest::RandomForestModel;
use solar_irradiance::ml::lstm::LstmModel;
use solar_irradiance::simulation::{generate_tabular, generate_time_series};
use solar_irradiance::telemetry::init_tracing;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Target {
    RandomForest,
    Lstm,
    Both,
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Which model(s) to train
    #[arg(long, value_enum, default_value_t = Target::Both)]
    model: Target,

    /// Configuration file (defaults to $SOLAR_CONFIG or config/default.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory the artifacts are written to
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Number of tabular samples for the random forest
    #[arg(long)]
    samples: Option<usize>,

    /// Days of hourly data for the LSTM
    #[arg(long)]
    days: Option<usize>,

    /// LSTM training epochs
    #[arg(long, default_value_t = 50)]
    epochs: usize,

    /// Number of trees in the random forest
    #[arg(long)]
    n_trees: Option<usize>,

    /// Data generator seed
    #[arg(long)]
    seed: Option<u64>,
}

/// Reference observation used for the sample predictions
fn delhi_noon() -> WeatherRecord {
    WeatherRecord {
        temperature: 28.5,
        humidity: 65.0,
        pressure: 1015.0,
        wind_speed: 2.5,
        cloud_cover: 20.0,
        uv_index: 8.0,
        hour: 12.0,
        day_of_year: 180.0,
        latitude: 28.6139,
        longitude: 77.2090,
    }
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let mut cfg = match &args.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    init_tracing(&cfg.logging);

    if let Some(dir) = args.output_dir {
        cfg.models.dir = dir;
    }
    if let Some(samples) = args.samples {
        cfg.data.tabular_samples = samples;
    }
    if let Some(days) = args.days {
        cfg.data.time_series_days = days;
    }
    if let Some(n_trees) = args.n_trees {
        cfg.random_forest.n_trees = n_trees;
    }
    if let Some(seed) = args.seed {
        cfg.data.seed = seed;
    }
    cfg.lstm.epochs = args.epochs;
    cfg.validate().context("invalid training options")?;

    let mut report = serde_json::Map::new();
    let reference = delhi_noon();

    if matches!(args.model, Target::RandomForest | Target::Both) {
        info!(samples = cfg.data.tabular_samples, trees = cfg.random_forest.n_trees, "training random forest");
        let samples = generate_tabular(cfg.data.tabular_samples, cfg.data.seed);

        let mut model = RandomForestModel::new(cfg.random_forest.parameters());
        let forest = model.train(&samples).context("random forest training failed")?;
        let path = cfg.models.random_forest_path();
        model.save(&path).with_context(|| format!("failed to save {}", path.display()))?;

        report.insert(
            "random_forest".to_string(),
            json!({
                "artifact": path,
                "report": forest,
                "sample_prediction": model.predict(&reference)?,
            }),
        );
    }

    if matches!(args.model, Target::Lstm | Target::Both) {
        info!(days = cfg.data.time_series_days, epochs = cfg.lstm.epochs, "training lstm");
        let samples = generate_time_series(cfg.data.time_series_days, cfg.data.seed);

        let mut model = LstmModel::new(cfg.lstm.parameters());
        let lstm = model
            .train(&samples, &cfg.lstm.train_options())
            .context("lstm training failed")?;
        let (net_path, scaler_path) = (cfg.models.lstm_path(), cfg.models.lstm_scalers_path());
        model
            .save(&net_path, &scaler_path)
            .with_context(|| format!("failed to save {}", net_path.display()))?;

        let window = vec![reference; model.sequence_length()];
        report.insert(
            "lstm".to_string(),
            json!({
                "artifact": net_path,
                "scalers": scaler_path,
                "report": lstm,
                "sample_prediction": model.predict_sequence(&window)?,
                "sample_forecast_24h": model.predict_multi_step(&window, 24)?,
            }),
        );
    }

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
