use anyhow::Result;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use validator::Validate;

use crate::ml::forest::ForestParameters;
use crate::ml::inference::EnsembleWeights;
use crate::ml::lstm::{LstmParameters, TrainOptions};

const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct Config {
    #[validate(nested)]
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub models: ModelsConfig,
    #[validate(nested)]
    pub random_forest: RandomForestConfig,
    #[validate(nested)]
    pub lstm: LstmConfig,
    #[validate(nested)]
    pub data: DataConfig,
    #[validate(nested)]
    pub ensemble: EnsembleConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    #[validate(range(min = 1))]
    pub request_timeout_secs: u64,
    pub enable_cors: bool,
    pub cors_origin: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5001,
            request_timeout_secs: 30,
            enable_cors: true,
            cors_origin: "http://localhost:3000".to_string(),
        }
    }
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        Ok(format!("{}:{}", self.host, self.port).parse()?)
    }
}

/// `RUST_LOG` takes precedence over `filter` when set
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub filter: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info,hyper=warn,tower_http=info".to_string(),
            json: true,
        }
    }
}

/// Where model artifacts live on disk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    pub dir: PathBuf,
    pub random_forest_file: String,
    pub lstm_file: String,
    pub lstm_scalers_file: String,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("models"),
            random_forest_file: "random_forest_solar.bin".to_string(),
            lstm_file: "lstm_solar.bin".to_string(),
            lstm_scalers_file: "lstm_scalers.json".to_string(),
        }
    }
}

impl ModelsConfig {
    pub fn random_forest_path(&self) -> PathBuf {
        self.dir.join(&self.random_forest_file)
    }

    pub fn lstm_path(&self) -> PathBuf {
        self.dir.join(&self.lstm_file)
    }

    pub fn lstm_scalers_path(&self) -> PathBuf {
        self.dir.join(&self.lstm_scalers_file)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RandomForestConfig {
    #[validate(range(min = 1))]
    pub n_trees: usize,
    pub max_depth: Option<u16>,
    #[validate(range(min = 2))]
    pub min_samples_split: usize,
    #[validate(range(min = 1))]
    pub min_samples_leaf: usize,
    pub seed: u64,
    #[validate(range(exclusive_min = 0.0, exclusive_max = 1.0))]
    pub test_size: f64,
}

impl Default for RandomForestConfig {
    fn default() -> Self {
        let p = ForestParameters::default();
        Self {
            n_trees: p.n_trees,
            max_depth: p.max_depth,
            min_samples_split: p.min_samples_split,
            min_samples_leaf: p.min_samples_leaf,
            seed: p.seed,
            test_size: p.test_size,
        }
    }
}

impl RandomForestConfig {
    pub fn parameters(&self) -> ForestParameters {
        ForestParameters {
            n_trees: self.n_trees,
            max_depth: self.max_depth,
            min_samples_split: self.min_samples_split,
            min_samples_leaf: self.min_samples_leaf,
            seed: self.seed,
            test_size: self.test_size,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct LstmConfig {
    #[validate(range(min = 1))]
    pub sequence_length: usize,
    #[validate(length(min = 1))]
    pub hidden_units: Vec<usize>,
    #[validate(range(min = 1))]
    pub dense_units: usize,
    #[validate(range(min = 0.0, exclusive_max = 1.0))]
    pub dropout: f64,
    #[validate(range(exclusive_min = 0.0))]
    pub learning_rate: f64,
    pub early_stopping_patience: usize,
    #[validate(range(exclusive_min = 0.0, exclusive_max = 1.0))]
    pub lr_decay_factor: f64,
    pub lr_patience: usize,
    #[validate(range(min = 0.0))]
    pub min_learning_rate: f64,
    pub seed: u64,
    #[validate(range(min = 1))]
    pub epochs: usize,
    #[validate(range(min = 1))]
    pub batch_size: usize,
    #[validate(range(min = 0.0, exclusive_max = 1.0))]
    pub validation_split: f64,
    #[validate(range(min = 1))]
    pub max_forecast_steps: usize,
}

impl Default for LstmConfig {
    fn default() -> Self {
        let p = LstmParameters::default();
        let t = TrainOptions::default();
        Self {
            sequence_length: p.sequence_length,
            hidden_units: p.hidden_units,
            dense_units: p.dense_units,
            dropout: p.dropout,
            learning_rate: p.learning_rate,
            early_stopping_patience: p.early_stopping_patience,
            lr_decay_factor: p.lr_decay_factor,
            lr_patience: p.lr_patience,
            min_learning_rate: p.min_learning_rate,
            seed: p.seed,
            // Startup and retrain use a shorter schedule than offline training
            epochs: 10,
            batch_size: t.batch_size,
            validation_split: t.validation_split,
            max_forecast_steps: 168,
        }
    }
}

impl LstmConfig {
    pub fn parameters(&self) -> LstmParameters {
        LstmParameters {
            sequence_length: self.sequence_length,
            hidden_units: self.hidden_units.clone(),
            dense_units: self.dense_units,
            dropout: self.dropout,
            learning_rate: self.learning_rate,
            early_stopping_patience: self.early_stopping_patience,
            lr_decay_factor: self.lr_decay_factor,
            lr_patience: self.lr_patience,
            min_learning_rate: self.min_learning_rate,
            seed: self.seed,
        }
    }

    pub fn train_options(&self) -> TrainOptions {
        TrainOptions {
            epochs: self.epochs,
            batch_size: self.batch_size,
            validation_split: self.validation_split,
        }
    }
}

/// Synthetic training data sizes
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct DataConfig {
    #[validate(range(min = 10))]
    pub tabular_samples: usize,
    #[validate(range(min = 2))]
    pub time_series_days: usize,
    pub seed: u64,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            tabular_samples: 10_000,
            time_series_days: 365,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct EnsembleConfig {
    #[validate(range(min = 0.0, max = 1.0))]
    pub random_forest_weight: f64,
    #[validate(range(min = 0.0, max = 1.0))]
    pub lstm_weight: f64,
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        let w = EnsembleWeights::default();
        Self {
            random_forest_weight: w.random_forest,
            lstm_weight: w.lstm,
        }
    }
}

impl EnsembleConfig {
    pub fn weights(&self) -> EnsembleWeights {
        EnsembleWeights {
            random_forest: self.random_forest_weight,
            lstm: self.lstm_weight,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = std::env::var("SOLAR_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(path)
    }

    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let figment = Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("SOLAR__").split("__"));
        let cfg: Config = figment.extract()?;
        cfg.validate()?;
        Ok(cfg)
    }
}
