//! Request-level prediction, retraining and status on top of the
//! [`ModelRegistry`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::PathBuf;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::domain::{feature_names, WeatherRecord};
use crate::ml::forest::{FeatureImportance, ForestReport, RandomForestModel};
use crate::ml::inference::{EnsemblePrediction, EnsembleWeights, ModelRegistry, ModelSource};
use crate::ml::lstm::{LstmModel, LstmReport};
use crate::ml::{MlError, MlResult, ModelMetadata, ModelType};
use crate::simulation::weather::{generate_tabular, generate_time_series, WeatherGenerator};

/// Which models a retrain request covers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrainTarget {
    RandomForest,
    Lstm,
    #[default]
    Both,
}

impl RetrainTarget {
    pub fn includes(&self, model_type: ModelType) -> bool {
        matches!(
            (self, model_type),
            (RetrainTarget::Both, _)
                | (RetrainTarget::RandomForest, ModelType::RandomForest)
                | (RetrainTarget::Lstm, ModelType::Lstm)
        )
    }
}

/// One-step or iterated LSTM output
#[derive(Debug, Clone, PartialEq)]
pub enum LstmForecast {
    Single(f64),
    Multi(Vec<f64>),
}

#[derive(Debug, Clone, Serialize)]
pub struct LstmTrainingSummary {
    pub val_loss: f64,
    pub val_mae: f64,
    pub best_epoch: usize,
    pub epochs_run: usize,
    pub stopped_early: bool,
}

impl From<&LstmReport> for LstmTrainingSummary {
    fn from(r: &LstmReport) -> Self {
        Self {
            val_loss: r.val_loss,
            val_mae: r.val_mae,
            best_epoch: r.best_epoch,
            epochs_run: r.epochs_run,
            stopped_early: r.stopped_early,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RetrainResults {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub random_forest: Option<ForestReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lstm: Option<LstmTrainingSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RandomForestStatus {
    pub loaded: bool,
    pub source: ModelSource,
    pub features: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feature_importance: Option<Vec<FeatureImportance>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ModelMetadata>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LstmStatus {
    pub loaded: bool,
    pub source: ModelSource,
    pub sequence_length: usize,
    pub max_forecast_steps: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ModelMetadata>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelStatus {
    pub random_forest: RandomForestStatus,
    pub lstm: LstmStatus,
    pub ensemble_weights: EnsembleWeights,
}

pub struct PredictionService {
    cfg: Config,
    registry: ModelRegistry,
    retrain_lock: Mutex<()>,
}

fn join_error(e: tokio::task::JoinError) -> MlError {
    MlError::Training(format!("training task failed: {}", e))
}

impl PredictionService {
    /// Service with untrained models; call [`initialize`](Self::initialize)
    /// to load or train them
    pub fn new(cfg: Config) -> Self {
        let registry = ModelRegistry::new(
            RandomForestModel::new(cfg.random_forest.parameters()),
            LstmModel::new(cfg.lstm.parameters()),
        );
        Self {
            cfg,
            registry,
            retrain_lock: Mutex::new(()),
        }
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }

    /// Load each model from disk, or train and persist it when no usable
    /// artifact exists. Failures are logged and leave that model untrained.
    pub async fn initialize(&self) {
        if let Err(e) = self.init_random_forest().await {
            error!(error = %e, "random forest initialization failed");
        }
        if let Err(e) = self.init_lstm().await {
            error!(error = %e, "lstm initialization failed");
        }
        info!(
            random_forest = self.registry.is_trained(ModelType::RandomForest),
            lstm = self.registry.is_trained(ModelType::Lstm),
            "models initialized"
        );
    }

    async fn init_random_forest(&self) -> MlResult<()> {
        let path = self.cfg.models.random_forest_path();
        if path.exists() {
            let p = path.clone();
            match tokio::task::spawn_blocking(move || RandomForestModel::load(p))
                .await
                .map_err(join_error)?
            {
                Ok(model) => {
                    info!(path = %path.display(), "random forest loaded from disk");
                    self.registry.install_random_forest(model, ModelSource::Disk);
                    return Ok(());
                }
                Err(e) => warn!(error = %e, path = %path.display(), "unreadable random forest artifact, retraining"),
            }
        } else {
            info!(path = %path.display(), "no random forest artifact, training");
        }

        let (model, _) = self.train_random_forest().await?;
        if let Err(e) = model.save(&path) {
            warn!(error = %e, path = %path.display(), "failed to persist random forest");
        }
        self.registry.install_random_forest(model, ModelSource::Trained);
        Ok(())
    }

    async fn init_lstm(&self) -> MlResult<()> {
        let (net_path, scaler_path) = self.lstm_paths();
        if net_path.exists() && scaler_path.exists() {
            let (n, s) = (net_path.clone(), scaler_path.clone());
            match tokio::task::spawn_blocking(move || LstmModel::load(n, s))
                .await
                .map_err(join_error)?
            {
                Ok(model) if model.sequence_length() == self.cfg.lstm.sequence_length => {
                    info!(path = %net_path.display(), "lstm loaded from disk");
                    self.registry.install_lstm(model, ModelSource::Disk);
                    return Ok(());
                }
                Ok(model) => warn!(
                    artifact = model.sequence_length(),
                    configured = self.cfg.lstm.sequence_length,
                    "lstm artifact has a different sequence length, retraining"
                ),
                Err(e) => warn!(error = %e, path = %net_path.display(), "unreadable lstm artifact, retraining"),
            }
        } else {
            info!(path = %net_path.display(), "no lstm artifact, training");
        }

        let (model, _) = self.train_lstm().await?;
        if let Err(e) = model.save(&net_path, &scaler_path) {
            warn!(error = %e, path = %net_path.display(), "failed to persist lstm");
        }
        self.registry.install_lstm(model, ModelSource::Trained);
        Ok(())
    }

    fn lstm_paths(&self) -> (PathBuf, PathBuf) {
        (self.cfg.models.lstm_path(), self.cfg.models.lstm_scalers_path())
    }

    /// Train a fresh forest on regenerated data, off the async runtime
    async fn train_random_forest(&self) -> MlResult<(RandomForestModel, ForestReport)> {
        let params = self.cfg.random_forest.parameters();
        let data = self.cfg.data.clone();

        tokio::task::spawn_blocking(move || -> MlResult<_> {
            let samples = generate_tabular(data.tabular_samples, data.seed);
            let mut model = RandomForestModel::new(params);
            let report = model.train(&samples)?;
            Ok((model, report))
        })
        .await
        .map_err(join_error)?
    }

    async fn train_lstm(&self) -> MlResult<(LstmModel, LstmReport)> {
        let params = self.cfg.lstm.parameters();
        let options = self.cfg.lstm.train_options();
        let data = self.cfg.data.clone();

        tokio::task::spawn_blocking(move || -> MlResult<_> {
            let samples = generate_time_series(data.time_series_days, data.seed);
            let mut model = LstmModel::new(params);
            let report = model.train(&samples, &options)?;
            Ok((model, report))
        })
        .await
        .map_err(join_error)?
    }

    /// Retrain, persist, then swap. Retrains run one at a time; on failure
    /// the live instance and its artifact are left as they were.
    pub async fn retrain(&self, target: RetrainTarget) -> MlResult<RetrainResults> {
        let _guard = self.retrain_lock.lock().await;
        let mut results = RetrainResults::default();

        if target.includes(ModelType::RandomForest) {
            info!("retraining random forest");
            let (model, report) = self.train_random_forest().await?;
            let path = self.cfg.models.random_forest_path();
            let model = tokio::task::spawn_blocking(move || model.save(&path).map(|_| model))
                .await
                .map_err(join_error)??;
            self.registry.install_random_forest(model, ModelSource::Trained);
            results.random_forest = Some(report);
        }

        if target.includes(ModelType::Lstm) {
            info!("retraining lstm");
            let (model, report) = self.train_lstm().await?;
            let (net_path, scaler_path) = self.lstm_paths();
            let model = tokio::task::spawn_blocking(move || model.save(&net_path, &scaler_path).map(|_| model))
                .await
                .map_err(join_error)??;
            self.registry.install_lstm(model, ModelSource::Trained);
            results.lstm = Some(LstmTrainingSummary::from(&report));
        }

        Ok(results)
    }

    /// Single-record forest prediction from a JSON object of named features
    pub fn predict_random_forest(&self, body: &Map<String, Value>) -> MlResult<f64> {
        let model = self.registry.random_forest();
        if !model.is_trained() {
            return Err(MlError::NotTrained(ModelType::RandomForest));
        }
        let record = WeatherRecord::from_json(body)?;
        model.predict(&record)
    }

    /// Next-hour prediction, or an iterated forecast when `steps > 1`
    pub fn predict_lstm(&self, sequence: &[Map<String, Value>], steps: Option<usize>) -> MlResult<LstmForecast> {
        let model = self.registry.lstm();
        if !model.is_trained() {
            return Err(MlError::NotTrained(ModelType::Lstm));
        }

        let expected = model.sequence_length();
        if sequence.len() != expected {
            return Err(MlError::SequenceLength {
                expected,
                actual: sequence.len(),
            });
        }

        let max_steps = self.cfg.lstm.max_forecast_steps;
        let steps = steps.unwrap_or(1);
        if steps == 0 || steps > max_steps {
            return Err(MlError::InvalidSteps(format!(
                "steps must be between 1 and {}, got {}",
                max_steps, steps
            )));
        }

        let window = sequence
            .iter()
            .map(WeatherRecord::from_json)
            .collect::<Result<Vec<_>, _>>()?;

        if steps == 1 {
            model.predict_sequence(&window).map(LstmForecast::Single)
        } else {
            model.predict_multi_step(&window, steps).map(LstmForecast::Multi)
        }
    }

    pub fn predict_combined(&self, body: &Map<String, Value>) -> MlResult<EnsemblePrediction> {
        for model_type in ModelType::ALL {
            if !self.registry.is_trained(model_type) {
                return Err(MlError::NotTrained(model_type));
            }
        }
        let record = WeatherRecord::from_json(body)?;
        self.registry.ensemble(&record, &self.cfg.ensemble.weights())
    }

    pub fn status(&self) -> ModelStatus {
        let rf = self.registry.random_forest();
        let lstm = self.registry.lstm();

        ModelStatus {
            random_forest: RandomForestStatus {
                loaded: rf.is_trained(),
                source: self.registry.source(ModelType::RandomForest),
                features: feature_names(),
                feature_importance: rf.feature_importance().ok().map(<[FeatureImportance]>::to_vec),
                metadata: rf.metadata().cloned(),
            },
            lstm: LstmStatus {
                loaded: lstm.is_trained(),
                source: self.registry.source(ModelType::Lstm),
                sequence_length: lstm.sequence_length(),
                max_forecast_steps: self.cfg.lstm.max_forecast_steps,
                metadata: lstm.metadata().cloned(),
            },
            ensemble_weights: self.cfg.ensemble.weights(),
        }
    }

    /// One plausible observation for the current local hour and day
    pub fn sample_data(&self) -> WeatherRecord {
        WeatherGenerator::from_entropy().sample_record(chrono::Local::now().naive_local())
    }
}
