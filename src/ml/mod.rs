//! Machine Learning Module
//!
//! Two irradiance regressors and the plumbing around them:
//! - [`forest`]: bagged regression trees over a single weather record
//! - [`lstm`]: stacked recurrent network over a window of past records
//! - [`scaler`] / [`sequence`]: min-max scaling and sliding-window preparation
//! - [`inference`]: registry of live model instances and ensemble blending
//!
//! # Architecture
//! Models are trained offline or at startup, persisted as flat artifacts, and
//! served read-only. Retraining builds a new instance and swaps it in.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use strum::{Display, EnumString};
use thiserror::Error;

use crate::domain::FeatureError;

pub mod forest;
pub mod inference;
pub mod lstm;
pub mod scaler;
pub mod sequence;
pub mod training;

/// ML Model Type
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ModelType {
    RandomForest,
    Lstm,
}

impl ModelType {
    pub const ALL: [ModelType; 2] = [ModelType::RandomForest, ModelType::Lstm];
}

/// ML Model Metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub model_id: String,
    pub model_type: ModelType,
    pub version: String,
    pub trained_at: chrono::DateTime<chrono::Utc>,
    pub training_samples: usize,
    pub validation_metrics: ValidationMetrics,
    pub feature_names: Vec<String>,
}

impl ModelMetadata {
    pub fn new(model_type: ModelType, training_samples: usize, validation_metrics: ValidationMetrics) -> Self {
        Self {
            model_id: format!("{}_{}", model_type, uuid::Uuid::new_v4()),
            model_type,
            version: env!("CARGO_PKG_VERSION").to_string(),
            trained_at: chrono::Utc::now(),
            training_samples,
            validation_metrics,
            feature_names: crate::domain::feature_names(),
        }
    }
}

/// Validation Metrics
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValidationMetrics {
    pub mae: f64,  // Mean Absolute Error
    pub rmse: f64, // Root Mean Square Error
    pub mape: f64, // Mean Absolute Percentage Error (non-zero targets only)
    pub r2: f64,   // R-squared
}

impl ValidationMetrics {
    pub fn new(mae: f64, rmse: f64, mape: f64, r2: f64) -> Self {
        Self { mae, rmse, mape, r2 }
    }

    pub fn mse(&self) -> f64 {
        self.rmse * self.rmse
    }
}

/// Errors raised by training, inference and artifact I/O
#[derive(Debug, Error)]
pub enum MlError {
    #[error("{0} model is not trained")]
    NotTrained(ModelType),

    #[error(transparent)]
    Features(#[from] FeatureError),

    #[error("Sequence must have exactly {expected} timesteps, got {actual}")]
    SequenceLength { expected: usize, actual: usize },

    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Invalid steps: {0}")]
    InvalidSteps(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Training failed: {0}")]
    Training(String),
}

impl MlError {
    /// Errors caused by the caller's input rather than model state or runtime
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            MlError::Features(_) | MlError::SequenceLength { .. } | MlError::InvalidSteps(_)
        )
    }
}

impl From<bincode::Error> for MlError {
    fn from(e: bincode::Error) -> Self {
        MlError::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for MlError {
    fn from(e: serde_json::Error) -> Self {
        MlError::Serialization(e.to_string())
    }
}

pub type MlResult<T> = Result<T, MlError>;

/// Replace the artifact at `path` atomically: write a `.tmp` sibling, then
/// rename it over the target.
pub(crate) fn write_artifact(path: &Path, bytes: &[u8]) -> MlResult<()> {
    write_artifacts(&[(path, bytes)])
}

/// Replace several artifacts together. Every `.tmp` sibling is written
/// before any target is renamed over; if a write fails the temporaries
/// already written are removed and no target changes.
pub(crate) fn write_artifacts(artifacts: &[(&Path, &[u8])]) -> MlResult<()> {
    let mut written: Vec<(PathBuf, &Path)> = Vec::with_capacity(artifacts.len());

    for (path, bytes) in artifacts {
        let result = tmp_sibling(path).and_then(|tmp| {
            std::fs::write(&tmp, bytes)?;
            Ok(tmp)
        });
        match result {
            Ok(tmp) => written.push((tmp, *path)),
            Err(e) => {
                for (tmp, _) in &written {
                    let _ = std::fs::remove_file(tmp);
                }
                return Err(e);
            }
        }
    }

    for (tmp, path) in &written {
        std::fs::rename(tmp, path)?;
    }
    Ok(())
}

fn tmp_sibling(path: &Path) -> MlResult<PathBuf> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    Ok(PathBuf::from(tmp))
}
