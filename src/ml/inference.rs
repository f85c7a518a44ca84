//! ML Model Inference
//!
//! [`ModelRegistry`] holds the live instance of each regressor behind an
//! `Arc`. Readers take a snapshot and never block a retrain for longer than
//! the pointer swap; a swapped-out instance lives until its last reader drops.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use strum::Display;

use super::forest::RandomForestModel;
use super::lstm::LstmModel;
use super::{MlError, MlResult, ModelType};
use crate::domain::WeatherRecord;

/// Blend weights for the combined prediction
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnsembleWeights {
    pub random_forest: f64,
    pub lstm: f64,
}

impl Default for EnsembleWeights {
    fn default() -> Self {
        Self {
            random_forest: 0.6,
            lstm: 0.4,
        }
    }
}

impl EnsembleWeights {
    pub fn blend(&self, random_forest: f64, lstm: f64) -> f64 {
        self.random_forest * random_forest + self.lstm * lstm
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EnsemblePrediction {
    pub prediction: f64,
    pub random_forest: f64,
    pub lstm: f64,
    pub weights: EnsembleWeights,
}

/// Where the live instance came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ModelSource {
    /// Never trained or loaded
    None,
    /// Loaded from an artifact at startup
    Disk,
    /// Trained in this process
    Trained,
}

struct Entry<M> {
    model: Arc<M>,
    source: ModelSource,
}

impl<M> Entry<M> {
    fn new(model: M, source: ModelSource) -> RwLock<Self> {
        RwLock::new(Self {
            model: Arc::new(model),
            source,
        })
    }
}

/// Model Registry: one live instance per model type
pub struct ModelRegistry {
    random_forest: RwLock<Entry<RandomForestModel>>,
    lstm: RwLock<Entry<LstmModel>>,
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new(RandomForestModel::default(), LstmModel::default())
    }
}

impl ModelRegistry {
    /// Registry holding untrained instances
    pub fn new(random_forest: RandomForestModel, lstm: LstmModel) -> Self {
        Self {
            random_forest: Entry::new(random_forest, ModelSource::None),
            lstm: Entry::new(lstm, ModelSource::None),
        }
    }

    pub fn random_forest(&self) -> Arc<RandomForestModel> {
        Arc::clone(&self.random_forest.read().model)
    }

    pub fn lstm(&self) -> Arc<LstmModel> {
        Arc::clone(&self.lstm.read().model)
    }

    pub fn source(&self, model_type: ModelType) -> ModelSource {
        match model_type {
            ModelType::RandomForest => self.random_forest.read().source,
            ModelType::Lstm => self.lstm.read().source,
        }
    }

    pub fn is_trained(&self, model_type: ModelType) -> bool {
        match model_type {
            ModelType::RandomForest => self.random_forest().is_trained(),
            ModelType::Lstm => self.lstm().is_trained(),
        }
    }

    pub fn install_random_forest(&self, model: RandomForestModel, source: ModelSource) {
        let mut entry = self.random_forest.write();
        entry.model = Arc::new(model);
        entry.source = source;
    }

    pub fn install_lstm(&self, model: LstmModel, source: ModelSource) {
        let mut entry = self.lstm.write();
        entry.model = Arc::new(model);
        entry.source = source;
    }

    /// Weighted blend of both single-step predictions. The LSTM sees `record`
    /// repeated over its whole window.
    pub fn ensemble(&self, record: &WeatherRecord, weights: &EnsembleWeights) -> MlResult<EnsemblePrediction> {
        let random_forest = self.random_forest();
        let lstm = self.lstm();

        for (model_type, trained) in [
            (ModelType::RandomForest, random_forest.is_trained()),
            (ModelType::Lstm, lstm.is_trained()),
        ] {
            if !trained {
                return Err(MlError::NotTrained(model_type));
            }
        }

        let rf = random_forest.predict(record)?;
        let window = vec![*record; lstm.sequence_length()];
        let seq = lstm.predict_sequence(&window)?;

        Ok(EnsemblePrediction {
            prediction: weights.blend(rf, seq),
            random_forest: rf,
            lstm: seq,
            weights: *weights,
        })
    }
}
