//! LSTM sequence regressor.
//!
//! Predicts the next hour's irradiance from a window of past weather records.
//! Features and target are min-max scaled with bounds fit on the training
//! series; predictions are mapped back to W/m² and floored at zero.

use serde::{Deserialize, Serialize};

mod model;
pub mod network;

pub use model::{EpochMetrics, LstmModel, LstmReport};

/// Network shape and optimizer schedule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LstmParameters {
    pub sequence_length: usize,
    pub hidden_units: Vec<usize>,
    pub dense_units: usize,
    pub dropout: f64,
    pub learning_rate: f64,
    /// Epochs without validation improvement before stopping
    pub early_stopping_patience: usize,
    pub lr_decay_factor: f64,
    /// Epochs without improvement before the learning rate decays
    pub lr_patience: usize,
    pub min_learning_rate: f64,
    pub seed: u64,
}

impl Default for LstmParameters {
    fn default() -> Self {
        Self {
            sequence_length: 24,
            hidden_units: vec![50, 50, 25],
            dense_units: 25,
            dropout: 0.2,
            learning_rate: 0.001,
            early_stopping_patience: 10,
            lr_decay_factor: 0.2,
            lr_patience: 5,
            min_learning_rate: 1e-4,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrainOptions {
    pub epochs: usize,
    pub batch_size: usize,
    /// Trailing fraction of windows held out for validation
    pub validation_split: f64,
}

impl Default for TrainOptions {
    fn default() -> Self {
        Self {
            epochs: 50,
            batch_size: 32,
            validation_split: 0.2,
        }
    }
}
