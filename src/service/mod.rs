pub mod prediction;

use std::sync::Arc;

use crate::config::Config;

pub use prediction::{
    LstmForecast, LstmTrainingSummary, ModelStatus, PredictionService, RetrainResults, RetrainTarget,
};

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<PredictionService>,
}

impl AppState {
    /// Build the service and bring both models up, loading or training them
    pub async fn new(cfg: Config) -> Self {
        let state = Self::untrained(cfg);
        state.service.initialize().await;
        state
    }

    /// State whose models stay untrained until a retrain
    pub fn untrained(cfg: Config) -> Self {
        Self {
            service: Arc::new(PredictionService::new(cfg)),
        }
    }
}
