//! Prediction endpoints. Irradiance values are in W/m².

use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{ApiError, IRRADIANCE_UNIT};
use crate::ml::inference::EnsembleWeights;
use crate::ml::ModelType;
use crate::service::{AppState, LstmForecast};

#[derive(Debug, Serialize)]
pub struct PredictionResponse {
    pub prediction: f64,
    pub model: ModelType,
    pub unit: &'static str,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct LstmRequest {
    pub sequence: Option<Vec<Map<String, Value>>>,
    pub steps: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct LstmResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prediction: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub predictions: Option<Vec<f64>>,
    pub model: ModelType,
    pub unit: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub steps: Option<usize>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct IndividualPredictions {
    pub random_forest: f64,
    pub lstm: f64,
}

#[derive(Debug, Serialize)]
pub struct CombinedResponse {
    pub prediction: f64,
    pub individual_predictions: IndividualPredictions,
    pub weights: EnsembleWeights,
    pub model: &'static str,
    pub unit: &'static str,
    pub timestamp: DateTime<Utc>,
}

/// POST /predict/random-forest
pub async fn random_forest(
    State(st): State<AppState>,
    payload: Result<Json<Map<String, Value>>, JsonRejection>,
) -> Result<Json<PredictionResponse>, ApiError> {
    let Json(body) = payload?;
    let prediction = st.service.predict_random_forest(&body)?;

    Ok(Json(PredictionResponse {
        prediction,
        model: ModelType::RandomForest,
        unit: IRRADIANCE_UNIT,
        timestamp: Utc::now(),
    }))
}

/// POST /predict/lstm
pub async fn lstm(
    State(st): State<AppState>,
    payload: Result<Json<LstmRequest>, JsonRejection>,
) -> Result<Json<LstmResponse>, ApiError> {
    let Json(req) = payload?;
    let sequence = req
        .sequence
        .ok_or_else(|| ApiError::BadRequest("Weather sequence required".to_string()))?;

    let mut response = LstmResponse {
        prediction: None,
        predictions: None,
        model: ModelType::Lstm,
        unit: IRRADIANCE_UNIT,
        steps: None,
        timestamp: Utc::now(),
    };

    match st.service.predict_lstm(&sequence, req.steps)? {
        LstmForecast::Single(p) => response.prediction = Some(p),
        LstmForecast::Multi(values) => {
            response.steps = Some(values.len());
            response.predictions = Some(values);
        }
    }
    Ok(Json(response))
}

/// POST /predict/combined
pub async fn combined(
    State(st): State<AppState>,
    payload: Result<Json<Map<String, Value>>, JsonRejection>,
) -> Result<Json<CombinedResponse>, ApiError> {
    let Json(body) = payload?;
    let result = st.service.predict_combined(&body)?;

    Ok(Json(CombinedResponse {
        prediction: result.prediction,
        individual_predictions: IndividualPredictions {
            random_forest: result.random_forest,
            lstm: result.lstm,
        },
        weights: result.weights,
        model: "ensemble",
        unit: IRRADIANCE_UNIT,
        timestamp: Utc::now(),
    }))
}
