use axum::{
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tower_http::timeout::TimeoutLayer;

use super::{data, health, models, predict};
use crate::{config::Config, service::AppState};

pub fn router(state: AppState, cfg: &Config) -> Router {
    let timeout = Duration::from_secs(cfg.server.request_timeout_secs);

    // Retrain runs as long as training takes, so only predictions time out
    let predictions = Router::new()
        .route("/predict/random-forest", post(predict::random_forest))
        .route("/predict/lstm", post(predict::lstm))
        .route("/predict/combined", post(predict::combined))
        .layer(TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, timeout));

    Router::new()
        .route("/", get(index))
        .route("/healthz", get(health::health_check))
        .route("/readyz", get(health::readiness_check))
        .route("/model/status", get(models::status))
        .route("/model/retrain", post(models::retrain))
        .route("/data/generate-sample", get(data::generate_sample))
        .merge(predictions)
        .with_state(state)
}

#[derive(Debug, Serialize)]
pub struct ServiceInfo {
    pub message: &'static str,
    pub version: &'static str,
    pub endpoints: BTreeMap<&'static str, &'static str>,
}

pub async fn index() -> impl IntoResponse {
    let endpoints = BTreeMap::from([
        ("index", "GET /api/v1"),
        ("health", "GET /api/v1/healthz"),
        ("ready", "GET /api/v1/readyz"),
        ("model_status", "GET /api/v1/model/status"),
        ("predict_random_forest", "POST /api/v1/predict/random-forest"),
        ("predict_lstm", "POST /api/v1/predict/lstm"),
        ("predict_combined", "POST /api/v1/predict/combined"),
        ("retrain", "POST /api/v1/model/retrain"),
        ("generate_sample", "GET /api/v1/data/generate-sample"),
    ]);

    Json(ServiceInfo {
        message: "Solar Irradiance Prediction API",
        version: env!("CARGO_PKG_VERSION"),
        endpoints,
    })
}
