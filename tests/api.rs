//! End-to-end tests of the HTTP API against small, quickly trained models.

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::path::Path;
use tower::ServiceExt;

use solar_irradiance::{api, config::Config, service::AppState};

fn test_config(dir: &Path) -> Config {
    let mut cfg = Config::default();
    cfg.models.dir = dir.to_path_buf();
    cfg.random_forest.n_trees = 10;
    cfg.lstm.hidden_units = vec![4];
    cfg.lstm.dense_units = 4;
    cfg.lstm.epochs = 1;
    cfg.data.tabular_samples = 300;
    cfg.data.time_series_days = 3;
    cfg
}

async fn trained_app(dir: &Path) -> Router {
    let cfg = test_config(dir);
    let state = AppState::new(cfg.clone()).await;
    api::router(state, &cfg)
}

fn untrained_app(dir: &Path) -> Router {
    let cfg = test_config(dir);
    api::router(AppState::untrained(cfg.clone()), &cfg)
}

fn delhi_noon() -> Value {
    json!({
        "temperature": 28.5,
        "humidity": 65.0,
        "pressure": 1015.0,
        "wind_speed": 2.5,
        "cloud_cover": 20.0,
        "uv_index": 8.0,
        "hour": 12,
        "day_of_year": 180,
        "latitude": 28.6139,
        "longitude": 77.2090
    })
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<String>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(text) => {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
            Body::from(text)
        }
        None => Body::empty(),
    };

    let response = app.clone().oneshot(builder.body(body).unwrap()).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn get(app: &Router, uri: &str) -> (StatusCode, Value) {
    send(app, Method::GET, uri, None).await
}

async fn post(app: &Router, uri: &str, body: Value) -> (StatusCode, Value) {
    send(app, Method::POST, uri, Some(body.to_string())).await
}

#[tokio::test]
async fn test_index_lists_endpoints() {
    let dir = tempfile::tempdir().unwrap();
    let app = untrained_app(dir.path());

    let (status, body) = get(&app, "/api/v1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Solar Irradiance Prediction API");
    assert_eq!(body["endpoints"]["predict_lstm"], "POST /api/v1/predict/lstm");
}

#[tokio::test]
async fn test_health_and_readiness() {
    let dir = tempfile::tempdir().unwrap();
    let app = untrained_app(dir.path());

    let (status, body) = get(&app, "/api/v1/healthz").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["checks"]["lstm"]["source"], "none");

    let (status, _) = get(&app, "/api/v1/readyz").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    let app = trained_app(dir.path()).await;
    let (status, body) = get(&app, "/api/v1/healthz").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    let (status, _) = get(&app, "/api/v1/readyz").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_untrained_models_return_503() {
    let dir = tempfile::tempdir().unwrap();
    let app = untrained_app(dir.path());

    for uri in ["/api/v1/predict/random-forest", "/api/v1/predict/combined"] {
        let (status, body) = post(&app, uri, delhi_noon()).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE, "{}", uri);
        assert_eq!(body["kind"], "not_trained");
    }

    let (status, body) = post(&app, "/api/v1/predict/lstm", json!({ "sequence": [] })).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"], "lstm model is not trained");

    let (status, body) = get(&app, "/api/v1/model/status").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["random_forest"]["loaded"], false);
    assert_eq!(body["random_forest"]["source"], "none");
    assert_eq!(body["lstm"]["sequence_length"], 24);
}

#[tokio::test]
async fn test_random_forest_prediction() {
    let dir = tempfile::tempdir().unwrap();
    let app = trained_app(dir.path()).await;

    let (status, body) = post(&app, "/api/v1/predict/random-forest", delhi_noon()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["model"], "random_forest");
    assert_eq!(body["unit"], "W/m²");
    assert!(body["prediction"].as_f64().unwrap() >= 0.0);
    assert!(body["timestamp"].is_string());
}

#[tokio::test]
async fn test_random_forest_validation() {
    let dir = tempfile::tempdir().unwrap();
    let app = trained_app(dir.path()).await;

    let mut partial = delhi_noon();
    partial.as_object_mut().unwrap().remove("uv_index");
    let (status, body) = post(&app, "/api/v1/predict/random-forest", partial).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Missing features");
    assert_eq!(body["missing"], json!(["uv_index"]));
    assert_eq!(body["required"].as_array().unwrap().len(), 10);

    let mut extra = delhi_noon();
    extra["altitude"] = json!(216.0);
    let (status, body) = post(&app, "/api/v1/predict/random-forest", extra).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "unknown_features");
    assert_eq!(body["unknown"], json!(["altitude"]));

    let mut text = delhi_noon();
    text["humidity"] = json!("humid");
    let (status, body) = post(&app, "/api/v1/predict/random-forest", text).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "invalid_feature");

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/v1/predict/random-forest",
        Some("{not json".to_string()),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "bad_request");
}

#[tokio::test]
async fn test_lstm_prediction() {
    let dir = tempfile::tempdir().unwrap();
    let app = trained_app(dir.path()).await;
    let sequence = vec![delhi_noon(); 24];

    let (status, body) = post(&app, "/api/v1/predict/lstm", json!({ "sequence": sequence })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["model"], "lstm");
    assert!(body["prediction"].as_f64().unwrap() >= 0.0);
    assert!(body.get("predictions").is_none());

    let (status, body) = post(&app, "/api/v1/predict/lstm", json!({ "sequence": sequence, "steps": 5 })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["steps"], 5);
    let predictions = body["predictions"].as_array().unwrap();
    assert_eq!(predictions.len(), 5);
    assert!(predictions.iter().all(|p| p.as_f64().unwrap() >= 0.0));
}

#[tokio::test]
async fn test_lstm_validation() {
    let dir = tempfile::tempdir().unwrap();
    let app = trained_app(dir.path()).await;

    let (status, body) = post(&app, "/api/v1/predict/lstm", json!({})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Weather sequence required");

    for len in [23, 25] {
        let sequence = vec![delhi_noon(); len];
        let (status, body) = post(&app, "/api/v1/predict/lstm", json!({ "sequence": sequence })).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["kind"], "sequence_length");
        assert_eq!(body["error"], "Sequence must have 24 time steps");
        assert_eq!(body["actual"], len);
    }

    let sequence = vec![delhi_noon(); 24];
    let (status, body) = post(&app, "/api/v1/predict/lstm", json!({ "sequence": sequence, "steps": 0 })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "invalid_steps");
}

#[tokio::test]
async fn test_combined_prediction_blends_components() {
    let dir = tempfile::tempdir().unwrap();
    let app = trained_app(dir.path()).await;

    let (status, body) = post(&app, "/api/v1/predict/combined", delhi_noon()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["model"], "ensemble");
    assert_eq!(body["weights"], json!({ "random_forest": 0.6, "lstm": 0.4 }));

    let rf = body["individual_predictions"]["random_forest"].as_f64().unwrap();
    let lstm = body["individual_predictions"]["lstm"].as_f64().unwrap();
    let blended = body["prediction"].as_f64().unwrap();
    assert!((blended - (0.6 * rf + 0.4 * lstm)).abs() < 1e-9);

    let (_, single) = post(&app, "/api/v1/predict/random-forest", delhi_noon()).await;
    assert_eq!(single["prediction"].as_f64().unwrap(), rf);
}

#[tokio::test]
async fn test_retrain() {
    let dir = tempfile::tempdir().unwrap();
    let app = untrained_app(dir.path());

    let (status, body) = post(&app, "/api/v1/model/retrain", json!({ "model": "random_forest" })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Model(s) retrained successfully");
    assert!(body["results"]["random_forest"]["r2"].is_number());
    assert!(body["results"].get("lstm").is_none());
    assert!(dir.path().join("random_forest_solar.bin").exists());

    let (_, status_body) = get(&app, "/api/v1/model/status").await;
    assert_eq!(status_body["random_forest"]["loaded"], true);
    assert_eq!(status_body["random_forest"]["source"], "trained");
    assert_eq!(status_body["lstm"]["loaded"], false);

    // An empty body retrains both models
    let (status, body) = send(&app, Method::POST, "/api/v1/model/retrain", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["results"]["lstm"]["val_loss"].is_number());
    assert!(dir.path().join("lstm_solar.bin").exists());
    assert!(dir.path().join("lstm_scalers.json").exists());

    let (status, _) = post(&app, "/api/v1/model/retrain", json!({ "model": "xgboost" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_status_after_startup() {
    let dir = tempfile::tempdir().unwrap();
    let app = trained_app(dir.path()).await;

    let (status, body) = get(&app, "/api/v1/model/status").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["random_forest"]["features"].as_array().unwrap().len(), 10);
    assert_eq!(body["random_forest"]["features"][0], "temperature");
    assert_eq!(body["random_forest"]["metadata"]["model_type"], "random_forest");
    assert_eq!(body["lstm"]["metadata"]["feature_names"].as_array().unwrap().len(), 10);
    assert_eq!(body["lstm"]["max_forecast_steps"], 168);

    // A second start picks the artifacts up from disk
    let app = trained_app(dir.path()).await;
    let (_, body) = get(&app, "/api/v1/model/status").await;
    assert_eq!(body["random_forest"]["source"], "disk");
    assert_eq!(body["lstm"]["source"], "disk");
}

#[tokio::test]
async fn test_generate_sample() {
    let dir = tempfile::tempdir().unwrap();
    let app = untrained_app(dir.path());

    let (status, body) = get(&app, "/api/v1/data/generate-sample").await;
    assert_eq!(status, StatusCode::OK);
    let sample = body["sample_data"].as_object().unwrap();
    assert_eq!(sample.len(), 10);
    assert_eq!(sample["latitude"], 28.6139);
    assert!(body["description"].as_str().unwrap().contains("Delhi"));
}
