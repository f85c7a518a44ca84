use axum::{body::Bytes, extract::State, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ApiError;
use crate::service::{AppState, ModelStatus, RetrainResults, RetrainTarget};

#[derive(Debug, Default, Deserialize)]
pub struct RetrainRequest {
    #[serde(default)]
    pub model: RetrainTarget,
}

#[derive(Debug, Serialize)]
pub struct RetrainResponse {
    pub message: &'static str,
    pub results: RetrainResults,
    pub timestamp: DateTime<Utc>,
}

/// GET /model/status
pub async fn status(State(st): State<AppState>) -> Json<ModelStatus> {
    Json(st.service.status())
}

/// POST /model/retrain
///
/// An empty body retrains both models. The retrain runs on its own task so a
/// dropped connection does not abandon it halfway.
pub async fn retrain(State(st): State<AppState>, body: Bytes) -> Result<Json<RetrainResponse>, ApiError> {
    let req: RetrainRequest = if body.iter().all(u8::is_ascii_whitespace) {
        RetrainRequest::default()
    } else {
        serde_json::from_slice(&body)?
    };

    tracing::info!(target_model = ?req.model, "retrain requested");
    let service = st.service.clone();
    let results = tokio::spawn(async move { service.retrain(req.model).await })
        .await
        .map_err(|e| ApiError::InternalError(format!("retrain task failed: {}", e)))??;

    Ok(Json(RetrainResponse {
        message: "Model(s) retrained successfully",
        results,
        timestamp: Utc::now(),
    }))
}
