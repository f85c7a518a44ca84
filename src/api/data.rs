use axum::{extract::State, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::WeatherRecord;
use crate::service::AppState;

#[derive(Debug, Serialize)]
pub struct SampleResponse {
    pub sample_data: WeatherRecord,
    pub description: &'static str,
    pub timestamp: DateTime<Utc>,
}

/// GET /data/generate-sample
pub async fn generate_sample(State(st): State<AppState>) -> Json<SampleResponse> {
    Json(SampleResponse {
        sample_data: st.service.sample_data(),
        description: "Sample weather data for Delhi at the current hour",
        timestamp: Utc::now(),
    })
}
