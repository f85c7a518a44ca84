use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;

use crate::ml::inference::ModelSource;
use crate::ml::ModelType;
use crate::service::AppState;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: String,
    timestamp: chrono::DateTime<chrono::Utc>,
    checks: HealthChecks,
}

/// Individual health checks
#[derive(Debug, Serialize)]
pub struct HealthChecks {
    random_forest: ComponentHealth,
    lstm: ComponentHealth,
}

/// Health status of a component
#[derive(Debug, Serialize)]
pub struct ComponentHealth {
    status: String,
    source: ModelSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl ComponentHealth {
    fn healthy(source: ModelSource) -> Self {
        Self {
            status: "healthy".to_string(),
            source,
            error: None,
        }
    }

    fn unhealthy(source: ModelSource, error: String) -> Self {
        Self {
            status: "unhealthy".to_string(),
            source,
            error: Some(error),
        }
    }

    fn is_healthy(&self) -> bool {
        self.status == "healthy"
    }
}

fn check_model(state: &AppState, model_type: ModelType) -> ComponentHealth {
    let registry = state.service.registry();
    let source = registry.source(model_type);
    if registry.is_trained(model_type) {
        ComponentHealth::healthy(source)
    } else {
        ComponentHealth::unhealthy(source, format!("{} model is not trained", model_type))
    }
}

/// GET /healthz
///
/// Always 200 while the process serves requests; untrained models report
/// the service as degraded.
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let checks = HealthChecks {
        random_forest: check_model(&state, ModelType::RandomForest),
        lstm: check_model(&state, ModelType::Lstm),
    };
    let all_healthy = checks.random_forest.is_healthy() && checks.lstm.is_healthy();

    let response = HealthResponse {
        status: if all_healthy {
            "healthy".to_string()
        } else {
            "degraded".to_string()
        },
        timestamp: chrono::Utc::now(),
        checks,
    };

    (StatusCode::OK, Json(response))
}

/// GET /readyz - 200 once both models can serve predictions
pub async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let registry = state.service.registry();
    if ModelType::ALL.iter().all(|m| registry.is_trained(*m)) {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}
