use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::domain::{feature_names, FeatureError};
use crate::ml::MlError;

/// API error types that can be returned from handlers
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Model(#[from] MlError),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    InternalError(String),
}

/// Error response that gets serialized to JSON
#[derive(Debug, Default, Serialize)]
struct ErrorResponse {
    error: String,
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    missing: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    unknown: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    required: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    expected: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    actual: Option<usize>,
}

impl ApiError {
    /// Get the HTTP status code for this error
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Model(MlError::NotTrained(_)) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Model(e) if e.is_validation() => StatusCode::BAD_REQUEST,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Model(_) | ApiError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Machine-readable error kind
    fn kind(&self) -> &'static str {
        match self {
            ApiError::Model(e) => match e {
                MlError::NotTrained(_) => "not_trained",
                MlError::Features(FeatureError::Missing { .. }) => "missing_features",
                MlError::Features(FeatureError::Unknown { .. }) => "unknown_features",
                MlError::Features(FeatureError::Invalid { .. }) => "invalid_feature",
                MlError::Features(FeatureError::Count { .. }) => "feature_count",
                MlError::SequenceLength { .. } => "sequence_length",
                MlError::InvalidSteps(_) => "invalid_steps",
                MlError::InsufficientData(_) => "insufficient_data",
                MlError::Io(_) => "io",
                MlError::Serialization(_) => "serialization",
                MlError::Training(_) => "training",
            },
            ApiError::BadRequest(_) => "bad_request",
            ApiError::InternalError(_) => "internal",
        }
    }

    fn body(&self) -> ErrorResponse {
        let mut body = ErrorResponse {
            error: self.to_string(),
            kind: self.kind(),
            ..Default::default()
        };

        match self {
            ApiError::Model(MlError::Features(FeatureError::Missing { missing })) => {
                body.error = "Missing features".to_string();
                body.missing = Some(missing.clone());
                body.required = Some(feature_names());
            }
            ApiError::Model(MlError::Features(FeatureError::Unknown { unknown })) => {
                body.error = "Unknown features".to_string();
                body.unknown = Some(unknown.clone());
                body.required = Some(feature_names());
            }
            ApiError::Model(MlError::SequenceLength { expected, actual }) => {
                body.error = format!("Sequence must have {} time steps", expected);
                body.expected = Some(*expected);
                body.actual = Some(*actual);
            }
            _ => {}
        }
        body
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if status.is_server_error() && status != StatusCode::SERVICE_UNAVAILABLE {
            tracing::error!(error = %self, "API error occurred");
        } else if status == StatusCode::SERVICE_UNAVAILABLE {
            tracing::warn!(error = %self, "Model unavailable");
        } else {
            tracing::debug!(error = %self, "Client error");
        }

        (status, Json(self.body())).into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(error: serde_json::Error) -> Self {
        ApiError::BadRequest(format!("Invalid JSON body: {}", error))
    }
}
