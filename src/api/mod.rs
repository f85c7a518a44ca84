pub mod data;
pub mod error;
pub mod health;
pub mod models;
pub mod predict;
pub mod v1;

use axum::Router;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{config::Config, service::AppState};

pub use error::ApiError;

/// Unit reported with every irradiance value
pub const IRRADIANCE_UNIT: &str = "W/m²";

pub fn router(state: AppState, cfg: &Config) -> Router {
    let mut router = Router::new().nest("/api/v1", v1::router(state, cfg));

    if cfg.server.enable_cors {
        use tower_http::cors::AllowOrigin;
        match cfg.server.cors_origin.parse::<axum::http::HeaderValue>() {
            Ok(origin) => {
                let cors = CorsLayer::new()
                    .allow_origin(AllowOrigin::exact(origin))
                    .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
                    .allow_headers([axum::http::header::CONTENT_TYPE]);
                router = router.layer(cors);
            }
            Err(e) => {
                tracing::warn!(origin = %cfg.server.cors_origin, error = %e, "invalid CORS origin, CORS disabled")
            }
        }
    }

    router
        .layer(ServiceBuilder::new().layer(axum::extract::DefaultBodyLimit::max(1024 * 1024)))
        .layer(TraceLayer::new_for_http())
}
