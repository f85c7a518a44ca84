use anyhow::Result;
use solar_irradiance::{api, config, service, telemetry};
use config::Config;
use telemetry::init_tracing;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cfg = Config::load()?;
    init_tracing(&cfg.logging);

    info!(models_dir = %cfg.models.dir.display(), "initializing models");
    let app_state = service::AppState::new(cfg.clone()).await;

    let app = api::router(app_state, &cfg);

    let addr = cfg.server.socket_addr()?;

    if cfg.server.host == "0.0.0.0" {
        warn!(
            "Server binding to 0.0.0.0 - the API will be reachable from the network. \
            Bind to 127.0.0.1 unless behind a firewall or reverse proxy."
        );
    }

    info!(%addr, "starting solar irradiance API");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(telemetry::shutdown_signal())
        .await?;

    warn!("shutdown complete");
    Ok(())
}
