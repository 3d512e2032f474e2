mod accounts;
mod api;
mod challenge;
mod clock;
mod config;
mod db;
mod error;
mod metrics;
mod portfolio;
mod stocks;
mod watchlist;

use anyhow::Result;
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(config::AppConfig::default_config_path);
    let config = config::AppConfig::load(&config_path)?;

    let (dispatch, _otel_guard) = common::observability::build_dispatch(
        config.observability.service_name.clone(),
        &config.observability.log_level,
    );
    tracing::dispatcher::set_global_default(dispatch).map_err(anyhow::Error::msg)?;
    info!(path = %config_path, "afribourse config loaded");

    let prometheus = match metrics::init_global() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!(error = %e, "prometheus recorder unavailable, /metrics disabled");
            None
        }
    };

    let db = db::Db::open(&config.database.path).await?;
    let window = config.challenge.trading_window()?;
    info!(
        launch = %window.launch(),
        db = %config.database.path,
        "challenge window configured"
    );

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let state = Arc::new(api::AppState {
        db,
        config: Arc::new(config),
        window,
        clock: clock::Clock::System,
        started_at: chrono::Utc::now(),
        metrics: prometheus,
    });

    let app = api::router(state);

    info!(addr = %bind_addr, "starting afribourse HTTP server");
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
