//! # hrm-server
//!
//! HTTP front end for the HRM recorder session.
//!
//! ## Running
//!
//! ```bash
//! # Development, no hardware
//! cargo run --package hrm-server --features mock-bluetooth
//!
//! # Production
//! HRM_CONFIG=/etc/hrm-recorder/config.toml ./hrm-server
//! ```
//!
//! The configuration file is optional; `HRM_`-prefixed environment variables
//! override it (e.g. `HRM_DEVICE__ADDRESS=C4:7F:51:12:34:56`).

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use hrm_core::Config;
use hrm_server::state::{self, AppState};
use hrm_server::{api, logging};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Environment variable pointing at the configuration file.
const CONFIG_ENV: &str = "HRM_CONFIG";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::var_os(CONFIG_ENV).map_or_else(Config::default_path, PathBuf::from);
    let config = Config::load_or_default(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;

    logging::init(config.server.production)?;
    info!(config = %config_path.display(), "Starting hrm-server");

    let backend = state::open_backend().await?;
    let state = AppState::new(backend, config.clone());

    if let Some(device) = config.device.descriptor() {
        if let Err(err) = state.session().connect(Some(device)).await {
            warn!(error = %err, "initial connect failed; use POST /api/session/connect to retry");
        }
    }

    let app = api::create_router(state.clone()).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive()),
    );

    let addr: SocketAddr = config
        .server
        .bind_address
        .parse()
        .with_context(|| format!("invalid bind address '{}'", config.server.bind_address))?;
    let listener = TcpListener::bind(addr).await?;
    info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.session().disconnect().await;
    info!("hrm-server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "cannot listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}
