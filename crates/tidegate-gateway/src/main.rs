//! tidegate gateway binary.
//!
//! - Config: `tidegate.yaml`, or the path given as the first argument
//! - Backend link + reply receiver
//! - HTTP commands, `/socket` WebSocket, ops endpoints

use std::net::SocketAddr;
use std::sync::Arc;

use tracing_subscriber::{fmt, EnvFilter};

use tidegate_core::error::{Result, TideError};
use tidegate_gateway::backend::BackendConnection;
use tidegate_gateway::obs::GatewayMetrics;
use tidegate_gateway::{app_state, config, router};

#[tokio::main]
async fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let path = std::env::args().nth(1).unwrap_or_else(|| "tidegate.yaml".to_string());
    let cfg = config::load_from_file(&path)?;
    let listen: SocketAddr = cfg
        .gateway
        .listen
        .parse()
        .map_err(|e| TideError::BadRequest(format!("gateway.listen must be a valid SocketAddr: {e}")))?;

    let metrics = Arc::new(GatewayMetrics::default());
    let backend = BackendConnection::connect(&cfg.backend, metrics).await?;

    let state = app_state::AppState::new(cfg, Arc::clone(&backend), Vec::new());
    let app = router::build_router(state)?;

    tracing::info!(%listen, config = %path, "tidegate starting");
    let listener = tokio::net::TcpListener::bind(listen).await?;

    let served = axum::serve(listener, app).await;
    backend.close();
    served?;
    Ok(())
}
