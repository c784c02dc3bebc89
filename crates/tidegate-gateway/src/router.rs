//! Axum router wiring: ops endpoints, HTTP commands, socket upgrade.

use axum::{routing::get, Router};

use tidegate_core::error::Result;

use crate::{app_state::AppState, ops, transport};

/// Fails when a command route cannot coexist with the others or with the
/// ops and socket paths.
pub fn build_router(state: AppState) -> Result<Router> {
    let gw = &state.cfg().gateway;

    let mut reserved: Vec<&str> = ops::PATHS.iter().copied().collect();
    reserved.push(gw.socket_path.as_str());
    let commands = transport::http::command_routes(state.registry(), &gw.http_prefix, &reserved)?;

    Ok(Router::new()
        .route(ops::HEALTHZ_PATH, get(ops::healthz))
        .route(ops::READYZ_PATH, get(ops::readyz))
        .route(ops::METRICS_PATH, get(ops::metrics))
        .route(&gw.socket_path, get(transport::ws::ws_upgrade))
        .merge(commands)
        .with_state(state.clone()))
}
