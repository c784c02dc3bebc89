//! Shared application state.
//!
//! Everything here is built once at startup and read-only afterwards.

use std::sync::Arc;

use crate::api;
use crate::backend::BackendConnection;
use crate::command::{PluginTable, Registry};
use crate::config::GatewayConfig;
use crate::obs::GatewayMetrics;
use crate::transport::socket::SocketRoutes;

#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    cfg: GatewayConfig,
    backend: Arc<BackendConnection>,
    registry: Registry,
    socket_routes: Arc<SocketRoutes>,
}

impl AppState {
    /// Merge built-in tables with `plugins` (in that order) and bind them to
    /// `backend`.
    pub fn new(cfg: GatewayConfig, backend: Arc<BackendConnection>, plugins: Vec<PluginTable>) -> Self {
        let mut tables = api::builtin_plugins(&cfg);
        tables.extend(plugins);

        let registry = Registry::build(&tables);
        let socket_routes = Arc::new(SocketRoutes::from_registry(&registry));
        tracing::debug!(events = ?socket_routes.events(), "socket events bound");

        Self {
            inner: Arc::new(AppStateInner {
                cfg,
                backend,
                registry,
                socket_routes,
            }),
        }
    }

    pub fn cfg(&self) -> &GatewayConfig {
        &self.inner.cfg
    }

    pub fn backend(&self) -> Arc<BackendConnection> {
        Arc::clone(&self.inner.backend)
    }

    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    pub fn socket_routes(&self) -> Arc<SocketRoutes> {
        Arc::clone(&self.inner.socket_routes)
    }

    pub fn metrics(&self) -> &Arc<GatewayMetrics> {
        self.inner.backend.metrics()
    }

    pub fn is_ready(&self) -> bool {
        !self.inner.backend.is_closed()
    }

    pub fn metrics_extra(&self) -> Vec<(&'static str, u64)> {
        let backend = &self.inner.backend;
        vec![
            ("tidegate_pending_requests", backend.pending_count() as u64),
            ("tidegate_backend_link_up", u64::from(!backend.is_closed())),
        ]
    }
}
