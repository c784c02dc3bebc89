//! Built-in command tables.
//!
//! Merge order: REST defaults, socket defaults, admin passthrough (when
//! enabled). Caller plugins go after these and may override any of them.

pub mod admin;
pub mod params;
pub mod search;

use axum::http::Method;

use crate::command::{
    CommandDefinition, HttpCommand, PluginTable, PublishSubscribeCommand, RequestResponseCommand,
};
use crate::config::GatewayConfig;

pub fn rest_plugin() -> PluginTable {
    vec![(
        "search".into(),
        CommandDefinition::Http(HttpCommand::new(Method::GET, search::SEARCH_PATH, search::build_search)),
    )]
}

pub fn socket_plugin() -> PluginTable {
    vec![
        (
            "search".into(),
            CommandDefinition::RequestResponse(RequestResponseCommand::default()),
        ),
        (
            "watch".into(),
            CommandDefinition::PublishSubscribe(PublishSubscribeCommand::default()),
        ),
    ]
}

pub fn admin_plugin(namespace: &str) -> PluginTable {
    let ns = namespace.to_string();
    vec![(
        namespace.to_string(),
        CommandDefinition::Http(HttpCommand::new(Method::POST, admin::admin_path(namespace), move |req| {
            admin::build_passthrough(&ns, req)
        })),
    )]
}

/// Built-ins for this config, in merge order.
pub fn builtin_plugins(cfg: &GatewayConfig) -> Vec<PluginTable> {
    let mut plugins = vec![rest_plugin(), socket_plugin()];
    if cfg.admin.enabled {
        tracing::warn!(namespace = %cfg.admin.namespace, "admin passthrough enabled");
        plugins.push(admin_plugin(&cfg.admin.namespace));
    }
    plugins
}
