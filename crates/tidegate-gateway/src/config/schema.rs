use serde::Deserialize;
use tidegate_core::error::{Result, TideError};

use crate::api::search::SEARCH_PATH;
use crate::ops;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    pub version: u32,

    #[serde(default)]
    pub gateway: GatewaySection,

    #[serde(default)]
    pub backend: BackendSection,

    #[serde(default)]
    pub admin: AdminSection,
}

impl GatewayConfig {
    pub fn validate(&self) -> Result<()> {
        if self.version != 1 {
            return Err(TideError::UnsupportedVersion);
        }

        self.gateway.validate()?;
        self.backend.validate()?;
        self.admin.validate()?;

        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GatewaySection {
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Prepended to every HTTP command path. Empty or `/x`, no trailing slash.
    #[serde(default)]
    pub http_prefix: String,

    #[serde(default = "default_socket_path")]
    pub socket_path: String,

    #[serde(default = "default_ping_interval_ms")]
    pub ping_interval_ms: u64,

    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
}

impl Default for GatewaySection {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            http_prefix: String::new(),
            socket_path: default_socket_path(),
            ping_interval_ms: default_ping_interval_ms(),
            idle_timeout_ms: default_idle_timeout_ms(),
        }
    }
}

impl GatewaySection {
    pub fn validate(&self) -> Result<()> {
        if !(5000..=120000).contains(&self.ping_interval_ms) {
            return Err(TideError::BadRequest(
                "gateway.ping_interval_ms must be between 5000 and 120000".into(),
            ));
        }
        if !(10000..=600000).contains(&self.idle_timeout_ms) {
            return Err(TideError::BadRequest(
                "gateway.idle_timeout_ms must be between 10000 and 600000".into(),
            ));
        }
        if self.idle_timeout_ms <= self.ping_interval_ms {
            return Err(TideError::BadRequest(
                "gateway.idle_timeout_ms must be greater than ping_interval_ms".into(),
            ));
        }
        if !self.http_prefix.is_empty()
            && (!self.http_prefix.starts_with('/') || self.http_prefix.ends_with('/'))
        {
            return Err(TideError::BadRequest(
                "gateway.http_prefix must be empty or start with '/' and not end with '/'".into(),
            ));
        }
        if !self.socket_path.starts_with('/') || self.socket_path.contains([':', '*']) {
            return Err(TideError::BadRequest(
                "gateway.socket_path must be a literal path starting with '/'".into(),
            ));
        }
        if ops::PATHS.contains(&self.socket_path.as_str()) {
            return Err(TideError::BadRequest(format!(
                "gateway.socket_path {} is already an ops endpoint",
                self.socket_path
            )));
        }
        Ok(())
    }
}

fn default_listen() -> String {
    "0.0.0.0:10041".into()
}
fn default_socket_path() -> String {
    "/socket".into()
}
fn default_ping_interval_ms() -> u64 {
    20000
}
fn default_idle_timeout_ms() -> u64 {
    60000
}

/// Backend link: where envelopes go, and where replies come back.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BackendSection {
    #[serde(default = "default_backend_host")]
    pub host: String,

    #[serde(default = "default_backend_port")]
    pub port: u16,

    /// Fluent tag; envelopes travel as `<tag>.message`.
    #[serde(default = "default_tag")]
    pub tag: String,

    /// Host the receiver binds to and advertises in `replyTo`.
    #[serde(default = "default_backend_host")]
    pub receive_host: String,

    /// 0 picks an ephemeral port.
    #[serde(default)]
    pub receive_port: u16,

    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,

    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for BackendSection {
    fn default() -> Self {
        Self {
            host: default_backend_host(),
            port: default_backend_port(),
            tag: default_tag(),
            receive_host: default_backend_host(),
            receive_port: 0,
            default_timeout_ms: default_timeout_ms(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl BackendSection {
    pub fn validate(&self) -> Result<()> {
        if self.tag.trim().is_empty() {
            return Err(TideError::BadRequest("backend.tag must not be empty".into()));
        }
        if self.host.trim().is_empty() || self.receive_host.trim().is_empty() {
            return Err(TideError::BadRequest(
                "backend.host and backend.receive_host must not be empty".into(),
            ));
        }
        if !(1..=600000).contains(&self.default_timeout_ms) {
            return Err(TideError::BadRequest(
                "backend.default_timeout_ms must be between 1 and 600000".into(),
            ));
        }
        if !(1..=65536).contains(&self.queue_capacity) {
            return Err(TideError::BadRequest(
                "backend.queue_capacity must be between 1 and 65536".into(),
            ));
        }
        Ok(())
    }

    pub fn backend_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn receive_addr(&self) -> String {
        format!("{}:{}", self.receive_host, self.receive_port)
    }
}

fn default_backend_host() -> String {
    "127.0.0.1".into()
}
fn default_backend_port() -> u16 {
    24224
}
fn default_tag() -> String {
    "backend".into()
}
fn default_timeout_ms() -> u64 {
    60000
}
fn default_queue_capacity() -> usize {
    1024
}

/// Raw envelope passthrough (`POST /<namespace>/:messageType`).
/// It bypasses all validation, so it stays off unless enabled explicitly.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AdminSection {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_namespace")]
    pub namespace: String,
}

impl Default for AdminSection {
    fn default() -> Self {
        Self {
            enabled: false,
            namespace: default_namespace(),
        }
    }
}

impl AdminSection {
    pub fn validate(&self) -> Result<()> {
        let ok = !self.namespace.is_empty()
            && self
                .namespace
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !ok {
            return Err(TideError::BadRequest(
                "admin.namespace must be a non-empty [A-Za-z0-9_-] segment".into(),
            ));
        }
        // `/<namespace>/:messageType` and the search route share their shape.
        let search_root = SEARCH_PATH.split('/').nth(1).unwrap_or_default();
        if self.enabled && self.namespace == search_root {
            return Err(TideError::BadRequest(format!(
                "admin.namespace {} collides with the search route",
                self.namespace
            )));
        }
        Ok(())
    }
}

fn default_namespace() -> String {
    "backend".into()
}
