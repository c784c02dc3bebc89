//! Command model.
//!
//! A command is what a client invokes by name. Three kinds exist:
//! - `Http`: method + path, turned into one backend request by a builder
//! - `RequestResponse`: one socket event, one backend round trip
//! - `PublishSubscribe`: subscribe / notify / unsubscribe over a socket
//!
//! Socket commands customize behaviour through hook slots. An empty slot is
//! the identity transform.

pub mod publish_subscribe;
pub mod registry;
pub mod request_response;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use axum::http::Method;
use serde_json::Value;

use tidegate_core::error::Result;
use tidegate_core::protocol::Envelope;

use crate::backend::{BackendConnection, SendOptions};

pub use registry::{CommandTable, Registry};

/// A named payload travelling through a hook: an event on the socket side,
/// an envelope `type` on the backend side.
#[derive(Debug, Clone, PartialEq)]
pub struct Emit {
    pub event: String,
    pub body: Value,
}

impl Emit {
    pub fn new(event: impl Into<String>, body: Value) -> Self {
        Self { event: event.into(), body }
    }
}

pub type Hook = Arc<dyn Fn(Emit) -> Result<Emit> + Send + Sync>;

/// Optional override of one step of a socket command.
#[derive(Clone, Default)]
pub struct HookSlot(Option<Hook>);

impl HookSlot {
    pub fn identity() -> Self {
        Self(None)
    }

    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(Emit) -> Result<Emit> + Send + Sync + 'static,
    {
        Self(Some(Arc::new(f)))
    }

    pub fn is_override(&self) -> bool {
        self.0.is_some()
    }

    pub fn apply(&self, emit: Emit) -> Result<Emit> {
        match &self.0 {
            Some(hook) => hook(emit),
            None => Ok(emit),
        }
    }
}

impl fmt::Debug for HookSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(if self.is_override() { "HookSlot(custom)" } else { "HookSlot(identity)" })
    }
}

/// What an HTTP request builder sees.
#[derive(Debug, Clone, Default)]
pub struct HttpRequest {
    pub path_params: HashMap<String, String>,
    pub query: HashMap<String, String>,
    pub body: Option<Value>,
}

impl HttpRequest {
    pub fn param(&self, name: &str) -> Option<&str> {
        self.path_params.get(name).map(String::as_str)
    }

    pub fn query(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }
}

/// Envelope fields produced by a request builder.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundRequest {
    pub msg_type: String,
    pub body: Value,
    pub timeout_ms: Option<u64>,
    pub correlate_by_type: bool,
    /// See `SendOptions::metric_type`.
    pub metric_type: Option<&'static str>,
}

impl OutboundRequest {
    pub fn new(msg_type: impl Into<String>, body: Value) -> Self {
        Self {
            msg_type: msg_type.into(),
            body,
            timeout_ms: None,
            correlate_by_type: false,
            metric_type: None,
        }
    }

    pub fn with_timeout(mut self, timeout_ms: Option<u64>) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }
}

/// Status and JSON body returned to an HTTP client.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpReply {
    pub status: u16,
    pub body: Value,
}

pub type RequestBuilder = Arc<dyn Fn(&HttpRequest) -> Result<OutboundRequest> + Send + Sync>;
pub type ResponseBuilder = Arc<dyn Fn(&Envelope) -> HttpReply + Send + Sync>;

#[derive(Clone)]
pub struct HttpCommand {
    pub method: Method,
    /// axum path syntax, e.g. `/tables/:tableName`.
    pub path: String,
    pub request_builder: RequestBuilder,
    /// `None` answers with the reply's `statusCode` and `body`.
    pub response_builder: Option<ResponseBuilder>,
}

impl HttpCommand {
    pub fn new<F>(method: Method, path: impl Into<String>, request_builder: F) -> Self
    where
        F: Fn(&HttpRequest) -> Result<OutboundRequest> + Send + Sync + 'static,
    {
        Self {
            method,
            path: path.into(),
            request_builder: Arc::new(request_builder),
            response_builder: None,
        }
    }

    pub fn with_response_builder<F>(mut self, f: F) -> Self
    where
        F: Fn(&Envelope) -> HttpReply + Send + Sync + 'static,
    {
        self.response_builder = Some(Arc::new(f));
        self
    }

    pub fn build_response(&self, reply: &Envelope) -> HttpReply {
        match &self.response_builder {
            Some(build) => build(reply),
            None => HttpReply {
                status: reply.status_code,
                body: reply.body.clone(),
            },
        }
    }

    /// Build, send, await the reply. Builder errors surface before anything
    /// reaches the backend.
    pub async fn invoke(
        &self,
        backend: &Arc<BackendConnection>,
        request: &HttpRequest,
    ) -> Result<HttpReply> {
        let out = (self.request_builder)(request)?;
        let opts = SendOptions {
            timeout_ms: out.timeout_ms,
            correlate_by_type: out.correlate_by_type,
            metric_type: out.metric_type,
        };
        let reply = backend.request(&out.msg_type, out.body, opts).await?;
        Ok(self.build_response(&reply))
    }
}

impl fmt::Debug for HttpCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpCommand")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("response_builder", &self.response_builder.is_some())
            .finish()
    }
}

#[derive(Debug, Clone, Default)]
pub struct RequestResponseCommand {
    pub on_request: HookSlot,
    pub on_response: HookSlot,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Default)]
pub struct PublishSubscribeCommand {
    pub on_subscribe: HookSlot,
    pub on_subscribed: HookSlot,
    pub on_unsubscribe: HookSlot,
    pub on_unsubscribed: HookSlot,
    pub on_notify: HookSlot,
    /// Notification `type` to listen on. Defaults to `<command>.notification`.
    pub channel: Option<String>,
    pub timeout_ms: Option<u64>,
}

impl PublishSubscribeCommand {
    pub fn channel_for(&self, command: &str) -> String {
        self.channel
            .clone()
            .unwrap_or_else(|| format!("{command}.notification"))
    }
}

#[derive(Debug, Clone)]
pub enum CommandDefinition {
    Http(HttpCommand),
    RequestResponse(RequestResponseCommand),
    PublishSubscribe(PublishSubscribeCommand),
}

/// One plugin's commands, in declaration order.
pub type PluginTable = Vec<(String, CommandDefinition)>;
