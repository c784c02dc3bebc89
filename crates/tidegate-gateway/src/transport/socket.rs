//! Socket adapter, independent of the WebSocket plumbing.
//!
//! `SocketRoutes` maps inbound event names to socket commands and is built
//! once from the registry. `SocketSession` handles one connection's frames;
//! `ws.rs` only moves bytes in and out of it.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use uuid::Uuid;

use tidegate_core::error::{Result, TideError};

use crate::backend::BackendConnection;
use crate::command::publish_subscribe::{self, subscribe_event, unsubscribe_event};
use crate::command::{request_response, Emit, PublishSubscribeCommand, Registry, RequestResponseCommand};
use crate::transport::codec::{self, ClientFrame};

/// Outbound side of one connected socket. Cheap to clone.
#[derive(Debug, Clone)]
pub struct SocketHandle {
    id: Arc<str>,
    tx: mpsc::Sender<Emit>,
}

impl SocketHandle {
    pub fn new(id: impl Into<Arc<str>>, tx: mpsc::Sender<Emit>) -> Self {
        Self { id: id.into(), tx }
    }

    /// New handle with a random id and its receiving end.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Emit>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(Uuid::new_v4().to_string(), tx), rx)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Queue one event. Returns `false` once the socket is gone; a full queue
    /// drops the event but still counts as open.
    pub fn emit(&self, emit: Emit) -> bool {
        match self.tx.try_send(emit) {
            Ok(()) => true,
            Err(TrySendError::Full(dropped)) => {
                tracing::warn!(socket = %self.id, event = %dropped.event, "socket queue full, event dropped");
                true
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    pub fn emit_error(&self, event: &str, err: &TideError) -> bool {
        self.emit(Emit::new("error", codec::error_body(event, err)))
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[derive(Debug, Clone)]
pub enum SocketRoute {
    Request { command: String, def: RequestResponseCommand },
    Subscribe { command: String, def: PublishSubscribeCommand },
    Unsubscribe { command: String, def: PublishSubscribeCommand },
}

/// Inbound event name -> socket command. HTTP commands never appear here.
#[derive(Debug, Default)]
pub struct SocketRoutes {
    routes: HashMap<String, SocketRoute>,
}

impl SocketRoutes {
    pub fn from_registry(registry: &Registry) -> Self {
        let mut routes = Self::default();
        for (name, def) in registry.request_response.iter() {
            routes.insert(
                name.to_string(),
                SocketRoute::Request { command: name.to_string(), def: def.clone() },
            );
        }
        for (name, def) in registry.publish_subscribe.iter() {
            routes.insert(
                subscribe_event(name),
                SocketRoute::Subscribe { command: name.to_string(), def: def.clone() },
            );
            routes.insert(
                unsubscribe_event(name),
                SocketRoute::Unsubscribe { command: name.to_string(), def: def.clone() },
            );
        }
        routes
    }

    fn insert(&mut self, event: String, route: SocketRoute) {
        if self.routes.contains_key(&event) {
            tracing::warn!(%event, "socket event already bound, keeping the first binding");
            return;
        }
        self.routes.insert(event, route);
    }

    pub fn get(&self, event: &str) -> Option<&SocketRoute> {
        self.routes.get(event)
    }

    pub fn events(&self) -> Vec<&str> {
        let mut events: Vec<&str> = self.routes.keys().map(String::as_str).collect();
        events.sort_unstable();
        events
    }
}

/// One connected socket.
pub struct SocketSession {
    handle: SocketHandle,
    routes: Arc<SocketRoutes>,
    backend: Arc<BackendConnection>,
}

impl SocketSession {
    pub fn new(handle: SocketHandle, routes: Arc<SocketRoutes>, backend: Arc<BackendConnection>) -> Self {
        Self { handle, routes, backend }
    }

    pub fn handle(&self) -> &SocketHandle {
        &self.handle
    }

    /// Handle one inbound text frame. Failures are reported to the socket as
    /// `error` events; nothing here ends the session.
    pub fn handle_text(&self, text: &str) {
        match codec::decode_frame(text) {
            Ok(frame) => {
                let event = frame.event.clone();
                if let Err(e) = self.handle_frame(frame) {
                    tracing::debug!(socket = %self.handle.id(), %event, error = %e, "socket event rejected");
                    self.handle.emit_error(&event, &e);
                }
            }
            Err(e) => {
                self.handle.emit_error("", &e);
            }
        }
    }

    pub fn handle_frame(&self, frame: ClientFrame) -> Result<String> {
        let route = self
            .routes
            .get(&frame.event)
            .ok_or_else(|| TideError::NotFound(format!("unknown event: {}", frame.event)))?;

        match route {
            SocketRoute::Request { command, def } => request_response::invoke(
                command,
                def,
                &self.backend,
                &self.handle,
                frame.data,
                frame.response_event,
            ),
            SocketRoute::Subscribe { command, def } => publish_subscribe::subscribe(
                command,
                def,
                &self.backend,
                &self.handle,
                frame.data,
                frame.response_event,
            ),
            SocketRoute::Unsubscribe { command, def } => publish_subscribe::unsubscribe(
                command,
                def,
                &self.backend,
                &self.handle,
                frame.data,
                frame.response_event,
            ),
        }
    }

    /// Local cleanup on disconnect. Nothing is sent to the backend.
    pub fn close(&self) -> usize {
        let removed = self.backend.subscriptions().cleanup_socket(self.handle.id());
        tracing::debug!(socket = %self.handle.id(), removed, "socket session closed");
        removed
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::command::{CommandDefinition, PluginTable};
    use serde_json::json;

    #[test]
    fn emit_reports_closed_socket() {
        let (socket, mut rx) = SocketHandle::channel(1);
        assert!(socket.emit(Emit::new("a", json!(1))));
        // full: dropped, still open
        assert!(socket.emit(Emit::new("b", json!(2))));
        assert_eq!(rx.try_recv().unwrap().event, "a");
        assert!(rx.try_recv().is_err());

        drop(rx);
        assert!(socket.is_closed());
        assert!(!socket.emit(Emit::new("c", json!(3))));
    }

    #[test]
    fn error_event_carries_code_and_origin() {
        let (socket, mut rx) = SocketHandle::channel(4);
        socket.emit_error("search", &TideError::NotFound("x".into()));
        let got = rx.try_recv().unwrap();
        assert_eq!(got.event, "error");
        assert_eq!(got.body["code"], "NOT_FOUND");
        assert_eq!(got.body["event"], "search");
    }

    #[test]
    fn routes_cover_socket_kinds_only() {
        let plugins: Vec<PluginTable> = vec![vec![
            (
                "search".into(),
                CommandDefinition::Http(crate::command::HttpCommand::new(
                    axum::http::Method::GET,
                    "/tables/:tableName",
                    |_| Ok(crate::command::OutboundRequest::new("search", json!(null))),
                )),
            ),
            ("status".into(), CommandDefinition::RequestResponse(Default::default())),
            ("watch".into(), CommandDefinition::PublishSubscribe(Default::default())),
        ]];
        let routes = SocketRoutes::from_registry(&Registry::build(&plugins));
        assert_eq!(routes.events(), vec!["status", "watch.subscribe", "watch.unsubscribe"]);
        assert!(routes.get("search").is_none());
    }
}
