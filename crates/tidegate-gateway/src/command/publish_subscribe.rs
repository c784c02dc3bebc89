//! Subscribe / notify / unsubscribe over one socket.
//!
//! A subscription is recorded only after the backend answers the subscribe
//! with status 200, and only while the socket is still open. It is removed
//! when the unsubscribe round trip completes (reply or timeout) or when the
//! socket disconnects.

use std::sync::Arc;

use serde_json::Value;

use tidegate_core::error::Result;
use tidegate_core::protocol::Envelope;

use crate::backend::subscriptions::{Subscriber, SubscriptionKey};
use crate::backend::{BackendConnection, SendOptions};
use crate::command::{Emit, HookSlot, PublishSubscribeCommand};
use crate::transport::socket::SocketHandle;

pub fn subscribe_event(command: &str) -> String {
    format!("{command}.subscribe")
}

pub fn unsubscribe_event(command: &str) -> String {
    format!("{command}.unsubscribe")
}

pub fn notification_event(command: &str) -> String {
    format!("{command}.notification")
}

/// Forwards channel notifications to one socket through `on_notify`.
pub struct NotifySink {
    socket: SocketHandle,
    event: String,
    on_notify: HookSlot,
}

impl NotifySink {
    pub fn new(socket: SocketHandle, command: &str, on_notify: HookSlot) -> Self {
        Self {
            socket,
            event: notification_event(command),
            on_notify,
        }
    }
}

impl Subscriber for NotifySink {
    fn deliver(&self, envelope: &Envelope) -> bool {
        match self.on_notify.apply(Emit::new(self.event.as_str(), envelope.body.clone())) {
            Ok(emit) => self.socket.emit(emit),
            Err(e) => {
                tracing::warn!(socket = %self.socket.id(), event = %self.event, error = %e, "notify hook failed");
                !self.socket.is_closed()
            }
        }
    }
}

pub fn subscribe(
    name: &str,
    cmd: &PublishSubscribeCommand,
    backend: &Arc<BackendConnection>,
    socket: &SocketHandle,
    data: Value,
    response_event: Option<String>,
) -> Result<String> {
    let request_event = subscribe_event(name);
    let outbound = cmd.on_subscribe.apply(Emit::new(request_event.as_str(), data))?;

    let channel = cmd.channel_for(name);
    let command = name.to_string();
    let on_subscribed = cmd.on_subscribed.clone();
    let on_notify = cmd.on_notify.clone();
    let subscriptions = Arc::clone(backend.subscriptions());
    let socket = socket.clone();

    backend.send(
        &outbound.event,
        outbound.body,
        SendOptions::timeout(cmd.timeout_ms),
        Box::new(move |outcome| {
            let reply = match outcome {
                Ok(reply) => reply,
                Err(e) => {
                    socket.emit_error(&request_event, &e);
                    return;
                }
            };

            if reply.is_success() && !socket.is_closed() {
                let sink = NotifySink::new(socket.clone(), &command, on_notify);
                subscriptions.subscribe(
                    &channel,
                    SubscriptionKey::new(socket.id(), command.as_str()),
                    Arc::new(sink),
                );
                tracing::debug!(socket = %socket.id(), %channel, "subscribed");
            } else {
                tracing::debug!(socket = %socket.id(), %channel, status = reply.status_code, "subscribe not recorded");
            }

            let event = response_event.unwrap_or_else(|| format!("{command}.subscribe.response"));
            match on_subscribed.apply(Emit::new(event, reply.body)) {
                Ok(emit) => {
                    socket.emit(emit);
                }
                Err(e) => {
                    socket.emit_error(&request_event, &e);
                }
            }
        }),
    )
}

pub fn unsubscribe(
    name: &str,
    cmd: &PublishSubscribeCommand,
    backend: &Arc<BackendConnection>,
    socket: &SocketHandle,
    data: Value,
    response_event: Option<String>,
) -> Result<String> {
    let request_event = unsubscribe_event(name);
    let outbound = cmd.on_unsubscribe.apply(Emit::new(request_event.as_str(), data))?;

    let channel = cmd.channel_for(name);
    let command = name.to_string();
    let on_unsubscribed = cmd.on_unsubscribed.clone();
    let subscriptions = Arc::clone(backend.subscriptions());
    let socket = socket.clone();

    backend.send(
        &outbound.event,
        outbound.body,
        SendOptions::timeout(cmd.timeout_ms),
        Box::new(move |outcome| {
            // Notifications keep flowing until here, whatever the outcome.
            subscriptions.unsubscribe(&channel, &SubscriptionKey::new(socket.id(), command.as_str()));
            tracing::debug!(socket = %socket.id(), %channel, "unsubscribed");

            let reply = match outcome {
                Ok(reply) => reply,
                Err(e) => {
                    socket.emit_error(&request_event, &e);
                    return;
                }
            };
            let event = response_event.unwrap_or_else(|| format!("{command}.unsubscribe.response"));
            match on_unsubscribed.apply(Emit::new(event, reply.body)) {
                Ok(emit) => {
                    socket.emit(emit);
                }
                Err(e) => {
                    socket.emit_error(&request_event, &e);
                }
            }
        }),
    )
}
