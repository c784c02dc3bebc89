//! One socket event, one backend round trip, one outcome back to the socket.

use std::sync::Arc;

use serde_json::Value;

use tidegate_core::error::Result;

use crate::backend::{BackendConnection, SendOptions};
use crate::command::{Emit, RequestResponseCommand};
use crate::transport::socket::SocketHandle;

/// Send `data` for command `name` and arrange for the outcome to reach
/// `socket`.
///
/// The reply is emitted under `response_event` when given, otherwise under
/// the reply envelope's `type`. A timeout or a dropped link is emitted as an
/// `error` event. An `Err` here means nothing was sent.
pub fn invoke(
    name: &str,
    cmd: &RequestResponseCommand,
    backend: &Arc<BackendConnection>,
    socket: &SocketHandle,
    data: Value,
    response_event: Option<String>,
) -> Result<String> {
    let outbound = cmd.on_request.apply(Emit::new(name, data))?;

    let on_response = cmd.on_response.clone();
    let socket = socket.clone();
    let request_event = name.to_string();

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
            let event = response_event.unwrap_or_else(|| reply.msg_type.clone());
            match on_response.apply(Emit::new(event, reply.body)) {
                Ok(emit) => {
                    if !socket.emit(emit) {
                        tracing::debug!(socket = %socket.id(), command = %request_event, "reply discarded, socket gone");
                    }
                }
                Err(e) => {
                    socket.emit_error(&request_event, &e);
                }
            }
        }),
    )
}
