//! WebSocket handler.
//!
//! Responsibilities:
//! - Upgrade HTTP -> WS
//! - Bridge text frames into a `SocketSession` and its emits back out
//! - Lifecycle: ping/pong + idle timeout
//! - Local subscription cleanup on disconnect

use axum::{
    extract::{ws::Message, ws::WebSocket, ws::WebSocketUpgrade, State},
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::{Duration, Instant};
use tracing::Instrument;

use tidegate_core::error::TideError;

use crate::app_state::AppState;
use crate::command::Emit;
use crate::transport::codec;
use crate::transport::socket::{SocketHandle, SocketSession};

const OUTBOUND_CAPACITY: usize = 1024;

pub async fn ws_upgrade(State(app): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| {
        let (handle, out_rx) = SocketHandle::channel(OUTBOUND_CAPACITY);
        let span = tracing::info_span!("socket", id = %handle.id());
        run_session(app, socket, handle, out_rx).instrument(span)
    })
}

async fn run_session(
    app: AppState,
    socket: WebSocket,
    handle: SocketHandle,
    mut out_rx: mpsc::Receiver<Emit>,
) {
    let session = SocketSession::new(handle.clone(), app.socket_routes(), app.backend());
    tracing::info!("socket connected");
    app.metrics().sockets_active.inc(&[]);

    let (mut ws_tx, mut ws_rx) = socket.split();

    let gw = &app.cfg().gateway;
    let ping_every = Duration::from_millis(gw.ping_interval_ms);
    let idle_timeout = Duration::from_millis(gw.idle_timeout_ms);

    let mut ping_tick = tokio::time::interval(ping_every);
    ping_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    let mut last_activity = Instant::now();

    loop {
        tokio::select! {
            // outbound writer
            maybe_out = out_rx.recv() => {
                let Some(emit) = maybe_out else { break };
                if ws_tx.send(Message::Text(codec::encode_emit(&emit))).await.is_err() {
                    break;
                }
            }

            // inbound reader
            incoming = ws_rx.next() => {
                let Some(Ok(msg)) = incoming else { break };
                last_activity = Instant::now();

                match msg {
                    Message::Text(text) => session.handle_text(&text),
                    Message::Binary(_) => {
                        handle.emit_error("", &TideError::BadRequest("binary frames are not supported".into()));
                    }
                    Message::Ping(payload) => {
                        if ws_tx.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Message::Pong(_) => {}
                    Message::Close(_) => break,
                }
            }

            _ = ping_tick.tick() => {
                if ws_tx.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }

            // idle timeout
            _ = tokio::time::sleep(Duration::from_millis(250)) => {
                if last_activity.elapsed() >= idle_timeout {
                    let body = json!({ "code": "TIMEOUT", "msg": "idle timeout", "event": "" });
                    let _ = ws_tx.send(Message::Text(codec::encode_emit(&Emit::new("error", body)))).await;
                    break;
                }
            }
        }
    }

    // Late replies for this socket are discarded from here on.
    drop(out_rx);
    session.close();
    app.metrics().sockets_active.dec(&[]);
    tracing::info!("socket disconnected");
}
