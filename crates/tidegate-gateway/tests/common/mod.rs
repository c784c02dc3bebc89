#![allow(dead_code)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

//! Test harness: a fake backend on real TCP sockets, plus gateway setup.
//!
//! The fake accepts the gateway's outbound link, decodes every envelope it
//! receives, and answers over one persistent connection to the gateway's
//! reply receiver so frames arrive in the order they were written.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::StreamExt;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};
use tokio_util::codec::FramedRead;

use tidegate_core::protocol::fluent::{self, Packet};
use tidegate_core::protocol::Envelope;
use tidegate_gateway::app_state::AppState;
use tidegate_gateway::backend::{BackendConnection, MsgPackCodec};
use tidegate_gateway::command::{Emit, PluginTable};
use tidegate_gateway::config;
use tidegate_gateway::obs::GatewayMetrics;

pub const WAIT: Duration = Duration::from_secs(3);

pub struct FakeBackend {
    pub addr: SocketAddr,
    received: mpsc::UnboundedReceiver<Envelope>,
    accept_task: JoinHandle<()>,
    links: Arc<std::sync::Mutex<Vec<JoinHandle<()>>>>,
    reply_stream: Mutex<Option<TcpStream>>,
}

impl FakeBackend {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, received) = mpsc::unbounded_channel();
        let links = Arc::new(std::sync::Mutex::new(Vec::new()));

        let links_for_accept = Arc::clone(&links);
        let accept_task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let tx = tx.clone();
                let reader = tokio::spawn(async move {
                    let mut frames = FramedRead::new(stream, MsgPackCodec::default());
                    while let Some(Ok(value)) = frames.next().await {
                        let Ok(packet) = Packet::classify(value) else { continue };
                        for event in packet.into_events() {
                            if let Ok(env) = Envelope::from_msgpack(event.data) {
                                let _ = tx.send(env);
                            }
                        }
                    }
                });
                links_for_accept.lock().unwrap().push(reader);
            }
        });

        Self {
            addr,
            received,
            accept_task,
            links,
            reply_stream: Mutex::new(None),
        }
    }

    /// Next envelope the gateway sent.
    pub async fn next_request(&mut self) -> Envelope {
        timeout(WAIT, self.received.recv())
            .await
            .expect("no envelope reached the backend")
            .expect("fake backend stopped")
    }

    /// Assert nothing else was sent within `wait`.
    pub async fn assert_idle(&mut self, wait: Duration) {
        if let Ok(Some(env)) = timeout(wait, self.received.recv()).await {
            panic!("unexpected envelope: {env:?}");
        }
    }

    /// Write envelopes to `reply_to` (`host:port/tag`) as fluent Message frames.
    pub async fn send(&self, reply_to: &str, envelopes: &[Envelope]) {
        let (addr, tag) = reply_to.split_once('/').expect("replyTo has a tag");
        let mut guard = self.reply_stream.lock().await;
        if guard.is_none() {
            *guard = Some(TcpStream::connect(addr).await.unwrap());
        }
        let stream = guard.as_mut().unwrap();
        for env in envelopes {
            let frame = fluent::encode_message(&format!("{tag}.message"), 0, env).unwrap();
            stream.write_all(&frame).await.unwrap();
        }
    }

    /// Reply to `request` with `type`, status and body.
    pub async fn reply(&self, request: &Envelope, msg_type: &str, status: u16, body: Value) {
        let reply_to = request.reply_to.clone().expect("request has replyTo");
        self.send(&reply_to, &[request.reply(msg_type, status, body)]).await;
    }

    /// Hang up on the gateway's outbound link.
    pub async fn drop_links(&self) {
        let links: Vec<JoinHandle<()>> = self.links.lock().unwrap().drain(..).collect();
        for link in links {
            link.abort();
        }
        self.accept_task.abort();
    }
}

pub fn config_yaml(backend: &FakeBackend, extra: &str) -> String {
    format!(
        "version: 1\nbackend:\n  port: {}\n  default_timeout_ms: 2000\n{extra}",
        backend.addr.port()
    )
}

pub async fn gateway_with(backend: &FakeBackend, extra: &str, plugins: Vec<PluginTable>) -> AppState {
    let cfg = config::load_from_str(&config_yaml(backend, extra)).unwrap();
    let link = BackendConnection::connect(&cfg.backend, Arc::new(GatewayMetrics::default()))
        .await
        .unwrap();
    AppState::new(cfg, link, plugins)
}

pub async fn gateway(backend: &FakeBackend) -> AppState {
    gateway_with(backend, "", Vec::new()).await
}

pub async fn next_emit(rx: &mut mpsc::Receiver<Emit>) -> Emit {
    timeout(WAIT, rx.recv())
        .await
        .expect("socket saw nothing")
        .expect("socket channel closed")
}

pub async fn assert_no_emit(rx: &mut mpsc::Receiver<Emit>, wait: Duration) {
    if let Ok(Some(emit)) = timeout(wait, rx.recv()).await {
        panic!("unexpected emit: {emit:?}");
    }
}
