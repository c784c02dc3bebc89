//! The single owner of the link to the backend.
//!
//! Outbound: envelopes are encoded as fluent Message frames and queued to a
//! writer task that exclusively owns the TCP stream.
//!
//! Inbound: the receiver hands decoded events to one dispatch task, which
//! either completes a pending request or fans the envelope out to
//! subscribers. Reply callbacks run inline on that task, so anything a
//! callback registers is in place before the next inbound message.
//!
//! Completion is at-most-once: the reply path and the timer both go through
//! `DashMap::remove`, and whichever removes the entry is the one that
//! completes it.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Instant;

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Duration;
use uuid::Uuid;

use tidegate_core::error::{Result, TideError};
use tidegate_core::protocol::envelope::{Envelope, STATUS_OK};
use tidegate_core::protocol::fluent::{self, Event};

use crate::backend::receiver::MsgPackReceiver;
use crate::backend::subscriptions::SubscriptionTable;
use crate::config::BackendSection;
use crate::obs::GatewayMetrics;

/// `channel` label shared by every notification nobody was subscribed to.
pub const UNSUBSCRIBED_CHANNEL: &str = "unsubscribed";

/// Completion callback of a pending request. Invoked at most once.
///
/// `Sync` keeps the pending table shareable across tasks.
pub type ReplyCallback = Box<dyn FnOnce(Result<Envelope>) + Send + Sync + 'static>;

/// How an inbound reply finds its pending request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Correlation {
    /// Reply carries `inReplyTo == id`.
    Id(String),
    /// Reply carries the same `type` (or `type` + `.response`). Only one
    /// request per type may be in flight.
    Type(String),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SendOptions {
    /// `None` or `Some(0)` uses the connection default.
    pub timeout_ms: Option<u64>,
    pub correlate_by_type: bool,
    /// Fixed `type` label for request metrics. Set it when `msg_type` comes
    /// from the client.
    pub metric_type: Option<&'static str>,
}

impl SendOptions {
    pub fn timeout(timeout_ms: Option<u64>) -> Self {
        Self { timeout_ms, ..Self::default() }
    }
}

struct PendingRequest {
    seq: u64,
    /// Envelope id, matched against `inReplyTo` even for type-correlated requests.
    id: String,
    msg_type: String,
    metric_type: String,
    sent_at: Instant,
    timer: JoinHandle<()>,
    on_reply: ReplyCallback,
}

pub struct BackendConnection {
    /// `<tag>.message`, used both ways.
    message_tag: String,
    reply_to: String,
    default_timeout_ms: u64,
    outbound: mpsc::Sender<Vec<u8>>,
    pending: DashMap<Correlation, PendingRequest>,
    subscriptions: Arc<SubscriptionTable>,
    metrics: Arc<GatewayMetrics>,
    seq: AtomicU64,
    closed: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    receiver: Mutex<Option<MsgPackReceiver>>,
}

impl BackendConnection {
    /// Bind the reply receiver, connect the outbound link, start the tasks.
    pub async fn connect(cfg: &BackendSection, metrics: Arc<GatewayMetrics>) -> Result<Arc<Self>> {
        let (event_tx, event_rx) = mpsc::channel::<Event>(cfg.queue_capacity);
        let receiver =
            MsgPackReceiver::bind(&cfg.receive_addr(), event_tx, Arc::clone(&metrics)).await?;
        let reply_to = format!(
            "{}:{}/{}",
            cfg.receive_host,
            receiver.local_addr().port(),
            cfg.tag
        );

        let backend_addr = cfg.backend_addr();
        let stream = TcpStream::connect(&backend_addr).await.map_err(|e| {
            TideError::BackendUnavailable(format!("connect {backend_addr} failed: {e}"))
        })?;
        tracing::info!(backend = %backend_addr, %reply_to, "backend link established");

        let (out_tx, out_rx) = mpsc::channel::<Vec<u8>>(cfg.queue_capacity);

        let conn = Arc::new(Self {
            message_tag: format!("{}.message", cfg.tag),
            reply_to,
            default_timeout_ms: cfg.default_timeout_ms,
            outbound: out_tx,
            pending: DashMap::new(),
            subscriptions: Arc::new(SubscriptionTable::new()),
            metrics,
            seq: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
            receiver: Mutex::new(Some(receiver)),
        });

        let link = tokio::spawn(link_task(stream, out_rx, Arc::downgrade(&conn)));
        let dispatch = tokio::spawn(dispatch_loop(event_rx, Arc::downgrade(&conn)));
        if let Ok(mut tasks) = conn.tasks.lock() {
            tasks.push(link);
            tasks.push(dispatch);
        }

        Ok(conn)
    }

    /// Send one envelope and return its id immediately.
    ///
    /// `on_reply` later receives the reply, a timeout error, or a
    /// connection-closed error. When this returns `Err` it is never called.
    pub fn send(
        self: &Arc<Self>,
        msg_type: &str,
        body: Value,
        opts: SendOptions,
        on_reply: ReplyCallback,
    ) -> Result<String> {
        let metric_type = opts.metric_type.unwrap_or(msg_type);
        if self.is_closed() {
            self.count_request(metric_type, "rejected");
            return Err(TideError::ConnectionClosed);
        }

        let timeout_ms = opts
            .timeout_ms
            .filter(|ms| *ms > 0)
            .unwrap_or(self.default_timeout_ms);

        let envelope = Envelope {
            id: Uuid::new_v4().to_string(),
            date: Utc::now().to_rfc3339(),
            reply_to: Some(self.reply_to.clone()),
            in_reply_to: None,
            status_code: STATUS_OK,
            msg_type: msg_type.to_string(),
            body,
            timeout: Some(timeout_ms),
        };
        let frame = fluent::encode_message(&self.message_tag, Utc::now().timestamp(), &envelope)?;

        let key = if opts.correlate_by_type {
            Correlation::Type(msg_type.to_string())
        } else {
            Correlation::Id(envelope.id.clone())
        };
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);

        match self.pending.entry(key.clone()) {
            Entry::Occupied(_) => {
                self.count_request(metric_type, "rejected");
                return Err(TideError::Conflict(format!(
                    "a {msg_type} request is already awaiting its reply"
                )));
            }
            Entry::Vacant(slot) => {
                let timer = self.arm_timer(key.clone(), seq, timeout_ms);
                slot.insert(PendingRequest {
                    seq,
                    id: envelope.id.clone(),
                    msg_type: msg_type.to_string(),
                    metric_type: metric_type.to_string(),
                    sent_at: Instant::now(),
                    timer,
                    on_reply,
                });
            }
        }

        if let Err(e) = self.outbound.try_send(frame) {
            if let Some((_, p)) = self.pending.remove(&key) {
                p.timer.abort();
            }
            self.count_request(metric_type, "rejected");
            return Err(match e {
                TrySendError::Full(_) => {
                    TideError::BackendUnavailable("outbound queue is full".into())
                }
                TrySendError::Closed(_) => TideError::ConnectionClosed,
            });
        }

        tracing::debug!(id = %envelope.id, msg_type, timeout_ms, "envelope sent");
        Ok(envelope.id)
    }

    /// `send` for callers that simply await the outcome.
    pub async fn request(
        self: &Arc<Self>,
        msg_type: &str,
        body: Value,
        opts: SendOptions,
    ) -> Result<Envelope> {
        let (tx, rx) = oneshot::channel();
        self.send(
            msg_type,
            body,
            opts,
            Box::new(move |res| {
                let _ = tx.send(res);
            }),
        )?;
        rx.await.map_err(|_| TideError::ConnectionClosed)?
    }

    fn arm_timer(self: &Arc<Self>, key: Correlation, seq: u64, timeout_ms: u64) -> JoinHandle<()> {
        let conn = Arc::downgrade(self);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(timeout_ms)).await;
            if let Some(conn) = conn.upgrade() {
                conn.expire(&key, seq, timeout_ms);
            }
        })
    }

    fn expire(&self, key: &Correlation, seq: u64, timeout_ms: u64) {
        // seq check: a type-correlated key may already belong to a newer request.
        let Some((_, p)) = self.pending.remove_if(key, |_, p| p.seq == seq) else {
            return;
        };
        tracing::warn!(msg_type = %p.msg_type, timeout_ms, "backend request timed out");
        self.count_request(&p.metric_type, "timeout");
        (p.on_reply)(Err(TideError::Timeout { msg_type: p.msg_type, timeout_ms }));
    }

    fn handle_event(&self, event: Event) {
        if event.tag != self.message_tag {
            tracing::debug!(tag = %event.tag, expected = %self.message_tag, "ignoring event with foreign tag");
            self.metrics.decode_drops.inc(&[("reason", "tag")]);
            return;
        }
        match Envelope::from_msgpack(event.data) {
            Ok(envelope) => self.dispatch(envelope),
            Err(e) => {
                tracing::warn!(error = %e, "dropping undecodable envelope");
                self.metrics.decode_drops.inc(&[("reason", "envelope")]);
            }
        }
    }

    /// Route one inbound envelope: complete a pending request, or fan out.
    pub fn dispatch(&self, envelope: Envelope) {
        if let Some(p) = self.take_pending(&envelope) {
            p.timer.abort();
            self.count_request(&p.metric_type, "replied");
            self.metrics
                .backend_round_trip
                .observe(&[("type", p.metric_type.as_str())], p.sent_at.elapsed());
            tracing::debug!(msg_type = %p.msg_type, status = envelope.status_code, "reply correlated");
            (p.on_reply)(Ok(envelope));
            return;
        }

        let delivered = self.subscriptions.publish(&envelope);
        let channel = envelope.msg_type.as_str();
        if delivered == 0 {
            // Any peer reaching the receiver picks `type`, so it is not a label here.
            tracing::trace!(channel, "notification without subscribers dropped");
            self.metrics
                .notifications
                .inc(&[("channel", UNSUBSCRIBED_CHANNEL), ("outcome", "dropped")]);
        } else {
            self.metrics
                .notifications
                .add(&[("channel", channel), ("outcome", "delivered")], delivered as u64);
        }
    }

    fn take_pending(&self, envelope: &Envelope) -> Option<PendingRequest> {
        let mut by_type = vec![Correlation::Type(envelope.msg_type.clone())];
        if let Some(request_type) = envelope.request_type() {
            by_type.push(Correlation::Type(request_type.to_string()));
        }

        match &envelope.in_reply_to {
            // A named request is the only one this reply may complete.
            Some(id) => self
                .pending
                .remove(&Correlation::Id(id.clone()))
                .or_else(|| {
                    by_type
                        .iter()
                        .find_map(|k| self.pending.remove_if(k, |_, p| p.id == *id))
                })
                .map(|(_, p)| p),
            None => by_type
                .iter()
                .find_map(|k| self.pending.remove(k).map(|(_, p)| p)),
        }
    }

    fn fail_all_pending(&self) -> usize {
        let keys: Vec<Correlation> = self.pending.iter().map(|e| e.key().clone()).collect();
        let mut failed = 0;
        for key in keys {
            if let Some((_, p)) = self.pending.remove(&key) {
                p.timer.abort();
                self.count_request(&p.metric_type, "closed");
                (p.on_reply)(Err(TideError::ConnectionClosed));
                failed += 1;
            }
        }
        failed
    }

    /// Called by the link task when the stream breaks.
    fn link_dropped(&self, reason: &str) {
        self.closed.store(true, Ordering::SeqCst);
        let failed = self.fail_all_pending();
        tracing::warn!(reason, failed, "backend link dropped");
    }

    /// Release the link and the receiver; fail whatever is still pending.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        if let Ok(mut tasks) = self.tasks.lock() {
            for t in tasks.drain(..) {
                t.abort();
            }
        }
        if let Ok(mut receiver) = self.receiver.lock() {
            receiver.take();
        }
        let failed = self.fail_all_pending();
        tracing::info!(failed, "backend connection closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn reply_to(&self) -> &str {
        &self.reply_to
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn subscriptions(&self) -> &Arc<SubscriptionTable> {
        &self.subscriptions
    }

    pub fn metrics(&self) -> &Arc<GatewayMetrics> {
        &self.metrics
    }

    fn count_request(&self, msg_type: &str, outcome: &str) {
        self.metrics
            .backend_requests
            .inc(&[("type", msg_type), ("outcome", outcome)]);
    }
}

impl Drop for BackendConnection {
    fn drop(&mut self) {
        if let Ok(mut tasks) = self.tasks.lock() {
            for t in tasks.drain(..) {
                t.abort();
            }
        }
    }
}

/// Owns the outbound stream. The backend never writes on it, so a read
/// returning 0 means the peer hung up.
async fn link_task(
    stream: TcpStream,
    mut outbound: mpsc::Receiver<Vec<u8>>,
    conn: Weak<BackendConnection>,
) {
    let (mut rd, mut wr) = stream.into_split();
    let mut scratch = [0u8; 512];

    let reason = loop {
        tokio::select! {
            frame = outbound.recv() => match frame {
                Some(bytes) => {
                    if let Err(e) = wr.write_all(&bytes).await {
                        break format!("write failed: {e}");
                    }
                }
                None => return,
            },
            read = rd.read(&mut scratch) => match read {
                Ok(0) => break "backend closed the link".to_string(),
                Ok(_) => {}
                Err(e) => break format!("read failed: {e}"),
            },
        }
    };

    if let Some(conn) = conn.upgrade() {
        conn.link_dropped(&reason);
    }
}

async fn dispatch_loop(mut events: mpsc::Receiver<Event>, conn: Weak<BackendConnection>) {
    while let Some(event) = events.recv().await {
        let Some(conn) = conn.upgrade() else { break };
        conn.handle_event(event);
    }
}
