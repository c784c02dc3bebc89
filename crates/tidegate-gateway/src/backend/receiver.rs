//! Inbound side of the backend link.
//!
//! The backend opens TCP connections to the address advertised in `replyTo`
//! and writes fluent packets. Each connection gets its own decoder; every
//! decoded packet is flattened into `Event`s and handed to the dispatcher.
//!
//! Failure scoping:
//! - an unrecognized packet shape drops that packet only
//! - undecodable bytes close that connection only

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BytesMut;
use futures_util::StreamExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::codec::{Decoder, FramedRead};

use tidegate_core::error::{Result, TideError};
use tidegate_core::protocol::fluent::{self, Event, Packet};

use crate::obs::GatewayMetrics;

/// Largest incomplete value buffered for one connection.
pub const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Streaming msgpack value decoder.
#[derive(Debug, Clone, Copy)]
pub struct MsgPackCodec {
    max_frame_bytes: usize,
}

impl MsgPackCodec {
    pub fn with_max_frame_bytes(max_frame_bytes: usize) -> Self {
        Self { max_frame_bytes }
    }
}

impl Default for MsgPackCodec {
    fn default() -> Self {
        Self::with_max_frame_bytes(MAX_FRAME_BYTES)
    }
}

impl Decoder for MsgPackCodec {
    type Item = rmpv::Value;
    type Error = TideError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<rmpv::Value>> {
        let value = fluent::decode_value(src)?;
        if value.is_none() && src.len() > self.max_frame_bytes {
            return Err(TideError::Decode(format!(
                "frame exceeds {} buffered bytes",
                self.max_frame_bytes
            )));
        }
        Ok(value)
    }
}

/// Listening endpoint for backend replies and notifications.
///
/// Dropping (or `close`) tears down the listener and every open connection.
pub struct MsgPackReceiver {
    local_addr: SocketAddr,
    accept_task: JoinHandle<()>,
}

impl MsgPackReceiver {
    /// Bind and start accepting. Port 0 picks an ephemeral port, see `local_addr`.
    pub async fn bind(
        addr: &str,
        events: mpsc::Sender<Event>,
        metrics: Arc<GatewayMetrics>,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| TideError::BackendUnavailable(format!("receiver bind {addr} failed: {e}")))?;
        let local_addr = listener.local_addr()?;
        tracing::info!(%local_addr, "msgpack receiver listening");

        let accept_task = tokio::spawn(accept_loop(listener, events, metrics));
        Ok(Self { local_addr, accept_task })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn close(self) {
        drop(self);
    }
}

impl Drop for MsgPackReceiver {
    fn drop(&mut self) {
        // Aborting drops the listener and the JoinSet, which aborts every stream task.
        self.accept_task.abort();
        tracing::debug!(local_addr = %self.local_addr, "msgpack receiver closed");
    }
}

async fn accept_loop(
    listener: TcpListener,
    events: mpsc::Sender<Event>,
    metrics: Arc<GatewayMetrics>,
) {
    let mut streams = JoinSet::new();
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    tracing::debug!(%peer, "backend connected to receiver");
                    streams.spawn(read_stream(stream, peer, events.clone(), Arc::clone(&metrics)));
                }
                Err(e) => {
                    tracing::warn!(error = %e, "receiver accept failed");
                }
            },
            Some(_) = streams.join_next(), if !streams.is_empty() => {}
        }
    }
}

async fn read_stream(
    stream: TcpStream,
    peer: SocketAddr,
    events: mpsc::Sender<Event>,
    metrics: Arc<GatewayMetrics>,
) {
    let mut frames = FramedRead::new(stream, MsgPackCodec::default());
    while let Some(frame) = frames.next().await {
        let value = match frame {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(%peer, error = %e, "undecodable bytes from backend; closing stream");
                metrics.decode_drops.inc(&[("reason", "stream")]);
                break;
            }
        };

        let packet = match Packet::classify(value) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(%peer, error = %e, "dropping unrecognized packet");
                metrics.decode_drops.inc(&[("reason", "shape")]);
                continue;
            }
        };

        tracing::trace!(%peer, tag = %packet.tag(), "packet received");
        for event in packet.into_events() {
            if events.send(event).await.is_err() {
                return;
            }
        }
    }
    tracing::debug!(%peer, "backend stream ended");
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;
    use tokio::time::{timeout, Duration};

    async fn recv(rx: &mut mpsc::Receiver<Event>) -> Event {
        timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap()
    }

    async fn bind(tx: mpsc::Sender<Event>) -> (MsgPackReceiver, Arc<GatewayMetrics>) {
        let metrics = Arc::new(GatewayMetrics::default());
        let receiver = MsgPackReceiver::bind("127.0.0.1:0", tx, Arc::clone(&metrics))
            .await
            .unwrap();
        (receiver, metrics)
    }

    #[tokio::test]
    async fn emits_message_and_forward_events_in_order() {
        let (tx, mut rx) = mpsc::channel(16);
        let (receiver, metrics) = bind(tx).await;

        let mut conn = TcpStream::connect(receiver.local_addr()).await.unwrap();
        conn.write_all(&fluent::encode_message("a", 1, &"one").unwrap()).await.unwrap();
        // unknown shape in between must not stop the stream
        conn.write_all(&[0x94, 0x01, 0x02, 0x03, 0x04]).await.unwrap();
        conn.write_all(&fluent::encode_forward("b", &[(2, "two"), (3, "three")]).unwrap())
            .await
            .unwrap();

        let got: Vec<(String, String)> = {
            let mut v = Vec::new();
            for _ in 0..3 {
                let ev = recv(&mut rx).await;
                v.push((ev.tag, ev.data.as_str().unwrap().to_string()));
            }
            v
        };
        assert_eq!(
            got,
            vec![
                ("a".to_string(), "one".to_string()),
                ("b".to_string(), "two".to_string()),
                ("b".to_string(), "three".to_string()),
            ]
        );
        assert_eq!(metrics.decode_drops.get(&[("reason", "shape")]), 1);
    }

    #[tokio::test]
    async fn sequential_connections_each_get_fresh_state() {
        let (tx, mut rx) = mpsc::channel(16);
        let (receiver, _metrics) = bind(tx).await;

        let frame = fluent::encode_message("t", 1, &"x").unwrap();
        {
            // half a frame, then hang up
            let mut first = TcpStream::connect(receiver.local_addr()).await.unwrap();
            first.write_all(&frame[..frame.len() / 2]).await.unwrap();
        }
        let mut second = TcpStream::connect(receiver.local_addr()).await.unwrap();
        second.write_all(&frame).await.unwrap();

        let ev = recv(&mut rx).await;
        assert_eq!(ev.tag, "t");
        assert_eq!(ev.data.as_str(), Some("x"));
    }

    #[test]
    fn oversized_partial_frame_is_an_error() {
        let mut codec = MsgPackCodec::with_max_frame_bytes(16);
        // str32 announcing 1 MiB, followed by a trickle of payload
        let mut buf = BytesMut::from(&[0xdb, 0x00, 0x10, 0x00, 0x00][..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(&[b'x'; 32]);
        let err = codec.decode(&mut buf).unwrap_err();
        assert!(matches!(err, TideError::Decode(_)));

        let mut small = BytesMut::from(&fluent::encode_message("t", 1, &"x").unwrap()[..]);
        assert!(codec.decode(&mut small).unwrap().is_some());
    }

    #[tokio::test]
    async fn bad_bytes_close_only_their_connection() {
        let (tx, mut rx) = mpsc::channel(16);
        let (receiver, metrics) = bind(tx).await;

        // 0xc1 is never a valid marker
        let mut broken = TcpStream::connect(receiver.local_addr()).await.unwrap();
        broken.write_all(&[0xc1, 0x00]).await.unwrap();

        let mut other = TcpStream::connect(receiver.local_addr()).await.unwrap();
        other.write_all(&fluent::encode_message("t", 1, &"ok").unwrap()).await.unwrap();
        assert_eq!(recv(&mut rx).await.data.as_str(), Some("ok"));

        timeout(Duration::from_secs(2), async {
            while metrics.decode_drops.get(&[("reason", "stream")]) == 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn close_stops_accepting() {
        let (tx, _rx) = mpsc::channel(16);
        let (receiver, _metrics) = bind(tx).await;
        let addr = receiver.local_addr();
        receiver.close();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(TcpStream::connect(addr).await.is_err());
    }
}
