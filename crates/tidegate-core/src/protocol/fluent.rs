//! Fluent-style msgpack framing on the backend link.
//!
//! The inbound stream is a plain concatenation of msgpack values. Each
//! top-level value is one of two shapes, told apart by length alone:
//! - Message: `[tag, time, data]`
//! - Forward: `[tag, [[time, data], [time, data], ...]]`
//!
//! The length rule is kept exactly as the backend emits it even though a
//! payload-level discriminator would be sturdier.
//!
//! Decoding never panics: incomplete input yields `Ok(None)`, anything that
//! is not one of the two shapes is reported as `TideError::Decode`.

use std::io::{Cursor, ErrorKind};

use bytes::{Buf, BytesMut};
use rmpv::Value;
use serde::Serialize;

use crate::error::{Result, TideError};

/// One logical message re-emitted from a packet.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub tag: String,
    pub data: Value,
}

/// A classified top-level value.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    /// Single event: `[tag, time, data]`.
    Message { tag: String, time: Value, data: Value },
    /// Batch: `[tag, [[time, data], ...]]`.
    Forward { tag: String, entries: Vec<(Value, Value)> },
}

impl Packet {
    /// Classify a decoded top-level value by its length.
    pub fn classify(value: Value) -> Result<Packet> {
        let Value::Array(items) = value else {
            return Err(TideError::Decode("packet is not an array".into()));
        };
        match items.len() {
            3 => {
                let mut it = items.into_iter();
                let (Some(tag), Some(time), Some(data)) = (it.next(), it.next(), it.next()) else {
                    return Err(TideError::Decode("message packet truncated".into()));
                };
                Ok(Packet::Message { tag: tag_string(tag)?, time, data })
            }
            2 => {
                let mut it = items.into_iter();
                let (Some(tag), Some(entries)) = (it.next(), it.next()) else {
                    return Err(TideError::Decode("forward packet truncated".into()));
                };
                let tag = tag_string(tag)?;
                let Value::Array(entries) = entries else {
                    return Err(TideError::Decode("forward entries must be an array".into()));
                };
                let entries = entries
                    .into_iter()
                    .map(forward_entry)
                    .collect::<Result<Vec<_>>>()?;
                Ok(Packet::Forward { tag, entries })
            }
            n => Err(TideError::Decode(format!("unrecognized packet of length {n}"))),
        }
    }

    pub fn tag(&self) -> &str {
        match self {
            Packet::Message { tag, .. } | Packet::Forward { tag, .. } => tag,
        }
    }

    /// Flatten into events, preserving forward entry order.
    pub fn into_events(self) -> Vec<Event> {
        match self {
            Packet::Message { tag, data, .. } => vec![Event { tag, data }],
            Packet::Forward { tag, entries } => entries
                .into_iter()
                .map(|(_, data)| Event { tag: tag.clone(), data })
                .collect(),
        }
    }
}

fn tag_string(tag: Value) -> Result<String> {
    match tag {
        Value::String(s) => s
            .into_str()
            .ok_or_else(|| TideError::Decode("tag is not valid utf-8".into())),
        other => Err(TideError::Decode(format!("tag must be a string, got {other}"))),
    }
}

fn forward_entry(entry: Value) -> Result<(Value, Value)> {
    let Value::Array(pair) = entry else {
        return Err(TideError::Decode("forward entry is not an array".into()));
    };
    let mut it = pair.into_iter();
    match (it.next(), it.next()) {
        (Some(time), Some(data)) => Ok((time, data)),
        _ => Err(TideError::Decode("forward entry needs [time, data]".into())),
    }
}

/// Decode one msgpack value from the front of `buf`.
///
/// Returns `Ok(None)` and leaves `buf` untouched when more bytes are needed.
pub fn decode_value(buf: &mut BytesMut) -> Result<Option<Value>> {
    if buf.is_empty() {
        return Ok(None);
    }
    let mut cursor = Cursor::new(&buf[..]);
    match rmpv::decode::read_value(&mut cursor) {
        Ok(value) => {
            let consumed = cursor.position() as usize;
            buf.advance(consumed);
            Ok(Some(value))
        }
        Err(e) if is_incomplete(&e) => Ok(None),
        Err(e) => Err(TideError::Decode(format!("msgpack: {e}"))),
    }
}

fn is_incomplete(e: &rmpv::decode::Error) -> bool {
    match e {
        rmpv::decode::Error::InvalidMarkerRead(io) | rmpv::decode::Error::InvalidDataRead(io) => {
            io.kind() == ErrorKind::UnexpectedEof
        }
        _ => false,
    }
}

/// Encode a Message-shaped frame. Structs in `data` become msgpack maps.
pub fn encode_message<T: Serialize>(tag: &str, time: i64, data: &T) -> Result<Vec<u8>> {
    rmp_serde::to_vec_named(&(tag, time, data))
        .map_err(|e| TideError::Internal(format!("msgpack encode failed: {e}")))
}

/// Encode a Forward-shaped frame carrying several entries under one tag.
pub fn encode_forward<T: Serialize>(tag: &str, entries: &[(i64, T)]) -> Result<Vec<u8>> {
    rmp_serde::to_vec_named(&(tag, entries))
        .map_err(|e| TideError::Internal(format!("msgpack encode failed: {e}")))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn split_frame_waits_for_more_bytes() {
        let frame = encode_message("backend.message", 1, &"hello").unwrap();
        let (head, tail) = frame.split_at(frame.len() - 2);

        let mut buf = BytesMut::from(head);
        assert!(decode_value(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), head.len());

        buf.extend_from_slice(tail);
        let value = decode_value(&mut buf).unwrap().unwrap();
        assert!(buf.is_empty());

        let events = Packet::classify(value).unwrap().into_events();
        assert_eq!(events, vec![Event { tag: "backend.message".into(), data: Value::from("hello") }]);
    }

    #[test]
    fn back_to_back_frames_decode_in_order() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&encode_message("t", 1, &1u8).unwrap());
        buf.extend_from_slice(&encode_forward("t", &[(2, 2u8), (3, 3u8)]).unwrap());

        let mut data = Vec::new();
        while let Some(value) = decode_value(&mut buf).unwrap() {
            for ev in Packet::classify(value).unwrap().into_events() {
                data.push(ev.data);
            }
        }
        assert_eq!(data, vec![Value::from(1), Value::from(2), Value::from(3)]);
    }

    #[test]
    fn every_truncation_point_is_incomplete() {
        let frame = encode_forward("t", &[(1, "a"), (2, "b")]).unwrap();
        for cut in 1..frame.len() {
            let mut buf = BytesMut::from(&frame[..cut]);
            assert!(decode_value(&mut buf).unwrap().is_none(), "cut={cut}");
        }
    }
}
