//! Backend envelope.
//!
//! The envelope is the only message unit the backend understands. Requests
//! are built by the gateway; replies and notifications are built by the
//! backend and decoded from msgpack maps with camelCase keys.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, TideError};

/// Status code of a successful round trip.
pub const STATUS_OK: u16 = 200;

/// Suffix a backend may append to the request `type` on its reply.
pub const RESPONSE_SUFFIX: &str = ".response";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Correlation token, unique per outbound request.
    #[serde(default)]
    pub id: String,
    /// Creation timestamp (RFC 3339). Informational only.
    #[serde(default)]
    pub date: String,
    /// `host:port/tag` the backend must deliver replies to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    /// On replies: the `id` of the request being answered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_reply_to: Option<String>,
    #[serde(default = "default_status_code")]
    pub status_code: u16,
    /// Logical command or channel (field name is `type` on the wire).
    #[serde(rename = "type")]
    pub msg_type: String,
    /// Opaque payload, shape defined by `type`.
    #[serde(default)]
    pub body: Value,
    /// Milliseconds the sender waits for a reply.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

fn default_status_code() -> u16 {
    STATUS_OK
}

impl Envelope {
    pub fn is_success(&self) -> bool {
        self.status_code == STATUS_OK
    }

    /// Build a reply to this envelope, the way a backend answers a request.
    pub fn reply(&self, msg_type: impl Into<String>, status_code: u16, body: Value) -> Envelope {
        Envelope {
            id: format!("{}:reply", self.id),
            date: self.date.clone(),
            reply_to: None,
            in_reply_to: Some(self.id.clone()),
            status_code,
            msg_type: msg_type.into(),
            body,
            timeout: None,
        }
    }

    /// Build an unsolicited notification on `channel`.
    pub fn notification(channel: impl Into<String>, body: Value) -> Envelope {
        Envelope {
            id: String::new(),
            date: String::new(),
            reply_to: None,
            in_reply_to: None,
            status_code: STATUS_OK,
            msg_type: channel.into(),
            body,
            timeout: None,
        }
    }

    /// Decode an envelope from a msgpack value received on the wire.
    pub fn from_msgpack(value: rmpv::Value) -> Result<Envelope> {
        rmpv::ext::from_value(value)
            .map_err(|e| TideError::Decode(format!("invalid envelope: {e}")))
    }

    /// `type` with a trailing reply suffix removed, if it had one.
    pub fn request_type(&self) -> Option<&str> {
        self.msg_type.strip_suffix(RESPONSE_SUFFIX)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn serializes_wire_field_names() {
        let env = Envelope {
            id: "1".into(),
            date: "2024-01-01T00:00:00Z".into(),
            reply_to: Some("127.0.0.1:24225/backend".into()),
            in_reply_to: None,
            status_code: STATUS_OK,
            msg_type: "search".into(),
            body: json!({ "q": 1 }),
            timeout: Some(500),
        };
        let v = serde_json::to_value(&env).unwrap();
        assert_eq!(v["type"], "search");
        assert_eq!(v["replyTo"], "127.0.0.1:24225/backend");
        assert_eq!(v["statusCode"], 200);
        assert_eq!(v["timeout"], 500);
        assert!(v.get("inReplyTo").is_none());
    }

    #[test]
    fn missing_status_code_means_success() {
        let env: Envelope = serde_json::from_value(json!({ "type": "watch.notification" })).unwrap();
        assert!(env.is_success());
        assert_eq!(env.body, Value::Null);
    }

    #[test]
    fn decodes_from_msgpack_map() {
        let value = rmpv::Value::Map(vec![
            (rmpv::Value::from("type"), rmpv::Value::from("search.response")),
            (rmpv::Value::from("inReplyTo"), rmpv::Value::from("abc")),
            (rmpv::Value::from("statusCode"), rmpv::Value::from(404)),
            (
                rmpv::Value::from("body"),
                rmpv::Value::Map(vec![(rmpv::Value::from("hits"), rmpv::Value::from(3))]),
            ),
        ]);
        let env = Envelope::from_msgpack(value).unwrap();
        assert_eq!(env.in_reply_to.as_deref(), Some("abc"));
        assert_eq!(env.request_type(), Some("search"));
        assert!(!env.is_success());
        assert_eq!(env.body, json!({ "hits": 3 }));
    }

    #[test]
    fn rejects_envelope_without_type() {
        let err = Envelope::from_msgpack(rmpv::Value::from("nope")).unwrap_err();
        assert_eq!(err.client_code().as_str(), "BAD_REQUEST");
    }
}
