//! Socket frame codec.
//!
//! - inbound text frames: `{"event": name, "data": any, "responseEvent"?: name}`
//! - outbound text frames: `{"event": name, "data": any}`

use serde::Deserialize;
use serde_json::{json, Value};

use tidegate_core::error::{Result, TideError};

use crate::command::Emit;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientFrame {
    pub event: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub response_event: Option<String>,
}

pub fn decode_frame(text: &str) -> Result<ClientFrame> {
    let frame: ClientFrame = serde_json::from_str(text)
        .map_err(|e| TideError::BadRequest(format!("invalid frame json: {e}")))?;
    if frame.event.is_empty() {
        return Err(TideError::BadRequest("frame event must not be empty".into()));
    }
    Ok(frame)
}

pub fn encode_emit(emit: &Emit) -> String {
    json!({ "event": emit.event, "data": emit.body }).to_string()
}

/// Body of the `error` event.
pub fn error_body(event: &str, err: &TideError) -> Value {
    json!({
        "code": err.client_code().as_str(),
        "msg": err.to_string(),
        "event": event,
    })
}
