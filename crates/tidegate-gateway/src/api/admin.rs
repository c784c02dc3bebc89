//! Raw envelope passthrough, `POST /<namespace>/:messageType`.
//!
//! The body is forwarded as-is. Do not enable on untrusted networks.

use serde_json::{json, Value};

use tidegate_core::error::{Result, TideError};

use crate::command::{HttpRequest, OutboundRequest};

pub const DEFAULT_TIMEOUT_MS: u64 = 1000;

/// Request metrics label for every passthrough; `messageType` is client input.
pub const METRIC_TYPE: &str = "passthrough";

pub fn admin_path(namespace: &str) -> String {
    format!("/{namespace}/:messageType")
}

/// The envelope `type` is `messageType`; the body gains `timeout` and
/// `type` (`<namespace>-<messageType>`) when they are missing.
///
/// Replies are correlated by type, so only one passthrough per message type
/// is in flight at a time.
pub fn build_passthrough(namespace: &str, req: &HttpRequest) -> Result<OutboundRequest> {
    let message_type = req
        .param("messageType")
        .filter(|s| !s.is_empty())
        .ok_or_else(|| TideError::BadRequest("no message type is specified".into()))?;

    let mut body = match &req.body {
        Some(Value::Object(map)) => map.clone(),
        Some(_) => return Err(TideError::BadRequest("body must be a json object".into())),
        None => return Err(TideError::BadRequest("body is required".into())),
    };

    let timeout = match body.get("timeout") {
        None | Some(Value::Null) => DEFAULT_TIMEOUT_MS,
        Some(v) => match v.as_u64() {
            Some(0) => DEFAULT_TIMEOUT_MS,
            Some(ms) => ms,
            None => return Err(TideError::BadRequest("timeout must be a non-negative integer".into())),
        },
    };
    body.insert("timeout".into(), json!(timeout));

    let has_type = body
        .get("type")
        .and_then(Value::as_str)
        .is_some_and(|t| !t.is_empty());
    if !has_type {
        body.insert("type".into(), json!(format!("{namespace}-{message_type}")));
    }

    let mut out = OutboundRequest::new(message_type, Value::Object(body)).with_timeout(Some(timeout));
    out.correlate_by_type = true;
    out.metric_type = Some(METRIC_TYPE);
    Ok(out)
}
