//! `GET /tables/:tableName` -> `search` envelope.

use serde_json::{json, Map, Value};

use tidegate_core::error::{Result, TideError};

use crate::api::params::{parse_integer, split_list};
use crate::command::{HttpRequest, OutboundRequest};

pub const SEARCH_PATH: &str = "/tables/:tableName";

const OUTPUT_ELEMENTS: [&str; 5] = ["startTime", "elapsedTime", "count", "attributes", "records"];

/// Build the `search` body from path + query.
///
/// `timeout` goes both into the body and onto the pending request.
pub fn build_search(req: &HttpRequest) -> Result<OutboundRequest> {
    let source = req
        .param("tableName")
        .filter(|s| !s.is_empty())
        .ok_or_else(|| TideError::BadRequest("no source is specified".into()))?;

    let mut output = Map::new();
    output.insert("elements".into(), json!(OUTPUT_ELEMENTS));
    output.insert(
        "attributes".into(),
        json!(req.query("attributes").map(split_list).unwrap_or_default()),
    );
    if let Some(raw) = req.query("limit") {
        output.insert("limit".into(), json!(parse_integer("limit", raw)?));
    }

    let mut condition = Map::new();
    if let Some(raw) = req.query("match_escalation_threshold") {
        condition.insert(
            "matchEscalationThreshold".into(),
            json!(parse_integer("match_escalation_threshold", raw)?),
        );
    }
    if let Some(raw) = req.query("match_to") {
        condition.insert("matchTo".into(), json!(split_list(raw)));
    }
    if let Some(query) = req.query("query") {
        condition.insert("query".into(), json!(query));
    }

    let mut result = Map::new();
    result.insert("source".into(), json!(source));
    result.insert("output".into(), Value::Object(output));
    if !condition.is_empty() {
        result.insert("condition".into(), Value::Object(condition));
    }
    if let Some(raw) = req.query("offset") {
        result.insert("offset".into(), json!(parse_integer("offset", raw)?));
    }
    if let Some(raw) = req.query("sort_by") {
        result.insert("sortBy".into(), json!(split_list(raw)));
    }

    let mut body = Map::new();
    body.insert("queries".into(), json!({ "result": result }));

    let mut timeout_ms = None;
    if let Some(raw) = req.query("timeout") {
        let timeout = parse_integer("timeout", raw)?;
        body.insert("timeout".into(), json!(timeout));
        timeout_ms = u64::try_from(timeout).ok().filter(|t| *t > 0);
    }

    Ok(OutboundRequest::new("search", Value::Object(body)).with_timeout(timeout_ms))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn request(table: Option<&str>, query: &[(&str, &str)]) -> HttpRequest {
        HttpRequest {
            path_params: table
                .map(|t| HashMap::from([("tableName".to_string(), t.to_string())]))
                .unwrap_or_default(),
            query: query.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            body: None,
        }
    }

    #[test]
    fn bare_table_gets_default_output() {
        let out = build_search(&request(Some("foo"), &[])).unwrap();
        assert_eq!(out.msg_type, "search");
        assert_eq!(out.timeout_ms, None);
        assert_eq!(
            out.body,
            json!({
                "queries": { "result": {
                    "source": "foo",
                    "output": {
                        "elements": ["startTime", "elapsedTime", "count", "attributes", "records"],
                        "attributes": []
                    }
                }}
            })
        );
    }

    #[test]
    fn every_parameter_lands_in_place() {
        let out = build_search(&request(
            Some("Store"),
            &[
                ("query", "bar"),
                ("match_to", "name,tag"),
                ("match_escalation_threshold", "-1"),
                ("attributes", "_key,name"),
                ("limit", "10"),
                ("offset", "20"),
                ("sort_by", "-_score,name"),
                ("timeout", "1500"),
            ],
        ))
        .unwrap();
        assert_eq!(out.timeout_ms, Some(1500));
        assert_eq!(out.body["timeout"], 1500);
        let result = &out.body["queries"]["result"];
        assert_eq!(result["source"], "Store");
        assert_eq!(
            result["condition"],
            json!({ "query": "bar", "matchTo": ["name", "tag"], "matchEscalationThreshold": -1 })
        );
        assert_eq!(result["output"]["attributes"], json!(["_key", "name"]));
        assert_eq!(result["output"]["limit"], 10);
        assert_eq!(result["offset"], 20);
        assert_eq!(result["sortBy"], json!(["-_score", "name"]));
    }

    #[test]
    fn malformed_integer_is_rejected() {
        for key in ["limit", "offset", "timeout", "match_escalation_threshold"] {
            let err = build_search(&request(Some("foo"), &[(key, "1.5")])).unwrap_err();
            assert_eq!(err.client_code().as_str(), "BAD_REQUEST", "{key}");
            assert!(err.to_string().contains(key));
        }
    }

    #[test]
    fn missing_table_is_rejected() {
        assert!(build_search(&request(None, &[])).is_err());
        assert!(build_search(&request(Some(""), &[])).is_err());
    }
}
