//! HTTP adapter: one axum route per registered HTTP command.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{
        rejection::{BytesRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{MethodFilter, MethodRouter},
    Json, Router,
};
use serde_json::{json, Value};

use tidegate_core::error::{ClientCode, Result, TideError};

use crate::app_state::AppState;
use crate::command::{HttpCommand, HttpReply, HttpRequest, Registry};

pub fn status_for(code: ClientCode) -> StatusCode {
    match code {
        ClientCode::BadRequest | ClientCode::UnsupportedVersion => StatusCode::BAD_REQUEST,
        ClientCode::NotFound => StatusCode::NOT_FOUND,
        ClientCode::Conflict => StatusCode::CONFLICT,
        ClientCode::Timeout => StatusCode::GATEWAY_TIMEOUT,
        ClientCode::BackendUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        ClientCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub fn error_response(err: &TideError) -> Response {
    let code = err.client_code();
    let body = json!({ "error": { "code": code.as_str(), "msg": err.to_string() } });
    (status_for(code), Json(body)).into_response()
}

fn reply_response(reply: HttpReply) -> Response {
    // Backend status codes outside the HTTP range surface as a bad gateway.
    let status = StatusCode::from_u16(reply.status).unwrap_or(StatusCode::BAD_GATEWAY);
    (status, Json(reply.body)).into_response()
}

fn parse_body(bytes: &Bytes) -> Result<Option<Value>> {
    if bytes.is_empty() {
        return Ok(None);
    }
    serde_json::from_slice(bytes)
        .map(Some)
        .map_err(|e| TideError::BadRequest(format!("invalid json body: {e}")))
}

fn is_dynamic(segment: &str) -> bool {
    segment.starts_with(':') || segment.starts_with('*')
}

/// Reject a path the axum router would refuse to register.
fn check_path(path: &str) -> Result<()> {
    if !path.starts_with('/') {
        return Err(TideError::BadRequest(format!("route {path:?} must start with '/'")));
    }
    let segments: Vec<&str> = path.split('/').skip(1).collect();
    for (i, segment) in segments.iter().enumerate() {
        if is_dynamic(segment) && segment.len() == 1 {
            return Err(TideError::BadRequest(format!("route {path:?} has an unnamed parameter")));
        }
        if segment.starts_with('*') && i + 1 != segments.len() {
            return Err(TideError::BadRequest(format!(
                "route {path:?} has a wildcard before its last segment"
            )));
        }
    }
    Ok(())
}

/// Two distinct paths that put differently named parameters at the same
/// position after a shared prefix cannot live in one router.
fn paths_conflict(a: &str, b: &str) -> bool {
    for (x, y) in a.split('/').zip(b.split('/')) {
        if x == y {
            continue;
        }
        return is_dynamic(x) && is_dynamic(y);
    }
    false
}

/// Routes for every HTTP command, prefixed with `http_prefix`.
///
/// Commands sharing a path share one `MethodRouter`. A second command on the
/// same method and path is skipped. A path that collides with `reserved` or
/// with another command's path is a `BadRequest`.
pub fn command_routes(
    registry: &Registry,
    http_prefix: &str,
    reserved: &[&str],
) -> Result<Router<AppState>> {
    let mut by_path: Vec<(String, MethodRouter<AppState>)> = Vec::new();
    let mut seen: HashSet<(String, String)> = HashSet::new();

    for (name, cmd) in registry.http.iter() {
        let path = format!("{http_prefix}{}", cmd.path);
        check_path(&path)?;
        if reserved.contains(&path.as_str()) {
            return Err(TideError::BadRequest(format!(
                "command {name}: route {path} is already served by the gateway"
            )));
        }
        if let Some((taken, _)) = by_path
            .iter()
            .find(|(p, _)| *p != path && paths_conflict(p, &path))
        {
            return Err(TideError::BadRequest(format!(
                "command {name}: route {path} conflicts with {taken}"
            )));
        }
        let Ok(filter) = MethodFilter::try_from(cmd.method.clone()) else {
            tracing::warn!(command = name, method = %cmd.method, "unsupported method, command not routed");
            continue;
        };
        if !seen.insert((cmd.method.to_string(), path.clone())) {
            tracing::warn!(command = name, method = %cmd.method, %path, "route already taken, command not routed");
            continue;
        }

        let handler = command_handler(name.to_string(), Arc::new(cmd.clone()));
        match by_path.iter_mut().find(|(p, _)| *p == path) {
            Some((_, router)) => {
                let merged = std::mem::replace(router, MethodRouter::new()).on(filter, handler);
                *router = merged;
            }
            None => by_path.push((path.clone(), axum::routing::on(filter, handler))),
        }
        tracing::debug!(command = name, method = %cmd.method, %path, "http command routed");
    }

    Ok(by_path
        .into_iter()
        .fold(Router::new(), |router, (path, methods)| router.route(&path, methods)))
}

type Params = Option<Path<HashMap<String, String>>>;
type QueryParams = std::result::Result<Query<HashMap<String, String>>, QueryRejection>;
type RawBody = std::result::Result<Bytes, BytesRejection>;

fn command_handler(
    name: String,
    cmd: Arc<HttpCommand>,
) -> impl Fn(State<AppState>, Params, QueryParams, RawBody) -> futures_util::future::BoxFuture<'static, Response>
       + Clone
       + Send
       + Sync
       + 'static {
    move |State(app): State<AppState>, params: Params, query: QueryParams, body: RawBody| {
        let name = name.clone();
        let cmd = Arc::clone(&cmd);
        Box::pin(async move {
            let outcome = async {
                let Query(query) = query.map_err(|r| TideError::BadRequest(r.body_text()))?;
                let body = body.map_err(|r| TideError::BadRequest(r.body_text()))?;
                let request = HttpRequest {
                    path_params: params.map(|Path(p)| p).unwrap_or_default(),
                    query,
                    body: parse_body(&body)?,
                };
                cmd.invoke(&app.backend(), &request).await
            }
            .await;

            let response = match outcome {
                Ok(reply) => reply_response(reply),
                Err(e) => {
                    tracing::debug!(command = %name, error = %e, "http command failed");
                    error_response(&e)
                }
            };
            let status = response.status();
            app.metrics().http_requests.inc(&[
                ("method", cmd.method.as_str()),
                ("command", name.as_str()),
                ("status", status.as_str()),
            ]);
            response
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_codes_map_to_http_statuses() {
        let cases = [
            (TideError::BadRequest("x".into()), 400),
            (TideError::NotFound("x".into()), 404),
            (TideError::Conflict("x".into()), 409),
            (TideError::Timeout { msg_type: "x".into(), timeout_ms: 1 }, 504),
            (TideError::ConnectionClosed, 503),
            (TideError::BackendUnavailable("x".into()), 503),
            (TideError::Internal("x".into()), 500),
        ];
        for (err, status) in cases {
            assert_eq!(error_response(&err).status().as_u16(), status, "{err}");
        }
    }

    #[test]
    fn route_shapes() {
        assert!(check_path("/tables/:tableName").is_ok());
        assert!(check_path("/files/*rest").is_ok());
        for bad in ["", "tables", "/tables/:", "/a/*rest/b"] {
            assert!(check_path(bad).is_err(), "{bad:?}");
        }

        assert!(paths_conflict("/tables/:tableName", "/tables/:messageType"));
        assert!(paths_conflict("/a/:x/b", "/a/*rest"));
        assert!(!paths_conflict("/tables/:tableName", "/tables/:tableName/rows"));
        assert!(!paths_conflict("/tables/:tableName", "/backend/:messageType"));
        assert!(!paths_conflict("/tables/:tableName", "/tables/all"));
    }

    #[test]
    fn odd_backend_status_is_bad_gateway() {
        let resp = reply_response(HttpReply { status: 42, body: Value::Null });
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
        let resp = reply_response(HttpReply { status: 404, body: Value::Null });
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
