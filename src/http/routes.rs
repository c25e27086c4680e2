//! Request handlers.
//!
//! Only request-shape problems use HTTP status codes. Upstream failures ride
//! inside the view result's `errors` with a 200.

use super::server::AppState;
use crate::types::Error;
use crate::views::run_view;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Map, Value};

/// `{error}` body with a status.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self {
            status: err.to_http_status(),
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({"error": self.message}))).into_response()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunRequest {
    pub name: String,
    pub params: Map<String, Value>,
    pub refresh: bool,
}

/// Parse a `/run` body. An empty body counts as `{}`.
pub fn parse_run_request(body: &[u8]) -> Result<RunRequest, ApiError> {
    let req: Value = if body.iter().all(u8::is_ascii_whitespace) {
        Value::Object(Map::new())
    } else {
        serde_json::from_slice(body)
            .map_err(|e| ApiError::bad_request(format!("Invalid JSON body: {}", e)))?
    };
    let Value::Object(req) = req else {
        return Err(ApiError::bad_request("Invalid JSON body: expected an object"));
    };

    let name = req
        .get("name")
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or_default()
        .to_string();
    if name.is_empty() {
        return Err(ApiError::bad_request("Missing 'name'"));
    }

    let params = match req.get("params") {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(p)) => p.clone(),
        Some(_) => return Err(ApiError::bad_request("'params' must be an object")),
    };

    Ok(RunRequest {
        name,
        params,
        refresh: req.get("refresh").is_some_and(truthy),
    })
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

pub async fn health() -> Json<Value> {
    Json(json!({"ok": true}))
}

pub async fn health_summary(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let monitor = state
        .monitor
        .as_ref()
        .ok_or_else(|| ApiError::not_found("Health monitor not configured"))?;
    let summary = monitor.get_health_summary().await;
    Ok(Json(serde_json::to_value(summary).map_err(Error::from)?))
}

pub async fn list_views(State(state): State<AppState>) -> Json<Value> {
    let names = state.views.names();
    Json(json!({"count": names.len(), "views": names}))
}

pub async fn describe_view(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let name = name.trim();
    state
        .views
        .get(name)
        .map(|spec| Json(spec.descriptor()))
        .ok_or_else(|| ApiError::not_found(format!("Unknown view: {}", name)))
}

pub async fn run(State(state): State<AppState>, body: Bytes) -> Result<Json<Value>, ApiError> {
    let req = parse_run_request(&body)?;
    let spec = state
        .views
        .get(&req.name)
        .ok_or_else(|| ApiError::not_found(format!("Unknown view: {}", req.name)))?;

    let _permit = state
        .run_slots
        .acquire()
        .await
        .map_err(|_| ApiError::from(Error::internal("server is shutting down")))?;

    tracing::debug!(view = %req.name, refresh = req.refresh, "view_run_started");
    let result = run_view(
        spec,
        &req.params,
        state.provider.as_ref(),
        req.refresh,
        state.view_parallelism,
    )
    .await;
    if !result.is_ok() {
        tracing::info!(view = %req.name, errors = result.errors.len(), "view_run_partial");
    }
    Ok(Json(result.to_value()))
}

pub async fn not_found() -> ApiError {
    ApiError::not_found("Not found")
}
