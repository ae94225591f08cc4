//! Health check handlers.
//!
//! # Endpoints
//!
//! - `GET /livez` - Returns 200/OK if the bridge is alive
//! - `GET /readyz` - Returns 200/OK if the bridge is ready to serve requests
//!
//! Both endpoints negotiate the body format on the `Accept` header:
//! `application/json` yields `{"status": "..."}`, anything else plain text.

use std::sync::Arc;

use axum::http::{HeaderMap, StatusCode};
use axum::{extract::State, response::Response};
use serde_json::json;

use crate::state::BridgeState;

fn negotiated_response(headers: &HeaderMap, status: StatusCode, text: &str) -> Response {
    let accept = headers
        .get("accept")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let wants_json = accept.contains("application/json");
    let body = if wants_json {
        json!({ "status": text }).to_string()
    } else {
        text.to_string()
    };

    Response::builder()
        .status(status)
        .header(
            "Content-Type",
            if wants_json {
                "application/json"
            } else {
                "text/plain"
            },
        )
        .body(body.into())
        .unwrap()
}

/// Liveness check handler.
///
/// Indicates whether the process is running and has not begun termination.
pub async fn livez(State(state): State<Arc<BridgeState>>, headers: HeaderMap) -> Response {
    tracing::debug!("livez_handler invoked");

    let (status, text) = if state.is_alive() {
        (StatusCode::OK, "live")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not live")
    };
    negotiated_response(&headers, status, text)
}

/// Readiness check handler.
///
/// Indicates whether the bridge has completed startup and is serving
/// traffic. Plugin availability is intentionally not part of readiness:
/// the router retries while plugins reconnect.
pub async fn readyz(State(state): State<Arc<BridgeState>>, headers: HeaderMap) -> Response {
    tracing::debug!("readyz_handler invoked");

    let (status, text) = if state.is_ready() {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready")
    };
    negotiated_response(&headers, status, text)
}
