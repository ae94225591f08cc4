//! Bearer-token authentication for the HTTP endpoints.
//!
//! The bridge uses one shared-secret scheme on both the MCP endpoints and
//! the plugin channel: `Authorization: Bearer <token>`. In local mode a
//! configured token must match exactly; in remote mode every caller must
//! present a non-empty bearer, whose value is the tenant identity used for
//! routing and notification scoping.

use crate::config::DeploymentMode;
use axum::{
    body::Body,
    extract::Request,
    http::{HeaderMap, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::warn;

/// Settings consumed by the auth middleware.
#[derive(Debug, Clone)]
pub struct AuthSettings {
    pub token: Option<String>,
    pub mode: DeploymentMode,
}

/// Extract the bearer token from an `Authorization` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let token = value.strip_prefix("Bearer ").or_else(|| value.strip_prefix("bearer "))?;
    let token = token.trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

/// Decide whether a presented bearer is acceptable.
pub fn is_authorized(settings: &AuthSettings, presented: Option<&str>) -> bool {
    match settings.mode {
        DeploymentMode::Local => match &settings.token {
            Some(required) => presented == Some(required.as_str()),
            None => true,
        },
        DeploymentMode::Remote => presented.is_some_and(|t| !t.is_empty()),
    }
}

/// Middleware guarding the MCP endpoints. Health probes live on routes
/// outside this layer and stay reachable without credentials.
pub async fn check_auth(
    req: Request<Body>,
    next: Next,
    settings: Arc<AuthSettings>,
) -> Response {
    let presented = bearer_token(req.headers());
    if is_authorized(&settings, presented.as_deref()) {
        next.run(req).await
    } else {
        warn!(path = %req.uri().path(), "request rejected: missing or invalid bearer token");
        (StatusCode::UNAUTHORIZED, "unauthorized").into_response()
    }
}
