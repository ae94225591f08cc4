//! HTTP service implementation - starts the MCP endpoints, the plugin
//! channel endpoint, and the auxiliary health/metrics routes.
//!
//! Both client transports keep the HTTP listener up: plugins always
//! connect over `/hub/mcp-server`, whether the MCP side runs over
//! streamable-HTTP or over the process's standard streams.

use anyhow::Context;
use axum::{
    Router,
    body::Body,
    http::Request,
    middleware::{self, Next},
    routing::get,
};
use rmcp::service::serve_server;
use rmcp::transport::stdio;
use rmcp::transport::streamable_http_server::StreamableHttpServerConfig;
use rmcp::transport::streamable_http_server::session::local::LocalSessionManager;
use rmcp::transport::streamable_http_server::tower::StreamableHttpService;
use std::{net::SocketAddr, sync::Arc};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::ClientTransport;
use crate::config::defaults::MCP_ENDPOINT_PATH;
use crate::hub;
use crate::server::auth::{self, AuthSettings};
use crate::server::handlers::health::{livez, readyz};
use crate::server::mcp::McpBridgeHandler;
use crate::session::spawn_session_watchdog;
use crate::state::{ApplicationState, BridgeState};

/// Handler for the Prometheus metrics endpoint.
#[cfg(feature = "prometheus")]
pub async fn metrics_handler() -> axum::response::Response {
    axum::response::Response::builder()
        .status(200)
        .header("content-type", "text/plain; version=0.0.4")
        .body(axum::body::Body::from(crate::metrics::render()))
        .unwrap()
}

/// Creates the router for the MCP session endpoints.
///
/// The streamable-HTTP service is mounted at both `/` and `/mcp`, sharing
/// one session manager so a session opened on either path is the same
/// session. Each accepted stream gets its own handler instance from the
/// factory.
fn create_mcp_router(state: Arc<BridgeState>) -> Router {
    tracing::debug!("Creating MCP router");
    let app_state = state.clone();
    let handler_factory = move || -> Result<McpBridgeHandler, std::io::Error> {
        Ok(McpBridgeHandler::new(app_state.clone()))
    };
    let session_mgr = Arc::new(LocalSessionManager::default());

    let root_svc = StreamableHttpService::new(
        handler_factory.clone(),
        session_mgr.clone(),
        StreamableHttpServerConfig::default(),
    );
    let mcp_svc = StreamableHttpService::new(
        handler_factory,
        session_mgr,
        StreamableHttpServerConfig::default(),
    );

    let mut router = Router::new()
        .route_service("/", root_svc)
        .nest_service(MCP_ENDPOINT_PATH, mcp_svc);

    // Bearer auth on the MCP endpoints whenever the scheme is active.
    let settings = Arc::new(AuthSettings {
        token: state.config.token.clone(),
        mode: state.config.mode,
    });
    if settings.token.is_some() || state.config.mode == crate::config::DeploymentMode::Remote {
        router = router.layer(middleware::from_fn(move |req: Request<Body>, next: Next| {
            let settings = settings.clone();
            async move { auth::check_auth(req, next, settings).await }
        }));
    }
    router
}

/// Creates the router for health check endpoints.
fn create_health_router(state: Arc<BridgeState>) -> Router {
    tracing::debug!("Creating health API router");
    Router::new()
        .route("/livez", get(livez))
        .route("/readyz", get(readyz))
        .with_state(state)
}

/// Assemble the full HTTP application for the configured transport.
fn build_app(state: Arc<BridgeState>, include_mcp: bool) -> Router {
    let mut app = Router::new();
    if include_mcp {
        app = app.merge(create_mcp_router(state.clone()));
    }
    app = app
        .merge(hub::router(state.clone()))
        .merge(create_health_router(state.clone()));

    #[cfg(feature = "prometheus")]
    {
        app = app.route("/metrics", get(metrics_handler));
    }

    app.layer(TraceLayer::new_for_http())
}

/// Main entry point for starting the bridge servers.
///
/// Blocks until shutdown (ctrl-c) or a fatal server error.
pub async fn start(state: Arc<BridgeState>) -> anyhow::Result<()> {
    state.set_state(ApplicationState::StartingNetwork);

    let shutdown = CancellationToken::new();
    spawn_session_watchdog(state.sessions.clone(), shutdown.clone());

    let result = match state.config.client_transport {
        ClientTransport::StreamableHttp => run_http(state.clone(), shutdown.clone()).await,
        ClientTransport::Stdio => run_stdio(state.clone(), shutdown.clone()).await,
    };

    shutdown.cancel();
    state.set_state(ApplicationState::Terminating);
    result
}

/// Serve the streamable-HTTP transport: MCP endpoints, plugin channel,
/// health and metrics on one listener.
async fn run_http(state: Arc<BridgeState>, shutdown: CancellationToken) -> anyhow::Result<()> {
    let app = build_app(state.clone(), true);
    let addr = SocketAddr::from(([0, 0, 0, 0], state.config.port));

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;

    state.set_state(ApplicationState::Ready);
    info!("Starting HTTP server on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("Shutdown signal received"),
                _ = shutdown.cancelled() => {}
            }
        })
        .await
        .context("HTTP server failed")
}

/// Serve one MCP session over stdio while the HTTP listener carries the
/// plugin channel and health endpoints.
async fn run_stdio(state: Arc<BridgeState>, shutdown: CancellationToken) -> anyhow::Result<()> {
    // Plugin channel stays on HTTP even when the client speaks stdio.
    let hub_app = build_app(state.clone(), false);
    let addr = SocketAddr::from(([0, 0, 0, 0], state.config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;

    let hub_shutdown = shutdown.clone();
    let hub_task = tokio::spawn(async move {
        let _ = axum::serve(listener, hub_app)
            .with_graceful_shutdown(async move { hub_shutdown.cancelled().await })
            .await;
    });

    info!("Starting MCP stdio server");
    let service = McpBridgeHandler::new(state.clone());
    let io = stdio();
    let running = serve_server(service, io)
        .await
        .context("stdio server failed to start")?;
    state.set_state(ApplicationState::Ready);

    let ct = running.cancellation_token();
    let waiting_fut = running.waiting();
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down (Ctrl+C)");
            ct.cancel();
        },
        res = waiting_fut => {
            if let Ok(reason) = res {
                info!(?reason, "Stdio server stopped");
            }
        }
    }

    shutdown.cancel();
    let _ = hub_task.await;
    Ok(())
}
