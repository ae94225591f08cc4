//! Plugin channel endpoint.
//!
//! Serves `/hub/mcp-server`: each accepted WebSocket is one plugin channel.
//! The socket task enforces the handshake-first rule, asks the strategy to
//! admit the connection (evicting peers in single-tenant mode), keeps the
//! registry in sync with the socket lifetime, and dispatches inbound frames
//! to the pending-call map, the capability bus or the request tracker.

pub mod connection;

use crate::protocol::payload::CallResponse;
use crate::protocol::{ChannelLimits, Frame, HandshakeError, RpcMethod, VersionHandshake};
use crate::registry::{HubKind, PluginConnection};
use crate::server::auth;
use crate::state::BridgeState;
use axum::{
    Router,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
};
use connection::PluginLink;
use futures::{SinkExt, StreamExt, stream::SplitSink};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::bus::CapabilityKind;
use crate::config::{DeploymentMode, defaults::HUB_ENDPOINT_PATH};

/// Router exposing the plugin channel endpoint.
pub fn router(state: Arc<BridgeState>) -> Router {
    Router::new()
        .route(HUB_ENDPOINT_PATH, get(upgrade_handler))
        .with_state(state)
}

/// Admission rule for the hub endpoint.
///
/// Local mode requires exact equality with the configured token when one
/// is set. Remote mode requires a non-empty bearer; its value becomes the
/// tenant identity the registry pairs sessions against.
fn authorize_plugin(
    state: &BridgeState,
    presented: Option<String>,
) -> Result<Option<String>, StatusCode> {
    match state.config.mode {
        DeploymentMode::Local => {
            if let Some(required) = &state.config.token
                && presented.as_deref() != Some(required.as_str())
            {
                return Err(StatusCode::UNAUTHORIZED);
            }
            Ok(presented)
        }
        DeploymentMode::Remote => match presented {
            Some(token) if !token.is_empty() => Ok(Some(token)),
            _ => Err(StatusCode::UNAUTHORIZED),
        },
    }
}

async fn upgrade_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<BridgeState>>,
    headers: HeaderMap,
) -> Response {
    let presented = auth::bearer_token(&headers);
    let token = match authorize_plugin(&state, presented) {
        Ok(token) => token,
        Err(status) => {
            warn!("plugin channel rejected: missing or invalid bearer token");
            return status.into_response();
        }
    };

    let limits = ChannelLimits::default();
    ws.max_message_size(limits.max_frame_bytes)
        .on_upgrade(move |socket| serve_plugin(socket, state, token, limits))
}

/// Drive one plugin channel from handshake to disconnect.
async fn serve_plugin(
    socket: WebSocket,
    state: Arc<BridgeState>,
    token: Option<String>,
    limits: ChannelLimits,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    // Handshake-first: no other frame is accepted before the version
    // exchange completes.
    let handshake_id = match await_handshake(&mut ws_rx, &limits).await {
        Ok(id) => id,
        Err(err) => {
            warn!(error = %err, "plugin handshake failed, closing channel");
            let reply = Frame::Response {
                id: String::new(),
                payload: serde_json::Value::Null,
                error: Some(err.to_string()),
            };
            send_frame(&mut ws_tx, &reply).await;
            let _ = ws_tx.close().await;
            return;
        }
    };

    let reply = Frame::Response {
        id: handshake_id,
        payload: serde_json::to_value(VersionHandshake::current()).unwrap_or_default(),
        error: None,
    };
    if !send_frame(&mut ws_tx, &reply).await {
        return;
    }

    let conn_id = uuid::Uuid::new_v4().to_string();
    let (out_tx, mut out_rx) = mpsc::channel::<Frame>(64);
    let link = Arc::new(PluginLink::new(conn_id.clone(), out_tx));

    // Writer task: serial send queue plus keep-alive pings.
    let keep_alive = limits.keep_alive;
    let writer = tokio::spawn(async move {
        let mut ping = tokio::time::interval(keep_alive);
        ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                frame = out_rx.recv() => {
                    let Some(frame) = frame else { break };
                    if !send_frame(&mut ws_tx, &frame).await {
                        break;
                    }
                }
                _ = ping.tick() => {
                    if ws_tx.send(Message::Ping(axum::body::Bytes::new())).await.is_err() {
                        break;
                    }
                }
            }
        }
        let _ = ws_tx.close().await;
    });

    // Admission: in single-tenant mode the newcomer wins and every other
    // peer of the hub kind is disconnected.
    let hub = HubKind::McpServer;
    for evicted in state.strategy.plan_admission(&state.registry, hub, &conn_id) {
        if let Some(peer) = state.registry.get(&evicted) {
            info!(evicted, "disconnecting plugin, replaced by new connection");
            peer.link.close();
        }
        state.registry.remove(hub, &evicted);
    }

    state.registry.add(PluginConnection {
        id: conn_id.clone(),
        hub,
        token,
        connected_at: chrono::Utc::now(),
        link: link.clone(),
    });
    crate::metrics::record_channel_event("connect");
    info!(conn_id, "plugin channel open");

    // Read loop. The link's closed token doubles as the eviction signal.
    let closed = link.closed_token();
    loop {
        let message = tokio::select! {
            msg = ws_rx.next() => msg,
            _ = closed.cancelled() => break,
        };
        match message {
            Some(Ok(Message::Text(text))) => {
                match Frame::decode(text.as_str()) {
                    Ok(frame) => dispatch_frame(&state, &link, &conn_id, frame).await,
                    Err(err) => {
                        // A corrupt frame is fatal to the channel; the
                        // plugin client reconnects and re-handshakes.
                        warn!(conn_id, error = %err, "corrupt frame, closing channel");
                        break;
                    }
                }
            }
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {}
            Some(Ok(Message::Binary(_))) => {
                warn!(conn_id, "binary frame on plugin channel, ignoring");
            }
            Some(Err(err)) => {
                debug!(conn_id, error = %err, "plugin channel read error");
                break;
            }
        }
    }

    state.registry.remove(hub, &conn_id);
    link.close();
    writer.abort();
    crate::metrics::record_channel_event("disconnect");
    info!(conn_id, "plugin channel closed");
}

/// Wait for the opening `PerformVersionHandshake` request and validate it.
/// Returns the frame id to answer.
async fn await_handshake(
    ws_rx: &mut (impl futures::Stream<Item = Result<Message, axum::Error>> + Unpin),
    limits: &ChannelLimits,
) -> Result<String, HandshakeError> {
    let deadline = tokio::time::sleep(limits.handshake_deadline);
    tokio::pin!(deadline);

    loop {
        let message = tokio::select! {
            msg = ws_rx.next() => msg,
            _ = &mut deadline => return Err(HandshakeError::Deadline),
        };
        match message {
            Some(Ok(Message::Text(text))) => {
                let frame = Frame::decode(text.as_str())
                    .map_err(|e| HandshakeError::UnexpectedFrame(e.to_string()))?;
                return match frame {
                    Frame::Request {
                        id,
                        method: RpcMethod::PerformVersionHandshake,
                        payload,
                    } => {
                        let handshake: VersionHandshake = serde_json::from_value(payload)
                            .map_err(|e| HandshakeError::UnexpectedFrame(e.to_string()))?;
                        handshake.validate()?;
                        Ok(id)
                    }
                    other => Err(HandshakeError::UnexpectedFrame(format!("{:?}", other))),
                };
            }
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
            Some(Ok(_)) => {
                return Err(HandshakeError::UnexpectedFrame(
                    "non-text frame before handshake".to_string(),
                ));
            }
            Some(Err(e)) => return Err(HandshakeError::UnexpectedFrame(e.to_string())),
            None => {
                return Err(HandshakeError::UnexpectedFrame(
                    "channel closed before handshake".to_string(),
                ));
            }
        }
    }
}

/// Route one inbound frame from a connected plugin.
async fn dispatch_frame(state: &BridgeState, link: &PluginLink, conn_id: &str, frame: Frame) {
    match frame {
        Frame::Response { id, payload, error } => {
            let result = match error {
                Some(message) => Err(message),
                None => Ok(payload),
            };
            if !link.complete(&id, result) {
                debug!(conn_id, id, "response for unknown correlation id, dropping");
            }
        }
        Frame::Notification { method, payload } => match method {
            RpcMethod::NotifyAboutUpdatedTools => {
                state.bus.publish(CapabilityKind::Tools, conn_id);
            }
            RpcMethod::NotifyAboutUpdatedPrompts => {
                state.bus.publish(CapabilityKind::Prompts, conn_id);
            }
            RpcMethod::NotifyAboutUpdatedResources => {
                state.bus.publish(CapabilityKind::Resources, conn_id);
            }
            RpcMethod::NotifyToolRequestCompleted => {
                match serde_json::from_value::<CallResponse>(payload) {
                    Ok(response) => {
                        let request_id = response.request_id.clone();
                        state.tracker.complete_externally(&request_id, response);
                    }
                    Err(err) => {
                        warn!(conn_id, error = %err, "malformed tool-completed notification");
                    }
                }
            }
            other => {
                warn!(conn_id, method = other.as_str(), "unexpected notification");
            }
        },
        Frame::Request { id, method, .. } => {
            // Plugins only initiate the handshake; anything else is a
            // protocol violation answered with an error reply.
            warn!(conn_id, method = method.as_str(), "unexpected request from plugin");
            let reply = Frame::Response {
                id,
                payload: serde_json::Value::Null,
                error: Some(format!("unexpected request method {}", method.as_str())),
            };
            let _ = link.notify_raw(reply).await;
        }
    }
}

async fn send_frame(ws_tx: &mut SplitSink<WebSocket, Message>, frame: &Frame) -> bool {
    match frame.encode() {
        Ok(text) => ws_tx.send(Message::Text(text.into())).await.is_ok(),
        Err(err) => {
            warn!(error = %err, "failed to encode outbound frame");
            false
        }
    }
}
