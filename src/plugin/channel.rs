//! Plugin-side channel client.
//!
//! Maintains the WebSocket connection to a bridge: opens it with the
//! bearer header, performs the version handshake, answers bridge-initiated
//! RPCs from the catalog, and raises the updated-catalog notifications.
//! On any transport fault the channel reconnects with a fixed backoff and
//! re-handshakes; in-flight server calls are never replayed — the bridge
//! retries through its router.

use crate::bus::CapabilityKind;
use crate::plugin::catalog::Catalog;
use crate::protocol::payload::{
    CallResponse, CallToolRequest, GetPromptRequest, ReadResourceRequest,
};
use crate::protocol::{ChannelLimits, Frame, RpcMethod, VersionHandshake};
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Fixed delay between reconnection attempts.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(10);

/// Channel lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Disconnected,
    Connecting,
    Handshaking,
    Connected,
    Reconnecting,
}

/// Connection settings for the plugin channel.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// WebSocket endpoint, e.g. `ws://127.0.0.1:8080/hub/mcp-server`.
    pub url: String,
    /// Bearer token presented on the upgrade request.
    pub token: Option<String>,
    pub reconnect_delay: Duration,
    pub limits: ChannelLimits,
}

impl ChannelConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            token: None,
            reconnect_delay: RECONNECT_DELAY,
            limits: ChannelLimits::default(),
        }
    }

    /// Endpoint URL for a bridge on the local host.
    pub fn local_url(port: u16) -> String {
        format!(
            "ws://127.0.0.1:{}{}",
            port,
            crate::config::defaults::HUB_ENDPOINT_PATH
        )
    }

    /// Check the endpoint is a well-formed `ws`/`wss` URL.
    pub fn validate(&self) -> Result<(), ChannelError> {
        let parsed = url::Url::parse(&self.url)
            .map_err(|e| ChannelError::Transport(format!("invalid endpoint url: {}", e)))?;
        match parsed.scheme() {
            "ws" | "wss" => Ok(()),
            other => Err(ChannelError::Transport(format!(
                "endpoint scheme must be ws or wss, got '{}'",
                other
            ))),
        }
    }
}

/// Errors surfaced by channel operations.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("channel is not connected")]
    NotConnected,

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("transport error: {0}")]
    Transport(String),
}

/// The plugin's persistent connection to a bridge.
pub struct PluginChannel {
    config: ChannelConfig,
    catalog: Arc<Catalog>,
    state: RwLock<ChannelState>,
    out_tx: Mutex<Option<mpsc::Sender<Frame>>>,
    keep_connected: AtomicBool,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for PluginChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginChannel")
            .field("url", &self.config.url)
            .field("state", &self.state())
            .finish()
    }
}

impl PluginChannel {
    pub fn new(config: ChannelConfig, catalog: Arc<Catalog>) -> Arc<Self> {
        Arc::new(Self {
            config,
            catalog,
            state: RwLock::new(ChannelState::Disconnected),
            out_tx: Mutex::new(None),
            keep_connected: AtomicBool::new(true),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn state(&self) -> ChannelState {
        *self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: ChannelState) {
        debug!(?state, "plugin channel state");
        *self.state.write().unwrap_or_else(|e| e.into_inner()) = state;
    }

    /// Stop reconnecting and drop the current connection.
    pub fn shutdown(&self) {
        self.keep_connected.store(false, Ordering::Relaxed);
        self.shutdown.cancel();
    }

    /// Spawn the connection loop. Runs until [`PluginChannel::shutdown`].
    pub fn spawn(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let channel = self.clone();
        tokio::spawn(async move { channel.run().await })
    }

    async fn run(self: Arc<Self>) {
        loop {
            if !self.keep_connected.load(Ordering::Relaxed) || self.shutdown.is_cancelled() {
                break;
            }
            self.set_state(ChannelState::Connecting);
            match self.connect_and_serve().await {
                Ok(()) => info!("plugin channel closed by peer"),
                Err(err) => warn!(error = %err, "plugin channel failed"),
            }
            *self.out_tx.lock().expect("out_tx poisoned") = None;

            if !self.keep_connected.load(Ordering::Relaxed) || self.shutdown.is_cancelled() {
                break;
            }
            self.set_state(ChannelState::Reconnecting);
            crate::metrics::record_channel_event("reconnect");
            tokio::select! {
                _ = tokio::time::sleep(self.config.reconnect_delay) => {}
                _ = self.shutdown.cancelled() => break,
            }
        }
        self.set_state(ChannelState::Disconnected);
    }

    /// One connection lifetime: connect, handshake, serve until the
    /// socket drops.
    async fn connect_and_serve(self: &Arc<Self>) -> Result<(), ChannelError> {
        self.config.validate()?;
        let mut request = self
            .config
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| ChannelError::Transport(e.to_string()))?;
        if let Some(token) = &self.config.token {
            let value: tokio_tungstenite::tungstenite::http::HeaderValue =
                format!("Bearer {}", token)
                    .parse()
                    .map_err(|_| ChannelError::Transport("invalid token header".to_string()))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        let (ws, _response) = connect_async(request)
            .await
            .map_err(|e| ChannelError::Transport(e.to_string()))?;
        let (mut sink, mut stream) = ws.split();

        // Handshake is the first frame in each direction; nothing else is
        // sent before the bridge's version is validated.
        self.set_state(ChannelState::Handshaking);
        let handshake_id = uuid::Uuid::new_v4().to_string();
        let hello = Frame::Request {
            id: handshake_id.clone(),
            method: RpcMethod::PerformVersionHandshake,
            payload: serde_json::to_value(VersionHandshake::current()).unwrap_or_default(),
        };
        send(&mut sink, &hello).await?;
        self.await_handshake_reply(&mut stream, &handshake_id).await?;
        self.set_state(ChannelState::Connected);
        info!(url = %self.config.url, "plugin channel connected");

        let (out_tx, mut out_rx) = mpsc::channel::<Frame>(64);
        *self.out_tx.lock().expect("out_tx poisoned") = Some(out_tx.clone());

        // Fresh handshake means the bridge has a new connection id for us;
        // announce all catalogs so sessions re-query.
        for method in [
            RpcMethod::NotifyAboutUpdatedTools,
            RpcMethod::NotifyAboutUpdatedPrompts,
            RpcMethod::NotifyAboutUpdatedResources,
        ] {
            let _ = out_tx
                .send(Frame::Notification {
                    method,
                    payload: Value::Null,
                })
                .await;
        }

        loop {
            tokio::select! {
                frame = out_rx.recv() => {
                    let Some(frame) = frame else { break };
                    send(&mut sink, &frame).await?;
                }
                message = stream.next() => {
                    match message {
                        Some(Ok(Message::Text(text))) => {
                            match Frame::decode(text.as_str()) {
                                Ok(frame) => self.dispatch(frame, &out_tx),
                                Err(err) => {
                                    // Corrupt frame: close and reconnect.
                                    return Err(ChannelError::Transport(err.to_string()));
                                }
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {}
                        Some(Ok(_)) => {}
                        Some(Err(err)) => {
                            return Err(ChannelError::Transport(err.to_string()));
                        }
                    }
                }
                _ = self.shutdown.cancelled() => {
                    let _ = sink.close().await;
                    break;
                }
            }
        }
        Ok(())
    }

    async fn await_handshake_reply(
        &self,
        stream: &mut (impl futures::Stream<
            Item = Result<Message, tokio_tungstenite::tungstenite::Error>,
        > + Unpin),
        handshake_id: &str,
    ) -> Result<(), ChannelError> {
        let deadline = tokio::time::sleep(self.config.limits.handshake_deadline);
        tokio::pin!(deadline);

        loop {
            let message = tokio::select! {
                m = stream.next() => m,
                _ = &mut deadline => {
                    return Err(ChannelError::Handshake("handshake deadline elapsed".to_string()));
                }
            };
            match message {
                Some(Ok(Message::Text(text))) => {
                    let frame = Frame::decode(text.as_str())
                        .map_err(|e| ChannelError::Handshake(e.to_string()))?;
                    if let Frame::Response { id, payload, error } = frame
                        && id == handshake_id
                    {
                        if let Some(message) = error {
                            return Err(ChannelError::Handshake(message));
                        }
                        let bridge: VersionHandshake = serde_json::from_value(payload)
                            .map_err(|e| ChannelError::Handshake(e.to_string()))?;
                        bridge
                            .validate()
                            .map_err(|e| ChannelError::Handshake(e.to_string()))?;
                        return Ok(());
                    }
                    // Any other frame before the handshake reply is a
                    // protocol violation.
                    return Err(ChannelError::Handshake(
                        "unexpected frame before handshake reply".to_string(),
                    ));
                }
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
                Some(Ok(_)) => {
                    return Err(ChannelError::Handshake(
                        "non-text frame during handshake".to_string(),
                    ));
                }
                Some(Err(err)) => return Err(ChannelError::Transport(err.to_string())),
                None => {
                    return Err(ChannelError::Handshake(
                        "channel closed during handshake".to_string(),
                    ));
                }
            }
        }
    }

    /// Route one inbound frame. Server calls run in their own task so a
    /// slow tool never blocks the read loop.
    fn dispatch(self: &Arc<Self>, frame: Frame, out_tx: &mpsc::Sender<Frame>) {
        match frame {
            Frame::Request { id, method, payload } => {
                let catalog = self.catalog.clone();
                let out_tx = out_tx.clone();
                let ct = self.shutdown.child_token();
                tokio::spawn(async move {
                    let reply_payload = serve_call(&catalog, method, &id, payload, ct).await;
                    let reply = Frame::Response {
                        id,
                        payload: reply_payload,
                        error: None,
                    };
                    let _ = out_tx.send(reply).await;
                });
            }
            Frame::Response { id, .. } => {
                // The handshake is the only client-initiated request.
                debug!(id, "unexpected response frame, dropping");
            }
            Frame::Notification { method, .. } => {
                debug!(method = method.as_str(), "unexpected notification, dropping");
            }
        }
    }

    async fn enqueue(&self, frame: Frame) -> Result<(), ChannelError> {
        let sender = {
            let guard = self.out_tx.lock().expect("out_tx poisoned");
            guard.clone()
        };
        match sender {
            Some(tx) => tx.send(frame).await.map_err(|_| ChannelError::NotConnected),
            None => Err(ChannelError::NotConnected),
        }
    }

    /// Tell the bridge a capability catalog changed.
    pub async fn notify_updated(&self, kind: CapabilityKind) -> Result<(), ChannelError> {
        let method = match kind {
            CapabilityKind::Tools => RpcMethod::NotifyAboutUpdatedTools,
            CapabilityKind::Prompts => RpcMethod::NotifyAboutUpdatedPrompts,
            CapabilityKind::Resources => RpcMethod::NotifyAboutUpdatedResources,
        };
        self.enqueue(Frame::Notification {
            method,
            payload: Value::Null,
        })
        .await
    }

    /// Complete a tool request out-of-band.
    pub async fn notify_tool_request_completed(
        &self,
        response: CallResponse,
    ) -> Result<(), ChannelError> {
        let payload =
            serde_json::to_value(response).map_err(|e| ChannelError::Transport(e.to_string()))?;
        self.enqueue(Frame::Notification {
            method: RpcMethod::NotifyToolRequestCompleted,
            payload,
        })
        .await
    }
}

/// Serve one bridge-initiated call from the catalog. Every failure is an
/// `Error` envelope; nothing propagates as a transport error.
async fn serve_call(
    catalog: &Catalog,
    method: RpcMethod,
    frame_id: &str,
    payload: Value,
    ct: CancellationToken,
) -> Value {
    let response = match method {
        RpcMethod::RunListTool => {
            CallResponse::success_value(frame_id, list_value(catalog.list_tools()))
        }
        RpcMethod::RunListPrompts => {
            CallResponse::success_value(frame_id, list_value(catalog.list_prompts()))
        }
        RpcMethod::RunListResources => {
            CallResponse::success_value(frame_id, list_value(catalog.list_resources()))
        }
        RpcMethod::RunResourceTemplates => {
            CallResponse::success_value(frame_id, list_value(catalog.list_templates()))
        }
        RpcMethod::RunCallTool => match serde_json::from_value::<CallToolRequest>(payload) {
            Ok(request) => match catalog.tool(&request.name) {
                Some(tool) if tool.enabled() => {
                    tool.run(&request.request_id, &request.arguments, ct).await
                }
                Some(_) => CallResponse::error(
                    &request.request_id,
                    format!("tool '{}' is disabled", request.name),
                ),
                None => CallResponse::error(
                    &request.request_id,
                    format!("unknown tool '{}'", request.name),
                ),
            },
            Err(err) => CallResponse::error(frame_id, format!("malformed tool call: {}", err)),
        },
        RpcMethod::RunGetPrompt => match serde_json::from_value::<GetPromptRequest>(payload) {
            Ok(request) => match catalog.prompt(&request.name) {
                Some(prompt) if prompt.enabled() => {
                    prompt.get(&request.request_id, request.arguments).await
                }
                Some(_) => CallResponse::error(
                    &request.request_id,
                    format!("prompt '{}' is disabled", request.name),
                ),
                None => CallResponse::error(
                    &request.request_id,
                    format!("unknown prompt '{}'", request.name),
                ),
            },
            Err(err) => CallResponse::error(frame_id, format!("malformed prompt request: {}", err)),
        },
        RpcMethod::RunResourceContent => {
            match serde_json::from_value::<ReadResourceRequest>(payload) {
                Ok(request) => match catalog.resource(&request.uri) {
                    Some(resource) if resource.enabled() => {
                        resource.read(&request.request_id, &request.uri).await
                    }
                    Some(_) => CallResponse::error(
                        &request.request_id,
                        format!("resource '{}' is disabled", request.uri),
                    ),
                    None => CallResponse::error(
                        &request.request_id,
                        format!("unknown resource '{}'", request.uri),
                    ),
                },
                Err(err) => {
                    CallResponse::error(frame_id, format!("malformed resource request: {}", err))
                }
            }
        }
        other => CallResponse::error(
            frame_id,
            format!("unsupported method '{}' on plugin channel", other.as_str()),
        ),
    };
    serde_json::to_value(response).unwrap_or(Value::Null)
}

fn list_value<T: serde::Serialize>(items: Vec<T>) -> Value {
    serde_json::to_value(items).unwrap_or_else(|_| Value::Array(Vec::new()))
}

async fn send<S>(sink: &mut S, frame: &Frame) -> Result<(), ChannelError>
where
    S: SinkExt<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    let text = frame
        .encode()
        .map_err(|e| ChannelError::Transport(e.to_string()))?;
    sink.send(Message::Text(text.into()))
        .await
        .map_err(|e| ChannelError::Transport(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::invoker::{FnTool, ToolReturn};
    use crate::plugin::schema::SchemarsProvider;
    use crate::protocol::payload::{ResponseStatus, ToolDescriptor};
    use futures::FutureExt;
    use serde_json::json;

    fn catalog() -> Catalog {
        let tool = FnTool::builder("ping")
            .handler(|_args: Vec<Value>| async move { Ok(ToolReturn::from("pong")) }.boxed())
            .build(&SchemarsProvider)
            .unwrap();
        Catalog::new(vec![Arc::new(tool)], vec![], vec![], vec![])
    }

    #[tokio::test]
    async fn list_call_wraps_descriptors_in_success_envelope() {
        let value = serve_call(
            &catalog(),
            RpcMethod::RunListTool,
            "f-1",
            Value::Null,
            CancellationToken::new(),
        )
        .await;
        let response: CallResponse = serde_json::from_value(value).unwrap();
        assert!(response.is_success());
        let tools: Vec<ToolDescriptor> = response.value_as().unwrap();
        assert_eq!(tools[0].name, "ping");
    }

    #[tokio::test]
    async fn unknown_tool_yields_error_envelope() {
        let payload = json!({"requestId": "r-1", "name": "nope", "arguments": {}});
        let value = serve_call(
            &catalog(),
            RpcMethod::RunCallTool,
            "f-2",
            payload,
            CancellationToken::new(),
        )
        .await;
        let response: CallResponse = serde_json::from_value(value).unwrap();
        assert_eq!(response.status, ResponseStatus::Error);
        assert_eq!(response.request_id, "r-1");
    }

    #[tokio::test]
    async fn disabled_tool_is_not_callable() {
        let catalog = catalog();
        catalog.set_tool_enabled("ping", false);

        let payload = json!({"requestId": "r-2", "name": "ping", "arguments": {}});
        let value = serve_call(
            &catalog,
            RpcMethod::RunCallTool,
            "f-3",
            payload,
            CancellationToken::new(),
        )
        .await;
        let response: CallResponse = serde_json::from_value(value).unwrap();
        assert_eq!(response.status, ResponseStatus::Error);
        assert!(response.message.unwrap().contains("disabled"));
    }

    #[test]
    fn endpoint_url_must_be_websocket() {
        let config = ChannelConfig::new(ChannelConfig::local_url(8080));
        assert!(config.validate().is_ok());

        let config = ChannelConfig::new("http://127.0.0.1:8080/hub/mcp-server");
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn handshake_is_the_only_accepted_inbound_request_kind() {
        let value = serve_call(
            &catalog(),
            RpcMethod::NotifyAboutUpdatedTools,
            "f-4",
            Value::Null,
            CancellationToken::new(),
        )
        .await;
        let response: CallResponse = serde_json::from_value(value).unwrap();
        assert_eq!(response.status, ResponseStatus::Error);
    }
}
