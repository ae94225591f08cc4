/// Implementation of the MCP server handler.
/// One handler instance exists per MCP session; the streamable-HTTP
/// factory creates one per accepted stream, the stdio transport exactly
/// one for the process lifetime.
use std::sync::{Arc, RwLock};
use std::time::Instant;

use crate::protocol::RpcMethod;
use crate::protocol::payload::{
    CallResponse, CallToolRequest, GetPromptRequest, PromptDescriptor, PromptPayload,
    ReadResourceRequest, ResourceData, ResourceDescriptor, ResourceTemplateDescriptor,
    ToolDescriptor,
};
use crate::registry::HubKind;
use crate::server::constants::{
    MCP_SERVER_INFO_NAME, MCP_SERVER_INFO_TITLE, MCP_SERVER_INFO_VERSION,
};
use crate::server::convert;
use crate::session::{SessionEntry, spawn_notification_forwarder};
use crate::state::BridgeState;
use rmcp::handler::server::ServerHandler;
use rmcp::model::{
    Implementation, ListPromptsResult, ListResourceTemplatesResult, ListResourcesResult,
    ListToolsResult, PaginatedRequestParam, PromptsCapability, ResourcesCapability,
    ServerCapabilities, ServerInfo, ToolsCapability,
};
use rmcp::service::RequestContext;
use rmcp::{ErrorData, RoleServer};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

/// Handler for MCP (Model Context Protocol) server operations.
///
/// Translates MCP verbs into plugin-router invocations. Holds the session
/// identity, the bearer token pinned at initialize time, and the session
/// cancellation handle linked into every outgoing router call.
pub(crate) struct McpBridgeHandler {
    /// Shared bridge state: registry, router, tracker, bus, sessions.
    pub(crate) state: Arc<BridgeState>,
    session_id: String,
    session_cancel: CancellationToken,
    bearer: RwLock<Option<String>>,
}

impl McpBridgeHandler {
    pub(crate) fn new(state: Arc<BridgeState>) -> Self {
        Self {
            state,
            session_id: uuid::Uuid::new_v4().to_string(),
            session_cancel: CancellationToken::new(),
            bearer: RwLock::new(None),
        }
    }

    fn token(&self) -> Option<String> {
        self.bearer.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Cancellation handle for one request. The SDK links the per-request
    /// token to the session service, so session teardown and client
    /// cancellation both trip it.
    fn request_cancel(&self, context: &RequestContext<RoleServer>) -> CancellationToken {
        context.ct.clone()
    }

    /// Invoke a plugin method and demand a success envelope.
    async fn invoke_ok(
        &self,
        method: RpcMethod,
        payload: Value,
        request_id: &str,
        ct: &CancellationToken,
    ) -> Result<CallResponse, ErrorData> {
        let token = self.token();
        let response = self
            .state
            .router
            .invoke(
                HubKind::McpServer,
                method,
                payload,
                request_id,
                token.as_deref(),
                ct,
            )
            .await;
        if response.is_success() {
            Ok(response)
        } else {
            Err(ErrorData::internal_error(
                response
                    .message
                    .unwrap_or_else(|| format!("{} failed", method.as_str())),
                None,
            ))
        }
    }
}

impl Drop for McpBridgeHandler {
    fn drop(&mut self) {
        // Teardown must succeed even when the session was cancelled first;
        // both paths below are plain synchronous calls.
        self.session_cancel.cancel();
        self.state.sessions.deregister(&self.session_id);
    }
}

// Implement ServerHandler interface
impl ServerHandler for McpBridgeHandler {
    /// Handle MCP initialization request.
    ///
    /// Pins the bearer token from the HTTP request (when present) to the
    /// session, registers the session for capability notifications, and
    /// returns the server capabilities.
    fn initialize(
        &self,
        _request: rmcp::model::InitializeRequestParam,
        context: RequestContext<RoleServer>,
    ) -> impl Future<Output = Result<rmcp::model::InitializeResult, ErrorData>> + Send + '_ {
        let start = Instant::now();
        tracing::debug!(session_id = %self.session_id, "McpBridgeHandler: initialize");
        async move {
            // The streamable-HTTP transport stores the request head in the
            // context extensions; stdio sessions have none.
            let token = context
                .extensions
                .get::<axum::http::request::Parts>()
                .and_then(|parts| crate::server::auth::bearer_token(&parts.headers));
            {
                let mut bearer = self.bearer.write().unwrap_or_else(|e| e.into_inner());
                *bearer = token.clone();
            }

            let entry = SessionEntry {
                session_id: self.session_id.clone(),
                token,
                cancel: self.session_cancel.clone(),
            };
            self.state.sessions.register(entry.clone());
            spawn_notification_forwarder(
                self.state.sessions.clone(),
                entry,
                self.state.bus.subscribe_all(),
                self.state.strategy.clone(),
                self.state.registry.clone(),
                context.peer.clone(),
            );

            let server_info = self.get_info();
            let result = Ok(rmcp::model::InitializeResult {
                capabilities: server_info.capabilities,
                server_info: server_info.server_info,
                instructions: None,
                protocol_version: rmcp::model::ProtocolVersion::V_2024_11_05,
            });
            let latency_ms = start.elapsed().as_millis() as f64;
            crate::metrics::record_mcp_call("initialize", latency_ms);
            result
        }
    }

    /// Returns the server information and capabilities.
    ///
    /// Capabilities are static: the bridge always advertises tools,
    /// prompts and resources with list-changed notifications, since the
    /// actual catalogs live behind whichever plugins are connected.
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            capabilities: ServerCapabilities {
                experimental: None,
                logging: None,
                completions: None,
                prompts: Some(PromptsCapability {
                    list_changed: Some(true),
                }),
                resources: Some(ResourcesCapability {
                    subscribe: None,
                    list_changed: Some(true),
                }),
                tools: Some(ToolsCapability {
                    list_changed: Some(true),
                }),
            },
            server_info: Implementation {
                name: MCP_SERVER_INFO_NAME.to_owned(),
                title: Some(MCP_SERVER_INFO_TITLE.to_owned()),
                version: MCP_SERVER_INFO_VERSION.to_owned(),
                icons: None,
                website_url: None,
            },
            ..Default::default()
        }
    }

    /// List tools across the routed plugin, filtering disabled entries.
    fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        context: RequestContext<RoleServer>,
    ) -> impl Future<Output = Result<ListToolsResult, ErrorData>> + Send + '_ {
        let start = Instant::now();
        tracing::debug!("McpBridgeHandler: list_tools");
        async move {
            let ct = self.request_cancel(&context);
            let request_id = uuid::Uuid::new_v4().to_string();
            let response = self
                .invoke_ok(RpcMethod::RunListTool, Value::Null, &request_id, &ct)
                .await?;

            let descriptors: Vec<ToolDescriptor> = response
                .value_as()
                .map_err(|e| ErrorData::internal_error(format!("invalid tool list: {}", e), None))?;
            let tools = descriptors
                .iter()
                .filter(|d| d.enabled)
                .map(convert::tool)
                .collect();

            let latency_ms = start.elapsed().as_millis() as f64;
            crate::metrics::record_mcp_call("list_tools", latency_ms);
            Ok(ListToolsResult {
                tools,
                next_cursor: None,
            })
        }
    }

    /// Dispatch a tool call through the router, tracked for out-of-band
    /// completion.
    ///
    /// The tracked window lets a plugin answer `Processing` on the RPC
    /// path and deliver the final result later via
    /// `NotifyToolRequestCompleted`; the MCP client sees a single result
    /// either way.
    fn call_tool(
        &self,
        request: rmcp::model::CallToolRequestParam,
        context: RequestContext<RoleServer>,
    ) -> impl Future<Output = Result<rmcp::model::CallToolResult, ErrorData>> + Send + '_ {
        let start = Instant::now();
        tracing::debug!(tool = %request.name, "McpBridgeHandler: call_tool");
        async move {
            let ct = self.request_cancel(&context);
            let request_id = uuid::Uuid::new_v4().to_string();
            let arguments = match request.arguments {
                Some(map) => Value::Object(map),
                None => Value::Object(Default::default()),
            };
            let payload = serde_json::to_value(CallToolRequest {
                request_id: request_id.clone(),
                name: request.name.to_string(),
                arguments,
            })
            .map_err(|e| ErrorData::internal_error(e.to_string(), None))?;

            let token = self.token();
            let produce = self.state.router.invoke(
                HubKind::McpServer,
                RpcMethod::RunCallTool,
                payload,
                &request_id,
                token.as_deref(),
                &ct,
            );
            let response = self
                .state
                .tracker
                .track(&request_id, produce, self.state.config.tracking_window(), &ct)
                .await;

            let latency_ms = start.elapsed().as_millis() as f64;
            crate::metrics::record_mcp_call("call_tool", latency_ms);
            convert::call_tool_result(&response)
        }
    }

    /// List prompts, filtering disabled entries.
    fn list_prompts(
        &self,
        _request: Option<PaginatedRequestParam>,
        context: RequestContext<RoleServer>,
    ) -> impl Future<Output = Result<ListPromptsResult, ErrorData>> + Send + '_ {
        let start = Instant::now();
        tracing::debug!("McpBridgeHandler: list_prompts");
        async move {
            let ct = self.request_cancel(&context);
            let request_id = uuid::Uuid::new_v4().to_string();
            let response = self
                .invoke_ok(RpcMethod::RunListPrompts, Value::Null, &request_id, &ct)
                .await?;

            let descriptors: Vec<PromptDescriptor> = response.value_as().map_err(|e| {
                ErrorData::internal_error(format!("invalid prompt list: {}", e), None)
            })?;
            let prompts = descriptors
                .iter()
                .filter(|d| d.enabled)
                .map(convert::prompt)
                .collect::<Result<Vec<_>, _>>()?;

            let latency_ms = start.elapsed().as_millis() as f64;
            crate::metrics::record_mcp_call("list_prompts", latency_ms);
            Ok(ListPromptsResult {
                prompts,
                next_cursor: None,
            })
        }
    }

    /// Render one prompt on the plugin.
    fn get_prompt(
        &self,
        request: rmcp::model::GetPromptRequestParam,
        context: RequestContext<RoleServer>,
    ) -> impl Future<Output = Result<rmcp::model::GetPromptResult, ErrorData>> + Send + '_ {
        let start = Instant::now();
        tracing::debug!(prompt = %request.name, "McpBridgeHandler: get_prompt");
        async move {
            let ct = self.request_cancel(&context);
            let request_id = uuid::Uuid::new_v4().to_string();
            let payload = serde_json::to_value(GetPromptRequest {
                request_id: request_id.clone(),
                name: request.name.to_string(),
                arguments: request.arguments,
            })
            .map_err(|e| ErrorData::internal_error(e.to_string(), None))?;

            let response = self
                .invoke_ok(RpcMethod::RunGetPrompt, payload, &request_id, &ct)
                .await?;
            let prompt: PromptPayload = response.value_as().map_err(|e| {
                ErrorData::internal_error(format!("invalid prompt payload: {}", e), None)
            })?;

            let latency_ms = start.elapsed().as_millis() as f64;
            crate::metrics::record_mcp_call("get_prompt", latency_ms);
            convert::get_prompt_result(&prompt)
        }
    }

    /// List resources, filtering disabled entries.
    fn list_resources(
        &self,
        _request: Option<PaginatedRequestParam>,
        context: RequestContext<RoleServer>,
    ) -> impl Future<Output = Result<ListResourcesResult, ErrorData>> + Send + '_ {
        let start = Instant::now();
        tracing::debug!("McpBridgeHandler: list_resources");
        async move {
            let ct = self.request_cancel(&context);
            let request_id = uuid::Uuid::new_v4().to_string();
            let response = self
                .invoke_ok(RpcMethod::RunListResources, Value::Null, &request_id, &ct)
                .await?;

            let descriptors: Vec<ResourceDescriptor> = response.value_as().map_err(|e| {
                ErrorData::internal_error(format!("invalid resource list: {}", e), None)
            })?;
            let resources = descriptors
                .iter()
                .filter(|d| d.enabled)
                .map(convert::resource)
                .collect::<Result<Vec<_>, _>>()?;

            let latency_ms = start.elapsed().as_millis() as f64;
            crate::metrics::record_mcp_call("list_resources", latency_ms);
            Ok(ListResourcesResult {
                resources,
                next_cursor: None,
            })
        }
    }

    /// Read one resource by URI on the plugin.
    fn read_resource(
        &self,
        request: rmcp::model::ReadResourceRequestParam,
        context: RequestContext<RoleServer>,
    ) -> impl Future<Output = Result<rmcp::model::ReadResourceResult, ErrorData>> + Send + '_ {
        let start = Instant::now();
        tracing::debug!(uri = %request.uri, "McpBridgeHandler: read_resource");
        async move {
            let ct = self.request_cancel(&context);
            let request_id = uuid::Uuid::new_v4().to_string();
            let payload = serde_json::to_value(ReadResourceRequest {
                request_id: request_id.clone(),
                uri: request.uri.to_string(),
            })
            .map_err(|e| ErrorData::internal_error(e.to_string(), None))?;

            let response = self
                .invoke_ok(RpcMethod::RunResourceContent, payload, &request_id, &ct)
                .await?;
            let contents: Vec<ResourceData> = response.value_as().map_err(|e| {
                ErrorData::internal_error(format!("invalid resource contents: {}", e), None)
            })?;

            let latency_ms = start.elapsed().as_millis() as f64;
            crate::metrics::record_mcp_call("read_resource", latency_ms);
            convert::read_resource_result(&contents)
        }
    }

    /// List resource templates.
    fn list_resource_templates(
        &self,
        _request: Option<PaginatedRequestParam>,
        context: RequestContext<RoleServer>,
    ) -> impl Future<Output = Result<ListResourceTemplatesResult, ErrorData>> + Send + '_ {
        let start = Instant::now();
        tracing::debug!("McpBridgeHandler: list_resource_templates");
        async move {
            let ct = self.request_cancel(&context);
            let request_id = uuid::Uuid::new_v4().to_string();
            let response = self
                .invoke_ok(RpcMethod::RunResourceTemplates, Value::Null, &request_id, &ct)
                .await?;

            let descriptors: Vec<ResourceTemplateDescriptor> =
                response.value_as().map_err(|e| {
                    ErrorData::internal_error(format!("invalid template list: {}", e), None)
                })?;
            let resource_templates = descriptors
                .iter()
                .map(convert::resource_template)
                .collect::<Result<Vec<_>, _>>()?;

            let latency_ms = start.elapsed().as_millis() as f64;
            crate::metrics::record_mcp_call("list_resource_templates", latency_ms);
            Ok(ListResourceTemplatesResult {
                resource_templates,
                next_cursor: None,
            })
        }
    }
}
