//! Dynamic invocation surface of the plugin side.
//!
//! Each registered callable is described by a `Run*` trait object built
//! from parameter specs and an async handler. Dispatch accepts named
//! arguments (JSON object) or positional arguments (JSON array), injects
//! the request id into marked parameters, fills declared defaults, and
//! converts every failure into an `Error` envelope — nothing registered
//! here ever surfaces as a transport error.

use crate::plugin::schema::{SchemaProvider, schema_of};
use crate::protocol::payload::{
    CallResponse, PromptArgumentDescriptor, PromptDescriptor, PromptPayload, ResourceData,
    ResourceDescriptor, ToolDescriptor,
};
use async_trait::async_trait;
use futures::future::BoxFuture;
use schemars::JsonSchema;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// How a declared parameter is bound at dispatch time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    /// Bound from caller input.
    Input,
    /// Injected from the current request id; never exposed in the schema.
    RequestId,
}

/// One declared parameter of a callable.
#[derive(Debug, Clone)]
pub struct ParamSpec {
    pub name: String,
    pub required: bool,
    /// Value used when a non-required parameter is absent from the input.
    pub default: Option<Value>,
    /// JSON-schema fragment for the parameter type.
    pub schema: Value,
    pub kind: ParamKind,
}

impl ParamSpec {
    /// A required input parameter of type `T`.
    pub fn required<T: JsonSchema>(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required: true,
            default: None,
            schema: schema_of::<T>(),
            kind: ParamKind::Input,
        }
    }

    /// An optional input parameter of type `T` with a declared default.
    pub fn optional<T: JsonSchema>(name: impl Into<String>, default: Value) -> Self {
        Self {
            name: name.into(),
            required: false,
            default: Some(default),
            schema: schema_of::<T>(),
            kind: ParamKind::Input,
        }
    }

    /// A parameter receiving the current request id.
    pub fn request_id(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required: false,
            default: None,
            schema: Value::Null,
            kind: ParamKind::RequestId,
        }
    }
}

/// Result of a tool handler.
///
/// A full [`CallResponse`] passes through with request-id stamping; any
/// other value is wrapped: primitives become a `Success` text response,
/// everything else a structured response with a mirrored text block.
#[derive(Debug)]
pub enum ToolReturn {
    Response(CallResponse),
    Value(Value),
}

impl From<CallResponse> for ToolReturn {
    fn from(response: CallResponse) -> Self {
        ToolReturn::Response(response)
    }
}

impl From<Value> for ToolReturn {
    fn from(value: Value) -> Self {
        ToolReturn::Value(value)
    }
}

macro_rules! tool_return_from_primitive {
    ($($ty:ty),*) => {
        $(impl From<$ty> for ToolReturn {
            fn from(value: $ty) -> Self {
                ToolReturn::Value(serde_json::json!(value))
            }
        })*
    };
}

tool_return_from_primitive!(String, &str, i32, i64, u32, u64, f64, bool);

impl From<()> for ToolReturn {
    fn from(_: ()) -> Self {
        ToolReturn::Value(Value::Null)
    }
}

/// Errors raised while building or dispatching a callable.
#[derive(Debug, Error)]
pub enum InvokerError {
    #[error("missing required argument '{0}'")]
    MissingArgument(String),

    #[error("expected {expected} positional arguments, got {got}")]
    Arity { expected: usize, got: usize },

    #[error("arguments must be a JSON object or array, got {0}")]
    BadArgumentShape(String),

    #[error("callable '{0}' has no handler")]
    NoHandler(String),
}

/// Async handler invoked with bound arguments in declared order.
pub type ToolHandler =
    Arc<dyn Fn(Vec<Value>) -> BoxFuture<'static, anyhow::Result<ToolReturn>> + Send + Sync>;

/// A callable tool.
#[async_trait]
pub trait RunTool: Send + Sync {
    fn descriptor(&self) -> ToolDescriptor;
    fn name(&self) -> &str;
    fn enabled(&self) -> bool;
    fn set_enabled(&self, enabled: bool) -> bool;

    /// Dispatch with named (object) or positional (array) arguments.
    async fn run(&self, request_id: &str, arguments: &Value, ct: CancellationToken)
    -> CallResponse;
}

/// A templated prompt.
#[async_trait]
pub trait RunPrompt: Send + Sync {
    fn descriptor(&self) -> PromptDescriptor;
    fn name(&self) -> &str;
    fn enabled(&self) -> bool;
    fn set_enabled(&self, enabled: bool) -> bool;

    async fn get(&self, request_id: &str, arguments: Option<Map<String, Value>>) -> CallResponse;
}

/// A readable resource.
#[async_trait]
pub trait RunResource: Send + Sync {
    fn descriptor(&self) -> ResourceDescriptor;
    fn uri(&self) -> &str;
    fn enabled(&self) -> bool;
    fn set_enabled(&self, enabled: bool) -> bool;

    async fn read(&self, request_id: &str, uri: &str) -> CallResponse;
}

/// Approximate token footprint of a descriptor: one token per four bytes
/// of its serialized surface.
pub fn approx_token_cost(descriptor: &ToolDescriptor) -> u64 {
    let mut len = descriptor.name.len();
    len += descriptor.title.as_deref().map_or(0, str::len);
    len += descriptor.description.as_deref().map_or(0, str::len);
    len += descriptor.input_schema.to_string().len();
    len += descriptor
        .output_schema
        .as_ref()
        .map_or(0, |s| s.to_string().len());
    len.div_ceil(4) as u64
}

/// Tool built from parameter specs and an async handler.
pub struct FnTool {
    name: String,
    title: Option<String>,
    description: Option<String>,
    params: Vec<ParamSpec>,
    input_schema: Value,
    output_schema: Option<Value>,
    enabled: AtomicBool,
    token_cost: u64,
    handler: ToolHandler,
    /// Whether named keys may match case-insensitively. Folding is
    /// disabled when declared names collide case-insensitively.
    fold_keys: bool,
}

impl FnTool {
    pub fn builder(name: impl Into<String>) -> FnToolBuilder {
        FnToolBuilder {
            name: name.into(),
            title: None,
            description: None,
            params: Vec::new(),
            output_schema: None,
            handler: None,
        }
    }

    /// Bind a JSON object to the declared parameters.
    ///
    /// Keys match case-insensitively unless declared names collide on
    /// case; request-id parameters always take the current id, never
    /// caller input.
    fn bind_named(
        &self,
        request_id: &str,
        input: &Map<String, Value>,
    ) -> Result<Vec<Value>, InvokerError> {
        let lookup = |name: &str| -> Option<&Value> {
            if let Some(value) = input.get(name) {
                return Some(value);
            }
            if self.fold_keys {
                let folded = name.to_lowercase();
                input
                    .iter()
                    .find(|(key, _)| key.to_lowercase() == folded)
                    .map(|(_, value)| value)
            } else {
                None
            }
        };

        self.params
            .iter()
            .map(|param| match param.kind {
                ParamKind::RequestId => Ok(Value::String(request_id.to_string())),
                ParamKind::Input => match lookup(&param.name) {
                    Some(value) => Ok(value.clone()),
                    None => match (&param.default, param.required) {
                        (Some(default), _) => Ok(default.clone()),
                        (None, false) => Ok(Value::Null),
                        (None, true) => Err(InvokerError::MissingArgument(param.name.clone())),
                    },
                },
            })
            .collect()
    }

    /// Bind a JSON array positionally; request-id parameters are injected
    /// in place, missing trailing optionals take their defaults.
    fn bind_positional(
        &self,
        request_id: &str,
        input: &[Value],
    ) -> Result<Vec<Value>, InvokerError> {
        let input_slots = self
            .params
            .iter()
            .filter(|p| p.kind == ParamKind::Input)
            .count();
        if input.len() > input_slots {
            return Err(InvokerError::Arity {
                expected: input_slots,
                got: input.len(),
            });
        }

        let mut cursor = 0usize;
        self.params
            .iter()
            .map(|param| match param.kind {
                ParamKind::RequestId => Ok(Value::String(request_id.to_string())),
                ParamKind::Input => {
                    let bound = input.get(cursor).cloned();
                    cursor += 1;
                    match bound {
                        Some(value) => Ok(value),
                        None => match (&param.default, param.required) {
                            (Some(default), _) => Ok(default.clone()),
                            (None, false) => Ok(Value::Null),
                            (None, true) => Err(InvokerError::MissingArgument(param.name.clone())),
                        },
                    }
                }
            })
            .collect()
    }

    /// Convert a handler return into the response envelope.
    fn convert(request_id: &str, result: anyhow::Result<ToolReturn>) -> CallResponse {
        match result {
            Ok(ToolReturn::Response(response)) => response.stamp(request_id),
            Ok(ToolReturn::Value(value)) => match &value {
                Value::Null => CallResponse::success_text(request_id, ""),
                Value::String(s) => CallResponse::success_text(request_id, s.clone()),
                Value::Number(_) | Value::Bool(_) => {
                    CallResponse::success_text(request_id, value.to_string())
                }
                Value::Array(_) | Value::Object(_) => {
                    CallResponse::success_structured(request_id, value)
                }
            },
            Err(err) => CallResponse::error(request_id, err.to_string()),
        }
    }
}

#[async_trait]
impl RunTool for FnTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: self.name.clone(),
            title: self.title.clone(),
            description: self.description.clone(),
            input_schema: self.input_schema.clone(),
            output_schema: self.output_schema.clone(),
            enabled: self.enabled(),
            token_cost: Some(self.token_cost),
        }
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    fn set_enabled(&self, enabled: bool) -> bool {
        self.enabled.swap(enabled, Ordering::Relaxed) != enabled
    }

    async fn run(
        &self,
        request_id: &str,
        arguments: &Value,
        ct: CancellationToken,
    ) -> CallResponse {
        let bound = match arguments {
            Value::Object(map) => self.bind_named(request_id, map),
            Value::Array(items) => self.bind_positional(request_id, items),
            Value::Null => self.bind_named(request_id, &Map::new()),
            other => Err(InvokerError::BadArgumentShape(other.to_string())),
        };
        let bound = match bound {
            Ok(bound) => bound,
            Err(err) => return CallResponse::error(request_id, err.to_string()),
        };

        let handler = self.handler.clone();
        tokio::select! {
            result = handler(bound) => Self::convert(request_id, result),
            _ = ct.cancelled() => CallResponse::cancelled(request_id),
        }
    }
}

/// Builder for [`FnTool`].
pub struct FnToolBuilder {
    name: String,
    title: Option<String>,
    description: Option<String>,
    params: Vec<ParamSpec>,
    output_schema: Option<Value>,
    handler: Option<ToolHandler>,
}

impl FnToolBuilder {
    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn param(mut self, param: ParamSpec) -> Self {
        self.params.push(param);
        self
    }

    /// Declare the result type, yielding an output schema.
    pub fn output<T: JsonSchema>(mut self) -> Self {
        self.output_schema = Some(schema_of::<T>());
        self
    }

    /// Attach the async handler receiving bound arguments in declared
    /// parameter order.
    pub fn handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(Vec<Value>) -> BoxFuture<'static, anyhow::Result<ToolReturn>>
            + Send
            + Sync
            + 'static,
    {
        self.handler = Some(Arc::new(handler));
        self
    }

    /// Finalize the tool, generating its schemas through `provider`.
    pub fn build(self, provider: &dyn SchemaProvider) -> Result<FnTool, InvokerError> {
        let handler = self
            .handler
            .ok_or_else(|| InvokerError::NoHandler(self.name.clone()))?;

        // Case-insensitive key folding is only safe while declared names
        // stay distinct after lowercasing.
        let mut seen = std::collections::HashSet::new();
        let conflict = self
            .params
            .iter()
            .any(|param| !seen.insert(param.name.to_lowercase()));

        let input_schema = provider.input_schema(&self.params);
        let output_schema = provider.output_schema(self.output_schema.as_ref());

        let mut tool = FnTool {
            name: self.name,
            title: self.title,
            description: self.description,
            params: self.params,
            input_schema,
            output_schema,
            enabled: AtomicBool::new(true),
            token_cost: 0,
            handler,
            fold_keys: !conflict,
        };
        tool.token_cost = approx_token_cost(&tool.descriptor());
        Ok(tool)
    }
}

/// Async prompt handler: named arguments to a rendered prompt.
pub type PromptHandler = Arc<
    dyn Fn(Map<String, Value>) -> BoxFuture<'static, anyhow::Result<PromptPayload>> + Send + Sync,
>;

/// Prompt built from argument descriptors and an async handler.
pub struct FnPrompt {
    name: String,
    title: Option<String>,
    description: Option<String>,
    arguments: Vec<PromptArgumentDescriptor>,
    enabled: AtomicBool,
    handler: PromptHandler,
}

impl FnPrompt {
    pub fn new<F>(
        name: impl Into<String>,
        title: Option<String>,
        description: Option<String>,
        arguments: Vec<PromptArgumentDescriptor>,
        handler: F,
    ) -> Self
    where
        F: Fn(Map<String, Value>) -> BoxFuture<'static, anyhow::Result<PromptPayload>>
            + Send
            + Sync
            + 'static,
    {
        Self {
            name: name.into(),
            title,
            description,
            arguments,
            enabled: AtomicBool::new(true),
            handler: Arc::new(handler),
        }
    }
}

#[async_trait]
impl RunPrompt for FnPrompt {
    fn descriptor(&self) -> PromptDescriptor {
        PromptDescriptor {
            name: self.name.clone(),
            title: self.title.clone(),
            description: self.description.clone(),
            arguments: self.arguments.clone(),
            enabled: self.enabled(),
        }
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    fn set_enabled(&self, enabled: bool) -> bool {
        self.enabled.swap(enabled, Ordering::Relaxed) != enabled
    }

    async fn get(&self, request_id: &str, arguments: Option<Map<String, Value>>) -> CallResponse {
        let arguments = arguments.unwrap_or_default();
        for arg in &self.arguments {
            if arg.required && !arguments.contains_key(&arg.name) {
                return CallResponse::error(
                    request_id,
                    format!("missing required prompt argument '{}'", arg.name),
                );
            }
        }
        match (self.handler)(arguments).await {
            Ok(payload) => match serde_json::to_value(payload) {
                Ok(value) => CallResponse::success_value(request_id, value),
                Err(err) => CallResponse::error(request_id, err.to_string()),
            },
            Err(err) => CallResponse::error(request_id, err.to_string()),
        }
    }
}

/// Async resource handler: URI to resource contents.
pub type ResourceHandler =
    Arc<dyn Fn(String) -> BoxFuture<'static, anyhow::Result<Vec<ResourceData>>> + Send + Sync>;

/// Resource built from a descriptor and an async handler.
pub struct FnResource {
    uri: String,
    name: String,
    title: Option<String>,
    description: Option<String>,
    mime_type: Option<String>,
    enabled: AtomicBool,
    handler: ResourceHandler,
}

impl FnResource {
    pub fn new<F>(
        uri: impl Into<String>,
        name: impl Into<String>,
        title: Option<String>,
        description: Option<String>,
        mime_type: Option<String>,
        handler: F,
    ) -> Self
    where
        F: Fn(String) -> BoxFuture<'static, anyhow::Result<Vec<ResourceData>>>
            + Send
            + Sync
            + 'static,
    {
        Self {
            uri: uri.into(),
            name: name.into(),
            title,
            description,
            mime_type,
            enabled: AtomicBool::new(true),
            handler: Arc::new(handler),
        }
    }
}

#[async_trait]
impl RunResource for FnResource {
    fn descriptor(&self) -> ResourceDescriptor {
        ResourceDescriptor {
            uri: self.uri.clone(),
            name: self.name.clone(),
            title: self.title.clone(),
            description: self.description.clone(),
            mime_type: self.mime_type.clone(),
            enabled: self.enabled(),
        }
    }

    fn uri(&self) -> &str {
        &self.uri
    }

    fn enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    fn set_enabled(&self, enabled: bool) -> bool {
        self.enabled.swap(enabled, Ordering::Relaxed) != enabled
    }

    async fn read(&self, request_id: &str, uri: &str) -> CallResponse {
        match (self.handler)(uri.to_string()).await {
            Ok(contents) => match serde_json::to_value(contents) {
                Ok(value) => CallResponse::success_value(request_id, value),
                Err(err) => CallResponse::error(request_id, err.to_string()),
            },
            Err(err) => CallResponse::error(request_id, err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::schema::SchemarsProvider;
    use crate::protocol::payload::ResponseStatus;
    use futures::FutureExt;
    use serde_json::json;

    fn add_tool() -> FnTool {
        FnTool::builder("add")
            .description("Adds two integers.")
            .param(ParamSpec::required::<i64>("a"))
            .param(ParamSpec::required::<i64>("b"))
            .handler(|args: Vec<Value>| {
                async move {
                    let a = args[0].as_i64().unwrap_or_default();
                    let b = args[1].as_i64().unwrap_or_default();
                    Ok(ToolReturn::from(a + b))
                }
                .boxed()
            })
            .build(&SchemarsProvider)
            .unwrap()
    }

    #[tokio::test]
    async fn named_dispatch_returns_primitive_as_text() {
        let tool = add_tool();
        let response = tool
            .run("r-1", &json!({"a": 2, "b": 3}), CancellationToken::new())
            .await;

        assert!(response.is_success());
        match response.content.as_deref() {
            Some([crate::protocol::payload::ContentBlock::Text { text, .. }]) => {
                assert_eq!(text, "5")
            }
            other => panic!("expected one text block, got {:?}", other),
        }
        assert_eq!(response.request_id, "r-1");
    }

    #[tokio::test]
    async fn named_dispatch_folds_key_case() {
        let tool = add_tool();
        let response = tool
            .run("r-2", &json!({"A": 2, "B": 3}), CancellationToken::new())
            .await;
        assert!(response.is_success());
    }

    #[tokio::test]
    async fn case_conflicting_params_disable_folding() {
        let tool = FnTool::builder("conflict")
            .param(ParamSpec::required::<String>("value"))
            .param(ParamSpec::required::<String>("Value"))
            .handler(|args: Vec<Value>| {
                async move { Ok(ToolReturn::from(args[0].as_str().unwrap_or("").to_string())) }
                    .boxed()
            })
            .build(&SchemarsProvider)
            .unwrap();

        // Exact keys bind fine.
        let response = tool
            .run(
                "r-3",
                &json!({"value": "lower", "Value": "upper"}),
                CancellationToken::new(),
            )
            .await;
        assert!(response.is_success());

        // A differently cased key must not match either declared name.
        let response = tool
            .run(
                "r-4",
                &json!({"VALUE": "x", "Value": "upper"}),
                CancellationToken::new(),
            )
            .await;
        assert_eq!(response.status, ResponseStatus::Error);
        assert!(response.message.unwrap().contains("value"));
    }

    #[tokio::test]
    async fn request_id_param_is_injected_and_hidden() {
        let tool = FnTool::builder("whoami")
            .param(ParamSpec::request_id("request_id"))
            .handler(|args: Vec<Value>| {
                async move { Ok(ToolReturn::from(args[0].as_str().unwrap_or("").to_string())) }
                    .boxed()
            })
            .build(&SchemarsProvider)
            .unwrap();

        assert!(
            tool.descriptor().input_schema["properties"]
                .get("request_id")
                .is_none()
        );

        // Caller input for the marked parameter is ignored.
        let response = tool
            .run(
                "r-5",
                &json!({"request_id": "spoofed"}),
                CancellationToken::new(),
            )
            .await;
        match response.content.as_deref() {
            Some([crate::protocol::payload::ContentBlock::Text { text, .. }]) => {
                assert_eq!(text, "r-5")
            }
            other => panic!("expected one text block, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn missing_optional_takes_declared_default() {
        let tool = FnTool::builder("greet")
            .param(ParamSpec::required::<String>("who"))
            .param(ParamSpec::optional::<String>("greeting", json!("hello")))
            .handler(|args: Vec<Value>| {
                async move {
                    Ok(ToolReturn::from(format!(
                        "{} {}",
                        args[1].as_str().unwrap_or(""),
                        args[0].as_str().unwrap_or("")
                    )))
                }
                .boxed()
            })
            .build(&SchemarsProvider)
            .unwrap();

        let response = tool
            .run("r-6", &json!({"who": "world"}), CancellationToken::new())
            .await;
        match response.content.as_deref() {
            Some([crate::protocol::payload::ContentBlock::Text { text, .. }]) => {
                assert_eq!(text, "hello world")
            }
            other => panic!("unexpected content: {:?}", other),
        }
    }

    #[tokio::test]
    async fn positional_dispatch_checks_arity() {
        let tool = add_tool();
        let ok = tool
            .run("r-7", &json!([2, 3]), CancellationToken::new())
            .await;
        assert!(ok.is_success());

        let too_many = tool
            .run("r-8", &json!([1, 2, 3]), CancellationToken::new())
            .await;
        assert_eq!(too_many.status, ResponseStatus::Error);

        let too_few = tool.run("r-9", &json!([1]), CancellationToken::new()).await;
        assert_eq!(too_few.status, ResponseStatus::Error);
    }

    #[tokio::test]
    async fn structured_return_carries_mirrored_text_block() {
        let tool = FnTool::builder("stats")
            .handler(|_args: Vec<Value>| {
                async move { Ok(ToolReturn::from(json!({"count": 2}))) }.boxed()
            })
            .build(&SchemarsProvider)
            .unwrap();

        let response = tool.run("r-10", &json!({}), CancellationToken::new()).await;
        assert_eq!(response.structured, Some(json!({"count": 2})));
        assert!(response.content.is_some());
    }

    #[tokio::test]
    async fn handler_error_becomes_error_envelope() {
        let tool = FnTool::builder("boom")
            .handler(|_args: Vec<Value>| {
                async move { Err(anyhow::anyhow!("kaboom")) }.boxed()
            })
            .build(&SchemarsProvider)
            .unwrap();

        let response = tool.run("r-11", &json!({}), CancellationToken::new()).await;
        assert_eq!(response.status, ResponseStatus::Error);
        assert_eq!(response.message.as_deref(), Some("kaboom"));
        assert_eq!(response.request_id, "r-11");
    }

    #[tokio::test]
    async fn response_passthrough_is_stamped() {
        let tool = FnTool::builder("passthrough")
            .handler(|_args: Vec<Value>| {
                async move {
                    Ok(ToolReturn::from(CallResponse::success_text(
                        "stale", "done",
                    )))
                }
                .boxed()
            })
            .build(&SchemarsProvider)
            .unwrap();

        let response = tool.run("r-12", &json!({}), CancellationToken::new()).await;
        assert_eq!(response.request_id, "r-12");
    }

    #[test]
    fn token_cost_is_len_over_four_rounded_up() {
        let tool = add_tool();
        let descriptor = tool.descriptor();
        assert_eq!(
            descriptor.token_cost,
            Some(approx_token_cost(&descriptor))
        );
        assert!(descriptor.token_cost.unwrap() > 0);
    }

    #[tokio::test]
    async fn prompt_missing_required_argument_is_an_error() {
        let prompt = FnPrompt::new(
            "greet",
            None,
            None,
            vec![PromptArgumentDescriptor {
                name: "who".to_string(),
                description: None,
                required: true,
            }],
            |_args| {
                async move {
                    Ok(PromptPayload {
                        description: None,
                        messages: vec![],
                    })
                }
                .boxed()
            },
        );

        let response = prompt.get("r-13", None).await;
        assert_eq!(response.status, ResponseStatus::Error);
    }
}
