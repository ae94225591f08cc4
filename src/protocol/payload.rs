//! Typed payloads carried inside plugin-channel frames.
//!
//! Every reply on the channel is a [`CallResponse`] envelope. List replies
//! put their descriptor collections in `value`; tool-call replies use the
//! `content`/`structured` fields. Descriptors are the bridge-side view of a
//! plugin's catalog; the MCP handlers translate them into SDK model types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outcome classification of a plugin-channel call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseStatus {
    /// The call completed and the payload is authoritative.
    Success,
    /// The call failed; `message` describes why.
    Error,
    /// The call was accepted but will complete out-of-band via
    /// `NotifyToolRequestCompleted`.
    Processing,
    /// The caller's cancellation fired before completion.
    Cancel,
}

/// Response envelope used across both the plugin channel and the MCP
/// handler layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallResponse {
    /// Correlation id of the originating request.
    pub request_id: String,
    pub status: ResponseStatus,
    /// Human-readable diagnostic, present on `Error` and `Cancel`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Typed payload for list replies and plain value results.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    /// Structured JSON result of a tool call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured: Option<Value>,
    /// Content blocks of a tool call or prompt message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Vec<ContentBlock>>,
}

impl CallResponse {
    /// Success carrying a single text content block.
    pub fn success_text(request_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            status: ResponseStatus::Success,
            message: None,
            value: None,
            structured: None,
            content: Some(vec![ContentBlock::text(text)]),
        }
    }

    /// Success carrying a structured JSON payload. The serialized JSON is
    /// mirrored into a text content block so clients that predate
    /// structured content still see the result.
    pub fn success_structured(request_id: impl Into<String>, structured: Value) -> Self {
        let mirror = structured.to_string();
        Self {
            request_id: request_id.into(),
            status: ResponseStatus::Success,
            message: None,
            value: None,
            structured: Some(structured),
            content: Some(vec![ContentBlock::text(mirror)]),
        }
    }

    /// Success carrying a typed value (list replies).
    pub fn success_value(request_id: impl Into<String>, value: Value) -> Self {
        Self {
            request_id: request_id.into(),
            status: ResponseStatus::Success,
            message: None,
            value: Some(value),
            structured: None,
            content: None,
        }
    }

    /// Failure with a diagnostic message.
    pub fn error(request_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            status: ResponseStatus::Error,
            message: Some(message.into()),
            value: None,
            structured: None,
            content: None,
        }
    }

    /// Cancellation outcome.
    pub fn cancelled(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            status: ResponseStatus::Cancel,
            message: Some("operation was cancelled".to_string()),
            value: None,
            structured: None,
            content: None,
        }
    }

    /// Acceptance of a call that completes out-of-band later.
    pub fn processing(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            status: ResponseStatus::Processing,
            message: None,
            value: None,
            structured: None,
            content: None,
        }
    }

    /// Overwrite the request id, used when passing an envelope built by
    /// plugin code through the dispatch layer.
    pub fn stamp(mut self, request_id: &str) -> Self {
        self.request_id = request_id.to_string();
        self
    }

    /// Deserialize the typed `value` field.
    pub fn value_as<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.value.clone().unwrap_or(Value::Null))
    }

    pub fn is_success(&self) -> bool {
        self.status == ResponseStatus::Success
    }
}

/// One block of content in a tool or prompt result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ContentBlock {
    #[serde(rename_all = "camelCase")]
    Text {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
    },
    /// Base64 image payload.
    #[serde(rename_all = "camelCase")]
    Image { data: String, mime_type: String },
    /// Base64 audio payload.
    #[serde(rename_all = "camelCase")]
    Audio { data: String, mime_type: String },
    #[serde(rename_all = "camelCase")]
    Resource { resource: ResourceData },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        ContentBlock::Text {
            text: text.into(),
            mime_type: None,
        }
    }

    /// Image block from raw bytes, base64-encoded for the wire.
    pub fn image_bytes(bytes: &[u8], mime_type: impl Into<String>) -> Self {
        use base64::{Engine as _, engine::general_purpose::STANDARD};
        ContentBlock::Image {
            data: STANDARD.encode(bytes),
            mime_type: mime_type.into(),
        }
    }

    /// Audio block from raw bytes, base64-encoded for the wire.
    pub fn audio_bytes(bytes: &[u8], mime_type: impl Into<String>) -> Self {
        use base64::{Engine as _, engine::general_purpose::STANDARD};
        ContentBlock::Audio {
            data: STANDARD.encode(bytes),
            mime_type: mime_type.into(),
        }
    }
}

/// Contents of a URI-addressable resource: text or a base64 blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceData {
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blob: Option<String>,
}

impl ResourceData {
    pub fn text(uri: impl Into<String>, mime_type: Option<String>, text: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            mime_type,
            text: Some(text.into()),
            blob: None,
        }
    }

    pub fn blob(uri: impl Into<String>, mime_type: Option<String>, blob: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            mime_type,
            text: None,
            blob: Some(blob.into()),
        }
    }

    /// Blob contents from raw bytes, base64-encoded for the wire.
    pub fn blob_bytes(uri: impl Into<String>, mime_type: Option<String>, bytes: &[u8]) -> Self {
        use base64::{Engine as _, engine::general_purpose::STANDARD};
        Self::blob(uri, mime_type, STANDARD.encode(bytes))
    }
}

fn enabled_default() -> bool {
    true
}

/// A callable tool as described by its plugin.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub input_schema: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<Value>,
    #[serde(default = "enabled_default")]
    pub enabled: bool,
    /// Approximate token footprint of the descriptor itself.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_cost: Option<u64>,
}

/// A templated prompt as described by its plugin.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptDescriptor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub arguments: Vec<PromptArgumentDescriptor>,
    #[serde(default = "enabled_default")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptArgumentDescriptor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub required: bool,
}

/// A readable resource as described by its plugin.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDescriptor {
    pub uri: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default = "enabled_default")]
    pub enabled: bool,
}

/// A parameterized resource URI as described by its plugin.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceTemplateDescriptor {
    pub uri_template: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// Rendered prompt: an optional description plus ordered messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub messages: Vec<PromptMessageDescriptor>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptMessageDescriptor {
    pub role: PromptRole,
    pub content: ContentBlock,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptRole {
    User,
    Assistant,
}

/// Request payload for `RunCallTool`. `arguments` is a JSON object for
/// named dispatch or an array for positional dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallToolRequest {
    pub request_id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

/// Request payload for `RunGetPrompt`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetPromptRequest {
    pub request_id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<serde_json::Map<String, Value>>,
}

/// Request payload for `RunResourceContent`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadResourceRequest {
    pub request_id: String,
    pub uri: String,
}
