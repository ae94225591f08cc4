//! Mapping between wire descriptors and rmcp model types.
//!
//! Tools are constructed directly; the remaining model types are built
//! from MCP-shaped JSON and deserialized, which keeps the mapping stable
//! against additive SDK model changes.

use crate::protocol::payload::{
    CallResponse, ContentBlock, PromptDescriptor, PromptPayload, ResourceData,
    ResourceDescriptor, ResourceTemplateDescriptor, ToolDescriptor,
};
use rmcp::ErrorData;
use rmcp::model::{self, Tool};
use serde_json::{Map, Value, json};
use std::borrow::Cow;
use std::sync::Arc;

fn schema_object(schema: &Value) -> Arc<Map<String, Value>> {
    match schema {
        Value::Object(map) => Arc::new(map.clone()),
        _ => Arc::new(Map::new()),
    }
}

/// Tool descriptor to rmcp `Tool`.
pub fn tool(descriptor: &ToolDescriptor) -> Tool {
    Tool {
        name: Cow::Owned(descriptor.name.clone()),
        title: descriptor.title.clone(),
        description: descriptor.description.clone().map(Cow::Owned),
        input_schema: schema_object(&descriptor.input_schema),
        output_schema: descriptor.output_schema.as_ref().map(|s| schema_object(s)),
        annotations: None,
        icons: None,
    }
}

fn from_model_json<T: serde::de::DeserializeOwned>(value: Value, what: &str) -> Result<T, ErrorData> {
    serde_json::from_value(value)
        .map_err(|e| ErrorData::internal_error(format!("invalid {} shape: {}", what, e), None))
}

/// Prompt descriptor to rmcp `Prompt`.
pub fn prompt(descriptor: &PromptDescriptor) -> Result<model::Prompt, ErrorData> {
    let arguments: Vec<Value> = descriptor
        .arguments
        .iter()
        .map(|a| {
            json!({
                "name": a.name,
                "description": a.description,
                "required": a.required,
            })
        })
        .collect();
    from_model_json(
        json!({
            "name": descriptor.name,
            "title": descriptor.title,
            "description": descriptor.description,
            "arguments": arguments,
        }),
        "prompt",
    )
}

/// Resource descriptor to rmcp `Resource`.
pub fn resource(descriptor: &ResourceDescriptor) -> Result<model::Resource, ErrorData> {
    from_model_json(
        json!({
            "uri": descriptor.uri,
            "name": descriptor.name,
            "title": descriptor.title,
            "description": descriptor.description,
            "mimeType": descriptor.mime_type,
        }),
        "resource",
    )
}

/// Resource template descriptor to rmcp `ResourceTemplate`.
pub fn resource_template(
    descriptor: &ResourceTemplateDescriptor,
) -> Result<model::ResourceTemplate, ErrorData> {
    from_model_json(
        json!({
            "uriTemplate": descriptor.uri_template,
            "name": descriptor.name,
            "title": descriptor.title,
            "description": descriptor.description,
            "mimeType": descriptor.mime_type,
        }),
        "resource template",
    )
}

fn content_block_json(block: &ContentBlock) -> Value {
    match block {
        ContentBlock::Text { text, .. } => json!({"type": "text", "text": text}),
        ContentBlock::Image { data, mime_type } => {
            json!({"type": "image", "data": data, "mimeType": mime_type})
        }
        ContentBlock::Audio { data, mime_type } => {
            json!({"type": "audio", "data": data, "mimeType": mime_type})
        }
        ContentBlock::Resource { resource } => {
            json!({"type": "resource", "resource": resource_contents_json(resource)})
        }
    }
}

fn resource_contents_json(data: &ResourceData) -> Value {
    match (&data.text, &data.blob) {
        (Some(text), _) => json!({
            "uri": data.uri,
            "mimeType": data.mime_type,
            "text": text,
        }),
        (None, Some(blob)) => json!({
            "uri": data.uri,
            "mimeType": data.mime_type,
            "blob": blob,
        }),
        (None, None) => json!({
            "uri": data.uri,
            "mimeType": data.mime_type,
            "text": "",
        }),
    }
}

/// Wire content blocks to rmcp `Content` values.
pub fn contents(blocks: &[ContentBlock]) -> Result<Vec<model::Content>, ErrorData> {
    blocks
        .iter()
        .map(|b| from_model_json(content_block_json(b), "content block"))
        .collect()
}

/// A tool-call envelope to the rmcp `CallToolResult`.
///
/// `Error` and `Cancel` envelopes become error results with a descriptive
/// text block; the session survives. A structured payload keeps its
/// mirrored text block from the envelope.
pub fn call_tool_result(response: &CallResponse) -> Result<model::CallToolResult, ErrorData> {
    use crate::protocol::payload::ResponseStatus;

    match response.status {
        ResponseStatus::Success => {
            let blocks = response.content.clone().unwrap_or_default();
            Ok(model::CallToolResult {
                content: contents(&blocks)?,
                is_error: Some(false),
                meta: None,
                structured_content: response.structured.clone(),
            })
        }
        ResponseStatus::Error | ResponseStatus::Processing => {
            let message = response
                .message
                .clone()
                .unwrap_or_else(|| "tool call failed".to_string());
            Ok(error_result(message))
        }
        ResponseStatus::Cancel => Ok(error_result(
            response
                .message
                .clone()
                .unwrap_or_else(|| "tool call was cancelled".to_string()),
        )),
    }
}

/// A well-formed MCP error result with a single text block.
pub fn error_result(message: impl Into<String>) -> model::CallToolResult {
    model::CallToolResult {
        content: vec![model::Content {
            raw: model::RawContent::Text(model::RawTextContent {
                text: message.into(),
                meta: None,
            }),
            annotations: None,
        }],
        is_error: Some(true),
        meta: None,
        structured_content: None,
    }
}

/// A prompt payload to the rmcp `GetPromptResult`.
pub fn get_prompt_result(payload: &PromptPayload) -> Result<model::GetPromptResult, ErrorData> {
    let messages: Vec<Value> = payload
        .messages
        .iter()
        .map(|m| {
            json!({
                "role": match m.role {
                    crate::protocol::payload::PromptRole::User => "user",
                    crate::protocol::payload::PromptRole::Assistant => "assistant",
                },
                "content": content_block_json(&m.content),
            })
        })
        .collect();
    from_model_json(
        json!({
            "description": payload.description,
            "messages": messages,
        }),
        "prompt result",
    )
}

/// Resource contents to the rmcp `ReadResourceResult`.
pub fn read_resource_result(
    contents: &[ResourceData],
) -> Result<model::ReadResourceResult, ErrorData> {
    let items: Vec<Value> = contents.iter().map(resource_contents_json).collect();
    from_model_json(json!({ "contents": items }), "resource contents")
}
