//! Wire codec for the plugin channel.
//!
//! Frames on the channel are JSON envelopes with a method name and a string
//! correlation id. Three envelope kinds exist: a unary request (expects a
//! reply), a response to a request, and a fire-and-forget notification
//! (either direction). The very first frame in each direction is a
//! `PerformVersionHandshake` request; the channel is open only after both
//! sides have validated the peer's `api_version`.

pub mod payload;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// Protocol version the bridge speaks. A peer reporting a different
/// `api_version` is rejected and its channel closed.
pub const PROTOCOL_VERSION: &str = "2.0.0";

/// Named methods carried on the plugin channel, in both directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RpcMethod {
    RunCallTool,
    RunListTool,
    RunGetPrompt,
    RunListPrompts,
    RunResourceContent,
    RunListResources,
    RunResourceTemplates,
    NotifyAboutUpdatedTools,
    NotifyAboutUpdatedPrompts,
    NotifyAboutUpdatedResources,
    NotifyToolRequestCompleted,
    PerformVersionHandshake,
}

impl RpcMethod {
    /// Wire name of the method, as used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            RpcMethod::RunCallTool => "RunCallTool",
            RpcMethod::RunListTool => "RunListTool",
            RpcMethod::RunGetPrompt => "RunGetPrompt",
            RpcMethod::RunListPrompts => "RunListPrompts",
            RpcMethod::RunResourceContent => "RunResourceContent",
            RpcMethod::RunListResources => "RunListResources",
            RpcMethod::RunResourceTemplates => "RunResourceTemplates",
            RpcMethod::NotifyAboutUpdatedTools => "NotifyAboutUpdatedTools",
            RpcMethod::NotifyAboutUpdatedPrompts => "NotifyAboutUpdatedPrompts",
            RpcMethod::NotifyAboutUpdatedResources => "NotifyAboutUpdatedResources",
            RpcMethod::NotifyToolRequestCompleted => "NotifyToolRequestCompleted",
            RpcMethod::PerformVersionHandshake => "PerformVersionHandshake",
        }
    }
}

/// One JSON frame on the plugin channel.
///
/// A received `Response` whose id does not match a pending correlation is
/// dropped with a warning; a `Request` is dispatched to the receiving
/// side's method handlers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "frame", rename_all = "camelCase")]
pub enum Frame {
    /// Unary request; the peer replies with a `Response` carrying the same id.
    #[serde(rename_all = "camelCase")]
    Request {
        id: String,
        method: RpcMethod,
        #[serde(default)]
        payload: Value,
    },
    /// Reply to a `Request`, correlated by id.
    #[serde(rename_all = "camelCase")]
    Response {
        id: String,
        #[serde(default)]
        payload: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// Fire-and-forget notification.
    #[serde(rename_all = "camelCase")]
    Notification {
        method: RpcMethod,
        #[serde(default)]
        payload: Value,
    },
}

impl Frame {
    /// Encode the frame to its wire form.
    pub fn encode(&self) -> Result<String, FrameError> {
        serde_json::to_string(self).map_err(|e| FrameError::Encode(e.to_string()))
    }

    /// Decode a frame from its wire form.
    pub fn decode(text: &str) -> Result<Self, FrameError> {
        serde_json::from_str(text).map_err(|e| FrameError::Decode(e.to_string()))
    }
}

/// Errors produced by the frame codec.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("failed to encode frame: {0}")]
    Encode(String),

    #[error("corrupt frame: {0}")]
    Decode(String),
}

/// Per-channel limits and timers. The defaults match the channel contract;
/// both sides may be configured tighter.
#[derive(Debug, Clone)]
pub struct ChannelLimits {
    /// Maximum size of a single received frame.
    pub max_frame_bytes: usize,
    /// Deadline for a unary call on the channel.
    pub call_timeout: Duration,
    /// Interval between keep-alive pings.
    pub keep_alive: Duration,
    /// How long a freshly opened channel may take to complete the handshake.
    pub handshake_deadline: Duration,
}

impl Default for ChannelLimits {
    fn default() -> Self {
        Self {
            max_frame_bytes: 256 * 1024 * 1024,
            call_timeout: Duration::from_secs(5 * 60),
            keep_alive: Duration::from_secs(30),
            handshake_deadline: Duration::from_secs(2 * 60),
        }
    }
}

/// Version handshake exchanged once at channel open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionHandshake {
    /// Channel protocol version; must match [`PROTOCOL_VERSION`] exactly.
    pub api_version: String,
    /// Version of the peer itself, informational.
    pub plugin_version: String,
    /// Free-form environment tag (host runtime, OS), informational.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
}

impl VersionHandshake {
    /// Handshake announcing this build.
    pub fn current() -> Self {
        Self {
            api_version: PROTOCOL_VERSION.to_string(),
            plugin_version: env!("CARGO_PKG_VERSION").to_string(),
            environment: Some(std::env::consts::OS.to_string()),
        }
    }

    /// Validate a peer's handshake against the local protocol version.
    pub fn validate(&self) -> Result<(), HandshakeError> {
        if self.api_version == PROTOCOL_VERSION {
            Ok(())
        } else {
            Err(HandshakeError::VersionMismatch {
                expected: PROTOCOL_VERSION.to_string(),
                got: self.api_version.clone(),
            })
        }
    }
}

/// Handshake failures. Fatal to the channel, never to the process.
#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("api version mismatch: expected {expected}, peer reports {got}")]
    VersionMismatch { expected: String, got: String },

    #[error("handshake deadline elapsed")]
    Deadline,

    #[error("expected a PerformVersionHandshake request, got {0}")]
    UnexpectedFrame(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_frame_round_trips() {
        let frame = Frame::Request {
            id: "r-1".to_string(),
            method: RpcMethod::RunCallTool,
            payload: json!({"name": "add"}),
        };
        let encoded = frame.encode().unwrap();
        assert!(encoded.contains("\"RunCallTool\""));
        match Frame::decode(&encoded).unwrap() {
            Frame::Request { id, method, payload } => {
                assert_eq!(id, "r-1");
                assert_eq!(method, RpcMethod::RunCallTool);
                assert_eq!(payload["name"], "add");
            }
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[test]
    fn response_frame_omits_absent_error() {
        let frame = Frame::Response {
            id: "r-2".to_string(),
            payload: Value::Null,
            error: None,
        };
        let encoded = frame.encode().unwrap();
        assert!(!encoded.contains("error"));
    }

    #[test]
    fn corrupt_frame_is_a_decode_error() {
        assert!(matches!(
            Frame::decode("{not json"),
            Err(FrameError::Decode(_))
        ));
    }

    #[test]
    fn handshake_validates_exact_version_only() {
        let mut hs = VersionHandshake::current();
        assert!(hs.validate().is_ok());

        hs.api_version = "1.0.0".to_string();
        let err = hs.validate().unwrap_err();
        assert!(matches!(err, HandshakeError::VersionMismatch { .. }));
    }

    #[test]
    fn method_names_match_wire_form() {
        let v = serde_json::to_value(RpcMethod::NotifyToolRequestCompleted).unwrap();
        assert_eq!(v, json!("NotifyToolRequestCompleted"));
        assert_eq!(
            RpcMethod::PerformVersionHandshake.as_str(),
            "PerformVersionHandshake"
        );
    }
}
