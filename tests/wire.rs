//! Wire-level checks: frame shapes, method names, envelope field casing,
//! and handshake version strictness.

use serde_json::json;
use trestle::protocol::payload::{CallResponse, ContentBlock, ResponseStatus};
use trestle::protocol::{Frame, PROTOCOL_VERSION, RpcMethod, VersionHandshake};

/// Channel methods are carried by their documented names.
#[test]
fn method_names_on_the_wire() {
    for (method, name) in [
        (RpcMethod::RunCallTool, "RunCallTool"),
        (RpcMethod::RunListTool, "RunListTool"),
        (RpcMethod::RunGetPrompt, "RunGetPrompt"),
        (RpcMethod::RunListPrompts, "RunListPrompts"),
        (RpcMethod::RunResourceContent, "RunResourceContent"),
        (RpcMethod::RunListResources, "RunListResources"),
        (RpcMethod::RunResourceTemplates, "RunResourceTemplates"),
        (RpcMethod::NotifyAboutUpdatedTools, "NotifyAboutUpdatedTools"),
        (
            RpcMethod::NotifyAboutUpdatedPrompts,
            "NotifyAboutUpdatedPrompts",
        ),
        (
            RpcMethod::NotifyAboutUpdatedResources,
            "NotifyAboutUpdatedResources",
        ),
        (
            RpcMethod::NotifyToolRequestCompleted,
            "NotifyToolRequestCompleted",
        ),
        (
            RpcMethod::PerformVersionHandshake,
            "PerformVersionHandshake",
        ),
    ] {
        assert_eq!(serde_json::to_value(method).unwrap(), json!(name));
    }
}

/// The response envelope serializes with camelCase keys and drops absent
/// optionals.
#[test]
fn envelope_field_casing() {
    let wire = serde_json::to_value(CallResponse::error("r-1", "nope")).unwrap();
    assert_eq!(wire["requestId"], "r-1");
    assert_eq!(wire["status"], "Error");
    assert_eq!(wire["message"], "nope");
    assert!(wire.get("value").is_none());
    assert!(wire.get("structured").is_none());
    assert!(wire.get("content").is_none());
}

/// A structured success carries both the JSON payload and its text
/// mirror, and survives a wire round trip.
#[test]
fn structured_success_round_trips() {
    let original = CallResponse::success_structured("r-2", json!({"sum": 5}));
    let wire = serde_json::to_string(&original).unwrap();
    let back: CallResponse = serde_json::from_str(&wire).unwrap();

    assert_eq!(back.status, ResponseStatus::Success);
    assert_eq!(back.structured, Some(json!({"sum": 5})));
    match back.content.as_deref() {
        Some([ContentBlock::Text { text, .. }]) => {
            assert_eq!(
                serde_json::from_str::<serde_json::Value>(text).unwrap(),
                json!({"sum": 5})
            );
        }
        other => panic!("expected one text block, got {:?}", other),
    }
}

/// Binary content blocks keep their payloads through encode/decode.
#[test]
fn binary_blocks_round_trip() {
    let blocks = vec![
        ContentBlock::Image {
            data: "aW1hZ2U=".to_string(),
            mime_type: "image/png".to_string(),
        },
        ContentBlock::Audio {
            data: "YXVkaW8=".to_string(),
            mime_type: "audio/mpeg".to_string(),
        },
    ];
    let wire = serde_json::to_string(&blocks).unwrap();
    assert!(wire.contains("\"mimeType\":\"image/png\""));
    let back: Vec<ContentBlock> = serde_json::from_str(&wire).unwrap();
    assert_eq!(back, blocks);
}

/// Handshake frames decode into the version structure and mismatched
/// versions are rejected.
#[test]
fn handshake_version_is_strict() {
    let frame = Frame::Request {
        id: "hs-1".to_string(),
        method: RpcMethod::PerformVersionHandshake,
        payload: json!({
            "apiVersion": PROTOCOL_VERSION,
            "pluginVersion": "9.9.9",
            "environment": "linux"
        }),
    };
    let encoded = frame.encode().unwrap();
    let Frame::Request { payload, .. } = Frame::decode(&encoded).unwrap() else {
        panic!("expected request frame");
    };
    let handshake: VersionHandshake = serde_json::from_value(payload).unwrap();
    assert!(handshake.validate().is_ok());

    let stale = VersionHandshake {
        api_version: "1.0.0".to_string(),
        plugin_version: "9.9.9".to_string(),
        environment: None,
    };
    let err = stale.validate().unwrap_err();
    assert!(err.to_string().contains("1.0.0"));
    assert!(err.to_string().contains(PROTOCOL_VERSION));
}
