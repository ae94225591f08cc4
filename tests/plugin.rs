//! Host-side registrar flow: build a plugin from typed registrations and
//! exercise its catalog the way the channel dispatch does.

use futures::FutureExt;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use trestle::plugin::McpPluginBuilder;
use trestle::plugin::channel::ChannelConfig;
use trestle::plugin::invoker::{FnResource, FnTool, ParamSpec, ToolReturn};
use trestle::protocol::payload::{ContentBlock, ResourceData, ResponseStatus};

fn build_demo_plugin() -> std::sync::Arc<trestle::plugin::McpPlugin> {
    McpPluginBuilder::new(ChannelConfig::local_url(8080))
        .tool(
            FnTool::builder("add")
                .title("Add")
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
                }),
        )
        .unwrap()
        .resource(FnResource::new(
            "demo://motd",
            "motd",
            None,
            Some("Message of the day.".to_string()),
            Some("text/plain".to_string()),
            |uri| {
                async move {
                    Ok(vec![ResourceData::text(
                        uri,
                        Some("text/plain".to_string()),
                        "hello",
                    )])
                }
                .boxed()
            },
        ))
        .build_detached()
}

/// The happy tool call: named arguments, text result equal to the sum,
/// request id stamped through.
#[tokio::test]
async fn add_tool_returns_text_five() {
    let plugin = build_demo_plugin();
    let tool = plugin.catalog().tool("add").unwrap();

    let response = tool
        .run("req-add", &json!({"a": 2, "b": 3}), CancellationToken::new())
        .await;

    assert_eq!(response.status, ResponseStatus::Success);
    assert_eq!(response.request_id, "req-add");
    match response.content.as_deref() {
        Some([ContentBlock::Text { text, .. }]) => assert_eq!(text, "5"),
        other => panic!("expected one text block, got {:?}", other),
    }
}

/// Descriptors expose generated schemas and the token-cost estimate.
#[tokio::test]
async fn descriptors_carry_schema_and_token_cost() {
    let plugin = build_demo_plugin();
    let tools = plugin.catalog().list_tools();
    assert_eq!(tools.len(), 1);

    let add = &tools[0];
    assert_eq!(add.input_schema["type"], "object");
    assert!(add.input_schema["properties"].get("a").is_some());
    assert!(add.token_cost.unwrap() > 0);

    let resources = plugin.catalog().list_resources();
    assert_eq!(resources[0].uri, "demo://motd");
}

/// Disabling an entry flips its descriptor flag; the bridge filters on it
/// and the dispatch path refuses the call.
#[tokio::test]
async fn disabled_entries_are_flagged_and_refused() {
    let plugin = build_demo_plugin();
    assert!(plugin.catalog().set_tool_enabled("add", false));
    assert!(!plugin.catalog().list_tools()[0].enabled);

    let tool = plugin.catalog().tool("add").unwrap();
    assert!(!tool.enabled());

    assert!(plugin.catalog().set_resource_enabled("demo://motd", false));
    assert!(!plugin.catalog().list_resources()[0].enabled);
}

/// A detached plugin has no live channel: it reports `Disconnected` and
/// out-of-band completions fail rather than queue forever.
#[tokio::test]
async fn detached_channel_rejects_notifications() {
    use trestle::plugin::channel::ChannelState;
    use trestle::protocol::payload::CallResponse;

    let plugin = build_demo_plugin();
    assert_eq!(plugin.channel().state(), ChannelState::Disconnected);

    let result = plugin
        .complete_tool_request(CallResponse::success_text("req-x", "late"))
        .await;
    assert!(result.is_err());
}

/// Resource reads come back as contents for the requested URI.
#[tokio::test]
async fn resource_read_returns_contents() {
    let plugin = build_demo_plugin();
    let resource = plugin.catalog().resource("demo://motd").unwrap();

    let response = resource.read("req-res", "demo://motd").await;
    assert_eq!(response.status, ResponseStatus::Success);
    let contents: Vec<ResourceData> = response.value_as().unwrap();
    assert_eq!(contents[0].text.as_deref(), Some("hello"));
}
