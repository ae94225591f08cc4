//! Out-of-band tool completion: a plugin answers `Processing` on the RPC
//! path and delivers the final result later through the completion
//! notification. The caller sees exactly one result.

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use trestle::config::DeploymentMode;
use trestle::hub::connection::PluginLink;
use trestle::protocol::payload::{CallResponse, ContentBlock, ResponseStatus};
use trestle::protocol::{Frame, RpcMethod};
use trestle::registry::{ConnectionRegistry, HubKind, PluginConnection};
use trestle::router::PluginRouter;
use trestle::strategy::strategy_for;
use trestle::tracking::RequestTracker;

/// A plugin that acknowledges tool calls with `Processing` and completes
/// them out-of-band shortly after, as a long-running host would.
fn connect_deferred_plugin(
    registry: &Arc<ConnectionRegistry>,
    tracker: Arc<RequestTracker>,
    request_id: &str,
    body: &str,
) {
    let (tx, mut rx) = mpsc::channel(16);
    let link = Arc::new(PluginLink::new("deferred", tx));
    registry.add(PluginConnection {
        id: "deferred".to_string(),
        hub: HubKind::McpServer,
        token: None,
        connected_at: chrono::Utc::now(),
        link: link.clone(),
    });

    let request_id = request_id.to_string();
    let body = body.to_string();
    let responder = link.clone();
    tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if let Frame::Request { id, .. } = frame {
                let ack = CallResponse::processing(&request_id);
                responder.complete(&id, Ok(serde_json::to_value(ack).unwrap()));

                // The host finishes the work after the RPC path returned.
                let tracker = tracker.clone();
                let request_id = request_id.clone();
                let body = body.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(1_200)).await;
                    tracker.complete_externally(
                        &request_id,
                        CallResponse::success_text(&request_id, body),
                    );
                });
            }
        }
    });
}

#[tokio::test(start_paused = true)]
async fn processing_then_notification_yields_single_success() {
    let registry = Arc::new(ConnectionRegistry::new());
    let tracker = Arc::new(RequestTracker::new());
    let request_id = "req-oob";
    connect_deferred_plugin(&registry, tracker.clone(), request_id, "done");

    let router = PluginRouter::new(
        registry,
        strategy_for(DeploymentMode::Local),
        Some(Duration::from_secs(10)),
    );
    let ct = CancellationToken::new();
    let produce = router.invoke(
        HubKind::McpServer,
        RpcMethod::RunCallTool,
        Value::Null,
        request_id,
        None,
        &ct,
    );

    let response = tracker
        .track(request_id, produce, Duration::from_secs(300), &ct)
        .await;

    assert_eq!(response.status, ResponseStatus::Success);
    match response.content.as_deref() {
        Some([ContentBlock::Text { text, .. }]) => assert_eq!(text, "done"),
        other => panic!("expected one text block, got {:?}", other),
    }

    // A duplicate completion after resolution is discarded.
    assert!(!tracker.complete_externally(
        request_id,
        CallResponse::success_text(request_id, "duplicate")
    ));
}

/// When the host never completes the request, the tracking window ends in
/// a timeout error rather than hanging the caller.
#[tokio::test(start_paused = true)]
async fn unfinished_processing_times_out() {
    let tracker = RequestTracker::new();
    let response = tracker
        .track(
            "req-slow",
            async { CallResponse::processing("req-slow") },
            Duration::from_secs(300),
            &CancellationToken::new(),
        )
        .await;

    assert_eq!(response.status, ResponseStatus::Error);
    assert!(response.message.unwrap().contains("timed out"));
}
