//! Per-plugin channel handle used by the bridge side.
//!
//! A [`PluginLink`] fronts one connected plugin: outbound frames go through
//! a serial send queue, and unary calls are correlated back to their caller
//! through a pending-id map. The socket task owns the actual WebSocket; the
//! link only sees frames.

use crate::protocol::{Frame, RpcMethod};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

/// Errors surfaced to callers of [`PluginLink::call`].
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("call timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("channel closed: {0}")]
    Closed(String),

    #[error("call cancelled")]
    Cancelled,

    #[error("peer reported an error: {0}")]
    Remote(String),
}

/// Handle to one live plugin connection.
#[derive(Debug)]
pub struct PluginLink {
    id: String,
    out_tx: mpsc::Sender<Frame>,
    pending: Mutex<HashMap<String, oneshot::Sender<Result<Value, String>>>>,
    closed: CancellationToken,
}

impl PluginLink {
    /// Create a link whose outbound frames drain into `out_tx`. The socket
    /// task that owns the receiving half is responsible for calling
    /// [`PluginLink::close`] when the channel drops.
    pub fn new(id: impl Into<String>, out_tx: mpsc::Sender<Frame>) -> Self {
        Self {
            id: id.into(),
            out_tx,
            pending: Mutex::new(HashMap::new()),
            closed: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Token cancelled when the underlying channel drops.
    pub fn closed_token(&self) -> CancellationToken {
        self.closed.clone()
    }

    /// Invoke a method on the plugin and await its reply.
    ///
    /// `timeout` of `None` means no per-call deadline; the channel's own
    /// teardown still fails the call. Cancellation of `ct` abandons the
    /// wait and removes the pending slot.
    pub async fn call(
        &self,
        method: RpcMethod,
        payload: Value,
        timeout: Option<std::time::Duration>,
        ct: &CancellationToken,
    ) -> Result<Value, LinkError> {
        if self.is_closed() {
            return Err(LinkError::Closed("link is closed".to_string()));
        }

        let id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().expect("pending map poisoned");
            pending.insert(id.clone(), tx);
        }

        let frame = Frame::Request {
            id: id.clone(),
            method,
            payload,
        };
        if self.out_tx.send(frame).await.is_err() {
            self.take_pending(&id);
            return Err(LinkError::Closed("send queue dropped".to_string()));
        }

        let wait = async {
            match rx.await {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(message)) => Err(LinkError::Remote(message)),
                Err(_) => Err(LinkError::Closed("channel dropped mid-call".to_string())),
            }
        };

        let result = match timeout {
            Some(deadline) => tokio::select! {
                r = wait => r,
                _ = tokio::time::sleep(deadline) => Err(LinkError::Timeout(deadline)),
                _ = ct.cancelled() => Err(LinkError::Cancelled),
                _ = self.closed.cancelled() => {
                    Err(LinkError::Closed("channel closed".to_string()))
                }
            },
            None => tokio::select! {
                r = wait => r,
                _ = ct.cancelled() => Err(LinkError::Cancelled),
                _ = self.closed.cancelled() => {
                    Err(LinkError::Closed("channel closed".to_string()))
                }
            },
        };

        if result.is_err() {
            self.take_pending(&id);
        }
        result
    }

    /// Queue an arbitrary frame. Used by the socket task for protocol
    /// error replies that carry no pending correlation.
    pub async fn notify_raw(&self, frame: Frame) -> Result<(), LinkError> {
        if self.is_closed() {
            return Err(LinkError::Closed("link is closed".to_string()));
        }
        self.out_tx
            .send(frame)
            .await
            .map_err(|_| LinkError::Closed("send queue dropped".to_string()))
    }

    /// Complete a pending call from an inbound `Response` frame. Unknown
    /// ids are reported so the socket task can log them.
    pub fn complete(&self, id: &str, result: Result<Value, String>) -> bool {
        match self.take_pending(id) {
            Some(tx) => {
                let _ = tx.send(result);
                true
            }
            None => false,
        }
    }

    /// Mark the link closed and fail every in-flight call.
    pub fn close(&self) {
        self.closed.cancel();
        let drained: Vec<_> = {
            let mut pending = self.pending.lock().expect("pending map poisoned");
            pending.drain().collect()
        };
        for (_, tx) in drained {
            let _ = tx.send(Err("channel closed".to_string()));
        }
    }

    fn take_pending(&self, id: &str) -> Option<oneshot::Sender<Result<Value, String>>> {
        self.pending.lock().expect("pending map poisoned").remove(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn call_completes_from_response() {
        let (tx, mut rx) = mpsc::channel(8);
        let link = std::sync::Arc::new(PluginLink::new("c-1", tx));

        let caller = {
            let link = link.clone();
            tokio::spawn(async move {
                link.call(
                    RpcMethod::RunListTool,
                    Value::Null,
                    Some(std::time::Duration::from_secs(5)),
                    &CancellationToken::new(),
                )
                .await
            })
        };

        // The socket task would see the request and route the reply back.
        let frame = rx.recv().await.expect("request frame");
        let id = match frame {
            Frame::Request { id, method, .. } => {
                assert_eq!(method, RpcMethod::RunListTool);
                id
            }
            other => panic!("unexpected frame: {:?}", other),
        };
        assert!(link.complete(&id, Ok(json!({"ok": true}))));

        let value = caller.await.unwrap().unwrap();
        assert_eq!(value["ok"], true);
    }

    #[tokio::test]
    async fn close_fails_pending_calls() {
        let (tx, _rx) = mpsc::channel(8);
        let link = std::sync::Arc::new(PluginLink::new("c-2", tx));

        let caller = {
            let link = link.clone();
            tokio::spawn(async move {
                link.call(
                    RpcMethod::RunListTool,
                    Value::Null,
                    None,
                    &CancellationToken::new(),
                )
                .await
            })
        };

        tokio::task::yield_now().await;
        link.close();

        assert!(matches!(caller.await.unwrap(), Err(LinkError::Closed(_))));
        assert!(link.is_closed());
    }

    #[tokio::test]
    async fn completing_unknown_id_is_reported() {
        let (tx, _rx) = mpsc::channel(1);
        let link = PluginLink::new("c-3", tx);
        assert!(!link.complete("nope", Ok(Value::Null)));
    }

    #[tokio::test]
    async fn cancellation_short_circuits_call() {
        let (tx, _rx) = mpsc::channel(8);
        let link = PluginLink::new("c-4", tx);
        let ct = CancellationToken::new();
        ct.cancel();

        let err = link
            .call(RpcMethod::RunListTool, Value::Null, None, &ct)
            .await
            .unwrap_err();
        assert!(matches!(err, LinkError::Cancelled));
    }
}
