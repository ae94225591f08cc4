//! In-flight request tracking.
//!
//! A tracked request has two completion sources: the RPC reply returned by
//! the produce future, and an out-of-band `NotifyToolRequestCompleted`
//! notification routed through [`RequestTracker::complete_externally`].
//! Whichever arrives first wins; the loser is discarded. A `Processing`
//! reply from the produce path arms the out-of-band wait instead of
//! resolving the request.

use crate::protocol::payload::{CallResponse, ResponseStatus};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Window during which an accepted (`Processing`) tool call may still be
/// completed by a plugin notification. Independent of the per-call RPC
/// deadline; extended when the configured per-call timeout is longer.
pub const OUT_OF_BAND_WINDOW: Duration = Duration::from_secs(5 * 60);

/// Process-wide map of request id to pending completion slot.
#[derive(Debug, Default)]
pub struct RequestTracker {
    pending: Mutex<HashMap<String, oneshot::Sender<CallResponse>>>,
}

impl RequestTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `request_id` while `produce` runs.
    ///
    /// Resolution order: the first of produce-result, external completion,
    /// timeout, or cancellation wins. A produce result with status
    /// `Processing` does not resolve the request; it leaves the slot armed
    /// for the external path. Each request id resolves exactly once; the
    /// slot is removed on every exit path.
    pub async fn track<F>(
        &self,
        request_id: &str,
        produce: F,
        window: Duration,
        ct: &CancellationToken,
    ) -> CallResponse
    where
        F: Future<Output = CallResponse>,
    {
        let (tx, rx) = oneshot::channel();
        // On a duplicate id the first slot stays authoritative; the local
        // sender is parked so this rx never fires early.
        let parked_tx = {
            let mut pending = self.pending.lock().expect("pending map poisoned");
            if pending.contains_key(request_id) {
                warn!(request_id, "request id already tracked, keeping first slot");
                Some(tx)
            } else {
                pending.insert(request_id.to_string(), tx);
                None
            }
        };

        let deadline = tokio::time::sleep(window);
        tokio::pin!(deadline);
        tokio::pin!(produce);
        tokio::pin!(rx);

        let first = tokio::select! {
            response = &mut produce => {
                if response.status == ResponseStatus::Processing {
                    debug!(request_id, "call accepted, awaiting out-of-band completion");
                    None
                } else {
                    Some(response)
                }
            }
            external = &mut rx => Some(Self::external_or_closed(request_id, external)),
            _ = &mut deadline => Some(Self::timed_out(request_id, window)),
            _ = ct.cancelled() => Some(CallResponse::cancelled(request_id)),
        };

        let resolved = match first {
            Some(response) => response,
            // The produce path yielded Processing; only the external path,
            // the window, or cancellation can resolve now.
            None => tokio::select! {
                external = &mut rx => Self::external_or_closed(request_id, external),
                _ = &mut deadline => Self::timed_out(request_id, window),
                _ = ct.cancelled() => CallResponse::cancelled(request_id),
            },
        };

        if parked_tx.is_none() {
            self.pending
                .lock()
                .expect("pending map poisoned")
                .remove(request_id);
        }
        resolved
    }

    /// Resolve a tracked request from the notification pipeline.
    ///
    /// Returns whether a slot was completed. Unknown ids are a silent
    /// no-op: the request may already have resolved through the RPC path.
    pub fn complete_externally(&self, request_id: &str, response: CallResponse) -> bool {
        let slot = {
            let mut pending = self.pending.lock().expect("pending map poisoned");
            pending.remove(request_id)
        };
        match slot {
            Some(tx) => {
                debug!(request_id, "request completed out-of-band");
                tx.send(response).is_ok()
            }
            None => {
                debug!(request_id, "out-of-band completion for unknown request, ignoring");
                false
            }
        }
    }

    /// Number of currently tracked requests.
    pub fn in_flight(&self) -> usize {
        self.pending.lock().expect("pending map poisoned").len()
    }

    fn external_or_closed(
        request_id: &str,
        external: Result<CallResponse, oneshot::error::RecvError>,
    ) -> CallResponse {
        external.unwrap_or_else(|_| {
            CallResponse::error(request_id, "completion channel dropped before resolution")
        })
    }

    fn timed_out(request_id: &str, window: Duration) -> CallResponse {
        CallResponse::error(
            request_id,
            format!("request timed out after {} ms", window.as_millis()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn direct_completion_wins() {
        let tracker = RequestTracker::new();
        let response = tracker
            .track(
                "r-1",
                async { CallResponse::success_text("r-1", "done") },
                Duration::from_secs(5),
                &CancellationToken::new(),
            )
            .await;

        assert!(response.is_success());
        assert_eq!(tracker.in_flight(), 0);
    }

    #[tokio::test]
    async fn processing_result_waits_for_external_completion() {
        let tracker = Arc::new(RequestTracker::new());

        let completer = {
            let tracker = tracker.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                tracker.complete_externally("r-2", CallResponse::success_text("r-2", "done"))
            })
        };

        let response = tracker
            .track(
                "r-2",
                async { CallResponse::processing("r-2") },
                Duration::from_secs(5),
                &CancellationToken::new(),
            )
            .await;

        assert!(response.is_success());
        assert_eq!(
            response.content.as_deref().map(|c| c.len()),
            Some(1),
            "external payload must carry through"
        );
        assert!(completer.await.unwrap());
    }

    #[tokio::test]
    async fn window_elapse_resolves_to_timeout_error() {
        let tracker = RequestTracker::new();
        let response = tracker
            .track(
                "r-3",
                async { CallResponse::processing("r-3") },
                Duration::from_millis(10),
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(response.status, ResponseStatus::Error);
        assert!(response.message.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn cancellation_resolves_to_cancel_status() {
        let tracker = RequestTracker::new();
        let ct = CancellationToken::new();
        ct.cancel();

        let response = tracker
            .track(
                "r-4",
                std::future::pending::<CallResponse>(),
                Duration::from_secs(5),
                &ct,
            )
            .await;

        assert_eq!(response.status, ResponseStatus::Cancel);
    }

    #[tokio::test]
    async fn repeated_external_completion_is_discarded() {
        let tracker = Arc::new(RequestTracker::new());

        let completer = {
            let tracker = tracker.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                let first =
                    tracker.complete_externally("r-5", CallResponse::success_text("r-5", "one"));
                let second =
                    tracker.complete_externally("r-5", CallResponse::success_text("r-5", "two"));
                (first, second)
            })
        };

        let response = tracker
            .track(
                "r-5",
                async { CallResponse::processing("r-5") },
                Duration::from_secs(5),
                &CancellationToken::new(),
            )
            .await;

        assert!(response.is_success());
        let (first, second) = completer.await.unwrap();
        assert!(first);
        assert!(!second, "second completion must be a no-op");
    }

    #[tokio::test]
    async fn unknown_id_completion_is_a_no_op() {
        let tracker = RequestTracker::new();
        assert!(!tracker.complete_externally("ghost", CallResponse::success_text("ghost", "x")));
    }
}
