//! Plugin request router.
//!
//! Single entry point for invoking a method on whichever plugin the
//! strategy selects, with a bounded retry ladder. The router never owns
//! liveness: a timed-out connection stays registered (the channel decides
//! when it is dead), while routing simply rotates to the next candidate.

use crate::hub::connection::LinkError;
use crate::protocol::RpcMethod;
use crate::protocol::payload::CallResponse;
use crate::registry::{ConnectionRegistry, HubKind};
use crate::strategy::ConnectionStrategy;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Upper bound on dispatch attempts within one invocation.
pub const MAX_RETRIES: usize = 10;
/// Wait before retrying when no plugin connection is available.
pub const NO_CONNECTION_DELAY: Duration = Duration::from_millis(2_500);
/// Wait before retrying after a per-call timeout.
pub const TIMEOUT_RETRY_DELAY: Duration = Duration::from_secs(1);
/// Wait before retrying after any other dispatch fault.
pub const FAULT_RETRY_DELAY: Duration = Duration::from_millis(50);

/// Router over the connection registry, guided by the deployment strategy.
#[derive(Debug, Clone)]
pub struct PluginRouter {
    registry: Arc<ConnectionRegistry>,
    strategy: Arc<dyn ConnectionStrategy>,
    call_timeout: Option<Duration>,
}

impl PluginRouter {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        strategy: Arc<dyn ConnectionStrategy>,
        call_timeout: Option<Duration>,
    ) -> Self {
        Self {
            registry,
            strategy,
            call_timeout,
        }
    }

    /// Invoke `method` on a strategy-selected plugin connection.
    ///
    /// Retries up to [`MAX_RETRIES`] times, increasing the rotation offset
    /// so every live peer is eventually tried. A reply parsed as a
    /// [`CallResponse`] is returned verbatim, including plugin-side
    /// `Error` envelopes. Cancellation short-circuits the loop. After
    /// exhaustion a structured `Error` envelope carries the request id.
    pub async fn invoke(
        &self,
        hub: HubKind,
        method: RpcMethod,
        payload: Value,
        request_id: &str,
        token: Option<&str>,
        ct: &CancellationToken,
    ) -> CallResponse {
        let started = std::time::Instant::now();
        let record = |outcome: &str| {
            crate::metrics::record_plugin_call(
                method.as_str(),
                outcome,
                started.elapsed().as_millis() as f64,
            );
        };

        for attempt in 0..MAX_RETRIES {
            if ct.is_cancelled() {
                record("cancel");
                return CallResponse::cancelled(request_id);
            }

            let Some(conn_id) =
                self.strategy
                    .resolve_connection(&self.registry, hub, token, attempt)
            else {
                debug!(
                    method = method.as_str(),
                    attempt, "no plugin connection available, waiting"
                );
                if Self::wait(NO_CONNECTION_DELAY, ct).await.is_err() {
                    record("cancel");
                    return CallResponse::cancelled(request_id);
                }
                continue;
            };

            let Some(connection) = self.registry.get(&conn_id) else {
                // Lost a race with a disconnect; try the next candidate.
                continue;
            };

            match connection
                .link
                .call(method, payload.clone(), self.call_timeout, ct)
                .await
            {
                Ok(value) => {
                    self.registry.mark_success(hub, &conn_id);
                    record("success");
                    return Self::parse_reply(request_id, method, value);
                }
                Err(LinkError::Cancelled) => {
                    record("cancel");
                    return CallResponse::cancelled(request_id);
                }
                Err(LinkError::Timeout(deadline)) => {
                    warn!(
                        method = method.as_str(),
                        conn_id,
                        attempt,
                        ?deadline,
                        "plugin call timed out, retrying"
                    );
                    if Self::wait(TIMEOUT_RETRY_DELAY, ct).await.is_err() {
                        record("cancel");
                        return CallResponse::cancelled(request_id);
                    }
                }
                Err(err) => {
                    warn!(
                        method = method.as_str(),
                        conn_id,
                        attempt,
                        error = %err,
                        "plugin call failed, retrying"
                    );
                    if Self::wait(FAULT_RETRY_DELAY, ct).await.is_err() {
                        record("cancel");
                        return CallResponse::cancelled(request_id);
                    }
                }
            }
        }

        record("exhausted");
        CallResponse::error(
            request_id,
            format!(
                "no plugin available to serve {} after {} attempts",
                method.as_str(),
                MAX_RETRIES
            ),
        )
    }

    fn parse_reply(request_id: &str, method: RpcMethod, value: Value) -> CallResponse {
        match serde_json::from_value::<CallResponse>(value) {
            Ok(response) => response,
            Err(e) => CallResponse::error(
                request_id,
                format!("malformed {} reply from plugin: {}", method.as_str(), e),
            ),
        }
    }

    /// Cancellable delay. `Err` means the caller's token fired.
    async fn wait(delay: Duration, ct: &CancellationToken) -> Result<(), ()> {
        tokio::select! {
            _ = tokio::time::sleep(delay) => Ok(()),
            _ = ct.cancelled() => Err(()),
        }
    }
}
