//! MCP session runtime.
//!
//! Each MCP session registers here when it initializes. A per-session
//! forwarding task subscribes to the three capability topics and relays
//! `*/list_changed` notifications to the client whenever the deployment
//! strategy allows it. A watchdog sweeps sessions whose cancellation has
//! fired but whose transport teardown has not been observed yet — the
//! partial-disconnect race on the streamable-HTTP transport.

use crate::bus::{CapabilityChange, CapabilityFeed, CapabilityKind};
use crate::registry::ConnectionRegistry;
use crate::strategy::ConnectionStrategy;
use rmcp::service::{Peer, RoleServer};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Sweep interval of the session watchdog.
pub const WATCHDOG_INTERVAL: Duration = Duration::from_secs(5);

/// State of one live MCP session.
#[derive(Debug, Clone)]
pub struct SessionEntry {
    pub session_id: String,
    /// Bearer token presented by the client, if any.
    pub token: Option<String>,
    /// Cancelled when the session ends; in-flight router calls bail out.
    pub cancel: CancellationToken,
}

/// Process-wide index of live MCP sessions.
#[derive(Debug, Default)]
pub struct SessionTracker {
    sessions: Mutex<HashMap<String, SessionEntry>>,
}

impl SessionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session. Replaces any stale entry under the same id.
    pub fn register(&self, entry: SessionEntry) {
        debug!(session_id = %entry.session_id, "MCP session registered");
        let mut sessions = self.sessions.lock().expect("session map poisoned");
        sessions.insert(entry.session_id.clone(), entry);
    }

    /// Remove a session and trip its cancellation. Runs on a plain
    /// synchronous path so teardown succeeds even mid-cancellation.
    pub fn deregister(&self, session_id: &str) {
        let removed = {
            let mut sessions = self.sessions.lock().expect("session map poisoned");
            sessions.remove(session_id)
        };
        if let Some(entry) = removed {
            entry.cancel.cancel();
            debug!(session_id, "MCP session deregistered");
        }
    }

    pub fn get(&self, session_id: &str) -> Option<SessionEntry> {
        self.sessions
            .lock()
            .expect("session map poisoned")
            .get(session_id)
            .cloned()
    }

    /// Snapshot of all live sessions.
    pub fn sessions(&self) -> Vec<SessionEntry> {
        self.sessions
            .lock()
            .expect("session map poisoned")
            .values()
            .cloned()
            .collect()
    }

    /// First session holding the given bearer token.
    pub fn session_for_token(&self, token: &str) -> Option<SessionEntry> {
        self.sessions
            .lock()
            .expect("session map poisoned")
            .values()
            .find(|s| s.token.as_deref() == Some(token))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().expect("session map poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every session whose cancellation already fired. Returns how
    /// many were removed.
    pub fn prune_cancelled(&self) -> usize {
        let mut sessions = self.sessions.lock().expect("session map poisoned");
        let before = sessions.len();
        sessions.retain(|_, entry| !entry.cancel.is_cancelled());
        before - sessions.len()
    }
}

/// Spawn the notification forwarder for one session.
///
/// The task ends when the session is cancelled or the peer stops
/// accepting notifications; either way the session is deregistered.
pub fn spawn_notification_forwarder(
    tracker: Arc<SessionTracker>,
    entry: SessionEntry,
    mut feed: CapabilityFeed,
    strategy: Arc<dyn ConnectionStrategy>,
    registry: Arc<ConnectionRegistry>,
    peer: Peer<RoleServer>,
) {
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                e = feed.tools.recv() => e,
                e = feed.prompts.recv() => e,
                e = feed.resources.recv() => e,
                _ = entry.cancel.cancelled() => break,
            };

            let change: CapabilityChange = match event {
                Ok(change) => change,
                // A lagged receiver just missed events; the next one still
                // triggers a re-query, so keep going.
                Err(RecvError::Lagged(missed)) => {
                    trace!(session_id = %entry.session_id, missed, "capability feed lagged");
                    continue;
                }
                Err(RecvError::Closed) => break,
            };

            if !strategy.should_notify_session(
                &registry,
                &change.connection_id,
                entry.token.as_deref(),
            ) {
                continue;
            }

            let sent = match change.kind {
                CapabilityKind::Tools => peer.notify_tool_list_changed().await,
                CapabilityKind::Prompts => peer.notify_prompt_list_changed().await,
                CapabilityKind::Resources => peer.notify_resource_list_changed().await,
            };
            if let Err(err) = sent {
                // Best-effort delivery: a failed notify means the peer is
                // gone; tear the session down.
                warn!(
                    session_id = %entry.session_id,
                    kind = change.kind.as_str(),
                    error = %err,
                    "failed to forward list-changed notification"
                );
                break;
            }
            trace!(
                session_id = %entry.session_id,
                kind = change.kind.as_str(),
                source = %change.connection_id,
                "forwarded list-changed notification"
            );
        }

        tracker.deregister(&entry.session_id);
    });
}

/// Spawn the connection-health monitor.
///
/// Every [`WATCHDOG_INTERVAL`] the monitor sweeps sessions whose
/// cancellation fired without an observed teardown, bounding the window in
/// which a half-dead session lingers after its peer aborted.
pub fn spawn_session_watchdog(tracker: Arc<SessionTracker>, shutdown: CancellationToken) {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(WATCHDOG_INTERVAL);
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    let pruned = tracker.prune_cancelled();
                    if pruned > 0 {
                        debug!(pruned, "watchdog removed dead MCP sessions");
                    }
                }
                _ = shutdown.cancelled() => break,
            }
        }
    });
}
