//! Capability change bus.
//!
//! Three in-process broadcast topics, one per capability kind. Publishing
//! never blocks; delivery is best-effort fan-out to the current
//! subscribers. Events carry only the kind and the originating connection
//! id; subscribers re-query the plugin on receipt.

use tokio::sync::broadcast;
use tracing::trace;

const TOPIC_CAPACITY: usize = 64;

/// The three MCP capability kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CapabilityKind {
    Tools,
    Prompts,
    Resources,
}

impl CapabilityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CapabilityKind::Tools => "tools",
            CapabilityKind::Prompts => "prompts",
            CapabilityKind::Resources => "resources",
        }
    }
}

/// A capability-change event: which kind changed, and on which plugin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityChange {
    pub kind: CapabilityKind,
    pub connection_id: String,
}

/// Per-session receivers for all three topics.
pub struct CapabilityFeed {
    pub tools: broadcast::Receiver<CapabilityChange>,
    pub prompts: broadcast::Receiver<CapabilityChange>,
    pub resources: broadcast::Receiver<CapabilityChange>,
}

/// In-process pub/sub of capability changes.
#[derive(Debug)]
pub struct CapabilityBus {
    tools: broadcast::Sender<CapabilityChange>,
    prompts: broadcast::Sender<CapabilityChange>,
    resources: broadcast::Sender<CapabilityChange>,
}

impl Default for CapabilityBus {
    fn default() -> Self {
        Self {
            tools: broadcast::channel(TOPIC_CAPACITY).0,
            prompts: broadcast::channel(TOPIC_CAPACITY).0,
            resources: broadcast::channel(TOPIC_CAPACITY).0,
        }
    }
}

impl CapabilityBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a change. Never blocks; without subscribers the event is
    /// dropped, which is fine — nobody needed it.
    pub fn publish(&self, kind: CapabilityKind, connection_id: &str) {
        let event = CapabilityChange {
            kind,
            connection_id: connection_id.to_string(),
        };
        trace!(kind = kind.as_str(), connection_id, "capability change published");
        let _ = self.topic(kind).send(event);
    }

    /// Subscribe to one topic.
    pub fn subscribe(&self, kind: CapabilityKind) -> broadcast::Receiver<CapabilityChange> {
        self.topic(kind).subscribe()
    }

    /// Subscribe to all three topics at once, as a session runtime does.
    pub fn subscribe_all(&self) -> CapabilityFeed {
        CapabilityFeed {
            tools: self.tools.subscribe(),
            prompts: self.prompts.subscribe(),
            resources: self.resources.subscribe(),
        }
    }

    fn topic(&self, kind: CapabilityKind) -> &broadcast::Sender<CapabilityChange> {
        match kind {
            CapabilityKind::Tools => &self.tools,
            CapabilityKind::Prompts => &self.prompts,
            CapabilityKind::Resources => &self.resources,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_reach_matching_topic_subscribers() {
        let bus = CapabilityBus::new();
        let mut tools = bus.subscribe(CapabilityKind::Tools);
        let mut prompts = bus.subscribe(CapabilityKind::Prompts);

        bus.publish(CapabilityKind::Tools, "p1");

        let event = tools.recv().await.unwrap();
        assert_eq!(event.kind, CapabilityKind::Tools);
        assert_eq!(event.connection_id, "p1");
        assert!(prompts.try_recv().is_err());
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_non_blocking() {
        let bus = CapabilityBus::new();
        bus.publish(CapabilityKind::Resources, "p1");
    }

    #[tokio::test]
    async fn all_subscribers_see_each_event() {
        let bus = CapabilityBus::new();
        let mut first = bus.subscribe(CapabilityKind::Prompts);
        let mut second = bus.subscribe(CapabilityKind::Prompts);

        bus.publish(CapabilityKind::Prompts, "p9");

        assert_eq!(first.recv().await.unwrap().connection_id, "p9");
        assert_eq!(second.recv().await.unwrap().connection_id, "p9");
    }
}
