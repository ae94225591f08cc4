//! Registry of live plugin connections.
//!
//! The registry tracks every plugin whose channel has completed its
//! handshake, indexed by connection id, by bearer token, and grouped by
//! hub kind. An entry exists iff the underlying channel is connected; the
//! socket task inserts after the handshake and removes on disconnect (or
//! when the strategy evicts a peer).

use crate::hub::connection::PluginLink;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

/// Sharding key for connection groups. Only the MCP server hub exists
/// today; the key is kept so per-capability channels can be added without
/// reshaping the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HubKind {
    McpServer,
}

impl HubKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            HubKind::McpServer => "mcp-server",
        }
    }
}

/// One live plugin connection.
#[derive(Debug, Clone)]
pub struct PluginConnection {
    pub id: String,
    pub hub: HubKind,
    /// Bearer token the plugin presented at channel open, if any.
    pub token: Option<String>,
    pub connected_at: DateTime<Utc>,
    pub link: Arc<PluginLink>,
}

#[derive(Default)]
struct Inner {
    /// Insertion-ordered connection ids per hub kind.
    order: HashMap<HubKind, BTreeMap<u64, String>>,
    seq: u64,
    by_id: HashMap<String, PluginConnection>,
    token_to_id: HashMap<String, String>,
    id_to_token: HashMap<String, String>,
    last_successful: HashMap<HubKind, String>,
}

/// Process-wide, concurrent-safe connection registry.
///
/// All critical sections are short and await-free, so a plain
/// `std::sync::RwLock` is sufficient.
#[derive(Default)]
pub struct ConnectionRegistry {
    inner: RwLock<Inner>,
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        f.debug_struct("ConnectionRegistry")
            .field("connections", &inner.by_id.keys())
            .field("tokens", &inner.token_to_id.len())
            .finish()
    }
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a connection. Idempotent: a second insertion of the same id
    /// is a no-op warning.
    pub fn add(&self, connection: PluginConnection) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if inner.by_id.contains_key(&connection.id) {
            warn!(id = %connection.id, "connection already registered, ignoring");
            return;
        }

        inner.seq += 1;
        let seq = inner.seq;
        inner
            .order
            .entry(connection.hub)
            .or_default()
            .insert(seq, connection.id.clone());
        if let Some(token) = &connection.token {
            inner.token_to_id.insert(token.clone(), connection.id.clone());
            inner.id_to_token.insert(connection.id.clone(), token.clone());
        }
        debug!(id = %connection.id, hub = connection.hub.as_str(), "plugin connection registered");
        inner.by_id.insert(connection.id.clone(), connection);
    }

    /// Remove a connection from every index. Unknown ids are ignored.
    pub fn remove(&self, hub: HubKind, id: &str) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if inner.by_id.remove(id).is_none() {
            return;
        }
        if let Some(order) = inner.order.get_mut(&hub) {
            order.retain(|_, v| v.as_str() != id);
        }
        if let Some(token) = inner.id_to_token.remove(id) {
            inner.token_to_id.remove(&token);
        }
        if inner.last_successful.get(&hub).map(String::as_str) == Some(id) {
            inner.last_successful.remove(&hub);
        }
        debug!(id, hub = hub.as_str(), "plugin connection removed");
    }

    pub fn get(&self, id: &str) -> Option<PluginConnection> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.by_id.get(id).cloned()
    }

    /// O(1) lookup of the connection bound to a bearer token.
    pub fn get_by_token(&self, token: &str) -> Option<PluginConnection> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner
            .token_to_id
            .get(token)
            .and_then(|id| inner.by_id.get(id))
            .cloned()
    }

    /// Token bound to a connection id, if any.
    pub fn token_of(&self, id: &str) -> Option<String> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.id_to_token.get(id).cloned()
    }

    /// Pick a connection for a call.
    ///
    /// At `offset == 0` the sticky last-successful connection wins when it
    /// is still live. Otherwise the insertion-ordered set is rotated by
    /// `offset % n`, so a retrying caller makes progress and eventually
    /// visits every connected peer.
    pub fn get_best(&self, hub: HubKind, offset: usize) -> Option<PluginConnection> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());

        if offset == 0
            && let Some(id) = inner.last_successful.get(&hub)
            && let Some(conn) = inner.by_id.get(id)
        {
            return Some(conn.clone());
        }

        let order = inner.order.get(&hub)?;
        if order.is_empty() {
            return None;
        }
        let ids: Vec<&String> = order.values().collect();
        let id = ids[offset % ids.len()];
        inner.by_id.get(id).cloned()
    }

    /// Record the connection that last completed a call successfully.
    pub fn mark_success(&self, hub: HubKind, id: &str) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if inner.by_id.contains_key(id) {
            inner.last_successful.insert(hub, id.to_string());
        }
    }

    /// Connection ids of a hub in insertion order.
    pub fn ids(&self, hub: HubKind) -> Vec<String> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner
            .order
            .get(&hub)
            .map(|order| order.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self, hub: HubKind) -> usize {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.order.get(&hub).map_or(0, BTreeMap::len)
    }

    pub fn is_empty(&self, hub: HubKind) -> bool {
        self.len(hub) == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn connection(id: &str, token: Option<&str>) -> PluginConnection {
        let (tx, _rx) = mpsc::channel(1);
        PluginConnection {
            id: id.to_string(),
            hub: HubKind::McpServer,
            token: token.map(str::to_string),
            connected_at: Utc::now(),
            link: Arc::new(PluginLink::new(id, tx)),
        }
    }

    #[test]
    fn token_indices_stay_symmetric() {
        let registry = ConnectionRegistry::new();
        registry.add(connection("a", Some("tok-a")));

        assert_eq!(registry.get_by_token("tok-a").unwrap().id, "a");
        assert_eq!(registry.token_of("a").as_deref(), Some("tok-a"));

        registry.remove(HubKind::McpServer, "a");
        assert!(registry.get_by_token("tok-a").is_none());
        assert!(registry.token_of("a").is_none());
    }

    #[test]
    fn duplicate_add_is_a_no_op() {
        let registry = ConnectionRegistry::new();
        registry.add(connection("a", None));
        registry.add(connection("a", Some("late-token")));

        assert_eq!(registry.len(HubKind::McpServer), 1);
        // The second insert must not have bound the token.
        assert!(registry.get_by_token("late-token").is_none());
    }

    #[test]
    fn get_best_rotates_deterministically() {
        let registry = ConnectionRegistry::new();
        for id in ["a", "b", "c"] {
            registry.add(connection(id, None));
        }

        // No sticky winner yet: offset 0..n visits every peer once.
        let visited: Vec<String> = (0..3)
            .map(|offset| registry.get_best(HubKind::McpServer, offset).unwrap().id)
            .collect();
        assert_eq!(visited, ["a", "b", "c"]);

        // Rotation wraps.
        assert_eq!(registry.get_best(HubKind::McpServer, 4).unwrap().id, "b");
    }

    #[test]
    fn sticky_winner_takes_offset_zero() {
        let registry = ConnectionRegistry::new();
        for id in ["a", "b"] {
            registry.add(connection(id, None));
        }
        registry.mark_success(HubKind::McpServer, "b");

        assert_eq!(registry.get_best(HubKind::McpServer, 0).unwrap().id, "b");
        // Removal clears the sticky marker.
        registry.remove(HubKind::McpServer, "b");
        assert_eq!(registry.get_best(HubKind::McpServer, 0).unwrap().id, "a");
    }

    #[test]
    fn empty_hub_yields_no_connection() {
        let registry = ConnectionRegistry::new();
        assert!(registry.get_best(HubKind::McpServer, 0).is_none());
        assert!(registry.is_empty(HubKind::McpServer));
    }
}
