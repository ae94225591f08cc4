//! Deployment-mode policy.
//!
//! The strategy is an immutable singleton chosen at startup. It owns three
//! policy decisions: which plugins may coexist (admission), which
//! connection serves a call (routing), and which MCP sessions receive a
//! capability-change notification (scoping). Channel liveness is owned by
//! the hub; the strategy only decides.

use crate::config::{Config, ConfigError, DeploymentMode};
use crate::registry::{ConnectionRegistry, HubKind};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Policy seam between the hub, the router and the session runtime.
pub trait ConnectionStrategy: Send + Sync + fmt::Debug {
    /// Whether several plugins of one hub kind may be registered at once.
    fn allow_multiple_connections(&self) -> bool;

    fn mode(&self) -> DeploymentMode;

    /// Startup validation of the configuration against this strategy.
    fn validate(&self, config: &Config) -> Result<(), ConfigError>;

    /// Decide which existing connections must be evicted to admit
    /// `incoming`. The hub disconnects the returned ids.
    fn plan_admission(
        &self,
        registry: &ConnectionRegistry,
        hub: HubKind,
        incoming: &str,
    ) -> Vec<String>;

    /// Resolve the connection that should serve a call. `offset` increases
    /// across retries of one invocation so the registry rotation makes
    /// progress.
    fn resolve_connection(
        &self,
        registry: &ConnectionRegistry,
        hub: HubKind,
        token: Option<&str>,
        offset: usize,
    ) -> Option<String>;

    /// Whether a capability change from `source` is forwarded to a session
    /// holding `session_token`.
    fn should_notify_session(
        &self,
        registry: &ConnectionRegistry,
        source: &str,
        session_token: Option<&str>,
    ) -> bool;
}

/// Select the strategy for a deployment mode.
pub fn strategy_for(mode: DeploymentMode) -> Arc<dyn ConnectionStrategy> {
    match mode {
        DeploymentMode::Local => Arc::new(LocalStrategy),
        DeploymentMode::Remote => Arc::new(RemoteStrategy),
    }
}

/// Shared routing rule: a token-paired connection wins, otherwise the
/// registry's rotation picks one.
fn resolve_by_token_then_best(
    registry: &ConnectionRegistry,
    hub: HubKind,
    token: Option<&str>,
    offset: usize,
) -> Option<String> {
    if let Some(token) = token
        && let Some(conn) = registry.get_by_token(token)
    {
        return Some(conn.id);
    }
    registry.get_best(hub, offset).map(|c| c.id)
}

/// Single-tenant policy: one plugin at a time, notifications broadcast to
/// every session.
#[derive(Debug)]
pub struct LocalStrategy;

impl ConnectionStrategy for LocalStrategy {
    fn allow_multiple_connections(&self) -> bool {
        false
    }

    fn mode(&self) -> DeploymentMode {
        DeploymentMode::Local
    }

    fn validate(&self, config: &Config) -> Result<(), ConfigError> {
        config.validate()
    }

    fn plan_admission(
        &self,
        registry: &ConnectionRegistry,
        hub: HubKind,
        incoming: &str,
    ) -> Vec<String> {
        // The newly arrived plugin is kept; every other live peer of the
        // same hub kind is evicted.
        let evicted: Vec<String> = registry
            .ids(hub)
            .into_iter()
            .filter(|id| id != incoming)
            .collect();
        if !evicted.is_empty() {
            debug!(incoming, count = evicted.len(), "evicting peers for new plugin");
        }
        evicted
    }

    fn resolve_connection(
        &self,
        registry: &ConnectionRegistry,
        hub: HubKind,
        token: Option<&str>,
        offset: usize,
    ) -> Option<String> {
        resolve_by_token_then_best(registry, hub, token, offset)
    }

    fn should_notify_session(
        &self,
        _registry: &ConnectionRegistry,
        _source: &str,
        _session_token: Option<&str>,
    ) -> bool {
        true
    }
}

/// Multi-tenant policy: plugins coexist and both routing and notification
/// scoping pair connections with sessions by bearer token.
#[derive(Debug)]
pub struct RemoteStrategy;

impl ConnectionStrategy for RemoteStrategy {
    fn allow_multiple_connections(&self) -> bool {
        true
    }

    fn mode(&self) -> DeploymentMode {
        DeploymentMode::Remote
    }

    fn validate(&self, config: &Config) -> Result<(), ConfigError> {
        if config.token.is_none() {
            return Err(ConfigError::RemoteRequiresToken);
        }
        config.validate()
    }

    fn plan_admission(
        &self,
        _registry: &ConnectionRegistry,
        _hub: HubKind,
        _incoming: &str,
    ) -> Vec<String> {
        Vec::new()
    }

    fn resolve_connection(
        &self,
        registry: &ConnectionRegistry,
        hub: HubKind,
        token: Option<&str>,
        offset: usize,
    ) -> Option<String> {
        resolve_by_token_then_best(registry, hub, token, offset)
    }

    fn should_notify_session(
        &self,
        registry: &ConnectionRegistry,
        source: &str,
        session_token: Option<&str>,
    ) -> bool {
        match (registry.token_of(source), session_token) {
            (Some(plugin_token), Some(session_token)) => plugin_token == session_token,
            _ => false,
        }
    }
}
