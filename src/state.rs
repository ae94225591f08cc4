/// The application state is responsible for:
///
/// - Maintaining the lifecycle state of the bridge
/// - Hosting the connection registry, request tracker and capability bus
/// - Holding the immutable configuration and the deployment strategy
use crate::bus::CapabilityBus;
use crate::config::Config;
use crate::registry::ConnectionRegistry;
use crate::router::PluginRouter;
use crate::session::SessionTracker;
use crate::strategy::{ConnectionStrategy, strategy_for};
use crate::tracking::RequestTracker;

use std::sync::{
    Arc,
    atomic::{AtomicU8, Ordering},
};

use tracing::debug;

/** Application lifecycle states. */
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ApplicationState {
    /// Unknown state, typically the initial state.
    Unknown = 0,
    /// The application is initializing.
    Initializing = 1,
    /// Starting network services.
    StartingNetwork = 2,
    /// The application is ready to serve requests.
    Ready = 3,
    /// The application is terminating.
    Terminating = 4,
}

// Shared application state of the bridge.
//
// Holds the lifecycle state, the immutable configuration, and the shared
// services every handler reaches for: the connection registry, the request
// tracker, the capability bus, the session tracker and the router.
#[derive(Debug)]
pub struct BridgeState {
    /// Current application lifecycle state.
    pub state: AtomicU8,
    /// Immutable runtime configuration.
    pub config: Config,
    /// Registry of live plugin connections.
    pub registry: Arc<ConnectionRegistry>,
    /// In-flight request tracking service.
    pub tracker: Arc<RequestTracker>,
    /// Capability change bus.
    pub bus: Arc<CapabilityBus>,
    /// Deployment-mode policy, chosen once at startup.
    pub strategy: Arc<dyn ConnectionStrategy>,
    /// Live MCP sessions.
    pub sessions: Arc<SessionTracker>,
    /// Router over the registry, guided by the strategy.
    pub router: PluginRouter,
}

impl BridgeState {
    /// Build the shared state for a validated configuration.
    pub fn new(config: Config) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let strategy = strategy_for(config.mode);
        let router = PluginRouter::new(registry.clone(), strategy.clone(), config.call_timeout());
        Self {
            state: AtomicU8::new(ApplicationState::Unknown as u8),
            registry,
            tracker: Arc::new(RequestTracker::new()),
            bus: Arc::new(CapabilityBus::new()),
            strategy,
            sessions: Arc::new(SessionTracker::new()),
            router,
            config,
        }
    }

    /// Set application lifecycle state.
    pub fn set_state(&self, value: ApplicationState) {
        let v = value as u8;
        debug!("Application state changed to {:?}", v);
        self.state.store(v, Ordering::Relaxed);
    }

    /// Returns true if the application is running (liveness check).
    pub fn is_alive(&self) -> bool {
        let state = self.state.load(Ordering::SeqCst);
        state >= ApplicationState::Initializing as u8 && state < ApplicationState::Terminating as u8
    }

    /// Returns true if the application is ready to serve requests.
    pub fn is_ready(&self) -> bool {
        self.state.load(Ordering::SeqCst) >= ApplicationState::Ready as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_predicates_follow_state() {
        let state = BridgeState::new(Config::default());
        assert!(!state.is_alive());
        assert!(!state.is_ready());

        state.set_state(ApplicationState::Initializing);
        assert!(state.is_alive());
        assert!(!state.is_ready());

        state.set_state(ApplicationState::Ready);
        assert!(state.is_ready());

        state.set_state(ApplicationState::Terminating);
        assert!(!state.is_alive());
    }
}
