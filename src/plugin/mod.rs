//! Host-side plugin library.
//!
//! A long-lived application embeds this module to expose its callables to
//! a bridge: register tools, prompts and resources on the builder, build
//! once, and the channel keeps itself connected. The process-wide
//! [`current`] cell holds the most recently built plugin; building a new
//! one disposes the previous instance.

pub mod builder;
pub mod catalog;
pub mod channel;
pub mod invoker;
pub mod schema;

pub use builder::McpPluginBuilder;

use crate::bus::CapabilityKind;
use crate::plugin::catalog::Catalog;
use crate::plugin::channel::{ChannelError, PluginChannel};
use crate::protocol::payload::CallResponse;
use std::sync::{Arc, Mutex, RwLock};
use tracing::info;

static CURRENT: RwLock<Option<Arc<McpPlugin>>> = RwLock::new(None);

/// The most recently installed plugin instance, if any.
pub fn current() -> Option<Arc<McpPlugin>> {
    CURRENT.read().unwrap_or_else(|e| e.into_inner()).clone()
}

/// Install a plugin as the process-wide instance. A previously installed
/// plugin is shut down and returned.
pub fn install(plugin: Arc<McpPlugin>) -> Option<Arc<McpPlugin>> {
    let prior = {
        let mut current = CURRENT.write().unwrap_or_else(|e| e.into_inner());
        current.replace(plugin)
    };
    if let Some(prior) = &prior {
        info!("replacing current plugin instance");
        prior.shutdown();
    }
    prior
}

/// A built plugin: its catalog plus the channel keeping it registered
/// with a bridge.
#[derive(Debug)]
pub struct McpPlugin {
    catalog: Arc<Catalog>,
    channel: Arc<PluginChannel>,
    task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl McpPlugin {
    pub(crate) fn new(
        catalog: Arc<Catalog>,
        channel: Arc<PluginChannel>,
        task: tokio::task::JoinHandle<()>,
    ) -> Self {
        Self {
            catalog,
            channel,
            task: Mutex::new(Some(task)),
        }
    }

    pub(crate) fn new_detached(catalog: Arc<Catalog>, channel: Arc<PluginChannel>) -> Self {
        Self {
            catalog,
            channel,
            task: Mutex::new(None),
        }
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn channel(&self) -> &Arc<PluginChannel> {
        &self.channel
    }

    /// Enable or disable a tool, announcing the change to the bridge when
    /// the flag actually moved.
    pub async fn set_tool_enabled(&self, name: &str, enabled: bool) -> bool {
        let changed = self.catalog.set_tool_enabled(name, enabled);
        if changed {
            let _ = self.channel.notify_updated(CapabilityKind::Tools).await;
        }
        changed
    }

    /// Enable or disable a prompt, announcing the change when it moved.
    pub async fn set_prompt_enabled(&self, name: &str, enabled: bool) -> bool {
        let changed = self.catalog.set_prompt_enabled(name, enabled);
        if changed {
            let _ = self.channel.notify_updated(CapabilityKind::Prompts).await;
        }
        changed
    }

    /// Enable or disable a resource, announcing the change when it moved.
    pub async fn set_resource_enabled(&self, uri: &str, enabled: bool) -> bool {
        let changed = self.catalog.set_resource_enabled(uri, enabled);
        if changed {
            let _ = self.channel.notify_updated(CapabilityKind::Resources).await;
        }
        changed
    }

    /// Complete a tool request that was answered with `Processing` on the
    /// RPC path.
    pub async fn complete_tool_request(
        &self,
        response: CallResponse,
    ) -> Result<(), ChannelError> {
        self.channel.notify_tool_request_completed(response).await
    }

    /// Disconnect and stop reconnecting.
    pub fn shutdown(&self) {
        self.channel.shutdown();
        if let Some(task) = self.task.lock().expect("task slot poisoned").take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::channel::ChannelConfig;

    fn detached_plugin() -> Arc<McpPlugin> {
        let catalog = Arc::new(Catalog::default());
        let channel = PluginChannel::new(ChannelConfig::new("ws://127.0.0.1:1/hub"), catalog.clone());
        Arc::new(McpPlugin::new_detached(catalog, channel))
    }

    #[test]
    fn install_replaces_and_returns_prior_instance() {
        let first = detached_plugin();
        let second = detached_plugin();

        install(first.clone());
        let replaced = install(second.clone());

        assert!(replaced.is_some_and(|r| Arc::ptr_eq(&r, &first)));
        assert!(Arc::ptr_eq(&current().unwrap(), &second));
    }
}
