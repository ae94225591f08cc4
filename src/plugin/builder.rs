//! One-shot plugin builder.
//!
//! The registrar API: a host registers its tools, prompts and resources,
//! then calls [`McpPluginBuilder::build`]. The builder is consumed, so
//! registration after build cannot be expressed; catalog membership is
//! fixed for the plugin's lifetime and only the enabled flags move.

use crate::plugin::catalog::Catalog;
use crate::plugin::channel::{ChannelConfig, PluginChannel};
use crate::plugin::invoker::{
    FnPrompt, FnResource, FnToolBuilder, InvokerError, RunPrompt, RunResource, RunTool,
};
use crate::plugin::schema::{SchemaProvider, SchemarsProvider};
use crate::plugin::McpPlugin;
use crate::protocol::payload::ResourceTemplateDescriptor;
use std::sync::Arc;
use std::time::Duration;

/// Builder collecting a host's callables and connection settings.
pub struct McpPluginBuilder {
    channel_config: ChannelConfig,
    schema_provider: Arc<dyn SchemaProvider>,
    tools: Vec<Arc<dyn RunTool>>,
    prompts: Vec<Arc<dyn RunPrompt>>,
    resources: Vec<Arc<dyn RunResource>>,
    templates: Vec<ResourceTemplateDescriptor>,
}

impl McpPluginBuilder {
    /// Start a builder for a bridge at `url`
    /// (e.g. [`ChannelConfig::local_url`]).
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            channel_config: ChannelConfig::new(url),
            schema_provider: Arc::new(SchemarsProvider),
            tools: Vec::new(),
            prompts: Vec::new(),
            resources: Vec::new(),
            templates: Vec::new(),
        }
    }

    /// Bearer token presented to the bridge.
    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.channel_config.token = Some(token.into());
        self
    }

    /// Override the reconnect backoff.
    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.channel_config.reconnect_delay = delay;
        self
    }

    /// Override the schema provider.
    pub fn schema_provider(mut self, provider: Arc<dyn SchemaProvider>) -> Self {
        self.schema_provider = provider;
        self
    }

    /// Register a tool from its builder; schemas are generated here.
    pub fn tool(mut self, tool: FnToolBuilder) -> Result<Self, InvokerError> {
        let built = tool.build(self.schema_provider.as_ref())?;
        self.tools.push(Arc::new(built));
        Ok(self)
    }

    /// Register an already-built tool implementation.
    pub fn tool_impl(mut self, tool: Arc<dyn RunTool>) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn prompt(mut self, prompt: FnPrompt) -> Self {
        self.prompts.push(Arc::new(prompt));
        self
    }

    pub fn resource(mut self, resource: FnResource) -> Self {
        self.resources.push(Arc::new(resource));
        self
    }

    pub fn resource_template(mut self, template: ResourceTemplateDescriptor) -> Self {
        self.templates.push(template);
        self
    }

    /// Finalize the plugin and spawn its channel. The built instance is
    /// installed as the process-wide current plugin; a previously
    /// installed one is shut down.
    pub fn build(self) -> Arc<McpPlugin> {
        let catalog = Arc::new(Catalog::new(
            self.tools,
            self.prompts,
            self.resources,
            self.templates,
        ));
        let channel = PluginChannel::new(self.channel_config, catalog.clone());
        let task = channel.spawn();
        let plugin = Arc::new(McpPlugin::new(catalog, channel, task));
        crate::plugin::install(plugin.clone());
        plugin
    }

    /// Finalize without connecting; used by hosts that manage the channel
    /// lifecycle themselves (and by tests).
    pub fn build_detached(self) -> Arc<McpPlugin> {
        let catalog = Arc::new(Catalog::new(
            self.tools,
            self.prompts,
            self.resources,
            self.templates,
        ));
        let channel = PluginChannel::new(self.channel_config, catalog.clone());
        Arc::new(McpPlugin::new_detached(catalog, channel))
    }
}
