//! Catalog of a host's registered callables.
//!
//! Membership is fixed when the plugin is built; the runtime-facing
//! mutation surface is the per-entry enabled flag. List payloads carry the
//! flag so the bridge can filter uniformly.

use crate::plugin::invoker::{RunPrompt, RunResource, RunTool};
use crate::protocol::payload::{
    PromptDescriptor, ResourceDescriptor, ResourceTemplateDescriptor, ToolDescriptor,
};
use std::sync::Arc;

/// Registered callables of one plugin, in registration order.
#[derive(Default)]
pub struct Catalog {
    tools: Vec<Arc<dyn RunTool>>,
    prompts: Vec<Arc<dyn RunPrompt>>,
    resources: Vec<Arc<dyn RunResource>>,
    templates: Vec<ResourceTemplateDescriptor>,
}

impl std::fmt::Debug for Catalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Catalog")
            .field("tools", &self.tools.len())
            .field("prompts", &self.prompts.len())
            .field("resources", &self.resources.len())
            .field("templates", &self.templates.len())
            .finish()
    }
}

impl Catalog {
    pub fn new(
        tools: Vec<Arc<dyn RunTool>>,
        prompts: Vec<Arc<dyn RunPrompt>>,
        resources: Vec<Arc<dyn RunResource>>,
        templates: Vec<ResourceTemplateDescriptor>,
    ) -> Self {
        Self {
            tools,
            prompts,
            resources,
            templates,
        }
    }

    pub fn tool(&self, name: &str) -> Option<Arc<dyn RunTool>> {
        self.tools.iter().find(|t| t.name() == name).cloned()
    }

    pub fn prompt(&self, name: &str) -> Option<Arc<dyn RunPrompt>> {
        self.prompts.iter().find(|p| p.name() == name).cloned()
    }

    pub fn resource(&self, uri: &str) -> Option<Arc<dyn RunResource>> {
        self.resources.iter().find(|r| r.uri() == uri).cloned()
    }

    pub fn list_tools(&self) -> Vec<ToolDescriptor> {
        self.tools.iter().map(|t| t.descriptor()).collect()
    }

    pub fn list_prompts(&self) -> Vec<PromptDescriptor> {
        self.prompts.iter().map(|p| p.descriptor()).collect()
    }

    pub fn list_resources(&self) -> Vec<ResourceDescriptor> {
        self.resources.iter().map(|r| r.descriptor()).collect()
    }

    pub fn list_templates(&self) -> Vec<ResourceTemplateDescriptor> {
        self.templates.clone()
    }

    /// Flip a tool's enabled flag. Returns whether the flag changed.
    pub fn set_tool_enabled(&self, name: &str, enabled: bool) -> bool {
        self.tool(name).is_some_and(|t| t.set_enabled(enabled))
    }

    /// Flip a prompt's enabled flag. Returns whether the flag changed.
    pub fn set_prompt_enabled(&self, name: &str, enabled: bool) -> bool {
        self.prompt(name).is_some_and(|p| p.set_enabled(enabled))
    }

    /// Flip a resource's enabled flag. Returns whether the flag changed.
    pub fn set_resource_enabled(&self, uri: &str, enabled: bool) -> bool {
        self.resource(uri).is_some_and(|r| r.set_enabled(enabled))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::invoker::{FnTool, ToolReturn};
    use crate::plugin::schema::SchemarsProvider;
    use futures::FutureExt;
    use serde_json::Value;

    fn catalog_with_tool(name: &str) -> Catalog {
        let tool = FnTool::builder(name)
            .handler(|_args: Vec<Value>| async move { Ok(ToolReturn::from("ok")) }.boxed())
            .build(&SchemarsProvider)
            .unwrap();
        Catalog::new(vec![Arc::new(tool)], vec![], vec![], vec![])
    }

    #[test]
    fn lookup_and_listing_work_by_name() {
        let catalog = catalog_with_tool("ping");
        assert!(catalog.tool("ping").is_some());
        assert!(catalog.tool("pong").is_none());
        assert_eq!(catalog.list_tools().len(), 1);
    }

    #[test]
    fn toggling_enabled_is_reflected_in_descriptors() {
        let catalog = catalog_with_tool("ping");
        assert!(catalog.set_tool_enabled("ping", false));
        assert!(!catalog.list_tools()[0].enabled);
        // Setting the same value again reports no change.
        assert!(!catalog.set_tool_enabled("ping", false));
    }
}
