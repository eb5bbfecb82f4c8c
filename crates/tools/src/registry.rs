use std::collections::HashMap;
use std::sync::Arc;
use pagemark_core::{Error, Result};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::{Tool, ToolContext};
use crate::browser::PageRefTool;

#[derive(Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    pub fn with_defaults() -> Self {
        let mut registry = Self::new();

        // Page refs over the configured browser
        registry.register(Arc::new(PageRefTool::new()));

        registry
    }

    /// Register a tool, replacing any tool already registered under its name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let schema = tool.schema();
        debug!(name = schema.name, "Registering tool");
        self.tools.insert(schema.name.to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    pub fn get_tool_schemas(&self) -> Vec<Value> {
        let mut schemas: Vec<(String, Value)> = self
            .tools
            .iter()
            .map(|(name, tool)| {
                let schema = tool.schema();
                (
                    name.clone(),
                    json!({
                        "type": "function",
                        "function": {
                            "name": schema.name,
                            "description": schema.description,
                            "parameters": schema.parameters
                        }
                    }),
                )
            })
            .collect();
        schemas.sort_by(|a, b| a.0.cmp(&b.0));
        schemas.into_iter().map(|(_, schema)| schema).collect()
    }

    /// Get all registered tool names, sorted.
    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn execute(&self, name: &str, ctx: ToolContext, params: Value) -> Result<Value> {
        let tool = self.get(name).ok_or_else(|| {
            Error::Tool(format!("Unknown tool: {}", name))
        })?;

        // Validate parameters
        if let Err(e) = tool.validate(&params) {
            warn!(tool = name, error = %e, "Tool validation failed");
            return Err(e);
        }

        debug!(tool = name, "Executing tool");
        tool.execute(ctx, params).await
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::{FixtureDriver, FixtureNode, PageSession};
    use pagemark_core::Config;

    fn fixture_tool() -> Arc<dyn Tool> {
        let root = FixtureNode::new("RootWebArea")
            .with_children(vec![FixtureNode::new("button").named("OK")]);
        Arc::new(PageRefTool::with_session(PageSession::new(Arc::new(FixtureDriver::new(root)))))
    }

    #[test]
    fn test_registry_new_empty() {
        let reg = ToolRegistry::new();
        assert!(reg.tool_names().is_empty());
        assert!(reg.get("page_refs").is_none());
    }

    #[test]
    fn test_registry_with_defaults_has_page_refs() {
        let reg = ToolRegistry::with_defaults();
        assert_eq!(reg.tool_names(), vec!["page_refs"]);
        let schemas = reg.get_tool_schemas();
        assert_eq!(schemas.len(), 1);
        assert_eq!(schemas[0]["function"]["name"], "page_refs");
        assert_eq!(schemas[0]["type"], "function");
    }

    #[test]
    fn test_register_replaces_same_name() {
        let mut reg = ToolRegistry::with_defaults();
        reg.register(fixture_tool());
        assert_eq!(reg.tool_names().len(), 1);
    }

    #[tokio::test]
    async fn test_execute_unknown_tool() {
        let reg = ToolRegistry::new();
        let err = reg
            .execute("nope", ToolContext::new(Config::default()), json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Tool(_)));
    }

    #[tokio::test]
    async fn test_execute_validates_before_running() {
        let mut reg = ToolRegistry::new();
        reg.register(fixture_tool());
        let ctx = ToolContext::new(Config::default());

        let err = reg.execute("page_refs", ctx.clone(), json!({"action": "click"})).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        let out = reg.execute("page_refs", ctx, json!({"action": "snapshot"})).await.unwrap();
        assert_eq!(out["ref_count"], 1);
    }
}
