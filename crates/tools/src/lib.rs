pub mod browser;
pub mod registry;

pub use registry::ToolRegistry;

use async_trait::async_trait;
use pagemark_core::{Config, Result};
use serde_json::Value;

#[derive(Clone)]
pub struct ToolContext {
    pub config: Config,
}

impl ToolContext {
    pub fn new(config: Config) -> Self {
        Self { config }
    }
}

pub struct ToolSchema {
    pub name: &'static str,
    pub description: &'static str,
    pub parameters: Value,
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn schema(&self) -> ToolSchema;
    fn validate(&self, params: &Value) -> Result<()>;
    async fn execute(&self, ctx: ToolContext, params: Value) -> Result<Value>;
}
