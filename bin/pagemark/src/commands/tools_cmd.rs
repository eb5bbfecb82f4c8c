use pagemark_core::{Config, Paths};
use pagemark_tools::browser::PageRefTool;
use pagemark_tools::{ToolContext, ToolRegistry};
use serde_json::Value;
use std::sync::Arc;

use super::page::{open_session, SourceArgs};

fn schema_function(schema: &Value) -> &Value {
    schema.get("function").unwrap_or(schema)
}

/// List all registered tools.
pub async fn list() -> anyhow::Result<()> {
    let registry = ToolRegistry::with_defaults();
    let schemas = registry.get_tool_schemas();

    println!();
    println!("Registered tools ({} total)", schemas.len());
    println!();

    for schema in &schemas {
        let func = schema_function(schema);
        let name = func["name"].as_str().unwrap_or("");
        let desc = func["description"].as_str().unwrap_or("");
        let short_desc: String = desc.chars().take(60).collect();
        let ellipsis = if desc.chars().count() > 60 { "..." } else { "" };
        println!("  {:<16} {}{}", name, short_desc, ellipsis);
    }
    println!();

    Ok(())
}

/// Show detailed info for a specific tool.
pub async fn info(tool_name: &str) -> anyhow::Result<()> {
    let registry = ToolRegistry::with_defaults();
    let schemas = registry.get_tool_schemas();

    let schema = schemas
        .iter()
        .find(|s| schema_function(s)["name"].as_str() == Some(tool_name))
        .ok_or_else(|| {
            anyhow::anyhow!(
                "Tool '{}' not found. Use `pagemark tools list` to see available tools.",
                tool_name
            )
        })?;

    let func = schema_function(schema);
    println!();
    println!("{}", func["name"].as_str().unwrap_or(""));
    println!();
    println!("  Description: {}", func["description"].as_str().unwrap_or(""));
    println!();

    let params = &func["parameters"];
    let required: Vec<&str> = params["required"]
        .as_array()
        .map(|arr| arr.iter().filter_map(|v| v.as_str()).collect())
        .unwrap_or_default();

    if let Some(props) = params["properties"].as_object() {
        println!("  Parameters:");
        for (name, prop) in props {
            let ty = prop["type"].as_str().unwrap_or("any");
            let marker = if required.contains(&name.as_str()) { " (required)" } else { "" };
            println!("    {:<12} {:<8}{}", name, ty, marker);
            if let Some(desc) = prop["description"].as_str() {
                println!("                 {}", desc);
            }
        }
        println!();
    }

    Ok(())
}

/// Run a direct tool call. With source flags the page tool is bound to that
/// page; otherwise it attaches to the configured browser on first use.
pub async fn call(tool_name: &str, params_json: &str, source: &SourceArgs) -> anyhow::Result<()> {
    let paths = Paths::new();
    let config = Config::load_or_default(&paths)?;

    let mut registry = ToolRegistry::with_defaults();
    if source.is_set() {
        let session = open_session(source, &paths, &config).await?;
        registry.register(Arc::new(PageRefTool::with_session(session)));
    }

    let params: Value = serde_json::from_str(params_json)
        .map_err(|e| anyhow::anyhow!("Failed to parse JSON params: {}\nInput: {}", e, params_json))?;

    let result = registry
        .execute(tool_name, ToolContext::new(config), params)
        .await
        .map_err(|e| {
            anyhow::anyhow!(
                "{}\nUse `pagemark tools info {}` for parameter details.",
                e,
                tool_name
            )
        })?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
