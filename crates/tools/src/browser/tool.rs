//! PageRefTool: snapshot/resolve over one page session.

use async_trait::async_trait;
use pagemark_core::{Error, Result};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

use crate::{Tool, ToolContext, ToolSchema};
use super::cdp_driver::CdpPageDriver;
use super::session::PageSession;
use super::snapshot::SnapshotOptions;

const ACTIONS: &[&str] = &["snapshot", "resolve", "navigate", "reload", "invalidate"];

/// Tool over a single page. The session is created on first use from the
/// browser section of the config unless one was supplied up front.
pub struct PageRefTool {
    session: Arc<Mutex<Option<PageSession>>>,
}

impl PageRefTool {
    /// Attach lazily to the browser named in the config.
    pub fn new() -> Self {
        Self {
            session: Arc::new(Mutex::new(None)),
        }
    }

    /// Work on an existing session (any driver).
    pub fn with_session(session: PageSession) -> Self {
        Self {
            session: Arc::new(Mutex::new(Some(session))),
        }
    }
}

impl Default for PageRefTool {
    fn default() -> Self {
        Self::new()
    }
}

fn snapshot_options(session: &PageSession, params: &Value) -> SnapshotOptions {
    let mut options = session.default_options();
    if let Some(v) = params["interactive"].as_bool() {
        options.interactive = v;
    }
    if let Some(v) = params["compact"].as_bool() {
        options.compact = v;
    }
    if let Some(v) = params["cursor"].as_bool() {
        options.cursor = v;
    }
    if let Some(v) = params["max_depth"].as_u64() {
        options.max_depth = Some(v as usize);
    }
    options.scope = params["scope"]
        .as_str()
        .filter(|s| !s.trim().is_empty())
        .map(str::to_string);
    options
}

#[async_trait]
impl Tool for PageRefTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "page_refs",
            description: "Accessibility snapshot of the current page with compact element refs (e1, e2, ...). 'snapshot' renders the tree and replaces all refs; 'resolve' turns a ref from the latest snapshot into an element handle; 'navigate'/'reload' load a document and drop every ref; 'invalidate' drops refs without touching the page. Refs are only valid until the next snapshot or navigation.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "action": {
                        "type": "string",
                        "enum": ACTIONS,
                        "description": "Operation to run. ALWAYS specify action explicitly."
                    },
                    "ref": {
                        "type": "string",
                        "description": "Ref from the latest snapshot, 'e3' or '@e3' (for 'resolve')"
                    },
                    "url": {
                        "type": "string",
                        "description": "URL to load (for 'navigate')"
                    },
                    "interactive": {
                        "type": "boolean",
                        "description": "Only interactive elements, flattened (default from config: false)"
                    },
                    "compact": {
                        "type": "boolean",
                        "description": "Skip unnamed structural nodes and empty branches (default from config: true)"
                    },
                    "cursor": {
                        "type": "boolean",
                        "description": "Also ref elements that are clickable/focusable only through cursor:pointer, onclick or tabindex"
                    },
                    "max_depth": {
                        "type": "integer",
                        "minimum": 0,
                        "description": "Deepest tree level to include; the root is 0"
                    },
                    "scope": {
                        "type": "string",
                        "description": "CSS selector restricting the snapshot to a subtree"
                    }
                },
                "required": ["action"]
            }),
        }
    }

    fn validate(&self, params: &Value) -> Result<()> {
        let action = params["action"]
            .as_str()
            .ok_or_else(|| Error::Validation("Missing required parameter: action".into()))?;
        if !ACTIONS.contains(&action) {
            return Err(Error::Validation(format!(
                "Unknown action '{}'. Expected one of: {}",
                action,
                ACTIONS.join(", ")
            )));
        }
        match action {
            "resolve" if params["ref"].as_str().is_none() => {
                Err(Error::Validation("resolve requires 'ref'".into()))
            }
            "navigate" if params["url"].as_str().map_or(true, |u| u.trim().is_empty()) => {
                Err(Error::Validation("navigate requires 'url'".into()))
            }
            _ if !params["max_depth"].is_null() && params["max_depth"].as_u64().is_none() => {
                Err(Error::Validation("max_depth must be a non-negative integer".into()))
            }
            _ => Ok(()),
        }
    }

    async fn execute(&self, ctx: ToolContext, params: Value) -> Result<Value> {
        let action = params["action"].as_str().unwrap_or("snapshot");

        let mut guard = self.session.lock().await;
        if guard.is_none() {
            let driver = CdpPageDriver::connect(&ctx.config.browser)
                .await
                .map_err(|e| Error::Browser(e.to_string()))?;
            *guard = Some(PageSession::new(Arc::new(driver)).with_defaults(ctx.config.snapshot.clone()));
        }
        let session = guard
            .as_mut()
            .ok_or_else(|| Error::Browser("page session unavailable".into()))?;

        match action {
            "snapshot" => {
                let options = snapshot_options(session, &params);
                let result = session.snapshot(&options).await?;
                Ok(json!({
                    "snapshot": result.tree,
                    "refs": result.refs,
                    "ref_count": result.refs.len(),
                    "version": result.version,
                }))
            }
            "resolve" => {
                let token = params["ref"].as_str().unwrap_or_default();
                let element = session.resolve(token).await?;
                let descriptor = session.lookup(token)?.clone();
                Ok(json!({
                    "ref": token,
                    "element": element,
                    "descriptor": descriptor,
                    "version": session.cache().version(),
                }))
            }
            "navigate" => {
                let url = params["url"].as_str().unwrap_or_default();
                session.navigate(url).await?;
                info!(url, "Page loaded, refs dropped");
                Ok(json!({"status": "navigated", "url": url}))
            }
            "reload" => {
                session.reload().await?;
                Ok(json!({"status": "reloaded"}))
            }
            "invalidate" => {
                session.invalidate();
                Ok(json!({"status": "invalidated"}))
            }
            other => Err(Error::Tool(format!("Unknown page_refs action: {}", other))),
        }
    }
}
