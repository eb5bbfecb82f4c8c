//! `PageDriver` backed by a live Chrome page over CDP.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use pagemark_core::BrowserConfig;

use super::cdp::{get_page_ws_url, wait_for_cdp_ready, CdpClient};
use super::driver::{
    name_matches, AccessibilityNode, CursorKind, CursorTarget, DriverError, ElementHandle,
    NodeLocator, NodeState, PageDriver, TreeQuery,
};

/// Elements collected by the cursor scan are capped at this many.
const MAX_CURSOR_CANDIDATES: usize = 500;

/// CSS path of an element: `tag:nth-of-type(i)` steps up to the first
/// unique id or the document element.
const PATH_OF_JS: &str = r#"(el) => {
  const parts = [];
  while (el && el.nodeType === 1 && el !== document.documentElement) {
    if (el.id && document.querySelectorAll('#' + CSS.escape(el.id)).length === 1) {
      parts.unshift('#' + CSS.escape(el.id));
      break;
    }
    let i = 1;
    let sib = el;
    while ((sib = sib.previousElementSibling)) if (sib.tagName === el.tagName) i++;
    parts.unshift(el.tagName.toLowerCase() + ':nth-of-type(' + i + ')');
    el = el.parentElement;
  }
  return parts.join(' > ');
}"#;

/// Finds elements that look clickable or focusable but carry no semantic
/// role, returning a CSS path for each. `__SCOPE__`, `__LIMIT__` and
/// `__PATH_OF__` are substituted before evaluation.
const CURSOR_SCAN_JS: &str = r#"(() => {
  const root = __SCOPE__ === null ? document.body : document.querySelector(__SCOPE__);
  if (!root) return [];
  const nativeTags = new Set(['A','BUTTON','INPUT','SELECT','TEXTAREA','OPTION','SUMMARY','LABEL']);
  const semanticRoles = new Set(['button','link','textbox','searchbox','combobox','listbox','menuitem',
    'menuitemcheckbox','menuitemradio','option','radio','checkbox','switch','slider','spinbutton','tab','treeitem']);
  const pathOf = __PATH_OF__;
  const out = [];
  for (const el of root.querySelectorAll('*')) {
    if (out.length >= __LIMIT__) break;
    if (nativeTags.has(el.tagName) || el.isContentEditable) continue;
    const role = el.getAttribute('role');
    if (role && semanticRoles.has(role)) continue;
    const style = getComputedStyle(el);
    const parentPointer = el.parentElement && getComputedStyle(el.parentElement).cursor === 'pointer';
    let kind = null;
    if (el.hasAttribute('onclick') || typeof el.onclick === 'function' || (style.cursor === 'pointer' && !parentPointer)) {
      kind = 'clickable';
    } else if (el.hasAttribute('tabindex') && el.tabIndex >= 0) {
      kind = 'focusable';
    }
    if (!kind) continue;
    const rect = el.getBoundingClientRect();
    out.push({ path: pathOf(el), kind, bounded: rect.width > 0 && rect.height > 0 });
  }
  return out;
})()"#;

#[derive(Debug, Deserialize)]
struct CursorCandidate {
    path: String,
    kind: CursorKind,
    bounded: bool,
}

/// Cursor scan result attached to a node by backend id.
#[derive(Debug, Clone, PartialEq)]
struct CursorHit {
    target: CursorTarget,
    bounded: bool,
}

pub struct CdpPageDriver {
    client: CdpClient,
    navigation_timeout: Duration,
}

impl CdpPageDriver {
    /// Attach to a running browser: the configured `wsUrl`, or the first page
    /// target discovered on the debug port.
    pub async fn connect(config: &BrowserConfig) -> Result<Self, DriverError> {
        let ws_url = match &config.ws_url {
            Some(url) => url.clone(),
            None => {
                let endpoint = config.debug_endpoint();
                wait_for_cdp_ready(&endpoint, Duration::from_secs(config.ready_timeout_secs))
                    .await?;
                get_page_ws_url(&endpoint).await?
            }
        };

        let client =
            CdpClient::connect(&ws_url, Duration::from_secs(config.command_timeout_secs)).await?;
        for domain in ["Page", "Runtime", "DOM", "Accessibility"] {
            client.enable_domain(domain).await?;
        }

        info!(ws_url = %ws_url, "Attached to page target");
        Ok(Self {
            client,
            navigation_timeout: Duration::from_millis(config.navigation_timeout_ms),
        })
    }

    async fn backend_for_selector(&self, selector: &str) -> Result<Option<i64>, DriverError> {
        let doc = self.client.document_node_id().await?;
        match self.client.query_selector(doc, selector).await? {
            Some(node_id) => Ok(Some(self.client.backend_node_id(node_id).await?)),
            None => Ok(None),
        }
    }

    async fn scan_cursor_elements(
        &self,
        scope: Option<&str>,
    ) -> Result<HashMap<i64, CursorHit>, DriverError> {
        let scope_literal = match scope {
            Some(s) => Value::String(s.to_string()).to_string(),
            None => "null".to_string(),
        };
        let script = CURSOR_SCAN_JS
            .replace("__SCOPE__", &scope_literal)
            .replace("__LIMIT__", &MAX_CURSOR_CANDIDATES.to_string())
            .replace("__PATH_OF__", PATH_OF_JS);

        let raw = self.client.evaluate_js(&script).await?;
        let candidates: Vec<CursorCandidate> = serde_json::from_value(raw)
            .map_err(|e| DriverError::Protocol(format!("unexpected cursor scan result: {}", e)))?;

        let mut hits = HashMap::new();
        let doc = self.client.document_node_id().await?;
        for candidate in candidates {
            let Some(node_id) = self.client.query_selector(doc, &candidate.path).await? else {
                continue;
            };
            let backend = self.client.backend_node_id(node_id).await?;
            hits.insert(
                backend,
                CursorHit {
                    target: CursorTarget {
                        kind: candidate.kind,
                        selector: candidate.path,
                    },
                    bounded: candidate.bounded,
                },
            );
        }
        debug!(count = hits.len(), "Cursor-interactive elements found");
        Ok(hits)
    }

    async fn wait_for_load(&self) -> Result<(), DriverError> {
        let start = Instant::now();
        tokio::time::sleep(Duration::from_millis(300)).await;
        loop {
            let state = self.client.evaluate_js("document.readyState").await?;
            if state.as_str() == Some("complete") {
                return Ok(());
            }
            if start.elapsed() > self.navigation_timeout {
                return Err(DriverError::Unavailable(format!(
                    "page did not finish loading within {}ms",
                    self.navigation_timeout.as_millis()
                )));
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    }
}

#[async_trait]
impl PageDriver for CdpPageDriver {
    async fn query_tree(&self, query: &TreeQuery) -> Result<AccessibilityNode, DriverError> {
        let root_backend = match &query.scope {
            Some(selector) => Some(
                self.backend_for_selector(selector)
                    .await?
                    .ok_or_else(|| DriverError::ScopeNotFound(selector.clone()))?,
            ),
            None => None,
        };

        let cursors = if query.cursor_interactive {
            self.scan_cursor_elements(query.scope.as_deref()).await?
        } else {
            HashMap::new()
        };

        let response = self.client.get_accessibility_tree().await?;
        let tree = tree_from_ax_nodes(&response, root_backend, &cursors).ok_or_else(|| {
            match &query.scope {
                Some(selector) => DriverError::ScopeNotFound(selector.clone()),
                None => DriverError::Protocol("accessibility tree is empty".into()),
            }
        })?;
        debug!(nodes = tree.count(), scoped = query.scope.is_some(), "Fetched accessibility tree");
        Ok(tree)
    }

    async fn resolve_by_role(
        &self,
        role: &str,
        name: Option<&str>,
        exact: bool,
    ) -> Result<Vec<ElementHandle>, DriverError> {
        let doc = self.client.document_node_id().await?;
        let exact_name = if exact { name } else { None };
        let nodes = self.client.query_ax_tree(doc, role, exact_name).await?;

        Ok(nodes
            .iter()
            .filter(|n| !is_ignored(n))
            .filter_map(handle_from_ax)
            .filter(|h| match name {
                Some(wanted) => name_matches(h.name.as_deref(), wanted, exact),
                None => !exact || h.name.is_none(),
            })
            .collect())
    }

    async fn resolve_by_selector(
        &self,
        selector: &str,
    ) -> Result<Option<ElementHandle>, DriverError> {
        let Some(backend) = self.backend_for_selector(selector).await? else {
            return Ok(None);
        };
        let partial = self.client.get_partial_ax_tree(backend).await?;
        let nodes = partial
            .get("nodes")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();

        let ax = nodes
            .iter()
            .find(|n| backend_id(n) == Some(backend))
            .or_else(|| nodes.first());
        Ok(Some(match ax.and_then(handle_from_ax) {
            Some(handle) => handle,
            None => ElementHandle {
                node: backend,
                role: "generic".to_string(),
                name: None,
            },
        }))
    }

    async fn selector_for(&self, node: i64) -> Result<Option<String>, DriverError> {
        let Some(object_id) = self.client.resolve_node(node).await? else {
            return Ok(None);
        };
        let declaration = format!(
            "function() {{ const el = this.nodeType === 1 ? this : this.parentElement; return el ? ({})(el) : null; }}",
            PATH_OF_JS
        );
        let path = self.client.call_function_on(&object_id, &declaration).await?;
        Ok(path.as_str().filter(|p| !p.is_empty()).map(str::to_string))
    }

    async fn navigate(&self, url: &str) -> Result<(), DriverError> {
        info!(url = %url, "Navigating");
        self.client.navigate(url).await?;
        self.wait_for_load().await
    }

    async fn reload(&self) -> Result<(), DriverError> {
        self.client.reload().await?;
        self.wait_for_load().await.map_err(|e| {
            warn!(error = %e, "Reload did not complete");
            e
        })
    }
}

/// String form of an AX value field (`role`, `name`, `value`).
fn ax_string(node: &Value, field: &str) -> Option<String> {
    let value = node.get(field)?.get("value")?;
    let text = match value {
        Value::String(s) => s.clone(),
        Value::Null => return None,
        other => other.to_string(),
    };
    (!text.is_empty()).then_some(text)
}

fn backend_id(node: &Value) -> Option<i64> {
    node.get("backendDOMNodeId").and_then(|v| v.as_i64())
}

fn is_ignored(node: &Value) -> bool {
    node.get("ignored").and_then(|v| v.as_bool()).unwrap_or(false)
}

fn handle_from_ax(node: &Value) -> Option<ElementHandle> {
    Some(ElementHandle {
        node: backend_id(node)?,
        role: ax_string(node, "role").unwrap_or_else(|| "generic".to_string()),
        name: ax_string(node, "name"),
    })
}

fn parse_state(node: &Value) -> NodeState {
    let mut state = NodeState::default();
    let Some(props) = node.get("properties").and_then(|v| v.as_array()) else {
        return state;
    };
    for prop in props {
        let prop_name = prop.get("name").and_then(|v| v.as_str()).unwrap_or("");
        let value = prop.get("value").and_then(|v| v.get("value"));
        let as_bool = value.and_then(|v| v.as_bool().or_else(|| v.as_str().map(|s| s == "true")));
        match prop_name {
            "focused" => state.focused = as_bool.unwrap_or(false),
            "checked" => state.checked = Some(as_bool.unwrap_or(false)),
            "disabled" => state.disabled = as_bool.unwrap_or(false),
            "expanded" => state.expanded = as_bool,
            "level" => state.level = value.and_then(|v| v.as_u64()).map(|l| l as u32),
            _ => {}
        }
    }
    state
}

/// Build our tree from a `getFullAXTree` response.
///
/// Ignored nodes are replaced by their children and `InlineTextBox` nodes are
/// dropped. With `root_backend` the tree starts at that DOM node, which is
/// kept even if the browser marks it ignored. Returns `None` if the root is
/// missing.
fn tree_from_ax_nodes(
    response: &Value,
    root_backend: Option<i64>,
    cursors: &HashMap<i64, CursorHit>,
) -> Option<AccessibilityNode> {
    let nodes = response.get("nodes")?.as_array()?;
    let index: HashMap<&str, &Value> = nodes
        .iter()
        .filter_map(|n| Some((n.get("nodeId")?.as_str()?, n)))
        .collect();

    let root = match root_backend {
        Some(backend) => nodes.iter().find(|n| backend_id(n) == Some(backend))?,
        None => nodes.first()?,
    };

    let mut out = Vec::with_capacity(1);
    convert_ax_node(root, &index, cursors, &mut out, true);
    out.pop()
}

fn convert_ax_node(
    node: &Value,
    index: &HashMap<&str, &Value>,
    cursors: &HashMap<i64, CursorHit>,
    out: &mut Vec<AccessibilityNode>,
    keep: bool,
) {
    let role = ax_string(node, "role").unwrap_or_default();
    if role == "InlineTextBox" {
        return;
    }

    let mut children = Vec::new();
    if let Some(child_ids) = node.get("childIds").and_then(|v| v.as_array()) {
        for child in child_ids
            .iter()
            .filter_map(|id| id.as_str())
            .filter_map(|id| index.get(id))
        {
            convert_ax_node(child, index, cursors, &mut children, false);
        }
    }

    if is_ignored(node) && !keep {
        out.extend(children);
        return;
    }

    let backend = backend_id(node);
    let locator = match backend {
        Some(id) => NodeLocator::Handle(id),
        None => NodeLocator::Path(format!(
            "ax:{}",
            node.get("nodeId").and_then(|v| v.as_str()).unwrap_or("")
        )),
    };
    let hit = backend.and_then(|id| cursors.get(&id));

    out.push(AccessibilityNode {
        role: if role.is_empty() { "generic".to_string() } else { role },
        name: ax_string(node, "name"),
        value: ax_string(node, "value"),
        locator,
        bounded: hit.map_or(true, |h| h.bounded),
        cursor: hit.map(|h| h.target.clone()),
        state: parse_state(node),
        children,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ax(id: &str, role: &str, name: &str, backend: i64, children: &[&str]) -> Value {
        json!({
            "nodeId": id,
            "ignored": false,
            "role": {"type": "role", "value": role},
            "name": {"type": "computedString", "value": name},
            "backendDOMNodeId": backend,
            "childIds": children,
        })
    }

    fn sample() -> Value {
        let mut wrapper = ax("3", "generic", "", 30, &["4", "5"]);
        wrapper["ignored"] = json!(true);
        let mut text = ax("5", "StaticText", "Welcome", 50, &["6"]);
        text["properties"] = json!([]);
        let mut checkbox = ax("7", "checkbox", "Remember me", 70, &[]);
        checkbox["properties"] = json!([
            {"name": "checked", "value": {"type": "tristate", "value": "true"}},
            {"name": "focused", "value": {"type": "booleanOrUndefined", "value": true}},
        ]);
        let mut heading = ax("8", "heading", "Sign in", 80, &[]);
        heading["properties"] = json!([{"name": "level", "value": {"type": "integer", "value": 2}}]);
        json!({
            "nodes": [
                ax("1", "RootWebArea", "Login", 10, &["2", "8"]),
                ax("2", "main", "", 20, &["3", "7"]),
                wrapper,
                ax("4", "button", "Submit", 40, &[]),
                text,
                ax("6", "InlineTextBox", "Welcome", 60, &[]),
                checkbox,
                heading,
            ]
        })
    }

    #[test]
    fn test_ignored_nodes_are_spliced() {
        let tree = tree_from_ax_nodes(&sample(), None, &HashMap::new()).unwrap();
        assert_eq!(tree.role, "RootWebArea");
        let main = &tree.children[0];
        let roles: Vec<&str> = main.children.iter().map(|c| c.role.as_str()).collect();
        assert_eq!(roles, vec!["button", "StaticText", "checkbox"]);
        // InlineTextBox under the static text is gone.
        assert!(main.children[1].children.is_empty());
        assert_eq!(main.children[0].locator, NodeLocator::Handle(40));
    }

    #[test]
    fn test_properties_parsed() {
        let tree = tree_from_ax_nodes(&sample(), None, &HashMap::new()).unwrap();
        let checkbox = &tree.children[0].children[2];
        assert_eq!(checkbox.state.checked, Some(true));
        assert!(checkbox.state.focused);
        assert_eq!(tree.children[1].state.level, Some(2));
        assert_eq!(tree.children[0].name, None);
    }

    #[test]
    fn test_scoped_root_kept_even_if_ignored() {
        let tree = tree_from_ax_nodes(&sample(), Some(30), &HashMap::new()).unwrap();
        assert_eq!(tree.role, "generic");
        assert_eq!(tree.children.len(), 2);
        assert!(tree_from_ax_nodes(&sample(), Some(999), &HashMap::new()).is_none());
    }

    #[test]
    fn test_cursor_hits_attached() {
        let mut cursors = HashMap::new();
        cursors.insert(
            50,
            CursorHit {
                target: CursorTarget {
                    kind: CursorKind::Clickable,
                    selector: "#welcome".into(),
                },
                bounded: false,
            },
        );
        let tree = tree_from_ax_nodes(&sample(), None, &cursors).unwrap();
        let text = &tree.children[0].children[1];
        assert_eq!(text.cursor.as_ref().map(|c| c.selector.as_str()), Some("#welcome"));
        assert!(!text.bounded);
        assert!(tree.children[0].children[0].bounded);
    }

    #[test]
    fn test_handle_from_ax() {
        let node = ax("4", "button", "Submit", 40, &[]);
        let handle = handle_from_ax(&node).unwrap();
        assert_eq!(handle.node, 40);
        assert_eq!(handle.role, "button");
        assert_eq!(handle.name.as_deref(), Some("Submit"));

        let unnamed = ax("9", "button", "", 90, &[]);
        assert_eq!(handle_from_ax(&unnamed).unwrap().name, None);
        assert!(handle_from_ax(&json!({"nodeId": "x"})).is_none());
    }

    #[test]
    fn test_cursor_candidates_deserialize() {
        let raw = json!([{"path": "div:nth-of-type(2)", "kind": "focusable", "bounded": true}]);
        let parsed: Vec<CursorCandidate> = serde_json::from_value(raw).unwrap();
        assert_eq!(parsed[0].kind, CursorKind::Focusable);
        assert!(CURSOR_SCAN_JS.contains("__SCOPE__") && CURSOR_SCAN_JS.contains("__LIMIT__"));
        assert!(CURSOR_SCAN_JS.contains("__PATH_OF__"));
        assert!(!PATH_OF_JS.contains("__"));
    }
}
