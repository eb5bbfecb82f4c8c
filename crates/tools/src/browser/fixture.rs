//! In-memory `PageDriver` backed by a JSON page description.
//!
//! Nodes are numbered in document (pre-order) order starting at 1; those
//! numbers are the handles the driver hands out. A fixture can hold several
//! pages keyed by URL so navigation can be exercised without a browser.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

use super::driver::{
    name_matches, AccessibilityNode, CursorKind, CursorTarget, DriverError, ElementHandle,
    NodeLocator, NodeState, PageDriver, TreeQuery,
};

fn default_visible() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FixtureNode {
    pub role: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
    /// DOM id, matched by `#id` selectors.
    #[serde(default)]
    pub id: Option<String>,
    /// Structural path, matched verbatim by selectors.
    #[serde(default)]
    pub path: Option<String>,
    /// Marks a cursor-interactive element (pointer/onclick or tabindex).
    #[serde(default)]
    pub cursor: Option<CursorKind>,
    #[serde(default = "default_visible")]
    pub visible: bool,
    #[serde(default)]
    pub state: NodeState,
    #[serde(default)]
    pub children: Vec<FixtureNode>,
}

impl FixtureNode {
    pub fn new(role: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            name: None,
            value: None,
            id: None,
            path: None,
            cursor: None,
            visible: true,
            state: NodeState::default(),
            children: Vec::new(),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_children(mut self, children: Vec<FixtureNode>) -> Self {
        self.children = children;
        self
    }

    pub fn clickable(mut self, path: impl Into<String>) -> Self {
        self.cursor = Some(CursorKind::Clickable);
        self.path = Some(path.into());
        self
    }

    pub fn focusable(mut self, path: impl Into<String>) -> Self {
        self.cursor = Some(CursorKind::Focusable);
        self.path = Some(path.into());
        self
    }

    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }
}

/// Flattened view of one node, in document order.
#[derive(Debug, Clone)]
struct Entry {
    node: i64,
    role: String,
    name: Option<String>,
    selectors: Vec<String>,
}

#[derive(Debug, Default)]
struct FixtureState {
    pages: HashMap<String, FixtureNode>,
    current: Option<FixtureNode>,
    current_url: Option<String>,
    navigations: usize,
    resolved_selectors: Vec<String>,
}

#[derive(Debug, Default)]
pub struct FixtureDriver {
    state: Mutex<FixtureState>,
}

impl FixtureDriver {
    /// Driver with `root` already loaded.
    pub fn new(root: FixtureNode) -> Self {
        let driver = Self::default();
        driver.lock().current = Some(root);
        driver
    }

    /// Driver with no page loaded; tree queries fail as unavailable.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Register a page reachable through `navigate(url)`.
    pub fn with_page(self, url: impl Into<String>, root: FixtureNode) -> Self {
        self.lock().pages.insert(url.into(), root);
        self
    }

    /// Load a fixture page from a JSON file.
    pub fn from_file(path: &Path) -> pagemark_core::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let root: FixtureNode = serde_json::from_str(&content)?;
        Ok(Self::new(root))
    }

    /// Swap the loaded document in place, as a page mutation would.
    pub fn set_root(&self, root: FixtureNode) {
        self.lock().current = Some(root);
    }

    /// Drop the loaded document, as a crashed or closed tab would.
    pub fn unload(&self) {
        self.lock().current = None;
    }

    pub fn current_url(&self) -> Option<String> {
        self.lock().current_url.clone()
    }

    pub fn navigations(&self) -> usize {
        self.lock().navigations
    }

    /// Selectors passed to `resolve_by_selector`, oldest first.
    pub fn resolved_selectors(&self) -> Vec<String> {
        self.lock().resolved_selectors.clone()
    }

    fn lock(&self) -> MutexGuard<'_, FixtureState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn loaded_root(&self) -> Result<FixtureNode, DriverError> {
        self.lock()
            .current
            .clone()
            .ok_or_else(|| DriverError::Unavailable("no page loaded".into()))
    }
}

fn synthetic_selector(node: i64) -> String {
    format!("[data-pm-node=\"{}\"]", node)
}

fn selectors_for(fixture: &FixtureNode, node: i64) -> Vec<String> {
    let mut selectors = vec![synthetic_selector(node)];
    if let Some(path) = &fixture.path {
        selectors.push(path.clone());
    }
    if let Some(id) = &fixture.id {
        selectors.push(format!("#{}", id));
    }
    selectors
}

/// Convert to driver nodes, numbering in pre-order and recording entries.
fn convert(
    fixture: &FixtureNode,
    counter: &mut i64,
    cursor_interactive: bool,
    entries: &mut Vec<Entry>,
) -> AccessibilityNode {
    *counter += 1;
    let node = *counter;
    let selectors = selectors_for(fixture, node);

    entries.push(Entry {
        node,
        role: fixture.role.clone(),
        name: fixture.name.clone(),
        selectors: selectors.clone(),
    });

    let cursor = match fixture.cursor {
        Some(kind) if cursor_interactive => Some(CursorTarget {
            kind,
            selector: fixture
                .path
                .clone()
                .unwrap_or_else(|| synthetic_selector(node)),
        }),
        _ => None,
    };

    let children = fixture
        .children
        .iter()
        .map(|c| convert(c, counter, cursor_interactive, entries))
        .collect();

    AccessibilityNode {
        role: fixture.role.clone(),
        name: fixture.name.clone(),
        value: fixture.value.clone(),
        locator: NodeLocator::Handle(node),
        bounded: fixture.visible,
        cursor,
        state: fixture.state.clone(),
        children,
    }
}

fn flatten(root: &FixtureNode) -> (AccessibilityNode, Vec<Entry>) {
    let mut entries = Vec::new();
    let mut counter = 0;
    let tree = convert(root, &mut counter, true, &mut entries);
    (tree, entries)
}

fn find_subtree(node: AccessibilityNode, target: i64) -> Option<AccessibilityNode> {
    if node.locator == NodeLocator::Handle(target) {
        return Some(node);
    }
    node.children
        .into_iter()
        .find_map(|child| find_subtree(child, target))
}

#[async_trait]
impl PageDriver for FixtureDriver {
    async fn query_tree(&self, query: &TreeQuery) -> Result<AccessibilityNode, DriverError> {
        let root = self.loaded_root()?;
        let mut entries = Vec::new();
        let mut counter = 0;
        let tree = convert(&root, &mut counter, query.cursor_interactive, &mut entries);

        match &query.scope {
            None => Ok(tree),
            Some(selector) => {
                let target = entries
                    .iter()
                    .find(|e| e.selectors.iter().any(|s| s == selector))
                    .map(|e| e.node)
                    .ok_or_else(|| DriverError::ScopeNotFound(selector.clone()))?;
                find_subtree(tree, target).ok_or_else(|| DriverError::ScopeNotFound(selector.clone()))
            }
        }
    }

    async fn resolve_by_role(
        &self,
        role: &str,
        name: Option<&str>,
        exact: bool,
    ) -> Result<Vec<ElementHandle>, DriverError> {
        let (_, entries) = flatten(&self.loaded_root()?);
        Ok(entries
            .into_iter()
            .filter(|e| e.role == role)
            .filter(|e| match name {
                Some(wanted) => name_matches(e.name.as_deref(), wanted, exact),
                None => !exact || e.name.as_deref().map_or(true, str::is_empty),
            })
            .map(|e| ElementHandle {
                node: e.node,
                role: e.role,
                name: e.name,
            })
            .collect())
    }

    async fn resolve_by_selector(
        &self,
        selector: &str,
    ) -> Result<Option<ElementHandle>, DriverError> {
        let (_, entries) = flatten(&self.loaded_root()?);
        self.lock().resolved_selectors.push(selector.to_string());
        Ok(entries
            .into_iter()
            .find(|e| e.selectors.iter().any(|s| s == selector))
            .map(|e| ElementHandle {
                node: e.node,
                role: e.role,
                name: e.name,
            }))
    }

    async fn selector_for(&self, node: i64) -> Result<Option<String>, DriverError> {
        let (_, entries) = flatten(&self.loaded_root()?);
        Ok(entries
            .into_iter()
            .find(|e| e.node == node)
            .and_then(|e| e.selectors.last().cloned()))
    }

    async fn navigate(&self, url: &str) -> Result<(), DriverError> {
        let mut state = self.lock();
        let page = state
            .pages
            .get(url)
            .cloned()
            .ok_or_else(|| DriverError::Unavailable(format!("no fixture page for '{}'", url)))?;
        debug!(url, "Fixture navigation");
        state.current = Some(page);
        state.current_url = Some(url.to_string());
        state.navigations += 1;
        Ok(())
    }

    async fn reload(&self) -> Result<(), DriverError> {
        let mut state = self.lock();
        if state.current.is_none() {
            return Err(DriverError::Unavailable("no page loaded".into()));
        }
        state.navigations += 1;
        Ok(())
    }
}
