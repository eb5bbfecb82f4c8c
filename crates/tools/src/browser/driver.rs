//! The page capability the ref system is built on.
//!
//! A `PageDriver` produces accessibility trees and turns role/name queries or
//! raw selectors into element handles. The CDP implementation lives in
//! `cdp_driver`, an in-memory one in `fixture`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DriverError {
    /// The scope selector matched nothing.
    #[error("scope '{0}' matched no nodes")]
    ScopeNotFound(String),

    /// No page is loaded, the browser is gone, or a wait timed out.
    #[error("{0}")]
    Unavailable(String),

    /// The browser answered, but not in a shape we can use.
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// How a node can be found again: a direct engine handle or a structural path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeLocator {
    Handle(i64),
    Path(String),
}

/// Why a node without a semantic role is still worth clicking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CursorKind {
    /// `cursor: pointer` or a click handler.
    Clickable,
    /// Only a non-negative `tabindex`.
    Focusable,
}

impl CursorKind {
    /// Sentinel role recorded for elements found this way.
    pub fn sentinel_role(&self) -> &'static str {
        match self {
            CursorKind::Clickable => "clickable",
            CursorKind::Focusable => "focusable",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorTarget {
    pub kind: CursorKind,
    /// Structural selector that re-locates the element.
    pub selector: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeState {
    #[serde(default)]
    pub level: Option<u32>,
    #[serde(default)]
    pub checked: Option<bool>,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub expanded: Option<bool>,
    #[serde(default)]
    pub focused: bool,
}

/// One node of the accessibility tree as reported by the driver.
#[derive(Debug, Clone, PartialEq)]
pub struct AccessibilityNode {
    pub role: String,
    pub name: Option<String>,
    pub value: Option<String>,
    pub locator: NodeLocator,
    /// Whether the element has a layout box.
    pub bounded: bool,
    pub cursor: Option<CursorTarget>,
    pub state: NodeState,
    pub children: Vec<AccessibilityNode>,
}

impl AccessibilityNode {
    pub fn new(role: impl Into<String>, locator: NodeLocator) -> Self {
        Self {
            role: role.into(),
            name: None,
            value: None,
            locator,
            bounded: true,
            cursor: None,
            state: NodeState::default(),
            children: Vec::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_children(mut self, children: Vec<AccessibilityNode>) -> Self {
        self.children = children;
        self
    }

    /// Accessible name, treating an empty string as absent.
    pub fn accessible_name(&self) -> Option<&str> {
        self.name.as_deref().filter(|n| !n.is_empty())
    }

    pub fn count(&self) -> usize {
        1 + self.children.iter().map(|c| c.count()).sum::<usize>()
    }
}

/// Parameters for a tree query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TreeQuery {
    /// CSS selector restricting the tree to a subtree.
    pub scope: Option<String>,
    /// Also detect pointer/onclick/tabindex elements lacking a semantic role.
    pub cursor_interactive: bool,
}

/// Addressable element handed back to action tools.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementHandle {
    /// Engine-side node id (CDP backend node id, or fixture index).
    pub node: i64,
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[async_trait]
pub trait PageDriver: Send + Sync {
    /// Accessibility tree of the document, or of the subtree under `query.scope`.
    async fn query_tree(&self, query: &TreeQuery) -> Result<AccessibilityNode, DriverError>;

    /// All elements with `role`, in document order, optionally filtered by name.
    /// `exact` requires a full, case-sensitive name match; with `exact` and no
    /// name, only unnamed elements match.
    async fn resolve_by_role(
        &self,
        role: &str,
        name: Option<&str>,
        exact: bool,
    ) -> Result<Vec<ElementHandle>, DriverError>;

    /// First element matching a structural selector.
    async fn resolve_by_selector(&self, selector: &str)
        -> Result<Option<ElementHandle>, DriverError>;

    /// Structural selector that finds the element with handle `node` again,
    /// for elements a role query cannot reach. `None` when the driver has no
    /// way to build one.
    async fn selector_for(&self, _node: i64) -> Result<Option<String>, DriverError> {
        Ok(None)
    }

    /// Load a new document. Callers must invalidate refs afterwards.
    async fn navigate(&self, _url: &str) -> Result<(), DriverError> {
        Err(DriverError::Unavailable("navigate is not supported by this driver".into()))
    }

    async fn reload(&self) -> Result<(), DriverError> {
        Err(DriverError::Unavailable("reload is not supported by this driver".into()))
    }
}

/// Name comparison shared by drivers: exact, or case-insensitive containment.
pub fn name_matches(candidate: Option<&str>, wanted: &str, exact: bool) -> bool {
    let candidate = candidate.unwrap_or("");
    if exact {
        candidate == wanted
    } else {
        candidate.to_lowercase().contains(&wanted.to_lowercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentinel_roles() {
        assert_eq!(CursorKind::Clickable.sentinel_role(), "clickable");
        assert_eq!(CursorKind::Focusable.sentinel_role(), "focusable");
    }

    #[test]
    fn test_accessible_name_ignores_empty() {
        let node = AccessibilityNode::new("button", NodeLocator::Handle(1)).with_name("");
        assert_eq!(node.accessible_name(), None);
        let node = node.with_name("Go");
        assert_eq!(node.accessible_name(), Some("Go"));
    }

    #[test]
    fn test_count() {
        let tree = AccessibilityNode::new("RootWebArea", NodeLocator::Handle(1)).with_children(vec![
            AccessibilityNode::new("button", NodeLocator::Handle(2)),
            AccessibilityNode::new("list", NodeLocator::Handle(3))
                .with_children(vec![AccessibilityNode::new("listitem", NodeLocator::Handle(4))]),
        ]);
        assert_eq!(tree.count(), 4);
    }

    #[test]
    fn test_name_matches() {
        assert!(name_matches(Some("Save"), "Save", true));
        assert!(!name_matches(Some("Save draft"), "Save", true));
        assert!(name_matches(Some("Save draft"), "save", false));
        assert!(!name_matches(None, "Save", true));
    }
}
