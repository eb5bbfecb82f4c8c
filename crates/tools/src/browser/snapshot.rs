//! Accessibility tree snapshot and ref assignment.
//!
//! Walks the tree a `PageDriver` reports, applies the filter flags, and emits
//! a compact text rendering annotated with deterministic refs (`e1`, `e2`, ...)
//! alongside the matching `RefTable`.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

use super::driver::{
    AccessibilityNode, DriverError, ElementHandle, NodeLocator, PageDriver, TreeQuery,
};
use super::error::RefError;
use super::refs::{ElementDescriptor, RefTable};
use pagemark_core::SnapshotDefaults;

/// Roles considered interactive (buttons, inputs, links, etc.).
pub const INTERACTIVE_ROLES: &[&str] = &[
    "button", "link", "textbox", "searchbox", "combobox", "listbox",
    "menuitem", "menuitemcheckbox", "menuitemradio", "option",
    "radio", "checkbox", "switch", "slider", "spinbutton",
    "tab", "treeitem",
];

/// Roles that carry content worth addressing when they have a name.
pub const CONTENT_ROLES: &[&str] = &[
    "heading", "cell", "gridcell", "columnheader", "rowheader",
    "listitem", "article", "region", "main", "navigation", "img",
];

/// Roles that are structural/container (skipped in compact mode if unnamed).
pub const STRUCTURAL_ROLES: &[&str] = &[
    "generic", "none", "presentation", "group", "section",
    "GenericContainer", "Section", "LayoutTable", "LayoutTableRow", "LayoutTableCell",
];

/// Text leaf roles; rendered, never addressed.
const TEXT_ROLES: &[&str] = &["StaticText", "text"];

/// Engine-internal nodes dropped together with their subtrees.
const SKIPPED_ROLES: &[&str] = &["InlineTextBox", "LineBreak"];

fn role_in(role: &str, set: &[&str]) -> bool {
    set.iter().any(|r| r.eq_ignore_ascii_case(role))
}

pub fn is_interactive_role(role: &str) -> bool {
    role_in(role, INTERACTIVE_ROLES)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotOptions {
    /// CSS selector restricting the snapshot to a subtree.
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub interactive: bool,
    #[serde(default)]
    pub compact: bool,
    #[serde(default)]
    pub cursor: bool,
    /// Deepest level kept; the root is depth 0.
    #[serde(default)]
    pub max_depth: Option<usize>,
}

impl SnapshotOptions {
    pub fn from_defaults(defaults: &SnapshotDefaults) -> Self {
        Self {
            scope: None,
            interactive: defaults.interactive,
            compact: defaults.compact,
            cursor: defaults.cursor,
            max_depth: defaults.max_depth,
        }
    }
}

/// Result of one build: rendered tree plus the refs it mentions.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub tree: String,
    pub refs: RefTable,
}

pub struct SnapshotBuilder<'a> {
    options: &'a SnapshotOptions,
    max_name_len: usize,
}

impl<'a> SnapshotBuilder<'a> {
    pub fn new(options: &'a SnapshotOptions) -> Self {
        Self {
            options,
            max_name_len: 80,
        }
    }

    pub fn with_max_name_len(mut self, max: usize) -> Self {
        self.max_name_len = max.max(4);
        self
    }

    /// Query the driver and build a snapshot. The ref cache is not touched;
    /// publishing the table is the caller's job once this returns `Ok`.
    ///
    /// Ordinals come from the driver's document-wide role query, so a ref
    /// taken from a scoped or depth-limited snapshot still picks the element
    /// that was shown when other elements share its role and name.
    pub async fn build(&self, driver: &dyn PageDriver) -> Result<Snapshot, RefError> {
        let query = TreeQuery {
            scope: self.options.scope.clone(),
            cursor_interactive: self.options.cursor,
        };
        let root = driver.query_tree(&query).await.map_err(|e| {
            warn!(error = %e, "Accessibility tree query failed");
            RefError::from(e)
        })?;

        let mut draft = self.draft(&root);
        draft.anchor(driver).await.map_err(|e| {
            warn!(error = %e, "Role query failed while numbering refs");
            RefError::from(e)
        })?;
        Ok(draft.render())
    }

    /// Build from an already fetched tree, counting ordinals within that
    /// tree. Deterministic for equal input.
    pub fn build_from_tree(&self, root: &AccessibilityNode) -> Snapshot {
        self.draft(root).render()
    }

    fn draft(&self, root: &AccessibilityNode) -> Draft {
        let mut walk = Walk::new(self);
        let lines = walk.visit(root, 0);
        let refs = walk.finish();
        Draft { lines, refs }
    }
}

/// How a visited node participates in the snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeClass {
    Interactive,
    Cursor,
    Content,
    Structural,
    Text,
    Other,
}

/// Descriptor fields collected during the walk; `nth` is settled afterwards.
struct PendingRef {
    role: String,
    name: Option<String>,
    locator: NodeLocator,
    selector: Option<String>,
    nth: Option<usize>,
}

impl PendingRef {
    fn into_descriptor(self) -> ElementDescriptor {
        match self.selector {
            Some(selector) => ElementDescriptor::Structural {
                role: self.role,
                name: self.name,
                selector,
            },
            None => ElementDescriptor::Semantic {
                role: self.role,
                name: self.name,
                nth: self.nth,
            },
        }
    }
}

/// One output line. `[nth=K]` goes between `head` and `tail` once the
/// ordinal of `ref_index` is known.
struct Line {
    indent: usize,
    head: String,
    tail: String,
    ref_index: Option<usize>,
}

/// Walk output before ordinals are final.
struct Draft {
    lines: Vec<Line>,
    refs: Vec<PendingRef>,
}

impl Draft {
    /// Re-number semantic refs against the whole document. An element the
    /// role query cannot find is addressed by selector instead.
    async fn anchor(&mut self, driver: &dyn PageDriver) -> Result<(), DriverError> {
        let mut queries: HashMap<(String, Option<String>), Vec<ElementHandle>> = HashMap::new();

        for pending in self.refs.iter_mut().filter(|p| p.selector.is_none()) {
            let node = match pending.locator {
                NodeLocator::Handle(id) => id,
                NodeLocator::Path(_) => {
                    debug!(role = %pending.role, "Ref has no engine handle, keeping snapshot ordinal");
                    continue;
                }
            };

            let key = (pending.role.clone(), pending.name.clone());
            if !queries.contains_key(&key) {
                let matches = driver
                    .resolve_by_role(&pending.role, pending.name.as_deref(), true)
                    .await?;
                queries.insert(key.clone(), matches);
            }
            let matches = queries.get(&key).map(Vec::as_slice).unwrap_or_default();

            match matches.iter().position(|h| h.node == node) {
                Some(index) => pending.nth = (matches.len() > 1).then_some(index),
                None => match driver.selector_for(node).await? {
                    Some(selector) => {
                        debug!(role = %pending.role, selector = %selector, "Role query misses element, using selector");
                        pending.selector = Some(selector);
                        pending.nth = None;
                    }
                    None => {
                        warn!(role = %pending.role, name = ?pending.name, "Element not found by role query, keeping snapshot ordinal");
                    }
                },
            }
        }
        debug!(queries = queries.len(), "Ref ordinals anchored");
        Ok(())
    }

    fn render(self) -> Snapshot {
        let Draft { lines, refs } = self;

        let mut tree = String::new();
        for line in &lines {
            tree.push_str(&"  ".repeat(line.indent));
            tree.push_str(&line.head);
            let nth = line
                .ref_index
                .and_then(|i| refs.get(i))
                .and_then(|p| p.nth)
                .filter(|k| *k > 0);
            if let Some(k) = nth {
                tree.push_str(&format!(" [nth={}]", k));
            }
            tree.push_str(&line.tail);
            tree.push('\n');
        }
        debug!(refs = refs.len(), lines = lines.len(), "Snapshot built");

        Snapshot {
            tree,
            refs: refs.into_iter().map(PendingRef::into_descriptor).collect(),
        }
    }
}

struct Walk<'b, 'a> {
    builder: &'b SnapshotBuilder<'a>,
    pending: Vec<PendingRef>,
    seen: HashSet<NodeLocator>,
    role_names: HashMap<(String, Option<String>), usize>,
}

impl<'b, 'a> Walk<'b, 'a> {
    fn new(builder: &'b SnapshotBuilder<'a>) -> Self {
        Self {
            builder,
            pending: Vec::new(),
            seen: HashSet::new(),
            role_names: HashMap::new(),
        }
    }

    fn options(&self) -> &SnapshotOptions {
        self.builder.options
    }

    /// A semantic role keeps a node semantic even with a cursor hint, so it
    /// stays in the role query's count.
    fn classify(&self, node: &AccessibilityNode) -> NodeClass {
        let content = role_in(&node.role, CONTENT_ROLES);
        let text = role_in(&node.role, TEXT_ROLES);
        if is_interactive_role(&node.role) {
            NodeClass::Interactive
        } else if content && node.accessible_name().is_some() {
            NodeClass::Content
        } else if self.options().cursor && node.cursor.is_some() && node.bounded && !text {
            NodeClass::Cursor
        } else if text {
            NodeClass::Text
        } else if role_in(&node.role, STRUCTURAL_ROLES) {
            NodeClass::Structural
        } else if content {
            NodeClass::Content
        } else {
            NodeClass::Other
        }
    }

    fn is_rendered(&self, class: NodeClass, node: &AccessibilityNode) -> bool {
        let opts = self.options();
        if opts.interactive {
            return matches!(class, NodeClass::Interactive | NodeClass::Cursor);
        }
        if opts.compact && class == NodeClass::Text {
            return node.accessible_name().is_some();
        }
        true
    }

    /// Compact mode folds an unnamed container into its parent unless it
    /// groups two or more branches.
    fn collapses(&self, class: NodeClass, node: &AccessibilityNode, branches: usize) -> bool {
        self.options().compact
            && class == NodeClass::Structural
            && node.accessible_name().is_none()
            && branches < 2
    }

    fn is_addressable(&self, class: NodeClass, node: &AccessibilityNode) -> bool {
        match class {
            NodeClass::Interactive | NodeClass::Cursor => true,
            NodeClass::Content => node.accessible_name().is_some(),
            _ => false,
        }
    }

    /// Pre-order visit. Returns the lines of this subtree, indented relative
    /// to the subtree root.
    fn visit(&mut self, node: &AccessibilityNode, depth: usize) -> Vec<Line> {
        if let Some(max) = self.options().max_depth {
            if depth > max {
                return Vec::new();
            }
        }
        if role_in(&node.role, SKIPPED_ROLES) {
            return Vec::new();
        }

        let class = self.classify(node);
        let rendered = self.is_rendered(class, node);

        let mut ref_index = None;
        if rendered && self.is_addressable(class, node) && self.seen.insert(node.locator.clone()) {
            ref_index = Some(self.assign(class, node));
        }

        let mut branches = 0;
        let mut child_lines = Vec::new();
        for child in &node.children {
            let lines = self.visit(child, depth + 1);
            if !lines.is_empty() {
                branches += 1;
            }
            child_lines.extend(lines);
        }

        if !rendered || self.collapses(class, node, branches) {
            return child_lines;
        }

        // Compact: a branch with no ref, no name and nothing below it is noise.
        if self.options().compact
            && ref_index.is_none()
            && node.accessible_name().is_none()
            && child_lines.is_empty()
        {
            return Vec::new();
        }

        let mut lines = Vec::with_capacity(child_lines.len() + 1);
        lines.push(self.render_line(class, node, ref_index));
        lines.extend(child_lines.into_iter().map(|mut line| {
            line.indent += 1;
            line
        }));
        lines
    }

    /// Record a ref for `node`; returns its index in `pending` (ref id - 1).
    fn assign(&mut self, class: NodeClass, node: &AccessibilityNode) -> usize {
        let name = node.accessible_name().map(str::to_string);
        let (role, selector) = match (class, &node.cursor) {
            (NodeClass::Cursor, Some(target)) => {
                (target.kind.sentinel_role().to_string(), Some(target.selector.clone()))
            }
            _ => (node.role.clone(), None),
        };

        let nth = if selector.is_none() {
            let count = self
                .role_names
                .entry((role.clone(), name.clone()))
                .or_insert(0);
            let ordinal = *count;
            *count += 1;
            Some(ordinal)
        } else {
            None
        };

        self.pending.push(PendingRef {
            role,
            name,
            locator: node.locator.clone(),
            selector,
            nth,
        });
        self.pending.len() - 1
    }

    fn render_line(&self, class: NodeClass, node: &AccessibilityNode, ref_index: Option<usize>) -> Line {
        let role = match (class, &node.cursor) {
            (NodeClass::Cursor, Some(target)) => target.kind.sentinel_role(),
            _ => node.role.as_str(),
        };

        let mut head = format!("- {}", role);
        if let Some(name) = node.accessible_name() {
            head.push_str(&format!(" \"{}\"", escape(&self.truncate(name))));
        }
        if let Some(index) = ref_index {
            head.push_str(&format!(" [ref=e{}]", index + 1));
        }

        let mut tail = String::new();
        let state = &node.state;
        if let Some(level) = state.level {
            tail.push_str(&format!(" [level={}]", level));
        }
        if state.focused {
            tail.push_str(" [focused]");
        }
        if let Some(true) = state.checked {
            tail.push_str(" [checked]");
        }
        if state.disabled {
            tail.push_str(" [disabled]");
        }
        if let Some(expanded) = state.expanded {
            tail.push_str(if expanded { " [expanded]" } else { " [collapsed]" });
        }
        if let Some(value) = node.value.as_deref() {
            if !value.is_empty() && Some(value) != node.accessible_name() {
                tail.push_str(&format!(" value=\"{}\"", escape(&self.truncate(value))));
            }
        }

        Line {
            indent: 0,
            head,
            tail,
            ref_index,
        }
    }

    fn truncate(&self, text: &str) -> String {
        let max = self.builder.max_name_len;
        if text.chars().count() > max {
            let cut: String = text.chars().take(max - 3).collect();
            format!("{}...", cut)
        } else {
            text.to_string()
        }
    }

    /// Keep `nth` only where a role+name pair repeats within the walk.
    fn finish(self) -> Vec<PendingRef> {
        let Walk {
            mut pending,
            role_names,
            ..
        } = self;

        for p in pending.iter_mut().filter(|p| p.selector.is_none()) {
            let repeated = role_names
                .get(&(p.role.clone(), p.name.clone()))
                .map_or(false, |count| *count > 1);
            if !repeated {
                p.nth = None;
            }
        }
        pending
    }
}

fn escape(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"").replace('\n', " ")
}
