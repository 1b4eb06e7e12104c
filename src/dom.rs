//! Headless DOM owned by one engine instance.
//!
//! The engine's contract is expressed against a live DOM subtree; outside a
//! browser that subtree is this arena: a node vector holding elements, text
//! nodes and document fragments, plus per-node event listener registrations.
//! Selector matching covers the subset playground code actually uses: tag,
//! `#id`, `.class`, `[attr]`, `[attr=value]`, compound selectors, the
//! descendant combinator, and comma-separated lists.

use anyhow::{anyhow, bail, Result};

pub type NodeId = u32;

#[derive(Debug, Clone)]
pub(crate) enum NodeKind {
    Element { tag: String },
    Text(String),
    Fragment,
}

#[derive(Debug, Clone)]
struct Listener {
    event: String,
    id: u32,
}

#[derive(Debug, Clone)]
pub(crate) struct Node {
    pub(crate) kind: NodeKind,
    parent: Option<NodeId>,
    pub(crate) children: Vec<NodeId>,
    /// Ordered pairs so serialization is deterministic.
    pub(crate) attrs: Vec<(String, String)>,
    listeners: Vec<Listener>,
}

impl Node {
    fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            parent: None,
            children: Vec::new(),
            attrs: Vec::new(),
            listeners: Vec::new(),
        }
    }
}

/// The virtual document: a head element for style injection and a container
/// element acting as the mount subtree. Nodes are never reclaimed; a detached
/// subtree simply becomes unreachable from the container, which also retires
/// any listeners registered on it.
#[derive(Debug)]
pub struct Document {
    nodes: Vec<Node>,
    head: NodeId,
    container: NodeId,
    next_listener_id: u32,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    pub fn new() -> Self {
        let mut doc = Self {
            nodes: Vec::new(),
            head: 0,
            container: 0,
            next_listener_id: 1,
        };
        doc.head = doc.push_node(Node::new(NodeKind::Element { tag: "head".into() }));
        doc.container = doc.push_node(Node::new(NodeKind::Element { tag: "div".into() }));
        doc
    }

    pub fn head(&self) -> NodeId {
        self.head
    }

    pub fn container(&self) -> NodeId {
        self.container
    }

    fn push_node(&mut self, node: Node) -> NodeId {
        let id = self.nodes.len() as NodeId;
        self.nodes.push(node);
        id
    }

    fn node(&self, id: NodeId) -> Result<&Node> {
        self.nodes
            .get(id as usize)
            .ok_or_else(|| anyhow!("unknown node {}", id))
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        self.nodes
            .get_mut(id as usize)
            .ok_or_else(|| anyhow!("unknown node {}", id))
    }

    pub(crate) fn node_unchecked(&self, id: NodeId) -> &Node {
        &self.nodes[id as usize]
    }

    fn require_element(&self, id: NodeId) -> Result<()> {
        match self.node(id)?.kind {
            NodeKind::Element { .. } => Ok(()),
            _ => bail!("node {} is not an element", id),
        }
    }

    // ------------------------------------------------------------------
    // Creation
    // ------------------------------------------------------------------

    pub fn create_element(&mut self, tag: &str) -> NodeId {
        self.push_node(Node::new(NodeKind::Element {
            tag: tag.to_ascii_lowercase(),
        }))
    }

    pub fn create_text(&mut self, text: &str) -> NodeId {
        self.push_node(Node::new(NodeKind::Text(text.to_string())))
    }

    pub fn create_fragment(&mut self) -> NodeId {
        self.push_node(Node::new(NodeKind::Fragment))
    }

    // ------------------------------------------------------------------
    // Tree manipulation
    // ------------------------------------------------------------------

    fn detach(&mut self, child: NodeId) -> Result<()> {
        if let Some(parent) = self.node(child)?.parent {
            self.nodes[parent as usize].children.retain(|c| *c != child);
            self.nodes[child as usize].parent = None;
        }
        Ok(())
    }

    fn is_ancestor_of(&self, candidate: NodeId, node: NodeId) -> bool {
        let mut cursor = self.nodes[node as usize].parent;
        while let Some(current) = cursor {
            if current == candidate {
                return true;
            }
            cursor = self.nodes[current as usize].parent;
        }
        false
    }

    /// Append `child` to `parent`, detaching it from any previous parent.
    /// Appending a fragment moves its children and leaves it empty.
    pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
        self.require_element(parent)?;
        self.node(child)?;
        if child == parent || self.is_ancestor_of(child, parent) {
            bail!("cannot append an ancestor to its descendant");
        }

        if matches!(self.nodes[child as usize].kind, NodeKind::Fragment) {
            let moved = std::mem::take(&mut self.nodes[child as usize].children);
            for grandchild in moved {
                self.nodes[grandchild as usize].parent = Some(parent);
                self.nodes[parent as usize].children.push(grandchild);
            }
            return Ok(());
        }

        self.detach(child)?;
        self.nodes[child as usize].parent = Some(parent);
        self.nodes[parent as usize].children.push(child);
        Ok(())
    }

    pub fn remove_child(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
        self.node(parent)?;
        if self.node(child)?.parent != Some(parent) {
            bail!("node {} is not a child of node {}", child, parent);
        }
        self.detach(child)
    }

    /// Drop every child of `node`. Listeners inside the removed subtree are
    /// discarded along with it.
    pub fn clear_children(&mut self, node: NodeId) -> Result<()> {
        let children = std::mem::take(&mut self.node_mut(node)?.children);
        for child in children {
            self.nodes[child as usize].parent = None;
        }
        Ok(())
    }

    /// Append detached parse output produced by [`crate::html`].
    pub(crate) fn adopt_children(&mut self, parent: NodeId, children: Vec<NodeId>) {
        for child in children {
            self.nodes[child as usize].parent = Some(parent);
            self.nodes[parent as usize].children.push(child);
        }
    }

    /// Parser-internal attach that skips the element check so fragment roots
    /// can hold children while a parse is in flight.
    pub(crate) fn attach_raw(&mut self, parent: NodeId, child: NodeId) {
        self.nodes[child as usize].parent = Some(parent);
        self.nodes[parent as usize].children.push(child);
    }

    /// Detach and return the children of `node`.
    pub(crate) fn take_children(&mut self, node: NodeId) -> Vec<NodeId> {
        let children = std::mem::take(&mut self.nodes[node as usize].children);
        for child in &children {
            self.nodes[*child as usize].parent = None;
        }
        children
    }

    // ------------------------------------------------------------------
    // Attributes and content
    // ------------------------------------------------------------------

    pub fn tag_name(&self, id: NodeId) -> Result<String> {
        match &self.node(id)?.kind {
            NodeKind::Element { tag } => Ok(tag.clone()),
            _ => bail!("node {} is not an element", id),
        }
    }

    pub fn get_attr(&self, id: NodeId, name: &str) -> Result<Option<String>> {
        let name = name.to_ascii_lowercase();
        Ok(self
            .node(id)?
            .attrs
            .iter()
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value.clone()))
    }

    pub fn set_attr(&mut self, id: NodeId, name: &str, value: &str) -> Result<()> {
        self.require_element(id)?;
        let name = name.to_ascii_lowercase();
        let node = self.node_mut(id)?;
        if let Some(entry) = node.attrs.iter_mut().find(|(key, _)| *key == name) {
            entry.1 = value.to_string();
        } else {
            node.attrs.push((name, value.to_string()));
        }
        Ok(())
    }

    pub fn remove_attr(&mut self, id: NodeId, name: &str) -> Result<()> {
        let name = name.to_ascii_lowercase();
        self.node_mut(id)?.attrs.retain(|(key, _)| *key != name);
        Ok(())
    }

    /// Concatenated text of all descendant text nodes.
    ///
    /// Iterative: nesting depth is input-controlled and must never translate
    /// into call stack depth.
    pub fn text_content(&self, id: NodeId) -> Result<String> {
        self.node(id)?;
        let mut out = String::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let node = &self.nodes[current as usize];
            match &node.kind {
                NodeKind::Text(text) => out.push_str(text),
                _ => stack.extend(node.children.iter().rev().copied()),
            }
        }
        Ok(out)
    }

    /// Replace all children with a single text node (or nothing for "").
    pub fn set_text_content(&mut self, id: NodeId, text: &str) -> Result<()> {
        self.require_element(id)?;
        self.clear_children(id)?;
        if !text.is_empty() {
            let child = self.create_text(text);
            self.append_child(id, child)?;
        }
        Ok(())
    }

    pub fn inner_html(&self, id: NodeId) -> Result<String> {
        self.require_element(id)?;
        Ok(crate::html::serialize_children(self, id))
    }

    /// Parse `html` tolerantly and replace the children of `id` with the
    /// result. Previous children (and their listeners) are discarded.
    pub fn set_inner_html(&mut self, id: NodeId, html: &str) -> Result<()> {
        self.require_element(id)?;
        self.clear_children(id)?;
        let parsed = crate::html::parse_fragment(self, html);
        self.adopt_children(id, parsed.children);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Event listeners
    // ------------------------------------------------------------------

    /// Register a listener slot for `event` on `id` and return its handle.
    /// The callback itself lives in the sandbox; the handle ties the two
    /// registries together.
    pub fn add_listener(&mut self, id: NodeId, event: &str) -> Result<u32> {
        self.require_element(id)?;
        let listener_id = self.next_listener_id;
        self.next_listener_id += 1;
        self.node_mut(id)?.listeners.push(Listener {
            event: event.to_string(),
            id: listener_id,
        });
        Ok(listener_id)
    }

    pub fn remove_listener(&mut self, id: NodeId, event: &str, listener_id: u32) -> Result<()> {
        self.node_mut(id)?
            .listeners
            .retain(|l| !(l.event == event && l.id == listener_id));
        Ok(())
    }

    /// Listener handles registered on `id` for `event`, in registration order.
    pub fn listeners_for(&self, id: NodeId, event: &str) -> Result<Vec<u32>> {
        Ok(self
            .node(id)?
            .listeners
            .iter()
            .filter(|l| l.event == event)
            .map(|l| l.id)
            .collect())
    }

    // ------------------------------------------------------------------
    // Selectors
    // ------------------------------------------------------------------

    pub fn query_selector(&self, scope: NodeId, selector: &str) -> Result<Option<NodeId>> {
        Ok(self.query_selector_all(scope, selector)?.into_iter().next())
    }

    /// All elements under `scope` (exclusive) matching `selector`, in tree
    /// order.
    pub fn query_selector_all(&self, scope: NodeId, selector: &str) -> Result<Vec<NodeId>> {
        self.node(scope)?;
        let list = parse_selector_list(selector)?;
        let mut matches = Vec::new();
        self.walk(scope, &list, &mut matches);
        Ok(matches)
    }

    /// Preorder walk of the subtree below `scope`. Iterative, like
    /// [`Self::text_content`], so nesting depth never becomes stack depth.
    fn walk(&self, scope: NodeId, list: &[Vec<Compound>], out: &mut Vec<NodeId>) {
        let mut stack: Vec<NodeId> = self.nodes[scope as usize]
            .children
            .iter()
            .rev()
            .copied()
            .collect();
        while let Some(node) = stack.pop() {
            if matches!(self.nodes[node as usize].kind, NodeKind::Element { .. })
                && list.iter().any(|chain| self.matches_chain(scope, node, chain))
            {
                out.push(node);
            }
            stack.extend(self.nodes[node as usize].children.iter().rev().copied());
        }
    }

    /// Right-to-left descendant matching: the last compound must match the
    /// node, earlier compounds must match some chain of ancestors above it
    /// (stopping at the query scope).
    fn matches_chain(&self, scope: NodeId, node: NodeId, chain: &[Compound]) -> bool {
        let Some((last, rest)) = chain.split_last() else {
            return false;
        };
        if !self.matches_compound(node, last) {
            return false;
        }
        let mut remaining = rest;
        let mut cursor = self.nodes[node as usize].parent;
        while let Some(current) = cursor {
            if remaining.is_empty() {
                break;
            }
            if current == scope {
                break;
            }
            if let Some(next) = remaining.last() {
                if self.matches_compound(current, next) {
                    remaining = &remaining[..remaining.len() - 1];
                }
            }
            cursor = self.nodes[current as usize].parent;
        }
        remaining.is_empty()
    }

    fn matches_compound(&self, node: NodeId, compound: &Compound) -> bool {
        let NodeKind::Element { tag } = &self.nodes[node as usize].kind else {
            return false;
        };
        if let Some(wanted) = &compound.tag {
            if wanted != tag {
                return false;
            }
        }
        let attr = |name: &str| -> Option<&str> {
            self.nodes[node as usize]
                .attrs
                .iter()
                .find(|(key, _)| key == name)
                .map(|(_, value)| value.as_str())
        };
        if let Some(id) = &compound.id {
            if attr("id") != Some(id.as_str()) {
                return false;
            }
        }
        for class in &compound.classes {
            let has = attr("class")
                .map(|value| value.split_ascii_whitespace().any(|c| c == class))
                .unwrap_or(false);
            if !has {
                return false;
            }
        }
        for (name, expected) in &compound.attrs {
            match (attr(name), expected) {
                (Some(actual), Some(expected)) if actual == expected => {}
                (Some(_), None) => {}
                _ => return false,
            }
        }
        true
    }
}

/// One simple selector: optional tag plus any number of `#id`, `.class`, and
/// `[attr]`/`[attr=value]` qualifiers. `*` parses to an empty compound.
#[derive(Debug, Default, Clone)]
struct Compound {
    tag: Option<String>,
    id: Option<String>,
    classes: Vec<String>,
    attrs: Vec<(String, Option<String>)>,
}

fn parse_selector_list(selector: &str) -> Result<Vec<Vec<Compound>>> {
    let mut list = Vec::new();
    for group in selector.split(',') {
        let group = group.trim();
        if group.is_empty() {
            bail!("empty selector in list: {:?}", selector);
        }
        let chain: Result<Vec<Compound>> =
            group.split_ascii_whitespace().map(parse_compound).collect();
        list.push(chain?);
    }
    if list.is_empty() {
        bail!("empty selector");
    }
    Ok(list)
}

fn parse_compound(part: &str) -> Result<Compound> {
    let mut compound = Compound::default();
    if part == "*" {
        return Ok(compound);
    }

    let bytes = part.as_bytes();
    let mut i = 0;

    let read_name = |i: &mut usize| -> String {
        let start = *i;
        while *i < bytes.len()
            && (bytes[*i].is_ascii_alphanumeric() || matches!(bytes[*i], b'-' | b'_'))
        {
            *i += 1;
        }
        part[start..*i].to_string()
    };

    if i < bytes.len() && bytes[i] != b'#' && bytes[i] != b'.' && bytes[i] != b'[' {
        let tag = read_name(&mut i);
        if tag.is_empty() {
            bail!("invalid selector: {:?}", part);
        }
        compound.tag = Some(tag.to_ascii_lowercase());
    }

    while i < bytes.len() {
        match bytes[i] {
            b'#' => {
                i += 1;
                let id = read_name(&mut i);
                if id.is_empty() {
                    bail!("invalid id selector: {:?}", part);
                }
                compound.id = Some(id);
            }
            b'.' => {
                i += 1;
                let class = read_name(&mut i);
                if class.is_empty() {
                    bail!("invalid class selector: {:?}", part);
                }
                compound.classes.push(class);
            }
            b'[' => {
                let close = part[i..]
                    .find(']')
                    .map(|offset| i + offset)
                    .ok_or_else(|| anyhow!("unclosed attribute selector: {:?}", part))?;
                let body = &part[i + 1..close];
                let (name, value) = match body.split_once('=') {
                    Some((name, value)) => (
                        name.trim().to_ascii_lowercase(),
                        Some(value.trim().trim_matches('"').trim_matches('\'').to_string()),
                    ),
                    None => (body.trim().to_ascii_lowercase(), None),
                };
                if name.is_empty() {
                    bail!("invalid attribute selector: {:?}", part);
                }
                compound.attrs.push((name, value));
                i = close + 1;
            }
            _ => bail!("unsupported selector syntax: {:?}", part),
        }
    }

    Ok(compound)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc_with(html: &str) -> Document {
        let mut doc = Document::new();
        let container = doc.container();
        doc.set_inner_html(container, html).unwrap();
        doc
    }

    #[test]
    fn test_query_by_id_and_class() {
        let doc = doc_with(r#"<div id="a" class="x y"><span class="x"></span></div>"#);
        let container = doc.container();

        let by_id = doc.query_selector(container, "#a").unwrap().unwrap();
        assert_eq!(doc.tag_name(by_id).unwrap(), "div");

        let by_class = doc.query_selector_all(container, ".x").unwrap();
        assert_eq!(by_class.len(), 2);

        let compound = doc.query_selector(container, "div.x.y").unwrap();
        assert!(compound.is_some());
        assert!(doc.query_selector(container, "div.z").unwrap().is_none());
    }

    #[test]
    fn test_descendant_and_list_selectors() {
        let doc = doc_with("<ul><li>one</li><li>two</li></ul><p>para</p>");
        let container = doc.container();

        let items = doc.query_selector_all(container, "ul li").unwrap();
        assert_eq!(items.len(), 2);

        let grouped = doc.query_selector_all(container, "li, p").unwrap();
        assert_eq!(grouped.len(), 3);

        // li is not a descendant of p
        assert!(doc.query_selector(container, "p li").unwrap().is_none());
    }

    #[test]
    fn test_attribute_selectors() {
        let doc = doc_with(r#"<input type="text"><input type="checkbox">"#);
        let container = doc.container();

        assert_eq!(doc.query_selector_all(container, "[type]").unwrap().len(), 2);
        let checkbox = doc
            .query_selector(container, r#"input[type="checkbox"]"#)
            .unwrap()
            .unwrap();
        assert_eq!(doc.get_attr(checkbox, "type").unwrap().unwrap(), "checkbox");
    }

    #[test]
    fn test_invalid_selector_is_an_error() {
        let doc = doc_with("<div></div>");
        assert!(doc.query_selector(doc.container(), ">>>").is_err());
        assert!(doc.query_selector(doc.container(), "").is_err());
    }

    #[test]
    fn test_set_inner_html_replaces_children() {
        let mut doc = doc_with("<p>old</p>");
        let container = doc.container();
        doc.set_inner_html(container, "<span>new</span>").unwrap();
        assert_eq!(doc.inner_html(container).unwrap(), "<span>new</span>");
        assert!(doc.query_selector(container, "p").unwrap().is_none());
    }

    #[test]
    fn test_replacing_markup_discards_listeners() {
        let mut doc = doc_with(r#"<button id="b"></button>"#);
        let container = doc.container();
        let button = doc.query_selector(container, "#b").unwrap().unwrap();
        doc.add_listener(button, "click").unwrap();

        doc.set_inner_html(container, r#"<button id="b"></button>"#)
            .unwrap();
        let fresh = doc.query_selector(container, "#b").unwrap().unwrap();
        assert_ne!(fresh, button);
        assert!(doc.listeners_for(fresh, "click").unwrap().is_empty());
    }

    #[test]
    fn test_fragment_append_moves_children() {
        let mut doc = Document::new();
        let container = doc.container();
        let fragment = doc.create_fragment();
        let a = doc.create_element("em");
        let b = doc.create_element("strong");
        doc.append_child(fragment, a).unwrap();
        doc.append_child(fragment, b).unwrap();

        doc.append_child(container, fragment).unwrap();
        assert_eq!(doc.inner_html(container).unwrap(), "<em></em><strong></strong>");
    }

    #[test]
    fn test_append_rejects_cycles() {
        let mut doc = doc_with("<div><span></span></div>");
        let container = doc.container();
        let div = doc.query_selector(container, "div").unwrap().unwrap();
        let span = doc.query_selector(container, "span").unwrap().unwrap();
        assert!(doc.append_child(span, div).is_err());
        assert!(doc.append_child(div, div).is_err());
    }

    #[test]
    fn test_text_content_round_trip() {
        let mut doc = doc_with("<p>hello <em>world</em></p>");
        let container = doc.container();
        assert_eq!(doc.text_content(container).unwrap(), "hello world");

        let p = doc.query_selector(container, "p").unwrap().unwrap();
        doc.set_text_content(p, "replaced").unwrap();
        assert_eq!(doc.inner_html(container).unwrap(), "<p>replaced</p>");
    }

    #[test]
    fn test_listener_registry() {
        let mut doc = doc_with(r#"<button id="b"></button>"#);
        let button = doc.query_selector(doc.container(), "#b").unwrap().unwrap();

        let first = doc.add_listener(button, "click").unwrap();
        let second = doc.add_listener(button, "click").unwrap();
        doc.add_listener(button, "mouseover").unwrap();
        assert_eq!(doc.listeners_for(button, "click").unwrap(), vec![first, second]);

        doc.remove_listener(button, "click", first).unwrap();
        assert_eq!(doc.listeners_for(button, "click").unwrap(), vec![second]);
    }

    #[test]
    fn test_deep_nesting_does_not_exhaust_the_stack() {
        let depth = 100_000;
        let mut doc = Document::new();
        let container = doc.container();
        let markup = format!("{}bottom", "<div>".repeat(depth));
        doc.set_inner_html(container, &markup).unwrap();

        assert_eq!(doc.text_content(container).unwrap(), "bottom");
        assert_eq!(
            doc.query_selector_all(container, "div").unwrap().len(),
            depth
        );
        assert!(doc.inner_html(container).unwrap().contains("bottom</div>"));
    }

    #[test]
    fn test_unknown_node_is_an_error() {
        let doc = Document::new();
        assert!(doc.tag_name(9999).is_err());
        assert!(doc.inner_html(9999).is_err());
    }
}
