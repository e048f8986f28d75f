//! Arena-backed element/text tree.
//!
//! This is the subset of a browser DOM the annotation engine needs: elements with
//! attributes, text nodes, structural edits, text splitting, click listeners with
//! bubbling, and a deterministic HTML serialization. Offsets into text are counted
//! in chars. Released slots are recycled so repeated clear/apply cycles do not grow
//! the arena.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeData {
    Element {
        tag: String,
        attrs: BTreeMap<String, String>,
    },
    Text(String),
}

#[derive(Debug)]
struct Node {
    data: NodeData,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    live: bool,
}

/// Receives the node the listener was registered on.
pub type ClickHandler = Rc<dyn Fn(NodeId)>;

const VOID_TAGS: &[&str] = &["br", "hr", "img"];

pub struct Document {
    nodes: Vec<Node>,
    free: Vec<usize>,
    listeners: HashMap<NodeId, Vec<ClickHandler>>,
    root: NodeId,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Document")
            .field("html", &self.to_html(self.root))
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl Document {
    pub fn new() -> Self {
        let mut doc = Self {
            nodes: Vec::new(),
            free: Vec::new(),
            listeners: HashMap::new(),
            root: NodeId(0),
        };
        doc.root = doc.create_element("body");
        doc
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    fn alloc(&mut self, data: NodeData) -> NodeId {
        let node = Node {
            data,
            parent: None,
            children: Vec::new(),
            live: true,
        };
        match self.free.pop() {
            Some(slot) => {
                self.nodes[slot] = node;
                NodeId(slot)
            }
            None => {
                self.nodes.push(node);
                NodeId(self.nodes.len() - 1)
            }
        }
    }

    pub fn create_element(&mut self, tag: &str) -> NodeId {
        self.alloc(NodeData::Element {
            tag: tag.to_string(),
            attrs: BTreeMap::new(),
        })
    }

    pub fn create_text(&mut self, text: &str) -> NodeId {
        self.alloc(NodeData::Text(text.to_string()))
    }

    /// Number of slots currently in use.
    pub fn live_count(&self) -> usize {
        self.nodes.len() - self.free.len()
    }

    pub fn is_live(&self, id: NodeId) -> bool {
        self.nodes.get(id.0).map(|n| n.live).unwrap_or(false)
    }

    fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0]
    }

    pub fn data(&self, id: NodeId) -> &NodeData {
        &self.node(id).data
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).parent
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.node(id).children
    }

    pub fn tag(&self, id: NodeId) -> Option<&str> {
        match &self.node(id).data {
            NodeData::Element { tag, .. } => Some(tag),
            NodeData::Text(_) => None,
        }
    }

    pub fn text(&self, id: NodeId) -> Option<&str> {
        match &self.node(id).data {
            NodeData::Text(text) => Some(text),
            NodeData::Element { .. } => None,
        }
    }

    pub fn is_text(&self, id: NodeId) -> bool {
        self.text(id).is_some()
    }

    pub fn set_text(&mut self, id: NodeId, value: &str) {
        if let NodeData::Text(text) = &mut self.node_mut(id).data {
            *text = value.to_string();
        }
    }

    pub fn attr(&self, id: NodeId, name: &str) -> Option<&str> {
        match &self.node(id).data {
            NodeData::Element { attrs, .. } => attrs.get(name).map(String::as_str),
            NodeData::Text(_) => None,
        }
    }

    pub fn set_attr(&mut self, id: NodeId, name: &str, value: &str) {
        if let NodeData::Element { attrs, .. } = &mut self.node_mut(id).data {
            attrs.insert(name.to_string(), value.to_string());
        }
    }

    pub fn remove_attr(&mut self, id: NodeId, name: &str) {
        if let NodeData::Element { attrs, .. } = &mut self.node_mut(id).data {
            attrs.remove(name);
        }
    }

    pub fn has_class(&self, id: NodeId, class: &str) -> bool {
        self.attr(id, "class")
            .map(|classes| classes.split_whitespace().any(|c| c == class))
            .unwrap_or(false)
    }

    pub fn add_class(&mut self, id: NodeId, class: &str) {
        if self.has_class(id, class) {
            return;
        }
        let value = match self.attr(id, "class") {
            Some(existing) if !existing.trim().is_empty() => format!("{} {}", existing.trim(), class),
            _ => class.to_string(),
        };
        self.set_attr(id, "class", &value);
    }

    pub fn remove_class(&mut self, id: NodeId, class: &str) {
        let Some(existing) = self.attr(id, "class") else {
            return;
        };
        let remaining: Vec<&str> = existing.split_whitespace().filter(|c| *c != class).collect();
        if remaining.is_empty() {
            self.remove_attr(id, "class");
        } else {
            let value = remaining.join(" ");
            self.set_attr(id, "class", &value);
        }
    }

    pub fn detach(&mut self, id: NodeId) {
        if let Some(parent) = self.node(id).parent {
            self.node_mut(parent).children.retain(|c| *c != id);
            self.node_mut(id).parent = None;
        }
    }

    pub fn append_child(&mut self, parent: NodeId, child: NodeId) {
        self.detach(child);
        self.node_mut(parent).children.push(child);
        self.node_mut(child).parent = Some(parent);
    }

    /// Inserts `child` into `parent` right before `reference`, or at the end if
    /// `reference` is not one of `parent`'s children.
    pub fn insert_before(&mut self, parent: NodeId, child: NodeId, reference: NodeId) {
        self.detach(child);
        let position = self
            .node(parent)
            .children
            .iter()
            .position(|c| *c == reference)
            .unwrap_or(self.node(parent).children.len());
        self.node_mut(parent).children.insert(position, child);
        self.node_mut(child).parent = Some(parent);
    }

    fn insert_after(&mut self, parent: NodeId, child: NodeId, reference: NodeId) {
        self.detach(child);
        let position = self
            .node(parent)
            .children
            .iter()
            .position(|c| *c == reference)
            .map(|p| p + 1)
            .unwrap_or(self.node(parent).children.len());
        self.node_mut(parent).children.insert(position, child);
        self.node_mut(child).parent = Some(parent);
    }

    /// Detaches the subtree and returns its slots to the free list.
    pub fn release(&mut self, id: NodeId) {
        self.detach(id);
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let node = self.node_mut(current);
            stack.append(&mut node.children);
            node.live = false;
            node.parent = None;
            node.data = NodeData::Text(String::new());
            self.listeners.remove(&current);
            self.free.push(current.0);
        }
    }

    pub fn clear_children(&mut self, id: NodeId) {
        let children = self.node(id).children.clone();
        for child in children {
            self.release(child);
        }
    }

    pub fn is_inclusive_ancestor(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut current = Some(node);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.node(id).parent;
        }
        false
    }

    /// Preorder traversal of everything below `id`, excluding `id` itself.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.node(id).children.iter().rev().copied().collect();
        while let Some(current) = stack.pop() {
            out.push(current);
            stack.extend(self.node(current).children.iter().rev().copied());
        }
        out
    }

    pub fn text_nodes(&self, id: NodeId) -> Vec<NodeId> {
        self.descendants(id)
            .into_iter()
            .filter(|n| self.is_text(*n))
            .collect()
    }

    pub fn text_content(&self, id: NodeId) -> String {
        if let Some(text) = self.text(id) {
            return text.to_string();
        }
        self.text_nodes(id)
            .into_iter()
            .filter_map(|n| self.text(n))
            .collect()
    }

    pub fn find_by_attr(&self, scope: NodeId, name: &str, value: &str) -> Option<NodeId> {
        self.descendants(scope)
            .into_iter()
            .find(|n| self.attr(*n, name) == Some(value))
    }

    pub fn find_all_with_attr(&self, scope: NodeId, name: &str) -> Vec<NodeId> {
        self.descendants(scope)
            .into_iter()
            .filter(|n| self.attr(*n, name).is_some())
            .collect()
    }

    /// Nearest inclusive ancestor of `node` carrying `name`, not looking above `stop`.
    pub fn closest_with_attr(&self, node: NodeId, name: &str, stop: NodeId) -> Option<NodeId> {
        let mut current = Some(node);
        while let Some(id) = current {
            if self.attr(id, name).is_some() {
                return Some(id);
            }
            if id == stop {
                return None;
            }
            current = self.node(id).parent;
        }
        None
    }

    /// Splits a text node at a char offset. The original keeps the head; the new
    /// sibling holding the tail is returned. Offsets at either end are a no-op.
    pub fn split_text(&mut self, id: NodeId, char_offset: usize) -> Option<NodeId> {
        let text = self.text(id)?;
        let len = text.chars().count();
        if char_offset == 0 || char_offset >= len {
            return None;
        }
        let split_at = char_to_byte(text, char_offset);
        let tail = text[split_at..].to_string();
        let head = text[..split_at].to_string();
        let parent = self.node(id).parent?;

        self.set_text(id, &head);
        let tail_node = self.create_text(&tail);
        self.insert_after(parent, tail_node, id);
        Some(tail_node)
    }

    /// Puts `wrapper` where `node` is and moves `node` inside it.
    pub fn wrap(&mut self, node: NodeId, wrapper: NodeId) {
        let Some(parent) = self.node(node).parent else {
            return;
        };
        self.insert_before(parent, wrapper, node);
        self.append_child(wrapper, node);
    }

    /// Replaces `wrapper` by its children and releases it. Returns the parent.
    pub fn unwrap(&mut self, wrapper: NodeId) -> Option<NodeId> {
        let parent = self.node(wrapper).parent?;
        let children = self.node(wrapper).children.clone();
        for child in children {
            self.insert_before(parent, child, wrapper);
        }
        self.release(wrapper);
        Some(parent)
    }

    /// Merges adjacent text nodes and drops empty ones, recursively.
    pub fn normalize(&mut self, id: NodeId) {
        let children = self.node(id).children.clone();
        let mut previous_text: Option<NodeId> = None;
        for child in children {
            match self.text(child).map(str::to_string) {
                Some(text) if text.is_empty() => self.release(child),
                Some(text) => match previous_text {
                    Some(prev) => {
                        let merged = format!("{}{}", self.text(prev).unwrap_or(""), text);
                        self.set_text(prev, &merged);
                        self.release(child);
                    }
                    None => previous_text = Some(child),
                },
                None => {
                    previous_text = None;
                    self.normalize(child);
                }
            }
        }
    }

    pub fn add_click_listener(&mut self, id: NodeId, handler: ClickHandler) {
        self.listeners.entry(id).or_default().push(handler);
    }

    pub fn listener_count(&self, id: NodeId) -> usize {
        self.listeners.get(&id).map(Vec::len).unwrap_or(0)
    }

    /// Dispatches a click on `target`, bubbling up to the root. Returns how many
    /// listeners ran.
    pub fn click(&self, target: NodeId) -> usize {
        let mut invoked = 0;
        let mut current = Some(target);
        while let Some(id) = current {
            if let Some(handlers) = self.listeners.get(&id) {
                for handler in handlers.clone() {
                    handler(id);
                    invoked += 1;
                }
            }
            current = self.node(id).parent;
        }
        invoked
    }

    pub fn to_html(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.write_html(id, &mut out);
        out
    }

    pub fn inner_html(&self, id: NodeId) -> String {
        let mut out = String::new();
        for child in &self.node(id).children {
            self.write_html(*child, &mut out);
        }
        out
    }

    fn write_html(&self, id: NodeId, out: &mut String) {
        match &self.node(id).data {
            NodeData::Text(text) => out.push_str(&escape_text(text)),
            NodeData::Element { tag, attrs } => {
                out.push('<');
                out.push_str(tag);
                for (name, value) in attrs {
                    out.push(' ');
                    out.push_str(name);
                    out.push_str("=\"");
                    out.push_str(&escape_attr(value));
                    out.push('"');
                }
                out.push('>');
                if VOID_TAGS.contains(&tag.as_str()) {
                    return;
                }
                for child in &self.node(id).children {
                    self.write_html(*child, out);
                }
                out.push_str("</");
                out.push_str(tag);
                out.push('>');
            }
        }
    }
}

/// Byte index of the `char_offset`-th char, or the string length past the end.
pub fn char_to_byte(text: &str, char_offset: usize) -> usize {
    text.char_indices()
        .nth(char_offset)
        .map(|(byte, _)| byte)
        .unwrap_or(text.len())
}

fn escape_text(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn escape_attr(value: &str) -> String {
    escape_text(value).replace('"', "&quot;")
}
