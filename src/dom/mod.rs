//! The annotated document.
//!
//! Documents are stored in an arena. Every element carries its attributes,
//! its parsed `data-parsoid` and `data-mw` blobs, and an optional diff mark;
//! the blobs are only turned back into attributes when the document is
//! written out as HTML.

pub(crate) use self::{
    data_parsoid::{DataParsoid, Dsr},
    encapsulate::is_group_continuation,
};
use crate::{diff::DiffMark, pipeline::Env};
use indexmap::IndexMap;
use indextree::{Arena, NodeId};

pub(crate) mod builder;
mod data_parsoid;
mod dsr;
mod encapsulate;
pub(crate) mod html;
#[cfg(test)]
mod tests;

/// A document error.
#[derive(Debug, thiserror::Error)]
pub(crate) enum Error {
    /// The HTML could not be read.
    #[error("could not read html: {0}")]
    Io(#[from] std::io::Error),
}

/// The payload of a document node.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum NodeData {
    /// The document root.
    Document,
    /// An element.
    Element(Element),
    /// Text.
    Text(String),
    /// A comment, without its delimiters.
    Comment(String),
}

/// An element.
#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct Element {
    /// The lowercased tag name.
    pub name: String,
    /// Plain attributes, in source order.
    pub attrs: IndexMap<String, String>,
    /// The parsed `data-parsoid` attribute.
    pub dp: DataParsoid,
    /// The parsed `data-mw` attribute.
    pub data_mw: Option<serde_json::Value>,
    /// The parsed `data-parsoid-diff` attribute.
    pub diff: Option<DiffMark>,
}

impl Element {
    /// Creates an element with no attributes.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..<_>::default()
        }
    }

    /// The value of the attribute with the given name.
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attrs.get(key).map(String::as_str)
    }

    /// Sets or replaces an attribute.
    pub fn set_attr(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.attrs.insert(key.into(), value.into());
    }

    /// The `typeof` values of the element.
    pub fn typeof_values(&self) -> impl Iterator<Item = &str> {
        self.attr("typeof")
            .unwrap_or_default()
            .split_ascii_whitespace()
    }

    /// Returns true if the `typeof` attribute contains `ty`.
    pub fn has_typeof(&self, ty: &str) -> bool {
        self.typeof_values().any(|t| t == ty)
    }

    /// Returns true if any `typeof` value starts with `prefix`.
    pub fn has_typeof_prefix(&self, prefix: &str) -> bool {
        self.typeof_values().any(|t| t.starts_with(prefix))
    }

    /// Adds a `typeof` value in front of the existing ones.
    pub fn add_typeof(&mut self, ty: &str) {
        let value = match self.attr("typeof") {
            Some(old) if !old.is_empty() => format!("{ty} {old}"),
            _ => ty.to_string(),
        };
        self.attrs.shift_insert(0, "typeof".into(), value);
    }

    /// The about-group identifier of the element.
    pub fn about(&self) -> Option<&str> {
        self.attr("about")
    }

    /// Returns true if the element is the first node of encapsulated
    /// template or extension output.
    pub fn is_encapsulation_wrapper(&self) -> bool {
        self.typeof_values().any(|t| {
            t == "mw:Transclusion" || t.starts_with("mw:Extension/") || t == "mw:Param"
        })
    }

    /// Returns true if the element was written with literal HTML syntax.
    pub fn is_html_syntax(&self) -> bool {
        self.dp.stx == Some(crate::tokens::Stx::Html)
    }
}

/// An annotated document.
#[derive(Clone, Debug)]
pub(crate) struct Document {
    /// Node storage.
    pub arena: Arena<NodeData>,
    /// The document root.
    pub root: NodeId,
    /// The `body` element.
    pub body: NodeId,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    /// Creates an empty document with `html`, `head`, and `body` elements.
    pub fn new() -> Self {
        let mut arena = Arena::new();
        let root = arena.new_node(NodeData::Document);
        let html = arena.new_node(NodeData::Element(Element::new("html")));
        let head = arena.new_node(NodeData::Element(Element::new("head")));
        let body = arena.new_node(NodeData::Element(Element::new("body")));
        root.append(html, &mut arena);
        html.append(head, &mut arena);
        html.append(body, &mut arena);
        Self { arena, root, body }
    }

    /// Creates a detached node.
    pub fn create(&mut self, data: NodeData) -> NodeId {
        self.arena.new_node(data)
    }

    /// Creates a detached element.
    pub fn create_element(&mut self, element: Element) -> NodeId {
        self.create(NodeData::Element(element))
    }

    /// The payload of a node.
    pub fn data(&self, id: NodeId) -> &NodeData {
        self.arena[id].get()
    }

    /// The mutable payload of a node.
    pub fn data_mut(&mut self, id: NodeId) -> &mut NodeData {
        self.arena[id].get_mut()
    }

    /// The element payload of a node, if it is an element.
    pub fn element(&self, id: NodeId) -> Option<&Element> {
        match self.data(id) {
            NodeData::Element(element) => Some(element),
            _ => None,
        }
    }

    /// The mutable element payload of a node, if it is an element.
    pub fn element_mut(&mut self, id: NodeId) -> Option<&mut Element> {
        match self.data_mut(id) {
            NodeData::Element(element) => Some(element),
            _ => None,
        }
    }

    /// The tag name of a node, if it is an element.
    pub fn name(&self, id: NodeId) -> Option<&str> {
        self.element(id).map(|element| element.name.as_str())
    }

    /// Returns true if the node is an element with the given name.
    pub fn is(&self, id: NodeId, name: &str) -> bool {
        self.name(id) == Some(name)
    }

    /// The text of a node, if it is a text node.
    pub fn text(&self, id: NodeId) -> Option<&str> {
        match self.data(id) {
            NodeData::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Returns true if the node is an element.
    pub fn is_element(&self, id: NodeId) -> bool {
        matches!(self.data(id), NodeData::Element(_))
    }

    /// Returns true if the node is a text node.
    pub fn is_text(&self, id: NodeId) -> bool {
        matches!(self.data(id), NodeData::Text(_))
    }

    /// Returns true if the node is a comment.
    pub fn is_comment(&self, id: NodeId) -> bool {
        matches!(self.data(id), NodeData::Comment(_))
    }

    /// The children of a node. The list is a snapshot, so the tree may be
    /// changed while it is walked.
    pub fn children(&self, id: NodeId) -> Vec<NodeId> {
        id.children(&self.arena).collect()
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.arena[id].parent()
    }

    pub fn first_child(&self, id: NodeId) -> Option<NodeId> {
        self.arena[id].first_child()
    }

    pub fn last_child(&self, id: NodeId) -> Option<NodeId> {
        self.arena[id].last_child()
    }

    pub fn next_sibling(&self, id: NodeId) -> Option<NodeId> {
        self.arena[id].next_sibling()
    }

    pub fn previous_sibling(&self, id: NodeId) -> Option<NodeId> {
        self.arena[id].previous_sibling()
    }

    /// The ancestors of a node, nearest first, excluding the node itself.
    pub fn ancestors(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        id.ancestors(&self.arena).skip(1)
    }

    /// Appends `child` to `parent`, detaching it from its old position.
    pub fn append(&mut self, parent: NodeId, child: NodeId) {
        child.detach(&mut self.arena);
        parent.append(child, &mut self.arena);
    }

    /// Inserts `node` before `sibling`, detaching it from its old position.
    pub fn insert_before(&mut self, sibling: NodeId, node: NodeId) {
        node.detach(&mut self.arena);
        sibling.insert_before(node, &mut self.arena);
    }

    /// Removes a node and its descendants from the tree.
    pub fn remove(&mut self, id: NodeId) {
        id.remove_subtree(&mut self.arena);
    }

    /// Replaces `node` with a new element containing it.
    pub fn wrap(&mut self, node: NodeId, element: Element) -> NodeId {
        let wrapper = self.create_element(element);
        self.insert_before(node, wrapper);
        self.append(wrapper, node);
        wrapper
    }

    /// Appends text to `parent`, merging it with a trailing text node.
    pub fn append_text(&mut self, parent: NodeId, text: &str) {
        if let Some(last) = self.last_child(parent)
            && let NodeData::Text(prev) = self.data_mut(last)
        {
            prev.push_str(text);
            return;
        }
        let node = self.create(NodeData::Text(text.to_string()));
        self.append(parent, node);
    }

    /// The concatenated text of a node and its descendants.
    pub fn text_content(&self, id: NodeId) -> String {
        id.descendants(&self.arena)
            .filter_map(|node| self.text(node))
            .collect()
    }

    /// The elements of the body, in document order.
    pub fn elements(&self) -> Vec<NodeId> {
        self.body
            .descendants(&self.arena)
            .filter(|&id| self.is_element(id))
            .collect()
    }
}

/// Finishes a freshly built document: unpacks HTML fragments, computes
/// source ranges, encapsulates template output, and drops information which
/// is only needed while building.
pub(crate) fn postprocess(doc: &mut Document, env: &Env, source: &str) {
    encapsulate::unpack_fragments(doc, env);
    dsr::compute(doc, source);
    encapsulate::encapsulate_templates(doc, source);
    store(doc);
}

/// Drops build-time information from every element.
fn store(doc: &mut Document) {
    for id in doc.elements() {
        if let Some(element) = doc.element_mut(id) {
            element.dp.tsr = None;
            element.dp.tmp = <_>::default();
        }
    }
}
