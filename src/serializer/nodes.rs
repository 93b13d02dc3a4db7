//! Tree predicates used while serializing.

use crate::{
    config::BLOCK_ELEMENTS,
    diff,
    dom::{Document, NodeData},
};
use indextree::NodeId;

/// Returns true if the element was not produced by the parser, which means
/// it was added by an editor.
pub(super) fn is_new_element(doc: &Document, id: NodeId) -> bool {
    doc.element(id).is_some_and(|element| element.dp.is_empty())
}

/// The text of a comment node.
pub(super) fn comment(doc: &Document, id: NodeId) -> Option<&str> {
    match doc.data(id) {
        NodeData::Comment(text) => Some(text),
        _ => None,
    }
}

/// Returns true if the node is a text node containing only whitespace.
pub(super) fn is_iew(doc: &Document, id: NodeId) -> bool {
    doc.text(id)
        .is_some_and(|text| text.chars().all(char::is_whitespace))
}

/// Returns true if the node produces content rather than separator text.
pub(super) fn is_content_node(doc: &Document, id: NodeId) -> bool {
    !doc.is_comment(id) && !is_iew(doc, id) && !diff::is_marker(doc, id)
}

pub(super) fn previous_non_sep_sibling(doc: &Document, id: NodeId) -> Option<NodeId> {
    let mut node = doc.previous_sibling(id);
    while let Some(n) = node
        && !is_content_node(doc, n)
    {
        node = doc.previous_sibling(n);
    }
    node
}

pub(super) fn next_non_sep_sibling(doc: &Document, id: NodeId) -> Option<NodeId> {
    let mut node = doc.next_sibling(id);
    while let Some(n) = node
        && !is_content_node(doc, n)
    {
        node = doc.next_sibling(n);
    }
    node
}

pub(super) fn first_non_sep_child(doc: &Document, id: NodeId) -> Option<NodeId> {
    let child = doc.first_child(id)?;
    if is_content_node(doc, child) {
        Some(child)
    } else {
        next_non_sep_sibling(doc, child)
    }
}

/// The previous sibling, skipping deleted-content markers.
pub(super) fn previous_non_deleted_sibling(doc: &Document, id: NodeId) -> Option<NodeId> {
    let mut node = doc.previous_sibling(id);
    while let Some(n) = node
        && diff::is_marker(doc, n)
    {
        node = doc.previous_sibling(n);
    }
    node
}

/// The next sibling, skipping deleted-content markers.
pub(super) fn next_non_deleted_sibling(doc: &Document, id: NodeId) -> Option<NodeId> {
    let mut node = doc.next_sibling(id);
    while let Some(n) = node
        && diff::is_marker(doc, n)
    {
        node = doc.next_sibling(n);
    }
    node
}

/// Returns true if every child other than deleted-content markers is text.
pub(super) fn all_children_are_text(doc: &Document, id: NodeId) -> bool {
    doc.children(id)
        .into_iter()
        .all(|child| doc.is_text(child) || diff::is_marker(doc, child))
}

/// Returns true if the node serializes to something that neither starts a
/// line nor needs a line of its own.
pub(super) fn emits_sol_transparent_wt(doc: &Document, id: NodeId) -> bool {
    match doc.data(id) {
        NodeData::Comment(_) => true,
        NodeData::Text(text) => text.chars().all(|c| c == ' ' || c == '\t'),
        NodeData::Element(element) => {
            element.name == "meta" && element.has_typeof_prefix("mw:Includes/")
        }
        NodeData::Document => false,
    }
}

pub(super) fn is_block(doc: &Document, id: NodeId) -> bool {
    doc.name(id).is_some_and(|name| BLOCK_ELEMENTS.contains(name))
}

pub(super) fn is_list(doc: &Document, id: NodeId) -> bool {
    matches!(doc.name(id), Some("ul" | "ol" | "dl"))
}

pub(super) fn is_list_item(doc: &Document, id: NodeId) -> bool {
    matches!(doc.name(id), Some("li" | "dt" | "dd"))
}

/// Returns true if the node is the first node of template or extension
/// output.
pub(super) fn is_encapsulation_wrapper(doc: &Document, id: NodeId) -> bool {
    doc.element(id)
        .is_some_and(|element| element.is_encapsulation_wrapper())
}

/// Returns true if leading spaces on the line in front of the node cannot
/// change how it is read back.
pub(super) fn preceding_space_is_harmless(doc: &Document, id: NodeId) -> bool {
    match doc.data(id) {
        NodeData::Text(text) => {
            text.trim_start_matches([' ', '\t']).starts_with('\n')
        }
        NodeData::Element(element) => {
            element.name == "br"
                || (element.is_encapsulation_wrapper()
                    && doc
                        .first_child(id)
                        .is_none_or(|_| doc.text_content(id).starts_with('\n')))
                || is_block(doc, id)
        }
        _ => false,
    }
}

/// The node after the encapsulated group which starts at `id`.
pub(super) fn skip_over_encapsulated(doc: &Document, id: NodeId) -> Option<NodeId> {
    let about = doc.element(id).and_then(|element| element.about());
    let mut next = doc.next_sibling(id);
    if about.is_none() {
        return next;
    }
    while let Some(n) = next
        && doc.element(n).is_some_and(|element| element.about() == about)
    {
        next = doc.next_sibling(n);
    }
    next
}

/// The length of a text or comment node in the source.
pub(super) fn source_len(doc: &Document, id: NodeId) -> usize {
    match doc.data(id) {
        NodeData::Text(text) => text.len(),
        NodeData::Comment(text) => text.len() + "<!---->".len(),
        _ => 0,
    }
}

/// A short description of a node for log messages.
pub(super) fn describe(doc: &Document, id: NodeId) -> String {
    match doc.data(id) {
        NodeData::Document => "#document".into(),
        NodeData::Element(element) => format!("<{}>", element.name),
        NodeData::Text(text) => format!("{text:?}"),
        NodeData::Comment(text) => format!("<!--{text}-->"),
    }
}
