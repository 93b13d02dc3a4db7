//! Change detection between two versions of a document.
//!
//! The new document is walked in lock-step with the base document and every
//! difference is recorded as a [`DiffMark`] on the new document. Marks carry
//! the base revision they were computed against; a mark from another
//! revision is treated as absent.
//!
//! Only one level of sibling lookahead is done, so a node moved across
//! ancestors is reported as a deletion plus an insertion.

use crate::dom::{self, Document, Element, NodeData};
use bitflags::bitflags;
use indextree::NodeId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The `typeof` of a placeholder for deleted content.
pub(crate) const MARKER: &str = "mw:DiffMarker";

/// The `typeof` of a span which carries the mark of a changed text or
/// comment node.
pub(crate) const WRAPPER: &str = "mw:DiffMarker/Wrapper";

/// Attributes which do not take part in comparisons.
const IGNORED_ATTRIBUTES: &[&str] = &["about", "data-ve-changed"];

bitflags! {
    /// The kinds of change recorded on a node.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub(crate) struct ChangeKinds: u8 {
        const INSERTED = 0b0000_0001;
        const MODIFIED = 0b0000_0010;
        /// The node has the same name as before but its attributes
        /// changed.
        const MODIFIED_WRAPPER = 0b0000_0100;
        const DELETED_BEFORE = 0b0000_1000;
        const DELETED_CHILD = 0b0001_0000;
        const SUBTREE_CHANGED = 0b0010_0000;
        const CHILDREN_CHANGED = 0b0100_0000;
    }
}

/// Serialized names of each change kind, in serialization order.
const NAMES: &[(ChangeKinds, &str)] = &[
    (ChangeKinds::INSERTED, "inserted"),
    (ChangeKinds::MODIFIED, "modified"),
    (ChangeKinds::MODIFIED_WRAPPER, "modified-wrapper"),
    (ChangeKinds::DELETED_BEFORE, "deleted-before"),
    (ChangeKinds::DELETED_CHILD, "deleted-child"),
    (ChangeKinds::SUBTREE_CHANGED, "subtree-changed"),
    (ChangeKinds::CHILDREN_CHANGED, "children-changed"),
];

/// A diff annotation, stored as the `data-parsoid-diff` attribute.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(from = "RawMark", into = "RawMark")]
pub(crate) struct DiffMark {
    /// The base revision the change was found against.
    pub id: u64,
    /// The changes.
    pub diff: ChangeKinds,
}

#[derive(Deserialize, Serialize)]
struct RawMark {
    id: u64,
    diff: Vec<String>,
}

impl From<RawMark> for DiffMark {
    fn from(raw: RawMark) -> Self {
        let mut diff = ChangeKinds::empty();
        for name in &raw.diff {
            match NAMES.iter().find(|(_, n)| n == name) {
                Some((kind, _)) => diff |= *kind,
                None => log::debug!(target: "wiki_roundtrip::diff", "unknown change kind {name:?}"),
            }
        }
        Self { id: raw.id, diff }
    }
}

impl From<DiffMark> for RawMark {
    fn from(mark: DiffMark) -> Self {
        Self {
            id: mark.id,
            diff: NAMES
                .iter()
                .filter(|(kind, _)| mark.diff.contains(*kind))
                .map(|(_, name)| name.to_string())
                .collect(),
        }
    }
}

impl DiffMark {
    /// Reads a `data-parsoid-diff` attribute. Unreadable values are logged
    /// and treated as absent.
    pub fn parse(value: &str) -> Option<Self> {
        serde_json::from_str(value)
            .inspect_err(|err| log::warn!("invalid data-parsoid-diff {value:?}: {err}"))
            .ok()
    }

    /// Writes the mark as a `data-parsoid-diff` attribute value.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// The changes recorded on `node` against `revision`, if any.
pub(crate) fn current_mark(doc: &Document, node: NodeId, revision: u64) -> Option<ChangeKinds> {
    doc.element(node)
        .and_then(|element| element.diff.as_ref())
        .filter(|mark| mark.id == revision)
        .map(|mark| mark.diff)
}

pub(crate) fn has_current_diff_mark(doc: &Document, node: NodeId, revision: u64) -> bool {
    current_mark(doc, node, revision).is_some()
}

/// Returns true if the only change recorded on `node` is somewhere below
/// its children.
pub(crate) fn only_subtree_changed(doc: &Document, node: NodeId, revision: u64) -> bool {
    current_mark(doc, node, revision) == Some(ChangeKinds::SUBTREE_CHANGED)
}

pub(crate) fn direct_children_changed(doc: &Document, node: NodeId, revision: u64) -> bool {
    current_mark(doc, node, revision)
        .is_some_and(|kinds| kinds.contains(ChangeKinds::CHILDREN_CHANGED))
}

pub(crate) fn has_inserted_or_modified(doc: &Document, node: NodeId, revision: u64) -> bool {
    current_mark(doc, node, revision)
        .is_some_and(|kinds| kinds.intersects(ChangeKinds::INSERTED | ChangeKinds::MODIFIED))
}

/// Returns true if the node is a deleted-content placeholder.
pub(crate) fn is_marker(doc: &Document, node: NodeId) -> bool {
    doc.element(node)
        .is_some_and(|element| element.name == "meta" && element.has_typeof(MARKER))
}

/// Returns true if the node is a change wrapper around text or a comment.
pub(crate) fn is_wrapper(doc: &Document, node: NodeId) -> bool {
    doc.element(node)
        .is_some_and(|element| element.name == "span" && element.has_typeof(WRAPPER))
}

/// Marks the changes in `doc` relative to `base`. Returns true if anything
/// changed.
pub(crate) fn diff(base: &Document, doc: &mut Document, revision: u64) -> bool {
    let mut differ = Differ {
        revision,
        wrap: Vec::new(),
    };
    let changed = differ.children(base, base.body, doc, doc.body);

    // Text and comments are wrapped only after the walk so the walk never
    // compares a wrapper with a base node.
    for (node, kinds) in differ.wrap {
        let mut wrapper = Element::new("span");
        wrapper.set_attr("typeof", WRAPPER);
        wrapper.diff = Some(DiffMark { id: revision, diff: kinds });
        doc.wrap(node, wrapper);
    }

    log::debug!(target: "wiki_roundtrip::diff", "changed: {changed}");
    changed
}

struct Differ {
    /// The base revision.
    revision: u64,
    /// Marked text and comment nodes.
    wrap: Vec<(NodeId, ChangeKinds)>,
}

impl Differ {
    /// Compares the children of two nodes. Returns true if any child or
    /// descendant differs.
    fn children(
        &mut self,
        base: &Document,
        base_parent: NodeId,
        doc: &mut Document,
        new_parent: NodeId,
    ) -> bool {
        let mut base_node = base.first_child(base_parent);
        let mut new_node = doc.first_child(new_parent);
        let mut found_any = false;

        while let (Some(b), Some(n)) = (base_node, new_node) {
            let mut hold_new = false;
            let mut next_base = Some(b);
            let mut next_new = Some(n);

            if !tree_equals(base, b, doc, n, false) {
                log::trace!(target: "wiki_roundtrip::diff", "not equal: {b:?} {n:?}");
                let mut found = false;

                // Insertions: the base node shows up later in the new tree.
                if is_content_node(base, b) {
                    let mut lookahead = doc.next_sibling(n);
                    while let Some(la) = lookahead {
                        if is_content_node(doc, la) && tree_equals(base, b, doc, la, true) {
                            let mut mark = n;
                            while mark != la {
                                self.mark(doc, mark, ChangeKinds::INSERTED);
                                match doc.next_sibling(mark) {
                                    Some(next) => mark = next,
                                    None => break,
                                }
                            }
                            next_new = Some(la);
                            found = true;
                            break;
                        }
                        lookahead = next_unit(doc, la);
                    }
                }

                // Deletions: the new node shows up later in the base tree.
                if !found && let Some(current) = next_new.filter(|&id| is_content_node(doc, id)) {
                    let mut lookahead = base.next_sibling(b);
                    while let Some(la) = lookahead {
                        if is_content_node(base, la) && tree_equals(base, la, doc, current, true) {
                            log::trace!(target: "wiki_roundtrip::diff", "deleted before {current:?}");
                            self.mark_deleted(doc, current);
                            next_base = Some(la);
                            found = true;
                            break;
                        }
                        lookahead = next_unit(base, la);
                    }
                }

                if !found {
                    if base.name(b).is_some() && base.name(b) == doc.name(n) {
                        self.mark(doc, n, ChangeKinds::MODIFIED_WRAPPER);
                        if !is_template_node(base, b) && !is_template_node(doc, n) {
                            self.children(base, b, doc, n);
                        }
                    } else {
                        self.mark(doc, n, ChangeKinds::MODIFIED);
                        // Something was removed before a node this
                        // different.
                        self.mark_deleted(doc, n);
                        hold_new = true;
                    }
                }

                self.mark(doc, new_parent, ChangeKinds::CHILDREN_CHANGED);
                found_any = true;
            } else if !is_template_node(base, b) && !is_template_node(doc, n) {
                if self.children(base, b, doc, n) {
                    self.mark(doc, n, ChangeKinds::SUBTREE_CHANGED);
                    found_any = true;
                }
            }

            base_node = next_base.and_then(|id| next_unit(base, id));
            new_node = if hold_new {
                next_new
            } else {
                next_new.and_then(|id| next_unit(doc, id))
            };
        }

        while let Some(n) = new_node {
            log::trace!(target: "wiki_roundtrip::diff", "trailing insert {n:?}");
            self.mark(doc, n, ChangeKinds::INSERTED);
            found_any = true;
            new_node = next_unit(doc, n);
        }

        if base_node.is_some() {
            log::trace!(target: "wiki_roundtrip::diff", "trailing deletions under {new_parent:?}");
            self.mark(doc, new_parent, ChangeKinds::DELETED_CHILD);
            if doc.first_child(new_parent).is_some() {
                let marker = self.marker(doc);
                doc.append(new_parent, marker);
            }
            found_any = true;
        }

        found_any
    }

    /// Records a change on a node.
    fn mark(&mut self, doc: &mut Document, node: NodeId, kind: ChangeKinds) {
        let revision = self.revision;
        match doc.data_mut(node) {
            NodeData::Element(element) => match &mut element.diff {
                Some(mark) if mark.id == revision => mark.diff |= kind,
                diff => {
                    *diff = Some(DiffMark {
                        id: revision,
                        diff: kind,
                    });
                }
            },
            NodeData::Text(_) | NodeData::Comment(_) => {
                match self.wrap.iter_mut().find(|(id, _)| *id == node) {
                    Some((_, kinds)) => *kinds |= kind,
                    None => self.wrap.push((node, kind)),
                }
            }
            NodeData::Document => {}
        }
    }

    /// Puts a placeholder for deleted content before `node`.
    fn mark_deleted(&mut self, doc: &mut Document, node: NodeId) {
        let marker = self.marker(doc);
        doc.insert_before(node, marker);
    }

    fn marker(&self, doc: &mut Document) -> NodeId {
        let mut meta = Element::new("meta");
        meta.set_attr("typeof", MARKER);
        meta.diff = Some(DiffMark {
            id: self.revision,
            diff: ChangeKinds::DELETED_BEFORE,
        });
        doc.create_element(meta)
    }
}

/// Returns true if the node is the first node of encapsulated content.
fn is_template_node(doc: &Document, node: NodeId) -> bool {
    doc.element(node)
        .is_some_and(|element| element.about().is_some() && element.is_encapsulation_wrapper())
}

/// The next sibling, skipping the rest of an encapsulated group.
fn next_unit(doc: &Document, node: NodeId) -> Option<NodeId> {
    let mut next = doc.next_sibling(node);
    if !is_template_node(doc, node) {
        return next;
    }
    let about = doc.element(node).and_then(Element::about);
    while let Some(id) = next
        && doc.element(id).and_then(Element::about) == about
    {
        next = doc.next_sibling(id);
    }
    next
}

/// Returns true unless the node is a comment, whitespace, or a deletion
/// placeholder.
fn is_content_node(doc: &Document, node: NodeId) -> bool {
    match doc.data(node) {
        NodeData::Comment(_) => false,
        NodeData::Text(text) => !text.chars().all(|c| c.is_ascii_whitespace()),
        _ => !is_marker(doc, node),
    }
}

/// Compares two nodes, and with `deep`, their subtrees.
fn tree_equals(a_doc: &Document, a: NodeId, b_doc: &Document, b: NodeId, deep: bool) -> bool {
    match (a_doc.data(a), b_doc.data(b)) {
        (NodeData::Text(x), NodeData::Text(y)) | (NodeData::Comment(x), NodeData::Comment(y)) => {
            x == y
        }
        (NodeData::Element(x), NodeData::Element(y)) => {
            if x.name != y.name || !attrs_equal(x, y) {
                return false;
            }
            if !deep {
                return true;
            }
            let a_children = a_doc.children(a);
            let b_children = b_doc.children(b);
            a_children.len() == b_children.len()
                && a_children
                    .into_iter()
                    .zip(b_children)
                    .all(|(a, b)| tree_equals(a_doc, a, b_doc, b, true))
        }
        (NodeData::Document, NodeData::Document) => true,
        _ => false,
    }
}

/// Compares attributes, ignoring order and [`IGNORED_ATTRIBUTES`].
fn attrs_equal(a: &Element, b: &Element) -> bool {
    let relevant = |element: &Element| {
        element
            .attrs
            .iter()
            .filter(|(key, _)| !IGNORED_ATTRIBUTES.contains(&key.as_str()))
            .count()
    };
    if relevant(a) != relevant(b) {
        return false;
    }
    let attrs_match = a
        .attrs
        .iter()
        .filter(|(key, _)| !IGNORED_ATTRIBUTES.contains(&key.as_str()))
        .all(|(key, value)| b.attr(key) == Some(value.as_str()));

    attrs_match
        && match (&a.data_mw, &b.data_mw) {
            (Some(x), Some(y)) => data_mw_equals(x, y),
            (None, None) => true,
            _ => false,
        }
}

/// Compares two `data-mw` values independently of key order. Embedded
/// `html` strings are compared as documents.
fn data_mw_equals(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x.iter().all(|(key, value)| {
                    y.get(key).is_some_and(|other| match (value, other) {
                        (Value::String(h1), Value::String(h2)) if key == "html" => {
                            h1 == h2 || html_equals(h1, h2)
                        }
                        _ => data_mw_equals(value, other),
                    })
                })
        }
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(a, b)| data_mw_equals(a, b))
        }
        _ => a == b,
    }
}

fn html_equals(a: &str, b: &str) -> bool {
    let mut a_doc = Document::new();
    let mut b_doc = Document::new();
    let (Ok(a_nodes), Ok(b_nodes)) = (
        dom::html::parse_fragment(&mut a_doc, a),
        dom::html::parse_fragment(&mut b_doc, b),
    ) else {
        return false;
    };
    a_nodes.len() == b_nodes.len()
        && a_nodes
            .into_iter()
            .zip(b_nodes)
            .all(|(a, b)| tree_equals(&a_doc, a, &b_doc, b, true))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Builds a body from `(name, text)` pairs, where an empty name means a
    /// bare text node.
    fn doc(blocks: &[(&str, &str)]) -> Document {
        let mut doc = Document::new();
        for &(name, text) in blocks {
            if name.is_empty() {
                let node = doc.create(NodeData::Text(text.into()));
                doc.append(doc.body, node);
            } else {
                let node = doc.create_element(Element::new(name));
                doc.append(doc.body, node);
                doc.append_text(node, text);
            }
        }
        doc
    }

    #[track_caller]
    fn kinds(doc: &Document, node: NodeId) -> ChangeKinds {
        current_mark(doc, node, 7).unwrap_or_default()
    }

    #[test]
    fn mark_json() {
        let mark = DiffMark {
            id: 3,
            diff: ChangeKinds::INSERTED | ChangeKinds::CHILDREN_CHANGED,
        };
        let json = mark.to_json();
        assert_eq!(json, r#"{"id":3,"diff":["inserted","children-changed"]}"#);
        assert_eq!(DiffMark::parse(&json), Some(mark));
        assert_eq!(DiffMark::parse("{"), None);
    }

    #[test]
    fn identical_documents() {
        let _ = env_logger::try_init();
        let base = doc(&[("p", "a"), ("", "\n"), ("p", "b")]);
        let mut new = base.clone();
        assert!(!diff(&base, &mut new, 7));
        assert!(new.elements().iter().all(|&id| new.element(id).unwrap().diff.is_none()));
    }

    #[test]
    fn changed_paragraph_text() {
        let _ = env_logger::try_init();
        let base = doc(&[("p", "a"), ("p", "b"), ("p", "c")]);
        let mut new = doc(&[("p", "a"), ("p", "B"), ("p", "c")]);
        assert!(diff(&base, &mut new, 7));

        let blocks = new.children(new.body);
        assert_eq!(kinds(&new, blocks[0]), ChangeKinds::empty());
        assert_eq!(
            kinds(&new, blocks[1]),
            ChangeKinds::CHILDREN_CHANGED | ChangeKinds::SUBTREE_CHANGED
        );
        assert_eq!(kinds(&new, blocks[2]), ChangeKinds::empty());
        assert!(!has_current_diff_mark(&new, new.body, 7));
        assert!(direct_children_changed(&new, blocks[1], 7));

        let children = new.children(blocks[1]);
        assert!(is_marker(&new, children[0]));
        let wrapper = children[1];
        assert!(is_wrapper(&new, wrapper));
        assert!(has_inserted_or_modified(&new, wrapper, 7));
        assert_eq!(new.text_content(wrapper), "B");
    }

    #[test]
    fn inserted_block() {
        let base = doc(&[("p", "a"), ("p", "b")]);
        let mut new = doc(&[("p", "a"), ("h2", "x"), ("p", "b")]);
        assert!(diff(&base, &mut new, 7));
        let blocks = new.children(new.body);
        assert_eq!(kinds(&new, blocks[1]), ChangeKinds::INSERTED);
        assert_eq!(kinds(&new, blocks[2]), ChangeKinds::empty());
        assert!(direct_children_changed(&new, new.body, 7));
    }

    #[test]
    fn deleted_block_leaves_marker() {
        let base = doc(&[("p", "a"), ("h2", "x"), ("p", "b")]);
        let mut new = doc(&[("p", "a"), ("p", "b")]);
        assert!(diff(&base, &mut new, 7));
        let blocks = new.children(new.body);
        assert_eq!(blocks.len(), 3);
        assert!(is_marker(&new, blocks[1]));
        assert_eq!(kinds(&new, blocks[2]), ChangeKinds::empty());
    }

    #[test]
    fn trailing_deletion() {
        let base = doc(&[("p", "a"), ("p", "b")]);
        let mut new = doc(&[("p", "a")]);
        assert!(diff(&base, &mut new, 7));
        assert!(kinds(&new, new.body).contains(ChangeKinds::DELETED_CHILD));
        assert!(is_marker(&new, new.last_child(new.body).unwrap()));
    }

    #[test]
    fn renamed_block_is_modified() {
        let base = doc(&[("p", "a")]);
        let mut new = doc(&[("pre", "a")]);
        assert!(diff(&base, &mut new, 7));
        let blocks = new.children(new.body);
        assert!(is_marker(&new, blocks[0]));
        assert!(kinds(&new, blocks[1]).contains(ChangeKinds::MODIFIED));
    }

    #[test]
    fn nested_change_marks_path() {
        let mut base = doc(&[("ul", "")]);
        let ul = base.first_child(base.body).unwrap();
        let li = base.create_element(Element::new("li"));
        base.append(ul, li);
        base.append_text(li, "x");
        let mut new = base.clone();
        let new_li = new.first_child(new.first_child(new.body).unwrap()).unwrap();
        let text = new.first_child(new_li).unwrap();
        *new.data_mut(text) = NodeData::Text("y".into());

        assert!(diff(&base, &mut new, 7));
        let ul = new.first_child(new.body).unwrap();
        assert!(only_subtree_changed(&new, ul, 7));
        assert!(direct_children_changed(&new, new_li, 7));
    }

    #[test]
    fn stale_marks_are_ignored() {
        let base = doc(&[("p", "a")]);
        let mut new = base.clone();
        let p = new.first_child(new.body).unwrap();
        new.element_mut(p).unwrap().diff = Some(DiffMark {
            id: 1,
            diff: ChangeKinds::INSERTED,
        });
        assert!(!diff(&base, &mut new, 7));
        assert!(!has_current_diff_mark(&new, p, 7));
        assert!(has_current_diff_mark(&new, p, 1));
    }

    #[test]
    fn ignored_attributes_and_data_mw_order() {
        let mut a = Element::new("span");
        a.set_attr("about", "#mwt1");
        a.data_mw = Some(serde_json::json!({"name": "x", "attrs": {"a": "1", "b": "2"}}));
        let mut b = Element::new("span");
        b.set_attr("about", "#mwt9");
        b.set_attr("data-ve-changed", "{}");
        b.data_mw = Some(serde_json::json!({"attrs": {"b": "2", "a": "1"}, "name": "x"}));
        assert!(attrs_equal(&a, &b));

        b.data_mw = Some(serde_json::json!({"attrs": {"b": "2", "a": "1"}, "name": "y"}));
        assert!(!attrs_equal(&a, &b));
    }

    #[test]
    fn data_mw_html_is_compared_as_markup() {
        let a = serde_json::json!({"html": "<b class=\"x\" id=\"y\">t</b>"});
        let b = serde_json::json!({"html": "<b id=\"y\" class=\"x\">t</b>"});
        assert!(data_mw_equals(&a, &b));
        let c = serde_json::json!({"html": "<b>u</b>"});
        assert!(!data_mw_equals(&a, &c));
    }

    #[test]
    fn template_groups_are_opaque() {
        let build = |inner: &str| {
            let mut doc = Document::new();
            let mut span = Element::new("span");
            span.set_attr("typeof", "mw:Transclusion");
            span.set_attr("about", "#mwt1");
            let span = doc.create_element(span);
            doc.append(doc.body, span);
            doc.append_text(span, inner);
            doc
        };
        let base = build("a");
        let mut new = build("b");
        assert!(!diff(&base, &mut new, 7));
    }
}
