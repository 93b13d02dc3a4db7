//! Encapsulation of template and extension output.
//!
//! Template output reaches the tree builder between a pair of transclusion
//! markers, and extension HTML reaches it as a placeholder. After tree
//! building, the markers are replaced by an about group: the first node of
//! the output carries the `typeof`, `data-mw`, and source range of the whole
//! group, and every other node shares its `about` identifier so that the
//! serializer and the differ can treat the group as one opaque unit.

use super::{Document, Dsr, Element, NodeData, html};
use crate::{pipeline::Env, wikitext::Span};
use indextree::NodeId;
use serde_json::{Value, json};
use std::collections::HashMap;

/// Replaces HTML fragment placeholders with the fragments they stand for.
pub(super) fn unpack_fragments(doc: &mut Document, env: &Env) {
    let placeholders = doc
        .elements()
        .into_iter()
        .filter(|&id| {
            doc.element(id)
                .is_some_and(|e| e.name == "meta" && e.has_typeof("mw:DOMFragment"))
        })
        .collect::<Vec<_>>();

    for meta in placeholders {
        let Some(placeholder) = doc.element(meta).cloned() else {
            continue;
        };
        let Some(html) = placeholder
            .dp
            .tmp
            .html
            .as_deref()
            .and_then(|id| env.take_fragment(id))
        else {
            log::warn!("no fragment for placeholder {:?}", placeholder.dp.tmp.html);
            continue;
        };

        let nodes = match html::parse_fragment(doc, &html) {
            Ok(nodes) => nodes,
            Err(err) => {
                log::warn!("unreadable fragment: {err}");
                continue;
            }
        };

        let types = placeholder
            .typeof_values()
            .filter(|&t| t != "mw:DOMFragment")
            .collect::<Vec<_>>()
            .join(" ");

        if nodes.is_empty() {
            // An empty fragment keeps its placeholder, which still
            // serializes back to the source.
            if let Some(element) = doc.element_mut(meta) {
                if types.is_empty() {
                    element.attrs.shift_remove("typeof");
                } else {
                    element.set_attr("typeof", types);
                }
            }
            continue;
        }

        let about = placeholder.about().map(str::to_string);
        for (index, node) in nodes.into_iter().enumerate() {
            doc.insert_before(meta, node);
            let first = index == 0 && !types.is_empty();
            if about.is_none() && !first {
                continue;
            }

            let node = if doc.is_element(node) {
                node
            } else {
                doc.wrap(node, Element::new("span"))
            };
            let Some(element) = doc.element_mut(node) else {
                continue;
            };
            if first {
                element.add_typeof(&types);
                element.data_mw = placeholder.data_mw.clone();
                element.dp.tsr = placeholder.dp.tsr;
                element.dp.src = placeholder.dp.src.clone();
            }
            if let Some(about) = &about {
                element.set_attr("about", about.clone());
            }
        }
        doc.remove(meta);
    }
}

/// An encapsulated about group.
#[derive(Debug)]
struct Group {
    /// The about identifier.
    about: String,
    /// The node carrying the group information.
    first: NodeId,
    /// The source range of the group.
    span: Span,
}

/// Replaces transclusion markers with about groups.
pub(super) fn encapsulate_templates(doc: &mut Document, source: &str) {
    let mut starts = Vec::new();
    let mut ends = HashMap::new();
    for id in doc.elements() {
        let Some(element) = doc.element(id).filter(|e| e.name == "meta") else {
            continue;
        };
        let Some(about) = element.about().map(str::to_string) else {
            continue;
        };
        if element.has_typeof("mw:Transclusion") {
            starts.push(id);
        } else if element.has_typeof("mw:Transclusion/End") {
            ends.insert(about, id);
        }
    }

    let mut groups = Vec::<Group>::new();
    for start in starts {
        let Some(about) = doc.element(start).and_then(|e| e.about()).map(str::to_string) else {
            continue;
        };
        let Some(end) = ends.remove(&about) else {
            log::warn!("transclusion {about} has no end marker");
            continue;
        };
        encapsulate(doc, source, start, end, &mut groups);
    }

    for (about, end) in ends {
        log::warn!("transclusion end marker {about} has no start");
        doc.remove(end);
    }
}

/// Finds the common parent of two nodes and the children of it which
/// contain each node.
fn common_range(doc: &Document, a: NodeId, b: NodeId) -> Option<(NodeId, NodeId, NodeId)> {
    let a_path = a.ancestors(&doc.arena).collect::<Vec<_>>();
    let mut b_child = b;
    for b_ancestor in b.ancestors(&doc.arena).skip(1) {
        if let Some(index) = a_path.iter().position(|&id| id == b_ancestor) {
            let a_child = if index == 0 { a } else { a_path[index - 1] };
            return Some((b_ancestor, a_child, b_child));
        }
        b_child = b_ancestor;
    }
    None
}

/// The siblings from `first` to `last`, inclusive, if `last` follows
/// `first`.
fn sibling_range(doc: &Document, first: NodeId, last: NodeId) -> Option<Vec<NodeId>> {
    let mut out = Vec::new();
    for id in first.following_siblings(&doc.arena) {
        out.push(id);
        if id == last {
            return Some(out);
        }
    }
    None
}

/// The tree builder moves template output that is not table content out
/// of the table, leaving the markers behind. If the markers enclose nothing
/// else, returns the fostered nodes in front of the table followed by the
/// table, which together hold the output and the source of the template.
fn fostered_output(
    doc: &Document,
    range: &[NodeId],
    start: NodeId,
    end: NodeId,
) -> Option<Vec<NodeId>> {
    let empty = range.iter().all(|&id| {
        id == start || id == end || doc.text(id).is_some_and(|t| t.trim_ascii().is_empty())
    });
    if !empty {
        return None;
    }

    let table = doc.ancestors(start).find(|&id| doc.is(id, "table"))?;
    let mut out = table
        .preceding_siblings(&doc.arena)
        .skip(1)
        .map_while(|id| {
            doc.element(id)
                .filter(|e| e.dp.fostered && e.about().is_none())
                .map(|_| id)
        })
        .collect::<Vec<_>>();
    if out.is_empty() {
        return None;
    }
    out.reverse();
    out.push(table);
    Some(out)
}

/// The group a node belongs to, through itself or its ancestors.
fn owning_group(doc: &Document, node: NodeId, groups: &[Group]) -> Option<usize> {
    node.ancestors(&doc.arena)
        .take_while(|&id| id != doc.body)
        .filter_map(|id| doc.element(id).and_then(|e| e.about()))
        .find_map(|about| groups.iter().position(|g| g.about == about))
}

/// Appends a literal source part to a `data-mw` parts list.
fn push_source_part(parts: &mut Vec<Value>, source: &str, span: Span) {
    if let Some(text) = source.get(span.into_range())
        && !text.is_empty()
    {
        parts.push(Value::String(text.to_string()));
    }
}

/// The `data-mw` parts of a marker.
fn parts_of(data_mw: Option<&Value>) -> Vec<Value> {
    data_mw
        .and_then(|v| v.get("parts"))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

/// Renumbers the template parts of a parts list.
fn renumber(parts: &mut [Value]) {
    let mut i = 0;
    for part in parts {
        if let Some(template) = part.get_mut("template") {
            template["i"] = json!(i);
            i += 1;
        }
    }
}

fn encapsulate(
    doc: &mut Document,
    source: &str,
    start: NodeId,
    end: NodeId,
    groups: &mut Vec<Group>,
) {
    let Some(marker) = doc.element(start).cloned() else {
        return;
    };
    let about = marker.about().unwrap_or_default().to_string();
    let Some(tsr) = marker.dp.tsr else {
        log::warn!("transclusion {about} has no source range");
        return;
    };

    let Some((_, first, last)) = common_range(doc, start, end) else {
        log::warn!("transclusion {about} markers are not in the same tree");
        return;
    };
    let Some(mut range) = sibling_range(doc, first, last) else {
        log::warn!("transclusion {about} end marker comes before its start");
        return;
    };

    let (first, last) = match fostered_output(doc, &range, start, end) {
        Some(fostered) => {
            log::debug!(
                target: "wiki_roundtrip::dsr",
                "transclusion {about} was fostered out of its table"
            );
            range = fostered;
            match (range.first(), range.last()) {
                (Some(&first), Some(&last)) => (first, last),
                _ => return,
            }
        }
        None => (first, last),
    };

    let dsr_of = |id: NodeId| doc.element(id).and_then(|e| e.dp.dsr);
    let range_start = if first == start {
        tsr.start
    } else {
        range
            .iter()
            .find_map(|&id| dsr_of(id).and_then(|d| d.start))
            .map_or(tsr.start, |s| s.min(tsr.start))
    };
    let range_end = if last == end {
        tsr.end
    } else {
        dsr_of(last)
            .and_then(|d| d.end)
            .map_or(tsr.end, |e| e.max(tsr.end))
    };
    let span = Span::new(range_start, range_end);
    log::trace!(target: "wiki_roundtrip::dsr", "transclusion {about} covers {span:?}");

    if let Some(index) = owning_group(doc, first, groups) {
        merge_into(doc, source, &marker, span, &range, start, end, &mut groups[index]);
        return;
    }

    let nodes = range
        .into_iter()
        .filter(|&id| id != start && id != end)
        .collect::<Vec<_>>();
    doc.remove(end);

    let mut parts = Vec::new();
    push_source_part(&mut parts, source, Span::new(range_start, tsr.start));
    parts.extend(parts_of(marker.data_mw.as_ref()));
    push_source_part(&mut parts, source, Span::new(tsr.end, range_end));
    renumber(&mut parts);
    let data_mw = json!({ "parts": parts });
    let dsr = Dsr {
        start: Some(range_start),
        end: Some(range_end),
        open_width: None,
        close_width: None,
    };

    if nodes.is_empty() {
        // Output-less transclusions keep their marker.
        if let Some(element) = doc.element_mut(start) {
            element.data_mw = Some(data_mw);
            element.dp.dsr = Some(dsr);
        }
        groups.push(Group {
            about,
            first: start,
            span,
        });
        return;
    }
    doc.remove(start);

    let mut first_node = None;
    for (index, node) in nodes.into_iter().enumerate() {
        let node = if doc.is_element(node) {
            node
        } else {
            doc.wrap(node, Element::new("span"))
        };
        let Some(element) = doc.element_mut(node) else {
            continue;
        };
        if index == 0 {
            element.add_typeof("mw:Transclusion");
            element.data_mw = Some(data_mw.clone());
            element.dp.dsr = Some(dsr);
            first_node = Some(node);
        }
        element.set_attr("about", about.clone());
    }

    if let Some(first) = first_node {
        groups.push(Group { about, first, span });
    }
}

/// Adds a transclusion which starts inside an existing group to that group.
#[allow(clippy::too_many_arguments)]
fn merge_into(
    doc: &mut Document,
    source: &str,
    marker: &Element,
    span: Span,
    range: &[NodeId],
    start: NodeId,
    end: NodeId,
    group: &mut Group,
) {
    log::debug!(
        target: "wiki_roundtrip::dsr",
        "merging overlapping transclusion into {}",
        group.about
    );
    let tsr = marker.dp.tsr.unwrap_or(span);

    if let Some(element) = doc.element_mut(group.first) {
        let mut parts = parts_of(element.data_mw.as_ref());
        if tsr.start >= group.span.end {
            push_source_part(&mut parts, source, Span::new(group.span.end, tsr.start));
            parts.extend(parts_of(marker.data_mw.as_ref()));
            push_source_part(&mut parts, source, Span::new(tsr.end, span.end));
        } else if span.end > group.span.end {
            push_source_part(&mut parts, source, Span::new(group.span.end, span.end));
        }
        renumber(&mut parts);
        element.data_mw = Some(json!({ "parts": parts }));

        group.span = group.span.merge(span);
        if let Some(dsr) = element.dp.dsr.as_mut() {
            dsr.end = Some(group.span.end);
        }
    }

    for &node in range {
        if node == start || node == end {
            continue;
        }
        let node = if doc.is_element(node) {
            node
        } else {
            doc.wrap(node, Element::new("span"))
        };
        if let Some(element) = doc.element_mut(node)
            && element.about().is_none()
        {
            element.set_attr("about", group.about.clone());
        }
    }
    doc.remove(start);
    doc.remove(end);
}

/// Returns true if `node` is part of an about group but not its first
/// node.
pub(crate) fn is_group_continuation(doc: &Document, node: NodeId) -> bool {
    let Some(about) = doc.element(node).and_then(|e| e.about()) else {
        return false;
    };
    node.preceding_siblings(&doc.arena)
        .skip(1)
        .map_while(|id| match doc.data(id) {
            NodeData::Element(e) => e.about().filter(|&a| a == about).map(|_| e),
            _ => None,
        })
        .last()
        .is_some_and(Element::is_encapsulation_wrapper)
}
