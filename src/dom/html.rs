//! Reading and writing annotated HTML.
//!
//! The round-trip blobs are stored as the `data-parsoid`, `data-mw`, and
//! `data-parsoid-diff` attributes of each element.

use super::{
    Document, Element, Error, NodeData,
    data_parsoid::{DataParsoid, parse_data_mw},
};
use crate::{config::VOID_ELEMENTS, diff::DiffMark};
use html5ever::{parse_document, tendril::TendrilSink};
use indextree::NodeId;
use markup5ever_rcdom::{Handle, NodeData as RcNodeData, RcDom};
use std::fmt::Write as _;

/// Writes a document as HTML.
pub(crate) fn to_html(doc: &Document) -> String {
    let mut out = String::from("<!DOCTYPE html>\n");
    write_node(doc, doc.root, &mut out);
    out
}

/// Writes the children of the body as an HTML fragment.
pub(crate) fn body_html(doc: &Document) -> String {
    let mut out = String::new();
    for child in doc.body.children(&doc.arena) {
        write_node(doc, child, &mut out);
    }
    out
}

fn write_node(doc: &Document, id: NodeId, out: &mut String) {
    match doc.data(id) {
        NodeData::Document => {
            for child in id.children(&doc.arena) {
                write_node(doc, child, out);
            }
        }
        NodeData::Text(text) => out.push_str(&html_escape::encode_text(text)),
        NodeData::Comment(text) => {
            let _ = write!(out, "<!--{text}-->");
        }
        NodeData::Element(element) => {
            write_start_tag(element, out);
            if VOID_ELEMENTS.contains(element.name.as_str()) {
                return;
            }
            for child in id.children(&doc.arena) {
                write_node(doc, child, out);
            }
            let _ = write!(out, "</{}>", element.name);
        }
    }
}

fn write_start_tag(element: &Element, out: &mut String) {
    let _ = write!(out, "<{}", element.name);
    let mut attr = |key: &str, value: &str| {
        let _ = write!(
            out,
            " {key}=\"{}\"",
            html_escape::encode_double_quoted_attribute(value)
        );
    };
    for (key, value) in &element.attrs {
        attr(key, value);
    }
    if let Some(data_mw) = &element.data_mw {
        attr("data-mw", &data_mw.to_string());
    }
    if !element.dp.is_empty() {
        attr("data-parsoid", &element.dp.to_json());
    }
    if let Some(diff) = &element.diff {
        attr("data-parsoid-diff", &diff.to_json());
    }
    out.push('>');
}

/// Reads an annotated HTML document.
pub(crate) fn from_html(html: &str) -> Result<Document, Error> {
    let dom = parse_document(RcDom::default(), <_>::default())
        .from_utf8()
        .read_from(&mut html.as_bytes())?;

    let mut doc = Document::new();
    let doc_body = doc.body;
    if let Some(body) = find_element(&dom.document, "body") {
        if let RcNodeData::Element { attrs, .. } = &body.data {
            let element = convert_element("body", &attrs.borrow());
            if let Some(target) = doc.element_mut(doc_body) {
                *target = element;
            }
        }
        for child in body.children.borrow().iter() {
            convert(&mut doc, child, doc_body);
        }
    }
    Ok(doc)
}

/// Reads an HTML fragment into detached nodes of `doc`.
pub(crate) fn parse_fragment(doc: &mut Document, html: &str) -> Result<Vec<NodeId>, Error> {
    let dom = parse_document(RcDom::default(), <_>::default())
        .from_utf8()
        .read_from(&mut html.as_bytes())?;

    // Nodes are collected under a scratch parent and detached afterwards.
    let scratch = doc.create_element(Element::new("body"));
    if let Some(body) = find_element(&dom.document, "body") {
        for child in body.children.borrow().iter() {
            convert(doc, child, scratch);
        }
    }
    let nodes = doc.children(scratch);
    for &node in &nodes {
        node.detach(&mut doc.arena);
    }
    doc.remove(scratch);
    Ok(nodes)
}

/// Finds the first element with the given name, depth first.
fn find_element(handle: &Handle, name: &str) -> Option<Handle> {
    if let RcNodeData::Element { name: qual, .. } = &handle.data
        && &*qual.local == name
    {
        return Some(handle.clone());
    }
    handle
        .children
        .borrow()
        .iter()
        .find_map(|child| find_element(child, name))
}

/// Converts html5ever attributes to an element, extracting the blobs.
fn convert_element(name: &str, attrs: &[html5ever::Attribute]) -> Element {
    let mut element = Element::new(name);
    for attr in attrs {
        let value = &*attr.value;
        match &*attr.name.local {
            "data-parsoid" => element.dp = DataParsoid::parse(value),
            "data-mw" => element.data_mw = parse_data_mw(value),
            "data-parsoid-diff" => element.diff = DiffMark::parse(value),
            key => {
                element.attrs.insert(key.to_string(), value.to_string());
            }
        }
    }
    element
}

fn convert(doc: &mut Document, handle: &Handle, parent: NodeId) {
    match &handle.data {
        RcNodeData::Text { contents } => {
            doc.append_text(parent, &contents.borrow());
        }
        RcNodeData::Comment { contents } => {
            let node = doc.create(NodeData::Comment(contents.to_string()));
            doc.append(parent, node);
        }
        RcNodeData::Element { name, attrs, .. } => {
            let element = convert_element(&name.local, &attrs.borrow());
            let node = doc.create_element(element);
            doc.append(parent, node);
            for child in handle.children.borrow().iter() {
                convert(doc, child, node);
            }
        }
        RcNodeData::Document
        | RcNodeData::Doctype { .. }
        | RcNodeData::ProcessingInstruction { .. } => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::Dsr;

    #[test]
    fn writes_blobs_as_attributes() {
        let mut doc = Document::new();
        let mut p = Element::new("p");
        p.set_attr("class", "a\"b");
        p.dp.dsr = Some(Dsr::new(0, 1, 0, 0));
        let p = doc.create_element(p);
        doc.append(doc.body, p);
        doc.append_text(p, "x<y");
        let br = doc.create_element(Element::new("br"));
        doc.append(doc.body, br);

        assert_eq!(
            body_html(&doc),
            r#"<p class="a&quot;b" data-parsoid="{&quot;v&quot;:1,&quot;dsr&quot;:[0,1,0,0]}">x&lt;y</p><br>"#
        );
    }

    #[test]
    fn reads_what_it_writes() {
        let html = r#"<!DOCTYPE html><html><head></head><body data-parsoid='{"v":1,"dsr":[0,7,0,0]}'><p data-parsoid='{"v":1,"dsr":[0,7,0,0]}'>a <!--c--> <b data-mw='{"x":1}' data-parsoid='bogus'>b</b></p></body></html>"#;
        let doc = from_html(html).unwrap();
        let body = doc.element(doc.body).unwrap();
        assert_eq!(body.dp.dsr, Some(Dsr::new(0, 7, 0, 0)));

        let p = doc.children(doc.body)[0];
        let children = doc.children(p);
        assert_eq!(children.len(), 4);
        assert_eq!(doc.text(children[0]), Some("a "));
        assert!(doc.is_comment(children[1]));
        let b = doc.element(children[3]).unwrap();
        assert_eq!(b.data_mw.as_ref().unwrap()["x"], 1);
        assert_eq!(b.dp, DataParsoid::default());

        let again = from_html(&to_html(&doc)).unwrap();
        assert_eq!(body_html(&again), body_html(&doc));
    }

    #[test]
    fn fragments_are_detached() {
        let mut doc = Document::new();
        let nodes = parse_fragment(&mut doc, "<pre>x</pre>tail").unwrap();
        assert_eq!(nodes.len(), 2);
        assert!(doc.is(nodes[0], "pre"));
        assert_eq!(doc.parent(nodes[0]), None);
        assert_eq!(doc.text(nodes[1]), Some("tail"));
    }
}
