//! Tree building.
//!
//! A small HTML tree builder over the fully transformed token stream. It
//! keeps a stack of open elements, closes elements implicitly the way HTML
//! does for the cases wikitext produces, inserts missing `tbody` elements,
//! and foster-parents content which is not allowed directly inside a table.
//! Every irregularity is recorded in the element's `data-parsoid` so the
//! serializer can reproduce the original markup.

use super::{
    Document, Element, NodeData,
    data_parsoid::{DataParsoid, parse_data_mw},
};
use crate::{
    config::{BLOCK_ELEMENTS, TABLE_ELEMENTS, VOID_ELEMENTS},
    tokens::{Stx, Tag, Token},
};
use indextree::NodeId;
use phf::{Set, phf_set};

/// Elements which may appear directly inside table structure.
static TABLE_CONTENT: Set<&'static str> = phf_set! {
    "caption", "colgroup", "col", "tbody", "thead", "tfoot", "tr", "td", "th",
    "meta", "style", "script", "template"
};

/// Elements which stop the search for an open list item.
static LIST_SCOPE: Set<&'static str> = phf_set! { "ul", "ol", "dl", "table" };

/// Builds a document from a token stream.
pub(crate) fn build(tokens: Vec<Token>) -> Document {
    let mut builder = TreeBuilder::new();
    for token in tokens {
        if matches!(token, Token::EndOfInput(_)) {
            break;
        }
        builder.process(token);
    }
    builder.finish()
}

/// The tree builder state.
struct TreeBuilder {
    /// The document being built.
    doc: Document,
    /// Open elements, innermost last. The body is never popped.
    stack: Vec<NodeId>,
    /// The next tag identifier.
    next_tag_id: usize,
}

impl TreeBuilder {
    fn new() -> Self {
        let doc = Document::new();
        let stack = vec![doc.body];
        Self {
            doc,
            stack,
            next_tag_id: 0,
        }
    }

    /// The current insertion parent.
    fn current(&self) -> NodeId {
        // The body is pushed in `new` and never popped.
        self.stack.last().copied().unwrap_or(self.doc.body)
    }

    fn current_name(&self) -> &str {
        self.doc.name(self.current()).unwrap_or_default()
    }

    fn process(&mut self, token: Token) {
        log::trace!(target: "wiki_roundtrip::tree", "{token:?}");
        match token {
            Token::StartTag(tag) => self.start_tag(tag, false),
            Token::SelfClosingTag(tag) => self.start_tag(tag, true),
            Token::EndTag(tag) => self.end_tag(&tag),
            Token::Text(text) => self.text(&text),
            Token::Newline(_) => self.text("\n"),
            Token::Comment(text, _) => {
                let node = self.doc.create(NodeData::Comment(text));
                let parent = self.current();
                self.doc.append(parent, node);
            }
            Token::EndOfInput(_) => {}
        }
    }

    /// Returns true if content must be moved out of the current table
    /// structure.
    fn in_table_context(&self) -> bool {
        TABLE_ELEMENTS.contains(self.current_name())
    }

    /// Inserts a new node at the current position, foster parenting it if
    /// needed.
    fn insert(&mut self, node: NodeId, fostered: bool) {
        if fostered
            && let Some(table) = self.stack.iter().rev().copied().find(|&id| self.doc.is(id, "table"))
        {
            self.doc.insert_before(table, node);
        } else {
            let parent = self.current();
            self.doc.append(parent, node);
        }
    }

    fn text(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }

        if self.in_table_context() && !text.trim_ascii().is_empty() {
            log::debug!(target: "wiki_roundtrip::tree", "fostering text {text:?}");
            let mut span = Element::new("span");
            span.dp.fostered = true;
            span.dp.auto_inserted_start = true;
            span.dp.auto_inserted_end = true;
            let span = self.doc.create_element(span);
            self.insert(span, true);
            self.doc.append_text(span, text);
            return;
        }

        let parent = self.current();
        self.doc.append_text(parent, text);
    }

    /// Converts a tag token to an element.
    fn element(&mut self, tag: Tag) -> Element {
        let mut element = Element::new(tag.name);
        for attr in tag.attrs {
            let key = attr.k.to_text().into_owned();
            let value = attr.v.to_text().into_owned();
            if key == "data-mw" {
                element.data_mw = parse_data_mw(&value);
            } else if !key.is_empty() {
                element.attrs.insert(key, value);
            }
        }

        let meta = tag.meta;
        let mut dp = DataParsoid {
            tsr: meta.tsr,
            stx: meta.stx,
            auto_inserted_start: meta.auto_inserted_start,
            auto_inserted_end: meta.auto_inserted_end,
            tag_id: Some(self.next_tag_id),
            ..<_>::default()
        };
        self.next_tag_id += 1;
        // Literal HTML can be recovered from the source range.
        if meta.stx != Some(Stx::Html) {
            dp.src = meta.src;
        }
        for (key, value) in meta.extra {
            if let Some(name) = key.strip_prefix("sa:") {
                dp.sa.insert(name.to_string(), value);
            } else if key == "html" {
                dp.tmp.html = Some(value);
            }
        }
        element.dp = dp;
        element
    }

    fn start_tag(&mut self, tag: Tag, self_closing: bool) {
        let name = tag.name.clone();
        self.close_implied(&name);

        if name == "tr" && self.doc.is(self.current(), "table") {
            let mut tbody = Element::new("tbody");
            tbody.dp.auto_inserted_start = true;
            let tbody = self.doc.create_element(tbody);
            self.insert(tbody, false);
            self.stack.push(tbody);
        }

        let fostered = self.in_table_context() && !TABLE_CONTENT.contains(name.as_str());
        let is_html = tag.meta.stx == Some(Stx::Html);
        let mut element = self.element(tag);
        if fostered {
            log::debug!(target: "wiki_roundtrip::tree", "fostering <{name}>");
            element.dp.fostered = true;
        }
        if self_closing && is_html {
            element.dp.self_close = true;
        }

        let node = self.doc.create_element(element);
        self.insert(node, fostered);
        if !self_closing && !VOID_ELEMENTS.contains(name.as_str()) {
            self.stack.push(node);
        }
    }

    /// Closes open elements which cannot contain a new `name` element.
    fn close_implied(&mut self, name: &str) {
        if BLOCK_ELEMENTS.contains(name) && self.current_name() == "p" {
            self.pop_auto_closed(1);
        }

        let scope_stop = |builder: &Self, targets: &[&str]| {
            for (depth, &id) in builder.stack.iter().rev().enumerate() {
                let current = builder.doc.name(id).unwrap_or_default();
                if targets.contains(&current) {
                    return Some(depth + 1);
                }
                if LIST_SCOPE.contains(current) || id == builder.doc.body {
                    return None;
                }
            }
            None
        };

        let count = match name {
            "li" => scope_stop(self, &["li"]),
            "dt" | "dd" => scope_stop(self, &["dt", "dd"]),
            "tr" => self.table_scope_count(&["tr"]),
            "td" | "th" => self.table_scope_count(&["td", "th"]),
            _ => None,
        };
        if let Some(count) = count {
            self.pop_auto_closed(count);
        }
    }

    /// Counts the open elements down to the innermost of `targets`, without
    /// leaving the current table.
    fn table_scope_count(&self, targets: &[&str]) -> Option<usize> {
        for (depth, &id) in self.stack.iter().rev().enumerate() {
            let current = self.doc.name(id).unwrap_or_default();
            if targets.contains(&current) {
                return Some(depth + 1);
            }
            if current == "table" || id == self.doc.body {
                return None;
            }
        }
        None
    }

    /// Pops `count` elements which end without an end tag.
    fn pop_auto_closed(&mut self, count: usize) {
        for _ in 0..count {
            if self.stack.len() <= 1 {
                return;
            }
            if let Some(id) = self.stack.pop()
                && let Some(element) = self.doc.element_mut(id)
            {
                element.dp.auto_inserted_end = true;
            }
        }
    }

    fn end_tag(&mut self, tag: &Tag) {
        let Some(index) = self
            .stack
            .iter()
            .rposition(|&id| id != self.doc.body && self.doc.is(id, &tag.name))
        else {
            log::debug!(
                target: "wiki_roundtrip::tree",
                "dropping stray end tag </{}> at {:?}",
                tag.name,
                tag.meta.tsr
            );
            return;
        };

        let implied = self.stack.len() - index - 1;
        self.pop_auto_closed(implied);

        if let Some(id) = self.stack.pop()
            && let Some(element) = self.doc.element_mut(id)
        {
            element.dp.tmp.end_tsr = tag.meta.tsr;
            if tag.meta.auto_inserted_end {
                element.dp.auto_inserted_end = true;
            }
        }
    }

    fn finish(mut self) -> Document {
        let open = self.stack.len().saturating_sub(1);
        self.pop_auto_closed(open);
        self.doc
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        tokens::{Attribute, Tag},
        wikitext::Span,
    };

    fn html_tag(name: &str, start: usize, end: usize) -> Tag {
        let mut tag = Tag::new(name, vec![]).with_tsr(Some(Span::new(start, end)));
        tag.meta.stx = Some(Stx::Html);
        tag
    }

    #[test]
    fn end_tags_close_intermediates() {
        let _ = env_logger::try_init();
        let doc = build(vec![
            Token::StartTag(html_tag("div", 0, 5)),
            Token::StartTag(html_tag("span", 5, 11)),
            Token::text("x"),
            Token::EndTag(html_tag("div", 12, 18)),
            Token::EndTag(html_tag("i", 18, 22)),
        ]);
        let body = doc.children(doc.body);
        assert_eq!(body.len(), 1);
        let div = doc.element(body[0]).unwrap();
        assert_eq!(div.dp.tmp.end_tsr, Some(Span::new(12, 18)));
        assert!(!div.dp.auto_inserted_end);
        let span = doc.first_child(body[0]).unwrap();
        assert!(doc.element(span).unwrap().dp.auto_inserted_end);
        assert_eq!(doc.text_content(doc.body), "x");
    }

    #[test]
    fn implicit_tbody_and_foster_parenting() {
        let doc = build(vec![
            Token::StartTag(html_tag("table", 0, 7)),
            Token::text("\n"),
            Token::StartTag(html_tag("tr", 8, 12)),
            Token::text("oops"),
            Token::StartTag(html_tag("td", 16, 20)),
            Token::text("a"),
            Token::EndTag(html_tag("td", 21, 26)),
            Token::EndTag(html_tag("tr", 26, 31)),
            Token::EndTag(html_tag("table", 31, 39)),
        ]);
        let body = doc.children(doc.body);
        assert_eq!(body.len(), 2);
        let fostered = doc.element(body[0]).unwrap();
        assert!(fostered.dp.fostered);
        assert_eq!(doc.text_content(body[0]), "oops");

        let table = doc.children(body[1]);
        assert_eq!(doc.text(table[0]), Some("\n"));
        let tbody = doc.element(table[1]).unwrap();
        assert_eq!(tbody.name, "tbody");
        assert!(tbody.dp.auto_inserted_start);
        assert!(tbody.dp.auto_inserted_end);
        let tr = doc.first_child(table[1]).unwrap();
        assert!(doc.is(tr, "tr"));
        assert_eq!(doc.text_content(tr), "a");
    }

    #[test]
    fn attributes_and_blobs() {
        let mut tag = Tag::new(
            "span",
            vec![
                Attribute::new("typeof", "mw:Extension/x"),
                Attribute::new("data-mw", r#"{"name":"x"}"#),
            ],
        );
        tag.meta.extra.insert("sa:href".into(), "Foo".into());
        tag.meta.src = Some("<x/>".into());
        let doc = build(vec![Token::StartTag(tag), Token::end("span")]);
        let span = doc.element(doc.children(doc.body)[0]).unwrap();
        assert_eq!(span.attrs.len(), 1);
        assert_eq!(span.data_mw.as_ref().unwrap()["name"], "x");
        assert_eq!(span.dp.sa["href"], "Foo");
        assert_eq!(span.dp.src.as_deref(), Some("<x/>"));
    }

    #[test]
    fn void_and_self_closing() {
        let doc = build(vec![
            Token::StartTag(html_tag("br", 0, 4)),
            Token::SelfClosingTag(html_tag("div", 4, 10)),
            Token::text("a"),
        ]);
        let body = doc.children(doc.body);
        assert_eq!(body.len(), 3);
        assert!(doc.element(body[1]).unwrap().dp.self_close);
        assert_eq!(doc.text(body[2]), Some("a"));
    }

    #[test]
    fn unclosed_elements_are_closed_at_end() {
        let doc = build(vec![Token::StartTag(html_tag("b", 0, 3)), Token::text("x")]);
        let b = doc.element(doc.children(doc.body)[0]).unwrap();
        assert!(b.dp.auto_inserted_end);
    }

    #[test]
    fn list_items_close_each_other() {
        let doc = build(vec![
            Token::StartTag(html_tag("ul", 0, 4)),
            Token::StartTag(html_tag("li", 4, 8)),
            Token::text("a"),
            Token::StartTag(html_tag("li", 9, 13)),
            Token::text("b"),
            Token::EndTag(html_tag("ul", 14, 19)),
        ]);
        let ul = doc.children(doc.body)[0];
        let items = doc.children(ul);
        assert_eq!(items.len(), 2);
        assert!(doc.element(items[0]).unwrap().dp.auto_inserted_end);
        assert_eq!(doc.text_content(items[1]), "b");
    }
}
