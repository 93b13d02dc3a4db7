//! Per-tag serialization.
//!
//! Every element is serialized by one [`Handler`], which writes its markup
//! and declares how many newlines the element needs around itself and its
//! children.

use super::{Error, Result, State, WikitextSerializer, nodes, separators::NlRange};
use crate::{
    config::VOID_ELEMENTS,
    diff,
    dom::{self, Element},
    title::{Namespace, Title},
    tokens::Stx,
};
use indextree::NodeId;
use percent_encoding::percent_decode_str;
use serde_json::Value;
use std::fmt::Write as _;

/// The serialization strategy for a node.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(super) enum Handler {
    /// Template, extension, or parameter output, which is written back as
    /// its invocation.
    Encapsulated,
    Body,
    Paragraph,
    Heading(usize),
    /// `ul`, `ol`, and `dl`.
    List,
    ListItem,
    DefinitionTerm,
    DefinitionDescription,
    /// Bold or italic, with its apostrophes.
    Quote(&'static str),
    Link,
    HorizontalRule,
    LineBreak,
    Meta,
    Span,
    /// An element without markup of its own.
    JustChildren,
    /// An element written as literal HTML.
    Html,
    /// Text and comments.
    Text,
}

impl Handler {
    /// Picks the handler for a node.
    pub fn for_node(state: &State<'_>, id: NodeId) -> Self {
        let doc = state.doc;
        let Some(element) = doc.element(id) else {
            return Self::Text;
        };

        if element.is_encapsulation_wrapper() {
            return Self::Encapsulated;
        }

        // New children of HTML-syntax lists and tables have to be HTML too.
        let in_html_container = id != doc.body
            && nodes::is_new_element(doc, id)
            && doc.parent(id).is_some_and(|parent| {
                doc.element(parent).is_some_and(Element::is_html_syntax)
                    && ((nodes::is_list(doc, parent) && nodes::is_list_item(doc, id))
                        || (matches!(doc.name(parent), Some("table" | "tbody" | "th" | "tr"))
                            && matches!(
                                element.name.as_str(),
                                "tbody" | "caption" | "th" | "tr" | "td"
                            )))
            });
        if element.is_html_syntax() || in_html_container {
            return Self::Html;
        }

        match element.name.as_str() {
            "b" => Self::Quote("'''"),
            "i" => Self::Quote("''"),
            "ul" | "ol" | "dl" => Self::List,
            "li" => Self::ListItem,
            "dt" => Self::DefinitionTerm,
            "dd" => Self::DefinitionDescription,
            "tbody" | "thead" | "tfoot" => Self::JustChildren,
            "p" => Self::Paragraph,
            "meta" => Self::Meta,
            "span" => Self::Span,
            "hr" => Self::HorizontalRule,
            "br" => Self::LineBreak,
            "a" => Self::Link,
            "body" => Self::Body,
            "h1" => Self::Heading(1),
            "h2" => Self::Heading(2),
            "h3" => Self::Heading(3),
            "h4" => Self::Heading(4),
            "h5" => Self::Heading(5),
            "h6" => Self::Heading(6),
            _ => Self::Html,
        }
    }

    /// Writes the node and returns the node to continue with.
    pub fn handle(
        self,
        state: &mut State<'_>,
        id: NodeId,
        wrapper_unmodified: bool,
    ) -> Result<Option<NodeId>> {
        let doc = state.doc;
        match self {
            Self::Encapsulated => return encapsulated(state, id),
            Self::Html => html(state, id, wrapper_unmodified)?,
            Self::Body | Self::JustChildren | Self::Paragraph => state.serialize_children(id)?,
            Self::Heading(level) => heading(state, id, level)?,
            Self::List => list(state, id)?,
            Self::ListItem | Self::DefinitionTerm | Self::DefinitionDescription => {
                list_item(state, id)?;
            }
            Self::Quote(quotes) => quote(state, id, quotes)?,
            Self::Link => link(state, id, wrapper_unmodified)?,
            Self::HorizontalRule => {
                let src = doc
                    .element(id)
                    .and_then(|e| e.dp.src.as_deref())
                    .filter(|src| src.starts_with("----"))
                    .unwrap_or("----");
                state.emit(src, id);
            }
            Self::LineBreak => {
                let html = doc.element(id).is_some_and(Element::is_html_syntax);
                if html || !doc.parent(id).is_some_and(|p| doc.is(p, "p")) {
                    state.emit("<br>", id);
                } else {
                    // Still triggers the separator.
                    state.emit("", id);
                }
            }
            Self::Meta => meta(state, id, wrapper_unmodified)?,
            Self::Span => {
                if diff::is_wrapper(doc, id) {
                    state.serialize_children(id)?;
                } else {
                    html(state, id, wrapper_unmodified)?;
                }
            }
            Self::Text => {}
        }
        Ok(doc.next_sibling(id))
    }

    /// The newlines the node needs before it, where `other` is the node in
    /// front of it or its parent.
    pub fn before(self, state: &State<'_>, id: NodeId, other: NodeId) -> NlRange {
        let doc = state.doc;
        let is_new = nodes::is_new_element(doc, id);
        match self {
            Self::Encapsulated => {
                let element = doc.element(id);
                if is_new
                    && element.is_some_and(|e| {
                        e.has_typeof("mw:Extension/references") && !e.has_typeof("mw:Transclusion")
                    })
                {
                    NlRange::new(1, 2)
                } else {
                    NlRange::new(0, 2)
                }
            }
            Self::Heading(_) => {
                if is_new && nodes::previous_non_sep_sibling(doc, id).is_some() {
                    NlRange::new(2, 2)
                } else {
                    NlRange::new(1, 2)
                }
            }
            Self::List => {
                if other == doc.body {
                    NlRange::new(0, 0)
                } else if doc.is_text(other)
                    && doc.parent(id).is_some_and(|p| nodes::is_list_item(doc, p))
                {
                    NlRange::new(1, 1)
                } else {
                    NlRange::new(1, 2)
                }
            }
            Self::ListItem => {
                let under_list = doc.parent(id) == Some(other)
                    && matches!(doc.name(other), Some("ul" | "ol"));
                let after_html = doc.element(other).is_some_and(Element::is_html_syntax);
                if under_list || after_html {
                    NlRange::ANY
                } else {
                    NlRange::new(1, 2)
                }
            }
            Self::DefinitionTerm => NlRange::new(1, 2),
            Self::DefinitionDescription => {
                if stx(doc, id) == Some(Stx::Row) {
                    NlRange::new(0, 0)
                } else {
                    NlRange::new(1, 2)
                }
            }
            Self::Paragraph => paragraph_before(state, id, other),
            Self::HorizontalRule => NlRange::new(1, 2),
            Self::LineBreak => {
                if doc.parent(id) == Some(other) && doc.is(other, "p") {
                    NlRange::new(1, 2)
                } else {
                    NlRange::ANY
                }
            }
            Self::Meta if is_new => NlRange::at_least(1),
            _ => NlRange::ANY,
        }
    }

    /// The newlines the node needs after it, where `other` is the node
    /// after it or its parent.
    pub fn after(self, state: &State<'_>, id: NodeId, other: NodeId) -> NlRange {
        let doc = state.doc;
        match self {
            Self::Heading(_) => NlRange::new(1, 2),
            Self::List | Self::ListItem | Self::DefinitionDescription => {
                list_eol(state, id, other)
            }
            Self::DefinitionTerm => {
                if doc.is(other, "dd") && stx(doc, other) == Some(Stx::Row) {
                    NlRange::new(0, 0)
                } else {
                    list_eol(state, id, other)
                }
            }
            Self::Paragraph => {
                let ends_with_br = doc.last_child(id).is_some_and(|c| doc.is(c, "br"));
                if !ends_with_br
                    && doc.is(other, "p")
                    && stx(doc, other) != Some(Stx::Html)
                {
                    NlRange::new(2, 2)
                } else {
                    NlRange::new(usize::from(nodes::is_block(doc, other)), 2)
                }
            }
            Self::HorizontalRule => NlRange::new(0, 2),
            Self::LineBreak => {
                if doc.parent(id).is_some_and(|p| nodes::is_list_item(doc, p)) {
                    NlRange::ANY
                } else {
                    NlRange::at_least(1)
                }
            }
            Self::Meta if nodes::is_new_element(doc, id) => NlRange::at_least(1),
            _ => NlRange::ANY,
        }
    }

    /// The newlines the node needs between its start and its first child.
    pub fn first_child(self, state: &State<'_>, _id: NodeId, other: NodeId) -> NlRange {
        match self {
            Self::Body => NlRange::new(0, 1),
            Self::ListItem | Self::DefinitionTerm | Self::DefinitionDescription => {
                if nodes::is_list(state.doc, other) {
                    NlRange::ANY
                } else {
                    NlRange::new(0, 0)
                }
            }
            _ => NlRange::ANY,
        }
    }

    /// The newlines the node needs between its last child and its end.
    pub fn last_child(self, _state: &State<'_>, _id: NodeId, _other: NodeId) -> NlRange {
        match self {
            Self::Body => NlRange::new(0, 1),
            _ => NlRange::ANY,
        }
    }
}

fn stx(doc: &dom::Document, id: NodeId) -> Option<Stx> {
    doc.element(id).and_then(|e| e.dp.stx)
}

fn paragraph_before(state: &State<'_>, id: NodeId, other: NodeId) -> NlRange {
    let doc = state.doc;
    let in_list_item = doc.parent(id) == Some(other) && nodes::is_list_item(doc, other);
    let at_container_start = other == doc.body || doc.is(other, "td");

    if in_list_item || at_container_start {
        if at_container_start {
            NlRange::new(0, 1)
        } else {
            NlRange::new(0, 0)
        }
    } else if (nodes::previous_non_deleted_sibling(doc, id) == Some(other)
        && doc.is(other, "p")
        && stx(doc, other) != Some(Stx::Html))
        || (doc.is_text(other)
            && nodes::previous_non_sep_sibling(doc, id) == Some(other)
            && !state.cur_line_has_block_node(other))
    {
        NlRange::new(2, 2)
    } else {
        NlRange::new(1, 2)
    }
}

/// The newlines after a list or list item.
fn list_eol(state: &State<'_>, id: NodeId, other: NodeId) -> NlRange {
    let doc = state.doc;
    let Some(other_element) = doc.element(other) else {
        return NlRange::new(0, 2);
    };
    if other == doc.body || other_element.is_encapsulation_wrapper() {
        return NlRange::new(0, 2);
    }

    let next = nodes::next_non_sep_sibling(doc, id);
    if (next == Some(other) && other_element.is_html_syntax()) || other_element.dp.src.is_some() {
        NlRange::new(0, 2)
    } else if next == Some(other)
        && (nodes::is_list(doc, other) || nodes::is_list_item(doc, other))
    {
        if nodes::is_list(doc, id) && doc.name(other) == doc.name(id) {
            // Adjacent lists of one type would merge.
            NlRange::new(2, 2)
        } else if nodes::is_list_item(doc, id)
            || doc
                .parent(id)
                .is_some_and(|p| matches!(doc.name(p), Some("li" | "dd")))
        {
            NlRange::new(1, 1)
        } else {
            NlRange::new(1, 2)
        }
    } else if nodes::is_list(doc, other) || other_element.is_html_syntax() {
        // The list owns the newlines after its last item.
        NlRange::ANY
    } else {
        NlRange::new(1, 2)
    }
}

/// Returns true if a new element needs a space between its markup and
/// `child`.
fn needs_space(doc: &dom::Document, child: Option<NodeId>, leading: bool) -> bool {
    child.is_some_and(|child| {
        doc.text(child).is_none_or(|text| {
            if leading {
                !text.starts_with(char::is_whitespace)
            } else {
                !text.ends_with(char::is_whitespace)
            }
        })
    })
}

fn heading(state: &mut State<'_>, id: NodeId, level: usize) -> Result {
    let doc = state.doc;
    let marker = "=".repeat(level);
    let is_new = nodes::is_new_element(doc, id);

    let mut open = marker.clone();
    if is_new && needs_space(doc, doc.first_child(id), true) {
        open.push(' ');
    }
    state.emit(&open, id);

    if doc.first_child(id).is_some() {
        state.serialize_children(id)?;
    } else {
        state.emit("<nowiki/>", id);
    }

    let mut close = String::new();
    if is_new && needs_space(doc, doc.last_child(id), false) {
        close.push(' ');
    }
    close += &marker;
    state.emit(&close, id);
    Ok(())
}

/// The list markup of a list or list item, built from its ancestors.
fn list_bullets(doc: &dom::Document, id: NodeId) -> String {
    let mut bullets = String::new();
    let mut node = Some(id);
    while let Some(current) = node
        && let Some(element) = doc.element(current)
    {
        let bullet = match element.name.as_str() {
            "ul" => Some("*"),
            "ol" => Some("#"),
            "dl" | "li" => Some(""),
            "dt" => Some(";"),
            "dd" => Some(":"),
            _ => None,
        };
        let html = element.is_html_syntax();
        match bullet {
            Some(bullet) if !html => bullets.insert_str(0, bullet),
            _ if html && element.dp.auto_inserted_start && element.dp.auto_inserted_end => {}
            _ => break,
        }
        node = doc.parent(current);
    }

    if nodes::is_new_element(doc, id) && needs_space(doc, doc.first_child(id), true) {
        bullets.push(' ');
    }
    bullets
}

fn list(state: &mut State<'_>, id: NodeId) -> Result {
    let doc = state.doc;
    let mut first = nodes::first_non_sep_child(doc, id);
    while let Some(child) = first
        && doc
            .element(child)
            .is_some_and(|e| e.dp.auto_inserted_start && e.dp.auto_inserted_end)
    {
        first = nodes::first_non_sep_child(doc, child);
    }

    let item_names: &[&str] = if doc.is(id, "dl") {
        &["dt", "dd"]
    } else {
        &["li"]
    };
    let starts_with_item = first
        .and_then(|child| doc.name(child))
        .is_some_and(|name| item_names.contains(&name));
    if !starts_with_item {
        state.emit(&list_bullets(doc, id), id);
    }
    state.serialize_children(id)
}

fn list_item(state: &mut State<'_>, id: NodeId) -> Result {
    let doc = state.doc;
    if doc.is(id, "dd") && stx(doc, id) == Some(Stx::Row) {
        state.emit(":", id);
    } else if !nodes::first_non_sep_child(doc, id).is_some_and(|child| nodes::is_list(doc, child)) {
        state.emit(&list_bullets(doc, id), id);
    }
    state.serialize_children(id)
}

/// The text or quote element directly in front of a quote element in the
/// output, if there is one.
fn preceding_quote(state: &State<'_>, id: NodeId) -> Option<NodeId> {
    let doc = state.doc;
    let last = state.sep.last_source_node?;

    let prev = nodes::previous_non_deleted_sibling(doc, id);
    if let Some(prev) = prev
        && doc.text(prev).is_some_and(|text| text.ends_with('\''))
    {
        return Some(prev);
    }

    let mut node = id;
    while nodes::previous_non_deleted_sibling(doc, node).is_none() {
        node = doc.parent(node)?;
        if node == doc.body {
            return None;
        }
    }

    let is_quote = |id: NodeId| matches!(doc.name(id), Some("b" | "i"));
    let mut node = doc.previous_sibling(node);
    while let Some(current) = node
        && doc.is_element(current)
    {
        let last_child = doc.last_child(current);
        if is_quote(current) && last_child.is_some_and(is_quote) {
            return if last == current { last_child } else { None };
        } else if last == current {
            return None;
        }
        node = last_child;
    }
    None
}

fn quote(state: &mut State<'_>, id: NodeId, quotes: &'static str) -> Result {
    let doc = state.doc;
    let before = preceding_quote(state, id);
    let after = nodes::next_non_deleted_sibling(doc, id)
        .and_then(|next| doc.text(next))
        .is_some_and(|text| text.starts_with('\''));

    if let Some(before) = before
        && (after || doc.is_element(before))
    {
        state.emit_start_tag("<nowiki/>", id);
    }
    state.emit_start_tag(quotes, id);

    if doc.first_child(id).is_none() {
        let auto_end = doc.element(id).is_some_and(|e| e.dp.auto_inserted_end);
        if !(state.rt_testing && auto_end) {
            state.emit_start_tag("<nowiki/>", id);
            state.emit(quotes, id);
        }
    } else {
        state.serialize_children(id)?;
        state.emit_end_tag(quotes, id);
    }

    if after {
        state.emit_end_tag("<nowiki/>", id);
    }
    Ok(())
}

fn link(state: &mut State<'_>, id: NodeId, wrapper_unmodified: bool) -> Result {
    let doc = state.doc;
    let Some(element) = doc.element(id) else {
        return Ok(());
    };
    let href = element.attr("href").unwrap_or_default();

    match element.attr("rel") {
        Some("mw:WikiLink") => {
            let target = match element.dp.sa.get("href") {
                Some(original) if Title::new(original, Namespace::MAIN).href() == href => {
                    original.clone()
                }
                _ => {
                    let path = href.strip_prefix("./").unwrap_or(href);
                    percent_decode_str(path)
                        .decode_utf8_lossy()
                        .replace('_', " ")
                }
            };
            let content = state.serialize_link_children_to_string(id)?;
            let simple = content.is_empty()
                || (content == target
                    && (element.dp.stx == Some(Stx::Simple) || nodes::is_new_element(doc, id)));
            let wt = if simple {
                format!("[[{target}]]")
            } else {
                format!("[[{target}|{content}]]")
            };
            state.emit(&wt, id);
        }
        Some("mw:ExtLink") => {
            let content = state.serialize_link_children_to_string(id)?;
            let wt = if content.is_empty() {
                format!("[{href}]")
            } else {
                format!("[{href} {content}]")
            };
            state.emit(&wt, id);
        }
        _ => html(state, id, wrapper_unmodified)?,
    }
    Ok(())
}

fn meta(state: &mut State<'_>, id: NodeId, wrapper_unmodified: bool) -> Result {
    let doc = state.doc;
    let Some(element) = doc.element(id) else {
        return Ok(());
    };
    let src = element.dp.src.as_deref();

    if let Some(word) = element
        .attr("property")
        .and_then(|p| p.strip_prefix("mw:PageProp/"))
    {
        let wt = src.map_or_else(|| format!("__{}__", word.to_uppercase()), str::to_string);
        state.emit(&wt, id);
        return Ok(());
    }

    let directive = element.typeof_values().find_map(|ty| match ty {
        "mw:Includes/IncludeOnly" => Some(src.unwrap_or_default()),
        "mw:Includes/IncludeOnly/End" | "mw:DiffMarker" => Some(""),
        "mw:Includes/NoInclude" => Some(src.unwrap_or("<noinclude>")),
        "mw:Includes/NoInclude/End" => Some(src.unwrap_or("</noinclude>")),
        "mw:Includes/OnlyInclude" => Some(src.unwrap_or("<onlyinclude>")),
        "mw:Includes/OnlyInclude/End" => Some(src.unwrap_or("</onlyinclude>")),
        _ => None,
    });

    match directive {
        Some("") => {}
        Some(wt) => state.emit(wt, id),
        None => html(state, id, wrapper_unmodified)?,
    }
    Ok(())
}

/// Writes template, extension, or parameter output as its invocation.
fn encapsulated(state: &mut State<'_>, id: NodeId) -> Result<Option<NodeId>> {
    let doc = state.doc;
    let Some(element) = doc.element(id) else {
        return Ok(doc.next_sibling(id));
    };
    let dp = &element.dp;

    let built = if element.has_typeof("mw:Transclusion") {
        element
            .data_mw
            .as_ref()
            .and_then(|data_mw| data_mw.get("parts"))
            .and_then(Value::as_array)
            .and_then(|parts| template_wikitext(parts))
    } else if element.has_typeof("mw:Param") {
        None
    } else {
        match element.data_mw.as_ref() {
            Some(data_mw) if data_mw.get("name").is_some() => {
                Some(extension_wikitext(state, data_mw)?)
            }
            _ => None,
        }
    };

    let source = state.source;
    let original = || {
        let span = dp.dsr.and_then(|dsr| dsr.span())?;
        if dp.fostered {
            return None;
        }
        source?.get(span.into_range()).map(str::to_string)
    };

    let wt = match built.or_else(|| dp.src.clone()).or_else(original) {
        Some(wt) => wt,
        None if element.has_typeof("mw:Param") => {
            log::error!(target: "wiki_roundtrip::wts", "no source for parameter output; writing html");
            html(state, id, false)?;
            return Ok(nodes::skip_over_encapsulated(doc, id));
        }
        None => {
            return Err(Error::Unserializable {
                kind: element
                    .typeof_values()
                    .find(|t| t.starts_with("mw:"))
                    .unwrap_or_default()
                    .to_string(),
            });
        }
    };

    state.emit_wikitext(&wt, id);
    Ok(nodes::skip_over_encapsulated(doc, id))
}

/// Rebuilds template invocation wikitext from `data-mw` parts.
fn template_wikitext(parts: &[Value]) -> Option<String> {
    let mut out = String::new();
    for part in parts {
        if let Some(text) = part.as_str() {
            out += text;
            continue;
        }

        let template = part.get("template")?;
        let target = template.get("target")?.get("wt")?.as_str()?;
        out += "{{";
        out += target;

        let mut position = 1;
        let params = template.get("params").and_then(Value::as_object);
        for (key, value) in params.into_iter().flatten() {
            let wt = value
                .get("wt")
                .and_then(Value::as_str)
                .unwrap_or_default();
            if *key == position.to_string() && !wt.contains('=') {
                out.push('|');
                out += wt;
                position += 1;
            } else {
                let _ = write!(out, "|{key}={}", wt.trim());
            }
        }
        out += "}}";
    }
    Some(out)
}

/// Rebuilds extension tag wikitext from `data-mw`.
fn extension_wikitext(state: &State<'_>, data_mw: &Value) -> Result<String> {
    let name = data_mw
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or_default();

    let mut out = format!("<{name}");
    if let Some(attrs) = data_mw.get("attrs").and_then(Value::as_object) {
        for (key, value) in attrs {
            let value = value.as_str().unwrap_or_default();
            let _ = write!(out, " {key}=\"{}\"", value.replace('"', "&quot;"));
        }
    }

    let body = data_mw.get("body");
    if let Some(extsrc) = body.and_then(|b| b.get("extsrc")).and_then(Value::as_str) {
        let _ = write!(out, ">{extsrc}</{name}>");
    } else if let Some(html) = body.and_then(|b| b.get("html")).and_then(Value::as_str) {
        let doc = dom::html::from_html(html)?;
        let inner = WikitextSerializer::new(state.env).serialize(&doc, None)?;
        let _ = write!(out, ">{inner}</{name}>");
    } else {
        out += " />";
    }
    Ok(out)
}

/// Writes an element as literal HTML.
fn html(state: &mut State<'_>, id: NodeId, wrapper_unmodified: bool) -> Result {
    let doc = state.doc;
    let Some(element) = doc.element(id) else {
        return Ok(());
    };
    let source = state.source;
    let original = |range: Option<(usize, usize)>| {
        range.and_then(|(start, end)| source?.get(start..end))
    };
    let dsr = element.dp.dsr.filter(|_| wrapper_unmodified);

    let start_src = dsr.and_then(|dsr| dsr.start.zip(dsr.open_width));
    let start = match original(start_src.map(|(start, width)| (start, start + width))) {
        Some(src) => src.to_string(),
        None if element.dp.auto_inserted_start => String::new(),
        None => start_tag(element),
    };
    let end_src = dsr.and_then(|dsr| dsr.end.zip(dsr.close_width));
    let end = match original(end_src.and_then(|(end, width)| Some((end.checked_sub(width)?, end)))) {
        Some(src) => src.to_string(),
        None if element.dp.auto_inserted_end
            || element.dp.self_close
            || VOID_ELEMENTS.contains(element.name.as_str()) =>
        {
            String::new()
        }
        None => format!("</{}>", element.name),
    };

    let is_pre = element.name == "pre";
    state.emit_start_tag(&start, id);
    if doc.first_child(id).is_some() {
        let in_html_pre = state.in_html_pre;
        state.in_html_pre |= is_pre;
        state.serialize_children(id)?;
        state.in_html_pre = in_html_pre;
    }
    state.emit_end_tag(&end, id);
    Ok(())
}

/// The wikitext which produced a templated attribute value, if the value is
/// still the one it expanded to.
fn expanded_attr_source<'a>(element: &'a Element, key: &str, value: &str) -> Option<&'a str> {
    if !element.has_typeof("mw:ExpandedAttrs") {
        return None;
    }
    let attribs = element.data_mw.as_ref()?.get("attribs")?.as_array()?;
    attribs.iter().find_map(|attrib| {
        let [k, v] = attrib.as_array()?.as_slice() else {
            return None;
        };
        if k.get("txt")?.as_str()? != key || v.get("html")?.as_str()? != value {
            return None;
        }
        v.get("wt")?.as_str()
    })
}

/// Formats the start tag of an element, without round-trip attributes.
fn start_tag(element: &Element) -> String {
    let mut out = format!("<{}", element.name);
    for (key, value) in &element.attrs {
        let value = match key.as_str() {
            "typeof" => {
                let kept = value
                    .split_ascii_whitespace()
                    .filter(|ty| !ty.starts_with("mw:"))
                    .collect::<Vec<_>>()
                    .join(" ");
                if kept.is_empty() {
                    continue;
                }
                kept
            }
            "about" if value.starts_with("#mwt") => continue,
            _ => {
                if let Some(wt) = expanded_attr_source(element, key, value) {
                    let quote = if wt.contains('"') { '\'' } else { '"' };
                    let _ = write!(out, " {key}={quote}{wt}{quote}");
                    continue;
                }
                value.clone()
            }
        };
        let _ = write!(out, " {key}=\"{}\"", value.replace('"', "&quot;"));
    }
    if element.dp.self_close {
        out += " /";
    }
    out.push('>');
    out
}
