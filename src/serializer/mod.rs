//! Converts annotated documents back to wikitext.
//!
//! The serializer walks the document depth-first and hands each element to
//! its [`Handler`](handlers::Handler). Output is written in chunks, each
//! tagged with the node that produced it. Whitespace between chunks is not
//! written when it is seen; it is collected into a pending separator which
//! is only emitted in front of the next chunk, once the newline
//! requirements of both neighbours are known.
//!
//! In selective mode, elements which did not change since the document was
//! parsed are copied from the original source instead of being serialized.

pub(crate) use self::selser::SelectiveSerializer;
use self::{
    handlers::Handler,
    selser::Selection,
    separators::{SepType, Separator, is_valid_sep},
};
use crate::{
    config::ZERO_WIDTH_ELEMENTS,
    diff,
    dom::{self, Document, NodeData},
    pipeline::Env,
};
use indextree::NodeId;
use regex::Regex;
use std::{borrow::Cow, sync::LazyLock};

mod escape;
mod handlers;
mod nodes;
mod selser;
mod separators;
#[cfg(test)]
mod tests;

/// A serialization error.
#[derive(Debug, thiserror::Error)]
pub(crate) enum Error {
    /// Embedded HTML could not be read.
    #[error(transparent)]
    Dom(#[from] dom::Error),
    /// Encapsulated content had neither a description nor source to
    /// serialize it from.
    #[error("cannot serialize {kind} content without data-mw or source")]
    Unserializable {
        /// The `typeof` of the content.
        kind: String,
    },
}

/// The result type for serialization.
pub(crate) type Result<T = (), E = Error> = core::result::Result<T, E>;

/// A piece of output and the node it came from.
pub(super) type Chunk = (String, NodeId);

/// The full wikitext serializer.
pub(crate) struct WikitextSerializer<'a> {
    env: &'a Env,
}

impl<'a> WikitextSerializer<'a> {
    pub fn new(env: &'a Env) -> Self {
        Self { env }
    }

    /// Serializes a document.
    ///
    /// If the source the document was parsed from is given and round-trip
    /// testing is enabled, separators are copied from the source wherever
    /// the source ranges allow it.
    pub fn serialize(&self, doc: &Document, source: Option<&str>) -> Result<String> {
        Ok(self
            .chunks(doc, source, None)?
            .into_iter()
            .map(|(text, _)| text)
            .collect())
    }

    /// Serializes a document into chunks.
    fn chunks(
        &self,
        doc: &Document,
        source: Option<&str>,
        selection: Option<&Selection>,
    ) -> Result<Vec<Chunk>> {
        let mut state = State::new(self.env, doc, source, selection);
        log::trace!(
            target: state.target(),
            "--- DOM ---\n{}\n-----------",
            dom::html::body_html(doc)
        );

        state.sep.last_source_node = Some(doc.body);
        state.cur_line_start = doc.first_child(doc.body);
        state.serialize_children(doc.body)?;
        // Nothing constrains the separator of a document without elements.
        if !doc.children(doc.body).into_iter().any(|id| doc.is_element(id))
            && let Some(sep) = state.sep.src.take()
        {
            state.emit_sep(&sep, doc.body);
        }
        // Trailing separator.
        state.emit("", doc.body);
        Ok(state.chunks)
    }
}

/// Serialization state.
pub(super) struct State<'a> {
    pub env: &'a Env,
    pub doc: &'a Document,
    /// The source the document was parsed from.
    pub source: Option<&'a str>,
    /// Whether the document is known to be unedited.
    pub rt_testing: bool,
    /// The reuse decisions in selective mode.
    selection: Option<&'a Selection>,
    /// The revision diff marks are checked against.
    pub revision: u64,
    /// The pending separator.
    sep: Separator,
    /// Whether output is at the start of a line.
    pub on_sol: bool,
    /// Whether nothing has been written yet.
    pub at_start_of_output: bool,
    /// Whether the next output is text which may need escaping.
    escape_text: bool,
    /// Whether the walk is inside content marked as inserted or modified.
    pub in_modified_content: bool,
    pub in_html_pre: bool,
    pub in_link: bool,
    /// The node whose output was written last.
    prev_node: Option<NodeId>,
    prev_node_unmodified: bool,
    curr_node_unmodified: bool,
    /// The first node on the current output line.
    cur_line_start: Option<NodeId>,
    chunks: Vec<Chunk>,
    /// Output being captured instead of written.
    captures: Vec<String>,
}

impl<'a> State<'a> {
    fn new(
        env: &'a Env,
        doc: &'a Document,
        source: Option<&'a str>,
        selection: Option<&'a Selection>,
    ) -> Self {
        Self {
            env,
            doc,
            source,
            rt_testing: env.config.rt_testing && source.is_some(),
            selection,
            revision: env.config.revision_id,
            sep: <_>::default(),
            on_sol: true,
            at_start_of_output: true,
            escape_text: false,
            in_modified_content: false,
            in_html_pre: false,
            in_link: false,
            prev_node: None,
            prev_node_unmodified: false,
            curr_node_unmodified: false,
            cur_line_start: None,
            chunks: Vec::new(),
            captures: Vec::new(),
        }
    }

    /// The log target for this serialization.
    fn target(&self) -> &'static str {
        if self.selection.is_some() {
            "wiki_roundtrip::selser"
        } else {
            "wiki_roundtrip::wts"
        }
    }

    /// Writes `text` for `node`, preceded by the pending separator.
    pub fn emit(&mut self, text: &str, node: NodeId) {
        match self.unmodified_gap(node) {
            Some(gap) => self.emit_sep(&gap, node),
            None => self.emit_separator(node),
        }

        self.prev_node = Some(node);
        if self.on_sol {
            self.cur_line_start = Some(node);
        }

        let out = if self.escape_text {
            self.escape_text = false;
            Cow::Owned(escape::escape_text(self, text, node))
        } else {
            Cow::Borrowed(text)
        };

        log::trace!(target: self.target(), "---> {out:?}");
        self.write(&out, node);

        self.sep.last_source_node = Some(node);
        self.sep.last_source_sep = self.sep.src.clone();
        if !is_valid_sep(&out) {
            self.on_sol = false;
        }
        if self.captures.is_empty() {
            self.at_start_of_output = false;
        }
    }

    /// The original source between two neighbouring nodes which were both
    /// copied from the source.
    fn unmodified_gap(&self, node: NodeId) -> Option<String> {
        if !(self.prev_node_unmodified && self.curr_node_unmodified) {
            return None;
        }
        let dsr = |id: NodeId| self.doc.element(id).and_then(|e| e.dp.dsr);
        let end = dsr(self.prev_node?)?.end?;
        let start = dsr(node)?.start?;
        let gap = self.source?.get(end..start)?;
        is_valid_sep(gap).then(|| gap.to_string())
    }

    /// Writes a separator and resets the separator state.
    pub fn emit_sep(&mut self, sep: &str, node: NodeId) {
        log::trace!(target: self.target(), "---> SEP: {sep:?}");
        self.write(sep, node);
        self.sep = Separator::default();
        if sep.contains('\n') {
            self.on_sol = true;
        }
    }

    fn write(&mut self, text: &str, node: NodeId) {
        if text.is_empty() {
            return;
        }
        match self.captures.last_mut() {
            Some(buffer) => buffer.push_str(text),
            None => self.chunks.push((text.to_string(), node)),
        }
    }

    /// Writes start tag markup, unless the tag was never in the source.
    pub fn emit_start_tag(&mut self, text: &str, node: NodeId) {
        let auto = self
            .doc
            .element(node)
            .is_some_and(|e| e.dp.auto_inserted_start);
        if !(self.rt_testing && auto) {
            self.emit(text, node);
        }
    }

    /// Writes end tag markup, unless the tag was never in the source.
    pub fn emit_end_tag(&mut self, text: &str, node: NodeId) {
        let auto = self
            .doc
            .element(node)
            .is_some_and(|e| e.dp.auto_inserted_end);
        if !(self.rt_testing && auto) {
            self.emit(text, node);
        }
    }

    /// Writes wikitext which must not be escaped. Its trailing newlines
    /// become the next separator.
    pub fn emit_wikitext(&mut self, text: &str, node: NodeId) {
        let text = text.strip_prefix('\n').unwrap_or(text);
        let (body, trailing) = split_trailing_newlines(text);
        self.emit(body, node);
        self.sep.last_source_node = Some(node);
        if let Some(trailing) = trailing
            && self.sep.src.as_deref().is_none_or(str::is_empty)
        {
            self.sep.src = Some(trailing.to_string());
            self.sep.last_source_sep = self.sep.src.clone();
        }
    }

    /// Returns true if a block element was written on the current line
    /// before `node`.
    pub fn cur_line_has_block_node(&self, node: NodeId) -> bool {
        let mut current = self.cur_line_start;
        while let Some(id) = current
            && id != node
        {
            if nodes::is_block(self.doc, id) {
                return true;
            }
            current = self.doc.next_sibling(id);
        }
        false
    }

    /// Serializes the children of a node.
    pub fn serialize_children(&mut self, node: NodeId) -> Result {
        let mut child = self.doc.first_child(node);
        while let Some(current) = child {
            let next = self.serialize_node(current)?;
            if next == Some(node) {
                break;
            }
            child = if next == Some(current) {
                self.doc.next_sibling(current)
            } else {
                next
            };
        }
        Ok(())
    }

    /// Serializes the children of a node into a string without affecting
    /// the pending separator.
    pub fn serialize_children_to_string(&mut self, node: NodeId) -> Result<String> {
        let saved = core::mem::take(&mut self.sep);
        self.captures.push(String::new());
        let result = self.serialize_children(node);
        if result.is_ok() {
            self.emit_separator(node);
        }
        let out = self.captures.pop().unwrap_or_default();
        self.sep = saved;
        result.map(|()| out)
    }

    /// Serializes link content.
    pub fn serialize_link_children_to_string(&mut self, node: NodeId) -> Result<String> {
        self.in_link = true;
        let result = self.serialize_children_to_string(node);
        self.in_link = false;
        result
    }

    /// Serializes one node and returns the node to continue with.
    fn serialize_node(&mut self, id: NodeId) -> Result<Option<NodeId>> {
        let doc = self.doc;
        self.prev_node_unmodified = self.curr_node_unmodified;
        self.curr_node_unmodified = false;

        log::trace!(
            target: self.target(),
            "{} | sol: {}, prev-unmodified: {}",
            nodes::describe(doc, id),
            self.on_sol,
            self.prev_node_unmodified
        );

        match doc.data(id) {
            NodeData::Element(element) => {
                if diff::is_marker(doc, id) {
                    self.sep.last_source_node = Some(id);
                    return Ok(doc.next_sibling(id));
                }

                let selection = self.selection.filter(|_| !self.in_modified_content);
                if selection.is_some_and(|s| s.is_skipped(id)) {
                    log::trace!(target: self.target(), "skipping fostered {}", nodes::describe(doc, id));
                    return Ok(doc.next_sibling(id));
                }

                let handler = Handler::for_node(self, id);
                if let Some(prev) = nodes::previous_non_sep_sibling(doc, id).or_else(|| doc.parent(id)) {
                    self.update_separator_constraints(prev, id);
                }

                let mut reused = None;
                let mut wrapper_unmodified = false;
                if let Some(selection) = selection {
                    let dsr = element.dp.dsr;
                    if selection.is_verbatim(id) {
                        self.curr_node_unmodified = true;

                        // Zero-width markup disappears, so the separator
                        // belongs in front of the first child instead.
                        if ZERO_WIDTH_ELEMENTS.contains(element.name.as_str())
                            && let Some(first) = doc.first_child(id)
                            && let Some(info) = self
                                .sep
                                .constraints
                                .as_mut()
                                .and_then(|c| c.info.as_mut())
                            && info.sep_type == SepType::Sibling
                        {
                            info.on_sol = self.on_sol;
                            info.sep_type = SepType::ParentChild;
                            info.a = id;
                            info.b = first;
                        }

                        let span = dsr.and_then(|dsr| dsr.span());
                        let out = span
                            .and_then(|span| self.source?.get(span.into_range()))
                            .unwrap_or_default();
                        log::debug!(
                            target: self.target(),
                            "{} reused from source {span:?}",
                            nodes::describe(doc, id)
                        );
                        self.emit(out, id);

                        reused = Some(if element.is_encapsulation_wrapper() {
                            nodes::skip_over_encapsulated(doc, id)
                        } else {
                            doc.next_sibling(id)
                        });
                    } else {
                        log::debug!(
                            target: self.target(),
                            "#{} {} serialized",
                            selection.id_of(id).unwrap_or_default(),
                            nodes::describe(doc, id)
                        );

                        wrapper_unmodified = diff::only_subtree_changed(doc, id, self.revision)
                            && dsr.is_some_and(|dsr| dsr.has_valid_widths())
                            && ((!element.dp.auto_inserted_start && !element.dp.auto_inserted_end)
                                || matches!(element.name.as_str(), "tr" | "th" | "td"));
                    }
                }

                let next = match reused {
                    Some(next) => next,
                    None => {
                        let modified = self.selection.is_some()
                            && diff::has_inserted_or_modified(doc, id, self.revision);
                        let in_modified_content = self.in_modified_content;
                        self.in_modified_content |= modified;
                        let result = handler.handle(self, id, wrapper_unmodified);
                        self.in_modified_content = in_modified_content;
                        result?
                    }
                };

                if let Some(after) = nodes::next_non_sep_sibling(doc, id).or_else(|| doc.parent(id)) {
                    self.update_separator_constraints(id, after);
                }
                Ok(next)
            }
            NodeData::Text(_) => {
                if !self.handle_separator_text(id) {
                    if let Some(prev) = nodes::previous_non_sep_sibling(doc, id).or_else(|| doc.parent(id)) {
                        self.update_separator_constraints(prev, id);
                    }
                    self.serialize_text(id);
                    if let Some(after) = nodes::next_non_sep_sibling(doc, id).or_else(|| doc.parent(id)) {
                        self.update_separator_constraints(id, after);
                    }
                }
                Ok(doc.next_sibling(id))
            }
            NodeData::Comment(_) => {
                // Comments always become separator text.
                self.handle_separator_text(id);
                Ok(doc.next_sibling(id))
            }
            NodeData::Document => Ok(doc.next_sibling(id)),
        }
    }

    /// Serializes a text node.
    fn serialize_text(&mut self, id: NodeId) {
        static PARAGRAPH_BREAK: LazyLock<Regex> =
            LazyLock::new(|| Regex::new(r"\n(?:[ \t]*\n)+").unwrap());

        let doc = self.doc;
        let Some(text) = doc.text(id) else {
            return;
        };

        let breaks = PARAGRAPH_BREAK.find_iter(text).count();
        let (body, trailing) = split_trailing_newlines(text);
        let mut out = Cow::Borrowed(body);

        // A single blank line is kept only where it cannot start a new
        // paragraph.
        let keeps_break = breaks == 1
            && doc.parent(id).is_some_and(|parent| {
                nodes::all_children_are_text(doc, parent) && nodes::is_block(doc, parent)
            });
        if !self.in_html_pre && !keeps_break {
            out = PARAGRAPH_BREAK.replace_all(body, "\n");
        }

        // Leading newlines were already taken into the separator.
        let stripped = {
            let after_spaces = out.trim_start_matches([' ', '\t']);
            after_spaces
                .starts_with('\n')
                .then(|| after_spaces.trim_start_matches('\n').to_string())
        };
        if let Some(stripped) = stripped {
            out = Cow::Owned(stripped);
        }

        self.escape_text = !self.in_html_pre;
        self.emit(&out, id);
        self.escape_text = false;

        if let Some(trailing) = trailing
            && self.sep.src.as_deref().is_none_or(str::is_empty)
        {
            self.sep.src = Some(trailing.to_string());
            self.sep.last_source_sep = self.sep.src.clone();
            // The next content starts a line.
            self.on_sol = true;
        }
    }
}

/// Splits trailing newlines, and any whitespace after them, off `text`.
fn split_trailing_newlines(text: &str) -> (&str, Option<&str>) {
    let content_end = text.trim_end().len();
    match text[content_end..].find('\n') {
        Some(at) => {
            let (body, trailing) = text.split_at(content_end + at);
            (body, Some(trailing))
        }
        None => (text, None),
    }
}
