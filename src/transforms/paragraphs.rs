//! Paragraph wrapping.
//!
//! Inline content at the top level of the page is wrapped in `p` elements,
//! following the line-based rules of the legacy block level pass: runs of
//! blank lines end paragraphs, and each further pair of blank lines adds an
//! empty paragraph with a line break.
//!
//! Tokens are buffered in three groups, which are always emitted in this
//! order:
//!
//! 1. the token buffer, holding earlier lines while blank lines are pending;
//! 2. the newlines and line-start-transparent tokens since the last content;
//! 3. the tokens of the current line.

use super::is_sol_transparent;
use crate::{
    pipeline::{Context, Matcher, Registration, SyncHandler, TransformOutput},
    tokens::{Tag, Token},
    wikitext::Span,
};
use phf::{Set, phf_set};

/// Elements which start a block when opened and end it when closed.
static BLOCK_ELEMS: Set<&'static str> = phf_set! {
    "table", "h1", "h2", "h3", "h4", "h5", "h6", "pre", "p", "ul", "ol", "dl"
};

/// Elements which end a block when opened and start one when closed.
static ANTI_BLOCK_ELEMS: Set<&'static str> = phf_set! { "td", "th" };

/// Elements which always suppress paragraphs on their line.
static ALWAYS_SUPPRESS: Set<&'static str> = phf_set! { "tr", "dt", "dd", "li" };

/// Elements which never suppress paragraphs after them.
static NEVER_SUPPRESS: Set<&'static str> = phf_set! {
    "center", "blockquote", "div", "hr", "figure"
};

/// Returns `Some(true)` for a transclusion start marker, `Some(false)` for
/// a transclusion end marker, and `None` for anything else.
fn transclusion_marker(token: &Token) -> Option<bool> {
    let tag = token.tag().filter(|tag| tag.name == "meta")?;
    let ty = tag.attr_text("typeof")?;
    if ty == "mw:Transclusion" {
        Some(true)
    } else if ty.starts_with("mw:Transclusion") {
        Some(false)
    } else {
        None
    }
}

/// Returns true if `token` neither opens nor closes a paragraph.
fn is_transparent(token: &Token) -> bool {
    is_sol_transparent(token) || matches!(token, Token::Newline(_))
}

/// Opens a paragraph before the first content of `out`. Transparent tokens
/// before the content, and any whole transclusions among them, stay outside.
fn open_p(has_open_p: &mut bool, out: &mut Vec<Token>) {
    if *has_open_p {
        return;
    }

    let mut tpl_start = None;
    let mut at = out.len();
    for (i, token) in out.iter().enumerate() {
        match transclusion_marker(token) {
            Some(true) => tpl_start = Some(i),
            Some(false) => tpl_start = None,
            None if !is_transparent(token) => {
                at = i;
                break;
            }
            None => {}
        }
    }

    out.insert(tpl_start.unwrap_or(at), Token::start("p", vec![]));
    *has_open_p = true;
}

/// Closes the open paragraph after the last content of `out`.
fn close_open_p(has_open_p: &mut bool, out: &mut Vec<Token>) {
    if !*has_open_p {
        return;
    }

    let mut tpl_end = None;
    let mut at = 0;
    for (i, token) in out.iter().enumerate().rev() {
        match transclusion_marker(token) {
            Some(true) => tpl_end = None,
            Some(false) => tpl_end = Some(i),
            None if !is_transparent(token) => {
                at = i + 1;
                break;
            }
            None => {}
        }
    }

    out.insert(tpl_end.map_or(at, |i| i + 1), Token::end("p"));
    *has_open_p = false;
}

/// Moves tokens from the front of `nl_ws` to `out` up to the first newline,
/// and returns that newline.
fn discard_one_nl(nl_ws: &mut Vec<Token>, out: &mut Vec<Token>) -> Option<Token> {
    let Some(index) = nl_ws.iter().position(|t| matches!(t, Token::Newline(_))) else {
        out.append(nl_ws);
        return None;
    };
    let mut drained = nl_ws.drain(..=index);
    let nl = drained.next_back();
    out.extend(drained);
    nl
}

/// The tokens and block flags of the current line.
#[derive(Debug, Default)]
struct Line {
    tokens: Vec<Token>,
    has_wrappable: bool,
    /// The line opens a block, so paragraphs end before it.
    open_match: bool,
    /// The line closes a block, so paragraphs may start after it.
    close_match: bool,
}

/// Wraps top-level inline content in paragraphs.
#[derive(Debug, Default)]
pub(super) struct ParagraphWrapper {
    has_open_p: bool,
    /// Whether the previous lines left a block open.
    in_block_elem: bool,
    token_buffer: Vec<Token>,
    nl_ws_tokens: Vec<Token>,
    newline_count: usize,
    line: Line,
}

impl SyncHandler for ParagraphWrapper {
    fn registrations(&self) -> &'static [Registration] {
        const R: &[Registration] = &[
            Registration::new(2950, Matcher::End, 0),
            Registration::new(2950, Matcher::Newline, 1),
            Registration::new(2950, Matcher::Any, 2),
        ];
        R
    }

    fn transform(&mut self, slot: u8, token: Token, _: &Context<'_>) -> TransformOutput {
        let out = if slot == 2 {
            self.on_any(token)
        } else {
            self.on_newline_or_eof(token)
        };
        if out.is_empty() {
            TransformOutput::Consumed
        } else {
            log::trace!(target: "wiki_roundtrip::p_wrap", "----> {out:?}");
            TransformOutput::tokens(out)
        }
    }
}

impl ParagraphWrapper {
    fn reset_buffers(&mut self) {
        self.token_buffer.clear();
        self.nl_ws_tokens.clear();
        self.newline_count = 0;
    }

    fn reset_line(&mut self) {
        if self.line.open_match || self.line.close_match {
            self.in_block_elem = !self.line.close_match;
        }
        self.line = Line::default();
    }

    /// Emits pending newlines and adds `token` to the current line. If
    /// `flush_line` is set, the current line is emitted too.
    fn process_buffers(&mut self, token: Token, flush_line: bool) -> Vec<Token> {
        let mut out = self.process_pending_nls();
        self.line.tokens.push(token);
        if flush_line {
            out.append(&mut self.line.tokens);
            self.reset_line();
        }
        out
    }

    /// Emits the token buffer and the pending transparent tokens.
    fn flush_buffers(&mut self) -> Vec<Token> {
        if self.newline_count > 0 {
            log::error!(
                target: "wiki_roundtrip::p_wrap",
                "flushing with {} pending newlines: {:?}",
                self.newline_count,
                self.nl_ws_tokens
            );
        }
        let mut out = core::mem::take(&mut self.token_buffer);
        out.append(&mut self.nl_ws_tokens);
        self.reset_buffers();
        out
    }

    fn on_newline_or_eof(&mut self, token: Token) -> Vec<Token> {
        log::trace!(target: "wiki_roundtrip::p_wrap", "NL    | {token:?}");

        if self.line.open_match || self.line.close_match {
            close_open_p(&mut self.has_open_p, &mut self.line.tokens);
        } else if !self.in_block_elem && !self.has_open_p && self.line.has_wrappable {
            open_p(&mut self.has_open_p, &mut self.line.tokens);
        }

        if self.newline_count > 0 && !self.line.tokens.is_empty() {
            log::error!(
                target: "wiki_roundtrip::p_wrap",
                "{} pending newlines before line tokens {:?}",
                self.newline_count,
                self.line.tokens
            );
        }

        self.token_buffer.append(&mut self.line.tokens);

        if matches!(token, Token::EndOfInput(_)) {
            self.nl_ws_tokens.push(token);
            close_open_p(&mut self.has_open_p, &mut self.token_buffer);
            let out = self.process_pending_nls();
            *self = Self::default();
            out
        } else {
            self.reset_line();
            self.newline_count += 1;
            self.nl_ws_tokens.push(token);
            Vec::new()
        }
    }

    /// Emits the token buffer along with the pending newlines, turning runs
    /// of blank lines into paragraph breaks.
    fn process_pending_nls(&mut self) -> Vec<Token> {
        let mut out = core::mem::take(&mut self.token_buffer);
        let mut newline_count = self.newline_count;

        log::trace!(target: "wiki_roundtrip::p_wrap", "NL-count: {newline_count}");

        if newline_count >= 2 && !self.in_block_elem {
            close_open_p(&mut self.has_open_p, &mut out);

            // The first newline is emitted as is.
            let nl = discard_one_nl(&mut self.nl_ws_tokens, &mut out);
            out.extend(nl);
            newline_count -= 1;

            let remainder = newline_count % 2;
            while newline_count > 0 {
                let nl = discard_one_nl(&mut self.nl_ws_tokens, &mut out);
                if newline_count % 2 == remainder {
                    if self.has_open_p {
                        out.push(Token::end("p"));
                        self.has_open_p = false;
                    }
                    if newline_count > 1 {
                        out.push(Token::start("p", vec![]));
                        self.has_open_p = true;
                    }
                } else {
                    // The break has no markup of its own; it stands for the
                    // newline which follows it.
                    let tsr = nl
                        .as_ref()
                        .and_then(Token::tsr)
                        .map(|tsr| Span::new(tsr.start, tsr.start));
                    out.push(Token::SelfClosingTag(Tag::new("br", vec![]).with_tsr(tsr)));
                }
                out.extend(nl);
                newline_count -= 1;
            }
        }

        if self.line.open_match || self.line.close_match {
            close_open_p(&mut self.has_open_p, &mut out);
            if newline_count == 1 {
                let nl = discard_one_nl(&mut self.nl_ws_tokens, &mut out);
                out.extend(nl);
            }
        }

        out.append(&mut self.nl_ws_tokens);
        self.reset_buffers();
        out
    }

    fn on_any(&mut self, token: Token) -> Vec<Token> {
        log::trace!(target: "wiki_roundtrip::p_wrap", "ANY   | {token:?}");

        let whitespace = match &token {
            Token::Comment(..) => true,
            Token::Text(text) => text.chars().all(|c| c == ' ' || c == '\t'),
            _ => false,
        };

        if whitespace {
            if self.newline_count == 0 {
                self.line.tokens.push(token);
                // No pending newlines, so nothing needs to be held back.
                self.flush_buffers()
            } else {
                self.nl_ws_tokens.push(token);
                Vec::new()
            }
        } else if is_sol_transparent(&token) || token.name() == Some("style") {
            match self.newline_count {
                0 => {
                    self.line.tokens.push(token);
                    self.flush_buffers()
                }
                1 => {
                    // A single newline does not break the paragraph, so the
                    // pending tokens join the previous lines.
                    self.token_buffer.append(&mut self.nl_ws_tokens);
                    self.token_buffer.append(&mut self.line.tokens);
                    self.newline_count = 0;
                    self.reset_line();
                    self.line.tokens.push(token);
                    Vec::new()
                }
                _ => self.process_buffers(token, false),
            }
        } else {
            let name = token.name().unwrap_or_default();
            let is_end = matches!(token, Token::EndTag(_));
            let is_fragment = token
                .tag()
                .is_some_and(|tag| tag.name == "meta" && tag.has_typeof("mw:DOMFragment"));

            if (BLOCK_ELEMS.contains(name) && !is_end)
                || (ANTI_BLOCK_ELEMS.contains(name) && is_end)
                || ALWAYS_SUPPRESS.contains(name)
            {
                self.line.open_match = true;
            }
            // Fragments from extensions are treated like `div`, since their
            // content may be block level.
            if (BLOCK_ELEMS.contains(name) && is_end)
                || (ANTI_BLOCK_ELEMS.contains(name) && !is_end)
                || NEVER_SUPPRESS.contains(name)
                || is_fragment
            {
                self.line.close_match = true;
            }
            self.line.has_wrappable = true;
            self.process_buffers(token, false)
        }
    }
}
