//! Wikitext lists.
//!
//! Each list line starts with a `listItem` token carrying its bullets. The
//! bullets are compared against the bullets of the previous item to decide
//! which lists to close, continue, or open.

use super::is_sol_transparent;
use crate::{
    config::BLOCK_ELEMENTS,
    pipeline::{Context, Matcher, Rank, Registration, SyncHandler, TransformOutput},
    tokens::{Stx, Tag, Token},
    wikitext::Span,
};

/// The rank of the handler for everything other than list items. List
/// item results are reported at this rank so they are not seen again.
const ANY_RANK: Rank = Rank::from_thousandths(2491);

/// The list and item element names for a bullet.
fn bullet_tags(bullet: u8) -> (&'static str, &'static str) {
    match bullet {
        b'*' => ("ul", "li"),
        b'#' => ("ol", "li"),
        b';' => ("dl", "dt"),
        _ => ("dl", "dd"),
    }
}

/// Returns true if the two bullets are a term and a definition.
fn is_dt_dd(a: u8, b: u8) -> bool {
    matches!((a, b), (b';', b':') | (b':', b';'))
}

/// The state of a run of list lines. A table inside a list item starts a new
/// frame, since lists inside the table are independent of the outer list.
#[derive(Debug)]
struct ListFrame {
    /// Whether the last line ended without another list item so far.
    at_eol: bool,
    /// The newline that ended the last line.
    nl: Option<Token>,
    /// Line-start-transparent tokens seen since the newline.
    sol_tokens: Vec<Token>,
    /// The bullets of the previous list item.
    bullets: String,
    /// End tags for the open lists and items, innermost last.
    end_tags: Vec<Token>,
    /// The number of open block elements inside the list.
    open_block_tags: usize,
    /// The number of open tags on the current line.
    open_tags: usize,
}

impl ListFrame {
    fn new() -> Self {
        Self {
            at_eol: true,
            nl: None,
            sol_tokens: Vec::new(),
            bullets: String::new(),
            end_tags: Vec::new(),
            open_block_tags: 0,
            open_tags: 0,
        }
    }

    /// Closes `n` levels of list items and lists.
    fn pop_tags(&mut self, n: usize) -> Vec<Token> {
        let mut out = Vec::with_capacity(n * 2);
        for _ in 0..n {
            out.extend(self.end_tags.pop());
            out.extend(self.end_tags.pop());
        }
        out
    }

    /// Builds the tokens for a list item with bullets `bn`.
    fn list_item(&mut self, bn: &str, token: &Tag) -> Vec<Token> {
        let bs = core::mem::replace(&mut self.bullets, bn.to_string());
        let (bs, bn) = (bs.as_bytes(), bn.as_bytes());
        let prefix_len = bs.iter().zip(bn).take_while(|(a, b)| a == b).count();

        let tsr = token.meta.tsr;
        let stx = token.meta.stx;
        let start_tag = |name: &str, k: usize, j: usize| {
            let mut tag = Tag::new(name, vec![]);
            tag.meta.tsr = tsr.map(|tsr| Span::new(tsr.start + k, tsr.start + j));
            tag.meta.stx = stx;
            Token::StartTag(tag)
        };

        log::trace!(
            target: "wiki_roundtrip::list",
            "bs: {:?}; bn: {:?}",
            String::from_utf8_lossy(bs),
            String::from_utf8_lossy(bn)
        );

        let mut out;
        if prefix_len == bs.len() && bn.len() == bs.len() {
            // Same list types at the same level.
            let item_end = self.end_tags.pop();
            let name = item_end
                .as_ref()
                .and_then(Token::name)
                .unwrap_or("li")
                .to_string();
            self.end_tags.push(Token::end(&name));
            out = Vec::from_iter(item_end);
            out.append(&mut self.sol_tokens);
            out.extend(self.nl.take());
            out.push(start_tag(&name, 0, bn.len()));
        } else {
            let mut prefix_correction = 0;
            if bs.len() > prefix_len
                && bn.len() > prefix_len
                && is_dt_dd(bs[prefix_len], bn[prefix_len])
            {
                let popped = self.pop_tags(bs.len() - prefix_len - 1);
                out = core::mem::take(&mut self.sol_tokens);
                out.extend(popped);

                let (_, name) = bullet_tags(bn[prefix_len]);
                let end_tag = self.end_tags.pop();
                self.end_tags.push(Token::end(name));

                // A definition on the same line as its term has only its own
                // colon as markup.
                let new_tag = if stx == Some(Stx::Row) {
                    start_tag(name, 0, 1)
                } else {
                    start_tag(name, 0, prefix_len + 1)
                };
                out.extend(end_tag);
                out.extend(self.nl.take());
                out.push(new_tag);

                prefix_correction = 1;
            } else {
                let popped = self.pop_tags(bs.len() - prefix_len);
                out = core::mem::take(&mut self.sol_tokens);
                out.extend(popped);
                out.extend(self.nl.take());
                if prefix_len > 0 && bn.len() == prefix_len {
                    let item_end = self.end_tags.pop();
                    let name = item_end
                        .as_ref()
                        .and_then(Token::name)
                        .unwrap_or("li")
                        .to_string();
                    out.extend(item_end);
                    out.push(start_tag(&name, 0, bn.len()));
                    self.end_tags.push(Token::end(name));
                }
            }

            for i in prefix_len + prefix_correction..bn.len() {
                let (list, item) = bullet_tags(bn[i]);
                // The first new item also owns the shared prefix bullets.
                let (list_tag, item_tag) = if i == prefix_len {
                    (start_tag(list, 0, 0), start_tag(item, 0, i + 1))
                } else {
                    (start_tag(list, i, i), start_tag(item, i, i + 1))
                };
                self.end_tags.push(Token::end(list));
                self.end_tags.push(Token::end(item));
                out.push(list_tag);
                out.push(item_tag);
            }
        }

        self.sol_tokens.clear();
        self.nl = None;
        self.at_eol = false;
        out
    }
}

/// Builds nested lists from list item tokens.
#[derive(Debug, Default)]
pub(super) struct ListHandler {
    /// Frames of lists outside the tables the current list is in.
    frames: Vec<ListFrame>,
    /// The current list frame, or `None` outside a list.
    current: Option<ListFrame>,
    /// Tables opened inside a table which is inside a list, while no list is
    /// open.
    nested_tables: usize,
    /// Whether the handler for other tokens is active.
    any_enabled: bool,
}

impl SyncHandler for ListHandler {
    fn registrations(&self) -> &'static [Registration] {
        const R: &[Registration] = &[
            Registration::new(2490, Matcher::Tag("listItem"), 0),
            Registration::new(2491, Matcher::Any, 1),
            Registration::new(2491, Matcher::End, 2),
        ];
        R
    }

    fn enabled(&self, slot: u8) -> bool {
        slot != 1 || self.any_enabled
    }

    fn transform(&mut self, slot: u8, token: Token, _: &Context<'_>) -> TransformOutput {
        match slot {
            0 => self.on_list_item(token),
            1 => self.on_any(token),
            _ => self.on_end(token),
        }
    }
}

impl ListHandler {
    /// Handles a list item token.
    fn on_list_item(&mut self, token: Token) -> TransformOutput {
        let Some(tag) = token.tag() else {
            return TransformOutput::Unchanged(token);
        };
        let bullets = tag.attr_text("bullets").unwrap_or_default().into_owned();

        self.any_enabled = true;
        // A colon inside an open tag cannot start a definition.
        if bullets.ends_with(':') && self.current.as_ref().is_some_and(|f| f.open_tags > 0) {
            return TransformOutput::tokens(vec![Token::text(":")]);
        }
        let frame = self.current.get_or_insert_with(ListFrame::new);

        let tokens = frame.list_item(&bullets, tag);
        log::trace!(target: "wiki_roundtrip::list", "RET: {tokens:?}");
        TransformOutput::Tokens {
            tokens,
            rank: Some(ANY_RANK),
        }
    }

    /// Handles any other token while a list is open.
    fn on_any(&mut self, token: Token) -> TransformOutput {
        log::trace!(target: "wiki_roundtrip::list", "ANY: {token:?}");

        if self.current.is_none() {
            // Inside a table which is inside a list.
            match &token {
                Token::EndTag(tag) if tag.name == "table" => {
                    if self.nested_tables == 0 {
                        self.current = self.frames.pop();
                    } else {
                        self.nested_tables -= 1;
                    }
                }
                Token::StartTag(tag) if tag.name == "table" => self.nested_tables += 1,
                _ => {}
            }
            return TransformOutput::Unchanged(token);
        }
        let Some(frame) = self.current.as_mut() else {
            return TransformOutput::Unchanged(token);
        };

        match &token {
            Token::StartTag(tag) if tag.name != "table" => frame.open_tags += 1,
            Token::EndTag(_) if frame.open_tags > 0 => frame.open_tags -= 1,
            _ => {}
        }

        if let Token::EndTag(tag) = &token {
            if tag.name == "table" {
                let out = self.close_lists(token);
                self.current = self.frames.pop();
                return TransformOutput::tokens(out);
            } else if BLOCK_ELEMENTS.contains(tag.name.as_str()) {
                if frame.open_block_tags == 0 {
                    // An unbalanced block end tag closes the lists.
                    return TransformOutput::tokens(self.close_lists(token));
                }
                frame.open_block_tags -= 1;
                return TransformOutput::Unchanged(token);
            }
        }

        if frame.at_eol {
            if !matches!(token, Token::Newline(_)) && is_sol_transparent(&token) {
                // Wait to see whether another list item follows.
                if let Some(nl) = frame.nl.take() {
                    frame.sol_tokens.push(nl);
                }
                frame.sol_tokens.push(token);
                return TransformOutput::Consumed;
            }
            return TransformOutput::tokens(self.close_lists(token));
        }

        match &token {
            Token::Newline(_) => {
                frame.at_eol = true;
                frame.nl = Some(token);
                frame.open_tags = 0;
                TransformOutput::Consumed
            }
            Token::StartTag(tag) if tag.name == "table" => {
                self.frames.extend(self.current.take());
                TransformOutput::Unchanged(token)
            }
            Token::StartTag(tag) => {
                if BLOCK_ELEMENTS.contains(tag.name.as_str()) {
                    frame.open_block_tags += 1;
                }
                TransformOutput::Unchanged(token)
            }
            _ => TransformOutput::Unchanged(token),
        }
    }

    /// Closes every open list at the end of input.
    fn on_end(&mut self, token: Token) -> TransformOutput {
        log::trace!(target: "wiki_roundtrip::list", "END: {token:?}");
        self.frames.clear();
        self.current.get_or_insert_with(ListFrame::new);
        let out = self.close_lists(token);
        *self = Self::default();
        TransformOutput::tokens(out)
    }

    /// Closes the lists of the current frame, releasing held tokens before
    /// `token`.
    fn close_lists(&mut self, token: Token) -> Vec<Token> {
        let Some(mut frame) = self.current.take() else {
            return vec![token];
        };
        let mut out = frame.pop_tags(frame.bullets.len());
        out.append(&mut frame.sol_tokens);
        out.extend(frame.nl.take());
        out.push(token);

        if self.frames.is_empty() {
            self.any_enabled = false;
        }
        log::trace!(target: "wiki_roundtrip::list", "closing all lists: {out:?}");
        out
    }
}
