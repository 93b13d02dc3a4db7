//! Bold and italic apostrophe runs.
//!
//! Quote runs are buffered until the end of the line, since whether a run
//! opens or closes bold or italic text depends on the other runs of the line.
//! Chunks alternate between plain tokens and single quote tokens, starting
//! with a plain chunk.

use crate::{
    pipeline::{Context, Matcher, Registration, SyncHandler, TransformOutput},
    tokens::{Attribute, Tag, Token, tokens_to_string},
    wikitext::Span,
};

/// The open formatting of the line so far.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum State {
    None,
    B,
    I,
    /// Bold, then italic inside it.
    BI,
    /// Italic, then bold inside it.
    IB,
    /// A five-quote run whose nesting order is not yet known.
    Both,
}

/// Converts `mw-quote` tokens to `b` and `i` tags.
#[derive(Debug, Default)]
pub(super) struct QuoteTransformer {
    /// Completed chunks of the current line.
    chunks: Vec<Vec<Token>>,
    /// The plain chunk being accumulated.
    current: Vec<Token>,
    /// Whether a quote was seen on the current line.
    collecting: bool,
    /// The last open `b` and `i` tags, as (chunk, index) positions.
    last_b: Option<(usize, usize)>,
    last_i: Option<(usize, usize)>,
}

impl SyncHandler for QuoteTransformer {
    fn registrations(&self) -> &'static [Registration] {
        const R: &[Registration] = &[
            Registration::new(2100, Matcher::Tag("mw-quote"), 0),
            Registration::new(2100, Matcher::Newline, 1),
            Registration::new(2100, Matcher::End, 2),
            Registration::new(2100, Matcher::Any, 3),
        ];
        R
    }

    fn enabled(&self, slot: u8) -> bool {
        slot == 0 || self.collecting
    }

    fn transform(&mut self, slot: u8, token: Token, cx: &Context<'_>) -> TransformOutput {
        match slot {
            0 => {
                log::trace!(target: "wiki_roundtrip::quote", "QUOTE | {token:?}");
                self.collecting = true;
                self.start_chunk();
                self.current.push(token);
                self.start_chunk();
                TransformOutput::Consumed
            }
            1 | 2 => self.process(token, cx),
            _ => {
                self.current.push(token);
                TransformOutput::Consumed
            }
        }
    }
}

impl QuoteTransformer {
    /// Moves the current chunk to the completed chunks.
    fn start_chunk(&mut self) {
        self.chunks.push(core::mem::take(&mut self.current));
    }

    /// Balances and converts the quotes of the finished line, then returns
    /// every buffered token followed by `token`.
    fn process(&mut self, token: Token, cx: &Context<'_>) -> TransformOutput {
        let mut italics = 0;
        let mut bolds = 0;
        for i in (1..self.chunks.len()).step_by(2) {
            match self.quote_len(i) {
                2 => italics += 1,
                3 => bolds += 1,
                5 => {
                    italics += 1;
                    bolds += 1;
                }
                _ => {}
            }
        }

        if italics % 2 == 1 && bolds % 2 == 1 {
            self.balance(cx);
        }

        self.convert_quotes_to_tags();

        self.current.push(token);
        self.start_chunk();
        let tokens = core::mem::take(&mut self.chunks)
            .into_iter()
            .flatten()
            .collect::<Vec<_>>();
        log::trace!(target: "wiki_roundtrip::quote", "----> {tokens:?}");
        *self = Self::default();
        TransformOutput::tokens(tokens)
    }

    /// The number of apostrophes of the quote chunk at `i`.
    fn quote_len(&self, i: usize) -> usize {
        self.chunks[i]
            .first()
            .and_then(Token::tag)
            .and_then(|tag| tag.attr_text("value"))
            .map_or(0, |value| value.len())
    }

    /// The two characters before the quote chunk at `i`, nearest first.
    fn preceding_chars(&self, i: usize, cx: &Context<'_>) -> (Option<char>, Option<char>) {
        let before = self.chunks[i][0]
            .tsr()
            .and_then(|tsr| cx.source.and_then(|source| source.get(..tsr.start)))
            .map_or_else(|| tokens_to_string(&self.chunks[i - 1]), str::to_string);
        let mut chars = before.chars().rev();
        (chars.next(), chars.next())
    }

    /// With an odd number of both bold and italic runs, turns one bold run
    /// into an apostrophe followed by an italic run. A bold run after a
    /// single-letter word is preferred, then one after a longer word, then
    /// one after a space.
    fn balance(&mut self, cx: &Context<'_>) {
        let mut single_letter = None;
        let mut multi_letter = None;
        let mut space = None;
        for i in (1..self.chunks.len()).step_by(2) {
            if self.quote_len(i) != 3 {
                continue;
            }
            let (last, second_last) = self.preceding_chars(i, cx);
            if last == Some(' ') {
                space.get_or_insert(i);
            } else if second_last == Some(' ') {
                single_letter = Some(i);
                break;
            } else {
                multi_letter.get_or_insert(i);
            }
        }

        if let Some(i) = single_letter.or(multi_letter).or(space) {
            self.convert_bold(i);
        }
    }

    /// Converts the bold run at chunk `i` to a literal apostrophe and an
    /// italic run.
    fn convert_bold(&mut self, i: usize) {
        self.chunks[i - 1].push(Token::text("'"));
        let tsr = self.chunks[i][0]
            .tsr()
            .map(|tsr| Span::new(tsr.start + 1, tsr.end));
        self.chunks[i] = vec![Token::SelfClosingTag(
            Tag::new("mw-quote", vec![Attribute::new("value", "''")]).with_tsr(tsr),
        )];
    }

    /// Replaces every quote token with tags, closing whatever is left open
    /// at the end of the line.
    fn convert_quotes_to_tags(&mut self) {
        let mut state = State::None;
        let mut last_both = 0;

        for i in (1..self.chunks.len()).step_by(2) {
            state = match (self.quote_len(i), state) {
                (2, State::I) => {
                    self.quote_to_tag(i, vec![Token::end("i")], false);
                    State::None
                }
                (2, State::BI) => {
                    self.quote_to_tag(i, vec![Token::end("i")], false);
                    State::B
                }
                (2, State::IB) => {
                    let tags = vec![Token::end("b"), Token::end("i"), Token::start("b", vec![])];
                    self.quote_to_tag(i, tags, true);
                    State::B
                }
                (2, State::Both) => {
                    let tags = vec![Token::start("b", vec![]), Token::start("i", vec![])];
                    self.quote_to_tag(last_both, tags, false);
                    self.quote_to_tag(i, vec![Token::end("i")], false);
                    State::B
                }
                (2, state) => {
                    self.quote_to_tag(i, vec![Token::start("i", vec![])], false);
                    if state == State::B { State::BI } else { State::I }
                }
                (3, State::B) => {
                    self.quote_to_tag(i, vec![Token::end("b")], false);
                    State::None
                }
                (3, State::IB) => {
                    self.quote_to_tag(i, vec![Token::end("b")], false);
                    State::I
                }
                (3, State::BI) => {
                    let tags = vec![Token::end("i"), Token::end("b"), Token::start("i", vec![])];
                    self.quote_to_tag(i, tags, true);
                    State::I
                }
                (3, State::Both) => {
                    let tags = vec![Token::start("i", vec![]), Token::start("b", vec![])];
                    self.quote_to_tag(last_both, tags, false);
                    self.quote_to_tag(i, vec![Token::end("b")], false);
                    State::I
                }
                (3, state) => {
                    self.quote_to_tag(i, vec![Token::start("b", vec![])], false);
                    if state == State::I { State::IB } else { State::B }
                }
                (5, State::B) => {
                    self.quote_to_tag(i, vec![Token::end("b"), Token::start("i", vec![])], false);
                    State::I
                }
                (5, State::I) => {
                    self.quote_to_tag(i, vec![Token::end("i"), Token::start("b", vec![])], false);
                    State::B
                }
                (5, State::BI) => {
                    self.quote_to_tag(i, vec![Token::end("i"), Token::end("b")], false);
                    State::None
                }
                (5, State::IB) => {
                    self.quote_to_tag(i, vec![Token::end("b"), Token::end("i")], false);
                    State::None
                }
                (5, State::Both) => {
                    let tags = vec![Token::start("i", vec![]), Token::start("b", vec![])];
                    self.quote_to_tag(last_both, tags, false);
                    self.quote_to_tag(i, vec![Token::end("b"), Token::end("i")], false);
                    State::None
                }
                (5, State::None) => {
                    last_both = i;
                    State::Both
                }
                (_, state) => state,
            };
        }

        // Order matters: inner tags close first.
        if state == State::Both {
            let tags = vec![Token::start("b", vec![]), Token::start("i", vec![])];
            self.quote_to_tag(last_both, tags, false);
            state = State::BI;
        }
        if matches!(state, State::B | State::IB) {
            self.close_at_eol("b");
        }
        if matches!(state, State::I | State::BI | State::IB) {
            self.close_at_eol("i");
        }
        if state == State::BI {
            self.close_at_eol("b");
        }
    }

    /// Closes an open tag at the end of the line.
    fn close_at_eol(&mut self, name: &str) {
        self.current.push(Token::end(name));
        let last = if name == "b" { self.last_b } else { self.last_i };
        self.mark_auto_inserted_end(last);
    }

    /// Flags the open tag at `position` as having no closing markup.
    fn mark_auto_inserted_end(&mut self, position: Option<(usize, usize)>) {
        let Some((chunk, index)) = position else {
            return;
        };
        if let Some(Token::StartTag(tag)) = self
            .chunks
            .get_mut(chunk)
            .and_then(|chunk| chunk.get_mut(index))
        {
            tag.meta.auto_inserted_end = true;
        }
    }

    /// Replaces the quote token of `chunk` with `tags`, dividing its source
    /// range between them. In the "bogus two" case, the first tag closes a
    /// tag which was opened by an earlier run and the third reopens it, so
    /// neither has markup of its own.
    fn quote_to_tag(&mut self, chunk: usize, tags: Vec<Token>, bogus_two: bool) {
        let mut pos = self.chunks[chunk][0].tsr().map(|tsr| tsr.start);
        let mut result = Vec::with_capacity(tags.len());

        for (index, mut token) in tags.into_iter().enumerate() {
            let is_bold = token.name() == Some("b");
            if bogus_two && index == 0 {
                let last = if is_bold { self.last_b } else { self.last_i };
                self.mark_auto_inserted_end(last);
            } else if let Some(tag) = token.tag_mut() {
                if bogus_two && index == 2 {
                    tag.meta.auto_inserted_start = true;
                } else if let Some(start) = pos.as_mut() {
                    let width = if is_bold { 3 } else { 2 };
                    tag.meta.tsr = Some(Span::new(*start, *start + width));
                    *start += width;
                }
            }

            let open = matches!(token, Token::StartTag(_)).then_some((chunk, index));
            if is_bold {
                self.last_b = open;
            } else {
                self.last_i = open;
            }
            result.push(token);
        }

        self.chunks[chunk] = result;
    }
}
