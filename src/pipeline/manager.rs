//! Rank-ordered dispatch of tokens to transforms, and the synchronous
//! transform manager.

use super::{Env, Error, Frame, Result};
use crate::tokens::Token;
use core::fmt;

/// A transform rank, in thousandths.
///
/// Phase 1 transforms use ranks in `[0, 1)`, phase 2 in `[1, 2)`, and phase 3
/// in `[2, 3)`.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub(crate) struct Rank(u16);

impl Rank {
    /// Creates a rank from a number of thousandths.
    pub const fn from_thousandths(value: u16) -> Self {
        Self(value)
    }
}

impl fmt::Display for Rank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:03}", self.0 / 1000, self.0 % 1000)
    }
}

/// A transform phase.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Phase {
    /// Synchronous transforms on the raw token stream.
    One,
    /// Asynchronous expansion transforms.
    Two,
    /// Synchronous transforms on the expanded stream.
    Three,
}

impl Phase {
    /// The first rank of the phase.
    pub const fn start(self) -> Rank {
        match self {
            Phase::One => Rank(0),
            Phase::Two => Rank(1000),
            Phase::Three => Rank(2000),
        }
    }

    /// The first rank after the phase.
    pub const fn end(self) -> Rank {
        Rank(self.start().0 + 1000)
    }

    /// Returns true if `rank` belongs to this phase.
    pub fn contains(self, rank: Rank) -> bool {
        (self.start()..self.end()).contains(&rank)
    }
}

/// Which tokens a transform registration applies to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Matcher {
    /// Any tag token with the given name.
    Tag(&'static str),
    /// Text tokens.
    Text,
    /// Newline tokens.
    Newline,
    /// Comment tokens.
    Comment,
    /// The end-of-input token.
    End,
    /// Every token, with lower precedence than a specific matcher at the same
    /// rank.
    Any,
}

impl Matcher {
    /// Returns true if this matcher applies to `token`.
    pub fn matches(self, token: &Token) -> bool {
        match (self, token) {
            (Matcher::Any, _)
            | (Matcher::Text, Token::Text(_))
            | (Matcher::Newline, Token::Newline(_))
            | (Matcher::Comment, Token::Comment(..))
            | (Matcher::End, Token::EndOfInput(_)) => true,
            (Matcher::Tag(name), _) => token.name() == Some(name),
            _ => false,
        }
    }
}

/// One static registration of a transform handler.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Registration {
    /// The rank of the transform.
    pub rank: Rank,
    /// The tokens the transform applies to.
    pub matcher: Matcher,
    /// A handler-defined slot number, passed back to the handler so it knows
    /// which of its registrations fired.
    pub slot: u8,
}

impl Registration {
    /// Creates a new registration.
    pub const fn new(rank: u16, matcher: Matcher, slot: u8) -> Self {
        Self {
            rank: Rank(rank),
            matcher,
            slot,
        }
    }
}

/// The result of running one transform on one token.
#[derive(Debug)]
pub(crate) enum TransformOutput {
    /// The transform did not change the token. It continues to the next
    /// transform.
    Unchanged(Token),
    /// The transform kept the token. Nothing is output for it now.
    Consumed,
    /// The transform replaced the token. The replacement tokens are
    /// processed further, starting after `rank` (or the producing transform's
    /// rank, if that is higher or `rank` is absent).
    Tokens {
        /// The replacement tokens.
        tokens: Vec<Token>,
        /// The rank the replacement tokens have already been processed at.
        rank: Option<Rank>,
    },
}

impl TransformOutput {
    /// Replacement tokens at the producing transform's rank.
    pub fn tokens(tokens: Vec<Token>) -> Self {
        Self::Tokens { tokens, rank: None }
    }
}

/// An entry in a transform table.
#[derive(Clone, Copy, Debug)]
pub(super) struct Entry {
    /// The rank of the transform.
    pub rank: Rank,
    /// The tokens the transform applies to.
    pub matcher: Matcher,
    /// The index of the handler in its manager.
    pub handler: usize,
    /// The handler slot.
    pub slot: u8,
}

/// A static, rank-sorted transform registration table.
#[derive(Debug)]
pub(super) struct TransformTable {
    /// The phase this table belongs to.
    phase: Phase,
    /// Entries, sorted by rank, with specific matchers before [`Matcher::Any`]
    /// at equal ranks.
    entries: Vec<Entry>,
}

impl TransformTable {
    /// Creates an empty table for the given phase.
    pub fn new(phase: Phase) -> Self {
        Self {
            phase,
            entries: Vec::new(),
        }
    }

    /// Adds the registrations of one handler.
    pub fn register(&mut self, handler: usize, registrations: &[Registration]) -> Result {
        for registration in registrations {
            if !self.phase.contains(registration.rank) {
                return Err(Error::RankOutOfPhase {
                    rank: registration.rank,
                    phase: self.phase,
                });
            }

            if self
                .entries
                .iter()
                .any(|e| e.rank == registration.rank && e.matcher == registration.matcher)
            {
                return Err(Error::DuplicateRank {
                    matcher: registration.matcher,
                    rank: registration.rank,
                });
            }

            self.entries.push(Entry {
                rank: registration.rank,
                matcher: registration.matcher,
                handler,
                slot: registration.slot,
            });
        }

        self.entries
            .sort_by_key(|e| (e.rank, e.matcher == Matcher::Any));
        Ok(())
    }

    /// Finds the next transform for `token`, starting at table position
    /// `from`, whose rank is above `min_rank` and whose handler slot is
    /// enabled.
    pub fn next(
        &self,
        token: &Token,
        min_rank: Option<Rank>,
        from: usize,
        enabled: impl Fn(&Entry) -> bool,
    ) -> Option<(usize, Entry)> {
        self.entries
            .iter()
            .enumerate()
            .skip(from)
            .find(|(_, e)| {
                min_rank.is_none_or(|min| e.rank > min) && e.matcher.matches(token) && enabled(e)
            })
            .map(|(index, e)| (index, *e))
    }

    /// Returns the rank replacement tokens of `entry` continue from. Reported
    /// ranks lower than the producing transform are clamped, since running
    /// them through lower ranked transforms again could loop forever.
    pub fn replacement_rank(entry: &Entry, reported: Option<Rank>) -> Rank {
        match reported {
            Some(rank) if rank < entry.rank => {
                log::warn!(
                    target: "wiki_roundtrip::sync",
                    "transform at rank {} reported lower rank {rank}; clamped",
                    entry.rank
                );
                entry.rank
            }
            Some(rank) => rank,
            None => entry.rank,
        }
    }
}

/// The context handed to synchronous transforms.
pub(crate) struct Context<'a> {
    /// The shared environment.
    pub env: &'a Env,
    /// The frame the tokens belong to.
    pub frame: &'a Frame,
    /// The source text the tokens came from, if known.
    pub source: Option<&'a str>,
}

impl<'a> Context<'a> {
    /// Creates a new context.
    pub fn new(env: &'a Env, frame: &'a Frame, source: Option<&'a str>) -> Self {
        Self { env, frame, source }
    }

    /// Returns true if the tokens come from a transcluded page rather than
    /// the top-level page.
    pub fn include_mode(&self) -> bool {
        self.frame.depth > 0
    }

    /// Returns the source text in the given range, if available.
    pub fn source_slice(&self, start: usize, end: usize) -> Option<&'a str> {
        self.source.and_then(|src| src.get(start..end))
    }
}

/// A synchronous token transform handler.
///
/// A handler declares all of its registrations up front. Handlers which
/// only apply in some states (for example, while collecting a line of
/// quotes) report which slots are currently enabled instead of adding and
/// removing registrations.
pub(crate) trait SyncHandler {
    /// The static registrations of this handler.
    fn registrations(&self) -> &'static [Registration];

    /// Returns true if the registration with the given slot is active in the
    /// handler’s current state.
    fn enabled(&self, slot: u8) -> bool {
        let _ = slot;
        true
    }

    /// Transforms one token.
    fn transform(&mut self, slot: u8, token: Token, cx: &Context<'_>) -> TransformOutput;
}

/// A synchronous token transform manager.
pub(crate) struct SyncTokenTransformManager {
    /// The registration table.
    table: TransformTable,
    /// The handlers.
    handlers: Vec<Box<dyn SyncHandler>>,
}

impl SyncTokenTransformManager {
    /// Creates a new manager for the given phase.
    pub fn new(phase: Phase, handlers: Vec<Box<dyn SyncHandler>>) -> Result<Self> {
        let mut table = TransformTable::new(phase);
        for (index, handler) in handlers.iter().enumerate() {
            table.register(index, handler.registrations())?;
        }
        Ok(Self { table, handlers })
    }

    /// Runs `tokens` through every transform of the phase.
    pub fn process(&mut self, tokens: Vec<Token>, cx: &Context<'_>) -> Vec<Token> {
        let had_eof = tokens.iter().any(|t| matches!(t, Token::EndOfInput(_)));

        let mut out = Vec::with_capacity(tokens.len());
        let mut stack = vec![(tokens.into_iter(), None)];
        loop {
            let Some((chunk, rank)) = stack.last_mut() else {
                break;
            };
            let rank = *rank;
            let Some(mut token) = chunk.next() else {
                stack.pop();
                continue;
            };

            let mut from = 0;
            loop {
                let handlers = &self.handlers;
                let Some((index, entry)) = self.table.next(&token, rank, from, |e| {
                    handlers[e.handler].enabled(e.slot)
                }) else {
                    out.push(token);
                    break;
                };
                from = index + 1;

                log::trace!(
                    target: "wiki_roundtrip::sync",
                    "{} {:?} @ {}",
                    entry.rank,
                    token.kind(),
                    entry.handler
                );

                match self.handlers[entry.handler].transform(entry.slot, token, cx) {
                    TransformOutput::Unchanged(t) => token = t,
                    TransformOutput::Consumed => break,
                    TransformOutput::Tokens { tokens, rank } => {
                        let rank = TransformTable::replacement_rank(&entry, rank);
                        stack.push((tokens.into_iter(), Some(rank)));
                        break;
                    }
                }
            }
        }

        if had_eof && !out.iter().any(|t| matches!(t, Token::EndOfInput(_))) {
            log::error!(
                target: "wiki_roundtrip::sync",
                "end of input was dropped by a transform; re-adding it"
            );
            out.push(Token::eof());
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        pipeline::{Env, MemorySource},
        tokens::Tag,
    };

    /// Turns every text token into a `b` tag wrapping the text and reports
    /// a rank below its own.
    struct Regressive;

    impl SyncHandler for Regressive {
        fn registrations(&self) -> &'static [Registration] {
            const R: &[Registration] = &[Registration::new(2500, Matcher::Text, 0)];
            R
        }

        fn transform(&mut self, _: u8, token: Token, _: &Context<'_>) -> TransformOutput {
            TransformOutput::Tokens {
                tokens: vec![Token::start("b", vec![]), token, Token::end("b")],
                rank: Some(Rank(2000)),
            }
        }
    }

    /// Counts the tokens it sees and passes them on unchanged.
    struct Counter(usize);

    impl SyncHandler for Counter {
        fn registrations(&self) -> &'static [Registration] {
            const R: &[Registration] = &[Registration::new(2600, Matcher::Any, 0)];
            R
        }

        fn transform(&mut self, _: u8, token: Token, _: &Context<'_>) -> TransformOutput {
            self.0 += 1;
            TransformOutput::Unchanged(token)
        }
    }

    /// Swallows every token, including the end of input.
    struct Eater;

    impl SyncHandler for Eater {
        fn registrations(&self) -> &'static [Registration] {
            const R: &[Registration] = &[Registration::new(2100, Matcher::Any, 0)];
            R
        }

        fn transform(&mut self, _: u8, _: Token, _: &Context<'_>) -> TransformOutput {
            TransformOutput::Consumed
        }
    }

    /// Records which transforms saw a token, in order.
    struct Recorder(
        &'static str,
        &'static [Registration],
        std::rc::Rc<core::cell::RefCell<Vec<&'static str>>>,
    );

    impl SyncHandler for Recorder {
        fn registrations(&self) -> &'static [Registration] {
            self.1
        }

        fn transform(&mut self, _: u8, token: Token, _: &Context<'_>) -> TransformOutput {
            self.2.borrow_mut().push(self.0);
            TransformOutput::Unchanged(token)
        }
    }

    fn with_cx(f: impl FnOnce(&Context<'_>)) {
        let _ = env_logger::try_init();
        let env = Env::new(<_>::default(), Box::new(MemorySource::default()));
        let frame = Frame::root("Test");
        let cx = Context::new(&env, &frame, None);
        f(&cx);
    }

    #[test]
    fn lower_rank_is_clamped() {
        with_cx(|cx| {
            let mut manager = SyncTokenTransformManager::new(
                Phase::Three,
                vec![Box::new(Regressive), Box::new(Counter(0))],
            )
            .unwrap();
            let out = manager.process(vec![Token::text("a"), Token::eof()], cx);
            assert_eq!(
                out,
                vec![
                    Token::start("b", vec![]),
                    Token::text("a"),
                    Token::end("b"),
                    Token::eof()
                ]
            );
        });
    }

    #[test]
    fn rejects_out_of_phase_rank() {
        let err = SyncTokenTransformManager::new(Phase::One, vec![Box::new(Regressive)]);
        assert!(matches!(err, Err(Error::RankOutOfPhase { .. })));
    }

    #[test]
    fn rejects_duplicate_rank() {
        let err = SyncTokenTransformManager::new(
            Phase::Three,
            vec![Box::new(Regressive), Box::new(Regressive)],
        );
        assert!(matches!(err, Err(Error::DuplicateRank { .. })));
    }

    #[test]
    fn re_adds_dropped_eof() {
        with_cx(|cx| {
            let mut manager =
                SyncTokenTransformManager::new(Phase::Three, vec![Box::new(Eater)]).unwrap();
            let out = manager.process(vec![Token::text("a"), Token::eof()], cx);
            assert_eq!(out, vec![Token::eof()]);
        });
    }

    #[test]
    fn specific_before_any_at_equal_rank() {
        const ANY: &[Registration] = &[Registration::new(2200, Matcher::Any, 0)];
        const TAG: &[Registration] = &[Registration::new(2200, Matcher::Tag("b"), 0)];
        const LATER: &[Registration] = &[Registration::new(2300, Matcher::Any, 0)];
        with_cx(|cx| {
            let seen = std::rc::Rc::new(core::cell::RefCell::new(Vec::new()));
            let mut manager = SyncTokenTransformManager::new(
                Phase::Three,
                vec![
                    Box::new(Recorder("later", LATER, seen.clone())),
                    Box::new(Recorder("any", ANY, seen.clone())),
                    Box::new(Recorder("tag", TAG, seen.clone())),
                ],
            )
            .unwrap();
            let out = manager.process(vec![Token::StartTag(Tag::new("b", vec![]))], cx);
            assert_eq!(out.len(), 1);
            assert_eq!(*seen.borrow(), ["tag", "any", "later"]);
        });
    }
}
