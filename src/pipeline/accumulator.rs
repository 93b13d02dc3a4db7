//! Ordered merging of asynchronous expansion output.
//!
//! When a transform suspends, the tokens after the suspended token keep
//! flowing (the *sibling* stream) while the expansion completes in the
//! background (the *child* stream). A [`TokenAccumulator`] sits between the
//! two and its parent sink and guarantees that everything from the child is
//! delivered before anything from the sibling, no matter which finishes
//! first.

use super::{Env, Error};
use crate::tokens::Token;
use std::rc::Rc;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

/// A piece of a token stream.
#[derive(Debug, Default)]
pub(super) struct Chunk {
    /// The tokens.
    pub tokens: Vec<Token>,
    /// Whether more chunks follow on the same stream.
    pub more: bool,
}

impl Chunk {
    /// Creates a chunk.
    pub fn new(tokens: Vec<Token>, more: bool) -> Self {
        Self { tokens, more }
    }
}

/// The sending end of a token stream.
pub(super) type Sink = UnboundedSender<Chunk>;

/// The ordering state machine for one suspension point.
#[derive(Debug)]
pub(super) struct TokenAccumulator {
    /// Sibling tokens buffered while the child is outstanding.
    sibling_tokens: Vec<Token>,
    /// The child stream has not finished.
    waiting_for_child: bool,
    /// The sibling stream has not finished.
    waiting_for_sibling: bool,
}

impl TokenAccumulator {
    /// Creates an accumulator waiting on both streams.
    pub fn new() -> Self {
        Self {
            sibling_tokens: Vec::new(),
            waiting_for_child: true,
            waiting_for_sibling: true,
        }
    }

    /// Returns true if both streams have finished.
    pub fn is_done(&self) -> bool {
        !self.waiting_for_child && !self.waiting_for_sibling
    }

    /// Handles a chunk from the child. Child tokens are always forwarded
    /// immediately; when the child finishes, buffered sibling tokens follow
    /// them.
    pub fn receive_from_child(&mut self, chunk: Chunk) -> Option<Chunk> {
        let mut tokens = chunk.tokens;
        if !chunk.more {
            self.waiting_for_child = false;
            tokens.append(&mut self.sibling_tokens);
        }

        Some(Chunk::new(
            tokens,
            self.waiting_for_child || self.waiting_for_sibling,
        ))
    }

    /// Handles a chunk from the sibling. Sibling tokens are buffered while
    /// the child is outstanding.
    pub fn receive_from_sibling(&mut self, chunk: Chunk) -> Option<Chunk> {
        if !chunk.more {
            self.waiting_for_sibling = false;
        }

        if self.waiting_for_child {
            self.sibling_tokens.extend(chunk.tokens);
            None
        } else {
            Some(Chunk::new(chunk.tokens, self.waiting_for_sibling))
        }
    }
}

/// Drives an accumulator until both of its streams are finished, forwarding
/// merged chunks to `parent`.
///
/// A stream which closes without sending its final chunk is treated as
/// finished, and the failure is reported to the environment.
pub(super) async fn run(
    mut child: UnboundedReceiver<Chunk>,
    mut sibling: UnboundedReceiver<Chunk>,
    parent: Sink,
    env: Rc<Env>,
) {
    let mut acc = TokenAccumulator::new();
    while !acc.is_done() {
        let out = tokio::select! {
            biased;
            chunk = child.recv(), if acc.waiting_for_child => {
                acc.receive_from_child(chunk.unwrap_or_else(|| {
                    env.report(Error::Async("child expansion ended early".into()));
                    Chunk::default()
                }))
            }
            chunk = sibling.recv(), if acc.waiting_for_sibling => {
                acc.receive_from_sibling(chunk.unwrap_or_else(|| {
                    env.report(Error::Async("sibling stream ended early".into()));
                    Chunk::default()
                }))
            }
            else => break,
        };

        if let Some(chunk) = out {
            log::trace!(
                target: "wiki_roundtrip::async",
                "forwarding {} tokens (more: {})",
                chunk.tokens.len(),
                chunk.more
            );
            if parent.send(chunk).is_err() {
                log::debug!(target: "wiki_roundtrip::async", "parent sink closed");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(chunk: &Chunk) -> Vec<&str> {
        chunk
            .tokens
            .iter()
            .filter_map(|t| match t {
                Token::Text(t) => Some(t.as_str()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn siblings_wait_for_child() {
        let mut acc = TokenAccumulator::new();
        assert!(
            acc.receive_from_sibling(Chunk::new(vec![Token::text("s1")], true))
                .is_none()
        );
        assert!(
            acc.receive_from_sibling(Chunk::new(vec![Token::text("s2")], false))
                .is_none()
        );

        let partial = acc
            .receive_from_child(Chunk::new(vec![Token::text("c1")], true))
            .unwrap();
        assert_eq!(texts(&partial), ["c1"]);
        assert!(partial.more);

        let last = acc
            .receive_from_child(Chunk::new(vec![Token::text("c2")], false))
            .unwrap();
        assert_eq!(texts(&last), ["c2", "s1", "s2"]);
        assert!(!last.more);
        assert!(acc.is_done());
    }

    #[test]
    fn siblings_flow_after_child() {
        let mut acc = TokenAccumulator::new();
        let first = acc
            .receive_from_child(Chunk::new(vec![Token::text("c")], false))
            .unwrap();
        assert!(first.more);
        let next = acc
            .receive_from_sibling(Chunk::new(vec![Token::text("s1")], true))
            .unwrap();
        assert_eq!(texts(&next), ["s1"]);
        assert!(next.more);
        let last = acc
            .receive_from_sibling(Chunk::new(vec![Token::text("s2")], false))
            .unwrap();
        assert!(!last.more);
        assert!(acc.is_done());
    }
}
