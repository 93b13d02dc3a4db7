//! The asynchronous transform manager.
//!
//! Dispatch works the same way as in the synchronous manager, except that a
//! transform may suspend. When it does, the stream is split: the tokens so
//! far are flushed to the current sink, a [`TokenAccumulator`] task is
//! created between that sink and two fresh channels, the suspended
//! expansion is spawned as a task writing to the child channel, and the rest
//! of the stream continues into the sibling channel. Late tokens delivered
//! by the expansion are run through the transforms ranked above the one
//! that suspended.
//!
//! [`TokenAccumulator`]: super::accumulator::TokenAccumulator

use super::{
    Expander, LocalBoxFuture, Phase, Rank, Registration, Result, TransformOutput,
    accumulator::{self, Chunk, Sink},
    manager::{Entry, TransformTable},
};
use crate::tokens::Token;
use std::rc::Rc;
use tokio::sync::mpsc;

/// The result of running one asynchronous transform on one token.
pub(crate) enum AsyncOutput {
    /// The transform finished synchronously.
    Done(TransformOutput),
    /// The transform needs to wait. `tokens` are available now; `rest`
    /// produces the remaining tokens of the expansion.
    Pending {
        /// Tokens available immediately.
        tokens: Vec<Token>,
        /// The remaining tokens.
        rest: LocalBoxFuture<'static, Vec<Token>>,
    },
}

impl core::fmt::Debug for AsyncOutput {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Done(output) => f.debug_tuple("Done").field(output).finish(),
            Self::Pending { tokens, .. } => f
                .debug_struct("Pending")
                .field("tokens", tokens)
                .finish_non_exhaustive(),
        }
    }
}

impl AsyncOutput {
    /// A suspended result with no tokens available yet.
    pub fn pending(rest: impl Future<Output = Vec<Token>> + 'static) -> Self {
        Self::Pending {
            tokens: Vec::new(),
            rest: Box::pin(rest),
        }
    }
}

impl From<TransformOutput> for AsyncOutput {
    fn from(value: TransformOutput) -> Self {
        Self::Done(value)
    }
}

/// An asynchronous token transform handler.
pub(crate) trait AsyncHandler {
    /// The static registrations of this handler.
    fn registrations(&self) -> &'static [Registration];

    /// Transforms one token. The expander carries the environment and frame
    /// of the pipeline the token belongs to.
    fn transform(&self, slot: u8, token: Token, ex: &Expander) -> AsyncOutput;
}

/// An asynchronous token transform manager.
pub(crate) struct AsyncTokenTransformManager {
    /// The registration table.
    table: TransformTable,
    /// The handlers.
    handlers: Vec<Box<dyn AsyncHandler>>,
    /// The expansion capability for this pipeline.
    expander: Expander,
}

impl AsyncTokenTransformManager {
    /// Creates a new manager.
    pub fn new(expander: Expander, handlers: Vec<Box<dyn AsyncHandler>>) -> Result<Rc<Self>> {
        let mut table = TransformTable::new(Phase::Two);
        for (index, handler) in handlers.iter().enumerate() {
            table.register(index, handler.registrations())?;
        }
        Ok(Rc::new(Self {
            table,
            handlers,
            expander,
        }))
    }

    /// Runs `tokens` through every transform of the phase and collects the
    /// ordered result.
    ///
    /// This must be polled from within a [`tokio::task::LocalSet`].
    pub async fn process(self: Rc<Self>, tokens: Vec<Token>) -> Vec<Token> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        self.transform_tokens(tokens, None, tx);

        let mut out = Vec::new();
        loop {
            match rx.recv().await {
                Some(chunk) => {
                    out.extend(chunk.tokens);
                    if !chunk.more {
                        break;
                    }
                }
                None => {
                    self.expander.env.report(super::Error::Async(
                        "token stream ended without end of input".into(),
                    ));
                    break;
                }
            }
        }
        out
    }

    /// Runs `tokens` through the transforms above `min_rank`, sending the
    /// output to `sink`. The last chunk sent through the final sink of the
    /// stream is marked as having no more tokens.
    fn transform_tokens(self: &Rc<Self>, tokens: Vec<Token>, min_rank: Option<Rank>, sink: Sink) {
        let mut sink = sink;
        let mut local = Vec::with_capacity(tokens.len());
        let mut stack = vec![(tokens.into_iter(), min_rank)];

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
                let Some((index, entry)) = self.table.next(&token, rank, from, |_| true) else {
                    local.push(token);
                    break;
                };
                from = index + 1;

                match self.handlers[entry.handler].transform(entry.slot, token, &self.expander) {
                    AsyncOutput::Done(TransformOutput::Unchanged(t)) => token = t,
                    AsyncOutput::Done(TransformOutput::Consumed) => break,
                    AsyncOutput::Done(TransformOutput::Tokens { tokens, rank }) => {
                        let rank = TransformTable::replacement_rank(&entry, rank);
                        stack.push((tokens.into_iter(), Some(rank)));
                        break;
                    }
                    AsyncOutput::Pending { tokens, rest } => {
                        let before = core::mem::take(&mut local);
                        sink = self.suspend(&entry, before, sink, tokens, rest);
                        break;
                    }
                }
            }
        }

        log::trace!(
            target: "wiki_roundtrip::async",
            "stream finished with {} local tokens",
            local.len()
        );
        let _ = sink.send(Chunk::new(local, false));
    }

    /// Splits the stream at a suspended transform and returns the sink the
    /// rest of the stream should go to.
    fn suspend(
        self: &Rc<Self>,
        entry: &Entry,
        before: Vec<Token>,
        parent: Sink,
        now: Vec<Token>,
        rest: LocalBoxFuture<'static, Vec<Token>>,
    ) -> Sink {
        log::trace!(
            target: "wiki_roundtrip::async",
            "suspending at rank {} after {} tokens",
            entry.rank,
            before.len()
        );

        if !before.is_empty() {
            let _ = parent.send(Chunk::new(before, true));
        }

        let (child_tx, child_rx) = mpsc::unbounded_channel();
        let (sibling_tx, sibling_rx) = mpsc::unbounded_channel();
        tokio::task::spawn_local(accumulator::run(
            child_rx,
            sibling_rx,
            parent,
            Rc::clone(&self.expander.env),
        ));

        let this = Rc::clone(self);
        let rank = entry.rank;
        tokio::task::spawn_local(async move {
            let mut tokens = now;
            tokens.extend(rest.await);
            this.transform_tokens(tokens, Some(rank), child_tx);
        });

        sibling_tx
    }
}
