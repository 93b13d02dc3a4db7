//! Behavior switches like `__NOTOC__`.

use super::meta;
use crate::{
    pipeline::{Context, Matcher, Registration, SyncHandler, TransformOutput},
    tokens::{Attribute, Token},
};

/// Records behavior switches in the page properties as soon as they are
/// seen, so that later expansions can consult them.
#[derive(Debug)]
pub(super) struct BehaviorSwitchPreprocessor;

impl SyncHandler for BehaviorSwitchPreprocessor {
    fn registrations(&self) -> &'static [Registration] {
        const R: &[Registration] = &[Registration::new(50, Matcher::Tag("behavior-switch"), 0)];
        R
    }

    fn transform(&mut self, _: u8, token: Token, cx: &Context<'_>) -> TransformOutput {
        if let Some(word) = token.tag().and_then(|tag| tag.attr_text("word")) {
            cx.env.set_page_prop(&word);
        }
        TransformOutput::Unchanged(token)
    }
}

/// Turns behavior switches into page property markers.
#[derive(Debug)]
pub(super) struct BehaviorSwitchHandler;

impl SyncHandler for BehaviorSwitchHandler {
    fn registrations(&self) -> &'static [Registration] {
        const R: &[Registration] = &[Registration::new(2140, Matcher::Tag("behavior-switch"), 0)];
        R
    }

    fn transform(&mut self, _: u8, token: Token, _: &Context<'_>) -> TransformOutput {
        let Token::SelfClosingTag(tag) = token else {
            return TransformOutput::Unchanged(token);
        };
        let word = tag.attr_text("word").unwrap_or_default();
        TransformOutput::tokens(vec![meta(
            vec![Attribute::new("property", format!("mw:PageProp/{word}"))],
            tag.meta.tsr,
            tag.meta.src.clone(),
        )])
    }
}
