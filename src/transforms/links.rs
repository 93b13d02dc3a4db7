//! Wiki links and external links.

use crate::{
    pipeline::{AsyncHandler, AsyncOutput, Expander, Matcher, Registration, TransformOutput},
    title::{Namespace, Title},
    tokens::{Attribute, Stx, Tag, Token},
    wikitext::Span,
};

/// Takes the caption tokens out of a link token.
fn take_content(tag: &mut Tag) -> Vec<Token> {
    let index = tag
        .attrs
        .iter()
        .position(|attr| attr.k.to_text() == "content");
    index.map_or_else(Vec::new, |index| tag.attrs.remove(index).v.into_tokens())
}

/// Converts `[[target|caption]]` tokens into anchors.
#[derive(Debug)]
pub(super) struct WikiLinkHandler;

impl AsyncHandler for WikiLinkHandler {
    fn registrations(&self) -> &'static [Registration] {
        const R: &[Registration] = &[Registration::new(1150, Matcher::Tag("wikilink"), 0)];
        R
    }

    fn transform(&self, _: u8, token: Token, _: &Expander) -> AsyncOutput {
        let Token::SelfClosingTag(mut tag) = token else {
            return TransformOutput::Unchanged(token).into();
        };

        let content = take_content(&mut tag);
        let href = tag.attr("href").cloned().unwrap_or_default();
        let target = href.v.to_text().into_owned();
        let target_src = href.vsrc.clone().unwrap_or_else(|| target.clone());
        let title = Title::new(&target, Namespace::MAIN);
        let stx = tag.meta.stx.unwrap_or(Stx::Simple);

        let mut start = Tag::new(
            "a",
            vec![
                Attribute::new("rel", "mw:WikiLink"),
                Attribute::new("href", title.href()),
            ],
        );
        start.meta.stx = Some(stx);
        start.meta.extra.insert("sa:href".into(), target_src.clone());
        let mut end = Tag::new("a", vec![]);

        if let Some(tsr) = tag.meta.tsr {
            let open_width = match stx {
                Stx::Piped => 2 + target_src.len() + 1,
                _ => 2,
            };
            start.meta.tsr = Some(Span::new(tsr.start, tsr.start + open_width));
            end.meta.tsr = Some(Span::new(tsr.end.saturating_sub(2), tsr.end));
        }

        let mut out = Vec::with_capacity(content.len() + 2);
        out.push(Token::StartTag(start));
        if stx == Stx::Piped {
            out.extend(content);
        } else {
            out.push(Token::Text(target_src));
        }
        out.push(Token::EndTag(end));
        TransformOutput::tokens(out).into()
    }
}

/// Converts `[url caption]` tokens into anchors.
#[derive(Debug)]
pub(super) struct ExternalLinkHandler;

impl AsyncHandler for ExternalLinkHandler {
    fn registrations(&self) -> &'static [Registration] {
        const R: &[Registration] = &[Registration::new(1160, Matcher::Tag("extlink"), 0)];
        R
    }

    fn transform(&self, _: u8, token: Token, _: &Expander) -> AsyncOutput {
        let Token::SelfClosingTag(mut tag) = token else {
            return TransformOutput::Unchanged(token).into();
        };

        let content = take_content(&mut tag);
        let href = tag.attr_text("href").unwrap_or_default().into_owned();

        let mut start = Tag::new(
            "a",
            vec![
                Attribute::new("rel", "mw:ExtLink"),
                Attribute::new("href", href.clone()),
            ],
        );
        start.meta.extra.insert("sa:href".into(), href);
        let mut end = Tag::new("a", vec![]);

        if let Some(tsr) = tag.meta.tsr {
            let target_off = tag
                .meta
                .extra
                .get("targetOff")
                .and_then(|off| off.parse().ok())
                .unwrap_or(tsr.start + 1);
            start.meta.tsr = Some(Span::new(tsr.start, target_off));
            end.meta.tsr = Some(Span::new(tsr.end.saturating_sub(1), tsr.end));
        }

        let mut out = Vec::with_capacity(content.len() + 2);
        out.push(Token::StartTag(start));
        out.extend(content);
        out.push(Token::EndTag(end));
        TransformOutput::tokens(out).into()
    }
}
