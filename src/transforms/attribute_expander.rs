//! Expansion of templates inside tag attributes.

use crate::{
    pipeline::{
        AsyncHandler, AsyncOutput, AttributeTransformManager, Expander, Matcher, OutputType,
        Registration, TransformOutput,
    },
    tokens::{AttrValue, Attribute, Stx, Tag, Token},
};
use serde_json::json;

/// Expands token-valued attributes of tag tokens.
///
/// Link captions (the `content` attribute of link tokens) are expanded to
/// tokens rather than text, since they become the content of the link.
#[derive(Debug)]
pub(super) struct AttributeExpander;

impl AsyncHandler for AttributeExpander {
    fn registrations(&self) -> &'static [Registration] {
        const R: &[Registration] = &[Registration::new(1120, Matcher::Any, 0)];
        R
    }

    fn transform(&self, _: u8, token: Token, ex: &Expander) -> AsyncOutput {
        let needs_expansion = token.tag().is_some_and(|tag| {
            tag.attrs
                .iter()
                .any(|attr| attr.k.needs_expansion() || attr.v.needs_expansion())
        });
        if !needs_expansion {
            return TransformOutput::Unchanged(token).into();
        }

        let ex = ex.clone();
        AsyncOutput::pending(async move {
            let token = match token {
                Token::StartTag(tag) => Token::StartTag(expand(&ex, tag).await),
                Token::EndTag(tag) => Token::EndTag(expand(&ex, tag).await),
                Token::SelfClosingTag(tag) => Token::SelfClosingTag(expand(&ex, tag).await),
                token => token,
            };
            vec![token]
        })
    }
}

/// Expands the attributes of one tag.
async fn expand(ex: &Expander, mut tag: Tag) -> Tag {
    let is_link = tag.name == "wikilink" || tag.name == "extlink";
    let (content, attrs): (Vec<_>, Vec<_>) = core::mem::take(&mut tag.attrs)
        .into_iter()
        .partition(|attr| is_link && matches!(&attr.k, AttrValue::Text(k) if k == "content"));

    let sources = attrs
        .iter()
        .map(|attr| attr.vsrc.clone().filter(|_| attr.v.needs_expansion()))
        .collect::<Vec<_>>();
    tag.attrs = AttributeTransformManager::new(ex.clone())
        .process(attrs)
        .await;
    if tag.meta.stx == Some(Stx::Html) {
        record_expanded(&mut tag, sources);
    }

    for attr in content {
        let v = ex
            .frame
            .expand(&ex.env, attr.v.into_tokens(), OutputType::Tokens)
            .await
            .into_tokens();
        tag.attrs.push(Attribute {
            v: AttrValue::Tokens(v),
            ..attr
        });
    }
    tag
}

/// Marks an HTML tag whose attribute values came from templates and records
/// the wikitext of each value next to what it expanded to, so that an
/// unchanged value can be written back as the original wikitext.
fn record_expanded(tag: &mut Tag, sources: Vec<Option<String>>) {
    let attribs = tag
        .attrs
        .iter()
        .zip(sources)
        .filter_map(|(attr, wt)| {
            Some(json!([
                { "txt": attr.k.to_text() },
                { "html": attr.v.to_text(), "wt": wt? }
            ]))
        })
        .collect::<Vec<_>>();
    if attribs.is_empty() {
        return;
    }

    log::trace!(
        target: "wiki_roundtrip::async",
        "<{}> has {} expanded attributes",
        tag.name,
        attribs.len()
    );
    let types = match tag.attr_text("typeof") {
        Some(types) => format!("{types} mw:ExpandedAttrs"),
        None => "mw:ExpandedAttrs".to_string(),
    };
    tag.set_attr("typeof", types);
    tag.set_attr("data-mw", json!({ "attribs": attribs }).to_string());
}
