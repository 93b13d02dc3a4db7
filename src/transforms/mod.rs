//! Token stream transforms, grouped by the pipeline phase they run in.

use crate::{
    pipeline::{AsyncHandler, SyncHandler},
    tokens::{Attribute, Tag, Token},
    wikitext::Span,
};

mod attribute_expander;
mod behavior;
pub(crate) mod extension;
mod include;
mod links;
mod lists;
mod paragraphs;
mod quotes;
mod template;
#[cfg(test)]
mod tests;

/// Creates the handlers of phase 1, which run synchronously on the raw
/// token stream of a page or template.
pub(crate) fn phase1() -> Vec<Box<dyn SyncHandler>> {
    vec![
        Box::new(include::OnlyInclude::default()),
        Box::new(include::NoInclude::default()),
        Box::new(include::IncludeOnly::default()),
        Box::new(behavior::BehaviorSwitchPreprocessor),
    ]
}

/// Creates the handlers of phase 2, which expand templates, extensions, and
/// links, and may suspend.
pub(crate) fn phase2() -> Vec<Box<dyn AsyncHandler>> {
    vec![
        Box::new(template::TemplateHandler),
        Box::new(extension::ExtensionHandler),
        Box::new(attribute_expander::AttributeExpander),
        Box::new(links::WikiLinkHandler),
        Box::new(links::ExternalLinkHandler),
    ]
}

/// Creates the handlers of phase 3, which run synchronously on the fully
/// expanded token stream of the page.
pub(crate) fn phase3() -> Vec<Box<dyn SyncHandler>> {
    vec![
        Box::new(quotes::QuoteTransformer::default()),
        Box::new(behavior::BehaviorSwitchHandler),
        Box::new(lists::ListHandler::default()),
        Box::new(paragraphs::ParagraphWrapper::default()),
    ]
}

/// Creates a `meta` token.
fn meta(attrs: Vec<Attribute>, tsr: Option<Span>, src: Option<String>) -> Token {
    let mut tag = Tag::new("meta", attrs).with_tsr(tsr);
    tag.meta.src = src;
    Token::SelfClosingTag(tag)
}

/// Returns true if `token` does not affect whether a line starts with text.
/// Such tokens neither open nor close paragraphs and lists.
fn is_sol_transparent(token: &Token) -> bool {
    match token {
        Token::Text(text) => text.chars().all(|c| c == ' ' || c == '\t'),
        Token::Comment(..) => true,
        Token::SelfClosingTag(tag) if tag.name == "meta" => {
            tag.meta.stx != Some(crate::tokens::Stx::Html)
                && (tag.attr("property").is_some()
                    || tag.attr_text("typeof").is_some_and(|ty| {
                        ty.starts_with("mw:Includes/") || ty.starts_with("mw:Transclusion")
                    }))
        }
        _ => false,
    }
}
