//! Template transclusion and template argument substitution.

use crate::{
    pipeline::{
        AsyncHandler, AsyncOutput, Error, ExpansionError, Expander, Matcher, OutputType,
        ParserValue, Registration, TransformOutput,
    },
    title::{Namespace, Title},
    tokens::{AttrValue, Attribute, Tag, Token},
    wikitext::Span,
};
use serde_json::{Map, Value, json};
use std::rc::Rc;

/// Expands `{{template}}` and `{{{argument}}}` tokens.
#[derive(Debug)]
pub(super) struct TemplateHandler;

impl AsyncHandler for TemplateHandler {
    fn registrations(&self) -> &'static [Registration] {
        const R: &[Registration] = &[
            Registration::new(1100, Matcher::Tag("template"), 0),
            Registration::new(1100, Matcher::Tag("templatearg"), 1),
        ];
        R
    }

    fn transform(&self, slot: u8, token: Token, ex: &Expander) -> AsyncOutput {
        let Token::SelfClosingTag(tag) = token else {
            return TransformOutput::Unchanged(token).into();
        };

        let ex = ex.clone();
        if slot == 0 {
            AsyncOutput::pending(async move { expand_template(&ex, tag).await })
        } else {
            AsyncOutput::pending(async move { expand_argument(&ex, tag).await })
        }
    }
}

/// Expands a key or value to text in the current frame.
async fn expand_text(ex: &Expander, value: &AttrValue) -> String {
    if !value.needs_expansion() {
        return value.to_text().into_owned();
    }
    ex.frame
        .expand(&ex.env, value.clone().into_tokens(), OutputType::Text)
        .await
        .into_text()
}

/// Expands a template invocation.
async fn expand_template(ex: &Expander, tag: Tag) -> Vec<Token> {
    let Some(target) = tag.attrs.first() else {
        return source_text(&tag);
    };
    let name = expand_text(ex, &target.k).await;
    let name = name.trim();
    if name.is_empty() {
        return source_text(&tag);
    }
    let title = Title::new(name, Namespace::TEMPLATE);

    let body = if ex.env.config.bypass_preprocessor {
        match preprocess(ex, &tag, &title).await {
            Ok(body) => body,
            Err(err) => return error_tokens(ex, &tag, &title, &err.to_string()),
        }
    } else {
        if let Err(err) = ex
            .frame
            .loop_and_depth_check(title.key(), ex.env.config.max_depth)
        {
            return guard_error(ex, &tag, &title, &err);
        }

        let source = match ex.fetch(&title).await {
            Ok(source) => source,
            Err(Error::Fetch(err)) => {
                log::debug!("{err}");
                return missing_template(ex, &tag, &title);
            }
            Err(err) => return error_tokens(ex, &tag, &title, &err.to_string()),
        };

        let args = arguments(ex, &tag.attrs[1..]).await;
        let frame = ex.frame.new_child(&title, args);
        match ex.expand_source(&source, frame).await {
            Ok(body) => body,
            Err(err) => return error_tokens(ex, &tag, &title, &err.to_string()),
        }
    };

    let body = body.iter().map(Token::without_tsr).collect::<Vec<_>>();
    if ex.toplevel && ex.env.config.wrap_templates {
        encapsulate(ex, &tag, &title, body)
    } else {
        body
    }
}

/// Expands a template invocation through the external preprocessor.
async fn preprocess(ex: &Expander, tag: &Tag, title: &Title) -> crate::pipeline::Result<Vec<Token>> {
    ex.env.warn_bypass();
    ex.env.cancellation().check()?;
    let src = tag.meta.src.as_deref().unwrap_or_default();
    let expanded = ex.env.templates.preprocess(src, title).await?;
    ex.expand_wikitext(&expanded).await
}

/// Builds the arguments of a child frame. Positional arguments are
/// numbered from 1.
async fn arguments(ex: &Expander, params: &[Attribute]) -> Vec<(String, ParserValue)> {
    let mut args = Vec::with_capacity(params.len());
    let mut position = 0;
    for param in params {
        let named = param.ksrc.is_some();
        let key = if named {
            expand_text(ex, &param.k).await.trim().to_string()
        } else {
            position += 1;
            position.to_string()
        };
        args.push((
            key,
            ParserValue {
                tokens: param.v.clone().into_tokens(),
                src: param.vsrc.clone().unwrap_or_default(),
                frame: Rc::clone(&ex.frame),
                named,
            },
        ));
    }
    args
}

/// Expands a template argument reference in the current frame.
async fn expand_argument(ex: &Expander, tag: Tag) -> Vec<Token> {
    let Some(target) = tag.attrs.first() else {
        return source_text(&tag);
    };
    let name = expand_text(ex, &target.k).await;
    let name = name.trim();

    if let Some(value) = ex.frame.arg(name) {
        return value.expand(&ex.env, OutputType::Tokens).await.into_tokens();
    }

    if let Some(default) = tag.attrs.get(1) {
        return ex
            .frame
            .expand(&ex.env, default.v.clone().into_tokens(), OutputType::Tokens)
            .await
            .into_tokens();
    }

    source_text(&tag)
}

/// The literal source of a token that cannot be expanded.
fn source_text(tag: &Tag) -> Vec<Token> {
    match &tag.meta.src {
        Some(src) if !src.is_empty() => vec![Token::text(src)],
        _ => Vec::new(),
    }
}

/// Renders a loop or depth guard failure.
fn guard_error(ex: &Expander, tag: &Tag, title: &Title, err: &ExpansionError) -> Vec<Token> {
    log::warn!("{err}");
    error_tokens(ex, tag, title, &err.to_string())
}

/// Renders an expansion failure as an error message linking to the
/// template.
fn error_tokens(ex: &Expander, tag: &Tag, title: &Title, message: &str) -> Vec<Token> {
    let body = vec![
        Token::start("span", vec![Attribute::new("class", "error")]),
        Token::start("a", vec![Attribute::new("href", title.href())]),
        Token::text(message),
        Token::end("a"),
        Token::end("span"),
    ];
    if ex.toplevel && ex.env.config.wrap_templates {
        encapsulate(ex, tag, title, body)
    } else {
        body
    }
}

/// Renders a link to a template which does not exist.
fn missing_template(ex: &Expander, tag: &Tag, title: &Title) -> Vec<Token> {
    let body = vec![
        Token::start(
            "a",
            vec![
                Attribute::new("href", title.href()),
                Attribute::new("class", "new"),
                Attribute::new("title", format!("{title} (page does not exist)")),
            ],
        ),
        Token::text(title.key()),
        Token::end("a"),
    ];
    if ex.toplevel && ex.env.config.wrap_templates {
        encapsulate(ex, tag, title, body)
    } else {
        body
    }
}

/// Wraps top-level template output in transclusion markers. The start
/// marker carries the invocation so it can be serialized back.
fn encapsulate(ex: &Expander, tag: &Tag, title: &Title, body: Vec<Token>) -> Vec<Token> {
    let about = ex.env.new_about_id();
    let data_mw = json!({
        "parts": [{
            "template": {
                "target": {
                    "wt": tag.attrs.first().and_then(|a| a.ksrc.clone()).unwrap_or_default(),
                    "href": title.href(),
                },
                "params": params_json(&tag.attrs[1..]),
                "i": 0,
            }
        }]
    });

    let mut start = Tag::new(
        "meta",
        vec![
            Attribute::new("typeof", "mw:Transclusion"),
            Attribute::new("about", about.clone()),
            Attribute::new("data-mw", data_mw.to_string()),
        ],
    )
    .with_tsr(tag.meta.tsr);
    start.meta.src = tag.meta.src.clone();

    let end_tsr = tag.meta.tsr.map(|tsr| Span::new(tsr.end, tsr.end));
    let end = Tag::new(
        "meta",
        vec![
            Attribute::new("typeof", "mw:Transclusion/End"),
            Attribute::new("about", about),
        ],
    )
    .with_tsr(end_tsr);

    let mut out = Vec::with_capacity(body.len() + 2);
    out.push(Token::SelfClosingTag(start));
    out.extend(body);
    out.push(Token::SelfClosingTag(end));
    out
}

/// Describes template parameters for `data-mw`.
fn params_json(params: &[Attribute]) -> Value {
    let mut out = Map::new();
    let mut position = 0;
    for param in params {
        let key = match &param.ksrc {
            Some(ksrc) => ksrc.trim().to_string(),
            None => {
                position += 1;
                position.to_string()
            }
        };
        out.insert(
            key,
            json!({ "wt": param.vsrc.clone().unwrap_or_default() }),
        );
    }
    Value::Object(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn params_are_numbered() {
        let params = vec![
            Attribute {
                vsrc: Some("a".into()),
                ..Default::default()
            },
            Attribute {
                k: "k".into(),
                ksrc: Some("k ".into()),
                vsrc: Some(" v".into()),
                ..Default::default()
            },
            Attribute {
                vsrc: Some("b".into()),
                ..Default::default()
            },
        ];
        assert_eq!(
            params_json(&params).to_string(),
            r#"{"1":{"wt":"a"},"k":{"wt":" v"},"2":{"wt":"b"}}"#
        );
    }
}
