//! Extension tags like `<nowiki>` and `<ref>`.
//!
//! An extension receives the attributes and raw body of its tag and returns
//! either tokens, which continue through the pipeline, or an HTML fragment,
//! which is carried through the pipeline in a placeholder and unpacked into
//! the document after tree building.

use crate::{
    pipeline::{
        AsyncHandler, AsyncOutput, Expander, LocalBoxFuture, Matcher, Registration, Result,
        TransformOutput,
    },
    tokens::{Attribute, Tag, Token},
};
use std::{collections::BTreeMap, rc::Rc};

/// The invocation of an extension tag.
#[derive(Clone, Debug, Default)]
pub(crate) struct ExtensionCall {
    /// The lowercased tag name.
    pub name: String,
    /// The tag attributes, in source order.
    pub attrs: Vec<(String, String)>,
    /// The raw body, or `None` for a self-closing tag.
    pub body: Option<String>,
    /// The complete source of the tag.
    pub src: String,
}

impl ExtensionCall {
    /// Extracts the invocation from an extension token.
    fn from_tag(tag: &Tag) -> Self {
        Self {
            name: tag.meta.extra.get("name").cloned().unwrap_or_default(),
            attrs: tag
                .attrs
                .iter()
                .map(|attr| (attr.k.to_text().into_owned(), attr.v.to_text().into_owned()))
                .collect(),
            body: tag.meta.extra.get("body").cloned(),
            src: tag.meta.src.clone().unwrap_or_default(),
        }
    }

    /// The `data-mw` description of the invocation.
    fn data_mw(&self) -> serde_json::Value {
        let attrs = self
            .attrs
            .iter()
            .map(|(k, v)| (k.clone(), serde_json::Value::from(v.as_str())))
            .collect::<serde_json::Map<_, _>>();
        let mut data = serde_json::json!({ "name": self.name, "attrs": attrs });
        if let Some(body) = &self.body {
            data["body"] = serde_json::json!({ "extsrc": body });
        }
        data
    }
}

/// The output of an extension.
#[derive(Debug)]
pub(crate) enum ExtensionOutput {
    /// Tokens which continue through the pipeline.
    Tokens(Vec<Token>),
    /// An HTML fragment which is inserted into the document as-is.
    Html(String),
}

/// An extension tag implementation.
pub(crate) trait ExtensionTag {
    /// Renders one invocation.
    fn expand<'a>(
        &'a self,
        call: &'a ExtensionCall,
        ex: &'a Expander,
    ) -> LocalBoxFuture<'a, Result<ExtensionOutput>>;
}

/// The set of registered extension tags.
#[derive(Default)]
pub(crate) struct Registry {
    /// Extensions by lowercased tag name.
    tags: BTreeMap<String, Rc<dyn ExtensionTag>>,
}

impl Registry {
    /// Creates a registry with the built-in extensions.
    pub fn with_builtins() -> Self {
        let mut registry = Self::default();
        registry.register("nowiki", Nowiki);
        registry.register("pre", Pre);
        registry.register("ref", Ref);
        registry
    }

    /// Registers an extension for the given tag name.
    pub fn register(&mut self, name: &str, tag: impl ExtensionTag + 'static) {
        self.tags.insert(name.to_ascii_lowercase(), Rc::new(tag));
    }

    /// Finds the extension for the given tag name.
    pub fn get(&self, name: &str) -> Option<Rc<dyn ExtensionTag>> {
        self.tags.get(name).cloned()
    }

    /// The registered tag names.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tags.keys().map(String::as_str)
    }
}

/// `<nowiki>`: the body is plain text.
struct Nowiki;

impl ExtensionTag for Nowiki {
    fn expand<'a>(
        &'a self,
        call: &'a ExtensionCall,
        _: &'a Expander,
    ) -> LocalBoxFuture<'a, Result<ExtensionOutput>> {
        let body = call.body.clone().unwrap_or_default();
        let tokens = if body.is_empty() {
            Vec::new()
        } else {
            vec![Token::Text(body)]
        };
        Box::pin(core::future::ready(Ok(ExtensionOutput::Tokens(tokens))))
    }
}

/// `<pre>`: the body is preformatted text with no markup.
struct Pre;

impl ExtensionTag for Pre {
    fn expand<'a>(
        &'a self,
        call: &'a ExtensionCall,
        _: &'a Expander,
    ) -> LocalBoxFuture<'a, Result<ExtensionOutput>> {
        let body = call.body.as_deref().unwrap_or_default();
        // A newline right after the opening tag is not part of the content.
        let body = body.strip_prefix('\n').unwrap_or(body);
        let html = format!("<pre>{}</pre>", html_escape::encode_text(body));
        Box::pin(core::future::ready(Ok(ExtensionOutput::Html(html))))
    }
}

/// `<ref>`: the body is wikitext, rendered inline in a superscript.
struct Ref;

impl ExtensionTag for Ref {
    fn expand<'a>(
        &'a self,
        call: &'a ExtensionCall,
        ex: &'a Expander,
    ) -> LocalBoxFuture<'a, Result<ExtensionOutput>> {
        Box::pin(async move {
            let body = match &call.body {
                Some(body) => ex.expand_wikitext(body).await?,
                None => Vec::new(),
            };
            let mut tokens = Vec::with_capacity(body.len() + 2);
            tokens.push(Token::start("sup", vec![Attribute::new("class", "mw-ref")]));
            tokens.extend(body);
            tokens.push(Token::end("sup"));
            Ok(ExtensionOutput::Tokens(tokens))
        })
    }
}

/// Runs registered extensions on extension tokens.
#[derive(Debug)]
pub(super) struct ExtensionHandler;

impl AsyncHandler for ExtensionHandler {
    fn registrations(&self) -> &'static [Registration] {
        const R: &[Registration] = &[Registration::new(1110, Matcher::Tag("extension"), 0)];
        R
    }

    fn transform(&self, _: u8, token: Token, ex: &Expander) -> AsyncOutput {
        let Token::SelfClosingTag(tag) = token else {
            return TransformOutput::Unchanged(token).into();
        };

        let call = ExtensionCall::from_tag(&tag);
        let Some(extension) = ex.env.extensions.get(&call.name) else {
            log::warn!("no extension registered for <{}>", call.name);
            return TransformOutput::tokens(vec![Token::Text(call.src)]).into();
        };

        let ex = ex.clone();
        AsyncOutput::pending(async move {
            match extension.expand(&call, &ex).await {
                Ok(output) => wrap(&ex, &tag, &call, output),
                Err(err) => {
                    log::warn!("<{}> failed: {err}", call.name);
                    vec![
                        Token::start("span", vec![Attribute::new("class", "error")]),
                        Token::Text(err.to_string()),
                        Token::end("span"),
                    ]
                }
            }
        })
    }
}

/// Wraps extension output so the tag can be serialized back to its source.
/// Output nested inside another expansion is not wrapped.
fn wrap(ex: &Expander, tag: &Tag, call: &ExtensionCall, output: ExtensionOutput) -> Vec<Token> {
    let wrapped = ex.toplevel;
    let mut attrs = Vec::new();
    if wrapped {
        attrs.push(Attribute::new("about", ex.env.new_about_id()));
        attrs.push(Attribute::new("data-mw", call.data_mw().to_string()));
    }
    let ty = format!("mw:Extension/{}", call.name);

    match output {
        ExtensionOutput::Tokens(tokens) => {
            let mut out = Vec::with_capacity(tokens.len() + 2);
            if wrapped {
                attrs.insert(0, Attribute::new("typeof", ty));
                let mut start = Tag::new("span", attrs).with_tsr(tag.meta.tsr);
                start.meta.src = tag.meta.src.clone();
                out.push(Token::StartTag(start));
            }
            out.extend(tokens.iter().map(Token::without_tsr));
            if wrapped {
                out.push(Token::end("span"));
            }
            out
        }
        ExtensionOutput::Html(html) => {
            let ty = if wrapped {
                format!("mw:DOMFragment {ty}")
            } else {
                "mw:DOMFragment".into()
            };
            attrs.insert(0, Attribute::new("typeof", ty));
            let mut meta = Tag::new("meta", attrs);
            if wrapped {
                meta.meta.tsr = tag.meta.tsr;
                meta.meta.src = tag.meta.src.clone();
            }
            meta.meta
                .extra
                .insert("html".into(), ex.env.store_fragment(html));
            vec![Token::SelfClosingTag(meta)]
        }
    }
}
