//! The token model shared by the tokenizer, the transform pipeline, and the
//! tree builder.

use crate::wikitext::Span;
use serde::{Deserialize, Serialize};
use std::{borrow::Cow, collections::BTreeMap};

/// The syntax that produced a tag.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum Stx {
    /// Literal HTML syntax.
    Html,
    /// A link with a separate target and caption.
    Piped,
    /// A link whose target is also its caption.
    Simple,
    /// A definition list item sharing a line with its term.
    Row,
}

/// Round-trip metadata carried by a token.
#[derive(Clone, Debug, Default, Eq, Hash, PartialEq)]
pub(crate) struct TokenMeta {
    /// The source range of the token, or `None` if it is synthetic.
    pub tsr: Option<Span>,
    /// The syntax the token came from.
    pub stx: Option<Stx>,
    /// The start tag was not present in the source.
    pub auto_inserted_start: bool,
    /// The end tag was not present in the source.
    pub auto_inserted_end: bool,
    /// Original source text, for tokens whose markup cannot be recovered
    /// from the DOM alone.
    pub src: Option<String>,
    /// Extension-specific data.
    pub extra: BTreeMap<String, String>,
}

impl TokenMeta {
    /// Creates metadata with only a source range.
    pub fn with_tsr(start: usize, end: usize) -> Self {
        Self {
            tsr: Some(Span::new(start, end)),
            ..<_>::default()
        }
    }
}

/// An attribute key or value.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub(crate) enum AttrValue {
    /// A plain string.
    Text(String),
    /// An unexpanded token sequence, e.g. a template-generated value.
    Tokens(Vec<Token>),
}

impl Default for AttrValue {
    fn default() -> Self {
        Self::Text(String::new())
    }
}

impl AttrValue {
    /// Returns the string form of the value. Token values are flattened with
    /// [`tokens_to_string`].
    pub fn to_text(&self) -> Cow<'_, str> {
        match self {
            AttrValue::Text(text) => Cow::Borrowed(text),
            AttrValue::Tokens(tokens) => Cow::Owned(tokens_to_string(tokens)),
        }
    }

    /// Returns true if the value still needs expansion.
    pub fn needs_expansion(&self) -> bool {
        matches!(self, AttrValue::Tokens(tokens) if tokens.iter().any(|t| !matches!(t, Token::Text(_))))
    }

    /// Returns the value as a token sequence.
    pub fn into_tokens(self) -> Vec<Token> {
        match self {
            AttrValue::Text(text) if text.is_empty() => Vec::new(),
            AttrValue::Text(text) => vec![Token::Text(text)],
            AttrValue::Tokens(tokens) => tokens,
        }
    }

    /// Builds a value from tokens, collapsing all-text sequences to a string.
    pub fn from_tokens(tokens: Vec<Token>) -> Self {
        if tokens.iter().all(|t| matches!(t, Token::Text(_))) {
            AttrValue::Text(tokens_to_string(&tokens))
        } else {
            AttrValue::Tokens(tokens)
        }
    }
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

/// A key-value pair attached to a tag token.
#[derive(Clone, Debug, Default, Eq, Hash, PartialEq)]
pub(crate) struct Attribute {
    /// The key.
    pub k: AttrValue,
    /// The value.
    pub v: AttrValue,
    /// The original source of the key.
    pub ksrc: Option<String>,
    /// The original source of the value.
    pub vsrc: Option<String>,
}

impl Attribute {
    /// Creates a new attribute from plain strings.
    pub fn new(k: impl Into<AttrValue>, v: impl Into<AttrValue>) -> Self {
        Self {
            k: k.into(),
            v: v.into(),
            ksrc: None,
            vsrc: None,
        }
    }
}

/// A tag token body.
#[derive(Clone, Debug, Default, Eq, Hash, PartialEq)]
pub(crate) struct Tag {
    /// The tag name, lowercased.
    pub name: String,
    /// The tag attributes, in source order.
    pub attrs: Vec<Attribute>,
    /// Round-trip metadata.
    pub meta: TokenMeta,
}

impl Tag {
    /// Creates a new tag with the given name and attributes.
    pub fn new(name: impl Into<String>, attrs: Vec<Attribute>) -> Self {
        Self {
            name: name.into(),
            attrs,
            meta: <_>::default(),
        }
    }

    /// Sets the source range of the tag.
    #[must_use]
    pub fn with_tsr(mut self, tsr: Option<Span>) -> Self {
        self.meta.tsr = tsr;
        self
    }

    /// Finds the first attribute with the given plain-text key.
    pub fn attr(&self, key: &str) -> Option<&Attribute> {
        self.attrs
            .iter()
            .find(|attr| matches!(&attr.k, AttrValue::Text(k) if k.eq_ignore_ascii_case(key)))
    }

    /// Returns the string value of the attribute with the given key.
    pub fn attr_text(&self, key: &str) -> Option<Cow<'_, str>> {
        self.attr(key).map(|attr| attr.v.to_text())
    }

    /// Sets or replaces an attribute with a plain string value.
    pub fn set_attr(&mut self, key: &str, value: impl Into<String>) {
        let value = AttrValue::Text(value.into());
        if let Some(attr) = self
            .attrs
            .iter_mut()
            .find(|attr| matches!(&attr.k, AttrValue::Text(k) if k == key))
        {
            attr.v = value;
        } else {
            self.attrs.push(Attribute::new(key, value));
        }
    }

    /// Returns true if the `typeof` attribute contains `ty`.
    pub fn has_typeof(&self, ty: &str) -> bool {
        self.attr_text("typeof")
            .is_some_and(|value| value.split_ascii_whitespace().any(|t| t == ty))
    }
}

/// The coarse kind of a token, used to select transforms.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub(crate) enum TokenKind {
    /// A tag token of any flavour.
    Tag,
    /// A text token.
    Text,
    /// A newline token.
    Newline,
    /// A comment token.
    Comment,
    /// The end-of-input token.
    End,
}

/// A token.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub(crate) enum Token {
    /// An opening tag.
    StartTag(Tag),
    /// A closing tag.
    EndTag(Tag),
    /// A tag with no separate closing tag.
    SelfClosingTag(Tag),
    /// Text.
    Text(String),
    /// A line break.
    Newline(TokenMeta),
    /// An HTML comment. The string excludes the `<!--` and `-->` delimiters.
    Comment(String, TokenMeta),
    /// The end of the token stream.
    EndOfInput(TokenMeta),
}

impl Token {
    /// Creates a start tag token.
    pub fn start(name: impl Into<String>, attrs: Vec<Attribute>) -> Self {
        Self::StartTag(Tag::new(name, attrs))
    }

    /// Creates an end tag token.
    pub fn end(name: impl Into<String>) -> Self {
        Self::EndTag(Tag::new(name, Vec::new()))
    }

    /// Creates a text token.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    /// Creates a synthetic end-of-input token.
    pub fn eof() -> Self {
        Self::EndOfInput(<_>::default())
    }

    /// The coarse kind of the token.
    pub fn kind(&self) -> TokenKind {
        match self {
            Token::StartTag(_) | Token::EndTag(_) | Token::SelfClosingTag(_) => TokenKind::Tag,
            Token::Text(_) => TokenKind::Text,
            Token::Newline(_) => TokenKind::Newline,
            Token::Comment(..) => TokenKind::Comment,
            Token::EndOfInput(_) => TokenKind::End,
        }
    }

    /// The tag body, if this is a tag token.
    pub fn tag(&self) -> Option<&Tag> {
        match self {
            Token::StartTag(tag) | Token::EndTag(tag) | Token::SelfClosingTag(tag) => Some(tag),
            _ => None,
        }
    }

    /// The mutable tag body, if this is a tag token.
    pub fn tag_mut(&mut self) -> Option<&mut Tag> {
        match self {
            Token::StartTag(tag) | Token::EndTag(tag) | Token::SelfClosingTag(tag) => Some(tag),
            _ => None,
        }
    }

    /// The tag name, if this is a tag token.
    pub fn name(&self) -> Option<&str> {
        self.tag().map(|tag| tag.name.as_str())
    }

    /// The round-trip metadata of the token, if it has any.
    pub fn meta(&self) -> Option<&TokenMeta> {
        match self {
            Token::StartTag(tag) | Token::EndTag(tag) | Token::SelfClosingTag(tag) => {
                Some(&tag.meta)
            }
            Token::Newline(meta) | Token::Comment(_, meta) | Token::EndOfInput(meta) => Some(meta),
            Token::Text(_) => None,
        }
    }

    /// The source range of the token.
    pub fn tsr(&self) -> Option<Span> {
        self.meta().and_then(|meta| meta.tsr)
    }

    /// Returns true if this is a start tag with the given name.
    #[cfg(test)]
    pub fn is_start(&self, name: &str) -> bool {
        matches!(self, Token::StartTag(tag) if tag.name == name)
    }

    /// Returns true if this is an end tag with the given name.
    pub fn is_end(&self, name: &str) -> bool {
        matches!(self, Token::EndTag(tag) if tag.name == name)
    }

    /// Returns true if this is a self-closing tag with the given name.
    #[cfg(test)]
    pub fn is_self_closing(&self, name: &str) -> bool {
        matches!(self, Token::SelfClosingTag(tag) if tag.name == name)
    }

    /// Returns a copy of the token with every source range removed,
    /// recursively. Used for content that did not come from the page
    /// source.
    #[must_use]
    pub fn without_tsr(&self) -> Self {
        self.map_tsr(&|_| None)
    }

    /// Copies the token, rewriting source ranges with `f`.
    fn map_tsr(&self, f: &dyn Fn(Span) -> Option<Span>) -> Self {
        let map_meta = |meta: &TokenMeta| TokenMeta {
            tsr: meta.tsr.and_then(f),
            ..meta.clone()
        };
        let map_value = |value: &AttrValue| match value {
            AttrValue::Text(text) => AttrValue::Text(text.clone()),
            AttrValue::Tokens(tokens) => {
                AttrValue::Tokens(tokens.iter().map(|t| t.map_tsr(f)).collect())
            }
        };
        let map_tag = |tag: &Tag| Tag {
            name: tag.name.clone(),
            attrs: tag
                .attrs
                .iter()
                .map(|attr| Attribute {
                    k: map_value(&attr.k),
                    v: map_value(&attr.v),
                    ksrc: attr.ksrc.clone(),
                    vsrc: attr.vsrc.clone(),
                })
                .collect(),
            meta: map_meta(&tag.meta),
        };
        match self {
            Token::StartTag(tag) => Token::StartTag(map_tag(tag)),
            Token::EndTag(tag) => Token::EndTag(map_tag(tag)),
            Token::SelfClosingTag(tag) => Token::SelfClosingTag(map_tag(tag)),
            Token::Text(text) => Token::Text(text.clone()),
            Token::Newline(meta) => Token::Newline(map_meta(meta)),
            Token::Comment(text, meta) => Token::Comment(text.clone(), map_meta(meta)),
            Token::EndOfInput(meta) => Token::EndOfInput(map_meta(meta)),
        }
    }
}

/// Flattens a token sequence to its text content. Newlines become `\n`;
/// tags and comments contribute nothing.
pub(crate) fn tokens_to_string(tokens: &[Token]) -> String {
    let mut out = String::new();
    for token in tokens {
        match token {
            Token::Text(text) => out += text,
            Token::Newline(_) => out.push('\n'),
            Token::SelfClosingTag(tag) if tag.name == "extension" || tag.name == "template" => {
                if let Some(src) = &tag.meta.src {
                    out += src;
                }
            }
            _ => {}
        }
    }
    out
}

/// Removes end-of-input tokens from a sequence.
pub(crate) fn strip_eof(tokens: &mut Vec<Token>) {
    tokens.retain(|token| !matches!(token, Token::EndOfInput(_)));
}

/// Merges adjacent text tokens.
pub(crate) fn merge_text(tokens: Vec<Token>) -> Vec<Token> {
    let mut out = Vec::with_capacity(tokens.len());
    for token in tokens {
        match (out.last_mut(), token) {
            (_, Token::Text(text)) if text.is_empty() => {}
            (Some(Token::Text(prev)), Token::Text(text)) => *prev += &text,
            (_, token) => out.push(token),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn without_tsr_copies() {
        let mut tag = Tag::new("b", vec![Attribute::new("class", "x")]);
        tag.meta.tsr = Some(Span::new(1, 4));
        let original = Token::StartTag(tag);
        let copy = original.without_tsr();
        assert_eq!(original.tsr(), Some(Span::new(1, 4)));
        assert_eq!(copy.tsr(), None);
        assert_eq!(copy.name(), Some("b"));
    }

    #[test]
    fn flatten() {
        let tokens = vec![
            Token::text("a"),
            Token::Newline(<_>::default()),
            Token::start("b", vec![]),
            Token::text("c"),
            Token::end("b"),
            Token::Comment("x".into(), <_>::default()),
        ];
        assert_eq!(tokens_to_string(&tokens), "a\nc");
        assert!(AttrValue::Tokens(tokens).needs_expansion());
        assert_eq!(
            AttrValue::from_tokens(vec![Token::text("a"), Token::text("b")]),
            AttrValue::Text("ab".into())
        );
    }

    #[test]
    fn merges_adjacent_text() {
        let merged = merge_text(vec![
            Token::text("a"),
            Token::text(""),
            Token::text("b"),
            Token::eof(),
        ]);
        assert_eq!(merged, vec![Token::text("ab"), Token::eof()]);
    }
}
