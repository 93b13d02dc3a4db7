//! Wikitext tokenizer.

pub(crate) use codemap::Span;
pub(crate) use peg::str::LineCol;
use crate::{config::SITE, tokens::Token};
use std::collections::HashSet;

mod codemap;
mod parser;
#[cfg(test)]
mod tests;

/// A tokenizer error.
pub type Error = peg::error::ParseError<LineCol>;

/// A wikitext tokenizer.
///
/// The tokenizer turns a wikitext string into a flat token stream with
/// source ranges attached to every syntactically anchored token, terminated
/// by an end-of-input token.
#[derive(Clone, Debug)]
pub(crate) struct Tokenizer {
    /// Lowercased names of extension tags whose bodies are captured raw.
    extension_tags: HashSet<String>,
}

impl Tokenizer {
    /// Creates a tokenizer recognising the given extension tags.
    pub fn new<I, S>(extension_tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            extension_tags: extension_tags
                .into_iter()
                .map(|name| name.as_ref().to_ascii_lowercase())
                .collect(),
        }
    }

    /// Tokenizes `source`.
    pub fn tokenize(&self, source: &str) -> Result<Vec<Token>, Error> {
        let mut tokens = parser::wikitext::start(source, source, self)?;
        tokens.push(Token::EndOfInput(crate::tokens::TokenMeta::with_tsr(
            source.len(),
            source.len(),
        )));
        Ok(tokens)
    }

    /// Returns true if `text` would be tokenized back into the same plain
    /// text. `sol` indicates whether the text starts at the beginning of a
    /// line.
    pub fn is_plain_text(&self, text: &str, sol: bool) -> bool {
        let sample = if sol {
            text.to_string()
        } else {
            format!("x{text}")
        };
        let Ok(tokens) = parser::wikitext::start(&sample, &sample, self) else {
            return false;
        };
        let mut flat = String::new();
        for token in &tokens {
            match token {
                Token::Text(t) => flat += t,
                Token::Newline(_) => flat.push('\n'),
                _ => return false,
            }
        }
        flat == sample
    }

    /// Returns true if `name` is a registered extension tag.
    fn is_extension_tag(&self, name: &str) -> bool {
        self.extension_tags.contains(&name.to_ascii_lowercase())
    }

    /// Returns true if `word` is a behavior switch.
    fn is_behavior_switch(word: &str) -> bool {
        SITE.behavior_switch_words
            .contains(word.to_ascii_lowercase().as_str())
    }

    /// Returns true if `prefix` is a URL protocol that can start an external
    /// link.
    fn is_protocol(prefix: &str) -> bool {
        SITE.protocols.contains(prefix.to_ascii_lowercase().as_str())
    }
}
