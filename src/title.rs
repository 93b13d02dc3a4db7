//! Normalisation of page titles used as transclusion targets and link
//! destinations.

use crate::config::NAMESPACES;
use html_escape::decode_html_entities;
use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use std::borrow::Cow;

/// Characters that are escaped when a title is turned into a relative href.
const HREF_ESCAPES: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'[')
    .add(b']')
    .add(b'{')
    .add(b'|')
    .add(b'}');

/// A page namespace.
#[derive(Debug, Eq, PartialEq)]
pub(crate) struct Namespace {
    /// The namespace ID.
    pub id: i32,
    /// The display name of the namespace.
    pub name: &'static str,
    /// Alternative names for the namespace.
    pub aliases: &'static [&'static str],
}

impl Namespace {
    /// The main namespace ID.
    pub const MAIN: i32 = 0;
    /// The template namespace ID.
    pub const TEMPLATE: i32 = 10;

    /// Finds the namespace with the given numeric ID.
    pub fn find_by_id(id: i32) -> Option<&'static Self> {
        NAMESPACES.iter().find(|ns| ns.id == id)
    }

    /// Finds the namespace with the given case-insensitive name or alias.
    pub fn find_by_name(name: &str) -> Option<&'static Self> {
        let name = name.replace('_', " ");
        NAMESPACES.iter().find(|ns| {
            ns.name.eq_ignore_ascii_case(&name)
                || ns.aliases.iter().any(|alias| alias.eq_ignore_ascii_case(&name))
        })
    }
}

/// A normalised title.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub(crate) struct Title {
    /// The namespace ID of the title.
    namespace: i32,
    /// The full, normalised title text, including the namespace prefix.
    text: String,
}

impl Title {
    /// Creates a new title from user text. Text without an explicit namespace
    /// prefix is placed in `default_ns`. A leading `:` forces the main
    /// namespace.
    pub fn new(text: &str, default_ns: i32) -> Self {
        let text = normalize(text);
        let (forced_main, text) = match text.strip_prefix(':') {
            Some(rest) => (true, rest.trim_start()),
            None => (false, &*text),
        };

        let (ns, local) = match text.split_once(':') {
            Some((prefix, rest)) => match Namespace::find_by_name(prefix.trim_end()) {
                Some(ns) => (ns, rest.trim_start()),
                None => (main_or(forced_main, default_ns), text),
            },
            None => (main_or(forced_main, default_ns), text),
        };

        let mut full = String::with_capacity(ns.name.len() + local.len() + 1);
        if !ns.name.is_empty() {
            full += ns.name;
            full.push(':');
        }
        let mut chars = local.chars();
        if let Some(first) = chars.next() {
            full.extend(first.to_uppercase());
            full += chars.as_str();
        }

        Self {
            namespace: ns.id,
            text: full,
        }
    }

    /// The namespace ID.
    pub fn namespace(&self) -> i32 {
        self.namespace
    }

    /// The full title text, like `Template:Foo bar`.
    pub fn key(&self) -> &str {
        &self.text
    }

    /// The title in the relative href form used by link targets, like
    /// `./Template:Foo_bar`.
    pub fn href(&self) -> String {
        let underscored = self.text.replace(' ', "_");
        format!("./{}", utf8_percent_encode(&underscored, HREF_ESCAPES))
    }
}

impl core::fmt::Display for Title {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.text)
    }
}

/// Returns the namespace used for a title without a recognised prefix.
fn main_or(forced_main: bool, default_ns: i32) -> &'static Namespace {
    let id = if forced_main { Namespace::MAIN } else { default_ns };
    Namespace::find_by_id(id)
        .or_else(|| Namespace::find_by_id(Namespace::MAIN))
        .unwrap_or(&NAMESPACES[0])
}

/// Normalises title text by decoding HTML entities, converting underscores
/// and whitespace runs to a single space, and trimming both ends.
pub(crate) fn normalize(text: &str) -> Cow<'_, str> {
    let decoded = decode_html_entities(text);
    let needs_work = decoded
        .char_indices()
        .any(|(index, c)| c != ' ' && spacelike(c) || c == ' ' && decoded[index + 1..].starts_with(spacelike));
    if !needs_work {
        return match decoded {
            Cow::Borrowed(b) => Cow::Borrowed(b.trim_matches(spacelike)),
            Cow::Owned(o) => Cow::Owned(o.trim_matches(spacelike).to_string()),
        };
    }

    let mut out = String::with_capacity(decoded.len());
    let mut in_space = false;
    for c in decoded.trim_matches(spacelike).chars() {
        if spacelike(c) {
            in_space = true;
        } else {
            if in_space {
                out.push(' ');
                in_space = false;
            }
            out.push(c);
        }
    }
    Cow::Owned(out)
}

/// Returns true if the character `c` is treated like a space in title text.
fn spacelike(c: char) -> bool {
    c == '_' || c.is_whitespace() || ('\u{200e}'..='\u{200f}').contains(&c)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize() {
        assert_eq!(super::normalize("A b"), Cow::Borrowed("A b"));
        assert_eq!(super::normalize("A_b"), "A b");
        assert_eq!(super::normalize("A__  __b"), "A b");
        assert_eq!(super::normalize("   A b   "), Cow::Borrowed("A b"));
        assert_eq!(super::normalize("\u{200e}A b"), "A b");
    }

    #[test]
    fn template_namespace() {
        let title = Title::new("foo bar", Namespace::TEMPLATE);
        assert_eq!(title.key(), "Template:Foo bar");
        assert_eq!(title.namespace(), Namespace::TEMPLATE);
        assert_eq!(title.href(), "./Template:Foo_bar");

        let title = Title::new("template:echo", Namespace::TEMPLATE);
        assert_eq!(title.key(), "Template:Echo");

        let title = Title::new(":main page", Namespace::TEMPLATE);
        assert_eq!(title.key(), "Main page");
        assert_eq!(title.namespace(), Namespace::MAIN);
    }

    #[test]
    fn unknown_prefix_stays_in_default() {
        let title = Title::new("Foo:bar", Namespace::TEMPLATE);
        assert_eq!(title.key(), "Template:Foo:bar");
    }
}
