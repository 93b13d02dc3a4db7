//! Converter configuration.
//!
//! Wikitext documents are not self-encapsulated and cannot be parsed without
//! out-of-band configuration data. The site-specific part lives in a static
//! [`ConfigurationSource`]; the per-run options live in [`Configuration`],
//! which can be loaded from a JSON file.

use crate::title::Namespace;
use phf::Set;
use serde::Deserialize;
use std::path::Path;

/// Registered title namespaces. The main namespace must come first.
pub(crate) static NAMESPACES: &[Namespace] = &[
    Namespace {
        id: Namespace::MAIN,
        name: "",
        aliases: &[],
    },
    Namespace {
        id: 2,
        name: "User",
        aliases: &[],
    },
    Namespace {
        id: 4,
        name: "Project",
        aliases: &["WP"],
    },
    Namespace {
        id: 6,
        name: "File",
        aliases: &["Image"],
    },
    Namespace {
        id: Namespace::TEMPLATE,
        name: "Template",
        aliases: &["T"],
    },
    Namespace {
        id: 14,
        name: "Category",
        aliases: &[],
    },
];

/// Site specific configuration of a wiki.
#[derive(Debug)]
pub(crate) struct ConfigurationSource {
    /// Words that can appear between `__` and `__`, lowercased.
    pub behavior_switch_words: Set<&'static str>,

    /// Protocols that can be used for external links, lowercased.
    pub protocols: Set<&'static str>,
}

/// The static source configuration for this installation.
pub(crate) static SITE: ConfigurationSource = ConfigurationSource {
    behavior_switch_words: phf::phf_set! {
        "notoc", "nogallery", "forcetoc", "toc", "noeditsection", "newsectionlink",
        "nonewsectionlink", "hiddencat", "index", "noindex", "staticredirect",
        "notitleconvert", "nocontentconvert", "disambiguation"
    },
    protocols: phf::phf_set! {
        "http://", "https://", "ftp://", "ftps://", "irc://", "ircs://", "mailto:",
        "news:", "//"
    },
};

/// HTML elements that are block-level for the purposes of paragraph
/// wrapping and serialization.
pub(crate) static BLOCK_ELEMENTS: Set<&'static str> = phf::phf_set! {
    "div", "p", "table", "tbody", "thead", "tfoot", "caption", "th", "tr", "td",
    "ul", "ol", "li", "dl", "dt", "dd", "h1", "h2", "h3", "h4", "h5", "h6", "hr",
    "pre", "blockquote", "center", "figure"
};

/// HTML elements which never have content.
pub(crate) static VOID_ELEMENTS: Set<&'static str> = phf::phf_set! {
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta",
    "param", "source", "track", "wbr"
};

/// Table elements that establish foster-parenting context.
pub(crate) static TABLE_ELEMENTS: Set<&'static str> = phf::phf_set! {
    "table", "tbody", "thead", "tfoot", "tr"
};

/// Elements whose wikitext form has no markup of its own.
pub(crate) static ZERO_WIDTH_ELEMENTS: Set<&'static str> = phf::phf_set! {
    "p", "ul", "ol", "dl", "meta", "tbody"
};

/// A configuration error.
#[derive(Debug, thiserror::Error)]
pub(crate) enum Error {
    /// The configuration file could not be read.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    /// The configuration file was not valid JSON.
    #[error("invalid configuration: {0}")]
    Json(#[from] serde_json::Error),
}

/// Per-run converter options.
#[derive(Clone, Debug, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub(crate) struct Configuration {
    /// The maximum template expansion depth.
    pub max_depth: usize,
    /// Hand template expansion to an external preprocessor instead of
    /// expanding natively.
    ///
    /// The expansion loop and depth guard is not applied on this path.
    pub bypass_preprocessor: bool,
    /// Whether serialization may reuse original separators even without a
    /// DOM diff, because the DOM is known to be unedited.
    pub rt_testing: bool,
    /// Whether top-level template output is wrapped with transclusion
    /// markers so it can be serialized back to the invocation.
    pub wrap_templates: bool,
    /// The name of the page being converted.
    pub page_name: String,
    /// The base revision ID that diff marks are tagged with.
    pub revision_id: u64,
    /// Enabled trace channels.
    pub trace: Vec<String>,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            max_depth: 40,
            bypass_preprocessor: false,
            rt_testing: false,
            wrap_templates: true,
            page_name: "Main Page".into(),
            revision_id: 0,
            trace: Vec::new(),
        }
    }
}

impl Configuration {
    /// Loads a configuration from a JSON file. Missing keys keep their
    /// defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let config: Configuration = serde_json::from_str(r#"{"maxDepth": 3}"#).unwrap();
        assert_eq!(config.max_depth, 3);
        assert!(config.wrap_templates);
        assert!(!config.bypass_preprocessor);
    }

    #[test]
    fn default_depth() {
        assert_eq!(Configuration::default().max_depth, 40);
    }
}
