//! Escaping of text which would otherwise be read back as markup.

use super::{State, nodes};
use indextree::NodeId;
use regex::Regex;
use std::sync::LazyLock;

/// Returns `text` wrapped in `<nowiki>` if the tokenizer would not read it
/// back as the same plain text in the current context.
pub(super) fn escape_text(state: &State<'_>, text: &str, node: NodeId) -> String {
    if text.is_empty() || !needs_escaping(state, text, node) {
        return text.to_string();
    }

    log::trace!(target: "wiki_roundtrip::wts", "escaping {text:?}");
    format!(
        "<nowiki>{}</nowiki>",
        text.replace("</nowiki>", "&lt;/nowiki&gt;")
    )
}

fn needs_escaping(state: &State<'_>, text: &str, node: NodeId) -> bool {
    static MARKUP: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?:^|\n) +\S|[<>\[\]+|'!=#*:;~{}-]|__[^_]*__").unwrap()
    });

    if !MARKUP.is_match(text) {
        return false;
    }

    let doc = state.doc;
    let within = |names: &[&str]| {
        doc.ancestors(node)
            .take_while(|&id| id != doc.body)
            .any(|id| doc.name(id).is_some_and(|name| names.contains(&name)))
    };

    if (text.starts_with('=') || text.ends_with('='))
        && within(&["h1", "h2", "h3", "h4", "h5", "h6"])
    {
        return true;
    }

    if let Some(parent) = doc.parent(node)
        && nodes::is_list_item(doc, parent)
        && nodes::first_non_sep_child(doc, parent) == Some(node)
        && text.starts_with(['*', '#', ':', ';'])
    {
        return true;
    }

    if text.contains(':') && within(&["dt"]) {
        return true;
    }

    if state.in_link && text.contains(']') {
        return true;
    }

    !state.env.tokenizer.is_plain_text(text, state.on_sol)
}
