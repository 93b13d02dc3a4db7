//! Selective serialization.
//!
//! After an edited document has been diffed against a fresh parse of its
//! original source, only the elements carrying a diff mark are serialized.
//! Everything else is copied out of the source by range.

use super::{Result, WikitextSerializer, nodes};
use crate::{
    diff,
    dom::{Document, is_group_continuation},
    pipeline::Env,
    wikitext::Span,
};
use indextree::NodeId;
use std::collections::{HashMap, HashSet};

/// Which elements of a diffed document are copied from the source.
#[derive(Debug, Default)]
pub(super) struct Selection {
    /// Serialized elements, numbered in document order for log output.
    ids: HashMap<NodeId, usize>,
    /// Elements copied verbatim.
    verbatim: HashSet<NodeId>,
    /// Fostered elements whose source is covered by a verbatim table.
    skipped: HashSet<NodeId>,
}

impl Selection {
    /// Decides which elements of `doc` can be taken from `source`.
    pub fn new(doc: &Document, source: &str, revision: u64) -> Self {
        let mut selection = Self::default();
        selection.visit(doc, doc.body, source, revision);
        selection
    }

    fn visit(&mut self, doc: &Document, parent: NodeId, source: &str, revision: u64) {
        for child in doc.children(parent) {
            let Some(element) = doc.element(child) else {
                continue;
            };
            if is_group_continuation(doc, child) || diff::is_marker(doc, child) {
                continue;
            }

            if reusable_span(doc, child, source, revision).is_some() {
                self.verbatim.insert(child);
            } else if covered_by_table(doc, child, source, revision) {
                self.skipped.insert(child);
            } else {
                let next = self.ids.len() + 1;
                self.ids.insert(child, next);
                if !element.is_encapsulation_wrapper() {
                    self.visit(doc, child, source, revision);
                }
            }
        }
    }

    pub fn is_verbatim(&self, id: NodeId) -> bool {
        self.verbatim.contains(&id)
    }

    pub fn is_skipped(&self, id: NodeId) -> bool {
        self.skipped.contains(&id)
    }

    /// The log number of a serialized element.
    pub fn id_of(&self, id: NodeId) -> Option<usize> {
        self.ids.get(&id).copied()
    }
}

/// The source range of an unchanged element, if it can be copied.
fn reusable_span(doc: &Document, id: NodeId, source: &str, revision: u64) -> Option<Span> {
    if diff::has_current_diff_mark(doc, id, revision) {
        return None;
    }
    doc.element(id)?
        .dp
        .dsr
        .and_then(|dsr| dsr.span())
        .filter(|span| !span.is_empty() && source.get(span.into_range()).is_some())
}

/// Returns true if `id` is unchanged content fostered out of the table that
/// follows it, and that table is copied from a source range which also
/// covers `id`.
fn covered_by_table(doc: &Document, id: NodeId, source: &str, revision: u64) -> bool {
    let fostered = |id: NodeId| {
        doc.element(id).is_some_and(|e| {
            e.dp.fostered
                && !e.is_encapsulation_wrapper()
                && !diff::has_current_diff_mark(doc, id, revision)
        })
    };
    if !fostered(id) {
        return false;
    }

    let Some(table) = id
        .following_siblings(&doc.arena)
        .skip(1)
        .filter(|&sibling| doc.is_element(sibling))
        .find(|&sibling| !fostered(sibling))
    else {
        return false;
    };
    if !doc.is(table, "table") {
        return false;
    }
    let Some(table_span) = reusable_span(doc, table, source, revision) else {
        return false;
    };

    // Fostered nodes normally have no range of their own.
    doc.element(id)
        .and_then(|e| e.dp.dsr)
        .and_then(|dsr| dsr.span())
        .is_none_or(|span| table_span.start <= span.start && span.end <= table_span.end)
}

/// The selective wikitext serializer.
pub(crate) struct SelectiveSerializer<'a> {
    env: &'a Env,
}

impl<'a> SelectiveSerializer<'a> {
    pub fn new(env: &'a Env) -> Self {
        Self { env }
    }

    /// Serializes a diffed document, reusing `source` for every element
    /// which was not changed.
    pub fn serialize(&self, doc: &Document, source: &str) -> Result<String> {
        let revision = self.env.config.revision_id;
        let changed = core::iter::once(doc.body)
            .chain(doc.elements())
            .any(|id| diff::has_current_diff_mark(doc, id, revision));
        if !changed {
            log::debug!(target: "wiki_roundtrip::selser", "document unchanged");
            return Ok(source.to_string());
        }

        let selection = Selection::new(doc, source, revision);
        let chunks =
            WikitextSerializer::new(self.env).chunks(doc, Some(source), Some(&selection))?;

        let mut reused = 0;
        let mut out = String::new();
        for (text, node) in &chunks {
            match selection.id_of(*node) {
                Some(id) => log::trace!(target: "wiki_roundtrip::selser", "#{id} {text:?}"),
                None => {
                    if selection.is_verbatim(*node) {
                        reused += text.len();
                    }
                    log::trace!(
                        target: "wiki_roundtrip::selser",
                        "{} {text:?}",
                        nodes::describe(doc, *node)
                    );
                }
            }
            out.push_str(text);
        }

        log::debug!(
            target: "wiki_roundtrip::selser",
            "{} elements copied from source ({reused} bytes), {} serialized",
            selection.verbatim.len(),
            selection.ids.len()
        );
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::Configuration,
        dom::NodeData,
        pipeline::{MemorySource, Parser},
    };

    #[track_caller]
    fn elements(doc: &Document, parent: NodeId) -> Vec<NodeId> {
        doc.children(parent)
            .into_iter()
            .filter(|&id| doc.is_element(id))
            .collect()
    }

    #[test]
    fn only_the_edited_block_is_serialized() {
        let _ = env_logger::try_init();
        let source = "a\n\n*x\n*y\n\nc";
        let parser = Parser::new(Env::new(
            Configuration::default(),
            Box::new(MemorySource::default()),
        ));
        let base = parser.wt2html(source).unwrap();
        let mut doc = parser.wt2html(source).unwrap();

        let blocks = elements(&doc, doc.body);
        assert_eq!(blocks.len(), 3);
        let list = blocks[1];
        let items = elements(&doc, list);
        let edited = items[1];
        let text = doc.first_child(edited).unwrap();
        *doc.data_mut(text) = NodeData::Text("Y".into());

        let revision = Configuration::default().revision_id;
        assert!(diff::diff(&base, &mut doc, revision));
        let selection = Selection::new(&doc, source, revision);

        assert!(selection.id_of(list).is_some());
        assert!(selection.id_of(edited).is_some());
        assert!(!selection.is_verbatim(list));
        assert!(!selection.is_verbatim(edited));

        for id in [blocks[0], items[0], blocks[2]] {
            assert!(selection.is_verbatim(id), "{}", nodes::describe(&doc, id));
            assert_eq!(selection.id_of(id), None);
        }
        assert_eq!(selection.verbatim.len(), 3);
    }
}
