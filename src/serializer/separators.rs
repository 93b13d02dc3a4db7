//! Separator reconstruction.
//!
//! Whitespace and comments between two pieces of output are collected while
//! the tree is walked and only written out right before the next piece of
//! output. Every handler declares how many newlines its node needs before,
//! after, and around its children; the declarations of two neighbouring
//! nodes are combined into one [`Constraints`], and consecutive
//! declarations are merged.
//!
//! When the original source is available and both neighbours still know
//! their source ranges, the separator is copied out of the source. Otherwise
//! it is synthesized from the collected separator text so that it has
//! enough newlines, but not too many.

use super::{State, handlers::Handler, nodes};
use crate::{config::ZERO_WIDTH_ELEMENTS, diff, dom::Dsr};
use fancy_regex::Regex;
use indextree::NodeId;
use std::sync::LazyLock;

/// An HTML comment.
const COMMENT: &str = r"<!--(?:[^-]|-(?!->))*-->";

/// The log target for separator decisions.
const TARGET: &str = "wiki_roundtrip::wts::sep";

/// A newline requirement declared by a handler. Either bound may be
/// missing.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub(super) struct NlRange {
    pub min: Option<usize>,
    pub max: Option<usize>,
}

impl NlRange {
    /// No requirement.
    pub const ANY: Self = Self {
        min: None,
        max: None,
    };

    pub const fn new(min: usize, max: usize) -> Self {
        Self {
            min: Some(min),
            max: Some(max),
        }
    }

    pub const fn at_least(min: usize) -> Self {
        Self {
            min: Some(min),
            max: None,
        }
    }

    pub const fn at_most(max: usize) -> Self {
        Self {
            min: None,
            max: Some(max),
        }
    }
}

/// How the two nodes of a separator are related.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(super) enum SepType {
    /// The second node follows the first.
    Sibling,
    /// The second node is the first child of the first.
    ParentChild,
    /// The first node is the last child of the second.
    ChildParent,
}

/// Where a constraint came from.
#[derive(Clone, Copy, Debug)]
pub(super) struct ConstraintInfo {
    /// Whether the output was at the start of a line.
    pub on_sol: bool,
    pub sep_type: SepType,
    pub a: NodeId,
    pub b: NodeId,
}

/// The combined newline requirement of a separator.
#[derive(Clone, Debug, Default)]
pub(super) struct Constraints {
    /// The requirement of the first node.
    pub a: NlRange,
    /// The requirement of the second node.
    pub b: NlRange,
    pub min: Option<usize>,
    pub max: Option<usize>,
    pub info: Option<ConstraintInfo>,
}

impl Constraints {
    /// The constraint used when a separator is emitted with collected text
    /// but nothing was ever declared.
    fn none() -> Self {
        Self {
            max: Some(0),
            ..<_>::default()
        }
    }
}

/// The pending separator.
#[derive(Clone, Debug, Default)]
pub(super) struct Separator {
    /// The merged constraints declared since the last output.
    pub constraints: Option<Constraints>,
    /// Separator text collected from whitespace and comment nodes.
    pub src: Option<String>,
    /// The node whose output was written last.
    pub last_source_node: Option<NodeId>,
    /// The collected separator text at the time of the last output.
    pub last_source_sep: Option<String>,
}

/// Returns true if `text` consists only of whitespace and comments.
pub(super) fn is_valid_sep(text: &str) -> bool {
    static VALID: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(&format!(r"^(?:\s|{COMMENT})*$")).unwrap());
    VALID.is_match(text).unwrap_or(false)
}

/// Splits separator text into runs of ordinary text and runs of
/// comment-only lines or comments. The flag is true for the latter.
fn split_comments(sep: &str) -> Vec<(&str, bool)> {
    static SPLIT: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(&format!(
            r"(?:\n(?:[ \t]*?{COMMENT}[ \t]*?)+(?=\n))+|{COMMENT}"
        ))
        .unwrap()
    });

    let mut bits = Vec::new();
    let mut last = 0;
    for found in SPLIT.find_iter(sep).flatten() {
        bits.push((&sep[last..found.start()], false));
        bits.push((found.as_str(), true));
        last = found.end();
    }
    bits.push((&sep[last..], false));
    bits
}

/// Counts the newlines of a separator which are not on comment-only lines.
fn count_newlines(sep: &str) -> usize {
    split_comments(sep)
        .into_iter()
        .filter(|(_, is_comment)| !is_comment)
        .map(|(text, _)| text.matches('\n').count())
        .sum()
}

/// Combines the requirement of the node before a separator with the
/// requirement of the node after it. The second node wins a conflict.
pub(super) fn sep_nl_constraints(
    state: &State<'_>,
    a: NodeId,
    range_a: NlRange,
    b: NodeId,
    range_b: NlRange,
) -> Constraints {
    let doc = state.doc;
    let mut constraints = Constraints::default();

    // Nodes from the original page around a node without its own line keep
    // whatever separator they had.
    if doc.is_element(a)
        && doc.is_element(b)
        && !nodes::is_new_element(doc, a)
        && !nodes::is_new_element(doc, b)
        && (nodes::emits_sol_transparent_wt(doc, a) || nodes::emits_sol_transparent_wt(doc, b))
    {
        return constraints;
    }

    constraints.a = range_a;
    constraints.min = range_a.min;
    constraints.max = range_a.max;
    constraints.b = range_b;

    if let Some(b_min) = range_b.min {
        if let Some(max) = constraints.max
            && max < b_min
        {
            log::warn!(
                target: TARGET,
                "incompatible constraints: {} wants at most {max}, {} wants at least {b_min}",
                nodes::describe(doc, a),
                nodes::describe(doc, b)
            );
            constraints.min = Some(b_min);
            constraints.max = Some(b_min);
        } else {
            constraints.min = Some(constraints.min.unwrap_or(0).max(b_min));
        }
    }

    if let Some(b_max) = range_b.max {
        if let Some(min) = constraints.min
            && min > b_max
        {
            log::warn!(
                target: TARGET,
                "incompatible constraints: {} wants at least {min}, {} wants at most {b_max}",
                nodes::describe(doc, a),
                nodes::describe(doc, b)
            );
            constraints.min = Some(b_max);
            constraints.max = Some(b_max);
        } else {
            constraints.max = Some(constraints.max.map_or(b_max, |max| max.min(b_max)));
        }
    }

    // More than two newlines would start a new paragraph.
    if constraints.max.is_none() {
        constraints.max = Some(2);
    }

    constraints
}

/// Merges a newly declared constraint into a pending one. The newer
/// constraint wins a conflict.
pub(super) fn merge_constraints(old: &Constraints, new: &Constraints) -> Constraints {
    let mut min = old.min.unwrap_or(0).max(new.min.unwrap_or(0));
    let max = old.max.unwrap_or(2).min(new.max.unwrap_or(2));
    let mut merged = Constraints {
        a: old.a,
        b: new.b,
        min: Some(min),
        max: Some(max),
        info: None,
    };

    if min > max {
        if !new.max.is_some_and(|new_max| new_max > min)
            && let Some(new_min) = new.min.filter(|&new_min| new_min > 0 && new_min < min)
        {
            min = new_min;
        }
        merged.min = Some(min);
        merged.max = Some(min);
        log::warn!(
            target: TARGET,
            "incompatible constraints (merge): {:?}..{:?} and {:?}..{:?}; using {min}",
            old.min,
            old.max,
            new.min,
            new.max
        );
    }

    merged
}

impl State<'_> {
    /// Collects a whitespace-only text node or a comment into the pending
    /// separator. Returns true if the node was consumed.
    ///
    /// Other text nodes give up their leading newlines to the separator
    /// but are still serialized.
    pub(super) fn handle_separator_text(&mut self, node: NodeId) -> bool {
        if let Some(text) = self.doc.text(node) {
            if text.chars().all(char::is_whitespace) {
                self.sep.src.get_or_insert_default().push_str(text);
                if text.contains('\n') {
                    self.on_sol = true;
                }
                return true;
            }

            let after_spaces = text.trim_start_matches([' ', '\t']);
            if after_spaces.starts_with('\n') {
                let spaces = text.len() - after_spaces.len();
                let newlines = after_spaces.len() - after_spaces.trim_start_matches('\n').len();
                self.sep
                    .src
                    .get_or_insert_default()
                    .push_str(&text[..spaces + newlines]);
            }
            false
        } else if let Some(comment) = nodes::comment(self.doc, node) {
            let sep = self.sep.src.get_or_insert_default();
            sep.push_str("<!--");
            sep.push_str(comment);
            sep.push_str("-->");
            true
        } else {
            false
        }
    }

    /// Declares the newline requirement between `a` and `b` and merges it
    /// into the pending separator.
    pub(super) fn update_separator_constraints(&mut self, a: NodeId, b: NodeId) {
        let doc = self.doc;
        let handler_a = Handler::for_node(self, a);
        let handler_b = Handler::for_node(self, b);

        let (sep_type, constraints) = if doc.next_sibling(a) == Some(b) {
            let range_a = handler_a.after(self, a, b);
            let range_b = handler_b.before(self, b, a);
            (SepType::Sibling, sep_nl_constraints(self, a, range_a, b, range_b))
        } else if doc.parent(b) == Some(a) {
            let range_a = handler_a.first_child(self, a, b);
            let range_b = handler_b.before(self, b, a);
            (SepType::ParentChild, sep_nl_constraints(self, a, range_a, b, range_b))
        } else if doc.parent(a) == Some(b) {
            let range_a = handler_a.after(self, a, b);
            let range_b = handler_b.last_child(self, b, a);
            (SepType::ChildParent, sep_nl_constraints(self, a, range_a, b, range_b))
        } else {
            let range_a = handler_a.after(self, a, b);
            let range_b = handler_b.before(self, b, a);
            (SepType::Sibling, sep_nl_constraints(self, a, range_a, b, range_b))
        };

        log::trace!(
            target: TARGET,
            "constraint | {sep_type:?} | {} , {} | {:?}..{:?}",
            nodes::describe(doc, a),
            nodes::describe(doc, b),
            constraints.min,
            constraints.max
        );

        let mut merged = match &self.sep.constraints {
            Some(old) => merge_constraints(old, &constraints),
            None => constraints,
        };
        merged.info = Some(ConstraintInfo {
            on_sol: self.on_sol,
            sep_type,
            a,
            b,
        });
        self.sep.constraints = Some(merged);
    }

    /// Synthesizes a separator from collected separator text so that it
    /// satisfies the newline constraints.
    pub(super) fn make_separator(&self, sep: &str, constraints: &Constraints) -> String {
        let newlines = count_newlines(sep);
        let mut min = constraints.min.unwrap_or(0);

        // The start of the output is already the start of a line.
        if self.at_start_of_output && constraints.a.min.unwrap_or(0) == 0 && min > 0 {
            min -= 1;
        }

        let out = if min > 0 && newlines < min {
            let missing = "\n".repeat(min - newlines);
            // Newlines demanded by a parent go in front of separator text
            // which was taken from its first child.
            let prepend = constraints.info.is_some_and(|info| {
                info.sep_type == SepType::ParentChild
                    && !nodes::first_non_sep_child(self.doc, info.a)
                        .is_some_and(|child| self.doc.is_element(child))
            });
            if prepend {
                missing + sep
            } else {
                format!("{sep}{missing}")
            }
        } else if let Some(max) = constraints.max
            && newlines > max
        {
            strip_newlines(sep, newlines, max)
        } else {
            sep.to_string()
        };

        log::trace!(
            target: TARGET,
            "make-new   | {out:?}, {sep:?}, {min}, {newlines}, {:?}..{:?}",
            constraints.min,
            constraints.max
        );

        out
    }

    /// Removes leading spaces from the last line of a separator if they
    /// would end up in front of content that cannot start with spaces.
    fn make_sep_indent_pre_safe(&self, sep: String, constraints: &Constraints) -> String {
        static AFTER_NEWLINE: LazyLock<Regex> = LazyLock::new(|| {
            Regex::new(&format!(r"\n+ +(?:{COMMENT}[^\n]*)?$")).unwrap()
        });
        static TRAILING: LazyLock<Regex> =
            LazyLock::new(|| Regex::new(&format!(r"( +)((?:{COMMENT}[^\n]*)?)$")).unwrap());

        let Some(info) = constraints.info else {
            return sep;
        };

        let risky = AFTER_NEWLINE.is_match(&sep).unwrap_or(false)
            || (info.on_sol && TRAILING.is_match(&sep).unwrap_or(false));
        if !risky || self.is_indent_pre_safe(info) {
            return sep;
        }

        match TRAILING.captures(&sep) {
            Ok(Some(captures)) => {
                let (Some(whole), Some(rest)) = (captures.get(0), captures.get(2)) else {
                    return sep;
                };
                let out = format!("{}{}", &sep[..whole.start()], rest.as_str());
                log::trace!(target: TARGET, "ipre-safe  | {out:?}");
                out
            }
            _ => sep,
        }
    }

    /// Returns true if spaces at the start of the line before the second
    /// node of a separator are harmless.
    fn is_indent_pre_safe(&self, info: ConstraintInfo) -> bool {
        let doc = self.doc;
        if nodes::preceding_space_is_harmless(doc, info.b) {
            return true;
        }

        if info.sep_type == SepType::Sibling || info.a == doc.body {
            let mut b = Some(info.b);
            while let Some(node) = b
                && nodes::emits_sol_transparent_wt(doc, node)
            {
                b = doc.next_sibling(node);
            }
            return b.is_none_or(|b| {
                nodes::preceding_space_is_harmless(doc, b)
                    || doc
                        .text(b)
                        .is_some_and(|text| text.starts_with([' ', '\t']))
            });
        }

        if info.sep_type == SepType::ParentChild {
            let mut a = info.a;
            while doc
                .name(a)
                .is_some_and(|name| ZERO_WIDTH_ELEMENTS.contains(name))
                && let Some(parent) = doc.parent(a)
            {
                a = parent;
            }
            if nodes::is_list_item(doc, a) {
                return true;
            }
            return core::iter::once(a)
                .chain(doc.ancestors(a))
                .take_while(|&node| node != doc.root)
                .any(|node| {
                    doc.element(node)
                        .is_some_and(|e| e.is_html_syntax() && nodes::is_block(doc, node))
                });
        }

        false
    }

    /// Writes the pending separator, if there is one, in front of the output
    /// for `node`.
    pub(super) fn emit_separator(&mut self, node: NodeId) {
        let usable = (self.rt_testing || self.selection.is_some()) && !self.in_modified_content;
        let from_source = match (usable, self.source, self.sep.last_source_node) {
            (true, Some(source), Some(prev)) if prev != node => {
                self.source_separator(source, prev, node)
            }
            _ => None,
        };

        log::trace!(
            target: TARGET,
            "maybe-sep  | prev: {}, node: {}, sep: {from_source:?}, collected: {:?}",
            self.sep
                .last_source_node
                .map_or_else(|| "--none--".into(), |prev| nodes::describe(self.doc, prev)),
            nodes::describe(self.doc, node),
            self.sep.src
        );

        let collected = self.sep.src.as_deref().filter(|src| !src.is_empty());
        let constraints = self
            .sep
            .constraints
            .clone()
            .unwrap_or_else(Constraints::none);

        let sep = match from_source {
            Some(sep) if is_valid_sep(&sep) && collected.is_none_or(|src| src == sep) => Some(sep),
            _ if self.sep.constraints.is_some() || collected.is_some() => {
                Some(self.make_separator(collected.unwrap_or_default(), &constraints))
            }
            _ => None,
        };

        if let Some(sep) = sep {
            let sep = self.make_sep_indent_pre_safe(sep, &constraints);
            self.emit_sep(&sep, node);
        }
    }

    /// Copies the separator between the last output node and `node` out of
    /// the original source, if their ranges allow it.
    fn source_separator(&self, source: &str, prev: NodeId, node: NodeId) -> Option<String> {
        let doc = self.doc;
        let dsr_of = |id: NodeId| doc.element(id).and_then(|e| e.dp.dsr);

        let dsr_a = if doc.is_element(prev) {
            dsr_of(prev)
        } else if let Some(parent) = doc.parent(prev)
            && doc.next_sibling(prev).is_none()
            && parent != node
            && let Some(dsr) = dsr_of(parent)
            && dsr.close_width == Some(0)
        {
            // The last child of a zero-width element, like text in a
            // paragraph.
            Some(dsr)
        } else if let Some(before) = doc.previous_sibling(prev)
            && let Some(dsr) = dsr_of(before)
            && (self.rt_testing
                || (self.selection.is_some()
                    && !doc
                        .parent(node)
                        .is_some_and(|p| diff::direct_children_changed(doc, p, self.revision))))
        {
            // Extrapolate from the element in front of the text.
            let len = nodes::source_len(doc, prev);
            dsr.end.map(|end| Dsr::new(end, end + len, 0, 0))
        } else {
            None
        }?;

        let dsr_b = if !doc.is_element(node) {
            // A child of a zero-width element preceded only by separator
            // nodes starts where its parent does.
            let parent = doc.parent(node)?;
            let dsr = dsr_of(parent)?;
            if parent == prev || dsr.open_width != Some(0) {
                return None;
            }
            let len = preceding_separator_len(self, node)?;
            let mut dsr = dsr;
            if len > 0 {
                dsr.start = dsr.start.map(|start| start + len);
            }
            dsr
        } else {
            let mut target = node;
            if doc.parent(prev) == Some(node) {
                // The parent of the last child may have no usable range;
                // the nearest ancestor that ends in the same place does.
                while doc.next_sibling(target).is_none()
                    && target != doc.body
                    && !dsr_of(target).is_some_and(|d| d.start.is_some() && d.end.is_some())
                {
                    target = doc.parent(target)?;
                }
            }
            dsr_of(target)?
        };

        let (a_start, a_end) = dsr_a.start.zip(dsr_a.end)?;
        let (b_start, b_end) = dsr_b.start.zip(dsr_b.end)?;
        let slice = |start: usize, end: usize| source.get(start..end).map(str::to_string);

        let sep = if a_start <= b_start {
            if b_end <= a_end {
                if a_start == b_start && a_end == b_end {
                    Some(String::new())
                } else {
                    // From parent to child.
                    dsr_a.open_width.and_then(|w| slice(a_start + w, b_start))
                }
            } else if a_end <= b_start {
                slice(a_end, b_start)
            } else {
                // From child to parent.
                dsr_b
                    .close_width
                    .and_then(|w| slice(a_end, b_end.checked_sub(w)?))
            }
        } else if a_end <= b_end {
            dsr_b
                .close_width
                .and_then(|w| slice(a_end, b_end.checked_sub(w)?))
        } else {
            log::warn!(
                target: TARGET,
                "dsr backwards: {} [{a_start}, {a_end}] before {} [{b_start}, {b_end}]",
                nodes::describe(doc, prev),
                nodes::describe(doc, node)
            );
            None
        }?;

        Some(match &self.sep.last_source_sep {
            Some(last) => format!("{last}{sep}"),
            None => sep,
        })
    }
}

/// The source length of the whitespace and comments in front of `node`,
/// including `node` itself if it is one of them. Returns `None` if there is
/// any other content in front of it.
fn preceding_separator_len(state: &State<'_>, node: NodeId) -> Option<usize> {
    let doc = state.doc;
    let mut len = 0;
    let mut current = Some(node);
    while let Some(id) = current {
        if nodes::is_iew(doc, id) || doc.is_comment(id) {
            len += nodes::source_len(doc, id);
        } else if id != node {
            return None;
        }
        current = doc.previous_sibling(id);
    }
    Some(len)
}

/// Removes newlines outside of comments from the end of a separator until
/// only `max` are left.
fn strip_newlines(sep: &str, count: usize, max: usize) -> String {
    let mut bits = split_comments(sep)
        .into_iter()
        .map(|(text, is_comment)| (text.to_string(), is_comment))
        .collect::<Vec<_>>();
    let mut kept = Vec::new();
    let mut count = count;

    'outer: while count > max {
        let Some(mut bit) = bits.pop() else {
            break;
        };
        while bit.1 {
            kept.push(bit);
            match bits.pop() {
                Some(next) => bit = next,
                None => break 'outer,
            }
        }
        while count > max
            && let Some(at) = bit.0.find('\n')
        {
            bit.0.remove(at);
            count -= 1;
        }
        kept.push(bit);
    }

    kept.reverse();
    bits.into_iter()
        .chain(kept)
        .map(|(text, _)| text)
        .collect()
}
