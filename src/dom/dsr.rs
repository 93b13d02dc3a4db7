//! Source range computation.
//!
//! Walks the document left to right with a cursor into the page source.
//! Text advances the cursor by its length and comments by their length plus
//! their delimiters. An element with a start tag range moves the cursor to
//! that range; the end tag range, or the end of the children when the end
//! tag had no markup, gives the end of the element. Inside template output
//! the cursor is unknown until the end marker of the transclusion, whose
//! range puts it back in sync.

use super::{Document, Dsr, NodeData};
use crate::config::ZERO_WIDTH_ELEMENTS;
use indextree::NodeId;

/// Computes the source range of every node whose position can be known.
pub(super) fn compute(doc: &mut Document, source: &str) {
    let end = children(doc, doc.body, Some(0));
    if end != Some(source.len()) {
        log::debug!(
            target: "wiki_roundtrip::dsr",
            "children end at {end:?}, source is {} bytes",
            source.len()
        );
    }
    if let Some(body) = doc.element_mut(doc.body) {
        body.dp.dsr = Some(Dsr::new(0, source.len(), 0, 0));
    }
}

/// Computes the ranges of the children of `parent`, starting at `cursor`,
/// and returns the position after the last child.
fn children(doc: &mut Document, parent: NodeId, mut cursor: Option<usize>) -> Option<usize> {
    // The about group of encapsulated content being skipped over.
    let mut skip_about: Option<String> = None;

    for child in doc.children(parent) {
        let element = match doc.data(child) {
            NodeData::Text(text) => {
                cursor = cursor.map(|c| c + text.len());
                continue;
            }
            NodeData::Comment(text) => {
                cursor = cursor.map(|c| c + text.len() + 7);
                continue;
            }
            NodeData::Document => continue,
            NodeData::Element(element) => element,
        };

        if let Some(about) = &skip_about {
            if element.about() == Some(about.as_str()) {
                continue;
            }
            skip_about = None;
        }

        if element.dp.fostered {
            // Fostered content was moved out of the table which contains
            // its source.
            log::trace!(target: "wiki_roundtrip::dsr", "skipping fostered <{}>", element.name);
            continue;
        }

        if element.name == "meta" && element.has_typeof("mw:Transclusion") {
            log::trace!(target: "wiki_roundtrip::dsr", "template start {:?}", element.dp.tsr);
            cursor = None;
            continue;
        }

        if element.name == "meta" && element.has_typeof("mw:Transclusion/End") {
            if let Some(tsr) = element.dp.tsr {
                cursor = Some(tsr.end);
            }
            continue;
        }

        if element.is_encapsulation_wrapper()
            && let Some(tsr) = element.dp.tsr
        {
            check_order(cursor, tsr.start, &element.name);
            skip_about = element.about().map(str::to_string);
            if let Some(element) = doc.element_mut(child) {
                element.dp.dsr = Some(Dsr {
                    start: Some(tsr.start),
                    end: Some(tsr.end),
                    open_width: None,
                    close_width: None,
                });
            }
            cursor = Some(tsr.end);
            continue;
        }

        cursor = self::element(doc, child, cursor);
    }

    cursor
}

/// Logs a start position which is before the cursor.
fn check_order(cursor: Option<usize>, start: usize, name: &str) {
    if let Some(cursor) = cursor
        && start < cursor
    {
        log::warn!(
            target: "wiki_roundtrip::dsr",
            "dsr backwards: <{name}> starts at {start}, before {cursor}"
        );
    }
}

/// Computes the range of one element and returns the position after it.
fn element(doc: &mut Document, id: NodeId, cursor: Option<usize>) -> Option<usize> {
    let Some(element) = doc.element(id) else {
        return cursor;
    };
    let name = element.name.clone();
    let dp = &element.dp;
    let zero_width = ZERO_WIDTH_ELEMENTS.contains(name.as_str()) && !element.is_html_syntax();

    let (start, open_width) = match dp.tsr {
        Some(tsr) => {
            check_order(cursor, tsr.start, &name);
            (Some(tsr.start), Some(tsr.len()))
        }
        None if zero_width || dp.auto_inserted_start => (cursor, Some(0)),
        None => (cursor, None),
    };

    let is_leaf = dp.self_close
        || crate::config::VOID_ELEMENTS.contains(name.as_str())
        || doc.first_child(id).is_none() && dp.tmp.end_tsr.is_none();
    let dsr = if is_leaf {
        let end = start.zip(open_width).map(|(s, w)| s + w);
        Dsr {
            start,
            end,
            open_width,
            close_width: Some(0),
        }
    } else {
        let end_tsr = dp.tmp.end_tsr;
        let no_end_markup = zero_width || dp.auto_inserted_end || !element.is_html_syntax();
        let content_start = start.map(|s| s + open_width.unwrap_or(0));

        let content_end = children(doc, id, content_start);
        match end_tsr {
            Some(end_tsr) => {
                if content_end.is_some_and(|end| end != end_tsr.start) {
                    log::debug!(
                        target: "wiki_roundtrip::dsr",
                        "<{name}> content ends at {content_end:?}, end tag at {end_tsr:?}"
                    );
                }
                Dsr {
                    start,
                    end: Some(end_tsr.end),
                    open_width,
                    close_width: Some(end_tsr.len()),
                }
            }
            None => Dsr {
                start,
                end: content_end,
                open_width,
                close_width: no_end_markup.then_some(0),
            },
        }
    };

    log::trace!(target: "wiki_roundtrip::dsr", "<{name}> {dsr:?}");
    let end = dsr.end;
    if let Some(element) = doc.element_mut(id) {
        element.dp.dsr = Some(dsr);
    }
    end
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::{Element, builder};
    use crate::tokens::{Stx, Tag, Token};
    use crate::wikitext::Span;

    fn tag(name: &str, start: usize, end: usize) -> Tag {
        Tag::new(name, vec![]).with_tsr(Some(Span::new(start, end)))
    }

    fn dsr_of(doc: &Document, id: NodeId) -> Dsr {
        doc.element(id).unwrap().dp.dsr.unwrap()
    }

    #[test]
    fn heading_and_paragraph() {
        let _ = env_logger::try_init();
        // "== h ==\nb"
        let source = "== h ==\nb";
        let mut doc = builder::build(vec![
            Token::StartTag(tag("h2", 0, 2)),
            Token::text(" h "),
            Token::EndTag(tag("h2", 5, 7)),
            Token::Newline(<_>::default()),
            Token::start("p", vec![]),
            Token::text("b"),
            Token::end("p"),
        ]);
        compute(&mut doc, source);
        let body = doc.children(doc.body);
        assert_eq!(dsr_of(&doc, body[0]), Dsr::new(0, 7, 2, 2));
        assert_eq!(dsr_of(&doc, body[2]), Dsr::new(8, 9, 0, 0));
        assert_eq!(dsr_of(&doc, doc.body), Dsr::new(0, 9, 0, 0));
    }

    #[test]
    fn html_element_without_end_tag() {
        let source = "<b>x";
        let mut start = tag("b", 0, 3);
        start.meta.stx = Some(Stx::Html);
        let mut doc = builder::build(vec![Token::StartTag(start), Token::text("x")]);
        compute(&mut doc, source);
        let b = doc.children(doc.body)[0];
        assert_eq!(dsr_of(&doc, b), Dsr::new(0, 4, 3, 0));
    }

    #[test]
    fn template_output_is_skipped() {
        // "a{{x}}b" where the template produced "zzz"
        let source = "a{{x}}b";
        let mut meta = Tag::new("meta", vec![]).with_tsr(Some(Span::new(1, 6)));
        meta.attrs.push(crate::tokens::Attribute::new("typeof", "mw:Transclusion"));
        let mut end = Tag::new("meta", vec![]).with_tsr(Some(Span::new(6, 6)));
        end.attrs.push(crate::tokens::Attribute::new("typeof", "mw:Transclusion/End"));
        let mut doc = builder::build(vec![
            Token::start("p", vec![]),
            Token::text("a"),
            Token::SelfClosingTag(meta),
            Token::start("span", vec![]),
            Token::text("zzz"),
            Token::end("span"),
            Token::SelfClosingTag(end),
            Token::text("b"),
            Token::end("p"),
        ]);
        compute(&mut doc, source);
        let p = doc.children(doc.body)[0];
        assert_eq!(dsr_of(&doc, p), Dsr::new(0, 7, 0, 0));
        let span = doc.children(p)[2];
        assert_eq!(dsr_of(&doc, span).start, None);
    }

    #[test]
    fn comments_and_void_elements() {
        let source = "<!--x-->\n<br>";
        let mut br = tag("br", 9, 13);
        br.meta.stx = Some(Stx::Html);
        let mut doc = builder::build(vec![
            Token::Comment("x".into(), <_>::default()),
            Token::Newline(<_>::default()),
            Token::StartTag(br),
        ]);
        compute(&mut doc, source);
        let br = doc.last_child(doc.body).unwrap();
        assert_eq!(dsr_of(&doc, br), Dsr::new(9, 13, 4, 0));
    }

    #[test]
    fn encapsulated_extension_takes_its_tag_range() {
        let source = "<nowiki>''</nowiki>!";
        let mut doc = Document::new();
        let mut span = Element::new("span");
        span.set_attr("typeof", "mw:Extension/nowiki");
        span.dp.tsr = Some(Span::new(0, 19));
        let span = doc.create_element(span);
        doc.append(doc.body, span);
        doc.append_text(span, "''");
        doc.append_text(doc.body, "!");
        compute(&mut doc, source);
        let dsr = dsr_of(&doc, span);
        assert_eq!(dsr.span(), Some(Span::new(0, 19)));
        assert_eq!(dsr.open_width, None);
    }
}
