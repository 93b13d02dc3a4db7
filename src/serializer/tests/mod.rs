use super::*;
use crate::{
    config::Configuration,
    dom::html::{from_html, to_html},
    pipeline::{MemorySource, Parser},
};

mod fixtures;

#[track_caller]
fn parser_with(templates: MemorySource, rt_testing: bool) -> Parser {
    let _ = env_logger::try_init();
    let config = Configuration {
        rt_testing,
        ..Configuration::default()
    };
    Parser::new(Env::new(config, Box::new(templates)))
}

#[track_caller]
fn templates() -> MemorySource {
    MemorySource::default().with("Echo", "{{{1}}}")
}

/// Parses and serializes with the source available for separators.
#[track_caller]
fn wt2wt(source: &str) -> String {
    parser_with(templates(), true).wt2wt(source).unwrap()
}

/// Parses, writes out HTML, reads it back, and serializes without the
/// source.
#[track_caller]
fn via_html(source: &str) -> String {
    let parser = parser_with(templates(), false);
    let html = to_html(&parser.wt2html(source).unwrap());
    let mut doc = from_html(&html).unwrap();
    parser.html2wt(&mut doc, None).unwrap()
}

#[track_caller]
fn html2wt(html: &str) -> String {
    let parser = parser_with(MemorySource::default(), false);
    let mut doc = from_html(html).unwrap();
    parser.html2wt(&mut doc, None).unwrap()
}

#[track_caller]
fn check(source: &str) {
    assert_eq!(wt2wt(source), source, "wt2wt");
    assert_eq!(via_html(source), source, "html2wt");
}

#[test]
fn paragraphs() {
    check("a\n\nb");
}

#[test]
fn heading_and_paragraph() {
    check("== h ==\nb");
}

#[test]
fn lists() {
    check("*a\n*b\n*c");
}

#[test]
fn nested_quotes() {
    check("'''''bold italic'''''");
}

#[test]
fn piped_link() {
    check("[[Foo|bar]]");
}

#[test]
fn transclusion() {
    check("a {{echo|hi}} b");
}

#[test]
fn nowiki() {
    check("<nowiki>''x''</nowiki>");
}

#[test]
fn new_text_is_escaped() {
    assert_eq!(html2wt("<p>*x</p>"), "<nowiki>*x</nowiki>");
    assert_eq!(html2wt("<p>plain</p>"), "plain");
}

#[test]
fn unchanged_document_reuses_source() {
    let source = "a  b\n\n\n\nc";
    let parser = parser_with(MemorySource::default(), false);
    let mut doc = parser.wt2html(source).unwrap();
    assert_eq!(parser.html2wt(&mut doc, Some(source)).unwrap(), source);
}

#[test]
fn edit_keeps_unchanged_source() {
    let source = "a\n\nb";
    let parser = parser_with(MemorySource::default(), false);
    let mut doc = parser.wt2html(source).unwrap();

    let p = doc
        .children(doc.body)
        .into_iter()
        .filter(|&id| doc.is(id, "p"))
        .nth(1)
        .unwrap();
    let text = doc.first_child(p).unwrap();
    *doc.data_mut(text) = NodeData::Text("c".into());

    assert_eq!(parser.html2wt(&mut doc, Some(source)).unwrap(), "a\n\nc");
}

#[test]
fn fostered_template_output() {
    let source = "<table>{{echo|x}}<tr><td>y</td></tr></table>\n\npara";
    assert_eq!(wt2wt(source), source);

    let parser = parser_with(templates(), false);
    let mut doc = parser.wt2html(source).unwrap();
    replace_text(&mut doc, "para", "PARA");
    assert_eq!(
        parser.html2wt(&mut doc, Some(source)).unwrap(),
        "<table>{{echo|x}}<tr><td>y</td></tr></table>\n\nPARA"
    );
}

#[test]
fn templated_attribute_survives_an_edit() {
    let source = "<div class=\"{{echo|x}}\">y</div>\n\npara";
    let parser = parser_with(templates(), false);
    let mut doc = parser.wt2html(source).unwrap();
    let div = doc.elements().into_iter().find(|&id| doc.is(id, "div")).unwrap();
    let element = doc.element(div).unwrap();
    assert!(element.has_typeof("mw:ExpandedAttrs"));
    assert_eq!(element.attrs["class"], "x");
    assert_eq!(
        via_html("<div class=\"{{echo|x}}\">y</div>"),
        "<div class=\"{{echo|x}}\">y</div>"
    );

    replace_text(&mut doc, "y", "Y");
    assert_eq!(
        parser.html2wt(&mut doc, Some(source)).unwrap(),
        "<div class=\"{{echo|x}}\">Y</div>\n\npara"
    );

    // A changed value is written as it is now.
    let mut doc = parser.wt2html(source).unwrap();
    let div = doc.elements().into_iter().find(|&id| doc.is(id, "div")).unwrap();
    if let Some(element) = doc.element_mut(div) {
        element.set_attr("class", "z");
    }
    replace_text(&mut doc, "y", "Y");
    assert_eq!(
        parser.html2wt(&mut doc, Some(source)).unwrap(),
        "<div class=\"z\">Y</div>\n\npara"
    );
}

#[test]
fn whitespace_only_documents() {
    assert_eq!(wt2wt("\n"), "\n");
    assert_eq!(wt2wt("  \n  \n"), "  \n  \n");
    assert_eq!(wt2wt(""), "");
}

#[test]
fn missing_data_mw_is_an_error() {
    let parser = parser_with(MemorySource::default(), false);
    let mut doc = from_html(r#"<p><span typeof="mw:Transclusion">x</span></p>"#).unwrap();
    assert!(matches!(
        parser.html2wt(&mut doc, None),
        Err(crate::pipeline::Error::Serializer(Error::Unserializable { .. }))
    ));
}

/// Replaces the first text node reading `from` with `to`.
#[track_caller]
fn replace_text(doc: &mut Document, from: &str, to: &str) {
    let node = doc
        .body
        .descendants(&doc.arena)
        .find(|&id| doc.text(id) == Some(from))
        .unwrap_or_else(|| panic!("no text node {from:?}"));
    *doc.data_mut(node) = NodeData::Text(to.into());
}

#[test]
fn fixture_corpus() {
    let _ = env_logger::try_init();
    let fixtures = fixtures::Fixtures::parse(include_str!("roundtrip.txt")).unwrap();
    let templates = || {
        fixtures
            .articles
            .iter()
            .fold(MemorySource::default(), |source, (title, text)| {
                source.with(title, text)
            })
    };
    let parser = parser_with(templates(), true);
    let selser = parser_with(templates(), false);

    for test in &fixtures.tests {
        let wikitext = test.sections["wikitext"];
        log::info!("Running {} ...", test.name);

        if test.runs_in("wt2wt") {
            assert_eq!(parser.wt2wt(wikitext).unwrap(), wikitext, "wt2wt: {}", test.name);
        }

        if test.runs_in("html2wt") {
            let html = to_html(&parser.wt2html(wikitext).unwrap());
            let mut doc = from_html(&html).unwrap();
            assert_eq!(
                parser.html2wt(&mut doc, None).unwrap(),
                wikitext,
                "html2wt: {}",
                test.name
            );
        }

        if test.runs_in("selser") {
            let (from, to) = test
                .options
                .get("edit")
                .copied()
                .flatten()
                .and_then(|edit| edit.split_once(':'))
                .unwrap_or_else(|| panic!("selser: {} has no edit=from:to option", test.name));
            let mut doc = selser.wt2html(wikitext).unwrap();
            replace_text(&mut doc, from, to);
            assert_eq!(
                selser.html2wt(&mut doc, Some(wikitext)).unwrap(),
                test.sections["wikitext/edited"],
                "selser: {}",
                test.name
            );
        }
    }
}
