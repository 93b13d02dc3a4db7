use super::*;
use crate::{
    config::Configuration,
    pipeline::{MemorySource, Parser},
    wikitext::Span,
};

#[track_caller]
fn parse_with(source: &str, templates: MemorySource) -> Document {
    let _ = env_logger::try_init();
    let parser = Parser::new(Env::new(Configuration::default(), Box::new(templates)));
    parser.wt2html(source).unwrap()
}

#[track_caller]
fn parse(source: &str) -> Document {
    parse_with(source, MemorySource::default())
}

#[track_caller]
fn dsr(doc: &Document, id: NodeId) -> Option<Span> {
    doc.element(id).and_then(|e| e.dp.dsr).and_then(|d| d.span())
}

#[test]
fn list_ranges() {
    let doc = parse("*a\n*b\n*c");
    let ul = doc.children(doc.body)[0];
    assert!(doc.is(ul, "ul"));
    assert_eq!(dsr(&doc, ul), Some(Span::new(0, 8)));
    let items = doc
        .children(ul)
        .into_iter()
        .filter(|&id| doc.is(id, "li"))
        .collect::<Vec<_>>();
    assert_eq!(items.len(), 3);
    assert_eq!(dsr(&doc, items[1]), Some(Span::new(3, 5)));
    let li = doc.element(items[2]).unwrap().dp.dsr.unwrap();
    assert_eq!((li.open_width, li.close_width), (Some(1), Some(0)));
}

#[test]
fn quote_ranges() {
    let doc = parse("'''''bold italic'''''");
    let p = doc.children(doc.body)[0];
    let i = doc.first_child(p).unwrap();
    let b = doc.first_child(i).unwrap();
    assert!(doc.is(i, "i"));
    assert!(doc.is(b, "b"));
    assert_eq!(
        doc.element(i).unwrap().dp.dsr,
        Some(Dsr::new(0, 21, 2, 2))
    );
    assert_eq!(
        doc.element(b).unwrap().dp.dsr,
        Some(Dsr::new(2, 19, 3, 3))
    );
}

#[test]
fn transclusion_is_one_group() {
    let templates = MemorySource::default().with("Echo", "{{{1}}}");
    let doc = parse_with("a {{echo|hi}} b", templates);
    let p = doc.children(doc.body)[0];
    let wrapper = doc
        .children(p)
        .into_iter()
        .find(|&id| doc.element(id).is_some_and(Element::is_encapsulation_wrapper))
        .unwrap();
    assert_eq!(dsr(&doc, wrapper), Some(Span::new(2, 13)));
    assert_eq!(doc.text_content(wrapper), "hi");
    assert_eq!(
        doc.element(wrapper).unwrap().data_mw.as_ref().unwrap()["parts"][0]["template"]
            ["params"]["1"]["wt"],
        "hi"
    );
    assert!(doc.elements().into_iter().all(|id| !doc.is(id, "meta")));
}

#[test]
fn extension_fragment_is_unpacked() {
    let doc = parse("<pre>a<b</pre>");
    let pre = doc
        .elements()
        .into_iter()
        .find(|&id| doc.is(id, "pre"))
        .unwrap();
    let element = doc.element(pre).unwrap();
    assert!(element.has_typeof("mw:Extension/pre"));
    assert!(!element.has_typeof("mw:DOMFragment"));
    assert!(element.about().is_some());
    assert_eq!(doc.text_content(pre), "a<b");
    assert_eq!(dsr(&doc, pre), Some(Span::new(0, 14)));
}

#[test]
fn fostered_content_keeps_table_range() {
    let source = "<table><tr><td>a</td></tr>x</table>";
    let doc = parse(source);
    let body = doc.children(doc.body);
    let fostered = body
        .iter()
        .copied()
        .find(|&id| doc.element(id).is_some_and(|e| e.dp.fostered))
        .unwrap();
    assert_eq!(doc.text_content(fostered), "x");
    let table = body.iter().copied().find(|&id| doc.is(id, "table")).unwrap();
    assert_eq!(dsr(&doc, table), Some(Span::new(0, source.len())));
}

#[test]
fn html_round_trip_keeps_blobs() {
    let doc = parse("== h ==\n[[Foo|bar]]");
    let html = html::to_html(&doc);
    let again = html::from_html(&html).unwrap();
    assert_eq!(html::to_html(&again), html);
    let a = again
        .elements()
        .into_iter()
        .find(|&id| again.is(id, "a"))
        .unwrap();
    assert_eq!(again.element(a).unwrap().dp.sa["href"], "Foo");
}
