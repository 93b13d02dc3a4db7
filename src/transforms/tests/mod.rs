use crate::{
    config::Configuration,
    pipeline::{Context, Env, Expander, Frame, MemorySource, Phase, SyncTokenTransformManager},
    tokens::{Tag, Token},
    wikitext::Span,
};
use std::rc::Rc;

/// Runs `source` through all three phases and returns the tokens.
#[track_caller]
fn run_with(source: &str, templates: MemorySource) -> (Rc<Env>, Vec<Token>) {
    let _ = env_logger::try_init();
    let env = Rc::new(Env::new(Configuration::default(), Box::new(templates)));
    let ex = Expander::for_page(Rc::clone(&env), Frame::root("Main Page"));

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    let tokens = tokio::task::LocalSet::new().block_on(&runtime, async {
        let tokens = env.tokenizer.tokenize(source).unwrap();
        ex.expand_tokens(tokens, Some(source)).await.unwrap()
    });

    let cx = Context::new(&env, &ex.frame, Some(source));
    let mut phase3 = SyncTokenTransformManager::new(Phase::Three, super::phase3()).unwrap();
    let tokens = phase3.process(tokens, &cx);
    (env, tokens)
}

#[track_caller]
fn run(source: &str) -> Vec<Token> {
    run_with(source, MemorySource::default()).1
}

/// Renders tokens as compact pseudo-HTML with no attributes.
fn render(tokens: &[Token]) -> String {
    let mut out = String::new();
    for token in tokens {
        match token {
            Token::StartTag(tag) => out += &format!("<{}>", tag.name),
            Token::EndTag(tag) => out += &format!("</{}>", tag.name),
            Token::SelfClosingTag(tag) => out += &format!("<{}/>", tag.name),
            Token::Text(text) => out += text,
            Token::Newline(_) => out.push('\n'),
            Token::Comment(text, _) => out += &format!("<!--{text}-->"),
            Token::EndOfInput(_) => {}
        }
    }
    out
}

/// Finds the start tags with the given name.
fn starts<'a>(tokens: &'a [Token], name: &str) -> Vec<&'a Tag> {
    tokens
        .iter()
        .filter_map(|token| match token {
            Token::StartTag(tag) if tag.name == name => Some(tag),
            _ => None,
        })
        .collect()
}

#[test]
fn flat_list() {
    let tokens = run("*a\n*b\n*c");
    assert_eq!(render(&tokens), "<ul><li>a</li>\n<li>b</li>\n<li>c</li></ul>");
    let items = starts(&tokens, "li")
        .iter()
        .map(|tag| tag.meta.tsr)
        .collect::<Vec<_>>();
    assert_eq!(
        items,
        [
            Some(Span::new(0, 1)),
            Some(Span::new(3, 4)),
            Some(Span::new(6, 7))
        ]
    );
    assert_eq!(starts(&tokens, "ul")[0].meta.tsr, Some(Span::new(0, 0)));
}

#[test]
fn nested_list() {
    let tokens = run("*a\n**b\n*c");
    assert_eq!(
        render(&tokens),
        "<ul><li>a\n<ul><li>b</li></ul>\n</li><li>c</li></ul>"
    );
    let nested = starts(&tokens, "ul")[1];
    assert_eq!(nested.meta.tsr, Some(Span::new(3, 3)));
    assert_eq!(starts(&tokens, "li")[1].meta.tsr, Some(Span::new(3, 5)));
}

#[test]
fn definition_on_term_line() {
    let tokens = run(";a:b");
    assert_eq!(render(&tokens), "<dl><dt>a</dt><dd>b</dd></dl>");
    let dd = starts(&tokens, "dd")[0];
    assert_eq!(dd.meta.tsr, Some(Span::new(2, 3)));
    assert_eq!(dd.meta.stx, Some(crate::tokens::Stx::Row));
}

#[test]
fn list_ends_at_plain_line() {
    let tokens = run("*a\nb");
    assert_eq!(render(&tokens), "<ul><li>a</li></ul>\n<p>b</p>");
}

#[test]
fn bold_italic() {
    let tokens = run("'''''bold italic'''''");
    assert_eq!(render(&tokens), "<p><i><b>bold italic</b></i></p>");
    assert_eq!(starts(&tokens, "i")[0].meta.tsr, Some(Span::new(0, 2)));
    assert_eq!(starts(&tokens, "b")[0].meta.tsr, Some(Span::new(2, 5)));
}

#[test]
fn unbalanced_bold_becomes_apostrophe() {
    let tokens = run("''a'''b");
    assert_eq!(render(&tokens), "<p><i>a'</i>b</p>");
}

#[test]
fn unclosed_bold_is_closed_at_end_of_line() {
    let tokens = run("'''bold\nnext");
    assert_eq!(render(&tokens), "<p><b>bold</b>\nnext</p>");
    assert!(starts(&tokens, "b")[0].meta.auto_inserted_end);
}

#[test]
fn paragraphs() {
    assert_eq!(render(&run("a\n\nb")), "<p>a</p>\n\n<p>b</p>");
    assert_eq!(render(&run("a\nb")), "<p>a\nb</p>");
}

#[test]
fn heading_is_not_wrapped() {
    let rendered = render(&run("== h ==\nb"));
    assert!(rendered.starts_with("<h2>"), "{rendered}");
    assert!(rendered.ends_with("</h2>\n<p>b</p>"), "{rendered}");
}

#[test]
fn piped_wikilink() {
    let tokens = run("[[Foo|bar]] x");
    assert_eq!(render(&tokens), "<p><a>bar</a> x</p>");
    let a = starts(&tokens, "a")[0];
    assert_eq!(a.attr_text("href").as_deref(), Some("./Foo"));
    assert_eq!(a.attr_text("rel").as_deref(), Some("mw:WikiLink"));
    assert_eq!(a.meta.tsr, Some(Span::new(0, 6)));
    let end = tokens.iter().find(|t| t.is_end("a")).unwrap();
    assert_eq!(end.tsr(), Some(Span::new(9, 11)));
}

#[test]
fn simple_wikilink() {
    let tokens = run("[[foo bar]]");
    assert_eq!(render(&tokens), "<p><a>foo bar</a></p>");
    let a = starts(&tokens, "a")[0];
    assert_eq!(a.attr_text("href").as_deref(), Some("./Foo_bar"));
    assert_eq!(a.meta.tsr, Some(Span::new(0, 2)));
}

#[test]
fn external_link() {
    let tokens = run("[http://example.com ex]");
    assert_eq!(render(&tokens), "<p><a>ex</a></p>");
    let a = starts(&tokens, "a")[0];
    assert_eq!(a.attr_text("rel").as_deref(), Some("mw:ExtLink"));
    assert_eq!(a.attr_text("href").as_deref(), Some("http://example.com"));
    assert_eq!(a.meta.tsr, Some(Span::new(0, 20)));
    let end = tokens.iter().find(|t| t.is_end("a")).unwrap();
    assert_eq!(end.tsr(), Some(Span::new(22, 23)));
}

#[test]
fn transclusion_is_encapsulated() {
    let templates = MemorySource::default().with("Echo", "{{{1}}}");
    let (_, tokens) = run_with("{{echo|hi}}", templates);
    assert_eq!(render(&tokens), "<p><meta/>hi<meta/></p>");

    let start = tokens[1].tag().unwrap();
    assert!(start.has_typeof("mw:Transclusion"));
    assert_eq!(start.meta.tsr, Some(Span::new(0, 11)));
    let data_mw: serde_json::Value =
        serde_json::from_str(&start.attr_text("data-mw").unwrap()).unwrap();
    assert_eq!(data_mw["parts"][0]["template"]["params"]["1"]["wt"], "hi");
    assert_eq!(data_mw["parts"][0]["template"]["target"]["wt"], "echo");

    let end = tokens[3].tag().unwrap();
    assert!(end.has_typeof("mw:Transclusion/End"));
    assert_eq!(start.attr_text("about"), end.attr_text("about"));
}

#[test]
fn missing_template_links_to_it() {
    let tokens = run("{{nope}}");
    let a = starts(&tokens, "a")[0];
    assert_eq!(a.attr_text("class").as_deref(), Some("new"));
    assert_eq!(a.attr_text("href").as_deref(), Some("./Template:Nope"));
}

#[test]
fn behavior_switch() {
    let (env, tokens) = run_with("__NOTOC__", MemorySource::default());
    let meta = tokens
        .iter()
        .find_map(|t| t.tag().filter(|tag| tag.name == "meta"))
        .unwrap();
    assert_eq!(
        meta.attr_text("property").as_deref(),
        Some("mw:PageProp/notoc")
    );
    assert_eq!(meta.meta.src.as_deref(), Some("__NOTOC__"));
    assert_eq!(env.page_props(), ["notoc"]);
}

#[test]
fn nowiki() {
    let tokens = run("<nowiki>''x''</nowiki>");
    assert_eq!(render(&tokens), "<p><span>''x''</span></p>");
    let span = starts(&tokens, "span")[0];
    assert!(span.has_typeof("mw:Extension/nowiki"));
    assert!(span.attr("data-mw").is_some());
}

#[test]
fn ref_body_is_wikitext() {
    let rendered = render(&run("a<ref>'''b'''</ref>"));
    assert_eq!(rendered, "<p>a<span><sup><b>b</b></sup></span></p>");
}
