use super::*;
use crate::tokens::{AttrValue, Stx, Tag};

fn tokenizer() -> Tokenizer {
    Tokenizer::new(["nowiki", "pre", "ref"])
}

#[track_caller]
fn tokenize(source: &str) -> Vec<Token> {
    let _ = env_logger::try_init();
    let tokens = tokenizer().tokenize(source).unwrap();
    assert!(
        matches!(tokens.last(), Some(Token::EndOfInput(meta)) if meta.tsr == Some(Span::new(source.len(), source.len()))),
        "missing end of input: {tokens:#?}"
    );
    tokens
}

#[track_caller]
fn tag<'a>(tokens: &'a [Token], name: &str) -> &'a Tag {
    tokens
        .iter()
        .find_map(|t| t.tag().filter(|tag| tag.name == name))
        .unwrap_or_else(|| panic!("no {name} in {tokens:#?}"))
}

#[test]
fn plain_paragraphs() {
    let tokens = tokenize("a\n\nb");
    assert_eq!(tokens.len(), 5);
    assert_eq!(tokens[0], Token::text("a"));
    assert_eq!(tokens[1].tsr(), Some(Span::new(1, 2)));
    assert_eq!(tokens[2].tsr(), Some(Span::new(2, 3)));
    assert_eq!(tokens[3], Token::text("b"));
}

#[test]
fn heading() {
    let tokens = tokenize("== Foo ==\nbar");
    assert!(tokens[0].is_start("h2"));
    assert_eq!(tokens[0].tsr(), Some(Span::new(0, 2)));
    assert_eq!(tokens[1], Token::text(" Foo "));
    assert!(tokens[2].is_end("h2"));
    assert_eq!(tokens[2].tsr(), Some(Span::new(7, 9)));
}

#[test]
fn unbalanced_heading() {
    let tokens = tokenize("===a==");
    assert!(tokens[0].is_start("h2"));
    assert_eq!(tokens[1], Token::text("=a"));
    assert_eq!(tokens[2].tsr(), Some(Span::new(4, 6)));
}

#[test]
fn not_a_heading() {
    let tokens = tokenize("==a= b");
    assert!(tokens.iter().all(|t| t.name() != Some("h1")));
    assert_eq!(tokens[0], Token::text("==a= b"));
}

#[test]
fn list_bullets() {
    let tokens = tokenize("*a\n#b");
    let item = tokens[0].tag().unwrap();
    assert_eq!(item.name, "listItem");
    assert_eq!(item.attr_text("bullets").as_deref(), Some("*"));
    assert_eq!(item.meta.tsr, Some(Span::new(0, 1)));
    assert!(tokens[3].is_self_closing("listItem"));
    assert_eq!(tokens[3].tag().unwrap().attr_text("bullets").as_deref(), Some("#"));
}

#[test]
fn definition_row() {
    let tokens = tokenize(";a:b");
    let items = tokens
        .iter()
        .filter(|t| t.is_self_closing("listItem"))
        .collect::<Vec<_>>();
    assert_eq!(items.len(), 2);
    let dd = items[1].tag().unwrap();
    assert_eq!(dd.attr_text("bullets").as_deref(), Some(":"));
    assert_eq!(dd.meta.stx, Some(Stx::Row));
    assert_eq!(dd.meta.tsr, Some(Span::new(2, 3)));
}

#[test]
fn quotes() {
    let tokens = tokenize("''a'' '''b''' ''''c");
    let quotes = tokens
        .iter()
        .filter(|t| t.is_self_closing("mw-quote"))
        .map(|t| t.tag().unwrap().attr_text("value").unwrap().into_owned())
        .collect::<Vec<_>>();
    assert_eq!(quotes, ["''", "''", "'''", "'''", "'''"]);
    assert!(tokens.contains(&Token::text(" '")));
}

#[test]
fn comment() {
    let tokens = tokenize("a<!-- b -->c");
    assert_eq!(
        tokens[1],
        Token::Comment(" b ".into(), crate::tokens::TokenMeta::with_tsr(1, 11))
    );
}

#[test]
fn unterminated_comment() {
    let tokens = tokenize("a<!-- b");
    assert!(matches!(&tokens[1], Token::Comment(text, _) if text == " b"));
}

#[test]
fn template() {
    let tokens = tokenize("x{{Foo|bar|k = v}}y");
    let template = tag(&tokens, "template");
    assert_eq!(template.meta.tsr, Some(Span::new(1, 18)));
    assert_eq!(template.meta.src.as_deref(), Some("{{Foo|bar|k = v}}"));
    assert_eq!(template.attrs.len(), 3);
    assert_eq!(template.attrs[0].k, AttrValue::Text("Foo".into()));
    assert_eq!(template.attrs[1].k, AttrValue::Text(String::new()));
    assert_eq!(template.attrs[1].v, AttrValue::Text("bar".into()));
    assert_eq!(template.attrs[2].ksrc.as_deref(), Some("k "));
    assert_eq!(template.attrs[2].vsrc.as_deref(), Some(" v"));
}

#[test]
fn nested_template() {
    let tokens = tokenize("{{a|{{b}}}}");
    let template = tag(&tokens, "template");
    let AttrValue::Tokens(inner) = &template.attrs[1].v else {
        panic!("expected tokens");
    };
    assert!(inner[0].is_self_closing("template"));
}

#[test]
fn template_arg() {
    let tokens = tokenize("{{{1|def}}}");
    let arg = tag(&tokens, "templatearg");
    assert_eq!(arg.attrs[0].k, AttrValue::Text("1".into()));
    assert_eq!(arg.attrs[1].v, AttrValue::Text("def".into()));
}

#[test]
fn wikilinks() {
    let tokens = tokenize("[[Foo]] [[Bar|baz]]");
    let links = tokens
        .iter()
        .filter_map(|t| t.tag().filter(|tag| tag.name == "wikilink"))
        .collect::<Vec<_>>();
    assert_eq!(links[0].meta.stx, Some(Stx::Simple));
    assert_eq!(links[0].attr_text("href").as_deref(), Some("Foo"));
    assert_eq!(links[1].meta.stx, Some(Stx::Piped));
    assert_eq!(links[1].attr_text("content").as_deref(), Some("baz"));
    assert_eq!(links[1].meta.tsr, Some(Span::new(8, 19)));
}

#[test]
fn extlink() {
    let tokens = tokenize("[http://example.com Example]");
    let link = tag(&tokens, "extlink");
    assert_eq!(link.attr_text("href").as_deref(), Some("http://example.com"));
    assert_eq!(link.attr_text("content").as_deref(), Some("Example"));
    assert_eq!(link.meta.extra.get("targetOff").map(String::as_str), Some("20"));
}

#[test]
fn not_an_extlink() {
    let tokens = tokenize("[foo bar]");
    assert_eq!(tokens[0], Token::text("[foo bar]"));
}

#[test]
fn behavior_switch() {
    let tokens = tokenize("__NOTOC__ __BOGUS__");
    let switch = tag(&tokens, "behavior-switch");
    assert_eq!(switch.attr_text("word").as_deref(), Some("notoc"));
    assert_eq!(switch.meta.src.as_deref(), Some("__NOTOC__"));
    assert!(tokens.contains(&Token::text(" __BOGUS__")));
}

#[test]
fn extension_tags() {
    let tokens = tokenize("<nowiki>''x''</NOWIKI><ref name=a/>");
    let nowiki = tokens[0].tag().unwrap();
    assert_eq!(nowiki.name, "extension");
    assert_eq!(nowiki.meta.extra.get("name").map(String::as_str), Some("nowiki"));
    assert_eq!(nowiki.meta.extra.get("body").map(String::as_str), Some("''x''"));
    assert_eq!(nowiki.meta.tsr, Some(Span::new(0, 22)));
    let reference = tokens[1].tag().unwrap();
    assert_eq!(reference.attr_text("name").as_deref(), Some("a"));
    assert!(!reference.meta.extra.contains_key("body"));
}

#[test]
fn include_directives() {
    let tokens = tokenize("a<noinclude>b</noinclude>");
    assert!(tokens[1].is_start("noinclude"));
    assert_eq!(tokens[1].tsr(), Some(Span::new(1, 12)));
    assert!(tokens[3].is_end("noinclude"));
}

#[test]
fn html_tags() {
    let tokens = tokenize(r#"<span class="x" id=y>a</span>"#);
    let span = tokens[0].tag().unwrap();
    assert!(tokens[0].is_start("span"));
    assert_eq!(span.meta.stx, Some(Stx::Html));
    assert_eq!(span.attr_text("class").as_deref(), Some("x"));
    assert_eq!(span.attr_text("id").as_deref(), Some("y"));
    assert!(tokens[2].is_end("span"));
}

#[test]
fn templated_attribute() {
    let tokens = tokenize(r#"<div style="{{a}}">"#);
    let div = tokens[0].tag().unwrap();
    let style = div.attr("style").unwrap();
    assert!(style.v.needs_expansion());
    assert_eq!(style.vsrc.as_deref(), Some("{{a}}"));
}

#[test]
fn plain_text_detection() {
    let tk = tokenizer();
    assert!(tk.is_plain_text("hello world", true));
    assert!(!tk.is_plain_text("''a''", false));
    assert!(!tk.is_plain_text("* a", true));
    assert!(tk.is_plain_text("* a", false));
    assert!(!tk.is_plain_text("[[a]]", false));
}
