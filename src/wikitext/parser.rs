//! A parsing expression grammar for wikitext.
//!
//! The grammar produces a flat token stream. Block structure (lists,
//! paragraphs) and quote pairing are not resolved here; they are the job of
//! the token transformers. Every token that corresponds to wikitext markup
//! gets a source range.

// This code is loosely based on the Parsoid grammar at
// <https://github.com/wikimedia/mediawiki-services-parsoid>.
//
// The upstream copyright is:
//
// SPDX-License-Identifier: GPL-2.0-or-later
// SPDX-FileCopyright: 2011-07-20 Brion Vibber <brion@pobox.com>

use super::{Span, Tokenizer};
use crate::tokens::{AttrValue, Attribute, Stx, Tag, Token, TokenMeta, merge_text};

/// The set of sequences which terminate inline content in the current
/// context.
#[derive(Clone, Copy, Debug, Default)]
pub(super) struct Stops {
    /// `|` ends the content.
    pipe: bool,
    /// `=` ends the content.
    equals: bool,
    /// `}}` ends the content.
    rbrace: bool,
    /// `]]` ends the content.
    rbracket2: bool,
    /// `]` ends the content.
    rbracket: bool,
    /// `:` ends the content.
    colon: bool,
    /// The end of a heading ends the content.
    heading: bool,
    /// Newlines are part of the content.
    multiline: bool,
}

impl Stops {
    /// Top-level content.
    const NONE: Self = Self {
        pipe: false,
        equals: false,
        rbrace: false,
        rbracket2: false,
        rbracket: false,
        colon: false,
        heading: false,
        multiline: false,
    };
    /// A template or template argument name.
    const TEMPLATE_NAME: Self = Self {
        pipe: true,
        rbrace: true,
        multiline: true,
        ..Self::NONE
    };
    /// A named template parameter key.
    const PARAM_NAME: Self = Self {
        equals: true,
        ..Self::TEMPLATE_NAME
    };
    /// A template parameter value.
    const PARAM_VALUE: Self = Self::TEMPLATE_NAME;
    /// A wikilink target.
    const LINK_TARGET: Self = Self {
        pipe: true,
        rbracket2: true,
        ..Self::NONE
    };
    /// A wikilink caption.
    const LINK_CONTENT: Self = Self {
        rbracket2: true,
        ..Self::NONE
    };
    /// An external link caption.
    const EXTLINK_CONTENT: Self = Self {
        rbracket: true,
        ..Self::NONE
    };
    /// A heading body.
    const HEADING: Self = Self {
        heading: true,
        ..Self::NONE
    };
    /// A definition list term sharing its line with a definition.
    const DT: Self = Self {
        colon: true,
        ..Self::NONE
    };
}

/// Builds the tokens for a heading.
fn heading(
    start: usize,
    open: &str,
    mut body: Vec<Token>,
    close_start: usize,
    close: &str,
    trail: Vec<Token>,
) -> Vec<Token> {
    let level = open.len().min(close.len()).min(6);
    let close_end = close_start + close.len();
    let name = format!("h{level}");

    let mut out = Vec::with_capacity(body.len() + trail.len() + 4);
    out.push(Token::StartTag(
        Tag::new(name.clone(), vec![]).with_tsr(Some(Span::new(start, start + level))),
    ));
    if open.len() > level {
        out.push(Token::text(&open[level..]));
    }
    out.append(&mut body);
    if close.len() > level {
        out.push(Token::text(&close[..close.len() - level]));
    }
    out.push(Token::EndTag(
        Tag::new(name, vec![]).with_tsr(Some(Span::new(close_end - level, close_end))),
    ));
    out.extend(trail);
    merge_text(out)
}

/// Builds a list item token.
fn list_item(bullets: &str, start: usize, end: usize, stx: Option<Stx>) -> Token {
    let mut tag = Tag::new("listItem", vec![Attribute::new("bullets", bullets)])
        .with_tsr(Some(Span::new(start, end)));
    tag.meta.stx = stx;
    Token::SelfClosingTag(tag)
}

/// Builds a quote token, plus any leading apostrophes that are plain text.
fn quote(start: usize, end: usize, run: &str) -> Vec<Token> {
    // Runs of four are an apostrophe followed by bold; runs of more than five
    // start with apostrophes followed by bold italic.
    let plain = match run.len() {
        4 => 1,
        n if n > 5 => n - 5,
        _ => 0,
    };
    let mut out = Vec::with_capacity(2);
    if plain > 0 {
        out.push(Token::text(&run[..plain]));
    }
    out.push(Token::SelfClosingTag(
        Tag::new("mw-quote", vec![Attribute::new("value", &run[plain..])])
            .with_tsr(Some(Span::new(start + plain, end))),
    ));
    out
}

/// Builds a template parameter attribute.
fn param(
    src: &str,
    name: Option<(Vec<Token>, usize, usize)>,
    value: Vec<Token>,
    value_start: usize,
    value_end: usize,
) -> Attribute {
    let (k, ksrc) = match name {
        Some((tokens, start, end)) => (
            AttrValue::from_tokens(tokens),
            Some(src[start..end].to_string()),
        ),
        None => (AttrValue::Text(String::new()), None),
    };
    Attribute {
        k,
        v: AttrValue::from_tokens(value),
        ksrc,
        vsrc: Some(src[value_start..value_end].to_string()),
    }
}

/// Builds a template or template argument token.
#[allow(clippy::too_many_arguments)]
fn transclusion(
    src: &str,
    name: &str,
    start: usize,
    end: usize,
    target: Vec<Token>,
    target_span: (usize, usize),
    params: Vec<Attribute>,
) -> Token {
    let mut attrs = Vec::with_capacity(params.len() + 1);
    attrs.push(Attribute {
        k: AttrValue::from_tokens(target),
        v: AttrValue::Text(String::new()),
        ksrc: Some(src[target_span.0..target_span.1].to_string()),
        vsrc: None,
    });
    attrs.extend(params);
    let mut tag = Tag::new(name, attrs).with_tsr(Some(Span::new(start, end)));
    tag.meta.src = Some(src[start..end].to_string());
    Token::SelfClosingTag(tag)
}

/// Builds an HTML-syntax tag token.
fn html_tag(
    src: &str,
    start: usize,
    end: usize,
    closing: bool,
    name: &str,
    attrs: Vec<Attribute>,
    self_closing: bool,
) -> Token {
    let mut tag = Tag::new(name.to_ascii_lowercase(), attrs).with_tsr(Some(Span::new(start, end)));
    tag.meta.stx = Some(Stx::Html);
    tag.meta.src = Some(src[start..end].to_string());
    if closing {
        Token::EndTag(tag)
    } else if self_closing {
        Token::SelfClosingTag(tag)
    } else {
        Token::StartTag(tag)
    }
}

peg::parser! { pub(super) grammar wikitext(src: &str, tk: &Tokenizer) for str {
    /// The top-level start rule.
    pub rule start() -> Vec<Token>
    = first:line() rest:(nl:newline() l:line() { (nl, l) })* ![_]
    {
        let mut out = first;
        for (nl, line) in rest {
            out.push(nl);
            out.extend(line);
        }
        out
    }

    rule newline() -> Token
    = p:position!() "\n"
    { Token::Newline(TokenMeta::with_tsr(p, p + 1)) }

    rule line() -> Vec<Token>
    = heading_line()
    / h:hr() rest:inline(Stops::NONE)
      {
        let mut out = vec![h];
        out.extend(rest);
        out
      }
    / list_line()
    / inline(Stops::NONE)

    ////////////
    // Blocks //
    ////////////

    rule heading_line() -> Vec<Token>
    = s:position!() open:$("="+) body:inline(Stops::HEADING)
      close_start:position!() close:$("="+) trail:heading_trail() &eolf()
    { heading(s, open, body, close_start, close, trail) }

    rule heading_end()
    = "="+ [' '|'\t']* (comment() [' '|'\t']*)* &eolf()

    rule heading_trail() -> Vec<Token>
    = trail:(c:comment() { c } / w:$([' '|'\t']+) { Token::text(w) })*
    { trail }

    rule hr() -> Token
    = s:position!() "----" "-"* e:position!()
    {
        let mut tag = Tag::new("hr", vec![]).with_tsr(Some(Span::new(s, e)));
        tag.meta.src = Some(src[s..e].to_string());
        Token::SelfClosingTag(tag)
    }

    rule list_line() -> Vec<Token>
    = s:position!() bullets:$(['*'|'#'|':'|';']+) e:position!()
      rest:(dd:dtdd(bullets) { dd } / inline(Stops::NONE))
    {
        let mut out = vec![list_item(bullets, s, e, None)];
        out.extend(rest);
        out
    }

    /// A `;term:definition` pair on one line.
    rule dtdd(bullets: &str) -> Vec<Token>
    = guard(bullets.ends_with(';'))
      dt:inline(Stops::DT) c:position!() ":" dd:inline(Stops::NONE)
    {
        let mut out = dt;
        let dd_bullets = format!("{}:", &bullets[..bullets.len() - 1]);
        out.push(list_item(&dd_bullets, c, c + 1, Some(Stx::Row)));
        out.extend(dd);
        out
    }

    ////////////
    // Inline //
    ////////////

    rule inline(s: Stops) -> Vec<Token>
    = items:inline_element(s)*
    { merge_text(items.into_iter().flatten().collect()) }

    rule inline_element(s: Stops) -> Vec<Token>
    = !stop(s) tokens:(
        c:comment() { vec![c] }
      / guard(s.multiline) n:newline() { vec![n] }
      / t:template_arg() { vec![t] }
      / t:template() { vec![t] }
      / l:wikilink() { vec![l] }
      / l:extlink() { vec![l] }
      / q:quote_run() { q }
      / b:behavior_switch() { vec![b] }
      / x:extension_tag() { vec![x] }
      / x:include_tag() { vec![x] }
      / h:html() { vec![h] }
      / t:$((!special() !stop(s) [^'\n'])+) { vec![Token::text(t)] }
      / t:$([^'\n']) { vec![Token::text(t)] }
    ) { tokens }

    rule special()
    = ['{'|'['|'<'|'\''|'_']

    rule stop(s: Stops)
    = guard(s.pipe) "|"
    / guard(s.equals) "="
    / guard(s.rbrace) "}}"
    / guard(s.rbracket2) "]]"
    / guard(s.rbracket) "]"
    / guard(s.colon) ":"
    / guard(s.heading) heading_end()

    rule comment() -> Token
    = s:position!() "<!--" c:$((!"-->" [_])*) ("-->" / ![_]) e:position!()
    { Token::Comment(c.to_string(), TokenMeta::with_tsr(s, e)) }

    rule template() -> Token
    = s:position!() "{{" ts:position!() target:inline(Stops::TEMPLATE_NAME) te:position!()
      params:template_param()* "}}" e:position!()
    { transclusion(src, "template", s, e, target, (ts, te), params) }

    rule template_arg() -> Token
    = s:position!() "{{{" ts:position!() target:inline(Stops::TEMPLATE_NAME) te:position!()
      params:template_param()* "}}}" e:position!()
    { transclusion(src, "templatearg", s, e, target, (ts, te), params) }

    rule template_param() -> Attribute
    = "|" name:(ks:position!() n:inline(Stops::PARAM_NAME) ke:position!() "=" { (n, ks, ke) })?
      vs:position!() v:inline(Stops::PARAM_VALUE) ve:position!()
    { param(src, name, v, vs, ve) }

    rule wikilink() -> Token
    = s:position!() "[[" ts:position!() target:inline(Stops::LINK_TARGET) te:position!()
      content:("|" c:inline(Stops::LINK_CONTENT) { c })? "]]" e:position!()
    {
        let mut attrs = vec![Attribute {
            k: "href".into(),
            v: AttrValue::from_tokens(target),
            ksrc: None,
            vsrc: Some(src[ts..te].to_string()),
        }];
        let stx = if let Some(content) = content {
            attrs.push(Attribute {
                k: "content".into(),
                v: AttrValue::Tokens(content),
                ksrc: None,
                vsrc: None,
            });
            Stx::Piped
        } else {
            Stx::Simple
        };
        let mut tag = Tag::new("wikilink", attrs).with_tsr(Some(Span::new(s, e)));
        tag.meta.stx = Some(stx);
        tag.meta.src = Some(src[s..e].to_string());
        Token::SelfClosingTag(tag)
    }

    rule extlink() -> Token
    = s:position!() "[" url:$(url_protocol() url_char()+) space:$([' '|'\t']*)
      co:position!() content:inline(Stops::EXTLINK_CONTENT) "]" e:position!()
    {
        let mut tag = Tag::new("extlink", vec![
            Attribute::new("href", url),
            Attribute {
                k: "content".into(),
                v: AttrValue::Tokens(content),
                ksrc: None,
                vsrc: None,
            },
        ]).with_tsr(Some(Span::new(s, e)));
        tag.meta.extra.insert("targetOff".into(), co.to_string());
        tag.meta.extra.insert("space".into(), space.to_string());
        tag.meta.src = Some(src[s..e].to_string());
        Token::SelfClosingTag(tag)
    }

    rule url_protocol()
    = p:$("//" / ['a'..='z'|'A'..='Z']+ ":" "//"?)
    {? if Tokenizer::is_protocol(p) { Ok(()) } else { Err("url protocol") } }

    rule url_char()
    = [^' '|'\t'|'\n'|'['|']'|'<'|'>'|'"'|'{'|'}'|'|']

    rule quote_run() -> Vec<Token>
    = s:position!() run:$("''" "'"*) e:position!()
    { quote(s, e, run) }

    rule behavior_switch() -> Token
    = s:position!() "__" word:$(['a'..='z'|'A'..='Z']+) "__" e:position!()
    {?
        if Tokenizer::is_behavior_switch(word) {
            let mut tag = Tag::new("behavior-switch", vec![
                Attribute::new("word", word.to_ascii_lowercase()),
            ]).with_tsr(Some(Span::new(s, e)));
            tag.meta.src = Some(src[s..e].to_string());
            Ok(Token::SelfClosingTag(tag))
        } else {
            Err("behavior switch")
        }
    }

    rule extension_tag() -> Token
    = s:position!() "<" name:extension_name() attrs:html_attrs() [' '|'\t'|'\n']*
      body:extension_body(name) e:position!()
    {
        let mut tag = Tag::new("extension", attrs).with_tsr(Some(Span::new(s, e)));
        tag.meta.extra.insert("name".into(), name.to_ascii_lowercase());
        if let Some((body_start, body)) = body {
            tag.meta.extra.insert("body".into(), body.to_string());
            tag.meta.extra.insert("stw".into(), (body_start - s).to_string());
        }
        tag.meta.src = Some(src[s..e].to_string());
        Token::SelfClosingTag(tag)
    }

    rule extension_name() -> &'input str
    = n:$(tag_name())
    {? if tk.is_extension_tag(n) { Ok(n) } else { Err("extension tag") } }

    rule extension_body(name: &str) -> Option<(usize, &'input str)>
    = "/>" { None }
    / ">" bs:position!() body:$((!extension_close(name) [_])*) extension_close(name)
      { Some((bs, body)) }

    rule extension_close(name: &str)
    = "</" n:$(tag_name()) [' '|'\t']* ">"
    {? if n.eq_ignore_ascii_case(name) { Ok(()) } else { Err("extension close tag") } }

    rule include_tag() -> Token
    = s:position!() "<" closing:"/"? name:include_name()
      [' '|'\t']* self_closing:"/"? ">" e:position!()
    {
        let mut tag = Tag::new(name.to_ascii_lowercase(), vec![])
            .with_tsr(Some(Span::new(s, e)));
        tag.meta.src = Some(src[s..e].to_string());
        if closing.is_some() {
            Token::EndTag(tag)
        } else if self_closing.is_some() {
            Token::SelfClosingTag(tag)
        } else {
            Token::StartTag(tag)
        }
    }

    rule html() -> Token
    = s:position!() "<" closing:"/"? name:$(tag_name()) attrs:html_attrs()
      [' '|'\t'|'\n']* self_closing:"/"? ">" e:position!()
    { html_tag(src, s, e, closing.is_some(), name, attrs, self_closing.is_some()) }

    rule tag_name()
    = ['a'..='z'|'A'..='Z'] ['a'..='z'|'A'..='Z'|'0'..='9']*

    rule html_attrs() -> Vec<Attribute>
    = a:([' '|'\t'|'\n']+ a:html_attr() { a })*
    { a }

    rule html_attr() -> Attribute
    = name:$([^'='|'>'|'<'|'/'|' '|'\t'|'\n']+)
      value:([' '|'\t']* "=" [' '|'\t']* v:attr_value() { v })?
    {
        let (v, vsrc) = value.unwrap_or_else(|| (AttrValue::Text(String::new()), String::new()));
        Attribute {
            k: AttrValue::Text(name.to_ascii_lowercase()),
            v,
            ksrc: Some(name.to_string()),
            vsrc: Some(vsrc),
        }
    }

    rule attr_value() -> (AttrValue, String)
    = "\"" vs:position!() v:dq_part()* ve:position!() "\""
      { (AttrValue::from_tokens(merge_text(v)), src[vs..ve].to_string()) }
    / "'" vs:position!() v:sq_part()* ve:position!() "'"
      { (AttrValue::from_tokens(merge_text(v)), src[vs..ve].to_string()) }
    / v:$([^' '|'\t'|'\n'|'>'|'"'|'\''|'/']+)
      { (AttrValue::Text(v.to_string()), v.to_string()) }

    rule dq_part() -> Token
    = t:template_arg() { t }
    / t:template() { t }
    / t:$((!"{{" [^'"'])+) { Token::text(t) }
    / t:$("{") { Token::text(t) }

    rule sq_part() -> Token
    = t:template_arg() { t }
    / t:template() { t }
    / t:$((!"{{" [^'\''])+) { Token::text(t) }
    / t:$("{") { Token::text(t) }

    ///////////
    // Utils //
    ///////////

    rule guard(cond: bool)
    = {? if cond { Ok(()) } else { Err("guard") } }

    rule include_name() -> &'input str
    = quiet!{
      name:$(['a'..='z'|'A'..='Z']+)
      {?
        if ["noinclude", "includeonly", "onlyinclude"]
            .iter()
            .any(|directive| name.eq_ignore_ascii_case(directive))
        {
            Ok(name)
        } else {
            Err("include directive")
        }
      }
    } / expected!("include directive")

    rule eolf()
    = "\n" / ![_]
}}
