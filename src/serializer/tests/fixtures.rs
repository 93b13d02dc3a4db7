//! A reader for round-trip fixture files.
//!
//! Fixture files use the parserTests layout: `!! article` sections define
//! templates, and `!! test` sections hold a `!! wikitext` section plus an
//! optional `!! options` line list, each ending at `!! end`. Lines starting
//! with `#` outside of sections are comments.

use std::collections::HashMap;

pub(super) type Error = peg::error::ParseError<peg::str::LineCol>;

/// A parsed fixture file.
#[derive(Debug, Default)]
pub(super) struct Fixtures<'input> {
    /// Template title and text pairs.
    pub articles: Vec<(&'input str, &'input str)>,
    pub tests: Vec<Fixture<'input>>,
}

/// One test case.
#[derive(Debug)]
pub(super) struct Fixture<'input> {
    pub name: &'input str,
    /// Section texts by section name, without their final newline.
    pub sections: HashMap<&'input str, &'input str>,
    /// Options, with their values if they had any.
    pub options: HashMap<&'input str, Option<&'input str>>,
}

impl<'input> Fixtures<'input> {
    pub(super) fn parse(code: &'input str) -> Result<Self, Error> {
        let mut fixtures = Self::default();
        for item in fixture_file::parse(code)? {
            match item {
                Item::Article(title, text) => fixtures.articles.push((title, text)),
                Item::Test(test) => fixtures.tests.push(test),
                Item::Ignored => {}
            }
        }
        Ok(fixtures)
    }
}

impl Fixture<'_> {
    /// Returns true if the test runs in the given mode. Tests without a
    /// `modes` option run in `wt2wt` only.
    pub(super) fn runs_in(&self, mode: &str) -> bool {
        match self.options.get("modes") {
            Some(Some(modes)) => modes.split(',').any(|m| m.trim() == mode),
            _ => mode == "wt2wt",
        }
    }
}

enum Item<'input> {
    Article(&'input str, &'input str),
    Test(Fixture<'input>),
    Ignored,
}

enum Section<'input> {
    Text(&'input str, &'input str),
    Options(Vec<(&'input str, Option<&'input str>)>),
}

/// Drops the newline which separates a section from the next marker.
fn trim_final_newline(text: &str) -> &str {
    text.strip_suffix('\n').unwrap_or(text)
}

peg::parser! {grammar fixture_file() for str {
  pub rule parse() -> Vec<Item<'input>>
  = items:item()*
  { items }

  rule item() -> Item<'input>
  = article()
  / test()
  / comment_or_blank_line() { Item::Ignored }

  rule comment_or_blank_line()
  = "#" rest_of_line()
  / ws()? eol()

  rule article() -> Item<'input>
  = start(<"article">)
    title:line()
    start(<"text">)
    text:text()
    start(<"endarticle">)
  { Item::Article(title.trim(), trim_final_newline(text)) }

  rule test() -> Item<'input>
  = start(<"test">)
    name:line()
    sections:(options_section() / section())*
    end()
  {
    let mut fixture = Fixture {
        name: name.trim(),
        sections: HashMap::new(),
        options: HashMap::new(),
    };
    for section in sections {
        match section {
            Section::Text(name, text) => {
                fixture.sections.insert(name, trim_final_newline(text));
            }
            Section::Options(options) => fixture.options.extend(options),
        }
    }
    Item::Test(fixture)
  }

  rule options_section() -> Section<'input>
  = start(<"options">)
    options:(o:option() ++ ws() eol() { o })*
  { Section::Options(options.into_iter().flatten().collect()) }

  rule option() -> (&'input str, Option<&'input str>)
  = name:$([^' '|'\t'|'\n'|'='|'!']+) value:("=" v:$([^' '|'\t'|'\n']+) { v })?
  { (name, value) }

  rule section() -> Section<'input>
  = "!!" ws()?
    !("end" ws()? eolf())
    name:$([^' '|'\t'|'\n']+)
    rest_of_line()
    text:text()
  { Section::Text(name, text) }

  rule start<T>(r: rule<T>)
  = "!!" ws()? r() ws()? eol()

  rule end()
  = "!!" ws()? "end" ws()? eolf()

  rule eol()
  = "\n"

  rule eolf()
  = "\n" / ![_]

  rule ws()
  = [' '|'\t']+

  rule rest_of_line() -> &'input str
  = t:$([^'\n']*) eol()
  { t }

  rule line() -> &'input str
  = !"!!" t:rest_of_line()
  { t }

  rule text() -> &'input str
  = $(line()*)
}}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_sections_and_options() {
        let code = "# comment\n\n!! article\nTemplate:X\n!! text\nx\n!! endarticle\n\n!! test\nOne\n!! options\nmodes=wt2wt,html2wt\n!! wikitext\na\n\nb\n!! html\n<p>a</p>\n!! end\n";
        let fixtures = Fixtures::parse(code).unwrap();
        assert_eq!(fixtures.articles, [("Template:X", "x")]);
        assert_eq!(fixtures.tests.len(), 1);
        let test = &fixtures.tests[0];
        assert_eq!(test.name, "One");
        assert_eq!(test.sections["wikitext"], "a\n\nb");
        assert_eq!(test.sections["html"], "<p>a</p>");
        assert!(test.runs_in("html2wt"));
        assert!(!test.runs_in("selser"));
    }
}
