//! `<noinclude>`, `<includeonly>`, and `<onlyinclude>` handling.
//!
//! When the page itself is rendered, the directives turn into `meta`
//! markers carrying their source so they can be serialized back. When a
//! page is transcluded, content is kept or stripped according to the
//! directive and no markers are emitted.

use super::meta;
use crate::{
    pipeline::{Context, Matcher, Registration, SyncHandler, TransformOutput},
    tokens::{Attribute, Token},
    wikitext::Span,
};

/// Builds a directive marker. The source of the marker is taken from the
/// page text covered by `tsr`.
fn marker(ty: &str, is_end: bool, tsr: Option<Span>, cx: &Context<'_>) -> Token {
    let ty = if is_end {
        format!("{ty}/End")
    } else {
        ty.to_string()
    };
    let src = tsr
        .and_then(|tsr| cx.source_slice(tsr.start, tsr.end))
        .map(str::to_string);
    meta(vec![Attribute::new("typeof", ty)], tsr, src)
}

/// Builds a marker covering a block whose content was stripped, from the
/// start of `start` to the end of `end`, or to the end of the source if the
/// block was not closed.
fn stripped_marker(ty: &str, start: &Token, end: Option<&Token>, cx: &Context<'_>) -> Token {
    let tsr = start.tsr().and_then(|s| {
        let end = match end {
            Some(end) => end.tsr()?.end,
            None => cx.source?.len(),
        };
        Some(Span::new(s.start, end))
    });
    marker(ty, false, tsr, cx)
}

/// A buffer of tokens between a start directive and its end directive.
#[derive(Debug, Default)]
struct Collector {
    /// The collected tokens, starting with the start directive, or `None`
    /// when not collecting.
    tokens: Option<Vec<Token>>,
}

impl Collector {
    /// Returns true if a block is being collected.
    fn active(&self) -> bool {
        self.tokens.is_some()
    }

    /// Handles a token while collecting. `finish` receives the start
    /// directive, the content, and the terminating token, which is the end
    /// directive or the end of input.
    fn on_token(
        &mut self,
        token: Token,
        name: &str,
        finish: impl FnOnce(Token, Vec<Token>, Token) -> Vec<Token>,
    ) -> TransformOutput {
        let ends_block = token.is_end(name) || matches!(token, Token::EndOfInput(_));
        let Some(tokens) = self.tokens.as_mut() else {
            return TransformOutput::Unchanged(token);
        };
        if !ends_block {
            tokens.push(token);
            return TransformOutput::Consumed;
        }

        let mut content = self.tokens.take().unwrap_or_default();
        let start = content.remove(0);
        TransformOutput::tokens(finish(start, content, token))
    }
}

/// Registrations shared by the collecting handlers: the directive, the end
/// of input, and everything else while collecting.
macro_rules! collector_registrations {
    ($rank:literal, $name:literal) => {{
        const R: &[Registration] = &[
            Registration::new($rank, Matcher::Tag($name), 0),
            Registration::new($rank, Matcher::End, 1),
            Registration::new($rank, Matcher::Any, 2),
        ];
        R
    }};
}

/// The `<onlyinclude>` handler. In include mode, everything outside
/// `<onlyinclude>` blocks is dropped if the page has any such block.
#[derive(Debug, Default)]
pub(super) struct OnlyInclude {
    /// Tokens outside of any block, kept in case the page has none.
    accum: Vec<Token>,
    /// Inside a block.
    in_only_include: bool,
    /// At least one block was seen.
    found: bool,
}

impl OnlyInclude {
    /// Handles a token in include mode.
    fn on_any_include(&mut self, token: Token, cx: &Context<'_>) -> TransformOutput {
        if let Token::EndOfInput(_) = token {
            self.in_only_include = false;
            let found = core::mem::take(&mut self.found);
            let mut accum = core::mem::take(&mut self.accum);
            return if !accum.is_empty() && !found {
                accum.push(token);
                TransformOutput::tokens(accum)
            } else {
                TransformOutput::tokens(vec![token])
            };
        }

        if token.name() == Some("onlyinclude") {
            if !self.in_only_include {
                self.found = true;
            }
            self.in_only_include = !self.in_only_include;
            let is_end = matches!(token, Token::EndTag(_));
            return TransformOutput::tokens(vec![marker(
                "mw:Includes/OnlyInclude",
                is_end,
                token.tsr(),
                cx,
            )]);
        }

        if self.in_only_include {
            TransformOutput::Unchanged(token)
        } else {
            self.accum.push(token);
            TransformOutput::Consumed
        }
    }
}

impl SyncHandler for OnlyInclude {
    fn registrations(&self) -> &'static [Registration] {
        const R: &[Registration] = &[
            Registration::new(10, Matcher::Tag("onlyinclude"), 0),
            Registration::new(10, Matcher::Any, 1),
        ];
        R
    }

    fn transform(&mut self, slot: u8, token: Token, cx: &Context<'_>) -> TransformOutput {
        if cx.include_mode() {
            return self.on_any_include(token, cx);
        }

        if slot == 0 {
            let is_end = matches!(token, Token::EndTag(_));
            TransformOutput::tokens(vec![marker(
                "mw:Includes/OnlyInclude",
                is_end,
                token.tsr(),
                cx,
            )])
        } else {
            TransformOutput::Unchanged(token)
        }
    }
}

/// The `<noinclude>` handler. Content is kept when the page is rendered
/// and dropped when it is transcluded.
#[derive(Debug, Default)]
pub(super) struct NoInclude(Collector);

impl SyncHandler for NoInclude {
    fn registrations(&self) -> &'static [Registration] {
        collector_registrations!(20, "noinclude")
    }

    fn enabled(&self, slot: u8) -> bool {
        slot == 0 || self.0.active()
    }

    fn transform(&mut self, _: u8, token: Token, cx: &Context<'_>) -> TransformOutput {
        const TY: &str = "mw:Includes/NoInclude";
        if self.0.active() {
            return self.0.on_token(token, "noinclude", |start, content, end| {
                let eof = matches!(end, Token::EndOfInput(_));
                let mut out = Vec::new();
                if !cx.include_mode() {
                    out.push(marker(TY, false, start.tsr(), cx));
                    out.extend(content);
                    if !eof {
                        out.push(marker(TY, true, end.tsr(), cx));
                    }
                }
                if eof {
                    out.push(end);
                }
                out
            });
        }

        match token {
            Token::StartTag(_) => {
                self.0.tokens = Some(vec![token]);
                TransformOutput::Consumed
            }
            Token::EndTag(_) => {
                log::debug!("stray </noinclude>");
                TransformOutput::tokens(vec![marker(TY, true, token.tsr(), cx)])
            }
            Token::SelfClosingTag(_) if cx.include_mode() => TransformOutput::tokens(vec![]),
            Token::SelfClosingTag(_) => {
                TransformOutput::tokens(vec![marker(TY, false, token.tsr(), cx)])
            }
            token => TransformOutput::Unchanged(token),
        }
    }
}

/// The `<includeonly>` handler. Content is dropped when the page is
/// rendered and kept when it is transcluded.
#[derive(Debug, Default)]
pub(super) struct IncludeOnly(Collector);

impl SyncHandler for IncludeOnly {
    fn registrations(&self) -> &'static [Registration] {
        collector_registrations!(30, "includeonly")
    }

    fn enabled(&self, slot: u8) -> bool {
        slot == 0 || self.0.active()
    }

    fn transform(&mut self, _: u8, token: Token, cx: &Context<'_>) -> TransformOutput {
        const TY: &str = "mw:Includes/IncludeOnly";
        if self.0.active() {
            return self.0.on_token(token, "includeonly", |start, content, end| {
                let eof = matches!(end, Token::EndOfInput(_));
                let mut out = Vec::new();
                if cx.include_mode() {
                    out.extend(content);
                } else {
                    out.push(stripped_marker(TY, &start, (!eof).then_some(&end), cx));
                    if !eof {
                        // The stripped marker covers the whole block, so the end
                        // marker is zero-width.
                        let at = end.tsr().map(|tsr| Span::new(tsr.end, tsr.end));
                        let mut end_marker = marker(TY, true, at, cx);
                        if let Some(tag) = end_marker.tag_mut() {
                            tag.meta.src = Some(String::new());
                        }
                        out.push(end_marker);
                    }
                }
                if eof {
                    out.push(end);
                }
                out
            });
        }

        match token {
            Token::StartTag(_) => {
                self.0.tokens = Some(vec![token]);
                TransformOutput::Consumed
            }
            Token::SelfClosingTag(_) | Token::EndTag(_) if cx.include_mode() => {
                TransformOutput::tokens(vec![])
            }
            Token::SelfClosingTag(_) | Token::EndTag(_) => {
                let is_end = matches!(token, Token::EndTag(_));
                TransformOutput::tokens(vec![marker(TY, is_end, token.tsr(), cx)])
            }
            token => TransformOutput::Unchanged(token),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::Configuration,
        pipeline::{Env, Frame, MemorySource, Phase, SyncTokenTransformManager},
        title::{Namespace, Title},
        tokens::tokens_to_string,
        wikitext::Tokenizer,
    };

    #[track_caller]
    fn run(source: &str, include: bool) -> Vec<Token> {
        let _ = env_logger::try_init();
        let env = Env::new(Configuration::default(), Box::new(MemorySource::default()));
        let root = Frame::root("Main Page");
        let frame = if include {
            root.new_child(&Title::new("T", Namespace::TEMPLATE), vec![])
        } else {
            root
        };
        let tokens = Tokenizer::new(["nowiki"]).tokenize(source).unwrap();
        let cx = Context::new(&env, &frame, Some(source));
        let mut manager = SyncTokenTransformManager::new(
            Phase::One,
            vec![
                Box::new(OnlyInclude::default()),
                Box::new(NoInclude::default()),
                Box::new(IncludeOnly::default()),
            ],
        )
        .unwrap();
        manager.process(tokens, &cx)
    }

    fn types(tokens: &[Token]) -> Vec<String> {
        tokens
            .iter()
            .filter_map(|t| t.tag()?.attr_text("typeof").map(|t| t.into_owned()))
            .collect()
    }

    #[test]
    fn noinclude_on_page() {
        let tokens = run("a<noinclude>b</noinclude>c", false);
        assert_eq!(tokens_to_string(&tokens), "abc");
        assert_eq!(
            types(&tokens),
            ["mw:Includes/NoInclude", "mw:Includes/NoInclude/End"]
        );
        assert_eq!(tokens[1].meta().unwrap().src.as_deref(), Some("<noinclude>"));
    }

    #[test]
    fn noinclude_transcluded() {
        let tokens = run("a<noinclude>b</noinclude>c", true);
        assert_eq!(tokens_to_string(&tokens), "ac");
        assert!(types(&tokens).is_empty());
    }

    #[test]
    fn includeonly_on_page() {
        let source = "a<includeonly>b</includeonly>c";
        let tokens = run(source, false);
        assert_eq!(tokens_to_string(&tokens), "ac");
        let meta = tokens[1].meta().unwrap();
        assert_eq!(meta.src.as_deref(), Some("<includeonly>b</includeonly>"));
        assert_eq!(meta.tsr, Some(Span::new(1, 29)));
        let end = tokens[2].meta().unwrap();
        assert_eq!(end.tsr, Some(Span::new(29, 29)));
    }

    #[test]
    fn includeonly_transcluded() {
        let tokens = run("a<includeonly>b</includeonly>c", true);
        assert_eq!(tokens_to_string(&tokens), "abc");
    }

    #[test]
    fn unclosed_includeonly_runs_to_end() {
        let tokens = run("a<includeonly>b", false);
        assert_eq!(tokens_to_string(&tokens), "a");
        assert_eq!(tokens[1].tsr(), Some(Span::new(1, 15)));
        assert!(matches!(tokens.last(), Some(Token::EndOfInput(_))));
    }

    #[test]
    fn onlyinclude_transcluded() {
        let tokens = run("a<onlyinclude>b</onlyinclude>c", true);
        assert_eq!(tokens_to_string(&tokens), "b");

        let tokens = run("abc", true);
        assert_eq!(tokens_to_string(&tokens), "abc");
    }
}
