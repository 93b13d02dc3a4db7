//! Template expansion frames.

use super::{Env, Expander, LocalBoxFuture};
use crate::{
    title::Title,
    tokens::{Token, strip_eof, tokens_to_string},
};
use core::hash::{Hash, Hasher};
use std::{collections::hash_map::DefaultHasher, rc::Rc};

/// An expansion guard error. These are rendered inline.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub(crate) enum ExpansionError {
    /// Too many nested template calls.
    #[error("Error: Expansion depth limit exceeded at {0}")]
    DepthExceeded(String),
    /// A template called back into itself.
    #[error("Error: Expansion loop detected at {0}")]
    Loop(String),
}

/// The form an expansion result should take.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub(crate) enum OutputType {
    /// A token sequence.
    Tokens,
    /// A flattened string.
    Text,
}

/// An expansion result.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) enum Expanded {
    /// A token sequence.
    Tokens(Vec<Token>),
    /// A flattened string.
    Text(String),
}

impl Expanded {
    /// Converts the result to tokens.
    pub fn into_tokens(self) -> Vec<Token> {
        match self {
            Expanded::Tokens(tokens) => tokens,
            Expanded::Text(text) if text.is_empty() => Vec::new(),
            Expanded::Text(text) => vec![Token::Text(text)],
        }
    }

    /// Converts the result to a string.
    pub fn into_text(self) -> String {
        match self {
            Expanded::Tokens(tokens) => tokens_to_string(&tokens),
            Expanded::Text(text) => text,
        }
    }
}

/// A lazily expanded template argument.
#[derive(Clone, Debug)]
pub(crate) struct ParserValue {
    /// The unexpanded value.
    pub tokens: Vec<Token>,
    /// The original source of the value.
    pub src: String,
    /// The frame the value must be expanded in, i.e. the caller’s frame.
    pub frame: Rc<Frame>,
    /// Whether the argument was passed by name. Named values are trimmed.
    pub named: bool,
}

impl ParserValue {
    /// Expands the value in its owning frame.
    pub async fn expand(&self, env: &Rc<Env>, output: OutputType) -> Expanded {
        let expanded = self.frame.expand(env, self.tokens.clone(), output).await;
        if !self.named {
            return expanded;
        }

        match expanded {
            Expanded::Text(text) => Expanded::Text(text.trim().to_string()),
            Expanded::Tokens(tokens) => Expanded::Tokens(trim_tokens(tokens)),
        }
    }
}

/// A template expansion frame.
#[derive(Debug)]
pub(crate) struct Frame {
    /// The title of the page rendered by this frame.
    pub title: String,
    /// The arguments passed in from the parent, in call order.
    pub args: Vec<(String, ParserValue)>,
    /// The parent frame.
    pub parent: Option<Rc<Frame>>,
    /// The number of frames above this one.
    pub depth: usize,
    /// A key identifying this frame’s ancestry and arguments, used to share
    /// expansion results between identical frames.
    pub cache_key: u64,
}

impl Frame {
    /// Creates the frame of the top-level page.
    pub fn root(title: &str) -> Rc<Self> {
        let mut hasher = DefaultHasher::new();
        title.hash(&mut hasher);
        Rc::new(Self {
            title: title.to_string(),
            args: Vec::new(),
            parent: None,
            depth: 0,
            cache_key: hasher.finish(),
        })
    }

    /// Creates a frame for transcluding `title` from this frame.
    pub fn new_child(self: &Rc<Self>, title: &Title, args: Vec<(String, ParserValue)>) -> Rc<Self> {
        let mut hasher = DefaultHasher::new();
        self.cache_key.hash(&mut hasher);
        title.key().hash(&mut hasher);
        for (key, value) in &args {
            key.hash(&mut hasher);
            value.tokens.hash(&mut hasher);
        }

        Rc::new(Self {
            title: title.to_string(),
            args,
            parent: Some(Rc::clone(self)),
            depth: self.depth + 1,
            cache_key: hasher.finish(),
        })
    }

    /// Enforces the maximum expansion depth and ensures that `title` is not
    /// already being expanded by this frame or one of its ancestors.
    ///
    /// Only template frames participate in loop checking, so a template may
    /// transclude the page that transcluded it.
    pub fn loop_and_depth_check(&self, title: &str, max_depth: usize) -> Result<(), ExpansionError> {
        if self.depth + 1 > max_depth {
            self.backtrace(title);
            return Err(ExpansionError::DepthExceeded(title.to_string()));
        }

        let mut frame = Some(self);
        while let Some(f) = frame {
            if f.parent.is_some() && f.title == title {
                self.backtrace(title);
                return Err(ExpansionError::Loop(title.to_string()));
            }
            frame = f.parent.as_deref();
        }

        Ok(())
    }

    /// Finds the argument with the given name. Later duplicates win.
    pub fn arg(&self, name: &str) -> Option<&ParserValue> {
        self.args
            .iter()
            .rev()
            .find_map(|(key, value)| (key == name).then_some(value))
    }

    /// Expands `tokens` in this frame.
    ///
    /// The tokens go through a fresh phase 1 and phase 2 pipeline. Results
    /// are shared between identical requests, including concurrent ones.
    pub fn expand(
        self: &Rc<Self>,
        env: &Rc<Env>,
        tokens: Vec<Token>,
        output: OutputType,
    ) -> LocalBoxFuture<'static, Expanded> {
        let mut hasher = DefaultHasher::new();
        tokens.hash(&mut hasher);
        let key = (self.cache_key, hasher.finish(), output);

        let frame = Rc::clone(self);
        let env = Rc::clone(env);
        Box::pin(async move {
            let cache_env = Rc::clone(&env);
            cache_env
                .expansions
                .get_or_init(key, || async move {
                    let mut tokens = tokens;
                    if !matches!(tokens.last(), Some(Token::EndOfInput(_))) {
                        tokens.push(Token::eof());
                    }

                    let expander = Expander::new(Rc::clone(&env), frame);
                    let mut out = match expander.expand_tokens(tokens, None).await {
                        Ok(out) => out,
                        Err(err) => {
                            env.report(err);
                            Vec::new()
                        }
                    };
                    strip_eof(&mut out);

                    match output {
                        OutputType::Tokens => Expanded::Tokens(out),
                        OutputType::Text => Expanded::Text(tokens_to_string(&out)),
                    }
                })
                .await
        })
    }

    /// Emits the frame chain to the error log.
    fn backtrace(&self, title: &str) {
        let mut index = 0;
        log::error!("{index:>2}. {title}");
        let mut frame = Some(self);
        while let Some(f) = frame {
            index += 1;
            log::error!("{index:>2}. {}", f.title);
            frame = f.parent.as_deref();
        }
    }
}

/// Trims whitespace from the text at both ends of a token sequence.
fn trim_tokens(mut tokens: Vec<Token>) -> Vec<Token> {
    while let Some(Token::Newline(_)) = tokens.first() {
        tokens.remove(0);
    }
    while let Some(Token::Newline(_)) = tokens.last() {
        tokens.pop();
    }
    if let Some(Token::Text(text)) = tokens.first_mut() {
        *text = text.trim_start().to_string();
    }
    if let Some(Token::Text(text)) = tokens.last_mut() {
        *text = text.trim_end().to_string();
    }
    tokens.retain(|t| !matches!(t, Token::Text(text) if text.is_empty()));
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::title::Namespace;

    fn template(name: &str) -> Title {
        Title::new(name, Namespace::TEMPLATE)
    }

    #[test]
    fn direct_self_transclusion_is_a_loop() {
        let root = Frame::root("Main Page");
        let a = template("A");
        assert!(root.loop_and_depth_check(&a.to_string(), 40).is_ok());
        let child = root.new_child(&a, Vec::new());
        assert_eq!(
            child.loop_and_depth_check(&a.to_string(), 40),
            Err(ExpansionError::Loop("Template:A".into()))
        );
    }

    #[test]
    fn depth_limit() {
        let max_depth = 3;
        let mut frame = Frame::root("Main Page");
        for n in 1..=max_depth {
            let title = template(&format!("T{n}"));
            assert!(frame.loop_and_depth_check(&title.to_string(), max_depth).is_ok());
            frame = frame.new_child(&title, Vec::new());
        }
        let title = template("Too deep");
        assert_eq!(
            frame.loop_and_depth_check(&title.to_string(), max_depth),
            Err(ExpansionError::DepthExceeded("Template:Too deep".into()))
        );
    }

    #[test]
    fn cache_key_depends_on_args() {
        let root = Frame::root("Main Page");
        let a = template("A");
        let value = |text: &str| ParserValue {
            tokens: vec![Token::text(text)],
            src: text.into(),
            frame: Rc::clone(&root),
            named: false,
        };
        let x1 = root.new_child(&a, vec![("1".into(), value("x"))]);
        let x2 = root.new_child(&a, vec![("1".into(), value("x"))]);
        let y = root.new_child(&a, vec![("1".into(), value("y"))]);
        assert_eq!(x1.cache_key, x2.cache_key);
        assert_ne!(x1.cache_key, y.cache_key);
        assert_eq!(y.depth, 1);
    }

    #[test]
    fn later_duplicate_args_win() {
        let root = Frame::root("Main Page");
        let value = |text: &str| ParserValue {
            tokens: vec![Token::text(text)],
            src: text.into(),
            frame: Rc::clone(&root),
            named: true,
        };
        let frame = root.new_child(
            &template("A"),
            vec![("k".into(), value("first")), ("k".into(), value("second"))],
        );
        assert_eq!(frame.arg("k").unwrap().src, "second");
        assert!(frame.arg("missing").is_none());
    }

    #[test]
    fn trims_named_values() {
        let tokens = trim_tokens(vec![
            Token::text("  a"),
            Token::start("b", vec![]),
            Token::text("c \n"),
        ]);
        assert_eq!(tokens[0], Token::text("a"));
        assert_eq!(tokens[2], Token::text("c"));
    }
}
