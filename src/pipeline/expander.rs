//! The fetch-and-expand capability shared by template and extension
//! handlers.

use super::{
    AsyncTokenTransformManager, Context, Env, FetchError, Frame, LocalBoxFuture, Phase, Result,
    SyncTokenTransformManager,
};
use crate::{
    title::Title,
    tokens::{Token, strip_eof},
    transforms,
};
use core::cell::Cell;
use std::{collections::HashMap, path::PathBuf, rc::Rc};

/// A provider of template source text.
pub(crate) trait TemplateSource {
    /// Fetches the wikitext of the page with the given title.
    fn fetch<'a>(&'a self, title: &'a Title) -> LocalBoxFuture<'a, Result<String, FetchError>>;

    /// Fully expands `wikitext` as if it were the content of `title`, using
    /// an external preprocessor.
    fn preprocess<'a>(
        &'a self,
        wikitext: &'a str,
        title: &'a Title,
    ) -> LocalBoxFuture<'a, Result<String, FetchError>> {
        let _ = (wikitext, title);
        Box::pin(core::future::ready(Err(FetchError::Unsupported)))
    }
}

/// An in-memory template source.
#[derive(Debug, Default)]
pub(crate) struct MemorySource {
    /// Page text and the number of times to yield before returning it,
    /// keyed by normalised title.
    pages: HashMap<String, (String, usize)>,
    /// The number of fetches made.
    fetches: Rc<Cell<usize>>,
}

impl MemorySource {
    /// Adds a template page. `title` is resolved in the template namespace.
    #[cfg(test)]
    #[must_use]
    pub fn with(self, title: &str, text: &str) -> Self {
        self.delayed(title, text, 0)
    }

    /// Adds a template page whose fetch yields to the scheduler `yields`
    /// times before completing.
    #[cfg(test)]
    #[must_use]
    pub fn delayed(mut self, title: &str, text: &str, yields: usize) -> Self {
        let title = Title::new(title, crate::title::Namespace::TEMPLATE);
        self.pages
            .insert(title.key().to_string(), (text.to_string(), yields));
        self
    }

    /// A shared counter of the fetches made through this source.
    #[cfg(test)]
    pub fn fetch_counter(&self) -> Rc<Cell<usize>> {
        Rc::clone(&self.fetches)
    }
}

impl TemplateSource for MemorySource {
    fn fetch<'a>(&'a self, title: &'a Title) -> LocalBoxFuture<'a, Result<String, FetchError>> {
        Box::pin(async move {
            self.fetches.set(self.fetches.get() + 1);
            let Some((text, yields)) = self.pages.get(title.key()) else {
                return Err(FetchError::NotFound(title.to_string()));
            };
            for _ in 0..*yields {
                tokio::task::yield_now().await;
            }
            Ok(text.clone())
        })
    }
}

/// A template source reading `<title>.wikitext` files from a directory.
/// Spaces in titles are stored as underscores.
#[derive(Debug)]
pub(crate) struct DirectorySource(pub PathBuf);

impl DirectorySource {
    /// The path of the file holding the page with the given title.
    fn path(&self, title: &Title) -> PathBuf {
        self.0
            .join(format!("{}.wikitext", title.key().replace(' ', "_")))
    }
}

impl TemplateSource for DirectorySource {
    fn fetch<'a>(&'a self, title: &'a Title) -> LocalBoxFuture<'a, Result<String, FetchError>> {
        Box::pin(async move {
            let path = self.path(title);
            log::debug!("reading {}", path.display());
            tokio::fs::read_to_string(&path)
                .await
                .map_err(|err| match err.kind() {
                    std::io::ErrorKind::NotFound => FetchError::NotFound(title.to_string()),
                    _ => FetchError::Io {
                        title: title.to_string(),
                        message: err.to_string(),
                    },
                })
        })
    }
}

/// The environment and frame a pipeline runs in, plus the operations
/// handlers need to start nested pipelines.
#[derive(Clone, Debug)]
pub(crate) struct Expander {
    /// The shared environment.
    pub env: Rc<Env>,
    /// The current frame.
    pub frame: Rc<Frame>,
    /// Whether this is the pipeline of the page itself, whose tokens map
    /// directly to the page source. Only top-level transclusions are
    /// encapsulated.
    pub toplevel: bool,
}

impl Expander {
    /// Creates an expander for a nested pipeline.
    pub fn new(env: Rc<Env>, frame: Rc<Frame>) -> Self {
        Self {
            env,
            frame,
            toplevel: false,
        }
    }

    /// Creates an expander for the pipeline of the page itself.
    pub fn for_page(env: Rc<Env>, frame: Rc<Frame>) -> Self {
        Self {
            env,
            frame,
            toplevel: true,
        }
    }

    /// Returns an expander for a nested pipeline working in `frame`.
    #[must_use]
    pub fn with_frame(&self, frame: Rc<Frame>) -> Self {
        Self::new(Rc::clone(&self.env), frame)
    }

    /// Fetches the source of a page. Concurrent and repeated requests for
    /// the same title share one fetch.
    pub async fn fetch(&self, title: &Title) -> Result<Rc<str>> {
        self.env.cancellation().check()?;
        let env = &self.env;
        let source = env
            .sources
            .get_or_init(title.key().to_string(), || async {
                log::debug!("fetching {title}");
                env.templates.fetch(title).await.map(Rc::from)
            })
            .await?;
        Ok(source)
    }

    /// Runs `tokens` through phase 1 and phase 2 in the current frame.
    /// `source` is the text the tokens were produced from, if known.
    pub async fn expand_tokens(&self, tokens: Vec<Token>, source: Option<&str>) -> Result<Vec<Token>> {
        self.env.cancellation().check()?;

        let tokens = {
            let cx = Context::new(&self.env, &self.frame, source);
            let mut phase1 = SyncTokenTransformManager::new(Phase::One, transforms::phase1())?;
            phase1.process(tokens, &cx)
        };

        let phase2 = AsyncTokenTransformManager::new(self.clone(), transforms::phase2())?;
        Ok(phase2.process(tokens).await)
    }

    /// Tokenizes and expands `source` in `frame`. The result has no
    /// end-of-input token.
    pub async fn expand_source(&self, source: &str, frame: Rc<Frame>) -> Result<Vec<Token>> {
        self.env.cancellation().check()?;
        let tokens = self.env.tokenizer.tokenize(source)?;
        let mut out = self
            .with_frame(frame)
            .expand_tokens(tokens, Some(source))
            .await?;
        strip_eof(&mut out);
        Ok(out)
    }

    /// Tokenizes and expands `text` in the current frame.
    pub async fn expand_wikitext(&self, text: &str) -> Result<Vec<Token>> {
        self.expand_source(text, Rc::clone(&self.frame)).await
    }
}
