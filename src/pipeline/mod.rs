//! The staged token transform pipeline.
//!
//! A page goes through three transform phases between the tokenizer and the
//! tree builder:
//!
//! 1. synchronous transforms on the raw token stream (include directives,
//!    behavior switch bookkeeping);
//! 2. asynchronous transforms that may suspend waiting on template sources
//!    or sub-pipelines (templates, extensions, attribute expansion, links);
//! 3. synchronous transforms on the fully expanded stream (quotes, lists,
//!    paragraphs).
//!
//! Every pipeline shares one [`Env`], which owns the configuration, the
//! collaborators, and the write-once caches.

pub(crate) use self::{
    async_manager::{AsyncHandler, AsyncOutput, AsyncTokenTransformManager},
    attributes::AttributeTransformManager,
    expander::{DirectorySource, Expander, MemorySource, TemplateSource},
    frame::{Expanded, ExpansionError, Frame, OutputType, ParserValue},
    manager::{
        Context, Matcher, Phase, Rank, Registration, SyncHandler, SyncTokenTransformManager,
        TransformOutput,
    },
};
use crate::{
    config::Configuration,
    diff,
    dom::{self, Document},
    serializer::{self, SelectiveSerializer, WikitextSerializer},
    transforms::extension::Registry,
    wikitext::Tokenizer,
};
use cache::SingleFlight;
use core::{cell::Cell, cell::RefCell, future::Future, pin::Pin};
use std::{collections::HashMap, rc::Rc};

mod accumulator;
mod async_manager;
mod attributes;
mod cache;
mod expander;
mod frame;
mod manager;
#[cfg(test)]
mod tests;

/// A boxed future that is not required to be [`Send`].
pub(crate) type LocalBoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + 'a>>;

/// A pipeline error.
#[derive(Debug, thiserror::Error)]
pub(crate) enum Error {
    /// A transform was registered outside the rank window of its phase.
    #[error("transform rank {rank} is outside the {phase:?} window")]
    RankOutOfPhase {
        /// The rejected rank.
        rank: Rank,
        /// The phase being registered.
        phase: Phase,
    },

    /// Two transforms were registered for the same token type at the same
    /// rank.
    #[error("duplicate transform for {matcher:?} at rank {rank}")]
    DuplicateRank {
        /// The token matcher.
        matcher: Matcher,
        /// The duplicated rank.
        rank: Rank,
    },

    /// A template source could not be fetched.
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// The pipeline was cancelled.
    #[error("expansion cancelled")]
    Cancelled,

    /// The wikitext could not be tokenized.
    #[error(transparent)]
    Tokenizer(#[from] crate::wikitext::Error),

    /// The async runtime could not be created.
    #[error("runtime error: {0}")]
    Runtime(#[from] std::io::Error),

    /// Work inside an asynchronous expansion ended without delivering its
    /// result.
    #[error("async expansion failed: {0}")]
    Async(String),

    /// An HTML document could not be read.
    #[error(transparent)]
    Dom(#[from] dom::Error),

    /// A document could not be serialized.
    #[error(transparent)]
    Serializer(#[from] serializer::Error),
}

/// The standard result type used by all fallible pipeline functions.
pub(crate) type Result<T = (), E = Error> = core::result::Result<T, E>;

/// A template source fetch error.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub(crate) enum FetchError {
    /// No page exists with the given title.
    #[error("page not found: {0}")]
    NotFound(String),

    /// The source could not be read.
    #[error("could not read {title}: {message}")]
    Io {
        /// The title of the page.
        title: String,
        /// The underlying error message.
        message: String,
    },

    /// The source does not support the requested operation.
    #[error("operation not supported by this source")]
    Unsupported,
}

/// A cooperative cancellation flag shared by every expansion of a pipeline.
#[derive(Clone, Debug, Default)]
pub(crate) struct CancellationFlag(Rc<Cell<bool>>);

impl CancellationFlag {
    /// Requests cancellation.
    pub fn cancel(&self) {
        self.0.set(true);
    }

    /// Returns true if cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.get()
    }

    /// Returns [`Error::Cancelled`] if cancellation was requested.
    pub fn check(&self) -> Result {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Pipeline-scoped state.
///
/// One environment is created per conversion and handed to every manager,
/// frame, and handler that participates in it.
pub(crate) struct Env {
    /// Runtime options.
    pub config: Configuration,
    /// The tokenizer.
    pub tokenizer: Tokenizer,
    /// The template source collaborator.
    pub templates: Box<dyn TemplateSource>,
    /// Registered extension tags.
    pub extensions: Registry,
    /// Fetched template sources, keyed by title.
    sources: SingleFlight<String, Result<Rc<str>, FetchError>>,
    /// Memoised frame expansions.
    expansions: SingleFlight<(u64, u64, OutputType), Expanded>,
    /// Behavior switches seen on the page.
    page_props: RefCell<Vec<String>>,
    /// Errors which escaped asynchronous work.
    errors: RefCell<Vec<Error>>,
    /// HTML fragments produced by extensions, waiting to be unpacked into
    /// the DOM.
    fragments: RefCell<HashMap<String, String>>,
    /// The next free identifier for about groups and fragments.
    next_id: Cell<usize>,
    /// The cancellation flag.
    cancellation: CancellationFlag,
    /// Whether the preprocessor bypass warning was already logged.
    bypass_warned: Cell<bool>,
}

impl core::fmt::Debug for Env {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Env")
            .field("config", &self.config)
            .field("page_props", &self.page_props)
            .finish_non_exhaustive()
    }
}

impl Env {
    /// Creates a new environment with the built-in extension tags.
    pub fn new(config: Configuration, templates: Box<dyn TemplateSource>) -> Self {
        Self::with_extensions(config, templates, Registry::with_builtins())
    }

    /// Creates a new environment with the given extension registry.
    pub fn with_extensions(
        config: Configuration,
        templates: Box<dyn TemplateSource>,
        extensions: Registry,
    ) -> Self {
        Self {
            tokenizer: Tokenizer::new(extensions.names()),
            config,
            templates,
            extensions,
            sources: <_>::default(),
            expansions: <_>::default(),
            page_props: <_>::default(),
            errors: <_>::default(),
            fragments: <_>::default(),
            next_id: Cell::new(1),
            cancellation: <_>::default(),
            bypass_warned: Cell::new(false),
        }
    }

    /// The cancellation flag for this environment.
    pub fn cancellation(&self) -> &CancellationFlag {
        &self.cancellation
    }

    /// Records a behavior switch.
    pub fn set_page_prop(&self, word: &str) {
        let mut props = self.page_props.borrow_mut();
        if !props.iter().any(|p| p == word) {
            props.push(word.to_string());
        }
    }

    /// The behavior switches seen so far.
    #[cfg(test)]
    pub fn page_props(&self) -> Vec<String> {
        self.page_props.borrow().clone()
    }

    /// Reports an error which escaped an asynchronous expansion. The
    /// conversion will fail, so expansions which have not started yet are
    /// cancelled.
    pub fn report(&self, err: Error) {
        log::error!("{err}");
        self.errors.borrow_mut().push(err);
        self.cancellation.cancel();
    }

    /// Removes and returns all reported errors.
    pub fn take_errors(&self) -> Vec<Error> {
        core::mem::take(&mut *self.errors.borrow_mut())
    }

    /// Returns a new about-group identifier, like `#mwt1`.
    pub fn new_about_id(&self) -> String {
        format!("#mwt{}", self.next_id())
    }

    /// Stores an HTML fragment and returns its identifier.
    pub fn store_fragment(&self, html: String) -> String {
        let id = format!("mwf{}", self.next_id());
        self.fragments.borrow_mut().insert(id.clone(), html);
        id
    }

    /// Removes and returns the HTML fragment with the given identifier.
    pub fn take_fragment(&self, id: &str) -> Option<String> {
        self.fragments.borrow_mut().remove(id)
    }

    /// Logs the preprocessor bypass warning once per environment.
    pub fn warn_bypass(&self) {
        if !self.bypass_warned.replace(true) {
            log::warn!(
                "expanding templates through the external preprocessor; \
                 the expansion loop and depth guard is not applied on this path"
            );
        }
    }

    /// Returns the next identifier.
    fn next_id(&self) -> usize {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        id
    }
}

/// The public conversion API.
pub(crate) struct Parser {
    /// The shared environment.
    env: Rc<Env>,
}

impl Parser {
    /// Creates a new parser.
    pub fn new(env: Env) -> Self {
        Self { env: Rc::new(env) }
    }

    /// Converts wikitext to an annotated document.
    ///
    /// Expansion-local failures are rendered inline. Failures which escaped
    /// asynchronous work are returned as an error.
    pub async fn parse(&self, source: &str) -> Result<Document> {
        let frame = Frame::root(&self.env.config.page_name);
        let expander = Expander::for_page(Rc::clone(&self.env), frame);

        let tokens = self.env.tokenizer.tokenize(source)?;
        let tokens = expander.expand_tokens(tokens, Some(source)).await?;

        let cx = Context::new(&self.env, &expander.frame, Some(source));
        let mut phase3 =
            SyncTokenTransformManager::new(Phase::Three, crate::transforms::phase3())?;
        let tokens = phase3.process(tokens, &cx);

        let mut doc = dom::builder::build(tokens);
        dom::postprocess(&mut doc, &self.env, source);

        if let Some(err) = self.env.take_errors().into_iter().next() {
            return Err(err);
        }

        Ok(doc)
    }

    /// Converts wikitext to an annotated document, blocking until done.
    pub fn wt2html(&self, source: &str) -> Result<Document> {
        self.block_on(self.parse(source))?
    }

    /// Converts a document back to wikitext.
    ///
    /// If the original wikitext is given, the document is diffed against it
    /// and serialized selectively, so unedited parts keep their exact
    /// source.
    pub fn html2wt(&self, doc: &mut Document, old: Option<&str>) -> Result<String> {
        let Some(old) = old else {
            return Ok(WikitextSerializer::new(&self.env).serialize(doc, None)?);
        };

        let base = self.wt2html(old)?;
        let changed = diff::diff(&base, doc, self.env.config.revision_id);
        if !changed {
            log::debug!(target: "wiki_roundtrip::selser", "no changes; reusing source");
            return Ok(old.to_string());
        }

        Ok(SelectiveSerializer::new(&self.env).serialize(doc, old)?)
    }

    /// Converts wikitext to a document and straight back.
    ///
    /// With round-trip testing enabled, the full serializer is used with the
    /// original source available for separators; otherwise the selective
    /// serializer is used.
    pub fn wt2wt(&self, source: &str) -> Result<String> {
        let doc = self.wt2html(source)?;
        if self.env.config.rt_testing {
            Ok(WikitextSerializer::new(&self.env).serialize(&doc, Some(source))?)
        } else {
            Ok(SelectiveSerializer::new(&self.env).serialize(&doc, source)?)
        }
    }

    /// Converts HTML to wikitext and back to HTML.
    pub fn html2html(&self, html: &str) -> Result<String> {
        let mut doc = dom::html::from_html(html)?;
        let wikitext = self.html2wt(&mut doc, None)?;
        let doc = self.wt2html(&wikitext)?;
        Ok(dom::html::to_html(&doc))
    }

    /// Runs a future to completion on a single-threaded runtime.
    fn block_on<F: Future>(&self, fut: F) -> Result<F::Output> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let local = tokio::task::LocalSet::new();
        Ok(local.block_on(&runtime, fut))
    }
}
