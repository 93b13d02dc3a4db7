use super::*;
use crate::tokens::{Token, tokens_to_string};

/// Expands `source` through phases 1 and 2 as the page.
#[track_caller]
fn expand_in(env: Env, source: &str) -> (Rc<Env>, Result<Vec<Token>>) {
    let _ = env_logger::try_init();
    let env = Rc::new(env);
    let ex = Expander::for_page(Rc::clone(&env), Frame::root("Main Page"));
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    let result = tokio::task::LocalSet::new().block_on(&runtime, async {
        let tokens = env.tokenizer.tokenize(source)?;
        ex.expand_tokens(tokens, Some(source)).await
    });
    (env, result)
}

#[track_caller]
fn expand(templates: MemorySource, source: &str) -> String {
    let env = Env::new(Configuration::default(), Box::new(templates));
    let (_, tokens) = expand_in(env, source);
    tokens_to_string(&tokens.unwrap())
}

#[test]
fn output_order_matches_source_order() {
    let templates = MemorySource::default()
        .delayed("Slow", "first", 5)
        .with("Fast", "second");
    assert_eq!(
        expand(templates, "{{slow}} mid {{fast}} end"),
        "first mid second end"
    );
}

#[test]
fn nested_expansions_keep_order() {
    let templates = MemorySource::default()
        .with("Outer", "({{{1}}})")
        .delayed("Inner", "in", 3);
    assert_eq!(expand(templates, "a{{outer|{{inner}}}}b"), "a(in)b");
}

#[test]
fn argument_defaults() {
    let templates = MemorySource::default().with("Greet", "{{{who|world}}} {{{1|}}}!");
    assert_eq!(expand(templates, "{{greet}}"), "world !");

    let templates = MemorySource::default().with("Greet", "{{{who|world}}}");
    assert_eq!(expand(templates, "{{greet| who = you }}"), "you");

    assert_eq!(expand(MemorySource::default(), "{{{x|def}}}"), "def");
}

#[test]
fn self_transclusion_is_reported_inline() {
    let templates = MemorySource::default().with("Loop", "x{{loop}}");
    assert_eq!(
        expand(templates, "{{loop}}"),
        "xError: Expansion loop detected at Template:Loop"
    );
}

#[test]
fn depth_limit_is_reported_inline() {
    let templates = MemorySource::default()
        .with("D1", "1{{d2}}")
        .with("D2", "2{{d3}}")
        .with("D3", "3");
    let config = Configuration {
        max_depth: 2,
        ..<_>::default()
    };
    let env = Env::new(config, Box::new(templates));
    let (_, tokens) = expand_in(env, "{{d1}}");
    assert_eq!(
        tokens_to_string(&tokens.unwrap()),
        "12Error: Expansion depth limit exceeded at Template:D3"
    );
}

#[test]
fn concurrent_fetches_share_one_request() {
    let templates = MemorySource::default().delayed("Slow", "x", 3);
    let fetches = templates.fetch_counter();
    assert_eq!(expand(templates, "{{slow}}{{slow}}{{slow}}"), "xxx");
    assert_eq!(fetches.get(), 1);
}

#[test]
fn missing_template_is_fetched_once() {
    let templates = MemorySource::default();
    let fetches = templates.fetch_counter();
    let out = expand(templates, "{{nope}} {{nope}}");
    assert_eq!(out, "Template:Nope Template:Nope");
    assert_eq!(fetches.get(), 1);
}

#[test]
fn cancelled_expansion_fails() {
    let env = Env::new(<_>::default(), Box::new(MemorySource::default()));
    env.cancellation().cancel();
    let (_, result) = expand_in(env, "a");
    assert!(matches!(result, Err(Error::Cancelled)));
}

#[test]
fn reported_error_cancels_later_expansions() {
    let env = Env::new(<_>::default(), Box::new(MemorySource::default()));
    assert!(!env.cancellation().is_cancelled());
    env.report(Error::Async("child expansion ended early".into()));
    assert!(env.cancellation().is_cancelled());
    let (env, result) = expand_in(env, "a");
    assert!(matches!(result, Err(Error::Cancelled)));
    assert_eq!(env.take_errors().len(), 1);
}

#[test]
fn bypass_without_preprocessor_is_inline_error() {
    let config = Configuration {
        bypass_preprocessor: true,
        ..<_>::default()
    };
    let env = Env::new(config, Box::new(MemorySource::default().with("A", "a")));
    let (env, tokens) = expand_in(env, "{{a}}");
    let out = tokens_to_string(&tokens.unwrap());
    assert_eq!(out, FetchError::Unsupported.to_string());
    assert!(env.take_errors().is_empty());
}

#[test]
fn about_ids_are_unique() {
    let env = Env::new(<_>::default(), Box::new(MemorySource::default()));
    assert_eq!(env.new_about_id(), "#mwt1");
    let fragment = env.store_fragment("<pre>x</pre>".into());
    assert_eq!(fragment, "mwf2");
    assert_eq!(env.new_about_id(), "#mwt3");
    assert_eq!(env.take_fragment(&fragment).as_deref(), Some("<pre>x</pre>"));
    assert!(env.take_fragment(&fragment).is_none());
}

#[test]
fn page_props_are_deduplicated() {
    let env = Env::new(<_>::default(), Box::new(MemorySource::default()));
    env.set_page_prop("notoc");
    env.set_page_prop("notoc");
    env.set_page_prop("index");
    assert_eq!(env.page_props(), ["notoc", "index"]);
}
