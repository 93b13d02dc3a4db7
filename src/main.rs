use crate::{
    config::Configuration,
    pipeline::{DirectorySource, Env, MemorySource, Parser, TemplateSource},
};
use std::{
    fmt::Write as _,
    io::{Read as _, Write as _},
};

mod config;
mod diff;
mod dom;
mod pipeline;
mod serializer;
mod title;
mod tokens;
mod transforms;
mod wikitext;

/// A conversion direction.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
enum Mode {
    #[default]
    Wt2Html,
    Html2Wt,
    Wt2Wt,
    Html2Html,
}

fn usage<T>(err: &'static str) -> anyhow::Result<T> {
    let exe = std::env::args().next().unwrap_or_default();
    println!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
    println!("Usage: {exe} [mode] [options] < input > output\n");
    println!("Modes:");
    println!("    --wt2html: Convert wikitext to HTML (default)");
    println!("    --html2wt: Convert HTML to wikitext");
    println!("    --wt2wt: Convert wikitext to HTML and back");
    println!("    --html2html: Convert HTML to wikitext and back\n");
    println!("Options:");
    println!("    --selser: Serialize only what changed (html2wt; needs --oldtextfile)");
    println!("    --oldtextfile <file>: The wikitext the input HTML was made from");
    println!("    --templates <dir>: Read templates from <dir>/<Title>.wikitext");
    println!("    --config <file>: Read options from a JSON file");
    println!("    --max-depth <n>: Maximum template expansion depth");
    println!("    --bypass-preprocessor: Expand templates externally");
    println!("    --rt-testing: Reuse original separators in wt2wt");
    println!("    --debug: Log at debug level");
    println!("    --trace <list>: Trace the comma-separated channels");
    println!("        (sync, async, dsr, tree, list, quote, p_wrap,");
    println!("        wts, wts::sep, selser, diff, all)\n");
    Err(anyhow::Error::msg(err))
}

/// Builds the log filter from the trace channels.
fn log_filter(debug: bool, trace: &[String]) -> String {
    let mut filter = String::from(if debug { "debug" } else { "warn" });
    for channel in trace {
        if channel == "all" {
            filter.push_str(",wiki_roundtrip=trace");
        } else {
            let _ = write!(filter, ",wiki_roundtrip::{channel}=trace");
        }
    }
    filter
}

fn main() -> anyhow::Result<()> {
    let mut args = pico_args::Arguments::from_env();

    let modes = [
        ("--wt2html", Mode::Wt2Html),
        ("--html2wt", Mode::Html2Wt),
        ("--wt2wt", Mode::Wt2Wt),
        ("--html2html", Mode::Html2Html),
    ];
    let mut mode = None;
    for (flag, value) in modes {
        if args.contains(flag) {
            if mode.is_some() {
                return usage("Only one mode can be given");
            }
            mode = Some(value);
        }
    }
    let mode = mode.unwrap_or_default();

    let selser = args.contains("--selser");
    let old_text_file = args.opt_value_from_str::<_, String>("--oldtextfile")?;
    let templates = args.opt_value_from_str::<_, String>("--templates")?;
    let config_file = args.opt_value_from_str::<_, String>("--config")?;
    let max_depth = args.opt_value_from_str::<_, usize>("--max-depth")?;
    let bypass_preprocessor = args.contains("--bypass-preprocessor");
    let rt_testing = args.contains("--rt-testing");
    let debug = args.contains("--debug");
    let trace = args.opt_value_from_str::<_, String>("--trace")?;

    if !args.finish().is_empty() {
        return usage("Unknown extra arguments passed");
    }

    let mut config = match config_file {
        Some(path) => Configuration::from_file(path)?,
        None => Configuration::default(),
    };
    if let Some(max_depth) = max_depth {
        config.max_depth = max_depth;
    }
    config.bypass_preprocessor |= bypass_preprocessor;
    config.rt_testing |= rt_testing;
    if let Some(trace) = trace {
        config
            .trace
            .extend(trace.split(',').map(|t| t.trim().to_string()));
    }

    env_logger::init_from_env(
        env_logger::Env::default().default_filter_or(log_filter(debug, &config.trace)),
    );

    if selser && old_text_file.is_none() {
        return usage("--selser needs --oldtextfile");
    }
    let old_text = match old_text_file {
        Some(path) if selser || mode == Mode::Html2Wt => Some(std::fs::read_to_string(path)?),
        Some(_) => return usage("--oldtextfile is only used by --html2wt"),
        None => None,
    };

    let templates: Box<dyn TemplateSource> = match templates {
        Some(dir) => Box::new(DirectorySource(dir.into())),
        None => Box::new(MemorySource::default()),
    };
    let parser = Parser::new(Env::new(config, templates));

    let mut input = String::new();
    std::io::stdin().read_to_string(&mut input)?;

    let output = match mode {
        Mode::Wt2Html => dom::html::to_html(&parser.wt2html(&input)?),
        Mode::Html2Wt => {
            let mut doc = dom::html::from_html(&input)?;
            parser.html2wt(&mut doc, old_text.as_deref())?
        }
        Mode::Wt2Wt => parser.wt2wt(&input)?,
        Mode::Html2Html => parser.html2html(&input)?,
    };

    let mut stdout = std::io::stdout().lock();
    stdout.write_all(output.as_bytes())?;
    if !output.ends_with('\n') && mode != Mode::Html2Wt && mode != Mode::Wt2Wt {
        stdout.write_all(b"\n")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[track_caller]
    fn enabled(filter: &str, level: log::Level, target: &str) -> bool {
        let logger = env_logger::Builder::new().parse_filters(filter).build();
        log::Log::enabled(
            &logger,
            &log::Metadata::builder().level(level).target(target).build(),
        )
    }

    #[test]
    fn trace_channels_become_filters() {
        assert_eq!(log_filter(false, &[]), "warn");
        assert_eq!(
            log_filter(true, &["selser".into(), "wts::sep".into()]),
            "debug,wiki_roundtrip::selser=trace,wiki_roundtrip::wts::sep=trace"
        );
        assert_eq!(log_filter(false, &["all".into()]), "warn,wiki_roundtrip=trace");
    }

    #[test]
    fn trace_filters_enable_their_targets() {
        let filter = log_filter(false, &["wts::sep".into(), "quote".into()]);
        assert!(enabled(&filter, log::Level::Trace, "wiki_roundtrip::wts::sep"));
        assert!(enabled(&filter, log::Level::Trace, "wiki_roundtrip::quote"));
        assert!(enabled(&filter, log::Level::Warn, "wiki_roundtrip::selser"));
        assert!(!enabled(&filter, log::Level::Trace, "wiki_roundtrip::selser"));
        assert!(!enabled(&filter, log::Level::Debug, "wiki_roundtrip::wts"));

        let filter = log_filter(false, &["all".into()]);
        assert!(enabled(&filter, log::Level::Trace, "wiki_roundtrip::wts::sep"));
    }
}
