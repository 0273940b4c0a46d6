//! Logging initialization.
//!
//! Structured `tracing` output with a pretty (development) or JSON
//! (production) formatter, an env-filter directive string from config, and
//! optional append-to-file output. An explicit `RUST_LOG` always wins over
//! the configured filter.

use std::fs::File;
use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::fmt::format::{FmtSpan, Format, Json, JsonFields, Pretty};
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LoggingConfig;

/// Install the process-wide subscriber. Call once, before any component
/// logs; fails on an unparsable filter or an unopenable log file.
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => parse_filter(&config.level)?,
    };

    let file = config
        .file_path
        .as_deref()
        .map(open_log_file)
        .transpose()?;

    let layer = match (config.format.as_str(), file) {
        ("json", Some(file)) => json_layer().with_writer(file).boxed(),
        ("json", None) => json_layer().boxed(),
        (_, Some(file)) => pretty_layer().with_writer(file).boxed(),
        (_, None) => pretty_layer().boxed(),
    };

    tracing_subscriber::registry().with(filter).with(layer).init();
    Ok(())
}

/// Parse a filter string: a plain level ("info") or full directives
/// ("warn,taskio_realtime=debug").
fn parse_filter(directives: &str) -> anyhow::Result<EnvFilter> {
    EnvFilter::try_new(directives)
        .with_context(|| format!("invalid log filter '{directives}'"))
}

fn open_log_file(path: &str) -> anyhow::Result<Arc<File>> {
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open log file '{path}'"))?;
    Ok(Arc::new(file))
}

fn json_layer<S>() -> fmt::Layer<S, JsonFields, Format<Json>> {
    fmt::layer()
        .json()
        .with_span_events(FmtSpan::CLOSE)
        .with_current_span(true)
        .with_span_list(true)
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
}

fn pretty_layer<S>() -> fmt::Layer<S, Pretty, Format<Pretty>> {
    fmt::layer()
        .pretty()
        .with_span_events(FmtSpan::CLOSE)
        .with_target(true)
}
