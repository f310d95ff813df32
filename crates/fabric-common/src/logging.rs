//! ---
//! fabric_section: "01-core-functionality"
//! fabric_subsection: "module"
//! fabric_type: "source"
//! fabric_scope: "code"
//! fabric_description: "Tracing subscriber bootstrap for the fabric daemon."
//! fabric_version: "v0.0.0-prealpha"
//! fabric_owner: "tbd"
//! ---
use anyhow::{Context, Result};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::daily;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::LoggingConfig;

const LOG_ENV: &str = "FABRIC_LOG";

static GUARDS: OnceCell<Vec<WorkerGuard>> = OnceCell::new();

/// Available log formats for the daemon.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LogFormat {
    #[default]
    StructuredJson,
    Pretty,
}

pub(crate) fn parse_filter(directive: &str) -> Result<EnvFilter> {
    EnvFilter::try_new(directive).map_err(anyhow::Error::from)
}

/// Directive in effect: `FABRIC_LOG`, then `RUST_LOG`, then the configured filter.
/// An unparsable environment directive falls through to the next source.
pub fn resolve_filter(
    fabric_log: Option<&str>,
    rust_log: Option<&str>,
    configured: &str,
) -> (String, &'static str) {
    for (directive, source) in [(fabric_log, LOG_ENV), (rust_log, "RUST_LOG")] {
        if let Some(directive) = directive {
            match parse_filter(directive) {
                Ok(_) => return (directive.to_owned(), source),
                Err(err) => eprintln!("ignoring invalid {source} directive '{directive}': {err}"),
            }
        }
    }
    (configured.to_owned(), "logging.filter")
}

fn json_layer<S, W>(writer: W) -> Box<dyn Layer<S> + Send + Sync>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    W: for<'w> fmt::MakeWriter<'w> + Send + Sync + 'static,
{
    fmt::layer()
        .with_target(true)
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .json()
        .with_current_span(true)
        .with_span_list(false)
        .with_writer(writer)
        .boxed()
}

/// Install the daemon's global subscriber.
///
/// Stdout carries JSON or pretty output. When `logging.file` is set a daily rolling JSON
/// file `<directory>/<prefix>.log` is written too. JSON output carries the current span,
/// so router and domain fields of recovery and evaluation spans land on each line.
pub fn init_tracing(service_name: &str, config: &LoggingConfig) -> Result<()> {
    let fabric_log = std::env::var(LOG_ENV).ok();
    let rust_log = std::env::var("RUST_LOG").ok();
    let (directive, source) =
        resolve_filter(fabric_log.as_deref(), rust_log.as_deref(), &config.filter);
    let filter = parse_filter(&directive)
        .with_context(|| format!("invalid log filter '{directive}' from {source}"))?;

    let mut guards = Vec::new();
    let (stdout_writer, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());
    guards.push(stdout_guard);
    let stdout_layer = match config.format {
        LogFormat::StructuredJson => json_layer(stdout_writer),
        LogFormat::Pretty => fmt::layer()
            .with_target(true)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .with_writer(stdout_writer)
            .boxed(),
    };

    let file_layer = if config.file {
        std::fs::create_dir_all(&config.directory).with_context(|| {
            format!("failed to create log directory {}", config.directory.display())
        })?;
        let prefix = config.file_prefix.as_deref().unwrap_or(service_name);
        let (file_writer, file_guard) =
            tracing_appender::non_blocking(daily(&config.directory, format!("{prefix}.log")));
        guards.push(file_guard);
        Some(json_layer(file_writer))
    } else {
        None
    };

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
        .is_ok();
    if !installed {
        // A subscriber from an earlier call stays in charge; drop our writers with it.
        return Ok(());
    }
    let _ = GUARDS.set(guards);

    info!(
        service = %service_name,
        filter = %directive,
        filter_source = source,
        log_dir = %config.directory.display(),
        file = config.file,
        format = ?config.format,
        "tracing initialised"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fabric_log_wins_over_rust_log() {
        let (directive, source) =
            resolve_filter(Some("fabric::health=trace"), Some("warn"), "info");
        assert_eq!(directive, "fabric::health=trace");
        assert_eq!(source, "FABRIC_LOG");
    }

    #[test]
    fn invalid_environment_directives_fall_through() {
        let (directive, source) = resolve_filter(Some("fabric=[bogus"), Some("warn"), "info");
        assert_eq!((directive.as_str(), source), ("warn", "RUST_LOG"));

        let (directive, source) = resolve_filter(None, Some("=[["), "info,fabric=debug");
        assert_eq!(directive, "info,fabric=debug");
        assert_eq!(source, "logging.filter");
    }

    #[test]
    fn file_output_can_be_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let config = LoggingConfig {
            directory: dir.path().join("logs"),
            file: false,
            ..LoggingConfig::default()
        };
        init_tracing("fabric-test", &config).unwrap();
        assert!(!config.directory.exists());
    }
}
