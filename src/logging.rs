//! Structured logging setup
//!
//! `logging.format` picks JSON or pretty output and `logging.output` picks
//! stderr, a daily-rolled file, or both. `RUST_LOG` wins over the configured
//! level. Every invocation runs inside a span carrying a fresh `run_id`.

use crate::config::Config;
use std::path::Path;
use tracing::Span;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};
use uuid::Uuid;

/// Initialize the logging system based on configuration.
///
/// The returned guard must be held until exit when file output is enabled,
/// otherwise buffered lines are lost.
pub fn init_logging(config: &Config) -> Option<WorkerGuard> {
    let log_level = &config.logging.level;
    let log_output = &config.logging.output;
    let log_format = &config.logging.format;

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_lowercase()));

    match log_output.as_str() {
        "file" => Some(init_file_logging(
            env_filter,
            log_format,
            &config.paths.log_directory,
        )),
        "both" => Some(init_combined_logging(
            env_filter,
            log_format,
            &config.paths.log_directory,
        )),
        _ => {
            init_console_logging(env_filter, log_format);
            None
        }
    }
}

// Console output goes to stderr so JSON reports on stdout stay parseable.
fn init_console_logging(filter: EnvFilter, format: &str) {
    let subscriber = tracing_subscriber::registry().with(filter);

    let result = match format {
        "json" => subscriber
            .with(
                fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_target(true)
                    .with_file(true)
                    .with_line_number(true),
            )
            .try_init(),
        _ => subscriber
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_ansi(true)
                    .with_span_events(FmtSpan::CLOSE)
                    .pretty(),
            )
            .try_init(),
    };

    if let Err(e) = result {
        eprintln!("Logging already initialised: {e}");
    }
}

fn init_file_logging(filter: EnvFilter, format: &str, log_dir: &Path) -> WorkerGuard {
    let file_appender = tracing_appender::rolling::daily(log_dir, "usage-blocks.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let subscriber = tracing_subscriber::registry().with(filter);

    let result = match format {
        "json" => subscriber
            .with(
                fmt::layer()
                    .json()
                    .with_writer(non_blocking)
                    .with_current_span(true)
                    .with_span_list(true),
            )
            .try_init(),
        _ => subscriber
            .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
            .try_init(),
    };

    if let Err(e) = result {
        eprintln!("Logging already initialised: {e}");
    }
    guard
}

fn init_combined_logging(filter: EnvFilter, format: &str, log_dir: &Path) -> WorkerGuard {
    let file_appender = tracing_appender::rolling::daily(log_dir, "usage-blocks.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let subscriber = tracing_subscriber::registry().with(filter);

    let result = match format {
        "json" => subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .with(fmt::layer().json().with_writer(non_blocking))
            .try_init(),
        _ => subscriber
            .with(fmt::layer().pretty().with_writer(std::io::stderr))
            .with(fmt::layer().with_ansi(false).with_writer(non_blocking))
            .try_init(),
    };

    if let Err(e) = result {
        eprintln!("Logging already initialised: {e}");
    }
    guard
}

/// Create the top-level span for one CLI invocation
pub fn run_span(command: &str) -> Span {
    tracing::info_span!("run", run_id = %Uuid::new_v4(), command = %command)
}
