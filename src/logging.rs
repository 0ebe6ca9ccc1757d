//! Tracing subscriber setup for the CLI.
//!
//! Two layers share one registry:
//! - stderr, compact or JSON. Quiet (`warn`) unless `--verbose` or
//!   `STEPCHAIN_LOG` asks for more, so it does not fight the progress bars.
//! - a daily rolling file in `.stepchain/logs/` at the configured level.

use crate::stepchain_config::LoggingSection;
use anyhow::Result;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Filter directives override; same syntax as `RUST_LOG`.
pub const ENV_LOG: &str = "STEPCHAIN_LOG";

pub const LOG_FILE_PREFIX: &str = "stepchain.log";

/// Install the global subscriber.
///
/// The returned guard flushes the file writer on drop and must be held for
/// the life of the process. Installing twice is not an error; the second
/// call is ignored.
pub fn init_logging(
    settings: &LoggingSection,
    log_dir: Option<&Path>,
    verbose: bool,
) -> Result<Option<WorkerGuard>> {
    let stderr_default = if verbose { "debug" } else { "warn" };
    let stderr_layer = if settings.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_filter(build_env_filter(stderr_default))
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .compact()
            .with_target(false)
            .with_writer(std::io::stderr)
            .with_filter(build_env_filter(stderr_default))
            .boxed()
    };

    let (file_layer, guard) = match log_dir.filter(|_| settings.file) {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_filter(build_env_filter(&settings.level))
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let _ = tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .try_init();

    Ok(guard)
}

/// `STEPCHAIN_LOG` if set and valid, otherwise `default`.
fn build_env_filter(default: &str) -> EnvFilter {
    EnvFilter::try_from_env(ENV_LOG)
        .or_else(|_| EnvFilter::try_new(default))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}
