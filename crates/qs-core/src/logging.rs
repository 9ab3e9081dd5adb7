//! Logging setup for binaries embedding the client.
//!
//! Library code only emits `tracing` events tagged `[engine]`, `[watchdog]`,
//! `[ws]` and so on. A binary installs the subscriber once, from the
//! `logging` section of its [`ClientConfig`](crate::config::ClientConfig):
//!
//! ```json
//! "logging": { "level": "info,qs_client=debug", "dir": "logs", "file_format": "json" }
//! ```
//!
//! Console output is always human-readable. With `dir` set, events are also
//! written to a daily-rotating file through a non-blocking writer; the
//! returned [`WorkerGuard`] must be kept alive until exit so buffered lines
//! get flushed.

use serde::Deserialize;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

use crate::error::{QsError, Result};

/// Encoding of the log file. The console is always plain text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    /// One JSON object per event, for log shippers.
    #[default]
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Filter directives used when `RUST_LOG` is unset, e.g. `"info"` or
    /// `"warn,qs_client=debug"`.
    pub level: String,
    /// Directory for rotating log files. Console only when `None`.
    pub dir: Option<String>,
    /// File name prefix; the date is appended by the appender.
    pub file_prefix: String,
    pub file_format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            dir: None,
            file_prefix: "qs-client".into(),
            file_format: LogFormat::default(),
        }
    }
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Install the global subscriber.
///
/// Fails with [`QsError::Config`] on malformed filter directives or if a
/// subscriber is already installed.
pub fn init_logging(config: &LogConfig) -> Result<Option<WorkerGuard>> {
    let filter = env_filter(&config.level)?;
    let (file_layer, guard) = match file_layer(config) {
        Some((layer, guard)) => (Some(layer), Some(guard)),
        None => (None, None),
    };

    let console_layer = fmt::layer().with_target(true).with_ansi(true);

    tracing_subscriber::registry()
        .with(file_layer)
        .with(console_layer)
        .with(filter)
        .try_init()
        .map_err(|e| QsError::Config(format!("logging already initialised: {e}")))?;
    Ok(guard)
}

/// `RUST_LOG` wins over the configured directives.
fn env_filter(level: &str) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(level)
        .map_err(|e| QsError::Config(format!("log level {level:?}: {e}")))
}

fn file_layer(config: &LogConfig) -> Option<(BoxedLayer, WorkerGuard)> {
    let dir = config.dir.as_deref()?;
    let appender = tracing_appender::rolling::daily(dir, &config.file_prefix);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let layer = match config.file_format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(false)
            .with_writer(writer)
            .boxed(),
        LogFormat::Text => fmt::layer()
            .with_ansi(false)
            .with_thread_ids(true)
            .with_writer(writer)
            .boxed(),
    };
    Some((layer, guard))
}
