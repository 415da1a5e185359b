//! Process-wide tracing setup shared by the workspace binaries.

use std::env::var;
use std::str::FromStr;

use tracing::level_filters::LevelFilter;
use tracing::warn;
use tracing_subscriber::{Layer, filter::EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Environment variable that overrides the configured output format
pub const LOG_FORMAT_ENV: &str = "RUST_LOG_FORMAT";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "compact" | "" => Ok(LogFormat::Compact),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format '{other}'")),
        }
    }
}

/// Initialize logging at `info`, honouring `RUST_LOG` and `RUST_LOG_FORMAT`
pub fn init() {
    init_with(LevelFilter::INFO, LogFormat::default());
}

/// Initialize logging with a default level and format.
///
/// `RUST_LOG` directives take precedence over `level` and `RUST_LOG_FORMAT`
/// over `format`. Calling this more than once keeps the first subscriber.
pub fn init_with(level: LevelFilter, format: LogFormat) {
    let env_filter = EnvFilter::builder().with_default_directive(level.into()).from_env_lossy();
    let (format, format_error) = resolve_format(var(LOG_FORMAT_ENV).ok().as_deref(), format);

    let log_layer = match format {
        LogFormat::Json => tracing_subscriber::fmt::layer().json().with_filter(env_filter).boxed(),
        LogFormat::Compact => tracing_subscriber::fmt::layer()
            .compact()
            .without_time()
            .with_filter(env_filter)
            .boxed(),
    };

    if tracing_subscriber::registry().with(log_layer).try_init().is_err() {
        return;
    }
    if let Some(error) = format_error {
        warn!("Ignoring {LOG_FORMAT_ENV}: {error}");
    }
}

/// Parse a level name such as `debug`, falling back to `info`
pub fn level_from_name(name: &str) -> LevelFilter {
    LevelFilter::from_str(name).unwrap_or(LevelFilter::INFO)
}

fn resolve_format(env_value: Option<&str>, configured: LogFormat) -> (LogFormat, Option<String>) {
    match env_value.map(LogFormat::from_str) {
        Some(Ok(format)) => (format, None),
        Some(Err(error)) => (configured, Some(error)),
        None => (configured, None),
    }
}
