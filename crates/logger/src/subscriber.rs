use std::{env::var, fmt, str::FromStr};

use tracing::level_filters::LevelFilter;
use tracing_subscriber::{
    Layer,
    filter::EnvFilter,
    layer::SubscriberExt,
    util::{SubscriberInitExt, TryInitError},
};

/// Output format of the log layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseLogFormatError(String);

impl fmt::Display for ParseLogFormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown log format '{}', expected 'compact' or 'json'", self.0)
    }
}

impl std::error::Error for ParseLogFormatError {}

impl FromStr for LogFormat {
    type Err = ParseLogFormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "compact" | "text" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            other => Err(ParseLogFormatError(other.to_string())),
        }
    }
}

/// Install the global subscriber, panicking if one is already set.
pub fn init(level: LevelFilter, format: LogFormat) {
    if let Err(error) = try_init(level, format) {
        panic!("failed to install tracing subscriber: {error}");
    }
}

/// Install the global subscriber.
///
/// `RUST_LOG` refines the filter on top of `level`, and `RUST_LOG_FORMAT`
/// overrides `format` when it holds a recognised value.
pub fn try_init(level: LevelFilter, format: LogFormat) -> Result<(), TryInitError> {
    let env_filter = EnvFilter::builder().with_default_directive(level.into()).from_env_lossy();

    let format = match var("RUST_LOG_FORMAT") {
        Ok(raw) => raw.parse().unwrap_or(format),
        Err(_) => format,
    };

    let log_layer = match format {
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(false)
            .with_filter(env_filter)
            .boxed(),
        LogFormat::Compact => tracing_subscriber::fmt::layer()
            .compact()
            .with_target(true)
            .with_filter(env_filter)
            .boxed(),
    };

    tracing_subscriber::registry().with(log_layer).try_init()
}
