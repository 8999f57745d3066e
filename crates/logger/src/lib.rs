//! Shared tracing setup for regionpulse binaries.

mod subscriber;

pub use subscriber::{LogFormat, ParseLogFormatError, init, try_init};
pub use tracing::level_filters::LevelFilter;
