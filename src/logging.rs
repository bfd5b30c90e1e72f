/// Logging setup for the binaries.
///
/// RUST_LOG takes precedence over the configured level.

use crate::config::{LogFormat, LoggingConfig};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

pub fn init(config: &LoggingConfig) {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::new(config.level.as_str())
    };

    let registry = tracing_subscriber::registry().with(filter);
    match config.format {
        LogFormat::Pretty => registry
            .with(fmt::layer().with_ansi(true).with_target(config.target))
            .init(),
        LogFormat::Compact => registry
            .with(fmt::layer().compact().with_target(config.target))
            .init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_target(config.target))
            .init(),
    }
}
