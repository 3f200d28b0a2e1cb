//! Tracing subscriber setup for the binary

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LogFormat;

/// `RUST_LOG` wins; otherwise `w3files=<level>,warn`.
pub fn filter_for(log_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| format!("w3files={},warn", log_level).into())
}

/// Install the global subscriber. Logs go to stderr so command output stays clean.
pub fn init(log_level: &str, format: LogFormat) {
    let registry = tracing_subscriber::registry().with(filter_for(log_level));
    match format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
    }
}
