//! Logging setup for the binary.
//!
//! `log` records from the stores and workers are bridged into `tracing`, so
//! pipeline spans and plain log lines share one subscriber.

use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter, Registry};

use crate::config::{LogFormat, LoggingConfig};

#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("log bridge already installed: {0}")]
    Logger(#[from] log::SetLoggerError),

    #[error("tracing subscriber already installed: {0}")]
    Subscriber(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// Installs the global subscriber. Call once, early in `main`.
pub fn init(config: &LoggingConfig) -> Result<(), TelemetryError> {
    tracing_log::LogTracer::init()?;

    let filter = env_filter(&config.level);
    match config.format {
        LogFormat::Plain => {
            let subscriber = Registry::default()
                .with(filter)
                .with(fmt::layer().with_target(true));
            tracing::subscriber::set_global_default(subscriber)?;
        }
        LogFormat::Json => {
            let subscriber = Registry::default()
                .with(filter)
                .with(fmt::layer().json().with_current_span(true));
            tracing::subscriber::set_global_default(subscriber)?;
        }
    }
    Ok(())
}

/// `RUST_LOG` if set and valid, else the configured directive, else `info`.
pub fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|e| {
            eprintln!("Invalid log filter '{}': {}, using info", level, e);
            EnvFilter::new("info")
        })
}
