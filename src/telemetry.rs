//! Global tracing subscriber for the admin CLI.
//!
//! Library code only emits `tracing` events and `metrics` counters. sqlx
//! logs through the `log` facade, so its records are bridged in at the
//! most verbose level the filter lets through.

use std::sync::OnceLock;

use thiserror::Error;
use tracing::level_filters::LevelFilter;
use tracing_log::{AsLog, LogTracer};
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt};

use crate::config::AppConfig;

#[derive(Debug, Error)]
pub enum TelemetryInitError {
    #[error("invalid log filter '{directive}': {source}")]
    Filter {
        directive: String,
        #[source]
        source: tracing_subscriber::filter::ParseError,
    },
    #[error("failed to install tracing subscriber: {0}")]
    Subscriber(#[from] tracing::subscriber::SetGlobalDefaultError),
    #[error("failed to bridge log records: {0}")]
    LogTracer(#[from] log::SetLoggerError),
}

static INSTALLED: OnceLock<()> = OnceLock::new();

/// Install the subscriber described by `config`; `RUST_LOG` overrides
/// `log_level`. A second call after a successful install does nothing.
pub fn init_tracing(config: &AppConfig) -> Result<(), TelemetryInitError> {
    if INSTALLED.get().is_some() {
        return Ok(());
    }

    let directive =
        std::env::var(EnvFilter::DEFAULT_ENV).unwrap_or_else(|_| config.log_level.clone());
    let filter = EnvFilter::try_new(&directive)
        .map_err(|source| TelemetryInitError::Filter { directive, source })?;
    let bridged_level = filter.max_level_hint().unwrap_or(LevelFilter::TRACE).as_log();

    let fmt_layer = match config.log_format.as_str() {
        "pretty" => fmt::layer().pretty().boxed(),
        _ => fmt::layer().json().boxed(),
    };
    tracing::subscriber::set_global_default(
        tracing_subscriber::registry().with(filter).with(fmt_layer),
    )?;
    LogTracer::builder().with_max_level(bridged_level).init()?;

    let _ = INSTALLED.set(());
    Ok(())
}
