//! Tracing subscriber setup for binaries embedding the crate.
//!
//! The library itself only emits `tracing` events; installing a subscriber
//! is the embedding application's call. This helper covers the common case:
//! an `EnvFilter` (explicit directive or `RUST_LOG`) in front of a fmt layer,
//! JSON for production or pretty for development.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// JSON lines for structured log collection.
    #[default]
    Json,
    /// Human-readable output for development.
    Pretty,
}

/// Install the global tracing subscriber.
///
/// `filter` overrides the environment; `None` falls back to `RUST_LOG` and
/// then to `info`. Fails if a subscriber is already installed.
pub fn init(filter: Option<&str>, format: LogFormat) -> anyhow::Result<()> {
    let env_filter = match filter {
        Some(directive) => EnvFilter::try_new(directive)?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    let registry = tracing_subscriber::registry().with(env_filter);
    match format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()?,
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().pretty())
            .try_init()?,
    }
    Ok(())
}
