// pipeline-core/src/logging.rs

//! Tracing subscriber setup.
//!
//! The library only emits `tracing` events; applications that have no
//! subscriber of their own can call [`init_tracing`] once at startup.

use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LoggingConfig;
use crate::error::{PipelineError, Result};

/// Installs a global fmt subscriber filtered by `RUST_LOG`, falling back to
/// `default_level` when the variable is unset or invalid.
///
/// Calling it again after a subscriber is installed is a no-op.
pub fn init_tracing(default_level: &str) -> Result<()> {
    let fallback = EnvFilter::try_new(default_level).map_err(|e| {
        PipelineError::config_with_source(format!("invalid log level '{default_level}'"), e)
    })?;
    let filter = EnvFilter::try_from_default_env().unwrap_or(fallback);

    // An already-installed subscriber is fine.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init();
    Ok(())
}

/// Installs the subscriber using a [`LoggingConfig`].
pub fn init_from_config(config: &LoggingConfig) -> Result<()> {
    init_tracing(&config.level)
}
