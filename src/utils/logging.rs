//! Structured logging setup.
//!
//! The engine only emits `tracing` events; applications decide where they go. This
//! helper wires up a `tracing-subscriber` fmt layer from [`LoggingConfig`] for
//! binaries and tests that have no subscriber of their own. `RUST_LOG` directives
//! take precedence over the configured level.

use crate::config::LoggingConfig;
use crate::error::{ProtocolError, Result};
use tracing_subscriber::EnvFilter;

/// Install a global subscriber. Fails if one is already set.
pub fn init(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::builder()
        .with_default_directive(config.log_level.into())
        .from_env_lossy();

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(config.show_target)
        .with_ansi(config.ansi);

    let installed = if config.json_format {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    installed.map_err(|e| ProtocolError::ConfigError(format!("Failed to install logger: {e}")))?;
    tracing::info!(app = %config.app_name, level = %config.log_level, "Logging initialized");
    Ok(())
}

/// Like [`init`] but ignores an already-installed subscriber. For tests.
pub fn try_init(config: &LoggingConfig) {
    let _ = init(config);
}
