//! Structured logging setup.
//!
//! Events go to stderr through `tracing-subscriber`. `RUST_LOG` wins over the
//! `[log] level` config key so a single run can be made noisier.

use tracing_subscriber::EnvFilter;

use crate::domain::error::DeskError;
use crate::ports::config_port::ConfigPort;

pub const DEFAULT_LEVEL: &str = "info";

/// Builds the event filter from `RUST_LOG` or, failing that, `[log] level`.
pub fn filter_from_config(config: &dyn ConfigPort) -> Result<EnvFilter, DeskError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    let level = config
        .get_trimmed("log", "level")
        .unwrap_or_else(|| DEFAULT_LEVEL.to_string());
    EnvFilter::try_new(level).map_err(|e| DeskError::ConfigInvalid {
        section: "log".into(),
        key: "level".into(),
        reason: e.to_string(),
    })
}

/// Installs the global subscriber. A second call is a no-op.
pub fn init(config: &dyn ConfigPort) -> Result<(), DeskError> {
    let filter = filter_from_config(config)?;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
    Ok(())
}
