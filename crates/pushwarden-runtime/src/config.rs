//! Config file loading.

use std::path::Path;

use pushwarden_core::LivenessConfig;

use crate::error::LivenessError;

/// Load from `path`, or defaults when no path is given.
pub fn load(path: Option<&Path>) -> Result<LivenessConfig, LivenessError> {
    let Some(path) = path else {
        return Ok(LivenessConfig::default());
    };
    let raw = std::fs::read_to_string(path)?;
    let config = LivenessConfig::from_toml_str(&raw)?;
    tracing::debug!(path = %path.display(), "config loaded");
    Ok(config)
}
