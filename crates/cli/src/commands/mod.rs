pub mod config_cmd;
pub mod inspect;

use std::path::Path;

use ctxloom_config::{ConfigError, EngineConfig};

/// The engine configuration: `path` when given, the default location
/// otherwise, with `CTXLOOM_*` overrides applied.
pub fn load_config(path: Option<&Path>) -> Result<EngineConfig, ConfigError> {
    let Some(path) = path else {
        return EngineConfig::load();
    };
    let mut config = EngineConfig::load_from(path)?;
    config.apply_env_overrides(|key| std::env::var(key).ok())?;
    config.validate()?;
    Ok(config)
}
