pub mod ask;
pub mod config_cmd;
pub mod feedback;
pub mod serve;

use servechat_config::{AppConfig, ConfigError};
use std::path::Path;

/// Load config from `path` (or the default location) with environment overrides.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    match path {
        Some(path) => AppConfig::load_with_env(path),
        None => AppConfig::load(),
    }
}
