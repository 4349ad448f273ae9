use lake_config::load_config;
use lake_config::shared::LakeConfig;

use crate::error::{ReorganizerError, ReorganizerResult};

/// Loads and validates the reorganizer configuration from `./configuration`.
pub fn load_reorganizer_config() -> ReorganizerResult<LakeConfig> {
    let config = load_config::<LakeConfig>().map_err(ReorganizerError::config)?;
    config.validate().map_err(ReorganizerError::config)?;

    Ok(config)
}
