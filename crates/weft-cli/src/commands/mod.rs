pub mod check;
pub mod run;
pub mod script;

use std::path::Path;

use weft_core::logging_facility::init;
use weft_core::DbConfig;

/// Load a configuration file and start logging if it asks for it
pub fn load_config(path: &Path) -> weft_core::Result<DbConfig> {
    let config = DbConfig::from_path(path)?;
    if let Some(profile) = config.logging {
        init(profile);
    }
    Ok(config)
}
