//! Full configuration validation.
//!
//! Each section has its own validator; this orchestrator calls them all
//! and collects errors into a single `ConfigError`.

mod helpers;
mod misc;


use crate::schema::NbshareConfig;
use nbshare_common::ConfigError;

/// Run all validations on a config, collecting all errors.
pub fn validate(config: &NbshareConfig) -> Result<(), ConfigError> {
    let mut errors: Vec<String> = Vec::new();

    misc::validate_session(&mut errors, config);
    misc::validate_mirror(&mut errors, config);
    misc::validate_channel(&mut errors, config);
    misc::validate_relay(&mut errors, config);

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationError(errors.join("; ")))
    }
}
