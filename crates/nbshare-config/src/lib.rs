//! nbshare configuration system.
//!
//! TOML-based configuration for the notebook mirroring session. All
//! sections use serde defaults so partial configs work out of the box.
//!
//! ```rust,no_run
//! use nbshare_config::{load_config, config_to_json};
//!
//! let config = load_config().expect("failed to load config");
//! println!("{}", config_to_json(&config));
//! ```

pub mod schema;
pub mod toml_loader;
pub mod validation;

pub use schema::{NbshareConfig, CONFIG_SCHEMA_VERSION};

use nbshare_common::ConfigError;

/// Load config from the platform default path and validate it.
pub fn load_config() -> Result<NbshareConfig, ConfigError> {
    let config = toml_loader::load_default()?;
    validation::validate(&config)?;
    Ok(config)
}

/// Serialize a config to a pretty-printed JSON string.
pub fn config_to_json(config: &NbshareConfig) -> String {
    serde_json::to_string_pretty(config)
        .unwrap_or_else(|e| format!("{{\"error\": \"failed to serialize config: {e}\"}}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_to_json_contains_all_sections() {
        let config = NbshareConfig::default();
        let json = config_to_json(&config);
        assert!(json.contains("\"session\""));
        assert!(json.contains("\"mirror\""));
        assert!(json.contains("\"channel\""));
        assert!(json.contains("\"relay\""));
        assert!(json.contains("\"logging\""));
    }

    #[test]
    fn config_schema_version_is_1() {
        assert_eq!(CONFIG_SCHEMA_VERSION, 1);
    }

    #[test]
    fn default_config_round_trips_through_json() {
        let config = NbshareConfig::default();
        let json = config_to_json(&config);
        let parsed: NbshareConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.session.service_name, "nbshare-live");
        assert_eq!(parsed.mirror.view_type_prefix, "mirror-");
        assert_eq!(parsed.channel.capacity, 256);
    }
}
