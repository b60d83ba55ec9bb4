//! Livewire configuration.
//!
//! TOML-based configuration for the realtime coordination core. Every
//! section uses serde defaults so partial configs work out of the box.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use livewire_config::{load_config, config_to_json};
//!
//! let config = load_config().expect("failed to load config");
//! println!("{}", config_to_json(&config));
//! ```

pub mod schema;
pub mod toml_loader;
pub mod validation;

pub use schema::{
    CacheConfig, LivewireConfig, LoggingConfig, PresenceConfig, RealtimeConfig, ReconnectConfig,
    CONFIG_SCHEMA_VERSION,
};
pub use toml_loader::{load_default, load_from_path, load_from_str};

use livewire_common::ConfigError;

/// Load config from the platform default path and validate it.
///
/// Unlike [`load_from_path`], validation failures are returned as errors.
pub fn load_config() -> Result<LivewireConfig, ConfigError> {
    let config = toml_loader::load_default()?;
    validation::validate(&config)?;
    Ok(config)
}

/// Serialize a config to a pretty-printed JSON string.
pub fn config_to_json(config: &LivewireConfig) -> String {
    serde_json::to_string_pretty(config)
        .unwrap_or_else(|e| format!("{{\"error\": \"failed to serialize config: {e}\"}}"))
}
