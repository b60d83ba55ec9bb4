//! Full configuration validation.
//!
//! Validates numeric ranges and cross-field invariants, collecting every
//! violation into a single `ConfigError`.

mod helpers;
mod sections;


use crate::schema::LivewireConfig;
use livewire_common::ConfigError;

/// Run all validations on a config, collecting all errors.
pub fn validate(config: &LivewireConfig) -> Result<(), ConfigError> {
    let mut errors: Vec<String> = Vec::new();

    sections::validate_realtime(&mut errors, config);
    sections::validate_presence(&mut errors, config);
    sections::validate_reconnect(&mut errors, config);
    sections::validate_cache(&mut errors, config);
    sections::validate_logging(&mut errors, config);

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationError(errors.join("; ")))
    }
}
