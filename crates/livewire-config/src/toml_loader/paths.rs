//! Where the config file lives, and seeding it with the documented defaults.

use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use livewire_common::ConfigError;
use tracing::info;

use super::template::default_config_toml;

/// Environment variable naming an explicit config file.
pub const CONFIG_PATH_ENV: &str = "LIVEWIRE_CONFIG";

const APP_DIR: &str = "livewire";
const FILE_NAME: &str = "config.toml";

/// `$LIVEWIRE_CONFIG` when set, otherwise `<platform config dir>/livewire/config.toml`.
pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    if let Some(explicit) = std::env::var_os(CONFIG_PATH_ENV).filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(explicit));
    }
    dirs::config_dir()
        .map(|base| config_path_under(&base))
        .ok_or_else(|| ConfigError::ParseError("could not determine config directory".into()))
}

pub(crate) fn config_path_under(base: &Path) -> PathBuf {
    base.join(APP_DIR).join(FILE_NAME)
}

/// Write the commented default config to `path`, creating parent
/// directories. An existing file is left as it is.
pub fn create_default_config(path: &Path) -> Result<(), ConfigError> {
    let io_failure = |action: &str, target: &Path, e: std::io::Error| {
        ConfigError::ParseError(format!("failed to {action} {}: {e}", target.display()))
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .map_err(|e| io_failure("create config directory", parent, e))?;
    }

    let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            info!(path = %path.display(), "config already present, left untouched");
            return Ok(());
        }
        Err(e) => return Err(io_failure("create", path, e)),
    };
    file.write_all(default_config_toml().as_bytes())
        .map_err(|e| io_failure("write default config to", path, e))?;

    info!(path = %path.display(), "created default config");
    Ok(())
}
