//! Tests for TOML config loading, creation, and path resolution.

use super::*;
use std::path::Path;

#[test]
fn load_from_nonexistent_returns_file_not_found() {
    let result = load_from_path(Path::new("/tmp/nonexistent_livewire_config.toml"));
    assert!(matches!(
        result.unwrap_err(),
        livewire_common::ConfigError::FileNotFound(_)
    ));
}

#[test]
fn load_valid_partial_toml() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(
        &path,
        r#"
[presence]
heartbeat_interval_secs = 10

[cache]
key_prefix = "app_cache_"
"#,
    )
    .unwrap();

    let config = load_from_path(&path).unwrap();
    assert_eq!(config.presence.heartbeat_interval_secs, 10);
    assert_eq!(config.cache.key_prefix, "app_cache_");
    // Defaults preserved
    assert_eq!(config.reconnect.max_delay_ms, 30_000);
    assert_eq!(config.realtime.channel_buffer, 256);
}

#[test]
fn load_invalid_toml_returns_parse_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "this is not valid toml {{{").unwrap();

    let err = load_from_path(&path).unwrap_err();
    assert!(matches!(err, livewire_common::ConfigError::ParseError(_)));
}

#[test]
fn load_config_with_invalid_values_is_returned_as_parsed() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(
        &path,
        r#"
[reconnect]
jitter = 3.5
"#,
    )
    .unwrap();

    let config = load_from_path(&path).unwrap();
    assert_eq!(config.reconnect.jitter, 3.5);
}

#[test]
fn create_and_load_default_config() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("livewire").join("config.toml");

    create_default_config(&path).unwrap();
    assert!(path.exists());

    let config = load_from_path(&path).unwrap();
    assert_eq!(config.presence.heartbeat_interval_secs, 30);
    assert_eq!(config.logging.filter, "livewire=info");
}

#[test]
fn default_config_toml_is_valid() {
    use super::template::default_config_toml;

    let config = load_from_str(&default_config_toml()).unwrap();
    assert!(crate::validation::validate(&config).is_ok());
}

#[test]
fn config_path_sits_in_an_app_directory() {
    let path = super::paths::config_path_under(Path::new("/home/ada/.config"));
    assert_eq!(path, Path::new("/home/ada/.config/livewire/config.toml"));
}

#[test]
fn default_config_path_is_reasonable() {
    if std::env::var_os(CONFIG_PATH_ENV).is_some() {
        return;
    }
    if let Ok(path) = default_config_path() {
        let path_str = path.to_string_lossy();
        assert!(path_str.contains("livewire"));
        assert!(path_str.ends_with("config.toml"));
    }
}

#[test]
fn create_default_config_keeps_an_existing_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[reconnect]\nmax_attempts = 4\n").unwrap();

    create_default_config(&path).unwrap();
    let config = load_from_path(&path).unwrap();
    assert_eq!(config.reconnect.max_attempts, 4);
}
