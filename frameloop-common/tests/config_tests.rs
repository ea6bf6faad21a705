//! Integration tests for configuration loading and graceful degradation
//!
//! Covers:
//! - Missing TOML files do not cause failures (defaults + warning)
//! - Malformed TOML files are reported as errors
//! - Priority order for config file resolution
//!
//! Note: Uses serial_test crate to prevent ENV variable race conditions.
//! Tests that manipulate FRAMELOOP_CONFIG are marked with #[serial].

use frameloop_common::config::{load_toml, resolve_config_path, LoggingConfig, CONFIG_ENV_VAR};
use frameloop_common::Error;
use serde::Deserialize;
use serial_test::serial;
use std::env;
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Default, PartialEq)]
struct BootstrapConfig {
    #[serde(default)]
    logging: LoggingConfig,
}

#[test]
fn test_missing_file_falls_back_to_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("does-not-exist.toml");

    let config: BootstrapConfig = load_toml(Some(&missing)).unwrap();
    assert_eq!(config, BootstrapConfig::default());
}

#[test]
fn test_valid_file_is_loaded() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[logging]").unwrap();
    writeln!(file, "level = \"frameloop_core=trace\"").unwrap();
    writeln!(file, "file = \"/var/log/frameloop.log\"").unwrap();

    let config: BootstrapConfig = load_toml(Some(file.path())).unwrap();
    assert_eq!(config.logging.level, "frameloop_core=trace");
    assert_eq!(config.logging.file, Some(PathBuf::from("/var/log/frameloop.log")));
}

#[test]
fn test_malformed_file_is_an_error() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[logging").unwrap();

    let result: Result<BootstrapConfig, Error> = load_toml(Some(file.path()));
    assert!(matches!(result, Err(Error::Toml(_))));
}

#[test]
fn test_directory_path_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let result: Result<BootstrapConfig, Error> = load_toml(Some(dir.path()));
    assert!(matches!(result, Err(Error::Config(_))));
}

#[test]
#[serial]
fn test_env_var_used_when_no_cli_argument() {
    env::set_var(CONFIG_ENV_VAR, "/tmp/from-env.toml");
    let resolved = resolve_config_path(None, CONFIG_ENV_VAR);
    env::remove_var(CONFIG_ENV_VAR);

    assert_eq!(resolved, Some(PathBuf::from("/tmp/from-env.toml")));
}

#[test]
#[serial]
fn test_cli_argument_beats_env_var() {
    env::set_var(CONFIG_ENV_VAR, "/tmp/from-env.toml");
    let resolved = resolve_config_path(Some(Path::new("/tmp/from-cli.toml")), CONFIG_ENV_VAR);
    env::remove_var(CONFIG_ENV_VAR);

    assert_eq!(resolved, Some(PathBuf::from("/tmp/from-cli.toml")));
}

#[test]
#[serial]
fn test_blank_env_var_is_ignored() {
    env::set_var(CONFIG_ENV_VAR, "   ");
    let resolved = resolve_config_path(None, CONFIG_ENV_VAR);
    env::remove_var(CONFIG_ENV_VAR);

    // Falls through to platform locations, which only resolve when they exist
    if let Some(path) = resolved {
        assert!(path.exists());
    }
}
