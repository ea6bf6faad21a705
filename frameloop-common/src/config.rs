//! Configuration loading and config file resolution
//!
//! # Configuration Philosophy
//!
//! - **TOML minimal**: one bootstrap file, read once at startup
//! - **Missing is fine**: a missing file logs a warning and yields built-in defaults
//! - **Malformed is not**: a file that exists but does not parse is an error
//! - **Built-in defaults**: defined in code via `serde(default)`, not external files
//!
//! # Config File Priority
//!
//! 1. Command-line argument (highest priority)
//! 2. Environment variable (`FRAMELOOP_CONFIG`)
//! 3. User config directory (`<config_dir>/frameloop/config.toml`)
//! 4. System config (`/etc/frameloop/config.toml`, Linux only)

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "FRAMELOOP_CONFIG";

/// Directory name used under the platform config directory
const CONFIG_DIR_NAME: &str = "frameloop";

/// Config file name inside the config directory
const CONFIG_FILE_NAME: &str = "config.toml";

/// Logging configuration
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error) or a full filter directive
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (optional, logs to stderr if not specified)
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Resolve which config file should be read, following the priority order
/// in the module documentation.
///
/// Command-line and environment paths are returned even when the file does
/// not exist, so the loader can warn about the specific path the user asked
/// for. Platform locations are only returned when they exist.
pub fn resolve_config_path(cli_arg: Option<&Path>, env_var_name: &str) -> Option<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(env_var_name) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    // Priority 3: User config directory
    if let Some(user_config) = dirs::config_dir().map(|d| d.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME)) {
        if user_config.exists() {
            return Some(user_config);
        }
    }

    // Priority 4: System-wide config
    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc").join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME);
        if system_config.exists() {
            return Some(system_config);
        }
    }

    None
}

/// Parse a TOML document into `T`
pub fn parse_toml<T: DeserializeOwned>(content: &str) -> Result<T> {
    Ok(toml::from_str::<T>(content)?)
}

/// Load `T` from a TOML file, degrading gracefully.
///
/// - `None` path: built-in defaults
/// - Path that does not exist: warning + built-in defaults
/// - Path that exists but cannot be read or parsed: error
pub fn load_toml<T: DeserializeOwned + Default>(path: Option<&Path>) -> Result<T> {
    let Some(path) = path else {
        info!("No config file found, using built-in defaults");
        return Ok(T::default());
    };

    if !path.exists() {
        warn!("Config file {} not found, using built-in defaults", path.display());
        return Ok(T::default());
    }

    if path.is_dir() {
        return Err(Error::Config(format!(
            "Config path {} is a directory",
            path.display()
        )));
    }

    let content = std::fs::read_to_string(path)?;
    let parsed = parse_toml(&content)?;
    info!("Loaded configuration from {}", path.display());
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Deserialize, Default, PartialEq)]
    struct Sample {
        #[serde(default)]
        logging: LoggingConfig,
    }

    #[test]
    fn test_logging_defaults() {
        let logging = LoggingConfig::default();
        assert_eq!(logging.level, "info");
        assert!(logging.file.is_none());
    }

    #[test]
    fn test_parse_partial_logging_section() {
        let sample: Sample = parse_toml("[logging]\nlevel = \"debug\"\n").unwrap();
        assert_eq!(sample.logging.level, "debug");
        assert!(sample.logging.file.is_none());
    }

    #[test]
    fn test_parse_empty_document_uses_defaults() {
        let sample: Sample = parse_toml("").unwrap();
        assert_eq!(sample, Sample::default());
    }

    #[test]
    fn test_cli_argument_wins() {
        let path = resolve_config_path(Some(Path::new("/tmp/explicit.toml")), "FRAMELOOP_TEST_UNUSED_VAR");
        assert_eq!(path, Some(PathBuf::from("/tmp/explicit.toml")));
    }

    #[test]
    fn test_load_without_path_gives_defaults() {
        let sample: Sample = load_toml(None).unwrap();
        assert_eq!(sample, Sample::default());
    }
}
