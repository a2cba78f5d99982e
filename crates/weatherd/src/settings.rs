//! Daemon settings

use std::path::Path;

use config::{Config, ConfigError, Environment, File};
use mixer::MixerConfig;
use serde::{Deserialize, Serialize};
use storage::StorageConfig;

/// Settings file read when none is given on the command line
pub const DEFAULT_CONFIG_FILE: &str = "weatherd.toml";

/// Daemon settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// `trace`, `debug`, `info`, `warn` or `error`
    pub log_level: String,

    /// Emit logs as JSON lines
    pub log_json: bool,

    pub storage: StorageConfig,

    pub mixer: MixerConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_json: false,
            storage: StorageConfig::default(),
            mixer: MixerConfig::default(),
        }
    }
}

impl Settings {
    /// Load settings from `path` (required) or the optional default file,
    /// overridden by `WEATHERD__*` environment variables such as
    /// `WEATHERD__STORAGE__DATA_DIR`.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(path) => File::from(path).required(true),
            None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        Config::builder()
            .add_source(file)
            .add_source(
                Environment::with_prefix("WEATHERD")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::PathBuf;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.log_level, "info");
        assert_eq!(settings.storage.queue_capacity, 1024);
        assert_eq!(settings.storage.observation_retention_days, 30);
        assert_eq!(settings.storage.mixer_retention_days, 365);
        assert!(settings.mixer.use_counters);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
log_level = "debug"

[storage]
data_dir = "/var/lib/weatherd"
queue_capacity = 16

[mixer]
use_counters = false
"#
        )
        .unwrap();

        let settings = Settings::load(Some(file.path())).unwrap();
        assert_eq!(settings.log_level, "debug");
        assert_eq!(settings.storage.data_dir, PathBuf::from("/var/lib/weatherd"));
        assert_eq!(settings.storage.queue_capacity, 16);
        // Unset keys keep their defaults
        assert_eq!(settings.storage.observation_retention_days, 30);
        assert!(!settings.mixer.use_counters);
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Settings::load(Some(&dir.path().join("absent.toml"))).is_err());
    }
}
