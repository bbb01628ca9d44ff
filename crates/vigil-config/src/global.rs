//! Global Configuration (~/.vigil/config.toml)
//!
//! Handles user-level defaults stored in `~/.vigil/config.toml`.

use crate::settings::{HarnessSettings, LoggingSettings, ReportSettings};
use crate::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Global user configuration from ~/.vigil/config.toml
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct GlobalConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub harness: Option<HarnessSettings>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<ReportSettings>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingSettings>,
}

impl GlobalConfig {
    /// Load global configuration from a file
    pub fn load_from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::NotFound(path.to_path_buf())
            } else {
                ConfigError::IoError(e)
            }
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::TomlParseError {
            file: path.to_path_buf(),
            error: e,
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the global configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if let Some(harness) = &self.harness {
            harness.validate("harness")?;
        }
        if let Some(report) = &self.report {
            report.validate("report")?;
        }
        if let Some(logging) = &self.logging {
            logging.validate("logging")?;
        }
        Ok(())
    }

    /// Get the global config file path (~/.vigil/config.toml)
    pub fn global_config_path() -> ConfigResult<PathBuf> {
        let home = dirs::home_dir().ok_or(ConfigError::HomeNotFound)?;
        Ok(home.join(".vigil").join("config.toml"))
    }

    /// Merge another global config into this one
    /// Other config takes precedence for set values
    pub fn merge(&mut self, other: &GlobalConfig) {
        if let Some(harness) = &other.harness {
            self.harness
                .get_or_insert_with(Default::default)
                .merge(harness);
        }
        if let Some(report) = &other.report {
            self.report.get_or_insert_with(Default::default).merge(report);
        }
        if let Some(logging) = &other.logging {
            self.logging
                .get_or_insert_with(Default::default)
                .merge(logging);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_global_config() {
        let toml = r#"
[harness]
default_timeout_ms = 10000

[report]
color = false

[logging]
level = "info"
"#;

        let config: GlobalConfig = toml::from_str(toml).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.harness.unwrap().default_timeout_ms, Some(10000));
        assert_eq!(config.report.unwrap().color, Some(false));
    }

    #[test]
    fn test_suite_section_not_allowed_globally() {
        let result: Result<GlobalConfig, _> = toml::from_str("[suite]\nname = \"x\"\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_clock_value() {
        let config = GlobalConfig {
            harness: Some(HarnessSettings {
                default_timeout_ms: None,
                clock: Some("lunar".to_string()),
            }),
            ..Default::default()
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_merge_configs() {
        let mut base = GlobalConfig::default();
        let override_config = GlobalConfig {
            logging: Some(LoggingSettings {
                level: Some("debug".to_string()),
            }),
            ..Default::default()
        };

        base.merge(&override_config);
        assert_eq!(base.logging.unwrap().level.as_deref(), Some("debug"));
    }

    #[test]
    fn test_global_path_under_home() {
        if let Ok(path) = GlobalConfig::global_config_path() {
            assert!(path.ends_with(".vigil/config.toml"));
        }
    }
}
