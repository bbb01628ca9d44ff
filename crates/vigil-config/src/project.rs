//! Project Configuration (vigil.toml)
//!
//! Handles suite-level configuration stored in `vigil.toml` at the project root.

use crate::settings::{HarnessSettings, LoggingSettings, ReportSettings};
use crate::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Project configuration from vigil.toml
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct ProjectConfig {
    /// Suite metadata
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suite: Option<SuiteConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub harness: Option<HarnessSettings>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<ReportSettings>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingSettings>,
}

/// Suite metadata
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct SuiteConfig {
    /// Suite name shown in reports
    pub name: String,

    /// Only run tests whose name contains this substring
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,

    /// Run tests on parallel workers, each with its own harness
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parallel: Option<bool>,
}

impl ProjectConfig {
    /// Load project configuration from a file
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

    /// Validate the project configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if let Some(suite) = &self.suite {
            if suite.name.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "suite.name".to_string(),
                    reason: "name cannot be empty".to_string(),
                });
            }
        }
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

    /// Get the suite name, if present
    pub fn suite_name(&self) -> Option<&str> {
        self.suite.as_ref().map(|s| s.name.as_str())
    }

    /// Get the suite filter, if present
    pub fn filter(&self) -> Option<&str> {
        self.suite.as_ref().and_then(|s| s.filter.as_deref())
    }

    pub(crate) fn harness_mut(&mut self) -> &mut HarnessSettings {
        self.harness.get_or_insert_with(Default::default)
    }

    pub(crate) fn report_mut(&mut self) -> &mut ReportSettings {
        self.report.get_or_insert_with(Default::default)
    }

    /// Merge another project config into this one
    /// Other config takes precedence for set values
    pub fn merge(&mut self, other: &ProjectConfig) {
        if other.suite.is_some() {
            self.suite = other.suite.clone();
        }
        if let Some(harness) = &other.harness {
            self.harness_mut().merge(harness);
        }
        if let Some(report) = &other.report {
            self.report_mut().merge(report);
        }
        if let Some(logging) = &other.logging {
            self.logging
                .get_or_insert_with(Default::default)
                .merge(logging);
        }
    }
}
