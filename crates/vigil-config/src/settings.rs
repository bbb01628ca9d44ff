//! Configuration sections shared by vigil.toml and the global config

use crate::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};

/// Clock names accepted for `harness.clock`
pub const CLOCKS: &[&str] = &["system", "real", "virtual", "simulated"];

/// Output formats accepted for `report.format`
pub const REPORT_FORMATS: &[&str] = &["human", "json"];

/// Levels accepted for `logging.level`
pub const LOG_LEVELS: &[&str] = &["off", "error", "warn", "info", "debug", "trace"];

/// `[harness]` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct HarnessSettings {
    /// Budget for each test run, in milliseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_timeout_ms: Option<u64>,

    /// Clock driving the loop ("system" or "virtual")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clock: Option<String>,
}

/// `[report]` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct ReportSettings {
    /// Print every test instead of a dot per pass
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verbose: Option<bool>,

    /// Colorize console output
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<bool>,

    /// Output format ("human" or "json")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

/// `[logging]` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct LoggingSettings {
    /// Minimum level written to stderr
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
}

impl HarnessSettings {
    pub fn validate(&self, section: &str) -> ConfigResult<()> {
        if self.default_timeout_ms == Some(0) {
            return Err(ConfigError::InvalidValue {
                field: format!("{}.default_timeout_ms", section),
                reason: "timeout must be greater than zero".to_string(),
            });
        }
        if let Some(clock) = &self.clock {
            validate_choice(&format!("{}.clock", section), clock, CLOCKS)?;
        }
        Ok(())
    }

    /// Overlay `other` onto `self`; set values in `other` win
    pub fn merge(&mut self, other: &HarnessSettings) {
        if other.default_timeout_ms.is_some() {
            self.default_timeout_ms = other.default_timeout_ms;
        }
        if other.clock.is_some() {
            self.clock = other.clock.clone();
        }
    }
}

impl ReportSettings {
    pub fn validate(&self, section: &str) -> ConfigResult<()> {
        if let Some(format) = &self.format {
            validate_choice(&format!("{}.format", section), format, REPORT_FORMATS)?;
        }
        Ok(())
    }

    pub fn merge(&mut self, other: &ReportSettings) {
        if other.verbose.is_some() {
            self.verbose = other.verbose;
        }
        if other.color.is_some() {
            self.color = other.color;
        }
        if other.format.is_some() {
            self.format = other.format.clone();
        }
    }
}

impl LoggingSettings {
    pub fn validate(&self, section: &str) -> ConfigResult<()> {
        if let Some(level) = &self.level {
            validate_choice(&format!("{}.level", section), level, LOG_LEVELS)?;
        }
        Ok(())
    }

    pub fn merge(&mut self, other: &LoggingSettings) {
        if other.level.is_some() {
            self.level = other.level.clone();
        }
    }
}

/// Check `value` against a fixed set of names, case-insensitively
fn validate_choice(field: &str, value: &str, allowed: &[&str]) -> ConfigResult<()> {
    let lowered = value.to_lowercase();
    if allowed.contains(&lowered.as_str()) {
        Ok(())
    } else {
        Err(ConfigError::InvalidValue {
            field: field.to_string(),
            reason: format!("'{}' is not one of {}", value, allowed.join(", ")),
        })
    }
}

/// Parse a boolean the way environment overrides are written
pub(crate) fn parse_flag(value: &str) -> bool {
    matches!(value.to_lowercase().as_str(), "true" | "1" | "yes" | "on")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("system", true)]
    #[case("Virtual", true)]
    #[case("simulated", true)]
    #[case("sundial", false)]
    fn test_clock_choices(#[case] clock: &str, #[case] ok: bool) {
        let settings = HarnessSettings {
            clock: Some(clock.to_string()),
            ..Default::default()
        };
        assert_eq!(settings.validate("harness").is_ok(), ok);
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let settings = HarnessSettings {
            default_timeout_ms: Some(0),
            clock: None,
        };
        let err = settings.validate("harness").unwrap_err();
        assert!(err.to_string().contains("harness.default_timeout_ms"));
    }

    #[test]
    fn test_merge_prefers_set_values() {
        let mut base = ReportSettings {
            verbose: Some(true),
            color: Some(true),
            format: None,
        };
        base.merge(&ReportSettings {
            verbose: None,
            color: Some(false),
            format: Some("json".to_string()),
        });
        assert_eq!(base.verbose, Some(true));
        assert_eq!(base.color, Some(false));
        assert_eq!(base.format.as_deref(), Some("json"));
    }

    #[test]
    fn test_log_level_and_format_validation() {
        let logging = LoggingSettings {
            level: Some("chatty".to_string()),
        };
        assert!(logging.validate("logging").is_err());
        let report = ReportSettings {
            format: Some("xml".to_string()),
            ..Default::default()
        };
        assert!(report.validate("report").is_err());
    }

    #[test]
    fn test_parse_flag() {
        assert!(parse_flag("TRUE"));
        assert!(parse_flag("1"));
        assert!(!parse_flag("0"));
        assert!(!parse_flag("nope"));
    }
}
