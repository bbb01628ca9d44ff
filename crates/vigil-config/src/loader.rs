//! Configuration Loader
//!
//! Handles loading and merging configuration from multiple sources with proper precedence.

use crate::global::GlobalConfig;
use crate::project::ProjectConfig;
use crate::settings::parse_flag;
use crate::{ConfigError, ConfigResult};
use serde::Serialize;
use std::env;
use std::path::{Path, PathBuf};

/// Name of the project configuration file
pub const PROJECT_FILE: &str = "vigil.toml";

pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_CLOCK: &str = "system";
pub const DEFAULT_REPORT_FORMAT: &str = "human";
pub const DEFAULT_LOG_LEVEL: &str = "warn";

/// Configuration loader
///
/// Loads configuration from multiple sources and merges them with proper precedence:
/// 1. Global config (~/.vigil/config.toml) - lowest priority
/// 2. Project config (./vigil.toml) - overrides global
/// 3. Environment variables (VIGIL_*, NO_COLOR) - overrides project
/// 4. CLI flags - highest priority (handled by caller)
pub struct ConfigLoader {
    /// Cached global config path
    global_config_path: Option<PathBuf>,
}

/// Merged configuration result
#[derive(Debug, Clone)]
pub struct Config {
    /// Project configuration, with environment overrides applied
    pub project: ProjectConfig,

    /// Global configuration
    pub global: GlobalConfig,

    /// Project root directory (where vigil.toml was found)
    pub project_root: Option<PathBuf>,
}

/// Fully resolved settings, as printed by `vigil config`
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct EffectiveConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suite: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_root: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
    pub parallel: bool,
    pub default_timeout_ms: u64,
    pub clock: String,
    pub report_format: String,
    pub verbose: bool,
    pub color: bool,
    pub log_level: String,
}

impl ConfigLoader {
    /// Create a new configuration loader
    pub fn new() -> Self {
        Self {
            global_config_path: None,
        }
    }

    /// Read global settings from `path` instead of the home directory
    pub fn with_global_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.global_config_path = Some(path.into());
        self
    }

    /// Load configuration starting from the given directory
    ///
    /// Walks up the directory tree to find vigil.toml, then loads and merges
    /// global config if it exists.
    pub fn load_from_directory(&mut self, start_dir: &Path) -> ConfigResult<Config> {
        let (project_root, project_config) = self.find_project_config(start_dir)?;
        let global_config = self.load_global_config()?;
        let project_config = self.apply_env_overrides(project_config)?;

        Ok(Config {
            project: project_config,
            global: global_config,
            project_root,
        })
    }

    /// Load configuration from a specific project config file
    pub fn load_from_file(&mut self, config_path: &Path) -> ConfigResult<Config> {
        let project_config = ProjectConfig::load_from_file(config_path)?;
        let global_config = self.load_global_config()?;
        let project_config = self.apply_env_overrides(project_config)?;

        let project_root = config_path.parent().map(|p| p.to_path_buf());

        Ok(Config {
            project: project_config,
            global: global_config,
            project_root,
        })
    }

    /// Find project configuration by walking up directory tree
    ///
    /// Returns (project_root, project_config); no file means default config
    fn find_project_config(
        &self,
        start_dir: &Path,
    ) -> ConfigResult<(Option<PathBuf>, ProjectConfig)> {
        let mut current = start_dir.to_path_buf();

        loop {
            let config_path = current.join(PROJECT_FILE);

            if config_path.exists() {
                let project_config = ProjectConfig::load_from_file(&config_path)?;
                return Ok((Some(current), project_config));
            }

            match current.parent() {
                Some(parent) => current = parent.to_path_buf(),
                None => return Ok((None, ProjectConfig::default())),
            }
        }
    }

    /// Load global configuration; a missing file or home directory yields defaults
    fn load_global_config(&mut self) -> ConfigResult<GlobalConfig> {
        let path = match &self.global_config_path {
            Some(path) => path.clone(),
            None => match GlobalConfig::global_config_path() {
                Ok(path) => {
                    self.global_config_path = Some(path.clone());
                    path
                }
                Err(ConfigError::HomeNotFound) => return Ok(GlobalConfig::default()),
                Err(e) => return Err(e),
            },
        };

        if !path.exists() {
            return Ok(GlobalConfig::default());
        }

        GlobalConfig::load_from_file(&path)
    }

    /// Apply environment variable overrides to project config
    ///
    /// VIGIL_TIMEOUT_MS, VIGIL_CLOCK and VIGIL_REPORT_FORMAT set the matching
    /// keys. NO_COLOR, when set to anything non-empty, disables color.
    fn apply_env_overrides(&self, mut config: ProjectConfig) -> ConfigResult<ProjectConfig> {
        if let Ok(timeout) = env::var("VIGIL_TIMEOUT_MS") {
            let ms = timeout
                .trim()
                .parse::<u64>()
                .map_err(|_| ConfigError::InvalidValue {
                    field: "VIGIL_TIMEOUT_MS".to_string(),
                    reason: format!("'{}' is not a number of milliseconds", timeout),
                })?;
            config.harness_mut().default_timeout_ms = Some(ms);
        }

        if let Ok(clock) = env::var("VIGIL_CLOCK") {
            config.harness_mut().clock = Some(clock);
        }

        if let Ok(format) = env::var("VIGIL_REPORT_FORMAT") {
            config.report_mut().format = Some(format);
        }

        if let Ok(verbose) = env::var("VIGIL_VERBOSE") {
            config.report_mut().verbose = Some(parse_flag(&verbose));
        }

        if env::var_os("NO_COLOR").is_some_and(|v| !v.is_empty()) {
            config.report_mut().color = Some(false);
        }

        config.validate()?;
        Ok(config)
    }

    /// Get the global configuration directory (~/.vigil)
    pub fn global_config_dir() -> ConfigResult<PathBuf> {
        let home = dirs::home_dir().ok_or(ConfigError::HomeNotFound)?;
        Ok(home.join(".vigil"))
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            project: ProjectConfig::default(),
            global: GlobalConfig::default(),
            project_root: None,
        }
    }
}

impl Config {
    /// Effective per-test timeout (env > project > global > default)
    pub fn default_timeout_ms(&self) -> u64 {
        self.harness(|h| h.default_timeout_ms)
            .unwrap_or(DEFAULT_TIMEOUT_MS)
    }

    /// Effective clock name, lowercased
    pub fn clock(&self) -> String {
        self.harness(|h| h.clock.clone())
            .unwrap_or_else(|| DEFAULT_CLOCK.to_string())
            .to_lowercase()
    }

    pub fn report_format(&self) -> String {
        self.report(|r| r.format.clone())
            .unwrap_or_else(|| DEFAULT_REPORT_FORMAT.to_string())
            .to_lowercase()
    }

    pub fn verbose(&self) -> bool {
        self.report(|r| r.verbose).unwrap_or(false)
    }

    pub fn color(&self) -> bool {
        self.report(|r| r.color).unwrap_or(true)
    }

    pub fn log_level(&self) -> String {
        self.project
            .logging
            .as_ref()
            .and_then(|l| l.level.clone())
            .or_else(|| self.global.logging.as_ref().and_then(|l| l.level.clone()))
            .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string())
            .to_lowercase()
    }

    /// Get the suite name
    pub fn suite_name(&self) -> Option<&str> {
        self.project.suite_name()
    }

    pub fn filter(&self) -> Option<&str> {
        self.project.filter()
    }

    pub fn parallel(&self) -> bool {
        self.project
            .suite
            .as_ref()
            .and_then(|s| s.parallel)
            .unwrap_or(false)
    }

    /// Get the project root directory
    pub fn project_root(&self) -> Option<&Path> {
        self.project_root.as_deref()
    }

    /// Check if this is a project (has vigil.toml)
    pub fn is_project(&self) -> bool {
        self.project_root.is_some()
    }

    /// Snapshot every resolved value
    pub fn effective(&self) -> EffectiveConfig {
        EffectiveConfig {
            suite: self.suite_name().map(str::to_string),
            project_root: self.project_root().map(|p| p.display().to_string()),
            filter: self.filter().map(str::to_string),
            parallel: self.parallel(),
            default_timeout_ms: self.default_timeout_ms(),
            clock: self.clock(),
            report_format: self.report_format(),
            verbose: self.verbose(),
            color: self.color(),
            log_level: self.log_level(),
        }
    }

    fn harness<T>(&self, get: impl Fn(&crate::HarnessSettings) -> Option<T>) -> Option<T> {
        self.project
            .harness
            .as_ref()
            .and_then(&get)
            .or_else(|| self.global.harness.as_ref().and_then(&get))
    }

    fn report<T>(&self, get: impl Fn(&crate::ReportSettings) -> Option<T>) -> Option<T> {
        self.project
            .report
            .as_ref()
            .and_then(&get)
            .or_else(|| self.global.report.as_ref().and_then(&get))
    }
}

impl EffectiveConfig {
    /// Render as TOML
    pub fn to_toml(&self) -> String {
        toml::to_string(self).unwrap_or_else(|e| format!("# failed to render config: {}\n", e))
    }
}
