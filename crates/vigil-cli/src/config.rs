//! CLI settings
//!
//! Configuration comes from vigil.toml, the global config and `VIGIL_*`
//! variables (see `vigil-config`); flags given on the command line win.

use crate::commands::test::TestArgs;
use anyhow::{anyhow, Context, Result};
use std::path::Path;
use std::time::Duration;
use vigil_config::{Config, ConfigLoader};
use vigil_runtime::ClockKind;

/// Load configuration from `explicit`, or by searching upward from the working directory
pub fn load(explicit: Option<&Path>) -> Result<Config> {
    let mut loader = ConfigLoader::new();
    match explicit {
        Some(path) => loader
            .load_from_file(path)
            .with_context(|| format!("failed to load {}", path.display())),
        None => {
            let cwd = std::env::current_dir()?;
            loader
                .load_from_directory(&cwd)
                .context("failed to load configuration")
        }
    }
}

/// Settings for one `vigil test` invocation
#[derive(Debug, Clone, PartialEq)]
pub struct RunSettings {
    pub filter: Option<String>,
    pub parallel: bool,
    pub verbose: bool,
    pub color: bool,
    pub json: bool,
    pub clock: ClockKind,
    pub timeout: Duration,
}

impl RunSettings {
    /// Overlay command-line arguments onto loaded configuration
    pub fn resolve(config: &Config, args: &TestArgs) -> Result<Self> {
        let clock_name = args.clock.clone().unwrap_or_else(|| config.clock());
        let clock = clock_name.parse::<ClockKind>().map_err(|e| anyhow!(e))?;

        let timeout_ms = args.timeout_ms.unwrap_or_else(|| config.default_timeout_ms());
        if timeout_ms == 0 {
            return Err(anyhow!("--timeout must be greater than zero"));
        }

        Ok(Self {
            filter: args
                .pattern
                .clone()
                .or_else(|| config.filter().map(str::to_string)),
            parallel: args.parallel.unwrap_or_else(|| config.parallel()),
            verbose: args.verbose || config.verbose(),
            color: !args.no_color && config.color(),
            json: args.json || config.report_format() == "json",
            clock,
            timeout: Duration::from_millis(timeout_ms),
        })
    }
}
