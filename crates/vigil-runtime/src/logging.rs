//! Logging bootstrap
//!
//! The runtime only emits `tracing` events. Binaries call [`init_logging`]
//! once to install a formatting subscriber; `VIGIL_LOG` takes precedence over
//! the configured level and accepts full `EnvFilter` directives.

use tracing_subscriber::EnvFilter;

/// Environment variable holding filter directives
pub const LOG_ENV: &str = "VIGIL_LOG";

/// Build the filter: `VIGIL_LOG` if set and valid, otherwise `level`
pub fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("warn"))
}

/// Install a global fmt subscriber writing to stderr
///
/// Returns false if a subscriber was already installed.
pub fn init_logging(level: &str) -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(level))
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .is_ok()
}
