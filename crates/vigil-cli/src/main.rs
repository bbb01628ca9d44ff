use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use std::io;
use std::path::PathBuf;

mod commands;
mod config;
mod testing;

/// Vigil asynchronous test harness.
///
/// Runs the bundled conformance suite, which drives timers, observer
/// notifications, crash-artifact delivery and callback-style APIs through
/// the harness and checks its lifecycle guarantees.
///
/// EXAMPLES:
///     vigil test                      Run every case
///     vigil test teardown/            Filter by name
///     vigil test --clock virtual      Run on simulated time
///     vigil test --parallel --json    Parallel workers, JSON report
///     vigil config                    Show the effective configuration
///
/// ENVIRONMENT VARIABLES:
///     VIGIL_TIMEOUT_MS     Per-case budget in milliseconds
///     VIGIL_CLOCK          'system' or 'virtual'
///     VIGIL_REPORT_FORMAT  'human' or 'json'
///     VIGIL_LOG            Log filter directives (e.g. 'vigil_runtime=debug')
///     NO_COLOR             Set to disable colored output
#[derive(Parser)]
#[command(name = "vigil")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Use this vigil.toml instead of searching upward from the working directory
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the conformance suite
    ///
    /// Each case runs on its own event loop and harness. Exits with status 1
    /// if any case fails or times out.
    ///
    /// EXAMPLES:
    ///     vigil test                      Run all cases
    ///     vigil test observer             Filter by pattern
    ///     vigil test --verbose            Show every case name
    ///     vigil test --list               List cases without running
    #[command(visible_alias = "t")]
    Test {
        /// Filter cases by name pattern
        pattern: Option<String>,
        /// Run cases on parallel worker threads
        #[arg(long, conflicts_with = "sequential")]
        parallel: bool,
        /// Run cases one after another
        #[arg(long)]
        sequential: bool,
        /// Verbose output (show all case names)
        #[arg(long, short = 'v')]
        verbose: bool,
        /// Disable colored output
        #[arg(long)]
        no_color: bool,
        /// Output in JSON format
        #[arg(long)]
        json: bool,
        /// Clock driving each case ("system" or "virtual")
        #[arg(long)]
        clock: Option<String>,
        /// Budget for each case in milliseconds
        #[arg(long, value_name = "MS")]
        timeout: Option<u64>,
        /// List matching cases without running them
        #[arg(long)]
        list: bool,
    },

    /// Print the effective configuration
    ///
    /// Shows every setting after merging the global config, vigil.toml and
    /// environment overrides.
    Config {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completions
    ///
    /// EXAMPLES:
    ///     vigil completions bash > ~/.local/share/bash-completion/completions/vigil
    ///     vigil completions zsh > ~/.zfunc/_vigil
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Completions { shell } = cli.command {
        let mut cmd = Cli::command();
        let name = cmd.get_name().to_string();
        generate(shell, &mut cmd, name, &mut io::stdout());
        return Ok(());
    }

    let config = config::load(cli.config.as_deref())?;
    vigil_runtime::logging::init_logging(&config.log_level());
    tracing::debug!(root = ?config.project_root(), "configuration loaded");

    match cli.command {
        Commands::Test {
            pattern,
            parallel,
            sequential,
            verbose,
            no_color,
            json,
            clock,
            timeout,
            list,
        } => {
            let parallel = match (parallel, sequential) {
                (true, _) => Some(true),
                (_, true) => Some(false),
                _ => None,
            };
            let args = commands::test::TestArgs {
                pattern,
                parallel,
                verbose,
                no_color,
                json,
                clock,
                timeout_ms: timeout,
                list,
            };
            if !commands::test::run(args, &config)? {
                std::process::exit(1);
            }
        }
        Commands::Config { json } => {
            commands::config::run(&config, json)?;
        }
        Commands::Completions { .. } => {}
    }

    Ok(())
}
