//! Command-line interface implementation
//!
//! This module provides the CLI entry point and dispatches to submodules
//! for specific command implementations.

mod build;

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use crate::config::CliOverrides;

/// Exit codes
pub(crate) const EXIT_SUCCESS: u8 = 0;
pub(crate) const EXIT_ERROR: u8 = 1;
pub(crate) const EXIT_INVALID_ARGS: u8 = 2;

/// Environment variable holding the log filter directive.
pub const LOG_ENV: &str = "KEEL_LOG";

/// keel - Build HTML pages and the assets they reference
#[derive(Parser)]
#[command(name = "keel")]
#[command(about = "keel - Build HTML entry points, scripts, styles, icons and manifests into an output directory")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Build the entry asset once
    Build {
        #[command(flatten)]
        args: BuildArgs,

        /// Keep running and rebuild on changes
        #[arg(short, long)]
        watch: bool,
    },

    /// Build the entry asset, then rebuild on changes until interrupted
    Watch {
        #[command(flatten)]
        args: BuildArgs,
    },
}

/// Flags shared by `build` and `watch`.
#[derive(Args, Debug, Clone, Default)]
pub struct BuildArgs {
    /// Entry asset (defaults to [project] entry in keel.toml)
    pub entry: Option<PathBuf>,

    /// Output directory
    #[arg(short, long)]
    pub out: Option<PathBuf>,

    /// Path to keel.toml (defaults to searching upward from the working directory)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Minify output and drop comments
    #[arg(long)]
    pub production: bool,

    /// Do not write source maps
    #[arg(long)]
    pub no_sourcemap: bool,

    /// Report lint diagnostics
    #[arg(long)]
    pub lint: bool,

    /// Fail the build on lint errors (implies --lint)
    #[arg(long)]
    pub lint_blocks: bool,

    /// Report per-dependency output sizes
    #[arg(long)]
    pub analyze: bool,

    /// Emit progress as JSON lines
    #[arg(long)]
    pub json: bool,

    /// Verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

impl BuildArgs {
    /// Config overrides for the flags that were given.
    pub fn overrides(&self) -> CliOverrides {
        CliOverrides {
            entry: self.entry.clone(),
            out: self.out.clone(),
            production: self.production.then_some(true),
            sourcemap: self.no_sourcemap.then_some(false),
            lint: self.lint.then_some(true),
            lint_blocks: self.lint_blocks.then_some(true),
            analyze: self.analyze.then_some(true),
        }
    }
}

/// Install the tracing subscriber; `KEEL_LOG` wins over the verbosity default.
fn init_tracing(verbose: bool) {
    let default = if verbose { "info" } else { "warn" };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).with_target(false).try_init();
}

/// Parse arguments and run the selected command.
pub fn run() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        Commands::Build { args, watch } => {
            init_tracing(args.verbose);
            if watch {
                build::run_watch(&args)
            } else {
                build::run_build(&args)
            }
        }
        Commands::Watch { args } => {
            init_tracing(args.verbose);
            build::run_watch(&args)
        }
    }
}
