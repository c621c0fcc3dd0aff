//! Kiln CLI: the command-line interface of the kiln build orchestrator.
//!
//! Provides `kiln build` for gathering and assembling targets and
//! `kiln clean-snapshot` for discarding persisted build graphs after project
//! files were regenerated.

#![warn(missing_docs)]

mod build;
mod clean;
mod pipeline;

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand, ValueEnum};
use kiln_graph::ModuleSuffix;

/// Kiln, an incremental C/C++ build orchestrator.
#[derive(Parser, Debug)]
#[command(name = "kiln", version, about = "Kiln incremental build orchestrator")]
pub struct Cli {
    /// Suppress all output except errors.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Enable verbose (debug-level) output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to a custom `kiln.toml` configuration file.
    #[arg(long, global = true)]
    pub config: Option<String>,

    /// The subcommand to run.
    #[command(subcommand)]
    pub command: Command,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Build one or more targets.
    Build(BuildArgs),
    /// Delete persisted snapshots so the next build gathers afresh.
    CleanSnapshot(CleanArgs),
}

/// Arguments for the `kiln build` subcommand.
#[derive(Parser, Debug)]
pub struct BuildArgs {
    /// Targets to build.
    #[arg(required = true, num_args = 1..)]
    pub targets: Vec<String>,

    /// Gather and persist the build graph. Combined with `--assemble-only`,
    /// gathers and builds in one run.
    #[arg(long)]
    pub gather_only: bool,

    /// Build from the persisted build graph, failing if it is unusable.
    #[arg(long)]
    pub assemble_only: bool,

    /// Neither read nor write snapshots.
    #[arg(long)]
    pub no_snapshot: bool,

    /// Rescan the include directives of every file.
    #[arg(long)]
    pub rescan: bool,

    /// Compile only this file.
    #[arg(long, value_name = "PATH")]
    pub single_file: Option<PathBuf>,

    /// Override the configured handling of `\` in include directives.
    #[arg(long, value_enum)]
    pub backslash_includes: Option<BackslashArg>,

    /// Build for hot reload into a running process.
    #[arg(long)]
    pub hot_reload: bool,

    /// Module to hot reload, optionally with a fixed binary suffix.
    #[arg(long = "module", value_name = "NAME[=SUFFIX]")]
    pub modules: Vec<ModuleSuffix>,

    /// Gather the build graph without building.
    #[arg(long)]
    pub graph_only: bool,

    /// Print the build graph as JSON on stdout.
    #[arg(long)]
    pub explain: bool,

    /// Do not wait for other kiln instances.
    #[arg(long)]
    pub no_lock: bool,
}

/// Arguments for the `kiln clean-snapshot` subcommand.
#[derive(Parser, Debug)]
pub struct CleanArgs {
    /// Targets whose snapshots to delete; every target when omitted.
    pub targets: Vec<String>,
}

/// Handling of `\` in include directives.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum BackslashArg {
    /// Accept and normalize backslashes.
    Allow,
    /// Reject backslashes in first-party code.
    Error,
}

/// Global settings derived from CLI flags.
pub struct GlobalArgs {
    /// Whether to suppress non-error output.
    pub quiet: bool,
    /// Whether to print verbose/debug information.
    pub verbose: bool,
    /// Optional path to a custom config file.
    pub config: Option<String>,
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.quiet, cli.verbose);

    let global = GlobalArgs {
        quiet: cli.quiet,
        verbose: cli.verbose,
        config: cli.config,
    };

    let result = match cli.command {
        Command::Build(ref args) => build::run(args, &global),
        Command::CleanSnapshot(ref args) => clean::run(args, &global),
    };

    match result {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("error: {e}");
            process::exit(1);
        }
    }
}

/// Installs the log subscriber. `RUST_LOG` overrides the level implied by
/// `--quiet` and `--verbose`.
fn init_tracing(quiet: bool, verbose: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level(quiet, verbose)));
    let _ = tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(verbose)
                .with_level(true)
                .with_writer(std::io::stderr),
        )
        .with(filter)
        .try_init();
}

fn default_level(quiet: bool, verbose: bool) -> &'static str {
    if quiet {
        "error"
    } else if verbose {
        "debug"
    } else {
        "info"
    }
}
