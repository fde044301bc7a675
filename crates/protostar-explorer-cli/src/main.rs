use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;
mod console;

/// Environment variable holding the log filter
const LOG_ENV: &str = "PROTOSTAR_EXPLORER_LOG";

/// Test explorer for protostar projects.
///
/// Discovers `test_*.cairo` files below a project folder, lists the test
/// cases they declare and runs them through protostar, attributing every
/// `[PASS]`/`[FAIL]` line back to its case.
///
/// EXAMPLES:
///     protostar-explorer list                     List test files
///     protostar-explorer list --cases --json      Dump the full tree as JSON
///     protostar-explorer run                      Run every test in the project
///     protostar-explorer run tests/test_main.cairo::test_add
///     protostar-explorer watch                    Keep the tree in sync
///
/// ENVIRONMENT VARIABLES:
///     PROTOSTAR_EXPLORER_PROGRAM    Runner program (default: protostar)
///     PROTOSTAR_EXPLORER_EXTENSION  Test file extension (default: cairo)
///     PROTOSTAR_EXPLORER_NUMBERING  Progress numbering: per-chunk or cumulative
///     PROTOSTAR_EXPLORER_LOG        Log filter (default: warn)
///     NO_COLOR                      Set to disable colored output
#[derive(Parser)]
#[command(name = "protostar-explorer")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Show debug logs
    #[arg(long, short = 'v', global = true)]
    verbose: bool,
    /// Hide the explorer output channel
    #[arg(long, short = 'q', global = true)]
    quiet: bool,
    /// Disable colored output
    #[arg(long, global = true, env = "NO_COLOR")]
    no_color: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List discovered test files and cases
    ///
    /// Files are found lazily; pass --cases to parse every file and show
    /// the test cases it declares.
    ///
    /// EXAMPLES:
    ///     protostar-explorer list
    ///     protostar-explorer list path/to/project --cases
    ///     protostar-explorer list --json
    #[command(visible_alias = "ls")]
    List {
        /// Project folder (defaults to the current directory)
        dir: Option<PathBuf>,
        /// Parse every file and list its cases
        #[arg(long, short = 'c')]
        cases: bool,
        /// Print the tree as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run tests through protostar
    ///
    /// Without IDS the whole project is run. An id is a file path relative
    /// to the project folder, optionally followed by `::` and a case name.
    ///
    /// EXAMPLES:
    ///     protostar-explorer run
    ///     protostar-explorer run tests/test_main.cairo
    ///     protostar-explorer run tests/test_main.cairo::test_add
    ///     protostar-explorer run --exclude tests/test_slow.cairo
    #[command(visible_alias = "r")]
    Run {
        /// Nodes to run
        ids: Vec<String>,
        /// Project folder (defaults to the current directory)
        #[arg(long, short = 'd')]
        dir: Option<PathBuf>,
        /// Nodes to skip
        #[arg(long, short = 'x')]
        exclude: Vec<String>,
        /// Runner program, overriding the configuration
        #[arg(long)]
        program: Option<String>,
        /// Progress numbering: per-chunk or cumulative
        #[arg(long)]
        numbering: Option<String>,
        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },

    /// Watch the project and print the tree whenever it changes
    ///
    /// EXAMPLES:
    ///     protostar-explorer watch
    ///     protostar-explorer watch path/to/project --cases
    #[command(visible_alias = "w")]
    Watch {
        /// Project folder (defaults to the current directory)
        dir: Option<PathBuf>,
        /// Parse every file and list its cases
        #[arg(long, short = 'c')]
        cases: bool,
    },
}

fn init_logging(verbose: bool) {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("warn")
        }
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if cli.no_color {
        colored::control::set_override(false);
    }

    let options = console::ConsoleOptions {
        quiet: cli.quiet,
        color: !cli.no_color,
    };

    match cli.command {
        Commands::List { dir, cases, json } => {
            let args = commands::list::ListArgs {
                dir: commands::project_dir(dir)?,
                cases,
                json,
            };
            commands::list::run(args, options)?;
        }
        Commands::Run {
            ids,
            dir,
            exclude,
            program,
            numbering,
            json,
        } => {
            let args = commands::run::RunArgs {
                dir: commands::project_dir(dir)?,
                ids,
                exclude,
                program,
                numbering,
                json,
            };
            let failed = commands::run::run(args, options).await?;
            if failed {
                std::process::exit(1);
            }
        }
        Commands::Watch { dir, cases } => {
            let args = commands::watch::WatchArgs {
                dir: commands::project_dir(dir)?,
                cases,
            };
            commands::watch::run(args, options).await?;
        }
    }

    Ok(())
}
