//! Command-line harness for the strand threading runtime.

mod scenario;

use clap::{Parser, Subcommand};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use scenario::{ContendOptions, HandoffOptions};

#[derive(Parser)]
#[command(name = "strand")]
#[command(author, version)]
#[command(about = "Exercise strand threads and recursive locks", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Hand a counter back and forth between two threads via wait/signal
    Handoff {
        /// Number of handoff rounds to run
        #[arg(short, long, default_value = "100")]
        rounds: u32,
    },

    /// Hammer one recursive lock from several threads
    Contend {
        /// Number of worker threads
        #[arg(short, long, default_value = "4")]
        threads: u32,

        /// Critical sections entered per thread
        #[arg(short, long, default_value = "10000")]
        iterations: u32,

        /// Recursion depth of each critical section
        #[arg(short, long, default_value = "2")]
        depth: u32,
    },
}

fn init_logging(verbose: bool) {
    let fallback = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(fallback))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_names(true)
        .with_writer(std::io::stderr)
        .try_init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match cli.command {
        Commands::Handoff { rounds } => {
            scenario::run_handoff(&HandoffOptions { rounds }).map(|report| report.to_string())
        }
        Commands::Contend {
            threads,
            iterations,
            depth,
        } => scenario::run_contend(&ContendOptions {
            threads,
            iterations,
            depth,
        })
        .map(|report| report.to_string()),
    };

    match result {
        Ok(summary) => {
            println!("{summary}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
