//! Iterative multi-role software-construction loop.
//!
//! `aide <request...>` classifies the request, asks the operator to approve a
//! plan, then implements, tests and reviews in the working root until the
//! reviewer is satisfied or the iteration budget is spent.

use std::env;
use std::path::PathBuf;

use aide::exit_codes;
use aide::io::operator::ConsoleOperator;
use aide::logging;
use aide::run::{RunOutcome, RunRequest, run};
use aide::steps::MissingArtifactError;
use anyhow::{Context, Result};
use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "aide",
    version,
    about = "Iterative multi-role software-construction loop"
)]
struct Cli {
    /// What to build, fix, refactor or research.
    #[arg(required = true, num_args = 1..)]
    request: Vec<String>,

    /// Create and enter a fresh project directory named after the request.
    #[arg(long)]
    new: bool,

    /// Iteration budget; overrides `max_iterations` in `.aide/config.toml`.
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    max_iterations: Option<u32>,

    /// Skip the performance review after convergence.
    #[arg(long)]
    no_performance_test: bool,

    /// Working root (default: current directory).
    #[arg(long)]
    root: Option<PathBuf>,
}

fn main() {
    logging::init();
    let cli = Cli::parse();
    let code = match execute(cli) {
        Ok(outcome) => {
            println!("{}", outcome.summary);
            exit_codes::OK
        }
        Err(err) => {
            if let Some(missing) = err.downcast_ref::<MissingArtifactError>() {
                eprintln!("aborting: {missing}");
            } else {
                eprintln!("{err:#}");
            }
            exit_codes::FAILED
        }
    };
    std::process::exit(code);
}

fn execute(cli: Cli) -> Result<RunOutcome> {
    let base_dir = match cli.root {
        Some(root) => root,
        None => env::current_dir().context("resolve current directory")?,
    };
    let request = RunRequest {
        request: cli.request.join(" "),
        base_dir,
        new_project: cli.new,
        max_iterations: cli.max_iterations,
        run_performance_test: !cli.no_performance_test,
    };
    run(&request, &ConsoleOperator)
}
