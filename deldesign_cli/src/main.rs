#![allow(missing_docs)]

use clap::Parser;
use deldesign_cli::{Opts, Subcommand};
use std::process::{ExitCode, Termination};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    let opts = Opts::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    if let Some(jobs) = opts.configuration.jobs {
        if let Err(err) = rayon::ThreadPoolBuilder::new()
            .num_threads(jobs)
            .build_global()
        {
            eprintln!("cannot size the worker pool: {err}");
            return ExitCode::FAILURE;
        }
    }

    match opts.subcommand.run(&opts.configuration) {
        Ok(code) => code,
        result @ Err(_) => result.report(),
    }
}
