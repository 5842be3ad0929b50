//! `svcheck` entrypoint.

use std::process::ExitCode;

use clap::Parser;
use supervisor_checks::cli_app::{Cli, run};

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("svcheck: {err}");
            ExitCode::FAILURE
        }
    }
}
