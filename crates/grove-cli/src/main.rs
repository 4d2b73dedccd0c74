//! # grove CLI
//!
//! Command-line interface for grove: load outline folders into a graph
//! store, inspect pages, export them back to files, and run the sidecar.
//! Run `grove --help` for usage information.

mod cli;
pub mod ui;

use std::process::ExitCode;

fn main() -> ExitCode {
    cli::run()
}
