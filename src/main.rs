//! keel - Command-line tool for building and watching front-end assets

use std::process::ExitCode;

use keel::cli;

fn main() -> ExitCode {
    cli::run()
}
