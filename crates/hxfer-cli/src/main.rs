use clap::Parser;
use hxfer_core::logging;

mod cli;

use crate::cli::Cli;

fn main() {
    let cli = Cli::parse();

    // Log to the state file; fall back to stderr when it cannot be opened.
    if let Err(err) = logging::init_logging(cli.verbose) {
        logging::init_logging_stderr(cli.verbose);
        tracing::warn!("file logging unavailable: {:#}", err);
    }

    if let Err(err) = cli.run() {
        eprintln!("hxfer error: {:#}", err);
        std::process::exit(1);
    }
}
