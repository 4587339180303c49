//! blobctl.
//!
//! Reads, writes and watches managed blobs from the command line, using the same store
//! configuration as the application. Values are printed to stdout as JSON, logs go to stderr.

#![warn(
    missing_debug_implementations,
    unused_crate_dependencies,
    clippy::all
)]

mod cli;
mod logging;

fn main() {
    match cli::execute() {
        Ok(()) => std::process::exit(0),
        Err(error) => {
            logging::ensure_log_error(&error);
            std::process::exit(1);
        }
    }
}
