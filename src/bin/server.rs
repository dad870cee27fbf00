//! Parlor forwarding server binary.
//! Run with: cargo run --bin parlor-server

use std::process::ExitCode;

use parlor_chat::start_parlor;

fn main() -> ExitCode {
    start_parlor::run_server()
}
