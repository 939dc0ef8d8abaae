//! pty-bridge entrypoint: one shell in one PTY, driven by JSON lines.
//!
//! Stdin carries control messages, stdout carries events. Nothing else is ever printed
//! to stdout, and every run ends with exactly one `exit` line.

use clap::error::ErrorKind;
use clap::Parser;
use pty_bridge::config::AppConfig;
use pty_bridge::init_tracing;
use pty_bridge::ipc::{run_bridge, EventWriter, OutboundEvent};
use std::io;
use std::process::ExitCode;
use tracing::{info, warn};

fn main() -> ExitCode {
    let config = match AppConfig::try_parse() {
        Ok(config) => config,
        Err(err) => match err.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => err.exit(),
            _ => return report_invalid_config(err.to_string().trim()),
        },
    };
    init_tracing(&config);

    let request = match config.spawn_request() {
        Ok(request) => request,
        Err(err) => {
            warn!(error = %format!("{err:#}"), "invalid configuration");
            return report_invalid_config(&format!("{err:#}"));
        }
    };

    let stdout = io::stdout();
    let mut events = EventWriter::new(stdout.lock());
    match run_bridge(&request, libc::STDIN_FILENO, libc::STDOUT_FILENO, &mut events) {
        Ok(outcome) => {
            info!(?outcome, "bridge finished");
            ExitCode::SUCCESS
        }
        Err(err) => {
            warn!(error = %err, "failed to write final event");
            ExitCode::FAILURE
        }
    }
}

fn report_invalid_config(message: &str) -> ExitCode {
    let mut events = EventWriter::new(io::stdout().lock());
    let event = OutboundEvent::launch_failed(format!("invalid configuration: {message}"));
    match events.emit(&event) {
        Ok(()) => ExitCode::SUCCESS,
        Err(_) => ExitCode::FAILURE,
    }
}
