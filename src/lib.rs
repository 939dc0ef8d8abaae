pub mod config;
pub mod ipc;
pub mod pty_session;
mod telemetry;

#[cfg(test)]
pub(crate) mod test_support;

pub use telemetry::{content_logging_enabled, init_tracing};
