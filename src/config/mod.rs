//! Command-line and environment configuration for the bridge.

mod validation;

use clap::Parser;

pub const DEFAULT_SHELL: &str = "/bin/bash";
pub const DEFAULT_ROWS: u16 = 24;
pub const DEFAULT_COLS: u16 = 80;

/// Startup options. Every flag can also be supplied through its `PTY_*` environment variable,
/// which is how host applications usually configure the bridge.
#[derive(Debug, Parser, Clone)]
#[command(
    name = "pty-bridge",
    about = "pty-bridge: host a shell in a pseudo-terminal driven by JSON lines on stdin/stdout",
    author,
    version
)]
pub struct AppConfig {
    /// Shell executable to run inside the PTY
    #[arg(long, env = "PTY_SHELL", default_value = DEFAULT_SHELL)]
    pub shell: String,

    /// Shell arguments as a JSON array of strings
    #[arg(
        long = "shell-args",
        env = "PTY_SHELL_ARGS",
        default_value = "[]",
        value_name = "JSON"
    )]
    pub shell_args: String,

    /// Initial terminal width in columns
    #[arg(long, env = "PTY_COLS", default_value_t = DEFAULT_COLS)]
    pub cols: u16,

    /// Initial terminal height in rows
    #[arg(long, env = "PTY_ROWS", default_value_t = DEFAULT_ROWS)]
    pub rows: u16,

    /// Extra environment variables for the shell as a JSON object
    #[arg(long = "env", env = "PTY_ENV", default_value = "{}", value_name = "JSON")]
    pub extra_env: String,

    /// Enable the JSON trace log file
    #[arg(long = "logs", env = "PTY_BRIDGE_LOGS", default_value_t = false)]
    pub logs: bool,

    /// Disable all logging (overrides --logs)
    #[arg(long = "no-logs", env = "PTY_BRIDGE_NO_LOGS", default_value_t = false)]
    pub no_logs: bool,

    /// Allow PTY and control payload bytes in the trace log
    #[arg(
        long = "log-content",
        env = "PTY_BRIDGE_LOG_CONTENT",
        default_value_t = false
    )]
    pub log_content: bool,
}

impl AppConfig {
    pub fn logging_enabled(&self) -> bool {
        self.logs && !self.no_logs
    }
}
