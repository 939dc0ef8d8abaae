use crate::config::AppConfig;
use std::env;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;
use tracing::Level;
use tracing_subscriber::fmt::time::UtcTime;

static TRACING_INIT: OnceLock<()> = OnceLock::new();
static LOG_CONTENT_ENABLED: AtomicBool = AtomicBool::new(false);

/// Trace log destination. Stdout carries the protocol, so logs only ever go to a file.
fn tracing_log_path() -> PathBuf {
    env::var("PTY_BRIDGE_TRACE_LOG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| env::temp_dir().join("pty_bridge_trace.jsonl"))
}

/// Whether payload bytes may be written to the trace log.
pub fn content_logging_enabled() -> bool {
    LOG_CONTENT_ENABLED.load(Ordering::Relaxed)
}

/// Install the JSON file subscriber when logging is enabled. Safe to call more than once.
pub fn init_tracing(config: &AppConfig) {
    let enabled = config.logging_enabled();
    LOG_CONTENT_ENABLED.store(enabled && config.log_content, Ordering::Relaxed);
    if !enabled {
        return;
    }

    let _ = TRACING_INIT.get_or_init(|| {
        let path = tracing_log_path();
        let file = match OpenOptions::new().create(true).append(true).open(&path) {
            Ok(file) => file,
            Err(_) => return,
        };
        let subscriber = tracing_subscriber::fmt()
            .json()
            .with_max_level(Level::DEBUG)
            .with_timer(UtcTime::rfc_3339())
            .with_writer(file)
            .with_current_span(false)
            .with_span_list(false)
            .finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    });
}
