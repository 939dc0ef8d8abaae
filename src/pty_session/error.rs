use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PtyError {
    #[error("{what} contains a NUL byte: {value:?}")]
    NulByte { what: &'static str, value: String },

    #[error("openpty failed: {0}")]
    Openpty(io::Error),

    #[error("failed to create launch status pipe: {0}")]
    StatusPipe(io::Error),

    #[error("fork failed: {0}")]
    Fork(io::Error),

    /// The child could not start the shell and has already reported it on the protocol.
    #[error("failed to launch {shell}: {source}")]
    LaunchFailed { shell: String, source: io::Error },

    #[error("PTY controller is closed")]
    Closed,

    #[error("write to PTY failed: {0}")]
    Write(io::Error),

    #[error("failed to set window size: {0}")]
    Resize(io::Error),

    #[error("failed to set window size: {field} must be between 1 and 65535, got {value}")]
    InvalidSize { field: &'static str, value: i64 },

    #[error("waitpid({pid}) failed: {source}")]
    Wait { pid: libc::pid_t, source: io::Error },
}
