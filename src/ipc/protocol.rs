//! JSON-lines protocol spoken over the bridge's stdin/stdout.
//!
//! Every message is one JSON object on one line, discriminated by its `"type"` field.
//! Binary payloads travel as standard base64 so a line never contains raw terminal bytes.

use crate::pty_session::{ExitState, EXEC_FAILURE_STATUS};
use serde::{Deserialize, Serialize};

/// Exit code reported when the shell could not be started.
pub const LAUNCH_FAILURE_EXIT_CODE: i32 = EXEC_FAILURE_STATUS;

// ============================================================================
// Control messages (host → bridge)
// ============================================================================

/// Commands decoded from one input line.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ControlMessage {
    /// Raw bytes for the shell's input
    Write {
        #[serde(default, deserialize_with = "base64_bytes::deserialize")]
        data: Vec<u8>,
    },

    /// New viewport geometry; a missing dimension keeps its current value.
    /// Range checks happen when the resize is applied, so bad values get an `error` event.
    Resize {
        #[serde(default)]
        rows: Option<i64>,
        #[serde(default)]
        cols: Option<i64>,
    },

    /// Close the controller and end the session
    Close,

    /// Any other tag. Decoding filters it out, so it never reaches the router.
    #[serde(other)]
    Unknown,
}

impl ControlMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            ControlMessage::Write { .. } => "write",
            ControlMessage::Resize { .. } => "resize",
            ControlMessage::Close => "close",
            ControlMessage::Unknown => "unknown",
        }
    }
}

// ============================================================================
// Outbound events (bridge → host)
// ============================================================================

/// Events written to stdout, one per line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutboundEvent {
    /// A chunk read from the PTY controller
    Data {
        #[serde(serialize_with = "base64_bytes::serialize")]
        data: Vec<u8>,
    },

    /// A non-fatal operational failure
    Error { error: String },

    /// Final event of the session
    Exit(ExitReport),
}

impl OutboundEvent {
    pub fn data(bytes: impl Into<Vec<u8>>) -> Self {
        OutboundEvent::Data { data: bytes.into() }
    }

    pub fn error(message: impl Into<String>) -> Self {
        OutboundEvent::Error {
            error: message.into(),
        }
    }

    pub fn exited(state: ExitState) -> Self {
        OutboundEvent::Exit(ExitReport::Terminated {
            exit_code: state.exit_code,
            signal: state.signal,
            error: None,
        })
    }

    pub fn launch_failed(message: impl Into<String>) -> Self {
        OutboundEvent::Exit(ExitReport::LaunchFailed {
            exit_code: LAUNCH_FAILURE_EXIT_CODE,
            error: message.into(),
        })
    }

    pub fn is_exit(&self) -> bool {
        matches!(self, OutboundEvent::Exit(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            OutboundEvent::Data { .. } => "data",
            OutboundEvent::Error { .. } => "error",
            OutboundEvent::Exit(_) => "exit",
        }
    }
}

/// Payload of the `exit` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ExitReport {
    /// The child ran and was reaped (or reaping failed, in which case `error` is set).
    Terminated {
        #[serde(rename = "exitCode")]
        exit_code: Option<i32>,
        signal: Option<i32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    /// The shell never started.
    LaunchFailed {
        #[serde(rename = "exitCode")]
        exit_code: i32,
        error: String,
    },
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded.as_bytes()).map_err(serde::de::Error::custom)
    }
}
