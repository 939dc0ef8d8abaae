//! JSON-lines control protocol for the PTY bridge.
//!
//! Architecture:
//! - Single thread: one `select()` over the PTY controller and the control input
//! - Input for the shell is queued and written only as fast as the PTY accepts it
//! - Codec: one JSON object per line in both directions, binary payloads as base64
//! - Router: applies `write`/`resize`/`close` to the session
//! - Lifecycle: reaps the child and writes the final `exit` event
//!
//! Protocol:
//! - Commands (host → bridge): {"type": "write" | "resize" | "close", ...}
//! - Events (bridge → host): {"type": "data" | "error" | "exit", ...}

mod codec;
mod lifecycle;
mod protocol;
mod router;
mod session;


pub use codec::{
    decode_line, encode_event, escape_json_text, EventWriter, LaunchFailureTemplate, LineBuffer,
    MAX_LINE_BYTES,
};
pub use lifecycle::report_exit;
pub use protocol::{ControlMessage, ExitReport, OutboundEvent, LAUNCH_FAILURE_EXIT_CODE};
pub use router::{handle_control_message, ControlTarget, Flow};
pub use session::{run_bridge, run_event_loop, BridgeOutcome, Termination};
