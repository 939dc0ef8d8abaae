use super::codec::EventWriter;
use super::protocol::{ExitReport, OutboundEvent};
use crate::pty_session::{ExitState, PtySession};
use std::io::{self, Write};
use tracing::{info, warn};

/// Close the controller, reap the child, and write the session's one `exit` event.
///
/// Closing first hangs up an interactive shell that would otherwise wait for input forever.
pub fn report_exit<W: Write>(
    session: &mut PtySession,
    events: &mut EventWriter<W>,
) -> io::Result<Option<ExitState>> {
    session.close();
    match session.wait_for_exit() {
        Ok(state) => {
            info!(
                pid = session.child_pid(),
                exit_code = ?state.exit_code,
                signal = ?state.signal,
                "PTY child exited"
            );
            events.emit(&OutboundEvent::exited(state))?;
            Ok(Some(state))
        }
        Err(err) => {
            warn!(error = %err, "could not reap PTY child");
            events.emit(&OutboundEvent::Exit(ExitReport::Terminated {
                exit_code: None,
                signal: None,
                error: Some(err.to_string()),
            }))?;
            Ok(None)
        }
    }
}
