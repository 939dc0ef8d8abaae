use super::codec::{decode_line, EventWriter, LaunchFailureTemplate, LineBuffer};
use super::lifecycle::report_exit;
use super::protocol::OutboundEvent;
use super::router::{handle_control_message, Flow};
use crate::content_logging_enabled;
use crate::pty_session::{
    select_ready, ExitState, FdSet, PtyError, PtyRead, PtySession, SpawnRequest,
};
use std::io::{self, ErrorKind, Write};
use std::os::unix::io::RawFd;
use tracing::{debug, info, warn};

/// Bytes pulled from the control input per read.
const INPUT_CHUNK_SIZE: usize = 4096;

/// Why the event loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The controller reported end of stream (child exited or hung up).
    PtyClosed,
    /// The host closed the control input.
    InputClosed,
    /// A `close` message arrived.
    CloseRequested,
    /// Writing an event to the host failed.
    OutputClosed,
    /// The readiness wait itself failed.
    WaitFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeOutcome {
    /// The session ran; `exit` is `None` if the child could not be reaped.
    Finished {
        termination: Termination,
        exit: Option<ExitState>,
    },
    /// The shell never started. The single `exit` event has already been written.
    LaunchFailed,
}

/// Host `request` in a PTY and relay it over the protocol until the session ends.
///
/// `input_fd` carries control lines; `report_fd` is the raw fd behind `events`, which the
/// forked child writes to if it cannot exec. Exactly one `exit` event is produced on every
/// path; the only error is failing to write it.
pub fn run_bridge<W: Write>(
    request: &SpawnRequest,
    input_fd: RawFd,
    report_fd: RawFd,
    events: &mut EventWriter<W>,
) -> io::Result<BridgeOutcome> {
    let report = LaunchFailureTemplate::new(&request.shell).launch_report(report_fd);
    let mut session = match PtySession::create(request, &report) {
        Ok(session) => session,
        Err(PtyError::LaunchFailed { shell, source }) => {
            info!(shell = %shell, error = %source, "shell failed to launch");
            return Ok(BridgeOutcome::LaunchFailed);
        }
        Err(err) => {
            warn!(error = %err, "failed to start PTY session");
            events.emit(&OutboundEvent::launch_failed(err.to_string()))?;
            return Ok(BridgeOutcome::LaunchFailed);
        }
    };

    let termination = run_event_loop(&mut session, input_fd, events);
    info!(?termination, "event loop finished");
    let exit = report_exit(&mut session, events)?;
    Ok(BridgeOutcome::Finished { termination, exit })
}

/// Relay bytes between the PTY and the host until either side ends or `close` arrives.
///
/// Each iteration blocks in one readiness wait over both sources, plus controller
/// writability while host input is queued. Controller output is emitted before control
/// input from the same wait is processed, so a shell echoing a large write keeps draining.
pub fn run_event_loop<W: Write>(
    session: &mut PtySession,
    input_fd: RawFd,
    events: &mut EventWriter<W>,
) -> Termination {
    let mut lines = LineBuffer::default();
    let mut input = [0u8; INPUT_CHUNK_SIZE];

    loop {
        let Some(controller_fd) = session.controller_fd() else {
            return Termination::CloseRequested;
        };
        let ready = match wait_ready(controller_fd, input_fd, session.has_pending_input()) {
            Ok(ready) => ready,
            Err(err) => {
                warn!(error = %err, "readiness wait failed");
                return Termination::WaitFailed;
            }
        };

        if ready.controller_readable {
            match session.try_read() {
                PtyRead::Data(chunk) => {
                    if content_logging_enabled() {
                        debug!(
                            len = chunk.len(),
                            payload = %String::from_utf8_lossy(&chunk),
                            "pty output"
                        );
                    }
                    if let Err(err) = events.emit(&OutboundEvent::data(chunk)) {
                        warn!(error = %err, "failed to write data event");
                        return Termination::OutputClosed;
                    }
                }
                PtyRead::Empty => {}
                PtyRead::Closed => return Termination::PtyClosed,
            }
        }

        if ready.controller_writable {
            if let Err(err) = session.flush_input() {
                warn!(error = %err, "dropping queued PTY input");
            }
        }

        if ready.input_readable {
            let n = read_input(input_fd, &mut input);
            if n == 0 {
                // A final line without a newline still counts.
                let flow = match lines.take_remainder() {
                    Some(line) => dispatch_line(session, &line, events),
                    None => Ok(Flow::Continue),
                };
                return match flow {
                    Ok(Flow::Continue) => Termination::InputClosed,
                    Ok(Flow::Stop) => Termination::CloseRequested,
                    Err(_) => Termination::OutputClosed,
                };
            }
            lines.push(&input[..n]);
            while let Some(line) = lines.next_line() {
                match dispatch_line(session, &line, events) {
                    Ok(Flow::Continue) => {}
                    Ok(Flow::Stop) => return Termination::CloseRequested,
                    Err(err) => {
                        warn!(error = %err, "failed to write error event");
                        return Termination::OutputClosed;
                    }
                }
            }
        }
    }
}

fn dispatch_line<W: Write>(
    session: &mut PtySession,
    line: &[u8],
    events: &mut EventWriter<W>,
) -> io::Result<Flow> {
    match decode_line(line) {
        Some(message) => {
            debug!(kind = message.kind(), "control message");
            handle_control_message(session, message, events)
        }
        None => Ok(Flow::Continue),
    }
}

/// Read one chunk of control input. Zero means end of stream; read errors count as such.
fn read_input(fd: RawFd, buffer: &mut [u8]) -> usize {
    loop {
        // SAFETY: buffer is a valid writable slice of buffer.len() bytes.
        let n = unsafe { libc::read(fd, buffer.as_mut_ptr() as *mut libc::c_void, buffer.len()) };
        if n >= 0 {
            return n as usize;
        }
        let err = io::Error::last_os_error();
        if err.kind() == ErrorKind::Interrupted {
            continue;
        }
        debug!(error = %err, "control input read failed");
        return 0;
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Readiness {
    controller_readable: bool,
    controller_writable: bool,
    input_readable: bool,
}

/// Block until the controller or the control input is readable, or, with `want_write`,
/// until the controller can take more input.
fn wait_ready(controller_fd: RawFd, input_fd: RawFd, want_write: bool) -> io::Result<Readiness> {
    let mut readable = FdSet::new();
    readable.insert(controller_fd)?;
    readable.insert(input_fd)?;
    let mut writable = FdSet::new();
    if want_write {
        writable.insert(controller_fd)?;
    }
    select_ready(&mut readable, &mut writable)?;
    Ok(Readiness {
        controller_readable: readable.contains(controller_fd),
        controller_writable: want_write && writable.contains(controller_fd),
        input_readable: readable.contains(input_fd),
    })
}
