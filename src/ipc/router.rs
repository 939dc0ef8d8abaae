use super::codec::EventWriter;
use super::protocol::{ControlMessage, OutboundEvent};
use crate::content_logging_enabled;
use crate::pty_session::{PtyError, PtySession, WindowSize};
use std::io::{self, Write};
use tracing::{debug, warn};

/// What a control message can do to the session.
pub trait ControlTarget {
    fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), PtyError>;
    fn resize(&mut self, size: WindowSize) -> Result<(), PtyError>;
    fn current_size(&self) -> WindowSize;
    fn close(&mut self);
}

impl ControlTarget for PtySession {
    fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), PtyError> {
        PtySession::write_bytes(self, bytes)
    }

    fn resize(&mut self, size: WindowSize) -> Result<(), PtyError> {
        PtySession::resize(self, size)
    }

    fn current_size(&self) -> WindowSize {
        PtySession::current_size(self)
    }

    fn close(&mut self) {
        PtySession::close(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

/// Apply one decoded message.
///
/// Write failures are logged and dropped; resize failures become an `error` event.
/// The only error returned is a failure to write that event to the host.
pub fn handle_control_message<T, W>(
    target: &mut T,
    message: ControlMessage,
    events: &mut EventWriter<W>,
) -> io::Result<Flow>
where
    T: ControlTarget,
    W: Write,
{
    match message {
        ControlMessage::Write { data } => {
            if data.is_empty() {
                return Ok(Flow::Continue);
            }
            if content_logging_enabled() {
                debug!(len = data.len(), payload = %String::from_utf8_lossy(&data), "write");
            }
            if let Err(err) = target.write_bytes(&data) {
                warn!(error = %err, len = data.len(), "dropping write to PTY");
            }
            Ok(Flow::Continue)
        }
        ControlMessage::Resize { rows, cols } => {
            let result = requested_size(rows, cols, target.current_size())
                .and_then(|size| target.resize(size).map(|()| size));
            match result {
                Ok(size) => {
                    debug!(rows = size.rows, cols = size.cols, "resized PTY");
                }
                Err(err) => {
                    warn!(error = %err, ?rows, ?cols, "resize failed");
                    events.emit(&OutboundEvent::error(err.to_string()))?;
                }
            }
            Ok(Flow::Continue)
        }
        ControlMessage::Close => {
            debug!("close requested");
            target.close();
            Ok(Flow::Stop)
        }
        ControlMessage::Unknown => Ok(Flow::Continue),
    }
}

/// Geometry for a resize request. Omitted fields keep their current value.
fn requested_size(
    rows: Option<i64>,
    cols: Option<i64>,
    current: WindowSize,
) -> Result<WindowSize, PtyError> {
    Ok(WindowSize::new(
        dimension("rows", rows, current.rows)?,
        dimension("cols", cols, current.cols)?,
    ))
}

fn dimension(field: &'static str, requested: Option<i64>, current: u16) -> Result<u16, PtyError> {
    match requested {
        None => Ok(current),
        Some(value) => u16::try_from(value)
            .ok()
            .filter(|&cells| cells > 0)
            .ok_or(PtyError::InvalidSize { field, value }),
    }
}
