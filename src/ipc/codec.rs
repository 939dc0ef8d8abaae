//! Line framing for the protocol: encode events, decode control lines, split raw input.

use super::protocol::{ControlMessage, OutboundEvent, LAUNCH_FAILURE_EXIT_CODE};
use crate::pty_session::LaunchReport;
use std::io::{self, Write};
use std::os::unix::io::RawFd;
use tracing::debug;

/// Longest control line kept in memory. Anything longer is discarded like other bad input.
pub const MAX_LINE_BYTES: usize = 1 << 20;

/// Serialize an event as one JSON line, newline included.
pub fn encode_event(event: &OutboundEvent) -> serde_json::Result<String> {
    let mut line = serde_json::to_string(event)?;
    line.push('\n');
    Ok(line)
}

/// Decode one control line. Blank, malformed, and unrecognized lines all yield `None`.
pub fn decode_line(line: &[u8]) -> Option<ControlMessage> {
    let line = line.trim_ascii();
    if line.is_empty() {
        return None;
    }
    match serde_json::from_slice::<ControlMessage>(line) {
        Ok(ControlMessage::Unknown) => {
            debug!("ignoring control message with unrecognized type");
            None
        }
        Ok(message) => Some(message),
        Err(err) => {
            debug!(error = %err, "dropping malformed control line");
            None
        }
    }
}

/// Writes events to the host, flushing after every line.
///
/// At most one `exit` event is ever written; anything emitted after it is dropped.
pub struct EventWriter<W: Write> {
    out: W,
    exit_sent: bool,
}

impl<W: Write> EventWriter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            exit_sent: false,
        }
    }

    pub fn emit(&mut self, event: &OutboundEvent) -> io::Result<()> {
        if self.exit_sent {
            debug!(kind = event.kind(), "dropping event emitted after exit");
            return Ok(());
        }
        let line = encode_event(event).map_err(io::Error::other)?;
        self.out.write_all(line.as_bytes())?;
        self.out.flush()?;
        if event.is_exit() {
            self.exit_sent = true;
        }
        Ok(())
    }

    pub fn exit_sent(&self) -> bool {
        self.exit_sent
    }

    pub fn get_ref(&self) -> &W {
        &self.out
    }
}

/// Reassembles newline-terminated lines from raw input chunks.
///
/// A line that grows past [`MAX_LINE_BYTES`] is dropped up to and including its newline.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
    /// Bytes after the last newline in `pending`.
    partial_len: usize,
    discarding: bool,
}

impl LineBuffer {
    pub fn push(&mut self, mut chunk: &[u8]) {
        if self.discarding {
            match chunk.iter().position(|&b| b == b'\n') {
                Some(end) => {
                    self.discarding = false;
                    chunk = &chunk[end + 1..];
                }
                None => return,
            }
        }
        self.pending.extend_from_slice(chunk);
        self.partial_len = match chunk.iter().rposition(|&b| b == b'\n') {
            Some(last) => chunk.len() - last - 1,
            None => self.partial_len + chunk.len(),
        };
        if self.partial_len > MAX_LINE_BYTES {
            debug!(len = self.partial_len, "discarding oversized control line");
            let keep = self.pending.len() - self.partial_len;
            self.pending.truncate(keep);
            self.partial_len = 0;
            self.discarding = true;
        }
    }

    /// Pop the next complete line, without its terminator.
    pub fn next_line(&mut self) -> Option<Vec<u8>> {
        let end = self.pending.iter().position(|&b| b == b'\n')?;
        let mut line: Vec<u8> = self.pending.drain(..=end).collect();
        line.pop();
        Some(line)
    }

    /// Take whatever is left once the input stream has ended.
    pub fn take_remainder(&mut self) -> Option<Vec<u8>> {
        self.partial_len = 0;
        self.discarding = false;
        if self.pending.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.pending))
        }
    }
}

/// The `exit` line a forked child writes when it cannot start the shell.
///
/// Rendered before `fork` as a prefix and suffix around the OS error text, so the child
/// only copies bytes: `{"type":"exit","exitCode":126,"error":"failed to launch <shell>: <os error>"}`.
#[derive(Debug, Clone)]
pub struct LaunchFailureTemplate {
    prefix: Vec<u8>,
    suffix: Vec<u8>,
}

impl LaunchFailureTemplate {
    pub fn new(shell: &str) -> Self {
        // The quoted message minus its closing quote, so the OS error text lands inside the string.
        let quoted = serde_json::Value::String(format!("failed to launch {shell}: ")).to_string();
        let open = quoted.strip_suffix('"').unwrap_or(&quoted);
        let prefix = format!(
            "{{\"type\":\"exit\",\"exitCode\":{LAUNCH_FAILURE_EXIT_CODE},\"error\":{open}"
        );
        Self {
            prefix: prefix.into_bytes(),
            suffix: b"\"}\n".to_vec(),
        }
    }

    /// The child-side report for this shell, written to `fd`.
    pub fn launch_report(&self, fd: RawFd) -> LaunchReport {
        LaunchReport {
            fd,
            prefix: self.prefix.clone(),
            suffix: self.suffix.clone(),
            escape: escape_json_text,
        }
    }

    /// Full line for an OS error description, as the child would write it.
    #[cfg(test)]
    pub(crate) fn render(&self, description: &str) -> Vec<u8> {
        let mut escaped = vec![0u8; description.len() * 6];
        let len = escape_json_text(description.as_bytes(), &mut escaped);
        let mut line = self.prefix.clone();
        line.extend_from_slice(&escaped[..len]);
        line.extend_from_slice(&self.suffix);
        line
    }
}

/// Copy `text` into `out` as the body of a JSON string. Stops early rather than overflow.
/// Allocation-free, so it is usable between `fork` and `exec`.
pub fn escape_json_text(text: &[u8], out: &mut [u8]) -> usize {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut len = 0;
    for &byte in text {
        let mut encoded = [0u8; 6];
        let width = match byte {
            b'"' | b'\\' => {
                encoded[0] = b'\\';
                encoded[1] = byte;
                2
            }
            b'\n' => {
                encoded[..2].copy_from_slice(b"\\n");
                2
            }
            b'\r' => {
                encoded[..2].copy_from_slice(b"\\r");
                2
            }
            b'\t' => {
                encoded[..2].copy_from_slice(b"\\t");
                2
            }
            0x00..=0x1f => {
                encoded[..4].copy_from_slice(b"\\u00");
                encoded[4] = HEX[(byte >> 4) as usize];
                encoded[5] = HEX[(byte & 0x0f) as usize];
                6
            }
            // Non-ASCII is replaced so a truncated UTF-8 sequence can never reach the host.
            0x7f..=0xff => {
                encoded[0] = b'?';
                1
            }
            _ => {
                encoded[0] = byte;
                1
            }
        };
        if len + width > out.len() {
            break;
        }
        out[len..len + width].copy_from_slice(&encoded[..width]);
        len += width;
    }
    len
}
