//! The single pseudo-terminal session hosted by the bridge.
//!
//! Owns the controller fd and the child pid. The controller is closed exactly once (explicit
//! `close` or drop); the child is reaped exactly once and its status cached.

use super::command::ShellCommand;
use super::error::PtyError;
use super::io::{read_chunk, select_ready, write_some, FdSet, ReadStatus, READ_CHUNK_SIZE};
use super::spawn::{reap_blocking, reap_within, spawn_pty_child, LaunchReport};
use std::collections::{BTreeMap, VecDeque};
use std::io;
use std::mem;
use std::os::fd::{AsRawFd, OwnedFd};
use std::os::unix::io::RawFd;
use std::time::Duration;
use tracing::{debug, info, warn};

const DROP_GRACE: Duration = Duration::from_millis(500);

/// Viewport geometry in character cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSize {
    pub rows: u16,
    pub cols: u16,
}

impl WindowSize {
    pub fn new(rows: u16, cols: u16) -> Self {
        Self { rows, cols }
    }

    pub(super) fn to_winsize(self) -> libc::winsize {
        // SAFETY: libc::winsize is a plain C struct; zeroed is a valid baseline.
        let mut ws: libc::winsize = unsafe { mem::zeroed() };
        ws.ws_row = self.rows;
        ws.ws_col = self.cols;
        ws
    }
}

impl Default for WindowSize {
    fn default() -> Self {
        Self { rows: 24, cols: 80 }
    }
}

/// How the child terminated. A reaped child has exactly one field set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitState {
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
}

impl ExitState {
    pub fn from_wait_status(status: libc::c_int) -> Self {
        if libc::WIFEXITED(status) {
            Self {
                exit_code: Some(libc::WEXITSTATUS(status)),
                signal: None,
            }
        } else if libc::WIFSIGNALED(status) {
            Self {
                exit_code: None,
                signal: Some(libc::WTERMSIG(status)),
            }
        } else {
            Self {
                exit_code: None,
                signal: None,
            }
        }
    }
}

/// What to run and how to size it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnRequest {
    pub shell: String,
    pub args: Vec<String>,
    pub size: WindowSize,
    pub extra_env: BTreeMap<String, String>,
}

/// One non-blocking read from the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PtyRead {
    Data(Vec<u8>),
    /// Nothing to read right now.
    Empty,
    /// End of stream: the child exited or hung up, or the controller is closed.
    Closed,
}

pub struct PtySession {
    master: Option<OwnedFd>,
    child_pid: libc::pid_t,
    size: WindowSize,
    exit: Option<ExitState>,
    buffer: Box<[u8; READ_CHUNK_SIZE]>,
    /// Input accepted from the host but not yet taken by the PTY.
    pending_input: VecDeque<u8>,
}

impl PtySession {
    /// Open the PTY and start the shell on it.
    ///
    /// If the shell cannot be executed, the child writes `report` itself and this returns
    /// [`PtyError::LaunchFailed`]. The controller is non-blocking.
    pub fn create(request: &SpawnRequest, report: &LaunchReport) -> Result<Self, PtyError> {
        let command = ShellCommand::new(&request.shell, &request.args, &request.extra_env)?;
        let child = spawn_pty_child(&command, request.size, report)?;
        info!(
            pid = child.pid,
            shell = %request.shell,
            rows = request.size.rows,
            cols = request.size.cols,
            "PTY session started"
        );
        Ok(Self {
            master: Some(child.master),
            child_pid: child.pid,
            size: request.size,
            exit: None,
            buffer: Box::new([0u8; READ_CHUNK_SIZE]),
            pending_input: VecDeque::new(),
        })
    }

    pub fn child_pid(&self) -> libc::pid_t {
        self.child_pid
    }

    /// Raw controller fd for readiness polling, `None` once closed.
    pub fn controller_fd(&self) -> Option<RawFd> {
        self.master.as_ref().map(AsRawFd::as_raw_fd)
    }

    pub fn is_closed(&self) -> bool {
        self.master.is_none()
    }

    /// Read whatever output is available without blocking.
    pub fn try_read(&mut self) -> PtyRead {
        let Some(fd) = self.controller_fd() else {
            return PtyRead::Closed;
        };
        match read_chunk(fd, &mut self.buffer[..]) {
            ReadStatus::Data(n) => PtyRead::Data(self.buffer[..n].to_vec()),
            ReadStatus::WouldBlock => PtyRead::Empty,
            ReadStatus::Closed => PtyRead::Closed,
        }
    }

    /// Wait for the next chunk of output. `None` is end of stream, including after `close`.
    pub fn read_chunk(&mut self) -> Option<Vec<u8>> {
        loop {
            match self.try_read() {
                PtyRead::Data(chunk) => return Some(chunk),
                PtyRead::Closed => return None,
                PtyRead::Empty => {
                    let fd = self.controller_fd()?;
                    let mut readable = FdSet::new();
                    readable.insert(fd).ok()?;
                    select_ready(&mut readable, &mut FdSet::new()).ok()?;
                }
            }
        }
    }

    /// Queue bytes for the shell's input and push as much as the PTY accepts now.
    /// The rest goes out through [`PtySession::flush_input`] once the controller is writable.
    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), PtyError> {
        if self.is_closed() {
            return Err(PtyError::Closed);
        }
        self.pending_input.extend(bytes);
        self.flush_input()
    }

    /// Write queued input until the PTY would block. A write error drops the whole queue.
    pub fn flush_input(&mut self) -> Result<(), PtyError> {
        let fd = self.controller_fd().ok_or(PtyError::Closed)?;
        while !self.pending_input.is_empty() {
            let (front, _) = self.pending_input.as_slices();
            match write_some(fd, front) {
                Ok(Some(n)) => {
                    self.pending_input.drain(..n);
                }
                Ok(None) => break,
                Err(err) => {
                    debug!(dropped = self.pending_input.len(), "discarding queued PTY input");
                    self.pending_input.clear();
                    return Err(PtyError::Write(err));
                }
            }
        }
        Ok(())
    }

    /// Whether input is still waiting for the PTY to accept it.
    pub fn has_pending_input(&self) -> bool {
        !self.pending_input.is_empty()
    }

    /// Apply new geometry. The recorded size only changes when the ioctl succeeds.
    pub fn resize(&mut self, size: WindowSize) -> Result<(), PtyError> {
        let fd = self.controller_fd().ok_or_else(|| {
            PtyError::Resize(io::Error::from_raw_os_error(libc::EBADF))
        })?;
        let ws = size.to_winsize();
        // SAFETY: ioctl reads ws and targets the controller fd we own.
        let result = unsafe { libc::ioctl(fd, libc::TIOCSWINSZ, &ws) };
        if result != 0 {
            return Err(PtyError::Resize(io::Error::last_os_error()));
        }
        self.size = size;
        Ok(())
    }

    /// Last successfully applied geometry.
    pub fn current_size(&self) -> WindowSize {
        self.size
    }

    /// Geometry as the kernel reports it for the controller.
    pub fn query_size(&self) -> Option<WindowSize> {
        let fd = self.controller_fd()?;
        // SAFETY: libc::winsize is a plain C struct; zeroed is a valid baseline.
        let mut ws: libc::winsize = unsafe { mem::zeroed() };
        // SAFETY: ioctl writes into ws for the controller fd we own.
        if unsafe { libc::ioctl(fd, libc::TIOCGWINSZ, &mut ws) } != 0 {
            return None;
        }
        Some(WindowSize::new(ws.ws_row, ws.ws_col))
    }

    /// Close the controller. Idempotent.
    pub fn close(&mut self) {
        if let Some(master) = self.master.take() {
            debug!(
                fd = master.as_raw_fd(),
                unsent = self.pending_input.len(),
                "closing PTY controller"
            );
            drop(master);
        }
        self.pending_input.clear();
    }

    /// Block until the child terminates and classify how it ended.
    pub fn wait_for_exit(&mut self) -> Result<ExitState, PtyError> {
        if let Some(state) = self.exit {
            return Ok(state);
        }
        let status = reap_blocking(self.child_pid).map_err(|source| PtyError::Wait {
            pid: self.child_pid,
            source,
        })?;
        let state = ExitState::from_wait_status(status);
        self.exit = Some(state);
        Ok(state)
    }
}

impl Drop for PtySession {
    fn drop(&mut self) {
        self.close();
        if self.exit.is_some() {
            return;
        }
        // Closing the controller hangs up the shell; escalate if it lingers.
        if self.try_reap_for(DROP_GRACE) {
            return;
        }
        // SAFETY: child_pid is our own unreaped child.
        if unsafe { libc::kill(self.child_pid, libc::SIGTERM) } != 0 {
            warn!(
                pid = self.child_pid,
                error = %io::Error::last_os_error(),
                "SIGTERM to PTY child failed"
            );
        }
        if self.try_reap_for(DROP_GRACE) {
            return;
        }
        // SAFETY: child_pid is our own unreaped child.
        if unsafe { libc::kill(self.child_pid, libc::SIGKILL) } != 0 {
            warn!(
                pid = self.child_pid,
                error = %io::Error::last_os_error(),
                "SIGKILL to PTY child failed"
            );
        }
        if let Err(err) = reap_blocking(self.child_pid) {
            warn!(pid = self.child_pid, error = %err, "waitpid after SIGKILL failed");
        }
    }
}

impl PtySession {
    fn try_reap_for(&mut self, timeout: Duration) -> bool {
        match reap_within(self.child_pid, timeout) {
            Ok(Some(status)) => {
                self.exit = Some(ExitState::from_wait_status(status));
                true
            }
            Ok(None) => false,
            Err(err) => {
                debug!(pid = self.child_pid, error = %err, "waitpid failed during drop");
                true
            }
        }
    }
}
