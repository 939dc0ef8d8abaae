//! Helpers shared by tests that fork shells.

use std::os::fd::{FromRawFd, OwnedFd};
use std::os::unix::io::RawFd;
use std::sync::{Mutex, MutexGuard, OnceLock};

/// Serializes tests that create fds and fork, so no child inherits another test's pipe.
pub(crate) fn spawn_lock() -> MutexGuard<'static, ()> {
    static SPAWN_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    SPAWN_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// `(read, write)` pipe, both ends close-on-exec.
pub(crate) fn cloexec_pipe() -> (OwnedFd, OwnedFd) {
    let mut fds = [0 as RawFd; 2];
    let result = unsafe { libc::pipe(fds.as_mut_ptr()) };
    assert_eq!(result, 0, "pipe() failed: {}", std::io::Error::last_os_error());
    for fd in fds {
        unsafe {
            let flags = libc::fcntl(fd, libc::F_GETFD);
            libc::fcntl(fd, libc::F_SETFD, flags | libc::FD_CLOEXEC);
        }
    }
    unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) }
}

/// Read until end of stream.
pub(crate) fn read_to_end(fd: RawFd) -> Vec<u8> {
    let mut out = Vec::new();
    let mut buf = [0u8; 256];
    loop {
        let n = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
        if n <= 0 {
            break;
        }
        out.extend_from_slice(&buf[..n as usize]);
    }
    out
}

/// One JSON value per non-empty line.
pub(crate) fn parse_lines(bytes: &[u8]) -> Vec<serde_json::Value> {
    String::from_utf8_lossy(bytes)
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).expect("event line is JSON"))
        .collect()
}
