use std::io::{self, ErrorKind};
use std::mem;
use std::os::unix::io::RawFd;
use std::ptr;

/// Largest chunk read from the controller in one call.
pub(super) const READ_CHUNK_SIZE: usize = 4096;

pub(super) enum ReadStatus {
    Data(usize),
    WouldBlock,
    /// A zero-length read or any other error (Linux reports `EIO` once the follower hangs up).
    Closed,
}

/// Read once from a non-blocking `fd`, retrying `EINTR`.
pub(super) fn read_chunk(fd: RawFd, buffer: &mut [u8]) -> ReadStatus {
    loop {
        // SAFETY: buffer is a valid writable slice of buffer.len() bytes.
        let n = unsafe { libc::read(fd, buffer.as_mut_ptr() as *mut libc::c_void, buffer.len()) };
        if n > 0 {
            return ReadStatus::Data(n as usize);
        }
        if n == 0 {
            return ReadStatus::Closed;
        }
        let err = io::Error::last_os_error();
        match err.kind() {
            ErrorKind::Interrupted => continue,
            ErrorKind::WouldBlock => return ReadStatus::WouldBlock,
            _ => {
                tracing::debug!(fd, error = %err, "PTY read ended");
                return ReadStatus::Closed;
            }
        }
    }
}

/// Write as much of `data` as a non-blocking `fd` takes right now.
/// `Ok(None)` means the fd is full and nothing was written.
pub(super) fn write_some(fd: RawFd, data: &[u8]) -> io::Result<Option<usize>> {
    loop {
        // SAFETY: data is a valid readable slice of data.len() bytes.
        let written = unsafe { libc::write(fd, data.as_ptr() as *const libc::c_void, data.len()) };
        if written > 0 {
            return Ok(Some(written as usize));
        }
        if written == 0 {
            return Ok(None);
        }
        let err = io::Error::last_os_error();
        match err.kind() {
            ErrorKind::Interrupted => continue,
            ErrorKind::WouldBlock => return Ok(None),
            _ => return Err(err),
        }
    }
}

/// Best-effort write for the forked child: no allocation, errors ignored.
///
/// # Safety
///
/// `fd` may be any value; `data` must be valid for reads.
pub(super) unsafe fn write_raw(fd: RawFd, mut data: &[u8]) {
    while !data.is_empty() {
        let written = libc::write(fd, data.as_ptr() as *const libc::c_void, data.len());
        if written < 0 {
            if io::Error::last_os_error().raw_os_error() == Some(libc::EINTR) {
                continue;
            }
            return;
        }
        if written == 0 {
            return;
        }
        data = data.get(written as usize..).unwrap_or(&[]);
    }
}

/// Mark `fd` close-on-exec.
pub(super) fn set_cloexec(fd: RawFd) -> io::Result<()> {
    // SAFETY: fcntl on an fd only reads and updates its descriptor flags.
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFD);
        if flags < 0 {
            return Err(io::Error::last_os_error());
        }
        if libc::fcntl(fd, libc::F_SETFD, flags | libc::FD_CLOEXEC) < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

/// Put `fd` in non-blocking mode.
pub(super) fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    // SAFETY: fcntl on an fd only reads and updates its status flags.
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL, 0);
        if flags < 0 {
            return Err(io::Error::last_os_error());
        }
        if libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

/// An `fd_set` that remembers its highest member, for `select()`.
#[derive(Clone, Copy)]
pub struct FdSet {
    set: libc::fd_set,
    max_fd: RawFd,
}

impl FdSet {
    pub fn new() -> Self {
        // SAFETY: fd_set is plain data; FD_ZERO initializes it.
        let mut set: libc::fd_set = unsafe { mem::zeroed() };
        unsafe { libc::FD_ZERO(&mut set) };
        Self { set, max_fd: -1 }
    }

    pub fn insert(&mut self, fd: RawFd) -> io::Result<()> {
        if !fits_fd_set(fd) {
            return Err(io::Error::new(
                ErrorKind::InvalidInput,
                format!("fd {fd} cannot be used with select()"),
            ));
        }
        // SAFETY: fd is within 0..FD_SETSIZE.
        unsafe { libc::FD_SET(fd, &mut self.set) };
        self.max_fd = self.max_fd.max(fd);
        Ok(())
    }

    pub fn contains(&self, fd: RawFd) -> bool {
        // SAFETY: fd is within 0..FD_SETSIZE.
        fits_fd_set(fd) && unsafe { libc::FD_ISSET(fd, &self.set) }
    }
}

impl Default for FdSet {
    fn default() -> Self {
        Self::new()
    }
}

fn fits_fd_set(fd: RawFd) -> bool {
    fd >= 0 && (fd as usize) < libc::FD_SETSIZE as usize
}

/// Block in `select()` until a member of either set is ready, leaving only ready fds in
/// the sets. `select()` rather than `poll()`: the latter does not work on macOS PTYs.
pub fn select_ready(read: &mut FdSet, write: &mut FdSet) -> io::Result<()> {
    let nfds = read.max_fd.max(write.max_fd) + 1;
    let (read_interest, write_interest) = (*read, *write);
    loop {
        // SAFETY: both sets are initialized and only hold fds below FD_SETSIZE.
        let result = unsafe {
            libc::select(
                nfds,
                &mut read.set,
                &mut write.set,
                ptr::null_mut(),
                ptr::null_mut(),
            )
        };
        if result >= 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.kind() != ErrorKind::Interrupted {
            return Err(err);
        }
        *read = read_interest;
        *write = write_interest;
    }
}
