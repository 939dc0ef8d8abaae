use super::command::ShellCommand;
use super::error::PtyError;
use super::io::{set_cloexec, set_nonblocking, write_raw};
use super::pty::WindowSize;
use std::io::{self, ErrorKind};
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::os::unix::io::RawFd;
use std::ptr;
use std::thread;
use std::time::{Duration, Instant};

/// Exit status of a child that could not start the shell.
pub const EXEC_FAILURE_STATUS: libc::c_int = 126;

/// Upper bound for escaped OS error text written by a forked child.
const ERROR_TEXT_CAPACITY: usize = 512;

/// How a forked child reports a failed exec: it writes `prefix`, the OS error text passed
/// through `escape`, then `suffix` to `fd`. Everything is prepared before `fork`, and
/// `escape` must not allocate.
pub struct LaunchReport {
    pub fd: RawFd,
    pub prefix: Vec<u8>,
    pub suffix: Vec<u8>,
    pub escape: fn(&[u8], &mut [u8]) -> usize,
}

pub(super) struct SpawnedChild {
    pub(super) master: OwnedFd,
    pub(super) pid: libc::pid_t,
}

/// Open a PTY sized to `size`, fork, and exec `command` on the follower side.
///
/// If the child cannot start the shell it writes `report` itself, and this returns
/// [`PtyError::LaunchFailed`] after reaping it; the caller must not report the failure again.
pub(super) fn spawn_pty_child(
    command: &ShellCommand,
    size: WindowSize,
    report: &LaunchReport,
) -> Result<SpawnedChild, PtyError> {
    let (argv, envp) = command.exec_pointers();
    let (master, slave) = open_pty_pair(size)?;
    let (status_read, status_write) = status_pipe()?;

    // SAFETY: the child only uses buffers prepared above and async-signal-safe calls
    // before it execs or exits.
    let pid = unsafe { libc::fork() };
    if pid < 0 {
        return Err(PtyError::Fork(io::Error::last_os_error()));
    }
    if pid == 0 {
        // SAFETY: we are the freshly forked child.
        unsafe {
            child_exec(
                slave.as_raw_fd(),
                status_write.as_raw_fd(),
                command.program().as_ptr(),
                &argv,
                &envp,
                report,
            )
        }
    }

    drop(slave);
    drop(status_write);
    match read_launch_status(status_read.as_raw_fd()) {
        None => Ok(SpawnedChild { master, pid }),
        Some(errno) => {
            if let Err(err) = reap_blocking(pid) {
                tracing::warn!(pid, error = %err, "failed to reap child after launch failure");
            }
            Err(PtyError::LaunchFailed {
                shell: command.display().to_string(),
                source: io::Error::from_raw_os_error(errno),
            })
        }
    }
}

fn open_pty_pair(size: WindowSize) -> Result<(OwnedFd, OwnedFd), PtyError> {
    let mut master_fd: RawFd = -1;
    let mut slave_fd: RawFd = -1;
    let mut winsize = size.to_winsize();

    #[allow(clippy::unnecessary_mut_passed)]
    // SAFETY: openpty expects valid pointers for master/slave/winsize; we pass stack locals.
    let result = unsafe {
        libc::openpty(
            &mut master_fd,
            &mut slave_fd,
            ptr::null_mut(),
            ptr::null_mut(),
            &mut winsize,
        )
    };
    if result != 0 {
        return Err(PtyError::Openpty(io::Error::last_os_error()));
    }
    // SAFETY: openpty succeeded, so both fds are open and owned by nobody else.
    let (master, slave) = unsafe { (OwnedFd::from_raw_fd(master_fd), OwnedFd::from_raw_fd(slave_fd)) };
    // The follower reaches the child through dup2, which clears the flag on fds 0-2.
    set_cloexec(master.as_raw_fd()).map_err(PtyError::Openpty)?;
    set_cloexec(slave.as_raw_fd()).map_err(PtyError::Openpty)?;
    // The bridge multiplexes reads and writes on one thread; a full PTY must never block it.
    set_nonblocking(master.as_raw_fd()).map_err(PtyError::Openpty)?;
    Ok((master, slave))
}

/// Close-on-exec pipe: a successful exec closes the write end without data.
fn status_pipe() -> Result<(OwnedFd, OwnedFd), PtyError> {
    let mut fds = [0 as RawFd; 2];
    // SAFETY: pipe writes two fds into the array.
    if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
        return Err(PtyError::StatusPipe(io::Error::last_os_error()));
    }
    // SAFETY: pipe succeeded, so both fds are open and unowned.
    let (read, write) = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };
    set_cloexec(read.as_raw_fd()).map_err(PtyError::StatusPipe)?;
    set_cloexec(write.as_raw_fd()).map_err(PtyError::StatusPipe)?;
    Ok((read, write))
}

/// Block until the status pipe closes. Returns the child's errno if it reported one.
fn read_launch_status(fd: RawFd) -> Option<i32> {
    let mut buf = [0u8; mem::size_of::<i32>()];
    let mut filled = 0;
    while filled < buf.len() {
        // SAFETY: reads into the unfilled tail of a stack buffer.
        let n = unsafe {
            libc::read(
                fd,
                buf[filled..].as_mut_ptr() as *mut libc::c_void,
                buf.len() - filled,
            )
        };
        if n > 0 {
            filled += n as usize;
            continue;
        }
        if n < 0 && io::Error::last_os_error().kind() == ErrorKind::Interrupted {
            continue;
        }
        break;
    }
    match filled {
        0 => None,
        n if n == buf.len() => Some(i32::from_ne_bytes(buf)),
        _ => Some(libc::EIO),
    }
}

/// Child process setup after fork: attach the follower as controlling terminal and exec.
///
/// # Safety
///
/// Must only be called in the child process after `fork()`. Never returns: it either
/// replaces the process image or writes the pre-rendered launch report and calls `_exit`.
unsafe fn child_exec(
    slave_fd: RawFd,
    status_fd: RawFd,
    program: *const libc::c_char,
    argv: &[*const libc::c_char],
    envp: &[*const libc::c_char],
    launch: &LaunchReport,
) -> ! {
    // fds 0-2 are about to become the follower, so keep a private handle on the report fd.
    let report_fd = libc::fcntl(launch.fd, libc::F_DUPFD_CLOEXEC, 3);

    let report = |err: io::Error| -> ! {
        let errno = err.raw_os_error().unwrap_or(libc::EIO);
        let mut text = [0u8; 256];
        let text_len = os_error_text(errno, &mut text);
        let mut escaped = [0u8; ERROR_TEXT_CAPACITY];
        let escaped_len = (launch.escape)(&text[..text_len], &mut escaped);
        write_raw(report_fd, &launch.prefix);
        write_raw(report_fd, &escaped[..escaped_len.min(escaped.len())]);
        write_raw(report_fd, &launch.suffix);
        write_raw(status_fd, &errno.to_ne_bytes());
        libc::_exit(EXEC_FAILURE_STATUS);
    };

    if libc::setsid() == -1 {
        report(io::Error::last_os_error());
    }
    if libc::ioctl(slave_fd, libc::TIOCSCTTY as _, 0) == -1 {
        report(io::Error::last_os_error());
    }
    if libc::dup2(slave_fd, libc::STDIN_FILENO) < 0
        || libc::dup2(slave_fd, libc::STDOUT_FILENO) < 0
        || libc::dup2(slave_fd, libc::STDERR_FILENO) < 0
    {
        report(io::Error::last_os_error());
    }
    if slave_fd > libc::STDERR_FILENO {
        libc::close(slave_fd);
    }
    // The Rust runtime ignores SIGPIPE; the shell should get the default disposition back.
    libc::signal(libc::SIGPIPE, libc::SIG_DFL);

    libc::execve(program, argv.as_ptr(), envp.as_ptr());
    report(io::Error::last_os_error());
}

/// `strerror_r` into `buf`, returning the text length. Allocation-free.
fn os_error_text(errno: i32, buf: &mut [u8]) -> usize {
    // SAFETY: strerror_r writes at most buf.len() bytes, NUL included.
    let rc = unsafe { libc::strerror_r(errno, buf.as_mut_ptr() as *mut libc::c_char, buf.len()) };
    if rc != 0 {
        let fallback = b"unknown error";
        let len = fallback.len().min(buf.len());
        buf[..len].copy_from_slice(&fallback[..len]);
        return len;
    }
    buf.iter().position(|&b| b == 0).unwrap_or(buf.len())
}

/// Blocking reap, retrying `EINTR`. Returns the raw wait status.
pub(super) fn reap_blocking(pid: libc::pid_t) -> io::Result<libc::c_int> {
    let mut status = 0;
    loop {
        // SAFETY: waitpid writes the status of our own child.
        let result = unsafe { libc::waitpid(pid, &mut status, 0) };
        if result == pid {
            return Ok(status);
        }
        let err = io::Error::last_os_error();
        if err.kind() == ErrorKind::Interrupted {
            continue;
        }
        return Err(err);
    }
}

/// Poll for the child to exit, giving up after `timeout`.
/// Returns the raw wait status if it was reaped, `Ok(None)` on timeout.
pub(super) fn reap_within(
    pid: libc::pid_t,
    timeout: Duration,
) -> io::Result<Option<libc::c_int>> {
    let start = Instant::now();
    let mut status = 0;
    loop {
        // SAFETY: waitpid with WNOHANG only inspects our own child.
        let result = unsafe { libc::waitpid(pid, &mut status, libc::WNOHANG) };
        if result == pid {
            return Ok(Some(status));
        }
        if result < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == ErrorKind::Interrupted {
                continue;
            }
            return Err(err);
        }
        if start.elapsed() >= timeout {
            return Ok(None);
        }
        thread::sleep(Duration::from_millis(10));
    }
}
