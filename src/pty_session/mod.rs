//! Pseudo-terminal hosting: open the PTY, run the shell on its follower side, and give the
//! bridge non-blocking read/write plus resize/wait access to the controller side.

mod command;
mod error;
mod io;
mod pty;
mod spawn;


pub use command::{merged_env, resolve_program, ShellCommand, DEFAULT_TERM};
pub use error::PtyError;
pub use io::{select_ready, FdSet};
pub use pty::{ExitState, PtyRead, PtySession, SpawnRequest, WindowSize};
pub use spawn::{LaunchReport, EXEC_FAILURE_STATUS};
