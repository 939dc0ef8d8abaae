//! Everything the forked child needs, prepared in the parent.
//!
//! Nothing here may be built after `fork`: the child only reads the pointer arrays.

use super::error::PtyError;
use std::collections::BTreeMap;
use std::ffi::{CString, OsStr, OsString};
use std::os::unix::ffi::{OsStrExt, OsStringExt};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::ptr;

pub const DEFAULT_TERM: &str = "xterm-256color";
const FALLBACK_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

pub struct ShellCommand {
    display: String,
    program: CString,
    argv: Vec<CString>,
    envp: Vec<CString>,
}

impl ShellCommand {
    /// Build argv (`shell` first, then `args`) and the environment, resolving `shell` through
    /// the merged `PATH` when it has no slash.
    pub fn new(
        shell: &str,
        args: &[String],
        extra_env: &BTreeMap<String, String>,
    ) -> Result<Self, PtyError> {
        let env = merged_env(std::env::vars_os(), extra_env);
        let path_var = env.get(OsStr::new("PATH")).map(OsString::as_os_str);
        let program = resolve_program(shell, path_var);

        let mut argv = Vec::with_capacity(args.len() + 1);
        argv.push(to_cstring("shell", shell.as_bytes())?);
        for arg in args {
            argv.push(to_cstring("shell argument", arg.as_bytes())?);
        }

        let mut envp = Vec::with_capacity(env.len());
        for (key, value) in env {
            let mut entry = key.into_vec();
            entry.push(b'=');
            entry.extend_from_slice(value.as_bytes());
            envp.push(to_cstring("environment entry", &entry)?);
        }

        Ok(Self {
            display: shell.to_string(),
            program: to_cstring("shell", program.as_os_str().as_bytes())?,
            argv,
            envp,
        })
    }

    pub fn display(&self) -> &str {
        &self.display
    }

    pub fn program(&self) -> &CString {
        &self.program
    }

    pub fn argv(&self) -> &[CString] {
        &self.argv
    }

    pub fn envp(&self) -> &[CString] {
        &self.envp
    }

    /// Null-terminated pointer arrays for `execve`. Valid while `self` is alive.
    pub(super) fn exec_pointers(&self) -> (Vec<*const libc::c_char>, Vec<*const libc::c_char>) {
        let mut argv: Vec<_> = self.argv.iter().map(|s| s.as_ptr()).collect();
        argv.push(ptr::null());
        let mut envp: Vec<_> = self.envp.iter().map(|s| s.as_ptr()).collect();
        envp.push(ptr::null());
        (argv, envp)
    }
}

/// The process environment, overridden and extended by `extra`, with `TERM` defaulted
/// only when neither source sets it.
pub fn merged_env(
    base: impl IntoIterator<Item = (OsString, OsString)>,
    extra: &BTreeMap<String, String>,
) -> BTreeMap<OsString, OsString> {
    let mut env: BTreeMap<OsString, OsString> = base.into_iter().collect();
    for (key, value) in extra {
        env.insert(OsString::from(key), OsString::from(value));
    }
    env.entry(OsString::from("TERM"))
        .or_insert_with(|| OsString::from(DEFAULT_TERM));
    env
}

/// `execvp`-style lookup done up front. A name that is not found is returned unchanged so
/// `execve` fails with the usual error and the child reports it.
pub fn resolve_program(shell: &str, path_var: Option<&OsStr>) -> PathBuf {
    if shell.contains('/') {
        return PathBuf::from(shell);
    }
    let search = path_var.unwrap_or_else(|| OsStr::new(FALLBACK_PATH));
    std::env::split_paths(search)
        .filter(|dir| !dir.as_os_str().is_empty())
        .map(|dir| dir.join(shell))
        .find(|candidate| is_executable(candidate))
        .unwrap_or_else(|| PathBuf::from(shell))
}

fn is_executable(path: &Path) -> bool {
    path.metadata()
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

fn to_cstring(what: &'static str, bytes: &[u8]) -> Result<CString, PtyError> {
    CString::new(bytes).map_err(|_| PtyError::NulByte {
        what,
        value: String::from_utf8_lossy(bytes).into_owned(),
    })
}
