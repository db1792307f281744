//! Spawning the observed workload via fork and exec.
//!
//! The engine forks with elevated ids still in place; the child drops to
//! the caller's real uid/gid permanently before the exec so the observed
//! program never sees the setuid privileges.

use ct_common::{Error, Result};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{execvp, fork, ForkResult, Pid};
use std::ffi::{CString, OsString};
use std::os::unix::ffi::OsStrExt;

/// Exit of the observed workload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Code(i32),
    Signaled(i32),
}

impl ExitStatus {
    /// Map to the shell convention: 128 + signal for abnormal exits.
    pub fn as_shell_code(self) -> i32 {
        match self {
            ExitStatus::Code(code) => code,
            ExitStatus::Signaled(signal) => 128 + signal,
        }
    }
}

#[derive(Debug, Default)]
pub struct Subprocess {
    as_real_user: bool,
}

/// A spawned child; the single owner of its pid.
#[derive(Debug)]
pub struct Child {
    pid: Pid,
}

impl Subprocess {
    pub fn new() -> Self {
        Subprocess::default()
    }

    /// Drop to the real uid/gid in the child before exec.
    pub fn set_as_real_user(&mut self, val: bool) {
        self.as_real_user = val;
    }

    pub fn spawn(&self, argv: &[OsString]) -> Result<Child> {
        if argv.is_empty() {
            return Err(Error::Config("no command given".into()));
        }
        let args: Vec<CString> = argv
            .iter()
            .map(|a| CString::new(a.as_bytes()))
            .collect::<std::result::Result<_, _>>()
            .map_err(|_| Error::Config("command arguments must not contain NUL bytes".into()))?;

        match unsafe { fork() } {
            Ok(ForkResult::Parent { child }) => Ok(Child { pid: child }),
            Ok(ForkResult::Child) => {
                if self.as_real_user {
                    // Regain root first so setuid clears the saved uid too;
                    // otherwise the observed program could re-elevate.
                    let _ = nix::unistd::seteuid(nix::unistd::Uid::from_raw(0));
                    let _ = nix::unistd::setgid(nix::unistd::getgid());
                    let _ = nix::unistd::setuid(nix::unistd::getuid());
                }
                match execvp(&args[0], &args) {
                    Ok(infallible) => match infallible {},
                    Err(e) => {
                        eprintln!("cmdtrail-run: failed to execute {:?}: {e}", argv[0]);
                        unsafe { libc::_exit(127) }
                    }
                }
            }
            Err(e) => Err(Error::Reader(format!("fork failed: {e}"))),
        }
    }
}

impl Child {
    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Block until the child exits.
    pub fn wait(self) -> Result<ExitStatus> {
        loop {
            match waitpid(self.pid, None) {
                Ok(WaitStatus::Exited(_, code)) => return Ok(ExitStatus::Code(code)),
                Ok(WaitStatus::Signaled(_, signal, _)) => {
                    return Ok(ExitStatus::Signaled(signal as i32))
                }
                Ok(_) => continue,
                Err(nix::errno::Errno::EINTR) => continue,
                Err(e) => return Err(Error::Reader(format!("waitpid failed: {e}"))),
            }
        }
    }
}
