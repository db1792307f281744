//! Mount-namespace isolation and the msenter rendezvous.
//!
//! The engine unshares its mount namespace before any mark is installed.
//! Other applications unsharing their namespace may rely on not being
//! joinable, so joining is restricted to processes whose effective gid
//! equals a dedicated system group: the engine forks a rendezvous child
//! carrying that gid, and `--msenter` verifies the target's egid before
//! calling setns.
//!
//! A directory descriptor to `/` is opened before the unshare; it survives
//! into the private namespace and lets the event reader resolve fd links in
//! the original mount view.

use crate::privilege;
use ct_common::{Error, Result};
use std::ffi::OsString;
use std::fs::File;
use std::os::fd::{OwnedFd, RawFd};
use std::os::unix::ffi::OsStrExt;
use std::path::PathBuf;

use nix::sched::{setns, unshare, CloneFlags};
use nix::sys::wait::waitpid;
use nix::unistd::{fork, getgid, getuid, pipe, read, ForkResult, Gid, Pid, Uid};

/// Open a directory descriptor to `/` in the current (original) namespace.
pub fn open_original_root() -> Result<OwnedFd> {
    let file = File::open("/").map_err(|e| Error::Io {
        path: PathBuf::from("/"),
        source: e,
    })?;
    Ok(OwnedFd::from(file))
}

/// Detach into a private mount namespace. Requires CAP_SYS_ADMIN.
pub fn unshare_mount_namespace() -> Result<()> {
    unshare(CloneFlags::CLONE_NEWNS).map_err(|e| {
        if nix::unistd::geteuid().is_root() {
            Error::Namespace(format!("unshare(CLONE_NEWNS) failed: {e}"))
        } else {
            Error::Privilege(format!(
                "unshare(CLONE_NEWNS) failed: {e}; the effective uid is not 0"
            ))
        }
    })
}

/// Resolve the dedicated msenter group, failing with the groupadd remedy.
pub fn msenter_gid(group_name: &str) -> Result<Gid> {
    match nix::unistd::Group::from_name(group_name) {
        Ok(Some(group)) => Ok(group.gid),
        Ok(None) => Err(Error::Privilege(format!(
            "group {group_name} does not exist on your system but is \
             required. Please add it: groupadd {group_name}"
        ))),
        Err(e) => Err(Error::Privilege(format!(
            "lookup of group {group_name} failed: {e}"
        ))),
    }
}

/// The forked rendezvous process. It blocks on a pipe read inside our mount
/// namespace with the msenter gid; dropping this handle closes the write end
/// (releasing the child) and reaps the pid.
pub struct RendezvousChild {
    pid: Pid,
    pipe_write: Option<OwnedFd>,
}

impl RendezvousChild {
    pub fn pid(&self) -> Pid {
        self.pid
    }
}

impl Drop for RendezvousChild {
    fn drop(&mut self) {
        self.pipe_write.take();
        if let Err(e) = waitpid(self.pid, None) {
            tracing::warn!("failed to reap rendezvous child {}: {e}", self.pid);
        }
    }
}

/// Fork the rendezvous child. Its effective gid is the msenter group, which
/// is the permission check used by namespace joins; the ids are set before
/// the fork so the parent does not have to synchronize with the child.
///
/// `close_in_child` is the control socket in shell-observation mode: the
/// socket tracks the observed shell, not the rendezvous process.
pub fn spawn_rendezvous_child(
    msenter_gid: Gid,
    real_uid: Uid,
    close_in_child: Option<RawFd>,
) -> Result<RendezvousChild> {
    privilege::set_euid(Uid::from_raw(0))?;
    privilege::set_egid(msenter_gid)?;
    privilege::set_euid(real_uid)?;

    let (pipe_read, pipe_write) = pipe().map_err(|e| {
        Error::Namespace(format!("failed to create rendezvous pipe: {e}"))
    })?;

    let fork_result = unsafe { fork() }
        .map_err(|e| Error::Namespace(format!("fork of rendezvous child failed: {e}")));
    match fork_result {
        Ok(ForkResult::Parent { child }) => {
            privilege::set_euid(Uid::from_raw(0))?;
            privilege::set_egid(getgid())?;
            privilege::set_euid(real_uid)?;
            drop(pipe_read);
            Ok(RendezvousChild {
                pid: child,
                pipe_write: Some(pipe_write),
            })
        }
        Ok(ForkResult::Child) => {
            if let Some(fd) = close_in_child {
                unsafe {
                    libc::close(fd);
                }
            }
            drop(pipe_write);
            let mut buf = [0u8; 1];
            // Blocks until the parent closes its write end.
            let _ = read(&pipe_read, &mut buf);
            unsafe { libc::_exit(0) }
        }
        Err(e) => {
            // Restore the parent's ids even when the fork failed.
            privilege::set_euid(Uid::from_raw(0))?;
            privilege::set_egid(getgid())?;
            privilege::set_euid(real_uid)?;
            Err(e)
        }
    }
}

/// Join the mount namespace of `pid` and exec `argv` with the caller's real
/// ids. Only processes whose effective gid equals the msenter group may be
/// joined.
pub fn join_and_exec(pid: i32, group_name: &str, argv: &[OsString]) -> Result<()> {
    if argv.is_empty() {
        return Err(Error::Config(
            "msenter requires a command to execute".into(),
        ));
    }
    let gid = msenter_gid(group_name)?;
    let egid = effective_gid_of(pid)?;
    if egid != gid.as_raw() {
        return Err(Error::Privilege(format!(
            "process {pid} was not created by cmdtrail-run (its effective \
             gid {egid} is not {group_name}); refusing to join"
        )));
    }

    privilege::set_euid(Uid::from_raw(0))?;
    let ns_path = PathBuf::from(format!("/proc/{pid}/ns/mnt"));
    let ns_file = File::open(&ns_path).map_err(|e| Error::Io {
        path: ns_path.clone(),
        source: e,
    })?;
    setns(&ns_file, CloneFlags::CLONE_NEWNS)
        .map_err(|e| Error::Namespace(format!("setns on {} failed: {e}", ns_path.display())))?;

    // Drop privileges permanently before the exec.
    nix::unistd::setgid(getgid())
        .map_err(|e| Error::Privilege(format!("setgid failed: {e}")))?;
    nix::unistd::setuid(getuid())
        .map_err(|e| Error::Privilege(format!("setuid failed: {e}")))?;

    let args: Vec<std::ffi::CString> = argv
        .iter()
        .map(|a| std::ffi::CString::new(a.as_bytes()))
        .collect::<std::result::Result<_, _>>()
        .map_err(|_| Error::Config("command arguments must not contain NUL bytes".into()))?;
    nix::unistd::execvp(&args[0], &args)
        .map_err(|e| Error::Config(format!("failed to execute {:?}: {e}", argv[0])))?;
    Ok(())
}

/// Read the effective gid of `pid` from its proc status file.
fn effective_gid_of(pid: i32) -> Result<u32> {
    let path = PathBuf::from(format!("/proc/{pid}/status"));
    let content = std::fs::read_to_string(&path).map_err(|e| Error::Io {
        path: path.clone(),
        source: e,
    })?;
    for line in content.lines() {
        if let Some(rest) = line.strip_prefix("Gid:") {
            let mut fields = rest.split_whitespace();
            let _real = fields.next();
            if let Some(effective) = fields.next() {
                return effective.parse().map_err(|_| {
                    Error::Namespace(format!("unparsable Gid line in {}", path.display()))
                });
            }
        }
    }
    Err(Error::Namespace(format!(
        "no Gid line in {}",
        path.display()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::fd::AsRawFd;

    #[test]
    fn original_root_is_a_directory_fd() {
        let fd = open_original_root().unwrap();
        assert!(fd.as_raw_fd() >= 0);
    }

    #[test]
    fn effective_gid_of_self_matches_getegid() {
        let egid = effective_gid_of(std::process::id() as i32).unwrap();
        assert_eq!(egid, nix::unistd::getegid().as_raw());
    }

    #[test]
    fn missing_group_names_the_remedy() {
        let err = msenter_gid("no-such-group-cmdtrail-test").unwrap_err();
        assert!(err.to_string().contains("groupadd"));
    }
}
