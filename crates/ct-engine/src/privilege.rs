//! Privilege gate: effective-uid switching and scoped capability sets.
//!
//! The engine enters with the setuid bit granting effective root while the
//! real uid stays the caller's. Mount-namespace and mark setup need root;
//! the event drain switches back to the real uid (root is often remapped on
//! network filesystems, see exports(5) on root squashing) and re-raises only
//! CAP_SYS_PTRACE and CAP_SYS_NICE from the permitted set. Changing the
//! effective uid away from 0 clears the effective capability set, so the
//! raise must happen after the switch.

use ct_common::{Error, Result};
use nix::unistd::{geteuid, getuid, Gid, Uid};

pub const CAP_SYS_PTRACE: u32 = 19;
pub const CAP_SYS_NICE: u32 = 23;

const LINUX_CAPABILITY_VERSION_3: u32 = 0x2008_0522;

#[repr(C)]
struct CapUserHeader {
    version: u32,
    pid: libc::c_int,
}

#[repr(C)]
#[derive(Clone, Copy, Default)]
struct CapUserData {
    effective: u32,
    permitted: u32,
    inheritable: u32,
}

/// Verify the setuid contract: effective root, real uid unchanged.
pub fn assert_effective_root() -> Result<()> {
    if !geteuid().is_root() {
        return Err(Error::Privilege(format!(
            "the effective uid is {} but must be 0 (root)",
            geteuid()
        )));
    }
    Ok(())
}

pub fn real_uid() -> Uid {
    getuid()
}

pub fn set_euid(uid: Uid) -> Result<()> {
    nix::unistd::seteuid(uid)
        .map_err(|e| Error::Privilege(format!("seteuid({uid}) failed: {e}")))
}

pub fn set_egid(gid: Gid) -> Result<()> {
    nix::unistd::setegid(gid)
        .map_err(|e| Error::Privilege(format!("setegid({gid}) failed: {e}")))
}

fn capget(data: &mut [CapUserData; 2]) -> std::io::Result<()> {
    let mut header = CapUserHeader {
        version: LINUX_CAPABILITY_VERSION_3,
        pid: 0,
    };
    let ret = unsafe {
        libc::syscall(
            libc::SYS_capget,
            &mut header as *mut CapUserHeader,
            data.as_mut_ptr(),
        )
    };
    if ret < 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

fn capset(data: &[CapUserData; 2]) -> std::io::Result<()> {
    let mut header = CapUserHeader {
        version: LINUX_CAPABILITY_VERSION_3,
        pid: 0,
    };
    let ret = unsafe {
        libc::syscall(
            libc::SYS_capset,
            &mut header as *mut CapUserHeader,
            data.as_ptr(),
        )
    };
    if ret < 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

/// Scoped raise of capabilities in the effective set. The bits are cleared
/// again on drop, on every exit path including panics.
pub struct CapabilityGuard {
    caps: Vec<u32>,
}

impl CapabilityGuard {
    /// Raise each capability that is present in the permitted set. Missing
    /// permitted bits are skipped with a warning; resolution of some fd
    /// links may then fail with EACCES and those events are dropped.
    pub fn raise(caps: &[u32]) -> Result<Self> {
        let mut data = [CapUserData::default(); 2];
        capget(&mut data).map_err(|e| Error::Privilege(format!("capget failed: {e}")))?;
        for &cap in caps {
            let idx = (cap / 32) as usize;
            let bit = 1u32 << (cap % 32);
            if data[idx].permitted & bit != 0 {
                data[idx].effective |= bit;
            } else {
                tracing::warn!("capability {cap} not in the permitted set, cannot raise it");
            }
        }
        capset(&data).map_err(|e| Error::Privilege(format!("capset failed: {e}")))?;
        Ok(CapabilityGuard {
            caps: caps.to_vec(),
        })
    }
}

impl Drop for CapabilityGuard {
    fn drop(&mut self) {
        let mut data = [CapUserData::default(); 2];
        if capget(&mut data).is_err() {
            return;
        }
        for &cap in &self.caps {
            let idx = (cap / 32) as usize;
            data[idx].effective &= !(1u32 << (cap % 32));
        }
        if let Err(e) = capset(&data) {
            tracing::warn!("failed to clear raised capabilities: {e}");
        }
    }
}

/// Scoped scheduling-priority boost for the event loop; reduces fanotify
/// queue overflows. Restored on drop.
pub struct PriorityGuard {
    previous: libc::c_int,
}

impl PriorityGuard {
    pub fn raise(delta: libc::c_int) -> Option<Self> {
        let previous = unsafe { libc::getpriority(libc::PRIO_PROCESS, 0) };
        let ret = unsafe { libc::setpriority(libc::PRIO_PROCESS, 0, previous + delta) };
        if ret < 0 {
            tracing::debug!(
                "setpriority failed: {}",
                std::io::Error::last_os_error()
            );
            return None;
        }
        Some(PriorityGuard { previous })
    }
}

impl Drop for PriorityGuard {
    fn drop(&mut self) {
        unsafe {
            libc::setpriority(libc::PRIO_PROCESS, 0, self.previous);
        }
    }
}
