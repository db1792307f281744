//! Kernel file-access notifications: mark installation and the event reader.
//!
//! Marks request `FAN_OPEN | FAN_CLOSE_WRITE | FAN_CLOSE_NOWRITE` per mount.
//! Each event record carries an open descriptor to the accessed object; the
//! reader classifies by mask, resolves the descriptor back to a path in the
//! original mount view via the pinned root descriptor, stats it, and closes
//! it unconditionally. Unresolvable, deleted, and non-regular files are
//! dropped, as are records reported for the engine's own pid: the
//! classifier's fingerprinting and body capture re-open watched files, and
//! the store is written while marks are armed; both would echo back as
//! events of the observed command.

use ct_common::{Error, Result};
use std::ffi::{CString, OsString};
use std::fs::File;
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::ffi::{OsStrExt, OsStringExt};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

/// Classified kind of a raw event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawEventKind {
    Read,
    Write,
}

/// A raw kernel event after fd resolution, before dedup and filtering.
#[derive(Debug, Clone)]
pub struct RawFileEvent {
    pub kind: RawEventKind,
    /// Absolute path in the original mount view.
    pub path: PathBuf,
    pub size: u64,
    /// Modification time, epoch seconds.
    pub mtime: i64,
    /// Pid of the accessing process, as reported in the kernel record.
    pub pid: Option<i32>,
}

/// The fanotify notification group.
pub struct Fanotify {
    fd: OwnedFd,
}

impl Fanotify {
    /// Create the notification group. Requires CAP_SYS_ADMIN.
    pub fn init() -> Result<Self> {
        let fd = unsafe {
            libc::fanotify_init(
                libc::FAN_CLASS_NOTIF | libc::FAN_CLOEXEC | libc::FAN_NONBLOCK,
                (libc::O_RDONLY | libc::O_LARGEFILE | libc::O_CLOEXEC) as libc::c_uint,
            )
        };
        if fd < 0 {
            return Err(Error::Mark {
                path: PathBuf::from("/"),
                msg: format!("fanotify_init failed: {}", std::io::Error::last_os_error()),
            });
        }
        Ok(Fanotify {
            fd: unsafe { OwnedFd::from_raw_fd(fd) },
        })
    }

    /// Mark the mount containing `mount_point` for open/close notifications
    /// on all descendants.
    pub fn mark_mount(&self, mount_point: &Path) -> Result<()> {
        let c_path = CString::new(mount_point.as_os_str().as_bytes()).map_err(|_| Error::Mark {
            path: mount_point.to_path_buf(),
            msg: "path contains a NUL byte".into(),
        })?;
        let mask = libc::FAN_OPEN | libc::FAN_CLOSE_WRITE | libc::FAN_CLOSE_NOWRITE;
        let ret = unsafe {
            libc::fanotify_mark(
                self.fd.as_raw_fd(),
                libc::FAN_MARK_ADD | libc::FAN_MARK_MOUNT,
                mask,
                libc::AT_FDCWD,
                c_path.as_ptr(),
            )
        };
        if ret < 0 {
            return Err(Error::Mark {
                path: mount_point.to_path_buf(),
                msg: format!(
                    "fanotify_mark on mount failed: {}",
                    std::io::Error::last_os_error()
                ),
            });
        }
        tracing::debug!("marked mount {}", mount_point.display());
        Ok(())
    }

    pub fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

/// Drains the notification descriptor and resolves raw events.
pub struct EventReader {
    fan_fd: RawFd,
    /// Directory descriptor to `/` in the original namespace.
    root_fd: RawFd,
    /// The engine's own pid; records it reported are dropped.
    self_pid: i32,
}

impl EventReader {
    pub fn new(fan: &Fanotify, original_root: &OwnedFd) -> Self {
        EventReader {
            fan_fd: fan.as_raw_fd(),
            root_fd: original_root.as_raw_fd(),
            self_pid: std::process::id() as i32,
        }
    }

    /// Read all pending events, handing resolved records to `sink`.
    /// Individual resolution failures drop the event; only a broken
    /// notification channel is an error.
    pub fn drain(&self, mut sink: impl FnMut(RawFileEvent)) -> Result<()> {
        // u64 storage keeps the buffer aligned for the metadata records.
        let mut buf = [0u64; 512];
        loop {
            let n = unsafe {
                libc::read(
                    self.fan_fd,
                    buf.as_mut_ptr().cast::<libc::c_void>(),
                    mem::size_of_val(&buf),
                )
            };
            if n < 0 {
                let err = std::io::Error::last_os_error();
                match err.raw_os_error() {
                    Some(libc::EAGAIN) => return Ok(()),
                    Some(libc::EINTR) => continue,
                    _ => {
                        return Err(Error::Reader(format!(
                            "reading the notification channel failed: {err}"
                        )))
                    }
                }
            }
            if n == 0 {
                return Ok(());
            }
            self.parse_records(&buf, n as usize, &mut sink)?;
        }
    }

    fn parse_records(
        &self,
        buf: &[u64; 512],
        len: usize,
        sink: &mut impl FnMut(RawFileEvent),
    ) -> Result<()> {
        let bytes = buf.as_ptr().cast::<u8>();
        let meta_size = mem::size_of::<libc::fanotify_event_metadata>();
        let mut offset = 0usize;
        while offset + meta_size <= len {
            let meta = unsafe { &*bytes.add(offset).cast::<libc::fanotify_event_metadata>() };
            if meta.vers != libc::FANOTIFY_METADATA_VERSION {
                return Err(Error::Reader(format!(
                    "fanotify metadata version mismatch: kernel {} vs expected {}",
                    meta.vers,
                    libc::FANOTIFY_METADATA_VERSION
                )));
            }
            let event_len = meta.event_len as usize;
            if event_len < meta_size || offset + event_len > len {
                return Err(Error::Reader("truncated fanotify record".into()));
            }

            if meta.mask & libc::FAN_Q_OVERFLOW != 0 {
                tracing::warn!(
                    "fanotify queue overflow, some file events were lost"
                );
            } else if meta.fd >= 0 {
                let fd = unsafe { OwnedFd::from_raw_fd(meta.fd) };
                if let Some(event) = self.resolve(meta.mask, meta.pid, fd) {
                    if !self.is_own_event(&event) {
                        sink(event);
                    }
                }
            }
            offset += event_len;
        }
        Ok(())
    }

    /// Events reported for the engine's own pid are dropped: the classifier
    /// re-opens files for fingerprinting and body capture, and the store is
    /// written while marks are armed; both would echo back as events of the
    /// observed command.
    fn is_own_event(&self, event: &RawFileEvent) -> bool {
        event.pid == Some(self.self_pid)
    }

    /// Resolve one event descriptor. Consumes (and thereby closes) the fd.
    fn resolve(&self, mask: u64, pid: i32, fd: OwnedFd) -> Option<RawFileEvent> {
        let path = match self.readlink_fd(fd.as_raw_fd()) {
            Ok(p) => p,
            Err(e) => {
                // Stale descriptors resolve to ENOENT when the target is
                // already gone.
                tracing::debug!("could not resolve event fd: {e}");
                return None;
            }
        };
        if path.as_os_str().as_bytes().ends_with(b" (deleted)") {
            return None;
        }

        let file = File::from(fd);
        let meta = match file.metadata() {
            Ok(m) => m,
            Err(e) => {
                tracing::debug!("stat of {} failed: {e}", path.display());
                return None;
            }
        };
        if !meta.file_type().is_file() {
            return None;
        }

        let kind = if mask & libc::FAN_CLOSE_WRITE != 0 {
            RawEventKind::Write
        } else {
            RawEventKind::Read
        };
        Some(RawFileEvent {
            kind,
            path,
            size: meta.len(),
            mtime: meta.mtime(),
            pid: (pid > 0).then_some(pid),
        })
    }

    /// Read the magic link `/proc/self/fd/N` relative to the pinned root
    /// descriptor, which keeps resolution stable across the namespace
    /// detach.
    fn readlink_fd(&self, fd: RawFd) -> std::io::Result<PathBuf> {
        let rel = CString::new(format!("proc/self/fd/{fd}"))
            .map_err(|_| std::io::Error::from(std::io::ErrorKind::InvalidInput))?;
        let mut buf = vec![0u8; libc::PATH_MAX as usize];
        let n = unsafe {
            libc::readlinkat(
                self.root_fd,
                rel.as_ptr(),
                buf.as_mut_ptr().cast::<libc::c_char>(),
                buf.len(),
            )
        };
        if n < 0 {
            return Err(std::io::Error::last_os_error());
        }
        buf.truncate(n as usize);
        Ok(PathBuf::from(OsString::from_vec(buf)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_write_classifies_as_write() {
        assert_eq!(libc::FAN_CLOSE_WRITE & libc::FAN_CLOSE_NOWRITE, 0);
        let mask = libc::FAN_CLOSE_WRITE;
        let kind = if mask & libc::FAN_CLOSE_WRITE != 0 {
            RawEventKind::Write
        } else {
            RawEventKind::Read
        };
        assert_eq!(kind, RawEventKind::Write);
    }

    fn fan_less_reader(root: &OwnedFd) -> EventReader {
        EventReader {
            fan_fd: -1,
            root_fd: root.as_raw_fd(),
            self_pid: std::process::id() as i32,
        }
    }

    #[test]
    fn readlink_resolves_own_fds_against_root() {
        let root = crate::namespace::open_original_root().unwrap();
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let file = File::open(tmp.path()).unwrap();

        let reader = fan_less_reader(&root);
        let resolved = reader.readlink_fd(file.as_raw_fd()).unwrap();
        assert_eq!(resolved, tmp.path().canonicalize().unwrap());
    }

    #[test]
    fn own_events_are_recognized_by_pid() {
        let root = crate::namespace::open_original_root().unwrap();
        let reader = fan_less_reader(&root);

        let mut event = RawFileEvent {
            kind: RawEventKind::Read,
            path: PathBuf::from("/tmp/x"),
            size: 1,
            mtime: 0,
            pid: Some(std::process::id() as i32),
        };
        assert!(reader.is_own_event(&event));

        event.pid = Some(1);
        assert!(!reader.is_own_event(&event));
        event.pid = None;
        assert!(!reader.is_own_event(&event));
    }
}
