//! Engine orchestration: setup phases, the poll loop, and the terminal
//! flush.
//!
//! Setup runs with effective root (namespace detach, mark installation),
//! then drops to the caller's real uid for the event drain. The loop polls
//! exactly two descriptors, the control socket and the notification
//! channel, and always drains notifications before inspecting the socket:
//! the peer closes the socket to end the observation, and the final writes
//! must already be harvested at that point.

use crate::events::FileEventCache;
use crate::fanotify::{EventReader, Fanotify};
use crate::namespace;
use crate::privilege::{self, CapabilityGuard, PriorityGuard, CAP_SYS_NICE, CAP_SYS_PTRACE};
use crate::protocol::{Frame, MsgId, Received, SocketChannel};
use crate::shell_log::ShellIntegrationLog;
use crate::subprocess::Subprocess;
use crate::{mounts, protocol};
use chrono::Utc;
use ct_common::{CommandInfo, Error, Result, SessionUuid, Settings};
use ct_store::stored_files::STORED_FILES_DIR;
use ct_store::{Recorder, StoredFiles};
use std::collections::BTreeSet;
use std::ffi::OsString;
use std::os::fd::{OwnedFd, RawFd};
use std::path::PathBuf;

pub struct WatchOpts {
    /// Inherited control socket (shell observation mode).
    pub socket_fd: Option<RawFd>,
    /// Program to observe (single-command mode).
    pub command: Vec<OsString>,
    pub session_uuid: Option<SessionUuid>,
    /// Override of the default data directory.
    pub data_dir: Option<PathBuf>,
}

/// Observe one command or one shell session. Returns the process exit code:
/// the observed program's code (128 + signal on abnormal termination) in
/// command mode, 0 in socket mode.
pub fn run(opts: WatchOpts, settings: Settings) -> Result<i32> {
    privilege::assert_effective_root()?;
    let real_uid = privilege::real_uid();
    let msenter_gid = namespace::msenter_gid(&settings.msenter_group)?;

    // The root descriptor must pin the original view before the detach.
    let root_fd = namespace::open_original_root()?;
    namespace::unshare_mount_namespace()?;

    let fan = Fanotify::init()?;
    mark_watch_roots(&fan, &settings)?;

    // Event processing runs with the caller's uid: root is often remapped
    // on network filesystems and readlink would fail there.
    privilege::set_euid(real_uid)?;

    let data_dir = match &opts.data_dir {
        Some(dir) => dir.clone(),
        None => ct_common::config::data_dir()?,
    };
    let mut cache = FileEventCache::new(
        settings.clone(),
        StoredFiles::new(data_dir.join(STORED_FILES_DIR)),
    );
    let mut recorder = Recorder::new(Some(data_dir.clone()));

    let mut cmd = CommandInfo::from_local_env();
    cmd.session_uuid = opts.session_uuid;

    let ret: i32;
    let loop_result: Result<()>;

    if !opts.command.is_empty() {
        cmd.text = join_command_text(&opts.command);

        let (sock_engine, sock_waiter) = protocol::socketpair()?;
        let mut channel = SocketChannel::from_owned(sock_engine);

        let mut proc = Subprocess::new();
        proc.set_as_real_user(true);
        cmd.start_time = Utc::now();
        let child = proc.spawn(&opts.command)?;

        // Helper thread: await the child, then close its socket end, which
        // ends the poll loop. No other state crosses the boundary.
        let waiter = std::thread::spawn(move || {
            let status = child.wait();
            drop(sock_waiter);
            status
        });

        loop_result = poll_loop(
            &mut channel,
            &fan,
            &root_fd,
            &mut cache,
            &mut cmd,
            &mut recorder,
            None,
        );

        let status = waiter
            .join()
            .map_err(|_| Error::Reader("child waiter thread panicked".into()))??;
        cmd.return_val = status.as_shell_code();
        ret = cmd.return_val;
    } else if let Some(fd) = opts.socket_fd {
        let mut channel = unsafe { SocketChannel::from_raw_fd(fd) };

        // The rendezvous child keeps our namespace joinable; the socket is
        // closed in the child since it tracks the shell, not the child.
        let rendezvous =
            namespace::spawn_rendezvous_child(msenter_gid, real_uid, Some(channel.as_raw_fd()))?;

        cmd.start_time = Utc::now();
        let mut shell_log = ShellIntegrationLog::open(&data_dir);

        let pid_bytes = rendezvous.pid().as_raw().to_le_bytes().to_vec();
        let root_for_shell: OwnedFd = root_fd.try_clone().map_err(|e| Error::Io {
            path: PathBuf::from("/"),
            source: e,
        })?;
        channel.send(&Frame::with_fd(MsgId::SetupDone, pid_bytes, root_for_shell))?;

        loop_result = poll_loop(
            &mut channel,
            &fan,
            &root_fd,
            &mut cache,
            &mut cmd,
            &mut recorder,
            Some(&mut shell_log),
        );
        ret = 0;
        drop(rendezvous);
    } else {
        return Err(Error::Config(
            "either --socket-fd or a command to observe is required".into(),
        ));
    }

    cmd.end_time = Some(Utc::now());

    if let Err(e) = loop_result {
        // A fatal reader error skips the final persistence; events may be
        // incomplete and must not masquerade as a full record.
        tracing::error!("processing of file events was stopped: {e}");
        if opts.socket_fd.is_some() {
            return Err(e);
        }
        return Ok(ret);
    }

    if cmd.text.is_empty() && cmd.id.is_none() {
        // Typically the observed shell session itself exiting: only stray
        // events like .bash_history writes, no command. Discard.
        tracing::debug!("command text is empty, not pushing to the store");
        return Ok(ret);
    }
    if !cmd.has_return_val() {
        tracing::debug!("return value of the command is unknown");
    }

    let (writes, reads) = cache.take();
    recorder.flush(&mut cmd, writes, reads);
    Ok(ret)
}

/// Resolve every watch root to its mount point and mark each mount once.
fn mark_watch_roots(fan: &Fanotify, settings: &Settings) -> Result<()> {
    let roots = settings.watch_roots();
    if roots.is_empty() {
        return Err(Error::Config(
            "no watch paths configured; add include paths to config.json".into(),
        ));
    }
    let mounts_list = mounts::mount_points()?;
    let mut marked: BTreeSet<PathBuf> = BTreeSet::new();
    for root in roots {
        match mounts::mount_point_of(&root, &mounts_list) {
            Some(mount) => {
                if marked.insert(mount.clone()) {
                    fan.mark_mount(mount)?;
                }
            }
            None => {
                tracing::warn!("no mount point found for watch root {}", root.display());
            }
        }
    }
    Ok(())
}

/// The multiplexer: poll {socket, notification channel} until the peer
/// disconnects. Returns Ok on a regular stop, Err on a fatal reader error.
#[allow(clippy::too_many_arguments)]
fn poll_loop(
    channel: &mut SocketChannel,
    fan: &Fanotify,
    root_fd: &OwnedFd,
    cache: &mut FileEventCache,
    cmd: &mut CommandInfo,
    recorder: &mut Recorder,
    mut shell_log: Option<&mut ShellIntegrationLog>,
) -> Result<()> {
    // CAP_SYS_PTRACE: readlink of received descriptors can fail with EACCES
    // on older kernels without it. CAP_SYS_NICE covers the priority boost.
    let caps = CapabilityGuard::raise(&[CAP_SYS_PTRACE, CAP_SYS_NICE]);
    if let Err(e) = &caps {
        tracing::warn!("could not raise event-processing capabilities: {e}");
    }
    let _prio = PriorityGuard::raise(-2);

    let reader = EventReader::new(fan, root_fd);

    loop {
        let mut fds = [
            libc::pollfd {
                fd: channel.as_raw_fd(),
                events: libc::POLLIN,
                revents: 0,
            },
            libc::pollfd {
                fd: fan.as_raw_fd(),
                events: libc::POLLIN,
                revents: 0,
            },
        ];
        let ret = unsafe { libc::poll(fds.as_mut_ptr(), 2, -1) };
        if ret < 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::Interrupted {
                continue;
            }
            return Err(Error::Reader(format!("poll failed: {err}")));
        }

        // Notifications first; on shutdown the socket closes after the
        // observed process finished and its last events must not be lost.
        if fds[1].revents & libc::POLLIN != 0 {
            reader.drain(|event| cache.accept(event))?;
        }

        if fds[0].revents & (libc::POLLIN | libc::POLLHUP | libc::POLLERR) != 0 {
            match channel.receive() {
                Ok(Received::Closed) => {
                    // One final drain; events observed before the closure
                    // are always processed.
                    reader.drain(|event| cache.accept(event))?;
                    return Ok(());
                }
                Ok(Received::Frames(frames)) => {
                    for frame in frames {
                        handle_frame(frame, cache, cmd, &mut shell_log);
                    }
                }
                Err(e) => {
                    tracing::warn!("control socket receive failed: {e}");
                }
            }
        }

        if cache.should_flush() {
            tracing::info!("flush threshold reached, flushing events to the store");
            let (writes, reads) = cache.take();
            recorder.flush(cmd, writes, reads);
        }
    }
}

fn handle_frame(
    frame: Frame,
    cache: &mut FileEventCache,
    cmd: &mut CommandInfo,
    shell_log: &mut Option<&mut ShellIntegrationLog>,
) {
    match MsgId::from_i32(frame.msg_id) {
        Some(MsgId::Command) => {
            cmd.text = String::from_utf8_lossy(&frame.bytes).into_owned();
        }
        Some(MsgId::ReturnValue) => match <[u8; 4]>::try_from(frame.bytes.as_slice()) {
            Ok(raw) => cmd.return_val = i32::from_le_bytes(raw),
            Err(_) => tracing::warn!(
                "return-value message with {} bytes instead of 4",
                frame.bytes.len()
            ),
        },
        Some(MsgId::LogMessage) => {
            if let Some(log) = shell_log {
                log.append_line(&frame.bytes);
            }
        }
        Some(MsgId::ClearEvents) => {
            cache.clear();
            cmd.start_time = Utc::now();
        }
        Some(MsgId::SetupDone) => {
            tracing::warn!("unexpected SETUP_DONE from the shell integration");
        }
        None => {
            tracing::warn!("unknown control message id {} ignored", frame.msg_id);
        }
    }
}

fn join_command_text(argv: &[OsString]) -> String {
    argv.iter()
        .map(|a| a.to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}
