//! Shell control protocol: framed messages over a unix stream socket.
//!
//! Wire format per frame: `[len: u32 le][msg_id: i32 le][payload]` where
//! `len` counts the id plus the payload. At most one file descriptor rides
//! along per frame via `SCM_RIGHTS` (only `SETUP_DONE` uses this, to hand
//! the shell integration the original-root descriptor). A zero-byte read
//! means the peer closed the socket, which terminates the event loop.

use ct_common::{Error, Result};
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

/// Receive buffer size; frames close to this size are suspicious.
pub const RECEIVE_BUF_SIZE: usize = 100 * 1024;

const OVERSIZE_WARN_MARGIN: usize = 10 * 1024;

const HEADER_SIZE: usize = 8;

/// Message ids of the shell control protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum MsgId {
    /// engine -> shell: marks are armed; payload is the rendezvous pid,
    /// the frame fd is the original-root directory.
    SetupDone = 0,
    /// shell -> engine: command text.
    Command = 1,
    /// shell -> engine: i32 little-endian exit status.
    ReturnValue = 2,
    /// shell -> engine: utf-8 line for the shell-integration log.
    LogMessage = 3,
    /// shell -> engine: drop cached events, restart the command clock.
    ClearEvents = 4,
}

impl MsgId {
    pub fn from_i32(v: i32) -> Option<Self> {
        match v {
            0 => Some(MsgId::SetupDone),
            1 => Some(MsgId::Command),
            2 => Some(MsgId::ReturnValue),
            3 => Some(MsgId::LogMessage),
            4 => Some(MsgId::ClearEvents),
            _ => None,
        }
    }
}

/// One protocol frame.
#[derive(Debug)]
pub struct Frame {
    pub msg_id: i32,
    pub bytes: Vec<u8>,
    pub fd: Option<OwnedFd>,
}

impl Frame {
    pub fn new(id: MsgId, bytes: Vec<u8>) -> Self {
        Frame {
            msg_id: id as i32,
            bytes,
            fd: None,
        }
    }

    pub fn with_fd(id: MsgId, bytes: Vec<u8>, fd: OwnedFd) -> Self {
        Frame {
            msg_id: id as i32,
            bytes,
            fd: Some(fd),
        }
    }
}

/// Result of one receive pass.
#[derive(Debug)]
pub enum Received {
    Frames(Vec<Frame>),
    /// Peer closed the socket.
    Closed,
}

/// Create an `AF_UNIX SOCK_STREAM` socketpair, close-on-exec.
pub fn socketpair() -> Result<(OwnedFd, OwnedFd)> {
    let mut fds = [0i32; 2];
    let ret = unsafe {
        libc::socketpair(
            libc::AF_UNIX,
            libc::SOCK_STREAM | libc::SOCK_CLOEXEC,
            0,
            fds.as_mut_ptr(),
        )
    };
    if ret < 0 {
        return Err(Error::Protocol(format!(
            "socketpair failed: {}",
            std::io::Error::last_os_error()
        )));
    }
    Ok(unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) })
}

/// One endpoint of the control socket. Owns its descriptor and buffers
/// partial frames across reads.
pub struct SocketChannel {
    fd: OwnedFd,
    pending: Vec<u8>,
}

impl SocketChannel {
    pub fn from_owned(fd: OwnedFd) -> Self {
        SocketChannel {
            fd,
            pending: Vec::new(),
        }
    }

    /// Take ownership of an inherited descriptor (`--socket-fd`).
    ///
    /// # Safety
    /// `fd` must be an open unix stream socket not owned elsewhere.
    pub unsafe fn from_raw_fd(fd: RawFd) -> Self {
        SocketChannel {
            fd: OwnedFd::from_raw_fd(fd),
            pending: Vec::new(),
        }
    }

    pub fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }

    /// Send one frame, with its fd as ancillary data when present.
    pub fn send(&self, frame: &Frame) -> Result<()> {
        let len = (4 + frame.bytes.len()) as u32;
        let mut wire = Vec::with_capacity(HEADER_SIZE + frame.bytes.len());
        wire.extend_from_slice(&len.to_le_bytes());
        wire.extend_from_slice(&frame.msg_id.to_le_bytes());
        wire.extend_from_slice(&frame.bytes);

        let sent = self.sendmsg(&wire, frame.fd.as_ref().map(|f| f.as_raw_fd()))?;
        // Stream sockets may split large frames; push the rest without the
        // (already delivered) ancillary data.
        let mut offset = sent;
        while offset < wire.len() {
            offset += self.sendmsg(&wire[offset..], None)?;
        }
        Ok(())
    }

    fn sendmsg(&self, bytes: &[u8], fd: Option<RawFd>) -> Result<usize> {
        let iov = libc::iovec {
            iov_base: bytes.as_ptr() as *mut libc::c_void,
            iov_len: bytes.len(),
        };
        let mut msg: libc::msghdr = unsafe { mem::zeroed() };
        msg.msg_iov = &iov as *const _ as *mut _;
        msg.msg_iovlen = 1;

        let cmsg_space = unsafe { libc::CMSG_SPACE(mem::size_of::<RawFd>() as u32) } as usize;
        let mut cmsg_buf = vec![0u8; cmsg_space];
        if let Some(fd) = fd {
            msg.msg_control = cmsg_buf.as_mut_ptr().cast();
            msg.msg_controllen = cmsg_space;
            let cmsg = unsafe { libc::CMSG_FIRSTHDR(&msg) };
            if cmsg.is_null() {
                return Err(Error::Protocol("CMSG_FIRSTHDR returned null".into()));
            }
            unsafe {
                (*cmsg).cmsg_level = libc::SOL_SOCKET;
                (*cmsg).cmsg_type = libc::SCM_RIGHTS;
                (*cmsg).cmsg_len = libc::CMSG_LEN(mem::size_of::<RawFd>() as u32) as usize;
                std::ptr::copy_nonoverlapping(
                    (&fd as *const RawFd).cast::<u8>(),
                    libc::CMSG_DATA(cmsg),
                    mem::size_of::<RawFd>(),
                );
            }
        }

        let ret = unsafe { libc::sendmsg(self.fd.as_raw_fd(), &msg, libc::MSG_NOSIGNAL) };
        if ret < 0 {
            return Err(Error::Protocol(format!(
                "sendmsg failed: {}",
                std::io::Error::last_os_error()
            )));
        }
        Ok(ret as usize)
    }

    /// Read whatever the peer sent and parse complete frames. An ancillary
    /// fd attaches to the first frame completed by this read.
    pub fn receive(&mut self) -> Result<Received> {
        let mut buf = vec![0u8; RECEIVE_BUF_SIZE];
        let iov = libc::iovec {
            iov_base: buf.as_mut_ptr().cast(),
            iov_len: buf.len(),
        };
        let cmsg_space = unsafe { libc::CMSG_SPACE(mem::size_of::<RawFd>() as u32) } as usize;
        let mut cmsg_buf = vec![0u8; cmsg_space];
        let mut msg: libc::msghdr = unsafe { mem::zeroed() };
        msg.msg_iov = &iov as *const _ as *mut _;
        msg.msg_iovlen = 1;
        msg.msg_control = cmsg_buf.as_mut_ptr().cast();
        msg.msg_controllen = cmsg_space;

        let ret = unsafe { libc::recvmsg(self.fd.as_raw_fd(), &mut msg, libc::MSG_CMSG_CLOEXEC) };
        if ret < 0 {
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EINTR) {
                return Ok(Received::Frames(Vec::new()));
            }
            return Err(Error::Protocol(format!("recvmsg failed: {err}")));
        }
        if ret == 0 {
            return Ok(Received::Closed);
        }
        self.pending.extend_from_slice(&buf[..ret as usize]);

        let mut received_fd = unsafe { take_cmsg_fd(&msg) };
        let mut frames = Vec::new();
        while let Some(mut frame) = self.pop_frame()? {
            if frame.fd.is_none() {
                frame.fd = received_fd.take();
            }
            frames.push(frame);
        }
        Ok(Received::Frames(frames))
    }

    fn pop_frame(&mut self) -> Result<Option<Frame>> {
        if self.pending.len() < HEADER_SIZE {
            return Ok(None);
        }
        let len = u32::from_le_bytes([
            self.pending[0],
            self.pending[1],
            self.pending[2],
            self.pending[3],
        ]) as usize;
        if len < 4 {
            return Err(Error::Protocol(format!("invalid frame length {len}")));
        }
        if len > RECEIVE_BUF_SIZE - OVERSIZE_WARN_MARGIN {
            tracing::warn!("unusually large control message received ({len} bytes)");
        }
        let total = 4 + len;
        if self.pending.len() < total {
            return Ok(None);
        }
        let msg_id = i32::from_le_bytes([
            self.pending[4],
            self.pending[5],
            self.pending[6],
            self.pending[7],
        ]);
        let bytes = self.pending[HEADER_SIZE..total].to_vec();
        self.pending.drain(..total);
        Ok(Some(Frame {
            msg_id,
            bytes,
            fd: None,
        }))
    }
}

/// Extract a passed descriptor from the control message, if any.
unsafe fn take_cmsg_fd(msg: &libc::msghdr) -> Option<OwnedFd> {
    let cmsg = libc::CMSG_FIRSTHDR(msg);
    if cmsg.is_null() {
        return None;
    }
    if (*cmsg).cmsg_level != libc::SOL_SOCKET || (*cmsg).cmsg_type != libc::SCM_RIGHTS {
        return None;
    }
    let mut fd: RawFd = -1;
    std::ptr::copy_nonoverlapping(
        libc::CMSG_DATA(cmsg),
        (&mut fd as *mut RawFd).cast::<u8>(),
        mem::size_of::<RawFd>(),
    );
    if fd < 0 {
        return None;
    }
    Some(OwnedFd::from_raw_fd(fd))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Seek, SeekFrom, Write};

    fn pair() -> (SocketChannel, SocketChannel) {
        let (a, b) = socketpair().unwrap();
        (SocketChannel::from_owned(a), SocketChannel::from_owned(b))
    }

    #[test]
    fn frame_round_trip() {
        let (tx, mut rx) = pair();
        tx.send(&Frame::new(MsgId::Command, b"ls -la".to_vec()))
            .unwrap();

        match rx.receive().unwrap() {
            Received::Frames(frames) => {
                assert_eq!(frames.len(), 1);
                assert_eq!(frames[0].msg_id, MsgId::Command as i32);
                assert_eq!(frames[0].bytes, b"ls -la");
            }
            Received::Closed => panic!("unexpected close"),
        }
    }

    #[test]
    fn multiple_frames_in_one_read() {
        let (tx, mut rx) = pair();
        tx.send(&Frame::new(MsgId::Command, b"make".to_vec()))
            .unwrap();
        tx.send(&Frame::new(
            MsgId::ReturnValue,
            2i32.to_le_bytes().to_vec(),
        ))
        .unwrap();

        match rx.receive().unwrap() {
            Received::Frames(frames) => {
                assert_eq!(frames.len(), 2);
                assert_eq!(frames[0].msg_id, MsgId::Command as i32);
                assert_eq!(frames[1].msg_id, MsgId::ReturnValue as i32);
                assert_eq!(
                    i32::from_le_bytes(frames[1].bytes[..4].try_into().unwrap()),
                    2
                );
            }
            Received::Closed => panic!("unexpected close"),
        }
    }

    #[test]
    fn peer_close_is_reported() {
        let (tx, mut rx) = pair();
        drop(tx);
        match rx.receive().unwrap() {
            Received::Closed => {}
            Received::Frames(_) => panic!("expected close"),
        }
    }

    #[test]
    fn empty_payload_frame() {
        let (tx, mut rx) = pair();
        tx.send(&Frame::new(MsgId::ClearEvents, Vec::new())).unwrap();
        match rx.receive().unwrap() {
            Received::Frames(frames) => {
                assert_eq!(frames.len(), 1);
                assert_eq!(frames[0].msg_id, MsgId::ClearEvents as i32);
                assert!(frames[0].bytes.is_empty());
            }
            Received::Closed => panic!("unexpected close"),
        }
    }

    #[test]
    fn setup_done_passes_a_descriptor() {
        let (tx, mut rx) = pair();

        let mut tmp = tempfile::tempfile().unwrap();
        tmp.write_all(b"through the socket").unwrap();
        tmp.flush().unwrap();

        let pid_bytes = 4321i32.to_le_bytes().to_vec();
        tx.send(&Frame::with_fd(
            MsgId::SetupDone,
            pid_bytes,
            OwnedFd::from(tmp),
        ))
        .unwrap();

        match rx.receive().unwrap() {
            Received::Frames(mut frames) => {
                assert_eq!(frames.len(), 1);
                let frame = frames.pop().unwrap();
                assert_eq!(frame.msg_id, MsgId::SetupDone as i32);
                assert_eq!(
                    i32::from_le_bytes(frame.bytes[..4].try_into().unwrap()),
                    4321
                );
                let mut file = std::fs::File::from(frame.fd.expect("fd passed"));
                file.seek(SeekFrom::Start(0)).unwrap();
                let mut content = String::new();
                file.read_to_string(&mut content).unwrap();
                assert_eq!(content, "through the socket");
            }
            Received::Closed => panic!("unexpected close"),
        }
    }

    #[test]
    fn unknown_msg_id_is_preserved_for_the_caller() {
        let (tx, mut rx) = pair();
        tx.send(&Frame {
            msg_id: 99,
            bytes: Vec::new(),
            fd: None,
        })
        .unwrap();
        match rx.receive().unwrap() {
            Received::Frames(frames) => {
                assert_eq!(frames[0].msg_id, 99);
                assert!(MsgId::from_i32(frames[0].msg_id).is_none());
            }
            Received::Closed => panic!("unexpected close"),
        }
    }
}
