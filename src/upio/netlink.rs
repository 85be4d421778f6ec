//! Kernel notification socket carrying line-state changes from the driver.

use std::io::{self, Read, Write};
use std::os::unix::io::AsRawFd;
use std::time::Duration;

use log::{debug, trace, warn};
use socket2::{Domain, Protocol, Socket, Type};

use super::{LineSignal, SignalSource};
use crate::hci::{VendorError, VendorResult};

/// Payload asking the driver to start sending notifications.
const HANDSHAKE: &[u8] = b"1";

/// Size of a netlink message header.
const NLMSG_HDRLEN: usize = std::mem::size_of::<NlMsgHdr>();

const NLMSG_MAX_PAYLOAD: usize = 1024;

#[repr(C)]
struct SockaddrNl {
    nl_family: libc::sa_family_t,
    nl_pad: libc::c_ushort,
    nl_pid: u32,
    nl_groups: u32,
}

#[repr(C)]
struct NlMsgHdr {
    nlmsg_len: u32,
    nlmsg_type: u16,
    nlmsg_flags: u16,
    nlmsg_seq: u32,
    nlmsg_pid: u32,
}

fn nlmsg_align(len: usize) -> usize {
    (len + 3) & !3
}

/// Frame `payload` as a netlink message from `pid`.
fn encode_message(pid: u32, payload: &[u8]) -> Vec<u8> {
    let len = nlmsg_align(NLMSG_HDRLEN + payload.len());
    let mut msg = Vec::with_capacity(len);
    msg.extend_from_slice(&(len as u32).to_ne_bytes());
    msg.extend_from_slice(&0u16.to_ne_bytes());
    msg.extend_from_slice(&0u16.to_ne_bytes());
    msg.extend_from_slice(&0u32.to_ne_bytes());
    msg.extend_from_slice(&pid.to_ne_bytes());
    msg.extend_from_slice(payload);
    msg.resize(len, 0);
    msg
}

/// Signal carried in the first payload word of a received message.
fn decode_message(msg: &[u8]) -> Option<LineSignal> {
    let word = msg.get(NLMSG_HDRLEN..NLMSG_HDRLEN + 4)?;
    let value = u32::from_ne_bytes([word[0], word[1], word[2], word[3]]);
    LineSignal::from_raw(value)
}

/// `NETLINK_USERSOCK` socket bound to this process.
pub struct NetlinkSocket {
    socket: Socket,
    pid: u32,
}

impl NetlinkSocket {
    pub fn open() -> VendorResult<Self> {
        let socket = Socket::new(
            Domain::from(libc::AF_NETLINK),
            Type::RAW,
            Some(Protocol::from(libc::NETLINK_USERSOCK)),
        )
        .map_err(|e| VendorError::ChannelError {
            reason: format!("netlink socket: {}", e),
        })?;

        let pid = std::process::id();
        bind_netlink(&socket, pid).map_err(|e| VendorError::ChannelError {
            reason: format!("netlink bind: {}", e),
        })?;

        debug!("netlink: bound as pid {}", pid);
        Ok(Self { socket, pid })
    }

    /// Send the one-byte handshake to the kernel side.
    pub fn send_init(&self) -> VendorResult<()> {
        let msg = encode_message(self.pid, HANDSHAKE);
        (&self.socket).write_all(&msg).map_err(|e| {
            warn!("netlink: handshake failed: {}", e);
            VendorError::ChannelError {
                reason: format!("netlink send: {}", e),
            }
        })
    }
}

impl SignalSource for NetlinkSocket {
    fn next_signal(&mut self, timeout: Duration) -> io::Result<Option<LineSignal>> {
        self.socket.set_read_timeout(Some(timeout))?;
        let mut buf = [0u8; NLMSG_HDRLEN + NLMSG_MAX_PAYLOAD];
        match (&self.socket).read(&mut buf) {
            Ok(0) => Err(io::ErrorKind::UnexpectedEof.into()),
            Ok(n) => {
                let signal = decode_message(&buf[..n]);
                if signal.is_none() {
                    trace!("netlink: ignoring {} byte message", n);
                }
                Ok(signal)
            }
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

/// Bind to a unicast netlink address (socket2 has no `sockaddr_nl`).
fn bind_netlink(socket: &Socket, pid: u32) -> io::Result<()> {
    let addr = SockaddrNl {
        nl_family: libc::AF_NETLINK as libc::sa_family_t,
        nl_pad: 0,
        nl_pid: pid,
        nl_groups: 0,
    };
    // SAFETY: bind() with a valid fd and a properly sized sockaddr_nl
    let ret = unsafe {
        libc::bind(
            socket.as_raw_fd(),
            &addr as *const SockaddrNl as *const libc::sockaddr,
            std::mem::size_of::<SockaddrNl>() as libc::socklen_t,
        )
    };
    if ret < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}
