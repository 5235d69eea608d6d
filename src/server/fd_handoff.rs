//! Cross-process socket handoff over `SCM_RIGHTS`.
//!
//! Lets a new server process take over an already-accepted `TcpStream`
//! from an old one during a zero-downtime restart, without either process
//! needing to touch the listening socket. Ancillary-data socket transfer
//! over a `UNIX` domain socket pair, built directly on this crate's own
//! `libc` dependency rather than pulling in `nix` for it (see `DESIGN.md`).
//!
//! Unix-only: `SCM_RIGHTS` is a Unix domain socket ancillary-data
//! mechanism with no Windows equivalent.

use std::{
    io,
    mem::{size_of, zeroed},
    net::SocketAddr,
    os::unix::io::{AsRawFd, FromRawFd, RawFd},
};
use tokio::{
    io::Interest,
    net::{TcpStream, UnixStream},
};

/// Bitflags for the socket options worth carrying across a handoff. Only
/// the options this crate's `Server` actually sets need round-tripping;
/// anything else is renegotiated by the receiving process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SocketOptionFlags(u8);

impl SocketOptionFlags {
    pub const NODELAY: Self = Self(0b001);
    pub const KEEPALIVE: Self = Self(0b010);

    pub fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }
}

/// The application-layer record sent alongside the handed-off file
/// descriptor, describing enough about the connection for the receiving
/// process to reconstruct a usable [`TcpStream`] plus its bookkeeping
/// state without renegotiating anything at the kernel level.
#[derive(Debug, Clone, PartialEq)]
pub struct HandoffRecord {
    /// Identifies the sending server instance, for logging/diagnostics on
    /// the receiving side.
    pub server_instance_id: u64,
    /// A short tag identifying the payload shape, e.g. `"tcp4"`/`"tcp6"`.
    /// Lets a receiver reject a record from an incompatible sender version
    /// before trying to interpret the rest of it.
    pub type_signature: String,
    /// The sending process's PID, recorded for diagnostics.
    pub local_process_id: u64,
    pub socket_options: SocketOptionFlags,
    pub peer_addr: SocketAddr,
}

impl HandoffRecord {
    /// Serializes the record to a flat byte buffer: version byte, then
    /// each field length- or fixed-width-prefixed in declaration order.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(64);
        out.push(1u8); // version

        out.extend_from_slice(&self.server_instance_id.to_le_bytes());

        let sig = self.type_signature.as_bytes();
        out.push(sig.len() as u8);
        out.extend_from_slice(sig);

        out.extend_from_slice(&self.local_process_id.to_le_bytes());
        out.push(self.socket_options.0);

        match self.peer_addr {
            SocketAddr::V4(addr) => {
                out.push(4);
                out.extend_from_slice(&addr.ip().octets());
                out.extend_from_slice(&addr.port().to_le_bytes());
            }
            SocketAddr::V6(addr) => {
                out.push(6);
                out.extend_from_slice(&addr.ip().octets());
                out.extend_from_slice(&addr.port().to_le_bytes());
            }
        }

        out
    }

    /// Parses a buffer produced by [`Self::encode`]. Any malformed or
    /// truncated input is `None`: handoff is a best-effort mechanism, and a
    /// corrupt record means the accompanying fd should be closed and
    /// ignored rather than guessed at.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        let mut pos = 0usize;
        let take = |pos: &mut usize, n: usize| -> Option<&[u8]> {
            let slice = bytes.get(*pos..*pos + n)?;
            *pos += n;
            Some(slice)
        };

        if take(&mut pos, 1)?[0] != 1 {
            return None;
        }
        let server_instance_id = u64::from_le_bytes(take(&mut pos, 8)?.try_into().ok()?);

        let sig_len = take(&mut pos, 1)?[0] as usize;
        let type_signature = std::str::from_utf8(take(&mut pos, sig_len)?).ok()?.to_string();

        let local_process_id = u64::from_le_bytes(take(&mut pos, 8)?.try_into().ok()?);
        let socket_options = SocketOptionFlags(take(&mut pos, 1)?[0]);

        let family = take(&mut pos, 1)?[0];
        let peer_addr = match family {
            4 => {
                let ip = <[u8; 4]>::try_from(take(&mut pos, 4)?).ok()?;
                let port = u16::from_le_bytes(take(&mut pos, 2)?.try_into().ok()?);
                SocketAddr::from((ip, port))
            }
            6 => {
                let ip = <[u8; 16]>::try_from(take(&mut pos, 16)?).ok()?;
                let port = u16::from_le_bytes(take(&mut pos, 2)?.try_into().ok()?);
                SocketAddr::from((ip, port))
            }
            _ => return None,
        };

        Some(Self {
            server_instance_id,
            type_signature,
            local_process_id,
            socket_options,
            peer_addr,
        })
    }
}

const MAX_RECORD_SIZE: usize = 512;

/// Sends `socket`'s underlying file descriptor across `channel`, along with
/// `record` describing it, in a single `sendmsg` call carrying `SCM_RIGHTS`
/// ancillary data.
pub async fn send_socket(channel: &UnixStream, socket: &TcpStream, record: &HandoffRecord) -> io::Result<()> {
    let payload = record.encode();
    debug_assert!(payload.len() <= MAX_RECORD_SIZE);
    let fd = socket.as_raw_fd();

    loop {
        channel.writable().await?;
        match channel.try_io(Interest::WRITABLE, || unsafe { send_with_fd(channel.as_raw_fd(), &payload, fd) }) {
            Ok(_) => return Ok(()),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
            Err(e) => return Err(e),
        }
    }
}

/// Receives a file descriptor and its accompanying [`HandoffRecord`] from
/// `channel`, reconstructing the descriptor as a [`TcpStream`] registered
/// with this process's own tokio reactor.
pub async fn recv_socket(channel: &UnixStream) -> io::Result<(TcpStream, HandoffRecord)> {
    loop {
        channel.readable().await?;
        let result = channel.try_io(Interest::READABLE, || unsafe { recv_with_fd(channel.as_raw_fd()) });
        match result {
            Ok((payload, fd)) => {
                let record = HandoffRecord::decode(&payload)
                    .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "malformed handoff record"))?;
                let std_stream = unsafe { std::net::TcpStream::from_raw_fd(fd) };
                std_stream.set_nonblocking(true)?;
                let stream = TcpStream::from_std(std_stream)?;
                return Ok((stream, record));
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
            Err(e) => return Err(e),
        }
    }
}

/// # Safety
/// `raw_fd` must be a valid, open socket descriptor for the duration of the call.
unsafe fn send_with_fd(raw_fd: RawFd, payload: &[u8], fd_to_send: RawFd) -> io::Result<()> {
    let mut iov = libc::iovec {
        iov_base: payload.as_ptr() as *mut libc::c_void,
        iov_len: payload.len(),
    };

    let cmsg_space = libc::CMSG_SPACE(size_of::<RawFd>() as u32) as usize;
    let mut cmsg_buf = vec![0u8; cmsg_space];

    let mut msg: libc::msghdr = zeroed();
    msg.msg_iov = &mut iov;
    msg.msg_iovlen = 1;
    msg.msg_control = cmsg_buf.as_mut_ptr() as *mut libc::c_void;
    msg.msg_controllen = cmsg_space as _;

    let cmsg = libc::CMSG_FIRSTHDR(&msg);
    debug_assert!(!cmsg.is_null());
    (*cmsg).cmsg_level = libc::SOL_SOCKET;
    (*cmsg).cmsg_type = libc::SCM_RIGHTS;
    (*cmsg).cmsg_len = libc::CMSG_LEN(size_of::<RawFd>() as u32) as _;
    std::ptr::write(libc::CMSG_DATA(cmsg) as *mut RawFd, fd_to_send);

    let sent = libc::sendmsg(raw_fd, &msg, 0);
    if sent < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// # Safety
/// `raw_fd` must be a valid, open socket descriptor for the duration of the call.
unsafe fn recv_with_fd(raw_fd: RawFd) -> io::Result<(Vec<u8>, RawFd)> {
    let mut buf = vec![0u8; MAX_RECORD_SIZE];
    let mut iov = libc::iovec {
        iov_base: buf.as_mut_ptr() as *mut libc::c_void,
        iov_len: buf.len(),
    };

    let cmsg_space = libc::CMSG_SPACE(size_of::<RawFd>() as u32) as usize;
    let mut cmsg_buf = vec![0u8; cmsg_space];

    let mut msg: libc::msghdr = zeroed();
    msg.msg_iov = &mut iov;
    msg.msg_iovlen = 1;
    msg.msg_control = cmsg_buf.as_mut_ptr() as *mut libc::c_void;
    msg.msg_controllen = cmsg_space as _;

    let received = libc::recvmsg(raw_fd, &mut msg, 0);
    if received < 0 {
        return Err(io::Error::last_os_error());
    }
    if received == 0 {
        return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "handoff channel closed"));
    }
    buf.truncate(received as usize);

    let cmsg = libc::CMSG_FIRSTHDR(&msg);
    if cmsg.is_null() || (*cmsg).cmsg_level != libc::SOL_SOCKET || (*cmsg).cmsg_type != libc::SCM_RIGHTS {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "no fd in handoff message"));
    }
    let fd = std::ptr::read(libc::CMSG_DATA(cmsg) as *const RawFd);

    Ok((buf, fd))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_round_trips_through_encode_decode() {
        let record = HandoffRecord {
            server_instance_id: 42,
            type_signature: "tcp4".to_string(),
            local_process_id: 1234,
            socket_options: {
                let mut f = SocketOptionFlags::default();
                f.insert(SocketOptionFlags::NODELAY);
                f
            },
            peer_addr: "127.0.0.1:9000".parse().unwrap(),
        };
        let bytes = record.encode();
        assert_eq!(HandoffRecord::decode(&bytes), Some(record));
    }

    #[test]
    fn record_round_trips_ipv6() {
        let record = HandoffRecord {
            server_instance_id: 1,
            type_signature: "tcp6".to_string(),
            local_process_id: 1,
            socket_options: SocketOptionFlags::default(),
            peer_addr: "[::1]:9000".parse().unwrap(),
        };
        let bytes = record.encode();
        assert_eq!(HandoffRecord::decode(&bytes), Some(record));
    }

    #[test]
    fn decode_rejects_truncated_input() {
        assert_eq!(HandoffRecord::decode(&[1, 2, 3]), None);
    }

    #[test]
    fn decode_rejects_unknown_version() {
        let mut bytes = HandoffRecord {
            server_instance_id: 1,
            type_signature: "tcp4".to_string(),
            local_process_id: 1,
            socket_options: SocketOptionFlags::default(),
            peer_addr: "127.0.0.1:1".parse().unwrap(),
        }
        .encode();
        bytes[0] = 99;
        assert_eq!(HandoffRecord::decode(&bytes), None);
    }

    #[tokio::test]
    async fn socket_and_record_survive_a_handoff_over_a_unix_socketpair() {
        let (left, right) = UnixStream::pair().unwrap();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let connect = tokio::spawn(async move { TcpStream::connect(addr).await.unwrap() });
        let (accepted, peer_addr) = listener.accept().await.unwrap();
        let _client = connect.await.unwrap();

        let record = HandoffRecord {
            server_instance_id: 7,
            type_signature: "tcp4".to_string(),
            local_process_id: std::process::id() as u64,
            socket_options: SocketOptionFlags::default(),
            peer_addr,
        };

        let send = tokio::spawn(async move { send_socket(&left, &accepted, &record).await });
        let (received_stream, received_record) = recv_socket(&right).await.unwrap();
        send.await.unwrap().unwrap();

        assert_eq!(received_record.server_instance_id, 7);
        assert_eq!(received_record.peer_addr, peer_addr);
        assert!(received_stream.peer_addr().is_ok());
    }
}
