//! The OS sockets adapter (component A): one function per underlying system call used by the
//! core. This module performs no state-machine logic — it is a thin, direct translation from the
//! module's domain types ([`Domain`](crate::addr::Domain), [`Protocol`](crate::addr::Protocol),
//! [`SockAddr`]) to `nix` calls and back, exactly as the original's
//! `TcpIp_GetBsd*`/`TcpIp_SetBlockingState` helpers do for the C sockets API.
//!
//! OS descriptors are represented as [`OwnedFd`] rather than a bare `RawFd`/`c_int`: ownership of
//! the descriptor is the socket table's to manage (it is closed exactly once, on entry into
//! `UNUSED`), and `OwnedFd` makes "closed" a type-level fact (`None`) instead of a sentinel
//! integer the caller has to remember to check.

use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};

use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::sys::socket::sockopt::KeepAlive;
use nix::sys::socket::{self, AddressFamily, MsgFlags, SockFlag, SockType, SockaddrStorage};

use crate::addr::{Domain, OsSockAddr, Protocol, SockAddr};
use crate::error::TcpIpError;

fn bsd_family(domain: Domain) -> AddressFamily {
    match domain {
        Domain::Ipv4 => AddressFamily::Inet,
        Domain::Ipv6 => AddressFamily::Inet6,
    }
}

fn bsd_type(protocol: Protocol) -> SockType {
    match protocol {
        Protocol::Tcp => SockType::Stream,
        Protocol::Udp => SockType::Datagram,
    }
}

/// Creates a new, already-non-blocking OS descriptor for `(domain, protocol)`
/// (`TcpIp_SoAdGetSocket`'s `socket()` call plus the non-blocking setup every other operation
/// in the original has to redo ad hoc).
pub fn create(domain: Domain, protocol: Protocol) -> Result<OwnedFd, TcpIpError> {
    Ok(socket::socket(
        bsd_family(domain),
        bsd_type(protocol),
        SockFlag::SOCK_NONBLOCK,
        None,
    )?)
}

/// Switches `fd` between blocking and non-blocking mode (`TcpIp_SetBlockingState`). The transmit
/// path needs blocking mode for the duration of a single call; everything else in the state
/// machine runs non-blocking.
pub fn set_blocking(fd: &OwnedFd, blocking: bool) -> Result<(), TcpIpError> {
    let current = OFlag::from_bits_truncate(fcntl(fd.as_raw_fd(), FcntlArg::F_GETFL)?);
    let next = if blocking {
        current & !OFlag::O_NONBLOCK
    } else {
        current | OFlag::O_NONBLOCK
    };
    fcntl(fd.as_raw_fd(), FcntlArg::F_SETFL(next))?;
    Ok(())
}

fn storage_to_sockaddr(storage: &SockaddrStorage) -> Option<SockAddr> {
    if let Some(v4) = storage.as_sockaddr_in() {
        let std_addr: std::net::SocketAddrV4 = (*v4).into();
        return Some(SockAddr::V4 {
            addr: *std_addr.ip(),
            port: std_addr.port(),
        });
    }
    if let Some(v6) = storage.as_sockaddr_in6() {
        let std_addr: std::net::SocketAddrV6 = (*v6).into();
        return Some(SockAddr::V6 {
            addr: *std_addr.ip(),
            port: std_addr.port(),
        });
    }
    None
}

/// `bind(2)`.
pub fn bind(fd: &OwnedFd, local: &SockAddr) -> Result<(), TcpIpError> {
    match crate::addr::to_os(local)? {
        OsSockAddr::V4(a) => socket::bind(fd.as_raw_fd(), &a)?,
        OsSockAddr::V6(a) => socket::bind(fd.as_raw_fd(), &a)?,
    }
    Ok(())
}

/// `getsockname(2)`, translated back to the module's address record. Used to read back the
/// OS-assigned port after a `bind` with `PORT_ANY`.
pub fn getsockname(fd: &OwnedFd) -> Result<SockAddr, TcpIpError> {
    let storage: SockaddrStorage = socket::getsockname(fd.as_raw_fd())?;
    storage_to_sockaddr(&storage).ok_or(TcpIpError::InvalidArgument)
}

/// `getpeername(2)`, translated back to the module's address record.
pub fn getpeername(fd: &OwnedFd) -> Result<SockAddr, TcpIpError> {
    let storage: SockaddrStorage = socket::getpeername(fd.as_raw_fd())?;
    storage_to_sockaddr(&storage).ok_or(TcpIpError::InvalidArgument)
}

/// `listen(2)`.
pub fn listen(fd: &OwnedFd, backlog: u16) -> Result<(), TcpIpError> {
    socket::listen(fd.as_raw_fd(), backlog as usize)?;
    Ok(())
}

/// `connect(2)`. The raw `nix::Error` is returned (rather than converted to [`TcpIpError`])
/// because the caller needs to distinguish `EINPROGRESS` from every other failure, just as the
/// original inspects `errno` directly after the call.
pub fn connect(fd: &OwnedFd, remote: &SockAddr) -> Result<(), nix::Error> {
    match crate::addr::to_os(remote).map_err(|_| nix::Error::EINVAL)? {
        OsSockAddr::V4(a) => socket::connect(fd.as_raw_fd(), &a),
        OsSockAddr::V6(a) => socket::connect(fd.as_raw_fd(), &a),
    }
}

/// `accept(2)`. Does not set non-blocking mode on the returned descriptor; the caller (the
/// `LISTEN` tick handler) must do that before handing the descriptor to a new slot — skipping
/// this step is one of the source's latent defects.
pub fn accept(fd: &OwnedFd) -> Result<OwnedFd, TcpIpError> {
    let raw = socket::accept(fd.as_raw_fd())?;
    // SAFETY: `accept` returns a freshly-opened, uniquely-owned descriptor on success.
    Ok(unsafe { OwnedFd::from_raw_fd(raw) })
}

/// `send(2)`, for the TCP transmit path.
pub fn send(fd: &OwnedFd, buf: &[u8]) -> nix::Result<usize> {
    socket::send(fd.as_raw_fd(), buf, MsgFlags::empty())
}

/// `sendto(2)`, for the UDP transmit path.
pub fn sendto(fd: &OwnedFd, buf: &[u8], remote: &SockAddr) -> nix::Result<usize> {
    match crate::addr::to_os(remote).map_err(|_| nix::Error::EINVAL)? {
        OsSockAddr::V4(a) => socket::sendto(fd.as_raw_fd(), buf, &a, MsgFlags::empty()),
        OsSockAddr::V6(a) => socket::sendto(fd.as_raw_fd(), buf, &a, MsgFlags::empty()),
    }
}

/// `recvfrom(2)`. Returns the number of bytes read (`0` meaning TCP EOF) and the datagram's
/// source address when the OS reports one (UDP always does; a connected TCP socket typically
/// does not, in which case the receive step falls back to `getpeername`, matching the original).
pub fn recvfrom(fd: &OwnedFd, buf: &mut [u8]) -> nix::Result<(usize, Option<SockAddr>)> {
    let (n, from): (usize, Option<SockaddrStorage>) = socket::recvfrom(fd.as_raw_fd(), buf)?;
    Ok((n, from.as_ref().and_then(storage_to_sockaddr)))
}

/// `shutdown(fd, SHUT_WR)`, used by a graceful `close()` on a `CONNECTED` TCP socket.
pub fn shutdown_write(fd: &OwnedFd) -> Result<(), TcpIpError> {
    socket::shutdown(fd.as_raw_fd(), socket::Shutdown::Write)?;
    Ok(())
}

/// `setsockopt(SOL_SOCKET, SO_KEEPALIVE, ...)`, backing `change_parameter`'s `TCP_KEEPALIVE`.
pub fn set_keepalive(fd: &OwnedFd, enable: bool) -> Result<(), TcpIpError> {
    socket::setsockopt(fd.as_raw_fd(), KeepAlive, &enable)?;
    Ok(())
}

/// `EAGAIN`/`EWOULDBLOCK`: the non-blocking call had nothing to do right now.
pub fn is_would_block(e: &nix::Error) -> bool {
    matches!(e, nix::Error::EAGAIN | nix::Error::EWOULDBLOCK)
}

/// `EINTR`: the blocking transmit path retries the same chunk.
pub fn is_eintr(e: &nix::Error) -> bool {
    matches!(e, nix::Error::EINTR)
}

/// `EINPROGRESS`: expected outcome of a non-blocking `connect`.
pub fn is_in_progress(e: &nix::Error) -> bool {
    matches!(e, nix::Error::EINPROGRESS)
}

/// `EADDRINUSE`: reported as a development error by `bind`.
pub fn is_addr_in_use(e: &nix::Error) -> bool {
    matches!(e, nix::Error::EADDRINUSE)
}

/// `EMSGSIZE`: reported as a development error by `udp_transmit`.
pub fn is_msg_size(e: &nix::Error) -> bool {
    matches!(e, nix::Error::EMSGSIZE)
}
