//! The address translator (component B): a bidirectional mapping between the module's
//! domain-agnostic [`SockAddr`] and the OS's `sockaddr_in`/`sockaddr_in6` representations.
//!
//! The original C source aliases a `TcpIp_SockAddrInetType`/`TcpIp_SockAddrInet6Type` onto a
//! shared-prefix union and recovers the variant from a `domain` field at a fixed offset. We
//! replace that aliasing with an explicit tagged enum and an exhaustive match; there is no
//! `unsafe` anywhere in this module.

use std::net::{Ipv4Addr, Ipv6Addr};

use nix::sys::socket::{SockaddrIn, SockaddrIn6};

use crate::error::TcpIpError;

/// Wire values for [`Domain`], matching `TCPIP_AF_INET`/`TCPIP_AF_INET6` (`AF_INET`/`AF_INET6` on
/// Linux).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Domain {
    Ipv4 = 0x02,
    Ipv6 = 0x1c,
}

/// Wire values for [`Protocol`], matching `TCPIP_IPPROTO_TCP`/`TCPIP_IPPROTO_UDP`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Protocol {
    Tcp = 0x06,
    Udp = 0x11,
}

/// The module's domain-agnostic address record (`TcpIp_SockAddrType` and its IPv4/IPv6
/// specializations collapsed into one tagged sum). All public APIs speak this type; OS address
/// types never escape [`addr`](crate::addr) or [`os`](crate::os).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum SockAddr {
    V4 { addr: Ipv4Addr, port: u16 },
    V6 { addr: Ipv6Addr, port: u16 },
}

impl SockAddr {
    pub fn domain(&self) -> Domain {
        match self {
            Self::V4 { .. } => Domain::Ipv4,
            Self::V6 { .. } => Domain::Ipv6,
        }
    }

    pub fn port(&self) -> u16 {
        match self {
            Self::V4 { port, .. } => *port,
            Self::V6 { port, .. } => *port,
        }
    }
}

/// An OS-representation address, as produced by [`to_os`] and consumed by [`from_os`]. Keeping
/// this as an enum (rather than handing back a `nix::sys::socket::SockaddrStorage`) lets callers
/// match on exactly the two families this module supports, matching §4.B's "total over IPv4 and
/// IPv6" requirement.
#[derive(Copy, Clone, Debug)]
pub enum OsSockAddr {
    V4(SockaddrIn),
    V6(SockaddrIn6),
}

/// Converts a module-domain address into the OS representation. Fails with
/// [`TcpIpError::InvalidArgument`] only if `addr`'s domain tag is neither IPv4 nor IPv6, which is
/// unreachable through the enum today but kept as a named failure mode (matching the original's
/// `E_INV_ARG` contract for an unsupported domain) even though `SockAddr` is already closed over
/// the two supported domains.
pub fn to_os(addr: &SockAddr) -> Result<OsSockAddr, TcpIpError> {
    Ok(match addr {
        SockAddr::V4 { addr, port } => OsSockAddr::V4(SockaddrIn::from(std::net::SocketAddrV4::new(*addr, *port))),
        SockAddr::V6 { addr, port } => {
            OsSockAddr::V6(SockaddrIn6::from(std::net::SocketAddrV6::new(*addr, *port, 0, 0)))
        }
    })
}

/// Converts an OS-representation address back into the module's domain-agnostic record.
pub fn from_os(addr: &OsSockAddr) -> Result<SockAddr, TcpIpError> {
    Ok(match addr {
        OsSockAddr::V4(v4) => {
            let std_addr: std::net::SocketAddrV4 = (*v4).into();
            SockAddr::V4 {
                addr: *std_addr.ip(),
                port: std_addr.port(),
            }
        }
        OsSockAddr::V6(v6) => {
            let std_addr: std::net::SocketAddrV6 = (*v6).into();
            SockAddr::V6 {
                addr: *std_addr.ip(),
                port: std_addr.port(),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn v4_round_trips_through_os_representation() {
        let addr = SockAddr::V4 {
            addr: Ipv4Addr::new(127, 0, 0, 1),
            port: 8080,
        };
        let os = to_os(&addr).unwrap();
        assert_eq!(from_os(&os).unwrap(), addr);
    }

    #[test]
    fn v6_round_trips_through_os_representation() {
        let addr = SockAddr::V6 {
            addr: Ipv6Addr::LOCALHOST,
            port: 443,
        };
        let os = to_os(&addr).unwrap();
        assert_eq!(from_os(&os).unwrap(), addr);
    }

    #[test]
    fn domain_and_port_accessors() {
        let v4 = SockAddr::V4 {
            addr: Ipv4Addr::UNSPECIFIED,
            port: 53,
        };
        assert_eq!(v4.domain(), Domain::Ipv4);
        assert_eq!(v4.port(), 53);
    }
}
