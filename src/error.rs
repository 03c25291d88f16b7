//! The error taxonomy (component J) and the development-error sink (§6, §7).
//!
//! The original source returns `Std_ReturnType` (`E_OK`/`E_NOT_OK`) from every API and separately
//! pokes a numeric code into a DET sink as a side effect. We keep both halves of that contract:
//! [`TcpIpError`] is the Rust-idiomatic `Result` error type callers actually match on, and
//! [`TcpIpError::autosar_code`] recovers the original `TCPIP_E_*` numeric identifier for a caller
//! that wants to bridge back to the AUTOSAR convention. Like the teacher crate's own error enums
//! (`CloseError`, `ConnectError`, ...), these are small closed enums, not `thiserror`-derived
//! types; the module has no error this crate would let users construct from a formatted string.

use std::fmt;

/// AUTOSAR service identifiers (`TCPIP_API_*`), needed to report a development error for the
/// right API.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ApiId {
    Bind,
    TcpConnect,
    TcpListen,
    TcpTransmit,
    UdpTransmit,
    RequestComMode,
    ChangeParameter,
    GetSocket,
    Close,
}

/// Errors returned synchronously to a caller. Asynchronous failures never surface here; they
/// arrive exclusively through [`crate::callback::SocketAdapter::tcp_ip_event`] (§7).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TcpIpError {
    /// No free slot in the socket table (`TcpIp_GetFreeSocket` returning `E_NOT_OK`).
    NoFreeSocket,
    /// Unknown socket id, or a slot that is not in the state required for the call.
    InvalidSocketId,
    /// The domain tag on an address record, or a domain/protocol pair, is unsupported.
    InvalidArgument,
    /// The remote address's domain does not match the slot's domain.
    ProtocolMismatch,
    /// `len`/`available` exceeds `MAX_PACKETSIZE`, or the OS reported `EMSGSIZE`.
    MessageTooLarge,
    /// `bind` failed with `EADDRINUSE`.
    AddressInUse,
    /// The upper layer's `CopyTxData` callback reported anything other than `Ok`.
    TxDataUnavailable,
    /// A wrapped OS-level failure (`errno`) not covered by a more specific variant above.
    Os(std::io::ErrorKind),
}

impl TcpIpError {
    /// Recovers the original AUTOSAR development-error code for this failure, for callers
    /// integrating with a DET-compatible reporting convention. Returns `None` for failures that
    /// the original source did not report to DET (e.g. generic OS failures below the `bind`/
    /// `connect`/`transmit` call sites).
    pub fn autosar_code(&self) -> Option<u8> {
        match self {
            Self::InvalidArgument => Some(0x03),  // TCPIP_E_INV_ARG
            Self::MessageTooLarge => Some(0x07),  // TCPIP_E_MSGSIZE
            Self::ProtocolMismatch => Some(0x08), // TCPIP_E_PROTOCOL
            Self::AddressInUse => Some(0x09),     // TCPIP_E_ADDRINUSE
            _ => None,
        }
    }
}

impl fmt::Display for TcpIpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoFreeSocket => write!(f, "no free socket slot"),
            Self::InvalidSocketId => write!(f, "invalid socket id or socket in wrong state"),
            Self::InvalidArgument => write!(f, "invalid argument"),
            Self::ProtocolMismatch => write!(f, "remote address domain does not match socket domain"),
            Self::MessageTooLarge => write!(f, "message too large for configured packet size"),
            Self::AddressInUse => write!(f, "address already in use"),
            Self::TxDataUnavailable => write!(f, "upper layer could not supply transmit data"),
            Self::Os(kind) => write!(f, "OS socket call failed: {kind:?}"),
        }
    }
}

impl std::error::Error for TcpIpError {}

impl From<std::io::Error> for TcpIpError {
    fn from(e: std::io::Error) -> Self {
        Self::Os(e.kind())
    }
}

impl From<nix::Error> for TcpIpError {
    fn from(e: nix::Error) -> Self {
        Self::Os(std::io::Error::from(e).kind())
    }
}

/// Stands in for the AUTOSAR `Det_ReportError(module_id=170, instance_id, api_id, error_id)`
/// sink, whose own implementation is out of scope for this crate. Reporting is always
/// best-effort: the return value is ignored by every call site in this crate and never affects
/// what a caller gets back.
pub trait DevErrorSink {
    fn report(&self, instance_id: u8, api: ApiId, error: &TcpIpError);
}

/// The module id the AUTOSAR standard assigns to TcpIp (`TCPIP_MODULEID`).
pub const TCPIP_MODULE_ID: u16 = 170;

/// A [`DevErrorSink`] that just logs through the `log` facade at `warn!`. This is the default
/// sink wired in by [`crate::TcpIp::new`]; a host that has a real DET bridge supplies its own.
#[derive(Default)]
pub struct LoggingDevErrorSink;

impl DevErrorSink for LoggingDevErrorSink {
    fn report(&self, instance_id: u8, api: ApiId, error: &TcpIpError) {
        log::warn!(
            "DET: module={TCPIP_MODULE_ID} instance={instance_id} api={api:?} error={error} (autosar_code={:?})",
            error.autosar_code(),
        );
    }
}
