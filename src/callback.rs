//! The upper-layer callback contract. These are external collaborator interfaces only — the
//! Socket Adapter's own implementation is out of scope — so this module defines nothing but the
//! trait the core calls into and the small value types its methods exchange.

use crate::addr::SockAddr;
use crate::table::SocketId;

/// Upward events delivered through [`SocketAdapter::tcp_ip_event`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum TcpIpEvent {
    /// TCP connection was reset; the socket and all related resources have been released.
    TcpReset,
    /// TCP connection was closed successfully; the socket and all related resources have been
    /// released.
    TcpClosed,
    /// The peer sent a FIN; the socket is still valid and may still be drained/closed locally.
    TcpFinReceived,
    /// UDP socket and all related resources have been released.
    UdpClosed,
}

/// Outcome of a `CopyTxData` pull, mirroring the AUTOSAR `BufReq_ReturnType` values this API
/// actually distinguishes (`BUFREQ_OK`, `BUFREQ_E_BUSY`, and everything else collapsed to a
/// generic failure, since the transmit engine treats every other code identically — see §4.D).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum CopyTxDataResult {
    Ok,
    Busy,
    NotOk,
    Overflow,
}

/// The collection of upcalls the core makes into the upper layer. Implemented by the host
/// application/Socket Adapter; this crate only calls through this trait, never the other way
/// around.
pub trait SocketAdapter {
    /// A synchronous or asynchronous `tcp_connect` completed: the slot transitioned from
    /// `CONNECTING` to `CONNECTED`.
    fn tcp_connected(&mut self, id: SocketId);

    /// A listening socket accepted a new connection into a freshly-allocated slot. Returning
    /// `false` tells the core to release `new_id` and close its OS descriptor immediately (the
    /// new slot never reaches a caller-visible `CONNECTED` state in that case).
    fn tcp_accepted(&mut self, listen_id: SocketId, new_id: SocketId, remote: SockAddr) -> bool;

    /// Data arrived on `id` from `remote` (for UDP, the datagram's source; for TCP, the peer).
    fn rx_indication(&mut self, id: SocketId, remote: SockAddr, data: &[u8]);

    /// A terminal or semi-terminal event occurred on `id` (§3's "Event kinds").
    fn tcp_ip_event(&mut self, id: SocketId, event: TcpIpEvent);

    /// The transmit engine (§4.D/E) needs `len` bytes to send on behalf of `id`; write them into
    /// `dst` (which is always exactly `len` bytes long) and report the outcome.
    fn copy_tx_data(&mut self, id: SocketId, dst: &mut [u8]) -> CopyTxDataResult;
}
