//! The socket state machine (component D) — the heart of the core.
//!
//! Every field mutation that matters (the state itself, the poll-readiness interest, the OS
//! handle, and every upper-layer notification) happens inside [`enter`]. No other function in
//! this crate is allowed to touch [`SocketSlot::state`] directly; that is what makes the
//! transition table in this module the single source of truth; it is also what fixes the source
//! defects a notification fired from two different call sites, or a readiness mask set in one
//! place and forgotten in another, cannot happen if there is only one place either is ever
//! written.

use std::os::fd::OwnedFd;

use bitflags::bitflags;

use crate::addr::{Protocol, SockAddr};
use crate::callback::{CopyTxDataResult, SocketAdapter, TcpIpEvent};
use crate::error::{ApiId, DevErrorSink, TcpIpError};
use crate::os;
use crate::table::{SocketId, SocketTable};

/// The eight states a slot can be in. Closed over exhaustively: every function below that matches
/// on `SocketState` has no wildcard arm, so adding a state is a compile error everywhere it isn't
/// handled.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum SocketState {
    Unused,
    Allocated,
    Bound,
    Listen,
    Connecting,
    Connected,
    Shutdown,
    Finished,
}

bitflags! {
    /// The readiness interest the tick driver asks the OS multiplexer to observe for a slot.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct PollInterest: i16 {
        const NONE = 0;
        const READABLE = 1 << 0;
        const WRITABLE = 1 << 1;
    }
}

/// Only the three externally-commandable controller modes: startup and shutdown are illegal
/// arguments to a mode change and have no variant here.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ControllerMode {
    Online,
    Onhold,
    Offline,
}

/// The single place that changes a slot's state. Captures the slot's current (about-to-be-old)
/// state, applies the readiness interest and OS-handle bookkeeping prescribed for `new_state`,
/// and emits exactly the notification the transition table calls for — in that order, so a
/// callback always observes the slot as "dead but still identifiable" rather than already
/// recycled.
pub fn enter(
    table: &mut SocketTable,
    adapter: &mut dyn SocketAdapter,
    id: SocketId,
    new_state: SocketState,
) {
    let Some(slot) = table.get_mut(id) else {
        debug_assert!(false, "enter() called with an out-of-range socket id");
        return;
    };
    let old_state = slot.state;
    let protocol = slot.protocol;

    log::debug!("socket {} transition {:?} -> {:?}", id.0, old_state, new_state);

    match new_state {
        SocketState::Unused => {
            // emit before closing the handle: the callback still sees a "known" (if dead) slot
            match (protocol, old_state) {
                (Protocol::Udp, _) => adapter.tcp_ip_event(id, TcpIpEvent::UdpClosed),
                (Protocol::Tcp, SocketState::Connected) => adapter.tcp_ip_event(id, TcpIpEvent::TcpReset),
                (Protocol::Tcp, _) => adapter.tcp_ip_event(id, TcpIpEvent::TcpClosed),
            }

            let slot = table.get_mut(id).expect("slot still present");
            slot.os_handle = None; // dropping the OwnedFd closes the descriptor
            slot.interest = PollInterest::NONE;
        }
        SocketState::Connecting => {
            slot.interest = PollInterest::WRITABLE;
        }
        SocketState::Connected => {
            slot.interest = PollInterest::READABLE;
            if old_state == SocketState::Connecting {
                adapter.tcp_connected(id);
            }
        }
        SocketState::Listen | SocketState::Shutdown | SocketState::Bound => {
            slot.interest = PollInterest::READABLE;
        }
        SocketState::Finished => {
            slot.interest = PollInterest::READABLE;
            adapter.tcp_ip_event(id, TcpIpEvent::TcpFinReceived);
        }
        SocketState::Allocated => {
            slot.interest = PollInterest::NONE;
        }
    }

    let slot = table.get_mut(id).expect("slot still present");
    slot.state = new_state;
}

// ---------------------------------------------------------------------------------------------
// Public synchronous operations
// ---------------------------------------------------------------------------------------------

/// `bind(id, local_addr_id, *port)`. Only `LOCALADDRID_ANY` is supported; other local-address
/// selections are reserved and rejected as `E_NOT_OK`.
pub fn bind(
    table: &mut SocketTable,
    adapter: &mut dyn SocketAdapter,
    dev_errors: &dyn DevErrorSink,
    id: SocketId,
    local_addr_is_any: bool,
    port: u16,
) -> Result<u16, TcpIpError> {
    let _ = adapter;
    if !local_addr_is_any {
        return Err(TcpIpError::InvalidArgument);
    }

    let slot = table.get(id).ok_or(TcpIpError::InvalidSocketId)?;
    let domain = slot.domain;
    let fd = slot.os_handle.as_ref().ok_or(TcpIpError::InvalidSocketId)?;

    let local = match domain {
        crate::addr::Domain::Ipv4 => SockAddr::V4 {
            addr: std::net::Ipv4Addr::UNSPECIFIED,
            port,
        },
        crate::addr::Domain::Ipv6 => SockAddr::V6 {
            addr: std::net::Ipv6Addr::UNSPECIFIED,
            port,
        },
    };

    if let Err(e) = os::bind(fd, &local) {
        if let TcpIpError::Os(kind) = &e {
            if *kind == std::io::ErrorKind::AddrInUse {
                dev_errors.report(0, ApiId::Bind, &TcpIpError::AddressInUse);
            }
        }
        return Err(e);
    }

    let bound = os::getsockname(fd)?;

    enter(table, adapter, id, SocketState::Bound);

    Ok(bound.port())
}

/// `tcp_listen(id, channels)`.
pub fn tcp_listen(
    table: &mut SocketTable,
    adapter: &mut dyn SocketAdapter,
    id: SocketId,
    channels: u16,
) -> Result<(), TcpIpError> {
    let slot = table.get(id).ok_or(TcpIpError::InvalidSocketId)?;
    let fd = slot.os_handle.as_ref().ok_or(TcpIpError::InvalidSocketId)?;
    os::listen(fd, channels)?;
    enter(table, adapter, id, SocketState::Listen);
    Ok(())
}

/// `tcp_connect(id, remote)`. On immediate OS success the slot still passes through
/// `Connecting` on its way to `Connected` (both inside this single call) so that the
/// `TcpConnected` notification always has exactly one emission site: the `Connecting ->
/// Connected` arm of [`enter`], applying the same totality discipline to the rare case where
/// `connect(2)` completes synchronously.
pub fn tcp_connect(
    table: &mut SocketTable,
    adapter: &mut dyn SocketAdapter,
    id: SocketId,
    remote: SockAddr,
) -> Result<(), TcpIpError> {
    let slot = table.get(id).ok_or(TcpIpError::InvalidSocketId)?;
    if remote.domain() != slot.domain {
        return Err(TcpIpError::InvalidArgument);
    }
    let fd = slot.os_handle.as_ref().ok_or(TcpIpError::InvalidSocketId)?;

    match os::connect(fd, &remote) {
        Ok(()) => {
            enter(table, adapter, id, SocketState::Connecting);
            enter(table, adapter, id, SocketState::Connected);
            Ok(())
        }
        Err(e) if os::is_in_progress(&e) => {
            enter(table, adapter, id, SocketState::Connecting);
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// `udp_transmit(id, data|nil, remote, len)`.
pub fn udp_transmit(
    table: &mut SocketTable,
    adapter: &mut dyn SocketAdapter,
    dev_errors: &dyn DevErrorSink,
    id: SocketId,
    data: Option<&[u8]>,
    remote: SockAddr,
    len: u16,
) -> Result<(), TcpIpError> {
    let slot = table.get(id).ok_or(TcpIpError::InvalidSocketId)?;
    if remote.domain() != slot.domain {
        dev_errors.report(0, ApiId::UdpTransmit, &TcpIpError::ProtocolMismatch);
        return Err(TcpIpError::ProtocolMismatch);
    }

    let result = (|| -> Result<(), TcpIpError> {
        let bytes: Vec<u8> = match data {
            Some(bytes) => bytes.to_vec(),
            None => {
                if len as usize > table.max_packet_size() {
                    return Err(TcpIpError::MessageTooLarge);
                }
                let slot = table.get_mut(id).unwrap();
                let dst = &mut slot.tx_buffer[..len as usize];
                match adapter.copy_tx_data(id, dst) {
                    CopyTxDataResult::Ok => dst.to_vec(),
                    _ => return Err(TcpIpError::TxDataUnavailable),
                }
            }
        };

        let fd = table.get(id).unwrap().os_handle.as_ref().ok_or(TcpIpError::InvalidSocketId)?;
        os::set_blocking(fd, true)?;
        let send_result = os::sendto(fd, &bytes, &remote);

        match send_result {
            Ok(written) if written == bytes.len() => Ok(()),
            Ok(_short) => {
                dev_errors.report(0, ApiId::UdpTransmit, &TcpIpError::MessageTooLarge);
                Err(TcpIpError::MessageTooLarge)
            }
            Err(e) if os::is_msg_size(&e) => {
                dev_errors.report(0, ApiId::UdpTransmit, &TcpIpError::MessageTooLarge);
                Err(TcpIpError::MessageTooLarge)
            }
            Err(e) => Err(e.into()),
        }
    })();

    // restore non-blocking mode regardless of outcome
    if let Some(fd) = table.get(id).and_then(|s| s.os_handle.as_ref()) {
        let _ = os::set_blocking(fd, false);
    }

    result
}

/// `tcp_transmit(id, data|nil, available, force)`.
pub fn tcp_transmit(
    table: &mut SocketTable,
    adapter: &mut dyn SocketAdapter,
    id: SocketId,
    mut data: Option<&[u8]>,
    mut available: u32,
    force: bool,
) -> Result<(), TcpIpError> {
    let slot = table.get(id).ok_or(TcpIpError::InvalidSocketId)?;
    let max_chunk = table.max_packet_size();
    if slot.os_handle.is_none() {
        return Err(TcpIpError::InvalidSocketId);
    }

    let fd = table.get(id).unwrap().os_handle.as_ref().unwrap();
    os::set_blocking(fd, true)?;

    let result = (|| -> Result<(), TcpIpError> {
        loop {
            let chunk_len = (available as usize).min(max_chunk);
            available -= chunk_len as u32;

            let chunk: Vec<u8> = match data {
                Some(bytes) => {
                    let (head, rest) = bytes.split_at(chunk_len);
                    data = Some(rest);
                    head.to_vec()
                }
                None => {
                    let slot = table.get_mut(id).unwrap();
                    let dst = &mut slot.tx_buffer[..chunk_len];
                    match adapter.copy_tx_data(id, dst) {
                        CopyTxDataResult::Ok => dst.to_vec(),
                        CopyTxDataResult::Busy => return Ok(()),
                        _ => return Err(TcpIpError::TxDataUnavailable),
                    }
                }
            };

            let mut remaining = &chunk[..];
            while !remaining.is_empty() {
                let fd = table.get(id).unwrap().os_handle.as_ref().unwrap();
                match os::send(fd, remaining) {
                    Ok(n) => remaining = &remaining[n..],
                    Err(e) if os::is_eintr(&e) => continue,
                    Err(e) => return Err(e.into()),
                }
            }

            if !(available > 0 && force) {
                break;
            }
        }
        Ok(())
    })();

    if let Some(fd) = table.get(id).and_then(|s| s.os_handle.as_ref()) {
        let _ = os::set_blocking(fd, false);
    }

    result
}

/// `close(id, abort)`.
pub fn close(
    table: &mut SocketTable,
    adapter: &mut dyn SocketAdapter,
    id: SocketId,
    abort: bool,
) -> Result<(), TcpIpError> {
    let slot = table.get(id).ok_or(TcpIpError::InvalidSocketId)?;

    if slot.is_unused() {
        return Ok(());
    }

    if slot.protocol == Protocol::Udp {
        enter(table, adapter, id, SocketState::Unused);
        return Ok(());
    }

    if abort || slot.state != SocketState::Connected {
        enter(table, adapter, id, SocketState::Unused);
        return Ok(());
    }

    let fd = slot.os_handle.as_ref().unwrap();
    os::shutdown_write(fd)?;
    enter(table, adapter, id, SocketState::Shutdown);
    Ok(())
}

/// `change_parameter(id, param, value)`. Only `TCP_KEEPALIVE` is supported today, matching the
/// original's `TcpIp_ChangeParameter` which has exactly one case beyond its default failure arm.
pub fn change_parameter(table: &SocketTable, id: SocketId, keepalive: bool) -> Result<(), TcpIpError> {
    let slot = table.get(id).ok_or(TcpIpError::InvalidSocketId)?;
    let fd = slot.os_handle.as_ref().ok_or(TcpIpError::InvalidSocketId)?;
    os::set_keepalive(fd, keepalive)
}

/// `request_com_mode(ctrl_id, state)`. `Offline` forces every slot to `Unused` (mass shutdown).
pub fn request_com_mode(
    table: &mut SocketTable,
    adapter: &mut dyn SocketAdapter,
    controllers: &mut [ControllerMode],
    ctrl_id: usize,
    mode: ControllerMode,
) -> Result<(), TcpIpError> {
    let slot_mode = controllers.get_mut(ctrl_id).ok_or(TcpIpError::InvalidArgument)?;

    if mode == ControllerMode::Offline {
        for id in table.ids() {
            if !table.get(id).unwrap().is_unused() {
                enter(table, adapter, id, SocketState::Unused);
            }
        }
    }

    *slot_mode = mode;
    Ok(())
}

// ---------------------------------------------------------------------------------------------
// Tick handlers
// ---------------------------------------------------------------------------------------------

/// Readiness flags observed for a slot during one tick, independent of how the OS multiplexer
/// happens to represent them. The original's `(v == EAGAIN) && (v == EWOULDBLOCK)` style bug is
/// the kind of mistake a typed, total match is meant to prevent; the same applies here by giving
/// each flag its own named field instead of raw bitmasking at each call site.
#[derive(Copy, Clone, Debug, Default)]
pub struct Revents {
    pub readable: bool,
    pub writable: bool,
    pub hangup: bool,
    pub error: bool,
}

/// Dispatches one slot's tick handling based on its current state (`TcpIp_SocketState_All`).
/// Total over [`SocketState`]; states with no asynchronous work (`Unused`, `Allocated`) are a
/// deliberate explicit no-op arm rather than a wildcard, so a newly-added state cannot silently
/// fall through unhandled.
pub fn tick_slot(
    table: &mut SocketTable,
    adapter: &mut dyn SocketAdapter,
    dev_errors: &dyn DevErrorSink,
    id: SocketId,
    revents: Revents,
) {
    let Some(state) = table.get(id).map(|s| s.state) else {
        return;
    };

    match state {
        SocketState::Connecting => tick_connecting(table, adapter, id, revents),
        SocketState::Listen => tick_listen(table, adapter, dev_errors, id, revents),
        SocketState::Connected => tick_connected(table, adapter, id, revents),
        SocketState::Bound => tick_bound(table, adapter, id, revents),
        SocketState::Shutdown => tick_shutdown(table, adapter, id, revents),
        SocketState::Unused
        | SocketState::Allocated
        | SocketState::Finished => {}
    }
}

fn tick_connecting(table: &mut SocketTable, adapter: &mut dyn SocketAdapter, id: SocketId, revents: Revents) {
    if revents.hangup || revents.error {
        enter(table, adapter, id, SocketState::Unused);
        return;
    }

    if revents.writable {
        let fd = table.get(id).and_then(|s| s.os_handle.as_ref());
        let connected = fd.map(os::getpeername).map(|r| r.is_ok()).unwrap_or(false);
        if connected {
            enter(table, adapter, id, SocketState::Connected);
        } else {
            enter(table, adapter, id, SocketState::Allocated);
        }
    }
}

fn tick_listen(
    table: &mut SocketTable,
    adapter: &mut dyn SocketAdapter,
    dev_errors: &dyn DevErrorSink,
    id: SocketId,
    revents: Revents,
) {
    if revents.hangup || revents.error {
        enter(table, adapter, id, SocketState::Unused);
        return;
    }

    if revents.readable {
        accept_one(table, adapter, dev_errors, id);
    }
}

/// The accept path (`TcpIp_SocketState_Listen_Accept`). Allocates a new slot before attempting
/// the accept so the new slot id is available to hand to `TcpAccepted`; any failure along the
/// way releases both the new slot and the accepted descriptor, so a rejected or failed accept
/// never leaks an OS descriptor, unlike the original.
fn accept_one(
    table: &mut SocketTable,
    adapter: &mut dyn SocketAdapter,
    dev_errors: &dyn DevErrorSink,
    listen_id: SocketId,
) {
    let slot = table.get(listen_id).unwrap();
    let domain = slot.domain;
    let protocol = slot.protocol;
    let Some(listen_fd) = slot.os_handle.as_ref() else {
        return;
    };

    let accepted = match os::accept(listen_fd) {
        Ok(fd) => fd,
        Err(e) => {
            dev_errors.report(0, ApiId::TcpListen, &e);
            return;
        }
    };
    // `accepted` is a freshly-owned descriptor; dropping it anywhere below closes it.

    if let Err(e) = finish_accept(table, adapter, listen_id, domain, protocol, accepted) {
        dev_errors.report(0, ApiId::TcpListen, &e);
    }
}

fn finish_accept(
    table: &mut SocketTable,
    adapter: &mut dyn SocketAdapter,
    listen_id: SocketId,
    domain: crate::addr::Domain,
    protocol: Protocol,
    accepted_fd: OwnedFd,
) -> Result<(), TcpIpError> {
    let new_id = match table.allocate_for_accept(domain, protocol) {
        Ok(id) => id,
        Err(e) => {
            drop(accepted_fd);
            return Err(e);
        }
    };

    if let Err(e) = os::set_blocking(&accepted_fd, false) {
        release_rejected(table, new_id, accepted_fd);
        return Err(e);
    }

    let remote = match os::getpeername(&accepted_fd) {
        Ok(addr) => addr,
        Err(e) => {
            release_rejected(table, new_id, accepted_fd);
            return Err(e);
        }
    };

    let slot = table.get_mut(new_id).unwrap();
    slot.os_handle = Some(accepted_fd);

    if !adapter.tcp_accepted(listen_id, new_id, remote) {
        let fd = table.get_mut(new_id).unwrap().os_handle.take();
        table.get_mut(new_id).unwrap().state = SocketState::Unused;
        drop(fd); // closes the rejected descriptor, if any
        return Ok(());
    }

    enter(table, adapter, new_id, SocketState::Connected);
    Ok(())
}

fn release_rejected(table: &mut SocketTable, new_id: SocketId, fd: OwnedFd) {
    drop(fd); // closes the descriptor
    let slot = table.get_mut(new_id).unwrap();
    slot.os_handle = None;
    slot.state = SocketState::Unused;
}

fn tick_connected(table: &mut SocketTable, adapter: &mut dyn SocketAdapter, id: SocketId, revents: Revents) {
    if revents.error {
        enter(table, adapter, id, SocketState::Unused);
        return;
    }

    if revents.readable || revents.hangup {
        receive_step(table, adapter, id);
    }
}

fn tick_bound(table: &mut SocketTable, adapter: &mut dyn SocketAdapter, id: SocketId, revents: Revents) {
    if revents.hangup || revents.error {
        enter(table, adapter, id, SocketState::Unused);
        return;
    }
    if revents.readable {
        receive_step(table, adapter, id);
    }
}

fn tick_shutdown(table: &mut SocketTable, adapter: &mut dyn SocketAdapter, id: SocketId, revents: Revents) {
    if revents.error {
        enter(table, adapter, id, SocketState::Unused);
        return;
    }
    if revents.readable || revents.hangup {
        receive_step(table, adapter, id);
    }
}

/// The receive step shared by `Connected`/`Bound`/`Shutdown` (`TcpIp_SocketState_Receive`).
fn receive_step(table: &mut SocketTable, adapter: &mut dyn SocketAdapter, id: SocketId) {
    let max_packet_size = table.max_packet_size();
    let mut buf = vec![0u8; max_packet_size];

    let fd = match table.get(id).and_then(|s| s.os_handle.as_ref()) {
        Some(fd) => fd,
        None => return,
    };

    match os::recvfrom(fd, &mut buf) {
        Err(e) => {
            if !os::is_would_block(&e) {
                enter(table, adapter, id, SocketState::Unused);
            }
        }
        Ok((0, _)) => {
            // A zero-length read is TCP EOF, but a perfectly legitimate empty UDP datagram; only
            // TCP treats it as the peer's FIN.
            let slot = table.get(id).unwrap();
            if slot.protocol == Protocol::Tcp {
                if slot.state == SocketState::Shutdown {
                    enter(table, adapter, id, SocketState::Unused);
                } else {
                    enter(table, adapter, id, SocketState::Finished);
                }
            }
        }
        Ok((n, remote)) => {
            let remote = match remote {
                Some(addr) => Some(addr),
                None => table.get(id).and_then(|s| s.os_handle.as_ref()).and_then(|fd| os::getpeername(fd).ok()),
            };
            if let Some(remote) = remote {
                adapter.rx_indication(id, remote, &buf[..n]);
            }
        }
    }
}
