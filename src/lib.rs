//! A Rust translation of an AUTOSAR `TcpIp` Basic Software module's Berkeley-sockets transport
//! adaptation layer: a fixed-capacity pool of sockets, each progressed by a non-blocking,
//! tick-driven state machine rather than a thread per connection.
//!
//! The crate is organized the way the original module's source is organized, one concern per
//! file:
//!
//! - [`addr`] — the address translator between this crate's domain-agnostic address record and
//!   the OS's `sockaddr_in`/`sockaddr_in6`.
//! - [`os`] — the thin layer over `nix` socket syscalls.
//! - [`table`] — the fixed-capacity socket pool.
//! - [`state`] — the socket state machine: the single place a slot's state, poll interest, and
//!   upper-layer notifications change.
//! - [`tick`] — the poll-based tick driver the host calls periodically.
//! - [`callback`] — the upper-layer callback contract ([`SocketAdapter`]).
//! - [`config`] — runtime sizing, in place of the original's preprocessor constants.
//! - [`error`] — the error taxonomy and development-error sink.
//!
//! [`TcpIp`] ties these together into the single entry point a host application holds.

pub mod addr;
pub mod callback;
pub mod config;
pub mod error;
pub mod os;
pub mod state;
pub mod table;
pub mod tick;

pub use addr::{Domain, Protocol, SockAddr};
pub use callback::{CopyTxDataResult, SocketAdapter, TcpIpEvent};
pub use config::TcpIpConfig;
pub use error::{ApiId, DevErrorSink, LoggingDevErrorSink, TcpIpError};
pub use state::ControllerMode;
pub use table::{SocketId, INVALID_SOCKET_ID};

use table::SocketTable;

/// The module's single entry point: owns the socket pool, the controller table, and the two
/// collaborators the original wires up statically (the upper-layer adapter and the DET sink).
///
/// Not `Send`/`Sync`: every operation (including [`TcpIp::tick`]) takes `&mut self` and is meant
/// to run on the single task/thread that also calls `tick` periodically, mirroring the original's
/// single `TcpIp_MainFunction` caller. Sharing a `TcpIp` across threads would require the caller
/// to serialize every call anyway, so the type simply declines to implement either trait instead
/// of pretending to be thread-safe.
pub struct TcpIp<A: SocketAdapter> {
    table: SocketTable,
    controllers: Vec<ControllerMode>,
    adapter: A,
    dev_errors: Box<dyn DevErrorSink>,
}

impl<A: SocketAdapter> TcpIp<A> {
    /// `TcpIp_Init`. Every controller starts `Offline`, matching the original's
    /// `TcpIp_Ctrl[ctrl].state = TCPIP_STATE_OFFLINE`.
    pub fn new(config: TcpIpConfig, adapter: A) -> Self {
        Self::with_dev_error_sink(config, adapter, Box::new(LoggingDevErrorSink))
    }

    /// Same as [`TcpIp::new`], but with a caller-supplied [`DevErrorSink`] instead of the default
    /// logging one (for a host that bridges into a real DET implementation).
    pub fn with_dev_error_sink(config: TcpIpConfig, adapter: A, dev_errors: Box<dyn DevErrorSink>) -> Self {
        log::debug!(
            "TcpIp init: max_sockets={} max_controllers={} max_packet_size={}",
            config.max_sockets,
            config.max_controllers,
            config.max_packet_size,
        );
        Self {
            table: SocketTable::new(config.max_sockets, config.max_packet_size),
            controllers: vec![ControllerMode::Offline; config.max_controllers],
            adapter,
            dev_errors,
        }
    }

    /// Borrows the upper-layer adapter, for a host that needs to reach its own state between
    /// calls into this crate.
    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    pub fn adapter_mut(&mut self) -> &mut A {
        &mut self.adapter
    }

    /// `TcpIp_SoAdGetSocket` / `TcpIp_GetFreeSocket`: allocates a fresh TCP or UDP socket.
    pub fn get_socket(&mut self, domain: Domain, protocol: Protocol) -> Result<SocketId, TcpIpError> {
        match self.table.allocate(domain, protocol) {
            Ok(id) => Ok(id),
            Err(e) => {
                self.dev_errors.report(0, ApiId::GetSocket, &e);
                Err(e)
            }
        }
    }

    /// `TcpIp_Bind`. Returns the bound port (useful when `port` was `0`, i.e. `PORT_ANY`).
    pub fn bind(&mut self, id: SocketId, local_addr_is_any: bool, port: u16) -> Result<u16, TcpIpError> {
        state::bind(
            &mut self.table,
            &mut self.adapter,
            self.dev_errors.as_ref(),
            id,
            local_addr_is_any,
            port,
        )
    }

    /// `TcpIp_TcpListen`.
    pub fn tcp_listen(&mut self, id: SocketId, channels: u16) -> Result<(), TcpIpError> {
        let result = state::tcp_listen(&mut self.table, &mut self.adapter, id, channels);
        if let Err(e) = &result {
            self.dev_errors.report(0, ApiId::TcpListen, e);
        }
        result
    }

    /// `TcpIp_TcpConnect`.
    pub fn tcp_connect(&mut self, id: SocketId, remote: SockAddr) -> Result<(), TcpIpError> {
        let result = state::tcp_connect(&mut self.table, &mut self.adapter, id, remote);
        if let Err(e) = &result {
            self.dev_errors.report(0, ApiId::TcpConnect, e);
        }
        result
    }

    /// `TcpIp_UdpTransmit`. `data = None` pulls the payload from the adapter via `CopyTxData`.
    pub fn udp_transmit(
        &mut self,
        id: SocketId,
        data: Option<&[u8]>,
        remote: SockAddr,
        len: u16,
    ) -> Result<(), TcpIpError> {
        state::udp_transmit(
            &mut self.table,
            &mut self.adapter,
            self.dev_errors.as_ref(),
            id,
            data,
            remote,
            len,
        )
    }

    /// `TcpIp_TcpTransmit`. `data = None` pulls each chunk from the adapter via `CopyTxData`.
    pub fn tcp_transmit(
        &mut self,
        id: SocketId,
        data: Option<&[u8]>,
        available: u32,
        force: bool,
    ) -> Result<(), TcpIpError> {
        let result = state::tcp_transmit(&mut self.table, &mut self.adapter, id, data, available, force);
        if let Err(e) = &result {
            self.dev_errors.report(0, ApiId::TcpTransmit, e);
        }
        result
    }

    /// `TcpIp_Close`.
    pub fn close(&mut self, id: SocketId, abort: bool) -> Result<(), TcpIpError> {
        let result = state::close(&mut self.table, &mut self.adapter, id, abort);
        if let Err(e) = &result {
            self.dev_errors.report(0, ApiId::Close, e);
        }
        result
    }

    /// `TcpIp_ChangeParameter`. Only `TCP_KEEPALIVE` is supported.
    pub fn change_parameter(&mut self, id: SocketId, keepalive: bool) -> Result<(), TcpIpError> {
        let result = state::change_parameter(&self.table, id, keepalive);
        if let Err(e) = &result {
            self.dev_errors.report(0, ApiId::ChangeParameter, e);
        }
        result
    }

    /// `TcpIp_RequestComMode`. `ctrl_id` is the EthIf controller index.
    pub fn request_com_mode(&mut self, ctrl_id: usize, mode: ControllerMode) -> Result<(), TcpIpError> {
        let result = state::request_com_mode(&mut self.table, &mut self.adapter, &mut self.controllers, ctrl_id, mode);
        if let Err(e) = &result {
            self.dev_errors.report(0, ApiId::RequestComMode, e);
        }
        result
    }

    /// The mode most recently accepted for a controller, or `None` if `ctrl_id` is out of range.
    pub fn com_mode(&self, ctrl_id: usize) -> Option<ControllerMode> {
        self.controllers.get(ctrl_id).copied()
    }

    /// `TcpIp_MainFunction`: advances every socket's state machine by one poll cycle. The host
    /// application is responsible for calling this periodically; this crate never spawns a
    /// thread or registers a timer of its own.
    pub fn tick(&mut self) {
        tick::main_function(&mut self.table, &mut self.adapter, self.dev_errors.as_ref());
    }

    /// Number of pre-allocated slots in the socket pool.
    pub fn capacity(&self) -> usize {
        self.table.capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addr::SockAddr;
    use crate::callback::{CopyTxDataResult, TcpIpEvent};

    /// A [`SocketAdapter`] that records every callback it receives, for tests that only need to
    /// assert on what fired rather than drive real transmit data.
    #[derive(Default)]
    pub struct NullAdapter {
        pub connected: Vec<SocketId>,
        pub accepted: Vec<(SocketId, SocketId, SockAddr)>,
        pub received: Vec<(SocketId, SockAddr, Vec<u8>)>,
        pub events: Vec<(SocketId, TcpIpEvent)>,
        pub accept_all: bool,
    }

    impl SocketAdapter for NullAdapter {
        fn tcp_connected(&mut self, id: SocketId) {
            self.connected.push(id);
        }

        fn tcp_accepted(&mut self, listen_id: SocketId, new_id: SocketId, remote: SockAddr) -> bool {
            self.accepted.push((listen_id, new_id, remote));
            self.accept_all
        }

        fn rx_indication(&mut self, id: SocketId, remote: SockAddr, data: &[u8]) {
            self.received.push((id, remote, data.to_vec()));
        }

        fn tcp_ip_event(&mut self, id: SocketId, event: TcpIpEvent) {
            self.events.push((id, event));
        }

        fn copy_tx_data(&mut self, _id: SocketId, _dst: &mut [u8]) -> CopyTxDataResult {
            CopyTxDataResult::NotOk
        }
    }

    static_assertions::assert_not_impl_any!(TcpIp<NullAdapter>: Send, Sync);

    #[test]
    fn fresh_table_has_configured_capacity() {
        let tcp = TcpIp::new(TcpIpConfig::new(4, 1, 256).unwrap(), NullAdapter::default());
        assert_eq!(tcp.capacity(), 4);
    }

    #[test]
    fn get_socket_allocates_and_is_bindable() {
        let mut tcp = TcpIp::new(TcpIpConfig::default(), NullAdapter::default());
        let id = tcp.get_socket(Domain::Ipv4, Protocol::Udp).unwrap();
        let port = tcp.bind(id, true, 0).unwrap();
        assert_ne!(port, 0);
    }

    #[test]
    fn request_offline_closes_all_sockets() {
        let mut tcp = TcpIp::new(TcpIpConfig::default(), NullAdapter::default());
        let id = tcp.get_socket(Domain::Ipv4, Protocol::Udp).unwrap();
        tcp.bind(id, true, 0).unwrap();
        tcp.request_com_mode(0, ControllerMode::Offline).unwrap();
        assert_eq!(tcp.com_mode(0), Some(ControllerMode::Offline));
        assert!(tcp.adapter().events.contains(&(id, TcpIpEvent::UdpClosed)));
    }
}
