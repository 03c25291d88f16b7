//! The socket table (component C): a fixed-capacity pool of pre-allocated socket slots.
//! Allocation is a linear scan for a free slot, and a slot's identity is its index — there is no
//! generational reuse (unlike e.g. `slotmap`'s keys) because the AUTOSAR contract promises a
//! stable, dense `SocketIdType` that the upper layer stores directly, not an opaque versioned
//! handle.

use std::os::fd::OwnedFd;

use crate::addr::{Domain, Protocol};
use crate::error::TcpIpError;
use crate::os;
use crate::state::{PollInterest, SocketState};

/// `TCPIP_SOCKETID_INVALID`.
pub const INVALID_SOCKET_ID: SocketId = SocketId(0xFFFF);

/// A stable handle into the [`SocketTable`]. The wrapped index is the only thing the upper layer
/// needs to remember across a socket's entire lifetime.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SocketId(pub u16);

impl SocketId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// One pre-allocated socket slot.
pub struct SocketSlot {
    pub protocol: Protocol,
    pub domain: Domain,
    pub state: SocketState,
    /// `None` is the "invalid" sentinel, always in lockstep with `state`: unused iff invalid.
    pub os_handle: Option<OwnedFd>,
    /// Scratch buffer used when the upper layer supplies transmit data by pull (`CopyTxData`).
    pub tx_buffer: Vec<u8>,
    /// The readiness interest the tick driver should poll for; always kept in sync with `state`
    /// by [`crate::state::enter`], never set anywhere else.
    pub interest: PollInterest,
}

impl SocketSlot {
    fn new_unused(max_packet_size: usize) -> Self {
        Self {
            protocol: Protocol::Tcp,
            domain: Domain::Ipv4,
            state: SocketState::Unused,
            os_handle: None,
            tx_buffer: vec![0u8; max_packet_size],
            interest: PollInterest::NONE,
        }
    }

    pub fn is_unused(&self) -> bool {
        matches!(self.state, SocketState::Unused)
    }
}

/// The fixed-capacity socket pool. Slots are created once, in `Unused`, and never resized after
/// construction — the Rust analogue of the original's `TcpIp_SocketType TcpIp_Sockets[..]` static
/// array, sized at runtime instead of compile time.
pub struct SocketTable {
    slots: Vec<SocketSlot>,
    max_packet_size: usize,
}

impl SocketTable {
    pub fn new(capacity: usize, max_packet_size: usize) -> Self {
        let slots = (0..capacity)
            .map(|_| SocketSlot::new_unused(max_packet_size))
            .collect();
        Self {
            slots,
            max_packet_size,
        }
    }

    pub fn max_packet_size(&self) -> usize {
        self.max_packet_size
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn get(&self, id: SocketId) -> Option<&SocketSlot> {
        self.slots.get(id.index())
    }

    pub fn get_mut(&mut self, id: SocketId) -> Option<&mut SocketSlot> {
        self.slots.get_mut(id.index())
    }

    pub fn iter(&self) -> impl Iterator<Item = (SocketId, &SocketSlot)> {
        self.slots
            .iter()
            .enumerate()
            .map(|(i, s)| (SocketId(i as u16), s))
    }

    pub fn ids(&self) -> impl Iterator<Item = SocketId> + '_ {
        (0..self.slots.len()).map(|i| SocketId(i as u16))
    }

    /// Linear scan for a free slot, creates an OS descriptor for `(domain, protocol)`, and moves
    /// it to `Allocated` (`TcpIp_SoAdGetSocket`/`TcpIp_GetFreeSocket`). On any OS failure the slot
    /// is left `Unused` and the descriptor, if one was opened, is closed.
    pub fn allocate(&mut self, domain: Domain, protocol: Protocol) -> Result<SocketId, TcpIpError> {
        let index = self
            .slots
            .iter()
            .position(SocketSlot::is_unused)
            .ok_or(TcpIpError::NoFreeSocket)?;

        let fd = os::create(domain, protocol)?;

        let slot = &mut self.slots[index];
        slot.domain = domain;
        slot.protocol = protocol;
        slot.os_handle = Some(fd);
        slot.state = SocketState::Allocated;
        slot.interest = PollInterest::NONE;

        log::debug!("socket {index} allocated ({domain:?}/{protocol:?})");

        Ok(SocketId(index as u16))
    }

    /// Installs an already-accepted OS descriptor (and domain/protocol) directly into a freshly
    /// allocated slot, for the `LISTEN` accept path, which needs a slot id before it knows
    /// whether the accepted connection will be kept.
    pub fn allocate_for_accept(&mut self, domain: Domain, protocol: Protocol) -> Result<SocketId, TcpIpError> {
        let index = self
            .slots
            .iter()
            .position(SocketSlot::is_unused)
            .ok_or(TcpIpError::NoFreeSocket)?;
        let slot = &mut self.slots[index];
        slot.domain = domain;
        slot.protocol = protocol;
        slot.state = SocketState::Allocated;
        slot.interest = PollInterest::NONE;
        Ok(SocketId(index as u16))
    }
}
