//! The tick driver (component G): one non-blocking `poll(2)` call over every slot's OS handle,
//! followed by dispatching each slot's current-state handler regardless of what `poll` returned
//! (`TcpIp_MainFunction`). A slot with no OS handle contributes an invalid fd to the poll set,
//! which the OS simply ignores, exactly as the original's `TcpIp_PollFds[index].fd =
//! TcpIp_Sockets[index].fd` does for a socket whose `fd` is `INVALID_SOCKET`.

use nix::poll::{poll, PollFd, PollFlags};
use std::os::fd::{AsFd, BorrowedFd};

use crate::callback::SocketAdapter;
use crate::error::DevErrorSink;
use crate::state::{tick_slot, PollInterest, Revents};
use crate::table::{SocketId, SocketTable};

fn interest_to_poll_flags(interest: PollInterest) -> PollFlags {
    let mut flags = PollFlags::empty();
    if interest.contains(PollInterest::READABLE) {
        flags |= PollFlags::POLLIN;
    }
    if interest.contains(PollInterest::WRITABLE) {
        flags |= PollFlags::POLLOUT;
    }
    flags
}

fn poll_flags_to_revents(flags: PollFlags) -> Revents {
    Revents {
        readable: flags.contains(PollFlags::POLLIN),
        writable: flags.contains(PollFlags::POLLOUT),
        hangup: flags.contains(PollFlags::POLLHUP),
        error: flags.contains(PollFlags::POLLERR) || flags.contains(PollFlags::POLLNVAL),
    }
}

/// Runs one cycle of the tick driver: polls every slot's OS handle with a zero timeout, then
/// hands each slot's observed readiness to its state handler (`TcpIp_MainFunction`). Must be
/// called periodically by the host application; this crate never spawns a thread of its own,
/// which is also why `TcpIp` isn't `Send`.
pub fn main_function(
    table: &mut SocketTable,
    adapter: &mut dyn SocketAdapter,
    dev_errors: &dyn DevErrorSink,
) {
    // Slots without an OS handle still need a placeholder entry so poll fd indices line up with
    // socket ids; `PollFd` has no "invalid fd" constructor, so unused slots are simply skipped
    // from the poll set and treated as having no observed readiness below.
    let borrowed: Vec<Option<BorrowedFd<'_>>> = table
        .iter()
        .map(|(_, slot)| slot.os_handle.as_ref().map(|fd| fd.as_fd()))
        .collect();

    let mut pollfds: Vec<PollFd<'_>> = borrowed
        .iter()
        .enumerate()
        .filter_map(|(i, fd)| {
            let fd = (*fd)?;
            let interest = table.get(SocketId(i as u16))?.interest;
            Some(PollFd::new(fd, interest_to_poll_flags(interest)))
        })
        .collect();

    match poll(&mut pollfds, 0) {
        Ok(_) => {}
        Err(e) => {
            log::warn!("poll(2) failed: {e}");
            return;
        }
    }

    let mut observed = vec![Revents::default(); table.capacity()];
    let mut next = 0usize;
    for (i, fd) in borrowed.iter().enumerate() {
        if fd.is_none() {
            continue;
        }
        if let Some(flags) = pollfds[next].revents() {
            observed[i] = poll_flags_to_revents(flags);
        }
        next += 1;
    }

    for id in table.ids().collect::<Vec<_>>() {
        let revents = observed[id.index()];
        log::trace!("socket {} tick revents={:?}", id.0, revents);
        tick_slot(table, adapter, dev_errors, id, revents);
    }
}
