//! End-to-end scenarios against real loopback sockets.

use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

use tcpip_core::{
    CopyTxDataResult, Domain, Protocol, SockAddr, SocketAdapter, SocketId, TcpIp, TcpIpConfig,
    TcpIpEvent,
};

#[derive(Default)]
struct RecordingAdapter {
    connected: Vec<SocketId>,
    accepted: Vec<(SocketId, SocketId, SockAddr)>,
    received: Vec<(SocketId, SockAddr, Vec<u8>)>,
    events: Vec<(SocketId, TcpIpEvent)>,
    accept_all: bool,
    tx_payload: Vec<u8>,
}

impl SocketAdapter for RecordingAdapter {
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

    fn copy_tx_data(&mut self, _id: SocketId, dst: &mut [u8]) -> CopyTxDataResult {
        if self.tx_payload.len() < dst.len() {
            return CopyTxDataResult::Busy;
        }
        let (head, rest) = self.tx_payload.split_at(dst.len());
        dst.copy_from_slice(head);
        self.tx_payload = rest.to_vec();
        CopyTxDataResult::Ok
    }
}

fn new_stack() -> TcpIp<RecordingAdapter> {
    let _ = env_logger::builder().is_test(true).try_init();
    TcpIp::new(TcpIpConfig::new(8, 1, 4096).unwrap(), RecordingAdapter::default())
}

/// Ticks `stack` until `predicate` holds or a deadline passes, to avoid a fixed sleep for
/// loopback I/O that usually completes in well under a millisecond but isn't guaranteed to.
fn tick_until(stack: &mut TcpIp<RecordingAdapter>, mut predicate: impl FnMut(&TcpIp<RecordingAdapter>) -> bool) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while !predicate(stack) {
        stack.tick();
        if Instant::now() > deadline {
            panic!("condition did not become true before the deadline");
        }
        std::thread::sleep(Duration::from_millis(1));
    }
}

fn loopback(port: u16) -> SockAddr {
    SockAddr::V4 {
        addr: Ipv4Addr::LOCALHOST,
        port,
    }
}

#[test]
fn udp_bind_round_trip() {
    let mut stack = new_stack();
    let id = stack.get_socket(Domain::Ipv4, Protocol::Udp).unwrap();
    let port = stack.bind(id, true, 0).unwrap();
    assert_ne!(port, 0);
}

#[test]
fn tcp_abort_from_allocated_emits_closed_not_reset() {
    let mut stack = new_stack();
    let id = stack.get_socket(Domain::Ipv4, Protocol::Tcp).unwrap();
    stack.close(id, true).unwrap();
    assert_eq!(stack.adapter().events, vec![(id, TcpIpEvent::TcpClosed)]);
}

#[test]
fn tcp_listen_accept_connect_loopback() {
    let mut stack = new_stack();

    let listener = stack.get_socket(Domain::Ipv4, Protocol::Tcp).unwrap();
    let port = stack.bind(listener, true, 0).unwrap();
    stack.tcp_listen(listener, 4).unwrap();

    let connector = stack.get_socket(Domain::Ipv4, Protocol::Tcp).unwrap();
    stack.bind(connector, true, 0).unwrap();
    stack.tcp_connect(connector, loopback(port)).unwrap();

    tick_until(&mut stack, |s| !s.adapter().accepted.is_empty() && !s.adapter().connected.is_empty());

    assert_eq!(stack.adapter().connected, vec![connector]);
    assert_eq!(stack.adapter().accepted.len(), 1);
    assert_eq!(stack.adapter().accepted[0].0, listener);

    // the accepted socket is a brand new slot; it must not have received a redundant
    // `TcpConnected` notification (it was never `Connecting`).
    assert!(!stack.adapter().connected.contains(&stack.adapter().accepted[0].1));
}

#[test]
fn tcp_data_transfer_over_loopback() {
    let mut stack = new_stack();

    let listener = stack.get_socket(Domain::Ipv4, Protocol::Tcp).unwrap();
    let port = stack.bind(listener, true, 0).unwrap();
    stack.tcp_listen(listener, 4).unwrap();
    stack.adapter_mut().accept_all = true;

    let connector = stack.get_socket(Domain::Ipv4, Protocol::Tcp).unwrap();
    stack.bind(connector, true, 0).unwrap();
    stack.tcp_connect(connector, loopback(port)).unwrap();

    tick_until(&mut stack, |s| !s.adapter().accepted.is_empty());
    let accepted_id = stack.adapter().accepted[0].1;

    stack.tcp_transmit(connector, Some(b"hello, loopback"), 15, false).unwrap();

    tick_until(&mut stack, |s| !s.adapter().received.is_empty());

    let (from, _remote, data) = &stack.adapter().received[0];
    assert_eq!(*from, accepted_id);
    assert_eq!(data, b"hello, loopback");
}

#[test]
fn tcp_graceful_close_reaches_fin_received() {
    let mut stack = new_stack();

    let listener = stack.get_socket(Domain::Ipv4, Protocol::Tcp).unwrap();
    let port = stack.bind(listener, true, 0).unwrap();
    stack.tcp_listen(listener, 4).unwrap();
    stack.adapter_mut().accept_all = true;

    let connector = stack.get_socket(Domain::Ipv4, Protocol::Tcp).unwrap();
    stack.bind(connector, true, 0).unwrap();
    stack.tcp_connect(connector, loopback(port)).unwrap();

    tick_until(&mut stack, |s| !s.adapter().accepted.is_empty());
    let accepted_id = stack.adapter().accepted[0].1;

    // server-initiated graceful close: accepted -> Shutdown, sends FIN to connector.
    stack.close(accepted_id, false).unwrap();

    tick_until(&mut stack, |s| s.adapter().events.contains(&(connector, TcpIpEvent::TcpFinReceived)));

    // connector has seen the peer's FIN; closing it now should report TCP_CLOSED, not TCP_RESET,
    // since the socket is already `Finished`, not `Connected`.
    stack.close(connector, false).unwrap();
    assert!(stack.adapter().events.contains(&(connector, TcpIpEvent::TcpClosed)));

    // connector's own close drives its FIN to the peer, which lets `accepted` drain to EOF.
    tick_until(&mut stack, |s| s.adapter().events.contains(&(accepted_id, TcpIpEvent::TcpClosed)));

    assert_eq!(
        stack.adapter().events.iter().filter(|(id, _)| *id == connector).count(),
        2,
        "connector should see exactly TCP_FIN_RECEIVED then TCP_CLOSED"
    );
    assert_eq!(
        stack.adapter().events.iter().filter(|(id, _)| *id == accepted_id).count(),
        1,
        "accepted should see exactly one TCP_CLOSED"
    );
}

#[test]
fn udp_datagram_loopback() {
    let mut a = new_stack();
    let mut b = new_stack();

    let id_a = a.get_socket(Domain::Ipv4, Protocol::Udp).unwrap();
    let port_a = a.bind(id_a, true, 0).unwrap();

    let id_b = b.get_socket(Domain::Ipv4, Protocol::Udp).unwrap();
    let port_b = b.bind(id_b, true, 0).unwrap();

    b.udp_transmit(id_b, Some(b"ping"), loopback(port_a), 4).unwrap();

    tick_until(&mut a, |s| !s.adapter().received.is_empty());
    let (from, remote, data) = &a.adapter().received[0];
    assert_eq!(*from, id_a);
    assert_eq!(remote.port(), port_b);
    assert_eq!(data, b"ping");
}
