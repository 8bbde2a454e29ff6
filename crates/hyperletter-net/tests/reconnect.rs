use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use hyperletter_net::{NodeId, SocketEvent, UnicastSocket, UnicastSocketOptions};

fn loopback(port: u16) -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
}

fn wait_for<F>(socket: &UnicastSocket, mut matches: F) -> SocketEvent
where
    F: FnMut(&SocketEvent) -> bool,
{
    for _ in 0..400 {
        if let Ok(ev) = socket.recv_event_timeout(Duration::from_millis(50)) {
            if matches(&ev) {
                return ev;
            }
        }
    }
    panic!("timed out waiting for expected event");
}

/// Dropping and rebinding the listener forces the client's outbound
/// connection to fail and then succeed again on the fleet's reconnect
/// cadence.
#[test]
fn outbound_connection_reconnects_after_listener_restarts() {
    let addr = loopback(27903);

    let client = UnicastSocket::new(UnicastSocketOptions {
        node_id: NodeId::new(),
        reconnect_interval: Duration::from_millis(100),
        ..Default::default()
    })
    .unwrap();
    client.connect(addr);

    // No listener yet: the client keeps retrying without panicking or
    // emitting a spurious event.
    assert!(matches!(
        client.recv_event_timeout(Duration::from_millis(300)),
        Err(crossbeam_channel::RecvTimeoutError::Timeout)
    ));

    let server = UnicastSocket::new(UnicastSocketOptions { node_id: NodeId::new(), ..Default::default() }).unwrap();
    server.listen(addr).unwrap();

    wait_for(&client, |ev| matches!(ev, SocketEvent::PeerReady { .. }));
    wait_for(&server, |ev| matches!(ev, SocketEvent::PeerReady { .. }));
}
