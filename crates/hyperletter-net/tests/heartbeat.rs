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

/// S6: with a short heartbeat interval and no application traffic, two
/// otherwise-idle peers must keep their connection `Ready` past the idle
/// timeout — heartbeats actually reaching the wire is what prevents both
/// sides from tripping `DisconnectReason::Idle`.
#[test]
fn heartbeats_keep_an_otherwise_idle_connection_alive() {
    let addr = loopback(27920);

    let server = UnicastSocket::new(UnicastSocketOptions {
        node_id: NodeId::new(),
        heartbeat_interval: Duration::from_millis(50),
        idle_timeout: Duration::from_millis(200),
        ..Default::default()
    })
    .unwrap();
    server.listen(addr).unwrap();

    let client = UnicastSocket::new(UnicastSocketOptions {
        node_id: NodeId::new(),
        heartbeat_interval: Duration::from_millis(50),
        idle_timeout: Duration::from_millis(200),
        ..Default::default()
    })
    .unwrap();
    client.connect(addr);

    wait_for(&server, |ev| matches!(ev, SocketEvent::PeerReady { .. }));
    wait_for(&client, |ev| matches!(ev, SocketEvent::PeerReady { .. }));

    // Send nothing for several times the idle timeout. Without heartbeats
    // actually being flushed, both sides would disconnect with
    // `DisconnectReason::Idle` well inside this window.
    let deadline = std::time::Instant::now() + Duration::from_millis(800);
    while std::time::Instant::now() < deadline {
        match server.recv_event_timeout(Duration::from_millis(50)) {
            Ok(SocketEvent::PeerDown { .. }) => panic!("server should not see the peer go idle"),
            Ok(SocketEvent::Received { .. }) => panic!("a Heartbeat must never surface as Received"),
            _ => {}
        }
        match client.recv_event_timeout(Duration::from_millis(50)) {
            Ok(SocketEvent::PeerDown { .. }) => panic!("client should not see the peer go idle"),
            Ok(SocketEvent::Received { .. }) => panic!("a Heartbeat must never surface as Received"),
            _ => {}
        }
    }
}
