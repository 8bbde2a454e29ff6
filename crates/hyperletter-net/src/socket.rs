use std::net::SocketAddr;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, unbounded};
use mio::Token;
use tracing::{debug, info};

use crate::channel::DisconnectReason;
use crate::fleet::{ChannelFleet, FleetEvent};
use crate::letter::{Letter, NodeId, Options};

const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(15);
const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_secs(2);
const POLL_TIMEOUT: Duration = Duration::from_millis(100);

#[derive(Clone, Debug)]
pub struct UnicastSocketOptions {
    pub node_id: NodeId,
    pub heartbeat_interval: Duration,
    pub idle_timeout: Duration,
    pub reconnect_interval: Duration,
}

impl Default for UnicastSocketOptions {
    fn default() -> Self {
        Self {
            node_id: NodeId::new(),
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            reconnect_interval: DEFAULT_RECONNECT_INTERVAL,
        }
    }
}

/// A peer connection's externally meaningful identity: its assigned token
/// plus, once the handshake completes, the [`NodeId`] it announced.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PeerHandle {
    pub token: Token,
    pub addr: SocketAddr,
}

/// Event delivered to a [`UnicastSocket`] caller.
#[derive(Clone, Debug, PartialEq)]
pub enum SocketEvent {
    Accepted { peer: PeerHandle },
    PeerReady { peer: PeerHandle, remote: NodeId },
    /// A `User`/`Batch` letter we sent is fully off our hands: its frame hit
    /// the wire (no ack requested) or the peer's matching `Ack` arrived.
    Sent { peer: PeerHandle, letter: Letter },
    Received { peer: PeerHandle, letter: Letter },
    /// A letter queued on `peer` was drained unsent as that channel tore
    /// down. Unless the letter carries `Options::SILENT_DISCARD`, it has
    /// already been resubmitted through the normal routing policy by the
    /// time this fires — see [`route`].
    FailedToSend { peer: PeerHandle, letter: Letter },
    PeerDown { peer: PeerHandle, reason: DisconnectReason },
    /// A non-multicast, non-`SilentDiscard` letter was sent while not one
    /// single channel was registered to ever carry it (as opposed to one
    /// existing but not yet `Ready` — that case is buffered, not failed).
    NotDeliverable { letter: Letter },
}

enum Command {
    Listen { addr: SocketAddr, reply: Sender<std::io::Result<Token>> },
    Connect { addr: SocketAddr, reply: Sender<Token> },
    Send { letter: Letter },
    SendTo { token: Token, letter: Letter },
    Disconnect { token: Token },
    Shutdown,
}

/// Dispatches letters across every `Ready` peer connection using round-robin
/// routing, or to every `Ready` peer at once when `Options::MULTICAST` is
/// set. Drives all socket IO on a single background thread; callers
/// interact with it purely through channels, so `Channel`/`ChannelFleet`
/// state is never touched from more than one thread.
pub struct UnicastSocket {
    commands: Sender<Command>,
    events: Receiver<SocketEvent>,
    worker: Option<JoinHandle<()>>,
}

impl UnicastSocket {
    pub fn new(options: UnicastSocketOptions) -> std::io::Result<Self> {
        let (cmd_tx, cmd_rx) = unbounded();
        let (evt_tx, evt_rx) = unbounded();

        let fleet = ChannelFleet::new(options.node_id, options.heartbeat_interval, options.idle_timeout)?
            .with_reconnect_interval(options.reconnect_interval);

        let worker = std::thread::Builder::new()
            .name("hyperletter-reactor".into())
            .spawn(move || run_reactor(fleet, cmd_rx, evt_tx))
            .expect("failed to spawn hyperletter reactor thread");

        Ok(Self { commands: cmd_tx, events: evt_rx, worker: Some(worker) })
    }

    pub fn listen(&self, addr: SocketAddr) -> std::io::Result<Token> {
        let (reply, rx) = unbounded();
        if self.commands.send(Command::Listen { addr, reply }).is_err() {
            return Err(std::io::Error::other("hyperletter reactor thread is gone"));
        }
        rx.recv().unwrap_or_else(|_| Err(std::io::Error::other("hyperletter reactor thread dropped the reply")))
    }

    pub fn connect(&self, addr: SocketAddr) -> Token {
        let (reply, rx) = unbounded();
        let _ = self.commands.send(Command::Connect { addr, reply });
        rx.recv().unwrap_or(Token(usize::MAX))
    }

    /// Routes `letter` to one `Ready` peer (round-robin), or to all of them
    /// if `Options::MULTICAST` is set. Buffered on the reactor thread if no
    /// peer is currently `Ready`.
    pub fn send(&self, letter: Letter) {
        let _ = self.commands.send(Command::Send { letter });
    }

    pub fn send_to(&self, token: Token, letter: Letter) {
        let _ = self.commands.send(Command::SendTo { token, letter });
    }

    pub fn disconnect(&self, token: Token) {
        let _ = self.commands.send(Command::Disconnect { token });
    }

    pub fn events(&self) -> &Receiver<SocketEvent> {
        &self.events
    }

    pub fn recv_event(&self) -> Option<SocketEvent> {
        self.events.recv().ok()
    }

    pub fn recv_event_timeout(&self, timeout: Duration) -> Result<SocketEvent, RecvTimeoutError> {
        self.events.recv_timeout(timeout)
    }

    pub fn try_recv_event(&self) -> Result<SocketEvent, TryRecvError> {
        self.events.try_recv()
    }
}

impl Drop for UnicastSocket {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Shutdown);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn run_reactor(mut fleet: ChannelFleet, commands: Receiver<Command>, events: Sender<SocketEvent>) {
    // Round-robin cursor over `fleet.ready_tokens()`, persisted across calls.
    let mut next_route = 0usize;
    // Letters that couldn't be routed because no channel was `Ready`.
    let mut pending: Vec<Letter> = Vec::new();
    // addr lookup for emitting PeerHandle without re-querying the fleet.
    let mut addrs: std::collections::HashMap<Token, SocketAddr> = std::collections::HashMap::new();

    loop {
        loop {
            match commands.try_recv() {
                Ok(Command::Listen { addr, reply }) => {
                    let result = fleet.listen(addr);
                    let _ = reply.send(result);
                }
                Ok(Command::Connect { addr, reply }) => {
                    let token = fleet.connect(addr);
                    addrs.insert(token, addr);
                    let _ = reply.send(token);
                }
                Ok(Command::Send { letter }) => {
                    if let Some(letter) = route(&mut fleet, &mut next_route, &mut pending, letter) {
                        let _ = events.send(SocketEvent::NotDeliverable { letter });
                    }
                }
                Ok(Command::SendTo { token, letter }) => {
                    if let Some(ev) = fleet.send(token, letter) {
                        emit(&events, ev, &addrs);
                    }
                }
                Ok(Command::Disconnect { token }) => {
                    for ev in fleet.disconnect(token, DisconnectReason::Requested) {
                        emit(&events, ev, &addrs);
                    }
                }
                Ok(Command::Shutdown) => return,
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => return,
            }
        }

        match fleet.poll(POLL_TIMEOUT) {
            Ok(fleet_events) => {
                for ev in fleet_events {
                    if let FleetEvent::Accept { stream, peer_addr, .. } = &ev {
                        addrs.insert(*stream, *peer_addr);
                    }
                    if !pending.is_empty() && matches!(ev, FleetEvent::Established { .. }) {
                        drain_pending(&mut fleet, &mut next_route, &mut pending);
                    }
                    // Re-route a letter that failed on its channel before its
                    // own teardown finishes, same policy as a fresh `Send`.
                    // `SilentDiscard` letters are simply dropped, never retried.
                    if let FleetEvent::FailedToSend { letter, .. } = &ev {
                        if !letter.options.contains(Options::SILENT_DISCARD) {
                            if let Some(letter) = route(&mut fleet, &mut next_route, &mut pending, letter.clone()) {
                                let _ = events.send(SocketEvent::NotDeliverable { letter });
                            }
                        }
                    }
                    emit(&events, ev, &addrs);
                }
            }
            Err(err) => {
                debug!(%err, "poll error, reactor shutting down");
                return;
            }
        }
    }
}

/// Routes one letter per the dispatcher's policy (§4.7): multicast to every
/// `Ready` channel, or round-robin to one. When nothing is `Ready`:
/// `SilentDiscard` letters are dropped, and any other letter is buffered to
/// retry once a channel becomes `Ready` — *unless* not one channel is even
/// registered to eventually carry it, in which case it's handed back to the
/// caller as `NotDeliverable` (SPEC_FULL.md §9) instead of buffered forever.
fn route(
    fleet: &mut ChannelFleet,
    next_route: &mut usize,
    pending: &mut Vec<Letter>,
    letter: Letter,
) -> Option<Letter> {
    let multicast = letter.options.contains(Options::MULTICAST);
    let ready = fleet.ready_tokens();

    if ready.is_empty() {
        if letter.options.contains(Options::SILENT_DISCARD) {
            debug!("no ready channel, silently discarding letter");
        } else if multicast || fleet.has_any_channel() {
            debug!("no ready channel, buffering letter");
            pending.push(letter);
        } else {
            debug!("no channel registered at all, letter is not deliverable");
            return Some(letter);
        }
        return None;
    }

    // `token` was just sampled as Ready above, so `Channel::send` rejecting
    // it here can't happen on this single-threaded reactor.
    if multicast {
        for token in ready {
            let rejected = fleet.send(token, letter.clone());
            debug_assert!(rejected.is_none(), "just-ready channel rejected a send");
        }
    } else {
        let token = ready[*next_route % ready.len()];
        *next_route = next_route.wrapping_add(1);
        let rejected = fleet.send(token, letter);
        debug_assert!(rejected.is_none(), "just-ready channel rejected a send");
    }
    None
}

fn drain_pending(fleet: &mut ChannelFleet, next_route: &mut usize, pending: &mut Vec<Letter>) {
    let backlog = std::mem::take(pending);
    info!(count = backlog.len(), "channel became ready, draining buffered letters");
    for letter in backlog {
        // Something just became Ready, so re-buffering (rather than ever
        // reporting NotDeliverable here) is the only possible outcome.
        let _ = route(fleet, next_route, pending, letter);
    }
}

fn emit(events: &Sender<SocketEvent>, ev: FleetEvent, addrs: &std::collections::HashMap<Token, SocketAddr>) {
    let peer_for = |token: Token| PeerHandle { token, addr: addrs.get(&token).copied().unwrap_or_else(|| {
        SocketAddr::new(std::net::IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED), 0)
    }) };

    let out = match ev {
        FleetEvent::Accept { stream, peer_addr, .. } => {
            SocketEvent::Accepted { peer: PeerHandle { token: stream, addr: peer_addr } }
        }
        FleetEvent::Established { token, remote } => SocketEvent::PeerReady { peer: peer_for(token), remote },
        FleetEvent::Sent { token, letter } => SocketEvent::Sent { peer: peer_for(token), letter },
        FleetEvent::Delivered { token, letter } => SocketEvent::Received { peer: peer_for(token), letter },
        FleetEvent::FailedToSend { token, letter } => SocketEvent::FailedToSend { peer: peer_for(token), letter },
        FleetEvent::Disconnected { token, reason } => SocketEvent::PeerDown { peer: peer_for(token), reason },
    };
    let _ = events.send(out);
}
