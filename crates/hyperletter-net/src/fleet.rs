use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use hyperletter_timing::Repeater;
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token};
use tracing::{debug, error, warn};

use crate::channel::{Channel, ChannelOutcome, ChannelState, DisconnectReason};
use crate::letter::{Letter, NodeId};

const RX_BUF_SIZE: usize = 32 * 1024;

enum Entry {
    Listener(TcpListener),
    Stream { stream: TcpStream, channel: Channel, writable_armed: bool },
}

/// Event emitted by [`ChannelFleet::poll`] for one notable occurrence.
#[derive(Debug, Clone, PartialEq)]
pub enum FleetEvent {
    Accept { listener: Token, stream: Token, peer_addr: SocketAddr },
    Established { token: Token, remote: NodeId },
    Sent { token: Token, letter: Letter },
    Delivered { token: Token, letter: Letter },
    /// A queued `User`/`Batch` letter was drained unsent as its channel tore
    /// down; emitted once per such letter, immediately before the matching
    /// `Disconnected`.
    FailedToSend { token: Token, letter: Letter },
    Disconnected { token: Token, reason: DisconnectReason },
}

/// Registry of every socket (listeners, inbound streams, outbound streams)
/// backing one [`crate::socket::UnicastSocket`], driven by a single
/// `mio::Poll`.
///
/// Mirrors a connection manager that keeps everything on one poll-loop
/// thread: no connection gets its own OS thread, so channel state never
/// needs a lock.
pub struct ChannelFleet {
    poll: Poll,
    events: Events,
    entries: Vec<(Token, Entry)>,
    next_token: usize,
    local_node_id: NodeId,
    heartbeat_interval: Duration,
    idle_timeout: Duration,
    reconnector: Repeater,
    /// Outbound connections awaiting a (re)dial attempt. `None` for one
    /// that's never connected before; `Some(channel)` for one persisted
    /// across a transient disconnect (§4.5) — `attempt_reconnects` resets
    /// its queue state in place rather than building a fresh `Channel`.
    to_reconnect: Vec<(Token, SocketAddr, Option<Channel>)>,
    rx_buf: Vec<u8>,
}

impl ChannelFleet {
    pub fn new(local_node_id: NodeId, heartbeat_interval: Duration, idle_timeout: Duration) -> io::Result<Self> {
        Ok(Self {
            poll: Poll::new()?,
            events: Events::with_capacity(128),
            entries: Vec::new(),
            next_token: 0,
            local_node_id,
            heartbeat_interval,
            idle_timeout,
            reconnector: Repeater::every(Duration::from_secs(2)),
            to_reconnect: Vec::new(),
            rx_buf: vec![0u8; RX_BUF_SIZE],
        })
    }

    pub fn with_reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnector = Repeater::every(interval);
        self
    }

    fn allot_token(&mut self) -> Token {
        let token = Token(self.next_token);
        self.next_token += 1;
        token
    }

    fn position(&self, token: Token) -> Option<usize> {
        self.entries.iter().position(|(t, _)| *t == token)
    }

    pub fn listen(&mut self, addr: SocketAddr) -> io::Result<Token> {
        let mut listener = TcpListener::bind(addr)?;
        let token = self.allot_token();
        self.poll.registry().register(&mut listener, token, Interest::READABLE)?;
        self.entries.push((token, Entry::Listener(listener)));
        Ok(token)
    }

    /// Starts (or schedules, if the initial attempt fails) an outbound
    /// connection. Returns the token immediately; a `Disconnected` event is
    /// never emitted for connects still pending their first attempt.
    pub fn connect(&mut self, addr: SocketAddr) -> Token {
        let token = self.allot_token();
        self.to_reconnect.push((token, addr, None));
        self.reconnector.force_fire();
        self.attempt_reconnects();
        token
    }

    fn attempt_reconnects(&mut self) {
        if !self.reconnector.fired() {
            return;
        }
        let mut i = self.to_reconnect.len();
        while i != 0 {
            i -= 1;
            let token = self.to_reconnect[i].0;
            let addr = self.to_reconnect[i].1;
            match TcpStream::connect(addr) {
                Ok(mut stream) => {
                    // Armed READABLE | WRITABLE from the start: `on_connected`/
                    // `reconnect` below immediately queues our Initialize
                    // letter, and nothing else will ever prompt a first write
                    // otherwise.
                    if let Err(err) = self.poll.registry().register(
                        &mut stream,
                        token,
                        Interest::READABLE | Interest::WRITABLE,
                    ) {
                        warn!(%addr, %err, "couldn't register outbound stream");
                        continue;
                    }
                    let (_, _, persisted) = self.to_reconnect.swap_remove(i);
                    let channel = match persisted {
                        Some(mut channel) => {
                            channel.reconnect();
                            channel
                        }
                        None => {
                            let mut channel =
                                Channel::dialing(addr, self.local_node_id, self.heartbeat_interval, self.idle_timeout);
                            channel.on_connected();
                            channel
                        }
                    };
                    self.entries.push((token, Entry::Stream { stream, channel, writable_armed: true }));
                    debug!(%addr, ?token, "outbound connection dialed");
                }
                Err(err) => {
                    debug!(%addr, %err, "outbound connect attempt failed, will retry");
                }
            }
        }
    }

    /// Queues `letter` on `token`'s channel. Returns `Some(FleetEvent::FailedToSend)`
    /// immediately — without ever reaching the wire — if that channel isn't
    /// `Ready` (§4.4); the caller decides whether to re-route it.
    pub fn send(&mut self, token: Token, letter: Letter) -> Option<FleetEvent> {
        let Some(i) = self.position(token) else {
            error!(?token, "send to unknown token");
            return None;
        };
        if let (_, Entry::Stream { stream, channel, writable_armed }) = &mut self.entries[i] {
            let rejected = match channel.send(letter) {
                Some(ChannelOutcome::FailedToSend(letter)) => Some(FleetEvent::FailedToSend { token, letter }),
                Some(other) => unreachable!("Channel::send never returns {other:?}"),
                None => None,
            };
            Self::arm_writable_for(&self.poll, stream, token, writable_armed);
            rejected
        } else {
            error!(?token, "cannot send on a listener token");
            None
        }
    }

    fn arm_writable_for(poll: &Poll, stream: &mut TcpStream, token: Token, writable_armed: &mut bool) {
        if !*writable_armed {
            if poll
                .registry()
                .reregister(stream, token, Interest::READABLE | Interest::WRITABLE)
                .is_ok()
            {
                *writable_armed = true;
            }
        }
    }

    /// Readable/ready channels, for round-robin or multicast routing.
    pub fn ready_tokens(&self) -> Vec<Token> {
        self.entries
            .iter()
            .filter_map(|(t, e)| match e {
                Entry::Stream { channel, .. } if channel.is_ready() => Some(*t),
                _ => None,
            })
            .collect()
    }

    /// Whether any channel — ready or still handshaking/reconnecting —
    /// exists at all, registered or queued to redial. Used to distinguish
    /// "nothing is `Ready` yet, but something might become so" from "there
    /// is nothing out there to ever become `Ready`".
    pub fn has_any_channel(&self) -> bool {
        !self.to_reconnect.is_empty() || self.entries.iter().any(|(_, e)| matches!(e, Entry::Stream { .. }))
    }

    /// Removes `index`'s socket from `entries`. Returns the departing
    /// `Channel` alongside its addr if it was Outbound — per §4.5 that
    /// object persists across a transient disconnect, so the caller decides
    /// whether to keep it alive for a future reconnect attempt or let it
    /// drop (a `Requested` disconnect never reconnects; an Inbound channel
    /// never does either).
    fn tear_down(&mut self, index: usize) -> Option<(SocketAddr, Channel)> {
        let (_, entry) = self.entries.swap_remove(index);
        match entry {
            Entry::Stream { mut stream, channel, .. } => {
                let _ = self.poll.registry().deregister(&mut stream);
                let _ = stream.shutdown(std::net::Shutdown::Both);
                if channel.direction() == crate::channel::Direction::Outbound {
                    Some((channel.addr, channel))
                } else {
                    None
                }
            }
            Entry::Listener(mut listener) => {
                let _ = self.poll.registry().deregister(&mut listener);
                None
            }
        }
    }

    /// Drains the departing channel's outstanding ack-required letters as
    /// `FailedToSend`, tears the socket down, and — for an Outbound channel
    /// disconnected for any reason other than a locally [`DisconnectReason::Requested`]
    /// one — keeps the `Channel` object alive in `to_reconnect` so a
    /// successful redial can reuse it (§4.5) instead of building a fresh one.
    fn disconnect_index(&mut self, index: usize, reason: DisconnectReason, out: &mut Vec<FleetEvent>) {
        let token = self.entries[index].0;
        if let (_, Entry::Stream { channel, .. }) = &mut self.entries[index] {
            for outcome in channel.shutdown(reason) {
                let ChannelOutcome::FailedToSend(letter) = outcome else {
                    unreachable!("Channel::shutdown only returns FailedToSend outcomes");
                };
                out.push(FleetEvent::FailedToSend { token, letter });
            }
        }
        if let Some((addr, channel)) = self.tear_down(index) {
            if reason != DisconnectReason::Requested {
                self.to_reconnect.push((token, addr, Some(channel)));
            }
        }
        out.push(FleetEvent::Disconnected { token, reason });
    }

    pub fn disconnect(&mut self, token: Token, reason: DisconnectReason) -> Vec<FleetEvent> {
        let mut out = Vec::new();
        if let Some(i) = self.position(token) {
            self.disconnect_index(i, reason, &mut out);
        }
        out
    }

    /// Drives one non-blocking poll iteration: reconnect attempts, mio
    /// readiness, and per-channel timer ticks (heartbeats, idle detection).
    pub fn poll(&mut self, timeout: Duration) -> io::Result<Vec<FleetEvent>> {
        self.attempt_reconnects();

        self.poll.poll(&mut self.events, Some(timeout))?;
        let mut out = Vec::new();

        let ready: Vec<Token> = self.events.iter().map(|e| e.token()).collect();
        for token in ready {
            self.service(token, &mut out);
        }

        self.tick_all(&mut out);
        Ok(out)
    }

    fn service(&mut self, token: Token, out: &mut Vec<FleetEvent>) {
        let Some(i) = self.position(token) else { return };
        if matches!(self.entries[i].1, Entry::Listener(_)) {
            self.accept_loop(i, token, out);
        } else {
            self.service_stream(i, out);
        }
    }

    fn accept_loop(&mut self, index: usize, listener_token: Token, out: &mut Vec<FleetEvent>) {
        loop {
            let accepted = match &mut self.entries[index] {
                (_, Entry::Listener(listener)) => listener.accept(),
                (_, Entry::Stream { .. }) => return,
            };
            match accepted {
                Ok((mut stream, peer_addr)) => {
                    let token = self.allot_token();
                    // `Channel::accepted` queues our Initialize letter immediately,
                    // so arm WRITABLE from the start (see the outbound path above).
                    if let Err(err) = self.poll.registry().register(
                        &mut stream,
                        token,
                        Interest::READABLE | Interest::WRITABLE,
                    ) {
                        warn!(%peer_addr, %err, "couldn't register accepted stream");
                        continue;
                    }
                    let channel =
                        Channel::accepted(peer_addr, self.local_node_id, self.heartbeat_interval, self.idle_timeout);
                    self.entries.push((token, Entry::Stream { stream, channel, writable_armed: true }));
                    out.push(FleetEvent::Accept { listener: listener_token, stream: token, peer_addr });
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) => {
                    warn!(%err, "accept failed");
                    break;
                }
            }
        }
    }

    fn service_stream(&mut self, index: usize, out: &mut Vec<FleetEvent>) {
        let token = self.entries[index].0;
        let mut disconnect_reason = None;

        if let (_, Entry::Stream { stream, channel, .. }) = &mut self.entries[index] {
            disconnect_reason = Self::drain_readable(stream, channel, &mut self.rx_buf, token, out);
        }

        if disconnect_reason.is_none() {
            if let (_, Entry::Stream { stream, channel, writable_armed }) = &mut self.entries[index] {
                match channel.on_writable(stream) {
                    Ok(outcomes) => {
                        for outcome in outcomes {
                            Self::push_outcome(token, outcome, out);
                        }
                        if !channel.has_pending_writes() && *writable_armed {
                            if self.poll.registry().reregister(stream, token, Interest::READABLE).is_ok() {
                                *writable_armed = false;
                            }
                        }
                    }
                    Err(reason) => disconnect_reason = Some(reason),
                }
            }
        }

        if let Some(reason) = disconnect_reason {
            self.disconnect_index(index, reason, out);
        }
    }

    fn drain_readable(
        stream: &mut TcpStream,
        channel: &mut Channel,
        rx_buf: &mut [u8],
        token: Token,
        out: &mut Vec<FleetEvent>,
    ) -> Option<DisconnectReason> {
        use std::io::Read;
        loop {
            match stream.read(rx_buf) {
                Ok(0) => return Some(DisconnectReason::Remote),
                Ok(n) => match channel.on_readable(&rx_buf[..n]) {
                    Ok(outcomes) => {
                        for outcome in outcomes {
                            Self::push_outcome(token, outcome, out);
                        }
                    }
                    Err(reason) => return Some(reason),
                },
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return None,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(_) => return Some(DisconnectReason::Socket),
            }
        }
    }

    fn push_outcome(token: Token, outcome: ChannelOutcome, out: &mut Vec<FleetEvent>) {
        match outcome {
            ChannelOutcome::Established(remote) => out.push(FleetEvent::Established { token, remote }),
            ChannelOutcome::Sent(letter) => out.push(FleetEvent::Sent { token, letter }),
            ChannelOutcome::Delivered(letter) => out.push(FleetEvent::Delivered { token, letter }),
            ChannelOutcome::FailedToSend(letter) => out.push(FleetEvent::FailedToSend { token, letter }),
            ChannelOutcome::Disconnected(reason) => out.push(FleetEvent::Disconnected { token, reason }),
        }
    }

    fn tick_all(&mut self, out: &mut Vec<FleetEvent>) {
        let mut to_disconnect = Vec::new();
        for (i, (token, entry)) in self.entries.iter_mut().enumerate() {
            let Entry::Stream { stream, channel, writable_armed } = entry else { continue };
            if let Some(outcome) = channel.on_tick() {
                if let ChannelOutcome::Disconnected(reason) = outcome {
                    to_disconnect.push((i, reason));
                    continue;
                }
                Self::push_outcome(*token, outcome, out);
            }
            // A tick may have just enqueued a heartbeat; WRITABLE was very
            // likely deregistered already (§4.4's steady-state drain), so
            // nothing would ever prompt mio to let it flush otherwise.
            if channel.has_pending_writes() {
                Self::arm_writable_for(&self.poll, stream, *token, writable_armed);
            }
        }
        for (i, reason) in to_disconnect.into_iter().rev() {
            self.disconnect_index(i, reason, out);
        }
    }

    /// The channel's current state, whether it's actively connected or
    /// sitting in `to_reconnect` between a transient disconnect and its next
    /// redial attempt. `None` only for a listener token, or an Outbound
    /// token whose very first dial has never yet completed.
    pub fn state_of(&self, token: Token) -> Option<ChannelState> {
        if let Some(i) = self.position(token) {
            return match &self.entries[i].1 {
                Entry::Stream { channel, .. } => Some(channel.state()),
                Entry::Listener(_) => None,
            };
        }
        self.to_reconnect.iter().find(|(t, ..)| *t == token).and_then(|(_, _, channel)| channel.as_ref().map(Channel::state))
    }
}
