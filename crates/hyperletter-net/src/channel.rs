use std::collections::VecDeque;
use std::io::Write;
use std::net::SocketAddr;
use std::time::Duration;

use hyperletter_timing::Repeater;
use tracing::{debug, warn};

use crate::letter::{Letter, LetterType, NodeId, Options};
use crate::receiver::LetterReceiver;
use crate::transmitter::LetterTransmitter;
use crate::wire;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

/// Why a channel tore down. Carried out through [`ChannelOutcome::Disconnected`]
/// so the fleet can decide whether to retry an outbound connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DisconnectReason {
    /// A hard I/O error on the socket (not a clean close).
    Socket,
    /// The peer closed the connection in an orderly way (a clean EOF).
    Remote,
    /// A frame failed to decode.
    Malformed,
    /// The peer did something the protocol doesn't allow (e.g. acked a
    /// letter nothing sent).
    ProtocolViolation,
    /// No bytes arrived within the idle timeout.
    Idle,
    /// Local shutdown was requested.
    Requested,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelState {
    Disconnected,
    Connecting,
    HandshakePending,
    Ready,
    ShuttingDown,
}

/// Marks which outbound frame a transmitter slot corresponds to, so that
/// once [`LetterTransmitter::write_ready`] reports a frame fully flushed,
/// `Channel` knows what just finished: a local `Ack` — the trigger for
/// releasing the matching entry out of `incoming_ack_queue` — or an
/// application frame, carried so a non-ack-required `User`/`Batch` can raise
/// `Sent` the moment its bytes are actually on the wire.
enum OutboundTag {
    LocalAck,
    Frame(Letter),
}

/// Protocol state machine for one peer connection.
///
/// `Channel` owns no socket; callers feed it bytes read off the wire via
/// [`Self::on_readable`] and give it a writer to drain queued frames into via
/// [`Self::on_writable`]. This keeps every byte of actual protocol logic
/// (handshake counting, ack bookkeeping, heartbeat cadence) testable without
/// a real TCP connection.
pub struct Channel {
    pub addr: SocketAddr,
    direction: Direction,
    state: ChannelState,
    local_node_id: NodeId,
    remote_node_id: Option<NodeId>,
    /// Counts toward 2: the peer's `Initialize` received, and the peer's
    /// `Ack` of our own `Initialize` received. Reaching 2 flips to `Ready`.
    init_count: u8,

    receiver: LetterReceiver,
    transmitter: LetterTransmitter,
    outbound_tags: VecDeque<OutboundTag>,

    /// Our own `Initialize`/`User`/`Batch` letters awaiting the peer's ack,
    /// in send order — the protocol has no selective ack, so the oldest
    /// outstanding send is always the next one acked.
    pending_ack_queue: VecDeque<Letter>,
    /// Peer `User`/`Batch` letters that arrived with `Options::ACK` and are
    /// held back until our local `Ack` for them is confirmed flushed.
    incoming_ack_queue: VecDeque<Letter>,

    heartbeat: Repeater,
    idle_timeout: Duration,
    idle: Repeater,
    saw_activity: bool,
    /// Set by any send or receive since the last heartbeat tick; distinct
    /// from `saw_activity`, which tracks the longer `idle_timeout` window.
    /// Checked (and cleared) only at the heartbeat cadence, so it never
    /// interferes with dead-peer detection.
    activity_since_tick: bool,
}

/// An event produced by driving a [`Channel`] forward.
#[derive(Clone, Debug, PartialEq)]
pub enum ChannelOutcome {
    /// The handshake completed; the channel is now `Ready`.
    Established(NodeId),
    /// A `User`/`Batch` letter we sent is fully off our hands: either its
    /// frame finished writing (no ack requested) or the peer's matching
    /// `Ack` just arrived.
    Sent(Letter),
    /// An application letter may now be handed to the caller.
    Delivered(Letter),
    /// A queued `User`/`Batch` letter was drained unsent on shutdown.
    FailedToSend(Letter),
    /// The channel tore down and will not recover on its own.
    Disconnected(DisconnectReason),
}

impl Channel {
    fn new(
        direction: Direction,
        addr: SocketAddr,
        local_node_id: NodeId,
        state: ChannelState,
        heartbeat_interval: Duration,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            addr,
            direction,
            state,
            local_node_id,
            remote_node_id: None,
            init_count: 0,
            receiver: LetterReceiver::new(),
            transmitter: LetterTransmitter::new(),
            outbound_tags: VecDeque::new(),
            pending_ack_queue: VecDeque::new(),
            incoming_ack_queue: VecDeque::new(),
            heartbeat: Repeater::every(heartbeat_interval),
            idle_timeout,
            idle: Repeater::every(idle_timeout),
            saw_activity: false,
            activity_since_tick: false,
        }
    }

    /// A channel for a connection we dialed; TCP connect is already
    /// in flight when this is constructed.
    pub fn dialing(
        addr: SocketAddr,
        local_node_id: NodeId,
        heartbeat_interval: Duration,
        idle_timeout: Duration,
    ) -> Self {
        Self::new(
            Direction::Outbound,
            addr,
            local_node_id,
            ChannelState::Connecting,
            heartbeat_interval,
            idle_timeout,
        )
    }

    /// A channel for a connection accepted on a listener; the socket is
    /// already connected, so the handshake can start immediately.
    pub fn accepted(
        addr: SocketAddr,
        local_node_id: NodeId,
        heartbeat_interval: Duration,
        idle_timeout: Duration,
    ) -> Self {
        let mut channel = Self::new(
            Direction::Inbound,
            addr,
            local_node_id,
            ChannelState::HandshakePending,
            heartbeat_interval,
            idle_timeout,
        );
        channel.send_initialize();
        channel
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn remote_node_id(&self) -> Option<NodeId> {
        self.remote_node_id
    }

    pub fn is_ready(&self) -> bool {
        self.state == ChannelState::Ready
    }

    /// Call once mio reports the outbound connect completed.
    pub fn on_connected(&mut self) {
        debug_assert_eq!(self.state, ChannelState::Connecting);
        self.state = ChannelState::HandshakePending;
        self.send_initialize();
    }

    /// Resets queue and protocol state for a fresh TCP connection on an
    /// Outbound channel that persisted across a transient disconnect (§4.5),
    /// then starts a new handshake exactly as a brand new `Connected()`
    /// would — the object itself is reused rather than rebuilt.
    pub fn reconnect(&mut self) {
        debug_assert_eq!(self.direction, Direction::Outbound);
        self.state = ChannelState::Connecting;
        self.remote_node_id = None;
        self.init_count = 0;
        self.receiver = LetterReceiver::new();
        self.transmitter = LetterTransmitter::new();
        self.outbound_tags.clear();
        self.pending_ack_queue.clear();
        self.incoming_ack_queue.clear();
        self.saw_activity = false;
        self.activity_since_tick = false;
        self.heartbeat = Repeater::every(self.heartbeat.interval());
        self.idle = Repeater::every(self.idle_timeout);
        self.on_connected();
    }

    /// Bypasses the `Ready` gate in [`Self::send`] — the one exception
    /// §4.4 carves out is the handshake's own `Initialize`, queued while
    /// still `Connecting`/`HandshakePending`.
    fn send_initialize(&mut self) {
        self.enqueue(Letter::initialize(self.local_node_id));
    }

    /// Queues a letter for transmission, taking on the ack-tracking
    /// bookkeeping that kind of letter requires.
    ///
    /// Per §4.4, a letter handed to a channel that isn't `Ready` fails
    /// immediately as [`ChannelOutcome::FailedToSend`] instead of queuing —
    /// callers should check [`Self::is_ready`] before sending when they
    /// want to avoid the round-trip, but this guards the invariant either
    /// way. Internal handshake/ack/heartbeat frames go through
    /// [`Self::enqueue`] directly and never hit this gate.
    pub fn send(&mut self, letter: Letter) -> Option<ChannelOutcome> {
        if self.state != ChannelState::Ready {
            return Some(ChannelOutcome::FailedToSend(letter));
        }
        self.enqueue(letter);
        None
    }

    fn enqueue(&mut self, letter: Letter) {
        if letter.requires_ack_delivery() && letter.options.contains(Options::ACK) {
            self.pending_ack_queue.push_back(letter.clone());
        }
        self.transmitter.enqueue(&letter);
        self.outbound_tags.push_back(OutboundTag::Frame(letter));
    }

    fn queue_local_ack(&mut self) {
        let ack = Letter::ack();
        self.transmitter.enqueue(&ack);
        self.outbound_tags.push_back(OutboundTag::LocalAck);
    }

    /// Feeds freshly read bytes through the frame reassembler and advances
    /// the protocol state machine for every complete letter found.
    pub fn on_readable(&mut self, bytes: &[u8]) -> Result<Vec<ChannelOutcome>, DisconnectReason> {
        if bytes.is_empty() {
            return Err(DisconnectReason::Remote);
        }
        self.saw_activity = true;
        self.activity_since_tick = true;
        let letters = self.receiver.feed(bytes).map_err(|err| {
            warn!(%err, addr = %self.addr, "malformed frame");
            DisconnectReason::Malformed
        })?;

        let mut out = Vec::new();
        for letter in letters {
            out.extend(self.handle_letter(letter)?);
        }
        Ok(out)
    }

    fn handle_letter(&mut self, letter: Letter) -> Result<Vec<ChannelOutcome>, DisconnectReason> {
        match letter.kind {
            LetterType::Initialize => {
                let remote = letter.initialize_node_id().ok_or(DisconnectReason::ProtocolViolation)?;
                self.remote_node_id = Some(remote);
                self.queue_local_ack();
                self.bump_init();
                Ok(self.maybe_ready().into_iter().collect())
            }
            LetterType::Ack => {
                let acked = self.pending_ack_queue.pop_front().ok_or_else(|| {
                    warn!(addr = %self.addr, "received Ack with nothing outstanding");
                    DisconnectReason::ProtocolViolation
                })?;
                let mut out = Vec::new();
                if acked.kind == LetterType::Initialize {
                    self.bump_init();
                } else if matches!(acked.kind, LetterType::User | LetterType::Batch) {
                    out.push(ChannelOutcome::Sent(acked));
                }
                out.extend(self.maybe_ready());
                Ok(out)
            }
            // A Batch's parts are themselves fully encoded letter frames;
            // unwrap and deliver each as if it had arrived on its own.
            LetterType::Batch => {
                let requires_ack = letter.options.contains(Options::ACK);
                let mut out = Vec::new();
                for part in &letter.parts {
                    let inner = wire::decode(part).map_err(|err| {
                        warn!(%err, addr = %self.addr, "malformed letter inside Batch");
                        DisconnectReason::Malformed
                    })?;
                    out.extend(self.handle_letter(inner)?);
                }
                if requires_ack {
                    self.queue_local_ack();
                }
                Ok(out)
            }
            LetterType::User => {
                let mut letter = letter;
                letter.remote_node_id = self.remote_node_id;
                if letter.options.contains(Options::ACK) {
                    self.queue_local_ack();
                    self.incoming_ack_queue.push_back(letter);
                    Ok(Vec::new())
                } else {
                    Ok(vec![ChannelOutcome::Delivered(letter)])
                }
            }
            LetterType::Heartbeat => unreachable!("LetterReceiver filters Heartbeat"),
        }
    }

    fn bump_init(&mut self) {
        self.init_count = (self.init_count + 1).min(2);
    }

    fn maybe_ready(&mut self) -> Option<ChannelOutcome> {
        if self.init_count >= 2 && self.state != ChannelState::Ready {
            self.state = ChannelState::Ready;
            let remote = self.remote_node_id.expect("ready without a remote node id");
            debug!(addr = %self.addr, %remote, "channel ready");
            Some(ChannelOutcome::Established(remote))
        } else {
            None
        }
    }

    /// Drains as much of the outbound queue as `writer` accepts right now.
    /// Returns `Delivered` outcomes for any peer letters whose local `Ack`
    /// just finished flushing — the point at which it's safe to hand them
    /// to the caller — and `Sent` outcomes for any of our own non-ack-required
    /// `User`/`Batch` frames that just finished flushing. A `User`/`Batch`
    /// frame sent with `Options::Ack` instead raises `Sent` later, out of
    /// `handle_letter`'s `Ack` arm, once the peer's ack for it arrives.
    pub fn on_writable<W: Write>(&mut self, writer: &mut W) -> Result<Vec<ChannelOutcome>, DisconnectReason> {
        let flushed = self.transmitter.write_ready(writer).map_err(|err| {
            warn!(addr = %self.addr, %err, "write failed");
            DisconnectReason::Socket
        })?;
        if flushed > 0 {
            self.activity_since_tick = true;
        }

        let mut out = Vec::new();
        for _ in 0..flushed {
            match self.outbound_tags.pop_front() {
                Some(OutboundTag::LocalAck) => {
                    if let Some(delivered) = self.incoming_ack_queue.pop_front() {
                        out.push(ChannelOutcome::Delivered(delivered));
                    }
                }
                Some(OutboundTag::Frame(letter)) => {
                    let awaiting_peer_ack = letter.requires_ack_delivery() && letter.options.contains(Options::ACK);
                    if !awaiting_peer_ack && matches!(letter.kind, LetterType::User | LetterType::Batch) {
                        out.push(ChannelOutcome::Sent(letter));
                    }
                }
                None => {}
            }
        }
        Ok(out)
    }

    pub fn has_pending_writes(&self) -> bool {
        !self.transmitter.is_drained()
    }

    /// Drives heartbeat emission and idle-timeout detection. Call on a
    /// regular cadence (the fleet's poll loop timeout) regardless of
    /// readiness events.
    pub fn on_tick(&mut self) -> Option<ChannelOutcome> {
        if self.state != ChannelState::Ready {
            return None;
        }

        if self.heartbeat.fired() {
            // §4.4: activity since the last tick just records a new baseline;
            // a heartbeat is only enqueued for a tick that saw none.
            if self.activity_since_tick {
                self.activity_since_tick = false;
            } else {
                self.send(Letter::heartbeat());
            }
        }

        if self.idle.fired() {
            if self.saw_activity {
                self.saw_activity = false;
            } else {
                self.state = ChannelState::ShuttingDown;
                return Some(ChannelOutcome::Disconnected(DisconnectReason::Idle));
            }
        }
        None
    }

    /// Idempotent. Tears the channel down and drains `pending_ack_queue`,
    /// reporting every still-outstanding `User`/`Batch` letter as
    /// [`ChannelOutcome::FailedToSend`] — `Initialize` is excluded, since
    /// the handshake itself has no application-visible "send" to fail.
    pub fn shutdown(&mut self, reason: DisconnectReason) -> Vec<ChannelOutcome> {
        if self.state == ChannelState::Disconnected {
            return Vec::new();
        }
        if self.state == ChannelState::Ready {
            debug!(addr = %self.addr, ?reason, "channel shutting down");
        }
        self.state = ChannelState::Disconnected;
        self.pending_ack_queue
            .drain(..)
            .filter(|letter| matches!(letter.kind, LetterType::User | LetterType::Batch))
            .map(ChannelOutcome::FailedToSend)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn addr() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 9000)
    }

    fn pair() -> (Channel, Channel) {
        let a = Channel::dialing(addr(), NodeId::new(), Duration::from_secs(1), Duration::from_secs(30));
        let b = Channel::accepted(addr(), NodeId::new(), Duration::from_secs(1), Duration::from_secs(30));
        (a, b)
    }

    /// Pipes whatever `from` has queued to write into `into`'s reader side,
    /// returning outcomes from both sides of the exchange.
    fn relay(from: &mut Channel, into: &mut Channel) -> (Vec<ChannelOutcome>, Vec<ChannelOutcome>) {
        let mut sink = Vec::new();
        let write_outcomes = from.on_writable(&mut sink).unwrap();
        let read_outcomes = if sink.is_empty() { Vec::new() } else { into.on_readable(&sink).unwrap() };
        (write_outcomes, read_outcomes)
    }

    #[test]
    fn handshake_reaches_ready_on_both_sides() {
        let (mut dialer, mut acceptor) = pair();
        dialer.on_connected();

        // Keep shuttling whatever either side has queued until both settle.
        let mut established = (false, false);
        for _ in 0..6 {
            let (_, o1) = relay(&mut acceptor, &mut dialer);
            let (_, o2) = relay(&mut dialer, &mut acceptor);
            established.0 |= o1.iter().any(|o| matches!(o, ChannelOutcome::Established(_)));
            established.1 |= o2.iter().any(|o| matches!(o, ChannelOutcome::Established(_)));
        }

        assert!(dialer.is_ready());
        assert!(acceptor.is_ready());
        assert!(established.0 && established.1);
        assert!(acceptor.remote_node_id().is_some());
        assert!(dialer.remote_node_id().is_some());
    }

    #[test]
    fn ack_required_letter_is_not_delivered_until_local_ack_flushed() {
        let (mut dialer, mut acceptor) = pair();
        dialer.on_connected();
        for _ in 0..4 {
            relay(&mut acceptor, &mut dialer);
            relay(&mut dialer, &mut acceptor);
        }
        assert!(dialer.is_ready() && acceptor.is_ready());

        dialer.send(Letter::user(vec![b"hi".to_vec()], true));
        let mut wire = Vec::new();
        // Flushing our own ack-required frame must not raise Sent yet.
        let outcomes = dialer.on_writable(&mut wire).unwrap();
        assert!(outcomes.is_empty());

        // Before the acceptor has sent anything back, nothing is delivered.
        let outcomes = acceptor.on_readable(&wire).unwrap();
        assert!(outcomes.is_empty());

        // Flushing the acceptor's queued Ack releases the Delivered outcome.
        let mut ack_wire = Vec::new();
        let outcomes = acceptor.on_writable(&mut ack_wire).unwrap();
        assert!(matches!(outcomes.as_slice(), [ChannelOutcome::Delivered(_)]));

        // Only once that Ack reaches the dialer does it observe Sent.
        let outcomes = dialer.on_readable(&ack_wire).unwrap();
        assert!(matches!(
            outcomes.as_slice(),
            [ChannelOutcome::Sent(letter)] if letter.parts == vec![b"hi".to_vec()]
        ));
    }

    #[test]
    fn sent_fires_immediately_for_non_ack_required_letter() {
        let (mut dialer, mut acceptor) = pair();
        dialer.on_connected();
        for _ in 0..4 {
            relay(&mut acceptor, &mut dialer);
            relay(&mut dialer, &mut acceptor);
        }
        assert!(dialer.is_ready());

        dialer.send(Letter::user(vec![b"no-ack-needed".to_vec()], false));
        let mut wire = Vec::new();
        let outcomes = dialer.on_writable(&mut wire).unwrap();
        assert!(matches!(
            outcomes.as_slice(),
            [ChannelOutcome::Sent(letter)] if letter.parts == vec![b"no-ack-needed".to_vec()]
        ));
    }

    #[test]
    fn spurious_ack_is_a_protocol_violation() {
        let mut c = Channel::accepted(addr(), NodeId::new(), Duration::from_secs(1), Duration::from_secs(30));
        let mut sink = Vec::new();
        c.on_writable(&mut sink).unwrap(); // drain the Initialize we sent

        let ack_frame = crate::wire::encode(&Letter::ack());
        // The first Ack legitimately satisfies the Initialize we sent...
        assert!(c.on_readable(&ack_frame).is_ok());
        // ...so a second one has nothing outstanding to match.
        assert_eq!(c.on_readable(&ack_frame), Err(DisconnectReason::ProtocolViolation));
    }

    #[test]
    fn on_tick_is_a_no_op_before_ready() {
        let mut c = Channel::accepted(addr(), NodeId::new(), Duration::from_millis(10), Duration::from_millis(10));
        std::thread::sleep(Duration::from_millis(15));
        assert_eq!(c.on_tick(), None);
    }

    #[test]
    fn idle_with_no_activity_disconnects_once_ready() {
        let (mut dialer, mut acceptor) = pair();
        dialer.on_connected();
        for _ in 0..4 {
            relay(&mut acceptor, &mut dialer);
            relay(&mut dialer, &mut acceptor);
        }
        assert!(dialer.is_ready());

        dialer.idle = Repeater::every(Duration::from_millis(5));
        dialer.saw_activity = false;
        dialer.activity_since_tick = false;
        std::thread::sleep(Duration::from_millis(10));
        // The heartbeat also fires on this tick (enqueuing a frame), but that
        // doesn't count as activity on its own; only inbound bytes reset the
        // idle clock.
        let outcome = dialer.on_tick();
        assert_eq!(outcome, Some(ChannelOutcome::Disconnected(DisconnectReason::Idle)));
    }

    /// §4.4: a tick that saw a send or receive since the previous one just
    /// records a new baseline — no heartbeat frame is queued.
    #[test]
    fn heartbeat_is_suppressed_on_a_tick_with_recent_activity() {
        let (mut dialer, mut acceptor) = pair();
        dialer.on_connected();
        for _ in 0..4 {
            relay(&mut acceptor, &mut dialer);
            relay(&mut dialer, &mut acceptor);
        }
        assert!(dialer.is_ready());

        // The handshake itself flushed frames, so the very next tick should
        // just clear the baseline rather than enqueue a heartbeat.
        dialer.activity_since_tick = true;
        dialer.heartbeat = Repeater::every(Duration::from_millis(1));
        std::thread::sleep(Duration::from_millis(5));
        dialer.on_tick();
        assert!(!dialer.activity_since_tick);
        assert!(!dialer.has_pending_writes());

        // With no activity since, the following tick does queue one.
        std::thread::sleep(Duration::from_millis(5));
        dialer.on_tick();
        assert!(dialer.has_pending_writes());
    }

    /// A clean EOF (a zero-length read) is the spec's `Remote` reason, not
    /// a `Socket` I/O failure.
    #[test]
    fn empty_read_is_reported_as_remote_close() {
        let mut c = Channel::accepted(addr(), NodeId::new(), Duration::from_secs(1), Duration::from_secs(30));
        assert_eq!(c.on_readable(&[]), Err(DisconnectReason::Remote));
    }

    #[test]
    fn reconnect_resets_state_and_restarts_handshake() {
        let (mut dialer, mut acceptor) = pair();
        dialer.on_connected();
        for _ in 0..4 {
            relay(&mut acceptor, &mut dialer);
            relay(&mut dialer, &mut acceptor);
        }
        assert!(dialer.is_ready());
        let remote = dialer.remote_node_id();

        dialer.send(Letter::user(vec![b"stale".to_vec()], true));
        dialer.reconnect();

        // Stale queue state from the previous connection is gone; `reconnect`
        // immediately restarts the handshake, same as a brand new `Connected()`.
        assert_eq!(dialer.state(), ChannelState::HandshakePending);
        assert!(!dialer.is_ready());

        // A fresh handshake completes exactly as it would for a new channel.
        let mut acceptor = Channel::accepted(addr(), NodeId::new(), Duration::from_secs(1), Duration::from_secs(30));
        for _ in 0..4 {
            relay(&mut acceptor, &mut dialer);
            relay(&mut dialer, &mut acceptor);
        }
        assert!(dialer.is_ready());
        assert_ne!(dialer.remote_node_id(), remote);
    }

    #[test]
    fn send_before_ready_fails_immediately_except_initialize() {
        let mut c = Channel::dialing(addr(), NodeId::new(), Duration::from_secs(1), Duration::from_secs(30));
        // Still `Connecting`: even the handshake's own Initialize isn't
        // queued through the public `send` gate, it goes via `on_connected`.
        let letter = Letter::user(vec![b"too-early".to_vec()], false);
        assert_eq!(c.send(letter.clone()), Some(ChannelOutcome::FailedToSend(letter)));

        c.on_connected(); // now HandshakePending; still not Ready
        let letter = Letter::user(vec![b"still-early".to_vec()], false);
        assert_eq!(c.send(letter.clone()), Some(ChannelOutcome::FailedToSend(letter)));
    }

    #[test]
    fn shutdown_drains_pending_ack_queue_as_failed_to_send() {
        let (mut dialer, mut acceptor) = pair();
        dialer.on_connected();
        for _ in 0..4 {
            relay(&mut acceptor, &mut dialer);
            relay(&mut dialer, &mut acceptor);
        }
        assert!(dialer.is_ready());

        assert_eq!(dialer.send(Letter::user(vec![b"1".to_vec()], true)), None);
        assert_eq!(dialer.send(Letter::user(vec![b"2".to_vec()], true)), None);
        // no ack requested, never queued onto pending_ack_queue
        assert_eq!(dialer.send(Letter::user(vec![b"3".to_vec()], false)), None);

        let outcomes = dialer.shutdown(DisconnectReason::Socket);
        assert_eq!(
            outcomes,
            vec![
                ChannelOutcome::FailedToSend(Letter::user(vec![b"1".to_vec()], true)),
                ChannelOutcome::FailedToSend(Letter::user(vec![b"2".to_vec()], true)),
            ]
        );
        // Shutdown is idempotent: a second call drains nothing further.
        assert_eq!(dialer.shutdown(DisconnectReason::Socket), Vec::new());
    }

    #[test]
    fn batch_letter_unwraps_into_individual_deliveries() {
        let (mut dialer, mut acceptor) = pair();
        dialer.on_connected();
        for _ in 0..4 {
            relay(&mut acceptor, &mut dialer);
            relay(&mut dialer, &mut acceptor);
        }
        assert!(dialer.is_ready() && acceptor.is_ready());

        let inner = vec![
            wire::encode(&Letter::user(vec![b"a".to_vec()], false)),
            wire::encode(&Letter::user(vec![b"b".to_vec()], false)),
        ];
        dialer.send(Letter::batch(inner));

        let mut wire_bytes = Vec::new();
        dialer.on_writable(&mut wire_bytes).unwrap();
        let outcomes = acceptor.on_readable(&wire_bytes).unwrap();

        let delivered: Vec<_> = outcomes
            .into_iter()
            .map(|o| match o {
                ChannelOutcome::Delivered(l) => l.parts,
                other => panic!("unexpected outcome {other:?}"),
            })
            .collect();
        assert_eq!(delivered, vec![vec![b"a".to_vec()], vec![b"b".to_vec()]]);
    }
}
