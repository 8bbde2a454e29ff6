use bitflags::bitflags;
use uuid::Uuid;

bitflags! {
    /// Per-letter behaviour flags. Serialized as a single `u8` on the wire.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct Options: u8 {
        /// Request per-letter acknowledgement from the peer.
        const ACK = 0b0000_0001;
        /// Drop without notifying the sender if undeliverable.
        const SILENT_DISCARD = 0b0000_0010;
        /// Carry a correlation [`Letter::id`].
        const UNIQUE_ID = 0b0000_0100;
        /// Deliver on every ready channel, not one.
        const MULTICAST = 0b0000_1000;
    }
}

/// Identifies a process participating in the transport. Exchanged as 16 raw
/// bytes in an `Initialize` letter's single part.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub Uuid);

impl NodeId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    pub fn as_bytes(&self) -> [u8; 16] {
        *self.0.as_bytes()
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LetterType {
    Initialize,
    User,
    Batch,
    Ack,
    Heartbeat,
}

impl LetterType {
    pub(crate) fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Initialize),
            1 => Some(Self::User),
            2 => Some(Self::Batch),
            3 => Some(Self::Ack),
            4 => Some(Self::Heartbeat),
            _ => None,
        }
    }

    pub(crate) fn as_u8(self) -> u8 {
        match self {
            Self::Initialize => 0,
            Self::User => 1,
            Self::Batch => 2,
            Self::Ack => 3,
            Self::Heartbeat => 4,
        }
    }
}

/// One application-level message unit.
///
/// A Letter's on-wire length is fully determined by `kind` + `options` +
/// `parts`; see [`crate::wire`] for the frame layout.
#[derive(Clone, Debug, PartialEq)]
pub struct Letter {
    pub kind: LetterType,
    pub options: Options,
    /// Present iff `options.contains(Options::UNIQUE_ID)`.
    pub id: Option<Uuid>,
    /// For `Batch`, each part is itself a fully encoded Letter frame. For
    /// `Initialize`, the single part is the sender's [`NodeId`] (16 bytes).
    pub parts: Vec<Vec<u8>>,
    /// Populated once this letter has been attributed to a peer (after that
    /// peer's handshake completes); never serialized.
    pub remote_node_id: Option<NodeId>,
}

impl Letter {
    pub fn new(kind: LetterType, options: Options, parts: Vec<Vec<u8>>) -> Self {
        Self { kind, options, id: None, parts, remote_node_id: None }
    }

    /// A user letter, optionally requesting acknowledgement.
    pub fn user(parts: Vec<Vec<u8>>, ack: bool) -> Self {
        let options = if ack { Options::ACK } else { Options::empty() };
        Self::new(LetterType::User, options, parts)
    }

    /// Attaches a correlation id, setting `Options::UNIQUE_ID`.
    pub fn with_id(mut self, id: Uuid) -> Self {
        self.options |= Options::UNIQUE_ID;
        self.id = Some(id);
        self
    }

    pub fn with_options(mut self, options: Options) -> Self {
        self.options |= options;
        self
    }

    pub(crate) fn initialize(node_id: NodeId) -> Self {
        Self::new(LetterType::Initialize, Options::ACK, vec![node_id.as_bytes().to_vec()])
    }

    pub(crate) fn ack() -> Self {
        Self::new(LetterType::Ack, Options::empty(), Vec::new())
    }

    pub(crate) fn heartbeat() -> Self {
        Self::new(LetterType::Heartbeat, Options::SILENT_DISCARD, Vec::new())
    }

    /// Wraps already-encoded letter frames as the parts of a `Batch` letter.
    pub fn batch(encoded_letters: Vec<Vec<u8>>) -> Self {
        Self::new(LetterType::Batch, Options::empty(), encoded_letters)
    }

    pub(crate) fn initialize_node_id(&self) -> Option<NodeId> {
        if self.kind != LetterType::Initialize {
            return None;
        }
        let bytes: [u8; 16] = self.parts.first()?.as_slice().try_into().ok()?;
        Some(NodeId::from_bytes(bytes))
    }

    pub(crate) fn requires_ack_delivery(&self) -> bool {
        matches!(self.kind, LetterType::Initialize | LetterType::User | LetterType::Batch)
    }
}
