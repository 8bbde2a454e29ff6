//! Channel engine and multi-peer dispatcher for the hyperletter transport.
//!
//! [`socket::UnicastSocket`] is the entry point most callers want: it owns a
//! background `mio` reactor thread and exposes peer lifecycle and delivery
//! events over a [`crossbeam_channel`]. [`fleet::ChannelFleet`] and
//! [`channel::Channel`] are the pieces it's built from, exposed for callers
//! that want to drive IO on their own thread instead.

pub mod channel;
pub mod error;
pub mod fleet;
pub mod letter;
pub mod receiver;
pub mod socket;
pub mod transmitter;
pub mod wire;

pub use channel::{Channel, ChannelOutcome, ChannelState, DisconnectReason, Direction};
pub use error::WireError;
pub use fleet::{ChannelFleet, FleetEvent};
pub use letter::{Letter, LetterType, NodeId, Options};
pub use receiver::LetterReceiver;
pub use socket::{PeerHandle, SocketEvent, UnicastSocket, UnicastSocketOptions};
pub use transmitter::LetterTransmitter;
