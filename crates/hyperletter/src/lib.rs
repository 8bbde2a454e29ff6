extern crate self as hyperletter;

pub use hyperletter_net::{
    Channel, ChannelFleet, ChannelOutcome, ChannelState, Direction, DisconnectReason, FleetEvent,
    Letter, LetterReceiver, LetterTransmitter, LetterType, NodeId, Options, PeerHandle,
    SocketEvent, UnicastSocket, UnicastSocketOptions, WireError,
};
pub use hyperletter_timing as timing;
pub use tracing;
