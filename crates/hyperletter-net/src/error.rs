use thiserror::Error;

/// Failure decoding or encoding a single frame.
///
/// Every variant corresponds to a case the spec calls `MalformedFrame`; kept
/// as distinct variants here (rather than one catch-all) so callers and
/// tests can tell them apart, while `Channel` treats all of them the same
/// way: shut down with [`crate::channel::DisconnectReason::Malformed`].
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireError {
    #[error("frame too short: declared total_length {0} is below the minimum header size")]
    FrameTooShort(u32),
    #[error("unknown letter type byte {0}")]
    UnknownType(u8),
    #[error("part table overruns the frame body")]
    PartOverrun,
    #[error("declared part lengths do not sum to the remaining frame body")]
    LengthMismatch,
    #[error("Options::UNIQUE_ID set but id bytes are not a valid uuid")]
    InvalidId,
}
