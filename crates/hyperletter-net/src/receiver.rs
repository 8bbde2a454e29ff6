use crate::{
    error::WireError,
    letter::{Letter, LetterType},
    wire,
};

const HEADER_MIN: usize = 4 + 1 + 1 + 2;

enum RxState {
    /// Waiting for (the rest of) the 4-byte length prefix.
    AwaitingLength { buf: [u8; 4], have: usize },
    /// Collecting `total_length - 4` bytes of frame body.
    AwaitingBody { total_length: u32, accumulator: Vec<u8> },
}

impl Default for RxState {
    fn default() -> Self {
        Self::AwaitingLength { buf: [0; 4], have: 0 }
    }
}

/// Reassembles a byte stream from one socket back into discrete [`Letter`]s.
///
/// Heartbeats are consumed internally and never returned from [`Self::feed`]
/// — the caller only ever sees application-meaningful frames.
pub struct LetterReceiver {
    state: RxState,
}

impl Default for LetterReceiver {
    fn default() -> Self {
        Self::new()
    }
}

impl LetterReceiver {
    pub fn new() -> Self {
        Self { state: RxState::default() }
    }

    /// Processes one chunk of freshly read bytes, returning every Letter
    /// that became fully assembled during this call, in wire order.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<Letter>, WireError> {
        let mut out = Vec::new();
        let mut p = 0;

        while p < chunk.len() {
            match &mut self.state {
                RxState::AwaitingLength { buf, have } => {
                    while *have < 4 && p < chunk.len() {
                        buf[*have] = chunk[p];
                        *have += 1;
                        p += 1;
                    }
                    if *have == 4 {
                        let total_length = u32::from_le_bytes(*buf);
                        if (total_length as usize) < HEADER_MIN {
                            return Err(WireError::FrameTooShort(total_length));
                        }
                        self.state = RxState::AwaitingBody {
                            total_length,
                            accumulator: Vec::with_capacity(total_length as usize - 4),
                        };
                    }
                }

                RxState::AwaitingBody { total_length, accumulator } => {
                    let target = *total_length as usize - 4;
                    let need = target - accumulator.len();
                    let take = need.min(chunk.len() - p);
                    accumulator.extend_from_slice(&chunk[p..p + take]);
                    p += take;

                    if accumulator.len() == target {
                        let mut frame = Vec::with_capacity(*total_length as usize);
                        frame.extend_from_slice(&total_length.to_le_bytes());
                        frame.extend_from_slice(accumulator);
                        let letter = wire::decode(&frame)?;
                        self.state = RxState::default();
                        if letter.kind != LetterType::Heartbeat {
                            out.push(letter);
                        }
                    }
                }
            }
        }

        Ok(out)
    }
}
