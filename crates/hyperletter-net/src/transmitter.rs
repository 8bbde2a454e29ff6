use std::collections::VecDeque;
use std::io::{self, Write};

use tracing::trace;

use crate::{letter::Letter, wire};

/// Serializes outbound letters and drains them onto a non-blocking writer.
///
/// Holds the full wire-order queue for one channel: every letter handed to
/// [`Self::enqueue`] is written strictly in the order it was enqueued,
/// regardless of `Letter::kind` — this is the "actual order on the wire"
/// queue, distinct from [`crate::channel::Channel`]'s `pending_ack_queue`
/// bookkeeping of which letters are still awaiting acknowledgement.
#[derive(Default)]
pub struct LetterTransmitter {
    queue: VecDeque<Vec<u8>>,
    /// Bytes of `queue`'s front frame not yet written.
    in_flight: Vec<u8>,
    written: usize,
}

impl LetterTransmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, letter: &Letter) {
        self.queue.push_back(wire::encode(letter));
    }

    /// True if nothing is queued and nothing is partially written.
    pub fn is_drained(&self) -> bool {
        self.queue.is_empty() && self.in_flight.is_empty()
    }

    /// Writes as much of the queue as `writer` accepts without blocking.
    ///
    /// Returns the number of whole letters fully flushed. On
    /// `WouldBlock`/`Interrupted` the remainder is left queued for the next
    /// writable-readiness event; any other I/O error is propagated.
    pub fn write_ready<W: Write>(&mut self, writer: &mut W) -> io::Result<usize> {
        let mut flushed = 0;

        loop {
            if self.in_flight.is_empty() {
                match self.queue.pop_front() {
                    Some(frame) => self.in_flight = frame,
                    None => return Ok(flushed),
                }
                self.written = 0;
            }

            match writer.write(&self.in_flight[self.written..]) {
                Ok(0) => {
                    return Ok(flushed);
                }
                Ok(n) => {
                    self.written += n;
                    if self.written == self.in_flight.len() {
                        trace!(bytes = self.in_flight.len(), "letter frame flushed");
                        self.in_flight.clear();
                        self.written = 0;
                        flushed += 1;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(flushed),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }
}
