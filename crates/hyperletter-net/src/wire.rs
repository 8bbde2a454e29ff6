//! Length-prefixed wire frame for a [`Letter`].
//!
//! ```text
//! total_length : u32 LE   -- includes these 4 bytes
//! kind         : u8
//! options      : u8
//! [id          : 16 bytes]  -- present iff Options::UNIQUE_ID
//! part_count   : u16 LE
//! for each part:
//!    part_length : u32 LE
//!    part_bytes
//! ```

use uuid::Uuid;

use crate::{
    error::WireError,
    letter::{Letter, LetterType, Options},
};

const LENGTH_PREFIX_SIZE: usize = 4;
const ID_SIZE: usize = 16;
/// `total_length` + `kind` + `options` + `part_count`, no id, no parts.
const MIN_HEADER_SIZE: usize = LENGTH_PREFIX_SIZE + 1 + 1 + 2;

/// Encodes a letter into its complete on-wire frame, length prefix included.
pub fn encode(letter: &Letter) -> Vec<u8> {
    let mut buf = Vec::with_capacity(64);
    buf.extend_from_slice(&0u32.to_le_bytes()); // placeholder, patched below
    buf.push(letter.kind.as_u8());
    buf.push(letter.options.bits());

    if letter.options.contains(Options::UNIQUE_ID) {
        let id = letter.id.expect("Options::UNIQUE_ID set without an id");
        buf.extend_from_slice(id.as_bytes());
    }

    let part_count =
        u16::try_from(letter.parts.len()).expect("letter has more than u16::MAX parts");
    buf.extend_from_slice(&part_count.to_le_bytes());

    for part in &letter.parts {
        let part_len = u32::try_from(part.len()).expect("letter part exceeds u32::MAX bytes");
        buf.extend_from_slice(&part_len.to_le_bytes());
        buf.extend_from_slice(part);
    }

    let total_length = u32::try_from(buf.len()).expect("letter frame exceeds u32::MAX bytes");
    buf[..LENGTH_PREFIX_SIZE].copy_from_slice(&total_length.to_le_bytes());
    buf
}

/// Decodes one complete frame, length prefix included.
///
/// `frame.len()` must equal the frame's declared `total_length` exactly —
/// callers (the [`crate::receiver::LetterReceiver`]) are responsible for
/// buffering until exactly that many bytes have arrived.
pub fn decode(frame: &[u8]) -> Result<Letter, WireError> {
    if frame.len() < MIN_HEADER_SIZE {
        return Err(WireError::FrameTooShort(frame.len() as u32));
    }
    let total_length = u32::from_le_bytes(frame[0..4].try_into().unwrap());
    if (total_length as usize) < MIN_HEADER_SIZE || frame.len() != total_length as usize {
        return Err(WireError::FrameTooShort(total_length));
    }

    let mut pos = LENGTH_PREFIX_SIZE;
    let kind = LetterType::from_u8(frame[pos]).ok_or(WireError::UnknownType(frame[pos]))?;
    pos += 1;
    let options = Options::from_bits_truncate(frame[pos]);
    pos += 1;

    let id = if options.contains(Options::UNIQUE_ID) {
        let end = pos + ID_SIZE;
        if frame.len() < end {
            return Err(WireError::PartOverrun);
        }
        let id = Uuid::from_slice(&frame[pos..end]).map_err(|_| WireError::InvalidId)?;
        pos = end;
        Some(id)
    } else {
        None
    };

    if frame.len() < pos + 2 {
        return Err(WireError::PartOverrun);
    }
    let part_count = u16::from_le_bytes(frame[pos..pos + 2].try_into().unwrap());
    pos += 2;

    let mut parts = Vec::with_capacity(part_count as usize);
    for _ in 0..part_count {
        if frame.len() < pos + 4 {
            return Err(WireError::PartOverrun);
        }
        let part_len = u32::from_le_bytes(frame[pos..pos + 4].try_into().unwrap()) as usize;
        pos += 4;
        let end = pos.checked_add(part_len).ok_or(WireError::PartOverrun)?;
        if frame.len() < end {
            return Err(WireError::PartOverrun);
        }
        parts.push(frame[pos..end].to_vec());
        pos = end;
    }

    if pos != frame.len() {
        return Err(WireError::LengthMismatch);
    }

    Ok(Letter { kind, options, id, parts, remote_node_id: None })
}
