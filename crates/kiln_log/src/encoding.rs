//! Record framing.
//!
//! Every record is `u32 BE payload length | postcard payload | first four
//! bytes of the payload's BLAKE3 hash`. The trailing checksum lets a reader
//! tell a torn or overwritten tail from a complete record.

use crate::event::Message;
use kiln_core::Hash;

/// Length prefix size
pub const LEN_PREFIX: usize = 4;

/// Trailing checksum size
pub const CHECKSUM_LEN: usize = 4;

/// Bytes a frame adds around its payload
pub const FRAME_OVERHEAD: usize = LEN_PREFIX + CHECKSUM_LEN;

/// Largest accepted payload
pub const MAX_RECORD_LEN: usize = 16 * 1024 * 1024;

/// Framing errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    /// Buffer ends inside the frame
    #[error("Incomplete frame: {available} of {needed} bytes")]
    Incomplete {
        /// Bytes present
        available: usize,
        /// Bytes the frame needs
        needed: usize,
    },

    /// Length prefix above [`MAX_RECORD_LEN`]
    #[error("Record of {len} bytes exceeds the maximum record length")]
    TooLarge {
        /// Declared payload length
        len: usize,
    },

    /// Payload does not match its checksum
    #[error("Record checksum mismatch")]
    ChecksumMismatch,

    /// Message could not be serialised
    #[error("Encode failed: {0}")]
    Encode(String),

    /// Payload is not a valid message
    #[error("Decode failed: {0}")]
    Decode(String),
}

/// Append one framed message to `out`, returning the frame length
///
/// # Errors
///
/// Returns error if the message cannot be serialised or is too large
pub fn encode_frame(message: &Message, out: &mut Vec<u8>) -> Result<usize, FrameError> {
    let payload = postcard::to_allocvec(message).map_err(|e| FrameError::Encode(e.to_string()))?;
    if payload.len() > MAX_RECORD_LEN {
        return Err(FrameError::TooLarge { len: payload.len() });
    }
    // MAX_RECORD_LEN fits in a u32
    let len = payload.len() as u32;
    out.reserve(payload.len() + FRAME_OVERHEAD);
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(&payload);
    out.extend_from_slice(&Hash::compute(&payload).prefix4());
    Ok(payload.len() + FRAME_OVERHEAD)
}

/// Frame a batch into one contiguous buffer
///
/// # Errors
///
/// Returns the first encoding error; nothing is returned for the batch then
pub fn encode_batch(messages: &[Message]) -> Result<Vec<u8>, FrameError> {
    let mut out = Vec::new();
    for message in messages {
        encode_frame(message, &mut out)?;
    }
    Ok(out)
}

/// Decode the frame at the start of `buf`, returning the message and the
/// number of bytes consumed
///
/// # Errors
///
/// Returns error if the frame is incomplete, oversized, corrupt or does not
/// hold a message
pub fn decode_frame(buf: &[u8]) -> Result<(Message, usize), FrameError> {
    let Some(prefix) = buf.get(..LEN_PREFIX) else {
        return Err(FrameError::Incomplete {
            available: buf.len(),
            needed: LEN_PREFIX,
        });
    };
    let mut len_bytes = [0u8; LEN_PREFIX];
    len_bytes.copy_from_slice(prefix);
    let len = u32::from_be_bytes(len_bytes) as usize;
    if len > MAX_RECORD_LEN {
        return Err(FrameError::TooLarge { len });
    }

    let needed = len + FRAME_OVERHEAD;
    if buf.len() < needed {
        return Err(FrameError::Incomplete {
            available: buf.len(),
            needed,
        });
    }
    let payload = &buf[LEN_PREFIX..LEN_PREFIX + len];
    let checksum = &buf[LEN_PREFIX + len..needed];
    if Hash::compute(payload).prefix4()[..] != *checksum {
        return Err(FrameError::ChecksumMismatch);
    }
    let message = postcard::from_bytes(payload).map_err(|e| FrameError::Decode(e.to_string()))?;
    Ok((message, needed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Event, Metric};

    fn metric(i: usize) -> Message {
        Message::new(Event::Metric(Metric {
            name: format!("m{i}"),
            value: i as f64,
            tags: vec![format!("i={i}")],
        }))
    }

    #[test]
    fn test_frame_layout() {
        let message = Message::heartbeat();
        let mut buf = Vec::new();
        let n = encode_frame(&message, &mut buf).unwrap();
        assert_eq!(n, buf.len());
        let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        assert_eq!(len + FRAME_OVERHEAD, buf.len());

        let (decoded, consumed) = decode_frame(&buf).unwrap();
        assert_eq!(decoded, message);
        assert_eq!(consumed, buf.len());
    }

    #[test]
    fn test_batch_is_contiguous() {
        let batch: Vec<Message> = (0..3).map(metric).collect();
        let buf = encode_batch(&batch).unwrap();
        let mut rest = buf.as_slice();
        for expected in &batch {
            let (message, used) = decode_frame(rest).unwrap();
            assert_eq!(&message, expected);
            rest = &rest[used..];
        }
        assert!(rest.is_empty());
    }

    #[test]
    fn test_incomplete_frame() {
        let mut buf = Vec::new();
        encode_frame(&metric(1), &mut buf).unwrap();
        assert!(matches!(
            decode_frame(&buf[..2]),
            Err(FrameError::Incomplete { needed: 4, .. })
        ));
        assert!(matches!(
            decode_frame(&buf[..buf.len() - 1]),
            Err(FrameError::Incomplete { .. })
        ));
    }

    #[test]
    fn test_corrupt_payload_detected() {
        let mut buf = Vec::new();
        encode_frame(&metric(7), &mut buf).unwrap();
        buf[LEN_PREFIX + 2] ^= 0xff;
        assert_eq!(decode_frame(&buf), Err(FrameError::ChecksumMismatch));
    }

    #[test]
    fn test_oversized_prefix_rejected() {
        let buf = [0xff, 0xff, 0xff, 0xff, 0, 0];
        assert!(matches!(decode_frame(&buf), Err(FrameError::TooLarge { .. })));
    }
}
