//! Length-prefixed frame codec
//!
//! Each frame on the wire is an unsigned LEB128 varint length `L`
//! followed by exactly `L` payload bytes. Decoding is incremental: the
//! decoder consumes whole frames from the buffer and leaves partial ones
//! untouched until more bytes arrive. The length prefix alone is enough
//! to reject an oversized frame, before any payload is read.

use super::ProtocolError;
use bytes::{Buf, Bytes, BytesMut};

/// Default maximum frame payload size in bytes
pub const DEFAULT_MAX_FRAME: usize = 65536;

// A varint longer than this cannot encode a u64
const MAX_VARINT_LEN: usize = 10;

#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    max_frame: usize,
}

impl FrameCodec {
    pub fn new(max_frame: usize) -> Self {
        FrameCodec { max_frame }
    }

    pub fn max_frame(&self) -> usize {
        self.max_frame
    }

    /// Try to decode one frame from `buf`
    ///
    /// Returns `Ok(None)` when the buffer does not yet hold a complete
    /// frame; the partial bytes stay buffered. Consumes the prefix and
    /// payload on success.
    pub fn decode(&self, buf: &mut BytesMut) -> Result<Option<Bytes>, ProtocolError> {
        let (len, prefix_len) = match decode_uvarint(buf)? {
            Some(decoded) => decoded,
            None => return Ok(None),
        };

        if len > self.max_frame as u64 {
            return Err(ProtocolError::FrameTooLarge(len, self.max_frame));
        }
        let len = len as usize;

        if buf.len() < prefix_len + len {
            return Ok(None);
        }

        buf.advance(prefix_len);
        Ok(Some(buf.split_to(len).freeze()))
    }

    /// Append one frame (prefix then payload) to `out`
    ///
    /// The caller writes `out` to the socket in a single call, so each
    /// frame reaches the peer atomically.
    pub fn encode(&self, payload: &[u8], out: &mut BytesMut) -> Result<(), ProtocolError> {
        if payload.len() > self.max_frame {
            return Err(ProtocolError::FrameTooLarge(payload.len() as u64, self.max_frame));
        }

        out.reserve(MAX_VARINT_LEN + payload.len());
        encode_uvarint(payload.len() as u64, out);
        out.extend_from_slice(payload);
        Ok(())
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        FrameCodec::new(DEFAULT_MAX_FRAME)
    }
}

fn encode_uvarint(mut value: u64, out: &mut BytesMut) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.extend_from_slice(&[byte]);
            return;
        }
        out.extend_from_slice(&[byte | 0x80]);
    }
}

/// Decode a varint from the front of `buf` without consuming it
///
/// Returns the value and its encoded width, or `None` if the buffer ends
/// mid-varint.
fn decode_uvarint(buf: &[u8]) -> Result<Option<(u64, usize)>, ProtocolError> {
    let mut value: u64 = 0;
    for (i, byte) in buf.iter().enumerate() {
        if i >= MAX_VARINT_LEN {
            return Err(ProtocolError::BadLengthPrefix);
        }
        let bits = (byte & 0x7f) as u64;
        if i == 9 && *byte > 0x01 {
            // The tenth byte may only carry the final bit of a u64
            return Err(ProtocolError::BadLengthPrefix);
        }
        value |= bits << (7 * i);
        if byte & 0x80 == 0 {
            return Ok(Some((value, i + 1)));
        }
    }
    Ok(None)
}
