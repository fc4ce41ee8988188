//! Frame struct.
//!
//! Represents one complete length-prefixed unit read from the wire.
//! Uses `bytes::Bytes` for zero-copy payload sharing.
//!
//! # Example
//!
//! ```
//! use iproto_client::protocol::{build_frame, FrameBuffer};
//!
//! let bytes = build_frame(b"\x80\x80");
//! let mut buffer = FrameBuffer::new();
//! let frames = buffer.push(&bytes).unwrap();
//!
//! assert_eq!(frames[0].length(), 2);
//! assert_eq!(frames[0].payload(), b"\x80\x80");
//! ```

use bytes::Bytes;

use super::wire_format::{encode_length, LENGTH_PREFIX_SIZE};

/// A complete protocol frame.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Declared payload length taken from the prefix.
    pub length: u32,
    /// Payload bytes (zero-copy via `bytes::Bytes`).
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame from its declared length and payload.
    pub fn new(length: u32, payload: Bytes) -> Self {
        Self { length, payload }
    }

    /// Get a reference to the payload bytes.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Declared length of the payload.
    #[inline]
    pub fn length(&self) -> u32 {
        self.length
    }
}

/// Build a complete frame (prefix + payload) as a single byte vector.
pub fn build_frame(payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(LENGTH_PREFIX_SIZE + payload.len());
    buf.extend_from_slice(&encode_length(payload.len() as u32));
    buf.extend_from_slice(payload);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_accessors() {
        let frame = Frame::new(5, Bytes::from_static(b"hello"));
        assert_eq!(frame.length(), 5);
        assert_eq!(frame.payload(), b"hello");
    }

    #[test]
    fn test_build_frame() {
        let bytes = build_frame(b"hello");

        assert_eq!(bytes.len(), LENGTH_PREFIX_SIZE + 5);
        assert_eq!(&bytes[..LENGTH_PREFIX_SIZE], &[0xce, 0, 0, 0, 5]);
        assert_eq!(&bytes[LENGTH_PREFIX_SIZE..], b"hello");
    }

    #[test]
    fn test_build_frame_empty_payload() {
        let bytes = build_frame(b"");
        assert_eq!(bytes.len(), LENGTH_PREFIX_SIZE);
    }
}
