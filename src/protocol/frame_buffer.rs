//! Frame buffer for accumulating partial reads.
//!
//! Uses `bytes::BytesMut` for zero-copy buffer management.
//! Implements a state machine for handling fragmented frames:
//! - `WaitingForPrefix`: Need at least 5 bytes
//! - `WaitingForPayload`: Prefix parsed, need N more payload bytes
//!
//! A frame is only handed out once every byte of its declared length has
//! been buffered.
//!
//! # Example
//!
//! ```
//! use iproto_client::protocol::{build_frame, FrameBuffer};
//!
//! let bytes = build_frame(b"payload");
//! let mut buffer = FrameBuffer::new();
//!
//! // Data arrives in chunks from the socket
//! assert!(buffer.push(&bytes[..6]).unwrap().is_empty());
//! let frames = buffer.push(&bytes[6..]).unwrap();
//! assert_eq!(frames[0].payload(), b"payload");
//! ```

use bytes::BytesMut;

use super::wire_format::{decode_length, DEFAULT_MAX_FRAME_SIZE, LENGTH_PREFIX_SIZE};
use super::Frame;
use crate::error::{IprotoError, Result};

/// Default initial capacity of the accumulation buffer.
const DEFAULT_CAPACITY: usize = 32 * 1024;

/// State machine for frame parsing.
#[derive(Debug, Clone, Copy)]
enum State {
    /// Waiting for the complete length prefix.
    WaitingForPrefix,
    /// Prefix parsed, waiting for payload bytes.
    WaitingForPayload { length: u32 },
}

/// Buffer for accumulating incoming bytes and extracting complete frames.
pub struct FrameBuffer {
    /// Accumulated bytes from socket reads.
    buffer: BytesMut,
    /// Current parsing state.
    state: State,
    /// Maximum allowed payload size.
    max_frame_size: u32,
}

impl FrameBuffer {
    /// Create a new frame buffer with default settings.
    ///
    /// Default capacity: 32KB, max frame: 1GB.
    pub fn new() -> Self {
        Self::with_capacity_and_max_frame(DEFAULT_CAPACITY, DEFAULT_MAX_FRAME_SIZE)
    }

    /// Create a new frame buffer with custom max frame size.
    pub fn with_max_frame(max_frame_size: u32) -> Self {
        Self::with_capacity_and_max_frame(DEFAULT_CAPACITY, max_frame_size)
    }

    /// Create a new frame buffer with custom capacity and max frame size.
    pub fn with_capacity_and_max_frame(capacity: usize, max_frame_size: u32) -> Self {
        Self {
            buffer: BytesMut::with_capacity(capacity),
            state: State::WaitingForPrefix,
            max_frame_size,
        }
    }

    /// Push data into the buffer and extract all complete frames.
    ///
    /// Partial data is kept for the next push.
    ///
    /// # Errors
    ///
    /// Returns error on an invalid prefix or a payload above the limit.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Frame>> {
        self.buffer.extend_from_slice(data);

        let mut frames = Vec::new();
        while let Some(frame) = self.try_extract_one()? {
            frames.push(frame);
        }

        Ok(frames)
    }

    fn try_extract_one(&mut self) -> Result<Option<Frame>> {
        match self.state {
            State::WaitingForPrefix => {
                let length = match decode_length(&self.buffer)? {
                    Some(length) => length,
                    None => return Ok(None),
                };

                if length > self.max_frame_size {
                    return Err(IprotoError::Protocol(format!(
                        "Frame size {} exceeds maximum {}",
                        length, self.max_frame_size
                    )));
                }

                let _ = self.buffer.split_to(LENGTH_PREFIX_SIZE);
                self.state = State::WaitingForPayload { length };

                self.try_extract_one()
            }

            State::WaitingForPayload { length } => {
                if self.buffer.len() < length as usize {
                    return Ok(None);
                }

                let payload = self.buffer.split_to(length as usize).freeze();
                self.state = State::WaitingForPrefix;

                Ok(Some(Frame::new(length, payload)))
            }
        }
    }

    /// Get the number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Clear the buffer and reset state.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.state = State::WaitingForPrefix;
    }

    #[cfg(test)]
    fn state_name(&self) -> &'static str {
        match self.state {
            State::WaitingForPrefix => "WaitingForPrefix",
            State::WaitingForPayload { .. } => "WaitingForPayload",
        }
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}
