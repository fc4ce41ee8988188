//! Protocol module - wire format, framing, greeting, requests and responses.
//!
//! This module implements the IPROTO envelope:
//! - 5-byte length prefix encoding/decoding
//! - Frame buffer for accumulating partial reads
//! - Greeting parsing (server version and auth salt)
//! - Request encoding and response decoding

mod frame;
mod frame_buffer;
mod greeting;
mod request;
mod response;
mod wire_format;

pub use frame::{build_frame, Frame};
pub use frame_buffer::FrameBuffer;
pub use greeting::Greeting;
pub use request::{scramble, IteratorType, Request, AUTH_MECHANISM};
pub use response::{CompletionStatus, Response};
pub use wire_format::{
    codes, decode_length, encode_length, keys, system, DEFAULT_MAX_FRAME_SIZE, GREETING_SIZE,
    LENGTH_PREFIX_SIZE, SALT_SIZE, UINT32_MARKER,
};
