//! Wire format constants and the length prefix codec.
//!
//! Every IPROTO frame is a MsgPack `uint32` length prefix followed by the
//! payload it announces:
//! ```text
//! ┌────────┬──────────────┬──────────────────────────────┐
//! │ 0xCE   │ Length       │ Payload                      │
//! │ 1 byte │ uint32 BE    │ header map ++ body map       │
//! └────────┴──────────────┴──────────────────────────────┘
//! ```
//!
//! The server always uses the fixed-width `uint32` marker, which keeps the
//! prefix exactly 5 bytes long.

use crate::error::{IprotoError, Result};

/// Length prefix size in bytes (fixed, exactly 5).
pub const LENGTH_PREFIX_SIZE: usize = 5;

/// MsgPack marker of a `uint32` value.
pub const UINT32_MARKER: u8 = 0xce;

/// Size of the greeting block sent by the server on connect.
pub const GREETING_SIZE: usize = 128;

/// Number of salt bytes used by the authentication scramble.
pub const SALT_SIZE: usize = 20;

/// Default maximum frame payload size (1 GB).
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 1_073_741_824;

/// Request and response codes (header key `CODE`).
pub mod codes {
    pub const OK: u32 = 0x00;
    pub const SELECT: u32 = 0x01;
    pub const INSERT: u32 = 0x02;
    pub const REPLACE: u32 = 0x03;
    pub const UPDATE: u32 = 0x04;
    pub const DELETE: u32 = 0x05;
    pub const AUTH: u32 = 0x07;
    pub const EVAL: u32 = 0x08;
    pub const CALL: u32 = 0x0a;
    pub const PING: u32 = 0x40;
    /// Out-of-band push for a request that has not finished yet.
    pub const CHUNK: u32 = 0x80;
    /// Error responses carry `ERROR | errcode`.
    pub const ERROR: u32 = 0x8000;
}

/// Map keys used in the header and body maps.
pub mod keys {
    pub const CODE: u8 = 0x00;
    pub const SYNC: u8 = 0x01;
    pub const SCHEMA_ID: u8 = 0x05;
    pub const SPACE_ID: u8 = 0x10;
    pub const INDEX_ID: u8 = 0x11;
    pub const LIMIT: u8 = 0x12;
    pub const OFFSET: u8 = 0x13;
    pub const ITERATOR: u8 = 0x14;
    pub const KEY: u8 = 0x20;
    pub const TUPLE: u8 = 0x21;
    pub const FUNCTION_NAME: u8 = 0x22;
    pub const USER_NAME: u8 = 0x23;
    pub const EXPR: u8 = 0x27;
    pub const DATA: u8 = 0x30;
    pub const ERROR: u8 = 0x31;
}

/// System spaces and indexes used by the schema cache.
pub mod system {
    /// `_space` system space.
    pub const SPACE_SPACE: u32 = 280;
    /// `_index` system space.
    pub const SPACE_INDEX: u32 = 288;
    pub const INDEX_SPACE_PRIMARY: u32 = 0;
    pub const INDEX_SPACE_NAME: u32 = 2;
    pub const INDEX_INDEX_PRIMARY: u32 = 0;
    pub const INDEX_INDEX_NAME: u32 = 2;
}

/// Encode a payload length as the 5-byte prefix.
///
/// # Example
///
/// ```
/// use iproto_client::protocol::encode_length;
///
/// assert_eq!(encode_length(300), [0xce, 0, 0, 0x01, 0x2c]);
/// ```
#[inline]
pub fn encode_length(length: u32) -> [u8; LENGTH_PREFIX_SIZE] {
    let mut buf = [0u8; LENGTH_PREFIX_SIZE];
    buf[0] = UINT32_MARKER;
    buf[1..5].copy_from_slice(&length.to_be_bytes());
    buf
}

/// Decode the 5-byte length prefix.
///
/// Returns `Ok(None)` if fewer than 5 bytes are available.
pub fn decode_length(buf: &[u8]) -> Result<Option<u32>> {
    if buf.len() < LENGTH_PREFIX_SIZE {
        return Ok(None);
    }

    if buf[0] != UINT32_MARKER {
        return Err(IprotoError::Protocol(format!(
            "Invalid length prefix marker 0x{:02x}",
            buf[0]
        )));
    }

    let mut len = [0u8; 4];
    len.copy_from_slice(&buf[1..5]);
    Ok(Some(u32::from_be_bytes(len)))
}
