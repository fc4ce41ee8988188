//! Codec module - serde bridge for tuple payloads.
//!
//! Request and response envelopes (header and body maps with integer keys)
//! are written by hand in [`crate::protocol`]; everything the caller
//! supplies or receives (tuples, keys, update operations, rows) goes through
//! [`MsgPackCodec`].

mod msgpack;

pub use msgpack::MsgPackCodec;
