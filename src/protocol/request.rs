//! Request encoding.
//!
//! A [`Request`] holds the request code and its pre-encoded body map. The
//! correlation id is only supplied at [`Request::encode`] time, so the
//! connection can register the waiter for a sync before any byte of the
//! request exists in the outbound buffer.
//!
//! Encoded layout:
//! ```text
//! [0xCE][len u32 BE][{CODE: code, SYNC: sync}][body map]
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use serde::Serialize;
use sha1::{Digest, Sha1};

use super::wire_format::{codes, encode_length, keys, LENGTH_PREFIX_SIZE, SALT_SIZE};
use crate::codec::MsgPackCodec;
use crate::error::Result;

/// Authentication mechanism sent with `AUTH`.
pub const AUTH_MECHANISM: &str = "chap-sha1";

/// Select iterator types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u32)]
pub enum IteratorType {
    #[default]
    Eq = 0,
    Req = 1,
    All = 2,
    Lt = 3,
    Le = 4,
    Ge = 5,
    Gt = 6,
    BitsAllSet = 7,
    BitsAnySet = 8,
    BitsAllNotSet = 9,
    Overlaps = 10,
    Neighbor = 11,
}

/// A request ready to be stamped with a sync and sent.
#[derive(Debug, Clone)]
pub struct Request {
    code: u32,
    body: Vec<u8>,
}

impl Request {
    fn new(code: u32, body: Vec<u8>) -> Self {
        Self { code, body }
    }

    /// Request code (`SELECT`, `INSERT`, ...).
    #[inline]
    pub fn code(&self) -> u32 {
        self.code
    }

    /// Encoded body map.
    #[inline]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Encode the full frame for the given sync.
    pub fn encode(&self, sync: u64) -> Result<Bytes> {
        let mut header = Vec::with_capacity(16);
        rmp::encode::write_map_len(&mut header, 2)?;
        rmp::encode::write_uint(&mut header, keys::CODE as u64)?;
        rmp::encode::write_uint(&mut header, self.code as u64)?;
        rmp::encode::write_uint(&mut header, keys::SYNC as u64)?;
        rmp::encode::write_uint(&mut header, sync)?;

        let length = (header.len() + self.body.len()) as u32;
        let mut buf = BytesMut::with_capacity(LENGTH_PREFIX_SIZE + length as usize);
        buf.put_slice(&encode_length(length));
        buf.put_slice(&header);
        buf.put_slice(&self.body);

        Ok(buf.freeze())
    }

    /// `PING` with an empty body.
    pub fn ping() -> Result<Self> {
        let mut body = Vec::with_capacity(1);
        rmp::encode::write_map_len(&mut body, 0)?;
        Ok(Self::new(codes::PING, body))
    }

    /// `SELECT` by key on the given index.
    pub fn select<K: Serialize + ?Sized>(
        space_id: u32,
        index_id: u32,
        key: &K,
        offset: u32,
        limit: u32,
        iterator: IteratorType,
    ) -> Result<Self> {
        let mut body = Vec::with_capacity(32);
        rmp::encode::write_map_len(&mut body, 6)?;
        write_uint_pair(&mut body, keys::SPACE_ID, space_id)?;
        write_uint_pair(&mut body, keys::INDEX_ID, index_id)?;
        write_uint_pair(&mut body, keys::LIMIT, limit)?;
        write_uint_pair(&mut body, keys::OFFSET, offset)?;
        write_uint_pair(&mut body, keys::ITERATOR, iterator as u32)?;
        rmp::encode::write_uint(&mut body, keys::KEY as u64)?;
        MsgPackCodec::encode_into(&mut body, key)?;
        Ok(Self::new(codes::SELECT, body))
    }

    /// `INSERT` a tuple.
    pub fn insert<T: Serialize + ?Sized>(space_id: u32, tuple: &T) -> Result<Self> {
        Self::store(codes::INSERT, space_id, tuple)
    }

    /// `REPLACE` a tuple.
    pub fn replace<T: Serialize + ?Sized>(space_id: u32, tuple: &T) -> Result<Self> {
        Self::store(codes::REPLACE, space_id, tuple)
    }

    fn store<T: Serialize + ?Sized>(code: u32, space_id: u32, tuple: &T) -> Result<Self> {
        let mut body = Vec::with_capacity(32);
        rmp::encode::write_map_len(&mut body, 2)?;
        write_uint_pair(&mut body, keys::SPACE_ID, space_id)?;
        rmp::encode::write_uint(&mut body, keys::TUPLE as u64)?;
        MsgPackCodec::encode_into(&mut body, tuple)?;
        Ok(Self::new(code, body))
    }

    /// `UPDATE` the tuple matching `key` with a list of operations such as
    /// `[("=", 1, "bob")]`.
    pub fn update<K, O>(space_id: u32, index_id: u32, key: &K, ops: &O) -> Result<Self>
    where
        K: Serialize + ?Sized,
        O: Serialize + ?Sized,
    {
        let mut body = Vec::with_capacity(32);
        rmp::encode::write_map_len(&mut body, 4)?;
        write_uint_pair(&mut body, keys::SPACE_ID, space_id)?;
        write_uint_pair(&mut body, keys::INDEX_ID, index_id)?;
        rmp::encode::write_uint(&mut body, keys::KEY as u64)?;
        MsgPackCodec::encode_into(&mut body, key)?;
        rmp::encode::write_uint(&mut body, keys::TUPLE as u64)?;
        MsgPackCodec::encode_into(&mut body, ops)?;
        Ok(Self::new(codes::UPDATE, body))
    }

    /// `DELETE` the tuple matching `key`.
    pub fn delete<K: Serialize + ?Sized>(space_id: u32, index_id: u32, key: &K) -> Result<Self> {
        let mut body = Vec::with_capacity(24);
        rmp::encode::write_map_len(&mut body, 3)?;
        write_uint_pair(&mut body, keys::SPACE_ID, space_id)?;
        write_uint_pair(&mut body, keys::INDEX_ID, index_id)?;
        rmp::encode::write_uint(&mut body, keys::KEY as u64)?;
        MsgPackCodec::encode_into(&mut body, key)?;
        Ok(Self::new(codes::DELETE, body))
    }

    /// `CALL` a stored function.
    pub fn call<A: Serialize + ?Sized>(function: &str, args: &A) -> Result<Self> {
        Self::invoke(codes::CALL, keys::FUNCTION_NAME, function, args)
    }

    /// `EVAL` a Lua expression.
    pub fn eval<A: Serialize + ?Sized>(expr: &str, args: &A) -> Result<Self> {
        Self::invoke(codes::EVAL, keys::EXPR, expr, args)
    }

    fn invoke<A: Serialize + ?Sized>(code: u32, key: u8, text: &str, args: &A) -> Result<Self> {
        let mut body = Vec::with_capacity(32 + text.len());
        rmp::encode::write_map_len(&mut body, 2)?;
        rmp::encode::write_uint(&mut body, key as u64)?;
        rmp::encode::write_str(&mut body, text)?;
        rmp::encode::write_uint(&mut body, keys::TUPLE as u64)?;
        MsgPackCodec::encode_into(&mut body, args)?;
        Ok(Self::new(code, body))
    }

    /// `AUTH` with the chap-sha1 scramble of `password` and the session salt.
    pub fn authenticate(salt: &[u8; SALT_SIZE], user: &str, password: &str) -> Result<Self> {
        let scramble = scramble(salt, password);

        let mut body = Vec::with_capacity(48 + user.len());
        rmp::encode::write_map_len(&mut body, 2)?;
        rmp::encode::write_uint(&mut body, keys::USER_NAME as u64)?;
        rmp::encode::write_str(&mut body, user)?;
        rmp::encode::write_uint(&mut body, keys::TUPLE as u64)?;
        rmp::encode::write_array_len(&mut body, 2)?;
        rmp::encode::write_str(&mut body, AUTH_MECHANISM)?;
        rmp::encode::write_bin(&mut body, &scramble)?;
        Ok(Self::new(codes::AUTH, body))
    }
}

fn write_uint_pair(buf: &mut Vec<u8>, key: u8, value: u32) -> Result<()> {
    rmp::encode::write_uint(buf, key as u64)?;
    rmp::encode::write_uint(buf, value as u64)?;
    Ok(())
}

/// chap-sha1: `sha1(password) XOR sha1(salt ++ sha1(sha1(password)))`.
pub fn scramble(salt: &[u8; SALT_SIZE], password: &str) -> [u8; 20] {
    let hash1 = Sha1::digest(password.as_bytes());
    let hash2 = Sha1::digest(hash1);

    let mut hasher = Sha1::new();
    hasher.update(salt);
    hasher.update(hash2);
    let hash3 = hasher.finalize();

    let mut out = [0u8; 20];
    for (i, byte) in out.iter_mut().enumerate() {
        *byte = hash1[i] ^ hash3[i];
    }
    out
}
