//! MsgPack codec using `rmp-serde`.
//!
//! **Tuples are positional.** Tarantool stores tuples as MsgPack arrays, so
//! this codec uses `to_vec` / `encode::write`, which serialize structs as
//! arrays. `to_vec_named` would produce maps and the server would reject
//! them as tuples.
//!
//! # Example
//!
//! ```
//! use iproto_client::codec::MsgPackCodec;
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Serialize, Deserialize, PartialEq, Debug)]
//! struct User {
//!     id: u32,
//!     name: String,
//! }
//!
//! let user = User { id: 1, name: "alice".to_string() };
//! let encoded = MsgPackCodec::encode(&user).unwrap();
//! assert_eq!(encoded[0], 0x92); // fixarray of 2
//! let decoded: User = MsgPackCodec::decode(&encoded).unwrap();
//! assert_eq!(decoded, user);
//! ```

use crate::error::Result;

/// MessagePack codec for tuples, keys and rows.
pub struct MsgPackCodec;

impl MsgPackCodec {
    /// Encode a value to MsgPack bytes (structs as arrays).
    #[inline]
    pub fn encode<T: serde::Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec(value)?)
    }

    /// Append the MsgPack encoding of a value to `buf`.
    #[inline]
    pub fn encode_into<T: serde::Serialize + ?Sized>(buf: &mut Vec<u8>, value: &T) -> Result<()> {
        rmp_serde::encode::write(buf, value)?;
        Ok(())
    }

    /// Decode MsgPack bytes to a value.
    ///
    /// # Errors
    ///
    /// Returns error if the bytes cannot be deserialized to type T.
    #[inline]
    pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}
