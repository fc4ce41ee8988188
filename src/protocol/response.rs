//! Response decoding.
//!
//! A response payload is a header map followed by an optional body map:
//! ```text
//! {CODE: code, SYNC: sync, SCHEMA_ID: id}  {DATA: [rows...]} | {ERROR: "message"}
//! ```
//! Only the fields the transport needs are decoded eagerly. Row data is
//! kept as raw MsgPack and decoded on demand with [`Response::rows`].

use std::io::Cursor;

use bytes::Bytes;
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::Deserialize;

use super::wire_format::{codes, keys};
use crate::codec::MsgPackCodec;
use crate::error::{IprotoError, Result};

/// Whether a response finishes its request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionStatus {
    /// The request is complete.
    Final,
    /// More frames with the same sync will follow.
    RetryNeeded,
}

/// A decoded response frame.
#[derive(Debug, Clone)]
pub struct Response {
    sync: u64,
    code: u32,
    schema_id: Option<u64>,
    return_code: u32,
    message: Option<String>,
    data: Option<Bytes>,
}

impl Response {
    /// Decode a frame payload.
    pub fn decode(payload: &Bytes) -> Result<Self> {
        let mut cursor = Cursor::new(&payload[..]);

        let mut code = None;
        let mut sync = None;
        let mut schema_id = None;

        let entries = rmp::decode::read_map_len(&mut cursor)?;
        for _ in 0..entries {
            let key: u64 = rmp::decode::read_int(&mut cursor)?;
            match key {
                k if k == keys::CODE as u64 => code = Some(rmp::decode::read_int::<u32, _>(&mut cursor)?),
                k if k == keys::SYNC as u64 => sync = Some(rmp::decode::read_int::<u64, _>(&mut cursor)?),
                k if k == keys::SCHEMA_ID as u64 => {
                    schema_id = Some(rmp::decode::read_int::<u64, _>(&mut cursor)?)
                }
                _ => skip_value(&mut cursor)?,
            }
        }

        let code = code.ok_or_else(|| IprotoError::Protocol("Response without code".into()))?;
        let sync = sync.ok_or_else(|| IprotoError::Protocol("Response without sync".into()))?;

        let mut message = None;
        let mut data = None;

        if (cursor.position() as usize) < payload.len() {
            let entries = rmp::decode::read_map_len(&mut cursor)?;
            for _ in 0..entries {
                let key: u64 = rmp::decode::read_int(&mut cursor)?;
                match key {
                    k if k == keys::DATA as u64 => {
                        let start = cursor.position() as usize;
                        skip_value(&mut cursor)?;
                        let end = cursor.position() as usize;
                        data = Some(payload.slice(start..end));
                    }
                    k if k == keys::ERROR as u64 => message = Some(read_string(&mut cursor)?),
                    _ => skip_value(&mut cursor)?,
                }
            }
        }

        let return_code = if code >= codes::ERROR {
            code & (codes::ERROR - 1)
        } else {
            codes::OK
        };

        Ok(Self {
            sync,
            code,
            schema_id,
            return_code,
            message,
            data,
        })
    }

    /// Correlation id of the request this answers.
    #[inline]
    pub fn sync(&self) -> u64 {
        self.sync
    }

    /// Raw response code from the header.
    #[inline]
    pub fn code(&self) -> u32 {
        self.code
    }

    /// Schema version reported by the server.
    #[inline]
    pub fn schema_id(&self) -> Option<u64> {
        self.schema_id
    }

    /// Server error code, 0 on success.
    #[inline]
    pub fn return_code(&self) -> u32 {
        self.return_code
    }

    /// Error message, empty on success.
    pub fn message(&self) -> &str {
        self.message.as_deref().unwrap_or("")
    }

    pub fn completion_status(&self) -> CompletionStatus {
        if self.code == codes::CHUNK {
            CompletionStatus::RetryNeeded
        } else {
            CompletionStatus::Final
        }
    }

    #[inline]
    pub fn is_final(&self) -> bool {
        self.completion_status() == CompletionStatus::Final
    }

    /// Raw MsgPack of the `DATA` entry, if any.
    pub fn data(&self) -> Option<&[u8]> {
        self.data.as_deref()
    }

    /// Decode the returned tuples.
    ///
    /// Returns an empty vector when the response carries no data.
    pub fn rows<T: DeserializeOwned>(&self) -> Result<Vec<T>> {
        match &self.data {
            Some(data) => MsgPackCodec::decode(data),
            None => Ok(Vec::new()),
        }
    }

    /// Number of returned tuples.
    pub fn row_count(&self) -> Result<usize> {
        Ok(self.rows::<IgnoredAny>()?.len())
    }
}

fn skip_value(cursor: &mut Cursor<&[u8]>) -> Result<()> {
    let mut de = rmp_serde::Deserializer::new(cursor);
    IgnoredAny::deserialize(&mut de)?;
    Ok(())
}

fn read_string(cursor: &mut Cursor<&[u8]>) -> Result<String> {
    let len = rmp::decode::read_str_len(cursor)? as usize;
    let start = cursor.position() as usize;
    let bytes = cursor
        .get_ref()
        .get(start..start + len)
        .ok_or_else(|| IprotoError::Protocol("Truncated error message".into()))?;
    let text = String::from_utf8_lossy(bytes).into_owned();
    cursor.set_position((start + len) as u64);
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(code: u32, sync: u64) -> Vec<u8> {
        let mut buf = Vec::new();
        rmp::encode::write_map_len(&mut buf, 3).unwrap();
        rmp::encode::write_uint(&mut buf, keys::CODE as u64).unwrap();
        rmp::encode::write_uint(&mut buf, code as u64).unwrap();
        rmp::encode::write_uint(&mut buf, keys::SYNC as u64).unwrap();
        rmp::encode::write_uint(&mut buf, sync).unwrap();
        rmp::encode::write_uint(&mut buf, keys::SCHEMA_ID as u64).unwrap();
        rmp::encode::write_uint(&mut buf, 80).unwrap();
        buf
    }

    fn with_data<T: serde::Serialize>(code: u32, sync: u64, rows: &T) -> Bytes {
        let mut buf = header(code, sync);
        rmp::encode::write_map_len(&mut buf, 1).unwrap();
        rmp::encode::write_uint(&mut buf, keys::DATA as u64).unwrap();
        MsgPackCodec::encode_into(&mut buf, rows).unwrap();
        Bytes::from(buf)
    }

    #[test]
    fn test_decode_ok_with_rows() {
        let payload = with_data(codes::OK, 42, &vec![(1u32, "alice"), (2u32, "bob")]);

        let response = Response::decode(&payload).unwrap();

        assert_eq!(response.sync(), 42);
        assert_eq!(response.return_code(), 0);
        assert_eq!(response.schema_id(), Some(80));
        assert_eq!(response.completion_status(), CompletionStatus::Final);
        assert_eq!(response.message(), "");

        let rows: Vec<(u32, String)> = response.rows().unwrap();
        assert_eq!(rows, vec![(1, "alice".to_string()), (2, "bob".to_string())]);
        assert_eq!(response.row_count().unwrap(), 2);
    }

    #[test]
    fn test_decode_error() {
        let mut buf = header(codes::ERROR | 3, 9);
        rmp::encode::write_map_len(&mut buf, 1).unwrap();
        rmp::encode::write_uint(&mut buf, keys::ERROR as u64).unwrap();
        rmp::encode::write_str(&mut buf, "Duplicate key exists").unwrap();

        let response = Response::decode(&Bytes::from(buf)).unwrap();

        assert_eq!(response.sync(), 9);
        assert_eq!(response.return_code(), 3);
        assert_eq!(response.message(), "Duplicate key exists");
        assert!(response.is_final());
        assert!(response.data().is_none());
    }

    #[test]
    fn test_chunk_needs_retry() {
        let payload = with_data(codes::CHUNK, 5, &vec!["progress"]);
        let response = Response::decode(&payload).unwrap();

        assert_eq!(response.return_code(), 0);
        assert_eq!(response.completion_status(), CompletionStatus::RetryNeeded);
    }

    #[test]
    fn test_decode_header_only() {
        let response = Response::decode(&Bytes::from(header(codes::OK, 1))).unwrap();
        assert!(response.data().is_none());
        assert!(response.rows::<(u32,)>().unwrap().is_empty());
    }

    #[test]
    fn test_unknown_body_keys_are_skipped() {
        let mut buf = header(codes::OK, 3);
        rmp::encode::write_map_len(&mut buf, 2).unwrap();
        rmp::encode::write_uint(&mut buf, 0x52).unwrap();
        MsgPackCodec::encode_into(&mut buf, &vec![vec![1u32, 2], vec![3]]).unwrap();
        rmp::encode::write_uint(&mut buf, keys::DATA as u64).unwrap();
        MsgPackCodec::encode_into(&mut buf, &vec![(7u32,)]).unwrap();

        let response = Response::decode(&Bytes::from(buf)).unwrap();
        let rows: Vec<(u32,)> = response.rows().unwrap();
        assert_eq!(rows, vec![(7,)]);
    }

    #[test]
    fn test_missing_sync_is_protocol_error() {
        let mut buf = Vec::new();
        rmp::encode::write_map_len(&mut buf, 1).unwrap();
        rmp::encode::write_uint(&mut buf, keys::CODE as u64).unwrap();
        rmp::encode::write_uint(&mut buf, 0).unwrap();

        let result = Response::decode(&Bytes::from(buf));
        assert!(matches!(result, Err(IprotoError::Protocol(_))));
    }
}
