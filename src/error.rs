//! Error types for iproto-client.

use std::sync::Arc;

use thiserror::Error;

/// Main error type for all iproto operations.
///
/// The type is `Clone` so that a single transport fault can be handed to
/// every request that was pending when the connection went down.
#[derive(Debug, Clone, Error)]
pub enum IprotoError {
    /// Transport fault: connect failure, reset, EOF, failed handshake.
    #[error("Network error: {0}")]
    Network(Arc<std::io::Error>),

    /// Server answered with a non-zero return code, or a request ran out of
    /// retry attempts.
    #[error("Database error {code}: {message}")]
    Database { code: u32, message: String },

    /// Schema lookup failed.
    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    /// The connection was closed while the request was pending.
    #[error("Request cancelled")]
    Cancelled,

    /// The request raced with a teardown and was never sent.
    #[error("Not connected")]
    NotConnected,

    /// Protocol violation (bad prefix, malformed greeting or body).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// MsgPack serialization error.
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(Arc<rmp_serde::encode::Error>),

    /// MsgPack deserialization error.
    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(Arc<rmp_serde::decode::Error>),

    /// Low-level MsgPack write error.
    #[error("MsgPack write error: {0}")]
    MsgPackWrite(Arc<rmp::encode::ValueWriteError>),

    /// Low-level MsgPack read error.
    #[error("MsgPack read error: {0}")]
    MsgPackRead(Arc<rmp::decode::ValueReadError>),

    /// Low-level MsgPack integer read error.
    #[error("MsgPack integer read error: {0}")]
    MsgPackNumRead(Arc<rmp::decode::NumValueReadError>),

    /// Invalid base64 salt in the server greeting.
    #[error("Base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),
}

/// Failures of the space/index resolution.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("There's no space with {0}")]
    SpaceNotFound(String),

    #[error("There's no index with {index} in space '{space}'")]
    IndexNotFound { space: String, index: String },

    /// More than one metadata row matched a unique key.
    #[error("Inconsistent schema: {0}")]
    Inconsistent(String),
}

impl IprotoError {
    /// Build a network error from an I/O kind and message.
    pub fn network(kind: std::io::ErrorKind, message: &str) -> Self {
        IprotoError::Network(Arc::new(std::io::Error::new(kind, message.to_string())))
    }

    /// Whether this error is a transport fault.
    pub fn is_network(&self) -> bool {
        matches!(self, IprotoError::Network(_))
    }
}

impl From<std::io::Error> for IprotoError {
    fn from(err: std::io::Error) -> Self {
        IprotoError::Network(Arc::new(err))
    }
}

impl From<rmp_serde::encode::Error> for IprotoError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        IprotoError::MsgPackEncode(Arc::new(err))
    }
}

impl From<rmp_serde::decode::Error> for IprotoError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        IprotoError::MsgPackDecode(Arc::new(err))
    }
}

impl From<rmp::encode::ValueWriteError> for IprotoError {
    fn from(err: rmp::encode::ValueWriteError) -> Self {
        IprotoError::MsgPackWrite(Arc::new(err))
    }
}

impl From<rmp::decode::ValueReadError> for IprotoError {
    fn from(err: rmp::decode::ValueReadError) -> Self {
        IprotoError::MsgPackRead(Arc::new(err))
    }
}

impl From<rmp::decode::NumValueReadError> for IprotoError {
    fn from(err: rmp::decode::NumValueReadError) -> Self {
        IprotoError::MsgPackNumRead(Arc::new(err))
    }
}

/// Result type alias using IprotoError.
pub type Result<T> = std::result::Result<T, IprotoError>;
