//! Server greeting parsing.
//!
//! On connect the server sends a fixed 128-byte block made of two
//! 64-byte lines:
//! ```text
//! Tarantool 2.11.1 (Binary) 7bb6b2b6-...                       \n
//! 0VSbWmCQxNtKmMqdoVJVkRDdkDnXuq2oCjYHGjYn0aA=                    \n
//! ```
//! The second line holds a base64 value whose first 20 decoded bytes are
//! the salt used by the authentication scramble.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use super::wire_format::{GREETING_SIZE, SALT_SIZE};
use crate::error::{IprotoError, Result};

const LINE_SIZE: usize = GREETING_SIZE / 2;

/// Parsed server greeting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Greeting {
    /// First line, trimmed (server name and version).
    pub version: String,
    /// Authentication salt.
    pub salt: [u8; SALT_SIZE],
}

impl Greeting {
    /// Parse a raw greeting block.
    pub fn parse(block: &[u8]) -> Result<Self> {
        if block.len() < GREETING_SIZE {
            return Err(IprotoError::Protocol(format!(
                "Greeting is {} bytes, expected {}",
                block.len(),
                GREETING_SIZE
            )));
        }

        let version = String::from_utf8_lossy(&block[..LINE_SIZE])
            .trim()
            .to_string();

        let encoded = block[LINE_SIZE..GREETING_SIZE].trim_ascii();
        let decoded = STANDARD.decode(encoded)?;
        if decoded.len() < SALT_SIZE {
            return Err(IprotoError::Protocol(format!(
                "Greeting salt is {} bytes, expected at least {}",
                decoded.len(),
                SALT_SIZE
            )));
        }

        let mut salt = [0u8; SALT_SIZE];
        salt.copy_from_slice(&decoded[..SALT_SIZE]);

        Ok(Self { version, salt })
    }

    /// Build a greeting block; used by tests and mock servers.
    pub fn encode(version: &str, salt: &[u8]) -> [u8; GREETING_SIZE] {
        let mut block = [b' '; GREETING_SIZE];
        let version = version.as_bytes();
        let n = version.len().min(LINE_SIZE - 1);
        block[..n].copy_from_slice(&version[..n]);
        block[LINE_SIZE - 1] = b'\n';

        let encoded = STANDARD.encode(salt);
        let encoded = encoded.as_bytes();
        let n = encoded.len().min(LINE_SIZE - 1);
        block[LINE_SIZE..LINE_SIZE + n].copy_from_slice(&encoded[..n]);
        block[GREETING_SIZE - 1] = b'\n';

        block
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_extracts_version_and_salt() {
        let salt: Vec<u8> = (0u8..32).collect();
        let block = Greeting::encode("Tarantool 2.11.1 (Binary)", &salt);

        let greeting = Greeting::parse(&block).unwrap();

        assert_eq!(greeting.version, "Tarantool 2.11.1 (Binary)");
        assert_eq!(&greeting.salt[..], &salt[..SALT_SIZE]);
    }

    #[test]
    fn test_parse_rejects_short_block() {
        let result = Greeting::parse(&[b' '; 64]);
        assert!(matches!(result, Err(IprotoError::Protocol(_))));
    }

    #[test]
    fn test_parse_rejects_bad_base64() {
        let mut block = [b' '; GREETING_SIZE];
        block[LINE_SIZE..LINE_SIZE + 4].copy_from_slice(b"!!!!");
        assert!(matches!(
            Greeting::parse(&block),
            Err(IprotoError::Base64(_))
        ));
    }

    #[test]
    fn test_parse_rejects_short_salt() {
        let block = Greeting::encode("Tarantool", &[1, 2, 3]);
        assert!(matches!(
            Greeting::parse(&block),
            Err(IprotoError::Protocol(_))
        ));
    }
}
