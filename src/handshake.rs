//! Version-key handshake messages.
//!
//! A connection begins with a handshake exchange: the accepting side (the
//! master) sends its version key as a handshake-type message, and the
//! connecting side (the worker) must reply with a matching key within the
//! configured timeout or the connection is closed. The payload is a small
//! JSON document; the framing around it is the binary wire format.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{FarmwireError, Result};

/// Protocol identifier carried in every handshake payload.
pub const PROTOCOL_NAME: &str = "farmwire/1";

/// Handshake payload, sent by both sides of the exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeHello {
    /// Protocol identifier, always [`PROTOCOL_NAME`].
    pub protocol: String,
    /// Caller-supplied version key; both sides must present the same key.
    pub version_key: u32,
}

impl HandshakeHello {
    /// Create a hello for the given version key.
    pub fn new(version_key: u32) -> Self {
        Self {
            protocol: PROTOCOL_NAME.to_string(),
            version_key,
        }
    }

    /// Encode to a handshake message payload.
    pub fn encode(&self) -> Result<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }

    /// Decode from a handshake message payload.
    ///
    /// Rejects payloads that parse but name a different protocol.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let hello: Self = serde_json::from_slice(payload)?;
        if hello.protocol != PROTOCOL_NAME {
            return Err(FarmwireError::Protocol(format!(
                "Unknown handshake protocol {:?}",
                hello.protocol
            )));
        }
        Ok(hello)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hello_roundtrip() {
        let hello = HandshakeHello::new(0xDEAD);
        let payload = hello.encode().unwrap();
        let decoded = HandshakeHello::decode(&payload).unwrap();
        assert_eq!(decoded, hello);
        assert_eq!(decoded.version_key, 0xDEAD);
    }

    #[test]
    fn test_decode_rejects_wrong_protocol() {
        let payload = br#"{"protocol":"otherwire/9","version_key":1}"#;
        let result = HandshakeHello::decode(payload);
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("Unknown handshake protocol"));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(HandshakeHello::decode(b"\x00\x01\x02").is_err());
        assert!(HandshakeHello::decode(b"{}").is_err());
    }
}
