//! Message struct with typed accessors.
//!
//! Represents one complete protocol message with header and payload.
//! Uses `bytes::Bytes` for zero-copy payload sharing. Messages are
//! immutable once constructed.
//!
//! # Example
//!
//! ```
//! use farmwire::protocol::{msg_type, Header, Message};
//! use bytes::Bytes;
//!
//! let header = Header::new(msg_type::WORK, 5);
//! let message = Message::new(header, Bytes::from_static(b"hello"));
//!
//! assert_eq!(message.msg_type(), msg_type::WORK);
//! assert_eq!(message.payload(), b"hello");
//! ```

use bytes::Bytes;

use super::wire_format::{msg_type, Header, HEADER_SIZE};

/// A complete protocol message.
#[derive(Debug, Clone)]
pub struct Message {
    /// Decoded header.
    pub header: Header,
    /// Payload bytes (zero-copy via `bytes::Bytes`).
    pub payload: Bytes,
}

impl Message {
    /// Create a new message from header and payload.
    pub fn new(header: Header, payload: Bytes) -> Self {
        Self { header, payload }
    }

    /// Create a message of the given type, sizing the header from the payload.
    pub fn from_payload(msg_type: u16, payload: Bytes) -> Self {
        Self {
            header: Header::new(msg_type, payload.len() as u32),
            payload,
        }
    }

    /// Get a reference to the payload bytes.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Get a clone of the payload as Bytes (cheap, zero-copy).
    #[inline]
    pub fn payload_bytes(&self) -> Bytes {
        self.payload.clone()
    }

    /// Get the payload length.
    #[inline]
    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }

    /// Get the message type code.
    #[inline]
    pub fn msg_type(&self) -> u16 {
        self.header.msg_type
    }

    /// Check if this is a handshake message.
    #[inline]
    pub fn is_handshake(&self) -> bool {
        self.header.msg_type == msg_type::HANDSHAKE
    }

    /// Check if this is a shutdown signal.
    #[inline]
    pub fn is_shutdown(&self) -> bool {
        self.header.msg_type == msg_type::SHUTDOWN
    }
}

/// Build a complete wire message (header + payload) as a byte vector.
pub fn build_message(header: &Header, payload: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(HEADER_SIZE + payload.len());
    bytes.extend_from_slice(&header.encode());
    bytes.extend_from_slice(payload);
    bytes
}

/// Build a complete wire message from type code and payload.
pub fn build_message_parts(msg_type: u16, payload: &[u8]) -> Vec<u8> {
    build_message(&Header::new(msg_type, payload.len() as u32), payload)
}
