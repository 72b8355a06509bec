//! Wire format encoding and decoding.
//!
//! Implements the 8-byte header format:
//! ```text
//! ┌──────────┬───────────┬──────────┐
//! │ Magic    │ Msg Type  │ Length   │
//! │ 2 bytes  │ 2 bytes   │ 4 bytes  │
//! │ uint16 BE│ uint16 BE │ uint32 BE│
//! └──────────┴───────────┴──────────┘
//! ```
//!
//! All multi-byte integers are Big Endian (network byte order). The header
//! is followed by exactly `length` payload bytes.

use crate::error::{FarmwireError, Result};

/// Header size in bytes (fixed, exactly 8).
pub const HEADER_SIZE: usize = 8;

/// Magic constant identifying a farmwire message on the wire.
pub const MAGIC: u16 = 0x41FE;

/// Default maximum payload size (64 MiB).
pub const DEFAULT_MAX_PAYLOAD_SIZE: u32 = 64 * 1024 * 1024;

/// Absolute maximum payload size (~2 GB, max i32).
pub const ABSOLUTE_MAX_PAYLOAD_SIZE: u32 = 2_147_483_647;

/// Protocol message type codes.
///
/// Codes below [`msg_type::APP_BASE`] belong to the closed protocol set;
/// application-defined codes must be registered at or above the floor.
pub mod msg_type {
    /// Version-key handshake (JSON payload, both directions).
    pub const HANDSHAKE: u16 = 0x0001;
    /// Work unit push: 8-byte sequence number followed by unit bytes.
    pub const WORK: u16 = 0x0002;
    /// Completed result: 8-byte sequence number followed by result bytes.
    pub const RESULT: u16 = 0x0003;
    /// Control message fanned to every connected worker.
    pub const BROADCAST: u16 = 0x0004;
    /// Farm teardown signal (empty payload).
    pub const SHUTDOWN: u16 = 0x0005;
    /// Reserved floor for application-defined message codes.
    pub const APP_BASE: u16 = 0x0100;
}

/// Decoded header from wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Magic constant (must equal [`MAGIC`] on a well-formed stream).
    pub magic: u16,
    /// Message type code.
    pub msg_type: u16,
    /// Payload length in bytes.
    pub payload_length: u32,
}

impl Header {
    /// Create a new header with the protocol magic filled in.
    pub fn new(msg_type: u16, payload_length: u32) -> Self {
        Self {
            magic: MAGIC,
            msg_type,
            payload_length,
        }
    }

    /// Encode header to bytes (Big Endian).
    ///
    /// # Example
    ///
    /// ```
    /// use farmwire::protocol::{msg_type, Header};
    ///
    /// let header = Header::new(msg_type::WORK, 100);
    /// let bytes = header.encode();
    /// assert_eq!(bytes.len(), 8);
    /// ```
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        self.encode_into(&mut buf);
        buf
    }

    /// Encode header into an existing buffer.
    ///
    /// # Panics
    ///
    /// Panics if buffer is smaller than `HEADER_SIZE` (8 bytes).
    pub fn encode_into(&self, buf: &mut [u8]) {
        debug_assert!(buf.len() >= HEADER_SIZE);
        buf[0..2].copy_from_slice(&self.magic.to_be_bytes());
        buf[2..4].copy_from_slice(&self.msg_type.to_be_bytes());
        buf[4..8].copy_from_slice(&self.payload_length.to_be_bytes());
    }

    /// Decode header from bytes (Big Endian).
    ///
    /// Returns `None` if buffer is too short. Does not validate the magic;
    /// see [`Header::validate`].
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_SIZE {
            return None;
        }
        Some(Self {
            magic: u16::from_be_bytes([buf[0], buf[1]]),
            msg_type: u16::from_be_bytes([buf[2], buf[3]]),
            payload_length: u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
        })
    }

    /// Validate the header for protocol compliance.
    ///
    /// Checks:
    /// - Magic matches [`MAGIC`]
    /// - Payload length doesn't exceed `max_payload_size`
    ///
    /// Both failures are connection-fatal: a bad magic means the stream is
    /// not speaking this protocol, and an oversized length would otherwise
    /// inflate a buffer allocation from a corrupted header.
    pub fn validate(&self, max_payload_size: u32) -> Result<()> {
        if self.magic != MAGIC {
            return Err(FarmwireError::Protocol(format!(
                "Bad magic: expected {:#06x}, got {:#06x}",
                MAGIC, self.magic
            )));
        }

        if self.payload_length > max_payload_size {
            return Err(FarmwireError::Protocol(format!(
                "Payload size {} exceeds maximum {}",
                self.payload_length, max_payload_size
            )));
        }

        Ok(())
    }

    /// Check if this is a handshake message.
    #[inline]
    pub fn is_handshake(&self) -> bool {
        self.msg_type == msg_type::HANDSHAKE
    }

    /// Check if this is a shutdown signal.
    #[inline]
    pub fn is_shutdown(&self) -> bool {
        self.msg_type == msg_type::SHUTDOWN
    }

    /// Check if the message type is application-defined.
    #[inline]
    pub fn is_app_type(&self) -> bool {
        self.msg_type >= msg_type::APP_BASE
    }
}
