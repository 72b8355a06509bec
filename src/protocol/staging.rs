//! Staging buffer for accumulating partial reads.
//!
//! Uses `bytes::BytesMut` for zero-copy buffer management.
//! Implements a state machine for handling fragmented messages:
//! - `WaitingForHeader`: Need at least 8 bytes
//! - `WaitingForPayload`: Header parsed and validated, need N more payload bytes
//!
//! The magic constant is checked as soon as a full header has accumulated,
//! before any payload allocation. No message is ever surfaced until it is
//! byte-exact complete, regardless of how small the fragments arrive.
//!
//! # Example
//!
//! ```ignore
//! use farmwire::protocol::StagingBuffer;
//!
//! let mut staging = StagingBuffer::new();
//!
//! // Data arrives in arbitrary chunks from the socket
//! let chunk = vec![0u8; 100];
//! let messages = staging.push(&chunk).unwrap();
//!
//! for message in messages {
//!     println!("Got message of type {}", message.msg_type());
//! }
//! ```

use bytes::BytesMut;

use super::message::Message;
use super::wire_format::{Header, DEFAULT_MAX_PAYLOAD_SIZE, HEADER_SIZE};
use crate::error::Result;

/// State machine for message assembly.
#[derive(Debug, Clone)]
enum State {
    /// Waiting for complete header (need 8 bytes).
    WaitingForHeader,
    /// Header parsed and validated, waiting for payload bytes.
    WaitingForPayload { header: Header, remaining: u32 },
}

/// Buffer for accumulating incoming bytes and extracting complete messages.
///
/// Uses a state machine to handle partial reads efficiently.
/// All data is stored in a single `BytesMut` buffer to minimize allocations.
pub struct StagingBuffer {
    /// Accumulated bytes from socket reads.
    buffer: BytesMut,
    /// Current assembly state.
    state: State,
    /// Maximum allowed payload size.
    max_payload_size: u32,
}

impl StagingBuffer {
    /// Create a new staging buffer with default settings.
    ///
    /// Default capacity: 64KB, max payload: 64 MiB.
    pub fn new() -> Self {
        Self::with_max_payload(DEFAULT_MAX_PAYLOAD_SIZE)
    }

    /// Create a new staging buffer with a custom max payload size.
    pub fn with_max_payload(max_payload_size: u32) -> Self {
        Self {
            buffer: BytesMut::with_capacity(64 * 1024),
            state: State::WaitingForHeader,
            max_payload_size,
        }
    }

    /// Push data into the buffer and extract all complete messages.
    ///
    /// This is the main API for processing incoming data from the socket.
    /// Returns a vector of complete messages. If data is fragmented,
    /// partial data is buffered internally for the next push.
    ///
    /// # Errors
    ///
    /// Returns a `Protocol` error on a bad magic constant or a header
    /// announcing a payload above `max_payload_size`. Both are
    /// connection-fatal: the caller must tear the channel down.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Message>> {
        // Single allocation to add data to buffer
        self.buffer.extend_from_slice(data);

        let mut messages = Vec::new();

        // Assemble as many complete messages as possible
        while let Some(message) = self.try_extract_one()? {
            messages.push(message);
        }

        Ok(messages)
    }

    /// Try to extract a single message from the buffer.
    ///
    /// Returns:
    /// - `Ok(Some(message))` if a complete message was extracted
    /// - `Ok(None)` if more data is needed
    /// - `Err(...)` on a protocol violation
    fn try_extract_one(&mut self) -> Result<Option<Message>> {
        match &self.state {
            State::WaitingForHeader => {
                if self.buffer.len() < HEADER_SIZE {
                    return Ok(None);
                }

                // Parse header (peek, don't consume yet)
                let header =
                    Header::decode(&self.buffer[..HEADER_SIZE]).expect("Buffer has enough bytes");

                // Validate magic and payload size before allocating anything
                header.validate(self.max_payload_size)?;

                // Consume header bytes
                let _ = self.buffer.split_to(HEADER_SIZE);

                if header.payload_length == 0 {
                    // Empty payload, message is complete
                    return Ok(Some(Message::new(header, bytes::Bytes::new())));
                }

                // Transition to waiting for payload
                self.state = State::WaitingForPayload {
                    header,
                    remaining: header.payload_length,
                };

                // Try to get payload immediately
                self.try_extract_one()
            }

            State::WaitingForPayload { header, remaining } => {
                let remaining = *remaining as usize;

                if self.buffer.len() < remaining {
                    return Ok(None);
                }

                // Extract payload (zero-copy freeze)
                let payload = self.buffer.split_to(remaining).freeze();
                let header = *header;

                // Reset state for next message
                self.state = State::WaitingForHeader;

                Ok(Some(Message::new(header, payload)))
            }
        }
    }

    /// Get the number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Clear the buffer and reset state.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.state = State::WaitingForHeader;
    }

    /// Get the current state name for debugging.
    #[cfg(test)]
    fn state_name(&self) -> &'static str {
        match &self.state {
            State::WaitingForHeader => "WaitingForHeader",
            State::WaitingForPayload { .. } => "WaitingForPayload",
        }
    }
}

impl Default for StagingBuffer {
    fn default() -> Self {
        Self::new()
    }
}
