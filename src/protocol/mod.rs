//! Protocol module - wire format, message assembly, and message types.
//!
//! This module implements the binary protocol for the farm:
//! - 8-byte header encoding/decoding (magic, type, length)
//! - Staging buffer for accumulating partial reads
//! - Message struct with typed accessors

mod message;
mod staging;
mod wire_format;

pub use message::{build_message, build_message_parts, Message};
pub use staging::StagingBuffer;
pub use wire_format::{
    msg_type, Header, ABSOLUTE_MAX_PAYLOAD_SIZE, DEFAULT_MAX_PAYLOAD_SIZE, HEADER_SIZE, MAGIC,
};
