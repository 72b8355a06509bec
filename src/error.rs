//! Error types for farmwire.

use thiserror::Error;

/// Main error type for all farmwire operations.
///
/// Per-connection failures (`Protocol`, handshake errors, `ConnectionClosed`)
/// are handled inside the connection tasks and never unwind into the
/// coordinator; only `QueueFull` and `InvalidState` surface to the caller.
#[derive(Debug, Error)]
pub enum FarmwireError {
    /// I/O error on the underlying socket.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error while encoding or decoding the handshake payload.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Protocol violation on the wire (bad magic, oversized length,
    /// malformed message body). Fatal for the connection, never for the farm.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The peer answered the handshake with a different version key.
    #[error("Handshake version mismatch: expected {expected}, got {got}")]
    HandshakeMismatch { expected: u32, got: u32 },

    /// The peer did not complete the handshake within the deadline.
    #[error("Handshake timed out")]
    HandshakeTimeout,

    /// `push` called with the queue at its configured bound.
    #[error("Work queue full (capacity {capacity})")]
    QueueFull { capacity: usize },

    /// Operation invoked outside its valid coordinator state.
    #[error("`{op}` is not valid in state {state:?}")]
    InvalidState {
        op: &'static str,
        state: crate::master::FarmState,
    },

    /// Connection closed while a send or handshake was outstanding.
    #[error("Connection closed")]
    ConnectionClosed,
}

/// Result type alias using FarmwireError.
pub type Result<T> = std::result::Result<T, FarmwireError>;
