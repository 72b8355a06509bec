//! Dedicated writer task, one per connection.
//!
//! All sends to a given channel are funneled through an mpsc channel into a
//! single writer task. This gives every connection exactly one writer, so a
//! `broadcast` can never interleave with an in-progress work push, and it
//! enables batching multiple messages into single syscalls.
//!
//! # Architecture
//!
//! ```text
//! dispatch   ─┐
//! broadcast  ─┼─► mpsc::UnboundedSender<OutboundMessage> ─► Writer Task ─► TCP
//! shutdown   ─┘
//! ```
//!
//! The sender side is non-blocking, which lets the coordinator send while
//! holding its registry lock; partial writes are retried inside the task
//! until complete or the stream reports a fatal error.

use std::io::IoSlice;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{FarmwireError, Result};
use crate::protocol::{Header, HEADER_SIZE};

/// Maximum messages to batch in a single write operation.
const MAX_BATCH_SIZE: usize = 64;

/// A message ready to be written to the socket.
#[derive(Debug)]
pub struct OutboundMessage {
    /// Pre-encoded header (8 bytes).
    pub header: [u8; HEADER_SIZE],
    /// Payload bytes (can be empty for SHUTDOWN etc.).
    pub payload: Bytes,
}

impl OutboundMessage {
    /// Create a new outbound message.
    #[inline]
    pub fn new(header: &Header, payload: Bytes) -> Self {
        Self {
            header: header.encode(),
            payload,
        }
    }

    /// Create an outbound message of the given type, sizing the header from
    /// the payload.
    #[inline]
    pub fn from_payload(msg_type: u16, payload: Bytes) -> Self {
        Self::new(&Header::new(msg_type, payload.len() as u32), payload)
    }

    /// Create a new outbound message with empty payload.
    #[inline]
    pub fn empty(msg_type: u16) -> Self {
        Self {
            header: Header::new(msg_type, 0).encode(),
            payload: Bytes::new(),
        }
    }

    /// Total size of this message on the wire (header + payload).
    #[inline]
    pub fn size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }
}

/// Handle for sending messages to a connection's writer task.
///
/// Cheaply cloneable; sending never blocks and never awaits, so it is safe
/// to call while holding the coordinator's lock.
#[derive(Clone)]
pub struct WriterHandle {
    /// Channel sender for messages.
    tx: mpsc::UnboundedSender<OutboundMessage>,
    /// Messages queued but not yet written.
    queued: Arc<AtomicUsize>,
    /// Bytes written on this connection.
    bytes_written: Arc<AtomicU64>,
}

impl WriterHandle {
    /// Send a message to the writer task.
    ///
    /// Fails only if the connection's writer has terminated, which means the
    /// underlying stream is gone and the owning worker must be reaped.
    pub fn send(&self, message: OutboundMessage) -> Result<()> {
        self.queued.fetch_add(1, Ordering::AcqRel);
        self.tx.send(message).map_err(|_| {
            self.queued.fetch_sub(1, Ordering::Release);
            FarmwireError::ConnectionClosed
        })
    }

    /// Get the number of messages queued but not yet written.
    #[inline]
    pub fn queued_count(&self) -> usize {
        self.queued.load(Ordering::Acquire)
    }

    /// Get the number of bytes written on this connection so far.
    #[inline]
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::Acquire)
    }

    /// Check whether the writer task is still accepting messages.
    #[inline]
    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// Spawn the writer task for one connection.
///
/// `farm_bytes` is the farm-wide transfer counter; every byte written is
/// added to both it and the handle's per-connection counter.
///
/// Returns a `(WriterHandle, JoinHandle)` pair; the writer task runs until
/// every handle is dropped or the stream reports a fatal error.
pub fn spawn_writer_task<W>(
    writer: W,
    farm_bytes: Arc<AtomicU64>,
) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    let queued = Arc::new(AtomicUsize::new(0));
    let bytes_written = Arc::new(AtomicU64::new(0));

    let handle = WriterHandle {
        tx,
        queued: queued.clone(),
        bytes_written: bytes_written.clone(),
    };

    let task = tokio::spawn(writer_loop(rx, writer, queued, bytes_written, farm_bytes));

    (handle, task)
}

/// Main writer loop - receives messages and writes them to the socket.
///
/// Uses batching and scatter/gather I/O (writev) for efficiency.
async fn writer_loop<W>(
    mut rx: mpsc::UnboundedReceiver<OutboundMessage>,
    mut writer: W,
    queued: Arc<AtomicUsize>,
    bytes_written: Arc<AtomicU64>,
    farm_bytes: Arc<AtomicU64>,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    loop {
        // Wait for first message
        let first = match rx.recv().await {
            Some(m) => m,
            None => {
                // Channel closed, clean shutdown
                return Ok(());
            }
        };

        // Collect additional ready messages (non-blocking)
        let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);
        batch.push(first);

        while batch.len() < MAX_BATCH_SIZE {
            match rx.try_recv() {
                Ok(message) => batch.push(message),
                Err(_) => break,
            }
        }

        // Write the batch
        let batch_len = batch.len();
        let batch_size: usize = batch.iter().map(|m| m.size()).sum();
        write_batch(&mut writer, &batch).await?;

        queued.fetch_sub(batch_len, Ordering::Release);
        bytes_written.fetch_add(batch_size as u64, Ordering::Release);
        farm_bytes.fetch_add(batch_size as u64, Ordering::Release);
    }
}

/// Write a batch of messages using scatter/gather I/O (write_vectored).
///
/// Always uses write_vectored for both single and multiple messages to
/// minimize syscalls. A short write falls through to the retry path that
/// rebuilds the slice list from the unsent offset, so a batch either lands
/// fully on the stream or the connection is reported failed.
async fn write_batch<W>(writer: &mut W, batch: &[OutboundMessage]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    if batch.is_empty() {
        return Ok(());
    }

    // Each message contributes 1-2 slices (header, optionally payload)
    let mut slices: Vec<IoSlice<'_>> = Vec::with_capacity(batch.len() * 2);

    for message in batch {
        slices.push(IoSlice::new(&message.header));
        if !message.payload.is_empty() {
            slices.push(IoSlice::new(&message.payload));
        }
    }

    let total_size: usize = batch.iter().map(|m| m.size()).sum();

    // Fast path: single write_vectored call covers the batch
    let written = writer.write_vectored(&slices).await?;

    if written == total_size {
        writer.flush().await?;
        return Ok(());
    }

    if written == 0 {
        return Err(FarmwireError::Io(std::io::Error::new(
            std::io::ErrorKind::WriteZero,
            "write_vectored returned 0",
        )));
    }

    // Slow path: partial write, continue with remaining data
    let mut total_written = written;

    while total_written < total_size {
        let remaining_slices = build_remaining_slices(batch, total_written);
        if remaining_slices.is_empty() {
            break;
        }

        let written = writer.write_vectored(&remaining_slices).await?;
        if written == 0 {
            return Err(FarmwireError::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "write_vectored returned 0",
            )));
        }

        total_written += written;
    }

    writer.flush().await?;
    Ok(())
}

/// Build IoSlice array for remaining data after a partial write.
fn build_remaining_slices(batch: &[OutboundMessage], skip_bytes: usize) -> Vec<IoSlice<'_>> {
    let mut slices = Vec::with_capacity(batch.len() * 2);
    let mut skipped = 0;

    for message in batch {
        // Header
        let header_start = skipped;
        let header_end = skipped + HEADER_SIZE;

        if skip_bytes < header_end {
            let start_in_header = skip_bytes.saturating_sub(header_start);
            slices.push(IoSlice::new(&message.header[start_in_header..]));
        }
        skipped = header_end;

        // Payload
        if !message.payload.is_empty() {
            let payload_start = skipped;
            let payload_end = skipped + message.payload.len();

            if skip_bytes < payload_end {
                let start_in_payload = skip_bytes.saturating_sub(payload_start);
                slices.push(IoSlice::new(&message.payload[start_in_payload..]));
            }
            skipped = payload_end;
        }
    }

    slices
}
