//! Worker-side client: connect to a master, compute units, return results.
//!
//! The [`WorkerClientBuilder`] provides a fluent API for configuring the
//! compute callback and connecting. [`WorkerClient::run`] then serves the
//! connection: it answers work pushes with results, invokes the broadcast
//! callback for farm-wide control messages, dispatches application-defined
//! codes through the handler registry, and returns cleanly on the master's
//! shutdown signal.
//!
//! # Example
//!
//! ```ignore
//! use farmwire::WorkerClient;
//!
//! #[tokio::main]
//! async fn main() -> farmwire::Result<()> {
//!     let client = WorkerClient::builder()
//!         .version_key(7)
//!         .on_work(|unit| async move {
//!             // turn the opaque unit into an opaque result
//!             Ok(unit)
//!         })
//!         .connect("203.0.113.9:1982")
//!         .await?;
//!
//!     client.run().await
//! }
//! ```

use std::future::Future;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::AsyncReadExt;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpStream, ToSocketAddrs};

use crate::error::{FarmwireError, Result};
use crate::handler::{BoxFuture, ChannelContext, HandlerRegistry, HandlerResult};
use crate::handshake::HandshakeHello;
use crate::protocol::{msg_type, StagingBuffer, DEFAULT_MAX_PAYLOAD_SIZE};
use crate::writer::{spawn_writer_task, OutboundMessage, WriterHandle};

/// Compute callback: one opaque work buffer in, one opaque result out.
///
/// An `Err` tears the connection down; the master then redispatches the
/// unit to another worker.
pub type WorkFn = Arc<dyn Fn(Bytes) -> BoxFuture<'static, Result<Bytes>> + Send + Sync>;

/// Callback for farm-wide broadcast messages.
pub type BroadcastFn = Arc<dyn Fn(Bytes) + Send + Sync>;

/// Builder for configuring and connecting a worker client.
pub struct WorkerClientBuilder {
    version_key: u32,
    max_payload_size: u32,
    registry: HandlerRegistry,
    work_fn: Option<WorkFn>,
    broadcast_fn: Option<BroadcastFn>,
}

impl WorkerClientBuilder {
    /// Create a builder with default configuration.
    pub fn new() -> Self {
        Self {
            version_key: 0,
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
            registry: HandlerRegistry::new(),
            work_fn: None,
            broadcast_fn: None,
        }
    }

    /// Set the version key to present during the handshake. Admission
    /// requires it to match the master's key.
    pub fn version_key(mut self, key: u32) -> Self {
        self.version_key = key;
        self
    }

    /// Set the maximum accepted payload size. Default: 64 MiB.
    pub fn max_payload_size(mut self, max: u32) -> Self {
        self.max_payload_size = max;
        self
    }

    /// Set the compute callback invoked for every received work unit.
    pub fn on_work<F, Fut>(mut self, work: F) -> Self
    where
        F: Fn(Bytes) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Bytes>> + Send + 'static,
    {
        self.work_fn = Some(Arc::new(move |unit| Box::pin(work(unit))));
        self
    }

    /// Set the callback invoked for broadcast control messages.
    pub fn on_broadcast<F>(mut self, broadcast: F) -> Self
    where
        F: Fn(Bytes) + Send + Sync + 'static,
    {
        self.broadcast_fn = Some(Arc::new(broadcast));
        self
    }

    /// Register a handler for an application-defined message code
    /// (at or above [`msg_type::APP_BASE`]).
    pub fn handle<F, Fut>(mut self, msg_type: u16, handler: F) -> Self
    where
        F: Fn(ChannelContext, Bytes) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.registry.register_fn(msg_type, handler);
        self
    }

    /// Connect to the master and complete the handshake.
    ///
    /// The master sends its version key first; this side verifies it,
    /// replies with its own, and is then eligible for work.
    pub async fn connect(self, addr: impl ToSocketAddrs) -> Result<WorkerClient> {
        let stream = TcpStream::connect(addr).await?;
        let _ = stream.set_nodelay(true);
        let (mut reader, write_half) = stream.into_split();

        let bytes_transferred = Arc::new(AtomicU64::new(0));
        let (writer, _writer_task) = spawn_writer_task(write_half, bytes_transferred);

        let mut staging = StagingBuffer::with_max_payload(self.max_payload_size);
        let hello_msg = read_one_message(&mut reader, &mut staging).await?;
        if !hello_msg.is_handshake() {
            return Err(FarmwireError::Protocol(format!(
                "Expected handshake, got type {:#06x}",
                hello_msg.msg_type()
            )));
        }

        let hello = HandshakeHello::decode(hello_msg.payload())?;
        if hello.version_key != self.version_key {
            return Err(FarmwireError::HandshakeMismatch {
                expected: self.version_key,
                got: hello.version_key,
            });
        }

        writer.send(OutboundMessage::from_payload(
            msg_type::HANDSHAKE,
            HandshakeHello::new(self.version_key).encode()?,
        ))?;

        tracing::info!(version_key = self.version_key, "Connected to master");

        Ok(WorkerClient {
            reader,
            staging,
            writer,
            registry: Arc::new(self.registry),
            work_fn: self.work_fn,
            broadcast_fn: self.broadcast_fn,
        })
    }
}

impl Default for WorkerClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A connected worker.
pub struct WorkerClient {
    reader: OwnedReadHalf,
    staging: StagingBuffer,
    writer: WriterHandle,
    registry: Arc<HandlerRegistry>,
    work_fn: Option<WorkFn>,
    broadcast_fn: Option<BroadcastFn>,
}

impl WorkerClient {
    /// Create a new worker client builder.
    pub fn builder() -> WorkerClientBuilder {
        WorkerClientBuilder::new()
    }

    /// Send an application-defined message to the master.
    pub fn send(&self, msg_type: u16, payload: Bytes) -> Result<()> {
        self.writer
            .send(OutboundMessage::from_payload(msg_type, payload))
    }

    /// Serve the connection until the master signals shutdown or the
    /// stream closes. Units are computed one at a time; the master marks
    /// this worker busy until its result message arrives.
    pub async fn run(mut self) -> Result<()> {
        let mut buf = vec![0u8; 64 * 1024];

        loop {
            let n = match self.reader.read(&mut buf).await {
                Ok(0) => {
                    tracing::info!("Master closed the connection");
                    return Ok(());
                }
                Ok(n) => n,
                Err(e) => return Err(e.into()),
            };

            let messages = self.staging.push(&buf[..n])?;
            for message in messages {
                match message.msg_type() {
                    msg_type::SHUTDOWN => {
                        tracing::info!("Shutdown signal received");
                        return Ok(());
                    }
                    msg_type::WORK => {
                        self.serve_unit(message.payload_bytes()).await?;
                    }
                    msg_type::BROADCAST => {
                        if let Some(broadcast_fn) = &self.broadcast_fn {
                            broadcast_fn(message.payload_bytes());
                        } else {
                            tracing::debug!(
                                payload_len = message.payload_len(),
                                "Broadcast with no callback, discarding"
                            );
                        }
                    }
                    other => {
                        let ctx = ChannelContext::new(0, self.writer.clone());
                        self.registry
                            .dispatch(other, ctx, message.payload_bytes())
                            .await?;
                    }
                }
            }
        }
    }

    /// Compute one unit and send its result back.
    async fn serve_unit(&self, payload: Bytes) -> Result<()> {
        if payload.len() < 8 {
            return Err(FarmwireError::Protocol(
                "Work payload shorter than its sequence header".to_string(),
            ));
        }
        let seq = u64::from_be_bytes(payload[..8].try_into().expect("8-byte slice"));
        let unit = payload.slice(8..);

        let work_fn = self.work_fn.as_ref().ok_or_else(|| {
            FarmwireError::Protocol("Work received but no work callback configured".to_string())
        })?;

        tracing::debug!(seq, unit_len = unit.len(), "Computing unit");
        let result = work_fn(unit).await?;

        let mut out = BytesMut::with_capacity(8 + result.len());
        out.put_u64(seq);
        out.extend_from_slice(&result);
        self.writer
            .send(OutboundMessage::from_payload(msg_type::RESULT, out.freeze()))
    }
}

/// Read exactly one message during the handshake phase.
async fn read_one_message(
    reader: &mut OwnedReadHalf,
    staging: &mut StagingBuffer,
) -> Result<crate::protocol::Message> {
    let mut buf = vec![0u8; 4096];
    loop {
        let n = match reader.read(&mut buf).await? {
            0 => return Err(FarmwireError::ConnectionClosed),
            n => n,
        };

        let mut messages = staging.push(&buf[..n])?;
        match messages.len() {
            0 => continue,
            1 => return Ok(messages.remove(0)),
            _ => {
                return Err(FarmwireError::Protocol(
                    "Unexpected pipelined messages during handshake".to_string(),
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_configuration() {
        let builder = WorkerClient::builder()
            .version_key(42)
            .max_payload_size(1024)
            .on_work(|unit| async move { Ok(unit) })
            .on_broadcast(|_payload| {})
            .handle(msg_type::APP_BASE + 1, |_ctx, _payload| async { Ok(()) });

        assert_eq!(builder.version_key, 42);
        assert_eq!(builder.max_payload_size, 1024);
        assert!(builder.work_fn.is_some());
        assert!(builder.broadcast_fn.is_some());
        assert!(builder.registry.has_handler(msg_type::APP_BASE + 1));
    }

    #[tokio::test]
    async fn test_connect_refused_without_listener() {
        // Nothing listening on this socket
        let result = WorkerClient::builder().connect("127.0.0.1:1").await;
        assert!(matches!(result, Err(FarmwireError::Io(_))));
    }
}
