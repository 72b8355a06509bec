//! Master coordinator for one work farm.
//!
//! The [`MasterBuilder`] provides a fluent API for configuring the farm and
//! binding the listening endpoint. The [`Master`] then drives the lifecycle:
//! 1. `begin()` starts accepting worker connections
//! 2. `push()` enqueues opaque work units
//! 3. results arrive asynchronously through the result callback
//! 4. `end()` closes the submission, `wait()` blocks until it drains
//! 5. `shutdown()` tears the farm down
//!
//! Workers are admitted through a version-key handshake and reaped when
//! their stream errors or closes; a reaped worker's in-flight unit goes
//! back to the pending queue, so work survives worker churn (at-least-once
//! delivery of computation).
//!
//! # Example
//!
//! ```ignore
//! use farmwire::Master;
//!
//! #[tokio::main]
//! async fn main() -> farmwire::Result<()> {
//!     let master = Master::builder()
//!         .version_key(7)
//!         .on_result(|seq, bytes| {
//!             println!("unit {} finished: {} bytes", seq, bytes.len());
//!         })
//!         .bind("0.0.0.0:1982")
//!         .await?;
//!
//!     master.begin()?;
//!     for chunk in [&b"a"[..], b"b", b"c"] {
//!         master.push(chunk.to_vec())?;
//!     }
//!     master.end()?;
//!     master.wait().await?;
//!     master.shutdown();
//!     Ok(())
//! }
//! ```

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::AsyncReadExt;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::error::{FarmwireError, Result};
use crate::handler::{ChannelContext, HandlerRegistry, HandlerResult};
use crate::handshake::HandshakeHello;
use crate::protocol::{msg_type, Message, StagingBuffer, DEFAULT_MAX_PAYLOAD_SIZE};
use crate::queue::WorkQueue;
use crate::workers::{WorkerId, WorkerTable};
use crate::writer::{spawn_writer_task, OutboundMessage, WriterHandle};

/// Default bound on outstanding units (pending + in flight).
pub const DEFAULT_QUEUE_CAPACITY: usize = 4096;

/// Default handshake deadline.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Read buffer size for worker channels.
const READ_BUF_SIZE: usize = 64 * 1024;

/// Coordinator lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FarmState {
    /// Endpoint bound, not yet accepting.
    Initialized,
    /// Accepting workers and dispatching units.
    Running,
    /// No further units will be pushed; draining outstanding work.
    Draining,
    /// Farm torn down.
    Shutdown,
}

/// Eventually-consistent snapshot of farm counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FarmStats {
    /// Workers currently admitted.
    pub active_workers: usize,
    /// Bytes moved over all channels, both directions.
    pub total_bytes_transferred: u64,
    /// Units whose result reached the callback.
    pub total_units_completed: u64,
    /// Units dropped after exceeding the redispatch cap.
    pub units_abandoned: u64,
}

/// Per-worker snapshot for the statistics consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerStats {
    /// Stable worker slot id.
    pub id: WorkerId,
    /// Peer address.
    pub addr: SocketAddr,
    /// Bytes written to this worker's channel so far.
    pub bytes_sent: u64,
    /// Whether a unit is currently assigned.
    pub busy: bool,
}

/// Callback invoked with `(sequence, result)` for every completed unit.
///
/// Invoked from whichever connection task observes the completion, so it
/// must be safe to call from multiple tasks; results may arrive in any
/// order relative to submission.
pub type ResultCallback = Arc<dyn Fn(u64, Bytes) + Send + Sync>;

/// Builder for configuring and binding a farm master.
pub struct MasterBuilder {
    version_key: u32,
    queue_capacity: usize,
    handshake_timeout: Duration,
    max_payload_size: u32,
    max_redispatch: Option<u32>,
    registry: HandlerRegistry,
    callback: Option<ResultCallback>,
}

impl MasterBuilder {
    /// Create a builder with default configuration.
    pub fn new() -> Self {
        Self {
            version_key: 0,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
            max_redispatch: None,
            registry: HandlerRegistry::new(),
            callback: None,
        }
    }

    /// Set the version key workers must present during the handshake.
    pub fn version_key(mut self, key: u32) -> Self {
        self.version_key = key;
        self
    }

    /// Set the bound on outstanding units. `push` past the bound fails
    /// with [`FarmwireError::QueueFull`]. Default: 4096.
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Set the handshake deadline. Default: 5 seconds.
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Set the maximum accepted payload size. Default: 64 MiB.
    pub fn max_payload_size(mut self, max: u32) -> Self {
        self.max_payload_size = max;
        self
    }

    /// Cap how many times a unit may be redispatched after worker deaths.
    ///
    /// `None` (the default) retries forever. `Some(n)` abandons a unit once
    /// it has been recovered from a dead worker more than `n` times; the
    /// abandonment is logged, counted in [`FarmStats::units_abandoned`],
    /// and the unit is treated as settled so `wait()` still terminates.
    pub fn max_redispatch(mut self, cap: Option<u32>) -> Self {
        self.max_redispatch = cap;
        self
    }

    /// Store the result callback, invoked with `(sequence, result)`.
    ///
    /// Without one, results are silently discarded.
    pub fn on_result<F>(mut self, callback: F) -> Self
    where
        F: Fn(u64, Bytes) + Send + Sync + 'static,
    {
        self.callback = Some(Arc::new(callback));
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

    /// Bind the listening endpoint and create the master in `Initialized`
    /// state. No connections are accepted until `begin()`.
    pub async fn bind(self, addr: impl ToSocketAddrs) -> Result<Master> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;

        let callback = self
            .callback
            .unwrap_or_else(|| Arc::new(|_seq, _result| {}));

        let inner = Arc::new(MasterInner {
            local_addr,
            version_key: self.version_key,
            handshake_timeout: self.handshake_timeout,
            max_payload_size: self.max_payload_size,
            max_redispatch: self.max_redispatch,
            callback,
            core: Mutex::new(Core {
                state: FarmState::Initialized,
                queue: WorkQueue::new(self.queue_capacity),
                workers: WorkerTable::new(),
                listener: Some(listener),
                accept_task: None,
                app_registry: Some(self.registry),
                registry: None,
            }),
            drained: Notify::new(),
            active_workers: AtomicUsize::new(0),
            bytes_transferred: Arc::new(AtomicU64::new(0)),
            units_completed: AtomicU64::new(0),
            units_abandoned: AtomicU64::new(0),
        });

        Ok(Master { inner })
    }
}

impl Default for MasterBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Mutable coordinator state, serialized under one mutex.
///
/// The queue and the worker table are the only state mutated from more
/// than one task; everything that touches either goes through this lock,
/// and nothing awaits while holding it.
struct Core {
    state: FarmState,
    queue: WorkQueue,
    workers: WorkerTable,
    listener: Option<TcpListener>,
    accept_task: Option<JoinHandle<()>>,
    /// Application-registered handlers, held until `begin()` seals them.
    app_registry: Option<HandlerRegistry>,
    /// Sealed dispatch table, built once at `begin()`.
    registry: Option<Arc<HandlerRegistry>>,
}

struct MasterInner {
    local_addr: SocketAddr,
    version_key: u32,
    handshake_timeout: Duration,
    max_payload_size: u32,
    max_redispatch: Option<u32>,
    callback: ResultCallback,
    core: Mutex<Core>,
    drained: Notify,
    active_workers: AtomicUsize,
    bytes_transferred: Arc<AtomicU64>,
    units_completed: AtomicU64,
    units_abandoned: AtomicU64,
}

impl MasterInner {
    fn core(&self) -> MutexGuard<'_, Core> {
        self.core.lock().expect("coordinator lock poisoned")
    }
}

/// One farm instance: the listening endpoint, the worker registry, the
/// work queue and the aggregate counters.
///
/// Exactly one `Master` exists per farm; dropping it tears the farm down.
pub struct Master {
    inner: Arc<MasterInner>,
}

impl Master {
    /// Create a new master builder.
    pub fn builder() -> MasterBuilder {
        MasterBuilder::new()
    }

    /// The bound listening endpoint. Useful after binding port 0.
    pub fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr
    }

    /// Current coordinator state.
    pub fn state(&self) -> FarmState {
        self.inner.core().state
    }

    /// Snapshot the farm counters.
    pub fn stats(&self) -> FarmStats {
        FarmStats {
            active_workers: self.inner.active_workers.load(Ordering::Acquire),
            total_bytes_transferred: self.inner.bytes_transferred.load(Ordering::Acquire),
            total_units_completed: self.inner.units_completed.load(Ordering::Acquire),
            units_abandoned: self.inner.units_abandoned.load(Ordering::Acquire),
        }
    }

    /// Snapshot the per-worker figures, ordered by slot id.
    pub fn worker_stats(&self) -> Vec<WorkerStats> {
        let core = self.inner.core();
        let mut stats: Vec<WorkerStats> = core
            .workers
            .iter()
            .map(|worker| WorkerStats {
                id: worker.id,
                addr: worker.addr,
                bytes_sent: worker.bytes_sent(),
                busy: !worker.is_idle(),
            })
            .collect();
        stats.sort_unstable_by_key(|s| s.id);
        stats
    }

    /// Number of workers currently admitted.
    pub fn active_workers(&self) -> usize {
        self.inner.active_workers.load(Ordering::Acquire)
    }

    /// Start accepting worker connections and dispatching already-pushed
    /// units. Valid once, from `Initialized`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn begin(&self) -> Result<()> {
        let mut core = self.inner.core();
        if core.state != FarmState::Initialized {
            return Err(FarmwireError::InvalidState {
                op: "begin",
                state: core.state,
            });
        }
        core.state = FarmState::Running;

        // Seal the dispatch table for this role
        let mut registry = core.app_registry.take().unwrap_or_default();
        let weak = Arc::downgrade(&self.inner);
        registry.register_fn(msg_type::RESULT, move |ctx, payload| {
            let weak = weak.clone();
            async move {
                match weak.upgrade() {
                    Some(inner) => handle_result(&inner, ctx.channel_id(), payload),
                    None => Ok(()),
                }
            }
        });
        core.registry = Some(Arc::new(registry));

        let listener = core
            .listener
            .take()
            .expect("listener present until begin");
        core.accept_task = Some(tokio::spawn(accept_loop(self.inner.clone(), listener)));

        tracing::info!(addr = %self.inner.local_addr, "Farm accepting workers");
        Ok(())
    }

    /// Enqueue one opaque work unit, returning its sequence number.
    ///
    /// Valid from `Initialized` (queued until `begin`) and `Running`.
    pub fn push(&self, data: impl Into<Bytes>) -> Result<u64> {
        let mut core = self.inner.core();
        match core.state {
            FarmState::Initialized | FarmState::Running => {}
            state => {
                return Err(FarmwireError::InvalidState { op: "push", state });
            }
        }

        let seq = core.queue.push(data.into())?;
        if core.state == FarmState::Running {
            dispatch_ready(&mut core);
        }
        Ok(seq)
    }

    /// Mark that no further units will be pushed for this submission.
    pub fn end(&self) -> Result<()> {
        let mut core = self.inner.core();
        if core.state != FarmState::Running {
            return Err(FarmwireError::InvalidState {
                op: "end",
                state: core.state,
            });
        }
        core.state = FarmState::Draining;
        Ok(())
    }

    /// Block until every pushed unit has been delivered (pending and
    /// in-flight both empty), or the farm is shut down.
    pub async fn wait(&self) -> Result<()> {
        loop {
            let notified = self.inner.drained.notified();
            {
                let core = self.inner.core();
                if core.queue.is_drained() || core.state == FarmState::Shutdown {
                    return Ok(());
                }
            }
            notified.await;
        }
    }

    /// Send a message to every connected worker, busy or idle.
    ///
    /// Sends go through each worker's single writer task, so a broadcast
    /// never interleaves with an in-progress work push on the same channel.
    pub fn broadcast(&self, payload: impl Into<Bytes>) -> Result<()> {
        let core = self.inner.core();
        match core.state {
            FarmState::Running | FarmState::Draining => {}
            state => {
                return Err(FarmwireError::InvalidState {
                    op: "broadcast",
                    state,
                });
            }
        }

        let payload: Bytes = payload.into();
        for worker in core.workers.iter() {
            if worker
                .writer
                .send(OutboundMessage::from_payload(
                    msg_type::BROADCAST,
                    payload.clone(),
                ))
                .is_err()
            {
                // Channel already failed; the worker's read loop will reap it
                tracing::debug!(worker = worker.id, "Broadcast skipped dead channel");
            }
        }
        Ok(())
    }

    /// Send a termination message to every worker, close all channels and
    /// transition to `Shutdown`. Does not wait for in-flight results;
    /// callers needing a graceful drain use `end(); wait()` first.
    pub fn shutdown(&self) {
        let workers = {
            let mut core = self.inner.core();
            if core.state == FarmState::Shutdown {
                return;
            }
            core.state = FarmState::Shutdown;

            if let Some(task) = core.accept_task.take() {
                task.abort();
            }
            core.listener = None;

            self.inner.active_workers.store(0, Ordering::Release);
            core.workers.drain()
        };

        tracing::info!(workers = workers.len(), "Farm shutting down");

        for mut worker in workers {
            // The writer task drains queued messages after its handles drop,
            // so the termination message still reaches the wire
            let _ = worker.writer.send(OutboundMessage::empty(msg_type::SHUTDOWN));
            if let Some(task) = worker.conn_task.take() {
                task.abort();
            }
        }

        self.inner.drained.notify_waiters();
    }
}

impl Drop for Master {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Accept loop: admits connections until the task is aborted at shutdown.
async fn accept_loop(inner: Arc<MasterInner>, listener: TcpListener) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let inner = inner.clone();
                tokio::spawn(async move {
                    if let Err(e) = admit_worker(inner, stream, addr).await {
                        tracing::warn!(%addr, error = %e, "Worker admission failed");
                    }
                });
            }
            Err(e) => {
                tracing::warn!(error = %e, "Accept failed");
            }
        }
    }
}

/// Handshake and admission for one incoming connection.
///
/// A connection that fails here is closed without ever appearing in the
/// worker registry; `active_workers` is untouched.
async fn admit_worker(
    inner: Arc<MasterInner>,
    stream: TcpStream,
    addr: SocketAddr,
) -> Result<()> {
    let _ = stream.set_nodelay(true);
    let (mut reader, write_half) = stream.into_split();
    let (writer, _writer_task) = spawn_writer_task(write_half, inner.bytes_transferred.clone());

    // Accepting side sends its version key first
    writer.send(OutboundMessage::from_payload(
        msg_type::HANDSHAKE,
        HandshakeHello::new(inner.version_key).encode()?,
    ))?;

    let mut staging = StagingBuffer::with_max_payload(inner.max_payload_size);
    let reply = timeout(
        inner.handshake_timeout,
        read_one_message(&inner, &mut reader, &mut staging),
    )
    .await
    .map_err(|_| FarmwireError::HandshakeTimeout)??;

    if !reply.is_handshake() {
        return Err(FarmwireError::Protocol(format!(
            "Expected handshake reply, got type {:#06x}",
            reply.msg_type()
        )));
    }
    let hello = HandshakeHello::decode(reply.payload())?;
    if hello.version_key != inner.version_key {
        return Err(FarmwireError::HandshakeMismatch {
            expected: inner.version_key,
            got: hello.version_key,
        });
    }

    let worker_id = {
        let mut core = inner.core();
        if core.state == FarmState::Shutdown {
            return Err(FarmwireError::ConnectionClosed);
        }
        let worker_id = core.workers.insert(addr, writer.clone());
        let task = tokio::spawn(worker_read_loop(
            inner.clone(),
            worker_id,
            reader,
            staging,
            writer,
        ));
        if let Some(worker) = core.workers.get_mut(worker_id) {
            worker.conn_task = Some(task);
        }
        inner.active_workers.fetch_add(1, Ordering::AcqRel);
        dispatch_ready(&mut core);
        worker_id
    };

    tracing::info!(worker = worker_id, %addr, "Worker admitted");
    Ok(())
}

/// Read exactly one message during the handshake phase.
///
/// The worker has nothing legitimate to send before admission, so a second
/// pipelined message here is a protocol violation.
async fn read_one_message(
    inner: &MasterInner,
    reader: &mut OwnedReadHalf,
    staging: &mut StagingBuffer,
) -> Result<Message> {
    let mut buf = vec![0u8; 4096];
    loop {
        let n = match reader.read(&mut buf).await? {
            0 => return Err(FarmwireError::ConnectionClosed),
            n => n,
        };
        inner.bytes_transferred.fetch_add(n as u64, Ordering::Release);

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

/// Per-worker receive loop: assembles messages and feeds the dispatch
/// table until the stream closes or violates the protocol, then reaps.
async fn worker_read_loop(
    inner: Arc<MasterInner>,
    worker_id: WorkerId,
    mut reader: OwnedReadHalf,
    mut staging: StagingBuffer,
    writer: WriterHandle,
) {
    let registry = match inner.core().registry.clone() {
        Some(registry) => registry,
        None => return,
    };

    let mut buf = vec![0u8; READ_BUF_SIZE];
    let outcome: Result<()> = 'read: loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break 'read Ok(()),
            Ok(n) => n,
            Err(e) => break 'read Err(e.into()),
        };
        inner.bytes_transferred.fetch_add(n as u64, Ordering::Release);

        let messages = match staging.push(&buf[..n]) {
            Ok(messages) => messages,
            Err(e) => break 'read Err(e),
        };

        for message in messages {
            let ctx = ChannelContext::new(worker_id, writer.clone());
            if let Err(e) = registry
                .dispatch(message.msg_type(), ctx, message.payload_bytes())
                .await
            {
                break 'read Err(e);
            }
        }
    };

    match outcome {
        Ok(()) => tracing::info!(worker = worker_id, "Worker disconnected"),
        Err(e) => tracing::warn!(worker = worker_id, error = %e, "Worker channel failed"),
    }

    reap(&inner, worker_id);
}

/// Parse and apply one result message from a worker.
fn handle_result(inner: &Arc<MasterInner>, worker_id: WorkerId, payload: Bytes) -> Result<()> {
    if payload.len() < 8 {
        return Err(FarmwireError::Protocol(
            "Result payload shorter than its sequence header".to_string(),
        ));
    }
    let seq = u64::from_be_bytes(payload[..8].try_into().expect("8-byte slice"));
    let result = payload.slice(8..);
    complete(inner, worker_id, seq, result);
    Ok(())
}

/// Settle a completed unit: remove it from the in-flight table, free the
/// owning worker, refill the farm, then invoke the result callback.
fn complete(inner: &Arc<MasterInner>, worker_id: WorkerId, seq: u64, result: Bytes) {
    {
        let mut core = inner.core();
        let owner = match core.queue.complete(seq) {
            Some(owner) => owner,
            None => {
                // Duplicate computation from a reaped worker that finished
                // after its unit was already redispatched and settled
                tracing::debug!(worker = worker_id, seq, "Stale result, discarding");
                return;
            }
        };
        if let Some(worker) = core.workers.get_mut(owner) {
            worker.assigned = None;
        }
        inner.units_completed.fetch_add(1, Ordering::Release);
        dispatch_ready(&mut core);
    }

    // Callback runs outside the lock; it may be arbitrarily slow
    (inner.callback)(seq, result);

    if inner.core().queue.is_drained() {
        inner.drained.notify_waiters();
    }
}

/// Remove a dead worker and recover its in-flight unit.
///
/// A worker dying never changes the coordinator's own state; the unit is
/// requeued for redispatch (or abandoned past the configured cap).
fn reap(inner: &Arc<MasterInner>, worker_id: WorkerId) {
    let mut core = inner.core();
    let worker = match core.workers.remove(worker_id) {
        Some(worker) => worker,
        // Already drained by shutdown
        None => return,
    };
    inner.active_workers.fetch_sub(1, Ordering::AcqRel);
    tracing::info!(worker = worker_id, addr = %worker.addr, "Worker reaped");

    if core.state == FarmState::Shutdown {
        return;
    }

    if let Some(unit) = core.queue.release_worker(worker_id) {
        match inner.max_redispatch {
            Some(cap) if unit.attempts > cap => {
                tracing::warn!(
                    seq = unit.seq,
                    attempts = unit.attempts,
                    cap,
                    "Abandoning unit past redispatch cap"
                );
                inner.units_abandoned.fetch_add(1, Ordering::Release);
            }
            _ => {
                tracing::info!(seq = unit.seq, "Requeueing unit from dead worker");
                core.queue.requeue_front(unit);
                dispatch_ready(&mut core);
            }
        }
    }

    if core.queue.is_drained() {
        inner.drained.notify_waiters();
    }
}

/// Hand the head of the pending queue to every idle worker.
///
/// Pops are FIFO, so submission order is the tie-break when several units
/// are ready at once.
fn dispatch_ready(core: &mut Core) {
    if core.state != FarmState::Running && core.state != FarmState::Draining {
        return;
    }

    for worker_id in core.workers.idle_ids() {
        let unit = match core.queue.pop_pending() {
            Some(unit) => unit,
            None => break,
        };

        let mut payload = BytesMut::with_capacity(8 + unit.data.len());
        payload.put_u64(unit.seq);
        payload.extend_from_slice(&unit.data);
        let message = OutboundMessage::from_payload(msg_type::WORK, payload.freeze());

        let sent = core
            .workers
            .get(worker_id)
            .map(|worker| worker.writer.send(message).is_ok())
            .unwrap_or(false);

        if sent {
            let seq = unit.seq;
            core.queue.mark_in_flight(unit, worker_id);
            if let Some(worker) = core.workers.get_mut(worker_id) {
                worker.assigned = Some(seq);
            }
            tracing::debug!(worker = worker_id, seq, "Unit dispatched");
        } else {
            // Dead channel; its read loop will reap the worker shortly
            core.queue.requeue_front(unit);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn bound_master() -> Master {
        Master::builder()
            .version_key(11)
            .bind("127.0.0.1:0")
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_bind_initialized() {
        let master = bound_master().await;
        assert_eq!(master.state(), FarmState::Initialized);
        assert_ne!(master.local_addr().port(), 0);
        assert_eq!(master.active_workers(), 0);
        assert!(master.worker_stats().is_empty());
    }

    #[tokio::test]
    async fn test_push_before_begin_queues() {
        let master = bound_master().await;
        assert_eq!(master.push(vec![1, 2, 3]).unwrap(), 0);
        assert_eq!(master.push(vec![4]).unwrap(), 1);
    }

    #[tokio::test]
    async fn test_state_machine_enforced() {
        let master = bound_master().await;

        // end before begin
        assert!(matches!(
            master.end(),
            Err(FarmwireError::InvalidState { op: "end", .. })
        ));
        // broadcast before begin
        assert!(matches!(
            master.broadcast(vec![0]),
            Err(FarmwireError::InvalidState { op: "broadcast", .. })
        ));

        master.begin().unwrap();
        assert_eq!(master.state(), FarmState::Running);

        // begin twice
        assert!(matches!(
            master.begin(),
            Err(FarmwireError::InvalidState { op: "begin", .. })
        ));

        master.end().unwrap();
        assert_eq!(master.state(), FarmState::Draining);

        // push after end
        assert!(matches!(
            master.push(vec![0]),
            Err(FarmwireError::InvalidState { op: "push", .. })
        ));
    }

    #[tokio::test]
    async fn test_queue_capacity_surfaces_to_push() {
        let master = Master::builder()
            .queue_capacity(2)
            .bind("127.0.0.1:0")
            .await
            .unwrap();

        master.push(vec![0]).unwrap();
        master.push(vec![1]).unwrap();
        assert!(matches!(
            master.push(vec![2]),
            Err(FarmwireError::QueueFull { capacity: 2 })
        ));
    }

    #[tokio::test]
    async fn test_wait_returns_when_nothing_outstanding() {
        let master = bound_master().await;
        master.wait().await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent_and_terminal() {
        let master = bound_master().await;
        master.begin().unwrap();

        master.shutdown();
        assert_eq!(master.state(), FarmState::Shutdown);
        master.shutdown();
        assert_eq!(master.state(), FarmState::Shutdown);

        assert!(matches!(
            master.push(vec![0]),
            Err(FarmwireError::InvalidState { op: "push", .. })
        ));
    }

    #[tokio::test]
    async fn test_wait_unblocks_on_shutdown() {
        let master = bound_master().await;
        master.begin().unwrap();
        master.push(vec![0]).unwrap();

        let inner = master.inner.clone();
        let waiter = tokio::spawn(async move {
            // Same wait loop the public API runs
            loop {
                let notified = inner.drained.notified();
                {
                    let core = inner.core();
                    if core.queue.is_drained() || core.state == FarmState::Shutdown {
                        return;
                    }
                }
                notified.await;
            }
        });

        master.shutdown();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("wait() must unblock at shutdown")
            .unwrap();
    }

    #[tokio::test]
    async fn test_stats_snapshot_shape() {
        let master = bound_master().await;
        let stats = master.stats();
        assert_eq!(
            stats,
            FarmStats {
                active_workers: 0,
                total_bytes_transferred: 0,
                total_units_completed: 0,
                units_abandoned: 0,
            }
        );
    }
}
