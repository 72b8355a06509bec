//! Worker registry - admission bookkeeping and liveness tracking.
//!
//! Each admitted worker occupies a stable slot keyed by a monotonically
//! assigned [`WorkerId`]; reaping a worker is a key removal and never moves
//! any other worker's slot. Admission itself (the handshake) happens in the
//! coordinator before a record is created here, so a worker that never
//! completes the handshake never appears in this table.

use std::collections::HashMap;
use std::net::SocketAddr;

use tokio::task::JoinHandle;

use crate::writer::WriterHandle;

/// Stable identifier of an admitted worker.
pub type WorkerId = u64;

/// One remote computation process admitted to the farm.
pub struct Worker {
    /// Stable slot id.
    pub id: WorkerId,
    /// Peer address, for logs.
    pub addr: SocketAddr,
    /// Writer side of the worker's channel.
    pub writer: WriterHandle,
    /// Sequence number of the unit currently assigned, if any.
    pub assigned: Option<u64>,
    /// Connection task servicing this worker's read loop.
    pub conn_task: Option<JoinHandle<()>>,
}

impl Worker {
    /// Whether the worker is free to take a unit.
    #[inline]
    pub fn is_idle(&self) -> bool {
        self.assigned.is_none()
    }

    /// Bytes written to this worker so far.
    #[inline]
    pub fn bytes_sent(&self) -> u64 {
        self.writer.bytes_written()
    }
}

/// Table of live workers, keyed by stable id.
pub struct WorkerTable {
    workers: HashMap<WorkerId, Worker>,
    next_id: WorkerId,
}

impl WorkerTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self {
            workers: HashMap::new(),
            next_id: 1,
        }
    }

    /// Insert a freshly admitted worker and assign its slot id.
    pub fn insert(&mut self, addr: SocketAddr, writer: WriterHandle) -> WorkerId {
        let id = self.next_id;
        self.next_id += 1;
        self.workers.insert(
            id,
            Worker {
                id,
                addr,
                writer,
                assigned: None,
                conn_task: None,
            },
        );
        id
    }

    /// Remove a worker. Returns the record so the caller can recover any
    /// assigned unit.
    pub fn remove(&mut self, id: WorkerId) -> Option<Worker> {
        self.workers.remove(&id)
    }

    /// Look up a worker by id.
    pub fn get(&self, id: WorkerId) -> Option<&Worker> {
        self.workers.get(&id)
    }

    /// Look up a worker mutably.
    pub fn get_mut(&mut self, id: WorkerId) -> Option<&mut Worker> {
        self.workers.get_mut(&id)
    }

    /// Ids of workers with no assigned unit.
    pub fn idle_ids(&self) -> Vec<WorkerId> {
        let mut ids: Vec<WorkerId> = self
            .workers
            .values()
            .filter(|w| w.is_idle())
            .map(|w| w.id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Iterate over all live workers.
    pub fn iter(&self) -> impl Iterator<Item = &Worker> {
        self.workers.values()
    }

    /// Number of live workers.
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    /// Check if no workers are connected.
    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Drain every worker out of the table (shutdown path).
    pub fn drain(&mut self) -> Vec<Worker> {
        self.workers.drain().map(|(_, w)| w).collect()
    }
}

impl Default for WorkerTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::spawn_writer_task;
    use std::sync::atomic::AtomicU64;
    use std::sync::Arc;
    use tokio::io::duplex;

    fn test_writer() -> WriterHandle {
        let (client, _server) = duplex(4096);
        let (writer, _task) = spawn_writer_task(client, Arc::new(AtomicU64::new(0)));
        writer
    }

    fn addr() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    #[tokio::test]
    async fn test_insert_assigns_stable_ids() {
        let mut table = WorkerTable::new();

        let a = table.insert(addr(), test_writer());
        let b = table.insert(addr(), test_writer());
        let c = table.insert(addr(), test_writer());

        assert_eq!((a, b, c), (1, 2, 3));
        assert_eq!(table.len(), 3);
    }

    #[tokio::test]
    async fn test_remove_does_not_disturb_other_slots() {
        let mut table = WorkerTable::new();

        let a = table.insert(addr(), test_writer());
        let b = table.insert(addr(), test_writer());

        assert!(table.remove(a).is_some());
        assert!(table.get(b).is_some());
        assert_eq!(table.get(b).unwrap().id, b);

        // Ids are never reused
        let c = table.insert(addr(), test_writer());
        assert_eq!(c, 3);
    }

    #[tokio::test]
    async fn test_idle_tracking() {
        let mut table = WorkerTable::new();

        let a = table.insert(addr(), test_writer());
        let b = table.insert(addr(), test_writer());

        assert_eq!(table.idle_ids(), vec![a, b]);

        table.get_mut(a).unwrap().assigned = Some(42);
        assert_eq!(table.idle_ids(), vec![b]);
        assert!(!table.get(a).unwrap().is_idle());

        table.get_mut(a).unwrap().assigned = None;
        assert_eq!(table.idle_ids(), vec![a, b]);
    }

    #[tokio::test]
    async fn test_drain_empties_table() {
        let mut table = WorkerTable::new();
        table.insert(addr(), test_writer());
        table.insert(addr(), test_writer());

        let drained = table.drain();
        assert_eq!(drained.len(), 2);
        assert!(table.is_empty());
    }
}
