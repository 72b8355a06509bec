//! Work queue - pending units and the in-flight table.
//!
//! Holds the ordered pending queue (FIFO, submission order) and the parallel
//! in-flight table keyed by sequence number. The core invariant: a sequence
//! number is never present in both collections at once, and their union is
//! exactly the set of pushed units whose result has not yet been delivered.

use std::collections::{HashMap, VecDeque};

use bytes::Bytes;

use crate::error::{FarmwireError, Result};
use crate::workers::WorkerId;

/// One opaque unit of work plus its submission bookkeeping.
#[derive(Debug, Clone)]
pub struct WorkUnit {
    /// Sequence number assigned at push time, monotonic per submission.
    pub seq: u64,
    /// Opaque work buffer.
    pub data: Bytes,
    /// How many times this unit has been dispatched (1 on first dispatch).
    pub attempts: u32,
}

/// An in-flight unit and the worker it was dispatched to.
#[derive(Debug)]
struct InFlight {
    unit: WorkUnit,
    worker: WorkerId,
}

/// Pending queue plus in-flight table for one farm.
pub struct WorkQueue {
    pending: VecDeque<WorkUnit>,
    in_flight: HashMap<u64, InFlight>,
    capacity: usize,
    next_seq: u64,
}

impl WorkQueue {
    /// Create a queue bounded at `capacity` outstanding units
    /// (pending + in-flight).
    pub fn new(capacity: usize) -> Self {
        Self {
            pending: VecDeque::new(),
            in_flight: HashMap::new(),
            capacity,
            next_seq: 0,
        }
    }

    /// Append a new unit, assigning the next sequence number.
    ///
    /// Returns the assigned sequence number, or `QueueFull` when the
    /// outstanding count is at the configured bound.
    pub fn push(&mut self, data: Bytes) -> Result<u64> {
        if self.outstanding() >= self.capacity {
            return Err(FarmwireError::QueueFull {
                capacity: self.capacity,
            });
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.pending.push_back(WorkUnit {
            seq,
            data,
            attempts: 0,
        });
        Ok(seq)
    }

    /// Pop the head of the pending queue for dispatch.
    pub fn pop_pending(&mut self) -> Option<WorkUnit> {
        self.pending.pop_front()
    }

    /// Record a popped unit as in flight on `worker`.
    ///
    /// The unit's attempt count is incremented here, at dispatch.
    pub fn mark_in_flight(&mut self, mut unit: WorkUnit, worker: WorkerId) {
        debug_assert!(!self.in_flight.contains_key(&unit.seq));
        unit.attempts += 1;
        self.in_flight.insert(unit.seq, InFlight { unit, worker });
    }

    /// Remove a completed unit from the in-flight table.
    ///
    /// Returns the owning worker so the coordinator can mark it idle, or
    /// `None` for an unknown sequence number (stale result from a reaped
    /// worker's duplicate computation).
    pub fn complete(&mut self, seq: u64) -> Option<WorkerId> {
        self.in_flight.remove(&seq).map(|f| f.worker)
    }

    /// Pull back the unit held in flight by a dead worker, if any.
    ///
    /// The unit is returned to the caller, not requeued; the coordinator
    /// decides between requeue and abandonment.
    pub fn release_worker(&mut self, worker: WorkerId) -> Option<WorkUnit> {
        let seq = self
            .in_flight
            .iter()
            .find(|(_, f)| f.worker == worker)
            .map(|(seq, _)| *seq)?;
        self.in_flight.remove(&seq).map(|f| f.unit)
    }

    /// Return a recovered unit to the front of the pending queue.
    ///
    /// Redispatched units go to the head so they do not wait behind the
    /// whole backlog a second time.
    pub fn requeue_front(&mut self, unit: WorkUnit) {
        debug_assert!(!self.in_flight.contains_key(&unit.seq));
        self.pending.push_front(unit);
    }

    /// Number of pending units.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Number of units currently in flight.
    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }

    /// Total outstanding units (pending + in flight).
    pub fn outstanding(&self) -> usize {
        self.pending.len() + self.in_flight.len()
    }

    /// True when both the pending queue and the in-flight table are empty.
    pub fn is_drained(&self) -> bool {
        self.pending.is_empty() && self.in_flight.is_empty()
    }

    /// Sequence numbers outstanding right now, pending first then in flight.
    #[cfg(test)]
    pub fn outstanding_seqs(&self) -> (Vec<u64>, Vec<u64>) {
        let pending: Vec<u64> = self.pending.iter().map(|u| u.seq).collect();
        let mut in_flight: Vec<u64> = self.in_flight.keys().copied().collect();
        in_flight.sort_unstable();
        (pending, in_flight)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_data(tag: u8) -> Bytes {
        Bytes::from(vec![tag; 4])
    }

    #[test]
    fn test_push_assigns_monotonic_sequence() {
        let mut queue = WorkQueue::new(16);

        assert_eq!(queue.push(unit_data(0)).unwrap(), 0);
        assert_eq!(queue.push(unit_data(1)).unwrap(), 1);
        assert_eq!(queue.push(unit_data(2)).unwrap(), 2);
        assert_eq!(queue.pending_len(), 3);
    }

    #[test]
    fn test_fifo_dispatch_order() {
        let mut queue = WorkQueue::new(16);
        queue.push(unit_data(0)).unwrap();
        queue.push(unit_data(1)).unwrap();

        assert_eq!(queue.pop_pending().unwrap().seq, 0);
        assert_eq!(queue.pop_pending().unwrap().seq, 1);
        assert!(queue.pop_pending().is_none());
    }

    #[test]
    fn test_capacity_bound() {
        let mut queue = WorkQueue::new(2);
        queue.push(unit_data(0)).unwrap();
        queue.push(unit_data(1)).unwrap();

        let result = queue.push(unit_data(2));
        assert!(matches!(
            result,
            Err(FarmwireError::QueueFull { capacity: 2 })
        ));

        // In-flight units count against the bound too
        let unit = queue.pop_pending().unwrap();
        queue.mark_in_flight(unit, 1);
        assert!(queue.push(unit_data(3)).is_err());

        // Completing one frees a slot
        queue.complete(0).unwrap();
        assert!(queue.push(unit_data(3)).is_ok());
    }

    #[test]
    fn test_never_in_both_sets() {
        let mut queue = WorkQueue::new(16);
        queue.push(unit_data(0)).unwrap();
        queue.push(unit_data(1)).unwrap();

        let unit = queue.pop_pending().unwrap();
        queue.mark_in_flight(unit, 7);

        let (pending, in_flight) = queue.outstanding_seqs();
        assert_eq!(pending, vec![1]);
        assert_eq!(in_flight, vec![0]);
        assert!(pending.iter().all(|s| !in_flight.contains(s)));
    }

    #[test]
    fn test_complete_returns_owner() {
        let mut queue = WorkQueue::new(16);
        queue.push(unit_data(0)).unwrap();
        let unit = queue.pop_pending().unwrap();
        queue.mark_in_flight(unit, 9);

        assert_eq!(queue.complete(0), Some(9));
        assert!(queue.is_drained());

        // Stale / unknown sequence is not an error
        assert_eq!(queue.complete(0), None);
        assert_eq!(queue.complete(123), None);
    }

    #[test]
    fn test_release_worker_recovers_unit_once() {
        let mut queue = WorkQueue::new(16);
        queue.push(unit_data(0)).unwrap();
        let unit = queue.pop_pending().unwrap();
        queue.mark_in_flight(unit, 3);

        let recovered = queue.release_worker(3).unwrap();
        assert_eq!(recovered.seq, 0);
        assert_eq!(recovered.attempts, 1);

        // Exactly once: a second release finds nothing
        assert!(queue.release_worker(3).is_none());
        assert_eq!(queue.in_flight_len(), 0);
    }

    #[test]
    fn test_requeue_goes_to_front() {
        let mut queue = WorkQueue::new(16);
        queue.push(unit_data(0)).unwrap();
        queue.push(unit_data(1)).unwrap();

        let unit = queue.pop_pending().unwrap(); // seq 0
        queue.mark_in_flight(unit, 1);
        let recovered = queue.release_worker(1).unwrap();
        queue.requeue_front(recovered);

        // Recovered unit is dispatched before the rest of the backlog
        assert_eq!(queue.pop_pending().unwrap().seq, 0);
        assert_eq!(queue.pop_pending().unwrap().seq, 1);
    }

    #[test]
    fn test_attempts_count_across_redispatch() {
        let mut queue = WorkQueue::new(16);
        queue.push(unit_data(0)).unwrap();

        for expected_attempts in 1..=3 {
            let unit = queue.pop_pending().unwrap();
            queue.mark_in_flight(unit, 1);
            let recovered = queue.release_worker(1).unwrap();
            assert_eq!(recovered.attempts, expected_attempts);
            queue.requeue_front(recovered);
        }
    }

    #[test]
    fn test_release_worker_with_no_assignment() {
        let mut queue = WorkQueue::new(16);
        queue.push(unit_data(0)).unwrap();
        assert!(queue.release_worker(5).is_none());
        assert_eq!(queue.pending_len(), 1);
    }

    #[test]
    fn test_drained_state() {
        let mut queue = WorkQueue::new(16);
        assert!(queue.is_drained());

        queue.push(unit_data(0)).unwrap();
        assert!(!queue.is_drained());

        let unit = queue.pop_pending().unwrap();
        queue.mark_in_flight(unit, 1);
        assert!(!queue.is_drained());

        queue.complete(0);
        assert!(queue.is_drained());
    }
}
