use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use crate::scheduler::job::{JobId, Priority};

#[derive(Debug, Clone, PartialEq, Eq)]
struct QueueEntry {
    job_id: JobId,
    priority: Priority,
    seq: u64,
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Higher priority first, then earlier enqueue first
        (self.priority, Reverse(self.seq)).cmp(&(other.priority, Reverse(other.seq)))
    }
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Pending job ids ordered by priority class, FIFO within a class.
///
/// Only the dispatcher owns and mutates this structure.
#[derive(Debug, Default)]
pub struct PendingQueue {
    heap: BinaryHeap<QueueEntry>,
    next_seq: u64,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a job id. Each call gets a fresh sequence number, so the same id
    /// is never silently merged with an earlier entry.
    pub fn push(&mut self, job_id: JobId, priority: Priority) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(QueueEntry {
            job_id,
            priority,
            seq,
        });
    }

    /// Remove and return the next job id to dispatch.
    pub fn pop(&mut self) -> Option<JobId> {
        self.heap.pop().map(|entry| entry.job_id)
    }

    /// Remove a job id wherever it sits. Returns true if it was queued.
    pub fn remove(&mut self, job_id: &JobId) -> bool {
        let before = self.heap.len();
        self.heap.retain(|entry| entry.job_id != *job_id);
        before != self.heap.len()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}
