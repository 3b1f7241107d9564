//! Queue counters.
//!
//! The queue is unbounded, so depth and throughput are surfaced here rather
//! than enforced. Counters are monotonic; `pending` and `in_flight` are
//! sampled at snapshot time.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    pub enqueued: AtomicU64,
    pub deduplicated: AtomicU64,
    pub completed: AtomicU64,
    pub failed: AtomicU64,
    pub rejected: AtomicU64,
}

impl StatsCounters {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, pending: usize, in_flight: usize, workers: usize) -> QueueStats {
        QueueStats {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            deduplicated: self.deduplicated.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            pending,
            in_flight,
            workers,
        }
    }
}

/// Point-in-time view of a queued store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    /// Requests accepted into the queue.
    pub enqueued: u64,
    /// Calls answered with an existing request's handle.
    pub deduplicated: u64,
    /// Requests fulfilled with a payload.
    pub completed: u64,
    /// Requests fulfilled with an error.
    pub failed: u64,
    /// Calls refused because the queue was closed.
    pub rejected: u64,
    /// Requests waiting for a worker.
    pub pending: usize,
    /// Distinct objects queued or being fetched (de-duplication enabled only).
    pub in_flight: usize,
    pub workers: usize,
}

impl QueueStats {
    /// Requests that reached a worker and were fulfilled.
    pub fn finished(&self) -> u64 {
        self.completed + self.failed
    }
}
