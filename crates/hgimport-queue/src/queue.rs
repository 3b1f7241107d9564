//! Import request queue — blocking, priority-ordered, multi-producer /
//! multi-consumer.
//!
//! Requests dequeue by priority (High first), then by arrival sequence
//! (oldest first). Nothing else affects order. The queue is unbounded:
//! `enqueue` never waits on depth, only on the mutex.
//!
//! `stop()` closes the queue for good. Blocked and future `dequeue` calls
//! return `None`. Requests still resident are not drained or fulfilled; they
//! are dropped with the queue, at which point their handles see `Abandoned`.

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};

use parking_lot::{Condvar, Mutex};

use hgimport_core::{FetchError, FetchResult};

use crate::priority::ImportPriority;
use crate::request::{ImportKey, ImportRequest};

/// Sort key: highest priority first, then lowest sequence.
type Slot = (Reverse<ImportPriority>, u64);

#[derive(Default)]
struct QueueState {
    pending: BTreeMap<Slot, ImportRequest>,
    /// First pending request per key, for `raise_priority`.
    index: HashMap<ImportKey, Slot>,
    stopped: bool,
}

impl QueueState {
    fn insert(&mut self, request: ImportRequest) {
        let slot = (Reverse(request.priority()), request.sequence());
        self.index.entry(request.key()).or_insert(slot);
        self.pending.insert(slot, request);
    }

    fn pop(&mut self) -> Option<ImportRequest> {
        let (slot, request) = self.pending.pop_first()?;
        let key = request.key();
        if self.index.get(&key) == Some(&slot) {
            self.index.remove(&key);
        }
        Some(request)
    }
}

#[derive(Default)]
pub struct ImportRequestQueue {
    state: Mutex<QueueState>,
    available: Condvar,
}

impl ImportRequestQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a request in priority order and wake one worker.
    ///
    /// Fails with `QueueClosed` once the queue has been stopped; the request
    /// is dropped and its handles observe `Abandoned`.
    pub fn enqueue(&self, request: ImportRequest) -> FetchResult<()> {
        let mut state = self.state.lock();
        if state.stopped {
            return Err(FetchError::QueueClosed);
        }
        state.insert(request);
        let depth = state.pending.len();
        drop(state);

        self.available.notify_one();
        tracing::trace!(depth, "import request enqueued");
        Ok(())
    }

    /// Block until a request is available or the queue is stopped.
    pub fn dequeue(&self) -> Option<ImportRequest> {
        let mut state = self.state.lock();
        loop {
            if state.stopped {
                return None;
            }
            if let Some(request) = state.pop() {
                return Some(request);
            }
            self.available.wait(&mut state);
        }
    }

    /// Non-blocking `dequeue`.
    pub fn try_dequeue(&self) -> Option<ImportRequest> {
        let mut state = self.state.lock();
        if state.stopped {
            return None;
        }
        state.pop()
    }

    /// Re-file the oldest pending request for `key` at `priority` if that is
    /// higher than what it has. Its arrival sequence is kept.
    ///
    /// Returns true if a pending request for `key` exists.
    pub fn raise_priority(&self, key: ImportKey, priority: ImportPriority) -> bool {
        let mut state = self.state.lock();
        let Some(&slot) = state.index.get(&key) else {
            return false;
        };
        let (Reverse(current), sequence) = slot;
        if priority <= current {
            return true;
        }
        if let Some(mut request) = state.pending.remove(&slot) {
            request.set_priority(priority);
            let raised = (Reverse(priority), sequence);
            state.pending.insert(raised, request);
            state.index.insert(key, raised);
            tracing::trace!(
                kind = %key.kind,
                id = %key.id.short(),
                from = %current,
                to = %priority,
                "import request priority raised"
            );
        }
        true
    }

    /// Close the queue and wake every blocked `dequeue`. Idempotent.
    pub fn stop(&self) {
        let mut state = self.state.lock();
        if !state.stopped {
            state.stopped = true;
            tracing::debug!(abandoned = state.pending.len(), "import queue stopped");
        }
        drop(state);
        self.available.notify_all();
    }

    pub fn is_stopped(&self) -> bool {
        self.state.lock().stopped
    }

    /// Requests waiting to be dequeued.
    pub fn len(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
