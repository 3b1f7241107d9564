//! Import worker pool — a fixed set of OS threads draining the request queue.
//!
//! Each worker loops: dequeue → fetch from the backing store → fulfill →
//! repeat, until `dequeue` returns `None`. One request at a time per worker.
//! A backing-store error or panic fails that request only; the loop goes on.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use parking_lot::Mutex;

use hgimport_core::{FetchError, FetchResult};

use crate::backing::BackingStore;
use crate::queue::ImportRequestQueue;
use crate::request::{Completion, ImportRequest};
use crate::stats::StatsCounters;
use crate::store::InflightMap;

/// Everything a worker thread shares with its store.
pub(crate) struct WorkerContext<S> {
    pub queue: Arc<ImportRequestQueue>,
    pub store: Arc<S>,
    pub stats: Arc<StatsCounters>,
    pub inflight: Option<Arc<InflightMap>>,
}

impl<S> Clone for WorkerContext<S> {
    fn clone(&self) -> Self {
        Self {
            queue: self.queue.clone(),
            store: self.store.clone(),
            stats: self.stats.clone(),
            inflight: self.inflight.clone(),
        }
    }
}

pub struct WorkerPool {
    queue: Arc<ImportRequestQueue>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    size: usize,
}

impl WorkerPool {
    /// Spawn `count` workers named `{prefix}-{index}`.
    ///
    /// If any thread fails to spawn, the queue is stopped, the workers
    /// already running are joined, and the spawn error is returned.
    pub(crate) fn start<S>(count: usize, prefix: &str, ctx: WorkerContext<S>) -> FetchResult<Self>
    where
        S: BackingStore + 'static,
    {
        if count == 0 {
            return Err(FetchError::InvalidConfig(
                "worker pool needs at least one thread".to_string(),
            ));
        }
        if prefix.contains('\0') {
            return Err(FetchError::InvalidConfig(
                "thread name prefix contains a NUL byte".to_string(),
            ));
        }

        let pool = Self {
            queue: ctx.queue.clone(),
            threads: Mutex::new(Vec::with_capacity(count)),
            size: count,
        };

        for index in 0..count {
            let worker_ctx = ctx.clone();
            let spawned = thread::Builder::new()
                .name(format!("{prefix}-{index}"))
                .spawn(move || run(index, worker_ctx));
            match spawned {
                Ok(handle) => pool.threads.lock().push(handle),
                Err(e) => {
                    tracing::error!(index, error = %e, "failed to spawn import worker");
                    pool.shutdown();
                    return Err(FetchError::Spawn(e.to_string()));
                }
            }
        }

        tracing::info!(workers = count, "import worker pool started");
        Ok(pool)
    }

    /// Number of worker threads the pool was started with.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Stop the queue and join every worker. Later calls return at once.
    pub fn shutdown(&self) {
        self.queue.stop();
        let threads: Vec<_> = self.threads.lock().drain(..).collect();
        if threads.is_empty() {
            return;
        }
        let count = threads.len();
        for handle in threads {
            if handle.join().is_err() {
                tracing::error!("import worker panicked outside a fetch");
            }
        }
        tracing::info!(workers = count, "import worker pool stopped");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ── Worker loop ──────────────────────────────────────────────────────────────

fn run<S: BackingStore>(index: usize, ctx: WorkerContext<S>) {
    tracing::debug!(worker = index, "import worker running");
    while let Some(request) = ctx.queue.dequeue() {
        process(index, &ctx, request);
    }
    tracing::debug!(worker = index, "import worker exiting");
}

fn process<S: BackingStore>(index: usize, ctx: &WorkerContext<S>, request: ImportRequest) {
    let start = Instant::now();
    let key = request.key();
    let queued_for = request.age();

    let (fulfilled, error) = match request.completion() {
        Completion::Blob(slot) => {
            let result = guarded(|| ctx.store.get_blob(&key.id));
            let error = result.as_ref().err().cloned();
            finish(ctx, &request, error.is_none());
            (slot.fulfill(result), error)
        }
        Completion::Tree(slot) => {
            let result = guarded(|| ctx.store.get_tree(&key.id));
            let error = result.as_ref().err().cloned();
            finish(ctx, &request, error.is_none());
            (slot.fulfill(result), error)
        }
    };

    let elapsed_ms = start.elapsed().as_millis() as u64;
    match &error {
        None => tracing::debug!(
            worker = index,
            kind = %key.kind,
            id = %key.id.short(),
            priority = %request.priority(),
            queued_ms = queued_for.as_millis() as u64,
            elapsed_ms,
            "import finished"
        ),
        Some(e) => tracing::warn!(
            worker = index,
            kind = %key.kind,
            id = %key.id.short(),
            priority = %request.priority(),
            elapsed_ms,
            error = %e,
            "import failed"
        ),
    }

    if let Err(e) = &fulfilled {
        tracing::error!(
            kind = %key.kind,
            id = %key.id.short(),
            error = %e,
            "completion slot fulfilled twice"
        );
    }
    debug_assert!(
        fulfilled.is_ok(),
        "completion slot for {key:?} fulfilled twice"
    );
}

/// Bookkeeping that must land before waiters wake: counters, and dropping the
/// de-duplication entry so a call after completion starts a fresh fetch.
fn finish<S>(ctx: &WorkerContext<S>, request: &ImportRequest, ok: bool) {
    if ok {
        StatsCounters::bump(&ctx.stats.completed);
    } else {
        StatsCounters::bump(&ctx.stats.failed);
    }
    if let Some(inflight) = &ctx.inflight {
        let sequence = request.sequence();
        inflight.remove_if(&request.key(), |_, pending| pending.sequence == sequence);
    }
}

/// Run a backing-store call, turning a panic into a `Backend` error.
fn guarded<T>(fetch: impl FnOnce() -> FetchResult<T>) -> FetchResult<T> {
    panic::catch_unwind(AssertUnwindSafe(fetch)).unwrap_or_else(|payload| {
        Err(FetchError::backend(format!(
            "backing store panicked: {}",
            panic_message(&*payload)
        )))
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        *s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}
