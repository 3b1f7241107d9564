//! Queued backing store — the public face of the import engine.
//!
//! `get_blob` / `get_tree` turn a synchronous backing-store call into a
//! queued, prioritized request and hand back an `ImportHandle` at once.
//! `get_tree_for_commit` / `get_tree_for_manifest` go straight to the backing
//! store on the caller's thread; they are keyed by commit rather than by a
//! single object id, so queue priority does not apply to them.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use hgimport_core::config::QueueConfig;
use hgimport_core::{Blob, CommitId, FetchError, FetchResult, Hash, ManifestId, Tree};

use crate::backing::BackingStore;
use crate::priority::ImportPriority;
use crate::queue::ImportRequestQueue;
use crate::request::{AnyHandle, ImportHandle, ImportKey, ImportRequest, Importable};
use crate::stats::{QueueStats, StatsCounters};
use crate::worker::{WorkerContext, WorkerPool};

/// A request that is queued or being fetched, keyed by what it fetches.
pub(crate) struct Pending {
    pub sequence: u64,
    pub handle: AnyHandle,
}

pub(crate) type InflightMap = DashMap<ImportKey, Pending>;

pub struct QueuedBackingStore<S: BackingStore + 'static> {
    store: Arc<S>,
    queue: Arc<ImportRequestQueue>,
    stats: Arc<StatsCounters>,
    /// Present when de-duplication is enabled.
    inflight: Option<Arc<InflightMap>>,
    pool: WorkerPool,
}

impl<S: BackingStore + 'static> QueuedBackingStore<S> {
    /// Take ownership of `store` and start the worker threads.
    pub fn new(store: S, config: &QueueConfig) -> FetchResult<Self> {
        config.validate().map_err(FetchError::InvalidConfig)?;

        let store = Arc::new(store);
        let queue = Arc::new(ImportRequestQueue::new());
        let stats = Arc::new(StatsCounters::default());
        let inflight = config.dedupe.then(|| Arc::new(InflightMap::new()));

        let pool = WorkerPool::start(
            config.worker_threads,
            &config.thread_name_prefix,
            WorkerContext {
                queue: queue.clone(),
                store: store.clone(),
                stats: stats.clone(),
                inflight: inflight.clone(),
            },
        )?;

        tracing::info!(
            workers = config.worker_threads,
            dedupe = config.dedupe,
            "queued backing store ready"
        );

        Ok(Self {
            store,
            queue,
            stats,
            inflight,
            pool,
        })
    }

    /// Queue a blob fetch. Returns immediately.
    pub fn get_blob(&self, id: &Hash, priority: ImportPriority) -> FetchResult<ImportHandle<Blob>> {
        self.import::<Blob>(*id, priority)
    }

    /// Queue a tree fetch. Returns immediately.
    pub fn get_tree(&self, id: &Hash, priority: ImportPriority) -> FetchResult<ImportHandle<Tree>> {
        self.import::<Tree>(*id, priority)
    }

    /// Root tree of `commit`, fetched on the calling thread.
    ///
    /// Never touches the queue or the workers, so it keeps working after
    /// `shutdown`.
    pub fn get_tree_for_commit(&self, commit: &CommitId) -> ImportHandle<Tree> {
        tracing::debug!(commit = %commit.short(), "tree for commit (unqueued)");
        ImportHandle::ready(self.store.get_tree_for_commit(commit))
    }

    /// Root tree of `commit` given its manifest, fetched on the calling thread.
    pub fn get_tree_for_manifest(
        &self,
        commit: &CommitId,
        manifest: &ManifestId,
    ) -> ImportHandle<Tree> {
        tracing::debug!(
            commit = %commit.short(),
            manifest = %manifest.short(),
            "tree for manifest (unqueued)"
        );
        ImportHandle::ready(self.store.get_tree_for_manifest(commit, manifest))
    }

    pub fn stats(&self) -> QueueStats {
        let in_flight = self.inflight.as_ref().map_or(0, |m| m.len());
        self.stats
            .snapshot(self.queue.len(), in_flight, self.pool.size())
    }

    pub fn backing_store(&self) -> &S {
        &self.store
    }

    /// Stop the queue and join all workers.
    ///
    /// Requests still queued are abandoned: never fulfilled, and their
    /// handles report `Abandoned` once this store is dropped. Safe to call
    /// more than once.
    pub fn shutdown(&self) {
        let pending = self.queue.len();
        self.pool.shutdown();
        if pending > 0 {
            tracing::warn!(pending, "queued backing store shut down with pending imports");
        }
    }

    // ── Internals ────────────────────────────────────────────────────────────

    fn import<T: Importable>(
        &self,
        id: Hash,
        priority: ImportPriority,
    ) -> FetchResult<ImportHandle<T>> {
        if self.queue.is_stopped() {
            StatsCounters::bump(&self.stats.rejected);
            return Err(FetchError::QueueClosed);
        }

        let Some(inflight) = &self.inflight else {
            let (request, handle) = ImportRequest::new::<T>(id, priority);
            self.submit(request)?;
            return Ok(handle);
        };

        // The key carries `T::KIND`, so a pending entry always downcasts.
        let key = ImportKey::new(T::KIND, id);
        // The shard lock is held across enqueue so a worker cannot clear the
        // entry between our lookup and insert.
        let entry = inflight.entry(key);
        if let Entry::Occupied(pending) = &entry {
            if let Some(handle) = T::downcast(&pending.get().handle) {
                self.queue.raise_priority(key, priority);
                StatsCounters::bump(&self.stats.deduplicated);
                tracing::trace!(
                    kind = %key.kind,
                    id = %id.short(),
                    %priority,
                    "import coalesced with pending request"
                );
                return Ok(handle);
            }
        }

        let (request, handle) = ImportRequest::new::<T>(id, priority);
        let sequence = request.sequence();
        self.submit(request)?;
        entry.insert(Pending {
            sequence,
            handle: T::erase(handle.clone()),
        });
        Ok(handle)
    }

    fn submit(&self, request: ImportRequest) -> FetchResult<()> {
        let kind = request.kind();
        let id = request.id();
        let priority = request.priority();
        match self.queue.enqueue(request) {
            Ok(()) => {
                StatsCounters::bump(&self.stats.enqueued);
                tracing::debug!(
                    %kind,
                    id = %id.short(),
                    %priority,
                    pending = self.queue.len(),
                    "import queued"
                );
                Ok(())
            }
            Err(e) => {
                StatsCounters::bump(&self.stats.rejected);
                Err(e)
            }
        }
    }
}

impl<S: BackingStore + 'static> Drop for QueuedBackingStore<S> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
