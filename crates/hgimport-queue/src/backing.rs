//! Backing store interface and an in-memory implementation.
//!
//! The backing store is whatever actually talks to the remote repository.
//! The queue treats it as a black box: calls are synchronous, may be slow,
//! and must be safe to make from every worker thread at once. Retries,
//! caching and timeouts are its business, not the queue's.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;

use hgimport_core::{Blob, CommitId, FetchError, FetchResult, Hash, ImportKind, ManifestId, Tree};

/// Synchronous access to the backing repository.
pub trait BackingStore: Send + Sync {
    fn get_blob(&self, id: &Hash) -> FetchResult<Blob>;

    fn get_tree(&self, id: &Hash) -> FetchResult<Tree>;

    /// Root tree of a commit. The store resolves the manifest itself.
    fn get_tree_for_commit(&self, commit: &CommitId) -> FetchResult<Tree>;

    /// Root tree of a commit when the manifest is already known.
    fn get_tree_for_manifest(&self, commit: &CommitId, manifest: &ManifestId)
        -> FetchResult<Tree>;
}

// ── In-memory store ──────────────────────────────────────────────────────────

/// A `BackingStore` over in-process maps.
///
/// Used by tests and by `hgimport-bench`. Every fetch can be slowed down by
/// a fixed latency to stand in for a network round trip.
#[derive(Default)]
pub struct MemoryBackingStore {
    blobs: DashMap<Hash, Blob>,
    trees: DashMap<Hash, Tree>,
    /// commit → root manifest
    commits: DashMap<CommitId, ManifestId>,
    latency: Duration,
    blob_fetches: AtomicU64,
    tree_fetches: AtomicU64,
}

impl MemoryBackingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency,
            ..Self::default()
        }
    }

    pub fn put_blob(&self, blob: Blob) {
        self.blobs.insert(blob.id, blob);
    }

    pub fn put_tree(&self, tree: Tree) {
        self.trees.insert(tree.id, tree);
    }

    /// Record `root` as the manifest of `commit`. The tree itself is added
    /// separately with `put_tree`.
    pub fn put_commit(&self, commit: CommitId, root: ManifestId) {
        self.commits.insert(commit, root);
    }

    /// `get_blob` calls served so far, hits and misses.
    pub fn blob_fetches(&self) -> u64 {
        self.blob_fetches.load(Ordering::Relaxed)
    }

    /// `get_tree` calls served so far, hits and misses. Commit and manifest
    /// lookups are not counted.
    pub fn tree_fetches(&self) -> u64 {
        self.tree_fetches.load(Ordering::Relaxed)
    }

    fn simulate_latency(&self) {
        if !self.latency.is_zero() {
            std::thread::sleep(self.latency);
        }
    }

    fn lookup_tree(&self, id: &Hash) -> FetchResult<Tree> {
        self.trees
            .get(id)
            .map(|t| t.value().clone())
            .ok_or(FetchError::NotFound {
                kind: ImportKind::Tree,
                id: *id,
            })
    }
}

impl BackingStore for MemoryBackingStore {
    fn get_blob(&self, id: &Hash) -> FetchResult<Blob> {
        self.blob_fetches.fetch_add(1, Ordering::Relaxed);
        self.simulate_latency();
        self.blobs
            .get(id)
            .map(|b| b.value().clone())
            .ok_or(FetchError::NotFound {
                kind: ImportKind::Blob,
                id: *id,
            })
    }

    fn get_tree(&self, id: &Hash) -> FetchResult<Tree> {
        self.tree_fetches.fetch_add(1, Ordering::Relaxed);
        self.simulate_latency();
        self.lookup_tree(id)
    }

    fn get_tree_for_commit(&self, commit: &CommitId) -> FetchResult<Tree> {
        self.simulate_latency();
        let manifest = self
            .commits
            .get(commit)
            .map(|m| *m.value())
            .ok_or_else(|| FetchError::backend(format!("unknown commit {commit}")))?;
        self.lookup_tree(&manifest)
    }

    fn get_tree_for_manifest(
        &self,
        commit: &CommitId,
        manifest: &ManifestId,
    ) -> FetchResult<Tree> {
        self.simulate_latency();
        if let Some(known) = self.commits.get(commit) {
            if known.value() != manifest {
                return Err(FetchError::backend(format!(
                    "commit {commit} has manifest {}, not {manifest}",
                    known.value()
                )));
            }
        }
        self.lookup_tree(manifest)
    }
}
