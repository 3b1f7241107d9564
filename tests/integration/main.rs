//! hgimport integration test harness.
//!
//! Drives `QueuedBackingStore` end to end against scripted backing stores.
//! Everything runs in-process; no network or repository is needed.
//!
//!   cargo test --test integration

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex};
use std::thread;
use std::time::Duration;

use hgimport_core::{Blob, CommitId, FetchError, FetchResult, Hash, ImportKind, ManifestId, Tree};
use hgimport_core::{EntryKind, TreeEntry};
use hgimport_queue::BackingStore;

mod shutdown;
mod stress;

// ── Gate ──────────────────────────────────────────────────────────────────────

/// A latch that holds backing-store calls until opened.
#[derive(Default)]
pub struct Gate {
    open: Mutex<bool>,
    cvar: Condvar,
}

impl Gate {
    pub fn open(&self) {
        *self.open.lock().unwrap() = true;
        self.cvar.notify_all();
    }

    pub fn wait(&self) {
        let mut open = self.open.lock().unwrap();
        while !*open {
            open = self.cvar.wait(open).unwrap();
        }
    }
}

// ── EchoStore ─────────────────────────────────────────────────────────────────

/// Backing store that answers every id with a payload derived from the id.
///
/// Blob contents are the id's hex. Trees hold one entry named after the id.
/// Commit `c` resolves to tree `c`. Optional latency and gate; records the
/// order in which fetches got past the gate.
#[derive(Default)]
pub struct EchoStore {
    pub latency: Duration,
    pub gate: Option<Gate>,
    pub blob_calls: AtomicUsize,
    pub tree_calls: AtomicUsize,
    /// Fetches currently blocked at the gate or running.
    pub entered: AtomicUsize,
    pub order: Mutex<Vec<(ImportKind, Hash)>>,
}

impl EchoStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gated() -> Self {
        Self {
            gate: Some(Gate::default()),
            ..Self::default()
        }
    }

    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency,
            ..Self::default()
        }
    }

    pub fn open_gate(&self) {
        if let Some(gate) = &self.gate {
            gate.open();
        }
    }

    pub fn fetch_order(&self) -> Vec<(ImportKind, Hash)> {
        self.order.lock().unwrap().clone()
    }

    fn pass(&self, kind: ImportKind, id: &Hash) {
        self.entered.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.wait();
        }
        self.order.lock().unwrap().push((kind, *id));
        if !self.latency.is_zero() {
            thread::sleep(self.latency);
        }
    }
}

pub fn echo_tree(id: Hash) -> Tree {
    Tree::new(
        id,
        vec![TreeEntry {
            name: id.to_hex(),
            id,
            kind: EntryKind::Regular,
        }],
    )
}

impl BackingStore for EchoStore {
    fn get_blob(&self, id: &Hash) -> FetchResult<Blob> {
        self.blob_calls.fetch_add(1, Ordering::SeqCst);
        self.pass(ImportKind::Blob, id);
        Ok(Blob::new(*id, id.to_hex().into_bytes()))
    }

    fn get_tree(&self, id: &Hash) -> FetchResult<Tree> {
        self.tree_calls.fetch_add(1, Ordering::SeqCst);
        self.pass(ImportKind::Tree, id);
        Ok(echo_tree(*id))
    }

    fn get_tree_for_commit(&self, commit: &CommitId) -> FetchResult<Tree> {
        Ok(echo_tree(*commit))
    }

    fn get_tree_for_manifest(&self, commit: &CommitId, manifest: &ManifestId) -> FetchResult<Tree> {
        if commit == &Hash::ZERO {
            return Err(FetchError::backend("null commit"));
        }
        Ok(echo_tree(*manifest))
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Poll `cond` until it holds, failing the test after ~5s.
pub fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if cond() {
            return;
        }
        thread::sleep(Duration::from_millis(5));
    }
    panic!("timed out waiting for {what}");
}

pub fn queue_config(workers: usize, dedupe: bool) -> hgimport_core::config::QueueConfig {
    hgimport_core::config::QueueConfig {
        worker_threads: workers,
        thread_name_prefix: "it-import".to_string(),
        dedupe,
    }
}

// ── Smoke ─────────────────────────────────────────────────────────────────────

#[test]
fn test_echo_store_answers_every_id() {
    let store = EchoStore::new();
    let id = Hash::from_u64(42);
    assert_eq!(store.get_blob(&id).unwrap().contents, id.to_hex().into_bytes());
    assert_eq!(store.get_tree(&id).unwrap().entries[0].id, id);
    assert_eq!(store.fetch_order(), vec![(ImportKind::Blob, id), (ImportKind::Tree, id)]);
}
