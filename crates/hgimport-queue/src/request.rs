//! Import requests and their completion slots.
//!
//! An `ImportRequest` is the queued unit of work. It carries a write-once
//! `CompletionSlot`; callers hold `ImportHandle`s on the read side. The slot
//! is backed by a `tokio::sync::watch` channel holding `Option<result>`:
//!
//!   None        — not yet fulfilled
//!   Some(r)     — fulfilled, every reader observes `r` from then on
//!   sender gone — request dropped unfulfilled; waiters get `Abandoned`
//!
//! watch works without a runtime, so handles can be awaited from async code
//! or blocked on from plain OS threads.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::watch;

use hgimport_core::{Blob, FetchError, FetchResult, Hash, ImportKind, Tree};

use crate::priority::ImportPriority;

/// Process-wide arrival counter. Orders equal-priority requests FIFO.
static NEXT_SEQUENCE: AtomicU64 = AtomicU64::new(0);

type Slot<T> = Option<FetchResult<Arc<T>>>;

// ── Completion slot ──────────────────────────────────────────────────────────

/// Write side of a request's result. Fulfilled at most once.
pub struct CompletionSlot<T> {
    tx: watch::Sender<Slot<T>>,
}

impl<T> CompletionSlot<T> {
    fn new() -> (Self, ImportHandle<T>) {
        let (tx, rx) = watch::channel(None);
        (Self { tx }, ImportHandle { rx })
    }

    /// Store the result and wake every waiter.
    ///
    /// A second call is rejected with `AlreadyFulfilled`; the first result
    /// stays in place.
    pub fn fulfill(&self, result: FetchResult<T>) -> FetchResult<()> {
        let stored = self.tx.send_if_modified(move |slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(result.map(Arc::new));
            true
        });
        if stored {
            Ok(())
        } else {
            Err(FetchError::AlreadyFulfilled)
        }
    }

    pub fn is_fulfilled(&self) -> bool {
        self.tx.borrow().is_some()
    }

    /// Another handle on this slot.
    pub fn subscribe(&self) -> ImportHandle<T> {
        ImportHandle {
            rx: self.tx.subscribe(),
        }
    }
}

impl<T> fmt::Debug for CompletionSlot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionSlot")
            .field("fulfilled", &self.is_fulfilled())
            .finish()
    }
}

// ── Caller-facing handle ─────────────────────────────────────────────────────

/// Read side of a completion slot. Cheap to clone; every clone observes the
/// same result.
pub struct ImportHandle<T> {
    rx: watch::Receiver<Slot<T>>,
}

impl<T> Clone for ImportHandle<T> {
    fn clone(&self) -> Self {
        Self {
            rx: self.rx.clone(),
        }
    }
}

impl<T> ImportHandle<T> {
    /// A handle that is already resolved to `result`.
    pub fn ready(result: FetchResult<T>) -> Self {
        let (_tx, rx) = watch::channel(Some(result.map(Arc::new)));
        Self { rx }
    }

    /// Wait for the result.
    ///
    /// Returns `Abandoned` if the request was dropped without being
    /// fulfilled, which happens to requests still queued at shutdown.
    pub async fn wait(&self) -> FetchResult<Arc<T>> {
        let mut rx = self.rx.clone();
        let slot = match rx.wait_for(Option::is_some).await {
            Ok(slot) => (*slot).clone(),
            Err(_) => None,
        };
        slot.unwrap_or(Err(FetchError::Abandoned))
    }

    /// Block the current thread until the result is available.
    pub fn wait_blocking(&self) -> FetchResult<Arc<T>> {
        futures::executor::block_on(self.wait())
    }

    /// The result if the slot has been fulfilled. Never blocks.
    pub fn try_result(&self) -> Option<FetchResult<Arc<T>>> {
        self.rx.borrow().clone()
    }

    pub fn is_ready(&self) -> bool {
        self.rx.borrow().is_some()
    }

    /// True if both handles read the same slot.
    pub fn same_slot(&self, other: &ImportHandle<T>) -> bool {
        self.rx.same_channel(&other.rx)
    }
}

impl<T> fmt::Debug for ImportHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImportHandle")
            .field("ready", &self.is_ready())
            .finish()
    }
}

// ── Typed dispatch ───────────────────────────────────────────────────────────

/// The completion slot of a request, tagged by what it expects.
#[derive(Debug)]
pub enum Completion {
    Blob(CompletionSlot<Blob>),
    Tree(CompletionSlot<Tree>),
}

impl Completion {
    pub fn kind(&self) -> ImportKind {
        match self {
            Completion::Blob(_) => ImportKind::Blob,
            Completion::Tree(_) => ImportKind::Tree,
        }
    }

    pub fn is_fulfilled(&self) -> bool {
        match self {
            Completion::Blob(slot) => slot.is_fulfilled(),
            Completion::Tree(slot) => slot.is_fulfilled(),
        }
    }

    /// Fail the slot without a payload, whatever its kind.
    pub fn fail(&self, err: FetchError) -> FetchResult<()> {
        match self {
            Completion::Blob(slot) => slot.fulfill(Err(err)),
            Completion::Tree(slot) => slot.fulfill(Err(err)),
        }
    }
}

/// A handle of either kind, kept by the queued store for de-duplication.
#[derive(Debug, Clone)]
pub enum AnyHandle {
    Blob(ImportHandle<Blob>),
    Tree(ImportHandle<Tree>),
}

/// Payload types that can be imported through the queue.
pub trait Importable: Sized + Send + Sync + 'static {
    const KIND: ImportKind;

    fn completion(slot: CompletionSlot<Self>) -> Completion;

    fn erase(handle: ImportHandle<Self>) -> AnyHandle;

    fn downcast(handle: &AnyHandle) -> Option<ImportHandle<Self>>;
}

impl Importable for Blob {
    const KIND: ImportKind = ImportKind::Blob;

    fn completion(slot: CompletionSlot<Self>) -> Completion {
        Completion::Blob(slot)
    }

    fn erase(handle: ImportHandle<Self>) -> AnyHandle {
        AnyHandle::Blob(handle)
    }

    fn downcast(handle: &AnyHandle) -> Option<ImportHandle<Self>> {
        match handle {
            AnyHandle::Blob(h) => Some(h.clone()),
            AnyHandle::Tree(_) => None,
        }
    }
}

impl Importable for Tree {
    const KIND: ImportKind = ImportKind::Tree;

    fn completion(slot: CompletionSlot<Self>) -> Completion {
        Completion::Tree(slot)
    }

    fn erase(handle: ImportHandle<Self>) -> AnyHandle {
        AnyHandle::Tree(handle)
    }

    fn downcast(handle: &AnyHandle) -> Option<ImportHandle<Self>> {
        match handle {
            AnyHandle::Tree(h) => Some(h.clone()),
            AnyHandle::Blob(_) => None,
        }
    }
}

// ── Import request ───────────────────────────────────────────────────────────

/// Identity of an object fetch. Two requests with the same key fetch the
/// same thing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImportKey {
    pub kind: ImportKind,
    pub id: Hash,
}

impl ImportKey {
    pub fn new(kind: ImportKind, id: Hash) -> Self {
        Self { kind, id }
    }
}

/// One pending fetch.
#[derive(Debug)]
pub struct ImportRequest {
    id: Hash,
    priority: ImportPriority,
    sequence: u64,
    created_at: Instant,
    completion: Completion,
}

impl ImportRequest {
    /// Create a request for `T` and the handle its caller waits on.
    pub fn new<T: Importable>(id: Hash, priority: ImportPriority) -> (Self, ImportHandle<T>) {
        let (slot, handle) = CompletionSlot::new();
        let request = Self {
            id,
            priority,
            sequence: NEXT_SEQUENCE.fetch_add(1, Ordering::Relaxed),
            created_at: Instant::now(),
            completion: T::completion(slot),
        };
        (request, handle)
    }

    pub fn blob(id: Hash, priority: ImportPriority) -> (Self, ImportHandle<Blob>) {
        Self::new::<Blob>(id, priority)
    }

    pub fn tree(id: Hash, priority: ImportPriority) -> (Self, ImportHandle<Tree>) {
        Self::new::<Tree>(id, priority)
    }

    pub fn kind(&self) -> ImportKind {
        self.completion.kind()
    }

    pub fn id(&self) -> Hash {
        self.id
    }

    pub fn key(&self) -> ImportKey {
        ImportKey::new(self.kind(), self.id)
    }

    pub fn priority(&self) -> ImportPriority {
        self.priority
    }

    pub(crate) fn set_priority(&mut self, priority: ImportPriority) {
        self.priority = priority;
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Time since the request was created.
    pub fn age(&self) -> std::time::Duration {
        self.created_at.elapsed()
    }

    pub fn completion(&self) -> &Completion {
        &self.completion
    }
}
