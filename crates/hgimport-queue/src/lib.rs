//! hgimport-queue — queued, prioritized access to a slow backing store.
//!
//! Callers ask a `QueuedBackingStore` for blobs and trees with a priority and
//! get an `ImportHandle` back immediately. Requests wait in a priority queue
//! until one of a fixed set of worker threads fetches them from the
//! `BackingStore` and fulfills the handle.
//!
//! ```text
//! caller ─ get_blob(id, prio) ─▶ ImportRequestQueue ─▶ worker ─▶ BackingStore
//!    ▲                                                   │
//!    └──────────── ImportHandle ◀── CompletionSlot ◀─────┘
//! ```

pub mod backing;
pub mod priority;
pub mod queue;
pub mod request;
pub mod stats;
pub mod store;
pub mod worker;

pub use backing::{BackingStore, MemoryBackingStore};
pub use priority::ImportPriority;
pub use queue::ImportRequestQueue;
pub use request::{Completion, CompletionSlot, ImportHandle, ImportKey, ImportRequest, Importable};
pub use stats::QueueStats;
pub use store::QueuedBackingStore;
pub use worker::WorkerPool;
