//! Error taxonomy for fetches through the import queue.
//!
//! Errors are `Clone` because one result is delivered to every handle
//! waiting on the same request.

use thiserror::Error;

use crate::hash::Hash;
use crate::object::ImportKind;

pub type FetchResult<T> = Result<T, FetchError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// The identifier does not exist in the backing repository.
    #[error("{kind} {id} not found in backing store")]
    NotFound { kind: ImportKind, id: Hash },

    /// Transport or other backing-store failure, forwarded verbatim.
    #[error("backing store error: {0}")]
    Backend(String),

    /// Enqueue attempted after the queue was stopped.
    #[error("import queue is closed")]
    QueueClosed,

    /// A completion slot was fulfilled more than once.
    #[error("completion slot already fulfilled")]
    AlreadyFulfilled,

    /// The request was dropped without ever being fulfilled.
    #[error("import request abandoned before completion")]
    Abandoned,

    #[error("failed to spawn import worker: {0}")]
    Spawn(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl FetchError {
    pub fn backend(msg: impl Into<String>) -> Self {
        FetchError::Backend(msg.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, FetchError::NotFound { .. })
    }
}
