//! hgimport-core — identifiers, object payloads, errors, and configuration
//! shared by the queued backing-store engine and its tools.

pub mod config;
pub mod error;
pub mod hash;
pub mod object;

pub use error::{FetchError, FetchResult};
pub use hash::{CommitId, Hash, ManifestId};
pub use object::{Blob, EntryKind, ImportKind, Tree, TreeEntry};
