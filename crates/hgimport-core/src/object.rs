//! Object payloads returned by the backing store.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::hash::Hash;

/// Which kind of object a fetch is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportKind {
    Blob,
    Tree,
}

impl std::fmt::Display for ImportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImportKind::Blob => f.write_str("blob"),
            ImportKind::Tree => f.write_str("tree"),
        }
    }
}

/// Opaque file contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blob {
    pub id: Hash,
    pub contents: Bytes,
}

impl Blob {
    pub fn new(id: Hash, contents: impl Into<Bytes>) -> Self {
        Self {
            id,
            contents: contents.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.contents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contents.is_empty()
    }
}

/// What a tree entry points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Regular,
    Executable,
    Symlink,
    Directory,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeEntry {
    pub name: String,
    pub id: Hash,
    pub kind: EntryKind,
}

/// A directory listing: names mapped to child identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tree {
    pub id: Hash,
    pub entries: Vec<TreeEntry>,
}

impl Tree {
    /// Entries are kept sorted by name so lookups can binary search.
    pub fn new(id: Hash, mut entries: Vec<TreeEntry>) -> Self {
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Self { id, entries }
    }

    pub fn get(&self, name: &str) -> Option<&TreeEntry> {
        self.entries
            .binary_search_by(|e| e.name.as_str().cmp(name))
            .ok()
            .map(|i| &self.entries[i])
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
