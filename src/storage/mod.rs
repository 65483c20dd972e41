// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Define the storage-client capability consumed by the gateway.
// Author: Lukas Bower

//! Storage-client capability and the metadata it hands back.
//!
//! Path names are slash-separated and case-sensitive. The first element is an
//! account name (for example `ann@example.com`); the empty string is the
//! synthetic gateway root and never reaches a [`StorageClient`].

use thiserror::Error;

pub mod memory;

pub use memory::MemoryStore;

/// Errors reported by a storage backend.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// No object exists at the path.
    #[error("{0}: item does not exist")]
    NotFound(String),
    /// An object already exists at the path.
    #[error("{0}: item already exists")]
    Exists(String),
    /// A path element that must be a directory is not one.
    #[error("{0}: not a directory")]
    NotDirectory(String),
    /// The operation needs a regular object but found a directory.
    #[error("{0}: is a directory")]
    IsDirectory(String),
    /// The directory still has children.
    #[error("{0}: directory not empty")]
    NotEmpty(String),
    /// The request was malformed.
    #[error("invalid request: {0}")]
    Invalid(String),
    /// Any other backend failure.
    #[error("storage backend: {0}")]
    Backend(String),
}

/// Metadata snapshot for one stored object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// Full path name of the object.
    pub name: String,
    /// Account that last wrote the object.
    pub writer: String,
    /// True for directories.
    pub is_dir: bool,
    /// Revision number, bumped on every mutation.
    pub sequence: i64,
    /// Modification time in seconds since the epoch.
    pub time: u64,
    /// Content size, when the backend can report it.
    pub size: Option<u64>,
}

/// Location of one stored block within an object's content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockSpan {
    /// Byte offset of the block's first byte.
    pub offset: u64,
    /// Decoded block size in bytes.
    pub size: u64,
}

impl BlockSpan {
    /// Offset one past the block's last byte.
    #[must_use]
    pub fn end(&self) -> u64 {
        self.offset.saturating_add(self.size)
    }
}

/// Streaming access to an object's blocks.
pub trait BlockReader: Send {
    /// Spans of every block in content order.
    fn blocks(&self) -> &[BlockSpan];

    /// Decode the block at `index`.
    fn unpack(&mut self, index: usize) -> Result<Vec<u8>, StorageError>;

    /// Release any decode state held by the reader.
    fn close(&mut self) -> Result<(), StorageError>;
}

/// Operations the gateway needs from a storage service.
pub trait StorageClient: Send + Sync {
    /// Resolve a path to its metadata.
    ///
    /// With `follow_final` false a trailing link is returned as itself, so
    /// the entry keeps the walked name and a dangling link still counts as
    /// present. The gateway always asks for that form.
    fn lookup(&self, path: &str, follow_final: bool) -> Result<Entry, StorageError>;

    /// Return entries whose names match a glob pattern.
    fn glob(&self, pattern: &str) -> Result<Vec<Entry>, StorageError>;

    /// Open an object for block-wise reading.
    fn open_read(&self, path: &str) -> Result<Box<dyn BlockReader>, StorageError>;

    /// Atomically replace the content stored at `path`.
    fn put(&self, path: &str, data: &[u8]) -> Result<Entry, StorageError>;

    /// Create a directory.
    fn make_directory(&self, path: &str) -> Result<Entry, StorageError>;

    /// Delete an object or empty directory.
    fn delete(&self, path: &str) -> Result<(), StorageError>;

    /// Move an object (and any children) to a new name.
    fn rename(&self, old: &str, new: &str) -> Result<Entry, StorageError>;

    /// Fetch an object's whole content.
    fn get(&self, path: &str) -> Result<Vec<u8>, StorageError>;
}

/// Append `name` to `parent`; the empty parent is the gateway root.
#[must_use]
pub fn join_path(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_owned()
    } else {
        format!("{parent}/{name}")
    }
}

/// Drop the final element of `path`. Top-level names yield the root.
#[must_use]
pub fn parent_path(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[..idx],
        None => "",
    }
}

/// Final element of `path`.
#[must_use]
pub fn base_name(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[idx + 1..],
        None => path,
    }
}
