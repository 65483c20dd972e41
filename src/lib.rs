// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Expose the nine-gate 9P gateway library.
// Author: Lukas Bower
#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! nine-gate serves a path-addressed storage service over 9P2000.
//!
//! [`GateServer`] implements the protocol operations on top of a
//! [`StorageClient`]. [`GateListener`] accepts TCP or unix-socket clients and
//! [`InProcessConnection`] drives the server without a socket.

use std::io;
use std::sync::{Mutex, MutexGuard, PoisonError};

use thiserror::Error;

pub use gate9p_codec as codec;
pub use gate9p_codec::CodecError;

/// Shared write-buffer registry.
pub mod cache;
/// Configuration file and defaults.
pub mod config;
/// Open-file buffers.
pub mod file;
/// In-process client connection.
pub mod inprocess;
/// Directory listing pager.
pub mod listing;
/// Qid assignment.
pub mod qid;
/// Protocol request handlers.
pub mod server;
/// Per-connection fid state.
pub mod session;
/// Storage-client capability.
pub mod storage;
/// Socket listener and worker pool.
pub mod transport;

pub use cache::{SharedFile, WriteCache};
pub use config::{ConfigError, GateConfig, Net};
pub use file::FileBuffer;
pub use inprocess::InProcessConnection;
pub use listing::DirListing;
pub use server::GateServer;
pub use session::{FidState, FidTable, Session};
pub use storage::{Entry, MemoryStore, StorageClient, StorageError};
pub use transport::GateListener;

/// Errors raised while serving 9P requests.
#[derive(Debug, Error)]
pub enum GateError {
    /// The named object does not exist.
    #[error("file not found: {0}")]
    NotFound(String),
    /// The target name is already taken.
    #[error("file already exists: {0}")]
    AlreadyExists(String),
    /// Malformed or out-of-range request.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// The operation is not provided by the gateway.
    #[error("{0}")]
    Unsupported(String),
    /// The buffer was already closed.
    #[error("{0}: is closed")]
    AlreadyClosed(String),
    /// Storage-client failure, passed through unchanged.
    #[error(transparent)]
    Io(#[from] StorageError),
    /// The fid is not bound on this session.
    #[error("unknown fid {0}")]
    UnknownFid(u32),
    /// The fid is already bound on this session.
    #[error("fid {0} already in use")]
    FidInUse(u32),
    /// Malformed frame.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
    /// Socket failure.
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),
    /// Error string returned by the server in an `Rerror`.
    #[error("{0}")]
    Remote(String),
}

impl GateError {
    /// True when the error ends the connection instead of being answered.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, GateError::Codec(_) | GateError::Transport(_))
    }
}

/// Lock a mutex, recovering the data from a poisoned lock.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
