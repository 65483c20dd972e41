// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Track per-connection fid state for the gateway.
// Author: Lukas Bower

//! Session and fid tracking.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use gate9p_codec::{OpenMode, Qid, MAX_MSIZE};

use crate::cache::SharedFile;
use crate::listing::DirListing;
use crate::qid::{qid_for, root_qid};
use crate::storage::Entry;
use crate::{lock, GateError};

/// Default number of shards in a fid table.
pub const DEFAULT_FID_SHARDS: usize = 16;

/// State behind one fid.
#[derive(Debug, Default)]
pub struct FidState {
    /// Resolved path; empty for the root.
    pub path: String,
    /// Cached metadata; `None` only at the root.
    pub entry: Option<Entry>,
    /// Mode the fid was opened with.
    pub mode: Option<OpenMode>,
    /// Open file buffer for regular files.
    pub file: Option<SharedFile>,
    /// Packed listing for opened directories.
    pub listing: Option<DirListing>,
}

impl FidState {
    /// State pinned to the gateway root.
    #[must_use]
    pub fn root() -> Self {
        Self::default()
    }

    /// True when the fid names the synthetic root.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.path.is_empty()
    }

    /// True once the fid has been opened or created.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.mode.is_some()
    }

    /// True when the fid names a directory.
    #[must_use]
    pub fn is_dir(&self) -> bool {
        self.entry.as_ref().map_or(true, |entry| entry.is_dir)
    }

    /// Qid describing the fid's current target.
    #[must_use]
    pub fn qid(&self) -> Qid {
        self.entry.as_ref().map_or_else(root_qid, qid_for)
    }

    /// Copy the resolved location into a fresh, unopened state.
    #[must_use]
    pub fn walk_clone(&self) -> Self {
        Self {
            path: self.path.clone(),
            entry: self.entry.clone(),
            ..Self::default()
        }
    }
}

/// Handle to one fid's state. Holding the lock serialises requests on the fid.
pub type FidSlot = Arc<Mutex<FidState>>;

/// Fid table sharded to keep lock hold times short across handles.
#[derive(Debug)]
pub struct FidTable {
    shards: Vec<Mutex<BTreeMap<u32, FidSlot>>>,
}

impl FidTable {
    /// Create a table with `shard_count` shards (at least one).
    #[must_use]
    pub fn new(shard_count: usize) -> Self {
        let count = shard_count.max(1);
        let mut shards = Vec::with_capacity(count);
        for _ in 0..count {
            shards.push(Mutex::new(BTreeMap::new()));
        }
        Self { shards }
    }

    /// True if `fid` is in use.
    #[must_use]
    pub fn contains(&self, fid: u32) -> bool {
        lock(self.shard(fid)).contains_key(&fid)
    }

    /// Bind `fid` to `state`.
    pub fn insert(&self, fid: u32, state: FidState) -> Result<FidSlot, GateError> {
        let mut guard = lock(self.shard(fid));
        if guard.contains_key(&fid) {
            return Err(GateError::FidInUse(fid));
        }
        let slot = Arc::new(Mutex::new(state));
        guard.insert(fid, Arc::clone(&slot));
        Ok(slot)
    }

    /// Fetch the slot for `fid`.
    pub fn get(&self, fid: u32) -> Result<FidSlot, GateError> {
        lock(self.shard(fid))
            .get(&fid)
            .cloned()
            .ok_or(GateError::UnknownFid(fid))
    }

    /// Unbind `fid`, returning its slot.
    pub fn remove(&self, fid: u32) -> Option<FidSlot> {
        lock(self.shard(fid)).remove(&fid)
    }

    /// Unbind every fid.
    pub fn drain(&self) -> Vec<(u32, FidSlot)> {
        let mut drained = Vec::new();
        for shard in &self.shards {
            let mut guard = lock(shard);
            drained.extend(std::mem::take(&mut *guard));
        }
        drained
    }

    /// Number of bound fids.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shards.iter().map(|shard| lock(shard).len()).sum()
    }

    /// True when no fids are bound.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn shard(&self, fid: u32) -> &Mutex<BTreeMap<u32, FidSlot>> {
        &self.shards[fid as usize % self.shards.len()]
    }
}

impl Default for FidTable {
    fn default() -> Self {
        Self::new(DEFAULT_FID_SHARDS)
    }
}

/// State of one client connection.
#[derive(Debug)]
pub struct Session {
    id: u64,
    msize: AtomicU32,
    fids: FidTable,
}

impl Session {
    /// Create a session with the default message size.
    #[must_use]
    pub fn new(id: u64) -> Self {
        Self {
            id,
            msize: AtomicU32::new(MAX_MSIZE),
            fids: FidTable::default(),
        }
    }

    /// Session identifier used in logs.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Negotiated maximum message size.
    #[must_use]
    pub fn msize(&self) -> u32 {
        self.msize.load(Ordering::Acquire)
    }

    pub(crate) fn set_msize(&self, msize: u32) {
        self.msize.store(msize, Ordering::Release);
    }

    /// Fids bound on this session.
    #[must_use]
    pub fn fids(&self) -> &FidTable {
        &self.fids
    }
}
