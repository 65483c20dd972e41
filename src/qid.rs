// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Derive stable 9P qids from storage path names.
// Author: Lukas Bower

//! Qid assignment.
//!
//! A qid path is the first eight bytes (big-endian) of the SHA-256 digest of
//! the object's path name, so the same name always maps to the same id across
//! sessions and restarts. Distinct names may collide; that is tolerated.

use gate9p_codec::{Qid, QidType};
use sha2::{Digest, Sha256};

use crate::storage::Entry;

/// Canonical name hashed for the synthetic root.
pub const ROOT_NAME: &str = "/";

/// Hash a path name to its 64-bit qid path.
#[must_use]
pub fn qid_path(name: &str) -> u64 {
    let digest = Sha256::digest(name.as_bytes());
    let mut id = [0u8; 8];
    id.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(id)
}

/// Build the qid for an entry. The version is the entry's sequence truncated
/// to 32 bits.
#[must_use]
pub fn qid_for(entry: &Entry) -> Qid {
    let ty = if entry.is_dir {
        QidType::DIRECTORY
    } else {
        QidType::FILE
    };
    Qid::new(ty, entry.sequence as u32, qid_path(&entry.name))
}

/// Qid of the synthetic root directory.
#[must_use]
pub fn root_qid() -> Qid {
    Qid::new(QidType::DIRECTORY, 0, qid_path(ROOT_NAME))
}
