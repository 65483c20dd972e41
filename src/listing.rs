// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Pack directory listings and serve byte-ranged reads over them.
// Author: Lukas Bower

//! Directory listing pager.

use gate9p_codec::{encode_stat, FileMode, Stat};

use crate::qid::{qid_for, root_qid, ROOT_NAME};
use crate::storage::{base_name, Entry};
use crate::GateError;

/// Permission bits reported for every object.
pub const DEFAULT_PERM: u32 = 0o700;

/// Describe a storage entry as a 9P stat record.
#[must_use]
pub fn entry_stat(entry: &Entry) -> Stat {
    let mut mode = FileMode::from_bits(DEFAULT_PERM);
    if entry.is_dir {
        mode = mode | FileMode::DIR;
    }
    let time = entry.time.min(u64::from(u32::MAX)) as u32;
    Stat {
        ty: 0,
        dev: 0,
        qid: qid_for(entry),
        mode,
        atime: time,
        mtime: time,
        length: entry.size.unwrap_or(0),
        name: base_name(&entry.name).to_owned(),
        uid: entry.writer.clone(),
        gid: entry.writer.clone(),
        muid: entry.writer.clone(),
    }
}

/// Describe the synthetic root.
#[must_use]
pub fn root_stat(owner: &str) -> Stat {
    Stat {
        ty: 0,
        dev: 0,
        qid: root_qid(),
        mode: FileMode::DIR | FileMode::from_bits(DEFAULT_PERM),
        atime: 0,
        mtime: 0,
        length: 0,
        name: ROOT_NAME.to_owned(),
        uid: owner.to_owned(),
        gid: owner.to_owned(),
        muid: owner.to_owned(),
    }
}

/// Packed stat records plus the cumulative end offset of each record.
///
/// Reads must start on a record boundary and only ever return whole records.
#[derive(Debug, Clone, Default)]
pub struct DirListing {
    data: Vec<u8>,
    ends: Vec<u64>,
}

impl DirListing {
    /// Pack `entries` in the order given.
    pub fn from_entries<'a>(
        entries: impl IntoIterator<Item = &'a Entry>,
    ) -> Result<Self, GateError> {
        let mut listing = Self::default();
        for entry in entries {
            listing.push(&entry_stat(entry))?;
        }
        Ok(listing)
    }

    /// Append one record.
    pub fn push(&mut self, stat: &Stat) -> Result<(), GateError> {
        let packed = encode_stat(stat)?;
        self.data.extend_from_slice(&packed);
        self.ends.push(self.data.len() as u64);
        Ok(())
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ends.len()
    }

    /// True when the listing holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ends.is_empty()
    }

    /// Total packed size in bytes.
    #[must_use]
    pub fn byte_len(&self) -> u64 {
        self.data.len() as u64
    }

    /// End offsets of each record.
    #[must_use]
    pub fn ends(&self) -> &[u64] {
        &self.ends
    }

    /// Return the whole records that fit in `count` bytes starting at `offset`.
    pub fn read(&self, offset: u64, count: u32) -> Result<&[u8], GateError> {
        let Some(&total) = self.ends.last() else {
            return Ok(&[]);
        };
        if offset != 0 && self.ends.binary_search(&offset).is_err() {
            return Err(GateError::InvalidArgument(format!(
                "invalid offset {offset} in directory read"
            )));
        }
        if offset == total || count == 0 {
            return Ok(&[]);
        }
        let limit = offset.saturating_add(u64::from(count));
        let fitting = self.ends.partition_point(|end| *end <= limit);
        let end = match fitting.checked_sub(1).map(|idx| self.ends[idx]) {
            Some(end) if end > offset => end,
            _ => {
                return Err(GateError::InvalidArgument(
                    "too small read size for dir entry".to_owned(),
                ))
            }
        };
        Ok(&self.data[offset as usize..end as usize])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gate9p_codec::decode_stat;

    fn entry(name: &str, is_dir: bool, size: Option<u64>) -> Entry {
        Entry {
            name: name.to_owned(),
            writer: "ann@example.com".to_owned(),
            is_dir,
            sequence: 1,
            time: 1_700_000_000,
            size,
        }
    }

    fn sample() -> DirListing {
        let entries = [
            entry("ann@example.com/a", false, Some(3)),
            entry("ann@example.com/bb", true, None),
            entry("ann@example.com/ccc", false, Some(10)),
        ];
        DirListing::from_entries(entries.iter()).expect("pack listing")
    }

    #[test]
    fn entry_stat_uses_basename_and_writer() {
        let stat = entry_stat(&entry("ann@example.com/dir/file", false, Some(12)));
        assert_eq!(stat.name, "file");
        assert_eq!(stat.uid, "ann@example.com");
        assert_eq!(stat.length, 12);
        assert_eq!(stat.atime, stat.mtime);
        assert_eq!(stat.mode.bits(), 0o700);
    }

    #[test]
    fn directory_stat_has_dir_bit_and_zero_length() {
        let stat = entry_stat(&entry("ann@example.com/dir", true, None));
        assert!(stat.mode.is_directory());
        assert_eq!(stat.length, 0);
    }

    #[test]
    fn root_stat_is_named_slash() {
        let stat = root_stat("nine-gate");
        assert_eq!(stat.name, "/");
        assert_eq!(stat.gid, "nine-gate");
        assert!(stat.mode.is_directory());
    }

    #[test]
    fn full_read_returns_every_record() {
        let listing = sample();
        let data = listing.read(0, 8192).expect("read");
        assert_eq!(data.len() as u64, listing.byte_len());
        let first = decode_stat(data).expect("first record");
        assert_eq!(first.name, "a");
    }

    #[test]
    fn read_from_record_boundary_starts_at_that_record() {
        let listing = sample();
        let start = listing.ends()[0];
        let data = listing.read(start, 8192).expect("read");
        assert_eq!(decode_stat(data).expect("record").name, "bb");
        assert_eq!(data.len() as u64, listing.byte_len() - start);
    }

    #[test]
    fn misaligned_offset_is_invalid() {
        let listing = sample();
        let err = listing.read(1, 8192).expect_err("misaligned");
        assert!(matches!(err, GateError::InvalidArgument(_)));
    }

    #[test]
    fn read_at_end_is_empty() {
        let listing = sample();
        assert!(listing.read(listing.byte_len(), 100).expect("eof").is_empty());
    }

    #[test]
    fn short_count_never_splits_records() {
        let listing = sample();
        let ends = listing.ends().to_vec();
        let count = (ends[1] + 1) as u32;
        let data = listing.read(0, count).expect("read");
        assert_eq!(data.len() as u64, ends[1]);
    }

    #[test]
    fn count_below_one_record_is_invalid() {
        let listing = sample();
        let err = listing.read(0, 4).expect_err("too small");
        assert!(matches!(err, GateError::InvalidArgument(_)));
    }

    #[test]
    fn empty_listing_reads_empty() {
        let listing = DirListing::default();
        assert!(listing.is_empty());
        assert!(listing.read(0, 100).expect("read").is_empty());
    }
}
