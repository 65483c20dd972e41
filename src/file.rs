// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Hold one remote object's content while a fid has it open.
// Author: Lukas Bower

//! Open-file buffers.
//!
//! A writable buffer keeps the whole object in memory and commits it with a
//! single `put` on close. A readable buffer streams blocks from the storage
//! client and keeps only the most recently decoded block.

use std::sync::Arc;

use log::trace;

use crate::storage::{BlockReader, StorageClient};
use crate::GateError;

/// Largest object a writable buffer will address by default.
pub const DEFAULT_MAX_LEN: u64 = isize::MAX as u64;

enum Content {
    Write {
        client: Arc<dyn StorageClient>,
        data: Vec<u8>,
        max_len: u64,
    },
    Read {
        reader: Box<dyn BlockReader>,
        size: u64,
        last_block: Option<(usize, Vec<u8>)>,
    },
}

/// Content of one open object.
pub struct FileBuffer {
    name: String,
    closed: bool,
    content: Content,
}

impl std::fmt::Debug for FileBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileBuffer")
            .field("name", &self.name)
            .field("closed", &self.closed)
            .field("writable", &self.is_writable())
            .field("len", &self.len())
            .finish()
    }
}

impl FileBuffer {
    /// Open `name` for writing. Unless `truncate` is set, the current remote
    /// content is fetched in full first.
    pub fn writable(
        client: Arc<dyn StorageClient>,
        name: &str,
        truncate: bool,
    ) -> Result<Self, GateError> {
        let data = if truncate {
            Vec::new()
        } else {
            client.get(name)?
        };
        Ok(Self {
            name: name.to_owned(),
            closed: false,
            content: Content::Write {
                client,
                data,
                max_len: DEFAULT_MAX_LEN,
            },
        })
    }

    /// Open `name` for block-wise reading.
    pub fn readable(client: &dyn StorageClient, name: &str) -> Result<Self, GateError> {
        let reader = client.open_read(name)?;
        Ok(Self::from_reader(name, reader))
    }

    fn from_reader(name: &str, reader: Box<dyn BlockReader>) -> Self {
        let size = reader.blocks().last().map_or(0, |span| span.end());
        Self {
            name: name.to_owned(),
            closed: false,
            content: Content::Read {
                reader,
                size,
                last_block: None,
            },
        }
    }

    /// Cap the size a writable buffer may grow to.
    #[must_use]
    pub fn with_max_len(mut self, limit: u64) -> Self {
        if let Content::Write { max_len, .. } = &mut self.content {
            *max_len = limit;
        }
        self
    }

    /// Path name of the object.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// True once [`close`](Self::close) has run.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// True for buffers opened with [`writable`](Self::writable).
    #[must_use]
    pub fn is_writable(&self) -> bool {
        matches!(self.content, Content::Write { .. })
    }

    /// Logical length of the content.
    #[must_use]
    pub fn len(&self) -> u64 {
        match &self.content {
            Content::Write { data, .. } => data.len() as u64,
            Content::Read { size, .. } => *size,
        }
    }

    /// True when the content is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Allocated capacity of a writable buffer; zero for readers.
    #[must_use]
    pub fn capacity(&self) -> usize {
        match &self.content {
            Content::Write { data, .. } => data.capacity(),
            Content::Read { .. } => 0,
        }
    }

    /// Write `buf` at `offset`, zero-filling any gap past the current end.
    pub fn write_at(&mut self, buf: &[u8], offset: u64) -> Result<usize, GateError> {
        self.ensure_open()?;
        let Content::Write { data, max_len, .. } = &mut self.content else {
            return Err(GateError::InvalidArgument(format!(
                "{}: not open for writing",
                self.name
            )));
        };
        if offset > i64::MAX as u64 {
            return Err(GateError::InvalidArgument("negative offset".to_owned()));
        }
        let end = offset
            .checked_add(buf.len() as u64)
            .filter(|end| *end <= *max_len)
            .ok_or_else(|| GateError::InvalidArgument("file too long".to_owned()))?;
        let end = usize::try_from(end)
            .map_err(|_| GateError::InvalidArgument("file too long".to_owned()))?;
        if end > data.capacity() {
            let cap_limit = usize::try_from(*max_len).unwrap_or(usize::MAX);
            let target = end.saturating_add(end / 2).min(cap_limit).max(end);
            data.reserve_exact(target - data.len());
        }
        if end > data.len() {
            data.resize(end, 0);
        }
        let start = offset as usize;
        data[start..end].copy_from_slice(buf);
        trace!("{}: wrote {} bytes at {}", self.name, buf.len(), offset);
        Ok(buf.len())
    }

    /// Read up to `count` bytes at `offset`. Reads at or past the end are empty.
    pub fn read_at(&mut self, offset: u64, count: usize) -> Result<Vec<u8>, GateError> {
        self.ensure_open()?;
        match &mut self.content {
            Content::Write { data, .. } => {
                let len = data.len() as u64;
                if offset >= len {
                    return Ok(Vec::new());
                }
                let start = offset as usize;
                let end = start.saturating_add(count).min(data.len());
                Ok(data[start..end].to_vec())
            }
            Content::Read {
                reader,
                size,
                last_block,
            } => {
                if offset >= *size || count == 0 {
                    return Ok(Vec::new());
                }
                let want_end = offset.saturating_add(count as u64).min(*size);
                let mut out = Vec::with_capacity((want_end - offset) as usize);
                let first = reader
                    .blocks()
                    .partition_point(|span| span.end() <= offset);
                let mut index = first;
                while index < reader.blocks().len() {
                    let span = reader.blocks()[index];
                    if span.offset >= want_end {
                        break;
                    }
                    let cached = last_block.as_ref().is_some_and(|(idx, _)| *idx == index);
                    if !cached {
                        let block = reader.unpack(index)?;
                        *last_block = Some((index, block));
                    }
                    if let Some((_, block)) = last_block.as_ref() {
                        let from = offset.max(span.offset) - span.offset;
                        let to = want_end.min(span.end()) - span.offset;
                        let to = (to as usize).min(block.len());
                        let from = (from as usize).min(to);
                        out.extend_from_slice(&block[from..to]);
                    }
                    index += 1;
                }
                Ok(out)
            }
        }
    }

    /// Commit (writable) or discard (readable) the buffer. Fails if already
    /// closed.
    pub fn close(&mut self) -> Result<(), GateError> {
        self.ensure_open()?;
        self.closed = true;
        match &mut self.content {
            Content::Write { client, data, .. } => {
                let committed = std::mem::take(data);
                client.put(&self.name, &committed)?;
                trace!("{}: committed {} bytes", self.name, committed.len());
                Ok(())
            }
            Content::Read {
                reader, last_block, ..
            } => {
                *last_block = None;
                reader.close()?;
                Ok(())
            }
        }
    }

    fn ensure_open(&self) -> Result<(), GateError> {
        if self.closed {
            return Err(GateError::AlreadyClosed(self.name.clone()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{BlockSpan, MemoryStore, StorageError};
    use std::sync::atomic::{AtomicUsize, Ordering};

    const FILE: &str = "ann@example.com/file";

    /// Serves `count` blocks of `width` bytes, each filled with its index.
    struct CountingReader {
        spans: Vec<BlockSpan>,
        unpacked: Arc<AtomicUsize>,
    }

    impl CountingReader {
        fn new(count: u64, width: u64, unpacked: Arc<AtomicUsize>) -> Self {
            let spans = (0..count)
                .map(|idx| BlockSpan {
                    offset: idx * width,
                    size: width,
                })
                .collect();
            Self { spans, unpacked }
        }
    }

    impl BlockReader for CountingReader {
        fn blocks(&self) -> &[BlockSpan] {
            &self.spans
        }

        fn unpack(&mut self, index: usize) -> Result<Vec<u8>, StorageError> {
            self.unpacked.fetch_add(1, Ordering::SeqCst);
            let span = self.spans[index];
            Ok(vec![index as u8; span.size as usize])
        }

        fn close(&mut self) -> Result<(), StorageError> {
            Ok(())
        }
    }

    fn client() -> Arc<dyn StorageClient> {
        Arc::new(MemoryStore::with_block_size("ann@example.com", 4))
    }

    #[test]
    fn write_then_close_commits_content() {
        let client = client();
        let mut file = FileBuffer::writable(Arc::clone(&client), FILE, true).expect("open");
        assert_eq!(file.write_at(b"hello", 0).expect("write"), 5);
        file.close().expect("close");
        assert_eq!(client.get(FILE).expect("get"), b"hello");
    }

    #[test]
    fn second_close_is_rejected() {
        let client = client();
        let mut file = FileBuffer::writable(client, FILE, true).expect("open");
        file.close().expect("first close");
        let err = file.close().expect_err("second close");
        assert!(matches!(err, GateError::AlreadyClosed(_)));
        assert!(matches!(
            file.write_at(b"x", 0),
            Err(GateError::AlreadyClosed(_))
        ));
    }

    #[test]
    fn non_truncating_open_preloads_content() {
        let client = client();
        client.put(FILE, b"abcdefgh").expect("seed");
        let mut file = FileBuffer::writable(Arc::clone(&client), FILE, false).expect("open");
        file.write_at(b"XY", 0).expect("write");
        file.close().expect("close");
        assert_eq!(client.get(FILE).expect("get"), b"XYcdefgh");
    }

    #[test]
    fn sparse_write_zero_fills_gap() {
        let client = client();
        let mut file = FileBuffer::writable(client, FILE, true).expect("open");
        file.write_at(b"ab", 0).expect("write");
        file.write_at(b"z", 5).expect("write");
        assert_eq!(file.len(), 6);
        assert_eq!(file.read_at(0, 16).expect("read"), b"ab\0\0\0z");
    }

    #[test]
    fn growth_reserves_half_again() {
        let client = client();
        let mut file = FileBuffer::writable(client, FILE, true).expect("open");
        file.write_at(&[1u8; 100], 0).expect("write");
        assert!(file.capacity() >= 150);
    }

    #[test]
    fn writes_beyond_max_len_fail() {
        let client = client();
        let mut file = FileBuffer::writable(client, FILE, true)
            .expect("open")
            .with_max_len(8);
        file.write_at(b"12345678", 0).expect("fits");
        let err = file.write_at(b"9", 8).expect_err("too long");
        assert!(matches!(err, GateError::InvalidArgument(_)));
    }

    #[test]
    fn offsets_past_signed_range_are_negative() {
        let client = client();
        let mut file = FileBuffer::writable(client, FILE, true).expect("open");
        let err = file.write_at(b"x", u64::MAX).expect_err("negative");
        assert_eq!(err.to_string(), "invalid argument: negative offset");
    }

    #[test]
    fn reader_spans_blocks() {
        let client = client();
        client.put(FILE, b"0123456789").expect("seed");
        let mut file = FileBuffer::readable(client.as_ref(), FILE).expect("open");
        assert_eq!(file.len(), 10);
        assert_eq!(file.read_at(2, 5).expect("read"), b"23456");
        assert_eq!(file.read_at(8, 10).expect("read"), b"89");
        assert!(file.read_at(10, 4).expect("eof").is_empty());
    }

    #[test]
    fn reader_decodes_each_block_once_while_it_stays_cached() {
        let unpacked = Arc::new(AtomicUsize::new(0));
        let reader = CountingReader::new(8, 16, Arc::clone(&unpacked));
        let mut file = FileBuffer::from_reader(FILE, Box::new(reader));
        assert_eq!(file.len(), 128);

        assert_eq!(file.read_at(2, 4).expect("read"), vec![0u8; 4]);
        assert_eq!(file.read_at(2, 4).expect("read"), vec![0u8; 4]);
        assert_eq!(file.read_at(10, 6).expect("read"), vec![0u8; 6]);
        assert_eq!(unpacked.load(Ordering::SeqCst), 1);

        assert_eq!(file.read_at(112, 4).expect("read"), vec![7u8; 4]);
        assert_eq!(unpacked.load(Ordering::SeqCst), 2);
        assert_eq!(file.read_at(0, 4).expect("read"), vec![0u8; 4]);
        assert_eq!(unpacked.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn reader_rejects_writes() {
        let client = client();
        client.put(FILE, b"data").expect("seed");
        let mut file = FileBuffer::readable(client.as_ref(), FILE).expect("open");
        assert!(matches!(
            file.write_at(b"x", 0),
            Err(GateError::InvalidArgument(_))
        ));
        file.close().expect("close");
        assert!(matches!(
            file.read_at(0, 1),
            Err(GateError::AlreadyClosed(_))
        ));
    }
}
