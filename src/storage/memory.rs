// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Provide an in-process storage backend for the gateway binary and tests.
// Author: Lukas Bower

//! In-memory storage backend.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use glob::{MatchOptions, Pattern};
use log::trace;

use super::{parent_path, BlockReader, BlockSpan, Entry, StorageClient, StorageError};
use crate::lock;

/// Default block size used when chunking object content.
pub const DEFAULT_BLOCK_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone)]
struct Node {
    is_dir: bool,
    data: Arc<Vec<u8>>,
    writer: String,
    sequence: i64,
    time: u64,
}

#[derive(Debug, Default)]
struct Tree {
    nodes: BTreeMap<String, Node>,
    next_sequence: i64,
}

impl Tree {
    fn bump(&mut self) -> i64 {
        self.next_sequence += 1;
        self.next_sequence
    }

    fn entry(&self, path: &str) -> Result<Entry, StorageError> {
        self.nodes
            .get(path)
            .map(|node| to_entry(path, node))
            .ok_or_else(|| StorageError::NotFound(path.to_owned()))
    }

    fn require_parent_dir(&self, path: &str) -> Result<(), StorageError> {
        let parent = parent_path(path);
        if parent.is_empty() {
            return Ok(());
        }
        match self.nodes.get(parent) {
            Some(node) if node.is_dir => Ok(()),
            Some(_) => Err(StorageError::NotDirectory(parent.to_owned())),
            None => Err(StorageError::NotFound(parent.to_owned())),
        }
    }

    fn has_children(&self, path: &str) -> bool {
        let prefix = format!("{path}/");
        self.nodes
            .range(prefix.clone()..)
            .next()
            .is_some_and(|(name, _)| name.starts_with(&prefix))
    }
}

fn to_entry(path: &str, node: &Node) -> Entry {
    Entry {
        name: path.to_owned(),
        writer: node.writer.clone(),
        is_dir: node.is_dir,
        sequence: node.sequence,
        time: node.time,
        size: (!node.is_dir).then_some(node.data.len() as u64),
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}

fn validate(path: &str) -> Result<(), StorageError> {
    if path.is_empty() || path.split('/').any(str::is_empty) {
        return Err(StorageError::Invalid(format!("bad path name {path:?}")));
    }
    Ok(())
}

/// Mutex-guarded tree of objects keyed by full path name.
///
/// Top-level names act as account roots and may be created with
/// [`StorageClient::make_directory`] without a parent.
#[derive(Debug)]
pub struct MemoryStore {
    writer: String,
    block_size: usize,
    tree: Mutex<Tree>,
}

impl MemoryStore {
    /// Create a store whose writes are attributed to `writer`, with that
    /// account's root directory already present.
    pub fn new(writer: impl Into<String>) -> Self {
        Self::with_block_size(writer, DEFAULT_BLOCK_SIZE)
    }

    /// Create a store that chunks content into `block_size` byte blocks.
    pub fn with_block_size(writer: impl Into<String>, block_size: usize) -> Self {
        let writer = writer.into();
        let store = Self {
            writer: writer.clone(),
            block_size: block_size.max(1),
            tree: Mutex::new(Tree::default()),
        };
        {
            let mut tree = lock(&store.tree);
            let sequence = tree.bump();
            tree.nodes.insert(
                writer.clone(),
                Node {
                    is_dir: true,
                    data: Arc::default(),
                    writer,
                    sequence,
                    time: now_secs(),
                },
            );
        }
        store
    }

    /// Account that writes attributed to this store are recorded under.
    #[must_use]
    pub fn writer(&self) -> &str {
        &self.writer
    }

    /// Block size used by readers returned from [`StorageClient::open_read`].
    #[must_use]
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    fn node(&self, is_dir: bool, data: Vec<u8>, sequence: i64) -> Node {
        Node {
            is_dir,
            data: Arc::new(data),
            writer: self.writer.clone(),
            sequence,
            time: now_secs(),
        }
    }
}

impl StorageClient for MemoryStore {
    // There are no links in this backend, so `follow_final` changes nothing.
    fn lookup(&self, path: &str, _follow_final: bool) -> Result<Entry, StorageError> {
        lock(&self.tree).entry(path)
    }

    fn glob(&self, pattern: &str) -> Result<Vec<Entry>, StorageError> {
        let pattern = Pattern::new(pattern)
            .map_err(|err| StorageError::Invalid(format!("bad glob {pattern:?}: {err}")))?;
        let options = MatchOptions {
            case_sensitive: true,
            require_literal_separator: true,
            require_literal_leading_dot: false,
        };
        let tree = lock(&self.tree);
        Ok(tree
            .nodes
            .iter()
            .filter(|(name, _)| pattern.matches_with(name, options))
            .map(|(name, node)| to_entry(name, node))
            .collect())
    }

    fn open_read(&self, path: &str) -> Result<Box<dyn BlockReader>, StorageError> {
        let tree = lock(&self.tree);
        let node = tree
            .nodes
            .get(path)
            .ok_or_else(|| StorageError::NotFound(path.to_owned()))?;
        if node.is_dir {
            return Err(StorageError::IsDirectory(path.to_owned()));
        }
        Ok(Box::new(MemoryReader::new(
            Arc::clone(&node.data),
            self.block_size,
        )))
    }

    fn put(&self, path: &str, data: &[u8]) -> Result<Entry, StorageError> {
        validate(path)?;
        let mut tree = lock(&self.tree);
        if parent_path(path).is_empty() {
            return Err(StorageError::Invalid(format!(
                "{path}: cannot store data at an account root"
            )));
        }
        tree.require_parent_dir(path)?;
        if tree.nodes.get(path).is_some_and(|node| node.is_dir) {
            return Err(StorageError::IsDirectory(path.to_owned()));
        }
        let sequence = tree.bump();
        let node = self.node(false, data.to_vec(), sequence);
        let entry = to_entry(path, &node);
        tree.nodes.insert(path.to_owned(), node);
        trace!("memory store put {} ({} bytes)", path, data.len());
        Ok(entry)
    }

    fn make_directory(&self, path: &str) -> Result<Entry, StorageError> {
        validate(path)?;
        let mut tree = lock(&self.tree);
        if tree.nodes.contains_key(path) {
            return Err(StorageError::Exists(path.to_owned()));
        }
        tree.require_parent_dir(path)?;
        let sequence = tree.bump();
        let node = self.node(true, Vec::new(), sequence);
        let entry = to_entry(path, &node);
        tree.nodes.insert(path.to_owned(), node);
        Ok(entry)
    }

    fn delete(&self, path: &str) -> Result<(), StorageError> {
        let mut tree = lock(&self.tree);
        let Some(node) = tree.nodes.get(path) else {
            return Err(StorageError::NotFound(path.to_owned()));
        };
        if node.is_dir && tree.has_children(path) {
            return Err(StorageError::NotEmpty(path.to_owned()));
        }
        tree.nodes.remove(path);
        Ok(())
    }

    fn rename(&self, old: &str, new: &str) -> Result<Entry, StorageError> {
        validate(new)?;
        let mut tree = lock(&self.tree);
        if !tree.nodes.contains_key(old) {
            return Err(StorageError::NotFound(old.to_owned()));
        }
        if tree.nodes.contains_key(new) {
            return Err(StorageError::Exists(new.to_owned()));
        }
        if new.starts_with(&format!("{old}/")) {
            return Err(StorageError::Invalid(format!(
                "cannot move {old} inside itself"
            )));
        }
        tree.require_parent_dir(new)?;
        let prefix = format!("{old}/");
        let moved: Vec<String> = tree
            .nodes
            .keys()
            .filter(|name| name.as_str() == old || name.starts_with(&prefix))
            .cloned()
            .collect();
        for name in moved {
            if let Some(mut node) = tree.nodes.remove(&name) {
                node.sequence = tree.bump();
                let renamed = format!("{new}{}", &name[old.len()..]);
                tree.nodes.insert(renamed, node);
            }
        }
        tree.entry(new)
    }

    fn get(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        let tree = lock(&self.tree);
        let node = tree
            .nodes
            .get(path)
            .ok_or_else(|| StorageError::NotFound(path.to_owned()))?;
        if node.is_dir {
            return Err(StorageError::IsDirectory(path.to_owned()));
        }
        Ok(node.data.as_ref().clone())
    }
}

/// Block reader over a snapshot of an object's content.
#[derive(Debug)]
struct MemoryReader {
    data: Arc<Vec<u8>>,
    spans: Vec<BlockSpan>,
    closed: bool,
}

impl MemoryReader {
    fn new(data: Arc<Vec<u8>>, block_size: usize) -> Self {
        let spans = data
            .chunks(block_size)
            .enumerate()
            .map(|(idx, chunk)| BlockSpan {
                offset: (idx * block_size) as u64,
                size: chunk.len() as u64,
            })
            .collect();
        Self {
            data,
            spans,
            closed: false,
        }
    }
}

impl BlockReader for MemoryReader {
    fn blocks(&self) -> &[BlockSpan] {
        &self.spans
    }

    fn unpack(&mut self, index: usize) -> Result<Vec<u8>, StorageError> {
        if self.closed {
            return Err(StorageError::Invalid("reader closed".to_owned()));
        }
        let span = self
            .spans
            .get(index)
            .ok_or_else(|| StorageError::Invalid(format!("no block {index}")))?;
        let start = span.offset as usize;
        let end = span.end() as usize;
        Ok(self.data[start..end].to_vec())
    }

    fn close(&mut self) -> Result<(), StorageError> {
        self.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ANN: &str = "ann@example.com";

    fn store() -> MemoryStore {
        MemoryStore::with_block_size(ANN, 4)
    }

    #[test]
    fn account_root_exists_on_creation() {
        let store = store();
        let root = store.lookup(ANN, true).expect("account root");
        assert!(root.is_dir);
        assert_eq!(root.writer, ANN);
        assert_eq!(root.size, None);
    }

    #[test]
    fn put_requires_existing_parent() {
        let store = store();
        let err = store
            .put("ann@example.com/missing/file", b"x")
            .expect_err("parent missing");
        assert_eq!(
            err,
            StorageError::NotFound("ann@example.com/missing".to_owned())
        );
    }

    #[test]
    fn put_bumps_sequence() {
        let store = store();
        let first = store.put("ann@example.com/f", b"one").expect("put");
        let second = store.put("ann@example.com/f", b"two").expect("put");
        assert!(second.sequence > first.sequence);
        assert_eq!(second.size, Some(3));
        assert_eq!(store.get("ann@example.com/f").expect("get"), b"two");
    }

    #[test]
    fn glob_does_not_cross_separators() {
        let store = store();
        store.make_directory("ann@example.com/d").expect("mkdir");
        store.put("ann@example.com/d/inner", b"").expect("put");
        store.put("ann@example.com/top", b"").expect("put");
        let names: Vec<String> = store
            .glob("ann@example.com/*")
            .expect("glob")
            .into_iter()
            .map(|entry| entry.name)
            .collect();
        assert_eq!(names, vec!["ann@example.com/d", "ann@example.com/top"]);
    }

    #[test]
    fn delete_rejects_non_empty_directory() {
        let store = store();
        store.make_directory("ann@example.com/d").expect("mkdir");
        store.put("ann@example.com/d/f", b"").expect("put");
        assert_eq!(
            store.delete("ann@example.com/d"),
            Err(StorageError::NotEmpty("ann@example.com/d".to_owned()))
        );
        store.delete("ann@example.com/d/f").expect("delete file");
        store.delete("ann@example.com/d").expect("delete dir");
    }

    #[test]
    fn rename_moves_children() {
        let store = store();
        store.make_directory("ann@example.com/a").expect("mkdir");
        store.put("ann@example.com/a/f", b"data").expect("put");
        let entry = store
            .rename("ann@example.com/a", "ann@example.com/b")
            .expect("rename");
        assert_eq!(entry.name, "ann@example.com/b");
        assert!(store.lookup("ann@example.com/a/f", true).is_err());
        assert_eq!(store.get("ann@example.com/b/f").expect("get"), b"data");
    }

    #[test]
    fn rename_refuses_existing_target() {
        let store = store();
        store.put("ann@example.com/a", b"").expect("put");
        store.put("ann@example.com/b", b"").expect("put");
        assert_eq!(
            store.rename("ann@example.com/a", "ann@example.com/b"),
            Err(StorageError::Exists("ann@example.com/b".to_owned()))
        );
    }

    #[test]
    fn reader_splits_content_into_blocks() {
        let store = store();
        store.put("ann@example.com/f", b"0123456789").expect("put");
        let mut reader = store.open_read("ann@example.com/f").expect("open");
        let sizes: Vec<u64> = reader.blocks().iter().map(|span| span.size).collect();
        assert_eq!(sizes, vec![4, 4, 2]);
        assert_eq!(reader.unpack(2).expect("unpack"), b"89");
        reader.close().expect("close");
        assert!(reader.unpack(0).is_err());
    }
}
