// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Share one write buffer between every fid writing the same path.
// Author: Lukas Bower

//! Write-buffer registry.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use log::debug;

use crate::file::FileBuffer;
use crate::storage::StorageClient;
use crate::{lock, GateError};

/// A file buffer shared between fids. The mutex serialises writers.
pub type SharedFile = Arc<Mutex<FileBuffer>>;

/// Registry of live writable buffers keyed by path name.
#[derive(Debug, Default)]
pub struct WriteCache {
    files: Mutex<HashMap<String, SharedFile>>,
}

impl WriteCache {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the live buffer for `name`, opening and registering one if
    /// none exists. An existing buffer is returned untouched even when
    /// `truncate` is requested.
    pub fn writable(
        &self,
        client: &Arc<dyn StorageClient>,
        name: &str,
        truncate: bool,
    ) -> Result<SharedFile, GateError> {
        let mut files = lock(&self.files);
        if let Some(file) = files.get(name) {
            debug!("write cache hit for {}", name);
            return Ok(Arc::clone(file));
        }
        let file = Arc::new(Mutex::new(FileBuffer::writable(
            Arc::clone(client),
            name,
            truncate,
        )?));
        files.insert(name.to_owned(), Arc::clone(&file));
        Ok(file)
    }

    /// Close `file`, unregistering it only if it is the instance registered
    /// for its path. The buffer's own close result is always returned.
    pub fn close(&self, file: &SharedFile) -> Result<(), GateError> {
        let name = lock(file).name().to_owned();
        {
            let mut files = lock(&self.files);
            if files
                .get(&name)
                .is_some_and(|registered| Arc::ptr_eq(registered, file))
            {
                files.remove(&name);
            } else {
                debug!("closing unregistered buffer for {}", name);
            }
        }
        lock(file).close()
    }

    /// True when a live buffer is registered for `name`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        lock(&self.files).contains_key(name)
    }

    /// Number of registered buffers.
    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.files).len()
    }

    /// True when no buffers are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
