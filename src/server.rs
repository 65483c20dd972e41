// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Implement 9P2000 request handling on top of a storage client.
// Author: Lukas Bower

//! Protocol server.
//!
//! The server is shared by every connection. Per-connection state lives in a
//! [`Session`]; each request locks only the fid it operates on, so requests
//! on distinct fids run concurrently.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use gate9p_codec::{
    validate_component, Codec, FileMode, OpenMode, Request, RequestBody, Response, ResponseBody,
    Stat, IOHDRSZ, MAX_MSIZE, MAX_WELEM, MIN_MSIZE, NOFID, VERSION, VERSION_UNKNOWN,
};
use log::{debug, info, trace, warn};

use crate::cache::{SharedFile, WriteCache};
use crate::config::GateConfig;
use crate::file::FileBuffer;
use crate::listing::{entry_stat, root_stat, DirListing};
use crate::qid::{qid_for, root_qid};
use crate::session::{FidSlot, FidState, Session};
use crate::storage::{join_path, parent_path, Entry, StorageClient};
use crate::{lock, GateError};

/// Owner reported for the synthetic root when none is configured.
pub const DEFAULT_OWNER: &str = "nine-gate";

const AUTH_NOT_REQUIRED: &str = "authentication not required";

/// Gateway state shared between connections.
pub struct GateServer {
    client: Arc<dyn StorageClient>,
    cache: WriteCache,
    accounts: Mutex<BTreeSet<String>>,
    owner: String,
    max_msize: u32,
    next_session: AtomicU64,
    codec: Codec,
}

impl std::fmt::Debug for GateServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GateServer")
            .field("owner", &self.owner)
            .field("max_msize", &self.max_msize)
            .finish_non_exhaustive()
    }
}

impl GateServer {
    /// Serve `client` with default settings.
    pub fn new(client: Arc<dyn StorageClient>) -> Self {
        Self {
            client,
            cache: WriteCache::new(),
            accounts: Mutex::new(BTreeSet::new()),
            owner: DEFAULT_OWNER.to_owned(),
            max_msize: MAX_MSIZE,
            next_session: AtomicU64::new(1),
            codec: Codec,
        }
    }

    /// Serve `client` using the server and storage sections of `config`.
    pub fn from_config(client: Arc<dyn StorageClient>, config: &GateConfig) -> Self {
        let server = Self::new(client)
            .with_owner(&config.server.owner)
            .with_max_msize(config.server.msize);
        server.remember_account(&config.storage.user);
        server
    }

    /// Set the owner reported for the root.
    #[must_use]
    pub fn with_owner(mut self, owner: &str) -> Self {
        self.owner = owner.to_owned();
        self
    }

    /// Set the largest message size offered during version negotiation.
    #[must_use]
    pub fn with_max_msize(mut self, msize: u32) -> Self {
        self.max_msize = msize.max(MIN_MSIZE);
        self
    }

    /// Largest message size this server will negotiate.
    #[must_use]
    pub fn max_msize(&self) -> u32 {
        self.max_msize
    }

    /// Add `name` to the accounts listed at the root.
    pub fn remember_account(&self, name: &str) {
        if name.is_empty() || name.contains('/') {
            return;
        }
        if lock(&self.accounts).insert(name.to_owned()) {
            debug!("remembering account {}", name);
        }
    }

    /// Drop `name` from the accounts listed at the root.
    pub fn forget_account(&self, name: &str) {
        if lock(&self.accounts).remove(name) {
            debug!("forgetting account {}", name);
        }
    }

    /// Accounts currently listed at the root.
    #[must_use]
    pub fn known_accounts(&self) -> Vec<String> {
        lock(&self.accounts).iter().cloned().collect()
    }

    /// Registry of live write buffers.
    #[must_use]
    pub fn write_cache(&self) -> &WriteCache {
        &self.cache
    }

    /// Start a new connection.
    pub fn open_session(&self) -> Arc<Session> {
        let id = self.next_session.fetch_add(1, Ordering::Relaxed);
        info!("session {}: opened", id);
        Arc::new(Session::new(id))
    }

    /// Release every fid of a finished connection.
    pub fn close_session(&self, session: &Session) {
        let released = self.release_all(session);
        info!("session {}: closed ({} fids released)", session.id(), released);
    }

    /// Decode one frame, handle it and encode the reply. Protocol failures
    /// become `Rerror` replies; fatal errors are returned to the caller.
    pub fn handle_frame(&self, session: &Session, frame: &[u8]) -> Result<Vec<u8>, GateError> {
        let request = self.codec.decode_request(frame).map_err(|err| {
            debug!("session {}: decode error: {}", session.id(), err);
            err
        })?;
        let response = self.handle(session, &request)?;
        Ok(self.codec.encode_response(&response)?)
    }

    /// Handle a decoded request.
    pub fn handle(&self, session: &Session, request: &Request) -> Result<Response, GateError> {
        let body = match self.dispatch(session, &request.body) {
            Ok(body) => body,
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => {
                warn!(
                    "session {}: tag {} failed: {}",
                    session.id(),
                    request.tag,
                    err
                );
                ResponseBody::Error {
                    ename: err.to_string(),
                }
            }
        };
        Ok(Response {
            tag: request.tag,
            body,
        })
    }

    /// Route a request body to its handler.
    pub fn dispatch(
        &self,
        session: &Session,
        body: &RequestBody,
    ) -> Result<ResponseBody, GateError> {
        trace!("session {}: {:?}", session.id(), body);
        match body {
            RequestBody::Version { msize, version } => self.version(session, *msize, version),
            RequestBody::Auth { .. } => Err(GateError::Unsupported(AUTH_NOT_REQUIRED.to_owned())),
            RequestBody::Attach {
                fid, afid, uname, ..
            } => self.attach(session, *fid, *afid, uname),
            RequestBody::Flush { oldtag } => {
                debug!("session {}: flush tag {}", session.id(), oldtag);
                Ok(ResponseBody::Flush)
            }
            RequestBody::Walk {
                fid,
                newfid,
                wnames,
            } => self.walk(session, *fid, *newfid, wnames),
            RequestBody::Open { fid, mode } => self.open(session, *fid, *mode),
            RequestBody::Create {
                fid,
                name,
                perm,
                mode,
            } => self.create(session, *fid, name, *perm, *mode),
            RequestBody::Read { fid, offset, count } => self.read(session, *fid, *offset, *count),
            RequestBody::Write { fid, offset, data } => self.write(session, *fid, *offset, data),
            RequestBody::Clunk { fid } => self.clunk(session, *fid),
            RequestBody::Remove { fid } => self.remove(session, *fid),
            RequestBody::Stat { fid } => self.stat(session, *fid),
            RequestBody::Wstat { fid, stat } => self.wstat(session, *fid, stat),
        }
    }

    fn version(
        &self,
        session: &Session,
        msize: u32,
        version: &str,
    ) -> Result<ResponseBody, GateError> {
        let released = self.release_all(session);
        if released > 0 {
            debug!(
                "session {}: version reset released {} fids",
                session.id(),
                released
            );
        }
        // Dialects such as 9P2000.u are answered with the base protocol.
        let base = version.split('.').next().unwrap_or_default();
        if base != VERSION {
            info!(
                "session {}: unsupported version {:?}",
                session.id(),
                version
            );
            return Ok(ResponseBody::Version {
                msize,
                version: VERSION_UNKNOWN.to_owned(),
            });
        }
        if msize < MIN_MSIZE {
            return Err(GateError::InvalidArgument(format!(
                "msize {msize} below minimum {MIN_MSIZE}"
            )));
        }
        let negotiated = msize.min(self.max_msize);
        session.set_msize(negotiated);
        info!(
            "session {}: negotiated {} msize={}",
            session.id(),
            VERSION,
            negotiated
        );
        Ok(ResponseBody::Version {
            msize: negotiated,
            version: VERSION.to_owned(),
        })
    }

    fn attach(
        &self,
        session: &Session,
        fid: u32,
        afid: u32,
        uname: &str,
    ) -> Result<ResponseBody, GateError> {
        if afid != NOFID {
            return Err(GateError::Unsupported(AUTH_NOT_REQUIRED.to_owned()));
        }
        session.fids().insert(fid, FidState::root())?;
        info!(
            "session {}: attach fid={} uname={}",
            session.id(),
            fid,
            uname
        );
        Ok(ResponseBody::Attach { qid: root_qid() })
    }

    fn walk(
        &self,
        session: &Session,
        fid: u32,
        newfid: u32,
        wnames: &[String],
    ) -> Result<ResponseBody, GateError> {
        if wnames.len() > MAX_WELEM {
            return Err(GateError::InvalidArgument(format!(
                "walk of {} elements exceeds {MAX_WELEM}",
                wnames.len()
            )));
        }
        if let Some(bad) = wnames.iter().find(|name| validate_component(name).is_err()) {
            return Err(GateError::InvalidArgument(format!(
                "invalid path element {bad:?}"
            )));
        }
        let source = session.fids().get(fid)?;
        if newfid != fid && session.fids().contains(newfid) {
            return Err(GateError::FidInUse(newfid));
        }
        let mut walked = {
            let state = lock(&source);
            if state.is_open() {
                return Err(GateError::InvalidArgument(format!(
                    "fid {fid} is open and cannot be walked"
                )));
            }
            state.walk_clone()
        };
        let mut qids = Vec::with_capacity(wnames.len());
        for (step, name) in wnames.iter().enumerate() {
            let from_root = walked.is_root();
            let next = if name == ".." {
                parent_path(&walked.path).to_owned()
            } else {
                join_path(&walked.path, name)
            };
            let entry = if next.is_empty() {
                None
            } else {
                match self.client.lookup(&next, false) {
                    Ok(entry) => Some(entry),
                    Err(err) if step == 0 => {
                        debug!("session {}: walk to {} failed: {}", session.id(), next, err);
                        return Err(GateError::NotFound(next));
                    }
                    Err(err) => {
                        debug!(
                            "session {}: partial walk stopped at {}: {}",
                            session.id(),
                            next,
                            err
                        );
                        break;
                    }
                }
            };
            if from_root && name != ".." {
                self.remember_account(name);
            }
            qids.push(entry.as_ref().map_or_else(root_qid, qid_for));
            walked.path = next;
            walked.entry = entry;
        }
        if newfid == fid {
            let mut state = lock(&source);
            state.path = walked.path;
            state.entry = walked.entry;
        } else {
            session.fids().insert(newfid, walked)?;
        }
        debug!(
            "session {}: walk fid={} newfid={} resolved {}/{}",
            session.id(),
            fid,
            newfid,
            qids.len(),
            wnames.len()
        );
        Ok(ResponseBody::Walk { qids })
    }

    fn open(&self, session: &Session, fid: u32, mode: OpenMode) -> Result<ResponseBody, GateError> {
        let slot = session.fids().get(fid)?;
        let mut state = lock(&slot);
        if state.is_open() {
            return Err(GateError::InvalidArgument(format!("fid {fid} already open")));
        }
        if state.is_root() {
            if mode.allows_write() {
                return Err(GateError::InvalidArgument(
                    "cannot open a directory for writing".to_owned(),
                ));
            }
            state.listing = Some(self.root_listing()?);
            state.mode = Some(mode);
            return Ok(ResponseBody::Open {
                qid: root_qid(),
                iounit: iounit(session),
            });
        }
        let entry = self.client.lookup(&state.path, false)?;
        if entry.is_dir {
            if mode.allows_write() {
                return Err(GateError::InvalidArgument(
                    "cannot open a directory for writing".to_owned(),
                ));
            }
            let children = self.client.glob(&children_pattern(&entry.name))?;
            state.listing = Some(DirListing::from_entries(children.iter())?);
        } else if mode.allows_write() {
            state.file = Some(
                self.cache
                    .writable(&self.client, &state.path, mode.is_truncate())?,
            );
        } else {
            let file = FileBuffer::readable(self.client.as_ref(), &state.path)?;
            state.file = Some(Arc::new(Mutex::new(file)));
        }
        let qid = qid_for(&entry);
        state.entry = Some(entry);
        state.mode = Some(mode);
        debug!(
            "session {}: open fid={} path={} mode={:?}",
            session.id(),
            fid,
            state.path,
            mode
        );
        Ok(ResponseBody::Open {
            qid,
            iounit: iounit(session),
        })
    }

    fn create(
        &self,
        session: &Session,
        fid: u32,
        name: &str,
        perm: FileMode,
        mode: OpenMode,
    ) -> Result<ResponseBody, GateError> {
        if validate_component(name).is_err() || name == "." || name == ".." {
            return Err(GateError::InvalidArgument(format!(
                "invalid file name {name:?}"
            )));
        }
        let slot = session.fids().get(fid)?;
        let mut state = lock(&slot);
        if state.is_open() {
            return Err(GateError::InvalidArgument(format!("fid {fid} already open")));
        }
        if !state.is_dir() {
            return Err(GateError::InvalidArgument(format!(
                "{}: not a directory",
                state.path
            )));
        }
        let path = join_path(&state.path, name);
        if self.client.lookup(&path, false).is_ok() {
            return Err(GateError::AlreadyExists(path));
        }
        let entry = if perm.is_directory() {
            let entry = self.client.make_directory(&path)?;
            if state.is_root() {
                self.remember_account(name);
            }
            state.listing = Some(DirListing::default());
            entry
        } else if perm.intersects(special_file_bits()) {
            return Err(GateError::Unsupported(format!(
                "not implemented: special file {name}"
            )));
        } else {
            // An empty object goes in first so a concurrent walk never sees a
            // name without content behind it.
            let entry = self.client.put(&path, &[])?;
            state.file = Some(self.cache.writable(&self.client, &path, true)?);
            entry
        };
        let qid = qid_for(&entry);
        info!("session {}: created {}", session.id(), path);
        state.path = path;
        state.entry = Some(entry);
        state.mode = Some(mode);
        Ok(ResponseBody::Create {
            qid,
            iounit: iounit(session),
        })
    }

    fn read(
        &self,
        session: &Session,
        fid: u32,
        offset: u64,
        count: u32,
    ) -> Result<ResponseBody, GateError> {
        let count = count.min(iounit(session));
        let slot = session.fids().get(fid)?;
        let state = lock(&slot);
        let mode = opened_mode(&state, fid)?;
        if !mode.allows_read() {
            return Err(GateError::InvalidArgument(format!(
                "fid {fid} not open for reading"
            )));
        }
        let data = if let Some(listing) = &state.listing {
            listing.read(offset, count)?.to_vec()
        } else if let Some(file) = &state.file {
            lock(file).read_at(offset, count as usize)?
        } else {
            return Err(GateError::InvalidArgument(format!("fid {fid} has no content")));
        };
        Ok(ResponseBody::Read { data })
    }

    fn write(
        &self,
        session: &Session,
        fid: u32,
        offset: u64,
        data: &[u8],
    ) -> Result<ResponseBody, GateError> {
        let slot = session.fids().get(fid)?;
        let state = lock(&slot);
        let mode = opened_mode(&state, fid)?;
        let Some(file) = state.file.as_ref().filter(|_| mode.allows_write()) else {
            return Err(GateError::InvalidArgument(format!(
                "fid {fid} not open for writing"
            )));
        };
        let written = lock(file).write_at(data, offset)?;
        let count = u32::try_from(written)
            .map_err(|_| GateError::InvalidArgument("write too large".to_owned()))?;
        Ok(ResponseBody::Write { count })
    }

    fn clunk(&self, session: &Session, fid: u32) -> Result<ResponseBody, GateError> {
        let slot = session
            .fids()
            .remove(fid)
            .ok_or(GateError::UnknownFid(fid))?;
        self.release(session, fid, &slot);
        Ok(ResponseBody::Clunk)
    }

    fn remove(&self, session: &Session, fid: u32) -> Result<ResponseBody, GateError> {
        let slot = session
            .fids()
            .remove(fid)
            .ok_or(GateError::UnknownFid(fid))?;
        self.release(session, fid, &slot);
        let path = lock(&slot).path.clone();
        if path.is_empty() {
            return Err(GateError::InvalidArgument(
                "cannot remove the root".to_owned(),
            ));
        }
        self.client.delete(&path)?;
        if parent_path(&path).is_empty() {
            self.forget_account(&path);
        }
        info!("session {}: removed {}", session.id(), path);
        Ok(ResponseBody::Remove)
    }

    fn stat(&self, session: &Session, fid: u32) -> Result<ResponseBody, GateError> {
        let slot = session.fids().get(fid)?;
        let state = lock(&slot);
        let stat = match &state.entry {
            Some(entry) => entry_stat(entry),
            None => root_stat(&self.owner),
        };
        Ok(ResponseBody::Stat { stat })
    }

    fn wstat(&self, session: &Session, fid: u32, stat: &Stat) -> Result<ResponseBody, GateError> {
        if stat.name.is_empty() || stat.changes_besides_name() {
            return Err(GateError::Unsupported(
                "not implemented: only renames are supported".to_owned(),
            ));
        }
        let slot = session.fids().get(fid)?;
        let mut state = lock(&slot);
        if state.is_root() {
            return Err(GateError::InvalidArgument(
                "cannot rename the root".to_owned(),
            ));
        }
        let dest = if stat.name.contains('/') {
            stat.name.clone()
        } else {
            join_path(parent_path(&state.path), &stat.name)
        };
        if self.client.lookup(&dest, false).is_ok() {
            return Err(GateError::AlreadyExists(dest));
        }
        let entry = self.client.rename(&state.path, &dest)?;
        if parent_path(&state.path).is_empty() {
            self.forget_account(&state.path);
        }
        if parent_path(&dest).is_empty() {
            self.remember_account(&dest);
        }
        info!("session {}: renamed {} to {}", session.id(), state.path, dest);
        state.path = dest;
        state.entry = Some(entry);
        Ok(ResponseBody::Wstat)
    }

    fn root_listing(&self) -> Result<DirListing, GateError> {
        let entries: Vec<Entry> = self
            .known_accounts()
            .iter()
            .filter_map(|name| match self.client.lookup(name, false) {
                Ok(entry) => Some(entry),
                Err(err) => {
                    warn!("root listing skips account {}: {}", name, err);
                    None
                }
            })
            .collect();
        DirListing::from_entries(entries.iter())
    }

    fn release(&self, session: &Session, fid: u32, slot: &FidSlot) {
        let file: Option<SharedFile> = lock(slot).file.take();
        if let Some(file) = file {
            if let Err(err) = self.cache.close(&file) {
                warn!(
                    "session {}: closing fid {} buffer: {}",
                    session.id(),
                    fid,
                    err
                );
            }
        }
        debug!("session {}: released fid {}", session.id(), fid);
    }

    fn release_all(&self, session: &Session) -> usize {
        let drained = session.fids().drain();
        let count = drained.len();
        for (fid, slot) in drained {
            self.release(session, fid, &slot);
        }
        count
    }
}

fn iounit(session: &Session) -> u32 {
    session.msize().saturating_sub(IOHDRSZ)
}

fn opened_mode(state: &FidState, fid: u32) -> Result<OpenMode, GateError> {
    state
        .mode
        .ok_or_else(|| GateError::InvalidArgument(format!("fid {fid} not open")))
}

fn special_file_bits() -> FileMode {
    FileMode::SYMLINK | FileMode::LINK | FileMode::NAMED_PIPE | FileMode::DEVICE
}

fn children_pattern(dir: &str) -> String {
    format!("{}/*", glob::Pattern::escape(dir))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{BlockReader, MemoryStore, StorageError};

    const ANN: &str = "ann@example.com";

    fn server() -> GateServer {
        let store = MemoryStore::with_block_size(ANN, 8);
        store.make_directory("ann@example.com/docs").expect("mkdir");
        store
            .put("ann@example.com/docs/readme", b"hello")
            .expect("seed");
        let server = GateServer::new(Arc::new(store));
        server.remember_account(ANN);
        server
    }

    fn attached(server: &GateServer) -> Arc<Session> {
        let session = server.open_session();
        server
            .dispatch(
                &session,
                &RequestBody::Attach {
                    fid: 0,
                    afid: NOFID,
                    uname: ANN.to_owned(),
                    aname: String::new(),
                },
            )
            .expect("attach");
        session
    }

    fn walk(
        server: &GateServer,
        session: &Session,
        newfid: u32,
        names: &[&str],
    ) -> Result<ResponseBody, GateError> {
        server.dispatch(
            session,
            &RequestBody::Walk {
                fid: 0,
                newfid,
                wnames: names.iter().map(|name| (*name).to_owned()).collect(),
            },
        )
    }

    /// Records the `follow_final` flag of every lookup.
    struct LookupRecorder {
        inner: MemoryStore,
        follows: Mutex<Vec<bool>>,
    }

    impl StorageClient for LookupRecorder {
        fn lookup(&self, path: &str, follow_final: bool) -> Result<Entry, StorageError> {
            lock(&self.follows).push(follow_final);
            self.inner.lookup(path, follow_final)
        }

        fn glob(&self, pattern: &str) -> Result<Vec<Entry>, StorageError> {
            self.inner.glob(pattern)
        }

        fn open_read(&self, path: &str) -> Result<Box<dyn BlockReader>, StorageError> {
            self.inner.open_read(path)
        }

        fn put(&self, path: &str, data: &[u8]) -> Result<Entry, StorageError> {
            self.inner.put(path, data)
        }

        fn make_directory(&self, path: &str) -> Result<Entry, StorageError> {
            self.inner.make_directory(path)
        }

        fn delete(&self, path: &str) -> Result<(), StorageError> {
            self.inner.delete(path)
        }

        fn rename(&self, old: &str, new: &str) -> Result<Entry, StorageError> {
            self.inner.rename(old, new)
        }

        fn get(&self, path: &str) -> Result<Vec<u8>, StorageError> {
            self.inner.get(path)
        }
    }

    #[test]
    fn lookups_never_follow_the_final_link() {
        let inner = MemoryStore::new(ANN);
        inner.put("ann@example.com/f", b"data").expect("seed");
        let recorder = Arc::new(LookupRecorder {
            inner,
            follows: Mutex::new(Vec::new()),
        });
        let client: Arc<dyn StorageClient> = recorder.clone();
        let server = GateServer::new(client);
        server.remember_account(ANN);
        let session = attached(&server);

        walk(&server, &session, 1, &[ANN, "f"]).expect("walk file");
        server
            .dispatch(
                &session,
                &RequestBody::Open {
                    fid: 1,
                    mode: OpenMode::read_only(),
                },
            )
            .expect("open");
        walk(&server, &session, 2, &[ANN]).expect("walk dir");
        server
            .dispatch(
                &session,
                &RequestBody::Create {
                    fid: 2,
                    name: "g".to_owned(),
                    perm: FileMode::from_bits(0o600),
                    mode: OpenMode::write_only(),
                },
            )
            .expect("create");
        walk(&server, &session, 3, &[ANN, "f"]).expect("walk file");
        server
            .dispatch(
                &session,
                &RequestBody::Wstat {
                    fid: 3,
                    stat: Stat {
                        name: "h".to_owned(),
                        ..Stat::dont_touch()
                    },
                },
            )
            .expect("rename");
        walk(&server, &session, 4, &[]).expect("clone root");
        server
            .dispatch(
                &session,
                &RequestBody::Open {
                    fid: 4,
                    mode: OpenMode::read_only(),
                },
            )
            .expect("open root");

        let follows = lock(&recorder.follows);
        assert!(follows.len() >= 8);
        assert!(follows.iter().all(|follow| !follow));
    }

    #[test]
    fn attach_with_auth_fid_is_refused() {
        let server = server();
        let session = server.open_session();
        let err = server
            .dispatch(
                &session,
                &RequestBody::Attach {
                    fid: 0,
                    afid: 5,
                    uname: ANN.to_owned(),
                    aname: String::new(),
                },
            )
            .expect_err("auth refused");
        assert_eq!(err.to_string(), AUTH_NOT_REQUIRED);
        assert!(session.fids().is_empty());
    }

    #[test]
    fn version_answers_unknown_for_foreign_dialects() {
        let server = server();
        let session = server.open_session();
        let body = server
            .dispatch(
                &session,
                &RequestBody::Version {
                    msize: 8192,
                    version: "9P1999".to_owned(),
                },
            )
            .expect("version");
        assert_eq!(
            body,
            ResponseBody::Version {
                msize: 8192,
                version: VERSION_UNKNOWN.to_owned()
            }
        );
    }

    #[test]
    fn version_caps_msize_and_resets_fids() {
        let server = server().with_max_msize(4096);
        let session = attached(&server);
        let body = server
            .dispatch(
                &session,
                &RequestBody::Version {
                    msize: 65536,
                    version: "9P2000.u".to_owned(),
                },
            )
            .expect("version");
        assert_eq!(
            body,
            ResponseBody::Version {
                msize: 4096,
                version: VERSION.to_owned()
            }
        );
        assert!(session.fids().is_empty());
        assert_eq!(iounit(&session), 4096 - IOHDRSZ);
    }

    #[test]
    fn first_segment_failure_is_not_found() {
        let server = server();
        let session = attached(&server);
        let err = walk(&server, &session, 1, &["nobody@example.com"]).expect_err("missing");
        assert!(matches!(err, GateError::NotFound(_)));
        assert!(!session.fids().contains(1));
    }

    #[test]
    fn partial_walk_stops_at_last_resolved_segment() {
        let server = server();
        let session = attached(&server);
        let body = walk(&server, &session, 1, &[ANN, "docs", "missing"]).expect("walk");
        let ResponseBody::Walk { qids } = body else {
            panic!("expected Rwalk");
        };
        assert_eq!(qids.len(), 2);
        let slot = session.fids().get(1).expect("newfid bound");
        assert_eq!(lock(&slot).path, "ann@example.com/docs");
    }

    #[test]
    fn walk_to_in_use_fid_is_rejected() {
        let server = server();
        let session = attached(&server);
        walk(&server, &session, 1, &[]).expect("clone");
        let err = walk(&server, &session, 1, &[ANN]).expect_err("in use");
        assert!(matches!(err, GateError::FidInUse(1)));
    }

    #[test]
    fn dot_dot_returns_to_root() {
        let server = server();
        let session = attached(&server);
        let body = walk(&server, &session, 1, &[ANN, ".."]).expect("walk");
        let ResponseBody::Walk { qids } = body else {
            panic!("expected Rwalk");
        };
        assert_eq!(qids[1], root_qid());
        let slot = session.fids().get(1).expect("bound");
        assert!(lock(&slot).is_root());
    }

    #[test]
    fn walking_from_root_remembers_accounts() {
        let store = MemoryStore::new("bob@example.com");
        let server = GateServer::new(Arc::new(store));
        let session = attached(&server);
        assert!(server.known_accounts().is_empty());
        walk(&server, &session, 1, &["bob@example.com"]).expect("walk");
        assert_eq!(server.known_accounts(), vec!["bob@example.com".to_owned()]);
    }

    #[test]
    fn create_rejects_special_files() {
        let server = server();
        let session = attached(&server);
        walk(&server, &session, 1, &[ANN]).expect("walk");
        let err = server
            .dispatch(
                &session,
                &RequestBody::Create {
                    fid: 1,
                    name: "pipe".to_owned(),
                    perm: FileMode::NAMED_PIPE | FileMode::from_bits(0o600),
                    mode: OpenMode::write_only(),
                },
            )
            .expect_err("pipe refused");
        assert!(matches!(err, GateError::Unsupported(_)));
    }

    #[test]
    fn read_on_unopened_fid_is_invalid() {
        let server = server();
        let session = attached(&server);
        let err = server
            .dispatch(
                &session,
                &RequestBody::Read {
                    fid: 0,
                    offset: 0,
                    count: 10,
                },
            )
            .expect_err("not open");
        assert!(matches!(err, GateError::InvalidArgument(_)));
    }

    #[test]
    fn wstat_with_other_fields_is_unsupported() {
        let server = server();
        let session = attached(&server);
        walk(&server, &session, 1, &[ANN, "docs", "readme"]).expect("walk");
        let stat = Stat {
            name: "renamed".to_owned(),
            length: 0,
            ..Stat::dont_touch()
        };
        let err = server
            .dispatch(&session, &RequestBody::Wstat { fid: 1, stat })
            .expect_err("truncate refused");
        assert!(matches!(err, GateError::Unsupported(_)));
    }

    #[test]
    fn errors_become_rerror_replies() {
        let server = server();
        let session = attached(&server);
        let response = server
            .handle(
                &session,
                &Request {
                    tag: 9,
                    body: RequestBody::Clunk { fid: 42 },
                },
            )
            .expect("answered");
        assert_eq!(response.tag, 9);
        assert_eq!(
            response.body,
            ResponseBody::Error {
                ename: "unknown fid 42".to_owned()
            }
        );
    }

    #[test]
    fn malformed_frames_are_fatal() {
        let server = server();
        let session = server.open_session();
        let err = server
            .handle_frame(&session, &[1, 2, 3])
            .expect_err("truncated");
        assert!(err.is_fatal());
    }

    #[test]
    fn close_session_releases_open_buffers() {
        let server = server();
        let session = attached(&server);
        walk(&server, &session, 1, &[ANN, "docs", "readme"]).expect("walk");
        server
            .dispatch(
                &session,
                &RequestBody::Open {
                    fid: 1,
                    mode: OpenMode::write_only(),
                },
            )
            .expect("open");
        assert!(server.write_cache().contains("ann@example.com/docs/readme"));
        server.close_session(&session);
        assert!(server.write_cache().is_empty());
        assert!(session.fids().is_empty());
    }
}
