// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Drive a GateServer through the wire codec without a socket.
// Author: Lukas Bower

//! In-process client connection.

use std::fmt;
use std::sync::Arc;

use gate9p_codec::{
    Codec, FileMode, OpenMode, Qid, Request, RequestBody, ResponseBody, Stat, MAX_MSIZE, NOFID,
    VERSION,
};

use crate::server::GateServer;
use crate::session::Session;
use crate::GateError;

/// Client-side handle that exchanges encoded frames with a [`GateServer`].
///
/// Dropping the connection tears its session down like a socket disconnect.
pub struct InProcessConnection {
    server: Arc<GateServer>,
    session: Arc<Session>,
    codec: Codec,
    next_tag: u16,
    negotiated_msize: u32,
}

impl fmt::Debug for InProcessConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InProcessConnection")
            .field("session", &self.session.id())
            .field("next_tag", &self.next_tag)
            .field("negotiated_msize", &self.negotiated_msize)
            .finish()
    }
}

impl InProcessConnection {
    /// Open a new session on `server`.
    pub fn new(server: Arc<GateServer>) -> Self {
        let session = server.open_session();
        Self {
            server,
            session,
            codec: Codec,
            next_tag: 1,
            negotiated_msize: MAX_MSIZE,
        }
    }

    fn next_tag(&mut self) -> u16 {
        let tag = self.next_tag;
        self.next_tag = self.next_tag.wrapping_add(1);
        tag
    }

    fn transact(&mut self, body: RequestBody) -> Result<ResponseBody, GateError> {
        let tag = self.next_tag();
        let request = Request { tag, body };
        let encoded = self.codec.encode_request(&request)?;
        let response_bytes = self.exchange(&encoded)?;
        let response = self.codec.decode_response(&response_bytes)?;
        debug_assert_eq!(response.tag, tag);
        match response.body {
            ResponseBody::Error { ename } => Err(GateError::Remote(ename)),
            other => Ok(other),
        }
    }

    /// Exchange one raw frame with the server.
    pub fn exchange(&mut self, frame: &[u8]) -> Result<Vec<u8>, GateError> {
        self.server.handle_frame(&self.session, frame)
    }

    /// Negotiate the protocol version and message size.
    pub fn version(&mut self, requested_msize: u32) -> Result<u32, GateError> {
        let response = self.transact(RequestBody::Version {
            msize: requested_msize,
            version: VERSION.to_owned(),
        })?;
        let ResponseBody::Version { msize, version } = response else {
            return Err(unexpected("Rversion"));
        };
        if version != VERSION {
            return Err(GateError::Remote(format!("unexpected version {version}")));
        }
        self.negotiated_msize = msize;
        Ok(msize)
    }

    /// Attach `fid` to the root as `uname`.
    pub fn attach(&mut self, fid: u32, uname: &str) -> Result<Qid, GateError> {
        let response = self.transact(RequestBody::Attach {
            fid,
            afid: NOFID,
            uname: uname.to_owned(),
            aname: String::new(),
        })?;
        let ResponseBody::Attach { qid } = response else {
            return Err(unexpected("Rattach"));
        };
        Ok(qid)
    }

    /// Walk from `fid` to `newfid` through `path`.
    pub fn walk(&mut self, fid: u32, newfid: u32, path: &[&str]) -> Result<Vec<Qid>, GateError> {
        let response = self.transact(RequestBody::Walk {
            fid,
            newfid,
            wnames: path.iter().map(|name| (*name).to_owned()).collect(),
        })?;
        let ResponseBody::Walk { qids } = response else {
            return Err(unexpected("Rwalk"));
        };
        Ok(qids)
    }

    /// Open `fid`, returning its qid and iounit.
    pub fn open(&mut self, fid: u32, mode: OpenMode) -> Result<(Qid, u32), GateError> {
        let response = self.transact(RequestBody::Open { fid, mode })?;
        let ResponseBody::Open { qid, iounit } = response else {
            return Err(unexpected("Ropen"));
        };
        Ok((qid, iounit))
    }

    /// Create `name` inside the directory `fid`; `fid` then names the new file.
    pub fn create(
        &mut self,
        fid: u32,
        name: &str,
        perm: FileMode,
        mode: OpenMode,
    ) -> Result<(Qid, u32), GateError> {
        let response = self.transact(RequestBody::Create {
            fid,
            name: name.to_owned(),
            perm,
            mode,
        })?;
        let ResponseBody::Create { qid, iounit } = response else {
            return Err(unexpected("Rcreate"));
        };
        Ok((qid, iounit))
    }

    /// Read up to `count` bytes at `offset`.
    pub fn read(&mut self, fid: u32, offset: u64, count: u32) -> Result<Vec<u8>, GateError> {
        let response = self.transact(RequestBody::Read { fid, offset, count })?;
        let ResponseBody::Read { data } = response else {
            return Err(unexpected("Rread"));
        };
        Ok(data)
    }

    /// Write `data` at `offset`.
    pub fn write(&mut self, fid: u32, offset: u64, data: &[u8]) -> Result<u32, GateError> {
        let response = self.transact(RequestBody::Write {
            fid,
            offset,
            data: data.to_vec(),
        })?;
        let ResponseBody::Write { count } = response else {
            return Err(unexpected("Rwrite"));
        };
        Ok(count)
    }

    /// Release `fid`.
    pub fn clunk(&mut self, fid: u32) -> Result<(), GateError> {
        match self.transact(RequestBody::Clunk { fid })? {
            ResponseBody::Clunk => Ok(()),
            _ => Err(unexpected("Rclunk")),
        }
    }

    /// Remove the file named by `fid` and release the fid.
    pub fn remove(&mut self, fid: u32) -> Result<(), GateError> {
        match self.transact(RequestBody::Remove { fid })? {
            ResponseBody::Remove => Ok(()),
            _ => Err(unexpected("Rremove")),
        }
    }

    /// Fetch metadata for `fid`.
    pub fn stat(&mut self, fid: u32) -> Result<Stat, GateError> {
        let response = self.transact(RequestBody::Stat { fid })?;
        let ResponseBody::Stat { stat } = response else {
            return Err(unexpected("Rstat"));
        };
        Ok(stat)
    }

    /// Apply `stat` to `fid`.
    pub fn wstat(&mut self, fid: u32, stat: Stat) -> Result<(), GateError> {
        match self.transact(RequestBody::Wstat { fid, stat })? {
            ResponseBody::Wstat => Ok(()),
            _ => Err(unexpected("Rwstat")),
        }
    }

    /// Rename the file named by `fid`.
    pub fn rename(&mut self, fid: u32, name: &str) -> Result<(), GateError> {
        self.wstat(
            fid,
            Stat {
                name: name.to_owned(),
                ..Stat::dont_touch()
            },
        )
    }

    /// Abort the request tagged `oldtag`.
    pub fn flush(&mut self, oldtag: u16) -> Result<(), GateError> {
        match self.transact(RequestBody::Flush { oldtag })? {
            ResponseBody::Flush => Ok(()),
            _ => Err(unexpected("Rflush")),
        }
    }

    /// Negotiated message size.
    #[must_use]
    pub fn negotiated_msize(&self) -> u32 {
        self.negotiated_msize
    }

    /// Session backing this connection.
    #[must_use]
    pub fn session(&self) -> &Session {
        &self.session
    }
}

impl Drop for InProcessConnection {
    fn drop(&mut self) {
        self.server.close_session(&self.session);
    }
}

fn unexpected(expected: &str) -> GateError {
    GateError::Remote(format!("expected {expected} reply"))
}
