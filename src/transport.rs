// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Accept 9P clients over TCP or unix sockets and feed a worker pool.
// Author: Lukas Bower

//! Socket transport.
//!
//! One reader thread per connection splits the byte stream into frames and
//! queues them for a shared pool of handler threads. Replies are written
//! under a per-connection lock, so they may leave out of order; 9P matches
//! them by tag.

use std::io::{self, BufReader, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
#[cfg(unix)]
use std::os::unix::net::{UnixListener, UnixStream};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crossbeam::channel::{unbounded, Receiver, Sender};
use crossbeam::sync::WaitGroup;
use gate9p_codec::CodecError;
use log::{debug, error, info, warn};

use crate::config::{Net, ServerConfig};
use crate::server::GateServer;
use crate::session::Session;
use crate::{lock, GateError};

/// Smallest frame the codec can decode: size, type and tag.
const MIN_FRAME: u32 = 7;

/// Read one size-prefixed frame. Returns `None` on a clean end of stream.
pub fn read_frame<R: Read>(reader: &mut R, max: u32) -> Result<Option<Vec<u8>>, GateError> {
    let mut size = [0u8; 4];
    match reader.read_exact(&mut size) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err.into()),
    }
    let declared = u32::from_le_bytes(size);
    if declared > max {
        return Err(CodecError::FrameTooLarge { declared, max }.into());
    }
    if declared < MIN_FRAME {
        return Err(CodecError::Truncated.into());
    }
    let mut frame = vec![0u8; declared as usize];
    frame[..4].copy_from_slice(&size);
    reader.read_exact(&mut frame[4..])?;
    Ok(Some(frame))
}

enum Listener {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(UnixListener),
}

enum Stream {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
}

impl Stream {
    fn try_clone(&self) -> io::Result<Self> {
        match self {
            Stream::Tcp(stream) => stream.try_clone().map(Stream::Tcp),
            #[cfg(unix)]
            Stream::Unix(stream) => stream.try_clone().map(Stream::Unix),
        }
    }

    fn shutdown(&self) {
        let result = match self {
            Stream::Tcp(stream) => stream.shutdown(Shutdown::Both),
            #[cfg(unix)]
            Stream::Unix(stream) => stream.shutdown(Shutdown::Both),
        };
        if let Err(err) = result {
            debug!("shutdown: {}", err);
        }
    }
}

impl Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Stream::Tcp(stream) => stream.read(buf),
            #[cfg(unix)]
            Stream::Unix(stream) => stream.read(buf),
        }
    }
}

impl Write for Stream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Stream::Tcp(stream) => stream.write(buf),
            #[cfg(unix)]
            Stream::Unix(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Stream::Tcp(stream) => stream.flush(),
            #[cfg(unix)]
            Stream::Unix(stream) => stream.flush(),
        }
    }
}

struct Connection {
    peer: String,
    writer: Mutex<Stream>,
}

impl Connection {
    fn send(&self, frame: &[u8]) -> io::Result<()> {
        let mut writer = lock(&self.writer);
        writer.write_all(frame)?;
        writer.flush()
    }

    fn close(&self) {
        lock(&self.writer).shutdown();
    }
}

struct Job {
    session: Arc<Session>,
    frame: Vec<u8>,
    conn: Arc<Connection>,
    _inflight: WaitGroup,
}

/// Bound listener plus the worker pool settings used once serving starts.
pub struct GateListener {
    server: Arc<GateServer>,
    listener: Listener,
    workers: usize,
}

impl std::fmt::Debug for GateListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GateListener")
            .field("local_addr", &self.local_addr())
            .field("workers", &self.workers)
            .finish_non_exhaustive()
    }
}

impl GateListener {
    /// Bind `addr` on `net`.
    pub fn bind(
        server: Arc<GateServer>,
        net: Net,
        addr: &str,
        workers: usize,
    ) -> Result<Self, GateError> {
        let listener = match net {
            Net::Tcp => Listener::Tcp(TcpListener::bind(addr)?),
            #[cfg(unix)]
            Net::Unix => Listener::Unix(UnixListener::bind(addr)?),
            #[cfg(not(unix))]
            Net::Unix => {
                return Err(GateError::Unsupported(
                    "unix sockets are not available on this platform".to_owned(),
                ))
            }
        };
        info!("listening on {} {}", net, addr);
        Ok(Self {
            server,
            listener,
            workers: workers.max(1),
        })
    }

    /// Bind using a `[server]` configuration section.
    pub fn from_config(server: Arc<GateServer>, config: &ServerConfig) -> Result<Self, GateError> {
        Self::bind(server, config.net, &config.listen, config.workers)
    }

    /// Bound TCP address; `None` for unix sockets.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match &self.listener {
            Listener::Tcp(listener) => listener.local_addr().ok(),
            #[cfg(unix)]
            Listener::Unix(_) => None,
        }
    }

    /// Accept connections until the listener fails.
    pub fn serve(self) -> Result<(), GateError> {
        let (jobs, queue) = unbounded::<Job>();
        for index in 0..self.workers {
            let server = Arc::clone(&self.server);
            let queue = queue.clone();
            thread::Builder::new()
                .name(format!("ninegate-worker-{index}"))
                .spawn(move || run_worker(&server, &queue))?;
        }
        drop(queue);
        loop {
            let (stream, peer) = match self.accept() {
                Ok(accepted) => accepted,
                Err(err) => {
                    warn!("accept failed: {}", err);
                    continue;
                }
            };
            info!("accepted connection from {}", peer);
            let server = Arc::clone(&self.server);
            let jobs = jobs.clone();
            thread::Builder::new()
                .name(format!("ninegate-conn-{peer}"))
                .spawn(move || serve_connection(&server, stream, peer, &jobs))?;
        }
    }

    /// Serve on a background thread.
    pub fn spawn(self) -> io::Result<JoinHandle<Result<(), GateError>>> {
        thread::Builder::new()
            .name("ninegate-listener".to_owned())
            .spawn(move || self.serve())
    }

    fn accept(&self) -> io::Result<(Stream, String)> {
        match &self.listener {
            Listener::Tcp(listener) => {
                let (stream, addr) = listener.accept()?;
                Ok((Stream::Tcp(stream), addr.to_string()))
            }
            #[cfg(unix)]
            Listener::Unix(listener) => {
                let (stream, _) = listener.accept()?;
                Ok((Stream::Unix(stream), "unix".to_owned()))
            }
        }
    }
}

fn run_worker(server: &GateServer, queue: &Receiver<Job>) {
    for job in queue.iter() {
        match server.handle_frame(&job.session, &job.frame) {
            Ok(reply) => {
                if let Err(err) = job.conn.send(&reply) {
                    warn!("{}: write failed: {}", job.conn.peer, err);
                    job.conn.close();
                }
            }
            Err(err) => {
                error!(
                    "{}: session {} dropped: {}",
                    job.conn.peer,
                    job.session.id(),
                    err
                );
                job.conn.close();
            }
        }
    }
}

fn serve_connection(server: &GateServer, stream: Stream, peer: String, jobs: &Sender<Job>) {
    let writer = match stream.try_clone() {
        Ok(writer) => writer,
        Err(err) => {
            error!("{}: cannot clone stream: {}", peer, err);
            return;
        }
    };
    let conn = Arc::new(Connection {
        peer,
        writer: Mutex::new(writer),
    });
    let session = server.open_session();
    let inflight = WaitGroup::new();
    let mut reader = BufReader::new(stream);
    loop {
        match read_frame(&mut reader, server.max_msize()) {
            Ok(Some(frame)) => {
                let job = Job {
                    session: Arc::clone(&session),
                    frame,
                    conn: Arc::clone(&conn),
                    _inflight: inflight.clone(),
                };
                if jobs.send(job).is_err() {
                    error!("{}: worker pool is gone", conn.peer);
                    break;
                }
            }
            Ok(None) => break,
            Err(err) => {
                warn!("{}: {}", conn.peer, err);
                break;
            }
        }
    }
    inflight.wait();
    server.close_session(&session);
    conn.close();
    info!("{}: disconnected", conn.peer);
}
