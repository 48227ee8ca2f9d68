//! Drive a [`ConnMgr`] with real sockets.
//!
//! A [`Relay`] owns the connection manager, and runs a single reactor
//! loop that feeds it events and carries out its effects.  Every
//! socket gets a reader task and a writer task, which talk to the
//! reactor over unbounded channels; every listener gets an accept
//! task.  Nothing but the reactor ever touches the manager.

use crate::ids::ConnId;
use crate::mgr::{ConnMgr, Effect, MgrConfig};
use crate::{Error, Result};

use obfs_proto::ProtocolConfig;

use bytes::Bytes;
use futures::channel::mpsc;
use futures::stream::StreamExt;
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// How much we try to read from a socket at once.
const READ_BUF_LEN: usize = 4096;

/// Once this many bytes are waiting to be written on a connection, stop
/// reading from its peer.
const HIGH_WATER: usize = 1 << 20;
/// Resume reading the peer once the backlog is down to this.
const LOW_WATER: usize = 256 * 1024;

/// How long a finished relay waits for closed connections to write out
/// what they were given.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Delay after the first of a run of failed accepts.
const ACCEPT_RETRY_MIN: Duration = Duration::from_millis(50);
/// Longest delay between failed accepts.
const ACCEPT_RETRY_MAX: Duration = Duration::from_secs(2);

/// Something that happened on a socket, or a request from outside.
#[derive(Debug)]
enum Event {
    /// A listener for `cfg` accepted `stream` from `peer`.
    Accepted {
        /// The listener's configuration.
        cfg: Arc<dyn ProtocolConfig>,
        /// The new socket.
        stream: TcpStream,
        /// Where it came from.
        peer: SocketAddr,
    },
    /// A listener failed.
    AcceptFailed(io::Error),
    /// A dial for `conn` succeeded.
    Connected {
        /// The connection we were dialing.
        conn: ConnId,
        /// The new socket.
        stream: TcpStream,
    },
    /// A dial for `conn` failed.
    ConnectFailed {
        /// The connection we were dialing.
        conn: ConnId,
        /// Why.
        err: io::Error,
    },
    /// Bytes arrived on `conn`.
    Data {
        /// The connection that was read.
        conn: ConnId,
        /// What was read.
        data: Bytes,
    },
    /// `conn` reached EOF.
    Eof {
        /// The connection that was read.
        conn: ConnId,
    },
    /// Reading or writing `conn` failed.
    Failed {
        /// The connection that failed.
        conn: ConnId,
        /// Why.
        err: io::Error,
    },
    /// `n` bytes were written on `conn`.
    Written {
        /// The connection that was written.
        conn: ConnId,
        /// How much was written.
        n: usize,
    },
    /// The writer task for `conn` has exited.
    WriterDone {
        /// The connection whose writer is gone.
        conn: ConnId,
    },
    /// Somebody asked us to shut down.
    Shutdown {
        /// If true, close every connection right away.
        barbaric: bool,
    },
}

/// Count of bytes handed to a writer and not yet written.
#[derive(Debug, Default)]
struct Backlog {
    /// Bytes outstanding.
    queued: usize,
    /// True while this backlog is holding the peer's reader.
    throttling: bool,
}

impl Backlog {
    /// Record `n` more bytes to write.  Return true if the peer should
    /// stop reading now.
    fn add(&mut self, n: usize) -> bool {
        self.queued += n;
        if !self.throttling && self.queued >= HIGH_WATER {
            self.throttling = true;
            true
        } else {
            false
        }
    }

    /// Record that `n` bytes were written.  Return true if the peer may
    /// start reading again.
    fn sub(&mut self, n: usize) -> bool {
        self.queued = self.queued.saturating_sub(n);
        if self.throttling && self.queued <= LOW_WATER {
            self.throttling = false;
            true
        } else {
            false
        }
    }
}

/// The reactor's view of one socket.
#[derive(Default)]
struct ConnHandle {
    /// Task dialing this connection, if it's still dialing.
    connecting: Option<JoinHandle<()>>,
    /// Task reading this connection.
    reader: Option<JoinHandle<()>>,
    /// Tells the reader to hold off (true) or carry on (false).
    pause: Option<watch::Sender<bool>>,
    /// Queue to this connection's writer task.
    writer: Option<mpsc::UnboundedSender<Bytes>>,
    /// The writer task, until it exits.
    writer_task: Option<JoinHandle<()>>,
    /// Writes asked for before we had a socket.
    queued: Vec<Bytes>,
    /// Bytes waiting to be written on this connection.
    backlog: Backlog,
}

impl ConnHandle {
    /// Stop every task working for this connection, except that the
    /// writer finishes whatever it was given.
    ///
    /// Return the writer task, if it's still running.
    fn close(self) -> Option<JoinHandle<()>> {
        if let Some(t) = self.connecting {
            t.abort();
        }
        if let Some(t) = self.reader {
            t.abort();
        }
        // Dropping the sender lets the writer drain and then hang up.
        self.writer_task
    }
}

/// A handle that can ask a running [`Relay`] to shut down.
#[derive(Clone, Debug)]
pub struct ShutdownHandle {
    /// Sender onto the reactor's event queue.
    tx: mpsc::UnboundedSender<Event>,
}

impl ShutdownHandle {
    /// Ask the relay to shut down.
    ///
    /// A graceful shutdown stops accepting and waits for the existing
    /// circuits to end; a barbaric one closes everything at once.
    pub fn shutdown(&self, barbaric: bool) {
        // If the reactor is gone, there's nothing left to shut down.
        let _ = self.tx.unbounded_send(Event::Shutdown { barbaric });
    }
}

/// Runs listeners and connections for a [`ConnMgr`].
pub struct Relay {
    /// The connection manager.
    mgr: ConnMgr,
    /// Sender for our own event queue, cloned into every task.
    tx: mpsc::UnboundedSender<Event>,
    /// Our event queue.
    rx: mpsc::UnboundedReceiver<Event>,
    /// Every socket the manager knows about.
    conns: HashMap<ConnId, ConnHandle>,
    /// Accept tasks for every listener.
    listeners: Vec<JoinHandle<()>>,
    /// Writer tasks for closed connections that are still writing.
    draining: HashMap<ConnId, JoinHandle<()>>,
}

impl Relay {
    /// Make a new relay, with no listeners.
    pub fn new(cfg: MgrConfig) -> Self {
        let (tx, rx) = mpsc::unbounded();
        Relay {
            mgr: ConnMgr::new(cfg),
            tx,
            rx,
            conns: HashMap::new(),
            listeners: Vec::new(),
            draining: HashMap::new(),
        }
    }

    /// Return a handle for shutting this relay down.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: self.tx.clone(),
        }
    }

    /// Bind every listen address of `cfg`, and start accepting on them.
    ///
    /// Return the addresses actually bound.  If any bind fails, none of
    /// this configuration's listeners are kept.
    pub async fn open_listeners(&mut self, cfg: Arc<dyn ProtocolConfig>) -> Result<Vec<SocketAddr>> {
        let name = cfg.protocol().name();
        let mut bound = Vec::new();
        for n in 0.. {
            let addrs = match cfg.listen_addrs(n) {
                Some(a) => a,
                None => break,
            };
            for addr in addrs {
                let listener = TcpListener::bind(addr).await.map_err(|e| Error::Bind {
                    addr: *addr,
                    source: Arc::new(e),
                })?;
                bound.push(listener);
            }
        }
        if bound.is_empty() {
            return Err(Error::NoListenAddrs(name));
        }

        let mut local = Vec::new();
        for listener in bound {
            let addr = listener.local_addr()?;
            info!("Listening on {} for {} ({})", addr, name, cfg.mode());
            local.push(addr);
            let task = tokio::spawn(accept_loop(listener, Arc::clone(&cfg), self.tx.clone()));
            self.listeners.push(task);
        }
        Ok(local)
    }

    /// Run until a requested shutdown completes.
    pub async fn run(mut self) -> Result<()> {
        while let Some(event) = self.rx.next().await {
            self.handle_event(event);
            for effect in self.mgr.drain_effects() {
                if effect == Effect::ShutdownComplete {
                    self.finish_writes().await;
                    info!("Relay shut down");
                    return Ok(());
                }
                self.apply(effect);
            }
        }
        Err(Error::Internal("event queue closed"))
    }

    /// Wait, for a while, for closed connections to finish writing.
    async fn finish_writes(&mut self) {
        let tasks: Vec<JoinHandle<()>> = self.draining.drain().map(|(_, t)| t).collect();
        if tasks.is_empty() {
            return;
        }
        debug!("Waiting for {} connections to finish writing", tasks.len());
        let all = futures::future::join_all(tasks);
        if tokio::time::timeout(DRAIN_TIMEOUT, all).await.is_err() {
            warn!("Gave up waiting for connections to finish writing");
        }
    }

    /// Pause or resume reading on `conn`.
    fn set_paused(&self, conn: ConnId, paused: bool) {
        if let Some(ConnHandle {
            pause: Some(p), ..
        }) = self.conns.get(&conn)
        {
            debug!(
                "{}: {} reading",
                conn,
                if paused { "pausing" } else { "resuming" }
            );
            // No receiver means the reader is gone already.
            let _ = p.send(paused);
        }
    }

    /// Tell the manager about `event`.
    fn handle_event(&mut self, event: Event) {
        match event {
            Event::Accepted { cfg, stream, peer } => {
                if self.mgr.is_shutting_down() {
                    return;
                }
                match self.mgr.accept(&cfg, peer) {
                    Ok(conn) => {
                        let mut handle = ConnHandle::default();
                        self.start_io(conn, &mut handle, stream);
                        self.conns.insert(conn, handle);
                    }
                    Err(e) => warn!("Dropping new connection: {}", e),
                }
            }
            Event::AcceptFailed(e) => {
                error!("Listener failed: {}", e);
            }
            Event::Connected { conn, stream } => {
                let peer = match stream.peer_addr() {
                    Ok(p) => p,
                    Err(e) => return self.mgr.on_connect_failed(conn, &e),
                };
                let mut handle = match self.conns.remove(&conn) {
                    Some(h) => h,
                    None => return,
                };
                handle.connecting = None;
                self.start_io(conn, &mut handle, stream);
                self.conns.insert(conn, handle);
                self.mgr.on_connected(conn, peer);
            }
            Event::ConnectFailed { conn, err } => self.mgr.on_connect_failed(conn, &err),
            Event::Data { conn, data } => self.mgr.on_data(conn, &data[..]),
            Event::Eof { conn } => self.mgr.on_eof(conn),
            Event::Failed { conn, err } => self.mgr.on_error(conn, &err),
            Event::Written { conn, n } => {
                let resume = self
                    .conns
                    .get_mut(&conn)
                    .map_or(false, |h| h.backlog.sub(n));
                if resume {
                    if let Some(peer) = self.mgr.peer_of(conn) {
                        self.set_paused(peer, false);
                    }
                }
                self.mgr.on_written(conn, n);
            }
            Event::WriterDone { conn } => {
                self.draining.remove(&conn);
                if let Some(h) = self.conns.get_mut(&conn) {
                    h.writer_task = None;
                }
            }
            Event::Shutdown { barbaric } => {
                for l in self.listeners.drain(..) {
                    l.abort();
                }
                self.mgr.start_shutdown(barbaric);
            }
        }
    }

    /// Start reader and writer tasks for `conn` on `stream`.
    fn start_io(&self, conn: ConnId, handle: &mut ConnHandle, stream: TcpStream) {
        let (r, w) = stream.into_split();
        let (wtx, wrx) = mpsc::unbounded();
        for data in handle.queued.drain(..) {
            let _ = wtx.unbounded_send(data);
        }
        let (ptx, prx) = watch::channel(false);
        handle.reader = Some(tokio::spawn(read_loop(conn, r, prx, self.tx.clone())));
        handle.pause = Some(ptx);
        handle.writer_task = Some(tokio::spawn(write_loop(conn, w, wrx, self.tx.clone())));
        handle.writer = Some(wtx);
    }

    /// Carry out a single effect.
    fn apply(&mut self, effect: Effect) {
        match effect {
            Effect::Connect { conn, addr } => {
                let tx = self.tx.clone();
                let task = tokio::spawn(async move {
                    let event = match TcpStream::connect(addr).await {
                        Ok(stream) => Event::Connected { conn, stream },
                        Err(err) => Event::ConnectFailed { conn, err },
                    };
                    let _ = tx.unbounded_send(event);
                });
                self.conns.entry(conn).or_default().connecting = Some(task);
            }
            Effect::ConnectHost { conn, host, port } => {
                let tx = self.tx.clone();
                let task = tokio::spawn(async move {
                    let event = match TcpStream::connect((host.as_str(), port)).await {
                        Ok(stream) => Event::Connected { conn, stream },
                        Err(err) => Event::ConnectFailed { conn, err },
                    };
                    let _ = tx.unbounded_send(event);
                });
                self.conns.entry(conn).or_default().connecting = Some(task);
            }
            Effect::Write { conn, data } => {
                let throttle = match self.conns.get_mut(&conn) {
                    Some(handle) => {
                        let throttle = handle.backlog.add(data.len());
                        match &handle.writer {
                            Some(w) => {
                                if w.unbounded_send(data).is_err() {
                                    debug!("{}: writer already gone", conn);
                                }
                            }
                            None => handle.queued.push(data),
                        }
                        throttle
                    }
                    None => {
                        debug!("{}: write for unknown connection", conn);
                        false
                    }
                };
                if throttle {
                    if let Some(peer) = self.mgr.peer_of(conn) {
                        self.set_paused(peer, true);
                    }
                }
            }
            Effect::StopReading { conn } => {
                if let Some(t) = self.conns.get_mut(&conn).and_then(|h| h.reader.take()) {
                    t.abort();
                }
            }
            Effect::Close { conn } => {
                if let Some(task) = self.conns.remove(&conn).and_then(ConnHandle::close) {
                    self.draining.insert(conn, task);
                }
            }
            // The manager has nothing else to ask of us.
            _ => {}
        }
    }
}

/// Accept connections on `listener` until it fails or we're aborted.
async fn accept_loop(
    listener: TcpListener,
    cfg: Arc<dyn ProtocolConfig>,
    tx: mpsc::UnboundedSender<Event>,
) {
    let mut failures: u32 = 0;
    loop {
        let event = match listener.accept().await {
            Ok((stream, peer)) => {
                failures = 0;
                Event::Accepted {
                    cfg: Arc::clone(&cfg),
                    stream,
                    peer,
                }
            }
            Err(e) => {
                failures = failures.saturating_add(1);
                Event::AcceptFailed(e)
            }
        };
        if tx.unbounded_send(event).is_err() {
            return;
        }
        if failures > 0 {
            // Errors like EMFILE won't clear up right away.
            tokio::time::sleep(accept_backoff(failures)).await;
        }
    }
}

/// Return how long to wait after `failures` accept errors in a row.
fn accept_backoff(failures: u32) -> Duration {
    let factor = 2_u32.saturating_pow(failures.saturating_sub(1).min(16));
    std::cmp::min(ACCEPT_RETRY_MIN * factor, ACCEPT_RETRY_MAX)
}

/// Read from `r` and report what we get, until EOF or an error.
///
/// While `pause` says true, don't read.
async fn read_loop(
    conn: ConnId,
    mut r: OwnedReadHalf,
    mut pause: watch::Receiver<bool>,
    tx: mpsc::UnboundedSender<Event>,
) {
    let mut buf = [0_u8; READ_BUF_LEN];
    loop {
        while *pause.borrow() {
            if pause.changed().await.is_err() {
                return;
            }
        }
        let event = match r.read(&mut buf[..]).await {
            Ok(0) => Event::Eof { conn },
            Ok(n) => Event::Data {
                conn,
                data: Bytes::copy_from_slice(&buf[..n]),
            },
            Err(err) => Event::Failed { conn, err },
        };
        let done = !matches!(event, Event::Data { .. });
        if tx.unbounded_send(event).is_err() || done {
            return;
        }
    }
}

/// Write everything sent on `rx` to `w`, reporting progress, until the
/// sender is dropped.  Then shut down the write side.
async fn write_loop(
    conn: ConnId,
    mut w: OwnedWriteHalf,
    mut rx: mpsc::UnboundedReceiver<Bytes>,
    tx: mpsc::UnboundedSender<Event>,
) {
    while let Some(data) = rx.next().await {
        if let Err(err) = w.write_all(&data[..]).await {
            let _ = tx.unbounded_send(Event::Failed { conn, err });
            let _ = tx.unbounded_send(Event::WriterDone { conn });
            return;
        }
        let _ = tx.unbounded_send(Event::Written {
            conn,
            n: data.len(),
        });
    }
    if let Err(e) = w.shutdown().await {
        debug!("{}: error on shutdown: {}", conn, e);
    }
    let _ = tx.unbounded_send(Event::WriterDone { conn });
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn backlog_hysteresis() {
        let mut b = Backlog::default();
        assert!(!b.add(HIGH_WATER - 1));
        assert!(b.add(1));
        // Only the crossing counts.
        assert!(!b.add(4096));
        assert!(!b.sub(4096));
        assert!(!b.sub(HIGH_WATER - LOW_WATER - 1));
        assert!(b.sub(1));
        assert_eq!(b.queued, LOW_WATER);
        assert!(!b.sub(LOW_WATER));
        // Underflow can't happen, and doesn't resume anything twice.
        assert!(!b.sub(10));
        assert_eq!(b.queued, 0);
    }

    #[test]
    fn backlog_below_low_water() {
        let mut b = Backlog::default();
        assert!(!b.add(LOW_WATER));
        assert!(!b.sub(LOW_WATER));
    }

    #[test]
    fn accept_delays() {
        assert_eq!(accept_backoff(1), ACCEPT_RETRY_MIN);
        assert_eq!(accept_backoff(2), ACCEPT_RETRY_MIN * 2);
        assert_eq!(accept_backoff(3), ACCEPT_RETRY_MIN * 4);
        assert_eq!(accept_backoff(10), ACCEPT_RETRY_MAX);
        assert_eq!(accept_backoff(u32::MAX), ACCEPT_RETRY_MAX);
    }
}
