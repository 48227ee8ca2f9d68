//! The connection and circuit manager.
//!
//! A [`ConnMgr`] tracks every live connection and the circuits that pair
//! them, and decides what should happen to the bytes that arrive on
//! each one.  It never touches a socket: the caller reports events
//! (accepted, connected, data, EOF, written) and collects the resulting
//! [`Effect`]s to carry out.
//!
//! A circuit joins an *upstream* connection, which carries plaintext,
//! to a *downstream* connection, which carries the obfuscated protocol.
//! Which one was accepted and which was dialed depends on the listener's
//! [`ListenMode`].

use crate::ids::{CircId, ConnId, IdAlloc};
use crate::{Error, Result};

use obfs_proto::{CircuitProto, ConnProto, ListenMode, ProtocolConfig, RecvStatus};
use obfs_socksproto::{SocksAddr, SocksHandshake, SocksRequest, SocksStatus, DEFAULT_SOCKS4_MAX_LEN};

use bytes::{Buf, Bytes, BytesMut};
use std::collections::{HashMap, VecDeque};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What we log instead of an address when safe logging is on.
pub const SCRUBBED: &str = "[scrubbed]";

/// Something the connection manager wants done to a socket.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Effect {
    /// Open a TCP connection for `conn` to `addr`.
    Connect {
        /// The connection to dial.
        conn: ConnId,
        /// Where to dial it.
        addr: SocketAddr,
    },
    /// Resolve `host` and open a TCP connection for `conn` to it.
    ConnectHost {
        /// The connection to dial.
        conn: ConnId,
        /// The hostname the SOCKS client asked for.
        host: String,
        /// The port the SOCKS client asked for.
        port: u16,
    },
    /// Write `data` on `conn`, then report it with
    /// [`ConnMgr::on_written`].
    Write {
        /// The connection to write on.
        conn: ConnId,
        /// What to write.
        data: Bytes,
    },
    /// Don't read any more from `conn`.
    StopReading {
        /// The connection to stop reading.
        conn: ConnId,
    },
    /// Close `conn`, once any writes already asked for are done.  The
    /// manager has already forgotten it.
    Close {
        /// The connection to close.
        conn: ConnId,
    },
    /// A shutdown was requested, and no connections are left.
    ShutdownComplete,
}

/// Lifecycle state of a single connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConnState {
    /// We dialed this connection and it hasn't finished connecting.
    PendingConnect,
    /// Connected, and carrying data as usual.
    Established,
    /// The other side of the circuit is gone; we're writing out what's
    /// left before closing.
    Flushing,
}

/// Settings for a [`ConnMgr`].
#[derive(Debug, Clone)]
pub struct MgrConfig {
    /// If true, don't put peer addresses in the logs.
    safe_logging: bool,
    /// Longest SOCKS4 request to buffer while waiting for its NUL.
    max_socks4_len: usize,
}

impl Default for MgrConfig {
    fn default() -> Self {
        MgrConfig {
            safe_logging: true,
            max_socks4_len: DEFAULT_SOCKS4_MAX_LEN,
        }
    }
}

impl MgrConfig {
    /// Turn safe logging on or off.
    pub fn safe_logging(mut self, on: bool) -> Self {
        self.safe_logging = on;
        self
    }

    /// Set the bound on unterminated SOCKS4 requests.
    pub fn max_socks4_len(mut self, n: usize) -> Self {
        self.max_socks4_len = n;
        self
    }
}

/// A connection, as the manager sees it.
struct Conn {
    /// Configuration of the listener this connection came from.
    cfg: Arc<dyn ProtocolConfig>,
    /// Address of the far end, for logging; maybe scrubbed.
    peer: String,
    /// The circuit this connection belongs to, if any.
    circuit: Option<CircId>,
    /// Bytes read but not yet processed.
    inbuf: BytesMut,
    /// Bytes handed off to be written that haven't been reported
    /// written yet.
    pending_out: usize,
    /// Where this connection is in its lifecycle.
    state: ConnState,
    /// Protocol-private state.
    proto: Box<dyn ConnProto>,
}

/// A pair of connections, joined by a protocol.
struct Circuit {
    /// The plaintext side.
    upstream: ConnId,
    /// The obfuscated side, once we have one.
    downstream: Option<ConnId>,
    /// SOCKS state, while we're still finding out where to connect.
    socks: Option<SocksHandshake>,
    /// True once both sides are connected and the protocol handshake
    /// has been sent.
    is_open: bool,
    /// True once one side has gone away and the other is draining.
    is_flushing: bool,
    /// Close the circuit once the upstream's output is written.  Used
    /// for SOCKS failure replies.
    close_on_flush: bool,
    /// Protocol-private state, which does the actual transformation.
    proto: Box<dyn CircuitProto>,
}

/// Tracks every connection and circuit in the process.
pub struct ConnMgr {
    /// Our settings.
    cfg: MgrConfig,
    /// Allocator for connection and circuit identifiers.
    ids: IdAlloc,
    /// Every live connection.
    conns: HashMap<ConnId, Conn>,
    /// Every live circuit.
    circuits: HashMap<CircId, Circuit>,
    /// True once we've been asked to shut down.
    shutting_down: bool,
    /// True once we've emitted [`Effect::ShutdownComplete`].
    shutdown_reported: bool,
    /// Effects not yet collected by the caller.
    effects: VecDeque<Effect>,
}

/// Return true if `a` and `b` are the same configuration object.
fn same_config(a: &Arc<dyn ProtocolConfig>, b: &Arc<dyn ProtocolConfig>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const u8, Arc::as_ptr(b) as *const u8)
}

impl Default for ConnMgr {
    fn default() -> Self {
        Self::new(MgrConfig::default())
    }
}

impl ConnMgr {
    /// Make a new manager with no connections.
    pub fn new(cfg: MgrConfig) -> Self {
        ConnMgr {
            cfg,
            ids: IdAlloc::default(),
            conns: HashMap::new(),
            circuits: HashMap::new(),
            shutting_down: false,
            shutdown_reported: false,
            effects: VecDeque::new(),
        }
    }

    /// Return the number of live connections.
    pub fn n_conns(&self) -> usize {
        self.conns.len()
    }

    /// Return the number of live circuits.
    pub fn n_circuits(&self) -> usize {
        self.circuits.len()
    }

    /// Return true if we've been asked to shut down.
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down
    }

    /// Return the state of `conn`, if it's live.
    pub fn conn_state(&self, conn: ConnId) -> Option<ConnState> {
        self.conns.get(&conn).map(|c| c.state)
    }

    /// Return the circuit that `conn` belongs to, if any.
    pub fn circuit_of(&self, conn: ConnId) -> Option<CircId> {
        self.conns.get(&conn).and_then(|c| c.circuit)
    }

    /// Return the connection on the other side of `conn`'s circuit, if
    /// there is one yet.
    pub fn peer_of(&self, conn: ConnId) -> Option<ConnId> {
        let circ = self.circuits.get(&self.circuit_of(conn)?)?;
        if circ.upstream == conn {
            circ.downstream
        } else {
            Some(circ.upstream)
        }
    }

    /// Take every effect queued so far.
    pub fn drain_effects(&mut self) -> Vec<Effect> {
        self.effects.drain(..).collect()
    }

    /// Return a loggable name for `addr`.
    fn label<T: std::fmt::Display>(&self, addr: T) -> String {
        if self.cfg.safe_logging {
            SCRUBBED.to_string()
        } else {
            addr.to_string()
        }
    }

    /// Register a new connection made under `cfg`.
    fn new_conn(&mut self, cfg: &Arc<dyn ProtocolConfig>, peer: String, state: ConnState) -> ConnId {
        let id = self.ids.conn();
        self.conns.insert(
            id,
            Conn {
                cfg: Arc::clone(cfg),
                peer,
                circuit: None,
                inbuf: BytesMut::new(),
                pending_out: 0,
                state,
                proto: cfg.conn_create(),
            },
        );
        id
    }

    /// Register a connection accepted from `peer` by a listener for `cfg`.
    ///
    /// Depending on the listen mode, this may dial a partner connection
    /// at once.  On failure, nothing is kept.
    pub fn accept(&mut self, cfg: &Arc<dyn ProtocolConfig>, peer: SocketAddr) -> Result<ConnId> {
        if self.shutting_down {
            return Err(Error::ShuttingDown);
        }
        let label = self.label(peer);
        let id = self.new_conn(cfg, label, ConnState::Established);
        if let Some(c) = self.conns.get(&id) {
            info!(
                "{}: new {} {} connection from {}",
                id,
                cfg.protocol().name(),
                c.proto.mode(),
                c.peer
            );
        }

        match self.accept_inner(cfg, id) {
            Ok(()) => Ok(id),
            Err(e) => {
                warn!("{}: couldn't set up: {}", id, e);
                self.teardown(id);
                Err(e)
            }
        }
    }

    /// Helper for `accept`: build the circuit for a new connection `id`.
    fn accept_inner(&mut self, cfg: &Arc<dyn ProtocolConfig>, id: ConnId) -> Result<()> {
        let mode = cfg.mode();
        if mode == ListenMode::SocksClient {
            let proto = cfg.circuit_create()?;
            let circ = self.ids.circ();
            self.circuits.insert(
                circ,
                Circuit {
                    upstream: id,
                    downstream: None,
                    socks: Some(SocksHandshake::with_socks4_limit(self.cfg.max_socks4_len)),
                    is_open: false,
                    is_flushing: false,
                    close_on_flush: false,
                    proto,
                },
            );
            if let Some(c) = self.conns.get_mut(&id) {
                c.circuit = Some(circ);
            }
            debug!("{}: waiting for a SOCKS request on {}", circ, id);
            return Ok(());
        }

        let target = cfg
            .target_addr()
            .ok_or(Error::Internal("simple mode without a target address"))?;
        let label = self.label(target);
        let other = self.new_conn(cfg, label, ConnState::PendingConnect);
        let (up, down) = if mode == ListenMode::SimpleClient {
            (id, other)
        } else {
            (other, id)
        };
        if let Err(e) = self.pair(up, down) {
            self.remove_conn(other);
            return Err(e);
        }
        self.effects.push_back(Effect::Connect {
            conn: other,
            addr: target,
        });
        Ok(())
    }

    /// Join `up` and `down` into a new circuit.
    ///
    /// Both must be live, must come from the same configuration, and
    /// must not already belong to a circuit.
    pub fn pair(&mut self, up: ConnId, down: ConnId) -> Result<CircId> {
        let up_c = self.conns.get(&up).ok_or(Error::NoSuchConn(up))?;
        let down_c = self.conns.get(&down).ok_or(Error::NoSuchConn(down))?;
        if up == down {
            return Err(Error::AlreadyInCircuit(down));
        }
        if !same_config(&up_c.cfg, &down_c.cfg) {
            return Err(Error::ConfigMismatch(up, down));
        }
        for &(id, c) in &[(up, up_c), (down, down_c)] {
            if c.circuit.is_some() {
                return Err(Error::AlreadyInCircuit(id));
            }
        }

        let proto = up_c.cfg.circuit_create()?;
        let circ = self.ids.circ();
        self.circuits.insert(
            circ,
            Circuit {
                upstream: up,
                downstream: Some(down),
                socks: None,
                is_open: false,
                is_flushing: false,
                close_on_flush: false,
                proto,
            },
        );
        for id in &[up, down] {
            if let Some(c) = self.conns.get_mut(id) {
                c.circuit = Some(circ);
            }
        }
        debug!("{}: paired {} (up) with {} (down)", circ, up, down);
        Ok(circ)
    }

    /// Queue `data` to be written on `conn`.
    fn queue_write(&mut self, conn: ConnId, data: Bytes) {
        if data.is_empty() {
            return;
        }
        if let Some(c) = self.conns.get_mut(&conn) {
            c.pending_out += data.len();
            self.effects.push_back(Effect::Write { conn, data });
        }
    }

    /// Report that a dial for `conn` succeeded, reaching `peer`.
    pub fn on_connected(&mut self, conn: ConnId, peer: SocketAddr) {
        let c = match self.conns.get_mut(&conn) {
            Some(c) => c,
            None => return,
        };
        if c.state != ConnState::PendingConnect {
            warn!("{}: connected, but we weren't connecting", conn);
            return;
        }
        c.state = ConnState::Established;
        info!("{}: connected to {}", conn, c.peer);
        let circ_id = match c.circuit {
            Some(id) => id,
            None => return self.teardown(conn),
        };
        let circ = match self.circuits.get_mut(&circ_id) {
            Some(circ) => circ,
            None => return self.teardown(conn),
        };

        if let Some(mut socks) = circ.socks.take() {
            let up = circ.upstream;
            if let Err(e) = socks.set_address(peer) {
                debug!("{}: replying with the requested address: {}", up, e);
            }
            match socks.reply(SocksStatus::SUCCEEDED) {
                Ok(reply) => self.queue_write(up, reply.into()),
                Err(e) => {
                    warn!("{}: couldn't build SOCKS reply: {}", up, e);
                    return self.teardown(conn);
                }
            }
        }
        self.open_circuit(circ_id);
    }

    /// Mark `circ_id` open, send the protocol handshake, and deal with
    /// anything that arrived while we were waiting.
    fn open_circuit(&mut self, circ_id: CircId) {
        let circ = match self.circuits.get_mut(&circ_id) {
            Some(circ) => circ,
            None => return,
        };
        let up = circ.upstream;
        let down = match circ.downstream {
            Some(d) => d,
            None => return self.teardown(up),
        };
        let mut out = BytesMut::new();
        if let Err(e) = circ.proto.handshake(&mut out) {
            warn!("{}: handshake failed: {}", circ_id, e);
            return self.teardown(up);
        }
        circ.is_open = true;
        info!("{}: open", circ_id);
        self.queue_write(down, out.freeze());

        self.process_upstream(circ_id, up);
        self.process_downstream(circ_id, down);
    }

    /// Report that a dial for `conn` failed with `err`.
    pub fn on_connect_failed(&mut self, conn: ConnId, err: &io::Error) {
        let c = match self.conns.get(&conn) {
            Some(c) => c,
            None => return,
        };
        warn!("{}: connection to {} failed: {}", conn, c.peer, err);

        let circ = match c.circuit {
            Some(id) => self.circuits.get_mut(&id),
            None => None,
        };
        let reply = circ.and_then(|circ| {
            let reply = circ
                .socks
                .as_mut()?
                .reply(SocksStatus::from_io_error(err))
                .ok()?;
            circ.downstream = None;
            circ.close_on_flush = true;
            Some((circ.upstream, reply))
        });

        match reply {
            Some((up, reply)) => {
                self.remove_conn(conn);
                self.queue_write(up, reply.into());
            }
            None => self.teardown(conn),
        }
    }

    /// Report that `data` arrived on `conn`.
    pub fn on_data(&mut self, conn: ConnId, data: &[u8]) {
        let c = match self.conns.get_mut(&conn) {
            Some(c) => c,
            None => return,
        };
        c.inbuf.extend_from_slice(data);
        let circ_id = match c.circuit {
            Some(id) => id,
            None => return,
        };
        let is_upstream = match self.circuits.get(&circ_id) {
            Some(circ) => circ.upstream == conn,
            None => return,
        };
        if is_upstream {
            self.process_upstream(circ_id, conn);
        } else {
            self.process_downstream(circ_id, conn);
        }
    }

    /// Handle buffered input on the upstream side of a circuit.
    fn process_upstream(&mut self, circ_id: CircId, up: ConnId) {
        let (circ, conn) = match (self.circuits.get_mut(&circ_id), self.conns.get_mut(&up)) {
            (Some(circ), Some(conn)) => (circ, conn),
            _ => return,
        };
        if circ.socks.is_some() && circ.downstream.is_none() {
            return self.socks_negotiate(circ_id, up);
        }
        let down = match circ.downstream {
            Some(d) if circ.is_open && !circ.is_flushing => d,
            _ => return,
        };
        if conn.inbuf.is_empty() {
            return;
        }
        let mut out = BytesMut::new();
        if let Err(e) = circ.proto.send(&mut conn.inbuf, &mut out) {
            warn!("{}: couldn't transform data: {}", circ_id, e);
            return self.teardown(up);
        }
        self.queue_write(down, out.freeze());
    }

    /// Handle buffered input on the downstream side of a circuit.
    fn process_downstream(&mut self, circ_id: CircId, down: ConnId) {
        let circ = match self.circuits.get_mut(&circ_id) {
            Some(circ) if circ.is_open && !circ.is_flushing => circ,
            _ => return,
        };
        let up = circ.upstream;
        let conn = match self.conns.get_mut(&down) {
            Some(c) => c,
            None => return,
        };
        if conn.inbuf.is_empty() {
            return;
        }

        let mut plain = BytesMut::new();
        let status = match circ.proto.recv(&mut conn.inbuf, &mut plain) {
            Ok(s) => s,
            Err(e) => {
                warn!("{}: protocol error from {}: {}", circ_id, conn.peer, e);
                return self.teardown(down);
            }
        };

        let mut out = BytesMut::new();
        if status == RecvStatus::SendPending {
            let up_c = match self.conns.get_mut(&up) {
                Some(c) => c,
                None => return self.teardown(down),
            };
            if let Err(e) = circ.proto.send(&mut up_c.inbuf, &mut out) {
                warn!("{}: couldn't transform data: {}", circ_id, e);
                return self.teardown(down);
            }
        }

        self.queue_write(up, plain.freeze());
        self.queue_write(down, out.freeze());
    }

    /// Feed buffered upstream input to the circuit's SOCKS handshake.
    fn socks_negotiate(&mut self, circ_id: CircId, up: ConnId) {
        loop {
            let (circ, conn) = match (self.circuits.get_mut(&circ_id), self.conns.get_mut(&up)) {
                (Some(circ), Some(conn)) => (circ, conn),
                _ => return,
            };
            let socks = match circ.socks.as_mut() {
                Some(s) => s,
                None => return,
            };
            if circ.close_on_flush {
                // We've given up and are only waiting to send a reply.
                conn.inbuf.clear();
                return;
            }

            let action = match socks.handshake(&conn.inbuf[..]) {
                Ok(action) => action,
                Err(e) if e.is_truncated() => return,
                Err(obfs_socksproto::Error::CommandNotConnect(cmd)) => {
                    info!("{}: SOCKS command {} isn't supported", up, cmd);
                    circ.close_on_flush = true;
                    return self.queue_write(up, SocksHandshake::unsupported_reply().into());
                }
                Err(e) => {
                    warn!("{}: bad SOCKS handshake: {}", up, e);
                    return self.teardown(up);
                }
            };

            conn.inbuf.advance(action.drain);
            let broken = socks.is_broken();
            let request = match (action.finished, broken) {
                (true, false) => socks.request().cloned(),
                _ => None,
            };
            if broken {
                circ.close_on_flush = true;
            }
            self.queue_write(up, action.reply.into());

            if broken {
                info!("{}: SOCKS client offered no method we accept", up);
                return;
            }
            if let Some(request) = request {
                return self.socks_connect(circ_id, up, &request);
            }
            if action.finished {
                return;
            }
        }
    }

    /// Dial the destination of a completed SOCKS request.
    fn socks_connect(&mut self, circ_id: CircId, up: ConnId, request: &SocksRequest) {
        let cfg = match self.conns.get(&up) {
            Some(c) => Arc::clone(&c.cfg),
            None => return,
        };
        let port = request.port();
        let label = self.label(format_args!("{}:{}", request.addr(), port));
        info!("{}: SOCKS request for {}", up, label);

        let down = self.new_conn(&cfg, label, ConnState::PendingConnect);
        match self.circuits.get_mut(&circ_id) {
            Some(circ) => circ.downstream = Some(down),
            None => return self.remove_conn(down),
        }
        if let Some(c) = self.conns.get_mut(&down) {
            c.circuit = Some(circ_id);
        }

        let effect = match request.addr() {
            SocksAddr::Ip(ip) => Effect::Connect {
                conn: down,
                addr: SocketAddr::new(*ip, port),
            },
            SocksAddr::Hostname(h) => Effect::ConnectHost {
                conn: down,
                host: h.as_ref().to_string(),
                port,
            },
        };
        self.effects.push_back(effect);
    }

    /// Report that `conn` reached end-of-file.
    pub fn on_eof(&mut self, conn: ConnId) {
        debug!("{}: got EOF", conn);
        self.error_or_eof(conn);
    }

    /// Report that `conn` failed with `err`.
    pub fn on_error(&mut self, conn: ConnId, err: &io::Error) {
        info!("{}: error: {}", conn, err);
        self.error_or_eof(conn);
    }

    /// Common handling for a connection that can't be read any more.
    ///
    /// If the circuit is open and the other side still has output
    /// queued, let it drain before freeing the circuit.  Otherwise free
    /// everything now.
    fn error_or_eof(&mut self, conn: ConnId) {
        let circ_id = match self.circuit_of(conn) {
            Some(id) => id,
            None => return self.teardown(conn),
        };
        let peer = match self.circuits.get(&circ_id) {
            Some(circ) if circ.is_open && !circ.is_flushing => {
                if circ.upstream == conn {
                    circ.downstream
                } else {
                    Some(circ.upstream)
                }
            }
            _ => None,
        };
        let peer_conn = match peer {
            Some(p) => self.conns.get_mut(&p).map(|c| (p, c)),
            None => None,
        };
        let peer = match peer_conn {
            Some((p, c)) if c.pending_out > 0 => {
                c.state = ConnState::Flushing;
                debug!("{}: flushing {} bytes before closing", p, c.pending_out);
                p
            }
            _ => return self.teardown(conn),
        };

        if let Some(circ) = self.circuits.get_mut(&circ_id) {
            circ.is_flushing = true;
        }
        debug!("{}: {} is gone; {} is flushing", circ_id, conn, peer);
        self.effects.push_back(Effect::StopReading { conn });
    }

    /// Report that `n` bytes were written on `conn`.
    pub fn on_written(&mut self, conn: ConnId, n: usize) {
        let c = match self.conns.get_mut(&conn) {
            Some(c) => c,
            None => return,
        };
        c.pending_out = c.pending_out.saturating_sub(n);
        if c.pending_out > 0 {
            return;
        }
        if c.state == ConnState::Flushing {
            debug!("{}: done flushing", conn);
            return self.teardown(conn);
        }
        let close = c
            .circuit
            .and_then(|id| self.circuits.get(&id))
            .map(|circ| circ.close_on_flush && circ.upstream == conn)
            .unwrap_or(false);
        if close {
            debug!("{}: final reply written", conn);
            self.teardown(conn);
        }
    }

    /// Free `conn`, along with its circuit and its partner if it has
    /// them.  Unknown connections are ignored.
    pub fn teardown(&mut self, conn: ConnId) {
        let circ_id = match self.conns.get(&conn) {
            Some(c) => c.circuit,
            None => return,
        };
        match circ_id.and_then(|id| self.circuits.remove(&id).map(|circ| (id, circ))) {
            Some((id, circ)) => {
                debug!("{}: tearing down", id);
                self.remove_conn(circ.upstream);
                if let Some(down) = circ.downstream {
                    self.remove_conn(down);
                }
            }
            None => self.remove_conn(conn),
        }
        self.check_shutdown();
    }

    /// Forget a single connection and ask for it to be closed.
    fn remove_conn(&mut self, conn: ConnId) {
        if let Some(c) = self.conns.remove(&conn) {
            debug!("{}: closing connection to {}", conn, c.peer);
            self.effects.push_back(Effect::Close { conn });
        }
    }

    /// Stop accepting connections.  If `barbaric`, close everything at
    /// once; otherwise wait for every connection to finish.
    pub fn start_shutdown(&mut self, barbaric: bool) {
        if !self.shutting_down {
            info!(
                "Starting {} shutdown with {} connections",
                if barbaric { "barbaric" } else { "graceful" },
                self.conns.len()
            );
        }
        self.shutting_down = true;
        if barbaric {
            let ids: Vec<ConnId> = self.conns.keys().copied().collect();
            for id in ids {
                self.teardown(id);
            }
        }
        self.check_shutdown();
    }

    /// Report shutdown completion if it's time.
    fn check_shutdown(&mut self) {
        if self.shutting_down && !self.shutdown_reported && self.conns.is_empty() {
            info!("All connections closed");
            self.shutdown_reported = true;
            self.effects.push_back(Effect::ShutdownComplete);
        }
    }
}
