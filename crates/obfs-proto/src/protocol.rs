//! The operations that every obfuscation protocol provides.
//!
//! A protocol is described by three layers of state, each with its own
//! trait:
//!
//!   * [`Protocol`]: a stateless entry in the protocol table, which knows
//!     how to turn options into a configuration.
//!   * [`ProtocolConfig`]: an immutable, per-listener configuration.  It
//!     says where to listen and where to connect, and creates the
//!     per-connection and per-circuit state.
//!   * [`ConnProto`] and [`CircuitProto`]: the protocol-private parts of a
//!     connection and of a circuit.  The circuit state is where the
//!     actual byte transformations happen.
//!
//! Code that moves bytes around is written against these traits only;
//! it never looks inside a particular protocol.

use crate::Result;

use bytes::BytesMut;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

/// How a listener treats the connections it accepts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[allow(clippy::exhaustive_enums)]
pub enum ListenMode {
    /// Accepted connections speak plaintext; we obfuscate toward a
    /// fixed target.
    SimpleClient,
    /// Accepted connections speak the obfuscated protocol; we relay
    /// plaintext to a fixed target.
    SimpleServer,
    /// Accepted connections speak SOCKS to tell us where to go; we
    /// obfuscate toward wherever that is.
    SocksClient,
}

impl ListenMode {
    /// Parse a mode from its command-line name.
    pub fn from_option(s: &str) -> Option<Self> {
        match s {
            "client" => Some(ListenMode::SimpleClient),
            "server" => Some(ListenMode::SimpleServer),
            "socks" => Some(ListenMode::SocksClient),
            _ => None,
        }
    }

    /// Return the port to listen on when none is given.
    pub fn default_port(self) -> u16 {
        match self {
            ListenMode::SimpleClient => 48988, // bf5c
            ListenMode::SimpleServer => 11253, // 2bf5
            ListenMode::SocksClient => 23548,  // 5bf5
        }
    }

    /// Return true if connections in this mode start the conversation
    /// with the remote peer.
    pub fn is_initiator(self) -> bool {
        self != ListenMode::SimpleServer
    }
}

impl fmt::Display for ListenMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ListenMode::SimpleClient => "client",
            ListenMode::SimpleServer => "server",
            ListenMode::SocksClient => "socks",
        };
        write!(f, "{}", s)
    }
}

/// Outcome of handing inbound bytes to [`CircuitProto::recv`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum RecvStatus {
    /// Everything we could process was processed.
    Good,
    /// We need more bytes before we can make progress.  Nothing past a
    /// clean boundary was consumed.
    Incomplete,
    /// Like `Good`, but the protocol also has queued outbound data
    /// that the caller should flush right away with
    /// [`CircuitProto::send`].
    SendPending,
}

/// An entry in the protocol table.
pub trait Protocol: Send + Sync {
    /// The name of this protocol, as given on the command line.
    fn name(&self) -> &'static str;

    /// Build a configuration from command-line options (everything
    /// after the protocol name, up to the next protocol name).
    fn config_create(&self, options: &[&str]) -> Result<Arc<dyn ProtocolConfig>>;

    /// Build a configuration for a managed proxy.
    ///
    /// Clients listen in socks mode on `bindaddr`; servers listen on
    /// `bindaddr` and relay to `orport`.
    fn config_create_managed(
        &self,
        is_server: bool,
        bindaddr: &str,
        orport: Option<&str>,
    ) -> Result<Arc<dyn ProtocolConfig>>;
}

/// A per-listener configuration for some protocol.
pub trait ProtocolConfig: Send + Sync + fmt::Debug {
    /// Return the table entry this configuration was built from.
    fn protocol(&self) -> &'static dyn Protocol;

    /// Return the listen mode for this configuration.
    fn mode(&self) -> ListenMode;

    /// Return the `n`th set of addresses to listen on, or None if
    /// there are fewer than `n+1` sets.
    fn listen_addrs(&self, n: usize) -> Option<&[SocketAddr]>;

    /// Return the address to connect to, if this configuration has a
    /// fixed one.
    fn target_addr(&self) -> Option<SocketAddr>;

    /// Create the protocol-private state for a new connection.
    fn conn_create(&self) -> Box<dyn ConnProto>;

    /// Create the protocol-private state for a new circuit.
    fn circuit_create(&self) -> Result<Box<dyn CircuitProto>>;
}

/// Protocol-private state for a single connection.
pub trait ConnProto: Send + fmt::Debug {
    /// Return the listen mode that created this connection.
    fn mode(&self) -> ListenMode;
}

/// Protocol-private state for a circuit, which transforms the bytes
/// that cross it.
pub trait CircuitProto: Send {
    /// Write this protocol's opening message (if any) onto `out`, which
    /// is bound for the remote peer.
    fn handshake(&mut self, out: &mut BytesMut) -> Result<()>;

    /// Transform everything in `input` (plaintext from the local
    /// side) onto `out` (bound for the remote peer), draining `input`.
    fn send(&mut self, input: &mut BytesMut, out: &mut BytesMut) -> Result<()>;

    /// Transform bytes from the remote peer in `input` into plaintext on
    /// `out`, consuming as much of `input` as can be processed.
    ///
    /// An error means the peer has violated the protocol, and the
    /// circuit should be closed.
    fn recv(&mut self, input: &mut BytesMut, out: &mut BytesMut) -> Result<RecvStatus>;
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn modes() {
        assert_eq!(ListenMode::from_option("socks"), Some(ListenMode::SocksClient));
        assert_eq!(ListenMode::from_option("gladiator"), None);
        assert_eq!(ListenMode::SimpleClient.default_port(), 0xbf5c);
        assert_eq!(ListenMode::SimpleServer.default_port(), 0x2bf5);
        assert_eq!(ListenMode::SocksClient.default_port(), 0x5bf5);
        assert!(ListenMode::SocksClient.is_initiator());
        assert!(!ListenMode::SimpleServer.is_initiator());
        assert_eq!(ListenMode::SimpleServer.to_string(), "server");
    }
}
