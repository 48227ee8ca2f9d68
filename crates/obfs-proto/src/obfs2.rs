//! The obfs2 protocol: a look-like-nothing stream obfuscator.
//!
//! obfs2 makes a byte stream look uniformly random to an observer who
//! doesn't know the protocol.  It offers no real security against one
//! who does, unless both sides share a secret.
//!
//! The handshake and stream transforms live in [`state`]; this module
//! holds the option parsing and the glue into the protocol table.

mod state;

pub use state::{
    HandshakeState, Obfs2State, SharedSecret, HASH_ITERATIONS, MAGIC_VALUE, MAX_PADDING,
    SEED_LENGTH, SHARED_SECRET_LENGTH,
};

use crate::addr::parse_addr_port;
use crate::protocol::{CircuitProto, ConnProto, ListenMode, Protocol, ProtocolConfig};
use crate::{Error, Result};

use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, warn};

/// Name of this protocol.
const NAME: &str = "obfs2";

/// Usage reminder for bad obfs2 lines.
const USAGE: &str = "obfs2 syntax: obfs2 [--dest=host:port] [--shared-secret=<secret>] \
                     <client|server|socks> <listen address> \
                     (for example: obfs2 --dest=127.0.0.1:666 --shared-secret=himitsu \
                     server 127.0.0.1:1026)";

/// Table entry for obfs2.
#[derive(Debug, Default)]
#[non_exhaustive]
pub struct Obfs2;

/// A listener configuration for obfs2.
#[derive(Debug, Clone)]
pub struct Obfs2Config {
    /// How to treat accepted connections.
    mode: ListenMode,
    /// Where to listen.
    listen_addr: Vec<SocketAddr>,
    /// Where to connect, unless we're in socks mode.
    target_addr: Option<SocketAddr>,
    /// The hashed shared secret, or zero if there is none.
    secret: SharedSecret,
}

/// Per-connection state for obfs2.
#[derive(Debug)]
struct Obfs2Conn {
    /// Mode of the listener that made this connection.
    mode: ListenMode,
}

impl Obfs2Config {
    /// Return the shared secret this configuration uses.
    pub fn secret(&self) -> &SharedSecret {
        &self.secret
    }
}

/// Helper: parse obfs2 options into a configuration.
fn parse_options(options: &[&str]) -> Result<Obfs2Config> {
    if options.len() < 2 || options.len() > 4 {
        return Err(Error::config(
            NAME,
            format!("wrong number of options: {}", options.len()),
        ));
    }

    let mut target_addr = None;
    let mut secret = None;
    let mut rest = options;

    while let Some(opt) = rest.first().filter(|o| o.starts_with("--")) {
        if let Some(dest) = opt.strip_prefix("--dest=") {
            if target_addr.is_some() {
                return Err(Error::config(NAME, "--dest given twice"));
            }
            target_addr = Some(parse_addr_port(dest, None)?);
        } else if let Some(s) = opt.strip_prefix("--shared-secret=") {
            if secret.is_some() {
                return Err(Error::config(NAME, "--shared-secret given twice"));
            }
            secret = Some(SharedSecret::from_passphrase(s));
        } else {
            return Err(Error::config(NAME, format!("unknown argument {:?}", opt)));
        }
        rest = &rest[1..];
    }

    if rest.len() != 2 {
        return Err(Error::config(
            NAME,
            format!(
                "needs a mode and a listen address after its optional arguments; got {} options",
                rest.len()
            ),
        ));
    }

    let mode = ListenMode::from_option(rest[0])
        .ok_or_else(|| Error::config(NAME, "only client/socks/server modes supported"))?;
    let listen_addr = parse_addr_port(rest[1], Some(mode.default_port()))?;

    match (mode, target_addr.is_some()) {
        (ListenMode::SocksClient, true) => {
            return Err(Error::config(NAME, "socks mode can't have --dest"))
        }
        (ListenMode::SimpleClient, false) | (ListenMode::SimpleServer, false) => {
            return Err(Error::config(NAME, "client/server mode needs --dest"))
        }
        _ => {}
    }

    Ok(Obfs2Config {
        mode,
        listen_addr: vec![listen_addr],
        target_addr,
        secret: secret.unwrap_or_default(),
    })
}

impl Protocol for Obfs2 {
    fn name(&self) -> &'static str {
        NAME
    }

    fn config_create(&self, options: &[&str]) -> Result<Arc<dyn ProtocolConfig>> {
        match parse_options(options) {
            Ok(cfg) => {
                debug!("obfs2: parsed {} configuration", cfg.mode);
                Ok(Arc::new(cfg))
            }
            Err(e) => {
                warn!("{}", USAGE);
                Err(e)
            }
        }
    }

    fn config_create_managed(
        &self,
        is_server: bool,
        bindaddr: &str,
        orport: Option<&str>,
    ) -> Result<Arc<dyn ProtocolConfig>> {
        let mode = if is_server {
            ListenMode::SimpleServer
        } else {
            ListenMode::SocksClient
        };
        let listen_addr = parse_addr_port(bindaddr, Some(mode.default_port()))?;
        let target_addr = match (is_server, orport) {
            (true, Some(orport)) => Some(parse_addr_port(orport, None)?),
            (true, None) => return Err(Error::config(NAME, "server needs an ORPort")),
            (false, _) => None,
        };
        Ok(Arc::new(Obfs2Config {
            mode,
            listen_addr: vec![listen_addr],
            target_addr,
            secret: SharedSecret::default(),
        }))
    }
}

impl ProtocolConfig for Obfs2Config {
    fn protocol(&self) -> &'static dyn Protocol {
        &Obfs2
    }

    fn mode(&self) -> ListenMode {
        self.mode
    }

    fn listen_addrs(&self, n: usize) -> Option<&[SocketAddr]> {
        if n == 0 {
            Some(&self.listen_addr[..])
        } else {
            None
        }
    }

    fn target_addr(&self) -> Option<SocketAddr> {
        self.target_addr
    }

    fn conn_create(&self) -> Box<dyn ConnProto> {
        Box::new(Obfs2Conn { mode: self.mode })
    }

    fn circuit_create(&self) -> Result<Box<dyn CircuitProto>> {
        let state = Obfs2State::new(
            &mut rand::thread_rng(),
            self.mode.is_initiator(),
            self.secret.clone(),
        );
        Ok(Box::new(state))
    }
}

impl ConnProto for Obfs2Conn {
    fn mode(&self) -> ListenMode {
        self.mode
    }
}
