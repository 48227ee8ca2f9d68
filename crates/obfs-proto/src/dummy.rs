//! The "dummy" protocol, which does no obfuscation at all.
//!
//! Its handshake is empty and its transforms are the identity.  It
//! exists so that the connection machinery can be tested on its own.

use crate::addr::parse_addr_port;
use crate::protocol::{CircuitProto, ConnProto, ListenMode, Protocol, ProtocolConfig, RecvStatus};
use crate::{Error, Result};

use bytes::BytesMut;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::debug;

/// Name of this protocol.
const NAME: &str = "dummy";

/// Table entry for the dummy protocol.
#[derive(Debug, Default)]
#[non_exhaustive]
pub struct Dummy;

/// A listener configuration for the dummy protocol.
#[derive(Debug, Clone)]
pub struct DummyConfig {
    /// How to treat accepted connections.
    mode: ListenMode,
    /// Where to listen.
    listen_addr: Vec<SocketAddr>,
    /// Where to connect, unless we're in socks mode.
    target_addr: Option<SocketAddr>,
}

/// Per-connection state: there's nothing to it.
#[derive(Debug)]
struct DummyConn {
    /// Mode of the listener that made this connection.
    mode: ListenMode,
}

/// Per-circuit state: also nothing.
#[derive(Debug)]
struct DummyCircuit;

/// Usage reminder for bad dummy lines.
const USAGE: &str = "dummy syntax: dummy <client|server|socks> <listen address> [<target address>] \
                     (the target is required for client and server modes, \
                     and forbidden for socks mode)";

impl Protocol for Dummy {
    fn name(&self) -> &'static str {
        NAME
    }

    fn config_create(&self, options: &[&str]) -> Result<Arc<dyn ProtocolConfig>> {
        let mode = options
            .first()
            .and_then(|m| ListenMode::from_option(m))
            .ok_or_else(|| Error::config(NAME, USAGE))?;

        let wanted = if mode == ListenMode::SocksClient { 2 } else { 3 };
        if options.len() != wanted {
            return Err(Error::config(
                NAME,
                format!("wrong number of options: {}. {}", options.len(), USAGE),
            ));
        }

        let listen_addr = parse_addr_port(options[1], Some(mode.default_port()))?;
        let target_addr = match mode {
            ListenMode::SocksClient => None,
            _ => Some(parse_addr_port(options[2], None)?),
        };

        debug!("dummy: parsed {} configuration", mode);
        Ok(Arc::new(DummyConfig {
            mode,
            listen_addr: vec![listen_addr],
            target_addr,
        }))
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
        let target_addr = if is_server {
            let orport = orport.ok_or_else(|| Error::config(NAME, "server needs an ORPort"))?;
            Some(parse_addr_port(orport, None)?)
        } else {
            None
        };
        Ok(Arc::new(DummyConfig {
            mode,
            listen_addr: vec![listen_addr],
            target_addr,
        }))
    }
}

impl ProtocolConfig for DummyConfig {
    fn protocol(&self) -> &'static dyn Protocol {
        &Dummy
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
        Box::new(DummyConn { mode: self.mode })
    }

    fn circuit_create(&self) -> Result<Box<dyn CircuitProto>> {
        Ok(Box::new(DummyCircuit))
    }
}

impl ConnProto for DummyConn {
    fn mode(&self) -> ListenMode {
        self.mode
    }
}

impl CircuitProto for DummyCircuit {
    fn handshake(&mut self, _out: &mut BytesMut) -> Result<()> {
        Ok(())
    }

    fn send(&mut self, input: &mut BytesMut, out: &mut BytesMut) -> Result<()> {
        out.extend_from_slice(&input.split());
        Ok(())
    }

    fn recv(&mut self, input: &mut BytesMut, out: &mut BytesMut) -> Result<RecvStatus> {
        out.extend_from_slice(&input.split());
        Ok(RecvStatus::Good)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn option_parsing() {
        let bad: &[&[&str]] = &[
            // wrong number of options
            &[],
            &["client"],
            &["client", "127.0.0.1:5552"],
            &["server", "127.0.0.1:5552"],
            &["socks", "127.0.0.1:5552", "192.168.1.99:11253"],
            // unrecognized mode
            &["floodcontrol", "127.0.0.1:5552"],
            &["--frobozz", "client", "127.0.0.1:5552"],
            &["client", "--frobozz", "127.0.0.1:5552"],
            // bad address
            &["socks", "@:5552"],
            &["socks", "127.0.0.1:notanumber"],
            // target without a port
            &["client", "127.0.0.1:5552", "192.168.1.99"],
        ];
        for opts in bad {
            assert!(Dummy.config_create(opts).is_err(), "{:?} accepted", opts);
        }

        let good: &[&[&str]] = &[
            &["client", "127.0.0.1:5552", "192.168.1.99:11253"],
            &["client", "127.0.0.1", "192.168.1.99:11253"],
            &["server", "127.0.0.1:5552", "192.168.1.99:11253"],
            &["socks", "127.0.0.1:5552"],
        ];
        for opts in good {
            assert!(Dummy.config_create(opts).is_ok(), "{:?} rejected", opts);
        }
    }

    #[test]
    fn config_accessors() {
        let cfg = Dummy
            .config_create(&["client", "127.0.0.1", "192.168.1.99:11253"])
            .unwrap();
        assert_eq!(cfg.protocol().name(), "dummy");
        assert_eq!(cfg.mode(), ListenMode::SimpleClient);
        assert_eq!(
            cfg.listen_addrs(0).unwrap(),
            &["127.0.0.1:48988".parse::<SocketAddr>().unwrap()]
        );
        assert!(cfg.listen_addrs(1).is_none());
        assert_eq!(
            cfg.target_addr(),
            Some("192.168.1.99:11253".parse().unwrap())
        );
        assert_eq!(cfg.conn_create().mode(), ListenMode::SimpleClient);

        let cfg = Dummy.config_create(&["socks", "127.0.0.1:0"]).unwrap();
        assert!(cfg.target_addr().is_none());
    }

    #[test]
    fn managed() {
        let cfg = Dummy
            .config_create_managed(true, "0.0.0.0", Some("127.0.0.1:9001"))
            .unwrap();
        assert_eq!(cfg.mode(), ListenMode::SimpleServer);
        assert_eq!(cfg.listen_addrs(0).unwrap()[0].port(), 11253);
        assert!(Dummy
            .config_create_managed(true, "0.0.0.0", None)
            .is_err());
        let cfg = Dummy
            .config_create_managed(false, "127.0.0.1:0", None)
            .unwrap();
        assert_eq!(cfg.mode(), ListenMode::SocksClient);
    }

    #[test]
    fn identity() {
        let cfg = Dummy
            .config_create(&["client", "127.0.0.1:5552", "127.0.0.1:5553"])
            .unwrap();
        let mut client = cfg.circuit_create().unwrap();
        let mut server = cfg.circuit_create().unwrap();

        let mut wire = BytesMut::new();
        client.handshake(&mut wire).unwrap();
        server.handshake(&mut wire).unwrap();
        assert!(wire.is_empty());

        let msg1 = b"this is a 54-byte message passed from client to server";
        assert_eq!(msg1.len(), 54);
        let mut input = BytesMut::from(&msg1[..]);
        client.send(&mut input, &mut wire).unwrap();
        assert!(input.is_empty());
        let mut plain = BytesMut::new();
        assert_eq!(server.recv(&mut wire, &mut plain).unwrap(), RecvStatus::Good);
        assert_eq!(&plain[..], &msg1[..]);
    }
}
