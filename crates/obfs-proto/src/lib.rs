//! Pluggable obfuscation protocols for obfsproxy.
//!
//! # Overview
//!
//! Every protocol that obfsproxy can speak is an entry in a fixed,
//! process-wide table.  An entry knows how to turn command-line options
//! (or a managed-proxy environment) into a [`ProtocolConfig`], and the
//! configuration in turn creates the per-connection and per-circuit
//! state that actually transforms bytes.
//!
//! Two protocols are provided:
//!
//!   * [`dummy`], which passes bytes through unchanged;
//!   * [`obfs2`], which exchanges seeds, discards random padding, and
//!     then AES-CTR-encrypts everything.
//!
//! None of this code does any I/O.  Protocol state is driven by handing
//! it [`bytes::BytesMut`] buffers of whatever has arrived; the code that
//! owns the sockets lives in the `obfs-relay` crate.

#![deny(missing_docs)]
#![deny(clippy::missing_docs_in_private_items)]
#![deny(clippy::await_holding_lock)]
#![warn(clippy::clone_on_ref_ptr)]
#![deny(clippy::exhaustive_enums)]
#![deny(clippy::exhaustive_structs)]

mod addr;
pub mod dummy;
mod err;
pub mod obfs2;
pub mod protocol;

pub use addr::parse_addr_port;
pub use err::Error;
pub use protocol::{CircuitProto, ConnProto, ListenMode, Protocol, ProtocolConfig, RecvStatus};

use std::sync::Arc;

/// A Result type for the obfs_proto crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Every protocol we support, in the order we list them.
static PROTOCOLS: &[&dyn Protocol] = &[&dummy::Dummy, &obfs2::Obfs2];

/// Return every supported protocol.
pub fn protocols() -> &'static [&'static dyn Protocol] {
    PROTOCOLS
}

/// Return the protocol called `name`, if we have one.
pub fn find_protocol(name: &str) -> Option<&'static dyn Protocol> {
    PROTOCOLS.iter().copied().find(|p| p.name() == name)
}

/// Return true if `name` is a protocol we support.
pub fn is_supported_protocol(name: &str) -> bool {
    find_protocol(name).is_some()
}

/// Build a configuration for the protocol called `name`, from `options`.
pub fn config_create(name: &str, options: &[&str]) -> Result<Arc<dyn ProtocolConfig>> {
    find_protocol(name)
        .ok_or_else(|| Error::UnknownProtocol(name.to_string()))?
        .config_create(options)
}

/// Build a managed-proxy configuration for the protocol called `name`.
pub fn config_create_managed(
    name: &str,
    is_server: bool,
    bindaddr: &str,
    orport: Option<&str>,
) -> Result<Arc<dyn ProtocolConfig>> {
    find_protocol(name)
        .ok_or_else(|| Error::UnknownProtocol(name.to_string()))?
        .config_create_managed(is_server, bindaddr, orport)
}

/// Split a command line of protocol lines into configurations.
///
/// Each line starts with a protocol name and runs until the next token
/// that is a protocol name.  The whole command line fails if any line
/// does.
pub fn configs_from_args<S: AsRef<str>>(tokens: &[S]) -> Result<Vec<Arc<dyn ProtocolConfig>>> {
    let tokens: Vec<&str> = tokens.iter().map(|t| t.as_ref()).collect();
    let first = tokens
        .first()
        .ok_or_else(|| Error::config("obfsproxy", "no protocol given"))?;
    if !is_supported_protocol(first) {
        return Err(Error::UnknownProtocol((*first).to_string()));
    }

    let mut starts: Vec<usize> = tokens
        .iter()
        .enumerate()
        .filter(|(_, t)| is_supported_protocol(t))
        .map(|(i, _)| i)
        .collect();
    starts.push(tokens.len());

    starts
        .windows(2)
        .map(|w| config_create(tokens[w[0]], &tokens[w[0] + 1..w[1]]))
        .collect()
}
