//! Implements SOCKS in the flavors that obfsproxy accepts.
//!
//! SOCKS is an old and somewhat janky protocol for telling a TCP
//! proxy where to connect.  Versions 4, 4a, and 5 are all encountered
//! in the wild, and obfsproxy's "socks" listen mode takes all three.
//!
//! This crate hides the actual details of the protocol, and exposes a
//! stateful, sans-IO handshake type that is fed whatever bytes have
//! arrived so far.  It never consumes input until a complete message
//! is present, so callers can simply call it again after every read.
//! Eventually it yields a [SocksRequest], or an error.
//!
//! Only the CONNECT command is supported, and only the "no
//! authentication" SOCKS5 method.
//!
//! For more information about SOCKS:
//!
//!   * SOCKS5 is specified in
//!     [RFC 1928](https://tools.ietf.org/html/rfc1928).
//!   * [The wikipedia article](https://en.wikipedia.org/wiki/SOCKS)
//!     is the best surviving documentation for SOCKS4 and SOCKS4a.

#![deny(missing_docs)]
#![deny(clippy::missing_docs_in_private_items)]
#![deny(clippy::await_holding_lock)]
#![deny(clippy::exhaustive_enums)]
#![deny(clippy::exhaustive_structs)]

mod err;
mod handshake;
mod msg;

pub use err::Error;
pub use handshake::{Action, SocksHandshake, State, DEFAULT_SOCKS4_MAX_LEN};
pub use msg::{SocksAddr, SocksCmd, SocksHostname, SocksRequest, SocksStatus, SocksVersion};

/// A Result type for the obfs_socksproto crate.
pub type Result<T> = std::result::Result<T, Error>;
