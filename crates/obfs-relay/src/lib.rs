//! Connection and circuit management for obfsproxy.
//!
//! # Overview
//!
//! obfsproxy accepts connections on one or more listeners, pairs each
//! one with a second connection (to a fixed target, or to wherever a
//! SOCKS client asks), and moves bytes between the two through an
//! obfuscation protocol.  A pair of connections is a *circuit*.
//!
//! This crate has two layers:
//!
//!   * [`ConnMgr`] is a sans-IO registry of connections and circuits.
//!     It handles the SOCKS negotiation, decides when circuits open,
//!     runs protocol transforms, and implements the close-and-flush
//!     rules.  It is told about socket events, and answers with
//!     [`Effect`]s.
//!   * [`Relay`] owns a `ConnMgr` and drives it with `tokio` sockets.
//!
//! Keeping the rules apart from the sockets means they can be tested
//! one event at a time.

#![deny(missing_docs)]
#![deny(clippy::missing_docs_in_private_items)]
#![deny(clippy::await_holding_lock)]
#![warn(clippy::clone_on_ref_ptr)]
#![deny(clippy::exhaustive_enums)]
#![deny(clippy::exhaustive_structs)]

mod err;
mod ids;
mod mgr;
mod relay;

pub use err::Error;
pub use ids::{CircId, ConnId};
pub use mgr::{ConnMgr, ConnState, Effect, MgrConfig, SCRUBBED};
pub use relay::{Relay, ShutdownHandle};

/// A Result type for the obfs_relay crate.
pub type Result<T> = std::result::Result<T, Error>;
