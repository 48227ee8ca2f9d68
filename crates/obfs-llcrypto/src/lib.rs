//! Low-level crypto implementations for obfsproxy.
//!
//! This crate doesn't have much of interest: for the most part it
//! just wraps other crates that implement lower-level cryptographic
//! functionality, so that the protocol crates agree on one set of
//! types.
//!
//! Encryption is implemented in `cipher`, digests are in `d`, and
//! random-number helpers are in `util`.

#![deny(missing_docs)]
#![deny(clippy::await_holding_lock)]
#![warn(clippy::clone_on_ref_ptr)]
#![deny(clippy::exhaustive_enums)]
#![deny(clippy::exhaustive_structs)]
#![deny(clippy::missing_docs_in_private_items)]

pub mod cipher;
pub mod d;
pub mod util;
