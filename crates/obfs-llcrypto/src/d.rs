//! Digests used to implement the obfuscation protocols.
//!
//! obfs2 only needs SHA-256; we re-export it along with the
//! Digest trait so that callers don't need to name `sha2` or
//! `digest` themselves.

pub use digest::Digest;
pub use sha2::Sha256;

/// Length of a SHA-256 output, in bytes.
pub const SHA256_LEN: usize = 32;
