//! Ciphers used to implement the obfuscation protocols.
//!
//! obfs2 only uses AES-128, and only in counter mode with a
//! full-width big-endian counter.

pub use ::cipher::{KeyIvInit, StreamCipher};

/// Re-exports implementations of counter-mode AES
pub mod aes {
    use super::KeyIvInit;

    /// AES-128 in counter mode, incrementing all 128 bits of the
    /// counter block as a big-endian integer.
    ///
    /// This implements StreamCipher.
    pub type Aes128Ctr = ctr::Ctr128BE<::aes::Aes128>;

    /// Length of an AES-128 key, in bytes.
    pub const KEY_LEN: usize = 16;
    /// Length of the initial counter block, in bytes.
    pub const IV_LEN: usize = 16;

    /// Construct a new AES-128-CTR stream from a key and an initial
    /// counter block.
    pub fn aes128_ctr(key: &[u8; KEY_LEN], iv: &[u8; IV_LEN]) -> Aes128Ctr {
        Aes128Ctr::new(&(*key).into(), &(*iv).into())
    }
}
