//! Utilities for cryptographic purposes

pub use rand_core::{CryptoRng, RngCore};
pub use zeroize::{Zeroize, Zeroizing};

/// Fill `buf` with bytes from a cryptographically strong RNG.
pub fn random_bytes<R: RngCore + CryptoRng>(rng: &mut R, buf: &mut [u8]) {
    rng.fill_bytes(buf);
}

/// Return true if every byte of `bytes` is zero.
///
/// Seeds and shared secrets use an all-zero value to mean "unset".
pub fn is_all_zero(bytes: &[u8]) -> bool {
    bytes.iter().fold(0_u8, |acc, b| acc | b) == 0
}
