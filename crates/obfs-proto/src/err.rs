//! Declare an error type for obfs_proto

use thiserror::Error;

/// An error from configuring or running an obfuscation protocol.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// Somebody asked for a protocol that isn't in our table.
    #[error("Unknown protocol {0:?}")]
    UnknownProtocol(String),

    /// A protocol's options were missing, extra, or nonsensical.
    #[error("Bad {protocol} configuration: {msg}")]
    BadConfig {
        /// Which protocol rejected its options.
        protocol: &'static str,
        /// What was wrong.
        msg: String,
    },

    /// An address or port couldn't be parsed.
    #[error("Bad address {0:?}")]
    BadAddress(String),

    /// The peer's handshake didn't start with our magic number.
    #[error("Handshake had wrong magic value {0:#010x}")]
    BadMagic(u32),

    /// The peer's handshake promised more padding than is allowed.
    #[error("Handshake declared {0} bytes of padding")]
    PaddingTooLong(u32),

    /// Something went wrong with the programming of this crate.
    #[error("Internal programming error: {0}")]
    Internal(&'static str),
}

impl Error {
    /// Helper: build a configuration error for `protocol`.
    pub(crate) fn config(protocol: &'static str, msg: impl Into<String>) -> Self {
        Error::BadConfig {
            protocol,
            msg: msg.into(),
        }
    }
}
