//! Declare an error type for obfs_socksproto
use crate::msg::SocksCmd;
use thiserror::Error;

/// An error that occurs while negotiating a SOCKS handshake.
///
/// Apart from [Error::Truncated] and [Error::AlreadyFinished], every
/// error leaves the handshake permanently broken.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// Tried to handle a message what wasn't complete: try again.
    #[error("Message truncated; need to wait for more")]
    Truncated,

    /// The SOCKS client didn't implement SOCKS correctly.
    #[error("SOCKS protocol syntax violation")]
    Syntax,

    /// The SOCKS client declared a SOCKS version number that isn't
    /// one we support.
    ///
    /// In all likelihood, this is somebody trying to use the port for
    /// some protocol other than SOCKS.
    #[error("Unrecognized SOCKS protocol version {0}")]
    BadProtocol(u8),

    /// The SOCKS client tried to use a SOCKS feature that we don't
    /// support at all.
    #[error("SOCKS feature not supported")]
    NoSupport,

    /// A SOCKS5 client asked for something other than CONNECT.
    ///
    /// Unlike the other failures, the client is owed an answer: send
    /// it [SocksHandshake::unsupported_reply](crate::SocksHandshake::unsupported_reply)
    /// before closing.
    #[error("SOCKS command {0} is not CONNECT")]
    CommandNotConnect(SocksCmd),

    /// A SOCKS4 request grew past our length limit without a
    /// terminating NUL.
    #[error("SOCKS4 request longer than {0} bytes")]
    TooLong(usize),

    /// The handshake already failed; it will not recover.
    #[error("SOCKS handshake is broken")]
    Broken,

    /// Tried to progress the SOCKS handshake when it was already
    /// finished.  This is a programming error.
    #[error("SOCKS handshake was finished; no need to call this again")]
    AlreadyFinished,

    /// Tried to use a request before the client had sent one.  This
    /// is a programming error.
    #[error("No SOCKS request has been received")]
    NoRequest,
}

impl Error {
    /// Return true if this error means "wait for more input".
    pub fn is_truncated(&self) -> bool {
        matches!(self, Error::Truncated)
    }

    /// Return true if this error leaves the handshake unusable.
    pub(crate) fn breaks_handshake(&self) -> bool {
        !matches!(
            self,
            Error::Truncated | Error::AlreadyFinished | Error::NoRequest
        )
    }
}

impl From<tor_bytes::Error> for Error {
    fn from(e: tor_bytes::Error) -> Error {
        use tor_bytes::Error as E;
        match e {
            E::Truncated => Error::Truncated,
            _ => Error::Syntax,
        }
    }
}
