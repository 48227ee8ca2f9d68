//! Structures that represent SOCKS messages

use crate::{Error, Result};

use caret::caret_int;
use std::convert::TryFrom;
use std::fmt;
use std::io;
use std::net::{IpAddr, SocketAddr};

/// A completed SOCKS request, as negotiated on a SOCKS connection.
///
/// Once this request is done, we know where to connect.  Don't
/// discard this object immediately: Use it to report success or
/// failure.
#[derive(Clone, Debug)]
pub struct SocksRequest {
    /// Negotiated SOCKS protocol version.
    version: SocksVersion,
    /// The target address.
    addr: SocksAddr,
    /// The target port.
    port: u16,
}

/// An address sent or received as part of a SOCKS handshake
#[derive(Clone, Debug, PartialEq, Eq)]
#[allow(clippy::exhaustive_enums)]
pub enum SocksAddr {
    /// A regular DNS hostname.
    Hostname(SocksHostname),
    /// An IP address.
    Ip(IpAddr),
}

/// A hostname for use with SOCKS.  It is limited in length.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SocksHostname(String);

caret_int! {
    /// A version of the SOCKS protocol.
    pub struct SocksVersion(u8) {
        /// SOCKS4, or its 4a extension.
        V4 = 4,
        /// SOCKS5.
        V5 = 5,
    }
}

caret_int! {
    /// Command from the socks client telling us what to do.
    pub struct SocksCmd(u8) {
        /// Connect to a remote TCP address:port.
        CONNECT = 1,
        /// Not supported.
        BIND = 2,
        /// Not supported.
        UDP_ASSOCIATE = 3,
    }
}

caret_int! {
    /// Possible reply status values from a SOCKS5 handshake.
    ///
    /// Note that SOCKS4 only represents success and failure.
    pub struct SocksStatus(u8) {
        /// RFC 1928: "succeeded"
        SUCCEEDED = 0x00,
        /// RFC 1928: "general SOCKS server failure"
        GENERAL_FAILURE = 0x01,
        /// RFC 1928: "connection not allowable by ruleset"
        NOT_ALLOWED = 0x02,
        /// RFC 1928: "Network unreachable"
        NETWORK_UNREACHABLE = 0x03,
        /// RFC 1928: "Host unreachable"
        HOST_UNREACHABLE = 0x04,
        /// RFC 1928: "Connection refused"
        CONNECTION_REFUSED = 0x05,
        /// RFC 1928: "TTL expired"
        TTL_EXPIRED = 0x06,
        /// RFC 1928: "Command not supported"
        COMMAND_NOT_SUPPORTED = 0x07,
        /// RFC 1928: "Address type not supported"
        ADDRTYPE_NOT_SUPPORTED = 0x08,
    }
}

impl SocksStatus {
    /// Convert this status into a value for use with SOCKS4 or SOCKS4a.
    pub(crate) fn into_socks4_status(self) -> u8 {
        match self {
            SocksStatus::SUCCEEDED => 0x5A,
            _ => 0x5B,
        }
    }

    /// Pick the status that best describes a failed outbound connection.
    pub fn from_io_error(e: &io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::ConnectionRefused => SocksStatus::CONNECTION_REFUSED,
            io::ErrorKind::NetworkUnreachable => SocksStatus::NETWORK_UNREACHABLE,
            io::ErrorKind::HostUnreachable => SocksStatus::HOST_UNREACHABLE,
            _ => SocksStatus::GENERAL_FAILURE,
        }
    }
}

impl TryFrom<String> for SocksHostname {
    type Error = Error;
    fn try_from(s: String) -> Result<SocksHostname> {
        if s.len() > 255 {
            Err(Error::Syntax)
        } else {
            Ok(SocksHostname(s))
        }
    }
}

impl SocksHostname {
    /// Wrap a hostname whose length came from a one-byte length field.
    pub(crate) fn from_wire(s: String) -> Self {
        debug_assert!(s.len() <= 255);
        SocksHostname(s)
    }
}

impl AsRef<str> for SocksHostname {
    fn as_ref(&self) -> &str {
        self.0.as_ref()
    }
}

impl From<SocksHostname> for String {
    fn from(s: SocksHostname) -> String {
        s.0
    }
}

impl SocksRequest {
    /// Create a SocksRequest for a CONNECT to `addr`:`port`.
    pub(crate) fn new(version: SocksVersion, addr: SocksAddr, port: u16) -> Self {
        SocksRequest {
            version,
            addr,
            port,
        }
    }

    /// Return the negotiated version.
    pub fn version(&self) -> SocksVersion {
        self.version
    }

    /// Return the requested port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Return the requested address.
    pub fn addr(&self) -> &SocksAddr {
        &self.addr
    }

    /// Replace the address and port of this request with the address we
    /// actually ended up connected to.
    ///
    /// SOCKS4 replies can only carry an IPv4 address, so an IPv6
    /// address is refused for them.
    pub(crate) fn set_address(&mut self, sa: SocketAddr) -> Result<()> {
        if self.version == SocksVersion::V4 && sa.is_ipv6() {
            return Err(Error::NoSupport);
        }
        self.addr = SocksAddr::Ip(sa.ip());
        self.port = sa.port();
        Ok(())
    }
}

impl fmt::Display for SocksAddr {
    /// Format a string (a hostname or IP address) corresponding to this
    /// SocksAddr.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SocksAddr::Ip(a) => write!(f, "{}", a),
            SocksAddr::Hostname(h) => write!(f, "{}", h.0),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::convert::TryInto;

    #[test]
    fn display_sa() {
        let a = SocksAddr::Ip(IpAddr::V4("127.0.0.1".parse().unwrap()));
        assert_eq!(a.to_string(), "127.0.0.1");

        let a = SocksAddr::Ip(IpAddr::V6("d:1:5:e:a:5:e:0".parse().unwrap()));
        assert_eq!(a.to_string(), "d:1:5:e:a:5:e:0");

        let a = SocksAddr::Hostname("www.test.example".to_string().try_into().unwrap());
        assert_eq!(a.to_string(), "www.test.example");
    }

    #[test]
    fn hostname_limit() {
        let ok: Result<SocksHostname> = "x".repeat(255).try_into();
        assert!(ok.is_ok());
        let long: Result<SocksHostname> = "x".repeat(256).try_into();
        assert!(matches!(long, Err(Error::Syntax)));
    }

    #[test]
    fn status_from_errors() {
        let refused = io::Error::from(io::ErrorKind::ConnectionRefused);
        assert_eq!(
            SocksStatus::from_io_error(&refused),
            SocksStatus::CONNECTION_REFUSED
        );
        // A dial that times out isn't a TTL problem.
        let slow = io::Error::from(io::ErrorKind::TimedOut);
        assert_eq!(
            SocksStatus::from_io_error(&slow),
            SocksStatus::GENERAL_FAILURE
        );
        let other = io::Error::new(io::ErrorKind::Other, "nope");
        assert_eq!(
            SocksStatus::from_io_error(&other),
            SocksStatus::GENERAL_FAILURE
        );
        assert_eq!(SocksStatus::SUCCEEDED.into_socks4_status(), 0x5A);
        assert_eq!(SocksStatus::HOST_UNREACHABLE.into_socks4_status(), 0x5B);
    }

    #[test]
    fn set_address() {
        let mut r = SocksRequest::new(
            SocksVersion::V4,
            SocksAddr::Hostname("example.com".to_string().try_into().unwrap()),
            80,
        );
        let v6: SocketAddr = "[::1]:80".parse().unwrap();
        assert!(matches!(r.set_address(v6), Err(Error::NoSupport)));
        let v4: SocketAddr = "10.0.0.1:8080".parse().unwrap();
        r.set_address(v4).unwrap();
        assert_eq!(r.addr().to_string(), "10.0.0.1");
        assert_eq!(r.port(), 8080);
    }
}
