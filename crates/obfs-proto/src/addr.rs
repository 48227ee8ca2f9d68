//! Parse the `host[:port]` addresses that appear in protocol options.
//!
//! Hosts must be numeric: we never do DNS while reading configuration.

use crate::{Error, Result};

use std::net::{IpAddr, SocketAddr};

/// Parse `s` as an address with an optional port.
///
/// Accepted forms are `1.2.3.4`, `1.2.3.4:80`, `[::1]`, `[::1]:80`,
/// and bare `::1`.  If no port is given, use `default_port`; if there
/// is no default either, fail.
pub fn parse_addr_port(s: &str, default_port: Option<u16>) -> Result<SocketAddr> {
    let bad = || Error::BadAddress(s.to_string());

    if let Ok(sa) = s.parse::<SocketAddr>() {
        return Ok(sa);
    }

    let (host, port) = if let Some(rest) = s.strip_prefix('[') {
        // Bracketed IPv6, perhaps with a port.
        let close = rest.find(']').ok_or_else(bad)?;
        let host = &rest[..close];
        let after = &rest[close + 1..];
        let port = match after.strip_prefix(':') {
            Some(p) => Some(p),
            None if after.is_empty() => None,
            None => return Err(bad()),
        };
        (host, port)
    } else if s.matches(':').count() > 1 {
        // Bare IPv6 can't carry a port.
        (s, None)
    } else {
        match s.split_once(':') {
            Some((h, p)) => (h, Some(p)),
            None => (s, None),
        }
    };

    let ip: IpAddr = host.parse().map_err(|_| bad())?;
    let port = match port {
        Some(p) => p.parse::<u16>().map_err(|_| bad())?,
        None => default_port.ok_or_else(bad)?,
    };
    Ok(SocketAddr::new(ip, port))
}
