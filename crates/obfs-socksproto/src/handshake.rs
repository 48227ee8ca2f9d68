//! Types to implement the SOCKS handshake.

use crate::msg::{SocksAddr, SocksCmd, SocksHostname, SocksRequest, SocksStatus, SocksVersion};
use crate::{Error, Result};

use tor_bytes::Error as BytesError;
use tor_bytes::Result as BytesResult;
use tor_bytes::{Readable, Reader, Writeable, Writer};

use std::convert::TryInto;
use std::net::{IpAddr, SocketAddr};

/// Default bound on the length of a SOCKS4 request that hasn't yet
/// sent its terminating NUL.
pub const DEFAULT_SOCKS4_MAX_LEN: usize = 1024;

/// We never look at fewer than this many bytes.
const MIN_SOCKS_PACKET: usize = 2;

/// SOCKS5 method: "no authentication required".
const NO_AUTHENTICATION: u8 = 0x00;
/// SOCKS5 method reply: "no acceptable methods".
const NO_ACCEPTABLE_METHODS: u8 = 0xff;

/// An ongoing SOCKS handshake.
///
/// To perform a handshake, call the [SocksHandshake::handshake]
/// method repeatedly with all the input received so far (minus
/// whatever earlier [Action]s said to drain), until the resulting
/// [Action] has `finished` set to true.
#[derive(Clone, Debug)]
pub struct SocksHandshake {
    /// Current state of the handshake. Each completed message
    /// advances the state.
    state: State,
    /// Version that the client is speaking, once its first message is
    /// complete.
    version: Option<SocksVersion>,
    /// Set once the client has done something we can't recover from.
    broken: bool,
    /// Longest SOCKS4 request we'll buffer while waiting for a NUL.
    max_socks4_len: usize,
    /// Completed SOCKS request.
    request: Option<SocksRequest>,
}

/// Possible state for a Socks connection.
///
/// Each completed message advances the state.
#[derive(Clone, Debug, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum State {
    /// Starting state: no messages have been handled yet.
    Waiting,
    /// SOCKS5: we've agreed on "no authentication", and are waiting
    /// for the actual request.
    MethodNegotiated,
    /// The client has sent all its messages, and we know where it
    /// wants to go.  We still need to send a reply.
    HaveAddr,
    /// We sent the final reply.
    ReplySent,
}

/// An action to take in response to a SOCKS handshake message.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct Action {
    /// If nonzero, this many bytes should be drained from the
    /// client's inputs.
    pub drain: usize,
    /// If nonempty, this reply should be sent to the client.
    pub reply: Vec<u8>,
    /// If true, then this handshake is over, either successfully or not.
    pub finished: bool,
}

impl SocksHandshake {
    /// Construct a new SocksHandshake in its initial state
    pub fn new() -> Self {
        Self::with_socks4_limit(DEFAULT_SOCKS4_MAX_LEN)
    }

    /// Construct a new SocksHandshake that treats any unterminated
    /// SOCKS4 request longer than `max_socks4_len` as broken.
    pub fn with_socks4_limit(max_socks4_len: usize) -> Self {
        SocksHandshake {
            state: State::Waiting,
            version: None,
            broken: false,
            max_socks4_len,
            request: None,
        }
    }

    /// Try to advance a SocksHandshake, given some client input in
    /// `input`.
    ///
    /// If there isn't enough input, gives [Error::Truncated], and
    /// nothing changes: call again later with more input.  Other
    /// errors indicate a failure, and break the handshake for good.
    ///
    /// On success, return an Action describing what to tell the client,
    /// and how much of its input to consume.
    pub fn handshake(&mut self, input: &[u8]) -> Result<Action> {
        if self.broken {
            return Err(Error::Broken);
        }
        if input.len() < MIN_SOCKS_PACKET {
            return Err(Error::Truncated);
        }
        let result = match (self.state, input[0]) {
            (State::Waiting, 4) => self.s4(input),
            (State::Waiting, 5) => self.s5_initial(input),
            (State::Waiting, v) => Err(Error::BadProtocol(v)),
            (State::MethodNegotiated, _) => self.s5(input),
            (State::HaveAddr, _) | (State::ReplySent, _) => Err(Error::AlreadyFinished),
        };
        if let Err(e) = &result {
            if e.breaks_handshake() {
                self.broken = true;
            }
        }
        result
    }

    /// Complete a socks4 or socks4a handshake.
    fn s4(&mut self, input: &[u8]) -> Result<Action> {
        // version, command, port, and address.
        if input.len() < 8 {
            return Err(Error::Truncated);
        }
        let mut r = Reader::from_slice(input);
        let _version = r.take_u8()?;

        let cmd: SocksCmd = r.take_u8()?.into();
        if cmd != SocksCmd::CONNECT {
            return Err(Error::NoSupport);
        }
        let port = r.take_u16()?;
        let ip = r.take_u32()?;
        // We don't care about the user ID, but it has to be there.
        let _userid = self.take_socks4_string(&mut r, input.len())?;

        let addr = if ip != 0 && (ip >> 8) == 0 {
            // Socks4a; a hostname is given.
            let hostname = self.take_socks4_string(&mut r, input.len())?;
            let hostname: SocksHostname = std::str::from_utf8(hostname)
                .map_err(|_| Error::Syntax)?
                .to_string()
                .try_into()?;
            SocksAddr::Hostname(hostname)
        } else {
            let ip4: std::net::Ipv4Addr = ip.into();
            SocksAddr::Ip(ip4.into())
        };

        self.finish(SocksRequest::new(SocksVersion::V4, addr, port));

        Ok(Action {
            drain: r.consumed(),
            reply: Vec::new(),
            finished: true,
        })
    }

    /// Helper: take a NUL-terminated string from a SOCKS4 request.
    ///
    /// A string that hasn't ended yet is only "truncated" while the
    /// whole request is within our length limit.
    fn take_socks4_string<'a>(&self, r: &mut Reader<'a>, total: usize) -> Result<&'a [u8]> {
        match r.take_until(0) {
            Ok(s) => Ok(s),
            Err(BytesError::Truncated) if total > self.max_socks4_len => {
                Err(Error::TooLong(self.max_socks4_len))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Socks5: initial handshake to negotiate authentication method.
    fn s5_initial(&mut self, input: &[u8]) -> Result<Action> {
        let mut r = Reader::from_slice(input);
        let _version = r.take_u8()?;
        let nmethods = r.take_u8()?;
        let methods = r.take(nmethods as usize)?;

        self.version = Some(SocksVersion::V5);
        if methods.contains(&NO_AUTHENTICATION) {
            self.state = State::MethodNegotiated;
            Ok(Action {
                drain: r.consumed(),
                reply: vec![5, NO_AUTHENTICATION],
                finished: false,
            })
        } else {
            // The client still gets told why we're hanging up.
            self.broken = true;
            Ok(Action {
                drain: r.consumed(),
                reply: vec![5, NO_ACCEPTABLE_METHODS],
                finished: true,
            })
        }
    }

    /// Socks5: final step, to receive client's request.
    fn s5(&mut self, input: &[u8]) -> Result<Action> {
        // version, command, reserved, address type, and at least one
        // byte of address.
        if input.len() < 5 {
            return Err(Error::Truncated);
        }
        let mut r = Reader::from_slice(input);

        let version = r.take_u8()?;
        let cmd: SocksCmd = r.take_u8()?.into();
        let reserved = r.take_u8()?;
        if version != 5 || reserved != 0 {
            return Err(Error::Syntax);
        }
        if cmd != SocksCmd::CONNECT {
            return Err(Error::CommandNotConnect(cmd));
        }
        let addr = r.extract()?;
        let port = r.take_u16()?;

        self.finish(SocksRequest::new(SocksVersion::V5, addr, port));

        Ok(Action {
            drain: r.consumed(),
            reply: Vec::new(),
            finished: true,
        })
    }

    /// Record a completed request.
    fn finish(&mut self, request: SocksRequest) {
        self.version = Some(request.version());
        self.state = State::HaveAddr;
        self.request = Some(request);
    }

    /// Return the current state of this handshake.
    pub fn state(&self) -> State {
        self.state
    }

    /// Return the SOCKS version the client is speaking, if we know it yet.
    pub fn version(&self) -> Option<SocksVersion> {
        self.version
    }

    /// Return true if this handshake has failed permanently.
    pub fn is_broken(&self) -> bool {
        self.broken
    }

    /// Return true if this handshake is finished.
    pub fn finished(&self) -> bool {
        self.broken || matches!(self.state, State::HaveAddr | State::ReplySent)
    }

    /// Return the request the client made, if it has made one.
    pub fn request(&self) -> Option<&SocksRequest> {
        self.request.as_ref()
    }

    /// Consume this handshake's state; if it finished successfully,
    /// return a SocksRequest.
    pub fn into_request(self) -> Option<SocksRequest> {
        if self.broken {
            None
        } else {
            self.request
        }
    }

    /// Record the address we actually connected to, so that our reply
    /// can report it.
    pub fn set_address(&mut self, addr: SocketAddr) -> Result<()> {
        if self.state != State::HaveAddr {
            return Err(Error::NoRequest);
        }
        self.request
            .as_mut()
            .ok_or(Error::NoRequest)?
            .set_address(addr)
    }

    /// Encode our final reply to the client, and remember that we sent it.
    pub fn reply(&mut self, status: SocksStatus) -> Result<Vec<u8>> {
        if self.state != State::HaveAddr {
            return Err(Error::NoRequest);
        }
        let reply = self
            .request
            .as_ref()
            .ok_or(Error::NoRequest)?
            .reply(status, None);
        self.state = State::ReplySent;
        Ok(reply)
    }

    /// Return the reply that tells a SOCKS5 client that we don't
    /// support the command it asked for.
    pub fn unsupported_reply() -> Vec<u8> {
        let mut w = Vec::new();
        w.write_u8(5);
        w.write_u8(SocksStatus::COMMAND_NOT_SUPPORTED.into());
        w.write_u8(0); // reserved.
        w.write(&SocksAddr::Ip(std::net::Ipv4Addr::UNSPECIFIED.into()));
        w.write_u16(0);
        w
    }
}

impl Default for SocksHandshake {
    fn default() -> Self {
        Self::new()
    }
}

impl SocksRequest {
    /// Format a reply to this request, indicating success or failure.
    ///
    /// The reply carries `addr` if one is given, and this request's own
    /// address otherwise.
    pub fn reply(&self, status: SocksStatus, addr: Option<&SocksAddr>) -> Vec<u8> {
        let addr = addr.unwrap_or_else(|| self.addr());
        if self.version() == SocksVersion::V4 {
            self.s4(status, addr)
        } else {
            self.s5(status, addr)
        }
    }

    /// Format a SOCKS4 reply.
    fn s4(&self, status: SocksStatus, addr: &SocksAddr) -> Vec<u8> {
        let mut w = Vec::new();
        w.write_u8(0);
        w.write_u8(status.into_socks4_status());
        w.write_u16(self.port());
        match addr {
            SocksAddr::Ip(IpAddr::V4(ip)) => w.write(ip),
            _ => w.write_u32(0),
        }
        w
    }

    /// Format a SOCKS5 reply.
    fn s5(&self, status: SocksStatus, addr: &SocksAddr) -> Vec<u8> {
        let mut w = Vec::new();
        w.write_u8(5);
        w.write_u8(status.into());
        w.write_u8(0); // reserved.
        w.write(addr);
        w.write_u16(self.port());
        w
    }
}

impl Readable for SocksAddr {
    fn take_from(r: &mut Reader<'_>) -> BytesResult<SocksAddr> {
        let atype = r.take_u8()?;
        match atype {
            1 => {
                let ip4: std::net::Ipv4Addr = r.extract()?;
                Ok(SocksAddr::Ip(ip4.into()))
            }
            3 => {
                let hlen = r.take_u8()?;
                let hostname = r.take(hlen as usize)?;
                let hostname = std::str::from_utf8(hostname)
                    .map_err(|_| BytesError::BadMessage("bad utf8 on hostname"))?
                    .to_string();
                // A one-byte length can't exceed the hostname limit.
                Ok(SocksAddr::Hostname(SocksHostname::from_wire(hostname)))
            }
            4 => {
                let ip6: std::net::Ipv6Addr = r.extract()?;
                Ok(SocksAddr::Ip(ip6.into()))
            }
            _ => Err(BytesError::BadMessage("unrecognized address type.")),
        }
    }
}

impl Writeable for SocksAddr {
    fn write_onto<W: Writer + ?Sized>(&self, w: &mut W) {
        match self {
            SocksAddr::Ip(IpAddr::V4(ip)) => {
                w.write_u8(1);
                w.write(ip);
            }
            SocksAddr::Ip(IpAddr::V6(ip)) => {
                w.write_u8(4);
                w.write(ip);
            }
            SocksAddr::Hostname(h) => {
                let h: &str = h.as_ref();
                w.write_u8(3);
                w.write_u8(h.len() as u8);
                w.write_all(h.as_bytes());
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use hex_literal::hex;

    /// Feed `input` to `hs` and return the action, which must succeed.
    fn step(hs: &mut SocksHandshake, input: &[u8]) -> Action {
        hs.handshake(input).unwrap()
    }

    /// Negotiate "no auth" on a fresh SOCKS5 handshake.
    fn negotiated() -> SocksHandshake {
        let mut hs = SocksHandshake::new();
        let a = step(&mut hs, &hex!("05 01 00"));
        assert_eq!(a.reply, vec![5, 0]);
        hs
    }

    #[test]
    fn socks5_negotiation() {
        let mut hs = SocksHandshake::new();
        let a = step(&mut hs, &hex!("05 01 00"));
        assert_eq!(a.drain, 3);
        assert_eq!(a.reply, hex!("05 00"));
        assert!(!a.finished);
        assert_eq!(hs.state(), State::MethodNegotiated);
        assert_eq!(hs.version(), Some(SocksVersion::V5));

        // Several methods, "no auth" among them; trailing bytes stay put.
        let mut hs = SocksHandshake::new();
        let a = step(&mut hs, &hex!("05 03 02 01 00 05 01"));
        assert_eq!(a.drain, 5);
        assert_eq!(a.reply, hex!("05 00"));
    }

    #[test]
    fn socks5_no_acceptable_method() {
        let mut hs = SocksHandshake::new();
        let a = step(&mut hs, &hex!("05 00"));
        assert_eq!(a.reply, hex!("05 ff"));
        assert!(a.finished);
        assert!(hs.is_broken());
        assert!(matches!(hs.handshake(&hex!("05 01 00")), Err(Error::Broken)));
        assert!(hs.into_request().is_none());

        let mut hs = SocksHandshake::new();
        let a = step(&mut hs, &hex!("05 02 01 02"));
        assert_eq!(a.reply, hex!("05 ff"));
        assert!(hs.is_broken());
    }

    #[test]
    fn socks5_negotiation_truncated() {
        let mut hs = SocksHandshake::new();
        assert!(matches!(hs.handshake(&hex!("05")), Err(Error::Truncated)));
        assert!(matches!(hs.handshake(&hex!("05 03 00")), Err(Error::Truncated)));
        assert!(matches!(
            hs.handshake(&hex!("05 03 00 01")),
            Err(Error::Truncated)
        ));
        assert!(!hs.is_broken());
        assert_eq!(hs.state(), State::Waiting);
        assert_eq!(hs.version(), None);
        let a = step(&mut hs, &hex!("05 03 00 01 02"));
        assert_eq!(a.drain, 5);
    }

    #[test]
    fn bad_version() {
        let mut hs = SocksHandshake::new();
        assert!(matches!(
            hs.handshake(&hex!("06 01 00")),
            Err(Error::BadProtocol(6))
        ));
        assert!(hs.is_broken());
        assert!(hs.finished());
    }

    #[test]
    fn socks5_request_ipv4() {
        let mut hs = negotiated();
        let a = step(&mut hs, &hex!("05 01 00 01 7f 00 00 01 00 50"));
        assert_eq!(a.drain, 10);
        assert!(a.finished);
        assert!(a.reply.is_empty());
        assert_eq!(hs.state(), State::HaveAddr);
        let req = hs.request().unwrap();
        assert_eq!(req.addr().to_string(), "127.0.0.1");
        assert_eq!(req.port(), 80);
    }

    #[test]
    fn socks5_request_ipv6() {
        let mut hs = negotiated();
        let a = step(
            &mut hs,
            &hex!("05 01 00 04 000d 0001 0005 000e 000a 0005 000e 0000 1c bd"),
        );
        assert_eq!(a.drain, 22);
        let req = hs.request().unwrap();
        assert_eq!(req.addr().to_string(), "d:1:5:e:a:5:e:0");
        assert_eq!(req.port(), 7357);
    }

    #[test]
    fn socks5_request_hostname() {
        let mut hs = negotiated();
        let mut msg = hex!("05 01 00 03 10").to_vec();
        msg.extend_from_slice(b"www.test.example");
        msg.extend_from_slice(&hex!("00 50"));
        // Everything short of the last byte is incomplete.
        for n in 2..msg.len() {
            assert!(matches!(hs.handshake(&msg[..n]), Err(Error::Truncated)));
        }
        let a = step(&mut hs, &msg);
        assert_eq!(a.drain, msg.len());
        let req = hs.request().unwrap();
        assert_eq!(req.addr().to_string(), "www.test.example");
        assert_eq!(req.port(), 80);
    }

    #[test]
    fn socks5_request_bad() {
        // Nonzero reserved byte.
        let mut hs = negotiated();
        assert!(matches!(
            hs.handshake(&hex!("05 01 01 01 7f 00 00 01 00 50")),
            Err(Error::Syntax)
        ));
        assert!(hs.is_broken());

        // Unknown address type.
        let mut hs = negotiated();
        assert!(matches!(
            hs.handshake(&hex!("05 01 00 02 7f 00 00 01 00 50")),
            Err(Error::Syntax)
        ));
        assert!(hs.is_broken());
    }

    #[test]
    fn socks5_not_connect() {
        let mut hs = negotiated();
        let e = hs.handshake(&hex!("05 02 00 01 7f 00 00 01 00 50"));
        assert!(matches!(e, Err(Error::CommandNotConnect(SocksCmd::BIND))));
        assert!(hs.is_broken());
        assert_eq!(
            SocksHandshake::unsupported_reply(),
            hex!("05 07 00 01 00000000 0000")
        );
    }

    #[test]
    fn socks5_replies() {
        let mut hs = negotiated();
        step(&mut hs, &hex!("05 01 00 01 7f 00 00 01 1c bd"));
        let r = hs.reply(SocksStatus::SUCCEEDED).unwrap();
        assert_eq!(r, hex!("05 00 00 01 7f000001 1cbd"));
        assert_eq!(hs.state(), State::ReplySent);
        assert!(matches!(
            hs.reply(SocksStatus::SUCCEEDED),
            Err(Error::NoRequest)
        ));

        // A hostname request gets its hostname mirrored back on failure...
        let mut hs = negotiated();
        let mut msg = hex!("05 01 00 03 0b").to_vec();
        msg.extend_from_slice(b"example.com");
        msg.extend_from_slice(&hex!("1c bd"));
        step(&mut hs, &msg);
        let r = hs.reply(SocksStatus::CONNECTION_REFUSED).unwrap();
        let mut expect = hex!("05 05 00 03 0b").to_vec();
        expect.extend_from_slice(b"example.com");
        expect.extend_from_slice(&hex!("1c bd"));
        assert_eq!(r, expect);

        // ...and the connected address on success.
        let mut hs = negotiated();
        step(&mut hs, &msg);
        hs.set_address("[d:1:5:e:a:5:e:0]:443".parse().unwrap())
            .unwrap();
        let r = hs.reply(SocksStatus::SUCCEEDED).unwrap();
        assert_eq!(
            r,
            hex!("05 00 00 04 000d 0001 0005 000e 000a 0005 000e 0000 01 bb")
        );
    }

    #[test]
    fn socks4() {
        let mut hs = SocksHandshake::new();
        let mut msg = hex!("04 01 1cbd 7f000001").to_vec();
        msg.extend_from_slice(b"iamalive\0");
        for n in 0..msg.len() {
            assert!(matches!(hs.handshake(&msg[..n]), Err(Error::Truncated)));
        }
        msg.extend_from_slice(b"trailing");
        let a = step(&mut hs, &msg);
        assert_eq!(a.drain, 17);
        assert!(a.finished);
        assert_eq!(hs.version(), Some(SocksVersion::V4));
        let req = hs.request().unwrap();
        assert_eq!(req.addr().to_string(), "127.0.0.1");
        assert_eq!(req.port(), 7357);

        let r = hs.reply(SocksStatus::SUCCEEDED).unwrap();
        assert_eq!(r, hex!("00 5a 1cbd 7f000001"));
    }

    #[test]
    fn socks4a() {
        let mut hs = SocksHandshake::new();
        let mut msg = hex!("04 01 0050 00000042").to_vec();
        msg.extend_from_slice(b"iamalive\0");
        // The user ID alone isn't enough for 4a.
        assert!(matches!(hs.handshake(&msg), Err(Error::Truncated)));
        msg.extend_from_slice(b"www.test.example\0");
        let a = step(&mut hs, &msg);
        assert_eq!(a.drain, msg.len());
        let req = hs.request().unwrap();
        assert_eq!(req.addr().to_string(), "www.test.example");
        assert_eq!(req.port(), 80);

        let r = hs.reply(SocksStatus::GENERAL_FAILURE).unwrap();
        assert_eq!(r, hex!("00 5b 0050 00000000"));
    }

    #[test]
    fn socks4_bad() {
        // BIND isn't supported.
        let mut hs = SocksHandshake::new();
        let e = hs.handshake(&hex!("04 02 0050 7f000001 00"));
        assert!(matches!(e, Err(Error::NoSupport)));
        assert!(hs.is_broken());

        // A user ID that never ends.
        let mut hs = SocksHandshake::with_socks4_limit(64);
        let mut msg = hex!("04 01 0050 7f000001").to_vec();
        msg.extend(std::iter::repeat(b'x').take(56));
        assert!(matches!(hs.handshake(&msg), Err(Error::Truncated)));
        msg.push(b'x');
        assert!(matches!(hs.handshake(&msg), Err(Error::TooLong(64))));
        assert!(hs.is_broken());

        // A 4a hostname that's too long for SOCKS.
        let mut hs = SocksHandshake::new();
        let mut msg = hex!("04 01 0050 00000001 00").to_vec();
        msg.extend(std::iter::repeat(b'h').take(256));
        msg.push(0);
        assert!(matches!(hs.handshake(&msg), Err(Error::Syntax)));
    }

    #[test]
    fn already_finished() {
        let mut hs = negotiated();
        step(&mut hs, &hex!("05 01 00 01 7f 00 00 01 00 50"));
        assert!(matches!(
            hs.handshake(&hex!("05 01 00")),
            Err(Error::AlreadyFinished)
        ));
        assert!(!hs.is_broken());
        assert!(hs.into_request().is_some());
    }
}
