//! The obfs2 handshake and stream state machine.
//!
//! Each side sends:
//!
//! ```text
//!   SEED | E_PAD_KEY( UINT32(MAGIC_VALUE) | UINT32(PADLEN) | WR(PADLEN) )
//! ```
//!
//! where the padding key comes from the sender's own seed.  Once a side
//! has its peer's seed, it derives both data keys from the two seeds,
//! skips the peer's padding, and from then on every byte is
//! AES-CTR-encrypted under the data key for its direction.
//!
//! If a shared secret is configured, it's mixed into every key, and each
//! key is then stretched with a large number of extra hash iterations.

use crate::protocol::{CircuitProto, RecvStatus};
use crate::{Error, Result};

use arrayref::array_ref;
use bytes::{Buf, BytesMut};
use obfs_llcrypto::cipher::aes::{aes128_ctr, Aes128Ctr};
use obfs_llcrypto::cipher::StreamCipher;
use obfs_llcrypto::d::{Digest, Sha256, SHA256_LEN};
use obfs_llcrypto::util::{is_all_zero, random_bytes, CryptoRng, RngCore, Zeroize, Zeroizing};
use tor_bytes::Writer;
use tracing::debug;

use std::fmt;

/// Value that starts every obfs2 handshake, once decrypted.
pub const MAGIC_VALUE: u32 = 0x2BF5_CA7E;
/// Length of the random seed each side sends.
pub const SEED_LENGTH: usize = 16;
/// Most padding a handshake may carry.
pub const MAX_PADDING: u32 = 8192;
/// Extra hash iterations applied to every key when a shared secret is
/// in use.  Peers must agree on this exactly.
pub const HASH_ITERATIONS: usize = 100_000;
/// Length of the (hashed) shared secret.
pub const SHARED_SECRET_LENGTH: usize = 16;

/// Bytes needed before we can learn anything from a peer's handshake.
const HEADER_LEN: usize = SEED_LENGTH + 8;

/// Key type for padding sent by the initiator.
const INITIATOR_PAD_TYPE: &[u8] = b"Initiator obfuscation padding";
/// Key type for padding sent by the responder.
const RESPONDER_PAD_TYPE: &[u8] = b"Responder obfuscation padding";
/// Key type for data sent by the initiator.
const INITIATOR_SEND_TYPE: &[u8] = b"Initiator obfuscated data";
/// Key type for data sent by the responder.
const RESPONDER_SEND_TYPE: &[u8] = b"Responder obfuscated data";

/// A random seed, as sent at the start of a handshake.
type Seed = [u8; SEED_LENGTH];

/// A shared secret, already hashed down to [`SHARED_SECRET_LENGTH`] bytes.
///
/// The all-zero secret means "no secret".
#[derive(Clone, Default, PartialEq, Eq)]
pub struct SharedSecret([u8; SHARED_SECRET_LENGTH]);

impl SharedSecret {
    /// Derive a shared secret from a passphrase given on the command line.
    pub fn from_passphrase(s: &str) -> Self {
        let d = Sha256::digest(s.as_bytes());
        SharedSecret(*array_ref![d, 0, SHARED_SECRET_LENGTH])
    }

    /// Return true if no secret is configured.
    pub fn is_none(&self) -> bool {
        is_all_zero(&self.0)
    }
}

impl fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            write!(f, "SharedSecret(none)")
        } else {
            write!(f, "SharedSecret(..)")
        }
    }
}

impl Drop for SharedSecret {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

/// Where we are in the handshake.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[allow(clippy::exhaustive_enums)]
pub enum HandshakeState {
    /// Waiting for the peer's seed and padding length.
    WaitForKey,
    /// Discarding the peer's padding.
    WaitForPadding,
    /// Handshake done; data flows.
    Open,
}

/// The obfs2 state for one circuit.
pub struct Obfs2State {
    /// Current handshake state.
    state: HandshakeState,
    /// True if we sent the first message (we're the client side).
    we_are_initiator: bool,
    /// Initiator's seed; all zero until known.
    initiator_seed: Seed,
    /// Responder's seed; all zero until known.
    responder_seed: Seed,
    /// Hashed shared secret, or zero.
    secret: SharedSecret,
    /// Cipher for data we send; exists once we know the peer's seed.
    send_crypto: Option<Aes128Ctr>,
    /// Cipher for our handshake's padding header.
    send_padding_crypto: Aes128Ctr,
    /// Cipher for data we receive; exists once we know the peer's seed.
    recv_crypto: Option<Aes128Ctr>,
    /// Cipher for the peer's padding header.
    recv_padding_crypto: Option<Aes128Ctr>,
    /// How much of the peer's padding we have yet to discard.
    padding_left_to_read: u32,
    /// Plaintext we were asked to send before we had a send key.
    pending_data_to_send: Option<BytesMut>,
}

/// Hash `tag ‖ parts… ‖ secret ‖ tag` into 32 bytes of key material,
/// skipping any all-zero part, and stretch it if there's a secret.
fn key_material(tag: &[u8], parts: &[&Seed], secret: &SharedSecret) -> Zeroizing<[u8; SHA256_LEN]> {
    let mut d = Sha256::new();
    d.update(tag);
    for p in parts {
        if !is_all_zero(&p[..]) {
            d.update(&p[..]);
        }
    }
    if !secret.is_none() {
        d.update(&secret.0[..]);
    }
    d.update(tag);

    let mut buf = Zeroizing::new([0_u8; SHA256_LEN]);
    buf.copy_from_slice(&d.finalize());

    if !secret.is_none() {
        for _ in 0..HASH_ITERATIONS {
            let next = Sha256::digest(&buf[..]);
            buf.copy_from_slice(&next);
        }
    }
    buf
}

/// Build a cipher whose key is the first half of `m` and whose initial
/// counter is the second half.
fn cipher_from_material(m: &[u8; SHA256_LEN]) -> Aes128Ctr {
    aes128_ctr(array_ref![m, 0, 16], array_ref![m, 16, 16])
}

/// Derive the cipher for padding keyed by a single seed.
fn derive_padding_key(secret: &SharedSecret, seed: &Seed, keytype: &[u8]) -> Aes128Ctr {
    cipher_from_material(&key_material(keytype, &[seed], secret))
}

impl Obfs2State {
    /// Create a new state, generating our seed from `rng`.
    pub fn new<R: RngCore + CryptoRng>(rng: &mut R, we_are_initiator: bool, secret: SharedSecret) -> Self {
        let mut seed = [0_u8; SEED_LENGTH];
        random_bytes(rng, &mut seed);
        Self::from_seed(we_are_initiator, secret, seed)
    }

    /// Create a new state with a given seed of our own.
    fn from_seed(we_are_initiator: bool, secret: SharedSecret, seed: Seed) -> Self {
        let (initiator_seed, responder_seed, pad_type) = if we_are_initiator {
            (seed, [0; SEED_LENGTH], INITIATOR_PAD_TYPE)
        } else {
            ([0; SEED_LENGTH], seed, RESPONDER_PAD_TYPE)
        };
        let send_padding_crypto = derive_padding_key(&secret, &seed, pad_type);
        Obfs2State {
            state: HandshakeState::WaitForKey,
            we_are_initiator,
            initiator_seed,
            responder_seed,
            secret,
            send_crypto: None,
            send_padding_crypto,
            recv_crypto: None,
            recv_padding_crypto: None,
            padding_left_to_read: 0,
            pending_data_to_send: None,
        }
    }

    /// Return the current handshake state.
    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Return the seed we send.
    fn local_seed(&self) -> &Seed {
        if self.we_are_initiator {
            &self.initiator_seed
        } else {
            &self.responder_seed
        }
    }

    /// Derive the data key of type `keytype` from both seeds.
    fn derive_key(&self, keytype: &[u8]) -> Aes128Ctr {
        cipher_from_material(&key_material(
            keytype,
            &[&self.initiator_seed, &self.responder_seed],
            &self.secret,
        ))
    }

    /// Called once we have the peer's seed: set up every remaining key.
    fn init_crypto(&mut self) {
        let (send_type, recv_type, recv_pad_type, recv_seed) = if self.we_are_initiator {
            (
                INITIATOR_SEND_TYPE,
                RESPONDER_SEND_TYPE,
                RESPONDER_PAD_TYPE,
                self.responder_seed,
            )
        } else {
            (
                RESPONDER_SEND_TYPE,
                INITIATOR_SEND_TYPE,
                INITIATOR_PAD_TYPE,
                self.initiator_seed,
            )
        };
        self.send_crypto = Some(self.derive_key(send_type));
        self.recv_crypto = Some(self.derive_key(recv_type));
        self.recv_padding_crypto = Some(derive_padding_key(&self.secret, &recv_seed, recv_pad_type));
    }

    /// Write our handshake message onto `out`, taking the padding from `rng`.
    pub fn handshake_with_rng<R: RngCore + CryptoRng>(&mut self, rng: &mut R, out: &mut BytesMut) {
        let plength = rng.next_u32() % MAX_PADDING;
        let padlen = plength as usize;

        let mut msg = Vec::with_capacity(8 + padlen);
        msg.write_u32(MAGIC_VALUE);
        msg.write_u32(plength);
        msg.resize(8 + padlen, 0);
        random_bytes(rng, &mut msg[8..]);
        self.send_padding_crypto.apply_keystream(&mut msg[..]);

        out.write_all(&self.local_seed()[..]);
        out.write_all(&msg[..]);

        debug!(
            "obfs2_handshake: {} queued {} bytes",
            self.role(),
            HEADER_LEN + padlen
        );
    }

    /// Encrypt everything in `input` onto `out`, or queue it if we don't
    /// have a key yet.
    pub fn send(&mut self, input: &mut BytesMut, out: &mut BytesMut) {
        match self.send_crypto.as_mut() {
            Some(crypto) => {
                if let Some(mut pending) = self.pending_data_to_send.take() {
                    debug!("obfs2: transmitting {} bytes previously queued", pending.len());
                    crypto.apply_keystream(&mut pending[..]);
                    out.extend_from_slice(&pending);
                }
                if !input.is_empty() {
                    let mut data = input.split();
                    debug!("obfs2: transmitting {} bytes", data.len());
                    crypto.apply_keystream(&mut data[..]);
                    out.extend_from_slice(&data);
                }
            }
            None => {
                if !input.is_empty() {
                    debug!("obfs2: handshake incomplete, queueing {} bytes", input.len());
                    self.pending_data_to_send
                        .get_or_insert_with(BytesMut::new)
                        .extend_from_slice(&input.split());
                }
            }
        }
    }

    /// Process bytes from the peer in `input`, writing plaintext to `out`.
    pub fn recv(&mut self, input: &mut BytesMut, out: &mut BytesMut) -> Result<RecvStatus> {
        if self.state == HandshakeState::WaitForKey {
            if input.len() < HEADER_LEN {
                debug!(
                    "obfs2: waiting for key, {}/{} bytes so far",
                    input.len(),
                    HEADER_LEN
                );
                return Ok(RecvStatus::Incomplete);
            }
            let mut header = input.split_to(HEADER_LEN);
            let (seed, rest) = header.split_at_mut(SEED_LENGTH);

            if self.we_are_initiator {
                self.responder_seed.copy_from_slice(seed);
            } else {
                self.initiator_seed.copy_from_slice(seed);
            }
            self.init_crypto();

            let pad_crypto = self
                .recv_padding_crypto
                .as_mut()
                .ok_or(Error::Internal("no padding key after init_crypto"))?;
            pad_crypto.apply_keystream(rest);
            let magic = u32::from_be_bytes(*array_ref![rest, 0, 4]);
            let plength = u32::from_be_bytes(*array_ref![rest, 4, 4]);
            if magic != MAGIC_VALUE {
                return Err(Error::BadMagic(magic));
            }
            if plength > MAX_PADDING {
                return Err(Error::PaddingTooLong(plength));
            }

            self.padding_left_to_read = plength;
            self.state = HandshakeState::WaitForPadding;
            debug!("obfs2: received key, expecting {} bytes of padding", plength);
        }

        while self.padding_left_to_read > 0 {
            if input.is_empty() {
                return Ok(RecvStatus::Incomplete);
            }
            let n = std::cmp::min(self.padding_left_to_read as usize, input.len());
            input.advance(n);
            self.padding_left_to_read -= n as u32;
            debug!(
                "obfs2: consumed {} bytes padding, {} still to come",
                n, self.padding_left_to_read
            );
        }

        self.state = HandshakeState::Open;

        if !input.is_empty() {
            let crypto = self
                .recv_crypto
                .as_mut()
                .ok_or(Error::Internal("open without a receive key"))?;
            let mut data = input.split();
            debug!("obfs2: processing {} bytes application data", data.len());
            crypto.apply_keystream(&mut data[..]);
            out.extend_from_slice(&data);
        }

        if self.pending_data_to_send.is_some() {
            Ok(RecvStatus::SendPending)
        } else {
            Ok(RecvStatus::Good)
        }
    }

    /// Name our role, for logging.
    fn role(&self) -> &'static str {
        if self.we_are_initiator {
            "initiator"
        } else {
            "responder"
        }
    }
}

impl fmt::Debug for Obfs2State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Obfs2State")
            .field("state", &self.state)
            .field("role", &self.role())
            .field("padding_left_to_read", &self.padding_left_to_read)
            .finish()
    }
}

impl CircuitProto for Obfs2State {
    fn handshake(&mut self, out: &mut BytesMut) -> Result<()> {
        self.handshake_with_rng(&mut rand::thread_rng(), out);
        Ok(())
    }

    fn send(&mut self, input: &mut BytesMut, out: &mut BytesMut) -> Result<()> {
        Obfs2State::send(self, input, out);
        Ok(())
    }

    fn recv(&mut self, input: &mut BytesMut, out: &mut BytesMut) -> Result<RecvStatus> {
        Obfs2State::recv(self, input, out)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use hex_literal::hex;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    /// Run a full handshake between two states.
    fn handshake_pair(client: &mut Obfs2State, server: &mut Obfs2State, rng: &mut StdRng) {
        let mut wire = BytesMut::new();
        let mut junk = BytesMut::new();
        client.handshake_with_rng(rng, &mut wire);
        assert_eq!(server.recv(&mut wire, &mut junk).unwrap(), RecvStatus::Good);
        assert!(wire.is_empty());
        server.handshake_with_rng(rng, &mut wire);
        assert_eq!(client.recv(&mut wire, &mut junk).unwrap(), RecvStatus::Good);
        assert!(junk.is_empty());
        assert_eq!(client.state(), HandshakeState::Open);
        assert_eq!(server.state(), HandshakeState::Open);
    }

    /// Encrypt `msg` with `from` and decrypt it with `to`.
    fn transfer(from: &mut Obfs2State, to: &mut Obfs2State, msg: &[u8]) -> Vec<u8> {
        let mut input = BytesMut::from(msg);
        let mut wire = BytesMut::new();
        from.send(&mut input, &mut wire);
        assert!(input.is_empty());
        assert_eq!(wire.len(), msg.len());
        if !msg.is_empty() {
            assert_ne!(&wire[..], msg);
        }
        let mut plain = BytesMut::new();
        assert_eq!(to.recv(&mut wire, &mut plain).unwrap(), RecvStatus::Good);
        plain.to_vec()
    }

    /// Apply a fresh copy of a cipher's keystream to zeros.
    fn keystream(c: &mut Aes128Ctr) -> [u8; 32] {
        let mut b = [0_u8; 32];
        c.apply_keystream(&mut b);
        b
    }

    #[test]
    fn secret_from_passphrase() {
        assert!(SharedSecret::default().is_none());
        let s = SharedSecret::from_passphrase("hahaha");
        assert!(!s.is_none());
        assert_eq!(s, SharedSecret::from_passphrase("hahaha"));
        assert_ne!(s, SharedSecret::from_passphrase("himitsu"));
        assert_eq!(format!("{:?}", s), "SharedSecret(..)");
    }

    #[test]
    fn known_keys() {
        let s = SharedSecret::from_passphrase("hahaha");
        assert_eq!(s.0, hex!("be178c0543eb17f5f3043021c9e5fcf3"));

        let seed = [0x11_u8; SEED_LENGTH];
        let m = key_material(INITIATOR_PAD_TYPE, &[&seed], &SharedSecret::default());
        assert_eq!(
            &m[..],
            &hex!("204584571aa69b0670a80afb07edb2b91f1b12925e24b26ee24a3c81a2c06b70")[..]
        );
        // Zero seeds are left out of the hash.
        let zero = [0_u8; SEED_LENGTH];
        let m2 = key_material(INITIATOR_PAD_TYPE, &[&seed, &zero], &SharedSecret::default());
        assert_eq!(&m[..], &m2[..]);

        let mut pad = derive_padding_key(&SharedSecret::default(), &seed, INITIATOR_PAD_TYPE);
        let mut block = [0_u8; 16];
        pad.apply_keystream(&mut block);
        assert_eq!(block, hex!("13a12d100dbb0107acfb6cdcd856103d"));
    }

    #[test]
    fn transfer_data() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut client = Obfs2State::new(&mut rng, true, SharedSecret::default());
        let mut server = Obfs2State::new(&mut rng, false, SharedSecret::default());
        handshake_pair(&mut client, &mut server, &mut rng);

        let msg1 = b"this is a 54-byte message passed from client to server";
        let msg2 = b"this is a 55-byte message passed from server to client!";
        assert_eq!(transfer(&mut client, &mut server, msg1), &msg1[..]);
        assert_eq!(transfer(&mut server, &mut client, msg2), &msg2[..]);
        assert_eq!(transfer(&mut client, &mut server, msg1), &msg1[..]);
    }

    #[test]
    fn key_symmetry() {
        let seed_a = [0x11_u8; SEED_LENGTH];
        let seed_b = [0x22_u8; SEED_LENGTH];
        for secret in &[SharedSecret::default(), SharedSecret::from_passphrase("x")] {
            for &(i_seed, r_seed) in &[(seed_a, seed_b), (seed_b, seed_a)] {
                let mut init = Obfs2State::from_seed(true, secret.clone(), i_seed);
                let mut resp = Obfs2State::from_seed(false, secret.clone(), r_seed);
                init.responder_seed = r_seed;
                resp.initiator_seed = i_seed;
                init.init_crypto();
                resp.init_crypto();

                let mut i_send = init.send_crypto.take().unwrap();
                let mut r_recv = resp.recv_crypto.take().unwrap();
                assert_eq!(keystream(&mut i_send), keystream(&mut r_recv));
                let mut r_send = resp.send_crypto.take().unwrap();
                let mut i_recv = init.recv_crypto.take().unwrap();
                assert_eq!(keystream(&mut r_send), keystream(&mut i_recv));
                // The two directions must differ.
                let mut i_send = init.derive_key(INITIATOR_SEND_TYPE);
                let mut r_send = resp.derive_key(RESPONDER_SEND_TYPE);
                assert_ne!(keystream(&mut i_send), keystream(&mut r_send));

                // Each side's padding key is the one the other side expects.
                assert_eq!(
                    keystream(&mut init.send_padding_crypto),
                    keystream(resp.recv_padding_crypto.as_mut().unwrap())
                );
                assert_eq!(
                    keystream(&mut resp.send_padding_crypto),
                    keystream(init.recv_padding_crypto.as_mut().unwrap())
                );
            }
        }
    }

    #[test]
    fn secret_changes_keys() {
        let seed = [0x33_u8; SEED_LENGTH];
        let mut plain = Obfs2State::from_seed(true, SharedSecret::default(), seed);
        let mut secret = Obfs2State::from_seed(true, SharedSecret::from_passphrase("s"), seed);
        assert_ne!(
            keystream(&mut plain.send_padding_crypto),
            keystream(&mut secret.send_padding_crypto)
        );
    }

    #[test]
    fn mismatched_secrets_fail() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut client = Obfs2State::new(&mut rng, true, SharedSecret::from_passphrase("a"));
        let mut server = Obfs2State::new(&mut rng, false, SharedSecret::from_passphrase("b"));
        let mut wire = BytesMut::new();
        client.handshake_with_rng(&mut rng, &mut wire);
        let mut junk = BytesMut::new();
        // With overwhelming probability the magic won't decrypt.
        assert!(matches!(
            server.recv(&mut wire, &mut junk),
            Err(Error::BadMagic(_))
        ));
    }

    #[test]
    fn queued_before_key() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut client = Obfs2State::new(&mut rng, true, SharedSecret::default());
        let mut server = Obfs2State::new(&mut rng, false, SharedSecret::default());

        let mut to_server = BytesMut::new();
        let mut to_client = BytesMut::new();
        client.handshake_with_rng(&mut rng, &mut to_server);
        server.handshake_with_rng(&mut rng, &mut to_client);

        // The client has data before it has the server's seed.
        let mut input = BytesMut::from(&b"early bird"[..]);
        let before = to_server.len();
        client.send(&mut input, &mut to_server);
        assert!(input.is_empty());
        assert_eq!(to_server.len(), before);

        // Getting the server's handshake tells us to flush.
        let mut junk = BytesMut::new();
        assert_eq!(
            client.recv(&mut to_client, &mut junk).unwrap(),
            RecvStatus::SendPending
        );
        client.send(&mut BytesMut::new(), &mut to_server);

        let mut plain = BytesMut::new();
        assert_eq!(server.recv(&mut to_server, &mut plain).unwrap(), RecvStatus::Good);
        assert_eq!(&plain[..], b"early bird");

        // Nothing pending any more.
        let mut more = BytesMut::from(&b"!"[..]);
        client.send(&mut more, &mut to_server);
        assert_eq!(server.recv(&mut to_server, &mut plain).unwrap(), RecvStatus::Good);
        assert_eq!(&plain[..], b"early bird!");
    }

    /// Build a handshake frame by hand.
    fn forged_handshake(sender: &mut Obfs2State, magic: u32, plength: u32) -> BytesMut {
        let mut msg = Vec::new();
        msg.write_u32(magic);
        msg.write_u32(plength);
        msg.resize(8 + plength as usize, 0x5a);
        sender.send_padding_crypto.apply_keystream(&mut msg[..]);
        let mut out = BytesMut::new();
        out.extend_from_slice(&sender.local_seed()[..]);
        out.extend_from_slice(&msg);
        out
    }

    #[test]
    fn wrong_magic() {
        let mut rng = StdRng::seed_from_u64(4);
        let mut client = Obfs2State::new(&mut rng, true, SharedSecret::default());
        let mut server = Obfs2State::new(&mut rng, false, SharedSecret::default());
        let mut wire = forged_handshake(&mut client, 0x0D15_EA5E, 100);
        let mut junk = BytesMut::new();
        assert!(matches!(
            server.recv(&mut wire, &mut junk),
            Err(Error::BadMagic(0x0D15_EA5E))
        ));
        assert_eq!(server.state(), HandshakeState::WaitForKey);
        assert!(junk.is_empty());
    }

    #[test]
    fn too_much_padding() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut client = Obfs2State::new(&mut rng, true, SharedSecret::default());
        let mut server = Obfs2State::new(&mut rng, false, SharedSecret::default());
        let mut wire = forged_handshake(&mut client, MAGIC_VALUE, MAX_PADDING + 1);
        let total = wire.len();
        let mut junk = BytesMut::new();
        assert!(matches!(
            server.recv(&mut wire, &mut junk),
            Err(Error::PaddingTooLong(8193))
        ));
        assert_eq!(server.state(), HandshakeState::WaitForKey);
        // No padding was read.
        assert_eq!(wire.len(), total - HEADER_LEN);

        // Exactly the maximum is fine.
        let mut client = Obfs2State::new(&mut rng, true, SharedSecret::default());
        let mut server = Obfs2State::new(&mut rng, false, SharedSecret::default());
        let mut wire = forged_handshake(&mut client, MAGIC_VALUE, MAX_PADDING);
        assert_eq!(server.recv(&mut wire, &mut junk).unwrap(), RecvStatus::Good);
    }

    #[test]
    fn padding_across_reads() {
        let mut rng = StdRng::seed_from_u64(6);
        let mut client = Obfs2State::new(&mut rng, true, SharedSecret::default());
        let mut server = Obfs2State::new(&mut rng, false, SharedSecret::default());
        let mut frame = forged_handshake(&mut client, MAGIC_VALUE, 1000);
        let mut junk = BytesMut::new();

        let mut part = frame.split_to(HEADER_LEN - 1);
        assert_eq!(server.recv(&mut part, &mut junk).unwrap(), RecvStatus::Incomplete);
        assert_eq!(part.len(), HEADER_LEN - 1);
        part.extend_from_slice(&frame.split_to(1 + 500));
        assert_eq!(server.recv(&mut part, &mut junk).unwrap(), RecvStatus::Incomplete);
        assert_eq!(server.state(), HandshakeState::WaitForPadding);
        assert!(part.is_empty());
        part.extend_from_slice(&frame.split());
        assert_eq!(server.recv(&mut part, &mut junk).unwrap(), RecvStatus::Good);
        assert_eq!(server.state(), HandshakeState::Open);
        assert!(junk.is_empty());
    }
}
