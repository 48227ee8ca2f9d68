//! Feed obfs2 streams to a peer in arbitrary pieces.

use bytes::BytesMut;
use obfs_proto::obfs2::{HandshakeState, Obfs2State, SharedSecret};
use obfs_proto::RecvStatus;
use rand::rngs::StdRng;
use rand::SeedableRng;

const MSG: &[u8] = b"this is a 54-byte message passed from client to server";

/// Build an initiator and a responder from a fixed seed, and return
/// them along with everything the initiator sends: its handshake
/// followed by MSG.
fn setup(seed: u64, secret: &str) -> (Obfs2State, Obfs2State, BytesMut) {
    let mut rng = StdRng::seed_from_u64(seed);
    let make_secret = || {
        if secret.is_empty() {
            SharedSecret::default()
        } else {
            SharedSecret::from_passphrase(secret)
        }
    };
    let mut client = Obfs2State::new(&mut rng, true, make_secret());
    let mut server = Obfs2State::new(&mut rng, false, make_secret());

    let mut to_client = BytesMut::new();
    server.handshake_with_rng(&mut rng, &mut to_client);
    let mut junk = BytesMut::new();
    assert_eq!(
        client.recv(&mut to_client, &mut junk).unwrap(),
        RecvStatus::Good
    );

    let mut to_server = BytesMut::new();
    client.handshake_with_rng(&mut rng, &mut to_server);
    client.send(&mut BytesMut::from(MSG), &mut to_server);
    (client, server, to_server)
}

/// Deliver `stream` to `server` in chunks ending at each of `cuts`, and
/// return the plaintext.
fn deliver(server: &mut Obfs2State, stream: &[u8], cuts: &[usize]) -> Vec<u8> {
    let mut inbuf = BytesMut::new();
    let mut plain = BytesMut::new();
    let mut pos = 0;
    for &cut in cuts.iter().chain(std::iter::once(&stream.len())) {
        inbuf.extend_from_slice(&stream[pos..cut]);
        pos = cut;
        let status = server.recv(&mut inbuf, &mut plain).unwrap();
        assert!(matches!(status, RecvStatus::Good | RecvStatus::Incomplete));
    }
    assert!(inbuf.is_empty());
    assert_eq!(server.state(), HandshakeState::Open);
    plain.to_vec()
}

#[test]
fn split_at_every_offset() {
    let (_, _, stream) = setup(1234, "");
    let total = stream.len();
    assert!(total >= 16 + 8 + MSG.len());

    for cut in 0..=total {
        let (_, mut server, stream) = setup(1234, "");
        assert_eq!(stream.len(), total);
        assert_eq!(deliver(&mut server, &stream, &[cut]), MSG);
    }
}

#[test]
fn byte_at_a_time() {
    let (_, mut server, stream) = setup(99, "");
    let cuts: Vec<usize> = (1..stream.len()).collect();
    assert_eq!(deliver(&mut server, &stream, &cuts), MSG);
}

#[test]
fn split_with_secret() {
    // Key stretching is slow, so only try a handful of places.
    let (_, _, stream) = setup(5, "himitsu");
    let total = stream.len();
    for &cut in &[1, 24, 25, total - 1] {
        let (_, mut server, stream) = setup(5, "himitsu");
        assert_eq!(deliver(&mut server, &stream, &[cut]), MSG);
    }
}

#[test]
fn both_directions() {
    let (mut client, mut server, stream) = setup(77, "");
    assert_eq!(deliver(&mut server, &stream, &[10, 30]), MSG);

    let reply = b"this is a 55-byte message passed from server to client!";
    let mut wire = BytesMut::new();
    server.send(&mut BytesMut::from(&reply[..]), &mut wire);
    let mut plain = BytesMut::new();
    let mut tail = wire.split_off(20);
    client.recv(&mut wire, &mut plain).unwrap();
    client.recv(&mut tail, &mut plain).unwrap();
    assert_eq!(&plain[..], &reply[..]);
}
