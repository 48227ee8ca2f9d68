use hex_literal::hex;
use obfs_llcrypto as ll;

use ll::cipher::aes::aes128_ctr;
use ll::cipher::StreamCipher;
use ll::d::{Digest, Sha256};

#[test]
fn sha256_vector() {
    let d = Sha256::digest(b"abc");
    assert_eq!(
        &d[..],
        &hex!("ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad")[..]
    );
}

#[test]
fn aes_ctr_vector() {
    // NIST SP 800-38A, F.5.1 (CTR-AES128.Encrypt)
    let key = hex!("2b7e151628aed2a6abf7158809cf4f3c");
    let iv = hex!("f0f1f2f3f4f5f6f7f8f9fafbfcfdfeff");
    let mut data = hex!("6bc1bee22e409f96e93d7e117393172aae2d8a571e03ac9c9eb76fac45af8e51");
    let mut c = aes128_ctr(&key, &iv);
    c.apply_keystream(&mut data[..]);
    assert_eq!(
        data,
        hex!("874d6191b620e3261bef6864990db6ce9806f66b7970fdff8617187bb9fffdff")
    );
}

#[test]
fn aes_ctr_is_own_inverse_across_chunks() {
    let key = [7_u8; 16];
    let iv = [9_u8; 16];
    let plain: Vec<u8> = (0..100_u8).collect();

    let mut enc = plain.clone();
    aes128_ctr(&key, &iv).apply_keystream(&mut enc[..]);
    assert_ne!(enc, plain);

    // Decrypt in uneven pieces; the keystream position must carry over.
    let mut dec = aes128_ctr(&key, &iv);
    let (a, rest) = enc.split_at_mut(3);
    let (b, c) = rest.split_at_mut(40);
    dec.apply_keystream(a);
    dec.apply_keystream(b);
    dec.apply_keystream(c);
    assert_eq!(enc, plain);
}
