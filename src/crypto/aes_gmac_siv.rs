//! AES-GMAC-SIV: a two-pass synthetic-IV AEAD construction built from two
//! AES-256 keys, reimplemented from first principles on top of RustCrypto's
//! `aes`, `ctr`, and `ghash` crates rather than binding OpenSSL (the
//! reference implementation's approach — see DESIGN.md for why a pure-Rust
//! construction was chosen instead of porting it block for block).
//!
//! Construction, keyed with `(k0, k1)`, both 256-bit AES keys:
//!
//! 1. First pass: GHASH the associated data followed by the plaintext,
//!    keyed with `H = AES_k0(0^16)`, producing a 128-bit synthetic tag
//!    candidate, masked the way GCM masks its own tag (XOR with
//!    `AES_k0(J0)` for a conventional 96-bit-nonce `J0`).
//! 2. Fold that 128-bit value into a 64-bit half, combine with the 8-byte
//!    IV, and run it through `AES_k1` in ECB mode to produce the final
//!    16-byte SIV tag. The wire format keeps only the low 8 bytes.
//! 3. Second pass: the masked tag (with its top counter bit cleared) seeds
//!    an AES_k1-CTR keystream that encrypts the plaintext.
//!
//! Decryption runs the same two passes using the tag recovered from the
//! wire and fails closed if the recomputed tag does not match.

use aes::cipher::{generic_array::GenericArray, BlockEncrypt, KeyInit};
use aes::Aes256;
use ctr::cipher::{StreamCipher, StreamCipherSeek};
use ghash::universal_hash::UniversalHash;
use ghash::GHash;
use subtle::ConstantTimeEq;

pub const AES_GMAC_SIV_KEY_SIZE: usize = 32;
pub const AES_GMAC_SIV_TAG_SIZE: usize = 8;

type Aes256Ctr = ctr::Ctr128BE<Aes256>;

fn ghash_pad_update(hash: &mut GHash, data: &[u8]) {
    let mut chunks = data.chunks_exact(16);
    for c in &mut chunks {
        hash.update(&[*GenericArray::from_slice(c)]);
    }
    let rem = chunks.remainder();
    if !rem.is_empty() {
        let mut block = [0u8; 16];
        block[..rem.len()].copy_from_slice(rem);
        hash.update(&[*GenericArray::from_slice(&block)]);
    }
}

fn aes_encrypt_block(cipher: &Aes256, block: &mut [u8; 16]) {
    let mut ga = *GenericArray::from_slice(block);
    cipher.encrypt_block(&mut ga);
    block.copy_from_slice(ga.as_slice());
}

/// Computes the masked GHASH-based synthetic tag over `aad` and
/// `plaintext`, given the two AES-256 keys and the 8-byte packet IV.
fn synthetic_tag(k0: &Aes256, k1: &Aes256, iv: &[u8; 8], aad: &[u8], plaintext: &[u8]) -> [u8; 16] {
    let mut h_block = [0u8; 16];
    aes_encrypt_block(k0, &mut h_block);
    let h = GenericArray::clone_from_slice(&h_block);
    let mut ghash = GHash::new(&h);

    ghash_pad_update(&mut ghash, aad);
    ghash_pad_update(&mut ghash, plaintext);

    let mut len_block = [0u8; 16];
    len_block[0..8].copy_from_slice(&((aad.len() as u64) * 8).to_be_bytes());
    len_block[8..16].copy_from_slice(&((plaintext.len() as u64) * 8).to_be_bytes());
    ghash.update(&[*GenericArray::from_slice(&len_block)]);

    let s: [u8; 16] = ghash.finalize().into();

    // Mask with AES_k0(J0) for a conventional 96-bit nonce J0 = iv || 0 || 1.
    let mut j0 = [0u8; 16];
    j0[0..8].copy_from_slice(iv);
    j0[15] = 1;
    aes_encrypt_block(k0, &mut j0);

    let mut masked = [0u8; 16];
    for i in 0..16 {
        masked[i] = s[i] ^ j0[i];
    }

    // Fold into a 64-bit half, combine with the IV, then ECB-encrypt under k1.
    let mut tag = [0u8; 16];
    tag[0..8].copy_from_slice(iv);
    for i in 0..8 {
        tag[8 + i] = masked[i] ^ masked[8 + i];
    }
    aes_encrypt_block(k1, &mut tag);
    tag
}

/// Builds the second-pass CTR IV from the 8-byte packet IV and the 8-byte
/// wire tag, clearing the top bit of the counter half so the 64-bit block
/// counter can never wrap into the tag's own bits.
fn ctr_iv_from(iv: &[u8; 8], wire_tag: &[u8; AES_GMAC_SIV_TAG_SIZE]) -> [u8; 16] {
    let mut ctr_iv = [0u8; 16];
    ctr_iv[0..8].copy_from_slice(iv);
    ctr_iv[8..16].copy_from_slice(wire_tag);
    ctr_iv[12] &= 0x7f;
    ctr_iv
}

/// Encrypts `plaintext` in place and returns the 8-byte wire tag.
pub fn encrypt(
    k0: &[u8; AES_GMAC_SIV_KEY_SIZE],
    k1: &[u8; AES_GMAC_SIV_KEY_SIZE],
    iv: &[u8; 8],
    aad: &[u8],
    plaintext: &mut [u8],
) -> [u8; AES_GMAC_SIV_TAG_SIZE] {
    let cipher_k0 = Aes256::new(GenericArray::from_slice(k0));
    let cipher_k1 = Aes256::new(GenericArray::from_slice(k1));

    let full_tag = synthetic_tag(&cipher_k0, &cipher_k1, iv, aad, plaintext);
    let mut wire_tag = [0u8; AES_GMAC_SIV_TAG_SIZE];
    wire_tag.copy_from_slice(&full_tag[0..AES_GMAC_SIV_TAG_SIZE]);

    let ctr_iv = ctr_iv_from(iv, &wire_tag);
    let mut ctr = Aes256Ctr::new(GenericArray::from_slice(k1), GenericArray::from_slice(&ctr_iv));
    ctr.seek(0u64);
    ctr.apply_keystream(plaintext);

    wire_tag
}

/// Decrypts `ciphertext` in place iff the recomputed tag matches
/// `expected_tag`. Returns `false` on mismatch; callers MUST discard the
/// buffer rather than trust it when this returns `false`.
pub fn decrypt(
    k0: &[u8; AES_GMAC_SIV_KEY_SIZE],
    k1: &[u8; AES_GMAC_SIV_KEY_SIZE],
    iv: &[u8; 8],
    aad: &[u8],
    expected_tag: &[u8; AES_GMAC_SIV_TAG_SIZE],
    ciphertext: &mut [u8],
) -> bool {
    let cipher_k1 = Aes256::new(GenericArray::from_slice(k1));

    let ctr_iv = ctr_iv_from(iv, expected_tag);
    let mut ctr = Aes256Ctr::new(GenericArray::from_slice(k1), GenericArray::from_slice(&ctr_iv));
    ctr.seek(0u64);
    ctr.apply_keystream(ciphertext);

    let cipher_k0 = Aes256::new(GenericArray::from_slice(k0));
    let recomputed = synthetic_tag(&cipher_k0, &cipher_k1, iv, aad, ciphertext);
    recomputed[0..AES_GMAC_SIV_TAG_SIZE].ct_eq(&expected_tag[..]).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let k0 = [1u8; 32];
        let k1 = [2u8; 32];
        let iv = [9u8; 8];
        let aad = [0u8; 18];
        let mut plaintext = b"the packet payload goes here, padded out a bit".to_vec();
        let original = plaintext.clone();

        let tag = encrypt(&k0, &k1, &iv, &aad, &mut plaintext);
        assert_ne!(plaintext, original);

        let ok = decrypt(&k0, &k1, &iv, &aad, &tag, &mut plaintext);
        assert!(ok);
        assert_eq!(plaintext, original);
    }

    #[test]
    fn tampered_tag_rejected() {
        let k0 = [5u8; 32];
        let k1 = [6u8; 32];
        let iv = [1u8; 8];
        let aad = [0u8; 18];
        let mut plaintext = b"some payload bytes".to_vec();
        let mut tag = encrypt(&k0, &k1, &iv, &aad, &mut plaintext);
        tag[0] ^= 1;
        assert!(!decrypt(&k0, &k1, &iv, &aad, &tag, &mut plaintext));
    }
}
