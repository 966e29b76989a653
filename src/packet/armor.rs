//! Armor (send path) and dearmor (receive path), §4.2.1/4.2.2.

use crate::crypto::aes_gmac_siv;
use crate::crypto::salsa::Salsa20;
use crate::error::{CryptoError, DecodeError};
use crate::protocol::{CipherSuite, PacketHeader, HEADER_MAC_INDEX, PACKET_HEADER_SIZE};
use poly1305::universal_hash::KeyInit as Poly1305KeyInit;
use poly1305::Poly1305;
use subtle::ConstantTimeEq;

/// Derives the per-packet key: the session key XORed with the header
/// immutables (packet id, addresses, masked flags byte, 16-bit length).
/// The last 11 bytes of the session key pass through unchanged, so each
/// packet's effective key is a function of its own header.
fn mangle_key(session_key: &[u8; 32], header: &PacketHeader, packet_len: u16) -> [u8; 32] {
    let mut key = *session_key;
    let id_bytes = header.id_bytes();
    for i in 0..8 {
        key[i] ^= id_bytes[i];
    }
    let dest = header.destination.as_bytes();
    let src = header.source.as_bytes();
    for i in 0..5 {
        key[8 + i] ^= dest[i];
        key[13 + i] ^= src[i];
    }
    key[18] ^= header.flags_cipher_hops & crate::protocol::HEADER_FLAGS_MASK_HIDE_HOPS;
    let len_bytes = packet_len.to_be_bytes();
    key[19] ^= len_bytes[0];
    key[20] ^= len_bytes[1];
    key
}

fn poly1305_tag(poly_key: &[u8; 32], data: &[u8]) -> [u8; 16] {
    let key_ga = poly1305::Key::clone_from_slice(poly_key);
    let mac = Poly1305::new(&key_ga);
    mac.compute_unpadded(data).into()
}

/// Armors `packet` (header already written, verb+payload following it) in
/// place under `session_key` with the given cipher suite. `packet` must be
/// at least `PACKET_HEADER_SIZE + 1` bytes. The header's cipher bits are
/// set as a side effect.
pub fn armor(packet: &mut [u8], session_key: &[u8; 32], cipher: CipherSuite) -> Result<(), DecodeError> {
    if packet.len() < PACKET_HEADER_SIZE + 1 {
        return Err(DecodeError::TooShort);
    }
    let mut header = PacketHeader::parse(packet)?;
    header.set_cipher(cipher);
    header.write_into(packet);

    let packet_len = packet.len() as u16;
    let (header_bytes, body) = packet.split_at_mut(PACKET_HEADER_SIZE);

    match cipher {
        CipherSuite::Poly1305None | CipherSuite::Poly1305Salsa2012 => {
            let per_packet_key = mangle_key(session_key, &header, packet_len);
            let mut s20 = Salsa20::new(&per_packet_key, &header.id_bytes());
            // First 32 bytes of the keystream key Poly1305; the body is
            // encrypted with whatever keystream follows, same stream.
            let poly_key_bytes = s20.keystream(32);
            let mut poly_key = [0u8; 32];
            poly_key.copy_from_slice(&poly_key_bytes);

            if cipher == CipherSuite::Poly1305Salsa2012 {
                s20.crypt_in_place(body);
            }

            let tag = poly1305_tag(&poly_key, body);
            header_bytes[HEADER_MAC_INDEX..HEADER_MAC_INDEX + 8].copy_from_slice(&tag[0..8]);
        }
        CipherSuite::AesGmacSiv => {
            let k0 = *session_key;
            let k1 = derive_k1(session_key);
            let mut iv = [0u8; 8];
            iv.copy_from_slice(&header.id_bytes());
            let tag = aes_gmac_siv::encrypt(&k0, &k1, &iv, &header.aad_bytes(), body);
            header_bytes[HEADER_MAC_INDEX..HEADER_MAC_INDEX + 8].copy_from_slice(&tag);
        }
        CipherSuite::TrustedPath => {
            // The MAC field instead carries a caller-supplied trusted-path
            // id; callers using this suite must have already written it
            // into header_bytes[HEADER_MAC_INDEX..] before calling armor,
            // or more commonly call `armor_trusted_path` directly.
        }
    }

    Ok(())
}

/// Armor under the trusted-path cipher suite: no encryption, the MAC field
/// carries `trusted_path_id`. Callers MUST only use this when the
/// destination is configured as a trusted path (never enabled by default).
pub fn armor_trusted_path(packet: &mut [u8], trusted_path_id: u64) -> Result<(), DecodeError> {
    if packet.len() < PACKET_HEADER_SIZE + 1 {
        return Err(DecodeError::TooShort);
    }
    let mut header = PacketHeader::parse(packet)?;
    header.set_cipher(CipherSuite::TrustedPath);
    header.mac = trusted_path_id.to_be_bytes();
    header.write_into(packet);
    Ok(())
}

/// Derives a second AES-256 key for AES-GMAC-SIV's ECB/CTR half from the
/// 32-byte session key, since the session only yields one 32-byte secret
/// but the construction wants two independent keys.
fn derive_k1(session_key: &[u8; 32]) -> [u8; 32] {
    crate::crypto::sha::sha384_concat(&[session_key, b"aes-gmac-siv-k1"])[0..32]
        .try_into()
        .unwrap()
}

/// Dearmors `packet` in place. Rejects (`BadMac`) without modifying the
/// payload region on a cipher suites that authenticate before decrypting;
/// for `Poly1305Salsa2012`/`AesGmacSiv`, the buffer IS modified as part of
/// verification and MUST be discarded by the caller on failure.
pub fn dearmor(packet: &mut [u8], session_key: &[u8; 32], trusted_path_ids: &[u64]) -> Result<(), CryptoError> {
    if packet.len() < PACKET_HEADER_SIZE + 1 {
        return Err(CryptoError::BadMac);
    }
    let header = PacketHeader::parse(packet).map_err(|_| CryptoError::BadMac)?;
    let cipher = header.cipher().map_err(|_| CryptoError::BadMac)?;
    let packet_len = packet.len() as u16;
    let (header_bytes, body) = packet.split_at_mut(PACKET_HEADER_SIZE);

    match cipher {
        CipherSuite::Poly1305None | CipherSuite::Poly1305Salsa2012 => {
            let per_packet_key = mangle_key(session_key, &header, packet_len);
            let mut s20 = Salsa20::new(&per_packet_key, &header.id_bytes());
            let poly_key_bytes = s20.keystream(32);
            let mut poly_key = [0u8; 32];
            poly_key.copy_from_slice(&poly_key_bytes);

            let tag = poly1305_tag(&poly_key, body);
            let received_mac = &header_bytes[HEADER_MAC_INDEX..HEADER_MAC_INDEX + 8];
            if !bool::from(tag[0..8].ct_eq(received_mac)) {
                return Err(CryptoError::BadMac);
            }

            if cipher == CipherSuite::Poly1305Salsa2012 {
                s20.crypt_in_place(body);
            }
            Ok(())
        }
        CipherSuite::AesGmacSiv => {
            let k0 = *session_key;
            let k1 = derive_k1(session_key);
            let mut iv = [0u8; 8];
            iv.copy_from_slice(&header.id_bytes());
            let mut expected_tag = [0u8; 8];
            expected_tag.copy_from_slice(&header_bytes[HEADER_MAC_INDEX..HEADER_MAC_INDEX + 8]);
            if !aes_gmac_siv::decrypt(&k0, &k1, &iv, &header.aad_bytes(), &expected_tag, body) {
                return Err(CryptoError::BadMac);
            }
            Ok(())
        }
        CipherSuite::TrustedPath => {
            let claimed_id = u64::from_be_bytes(header_bytes[HEADER_MAC_INDEX..HEADER_MAC_INDEX + 8].try_into().unwrap());
            if trusted_path_ids.contains(&claimed_id) {
                Ok(())
            } else {
                Err(CryptoError::BadMac)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Address;

    fn build_test_packet(payload: &[u8]) -> Vec<u8> {
        let header = PacketHeader {
            packet_id: 0x0102030405060708,
            destination: Address::from_bytes(&[0xbb; 5]).unwrap(),
            source: Address::from_bytes(&[0xaa; 5]).unwrap(),
            flags_cipher_hops: 0,
            mac: [0u8; 8],
        };
        let mut buf = vec![0u8; PACKET_HEADER_SIZE];
        header.write_into(&mut buf);
        buf.push(0x08); // ECHO verb byte
        buf.extend_from_slice(payload);
        buf
    }

    #[test]
    fn armor_dearmor_round_trip_all_suites() {
        let key = [0u8; 32];
        for cipher in [
            CipherSuite::Poly1305None,
            CipherSuite::Poly1305Salsa2012,
            CipherSuite::AesGmacSiv,
        ] {
            let payload: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
            let original = build_test_packet(&payload);
            let mut armored = original.clone();
            armor(&mut armored, &key, cipher).unwrap();

            // Poly1305None leaves the body in cleartext (only the MAC
            // changes); the other suites encrypt it in place.
            if cipher == CipherSuite::Poly1305None {
                assert_eq!(armored[PACKET_HEADER_SIZE..], original[PACKET_HEADER_SIZE..]);
            } else {
                assert_ne!(armored[PACKET_HEADER_SIZE..], original[PACKET_HEADER_SIZE..]);
            }
            assert_ne!(armored[HEADER_MAC_INDEX..HEADER_MAC_INDEX + 8], original[HEADER_MAC_INDEX..HEADER_MAC_INDEX + 8]);

            // Bit flip in the payload must be rejected.
            let mut tampered = armored.clone();
            tampered[40] ^= 0x01;
            assert!(dearmor(&mut tampered, &key, &[]).is_err());

            // Untampered dearmor must recover the original.
            let mut restored = armored.clone();
            dearmor(&mut restored, &key, &[]).unwrap();
            assert_eq!(&restored[PACKET_HEADER_SIZE..], &original[PACKET_HEADER_SIZE..]);
        }
    }

    #[test]
    fn hops_nibble_mutation_does_not_break_mac() {
        let key = [1u8; 32];
        let payload = vec![7u8; 64];
        let original = build_test_packet(&payload);
        let mut armored = original.clone();
        armor(&mut armored, &key, CipherSuite::Poly1305Salsa2012).unwrap();

        for hop in 0..7u8 {
            let mut mutated = armored.clone();
            let mut header = PacketHeader::parse(&mutated).unwrap();
            header.flags_cipher_hops = (header.flags_cipher_hops & crate::protocol::HEADER_FLAGS_MASK_HIDE_HOPS) | hop;
            header.write_into(&mut mutated);
            assert!(dearmor(&mut mutated, &key, &[]).is_ok());
        }
    }
}
