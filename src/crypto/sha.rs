//! SHA-384/512 and HMAC-SHA384 wrappers over the `sha2`/`hmac` crates.

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha384, Sha512};

pub fn sha384(data: &[u8]) -> [u8; 48] {
    let mut hasher = Sha384::new();
    hasher.update(data);
    hasher.finalize().into()
}

pub fn sha384_concat(parts: &[&[u8]]) -> [u8; 48] {
    let mut hasher = Sha384::new();
    for p in parts {
        hasher.update(p);
    }
    hasher.finalize().into()
}

pub fn sha512(data: &[u8]) -> [u8; 64] {
    let mut hasher = Sha512::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// 48-byte HMAC-SHA384, used to extra-authenticate HELLO plaintext during
/// identity exchange (before a session key is established).
pub fn hmac_sha384(key: &[u8], data: &[u8]) -> [u8; 48] {
    let mut mac = Hmac::<Sha384>::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().into()
}

pub fn hmac_sha384_verify(key: &[u8], data: &[u8], tag: &[u8; 48]) -> bool {
    let mut mac = Hmac::<Sha384>::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(data);
    mac.verify_slice(tag).is_ok()
}
