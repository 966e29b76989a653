//! CSPRNG access. A thin wrapper so the rest of the crate never reaches for
//! `rand::thread_rng()` directly, keeping the randomness source swappable.

use rand::RngCore;

/// Fill `buf` with cryptographically secure random bytes.
pub fn secure_random(buf: &mut [u8]) {
    rand::rngs::OsRng.fill_bytes(buf);
}

/// Generate a random `u64`, e.g. for packet IDs and probe tokens.
pub fn secure_random_u64() -> u64 {
    let mut b = [0u8; 8];
    secure_random(&mut b);
    u64::from_be_bytes(b)
}
