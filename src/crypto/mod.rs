//! Cryptographic primitives (C1): AES-256, Salsa20/12 + Poly1305,
//! AES-GMAC-SIV, SHA-384/512, Curve25519 DH + Ed25519 signatures, NIST
//! P-384 DH + ECDSA, and the CSPRNG. These are kept behind narrow module
//! boundaries; callers outside `crypto` never see cipher context structs
//! directly, only the `packet::armor` functions that use them.

pub mod aes_gmac_siv;
pub mod c25519;
pub mod p384;
pub mod rng;
pub mod salsa;
pub mod sha;

pub use rng::secure_random;
