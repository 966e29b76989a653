//! Curve25519 Diffie-Hellman + Ed25519 signatures, the "type 0" identity
//! primitive pair.

use crate::error::CryptoError;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand_core::OsRng;
use x25519_dalek::{PublicKey as X25519Public, StaticSecret as X25519Secret};

pub const C25519_PUBLIC_KEY_SIZE: usize = 32;
pub const C25519_SECRET_KEY_SIZE: usize = 32;
pub const ED25519_PUBLIC_KEY_SIZE: usize = 32;
pub const ED25519_SECRET_KEY_SIZE: usize = 32;
pub const ED25519_SIGNATURE_SIZE: usize = 64;

/// A Curve25519 DH keypair. The secret bytes are zeroized on drop via
/// `x25519_dalek::StaticSecret`'s own `Zeroize` impl.
pub struct C25519KeyPair {
    secret: X25519Secret,
    public: X25519Public,
}

impl C25519KeyPair {
    pub fn generate() -> Self {
        let secret = X25519Secret::random_from_rng(OsRng);
        let public = X25519Public::from(&secret);
        Self { secret, public }
    }

    pub fn from_secret_bytes(bytes: &[u8; C25519_SECRET_KEY_SIZE]) -> Self {
        let secret = X25519Secret::from(*bytes);
        let public = X25519Public::from(&secret);
        Self { secret, public }
    }

    pub fn public_bytes(&self) -> [u8; C25519_PUBLIC_KEY_SIZE] {
        self.public.to_bytes()
    }

    pub fn secret_bytes(&self) -> [u8; C25519_SECRET_KEY_SIZE] {
        self.secret.to_bytes()
    }

    /// X25519 Diffie-Hellman agreement, producing a 32-byte shared secret.
    pub fn agree(&self, other_public: &[u8; C25519_PUBLIC_KEY_SIZE]) -> [u8; 32] {
        let their_pub = X25519Public::from(*other_public);
        self.secret.diffie_hellman(&their_pub).to_bytes()
    }
}

/// An Ed25519 signing keypair.
pub struct Ed25519KeyPair {
    signing: SigningKey,
}

impl Ed25519KeyPair {
    pub fn generate() -> Self {
        let signing = SigningKey::generate(&mut OsRng);
        Self { signing }
    }

    pub fn from_secret_bytes(bytes: &[u8; ED25519_SECRET_KEY_SIZE]) -> Self {
        Self {
            signing: SigningKey::from_bytes(bytes),
        }
    }

    pub fn public_bytes(&self) -> [u8; ED25519_PUBLIC_KEY_SIZE] {
        self.signing.verifying_key().to_bytes()
    }

    pub fn secret_bytes(&self) -> [u8; ED25519_SECRET_KEY_SIZE] {
        self.signing.to_bytes()
    }

    pub fn sign(&self, msg: &[u8]) -> [u8; ED25519_SIGNATURE_SIZE] {
        self.signing.sign(msg).to_bytes()
    }
}

pub fn ed25519_verify(
    public: &[u8; ED25519_PUBLIC_KEY_SIZE],
    msg: &[u8],
    sig: &[u8; ED25519_SIGNATURE_SIZE],
) -> Result<(), CryptoError> {
    let vk = VerifyingKey::from_bytes(public).map_err(|_| CryptoError::BadSignature)?;
    let signature = Signature::from_bytes(sig);
    vk.verify(msg, &signature).map_err(|_| CryptoError::BadSignature)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dh_agreement_is_symmetric() {
        let a = C25519KeyPair::generate();
        let b = C25519KeyPair::generate();
        assert_eq!(a.agree(&b.public_bytes()), b.agree(&a.public_bytes()));
    }

    #[test]
    fn ed25519_sign_verify() {
        let kp = Ed25519KeyPair::generate();
        let sig = kp.sign(b"msg");
        assert!(ed25519_verify(&kp.public_bytes(), b"msg", &sig).is_ok());
        assert!(ed25519_verify(&kp.public_bytes(), b"tampered", &sig).is_err());
    }
}
