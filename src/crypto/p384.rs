//! NIST P-384 ECDH + ECDSA, the second half of the "type 1" compound
//! identity's key material.

use crate::error::CryptoError;
use p384::ecdsa::signature::hazmat::{PrehashSigner, PrehashVerifier};
use p384::ecdsa::{Signature, SigningKey, VerifyingKey};
use p384::elliptic_curve::sec1::ToEncodedPoint;
use p384::{EncodedPoint, PublicKey, SecretKey};
use rand_core::OsRng;

pub const P384_PUBLIC_KEY_SIZE: usize = 49; // SEC1 compressed point
pub const P384_SECRET_KEY_SIZE: usize = 48;
pub const P384_ECDSA_SIGNATURE_SIZE: usize = 96;

pub struct P384KeyPair {
    secret: SecretKey,
}

impl P384KeyPair {
    pub fn generate() -> Self {
        Self {
            secret: SecretKey::random(&mut OsRng),
        }
    }

    pub fn from_secret_bytes(bytes: &[u8; P384_SECRET_KEY_SIZE]) -> Option<Self> {
        SecretKey::from_slice(bytes).ok().map(|secret| Self { secret })
    }

    pub fn secret_bytes(&self) -> [u8; P384_SECRET_KEY_SIZE] {
        let mut out = [0u8; P384_SECRET_KEY_SIZE];
        out.copy_from_slice(&self.secret.to_bytes());
        out
    }

    pub fn public_bytes(&self) -> [u8; P384_PUBLIC_KEY_SIZE] {
        let point = self.secret.public_key().to_encoded_point(true);
        let mut out = [0u8; P384_PUBLIC_KEY_SIZE];
        out.copy_from_slice(point.as_bytes());
        out
    }

    /// ECDH agreement, producing the raw 48-byte shared x-coordinate.
    pub fn agree(&self, other_public: &[u8; P384_PUBLIC_KEY_SIZE]) -> Result<[u8; 48], CryptoError> {
        let point = EncodedPoint::from_bytes(other_public).map_err(|_| CryptoError::AgreementFailed)?;
        let their_pub = PublicKey::from_encoded_point(&point);
        if their_pub.is_none().into() {
            return Err(CryptoError::AgreementFailed);
        }
        let their_pub = their_pub.unwrap();
        let shared = p384::ecdh::diffie_hellman(
            self.secret.to_nonzero_scalar(),
            their_pub.as_affine(),
        );
        let mut out = [0u8; 48];
        out.copy_from_slice(shared.raw_secret_bytes().as_slice());
        Ok(out)
    }

    /// Signs a digest the caller has already computed (spec: ECDSA runs
    /// directly over SHA-384(msg || c25519_public_key), not over a second
    /// hash of it), via `PrehashSigner` rather than the re-hashing `Signer`.
    pub fn sign(&self, digest: &[u8; 48]) -> [u8; P384_ECDSA_SIGNATURE_SIZE] {
        let signing_key = SigningKey::from(&self.secret);
        let sig: Signature = signing_key.sign_prehash(digest).expect("prehash is fixed-size");
        let mut out = [0u8; P384_ECDSA_SIGNATURE_SIZE];
        out.copy_from_slice(&sig.to_bytes());
        out
    }
}

pub fn p384_ecdsa_verify(
    public: &[u8; P384_PUBLIC_KEY_SIZE],
    digest: &[u8; 48],
    sig: &[u8; P384_ECDSA_SIGNATURE_SIZE],
) -> Result<(), CryptoError> {
    let point = EncodedPoint::from_bytes(public).map_err(|_| CryptoError::BadSignature)?;
    let public_opt = PublicKey::from_encoded_point(&point);
    if public_opt.is_none().into() {
        return Err(CryptoError::BadSignature);
    }
    let verifying_key = VerifyingKey::from(public_opt.unwrap());
    let signature = Signature::from_slice(sig).map_err(|_| CryptoError::BadSignature)?;
    verifying_key
        .verify_prehash(digest, &signature)
        .map_err(|_| CryptoError::BadSignature)
}
