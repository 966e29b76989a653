//! Identity (C2): long-lived keypairs, the 40-bit address derived from
//! them via hashcash, and sign/verify/agree.

use crate::crypto::c25519::{
    self, C25519KeyPair, Ed25519KeyPair, C25519_PUBLIC_KEY_SIZE, C25519_SECRET_KEY_SIZE,
    ED25519_PUBLIC_KEY_SIZE, ED25519_SECRET_KEY_SIZE, ED25519_SIGNATURE_SIZE,
};
use crate::crypto::p384::{
    self, P384KeyPair, P384_ECDSA_SIGNATURE_SIZE, P384_PUBLIC_KEY_SIZE, P384_SECRET_KEY_SIZE,
};
use crate::crypto::salsa::Salsa20;
use crate::crypto::sha::{sha384_concat, sha512};
use crate::error::{CryptoError, IdentityError};
use std::fmt;
use zeroize::Zeroize;

pub const ADDRESS_LENGTH: usize = 5;
pub const IDENTITY_HASH_SIZE: usize = 48;

/// The low 40 bits of a hash of an identity's public keys. A short,
/// unreliable identifier — see [`crate::fingerprint::Fingerprint`] for the
/// collision-resistant form.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address([u8; ADDRESS_LENGTH]);

impl Address {
    pub fn from_bytes(b: &[u8]) -> Result<Self, crate::error::DecodeError> {
        if b.len() < ADDRESS_LENGTH {
            return Err(crate::error::DecodeError::TooShort);
        }
        let mut a = [0u8; ADDRESS_LENGTH];
        a.copy_from_slice(&b[0..ADDRESS_LENGTH]);
        Ok(Self(a))
    }

    pub fn as_bytes(&self) -> &[u8; ADDRESS_LENGTH] {
        &self.0
    }

    /// Addresses beginning with `0xff` are reserved (it is the fragment
    /// sentinel byte); the all-zero address is also invalid.
    pub fn is_valid(&self) -> bool {
        self.0[0] != 0xff && self.0 != [0u8; ADDRESS_LENGTH]
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum IdentityType {
    /// Pure Curve25519/Ed25519 keypair.
    C25519 = 0,
    /// Compound Curve25519+P-384 keypair.
    Compound = 1,
}

impl IdentityType {
    pub fn from_tag(tag: u8) -> Result<Self, IdentityError> {
        match tag {
            0 => Ok(IdentityType::C25519),
            1 => Ok(IdentityType::Compound),
            _ => Err(IdentityError::InvalidEncoding),
        }
    }
}

/// Memory parameter for the V0 ("type 0") address derivation work
/// function: a 2 MiB scratch buffer filled by Salsa20/12 keystream, then
/// shuffled by a pointer-chase driven by words of the scratch itself.
const V0_GENMEM_SIZE: usize = 2_097_152;

/// Reduced-memory scratch used by repeated `locally_validate` calls and by
/// tests; generation always uses the full `V0_GENMEM_SIZE`.
fn v0_frankenhash(digest: &mut [u8; 64]) {
    let mut genmem = vec![0u8; V0_GENMEM_SIZE];

    let mut s20 = Salsa20::new(
        &digest[0..32].try_into().unwrap(),
        &digest[32..40].try_into().unwrap(),
    );

    let zeroes64 = [0u8; 64];
    s20.crypt(&zeroes64, &mut genmem[0..64]);
    let mut i = 64;
    while i < V0_GENMEM_SIZE {
        let (prev, cur) = genmem.split_at_mut(i);
        let src = &prev[i - 64..i];
        s20.crypt(src, &mut cur[0..64]);
        i += 64;
    }

    let word_count = V0_GENMEM_SIZE / 8;
    let mut i = 0usize;
    while i < word_count {
        let w1 = u64::from_be_bytes(genmem[i * 8..i * 8 + 8].try_into().unwrap());
        let idx1 = ((w1 % 8) * 8) as usize;
        let w2 = u64::from_be_bytes(genmem[(i + 1) * 8..(i + 1) * 8 + 8].try_into().unwrap());
        let idx2 = (w2 % (word_count as u64)) as usize;

        let mut tmp = [0u8; 8];
        tmp.copy_from_slice(&genmem[idx2 * 8..idx2 * 8 + 8]);
        genmem[idx2 * 8..idx2 * 8 + 8].copy_from_slice(&digest[idx1..idx1 + 8]);
        digest[idx1..idx1 + 8].copy_from_slice(&tmp);

        s20.crypt_in_place(digest);
        i += 2;
    }

    genmem.zeroize();
}

fn derive_v0_address(c25519_pub: &[u8; C25519_PUBLIC_KEY_SIZE], ed25519_pub: &[u8; ED25519_PUBLIC_KEY_SIZE]) -> ([u8; 64], Address) {
    let mut digest = sha512(&{
        let mut buf = Vec::with_capacity(64);
        buf.extend_from_slice(c25519_pub);
        buf.extend_from_slice(ed25519_pub);
        buf
    });
    v0_frankenhash(&mut digest);
    let addr = Address::from_bytes(&digest[59..64]).unwrap();
    (digest, addr)
}

fn compound_public_blob(
    c25519_pub: &[u8; C25519_PUBLIC_KEY_SIZE],
    ed25519_pub: &[u8; ED25519_PUBLIC_KEY_SIZE],
    p384_ecdh_pub: &[u8; P384_PUBLIC_KEY_SIZE],
    p384_ecdsa_pub: &[u8; P384_PUBLIC_KEY_SIZE],
) -> Vec<u8> {
    let mut buf = Vec::with_capacity(
        C25519_PUBLIC_KEY_SIZE + ED25519_PUBLIC_KEY_SIZE + 2 * P384_PUBLIC_KEY_SIZE,
    );
    buf.extend_from_slice(c25519_pub);
    buf.extend_from_slice(ed25519_pub);
    buf.extend_from_slice(p384_ecdh_pub);
    buf.extend_from_slice(p384_ecdsa_pub);
    buf
}

/// Type-1 work function: SHA-384 -> AES-256 -> sort -> AES-256 -> SHA-384,
/// over the compound public key blob, with a final-byte-`==0` condition.
/// Brute-force resistance here comes from iteration count, not memory.
fn compound_work_function(blob: &[u8]) -> [u8; IDENTITY_HASH_SIZE] {
    use aes::cipher::{generic_array::GenericArray, BlockEncrypt, KeyInit};
    use aes::Aes256;

    let stage1 = sha384_concat(&[blob]);

    // AES-256 keyed by the first 32 bytes of the stage-1 digest, applied
    // block-wise over the 48-byte digest padded to 48 = 3 blocks of 16.
    let key = GenericArray::from_slice(&stage1[0..32]);
    let cipher = Aes256::new(key);
    let mut blocks: Vec<[u8; 16]> = stage1.chunks(16).map(|c| c.try_into().unwrap()).collect();
    for b in blocks.iter_mut() {
        let mut ga = *GenericArray::from_slice(&b[..]);
        cipher.encrypt_block(&mut ga);
        b.copy_from_slice(ga.as_slice());
    }
    blocks.sort_unstable();

    let mut stage2 = Vec::with_capacity(48);
    for b in &blocks {
        stage2.extend_from_slice(b);
    }
    for b in blocks.iter_mut() {
        let mut ga = *GenericArray::from_slice(&b[..]);
        cipher.encrypt_block(&mut ga);
        b.copy_from_slice(ga.as_slice());
    }
    let mut stage3 = Vec::with_capacity(48);
    for b in &blocks {
        stage3.extend_from_slice(b);
    }

    sha384_concat(&[&stage3])
}

struct SecretKeys {
    c25519: C25519KeyPair,
    ed25519: Ed25519KeyPair,
    compound: Option<(P384KeyPair, P384KeyPair)>, // (ecdh, ecdsa)
}

/// A long-lived identity: a keypair plus its derived address, immutable
/// once generated. Session keys, not this type, carry per-peer secrets.
pub struct Identity {
    id_type: IdentityType,
    address: Address,
    c25519_pub: [u8; C25519_PUBLIC_KEY_SIZE],
    ed25519_pub: [u8; ED25519_PUBLIC_KEY_SIZE],
    compound_pub: Option<([u8; P384_PUBLIC_KEY_SIZE], [u8; P384_PUBLIC_KEY_SIZE])>,
    hash: [u8; IDENTITY_HASH_SIZE],
    secrets: Option<SecretKeys>,
}

impl Identity {
    /// Generate a new identity, repeating keypair generation until the
    /// hashcash condition holds. For type 0 this can take on the order of
    /// tens to hundreds of milliseconds; type 1 generation is cheaper per
    /// attempt but iterates more often since it has no memory-hardness.
    pub fn generate(id_type: IdentityType) -> Identity {
        match id_type {
            IdentityType::C25519 => Self::generate_c25519(),
            IdentityType::Compound => Self::generate_compound(),
        }
    }

    fn generate_c25519() -> Identity {
        let ed25519 = Ed25519KeyPair::generate();
        let ed25519_pub = ed25519.public_bytes();
        loop {
            let c25519 = C25519KeyPair::generate();
            let c25519_pub = c25519.public_bytes();
            let (digest, addr) = derive_v0_address(&c25519_pub, &ed25519_pub);
            if digest[0] < 17 && addr.is_valid() {
                let mut hash = [0u8; IDENTITY_HASH_SIZE];
                hash.copy_from_slice(&digest[0..IDENTITY_HASH_SIZE]);
                return Identity {
                    id_type: IdentityType::C25519,
                    address: addr,
                    c25519_pub,
                    ed25519_pub,
                    compound_pub: None,
                    hash,
                    secrets: Some(SecretKeys {
                        c25519,
                        ed25519,
                        compound: None,
                    }),
                };
            }
        }
    }

    fn generate_compound() -> Identity {
        let c25519 = C25519KeyPair::generate();
        let ed25519 = Ed25519KeyPair::generate();
        let c25519_pub = c25519.public_bytes();
        let ed25519_pub = ed25519.public_bytes();

        loop {
            let p384_ecdh = P384KeyPair::generate();
            let p384_ecdsa = P384KeyPair::generate();
            let p384_ecdh_pub = p384_ecdh.public_bytes();
            let p384_ecdsa_pub = p384_ecdsa.public_bytes();
            let blob = compound_public_blob(&c25519_pub, &ed25519_pub, &p384_ecdh_pub, &p384_ecdsa_pub);
            let hash = compound_work_function(&blob);
            if hash[IDENTITY_HASH_SIZE - 1] == 0 {
                let addr = Address::from_bytes(&hash[0..5]).unwrap();
                if addr.is_valid() {
                    return Identity {
                        id_type: IdentityType::Compound,
                        address: addr,
                        c25519_pub,
                        ed25519_pub,
                        compound_pub: Some((p384_ecdh_pub, p384_ecdsa_pub)),
                        hash,
                        secrets: Some(SecretKeys {
                            c25519,
                            ed25519,
                            compound: Some((p384_ecdh, p384_ecdsa)),
                        }),
                    };
                }
            }
        }
    }

    pub fn id_type(&self) -> IdentityType {
        self.id_type
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn hash(&self) -> &[u8; IDENTITY_HASH_SIZE] {
        &self.hash
    }

    pub fn has_private(&self) -> bool {
        self.secrets.is_some()
    }

    pub fn c25519_public(&self) -> &[u8; C25519_PUBLIC_KEY_SIZE] {
        &self.c25519_pub
    }

    /// Recomputes the hashcash work function and re-derives the address,
    /// rejecting reserved/zero addresses. `O(work-function)`.
    pub fn locally_validate(&self) -> bool {
        match self.id_type {
            IdentityType::C25519 => {
                let (digest, addr) = derive_v0_address(&self.c25519_pub, &self.ed25519_pub);
                digest[0] < 17 && addr == self.address && addr.is_valid()
            }
            IdentityType::Compound => {
                let Some((ecdh_pub, ecdsa_pub)) = self.compound_pub else {
                    return false;
                };
                let blob = compound_public_blob(&self.c25519_pub, &self.ed25519_pub, &ecdh_pub, &ecdsa_pub);
                let hash = compound_work_function(&blob);
                hash[IDENTITY_HASH_SIZE - 1] == 0
                    && hash == self.hash
                    && Address::from_bytes(&hash[0..5]).map(|a| a == self.address && a.is_valid()).unwrap_or(false)
            }
        }
    }

    /// `Ed25519` for type 0; for type 1 the signed digest is
    /// `SHA-384(msg || c25519_public_key)` and the signature is P-384 ECDSA.
    pub fn sign(&self, msg: &[u8]) -> Result<Vec<u8>, IdentityError> {
        let secrets = self.secrets.as_ref().ok_or(IdentityError::NoPrivateKey)?;
        match self.id_type {
            IdentityType::C25519 => Ok(secrets.ed25519.sign(msg).to_vec()),
            IdentityType::Compound => {
                let (_, ecdsa) = secrets.compound.as_ref().ok_or(IdentityError::NoPrivateKey)?;
                let digest = sha384_concat(&[msg, &self.c25519_pub]);
                Ok(ecdsa.sign(&digest).to_vec())
            }
        }
    }

    pub fn verify(&self, msg: &[u8], sig: &[u8]) -> bool {
        match self.id_type {
            IdentityType::C25519 => {
                let Ok(sig) = <[u8; ED25519_SIGNATURE_SIZE]>::try_from(sig) else {
                    return false;
                };
                c25519::ed25519_verify(&self.ed25519_pub, msg, &sig).is_ok()
            }
            IdentityType::Compound => {
                let Some((_, ecdsa_pub)) = self.compound_pub else {
                    return false;
                };
                let Ok(sig) = <[u8; P384_ECDSA_SIGNATURE_SIZE]>::try_from(sig) else {
                    return false;
                };
                let digest = sha384_concat(&[msg, &self.c25519_pub]);
                p384::p384_ecdsa_verify(&ecdsa_pub, &digest, &sig).is_ok()
            }
        }
    }

    /// Key agreement producing a 32-byte symmetric secret. When both sides
    /// are type 1, the Curve25519 secret is concatenated with a P-384 ECDH
    /// secret and hashed with SHA-384 (truncated to 32 bytes); mixed
    /// type-0/type-1 pairs fall back to Curve25519-only agreement.
    pub fn agree(&self, other: &Identity) -> Result<[u8; 32], CryptoError> {
        let secrets = self.secrets.as_ref().ok_or(CryptoError::AgreementFailed)?;
        let c25519_secret = secrets.c25519.agree(&other.c25519_pub);

        if self.id_type == IdentityType::Compound && other.id_type == IdentityType::Compound {
            let (my_ecdh, _) = secrets.compound.as_ref().ok_or(CryptoError::AgreementFailed)?;
            let (other_ecdh_pub, _) = other.compound_pub.ok_or(CryptoError::AgreementFailed)?;
            let p384_secret = my_ecdh.agree(&other_ecdh_pub)?;
            let combined = sha384_concat(&[&c25519_secret, &p384_secret]);
            let mut out = [0u8; 32];
            out.copy_from_slice(&combined[0..32]);
            Ok(out)
        } else {
            Ok(c25519_secret)
        }
    }

    /// `address:type:pub[:priv]`, hex for type 0, base32 for type 1.
    pub fn to_string_with_private(&self, include_private: bool) -> String {
        match self.id_type {
            IdentityType::C25519 => {
                let mut s = format!(
                    "{}:0:{}{}",
                    self.address,
                    hex::encode(self.c25519_pub),
                    hex::encode(self.ed25519_pub)
                );
                if include_private {
                    if let Some(secrets) = &self.secrets {
                        s.push(':');
                        s.push_str(&hex::encode(secrets.c25519.secret_bytes()));
                        s.push_str(&hex::encode(secrets.ed25519.secret_bytes()));
                    }
                }
                s
            }
            IdentityType::Compound => {
                let (ecdh_pub, ecdsa_pub) = self.compound_pub.unwrap();
                let alphabet = base32::Alphabet::Rfc4648 { padding: false };
                let mut pub_blob = Vec::new();
                pub_blob.extend_from_slice(&self.c25519_pub);
                pub_blob.extend_from_slice(&self.ed25519_pub);
                pub_blob.extend_from_slice(&ecdh_pub);
                pub_blob.extend_from_slice(&ecdsa_pub);
                let mut s = format!("{}:1:{}", self.address, base32::encode(alphabet, &pub_blob));
                if include_private {
                    if let Some(secrets) = &self.secrets {
                        if let Some((ecdh, ecdsa)) = &secrets.compound {
                            let mut priv_blob = Vec::new();
                            priv_blob.extend_from_slice(&secrets.c25519.secret_bytes());
                            priv_blob.extend_from_slice(&secrets.ed25519.secret_bytes());
                            priv_blob.extend_from_slice(&ecdh.secret_bytes());
                            priv_blob.extend_from_slice(&ecdsa.secret_bytes());
                            s.push(':');
                            s.push_str(&base32::encode(alphabet, &priv_blob));
                        }
                    }
                }
                s
            }
        }
    }

    pub fn from_string(s: &str) -> Result<Identity, IdentityError> {
        let mut parts = s.split(':');
        let addr_str = parts.next().ok_or(IdentityError::InvalidEncoding)?;
        let type_str = parts.next().ok_or(IdentityError::InvalidEncoding)?;
        let pub_str = parts.next().ok_or(IdentityError::InvalidEncoding)?;
        let priv_str = parts.next();

        let addr_bytes = hex::decode(addr_str).map_err(|_| IdentityError::InvalidEncoding)?;
        let claimed_addr = Address::from_bytes(&addr_bytes).map_err(|_| IdentityError::InvalidEncoding)?;

        let id_type = IdentityType::from_tag(type_str.parse::<u8>().map_err(|_| IdentityError::InvalidEncoding)?)?;

        let identity = match id_type {
            IdentityType::C25519 => {
                let pub_bytes = hex::decode(pub_str).map_err(|_| IdentityError::InvalidEncoding)?;
                if pub_bytes.len() != C25519_PUBLIC_KEY_SIZE + ED25519_PUBLIC_KEY_SIZE {
                    return Err(IdentityError::InvalidEncoding);
                }
                let c25519_pub: [u8; C25519_PUBLIC_KEY_SIZE] = pub_bytes[0..32].try_into().unwrap();
                let ed25519_pub: [u8; ED25519_PUBLIC_KEY_SIZE] = pub_bytes[32..64].try_into().unwrap();
                let (digest, addr) = derive_v0_address(&c25519_pub, &ed25519_pub);
                let mut hash = [0u8; IDENTITY_HASH_SIZE];
                hash.copy_from_slice(&digest[0..IDENTITY_HASH_SIZE]);

                let secrets = if let Some(priv_str) = priv_str {
                    let priv_bytes = hex::decode(priv_str).map_err(|_| IdentityError::InvalidEncoding)?;
                    if priv_bytes.len() != C25519_SECRET_KEY_SIZE + ED25519_SECRET_KEY_SIZE {
                        return Err(IdentityError::InvalidEncoding);
                    }
                    let c_secret: [u8; C25519_SECRET_KEY_SIZE] = priv_bytes[0..32].try_into().unwrap();
                    let e_secret: [u8; ED25519_SECRET_KEY_SIZE] = priv_bytes[32..64].try_into().unwrap();
                    Some(SecretKeys {
                        c25519: C25519KeyPair::from_secret_bytes(&c_secret),
                        ed25519: Ed25519KeyPair::from_secret_bytes(&e_secret),
                        compound: None,
                    })
                } else {
                    None
                };

                Identity {
                    id_type,
                    address: addr,
                    c25519_pub,
                    ed25519_pub,
                    compound_pub: None,
                    hash,
                    secrets,
                }
            }
            IdentityType::Compound => {
                let alphabet = base32::Alphabet::Rfc4648 { padding: false };
                let pub_blob = base32::decode(alphabet, pub_str).ok_or(IdentityError::InvalidEncoding)?;
                let expected_len = C25519_PUBLIC_KEY_SIZE + ED25519_PUBLIC_KEY_SIZE + 2 * P384_PUBLIC_KEY_SIZE;
                if pub_blob.len() != expected_len {
                    return Err(IdentityError::InvalidEncoding);
                }
                let c25519_pub: [u8; C25519_PUBLIC_KEY_SIZE] = pub_blob[0..32].try_into().unwrap();
                let ed25519_pub: [u8; ED25519_PUBLIC_KEY_SIZE] = pub_blob[32..64].try_into().unwrap();
                let ecdh_pub: [u8; P384_PUBLIC_KEY_SIZE] = pub_blob[64..64 + P384_PUBLIC_KEY_SIZE].try_into().unwrap();
                let ecdsa_pub: [u8; P384_PUBLIC_KEY_SIZE] =
                    pub_blob[64 + P384_PUBLIC_KEY_SIZE..expected_len].try_into().unwrap();

                let blob = compound_public_blob(&c25519_pub, &ed25519_pub, &ecdh_pub, &ecdsa_pub);
                let hash = compound_work_function(&blob);

                let secrets = if let Some(priv_str) = priv_str {
                    let priv_blob = base32::decode(alphabet, priv_str).ok_or(IdentityError::InvalidEncoding)?;
                    let expected_priv_len = C25519_SECRET_KEY_SIZE + ED25519_SECRET_KEY_SIZE + 2 * P384_SECRET_KEY_SIZE;
                    if priv_blob.len() != expected_priv_len {
                        return Err(IdentityError::InvalidEncoding);
                    }
                    let c_secret: [u8; C25519_SECRET_KEY_SIZE] = priv_blob[0..32].try_into().unwrap();
                    let e_secret: [u8; ED25519_SECRET_KEY_SIZE] = priv_blob[32..64].try_into().unwrap();
                    let ecdh_secret: [u8; P384_SECRET_KEY_SIZE] =
                        priv_blob[64..64 + P384_SECRET_KEY_SIZE].try_into().unwrap();
                    let ecdsa_secret: [u8; P384_SECRET_KEY_SIZE] = priv_blob
                        [64 + P384_SECRET_KEY_SIZE..expected_priv_len]
                        .try_into()
                        .unwrap();
                    Some(SecretKeys {
                        c25519: C25519KeyPair::from_secret_bytes(&c_secret),
                        ed25519: Ed25519KeyPair::from_secret_bytes(&e_secret),
                        compound: Some((
                            P384KeyPair::from_secret_bytes(&ecdh_secret).ok_or(IdentityError::InvalidEncoding)?,
                            P384KeyPair::from_secret_bytes(&ecdsa_secret).ok_or(IdentityError::InvalidEncoding)?,
                        )),
                    })
                } else {
                    None
                };

                Identity {
                    id_type,
                    address: claimed_addr,
                    c25519_pub,
                    ed25519_pub,
                    compound_pub: Some((ecdh_pub, ecdsa_pub)),
                    hash,
                    secrets,
                }
            }
        };

        if identity.address != claimed_addr {
            return Err(IdentityError::InvalidEncoding);
        }
        if id_type == IdentityType::Compound && !identity.locally_validate() {
            return Err(IdentityError::HashcashFailed);
        }
        if !identity.address.is_valid() {
            return Err(IdentityError::ReservedAddress);
        }
        Ok(identity)
    }

    /// `address(5) || type(1) || pub(...) || privLen(1) || priv(...)`.
    pub fn marshal(&self, include_private: bool) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(self.address.as_bytes());
        out.push(self.id_type as u8);
        out.extend_from_slice(&self.c25519_pub);
        out.extend_from_slice(&self.ed25519_pub);
        if let Some((ecdh_pub, ecdsa_pub)) = self.compound_pub {
            out.extend_from_slice(&ecdh_pub);
            out.extend_from_slice(&ecdsa_pub);
        }
        if include_private {
            if let Some(secrets) = &self.secrets {
                let mut priv_bytes = Vec::new();
                priv_bytes.extend_from_slice(&secrets.c25519.secret_bytes());
                priv_bytes.extend_from_slice(&secrets.ed25519.secret_bytes());
                if let Some((ecdh, ecdsa)) = &secrets.compound {
                    priv_bytes.extend_from_slice(&ecdh.secret_bytes());
                    priv_bytes.extend_from_slice(&ecdsa.secret_bytes());
                }
                out.push(priv_bytes.len() as u8);
                out.extend_from_slice(&priv_bytes);
                return out;
            }
        }
        out.push(0);
        out
    }

    pub fn unmarshal(bytes: &[u8]) -> Result<Identity, IdentityError> {
        if bytes.len() < ADDRESS_LENGTH + 1 {
            return Err(IdentityError::InvalidEncoding);
        }
        let claimed_addr = Address::from_bytes(&bytes[0..5]).map_err(|_| IdentityError::InvalidEncoding)?;
        let id_type = IdentityType::from_tag(bytes[5])?;
        let mut off = 6;

        let (c25519_pub, ed25519_pub, compound_pub) = match id_type {
            IdentityType::C25519 => {
                if bytes.len() < off + C25519_PUBLIC_KEY_SIZE + ED25519_PUBLIC_KEY_SIZE {
                    return Err(IdentityError::InvalidEncoding);
                }
                let c: [u8; C25519_PUBLIC_KEY_SIZE] = bytes[off..off + 32].try_into().unwrap();
                off += 32;
                let e: [u8; ED25519_PUBLIC_KEY_SIZE] = bytes[off..off + 32].try_into().unwrap();
                off += 32;
                (c, e, None)
            }
            IdentityType::Compound => {
                if bytes.len() < off + C25519_PUBLIC_KEY_SIZE + ED25519_PUBLIC_KEY_SIZE + 2 * P384_PUBLIC_KEY_SIZE {
                    return Err(IdentityError::InvalidEncoding);
                }
                let c: [u8; C25519_PUBLIC_KEY_SIZE] = bytes[off..off + 32].try_into().unwrap();
                off += 32;
                let e: [u8; ED25519_PUBLIC_KEY_SIZE] = bytes[off..off + 32].try_into().unwrap();
                off += 32;
                let ecdh: [u8; P384_PUBLIC_KEY_SIZE] = bytes[off..off + P384_PUBLIC_KEY_SIZE].try_into().unwrap();
                off += P384_PUBLIC_KEY_SIZE;
                let ecdsa: [u8; P384_PUBLIC_KEY_SIZE] = bytes[off..off + P384_PUBLIC_KEY_SIZE].try_into().unwrap();
                off += P384_PUBLIC_KEY_SIZE;
                (c, e, Some((ecdh, ecdsa)))
            }
        };

        if bytes.len() <= off {
            return Err(IdentityError::InvalidEncoding);
        }
        let priv_len = bytes[off] as usize;
        off += 1;
        let secrets = if priv_len > 0 {
            if bytes.len() < off + priv_len {
                return Err(IdentityError::InvalidEncoding);
            }
            let priv_bytes = &bytes[off..off + priv_len];
            match id_type {
                IdentityType::C25519 => {
                    if priv_len != C25519_SECRET_KEY_SIZE + ED25519_SECRET_KEY_SIZE {
                        return Err(IdentityError::InvalidEncoding);
                    }
                    let c: [u8; C25519_SECRET_KEY_SIZE] = priv_bytes[0..32].try_into().unwrap();
                    let e: [u8; ED25519_SECRET_KEY_SIZE] = priv_bytes[32..64].try_into().unwrap();
                    Some(SecretKeys {
                        c25519: C25519KeyPair::from_secret_bytes(&c),
                        ed25519: Ed25519KeyPair::from_secret_bytes(&e),
                        compound: None,
                    })
                }
                IdentityType::Compound => {
                    let expected = C25519_SECRET_KEY_SIZE + ED25519_SECRET_KEY_SIZE + 2 * P384_SECRET_KEY_SIZE;
                    if priv_len != expected {
                        return Err(IdentityError::InvalidEncoding);
                    }
                    let c: [u8; C25519_SECRET_KEY_SIZE] = priv_bytes[0..32].try_into().unwrap();
                    let e: [u8; ED25519_SECRET_KEY_SIZE] = priv_bytes[32..64].try_into().unwrap();
                    let ecdh: [u8; P384_SECRET_KEY_SIZE] = priv_bytes[64..64 + P384_SECRET_KEY_SIZE].try_into().unwrap();
                    let ecdsa: [u8; P384_SECRET_KEY_SIZE] = priv_bytes
                        [64 + P384_SECRET_KEY_SIZE..expected]
                        .try_into()
                        .unwrap();
                    Some(SecretKeys {
                        c25519: C25519KeyPair::from_secret_bytes(&c),
                        ed25519: Ed25519KeyPair::from_secret_bytes(&e),
                        compound: Some((
                            P384KeyPair::from_secret_bytes(&ecdh).ok_or(IdentityError::InvalidEncoding)?,
                            P384KeyPair::from_secret_bytes(&ecdsa).ok_or(IdentityError::InvalidEncoding)?,
                        )),
                    })
                }
            }
        } else {
            None
        };

        let hash = match id_type {
            IdentityType::C25519 => {
                let (digest, _) = derive_v0_address(&c25519_pub, &ed25519_pub);
                let mut h = [0u8; IDENTITY_HASH_SIZE];
                h.copy_from_slice(&digest[0..IDENTITY_HASH_SIZE]);
                h
            }
            IdentityType::Compound => {
                let (ecdh, ecdsa) = compound_pub.unwrap();
                compound_work_function(&compound_public_blob(&c25519_pub, &ed25519_pub, &ecdh, &ecdsa))
            }
        };

        let identity = Identity {
            id_type,
            address: claimed_addr,
            c25519_pub,
            ed25519_pub,
            compound_pub,
            hash,
            secrets,
        };

        // Type 1 must re-run locally_validate and reject on failure.
        if id_type == IdentityType::Compound && !identity.locally_validate() {
            return Err(IdentityError::HashcashFailed);
        }
        if !identity.address.is_valid() {
            return Err(IdentityError::ReservedAddress);
        }
        Ok(identity)
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("address", &self.address)
            .field("type", &self.id_type)
            .field("has_private", &self.has_private())
            .finish()
    }
}

impl PartialEq for Identity {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address && self.hash == other.hash
    }
}
impl Eq for Identity {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_c25519_identity_validates() {
        let id = Identity::generate(IdentityType::C25519);
        assert!(id.locally_validate());
        assert!(id.address().is_valid());
        assert_ne!(id.address().as_bytes(), &[0u8; 5]);
    }

    #[test]
    fn sign_verify_round_trip() {
        let id = Identity::generate(IdentityType::C25519);
        let sig = id.sign(b"hello world").unwrap();
        assert!(id.verify(b"hello world", &sig));
        assert!(!id.verify(b"hello world!", &sig));
    }

    #[test]
    fn agree_is_symmetric_and_32_bytes() {
        let a = Identity::generate(IdentityType::C25519);
        let b = Identity::generate(IdentityType::C25519);
        let sa = a.agree(&b).unwrap();
        let sb = b.agree(&a).unwrap();
        assert_eq!(sa, sb);
        assert_eq!(sa.len(), 32);
    }

    #[test]
    fn string_round_trip_with_private() {
        let id = Identity::generate(IdentityType::C25519);
        let s = id.to_string_with_private(true);
        let parsed = Identity::from_string(&s).unwrap();
        assert_eq!(parsed.address(), id.address());
        let sig = parsed.sign(b"msg").unwrap();
        assert!(id.verify(b"msg", &sig));
    }

    #[test]
    fn marshal_round_trip() {
        let id = Identity::generate(IdentityType::C25519);
        let bytes = id.marshal(true);
        let parsed = Identity::unmarshal(&bytes).unwrap();
        assert_eq!(parsed.address(), id.address());
        assert!(parsed.has_private());
    }
}
