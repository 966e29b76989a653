//! Fingerprint: address concatenated with the full identity hash, used to
//! look up peers collision-resistantly rather than by the short address.

use crate::identity::{Address, Identity, ADDRESS_LENGTH, IDENTITY_HASH_SIZE};
use std::fmt;

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    pub address: Address,
    pub hash: [u8; IDENTITY_HASH_SIZE],
}

impl Fingerprint {
    pub fn of(identity: &Identity) -> Self {
        Self {
            address: identity.address(),
            hash: *identity.hash(),
        }
    }

    pub fn marshal(&self) -> [u8; ADDRESS_LENGTH + IDENTITY_HASH_SIZE] {
        let mut out = [0u8; ADDRESS_LENGTH + IDENTITY_HASH_SIZE];
        out[0..ADDRESS_LENGTH].copy_from_slice(self.address.as_bytes());
        out[ADDRESS_LENGTH..].copy_from_slice(&self.hash);
        out
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({}/{})", self.address, hex::encode(&self.hash[0..6]))
    }
}
