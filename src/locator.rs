//! Locator: a signed, timestamped list of endpoints a peer advertises as
//! reachable at, plus the world revision it was created under. Used as the
//! `(identity, locator)` payload of a successful WHOIS reply. Persistence
//! and DNS-TXT distribution of locators are out of scope; only the
//! in-memory type, its signature, and its WHOIS use are implemented here.

use crate::endpoint::{Endpoint, LocalityWeights};
use crate::error::IdentityError;
use crate::identity::Identity;

#[derive(Clone, Debug)]
pub struct Locator {
    pub timestamp: i64,
    pub world_id: Option<u64>,
    pub endpoints: Vec<(Endpoint, LocalityWeights)>,
    signature: Vec<u8>,
}

impl Locator {
    fn signing_bytes(timestamp: i64, world_id: Option<u64>, endpoints: &[(Endpoint, LocalityWeights)]) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&timestamp.to_be_bytes());
        buf.push(world_id.is_some() as u8);
        buf.extend_from_slice(&world_id.unwrap_or(0).to_be_bytes());
        buf.push(endpoints.len() as u8);
        for (ep, w) in endpoints {
            if let Ok(m) = ep.marshal(*w) {
                buf.push(m.len() as u8);
                buf.extend_from_slice(&m);
            }
        }
        buf
    }

    /// Signs a new locator with `signer`'s private key; `signer` must be
    /// the identity this locator describes.
    pub fn make(
        timestamp: i64,
        world_id: Option<u64>,
        endpoints: Vec<(Endpoint, LocalityWeights)>,
        signer: &Identity,
    ) -> Result<Locator, IdentityError> {
        let signing_bytes = Self::signing_bytes(timestamp, world_id, &endpoints);
        let signature = signer.sign(&signing_bytes)?;
        Ok(Locator {
            timestamp,
            world_id,
            endpoints,
            signature,
        })
    }

    pub fn verify(&self, signer: &Identity) -> bool {
        let signing_bytes = Self::signing_bytes(self.timestamp, self.world_id, &self.endpoints);
        signer.verify(&signing_bytes, &self.signature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::IdentityType;
    use std::net::Ipv4Addr;

    #[test]
    fn signed_locator_verifies() {
        let id = Identity::generate(IdentityType::C25519);
        let endpoints = vec![(Endpoint::InetAddrV4(Ipv4Addr::new(203, 0, 113, 1), 9993), LocalityWeights::default())];
        let loc = Locator::make(1000, None, endpoints, &id).unwrap();
        assert!(loc.verify(&id));
    }

    #[test]
    fn tampered_locator_fails() {
        let id = Identity::generate(IdentityType::C25519);
        let loc = Locator::make(1000, None, vec![], &id).unwrap();
        let mut tampered = loc.clone();
        tampered.timestamp += 1;
        assert!(!tampered.verify(&id));
    }
}
