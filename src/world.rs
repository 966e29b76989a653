//! World (C9): the signed root document that tells a node which peers are
//! roots and how to reach them. Distributing or fetching a world is a host
//! concern; this module only covers its shape, signature, and the
//! controlled-replacement rule.

use crate::crypto::c25519::{ed25519_verify, ED25519_PUBLIC_KEY_SIZE, ED25519_SIGNATURE_SIZE};
use crate::endpoint::{Endpoint, LocalityWeights};
use crate::error::WorldError;
use crate::identity::Identity;

/// Distinguishes a node's compiled-in default root set (`Planet`) from a
/// locally configured supplemental set (`Moon`); `Null` marks an
/// uninitialized/absent world.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WorldType {
    Null = 0,
    Planet = 1,
    Moon = 127,
}

impl WorldType {
    pub fn from_tag(tag: u8) -> Result<Self, WorldError> {
        match tag {
            0 => Ok(WorldType::Null),
            1 => Ok(WorldType::Planet),
            127 => Ok(WorldType::Moon),
            _ => Err(WorldError::Truncated),
        }
    }
}

/// One root advertised by a world: its public identity plus the endpoints
/// it is expected to be reachable at.
#[derive(Debug, Clone)]
pub struct RootEntry {
    pub identity: Identity,
    pub stable_endpoints: Vec<Endpoint>,
}

/// A signed, timestamped root document (spec §4.6). `updates_must_be_signed_by`
/// is an Ed25519 public key distinct from any individual root's identity key,
/// so root membership can be rotated without re-keying every root.
pub struct World {
    world_type: WorldType,
    id: u64,
    timestamp: i64,
    updates_must_be_signed_by: [u8; ED25519_PUBLIC_KEY_SIZE],
    roots: Vec<RootEntry>,
    signature: Vec<u8>,
}

impl World {
    fn signing_bytes(
        world_type: WorldType,
        id: u64,
        timestamp: i64,
        updates_must_be_signed_by: &[u8; ED25519_PUBLIC_KEY_SIZE],
        roots: &[RootEntry],
    ) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.push(world_type as u8);
        buf.extend_from_slice(&id.to_be_bytes());
        buf.extend_from_slice(&timestamp.to_be_bytes());
        buf.extend_from_slice(updates_must_be_signed_by);
        buf.push(roots.len() as u8);
        for root in roots {
            let id_bytes = root.identity.marshal(false);
            buf.extend_from_slice(&(id_bytes.len() as u16).to_be_bytes());
            buf.extend_from_slice(&id_bytes);
            buf.push(root.stable_endpoints.len() as u8);
            for ep in &root.stable_endpoints {
                if let Ok(m) = ep.marshal(LocalityWeights::default()) {
                    buf.push(m.len() as u8);
                    buf.extend_from_slice(&m);
                }
            }
        }
        buf
    }

    /// Builds and signs a new world with `signing_key` (the Ed25519 secret
    /// matching `updates_must_be_signed_by`).
    pub fn make(
        world_type: WorldType,
        id: u64,
        timestamp: i64,
        updates_must_be_signed_by: [u8; ED25519_PUBLIC_KEY_SIZE],
        roots: Vec<RootEntry>,
        signing_key: &crate::crypto::c25519::Ed25519KeyPair,
    ) -> Self {
        let signing_bytes = Self::signing_bytes(world_type, id, timestamp, &updates_must_be_signed_by, &roots);
        let signature = signing_key.sign(&signing_bytes).to_vec();
        Self {
            world_type,
            id,
            timestamp,
            updates_must_be_signed_by,
            roots,
            signature,
        }
    }

    pub fn world_type(&self) -> WorldType {
        self.world_type
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn roots(&self) -> &[RootEntry] {
        &self.roots
    }

    pub fn verify(&self) -> bool {
        let signing_bytes = Self::signing_bytes(
            self.world_type,
            self.id,
            self.timestamp,
            &self.updates_must_be_signed_by,
            &self.roots,
        );
        let Ok(sig) = <[u8; ED25519_SIGNATURE_SIZE]>::try_from(self.signature.as_slice()) else {
            return false;
        };
        ed25519_verify(&self.updates_must_be_signed_by, &signing_bytes, &sig).is_ok()
    }

    /// The controlled-replacement rule (spec §4.6): a candidate may replace
    /// `self` only if it names the same type and id, carries a strictly
    /// newer timestamp, and verifies under `self`'s own update-authority
    /// key — NOT the candidate's own key, so a compromised future world
    /// cannot bootstrap trust in itself.
    pub fn should_be_replaced_by(&self, candidate: &World) -> Result<(), WorldError> {
        if candidate.world_type != self.world_type {
            return Err(WorldError::TypeMismatch);
        }
        if candidate.id != self.id {
            return Err(WorldError::IdMismatch);
        }
        if candidate.timestamp <= self.timestamp {
            return Err(WorldError::NotNewer);
        }
        let signing_bytes = Self::signing_bytes(
            candidate.world_type,
            candidate.id,
            candidate.timestamp,
            &candidate.updates_must_be_signed_by,
            &candidate.roots,
        );
        let Ok(sig) = <[u8; ED25519_SIGNATURE_SIZE]>::try_from(candidate.signature.as_slice()) else {
            return Err(WorldError::BadSignature);
        };
        if ed25519_verify(&self.updates_must_be_signed_by, &signing_bytes, &sig).is_err() {
            return Err(WorldError::BadSignature);
        }
        Ok(())
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Self::signing_bytes(
            self.world_type,
            self.id,
            self.timestamp,
            &self.updates_must_be_signed_by,
            &self.roots,
        );
        out.extend_from_slice(&(self.signature.len() as u16).to_be_bytes());
        out.extend_from_slice(&self.signature);
        out
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self, WorldError> {
        if bytes.len() < 1 + 8 + 8 + ED25519_PUBLIC_KEY_SIZE + 1 {
            return Err(WorldError::Truncated);
        }
        let world_type = WorldType::from_tag(bytes[0])?;
        let mut off = 1;
        let id = u64::from_be_bytes(bytes[off..off + 8].try_into().unwrap());
        off += 8;
        let timestamp = i64::from_be_bytes(bytes[off..off + 8].try_into().unwrap());
        off += 8;
        let mut updates_must_be_signed_by = [0u8; ED25519_PUBLIC_KEY_SIZE];
        updates_must_be_signed_by.copy_from_slice(&bytes[off..off + ED25519_PUBLIC_KEY_SIZE]);
        off += ED25519_PUBLIC_KEY_SIZE;

        let num_roots = bytes[off] as usize;
        off += 1;
        let mut roots = Vec::with_capacity(num_roots);
        for _ in 0..num_roots {
            if bytes.len() < off + 2 {
                return Err(WorldError::Truncated);
            }
            let id_len = u16::from_be_bytes(bytes[off..off + 2].try_into().unwrap()) as usize;
            off += 2;
            if bytes.len() < off + id_len + 1 {
                return Err(WorldError::Truncated);
            }
            let identity = Identity::unmarshal(&bytes[off..off + id_len]).map_err(|_| WorldError::Truncated)?;
            off += id_len;
            let num_endpoints = bytes[off] as usize;
            off += 1;
            let mut stable_endpoints = Vec::with_capacity(num_endpoints);
            for _ in 0..num_endpoints {
                if bytes.len() < off + 1 {
                    return Err(WorldError::Truncated);
                }
                let ep_len = bytes[off] as usize;
                off += 1;
                if bytes.len() < off + ep_len {
                    return Err(WorldError::Truncated);
                }
                let (ep, _, _) = Endpoint::unmarshal(&bytes[off..off + ep_len]).map_err(|_| WorldError::Truncated)?;
                off += ep_len;
                stable_endpoints.push(ep);
            }
            roots.push(RootEntry { identity, stable_endpoints });
        }

        if bytes.len() < off + 2 {
            return Err(WorldError::Truncated);
        }
        let sig_len = u16::from_be_bytes(bytes[off..off + 2].try_into().unwrap()) as usize;
        off += 2;
        if bytes.len() < off + sig_len {
            return Err(WorldError::Truncated);
        }
        let signature = bytes[off..off + sig_len].to_vec();

        let world = World {
            world_type,
            id,
            timestamp,
            updates_must_be_signed_by,
            roots,
            signature,
        };
        if !world.verify() {
            return Err(WorldError::BadSignature);
        }
        Ok(world)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::c25519::Ed25519KeyPair;
    use crate::identity::IdentityType;
    use std::net::Ipv4Addr;

    fn signed_world(id: u64, timestamp: i64, signer: &Ed25519KeyPair) -> World {
        let root = RootEntry {
            identity: Identity::generate(IdentityType::C25519),
            stable_endpoints: vec![Endpoint::InetAddrV4(Ipv4Addr::new(198, 51, 100, 1), 9993)],
        };
        World::make(WorldType::Planet, id, timestamp, signer.public_bytes(), vec![root], signer)
    }

    #[test]
    fn signed_world_verifies_and_round_trips() {
        let signer = Ed25519KeyPair::generate();
        let world = signed_world(1, 1000, &signer);
        assert!(world.verify());

        let bytes = world.serialize();
        let decoded = World::deserialize(&bytes).unwrap();
        assert!(decoded.verify());
        assert_eq!(decoded.id(), 1);
        assert_eq!(decoded.timestamp(), 1000);
        assert_eq!(decoded.roots().len(), 1);
    }

    #[test]
    fn deserialize_rejects_corrupted_signature() {
        let signer = Ed25519KeyPair::generate();
        let world = signed_world(1, 1000, &signer);
        let mut bytes = world.serialize();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        assert_eq!(World::deserialize(&bytes), Err(WorldError::BadSignature));
    }

    #[test]
    fn newer_world_signed_by_same_authority_replaces() {
        let signer = Ed25519KeyPair::generate();
        let old = signed_world(5, 1000, &signer);
        let newer = signed_world(5, 2000, &signer);
        assert!(old.should_be_replaced_by(&newer).is_ok());
    }

    #[test]
    fn world_signed_by_different_authority_is_rejected() {
        let signer = Ed25519KeyPair::generate();
        let attacker = Ed25519KeyPair::generate();
        let old = signed_world(5, 1000, &signer);
        let forged = signed_world(5, 2000, &attacker);
        assert_eq!(old.should_be_replaced_by(&forged), Err(WorldError::BadSignature));
    }

    #[test]
    fn stale_timestamp_is_rejected() {
        let signer = Ed25519KeyPair::generate();
        let old = signed_world(5, 2000, &signer);
        let stale = signed_world(5, 1000, &signer);
        assert_eq!(old.should_be_replaced_by(&stale), Err(WorldError::NotNewer));
    }

    #[test]
    fn mismatched_id_is_rejected() {
        let signer = Ed25519KeyPair::generate();
        let old = signed_world(5, 1000, &signer);
        let other = signed_world(6, 2000, &signer);
        assert_eq!(old.should_be_replaced_by(&other), Err(WorldError::IdMismatch));
    }
}
