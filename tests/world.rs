//! The signed root "world" document and its controlled-replacement rule,
//! exercised through both `World` directly and `Topology::set_world`.

use vl1_core::identity::{Identity, IdentityType};
use vl1_core::world::{RootEntry, World, WorldType};
use vl1_core::{Config, Topology, WorldError};

fn root() -> RootEntry {
    RootEntry {
        identity: Identity::generate(IdentityType::C25519),
        stable_endpoints: vec![],
    }
}

#[test]
fn a_freshly_signed_world_verifies_itself() {
    use vl1_core::crypto::c25519::Ed25519KeyPair;
    let keypair = Ed25519KeyPair::generate();
    let world = World::make(WorldType::Planet, 7, 1_000, keypair.public_bytes(), vec![root()], &keypair);
    assert!(world.verify());
    assert_eq!(world.world_type(), WorldType::Planet);
    assert_eq!(world.roots().len(), 1);
}

#[test]
fn serialize_deserialize_preserves_verification() {
    use vl1_core::crypto::c25519::Ed25519KeyPair;
    let keypair = Ed25519KeyPair::generate();
    let world = World::make(WorldType::Planet, 3, 500, keypair.public_bytes(), vec![root(), root()], &keypair);

    let bytes = world.serialize();
    let decoded = World::deserialize(&bytes).unwrap();
    assert!(decoded.verify());
    assert_eq!(decoded.id(), 3);
    assert_eq!(decoded.roots().len(), 2);
}

#[test]
fn topology_accepts_the_first_world_unconditionally() {
    use vl1_core::crypto::c25519::Ed25519KeyPair;
    let keypair = Ed25519KeyPair::generate();
    let world = World::make(WorldType::Planet, 1, 1_000, keypair.public_bytes(), vec![root()], &keypair);

    let topo = Topology::new(Config::default());
    assert!(topo.world().is_none());
    topo.set_world(world).unwrap();
    assert!(topo.world().is_some());
}

#[test]
fn topology_rejects_a_stale_or_forged_world_update() {
    use vl1_core::crypto::c25519::Ed25519KeyPair;
    let signer = Ed25519KeyPair::generate();
    let attacker = Ed25519KeyPair::generate();

    let topo = Topology::new(Config::default());
    let first = World::make(WorldType::Planet, 9, 1_000, signer.public_bytes(), vec![root()], &signer);
    topo.set_world(first).unwrap();

    let stale = World::make(WorldType::Planet, 9, 999, signer.public_bytes(), vec![root()], &signer);
    assert_eq!(topo.set_world(stale).unwrap_err(), WorldError::NotNewer);

    let forged = World::make(WorldType::Planet, 9, 2_000, attacker.public_bytes(), vec![root()], &attacker);
    assert_eq!(topo.set_world(forged).unwrap_err(), WorldError::BadSignature);

    // The rejected candidates must not have replaced the installed world.
    assert_eq!(topo.world().unwrap().timestamp(), 1_000);
}

#[test]
fn topology_accepts_a_newer_world_signed_by_the_same_authority() {
    use vl1_core::crypto::c25519::Ed25519KeyPair;
    let signer = Ed25519KeyPair::generate();
    let topo = Topology::new(Config::default());

    let first = World::make(WorldType::Planet, 4, 1_000, signer.public_bytes(), vec![root()], &signer);
    topo.set_world(first).unwrap();

    let newer = World::make(WorldType::Planet, 4, 2_000, signer.public_bytes(), vec![root(), root()], &signer);
    topo.set_world(newer).unwrap();
    assert_eq!(topo.world().unwrap().timestamp(), 2_000);
    assert_eq!(topo.world().unwrap().roots().len(), 2);
}
