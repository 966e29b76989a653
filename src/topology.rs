//! Topology (C8): the process-wide registry of known peers and paths, root
//! ranking, periodic garbage collection, and the current [`World`]. Lock
//! ordering is topology -> peer -> path (spec §9): never take a peer or
//! path lock and then reach back up into a topology lock.

use crate::config::constants::PEER_GLOBAL_TIMEOUT_MS;
use crate::config::Config;
use crate::endpoint::Endpoint;
use crate::error::WorldError;
use crate::fingerprint::Fingerprint;
use crate::identity::{Address, Identity};
use crate::path::Path;
use crate::peer::Peer;
use crate::world::World;
use parking_lot::RwLock;
use std::cmp::Ordering as CmpOrdering;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

fn saturating_incr(counter: &AtomicU64) {
    let _ = counter.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| Some(v.saturating_add(1)));
}

/// Process-wide peer/path registry and root set.
///
/// Storing the current [`World`] behind a `parking_lot::RwLock<Option<Arc<World>>>`
/// rather than an atomic pointer-swap crate is a deliberate substitution —
/// `arc-swap` isn't part of this crate's dependency stack and world updates
/// are rare enough that a short-lived read lock costs nothing on the hot
/// path (see DESIGN.md).
pub struct Topology {
    config: Config,
    peers_by_address: RwLock<HashMap<Address, Arc<Peer>>>,
    peers_by_fingerprint: RwLock<HashMap<Fingerprint, Arc<Peer>>>,
    peers_by_probe_token: RwLock<HashMap<u64, Arc<Peer>>>,
    paths: RwLock<HashMap<(Option<i64>, Endpoint), Arc<Path>>>,
    roots: RwLock<Vec<Arc<Peer>>>,
    world: RwLock<Option<Arc<World>>>,
    dropped_packets: AtomicU64,
    decode_errors: AtomicU64,
    mac_failures: AtomicU64,
}

impl Topology {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            peers_by_address: RwLock::new(HashMap::new()),
            peers_by_fingerprint: RwLock::new(HashMap::new()),
            peers_by_probe_token: RwLock::new(HashMap::new()),
            paths: RwLock::new(HashMap::new()),
            roots: RwLock::new(Vec::new()),
            world: RwLock::new(None),
            dropped_packets: AtomicU64::new(0),
            decode_errors: AtomicU64::new(0),
            mac_failures: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Looks up or creates the [`Path`] for `(local_socket, remote)`, so
    /// every caller observing the same underlay route shares one `Path`
    /// and its reassembly/liveness state.
    pub fn get_or_create_path(&self, local_socket: Option<i64>, remote: Endpoint) -> Arc<Path> {
        let key = (local_socket, remote.clone());
        if let Some(p) = self.paths.read().get(&key) {
            return p.clone();
        }
        self.paths
            .write()
            .entry(key)
            .or_insert_with(|| Arc::new(Path::new(local_socket, remote)))
            .clone()
    }

    pub fn peer_by_address(&self, address: Address) -> Option<Arc<Peer>> {
        self.peers_by_address.read().get(&address).cloned()
    }

    pub fn peer_by_fingerprint(&self, fingerprint: Fingerprint) -> Option<Arc<Peer>> {
        self.peers_by_fingerprint.read().get(&fingerprint).cloned()
    }

    pub fn peer_by_probe_token(&self, token: u64) -> Option<Arc<Peer>> {
        self.peers_by_probe_token.read().get(&token).cloned()
    }

    /// Returns the existing peer for this identity's address if one is
    /// already registered, otherwise creates and registers one. Exactly one
    /// `Peer` ever exists per address (spec §4.4): a second identity
    /// claiming an already-bound address is the caller's job to reject
    /// (`IdentityCollision`) before calling this.
    pub fn get_or_create_peer(&self, identity: Identity, now: i64) -> Arc<Peer> {
        let address = identity.address();
        if let Some(existing) = self.peers_by_address.read().get(&address) {
            return existing.clone();
        }
        let fingerprint = Fingerprint::of(&identity);
        let peer = Arc::new(Peer::new(identity, now));

        let mut by_address = self.peers_by_address.write();
        if let Some(existing) = by_address.get(&address) {
            return existing.clone();
        }
        by_address.insert(address, peer.clone());
        drop(by_address);

        self.peers_by_fingerprint.write().insert(fingerprint, peer.clone());
        self.peers_by_probe_token
            .write()
            .insert(peer.outgoing_probe_token(), peer.clone());
        peer
    }

    pub fn add_root(&self, peer: Arc<Peer>) {
        let mut roots = self.roots.write();
        if !roots.iter().any(|r| r.address() == peer.address()) {
            roots.push(peer);
        }
    }

    pub fn roots(&self) -> Vec<Arc<Peer>> {
        self.roots.read().clone()
    }

    pub fn is_root(&self, address: Address) -> bool {
        self.roots.read().iter().any(|r| r.address() == address)
    }

    /// Re-sorts the root list: roots with a currently alive preferred path
    /// first (ascending latency), then roots with no alive path, most
    /// recently heard-from first. Call roughly every
    /// [`crate::config::constants::ROOT_RANK_INTERVAL_MS`] from the
    /// background task, not per-packet.
    pub fn rank_roots(&self, now: i64) {
        let mut roots = self.roots.write();
        roots.sort_by(|a, b| {
            let a_alive = a.preferred_path().map(|p| p.is_alive(now)).unwrap_or(false);
            let b_alive = b.preferred_path().map(|p| p.is_alive(now)).unwrap_or(false);
            match (a_alive, b_alive) {
                (true, true) => {
                    let la = a.preferred_path().and_then(|p| p.latency()).unwrap_or(i64::MAX);
                    let lb = b.preferred_path().and_then(|p| p.latency()).unwrap_or(i64::MAX);
                    la.cmp(&lb)
                }
                (true, false) => CmpOrdering::Less,
                (false, true) => CmpOrdering::Greater,
                (false, false) => b.last_receive().cmp(&a.last_receive()),
            }
        });
    }

    /// The best root to relay through right now, per the most recent
    /// `rank_roots` ordering.
    pub fn best_root(&self) -> Option<Arc<Peer>> {
        self.roots.read().first().cloned()
    }

    pub fn world(&self) -> Option<Arc<World>> {
        self.world.read().clone()
    }

    /// Installs `candidate` as the current world. Accepted unconditionally
    /// if no world is installed yet (first boot); otherwise must pass
    /// [`World::should_be_replaced_by`].
    pub fn set_world(&self, candidate: World) -> Result<(), WorldError> {
        let mut world = self.world.write();
        if let Some(current) = world.as_ref() {
            current.should_be_replaced_by(&candidate)?;
        }
        *world = Some(Arc::new(candidate));
        Ok(())
    }

    /// Periodic maintenance: evicts non-root peers that have gone silent
    /// past the global timeout and expires stale per-path fragment
    /// reassembly state. Call from the background task, not per-packet.
    pub fn gc(&self, now: i64) {
        let root_addresses: HashSet<Address> = self.roots.read().iter().map(|r| r.address()).collect();

        let expired: Vec<Address> = self
            .peers_by_address
            .read()
            .iter()
            .filter(|(addr, peer)| !root_addresses.contains(addr) && peer.is_expired(now))
            .map(|(addr, _)| *addr)
            .collect();

        if !expired.is_empty() {
            let mut by_address = self.peers_by_address.write();
            let mut by_fingerprint = self.peers_by_fingerprint.write();
            let mut by_probe_token = self.peers_by_probe_token.write();
            for addr in &expired {
                if let Some(peer) = by_address.remove(addr) {
                    by_fingerprint.remove(&peer.fingerprint());
                    by_probe_token.remove(&peer.outgoing_probe_token());
                }
            }
            debug!(count = expired.len(), "topology gc: evicted expired peers");
        }

        for path in self.paths.read().values() {
            path.expire_fragments(now);
        }
    }

    pub fn record_drop(&self) {
        saturating_incr(&self.dropped_packets);
    }

    pub fn record_decode_error(&self) {
        saturating_incr(&self.decode_errors);
    }

    pub fn record_mac_failure(&self) {
        saturating_incr(&self.mac_failures);
    }

    pub fn dropped_packets(&self) -> u64 {
        self.dropped_packets.load(Ordering::Relaxed)
    }

    pub fn decode_errors(&self) -> u64 {
        self.decode_errors.load(Ordering::Relaxed)
    }

    pub fn mac_failures(&self) -> u64 {
        self.mac_failures.load(Ordering::Relaxed)
    }

    pub fn peer_count(&self) -> usize {
        self.peers_by_address.read().len()
    }

    /// Test-only seam: binds `peer` directly at `address` in the by-address
    /// index, bypassing `get_or_create_peer`'s own address derivation. A real
    /// identity-collision (two distinct public keys hashing to the same
    /// 40-bit address) can't be manufactured in a test; this lets collision
    /// handling be exercised without one.
    #[cfg(test)]
    pub(crate) fn bind_peer_for_test(&self, address: Address, peer: Arc<Peer>) {
        self.peers_by_address.write().insert(address, peer);
    }
}

const _: () = assert!(PEER_GLOBAL_TIMEOUT_MS > 0);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::IdentityType;
    use std::net::Ipv4Addr;

    fn topology() -> Topology {
        Topology::new(Config::default())
    }

    #[test]
    fn get_or_create_peer_is_idempotent_per_address() {
        let topo = topology();
        let identity = Identity::generate(IdentityType::C25519);
        let address = identity.address();
        let a = topo.get_or_create_peer(identity, 0);

        // Building a second identity from scratch would not share an
        // address, so simulate a repeat lookup the way the node loop does.
        let b = topo.peer_by_address(address).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(topo.peer_count(), 1);
    }

    #[test]
    fn path_lookup_shares_one_path_per_key() {
        let topo = topology();
        let remote = Endpoint::InetAddrV4(Ipv4Addr::new(203, 0, 113, 5), 9993);
        let a = topo.get_or_create_path(Some(1), remote.clone());
        let b = topo.get_or_create_path(Some(1), remote);
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn rank_roots_prefers_alive_low_latency() {
        let topo = topology();
        let slow_id = Identity::generate(IdentityType::C25519);
        let fast_id = Identity::generate(IdentityType::C25519);
        let slow = topo.get_or_create_peer(slow_id, 0);
        let fast = topo.get_or_create_peer(fast_id, 0);

        let slow_path = Arc::new(Path::new(Some(1), Endpoint::InetAddrV4(Ipv4Addr::new(1, 1, 1, 1), 1)));
        slow_path.log_receive(1000);
        slow_path.record_latency(300);
        slow.add_path(slow_path);
        slow.refresh_preferred_path(1000);

        let fast_path = Arc::new(Path::new(Some(2), Endpoint::InetAddrV4(Ipv4Addr::new(2, 2, 2, 2), 2)));
        fast_path.log_receive(1000);
        fast_path.record_latency(10);
        fast.add_path(fast_path);
        fast.refresh_preferred_path(1000);

        topo.add_root(slow.clone());
        topo.add_root(fast.clone());
        topo.rank_roots(1000);

        let ranked = topo.roots();
        assert_eq!(ranked[0].address(), fast.address());
    }

    #[test]
    fn gc_evicts_expired_non_root_peers_but_keeps_roots() {
        let topo = topology();
        let root_id = Identity::generate(IdentityType::C25519);
        let leaf_id = Identity::generate(IdentityType::C25519);
        let root = topo.get_or_create_peer(root_id, 0);
        let _leaf = topo.get_or_create_peer(leaf_id, 0);
        topo.add_root(root.clone());

        assert_eq!(topo.peer_count(), 2);
        topo.gc(PEER_GLOBAL_TIMEOUT_MS + 1_000_000);
        assert_eq!(topo.peer_count(), 1);
        assert!(topo.peer_by_address(root.address()).is_some());
    }

    #[test]
    fn world_replacement_rejects_stale_candidate() {
        use crate::crypto::c25519::Ed25519KeyPair;
        use crate::world::{RootEntry, WorldType};

        let topo = topology();
        let signer = Ed25519KeyPair::generate();
        let root = RootEntry {
            identity: Identity::generate(IdentityType::C25519),
            stable_endpoints: vec![],
        };
        let first = World::make(WorldType::Planet, 1, 1000, signer.public_bytes(), vec![root.clone()], &signer);
        topo.set_world(first).unwrap();

        let stale = World::make(WorldType::Planet, 1, 500, signer.public_bytes(), vec![root], &signer);
        assert!(topo.set_world(stale).is_err());
    }
}
