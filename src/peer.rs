//! Peer (C7): per-remote-node state — identity, session key, known paths,
//! and the `HELLO` handshake state machine.

use crate::config::constants::{
    MAX_PATHS_PER_PEER, PEER_CONTROL_RATE_LIMIT_MS, PEER_GLOBAL_TIMEOUT_MS, WHOIS_RATE_LIMIT_MS,
};
use crate::crypto::rng::secure_random_u64;
use crate::fingerprint::Fingerprint;
use crate::identity::Identity;
use crate::path::Path;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicI64, AtomicU8, Ordering};
use std::sync::Arc;
use zeroize::Zeroize;

/// `HELLO` handshake progress, tracked per peer (spec §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HelloState {
    /// No `HELLO` exchanged yet; paths are unconfirmed.
    New,
    /// We sent `HELLO` and are waiting on the matching `OK`.
    SentHello,
    /// A session key has been agreed and at least one path confirmed.
    Established,
    /// Timed out without completing the handshake; eligible for GC.
    Expired,
}

/// The 32-byte shared secret derived from [`Identity::agree`]. Holds no
/// `Debug`/`Display` impl so it can never be logged by accident, and is
/// zeroized on drop.
pub struct SessionKey([u8; 32]);

impl SessionKey {
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl Drop for SessionKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

/// Per-remote-node state: identity, session key, known paths, and
/// handshake/liveness bookkeeping. Lives behind `Arc` in
/// [`crate::topology::Topology`]; locking order is topology -> peer -> path
/// (spec §9), never the reverse.
pub struct Peer {
    identity: Identity,
    fingerprint: Fingerprint,
    /// Random tag generated at creation time and included in our `HELLO`s
    /// sent to this peer; the matching `OK` echoes it back, letting us
    /// correlate a reply with this specific peer even before a session key
    /// exists to authenticate the reply under.
    outgoing_probe_token: u64,
    session_key: Mutex<Option<SessionKey>>,
    state: Mutex<HelloState>,
    paths: Mutex<Vec<Arc<Path>>>,
    preferred_path: Mutex<Option<Arc<Path>>>,
    remote_version: Mutex<Option<(u8, u8, u8, u16)>>,
    last_receive_ms: AtomicI64,
    last_hello_sent_ms: AtomicI64,
    last_whois_sent_ms: AtomicI64,
    last_control_packet_ms: AtomicI64,
    hops_required: AtomicU8,
}

impl Peer {
    pub fn new(identity: Identity, now: i64) -> Self {
        let fingerprint = Fingerprint::of(&identity);
        Self {
            identity,
            fingerprint,
            outgoing_probe_token: secure_random_u64(),
            session_key: Mutex::new(None),
            state: Mutex::new(HelloState::New),
            paths: Mutex::new(Vec::new()),
            preferred_path: Mutex::new(None),
            remote_version: Mutex::new(None),
            last_receive_ms: AtomicI64::new(now),
            last_hello_sent_ms: AtomicI64::new(i64::MIN),
            last_whois_sent_ms: AtomicI64::new(i64::MIN),
            last_control_packet_ms: AtomicI64::new(i64::MIN),
            hops_required: AtomicU8::new(0),
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    pub fn address(&self) -> crate::identity::Address {
        self.identity.address()
    }

    pub fn outgoing_probe_token(&self) -> u64 {
        self.outgoing_probe_token
    }

    pub fn state(&self) -> HelloState {
        *self.state.lock()
    }

    pub fn set_state(&self, state: HelloState) {
        *self.state.lock() = state;
    }

    /// Installs the static Diffie-Hellman secret derived from the two
    /// identities. This is computable by both sides as soon as they know
    /// each other's public identity, so it is set at peer-creation time,
    /// well before the `HELLO`/`OK` exchange confirms a live path; it is
    /// what authenticates that exchange, not its result.
    pub fn set_session_key(&self, key: [u8; 32]) {
        *self.session_key.lock() = Some(SessionKey::new(key));
    }

    /// Marks the handshake complete: a session key exists and at least one
    /// path has been confirmed live by a matching `HELLO`/`OK` round trip.
    pub fn confirm_established(&self) {
        self.set_state(HelloState::Established);
    }

    /// Runs `f` with the session key, if one has been established.
    pub fn with_session_key<R>(&self, f: impl FnOnce(&[u8; 32]) -> R) -> Option<R> {
        self.session_key.lock().as_ref().map(|k| f(k.bytes()))
    }

    pub fn has_session_key(&self) -> bool {
        self.session_key.lock().is_some()
    }

    pub fn set_remote_version(&self, version: (u8, u8, u8, u16)) {
        *self.remote_version.lock() = Some(version);
    }

    pub fn remote_version(&self) -> Option<(u8, u8, u8, u16)> {
        *self.remote_version.lock()
    }

    pub fn log_receive(&self, now: i64) {
        self.last_receive_ms.store(now, Ordering::Relaxed);
    }

    pub fn last_receive(&self) -> i64 {
        self.last_receive_ms.load(Ordering::Relaxed)
    }

    pub fn is_expired(&self, now: i64) -> bool {
        now.saturating_sub(self.last_receive()) > PEER_GLOBAL_TIMEOUT_MS
    }

    /// Adds a newly learned path, evicting the least-recently-active entry
    /// if the per-peer cap is already full. No-op if the path (by lookup
    /// key) is already known.
    pub fn add_path(&self, path: Arc<Path>) {
        let mut paths = self.paths.lock();
        if paths.iter().any(|p| p.lookup_key() == path.lookup_key()) {
            return;
        }
        if paths.len() >= MAX_PATHS_PER_PEER {
            if let Some((idx, _)) = paths
                .iter()
                .enumerate()
                .min_by_key(|(_, p)| p.last_receive())
            {
                paths.remove(idx);
            }
        }
        paths.push(path);
    }

    pub fn paths(&self) -> Vec<Arc<Path>> {
        self.paths.lock().clone()
    }

    pub fn path_count(&self) -> usize {
        self.paths.lock().len()
    }

    /// Picks the best path to send on right now: alive paths ranked by
    /// lowest known latency, ties broken by most-recent traffic; falls back
    /// to the most recently active path of any liveness if none are alive
    /// (spec §4.4).
    pub fn select_path(&self, now: i64) -> Option<Arc<Path>> {
        let paths = self.paths.lock();
        Self::best_candidate(&paths, now)
    }

    fn best_candidate(paths: &[Arc<Path>], now: i64) -> Option<Arc<Path>> {
        if paths.is_empty() {
            return None;
        }
        let best_alive = paths
            .iter()
            .filter(|p| p.is_alive(now))
            .min_by(|a, b| {
                let la = a.latency().unwrap_or(i64::MAX);
                let lb = b.latency().unwrap_or(i64::MAX);
                la.cmp(&lb).then_with(|| b.last_receive().cmp(&a.last_receive()))
            })
            .cloned();
        best_alive.or_else(|| paths.iter().max_by_key(|p| p.last_receive()).cloned())
    }

    /// Recomputes and caches the preferred path. A path already preferred
    /// keeps that status on a mere latency tie with another alive path, so
    /// a path that resumes traffic does not immediately flap preference
    /// back unless it strictly beats the incumbent's latency. It is only
    /// demoted once it stops being alive or another path strictly beats it.
    /// Cheaper callers (the node loop's hot send path) read
    /// `preferred_path()` instead of re-ranking on every packet.
    pub fn refresh_preferred_path(&self, now: i64) {
        let paths = self.paths.lock();
        let current = self.preferred_path.lock().clone();
        let incumbent_still_sticky = current
            .as_ref()
            .filter(|incumbent| paths.iter().any(|p| Arc::ptr_eq(p, incumbent)) && incumbent.is_alive(now));

        let selected = match incumbent_still_sticky {
            Some(incumbent) => {
                let incumbent_latency = incumbent.latency().unwrap_or(i64::MAX);
                let better = paths
                    .iter()
                    .filter(|p| p.is_alive(now) && !Arc::ptr_eq(p, incumbent))
                    .min_by_key(|p| p.latency().unwrap_or(i64::MAX))
                    .filter(|p| p.latency().unwrap_or(i64::MAX) < incumbent_latency)
                    .cloned();
                Some(better.unwrap_or_else(|| incumbent.clone()))
            }
            None => Self::best_candidate(&paths, now),
        };
        drop(paths);
        *self.preferred_path.lock() = selected;
    }

    pub fn preferred_path(&self) -> Option<Arc<Path>> {
        self.preferred_path.lock().clone()
    }

    /// Removes paths that have neither sent nor received in
    /// `PEER_GLOBAL_TIMEOUT_MS`, keeping at least one if all would
    /// otherwise be dropped (so a peer with only stale paths still has
    /// somewhere to attempt a keepalive).
    pub fn prune_paths(&self, now: i64) {
        let mut paths = self.paths.lock();
        if paths.len() <= 1 {
            return;
        }
        paths.retain(|p| now.saturating_sub(p.last_receive()) < PEER_GLOBAL_TIMEOUT_MS);
    }

    /// True once `PEER_CONTROL_RATE_LIMIT_MS` has elapsed since the last
    /// accepted control packet from this peer (anti-flood, spec §9).
    pub fn check_control_rate_limit(&self, now: i64) -> bool {
        let last = self.last_control_packet_ms.load(Ordering::Relaxed);
        if now.saturating_sub(last) >= PEER_CONTROL_RATE_LIMIT_MS {
            self.last_control_packet_ms.store(now, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    pub fn should_send_whois(&self, now: i64) -> bool {
        let last = self.last_whois_sent_ms.load(Ordering::Relaxed);
        now.saturating_sub(last) >= WHOIS_RATE_LIMIT_MS
    }

    pub fn mark_whois_sent(&self, now: i64) {
        self.last_whois_sent_ms.store(now, Ordering::Relaxed);
    }

    pub fn mark_hello_sent(&self, now: i64) {
        self.last_hello_sent_ms.store(now, Ordering::Relaxed);
        self.set_state(HelloState::SentHello);
    }

    pub fn last_hello_sent(&self) -> i64 {
        self.last_hello_sent_ms.load(Ordering::Relaxed)
    }

    pub fn hops_required(&self) -> u8 {
        self.hops_required.load(Ordering::Relaxed)
    }

    pub fn set_hops_required(&self, hops: u8) {
        self.hops_required.store(hops, Ordering::Relaxed);
    }
}
