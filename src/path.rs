//! Path (C6): one candidate underlay route to a remote node, identified by
//! the `(local_socket, remote endpoint)` pair it was learned on. A peer may
//! hold several; [`crate::peer::Peer`] picks among them for each send.

use crate::config::constants::{PATH_ALIVE_TIMEOUT_MS, PATH_KEEPALIVE_PERIOD_MS};
use crate::endpoint::Endpoint;
use crate::packet::reassembly::FragmentAssembler;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicI64, Ordering};

/// Sentinel stored in `latency_ms` before any round-trip has been measured.
pub const LATENCY_UNKNOWN: i64 = -1;

/// One underlay route: a local socket identifier (host-defined, opaque to
/// this crate) paired with the remote endpoint reachable through it.
pub struct Path {
    local_socket: Option<i64>,
    remote: Endpoint,
    last_send_ms: AtomicI64,
    last_receive_ms: AtomicI64,
    latency_ms: AtomicI64,
    /// This path's own fragment-reassembly state. Kept per-path (not
    /// process-wide) so an attacker cannot exhaust reassembly slots shared
    /// across every remote by only ever using one path (spec §9).
    reassembly: Mutex<FragmentAssembler>,
}

impl Path {
    pub fn new(local_socket: Option<i64>, remote: Endpoint) -> Self {
        Self {
            local_socket,
            remote,
            last_send_ms: AtomicI64::new(i64::MIN),
            last_receive_ms: AtomicI64::new(i64::MIN),
            latency_ms: AtomicI64::new(LATENCY_UNKNOWN),
            reassembly: Mutex::new(FragmentAssembler::default()),
        }
    }

    pub fn local_socket(&self) -> Option<i64> {
        self.local_socket
    }

    pub fn remote(&self) -> &Endpoint {
        &self.remote
    }

    /// The key a [`crate::topology::Topology`] path table dedups on.
    pub fn lookup_key(&self) -> (Option<i64>, Endpoint) {
        (self.local_socket, self.remote.clone())
    }

    pub fn log_send(&self, now: i64) {
        self.last_send_ms.store(now, Ordering::Relaxed);
    }

    pub fn log_receive(&self, now: i64) {
        self.last_receive_ms.store(now, Ordering::Relaxed);
    }

    pub fn last_send(&self) -> i64 {
        self.last_send_ms.load(Ordering::Relaxed)
    }

    pub fn last_receive(&self) -> i64 {
        self.last_receive_ms.load(Ordering::Relaxed)
    }

    /// Has this path received an authenticated packet recently enough to
    /// still be considered usable.
    pub fn is_alive(&self, now: i64) -> bool {
        now.saturating_sub(self.last_receive()) < PATH_ALIVE_TIMEOUT_MS
    }

    /// Stricter than `is_alive`: seen traffic within the last keepalive
    /// period, i.e. doesn't currently need a keepalive of its own.
    pub fn is_active(&self, now: i64) -> bool {
        now.saturating_sub(self.last_receive()) < PATH_KEEPALIVE_PERIOD_MS
    }

    /// True once this path has gone quiet for a full keepalive period on the
    /// send side, meaning the peer pulse pass should send a keepalive here.
    pub fn needs_keepalive(&self, now: i64) -> bool {
        self.is_alive(now) && now.saturating_sub(self.last_send()) >= PATH_KEEPALIVE_PERIOD_MS
    }

    pub fn record_latency(&self, round_trip_ms: i64) {
        self.latency_ms.store(round_trip_ms.max(0), Ordering::Relaxed);
    }

    pub fn latency(&self) -> Option<i64> {
        match self.latency_ms.load(Ordering::Relaxed) {
            v if v < 0 => None,
            v => Some(v),
        }
    }

    pub fn reassembler(&self) -> &Mutex<FragmentAssembler> {
        &self.reassembly
    }

    /// Drop this path's stale in-flight fragment reassembly state. Called
    /// from the node's periodic GC pass, not per-packet.
    pub fn expire_fragments(&self, now: i64) {
        self.reassembly.lock().expire(now);
    }
}
