//! Node (C10): the receive/dispatch loop and background maintenance task
//! tying identity, topology, peer, and packet codec together. A host drives
//! [`Node::process_wire_packet`] from its own socket-reading threads; this
//! type owns no socket itself (§5, §6).

use crate::config::Config;
use crate::crypto::rng::secure_random_u64;
use crate::endpoint::Endpoint;
use crate::error::CryptoError;
use crate::fingerprint::Fingerprint;
use crate::host::HostInterface;
use crate::identity::{Address, Identity};
use crate::packet::verb::{
    EchoPayload, ErrorPayload, HelloMeta, HelloPayload, OkBody, OkPayload, PushDirectPathsPayload,
    RendezvousPayload, WhoisPayload,
};
use crate::packet::{armor, dearmor, fragment_packet};
use crate::path::Path;
use crate::peer::Peer;
use crate::protocol::{
    CipherSuite, ErrorCode, FragmentHeader, PacketHeader, Verb, FRAGMENT_HEADER_SIZE, FRAGMENT_INDICATOR,
    FRAGMENT_INDICATOR_INDEX, PACKET_HEADER_SIZE, PACKET_MIN_LENGTH, PROTOCOL_MAX_HOPS,
    VERB_FLAG_COMPRESSED, VERB_MASK,
};
use crate::topology::Topology;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Protocol version this implementation speaks; carried in `HELLO`/`OK`.
pub const PROTOCOL_VERSION: u8 = 11;
pub const SOFTWARE_MAJOR: u8 = 0;
pub const SOFTWARE_MINOR: u8 = 1;
pub const SOFTWARE_REVISION: u16 = 0;

/// All-zero placeholder key for `POLY1305_NONE`-armored `HELLO` requests
/// sent before any peer is known to exist. `HELLO`'s own embedded
/// HMAC-SHA384 (keyed by the DH agreement of the two identities) is what
/// actually authenticates the handshake; the outer MAC under this key only
/// catches bit-level corruption in transit.
const HELLO_PLACEHOLDER_KEY: [u8; 32] = [0u8; 32];

/// Default cipher suite for traffic once a session key is known.
const ESTABLISHED_CIPHER: CipherSuite = CipherSuite::Poly1305Salsa2012;

/// Anti-DoS caps on the per-source WHOIS queue (spec §4.3.2: "queues the
/// packet (bounded)").
const WHOIS_QUEUE_MAX_PACKETS_PER_ADDRESS: usize = 4;
const WHOIS_QUEUE_MAX_PENDING_ADDRESSES: usize = 64;

/// A received packet from an unresolved source, held until `WHOIS` resolves
/// its identity (or the entry times out and is dropped).
struct PendingPacket {
    path: Arc<Path>,
    local_socket: Option<i64>,
    remote: Endpoint,
    packet: Vec<u8>,
}

struct WhoisQueueEntry {
    packets: Vec<PendingPacket>,
    last_whois_sent: i64,
    retries: u32,
}

fn endpoint_to_socket_addr(endpoint: &Endpoint) -> Option<SocketAddr> {
    match endpoint {
        Endpoint::InetAddrV4(ip, port) => Some(SocketAddr::new((*ip).into(), *port)),
        Endpoint::InetAddrV6(ip, port) => Some(SocketAddr::new((*ip).into(), *port)),
        _ => None,
    }
}

fn socket_addr_to_endpoint(addr: SocketAddr) -> Endpoint {
    match addr {
        SocketAddr::V4(a) => Endpoint::InetAddrV4(*a.ip(), a.port()),
        SocketAddr::V6(a) => Endpoint::InetAddrV6(*a.ip(), a.port()),
    }
}

/// Ties identity, topology, and a host implementation together and drives
/// the receive/dispatch path plus background maintenance.
pub struct Node<H: HostInterface + 'static> {
    identity: Identity,
    topology: Arc<Topology>,
    host: Arc<H>,
    running: AtomicBool,
    background: Mutex<Option<JoinHandle<()>>>,
    whois_queue: Mutex<HashMap<Address, WhoisQueueEntry>>,
}

impl<H: HostInterface + 'static> Node<H> {
    pub fn new(identity: Identity, config: Config, host: Arc<H>) -> Arc<Self> {
        Arc::new(Self {
            identity,
            topology: Arc::new(Topology::new(config)),
            host,
            running: AtomicBool::new(false),
            background: Mutex::new(None),
            whois_queue: Mutex::new(HashMap::new()),
        })
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn topology(&self) -> &Arc<Topology> {
        &self.topology
    }

    /// Spawns the background maintenance thread: peer pulse/keepalive,
    /// path liveness demotion, root ranking, and topology/reassembly GC
    /// (spec §4.7). No-op if already running.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let node = self.clone();
        let handle = std::thread::spawn(move || node.background_loop());
        *self.background.lock().unwrap() = Some(handle);
    }

    /// Signals the background thread to stop and joins it. Does not touch
    /// any socket; the host is responsible for ceasing to feed packets in.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.background.lock().unwrap().take() {
            let _ = handle.join();
        }
    }

    fn background_loop(self: Arc<Self>) {
        let mut last_root_rank = 0i64;
        while self.running.load(Ordering::SeqCst) {
            let now = self.host.now();

            for peer in self.topology.roots().into_iter() {
                self.pulse_peer(&peer, now);
            }

            if now - last_root_rank >= crate::config::constants::ROOT_RANK_INTERVAL_MS {
                self.topology.rank_roots(now);
                last_root_rank = now;
            }

            self.topology.gc(now);

            std::thread::sleep(Duration::from_millis(250));
        }
    }

    /// Sends a keepalive `ECHO` on any path that has gone quiet for a full
    /// keepalive period, and re-sends `HELLO` if the handshake hasn't
    /// completed within `HELLO_INTERVAL_MS`.
    fn pulse_peer(&self, peer: &Arc<Peer>, now: i64) {
        peer.refresh_preferred_path(now);
        peer.prune_paths(now);

        if peer.state() != crate::peer::HelloState::Established {
            let stale = now.saturating_sub(peer.last_hello_sent()) >= crate::config::constants::HELLO_INTERVAL_MS;
            if stale {
                if let Some(path) = peer.preferred_path() {
                    self.send_hello(peer, &path, now);
                }
            }
            return;
        }

        for path in peer.paths() {
            if path.needs_keepalive(now) {
                self.send_on_path(&path, now, peer.address(), Verb::Echo, &[], peer, ESTABLISHED_CIPHER);
            }
        }
    }

    // ---- receive path ----------------------------------------------

    /// Entry point for a host feeding in a received datagram. `local_socket`
    /// is an opaque host-defined identifier for which local socket it
    /// arrived on; `remote` is the address it came from.
    pub fn process_wire_packet(&self, local_socket: Option<i64>, remote: Endpoint, now: i64, data: &[u8]) {
        if data.len() < FRAGMENT_HEADER_SIZE {
            self.topology.record_drop();
            return;
        }

        let path = self.topology.get_or_create_path(local_socket, remote.clone());

        let assembled = if data[FRAGMENT_INDICATOR_INDEX] == FRAGMENT_INDICATOR {
            match FragmentHeader::parse(data) {
                Ok(fh) => {
                    let payload = &data[FRAGMENT_HEADER_SIZE..];
                    match path.reassembler().lock().add_fragment(&fh, payload, now) {
                        Some(full) => full,
                        None => return,
                    }
                }
                Err(_) => {
                    self.topology.record_decode_error();
                    return;
                }
            }
        } else {
            if data.len() < PACKET_MIN_LENGTH {
                self.topology.record_drop();
                return;
            }
            match PacketHeader::parse(data) {
                Ok(header) if header.is_fragmented() => {
                    match path.reassembler().lock().add_fragment_zero(header.packet_id, data, now) {
                        Some(full) => full,
                        None => return,
                    }
                }
                Ok(_) => data.to_vec(),
                Err(_) => {
                    self.topology.record_decode_error();
                    return;
                }
            }
        };

        self.handle_assembled_packet(&path, local_socket, remote, now, assembled);
    }

    fn handle_assembled_packet(
        &self,
        path: &Arc<Path>,
        local_socket: Option<i64>,
        remote: Endpoint,
        now: i64,
        mut packet: Vec<u8>,
    ) {
        let Ok(mut header) = PacketHeader::parse(&packet) else {
            self.topology.record_decode_error();
            return;
        };

        if header.destination != self.identity.address() {
            self.relay(&mut header, &mut packet, now);
            return;
        }

        let Ok(cipher) = header.cipher() else {
            self.topology.record_decode_error();
            return;
        };

        let peer = self.topology.peer_by_address(header.source);
        let session_key = match cipher {
            CipherSuite::Poly1305None => HELLO_PLACEHOLDER_KEY,
            _ => match peer.as_ref().and_then(|p| p.with_session_key(|k| *k)) {
                Some(k) => k,
                None => {
                    // Source is unresolved and the cipher rules out an
                    // unauthenticated HELLO (which is the only verb that can
                    // arrive before a session key exists): resolve it via
                    // WHOIS and hold the packet until the identity (and, from
                    // it, a session key) is known (spec §4.3.2, §4.7 step 4).
                    trace!(?header.source, "unknown peer, queueing for WHOIS");
                    self.queue_for_whois(header.source, path.clone(), local_socket, remote, now, packet);
                    return;
                }
            },
        };

        self.finish_authenticated_receive(&header, peer, path, local_socket, remote, now, packet, session_key);
    }

    /// Dearmors an already-keyed packet and dispatches it by verb. Shared by
    /// the live receive path and by WHOIS-queue replay once a previously
    /// unknown source's identity (and session key) becomes known.
    fn finish_authenticated_receive(
        &self,
        header: &PacketHeader,
        peer: Option<Arc<Peer>>,
        path: &Arc<Path>,
        local_socket: Option<i64>,
        remote: Endpoint,
        now: i64,
        mut packet: Vec<u8>,
        session_key: [u8; 32],
    ) {
        let trusted_path_ids: Vec<u64> = self.topology.config().trusted_paths.keys().copied().collect();
        if let Err(CryptoError::BadMac) = dearmor(&mut packet, &session_key, &trusted_path_ids) {
            self.topology.record_mac_failure();
            return;
        }

        path.log_receive(now);
        if let Some(peer) = &peer {
            peer.log_receive(now);
            peer.add_path(path.clone());
        }

        let verb_byte = packet[PACKET_HEADER_SIZE];
        let verb = match Verb::from_code(verb_byte & VERB_MASK) {
            Ok(v) => v,
            Err(_) => {
                self.topology.record_decode_error();
                return;
            }
        };
        let raw_payload = &packet[PACKET_HEADER_SIZE + 1..];
        let payload = if verb_byte & VERB_FLAG_COMPRESSED != 0 {
            match crate::packet::compress::decompress(raw_payload) {
                Ok(p) => p,
                Err(_) => {
                    self.topology.record_decode_error();
                    return;
                }
            }
        } else {
            raw_payload.to_vec()
        };

        self.dispatch_verb(verb, header.packet_id, peer, path, local_socket, remote, now, &payload);
    }

    /// Holds a packet from an unresolved source and (re)sends `WHOIS` for it
    /// no more often than `WHOIS_RETRY_DELAY_MS`, up to `WHOIS_MAX_RETRIES`
    /// attempts. Both the per-address packet count and the number of
    /// distinct pending addresses are capped so an attacker spraying
    /// unresolvable sources can't grow this table without bound.
    fn queue_for_whois(&self, address: Address, path: Arc<Path>, local_socket: Option<i64>, remote: Endpoint, now: i64, packet: Vec<u8>) {
        let mut queue = self.whois_queue.lock().unwrap();

        if let Some(entry) = queue.get(&address) {
            if entry.retries >= crate::config::constants::WHOIS_MAX_RETRIES
                && now.saturating_sub(entry.last_whois_sent) >= crate::config::constants::WHOIS_RETRY_DELAY_MS
            {
                queue.remove(&address);
                self.topology.record_drop();
                return;
            }
        } else if queue.len() >= WHOIS_QUEUE_MAX_PENDING_ADDRESSES {
            self.topology.record_drop();
            return;
        }

        let entry = queue.entry(address).or_insert_with(|| WhoisQueueEntry {
            packets: Vec::new(),
            last_whois_sent: i64::MIN,
            retries: 0,
        });
        if entry.packets.len() >= WHOIS_QUEUE_MAX_PACKETS_PER_ADDRESS {
            self.topology.record_drop();
        } else {
            entry.packets.push(PendingPacket { path, local_socket, remote, packet });
        }

        let send_whois = now.saturating_sub(entry.last_whois_sent) >= crate::config::constants::WHOIS_RETRY_DELAY_MS;
        if send_whois {
            entry.last_whois_sent = now;
            entry.retries += 1;
        }
        drop(queue);

        if send_whois {
            self.whois(address, now);
        }
    }

    /// Drains and replays any packets held for `address` now that its
    /// identity (and session key) are known.
    fn replay_queued_packets(&self, address: Address, now: i64) {
        let packets = match self.whois_queue.lock().unwrap().remove(&address) {
            Some(entry) => entry.packets,
            None => return,
        };
        for pending in packets {
            self.handle_assembled_packet(&pending.path, pending.local_socket, pending.remote, now, pending.packet);
        }
    }

    fn dispatch_verb(
        &self,
        verb: Verb,
        packet_id: u64,
        peer: Option<Arc<Peer>>,
        path: &Arc<Path>,
        local_socket: Option<i64>,
        remote: Endpoint,
        now: i64,
        payload: &[u8],
    ) {
        match verb {
            Verb::Hello => self.handle_hello(packet_id, path, local_socket, remote, now, payload),
            Verb::Ok => self.handle_ok(peer, now, payload),
            Verb::Error => self.handle_error(peer, payload),
            Verb::Whois => self.handle_whois(peer, packet_id, now, payload),
            Verb::Echo => self.handle_echo(peer, packet_id, now, payload),
            Verb::Rendezvous => self.handle_rendezvous(payload),
            Verb::PushDirectPaths => self.handle_push_direct_paths(peer, payload),
            Verb::Nop => {}
        }
    }

    fn handle_hello(
        &self,
        packet_id: u64,
        path: &Arc<Path>,
        local_socket: Option<i64>,
        remote: Endpoint,
        now: i64,
        payload: &[u8],
    ) {
        let Ok((hello, hmac)) = HelloPayload::decode(payload) else {
            self.topology.record_decode_error();
            return;
        };
        if !hello.sender_identity.locally_validate() {
            debug!("rejecting HELLO with invalid hashcash identity");
            return;
        }

        let Ok(session_secret) = self.identity.agree(&hello.sender_identity) else {
            return;
        };
        if !crate::crypto::sha::hmac_sha384_verify(&session_secret, &hello.encode_for_hmac(), &hmac) {
            self.topology.record_mac_failure();
            return;
        }

        let sender_address = hello.sender_identity.address();
        if let Some(existing) = self.topology.peer_by_address(sender_address) {
            if existing.fingerprint() != Fingerprint::of(&hello.sender_identity) {
                // This address already resolves to a different identity's
                // fingerprint: reply ERROR(IDENTITY_COLLISION) under the key
                // the claimant itself would derive, and leave existing state
                // untouched (spec §4.3.1).
                self.send_error(
                    path,
                    now,
                    sender_address,
                    &session_secret,
                    Verb::Hello,
                    packet_id,
                    ErrorCode::IdentityCollision,
                );
                return;
            }
        }

        let peer = self.topology.get_or_create_peer(hello.sender_identity, now);
        if !peer.has_session_key() {
            peer.set_session_key(session_secret);
        }
        peer.log_receive(now);
        peer.add_path(path.clone());
        peer.refresh_preferred_path(now);
        peer.confirm_established();

        let ok = OkPayload {
            in_re_verb: Verb::Hello,
            in_re_packet_id: packet_id,
            body: OkBody::Hello {
                protocol_version: PROTOCOL_VERSION,
                major: SOFTWARE_MAJOR,
                minor: SOFTWARE_MINOR,
                revision: SOFTWARE_REVISION,
                hello_timestamp: hello.timestamp,
                observed_physical_address: remote,
                probe_token: peer.outgoing_probe_token(),
            },
        };
        self.send_on_path(
            path,
            now,
            sender_address,
            Verb::Ok,
            &ok.encode(),
            &peer,
            CipherSuite::Poly1305Salsa2012,
        );
        let _ = local_socket;
    }

    fn handle_ok(&self, peer: Option<Arc<Peer>>, now: i64, payload: &[u8]) {
        let Some(peer) = peer else { return };
        let Ok(ok) = OkPayload::decode(payload) else {
            self.topology.record_decode_error();
            return;
        };
        match ok.body {
            OkBody::Hello {
                protocol_version,
                major,
                minor,
                revision,
                hello_timestamp,
                ..
            } => {
                peer.set_remote_version((major, minor, (revision & 0xff) as u8, revision));
                let _ = protocol_version;
                if let Some(path) = peer.preferred_path() {
                    let rtt = now.saturating_sub(hello_timestamp);
                    if rtt >= 0 {
                        path.record_latency(rtt);
                    }
                }
                peer.confirm_established();
            }
            OkBody::Whois { entries } => {
                for (identity, _locator) in entries {
                    if !identity.locally_validate() {
                        continue;
                    }
                    let address = identity.address();
                    let resolved = self.topology.get_or_create_peer(identity, now);
                    if !resolved.has_session_key() {
                        // We can derive the same session key the remote would
                        // by agreeing with our own identity; no handshake
                        // round-trip is needed just to decrypt queued packets.
                        if let Ok(secret) = self.identity.agree(resolved.identity()) {
                            resolved.set_session_key(secret);
                        }
                    }
                    self.replay_queued_packets(address, now);
                }
            }
            OkBody::Echo { .. } => {}
        }
    }

    fn handle_error(&self, peer: Option<Arc<Peer>>, payload: &[u8]) {
        let Ok(err) = ErrorPayload::decode(payload) else {
            self.topology.record_decode_error();
            return;
        };
        warn!(
            peer = peer.map(|p| p.address().to_string()).unwrap_or_default(),
            code = ?err.error_code,
            in_re = ?err.in_re_verb,
            "received ERROR",
        );
    }

    fn handle_whois(&self, peer: Option<Arc<Peer>>, packet_id: u64, now: i64, payload: &[u8]) {
        let Some(peer) = peer else { return };
        if !peer.check_control_rate_limit(now) {
            return;
        }
        let Ok(whois) = WhoisPayload::decode(payload) else {
            self.topology.record_decode_error();
            return;
        };
        let entries: Vec<_> = whois
            .addresses
            .iter()
            .filter_map(|addr| self.topology.peer_by_address(*addr))
            .map(|p| (clone_public_identity(p.identity()), None))
            .collect();
        let ok = OkPayload {
            in_re_verb: Verb::Whois,
            in_re_packet_id: packet_id,
            body: OkBody::Whois { entries },
        };
        self.send_to_peer(&peer, now, Verb::Ok, &ok.encode());
    }

    fn handle_echo(&self, peer: Option<Arc<Peer>>, packet_id: u64, now: i64, payload: &[u8]) {
        let Some(peer) = peer else { return };
        if payload.is_empty() {
            // Keepalive ECHO with no payload: nothing to mirror back.
            return;
        }
        let echo = EchoPayload::decode(payload);
        let ok = OkPayload {
            in_re_verb: Verb::Echo,
            in_re_packet_id: packet_id,
            body: OkBody::Echo { payload: echo.payload },
        };
        self.send_to_peer(&peer, now, Verb::Ok, &ok.encode());
    }

    fn handle_rendezvous(&self, payload: &[u8]) {
        let Ok(rendezvous) = RendezvousPayload::decode(payload) else {
            self.topology.record_decode_error();
            return;
        };
        let Some(peer) = self.topology.peer_by_address(rendezvous.peer_address) else {
            return;
        };
        let path = self.topology.get_or_create_path(None, rendezvous.endpoint);
        peer.add_path(path.clone());
        let now = self.host.now();
        self.send_hello(&peer, &path, now);
    }

    fn handle_push_direct_paths(&self, peer: Option<Arc<Peer>>, payload: &[u8]) {
        let Some(peer) = peer else { return };
        let Ok(pushed) = PushDirectPathsPayload::decode(payload) else {
            self.topology.record_decode_error();
            return;
        };
        for candidate in pushed.paths {
            if let Some(addr) = endpoint_to_socket_addr(&candidate.endpoint) {
                if !self.host.path_check(peer.address(), addr) {
                    continue;
                }
            }
            let path = self.topology.get_or_create_path(None, candidate.endpoint);
            peer.add_path(path);
        }
    }

    fn relay(&self, header: &mut PacketHeader, packet: &mut [u8], now: i64) {
        if header.hops() >= self.topology.config().relay_max_hops.min(PROTOCOL_MAX_HOPS) {
            self.topology.record_drop();
            self.reply_cannot_deliver(header, now);
            return;
        }
        let Some(dest_peer) = self.topology.peer_by_address(header.destination) else {
            self.topology.record_drop();
            self.reply_cannot_deliver(header, now);
            return;
        };
        let Some(path) = dest_peer.preferred_path() else {
            self.topology.record_drop();
            self.reply_cannot_deliver(header, now);
            return;
        };
        header.increment_hops();
        header.write_into(packet);
        if let Some(addr) = endpoint_to_socket_addr(path.remote()) {
            self.host.wire_send(path.local_socket(), addr, packet, None);
            path.log_send(now);
        }
    }

    /// Replies `ERROR(CANNOT_DELIVER)` to a relay's source when the
    /// destination is unreachable (spec §4.7 step 3), provided the source is
    /// a peer we already hold a session key for — a relay never decrypts the
    /// packet it's forwarding, so it can't authenticate a reply to a source
    /// it has no session with. The original verb is opaque to a relay, so
    /// `in_re_verb` is reported as `NOP`.
    fn reply_cannot_deliver(&self, header: &PacketHeader, now: i64) {
        let Some(source_peer) = self.topology.peer_by_address(header.source) else {
            return;
        };
        let Some(key) = source_peer.with_session_key(|k| *k) else {
            return;
        };
        let Some(path) = source_peer.preferred_path() else {
            return;
        };
        self.send_error(&path, now, header.source, &key, Verb::Nop, header.packet_id, ErrorCode::CannotDeliver);
    }

    /// Builds and sends an `ERROR` reply under `key` (spec §4.3, §7: protocol
    /// errors "reply with ERROR to the sender; continue").
    fn send_error(
        &self,
        path: &Arc<Path>,
        now: i64,
        dest: Address,
        key: &[u8; 32],
        in_re_verb: Verb,
        in_re_packet_id: u64,
        error_code: ErrorCode,
    ) {
        let error = ErrorPayload {
            in_re_verb,
            in_re_packet_id,
            error_code,
            detail: Vec::new(),
        };
        let packet = self.build_packet(dest, Verb::Error, &error.encode(), key, CipherSuite::Poly1305Salsa2012);
        self.send_packet_on_path(path, now, &packet);
    }

    // ---- send path ----------------------------------------------------

    /// Sends `verb`/`payload` to `peer` on its currently preferred path,
    /// fragmenting as needed. Requires an established session key.
    pub fn send_to_peer(&self, peer: &Arc<Peer>, now: i64, verb: Verb, payload: &[u8]) -> bool {
        let Some(path) = peer.preferred_path() else {
            return false;
        };
        self.send_on_path(&path, now, peer.address(), verb, payload, peer, ESTABLISHED_CIPHER)
    }

    fn send_on_path(
        &self,
        path: &Arc<Path>,
        now: i64,
        dest: Address,
        verb: Verb,
        payload: &[u8],
        peer: &Arc<Peer>,
        cipher: CipherSuite,
    ) -> bool {
        let Some(key) = peer.with_session_key(|k| *k) else {
            return false;
        };
        let packet = self.build_packet(dest, verb, payload, &key, cipher);
        self.send_packet_on_path(path, now, &packet)
    }

    fn send_packet_on_path(&self, path: &Arc<Path>, now: i64, packet: &[u8]) -> bool {
        let mtu = self.mtu_for(path.remote());
        let Ok(fragments) = fragment_packet(packet, mtu) else {
            return false;
        };
        let Some(addr) = endpoint_to_socket_addr(path.remote()) else {
            return false;
        };
        let mut all_sent = true;
        for frag in &fragments {
            if !self.host.wire_send(path.local_socket(), addr, frag, None) {
                all_sent = false;
            }
        }
        if all_sent {
            path.log_send(now);
        }
        all_sent
    }

    fn mtu_for(&self, endpoint: &Endpoint) -> usize {
        let mtu = self.topology.config().mtu.clone();
        match endpoint {
            Endpoint::InetAddrV4(..) => mtu.v4_mtu,
            Endpoint::InetAddrV6(..) => mtu.v6_mtu,
            _ => mtu.default_mtu,
        }
    }

    fn build_packet(&self, dest: Address, verb: Verb, payload: &[u8], key: &[u8; 32], cipher: CipherSuite) -> Vec<u8> {
        let header = PacketHeader {
            packet_id: secure_random_u64(),
            destination: dest,
            source: self.identity.address(),
            flags_cipher_hops: 0,
            mac: [0u8; 8],
        };
        let mut buf = vec![0u8; PACKET_HEADER_SIZE];
        header.write_into(&mut buf);

        let (verb_byte, body) = match crate::packet::compress::maybe_compress(payload) {
            Some(compressed) if compressed.len() < payload.len() => (verb.code() | VERB_FLAG_COMPRESSED, compressed),
            _ => (verb.code(), payload.to_vec()),
        };
        buf.push(verb_byte);
        buf.extend_from_slice(&body);

        armor(&mut buf, key, cipher).expect("buffer is always at least header + verb byte long");
        buf
    }

    /// Initiates a handshake: derives the static session secret from both
    /// identities, registers the peer, and sends `HELLO` under the
    /// placeholder key (the embedded HMAC is what actually authenticates
    /// it).
    pub fn hello_peer(&self, remote_identity: Identity, local_socket: Option<i64>, remote: Endpoint, now: i64) -> Arc<Peer> {
        let Ok(session_secret) = self.identity.agree(&remote_identity) else {
            return self.topology.get_or_create_peer(remote_identity, now);
        };
        let peer = self.topology.get_or_create_peer(remote_identity, now);
        if !peer.has_session_key() {
            peer.set_session_key(session_secret);
        }
        let path = self.topology.get_or_create_path(local_socket, remote);
        peer.add_path(path.clone());
        peer.refresh_preferred_path(now);
        self.send_hello(&peer, &path, now);
        peer
    }

    fn send_hello(&self, peer: &Arc<Peer>, path: &Arc<Path>, now: i64) {
        let mut meta = HelloMeta::new();
        let _ = meta.insert("v", vec![SOFTWARE_MAJOR, SOFTWARE_MINOR]);
        let hello = HelloPayload {
            protocol_version: PROTOCOL_VERSION,
            major: SOFTWARE_MAJOR,
            minor: SOFTWARE_MINOR,
            revision: SOFTWARE_REVISION,
            timestamp: now,
            sender_identity: clone_public_identity(&self.identity),
            receiver_physical_address: socket_addr_to_endpoint_or_nil(path.remote()),
            meta,
        };
        let Some(hmac_key) = peer.with_session_key(|k| *k) else {
            return;
        };
        let hmac = crate::crypto::sha::hmac_sha384(&hmac_key, &hello.encode_for_hmac());
        let payload = hello.encode(&hmac);

        let packet = self.build_packet(peer.address(), Verb::Hello, &payload, &HELLO_PLACEHOLDER_KEY, CipherSuite::Poly1305None);
        self.send_packet_on_path(path, now, &packet);
        peer.mark_hello_sent(now);
    }

    /// Resolves `address` by asking a root, if one is known and the
    /// request isn't already pending too recently (spec §4.3).
    pub fn whois(&self, address: Address, now: i64) -> bool {
        let Some(root) = self.topology.best_root() else {
            return false;
        };
        if !root.should_send_whois(now) {
            return false;
        }
        let whois = WhoisPayload { addresses: vec![address] };
        let sent = self.send_to_peer(&root, now, Verb::Whois, &whois.encode());
        if sent {
            root.mark_whois_sent(now);
        }
        sent
    }
}

fn socket_addr_to_endpoint_or_nil(endpoint: &Endpoint) -> Endpoint {
    endpoint_to_socket_addr(endpoint).map(socket_addr_to_endpoint).unwrap_or(Endpoint::Nil)
}

/// `Identity` holds no `Clone` impl (its private-key material shouldn't be
/// duplicated); this re-marshals the public half only, which is cheap and
/// always available, for the cases (WHOIS replies, outgoing HELLO) where a
/// public-only copy is what's needed.
fn clone_public_identity(identity: &Identity) -> Identity {
    Identity::unmarshal(&identity.marshal(false)).expect("marshal/unmarshal of our own identity cannot fail")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::ObjectType;
    use crate::identity::IdentityType;
    use parking_lot::Mutex as PLMutex;
    use std::collections::HashMap;
    use std::net::Ipv4Addr;
    use std::sync::atomic::AtomicI64;

    struct FakeHost {
        clock: AtomicI64,
        outbox: PLMutex<Vec<(SocketAddr, Vec<u8>)>>,
        state: PLMutex<HashMap<(ObjectType, [u64; 2]), Vec<u8>>>,
    }

    impl FakeHost {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                clock: AtomicI64::new(1_000_000),
                outbox: PLMutex::new(Vec::new()),
                state: PLMutex::new(HashMap::new()),
            })
        }

        fn advance(&self, ms: i64) {
            self.clock.fetch_add(ms, Ordering::Relaxed);
        }

        fn take_outbox(&self) -> Vec<(SocketAddr, Vec<u8>)> {
            std::mem::take(&mut self.outbox.lock())
        }
    }

    impl HostInterface for FakeHost {
        fn wire_send(&self, _local_socket: Option<i64>, dest: SocketAddr, data: &[u8], _ip_ttl_hint: Option<u8>) -> bool {
            self.outbox.lock().push((dest, data.to_vec()));
            true
        }

        fn state_get(&self, object_type: ObjectType, id: [u64; 2]) -> Option<Vec<u8>> {
            self.state.lock().get(&(object_type, id)).cloned()
        }

        fn state_put(&self, object_type: ObjectType, id: [u64; 2], data: &[u8]) -> Result<(), String> {
            self.state.lock().insert((object_type, id), data.to_vec());
            Ok(())
        }

        fn now(&self) -> i64 {
            self.clock.load(Ordering::Relaxed)
        }
    }

    fn addr(n: u8) -> Endpoint {
        Endpoint::InetAddrV4(Ipv4Addr::new(198, 51, 100, n), 9993)
    }

    #[test]
    fn hello_then_ok_establishes_a_peer_on_both_sides() {
        let host_a = FakeHost::new();
        let host_b = FakeHost::new();
        let identity_a = Identity::generate(IdentityType::C25519);
        let identity_b = Identity::generate(IdentityType::C25519);

        let node_a = Node::new(Identity::unmarshal(&identity_a.marshal(true)).unwrap(), Config::default(), host_a.clone());
        let node_b = Node::new(Identity::unmarshal(&identity_b.marshal(true)).unwrap(), Config::default(), host_b.clone());

        let now = host_a.now();
        let peer_b_side_a = node_a.hello_peer(clone_public_identity(&identity_b), Some(1), addr(2), now);
        assert_eq!(peer_b_side_a.state(), crate::peer::HelloState::SentHello);

        let sent = host_a.take_outbox();
        assert_eq!(sent.len(), 1);

        // Node B receives the HELLO.
        node_b.process_wire_packet(Some(2), addr(1), now, &sent[0].1);
        let reply = host_b.take_outbox();
        assert_eq!(reply.len(), 1, "node B should answer HELLO with OK");

        let peer_a_side_b = node_b.topology().peer_by_address(identity_a.address()).unwrap();
        assert_eq!(peer_a_side_b.state(), crate::peer::HelloState::Established);

        // Node A receives the OK.
        node_a.process_wire_packet(Some(1), addr(2), now + 5, &reply[0].1);
        assert_eq!(peer_b_side_a.state(), crate::peer::HelloState::Established);
        assert!(peer_b_side_a.preferred_path().unwrap().latency().is_some());
    }

    #[test]
    fn unfragmented_short_packet_is_dropped_without_panicking() {
        let host = FakeHost::new();
        let identity = Identity::generate(IdentityType::C25519);
        let node = Node::new(identity, Config::default(), host);
        node.process_wire_packet(None, addr(9), 0, &[0u8; 4]);
        assert_eq!(node.topology().dropped_packets(), 1);
    }

    #[test]
    fn fragmented_round_trip_over_a_small_mtu() {
        let host_a = FakeHost::new();
        let host_b = FakeHost::new();
        let identity_a = Identity::generate(IdentityType::C25519);
        let identity_b = Identity::generate(IdentityType::C25519);

        let mut small_mtu_config = Config::default();
        small_mtu_config.mtu.v4_mtu = 64;

        let node_a = Node::new(Identity::unmarshal(&identity_a.marshal(true)).unwrap(), small_mtu_config, host_a.clone());
        let node_b = Node::new(Identity::unmarshal(&identity_b.marshal(true)).unwrap(), Config::default(), host_b.clone());

        let now = host_a.now();
        node_a.hello_peer(clone_public_identity(&identity_b), Some(1), addr(2), now);
        let fragments = host_a.take_outbox();
        assert!(fragments.len() > 1, "a 64-byte MTU HELLO should fragment");

        for (_, frag) in &fragments {
            node_b.process_wire_packet(Some(2), addr(1), now, frag);
        }
        assert!(node_b.topology().peer_by_address(identity_a.address()).is_some());
    }

    fn manual_packet(source: Address, dest: Address, packet_id: u64, verb: Verb, payload: &[u8], key: &[u8; 32]) -> Vec<u8> {
        let header = PacketHeader {
            packet_id,
            destination: dest,
            source,
            flags_cipher_hops: 0,
            mac: [0u8; 8],
        };
        let mut packet = vec![0u8; PACKET_HEADER_SIZE];
        header.write_into(&mut packet);
        packet.push(verb.code());
        packet.extend_from_slice(payload);
        armor(&mut packet, key, CipherSuite::Poly1305Salsa2012).unwrap();
        packet
    }

    #[test]
    fn unknown_source_triggers_whois_and_replays_once_resolved() {
        let host_b = FakeHost::new();
        let identity_a = Identity::generate(IdentityType::C25519);
        let identity_b = Identity::generate(IdentityType::C25519);
        let identity_root = Identity::generate(IdentityType::C25519);

        let node_b = Node::new(
            Identity::unmarshal(&identity_b.marshal(true)).unwrap(),
            Config::default(),
            host_b.clone(),
        );
        let now = host_b.now();

        // B already has an established root.
        let root_peer = node_b.topology().get_or_create_peer(clone_public_identity(&identity_root), now);
        let root_secret = identity_b.agree(&identity_root).unwrap();
        root_peer.set_session_key(root_secret);
        let root_path = node_b.topology().get_or_create_path(Some(9), addr(200));
        root_peer.add_path(root_path);
        root_peer.refresh_preferred_path(now);
        node_b.topology().add_root(root_peer);

        // A sends B an ECHO without any prior handshake, encrypted under the
        // key both sides can derive by DH alone.
        let session_key = identity_a.agree(&identity_b).unwrap();
        let echo = EchoPayload { payload: vec![9, 9, 9] };
        let packet = manual_packet(identity_a.address(), identity_b.address(), 42, Verb::Echo, &echo.encode(), &session_key);
        node_b.process_wire_packet(Some(1), addr(5), now, &packet);

        // B can't decrypt without a session, so it must WHOIS the root
        // instead of just dropping.
        let to_root = host_b.take_outbox();
        assert_eq!(to_root.len(), 1, "unknown source should trigger a WHOIS, not a silent drop");
        assert_eq!(node_b.topology().dropped_packets(), 0);
        assert!(node_b.topology().peer_by_address(identity_a.address()).is_none());

        // Root resolves A's identity.
        let whois_ok = OkPayload {
            in_re_verb: Verb::Whois,
            in_re_packet_id: 7,
            body: OkBody::Whois {
                entries: vec![(clone_public_identity(&identity_a), None)],
            },
        };
        let ok_packet = manual_packet(
            identity_root.address(),
            identity_b.address(),
            7,
            Verb::Ok,
            &whois_ok.encode(),
            &root_secret,
        );
        node_b.process_wire_packet(Some(9), addr(200), now + 10, &ok_packet);

        assert!(node_b.topology().peer_by_address(identity_a.address()).is_some());
        let to_a = host_b.take_outbox();
        assert_eq!(to_a.len(), 1, "the queued ECHO should be replayed once A's identity resolves");
    }

    #[test]
    fn hello_from_colliding_identity_is_rejected_with_error() {
        let host_b = FakeHost::new();
        let identity_a = Identity::generate(IdentityType::C25519);
        let impostor = Identity::generate(IdentityType::C25519);
        let identity_b = Identity::generate(IdentityType::C25519);

        let node_b = Node::new(
            Identity::unmarshal(&identity_b.marshal(true)).unwrap(),
            Config::default(),
            host_b.clone(),
        );
        let now = host_b.now();

        // A real 40-bit address collision between two distinct identities
        // can't be manufactured in a test, so we bind an unrelated peer (A)
        // directly at the impostor's own address via the test-only seam,
        // simulating that address already being claimed by a different
        // fingerprint when the impostor's HELLO arrives.
        let decoy_peer = Arc::new(Peer::new(clone_public_identity(&identity_a), now));
        node_b.topology().bind_peer_for_test(impostor.address(), decoy_peer.clone());

        let hmac_key = node_b.identity().agree(&impostor).unwrap();
        let hello = HelloPayload {
            protocol_version: PROTOCOL_VERSION,
            major: 0,
            minor: 1,
            revision: 0,
            timestamp: now,
            sender_identity: clone_public_identity(&impostor),
            receiver_physical_address: Endpoint::Nil,
            meta: HelloMeta::new(),
        };
        let hmac = crate::crypto::sha::hmac_sha384(&hmac_key, &hello.encode_for_hmac());
        let payload = hello.encode(&hmac);

        let path = node_b.topology().get_or_create_path(Some(3), addr(7));
        node_b.handle_hello(99, &path, Some(3), addr(7), now, &payload);

        // The decoy peer's identity/state must be untouched...
        assert_eq!(decoy_peer.fingerprint(), Fingerprint::of(&identity_a));
        assert_eq!(decoy_peer.state(), crate::peer::HelloState::New);

        // ...and B must have replied ERROR(IDENTITY_COLLISION) under the key
        // the impostor itself would derive, not a silent drop.
        let sent = host_b.take_outbox();
        assert_eq!(sent.len(), 1);
        let session_key = impostor.agree(node_b.identity()).unwrap();
        let mut reply = sent[0].1.clone();
        dearmor(&mut reply, &session_key, &[]).unwrap();
        let verb = Verb::from_code(reply[PACKET_HEADER_SIZE] & VERB_MASK).unwrap();
        assert_eq!(verb, Verb::Error);
        let error = ErrorPayload::decode(&reply[PACKET_HEADER_SIZE + 1..]).unwrap();
        assert_eq!(error.error_code, ErrorCode::IdentityCollision);
        assert_eq!(error.in_re_verb, Verb::Hello);
    }
}
