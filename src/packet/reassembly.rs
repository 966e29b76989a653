//! Fragment reassembly (C5): per-sender bounded buffering of fragment 0
//! (the header-bearing chunk) plus continuation fragments, keyed on
//! packet id. Per §9's concurrency design this type is meant to be owned
//! by a single [`crate::path::Path`] behind that path's own mutex, rather
//! than by a process-wide table — so it only needs to track one remote's
//! in-flight messages and takes no lock of its own.

use crate::config::constants::{FRAGMENT_REASSEMBLY_TIMEOUT_MS, MAX_FRAGMENTS_PER_PATH, MAX_PACKET_FRAGMENTS};
use crate::protocol::{FragmentHeader, PACKET_HEADER_SIZE};
use std::collections::HashMap;

struct PartialMessage {
    /// Fragment 0: the full header plus its leading payload chunk.
    fragment0: Option<Vec<u8>>,
    /// Continuation fragments (index 1..N-1), payload only.
    continuations: HashMap<u8, Vec<u8>>,
    /// Total fragment count, learned from the first continuation fragment
    /// to arrive (fragment 0 does not carry it).
    total: Option<u8>,
    created_at: i64,
}

impl PartialMessage {
    fn new(now: i64) -> Self {
        Self {
            fragment0: None,
            continuations: HashMap::new(),
            total: None,
            created_at: now,
        }
    }

    fn is_complete(&self) -> bool {
        match self.total {
            Some(total) if self.fragment0.is_some() => {
                (1..total).all(|i| self.continuations.contains_key(&i))
            }
            _ => false,
        }
    }

    fn assemble(mut self) -> Vec<u8> {
        let mut out = self.fragment0.take().unwrap();
        let total = self.total.unwrap();
        for i in 1..total {
            if let Some(chunk) = self.continuations.remove(&i) {
                out.extend_from_slice(&chunk);
            }
        }
        out
    }
}

/// Bounded, timing-out reassembly buffer for one remote path's in-flight
/// fragmented messages.
pub struct FragmentAssembler {
    entries: HashMap<u64, PartialMessage>,
    max_entries: usize,
}

impl Default for FragmentAssembler {
    fn default() -> Self {
        Self::new(MAX_FRAGMENTS_PER_PATH)
    }
}

impl FragmentAssembler {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: HashMap::new(),
            max_entries,
        }
    }

    /// Feed in fragment 0: `packet` is the full on-wire header (27 bytes)
    /// plus its leading payload chunk, with the `FRAGMENTED` flag set.
    /// Returns the assembled packet once every fragment has arrived.
    pub fn add_fragment_zero(&mut self, packet_id: u64, packet: &[u8], now: i64) -> Option<Vec<u8>> {
        if packet.len() < PACKET_HEADER_SIZE {
            return None;
        }
        if !self.entries.contains_key(&packet_id) && self.entries.len() >= self.max_entries {
            self.evict_oldest();
        }
        let entry = self.entries.entry(packet_id).or_insert_with(|| PartialMessage::new(now));
        if entry.fragment0.is_none() {
            entry.fragment0 = Some(packet.to_vec());
        }
        if entry.is_complete() {
            return self.entries.remove(&packet_id).map(PartialMessage::assemble);
        }
        None
    }

    /// Feed in a continuation fragment (the sentinel-tagged wire format).
    /// Returns the assembled packet once complete, or `Ok(None)` while
    /// still waiting on more fragments.
    pub fn add_fragment(&mut self, header: &FragmentHeader, payload: &[u8], now: i64) -> Option<Vec<u8>> {
        if header.total_fragments as usize > MAX_PACKET_FRAGMENTS || header.fragment_no == 0 {
            return None;
        }
        let packet_id = header.packet_id;
        if !self.entries.contains_key(&packet_id) && self.entries.len() >= self.max_entries {
            self.evict_oldest();
        }
        let entry = self.entries.entry(packet_id).or_insert_with(|| PartialMessage::new(now));
        entry.total.get_or_insert(header.total_fragments);
        entry.continuations.entry(header.fragment_no).or_insert_with(|| payload.to_vec());

        if entry.is_complete() {
            return self.entries.remove(&packet_id).map(PartialMessage::assemble);
        }
        None
    }

    /// Drop the single oldest in-flight entry, the anti-DoS fallback when
    /// the per-path cap is hit before expiry would naturally free a slot.
    fn evict_oldest(&mut self) {
        if let Some((&oldest_id, _)) = self.entries.iter().min_by_key(|(_, m)| m.created_at) {
            self.entries.remove(&oldest_id);
        }
    }

    /// Expire entries that have been incomplete for longer than
    /// [`FRAGMENT_REASSEMBLY_TIMEOUT_MS`]. Call periodically from GC.
    pub fn expire(&mut self, now: i64) {
        self.entries.retain(|_, m| now - m.created_at < FRAGMENT_REASSEMBLY_TIMEOUT_MS);
    }

    pub fn in_flight_count(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Address;
    use crate::protocol::PacketHeader;

    fn header_bytes(packet_id: u64) -> Vec<u8> {
        let header = PacketHeader {
            packet_id,
            destination: Address::from_bytes(&[0x11; 5]).unwrap(),
            source: Address::from_bytes(&[0x22; 5]).unwrap(),
            flags_cipher_hops: 0x80,
            mac: [0u8; 8],
        };
        let mut buf = vec![0u8; PACKET_HEADER_SIZE];
        header.write_into(&mut buf);
        buf
    }

    #[test]
    fn reassembles_in_reverse_order() {
        let mut asm = FragmentAssembler::default();
        let packet_id = 0xdead_beef_0000_0001;

        let mut frag0 = header_bytes(packet_id);
        frag0.extend_from_slice(&[1, 2, 3]);

        let frag_headers: Vec<FragmentHeader> = (1..4)
            .map(|i| FragmentHeader {
                packet_id,
                destination: Address::from_bytes(&[0x11; 5]).unwrap(),
                total_fragments: 4,
                fragment_no: i,
                hops: 0,
            })
            .collect();
        let payloads: Vec<Vec<u8>> = (1..4u8).map(|i| vec![i, i, i]).collect();

        assert!(asm.add_fragment(&frag_headers[2], &payloads[2], 0).is_none());
        assert!(asm.add_fragment(&frag_headers[1], &payloads[1], 0).is_none());
        assert!(asm.add_fragment(&frag_headers[0], &payloads[0], 0).is_none());
        let assembled = asm.add_fragment_zero(packet_id, &frag0, 0).unwrap();

        let mut expected = frag0.clone();
        for p in &payloads {
            expected.extend_from_slice(p);
        }
        assert_eq!(assembled, expected);
        assert_eq!(asm.in_flight_count(), 0);
    }

    #[test]
    fn missing_fragment_never_completes() {
        let mut asm = FragmentAssembler::default();
        let packet_id = 1;
        let frag0 = header_bytes(packet_id);
        assert!(asm.add_fragment_zero(packet_id, &frag0, 0).is_none());
        let fh = FragmentHeader {
            packet_id,
            destination: Address::from_bytes(&[0x11; 5]).unwrap(),
            total_fragments: 3,
            fragment_no: 2,
            hops: 0,
        };
        assert!(asm.add_fragment(&fh, &[9], 0).is_none());
        assert_eq!(asm.in_flight_count(), 1);
    }

    #[test]
    fn expiry_drops_stale_entries() {
        let mut asm = FragmentAssembler::default();
        let frag0 = header_bytes(42);
        asm.add_fragment_zero(42, &frag0, 0);
        asm.expire(FRAGMENT_REASSEMBLY_TIMEOUT_MS + 1);
        assert_eq!(asm.in_flight_count(), 0);
    }

    #[test]
    fn cap_evicts_oldest_entry() {
        let mut asm = FragmentAssembler::new(2);
        asm.add_fragment_zero(1, &header_bytes(1), 0);
        asm.add_fragment_zero(2, &header_bytes(2), 10);
        asm.add_fragment_zero(3, &header_bytes(3), 20);
        assert_eq!(asm.in_flight_count(), 2);
    }
}
