//! Wire codec: header/fragment layout, armor/dearmor, fragmentation and
//! reassembly, and verb payload encoding.

use vl1_core::identity::Address;
use vl1_core::packet::reassembly::FragmentAssembler;
use vl1_core::packet::verb::{EchoPayload, ErrorPayload, HelloMeta, RendezvousPayload, WhoisPayload};
use vl1_core::packet::{armor, dearmor, fragment_packet};
use vl1_core::protocol::{CipherSuite, ErrorCode, FragmentHeader, PacketHeader, Verb, PACKET_HEADER_SIZE};
use vl1_core::Endpoint;

fn sample_header(dest: u8, src: u8) -> PacketHeader {
    PacketHeader {
        packet_id: 0xaabbccdd_11223344,
        destination: Address::from_bytes(&[dest; 5]).unwrap(),
        source: Address::from_bytes(&[src; 5]).unwrap(),
        flags_cipher_hops: 0,
        mac: [0u8; 8],
    }
}

fn build_packet(header: &PacketHeader, verb: Verb, payload: &[u8]) -> Vec<u8> {
    let mut buf = vec![0u8; PACKET_HEADER_SIZE];
    header.write_into(&mut buf);
    buf.push(verb.code());
    buf.extend_from_slice(payload);
    buf
}

#[test]
fn packet_header_parse_write_round_trips_and_preserves_hop_mutation() {
    let mut header = sample_header(0x11, 0x22);
    header.set_cipher(CipherSuite::AesGmacSiv);
    header.set_fragmented(true);
    header.increment_hops();

    let mut buf = vec![0u8; PACKET_HEADER_SIZE];
    header.write_into(&mut buf);
    let parsed = PacketHeader::parse(&buf).unwrap();

    assert_eq!(parsed.packet_id, header.packet_id);
    assert_eq!(parsed.destination, header.destination);
    assert_eq!(parsed.cipher().unwrap(), CipherSuite::AesGmacSiv);
    assert!(parsed.is_fragmented());
    assert_eq!(parsed.hops(), 1);
}

#[test]
fn armor_dearmor_round_trips_under_every_real_cipher_suite() {
    let key = [9u8; 32];
    for cipher in [CipherSuite::Poly1305None, CipherSuite::Poly1305Salsa2012, CipherSuite::AesGmacSiv] {
        let header = sample_header(0x33, 0x44);
        let original = build_packet(&header, Verb::Echo, b"integration test payload");
        let mut armored = original.clone();
        armor(&mut armored, &key, cipher).unwrap();

        let mut restored = armored.clone();
        dearmor(&mut restored, &key, &[]).unwrap();
        assert_eq!(&restored[PACKET_HEADER_SIZE..], &original[PACKET_HEADER_SIZE..]);

        // Wrong key must never authenticate.
        let mut wrongly_keyed = armored.clone();
        assert!(dearmor(&mut wrongly_keyed, &[0u8; 32], &[]).is_err());
    }
}

#[test]
fn a_small_mtu_fragments_and_reassembles_back_to_the_original() {
    let header = sample_header(0x55, 0x66);
    let payload: Vec<u8> = (0..600u32).map(|i| (i % 256) as u8).collect();
    let packet = build_packet(&header, Verb::Echo, &payload);

    let fragments = fragment_packet(&packet, 96).unwrap();
    assert!(fragments.len() > 1);

    let mut assembler = FragmentAssembler::default();
    let mut reassembled = None;
    for frag in &fragments {
        if frag[vl1_core::protocol::FRAGMENT_INDICATOR_INDEX] == vl1_core::protocol::FRAGMENT_INDICATOR {
            let fh = FragmentHeader::parse(frag).unwrap();
            let body = &frag[vl1_core::protocol::FRAGMENT_HEADER_SIZE..];
            if let Some(full) = assembler.add_fragment(&fh, body, 0) {
                reassembled = Some(full);
            }
        } else {
            let h = PacketHeader::parse(frag).unwrap();
            assert!(h.is_fragmented());
            if let Some(full) = assembler.add_fragment_zero(h.packet_id, frag, 0) {
                reassembled = Some(full);
            }
        }
    }

    assert_eq!(reassembled.expect("all fragments delivered"), packet);
}

#[test]
fn a_single_missing_fragment_never_yields_a_reassembled_packet() {
    let header = sample_header(0x77, 0x88);
    let payload = vec![0x42u8; 500];
    let packet = build_packet(&header, Verb::Echo, &payload);
    let fragments = fragment_packet(&packet, 96).unwrap();
    assert!(fragments.len() > 2);

    let mut assembler = FragmentAssembler::default();
    // Drop the last fragment.
    for frag in &fragments[..fragments.len() - 1] {
        if frag[vl1_core::protocol::FRAGMENT_INDICATOR_INDEX] == vl1_core::protocol::FRAGMENT_INDICATOR {
            let fh = FragmentHeader::parse(frag).unwrap();
            let body = &frag[vl1_core::protocol::FRAGMENT_HEADER_SIZE..];
            assert!(assembler.add_fragment(&fh, body, 0).is_none());
        } else {
            let h = PacketHeader::parse(frag).unwrap();
            assert!(assembler.add_fragment_zero(h.packet_id, frag, 0).is_none());
        }
    }
}

#[test]
fn error_payload_round_trips() {
    let err = ErrorPayload {
        in_re_verb: Verb::Whois,
        in_re_packet_id: 42,
        error_code: ErrorCode::ObjNotFound,
        detail: b"no such address".to_vec(),
    };
    let decoded = ErrorPayload::decode(&err.encode()).unwrap();
    assert_eq!(decoded.in_re_verb, Verb::Whois);
    assert_eq!(decoded.in_re_packet_id, 42);
    assert_eq!(decoded.error_code, ErrorCode::ObjNotFound);
    assert_eq!(decoded.detail, b"no such address");
}

#[test]
fn whois_payload_round_trips_multiple_addresses() {
    let addresses = vec![Address::from_bytes(&[1; 5]).unwrap(), Address::from_bytes(&[2; 5]).unwrap()];
    let whois = WhoisPayload { addresses: addresses.clone() };
    let decoded = WhoisPayload::decode(&whois.encode()).unwrap();
    assert_eq!(decoded.addresses, addresses);
}

#[test]
fn rendezvous_payload_round_trips() {
    let rendezvous = RendezvousPayload {
        flags: 0,
        peer_address: Address::from_bytes(&[7; 5]).unwrap(),
        endpoint: Endpoint::InetAddrV4(std::net::Ipv4Addr::new(198, 51, 100, 9), 9993),
    };
    let encoded = rendezvous.encode().unwrap();
    let decoded = RendezvousPayload::decode(&encoded).unwrap();
    assert_eq!(decoded.peer_address, rendezvous.peer_address);
    assert_eq!(decoded.endpoint, rendezvous.endpoint);
}

#[test]
fn echo_payload_mirrors_its_input_exactly() {
    let echo = EchoPayload { payload: b"ping".to_vec() };
    let decoded = EchoPayload::decode(&echo.encode());
    assert_eq!(decoded.payload, b"ping");
}

#[test]
fn hello_meta_rejects_entries_past_the_bound() {
    let mut meta = HelloMeta::new();
    for i in 0..8 {
        assert!(meta.insert(&format!("k{i}"), vec![0u8]).is_ok());
    }
    assert!(meta.insert("one-too-many", vec![0u8]).is_err());
}
