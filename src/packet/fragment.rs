//! Splitting an armored packet into on-wire fragments (§4.2.3). Fragment 0
//! is the original packet's first `mtu` bytes with the `FRAGMENTED` flag
//! set in its header; fragments 1..N-1 carry a 16-byte fragment header
//! followed by a chunk of the remaining payload. The continuation
//! fragments carry no cipher state of their own — they are pure chunks of
//! the already-armored byte stream, reassembled before dearmor runs.

use crate::error::DecodeError;
use crate::protocol::{
    FragmentHeader, PacketHeader, FRAGMENT_HEADER_SIZE, MAX_PACKET_FRAGMENTS, PACKET_HEADER_SIZE,
};

/// Splits `packet` (already armored: header + verb + payload) into wire
/// datagrams no larger than `mtu` bytes each. Returns a single-element
/// vector unchanged if `packet` already fits. `hops` is copied into every
/// continuation fragment's header, matching the primary header's hop
/// count at the time of fragmentation.
pub fn fragment_packet(packet: &[u8], mtu: usize) -> Result<Vec<Vec<u8>>, DecodeError> {
    if packet.len() <= mtu {
        return Ok(vec![packet.to_vec()]);
    }
    if mtu <= PACKET_HEADER_SIZE || mtu <= FRAGMENT_HEADER_SIZE {
        return Err(DecodeError::FieldTooLarge);
    }

    let mut header = PacketHeader::parse(packet)?;
    let tail = &packet[PACKET_HEADER_SIZE..];

    let first_chunk_size = mtu - PACKET_HEADER_SIZE;
    let first_chunk_size = first_chunk_size.min(tail.len());
    let (first_chunk, rest) = tail.split_at(first_chunk_size);

    let continuation_payload_size = mtu - FRAGMENT_HEADER_SIZE;
    let continuation_count = (rest.len() + continuation_payload_size - 1) / continuation_payload_size;
    let total_fragments = 1 + continuation_count;
    if total_fragments > MAX_PACKET_FRAGMENTS {
        return Err(DecodeError::FieldTooLarge);
    }

    header.set_fragmented(true);
    let mut fragments = Vec::with_capacity(total_fragments);
    let mut frag0 = vec![0u8; PACKET_HEADER_SIZE];
    header.write_into(&mut frag0);
    frag0.extend_from_slice(first_chunk);
    fragments.push(frag0);

    for (i, chunk) in rest.chunks(continuation_payload_size).enumerate() {
        let frag_header = FragmentHeader {
            packet_id: header.packet_id,
            destination: header.destination,
            total_fragments: total_fragments as u8,
            fragment_no: (i + 1) as u8,
            hops: header.hops(),
        };
        let mut buf = vec![0u8; FRAGMENT_HEADER_SIZE];
        frag_header.write_into(&mut buf);
        buf.extend_from_slice(chunk);
        fragments.push(buf);
    }

    Ok(fragments)
}
