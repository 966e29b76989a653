//! Endpoint / InetAddress (C3): a tagged union of reachable locations.

use crate::error::DecodeError;
use crate::identity::{Address, ADDRESS_LENGTH, IDENTITY_HASH_SIZE};
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

/// Maximum marshaled size of an [`Endpoint`], including its tag byte and
/// locality weights.
pub const ENDPOINT_MAX_MARSHAL_SIZE: usize = 64;

const TAG_NIL: u8 = 0;
const TAG_INETADDR_V4: u8 = 1;
const TAG_INETADDR_V6: u8 = 2;
const TAG_DNSNAME: u8 = 3;
const TAG_ZEROTIER: u8 = 4;
const TAG_URL: u8 = 5;
const TAG_ETHERNET: u8 = 6;

const MAX_DNSNAME_LEN: usize = 40;
const MAX_URL_LEN: usize = 48;

/// Reserved locality weights for path ranking; the scoring rules that
/// consume them are outside the scope of this crate's Path selection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LocalityWeights {
    pub w0: u16,
    pub w1: u16,
    pub w2: u16,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Nil,
    InetAddrV4(Ipv4Addr, u16),
    InetAddrV6(Ipv6Addr, u16),
    DnsName(String, u16),
    ZeroTier(Address, [u8; IDENTITY_HASH_SIZE]),
    Url(String),
    Ethernet([u8; 6]),
}

impl Endpoint {
    pub fn marshal(&self, weights: LocalityWeights) -> Result<Vec<u8>, DecodeError> {
        let mut out = Vec::with_capacity(ENDPOINT_MAX_MARSHAL_SIZE);
        match self {
            Endpoint::Nil => out.push(TAG_NIL),
            Endpoint::InetAddrV4(ip, port) => {
                out.push(TAG_INETADDR_V4);
                out.extend_from_slice(&ip.octets());
                out.extend_from_slice(&port.to_be_bytes());
            }
            Endpoint::InetAddrV6(ip, port) => {
                out.push(TAG_INETADDR_V6);
                out.extend_from_slice(&ip.octets());
                out.extend_from_slice(&port.to_be_bytes());
            }
            Endpoint::DnsName(name, port) => {
                if name.len() > MAX_DNSNAME_LEN {
                    return Err(DecodeError::FieldTooLarge);
                }
                out.push(TAG_DNSNAME);
                out.push(name.len() as u8);
                out.extend_from_slice(name.as_bytes());
                out.extend_from_slice(&port.to_be_bytes());
            }
            Endpoint::ZeroTier(addr, hash) => {
                out.push(TAG_ZEROTIER);
                out.extend_from_slice(addr.as_bytes());
                out.extend_from_slice(hash);
            }
            Endpoint::Url(url) => {
                if url.len() > MAX_URL_LEN {
                    return Err(DecodeError::FieldTooLarge);
                }
                out.push(TAG_URL);
                out.push(url.len() as u8);
                out.extend_from_slice(url.as_bytes());
            }
            Endpoint::Ethernet(mac) => {
                out.push(TAG_ETHERNET);
                out.extend_from_slice(mac);
            }
        }
        out.extend_from_slice(&weights.w0.to_be_bytes());
        out.extend_from_slice(&weights.w1.to_be_bytes());
        out.extend_from_slice(&weights.w2.to_be_bytes());
        if out.len() > ENDPOINT_MAX_MARSHAL_SIZE {
            return Err(DecodeError::FieldTooLarge);
        }
        Ok(out)
    }

    pub fn unmarshal(bytes: &[u8]) -> Result<(Endpoint, LocalityWeights, usize), DecodeError> {
        if bytes.is_empty() {
            return Err(DecodeError::TooShort);
        }
        let tag = bytes[0];
        let mut off = 1usize;
        let endpoint = match tag {
            TAG_NIL => Endpoint::Nil,
            TAG_INETADDR_V4 => {
                if bytes.len() < off + 6 {
                    return Err(DecodeError::TooShort);
                }
                let ip = Ipv4Addr::new(bytes[off], bytes[off + 1], bytes[off + 2], bytes[off + 3]);
                let port = u16::from_be_bytes(bytes[off + 4..off + 6].try_into().unwrap());
                off += 6;
                Endpoint::InetAddrV4(ip, port)
            }
            TAG_INETADDR_V6 => {
                if bytes.len() < off + 18 {
                    return Err(DecodeError::TooShort);
                }
                let mut octets = [0u8; 16];
                octets.copy_from_slice(&bytes[off..off + 16]);
                let port = u16::from_be_bytes(bytes[off + 16..off + 18].try_into().unwrap());
                off += 18;
                Endpoint::InetAddrV6(Ipv6Addr::from(octets), port)
            }
            TAG_DNSNAME => {
                if bytes.is_empty() || off >= bytes.len() {
                    return Err(DecodeError::TooShort);
                }
                let len = bytes[off] as usize;
                off += 1;
                if len > MAX_DNSNAME_LEN || bytes.len() < off + len + 2 {
                    return Err(DecodeError::FieldTooLarge);
                }
                let name = String::from_utf8(bytes[off..off + len].to_vec()).map_err(|_| DecodeError::FieldTooLarge)?;
                off += len;
                let port = u16::from_be_bytes(bytes[off..off + 2].try_into().unwrap());
                off += 2;
                Endpoint::DnsName(name, port)
            }
            TAG_ZEROTIER => {
                if bytes.len() < off + ADDRESS_LENGTH + IDENTITY_HASH_SIZE {
                    return Err(DecodeError::TooShort);
                }
                let addr = Address::from_bytes(&bytes[off..off + ADDRESS_LENGTH])?;
                off += ADDRESS_LENGTH;
                let mut hash = [0u8; IDENTITY_HASH_SIZE];
                hash.copy_from_slice(&bytes[off..off + IDENTITY_HASH_SIZE]);
                off += IDENTITY_HASH_SIZE;
                Endpoint::ZeroTier(addr, hash)
            }
            TAG_URL => {
                if off >= bytes.len() {
                    return Err(DecodeError::TooShort);
                }
                let len = bytes[off] as usize;
                off += 1;
                if len > MAX_URL_LEN || bytes.len() < off + len {
                    return Err(DecodeError::FieldTooLarge);
                }
                let url = String::from_utf8(bytes[off..off + len].to_vec()).map_err(|_| DecodeError::FieldTooLarge)?;
                off += len;
                Endpoint::Url(url)
            }
            TAG_ETHERNET => {
                if bytes.len() < off + 6 {
                    return Err(DecodeError::TooShort);
                }
                let mut mac = [0u8; 6];
                mac.copy_from_slice(&bytes[off..off + 6]);
                off += 6;
                Endpoint::Ethernet(mac)
            }
            _ => return Err(DecodeError::UnknownEndpointVariant),
        };

        if bytes.len() < off + 6 {
            return Err(DecodeError::TooShort);
        }
        let weights = LocalityWeights {
            w0: u16::from_be_bytes(bytes[off..off + 2].try_into().unwrap()),
            w1: u16::from_be_bytes(bytes[off + 2..off + 4].try_into().unwrap()),
            w2: u16::from_be_bytes(bytes[off + 4..off + 6].try_into().unwrap()),
        };
        off += 6;

        Ok((endpoint, weights, off))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Nil => write!(f, "nil"),
            Endpoint::InetAddrV4(ip, port) => write!(f, "{}:{}", ip, port),
            Endpoint::InetAddrV6(ip, port) => write!(f, "[{}]:{}", ip, port),
            Endpoint::DnsName(name, port) => write!(f, "{}:{}", name, port),
            Endpoint::ZeroTier(addr, _) => write!(f, "zt:{}", addr),
            Endpoint::Url(url) => write!(f, "{}", url),
            Endpoint::Ethernet(mac) => write!(
                f,
                "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
                mac[0], mac[1], mac[2], mac[3], mac[4], mac[5]
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn v4_round_trips() {
        let ep = Endpoint::InetAddrV4(Ipv4Addr::new(10, 0, 0, 1), 9993);
        let bytes = ep.marshal(LocalityWeights::default()).unwrap();
        let (parsed, _, consumed) = Endpoint::unmarshal(&bytes).unwrap();
        assert_eq!(parsed, ep);
        assert_eq!(consumed, bytes.len());
        assert!(bytes.len() <= ENDPOINT_MAX_MARSHAL_SIZE);
    }

    #[test]
    fn dns_name_round_trips() {
        let ep = Endpoint::DnsName("root.example.net".to_string(), 443);
        let bytes = ep.marshal(LocalityWeights::default()).unwrap();
        let (parsed, _, _) = Endpoint::unmarshal(&bytes).unwrap();
        assert_eq!(parsed, ep);
    }

    #[test]
    fn unknown_variant_rejected() {
        let bytes = [0xfeu8, 0, 0, 0, 0, 0, 0];
        assert!(Endpoint::unmarshal(&bytes).is_err());
    }
}
