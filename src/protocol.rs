//! Wire protocol constants, verb enumeration, and the fixed packet/fragment
//! header layouts (C4). Header (de)serialization here is pure byte-slice
//! arithmetic — no `#[repr(packed)]` structs or raw pointer casts — since
//! the layout is small and fixed and safe indexing costs nothing here.

use crate::error::DecodeError;
use crate::identity::{Address, ADDRESS_LENGTH};

/// Offset/size of the fixed packet header (spec §3).
pub const PACKET_HEADER_SIZE: usize = 27;
/// Offset of the verb byte (compressed-flag + reserved + 5-bit verb).
pub const PACKET_VERB_INDEX: usize = 27;
/// Minimum legal datagram length (header + verb byte).
pub const PACKET_MIN_LENGTH: usize = PACKET_HEADER_SIZE + 1;

pub const PACKET_ID_INDEX: usize = 0;
pub const PACKET_DESTINATION_INDEX: usize = 8;
pub const PACKET_SOURCE_INDEX: usize = 13;
pub const HEADER_FLAGS_INDEX: usize = 18;
pub const HEADER_MAC_INDEX: usize = 19;

pub const HEADER_FLAG_FRAGMENTED: u8 = 0x80;
/// Mask selecting the 3-bit cipher suite from the flags/cipher/hops byte.
pub const HEADER_FLAGS_MASK_CIPHER: u8 = 0x38;
pub const HEADER_FLAGS_CIPHER_SHIFT: u8 = 3;
/// Mask selecting the 3-bit hop count.
pub const HEADER_FLAGS_MASK_HOPS: u8 = 0x07;
/// Mask that clears the mutable hops nibble, leaving only the immutable bits.
pub const HEADER_FLAGS_MASK_HIDE_HOPS: u8 = 0xf8;

pub const PROTOCOL_MAX_HOPS: u8 = 7;

pub const VERB_FLAG_COMPRESSED: u8 = 0x80;
pub const VERB_MASK: u8 = 0x1f;

/// Fragment sentinel: this byte at offset 13 (where a source address would
/// otherwise be) marks a datagram as a non-first fragment, since `0xff` is
/// a reserved, unusable address prefix.
pub const FRAGMENT_INDICATOR_INDEX: usize = 13;
pub const FRAGMENT_INDICATOR: u8 = 0xff;
pub const FRAGMENT_HEADER_SIZE: usize = 16;
pub const MAX_PACKET_FRAGMENTS: usize = 16;

/// Cipher suite numbering (spec §6, normative).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CipherSuite {
    /// Poly1305 MAC only, payload left in cleartext. Used for HELLO, before
    /// a session key exists to encrypt under.
    Poly1305None = 0,
    /// Salsa20/12 payload encryption with a Poly1305 MAC.
    Poly1305Salsa2012 = 1,
    /// Trusted-path: the MAC field carries a 64-bit trusted-path id instead
    /// of a MAC; no encryption. MUST NOT be enabled by default.
    TrustedPath = 2,
    /// AES-GMAC-SIV AEAD.
    AesGmacSiv = 3,
}

impl CipherSuite {
    pub fn from_bits(bits: u8) -> Result<Self, DecodeError> {
        match bits {
            0 => Ok(CipherSuite::Poly1305None),
            1 => Ok(CipherSuite::Poly1305Salsa2012),
            2 => Ok(CipherSuite::TrustedPath),
            3 => Ok(CipherSuite::AesGmacSiv),
            _ => Err(DecodeError::UnknownCipherSuite),
        }
    }

    pub fn bits(self) -> u8 {
        self as u8
    }
}

/// Verbs covering the session-layer state machine (spec §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Verb {
    Nop = 0x00,
    Hello = 0x01,
    Error = 0x02,
    Ok = 0x03,
    Whois = 0x04,
    Rendezvous = 0x05,
    Echo = 0x08,
    PushDirectPaths = 0x10,
}

impl Verb {
    pub fn from_code(code: u8) -> Result<Self, DecodeError> {
        match code {
            0x00 => Ok(Verb::Nop),
            0x01 => Ok(Verb::Hello),
            0x02 => Ok(Verb::Error),
            0x03 => Ok(Verb::Ok),
            0x04 => Ok(Verb::Whois),
            0x05 => Ok(Verb::Rendezvous),
            0x08 => Ok(Verb::Echo),
            0x10 => Ok(Verb::PushDirectPaths),
            _ => Err(DecodeError::UnknownVerb),
        }
    }

    pub fn code(self) -> u8 {
        self as u8
    }
}

/// Error codes carried in `ERROR` reply payloads (spec §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ErrorCode {
    InvalidRequest = 1,
    BadProtocolVersion = 2,
    ObjNotFound = 3,
    IdentityCollision = 4,
    UnsupportedOperation = 5,
    NeedMembershipCertificate = 6,
    NetworkAccessDenied = 7,
    CannotDeliver = 9,
}

impl ErrorCode {
    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            1 => ErrorCode::InvalidRequest,
            2 => ErrorCode::BadProtocolVersion,
            3 => ErrorCode::ObjNotFound,
            4 => ErrorCode::IdentityCollision,
            5 => ErrorCode::UnsupportedOperation,
            6 => ErrorCode::NeedMembershipCertificate,
            7 => ErrorCode::NetworkAccessDenied,
            9 => ErrorCode::CannotDeliver,
            _ => return None,
        })
    }
}

/// The fixed 27-byte outer header, parsed out of a received datagram's
/// first bytes. Accessors operate on the owned copy; `write_into` re-emits
/// it (used when building outgoing packets and when a relay increments
/// the hop count in place).
#[derive(Debug, Clone, Copy)]
pub struct PacketHeader {
    pub packet_id: u64,
    pub destination: Address,
    pub source: Address,
    pub flags_cipher_hops: u8,
    pub mac: [u8; 8],
}

impl PacketHeader {
    pub fn cipher(&self) -> Result<CipherSuite, DecodeError> {
        CipherSuite::from_bits((self.flags_cipher_hops & HEADER_FLAGS_MASK_CIPHER) >> HEADER_FLAGS_CIPHER_SHIFT)
    }

    pub fn hops(&self) -> u8 {
        self.flags_cipher_hops & HEADER_FLAGS_MASK_HOPS
    }

    pub fn is_fragmented(&self) -> bool {
        self.flags_cipher_hops & HEADER_FLAG_FRAGMENTED != 0
    }

    /// Increment the hop count, saturating at the protocol ceiling of 7.
    /// Returns the new hop count.
    pub fn increment_hops(&mut self) -> u8 {
        let h = (self.hops() + 1) & HEADER_FLAGS_MASK_HOPS;
        self.flags_cipher_hops = (self.flags_cipher_hops & HEADER_FLAGS_MASK_HIDE_HOPS) | h;
        h
    }

    pub fn set_cipher(&mut self, cipher: CipherSuite) {
        self.flags_cipher_hops =
            (self.flags_cipher_hops & !HEADER_FLAGS_MASK_CIPHER) | (cipher.bits() << HEADER_FLAGS_CIPHER_SHIFT);
    }

    pub fn set_fragmented(&mut self, fragmented: bool) {
        if fragmented {
            self.flags_cipher_hops |= HEADER_FLAG_FRAGMENTED;
        } else {
            self.flags_cipher_hops &= !HEADER_FLAG_FRAGMENTED;
        }
    }

    /// The 8-byte packet ID in wire (big-endian) order.
    pub fn id_bytes(&self) -> [u8; 8] {
        self.packet_id.to_be_bytes()
    }

    /// Bytes 0..19 with the mutable hops nibble cleared: the associated
    /// data authenticated by every cipher suite.
    pub fn aad_bytes(&self) -> [u8; 19] {
        let mut out = [0u8; 19];
        out[0..8].copy_from_slice(&self.id_bytes());
        out[8..13].copy_from_slice(self.destination.as_bytes());
        out[13..18].copy_from_slice(self.source.as_bytes());
        out[18] = self.flags_cipher_hops & HEADER_FLAGS_MASK_HIDE_HOPS;
        out
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.len() < PACKET_HEADER_SIZE {
            return Err(DecodeError::TooShort);
        }
        let packet_id = u64::from_be_bytes(bytes[0..8].try_into().unwrap());
        let destination = Address::from_bytes(&bytes[8..13])?;
        let source = Address::from_bytes(&bytes[13..18])?;
        let flags_cipher_hops = bytes[18];
        let mut mac = [0u8; 8];
        mac.copy_from_slice(&bytes[19..27]);
        Ok(Self {
            packet_id,
            destination,
            source,
            flags_cipher_hops,
            mac,
        })
    }

    pub fn write_into(&self, out: &mut [u8]) {
        debug_assert!(out.len() >= PACKET_HEADER_SIZE);
        out[0..8].copy_from_slice(&self.id_bytes());
        out[8..13].copy_from_slice(self.destination.as_bytes());
        out[13..18].copy_from_slice(self.source.as_bytes());
        out[18] = self.flags_cipher_hops;
        out[19..27].copy_from_slice(&self.mac);
    }
}

/// Fragment header (spec §3): 8-byte packet id, 5-byte destination, the
/// `0xff` sentinel, `(total<<4)|index`, and a hop-count byte.
#[derive(Debug, Clone, Copy)]
pub struct FragmentHeader {
    pub packet_id: u64,
    pub destination: Address,
    pub total_fragments: u8,
    pub fragment_no: u8,
    pub hops: u8,
}

impl FragmentHeader {
    pub fn parse(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.len() < FRAGMENT_HEADER_SIZE {
            return Err(DecodeError::TooShort);
        }
        if bytes[FRAGMENT_INDICATOR_INDEX] != FRAGMENT_INDICATOR {
            return Err(DecodeError::BadFragment);
        }
        let packet_id = u64::from_be_bytes(bytes[0..8].try_into().unwrap());
        let destination = Address::from_bytes(&bytes[8..13])?;
        let total_and_no = bytes[14];
        let total_fragments = total_and_no >> 4;
        let fragment_no = total_and_no & 0x0f;
        let hops = bytes[15] & HEADER_FLAGS_MASK_HOPS;
        if total_fragments as usize > MAX_PACKET_FRAGMENTS || fragment_no >= total_fragments {
            return Err(DecodeError::BadFragment);
        }
        Ok(Self {
            packet_id,
            destination,
            total_fragments,
            fragment_no,
            hops,
        })
    }

    pub fn write_into(&self, out: &mut [u8]) {
        debug_assert!(out.len() >= FRAGMENT_HEADER_SIZE);
        out[0..8].copy_from_slice(&self.packet_id.to_be_bytes());
        out[8..13].copy_from_slice(self.destination.as_bytes());
        out[13] = FRAGMENT_INDICATOR;
        out[14] = (self.total_fragments << 4) | (self.fragment_no & 0x0f);
        out[15] = self.hops & HEADER_FLAGS_MASK_HOPS;
    }
}

pub const _: () = assert!(ADDRESS_LENGTH == 5);
