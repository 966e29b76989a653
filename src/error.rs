//! Per-component error types.
//!
//! Each subsystem gets its own small error enum rather than one catch-all,
//! so a caller can match on exactly the failures that subsystem can produce.
//! Only [`ProtocolError`] ever crosses the wire as a reply packet; the rest
//! are handled internally (decode/crypto/resource errors are dropped,
//! never surfaced to a remote party).

use thiserror::Error;

/// Truncated or malformed wire data. Always dropped, never replied to.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    #[error("buffer shorter than the fixed header")]
    TooShort,
    #[error("unknown verb code")]
    UnknownVerb,
    #[error("unknown cipher suite")]
    UnknownCipherSuite,
    #[error("unknown endpoint variant tag")]
    UnknownEndpointVariant,
    #[error("field exceeds its maximum encoded size")]
    FieldTooLarge,
    #[error("fragment index or count out of range")]
    BadFragment,
    #[error("decompression failed or expanded past the size limit")]
    BadCompression,
}

/// MAC, signature, or hashcash verification failure. Never reveals which
/// check failed or which byte differed.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CryptoError {
    #[error("authentication tag did not match")]
    BadMac,
    #[error("signature did not verify")]
    BadSignature,
    #[error("key agreement failed")]
    AgreementFailed,
}

/// Maps 1:1 to the wire [`crate::protocol::ErrorCode`] enum. The only error
/// type that ever becomes an `ERROR` reply packet.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("malformed request")]
    InvalidRequest,
    #[error("unsupported protocol version")]
    BadProtocolVersion,
    #[error("requested object not found")]
    ObjNotFound,
    #[error("address already bound to a different identity")]
    IdentityCollision,
    #[error("unsupported operation")]
    UnsupportedOperation,
    #[error("network membership certificate required")]
    NeedMembershipCertificate,
    #[error("network access denied")]
    NetworkAccessDenied,
    #[error("no path to destination")]
    CannotDeliver,
}

impl ProtocolError {
    pub fn code(self) -> crate::protocol::ErrorCode {
        use crate::protocol::ErrorCode as EC;
        match self {
            ProtocolError::InvalidRequest => EC::InvalidRequest,
            ProtocolError::BadProtocolVersion => EC::BadProtocolVersion,
            ProtocolError::ObjNotFound => EC::ObjNotFound,
            ProtocolError::IdentityCollision => EC::IdentityCollision,
            ProtocolError::UnsupportedOperation => EC::UnsupportedOperation,
            ProtocolError::NeedMembershipCertificate => EC::NeedMembershipCertificate,
            ProtocolError::NetworkAccessDenied => EC::NetworkAccessDenied,
            ProtocolError::CannotDeliver => EC::CannotDeliver,
        }
    }
}

/// World (signed root document) parse/replace failures.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorldError {
    #[error("signature does not verify under the update key")]
    BadSignature,
    #[error("world type does not match")]
    TypeMismatch,
    #[error("world id does not match")]
    IdMismatch,
    #[error("candidate is not newer than the current world")]
    NotNewer,
    #[error("truncated or malformed world document")]
    Truncated,
}

/// Identity encode/decode/validate failures.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityError {
    #[error("malformed identity string or binary encoding")]
    InvalidEncoding,
    #[error("hashcash condition does not hold for this identity")]
    HashcashFailed,
    #[error("address is reserved or zero")]
    ReservedAddress,
    #[error("identity has no private key material")]
    NoPrivateKey,
    #[error("identity types are incompatible for this operation")]
    TypeMismatch,
}

/// Composes the above via `#[from]` for callers that need to propagate a
/// startup failure out of the crate (identity/config load). Internal
/// per-packet errors are handled inline and never reach this type.
#[derive(Error, Debug)]
pub enum NodeError {
    #[error("identity error: {0}")]
    Identity(#[from] IdentityError),
    #[error("world error: {0}")]
    World(#[from] WorldError),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("persistence error: {0}")]
    Persistence(String),
}
