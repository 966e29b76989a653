//! Peer-to-peer virtual-network data plane core.
//!
//! This crate implements identity and authenticated key agreement, the wire
//! packet codec (armor/dearmor, fragmentation, compression), per-peer and
//! per-path state, the process-wide topology registry, and the signed root
//! "world" trust anchor. It does not touch sockets, TAP/TUN devices, or the
//! Ethernet frame plane above the packet layer; those are host concerns
//! reached through the [`host`] traits.

pub mod config;
pub mod crypto;
pub mod endpoint;
pub mod error;
pub mod fingerprint;
pub mod host;
pub mod identity;
pub mod locator;
pub mod node;
pub mod packet;
pub mod path;
pub mod peer;
pub mod protocol;
pub mod topology;
pub mod world;

pub use config::Config;
pub use endpoint::Endpoint;
pub use error::{CryptoError, DecodeError, IdentityError, NodeError, ProtocolError, WorldError};
pub use fingerprint::Fingerprint;
pub use host::{HostInterface, ObjectType};
pub use identity::{Address, Identity, IdentityType};
pub use node::Node;
pub use path::Path;
pub use peer::{HelloState, Peer};
pub use protocol::{CipherSuite, ErrorCode, Verb};
pub use topology::Topology;
pub use world::{World, WorldType};
