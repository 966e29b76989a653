//! Host-tunable configuration.
//!
//! `Config` is plain old data: the crate never parses a config file or CLI
//! arguments itself (that is a host concern), but a host can deserialize
//! this from whatever format it likes via `serde`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::IpAddr;

/// Normative protocol constants (spec §6), not user-tunable.
pub mod constants {
    pub const ADDRESS_LENGTH: usize = 5;
    pub const IDENTITY_HASH_SIZE: usize = 48;
    pub const PEER_SECRET_KEY_LENGTH: usize = 32;
    pub const MAX_PACKET_FRAGMENTS: usize = 11;
    pub const PROTOCOL_MAX_HOPS: u8 = 7;
    pub const PATH_KEEPALIVE_PERIOD_MS: i64 = 20_000;
    pub const PATH_ALIVE_TIMEOUT_MS: i64 = 2 * PATH_KEEPALIVE_PERIOD_MS + 5_000;
    pub const HELLO_INTERVAL_MS: i64 = 120_000;
    pub const PEER_GLOBAL_TIMEOUT_MS: i64 = 2_592_000_000;
    pub const WHOIS_RETRY_DELAY_MS: i64 = 500;
    pub const WHOIS_MAX_RETRIES: u32 = 3;
    pub const PUSH_DIRECT_PATHS_MAX_PER_SCOPE_AND_FAMILY: usize = 4;
    pub const MAX_FRAGMENTS_PER_PATH: usize = 32;
    pub const FRAGMENT_REASSEMBLY_TIMEOUT_MS: i64 = 1_000;
    pub const MAX_PATHS_PER_PEER: usize = 16;
    pub const ROOT_RANK_INTERVAL_MS: i64 = 2_000;
    pub const PEER_CONTROL_RATE_LIMIT_MS: i64 = 500;
    pub const WHOIS_RATE_LIMIT_MS: i64 = 100;
    pub const IDENTITY_VALIDATION_RATE_LIMIT_MS: i64 = 2_000;
}

/// Per physical-address-family MTU override.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PathMtuConfig {
    pub v4_mtu: usize,
    pub v6_mtu: usize,
    pub default_mtu: usize,
}

impl Default for PathMtuConfig {
    fn default() -> Self {
        Self {
            v4_mtu: 1432,
            v6_mtu: 1280,
            default_mtu: 1280,
        }
    }
}

/// A configured trusted path: cipher suite 2 is only honored for addresses
/// inside `allowed_subnet` on the given trusted-path id. Disabled unless a
/// host explicitly populates this table; never enabled by default.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TrustedPath {
    pub id: u64,
    pub allowed_subnet: IpAddr,
    pub prefix_len: u8,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    pub mtu: PathMtuConfig,
    /// Trusted-path table, keyed by id. Empty by default: cipher suite 2
    /// (`NONE`/trusted-path) is refused unless an entry matches.
    pub trusted_paths: HashMap<u64, TrustedPath>,
    /// Operational relay hop ceiling; must be `<= PROTOCOL_MAX_HOPS`.
    pub relay_max_hops: u8,
    /// Refuse `POLY1305_NONE` outside of HELLO, per spec's Open Question
    /// resolution (see DESIGN.md).
    pub refuse_unauthenticated_outside_hello: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mtu: PathMtuConfig::default(),
            trusted_paths: HashMap::new(),
            relay_max_hops: 4,
            refuse_unauthenticated_outside_hello: true,
        }
    }
}
