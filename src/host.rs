//! The host boundary (§6): callbacks the core consumes, expressed as an
//! object-safe trait rather than raw function pointers. A host implements
//! this once per node and drives `Node::process_wire_packet` from its own
//! receive threads.

use std::net::SocketAddr;

/// Persistent object categories a host may be asked to load/store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectType {
    IdentitySecret,
    IdentityPublic,
    Roots,
    Peer,
    Planet,
    Moon,
}

/// Host-provided services the core depends on. All methods are
/// synchronous: the core has no per-packet async suspension point (§5).
pub trait HostInterface: Send + Sync {
    /// Send a UDP datagram. `local_socket == None` means "send on all
    /// sockets of appropriate family." Returns `true` on a successful
    /// hand-off to the OS (not delivery).
    fn wire_send(&self, local_socket: Option<i64>, dest: SocketAddr, data: &[u8], ip_ttl_hint: Option<u8>) -> bool;

    /// Load a previously stored object, if any.
    fn state_get(&self, object_type: ObjectType, id: [u64; 2]) -> Option<Vec<u8>>;

    /// Persist an object. Failures are logged through `tracing::error!` by
    /// the caller and never treated as fatal mid-operation.
    fn state_put(&self, object_type: ObjectType, id: [u64; 2], data: &[u8]) -> Result<(), String>;

    /// Allow the host to veto an attempted path before it is used.
    fn path_check(&self, zt_address: crate::identity::Address, addr: SocketAddr) -> bool {
        let _ = (zt_address, addr);
        true
    }

    /// Ask the host for a hinted path to a node, if it knows one out of
    /// band (e.g. from a prior session or a local configuration file).
    fn path_lookup(&self, zt_address: crate::identity::Address, family_hint: Option<u8>) -> Option<SocketAddr> {
        let _ = (zt_address, family_hint);
        None
    }

    /// Monotonic-ish wall clock in milliseconds.
    fn now(&self) -> i64;
}
