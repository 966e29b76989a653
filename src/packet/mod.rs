//! Packet codec (C4): header already lives in [`crate::protocol`]; this
//! module covers armor/dearmor, fragmentation, reassembly, compression,
//! and verb payload encoding.

pub mod armor;
pub mod compress;
pub mod fragment;
pub mod reassembly;
pub mod verb;

pub use armor::{armor, dearmor};
pub use fragment::fragment_packet;
pub use reassembly::FragmentAssembler;
