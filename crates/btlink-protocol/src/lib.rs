#![warn(missing_docs)]

//! btlink-protocol: packet types, preamble rules, and wire-level logic.

/// Command-complete / command-status event parsing.
pub mod event;
/// Packet buffer type and event tags.
pub mod packet;
/// Inbound byte-stream reassembly.
pub mod reassembly;

pub use event::CommandResponse;
pub use packet::{tag, BtPacket, InboundTag};
pub use reassembly::{ByteSource, Reassembler, ReassemblyStatus};
