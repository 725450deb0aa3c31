#![warn(missing_docs)]

//! Btlink: a small public API facade for the workspace.
//!
//! This crate provides a clean, stable surface that re-exports the most
//! commonly used types for driving a Bluetooth controller over HCI:
//!
//! - The layer itself and its collaborator bundle (`Hci`, `Collaborators`)
//! - Packet buffers and event tags (`BtPacket`, `tag`, `InboundTag`)
//! - The collaborator contracts (`Hal`, `Vendor`, `Fragmenter`, ...)
//! - Core configuration (`Config`)
//!
//! Example
//! ```ignore
//! use std::sync::Arc;
//! use btlink::{BtPacket, Collaborators, Config, Hci};
//!
//! let collaborators = Collaborators::new(my_hal, my_vendor);
//! let mut hci = Hci::start_up([0; 6], collaborators, my_callbacks, Config::default())?;
//!
//! hci.set_chip_power_on(true);
//! hci.do_preload();
//!
//! // HCI_Reset, resolved through the complete callback.
//! let reset = BtPacket::new(0, vec![0x03, 0x0C, 0x00]);
//! hci.transmit_command(reset, Some(Box::new(|event| { /* ... */ })), None);
//!
//! hci.shut_down();
//! ```

// Core: configuration, errors, and collaborator contracts
pub use btlink_core::{
    config::Config,
    controller::{Controller, ImmediateController},
    error::{ErrorKind, Result},
    hal::{Hal, HalEvents, PacketType},
    low_power::{LowPowerCommand, LowPowerManager, NoopLowPowerManager},
    packet_pool::{BufferAllocator, PooledAllocator},
    snoop::{BtSnoop, FileSnoop, NoopSnoop},
    vendor::{PowerState, Vendor, VendorEvents, VendorOp},
};
// Protocol: packet buffers and tags
pub use btlink_protocol::{tag, BtPacket, InboundTag};
// Host: the layer, its facade and the engine seams
pub use btlink_host::{
    alarm::{Clock, SystemClock},
    AbortOnTimeout, Collaborators, CompleteCallback, FatalHandler, FragmentSink, Fragmenter, Hci,
    Inject, NoopInject, PassthroughFragmenter, StatusCallback, TransmitHandle, UpperCallbacks,
    UpwardDispatcher,
};

/// Convenience prelude with the most commonly used items.
pub mod prelude {
    pub use crate::{
        BtPacket, BufferAllocator, Collaborators, Config, Hal, HalEvents, Hci, InboundTag,
        LowPowerCommand, PacketType, PowerState, UpperCallbacks, Vendor, VendorEvents, VendorOp,
        tag,
    };
}
