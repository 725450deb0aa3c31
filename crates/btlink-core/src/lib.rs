#![warn(missing_docs)]

//! btlink-core: foundational types and contracts.
//!
//! This crate provides the minimal set of core utilities shared across all
//! layers of the HCI transport:
//! - Configuration types
//! - Error handling
//! - Protocol constants
//! - Memory utilities (buffer pooling)
//! - Collaborator contracts (HAL, vendor driver, controller, btsnoop,
//!   low-power manager)
//!
//! Wire-level logic lives in `btlink-protocol`; the event loop, command
//! correlation and the public facade live in `btlink-host`.

/// Protocol constants shared across layers.
pub mod constants {
    /// Preamble size of an HCI command packet (opcode + parameter length).
    pub const COMMAND_PREAMBLE_SIZE: usize = 3;
    /// Preamble size of an HCI ACL data packet (handle + 16-bit length).
    pub const ACL_PREAMBLE_SIZE: usize = 4;
    /// Preamble size of an HCI SCO data packet (handle + 8-bit length).
    pub const SCO_PREAMBLE_SIZE: usize = 3;
    /// Preamble size of an HCI event packet (event code + parameter length).
    pub const EVENT_PREAMBLE_SIZE: usize = 2;
    /// Largest preamble of any packet type (ACL).
    pub const MAX_PREAMBLE_SIZE: usize = 4;

    /// Event code of the Command Complete event.
    pub const COMMAND_COMPLETE_EVT: u8 = 0x0E;
    /// Event code of the Command Status event.
    pub const COMMAND_STATUS_EVT: u8 = 0x0F;

    /// How long a dispatched command may wait for its response (ms).
    pub const COMMAND_PENDING_TIMEOUT_MS: u64 = 8000;
    /// How long shutdown waits for the vendor epilog to finish (ms).
    pub const EPILOG_TIMEOUT_MS: u64 = 3000;
    /// Pause before process termination so pending log lines can drain (ms).
    pub const FATAL_DRAIN_DELAY_MS: u64 = 10;
}

/// Configuration options for the transport layer.
pub mod config;
/// Collaborator contract: controller module.
pub mod controller;
/// Error types and results.
pub mod error;
/// Collaborator contract: hardware abstraction layer.
pub mod hal;
/// Collaborator contract: low-power manager.
pub mod low_power;
/// Buffer pooling for memory efficiency.
pub mod packet_pool;
/// Collaborator contract: btsnoop packet capture.
pub mod snoop;
/// Collaborator contract: vendor driver.
pub mod vendor;
