//! The fatal-timeout policy.
//!
//! A command timeout at this layer means either a controller hardware fault
//! or a driver bug; recovering in place would leave the stack in an unknown
//! state, so the policy is to terminate the process. The policy sits behind
//! a trait so tests can observe the trigger instead of dying.

use std::{thread, time::Duration};

use tracing::error;

/// Receiver of the one fatal condition this layer can hit.
pub trait FatalHandler: Send {
    /// A dispatched command got no response within the watchdog timeout.
    /// `opcode` identifies the oldest pending command.
    fn command_timed_out(&mut self, opcode: u16);
}

/// The production policy: log, let the log drain, terminate the process.
#[derive(Debug)]
pub struct AbortOnTimeout {
    drain_delay: Duration,
}

impl AbortOnTimeout {
    /// Creates the handler with the given log-drain pause.
    pub fn new(drain_delay: Duration) -> Self {
        Self { drain_delay }
    }
}

impl Default for AbortOnTimeout {
    fn default() -> Self {
        Self::new(Duration::from_millis(
            btlink_core::constants::FATAL_DRAIN_DELAY_MS,
        ))
    }
}

impl FatalHandler for AbortOnTimeout {
    fn command_timed_out(&mut self, opcode: u16) {
        error!(
            "hci layer timeout waiting for response to a command, opcode 0x{:04x}; \
             terminating the bluetooth process",
            opcode
        );
        thread::sleep(self.drain_delay);
        std::process::abort();
    }
}
