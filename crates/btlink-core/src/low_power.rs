//! Low-power manager contract.
//!
//! Serial transports with a sleep protocol need the chip awake before bytes
//! go out. The event loop brackets every transmission with
//! [`LowPowerManager::wake_assert`] and [`LowPowerManager::transmit_done`].

/// Commands the upper stack may forward to the low-power manager.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LowPowerCommand {
    /// Allow the chip to sleep.
    Enable,
    /// Keep the chip awake.
    Disable,
    /// The chip requested a wake acknowledgment.
    WakeAck,
    /// The chip may be allowed back to sleep after an idle timeout.
    IdleTimeout,
}

/// Driver for the transport's sleep protocol.
pub trait LowPowerManager: Send {
    /// Called once during start-up.
    fn init(&mut self) {}

    /// Asserts the wake signal before a transmission.
    fn wake_assert(&mut self);

    /// Releases the wake signal after a transmission.
    fn transmit_done(&mut self);

    /// Applies a command forwarded from the upper stack.
    fn post_command(&mut self, command: LowPowerCommand);

    /// Called once during shutdown.
    fn cleanup(&mut self) {}
}

/// Low-power manager for transports without a sleep protocol.
#[derive(Debug, Default)]
pub struct NoopLowPowerManager;

impl LowPowerManager for NoopLowPowerManager {
    fn wake_assert(&mut self) {}

    fn transmit_done(&mut self) {}

    fn post_command(&mut self, _command: LowPowerCommand) {}
}
