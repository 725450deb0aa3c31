//! Vendor driver contract: chip power, firmware configuration, epilog.

use crate::error::Result;

/// Chip power states for [`VendorOp::ChipPowerControl`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PowerState {
    /// Power the chip on.
    On,
    /// Power the chip off.
    Off,
}

/// Operations the transport layer asks the vendor driver to perform.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum VendorOp {
    /// Synchronous chip power control.
    ChipPowerControl(PowerState),
    /// Asynchronous firmware download and configuration.
    ConfigureFirmware,
    /// Asynchronous SCO routing configuration.
    ConfigureSco,
    /// Asynchronous pre-shutdown handshake with the controller.
    DoEpilog,
}

/// Completion callbacks for the asynchronous vendor operations.
///
/// The layer hands an implementation to [`Vendor::open`]; the driver invokes
/// exactly one callback per accepted [`Vendor::send_async_command`] call.
pub trait VendorEvents: Send {
    /// Firmware configuration finished.
    fn firmware_configured(&self, success: bool);
    /// SCO routing configuration finished.
    fn sco_configured(&self, success: bool);
    /// The epilog handshake finished.
    fn epilog_done(&self, success: bool);
}

/// Vendor-specific driver for the Bluetooth chip.
pub trait Vendor: Send {
    /// Opens the driver for the controller identified by `local_addr`
    /// (a six-byte Bluetooth device address) and binds the completion
    /// callbacks for asynchronous operations.
    fn open(&mut self, local_addr: [u8; 6], events: Box<dyn VendorEvents>) -> Result<()>;

    /// Closes the driver.
    fn close(&mut self);

    /// Performs a synchronous operation.
    fn send_command(&mut self, op: VendorOp) -> Result<()>;

    /// Submits an asynchronous operation. `Err` means the submission itself
    /// failed and no completion callback will arrive for it.
    fn send_async_command(&mut self, op: VendorOp) -> Result<()>;
}
