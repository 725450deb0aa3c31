//! Hardware abstraction for the serial channel to the controller.
//!
//! This trait allows various transports (UART, USB bridges, emulators,
//! in-process loopbacks for tests) to be plugged into the transport layer
//! without coupling to a concrete implementation.

use std::convert::TryFrom;

use crate::{
    constants::{ACL_PREAMBLE_SIZE, COMMAND_PREAMBLE_SIZE, EVENT_PREAMBLE_SIZE, SCO_PREAMBLE_SIZE},
    error::{DecodingErrorKind, ErrorKind},
};

/// The four HCI packet types, tagged with their H4 serial indicator values.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum PacketType {
    /// Host to controller command packet.
    Command = 1,
    /// Asynchronous connectionless data, flows both directions.
    Acl = 2,
    /// Synchronous voice data, flows both directions.
    Sco = 3,
    /// Controller to host event packet.
    Event = 4,
}

impl PacketType {
    /// The inbound packet types, in reassembly-context order.
    pub const INBOUND: [PacketType; 3] = [PacketType::Acl, PacketType::Sco, PacketType::Event];

    /// Returns the H4 indicator byte for this type.
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Returns the fixed preamble size for this type.
    pub fn preamble_size(self) -> usize {
        match self {
            PacketType::Command => COMMAND_PREAMBLE_SIZE,
            PacketType::Acl => ACL_PREAMBLE_SIZE,
            PacketType::Sco => SCO_PREAMBLE_SIZE,
            PacketType::Event => EVENT_PREAMBLE_SIZE,
        }
    }

    /// Returns the reassembly-context slot for an inbound type.
    ///
    /// Only ACL, SCO and EVENT packets arrive from the controller; commands
    /// never do, so they have no slot.
    pub fn inbound_index(self) -> Option<usize> {
        match self {
            PacketType::Command => None,
            _ => Some(self as usize - 2),
        }
    }
}

impl TryFrom<u8> for PacketType {
    type Error = ErrorKind;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(PacketType::Command),
            2 => Ok(PacketType::Acl),
            3 => Ok(PacketType::Sco),
            4 => Ok(PacketType::Event),
            _ => Err(ErrorKind::DecodingError(DecodingErrorKind::PacketType)),
        }
    }
}

/// Readiness callbacks the transport layer hands to the HAL at init time.
///
/// Implementations must be cheap and non-blocking: `data_ready` is called
/// from whatever thread the HAL uses to watch the serial channel, and the
/// layer turns it into a task on its own event-loop thread.
pub trait HalEvents: Send {
    /// Bytes of `packet_type` are available to be read with [`Hal::read_data`].
    fn data_ready(&self, packet_type: PacketType);
}

/// Low-level serial channel to the controller.
///
/// Reads are non-blocking and may return fewer bytes than requested,
/// including zero. Writes block until the bytes are handed to the wire.
pub trait Hal: Send {
    /// Binds the readiness callbacks. Called once before [`Hal::open`].
    fn init(&mut self, events: Box<dyn HalEvents>);

    /// Opens the serial channel.
    fn open(&mut self) -> crate::error::Result<()>;

    /// Closes the serial channel.
    fn close(&mut self);

    /// Reads up to `dst.len()` bytes of `packet_type` data without blocking.
    /// Returns the number of bytes read, which may be zero.
    fn read_data(&mut self, packet_type: PacketType, dst: &mut [u8]) -> usize;

    /// Writes a whole outbound packet of `packet_type`. Blocking.
    fn transmit_data(&mut self, packet_type: PacketType, data: &[u8]);

    /// Tells the HAL one whole inbound packet of `packet_type` was consumed.
    fn packet_finished(&mut self, packet_type: PacketType);
}
