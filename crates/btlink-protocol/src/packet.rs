//! Packet buffers and their direction/type tags.
//!
//! A [`BtPacket`] is an opaque byte buffer moving through the layer. The
//! `event` tag encodes direction and packet type; `offset`/`len` frame the
//! valid bytes so upper layers can reserve headroom without reallocating.
//! Buffers are single-owner at any moment and ownership transfers at every
//! queue enqueue, fragmenter hand-off and upward dispatch.

use byteorder::{ByteOrder, LittleEndian};

use btlink_core::{
    error::{ErrorKind, Result},
    hal::PacketType,
};

/// Direction/type tags carried in [`BtPacket::event`].
///
/// The high byte encodes direction and type; the low byte is free for
/// layer-specific sub-events.
pub mod tag {
    /// Command heading from the stack to the controller.
    pub const STACK_TO_CONTROLLER_COMMAND: u16 = 0x2000;
    /// ACL data heading from the stack to the controller.
    pub const STACK_TO_CONTROLLER_ACL: u16 = 0x2100;
    /// SCO data heading from the stack to the controller.
    pub const STACK_TO_CONTROLLER_SCO: u16 = 0x2200;

    /// Event arriving from the controller.
    pub const CONTROLLER_TO_STACK_EVENT: u16 = 0x1000;
    /// ACL data arriving from the controller.
    pub const CONTROLLER_TO_STACK_ACL: u16 = 0x1100;
    /// SCO data arriving from the controller.
    pub const CONTROLLER_TO_STACK_SCO: u16 = 0x1200;
    /// Reserved error tag; nothing emits it today.
    pub const CONTROLLER_TO_STACK_ERROR: u16 = 0x1300;

    /// Masks `event` down to its direction/type tag.
    pub const EVENT_TYPE_MASK: u16 = 0xFF00;
}

/// The inbound dispatch keys the upper stack can subscribe to.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum InboundTag {
    /// Reserved; never dispatched by this layer.
    Error,
    /// Reassembled ACL data.
    Acl,
    /// SCO data.
    Sco,
    /// Controller events not consumed by the command-response filter.
    Evt,
}

impl InboundTag {
    /// Returns the dispatch key for a packet's `event` tag, if it is an
    /// inbound one.
    pub fn from_event(event: u16) -> Option<InboundTag> {
        match event & tag::EVENT_TYPE_MASK {
            tag::CONTROLLER_TO_STACK_ERROR => Some(InboundTag::Error),
            tag::CONTROLLER_TO_STACK_ACL => Some(InboundTag::Acl),
            tag::CONTROLLER_TO_STACK_SCO => Some(InboundTag::Sco),
            tag::CONTROLLER_TO_STACK_EVENT => Some(InboundTag::Evt),
            _ => None,
        }
    }

    /// Returns the inbound tag value for a packet type arriving from the
    /// controller.
    pub fn event_for_type(packet_type: PacketType) -> u16 {
        match packet_type {
            PacketType::Acl => tag::CONTROLLER_TO_STACK_ACL,
            PacketType::Sco => tag::CONTROLLER_TO_STACK_SCO,
            PacketType::Event => tag::CONTROLLER_TO_STACK_EVENT,
            // Commands never arrive from the controller; keep the reserved
            // tag so a misuse is at least visible downstream.
            PacketType::Command => tag::CONTROLLER_TO_STACK_ERROR,
        }
    }
}

/// An HCI packet moving through the layer.
#[derive(Debug)]
pub struct BtPacket {
    /// Direction/type tag, see [`tag`].
    pub event: u16,
    /// Start of the valid bytes within the buffer.
    pub offset: usize,
    /// Number of valid bytes from `offset`.
    pub len: usize,
    /// Scratch space for whichever layer currently owns the packet.
    pub layer_specific: u16,
    buffer: Vec<u8>,
}

impl BtPacket {
    /// Wraps a whole buffer as a packet: `offset` 0, `len` covering it all.
    pub fn new(event: u16, buffer: Vec<u8>) -> Self {
        let len = buffer.len();
        Self { event, offset: 0, len, layer_specific: 0, buffer }
    }

    /// The valid bytes of the packet.
    pub fn payload(&self) -> &[u8] {
        &self.buffer[self.offset..self.offset + self.len]
    }

    /// Mutable access to the whole backing buffer.
    pub(crate) fn buffer_mut(&mut self) -> &mut [u8] {
        &mut self.buffer
    }

    /// Consumes the packet, handing the backing buffer back (typically to
    /// the allocator that produced it).
    pub fn into_buffer(self) -> Vec<u8> {
        self.buffer
    }

    /// Reads the 16-bit command opcode from the first two payload bytes.
    pub fn opcode(&self) -> Result<u16> {
        let payload = self.payload();
        if payload.len() < 2 {
            return Err(ErrorKind::ReceivedDataTooShort);
        }
        Ok(LittleEndian::read_u16(&payload[..2]))
    }

    /// Maps the packet's tag to the serial packet type it travels as.
    pub fn serial_type(&self) -> Option<PacketType> {
        match self.event & tag::EVENT_TYPE_MASK {
            tag::STACK_TO_CONTROLLER_COMMAND => Some(PacketType::Command),
            tag::STACK_TO_CONTROLLER_ACL | tag::CONTROLLER_TO_STACK_ACL => Some(PacketType::Acl),
            tag::STACK_TO_CONTROLLER_SCO | tag::CONTROLLER_TO_STACK_SCO => Some(PacketType::Sco),
            tag::CONTROLLER_TO_STACK_EVENT => Some(PacketType::Event),
            _ => None,
        }
    }
}

/// Computes an inbound packet's body length from its completed preamble.
pub fn body_length(packet_type: PacketType, preamble: &[u8]) -> usize {
    match packet_type {
        // ACL carries a little-endian 16-bit length after the handle.
        PacketType::Acl => LittleEndian::read_u16(&preamble[2..4]) as usize,
        // For the others the last preamble byte is the length.
        _ => preamble[packet_type.preamble_size() - 1] as usize,
    }
}
