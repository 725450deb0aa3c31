//! The fragmenter seam.
//!
//! Outbound packets pass through a fragmenter before reaching the HAL, and
//! inbound data packets pass through its reassembler before heading upward
//! (multi-packet ACL reassembly lives there, not in this layer). The
//! fragmenter receives its callbacks as a [`FragmentSink`] parameter on
//! every call rather than holding a reference back into the layer.

use tracing::warn;

use btlink_core::hal::PacketType;
use btlink_protocol::BtPacket;

/// Callbacks the transport layer exposes to the fragmenter.
pub trait FragmentSink {
    /// Writes one fragment to the wire (btsnoop capture included).
    /// `send_done` marks the last fragment of the packet.
    fn transmit_fragment(&mut self, packet: &BtPacket, send_done: bool);

    /// Hands a completely reassembled inbound packet upward.
    fn dispatch_reassembled(&mut self, packet: BtPacket);

    /// Notifies the upper stack that an outbound data packet went out.
    fn transmit_finished(&mut self, packet: BtPacket, all_sent: bool);
}

/// Outbound fragmentation and inbound multi-packet reassembly.
pub trait Fragmenter: Send {
    /// Called once during start-up.
    fn init(&mut self) {}

    /// Fragments and transmits an outbound packet through `sink`.
    ///
    /// Commands are returned to the caller afterwards: the pending-response
    /// list keeps owning them until their response arrives. Data packets are
    /// handed to the upper stack via [`FragmentSink::transmit_finished`] and
    /// `None` comes back.
    fn fragment_and_dispatch(
        &mut self,
        packet: BtPacket,
        sink: &mut dyn FragmentSink,
    ) -> Option<BtPacket>;

    /// Runs an inbound packet through multi-packet reassembly, dispatching
    /// whatever becomes complete.
    fn reassemble_and_dispatch(&mut self, packet: BtPacket, sink: &mut dyn FragmentSink);

    /// Called once during shutdown.
    fn cleanup(&mut self) {}
}

/// Fragmenter for controllers whose buffer sizes need no fragmentation:
/// every packet goes out whole and comes up whole.
#[derive(Debug, Default)]
pub struct PassthroughFragmenter;

impl Fragmenter for PassthroughFragmenter {
    fn fragment_and_dispatch(
        &mut self,
        packet: BtPacket,
        sink: &mut dyn FragmentSink,
    ) -> Option<BtPacket> {
        sink.transmit_fragment(&packet, true);

        if packet.serial_type() == Some(PacketType::Command) {
            Some(packet)
        } else {
            sink.transmit_finished(packet, true);
            None
        }
    }

    fn reassemble_and_dispatch(&mut self, packet: BtPacket, sink: &mut dyn FragmentSink) {
        if packet.serial_type().is_none() {
            warn!("inbound packet with unknown tag 0x{:04x}", packet.event);
        }
        sink.dispatch_reassembled(packet);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use btlink_protocol::tag;

    #[derive(Default)]
    struct RecordingSink {
        fragments: Vec<(u16, Vec<u8>, bool)>,
        dispatched: Vec<Vec<u8>>,
        finished: Vec<(Vec<u8>, bool)>,
    }

    impl FragmentSink for RecordingSink {
        fn transmit_fragment(&mut self, packet: &BtPacket, send_done: bool) {
            self.fragments.push((packet.event, packet.payload().to_vec(), send_done));
        }

        fn dispatch_reassembled(&mut self, packet: BtPacket) {
            self.dispatched.push(packet.payload().to_vec());
        }

        fn transmit_finished(&mut self, packet: BtPacket, all_sent: bool) {
            self.finished.push((packet.payload().to_vec(), all_sent));
        }
    }

    #[test]
    fn test_command_comes_back_to_the_caller() {
        let mut fragmenter = PassthroughFragmenter;
        let mut sink = RecordingSink::default();

        let command = BtPacket::new(tag::STACK_TO_CONTROLLER_COMMAND, vec![0x03, 0x0C, 0x00]);
        let returned = fragmenter.fragment_and_dispatch(command, &mut sink);

        assert!(returned.is_some());
        assert_eq!(sink.fragments.len(), 1);
        assert!(sink.finished.is_empty());
    }

    #[test]
    fn test_data_packet_finishes_upward() {
        let mut fragmenter = PassthroughFragmenter;
        let mut sink = RecordingSink::default();

        let acl = BtPacket::new(tag::STACK_TO_CONTROLLER_ACL, vec![0x01, 0x00, 0x01, 0x00, 0xAA]);
        let returned = fragmenter.fragment_and_dispatch(acl, &mut sink);

        assert!(returned.is_none());
        assert_eq!(sink.fragments.len(), 1);
        assert_eq!(sink.finished.len(), 1);
        assert!(sink.finished[0].1);
    }

    #[test]
    fn test_reassemble_is_passthrough() {
        let mut fragmenter = PassthroughFragmenter;
        let mut sink = RecordingSink::default();

        let acl = BtPacket::new(tag::CONTROLLER_TO_STACK_ACL, vec![0x01, 0x00, 0x01, 0x00, 0xBB]);
        fragmenter.reassemble_and_dispatch(acl, &mut sink);

        assert_eq!(sink.dispatched.len(), 1);
    }
}
