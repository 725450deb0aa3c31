//! Inbound event filtering.
//!
//! Every event packet coming off the reassembler passes through here first.
//! Command-complete and command-status events belong to this layer: they
//! refresh the command credits and resolve the matching pending command.
//! Everything else flows upward untouched.

use tracing::{error, warn};

use btlink_core::packet_pool::BufferAllocator;
use btlink_protocol::{BtPacket, CommandResponse};

use crate::pending::PendingCommands;

/// What became of an inbound event packet.
#[derive(Debug)]
pub(crate) enum FilterOutcome {
    /// The event was a command response: it was consumed, and the credit
    /// counter must be replaced with this value.
    Consumed(u8),
    /// The event was malformed; it was released and nothing else changed.
    Dropped,
    /// Not a command response; forward it upward.
    Forward(BtPacket),
}

/// Runs one event packet through the command-response filter.
///
/// Buffer ownership follows the response kind: a complete callback owns the
/// event packet, a status callback owns the original command, and whatever
/// no callback claims goes back to the allocator.
pub(crate) fn filter_incoming_event(
    packet: BtPacket,
    pending: &PendingCommands,
    allocator: &mut dyn BufferAllocator,
) -> FilterOutcome {
    let response = match CommandResponse::parse(packet.payload()) {
        Ok(Some(response)) => response,
        Ok(None) => return FilterOutcome::Forward(packet),
        Err(err) => {
            error!("dropping malformed command response event: {}", err);
            allocator.release(packet.into_buffer());
            return FilterOutcome::Dropped;
        }
    };

    let credits = response.credits();

    match response {
        CommandResponse::Complete { opcode, .. } => {
            match pending.take_by_opcode(opcode) {
                None => {
                    warn!(
                        "command complete event with no matching command, opcode 0x{:04x}",
                        opcode
                    );
                    allocator.release(packet.into_buffer());
                }
                Some(entry) => {
                    // The callback owns the event packet; the command's job
                    // is done either way.
                    match entry.complete_callback {
                        Some(callback) => callback(packet),
                        None => allocator.release(packet.into_buffer()),
                    }
                    if let Some(command) = entry.command {
                        allocator.release(command.into_buffer());
                    }
                }
            }
        }
        CommandResponse::Status { status, opcode, .. } => {
            // A command that generates a command status event will not be
            // getting a command complete event.
            match pending.take_by_opcode(opcode) {
                None => {
                    warn!(
                        "command status event with no matching command, opcode 0x{:04x}",
                        opcode
                    );
                    allocator.release(packet.into_buffer());
                }
                Some(entry) => {
                    allocator.release(packet.into_buffer());
                    match (entry.status_callback, entry.command) {
                        (Some(callback), Some(command)) => callback(status, command),
                        (Some(_), None) => {
                            error!(
                                "pending command 0x{:04x} lost its buffer before its status",
                                opcode
                            );
                        }
                        (None, Some(command)) => allocator.release(command.into_buffer()),
                        (None, None) => {}
                    }
                }
            }
        }
    }

    FilterOutcome::Consumed(credits)
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    };

    use btlink_core::packet_pool::PooledAllocator;
    use btlink_protocol::tag;

    use super::*;
    use crate::pending::PendingCommand;

    /// Allocator that counts releases so tests can watch buffers come home.
    struct CountingAllocator {
        inner: PooledAllocator,
        released: Arc<AtomicUsize>,
    }

    impl CountingAllocator {
        fn new() -> (Self, Arc<AtomicUsize>) {
            let released = Arc::new(AtomicUsize::new(0));
            (Self { inner: PooledAllocator::default(), released: released.clone() }, released)
        }
    }

    impl BufferAllocator for CountingAllocator {
        fn allocate(&mut self, size: usize) -> Option<Vec<u8>> {
            self.inner.allocate(size)
        }

        fn release(&mut self, buffer: Vec<u8>) {
            self.released.fetch_add(1, Ordering::SeqCst);
            self.inner.release(buffer);
        }
    }

    fn complete_event(credits: u8, opcode: u16) -> BtPacket {
        let op = opcode.to_le_bytes();
        BtPacket::new(
            tag::CONTROLLER_TO_STACK_EVENT,
            vec![0x0E, 0x04, credits, op[0], op[1], 0x00],
        )
    }

    fn status_event(status: u8, credits: u8, opcode: u16) -> BtPacket {
        let op = opcode.to_le_bytes();
        BtPacket::new(
            tag::CONTROLLER_TO_STACK_EVENT,
            vec![0x0F, 0x04, status, credits, op[0], op[1]],
        )
    }

    fn command(opcode: u16) -> BtPacket {
        let op = opcode.to_le_bytes();
        BtPacket::new(tag::STACK_TO_CONTROLLER_COMMAND, vec![op[0], op[1], 0x00])
    }

    #[test]
    fn test_complete_with_callback_hands_over_packet() {
        let pending = PendingCommands::new();
        let (mut allocator, released) = CountingAllocator::new();

        let seen = Arc::new(Mutex::new(None));
        let seen_in_callback = seen.clone();
        pending.push(PendingCommand {
            opcode: 0x0C03,
            complete_callback: Some(Box::new(move |packet| {
                *seen_in_callback.lock().unwrap() = Some(packet.payload().to_vec());
            })),
            status_callback: None,
            command: Some(command(0x0C03)),
        });

        let outcome = filter_incoming_event(complete_event(1, 0x0C03), &pending, &mut allocator);

        assert!(matches!(outcome, FilterOutcome::Consumed(1)));
        assert_eq!(
            seen.lock().unwrap().as_deref(),
            Some(&[0x0E, 0x04, 0x01, 0x03, 0x0C, 0x00][..])
        );
        // Only the original command went back to the allocator.
        assert_eq!(released.load(Ordering::SeqCst), 1);
        assert!(pending.is_empty());
    }

    #[test]
    fn test_complete_without_callback_releases_both() {
        let pending = PendingCommands::new();
        let (mut allocator, released) = CountingAllocator::new();

        pending.push(PendingCommand {
            opcode: 0x0C03,
            complete_callback: None,
            status_callback: None,
            command: Some(command(0x0C03)),
        });

        let outcome = filter_incoming_event(complete_event(1, 0x0C03), &pending, &mut allocator);

        assert!(matches!(outcome, FilterOutcome::Consumed(1)));
        assert_eq!(released.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_status_with_callback_hands_over_command() {
        let pending = PendingCommands::new();
        let (mut allocator, released) = CountingAllocator::new();

        let seen = Arc::new(Mutex::new(None));
        let seen_in_callback = seen.clone();
        pending.push(PendingCommand {
            opcode: 0x0405,
            complete_callback: None,
            status_callback: Some(Box::new(move |status, original| {
                *seen_in_callback.lock().unwrap() = Some((status, original.payload().to_vec()));
            })),
            command: Some(command(0x0405)),
        });

        let outcome = filter_incoming_event(status_event(0x00, 2, 0x0405), &pending, &mut allocator);

        assert!(matches!(outcome, FilterOutcome::Consumed(2)));
        let (status, original) = seen.lock().unwrap().take().unwrap();
        assert_eq!(status, 0x00);
        assert_eq!(original, vec![0x05, 0x04, 0x00]);
        // Only the event packet went back to the allocator.
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_status_without_callback_releases_both() {
        let pending = PendingCommands::new();
        let (mut allocator, released) = CountingAllocator::new();

        pending.push(PendingCommand {
            opcode: 0x0405,
            complete_callback: None,
            status_callback: None,
            command: Some(command(0x0405)),
        });

        let outcome = filter_incoming_event(status_event(0x0C, 1, 0x0405), &pending, &mut allocator);

        assert!(matches!(outcome, FilterOutcome::Consumed(1)));
        assert_eq!(released.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_unmatched_complete_releases_packet_only() {
        let pending = PendingCommands::new();
        let (mut allocator, released) = CountingAllocator::new();
        pending.push(PendingCommand {
            opcode: 0x1001,
            complete_callback: None,
            status_callback: None,
            command: Some(command(0x1001)),
        });

        let outcome = filter_incoming_event(complete_event(1, 0xDEAD), &pending, &mut allocator);

        assert!(matches!(outcome, FilterOutcome::Consumed(1)));
        assert_eq!(released.load(Ordering::SeqCst), 1);
        // The unrelated pending command is untouched.
        assert_eq!(pending.len(), 1);
    }

    #[test]
    fn test_non_response_events_forward() {
        let pending = PendingCommands::new();
        let (mut allocator, released) = CountingAllocator::new();

        let disconnection = BtPacket::new(
            tag::CONTROLLER_TO_STACK_EVENT,
            vec![0x05, 0x04, 0x00, 0x40, 0x00, 0x13],
        );
        let outcome = filter_incoming_event(disconnection, &pending, &mut allocator);

        let FilterOutcome::Forward(packet) = outcome else {
            panic!("expected the event to flow upward");
        };
        assert_eq!(packet.payload()[0], 0x05);
        assert_eq!(released.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_truncated_response_is_dropped() {
        let pending = PendingCommands::new();
        let (mut allocator, released) = CountingAllocator::new();

        let truncated = BtPacket::new(tag::CONTROLLER_TO_STACK_EVENT, vec![0x0E, 0x01, 0x01]);
        let outcome = filter_incoming_event(truncated, &pending, &mut allocator);

        assert!(matches!(outcome, FilterOutcome::Dropped));
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_pending_list_shrinks_by_at_most_one() {
        let pending = PendingCommands::new();
        let (mut allocator, _released) = CountingAllocator::new();

        pending.push(PendingCommand {
            opcode: 0x2000,
            complete_callback: None,
            status_callback: None,
            command: Some(command(0x2000)),
        });
        pending.push(PendingCommand {
            opcode: 0x2000,
            complete_callback: None,
            status_callback: None,
            command: Some(command(0x2000)),
        });

        let before = pending.len();
        filter_incoming_event(complete_event(1, 0x2000), &pending, &mut allocator);
        assert_eq!(before - pending.len(), 1);
    }
}
