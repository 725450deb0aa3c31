//! Inbound byte-stream reassembly.
//!
//! The controller side of the serial channel delivers bytes, not packets.
//! One [`ReassemblyContext`] per inbound packet type accumulates preamble
//! bytes until the body length is known, then fills a freshly allocated
//! buffer until a whole packet exists. The state machine tolerates partial
//! reads and reentrant invocation: all progress lives in the context, and
//! [`Reassembler::poll`] returns as soon as one complete packet has been
//! assembled so the caller can interleave other packet types and queue work.
//!
//! When no buffer can be allocated the machine drains the body bytes in the
//! `Ignore` state and resumes cleanly with the next packet. Preamble-only
//! inbound packets are dropped on allocation pressure.

use tracing::{error, warn};

use btlink_core::{constants::MAX_PREAMBLE_SIZE, hal::PacketType, packet_pool::BufferAllocator};

use crate::packet::{body_length, BtPacket, InboundTag};

/// Pull source of inbound bytes for one packet type.
///
/// Reads are non-blocking: a return of zero means no more bytes right now,
/// not end of stream.
pub trait ByteSource {
    /// Reads up to `dst.len()` bytes, returning how many were written.
    fn read(&mut self, dst: &mut [u8]) -> usize;
}

/// Where the state machine is within the current packet.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum ReceiveState {
    /// Nothing of the next packet has been seen.
    BrandNew,
    /// Accumulating preamble bytes into the scratch buffer.
    Preamble,
    /// Filling the allocated buffer with body bytes.
    Body,
    /// Draining body bytes of a packet we could not allocate a buffer for.
    Ignore,
    /// A whole packet is ready; transient, consumed before poll returns.
    Finished,
}

/// Per-type reassembly progress.
#[derive(Debug)]
struct ReassemblyContext {
    state: ReceiveState,
    bytes_remaining: usize,
    preamble: [u8; MAX_PREAMBLE_SIZE],
    index: usize,
    buffer: Option<BtPacket>,
}

impl ReassemblyContext {
    fn new() -> Self {
        Self {
            state: ReceiveState::BrandNew,
            bytes_remaining: 0,
            preamble: [0; MAX_PREAMBLE_SIZE],
            index: 0,
            buffer: None,
        }
    }
}

/// Outcome of one [`Reassembler::poll`] call.
#[derive(Debug)]
pub enum ReassemblyStatus {
    /// One whole packet was assembled. More bytes may still be buffered in
    /// the source; poll again after handling the packet.
    Finished(BtPacket),
    /// The source ran out of bytes mid-packet; progress is saved.
    Drained,
}

/// The inbound reassembly engine: one context per inbound packet type.
#[derive(Debug)]
pub struct Reassembler {
    contexts: [ReassemblyContext; 3],
}

impl Reassembler {
    /// Creates a reassembler with all contexts brand new.
    pub fn new() -> Self {
        Self {
            contexts: [ReassemblyContext::new(), ReassemblyContext::new(), ReassemblyContext::new()],
        }
    }

    /// Consumes bytes of `packet_type` from `source`, advancing that type's
    /// state machine. Returns after assembling one packet, or once the
    /// source has no more bytes.
    pub fn poll(
        &mut self,
        packet_type: PacketType,
        source: &mut dyn ByteSource,
        allocator: &mut dyn BufferAllocator,
    ) -> ReassemblyStatus {
        let Some(slot) = packet_type.inbound_index() else {
            error!("data ready for {:?}, which is not an inbound type", packet_type);
            return ReassemblyStatus::Drained;
        };
        let ctx = &mut self.contexts[slot];

        let mut byte = [0u8; 1];
        'bytes: while source.read(&mut byte) == 1 {
            // Inner loop so BRAND_NEW can initialize and fall through: the
            // byte that arrived is already the first preamble byte.
            loop {
                match ctx.state {
                    ReceiveState::BrandNew => {
                        ctx.bytes_remaining = packet_type.preamble_size();
                        ctx.preamble = [0; MAX_PREAMBLE_SIZE];
                        ctx.index = 0;
                        ctx.state = ReceiveState::Preamble;
                        continue;
                    }
                    ReceiveState::Preamble => {
                        ctx.preamble[ctx.index] = byte[0];
                        ctx.index += 1;
                        ctx.bytes_remaining -= 1;

                        if ctx.bytes_remaining == 0 {
                            let body = body_length(packet_type, &ctx.preamble[..ctx.index]);

                            match allocator.allocate(ctx.index + body) {
                                Some(mut buffer) => {
                                    buffer[..ctx.index].copy_from_slice(&ctx.preamble[..ctx.index]);
                                    let packet = BtPacket::new(
                                        InboundTag::event_for_type(packet_type),
                                        buffer,
                                    );
                                    ctx.buffer = Some(packet);
                                    ctx.bytes_remaining = body;
                                    ctx.state = if body > 0 {
                                        ReceiveState::Body
                                    } else {
                                        ReceiveState::Finished
                                    };
                                }
                                None => {
                                    warn!(
                                        "no buffer for an incoming {:?} packet, dropping {} body bytes",
                                        packet_type, body
                                    );
                                    // Can't read any more of this packet;
                                    // drain what the preamble promised.
                                    ctx.bytes_remaining = body;
                                    ctx.state = if body == 0 {
                                        ReceiveState::BrandNew
                                    } else {
                                        ReceiveState::Ignore
                                    };
                                }
                            }
                        }
                    }
                    ReceiveState::Body => {
                        let Some(packet) = ctx.buffer.as_mut() else {
                            error!("body state with no buffer, restarting packet");
                            ctx.state = ReceiveState::BrandNew;
                            break;
                        };
                        let data = packet.buffer_mut();
                        data[ctx.index] = byte[0];
                        ctx.index += 1;
                        ctx.bytes_remaining -= 1;

                        // Opportunistic bulk read of the rest of the body.
                        if ctx.bytes_remaining > 0 {
                            let read =
                                source.read(&mut data[ctx.index..ctx.index + ctx.bytes_remaining]);
                            ctx.index += read;
                            ctx.bytes_remaining -= read;
                        }

                        if ctx.bytes_remaining == 0 {
                            ctx.state = ReceiveState::Finished;
                        }
                    }
                    ReceiveState::Ignore => {
                        ctx.bytes_remaining -= 1;
                        if ctx.bytes_remaining == 0 {
                            ctx.state = ReceiveState::BrandNew;
                        }
                    }
                    ReceiveState::Finished => {
                        error!("the state machine should not have been left in the finished state");
                        break 'bytes;
                    }
                }
                break;
            }

            if ctx.state == ReceiveState::Finished {
                let Some(mut packet) = ctx.buffer.take() else {
                    error!("finished a packet with no buffer, restarting");
                    ctx.state = ReceiveState::BrandNew;
                    continue;
                };
                packet.len = ctx.index;
                ctx.state = ReceiveState::BrandNew;
                return ReassemblyStatus::Finished(packet);
            }
        }

        ReassemblyStatus::Drained
    }
}

impl Default for Reassembler {
    fn default() -> Self {
        Self::new()
    }
}
