//! Upward dispatch of inbound packets.
//!
//! The upper stack subscribes per inbound tag (ACL, SCO, EVT; ERROR is
//! reserved) and receives reassembled packets over crossbeam channels. A
//! default subscriber catches tags nobody claimed.

use std::{collections::HashMap, sync::Mutex};

use crossbeam_channel::{unbounded, Receiver, Sender};

use btlink_protocol::{BtPacket, InboundTag};

/// Typed-event dispatcher for controller-to-stack packets.
#[derive(Debug, Default)]
pub struct UpwardDispatcher {
    subscribers: Mutex<HashMap<InboundTag, Sender<BtPacket>>>,
    default: Mutex<Option<Sender<BtPacket>>>,
}

impl UpwardDispatcher {
    /// Creates a dispatcher with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes to one inbound tag, replacing any previous subscriber for
    /// that tag.
    pub fn subscribe(&self, tag: InboundTag) -> Receiver<BtPacket> {
        let (tx, rx) = unbounded();
        self.subscribers.lock().unwrap().insert(tag, tx);
        rx
    }

    /// Subscribes to everything no specific subscriber claims.
    pub fn subscribe_default(&self) -> Receiver<BtPacket> {
        let (tx, rx) = unbounded();
        *self.default.lock().unwrap() = Some(tx);
        rx
    }

    /// Delivers a packet to its tag's subscriber, falling back to the
    /// default. On `Err` nobody was listening and the caller keeps the
    /// packet (typically to release its buffer).
    pub(crate) fn dispatch(&self, packet: BtPacket) -> Result<(), BtPacket> {
        let Some(tag) = InboundTag::from_event(packet.event) else {
            return Err(packet);
        };

        let packet = {
            let subscribers = self.subscribers.lock().unwrap();
            match subscribers.get(&tag) {
                // A send only fails when the receiver was dropped; fall
                // through to the default subscriber with the packet back.
                Some(tx) => match tx.send(packet) {
                    Ok(()) => return Ok(()),
                    Err(err) => err.0,
                },
                None => packet,
            }
        };

        let fallback = self.default.lock().unwrap();
        match fallback.as_ref() {
            Some(tx) => tx.send(packet).map_err(|err| err.0),
            None => Err(packet),
        }
    }
}
