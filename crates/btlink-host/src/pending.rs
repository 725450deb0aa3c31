//! Commands awaiting their response event.
//!
//! A command dispatched to the HAL stays on the pending-response list until
//! a command-complete or command-status event with its opcode arrives, or
//! the watchdog fires. The list is mutex-guarded: the alarm path and the
//! event-loop thread both touch it, and every access keeps the critical
//! section to the minimum. Correlation is FIFO per opcode, oldest first,
//! so duplicate opcodes resolve in dispatch order.

use std::{
    collections::VecDeque,
    fmt,
    sync::Mutex,
};

use btlink_protocol::BtPacket;

/// Callback invoked with the command-complete event packet. The callback
/// owns the packet.
pub type CompleteCallback = Box<dyn FnOnce(BtPacket) + Send>;

/// Callback invoked with the command-status result and the original command
/// packet. The callback owns the command.
pub type StatusCallback = Box<dyn FnOnce(u8, BtPacket) + Send>;

/// A command queued for dispatch or awaiting its response.
pub struct PendingCommand {
    /// Opcode parsed from the command's first two payload bytes.
    pub opcode: u16,
    /// Invoked on command-complete, if the caller wants the event.
    pub complete_callback: Option<CompleteCallback>,
    /// Invoked on command-status, if the caller wants the result.
    pub status_callback: Option<StatusCallback>,
    /// The command packet itself. Absent only while the buffer is out being
    /// transmitted.
    pub command: Option<BtPacket>,
}

impl fmt::Debug for PendingCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingCommand")
            .field("opcode", &format_args!("0x{:04x}", self.opcode))
            .field("complete_callback", &self.complete_callback.is_some())
            .field("status_callback", &self.status_callback.is_some())
            .field("command", &self.command)
            .finish()
    }
}

/// The mutex-guarded pending-response list.
#[derive(Debug, Default)]
pub struct PendingCommands {
    inner: Mutex<VecDeque<PendingCommand>>,
}

impl PendingCommands {
    /// Creates an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a dispatched command to the tail.
    pub fn push(&self, command: PendingCommand) {
        self.inner.lock().unwrap().push_back(command);
    }

    /// Removes and returns the oldest entry matching `opcode`.
    pub fn take_by_opcode(&self, opcode: u16) -> Option<PendingCommand> {
        let mut inner = self.inner.lock().unwrap();
        let position = inner.iter().position(|entry| entry.opcode == opcode)?;
        inner.remove(position)
    }

    /// Whether any command is awaiting a response.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().is_empty()
    }

    /// Number of commands awaiting a response.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    /// Opcode of the oldest pending command, read under the lock.
    ///
    /// The watchdog logs this before terminating; reading it under the lock
    /// means the entry cannot be removed between the check and the read.
    pub fn front_opcode(&self) -> Option<u16> {
        self.inner.lock().unwrap().front().map(|entry| entry.opcode)
    }

    /// Empties the list, returning every entry for disposal.
    pub fn drain(&self) -> Vec<PendingCommand> {
        self.inner.lock().unwrap().drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use btlink_protocol::tag;

    fn entry(opcode: u16) -> PendingCommand {
        PendingCommand {
            opcode,
            complete_callback: None,
            status_callback: None,
            command: Some(BtPacket::new(
                tag::STACK_TO_CONTROLLER_COMMAND,
                opcode.to_le_bytes().to_vec(),
            )),
        }
    }

    #[test]
    fn test_take_matches_fifo_per_opcode() {
        let pending = PendingCommands::new();
        pending.push(entry(0x0C03));
        pending.push(entry(0x1001));
        pending.push(entry(0x0C03));

        // Two entries share an opcode; the older one must come out first.
        let first = pending.take_by_opcode(0x0C03).unwrap();
        assert_eq!(first.opcode, 0x0C03);
        assert_eq!(pending.len(), 2);

        let second = pending.take_by_opcode(0x0C03).unwrap();
        assert_eq!(second.opcode, 0x0C03);
        assert_eq!(pending.front_opcode(), Some(0x1001));
    }

    #[test]
    fn test_take_missing_opcode_leaves_list_alone() {
        let pending = PendingCommands::new();
        pending.push(entry(0x1001));

        assert!(pending.take_by_opcode(0xDEAD).is_none());
        assert_eq!(pending.len(), 1);
    }

    #[test]
    fn test_front_opcode_on_empty() {
        let pending = PendingCommands::new();
        assert_eq!(pending.front_opcode(), None);
        assert!(pending.is_empty());
    }

    #[test]
    fn test_drain_empties() {
        let pending = PendingCommands::new();
        pending.push(entry(0x1001));
        pending.push(entry(0x1002));

        let drained = pending.drain();
        assert_eq!(drained.len(), 2);
        assert!(pending.is_empty());
    }
}
