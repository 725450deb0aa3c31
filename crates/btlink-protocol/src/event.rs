//! Command-complete / command-status event parsing.
//!
//! These are the only two events the transport layer interprets: they carry
//! the command-credit refresh and the opcode that correlates the response
//! back to its pending command. Everything else flows upward opaque.

use byteorder::{ByteOrder, LittleEndian};

use btlink_core::{
    constants::{COMMAND_COMPLETE_EVT, COMMAND_STATUS_EVT},
    error::{ErrorKind, Result},
};

/// A parsed command-response event.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CommandResponse {
    /// Command Complete (0x0E): the command finished and its return
    /// parameters follow in the packet.
    Complete {
        /// New command credit count; replaces the host's counter.
        credits: u8,
        /// Opcode of the command this completes.
        opcode: u16,
    },
    /// Command Status (0x0F): the command was accepted (or not); completion
    /// arrives separately, not as a Command Complete.
    Status {
        /// Status code, zero for success.
        status: u8,
        /// New command credit count; replaces the host's counter.
        credits: u8,
        /// Opcode of the command this answers.
        opcode: u16,
    },
}

impl CommandResponse {
    /// Parses an event packet's payload (event code first).
    ///
    /// Returns `Ok(None)` for event codes other than command-complete and
    /// command-status, and an error for a truncated response event.
    pub fn parse(payload: &[u8]) -> Result<Option<CommandResponse>> {
        if payload.is_empty() {
            return Err(ErrorKind::ReceivedDataTooShort);
        }

        // payload[1] is the parameter total length; the state machine that
        // assembled the packet already enforced it, so it is skipped here.
        match payload[0] {
            COMMAND_COMPLETE_EVT => {
                if payload.len() < 5 {
                    return Err(ErrorKind::ReceivedDataTooShort);
                }
                Ok(Some(CommandResponse::Complete {
                    credits: payload[2],
                    opcode: LittleEndian::read_u16(&payload[3..5]),
                }))
            }
            COMMAND_STATUS_EVT => {
                if payload.len() < 6 {
                    return Err(ErrorKind::ReceivedDataTooShort);
                }
                Ok(Some(CommandResponse::Status {
                    status: payload[2],
                    credits: payload[3],
                    opcode: LittleEndian::read_u16(&payload[4..6]),
                }))
            }
            _ => Ok(None),
        }
    }

    /// The opcode the response correlates to.
    pub fn opcode(&self) -> u16 {
        match self {
            CommandResponse::Complete { opcode, .. } => *opcode,
            CommandResponse::Status { opcode, .. } => *opcode,
        }
    }

    /// The credit count carried by the response.
    pub fn credits(&self) -> u8 {
        match self {
            CommandResponse::Complete { credits, .. } => *credits,
            CommandResponse::Status { credits, .. } => *credits,
        }
    }
}
