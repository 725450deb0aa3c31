#![warn(missing_docs)]

//! btlink-host: the HCI transport engine and its public facade.
//!
//! Everything here runs around a single event-loop thread (the
//! "hci-thread"): the outbound scheduler draining the command queue under
//! HCI command credits, the inbound event filter correlating command
//! responses, the reassembly of inbound byte streams, the lifecycle
//! (preload / postload / epilog) and the alarms. The [`Hci`] facade is the
//! only entry point the upper stack needs.

/// Alarm bookkeeping and the clock abstraction.
pub mod alarm;
/// Upward dispatch of inbound packets to upper-stack subscribers.
pub mod dispatcher;
/// The fatal-timeout policy hook.
pub mod fatal;
/// Fragmenter contract and the bundled pass-through implementation.
pub mod fragmenter;
/// Pending-command bookkeeping (commands awaiting their response event).
pub mod pending;

mod event_loop;
mod filter;
mod hci;

pub use dispatcher::UpwardDispatcher;
pub use fatal::{AbortOnTimeout, FatalHandler};
pub use fragmenter::{FragmentSink, Fragmenter, PassthroughFragmenter};
pub use hci::{Collaborators, Hci, Inject, NoopInject, TransmitHandle, UpperCallbacks};
pub use pending::{CompleteCallback, PendingCommand, StatusCallback};
