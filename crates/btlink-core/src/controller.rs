//! Controller module contract.
//!
//! The controller module owns knowledge about the attached chip (buffer
//! sizes, feature masks). The transport layer only needs to kick off its
//! ACL-size fetch during postload.

/// Host-side model of the attached controller.
pub trait Controller: Send {
    /// Called once during start-up, before any traffic flows.
    fn init(&mut self) {}

    /// Begins the asynchronous fetch of the controller's ACL buffer sizes.
    /// `done` is invoked when the fetch completes.
    fn begin_acl_size_fetch(&mut self, done: Box<dyn FnOnce() + Send>);
}

/// Controller stub whose ACL-size fetch completes immediately.
///
/// Useful for emulated transports and tests, where there is no real chip to
/// interrogate.
#[derive(Debug, Default)]
pub struct ImmediateController;

impl Controller for ImmediateController {
    fn begin_acl_size_fetch(&mut self, done: Box<dyn FnOnce() + Send>) {
        done();
    }
}
