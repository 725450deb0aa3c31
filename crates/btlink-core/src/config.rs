use std::{default::Default, time::Duration};

use crate::constants::{COMMAND_PENDING_TIMEOUT_MS, EPILOG_TIMEOUT_MS, FATAL_DRAIN_DELAY_MS};

#[derive(Clone, Debug)]
/// Configuration options to tune transport and runtime behavior.
pub struct Config {
    /// Max time a dispatched command may wait for a command-complete or
    /// command-status event before the watchdog declares the controller dead.
    pub command_timeout: Duration,
    /// Max time shutdown waits for the vendor epilog handshake before
    /// stopping the event-loop thread anyway.
    pub epilog_timeout: Duration,
    /// Pause between logging a fatal command timeout and terminating the
    /// process, so the log lines can drain.
    pub fatal_drain_delay: Duration,
    /// Capacity in bytes of buffers handed out by the pooled allocator.
    pub pool_buffer_size: usize,
    /// Max number of recycled buffers the pooled allocator keeps around.
    pub pool_max_buffers: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            command_timeout: Duration::from_millis(COMMAND_PENDING_TIMEOUT_MS),
            epilog_timeout: Duration::from_millis(EPILOG_TIMEOUT_MS),
            fatal_drain_delay: Duration::from_millis(FATAL_DRAIN_DELAY_MS),
            pool_buffer_size: 1024, // Covers events and commands; big ACL frames size themselves
            pool_max_buffers: 64,
        }
    }
}
