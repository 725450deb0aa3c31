use std::time::{Duration, Instant};

/// Source of the current instant.
///
/// The event loop never asks the operating system for the time directly;
/// it goes through a `Clock`, so tests can substitute their own notion of
/// "now" when exercising deadlines.
pub trait Clock: Send + Sync + 'static {
    /// The current instant.
    fn now(&self) -> Instant;
}

/// The real clock backing production use.
#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A one-shot deadline the event loop folds into its select timeout.
///
/// Setting an armed alarm rearms it; the loop checks [`Alarm::expired`] at
/// the top of every iteration, so an alarm fires at most once per arming.
#[derive(Debug, Default)]
pub struct Alarm {
    deadline: Option<Instant>,
}

impl Alarm {
    /// Creates a cancelled alarm.
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms (or rearms) the alarm `timeout` from now.
    pub fn set(&mut self, clock: &dyn Clock, timeout: Duration) {
        self.deadline = Some(clock.now() + timeout);
    }

    /// Disarms the alarm.
    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    /// Whether the alarm is armed and its deadline has passed.
    pub fn expired(&self, now: Instant) -> bool {
        self.deadline.map(|deadline| deadline <= now).unwrap_or(false)
    }

    /// Time left until the deadline; `None` when disarmed.
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        self.deadline.map(|deadline| deadline.saturating_duration_since(now))
    }
}
