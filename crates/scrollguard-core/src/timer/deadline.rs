//! Deadline-based timer handles.
//!
//! Handles have no thread and never fire on their own. The owner polls them
//! with the current wall-clock time, the same way every component in this
//! crate is driven by `tick(now)`. Cancelling a handle drops its deadline, so
//! a cancelled handle can be polled forever without firing.
//!
//! ## Clock jumps
//!
//! An [`Interval`] that is overdue by more than one period fires once and
//! re-anchors to `now + period`; missed ticks are coalesced, never replayed.
//! If the clock moves backwards far enough that the next deadline is more
//! than one period away, the interval re-anchors to `now + period` as well.

use chrono::{DateTime, Duration, Utc};

/// One-shot timer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Timeout {
    deadline: Option<DateTime<Utc>>,
}

impl Timeout {
    /// Create a disarmed timeout.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arm(&mut self, now: DateTime<Utc>, delay: Duration) {
        self.deadline = Some(now + delay);
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        self.deadline
    }

    /// Returns `true` exactly once, on the first poll at or after the deadline.
    pub fn poll(&mut self, now: DateTime<Utc>) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}

/// Repeating timer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interval {
    period: Duration,
    next: Option<DateTime<Utc>>,
}

impl Interval {
    /// Create a stopped interval. Periods below one millisecond are raised to
    /// one millisecond so a running interval always makes progress.
    pub fn new(period: Duration) -> Self {
        Self {
            period: period.max(Duration::milliseconds(1)),
            next: None,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Start (or restart) with the first fire one period from `now`.
    pub fn start(&mut self, now: DateTime<Utc>) {
        self.next = Some(now + self.period);
    }

    /// Start (or restart) with the first fire at `now`.
    pub fn start_immediately(&mut self, now: DateTime<Utc>) {
        self.next = Some(now);
    }

    pub fn stop(&mut self) {
        self.next = None;
    }

    pub fn is_running(&self) -> bool {
        self.next.is_some()
    }

    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        self.next
    }

    /// Returns `true` when the interval is due, at most once per call.
    pub fn poll(&mut self, now: DateTime<Utc>) -> bool {
        let Some(next) = self.next else {
            return false;
        };

        if now < next {
            if next - now > self.period {
                self.next = Some(now + self.period);
            }
            return false;
        }

        let following = next + self.period;
        self.next = Some(if following <= now {
            now + self.period
        } else {
            following
        });
        true
    }
}
