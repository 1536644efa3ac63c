//! Elapsed reading time on news pages.
//!
//! The tracker only measures. The page controller adds each sample to the
//! daily counter through `TimeManager::add_news_time`.

use chrono::{DateTime, Duration, Utc};

use crate::timer::Interval;

#[derive(Debug, Clone)]
pub struct NewsTimeTracker {
    sample: Interval,
    last_sample: Option<DateTime<Utc>>,
    max_gap: Duration,
}

impl NewsTimeTracker {
    pub fn new(update_interval: Duration, max_gap: Duration) -> Self {
        Self {
            sample: Interval::new(update_interval),
            last_sample: None,
            max_gap,
        }
    }

    pub fn is_running(&self) -> bool {
        self.last_sample.is_some()
    }

    /// Start measuring from `now`. No-op while already running.
    pub fn resume(&mut self, now: DateTime<Utc>) {
        if self.is_running() {
            return;
        }
        self.last_sample = Some(now);
        self.sample.start(now);
    }

    /// Stop measuring and return the time since the last sample.
    pub fn pause(&mut self, now: DateTime<Utc>) -> u64 {
        let delta = self.take_delta(now);
        self.sample.stop();
        self.last_sample = None;
        delta
    }

    /// Milliseconds to record, when a sample is due.
    pub fn poll(&mut self, now: DateTime<Utc>) -> Option<u64> {
        if self.sample.poll(now) {
            Some(self.take_delta(now))
        } else {
            None
        }
    }

    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        self.sample.next_deadline()
    }

    fn take_delta(&mut self, now: DateTime<Utc>) -> u64 {
        let Some(last) = self.last_sample.replace(now) else {
            return 0;
        };
        let elapsed = now - last;
        if elapsed <= Duration::zero() {
            return 0;
        }
        if elapsed > self.max_gap {
            tracing::debug!(
                "Dropping {}ms news sample as a sleep gap",
                elapsed.num_milliseconds()
            );
            return 0;
        }
        elapsed.num_milliseconds() as u64
    }
}
