//! Final countdown before the block is created.
//!
//! The displayed number decrements once per second from the transition
//! duration rounded up to whole seconds. Completion is driven by a separate
//! hard timeout of the full duration, so a late or coalesced decrement never
//! delays it.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

use super::stage::{Stage, StageCompletion, StageCore, StageKind};
use crate::error::StageError;
use crate::storage::EscalationConfig;
use crate::surface::{OverlayKind, OverlayView, Surface, SurfaceLock};
use crate::timer::{Interval, Timeout};

const COUNTDOWN_MESSAGE: &str = "Blocking in";

pub struct CountdownStage {
    core: StageCore,
    decrement: Interval,
    hard_stop: Timeout,
    duration: Duration,
    seconds_left: u64,
}

impl CountdownStage {
    pub fn new(
        hostname: impl Into<String>,
        config: &EscalationConfig,
        surface: Arc<dyn Surface>,
        lock: SurfaceLock,
    ) -> Self {
        let duration = config.transition_duration();
        let whole_seconds = (duration.num_milliseconds().max(0) as u64).div_ceil(1000);
        Self {
            core: StageCore::new(StageKind::Countdown, hostname, surface, lock),
            decrement: Interval::new(Duration::seconds(1)),
            hard_stop: Timeout::new(),
            duration,
            seconds_left: whole_seconds,
        }
    }

    /// The number currently on screen.
    pub fn seconds_left(&self) -> u64 {
        self.seconds_left
    }

    fn view(&self) -> OverlayView {
        OverlayView::Countdown {
            message: COUNTDOWN_MESSAGE.to_string(),
            seconds_left: self.seconds_left,
        }
    }

    fn stop_timers(&mut self) {
        self.decrement.stop();
        self.hard_stop.cancel();
    }
}

#[async_trait]
impl Stage for CountdownStage {
    fn kind(&self) -> StageKind {
        StageKind::Countdown
    }

    async fn start(&mut self, now: DateTime<Utc>) -> Result<(), StageError> {
        self.core.begin()?;

        let shown = self
            .core
            .mount(OverlayKind::Countdown)
            .and_then(|_| self.core.render(&self.view()));
        if let Err(e) = shown {
            return Err(self.core.fail(e));
        }

        self.decrement.start(now);
        self.hard_stop.arm(now, self.duration);
        tracing::info!(
            "Countdown started for {} ({}s)",
            self.core.hostname(),
            self.seconds_left
        );
        Ok(())
    }

    async fn tick(&mut self, now: DateTime<Utc>) -> Result<Option<StageCompletion>, StageError> {
        if !self.core.check_tick()? {
            return Ok(None);
        }

        if self.hard_stop.poll(now) {
            self.stop_timers();
            return Ok(self.core.complete());
        }

        if self.decrement.poll(now) && self.seconds_left > 1 {
            self.seconds_left -= 1;
            if let Err(e) = self.core.render(&self.view()) {
                self.stop_timers();
                return Err(self.core.fail(e));
            }
        }
        Ok(None)
    }

    fn cleanup(&mut self) {
        self.stop_timers();
        self.core.release();
    }

    fn is_active(&self) -> bool {
        self.core.is_active()
    }

    fn next_deadline(&self) -> Option<DateTime<Utc>> {
        if !self.core.is_active() {
            return None;
        }
        [self.decrement.next_deadline(), self.hard_stop.deadline()]
            .into_iter()
            .flatten()
            .min()
    }
}
