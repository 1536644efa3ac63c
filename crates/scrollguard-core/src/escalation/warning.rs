//! Warning stage: flashing overlay while the page content fades away.
//!
//! Timers, all armed on `start`:
//! - flash toggle every `flash_interval`
//! - content fade-out once, [`FADE_OUT_DELAY_MS`] after start
//! - completion after `screen_decay`, which stops the flash and detaches
//!   every original page node

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

use super::stage::{Stage, StageCompletion, StageCore, StageKind};
use crate::error::{RenderError, StageError};
use crate::storage::EscalationConfig;
use crate::surface::{NodeId, OverlayId, OverlayKind, OverlayView, Surface, SurfaceLock};
use crate::timer::{Interval, Timeout};

pub const FADE_OUT_DELAY_MS: i64 = 100;

pub struct WarningStage {
    core: StageCore,
    flash: Interval,
    fade_out: Timeout,
    decay: Timeout,
    screen_decay: Duration,
    flash_visible: bool,
    toggles: u32,
    faded: bool,
    content_removed: bool,
    detached: Vec<NodeId>,
}

impl WarningStage {
    pub fn new(
        hostname: impl Into<String>,
        config: &EscalationConfig,
        surface: Arc<dyn Surface>,
        lock: SurfaceLock,
    ) -> Self {
        Self {
            core: StageCore::new(StageKind::Warning, hostname, surface, lock),
            flash: Interval::new(config.flash_interval()),
            fade_out: Timeout::new(),
            decay: Timeout::new(),
            screen_decay: config.screen_decay(),
            flash_visible: false,
            toggles: 0,
            faded: false,
            content_removed: false,
            detached: Vec::new(),
        }
    }

    /// Number of flash toggles so far.
    pub fn toggles(&self) -> u32 {
        self.toggles
    }

    pub fn flash_visible(&self) -> bool {
        self.flash_visible
    }

    fn stop_timers(&mut self) {
        self.flash.stop();
        self.fade_out.cancel();
        self.decay.cancel();
    }

    /// Undo the fade when the stage ends before the content is removed.
    fn restore_content(&mut self) {
        if !self.faded || self.content_removed {
            return;
        }
        self.faded = false;
        if let Err(e) = self.core.surface().set_content_opacity(1.0) {
            tracing::warn!("Could not restore page opacity: {}", e);
        }
    }

    fn advance(&mut self, now: DateTime<Utc>) -> Result<Option<StageCompletion>, RenderError> {
        if self.fade_out.poll(now) {
            self.faded = true;
            self.core.surface().set_content_opacity(0.0)?;
        }

        if self.decay.poll(now) {
            self.stop_timers();
            self.content_removed = true;
            self.detached = self.core.surface().detach_page_content()?;
            tracing::debug!(
                "Warning detached {} page nodes after {} toggles",
                self.detached.len(),
                self.toggles
            );
            return Ok(self.core.complete());
        }

        if self.flash.poll(now) {
            self.flash_visible = !self.flash_visible;
            self.toggles += 1;
            self.core.render(&OverlayView::Flash {
                visible: self.flash_visible,
            })?;
        }
        Ok(None)
    }
}

#[async_trait]
impl Stage for WarningStage {
    fn kind(&self) -> StageKind {
        StageKind::Warning
    }

    async fn start(&mut self, now: DateTime<Utc>) -> Result<(), StageError> {
        self.core.begin()?;

        let mounted = self
            .core
            .mount(OverlayKind::Warning)
            .and_then(|_| self.core.render(&OverlayView::Flash { visible: true }));
        if let Err(e) = mounted {
            self.stop_timers();
            return Err(self.core.fail(e));
        }

        self.flash_visible = true;
        self.flash.start(now);
        self.fade_out
            .arm(now, Duration::milliseconds(FADE_OUT_DELAY_MS));
        self.decay.arm(now, self.screen_decay);
        tracing::info!("Warning stage started for {}", self.core.hostname());
        Ok(())
    }

    async fn tick(&mut self, now: DateTime<Utc>) -> Result<Option<StageCompletion>, StageError> {
        if !self.core.check_tick()? {
            return Ok(None);
        }
        match self.advance(now) {
            Ok(completion) => Ok(completion),
            Err(e) => {
                self.stop_timers();
                self.restore_content();
                Err(self.core.fail(e))
            }
        }
    }

    fn cleanup(&mut self) {
        self.stop_timers();
        self.restore_content();
        self.core.release();
    }

    fn is_active(&self) -> bool {
        self.core.is_active()
    }

    fn next_deadline(&self) -> Option<DateTime<Utc>> {
        if !self.core.is_active() {
            return None;
        }
        [
            self.flash.next_deadline(),
            self.fade_out.deadline(),
            self.decay.deadline(),
        ]
        .into_iter()
        .flatten()
        .min()
    }

    fn take_overlay(&mut self) -> Option<OverlayId> {
        self.core.take_overlay()
    }

    fn take_detached(&mut self) -> Vec<NodeId> {
        std::mem::take(&mut self.detached)
    }
}
