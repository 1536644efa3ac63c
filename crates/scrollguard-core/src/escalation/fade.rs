//! Fade transition: a short breathing countdown between the warning flash
//! and the hard countdown. Reuses the warning overlay when handed one.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

use super::stage::{Stage, StageCompletion, StageCore, StageKind};
use crate::error::{RenderError, StageError};
use crate::storage::EscalationConfig;
use crate::surface::{OverlayId, OverlayKind, OverlayView, Surface, SurfaceLock};
use crate::timer::Interval;

const FADE_MESSAGE: &str = "Take a breath";

pub struct FadeTransitionStage {
    core: StageCore,
    reuse: Option<OverlayId>,
    tick_interval: Interval,
    seconds_left: u64,
}

impl FadeTransitionStage {
    pub fn new(
        hostname: impl Into<String>,
        config: &EscalationConfig,
        surface: Arc<dyn Surface>,
        lock: SurfaceLock,
    ) -> Self {
        Self {
            core: StageCore::new(StageKind::FadeTransition, hostname, surface, lock),
            reuse: None,
            tick_interval: Interval::new(Duration::seconds(1)),
            seconds_left: config.fade_countdown_secs,
        }
    }

    /// Draw into an overlay mounted by the previous stage instead of
    /// mounting a new one.
    pub fn with_overlay(mut self, overlay: Option<OverlayId>) -> Self {
        self.reuse = overlay;
        self
    }

    pub fn seconds_left(&self) -> u64 {
        self.seconds_left
    }

    fn view(&self) -> OverlayView {
        OverlayView::Countdown {
            message: FADE_MESSAGE.to_string(),
            seconds_left: self.seconds_left,
        }
    }

    fn show(&mut self) -> Result<(), RenderError> {
        match self.reuse.take() {
            Some(id) => self.core.adopt(id),
            None => {
                self.core.mount(OverlayKind::Transition)?;
            }
        }
        self.core.render(&self.view())
    }
}

#[async_trait]
impl Stage for FadeTransitionStage {
    fn kind(&self) -> StageKind {
        StageKind::FadeTransition
    }

    async fn start(&mut self, now: DateTime<Utc>) -> Result<(), StageError> {
        self.core.begin()?;
        if let Err(e) = self.show() {
            return Err(self.core.fail(e));
        }

        if self.seconds_left == 0 {
            self.tick_interval.start_immediately(now);
        } else {
            self.tick_interval.start(now);
        }
        tracing::info!(
            "Fade transition started for {} ({}s)",
            self.core.hostname(),
            self.seconds_left
        );
        Ok(())
    }

    async fn tick(&mut self, now: DateTime<Utc>) -> Result<Option<StageCompletion>, StageError> {
        if !self.core.check_tick()? || !self.tick_interval.poll(now) {
            return Ok(None);
        }

        self.seconds_left = self.seconds_left.saturating_sub(1);
        if let Err(e) = self.core.render(&self.view()) {
            self.tick_interval.stop();
            return Err(self.core.fail(e));
        }
        if self.seconds_left == 0 {
            self.tick_interval.stop();
            return Ok(self.core.complete());
        }
        Ok(None)
    }

    fn cleanup(&mut self) {
        self.tick_interval.stop();
        self.core.release();
    }

    fn is_active(&self) -> bool {
        self.core.is_active()
    }

    fn next_deadline(&self) -> Option<DateTime<Utc>> {
        if self.core.is_active() {
            self.tick_interval.next_deadline()
        } else {
            None
        }
    }

    fn take_overlay(&mut self) -> Option<OverlayId> {
        self.core.take_overlay()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::MemorySurface;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap()
    }

    fn seconds_shown(surface: &MemorySurface, id: OverlayId) -> Option<u64> {
        match surface.view(id) {
            Some(OverlayView::Countdown { seconds_left, .. }) => Some(seconds_left),
            _ => None,
        }
    }

    #[tokio::test]
    async fn counts_down_in_the_handed_over_overlay() {
        let surface = Arc::new(MemorySurface::new(1));
        let lock = SurfaceLock::new();
        let warning_overlay = surface.mount_overlay(OverlayKind::Warning).unwrap();

        let mut fade = FadeTransitionStage::new(
            "x.com",
            &EscalationConfig::default(),
            surface.clone(),
            lock.clone(),
        )
        .with_overlay(Some(warning_overlay));
        fade.start(t0()).await.unwrap();
        assert_eq!(surface.snapshot().mounted.len(), 1);
        assert_eq!(seconds_shown(&surface, warning_overlay), Some(5));

        let mut shown = Vec::new();
        let mut completed_at = None;
        while let Some(deadline) = fade.next_deadline() {
            let done = fade.tick(deadline).await.unwrap();
            shown.push(seconds_shown(&surface, warning_overlay).unwrap());
            if done.is_some() {
                completed_at = Some(deadline);
            }
        }
        assert_eq!(shown, vec![4, 3, 2, 1, 0]);
        assert_eq!(completed_at, Some(t0() + Duration::seconds(5)));

        fade.cleanup();
        assert!(surface.snapshot().mounted.is_empty());
        assert!(!lock.is_owned());
    }

    #[tokio::test]
    async fn zero_seconds_completes_on_first_tick() {
        let surface = Arc::new(MemorySurface::new(1));
        let lock = SurfaceLock::new();
        let config = EscalationConfig {
            fade_countdown_secs: 0,
            ..EscalationConfig::default()
        };
        let mut fade = FadeTransitionStage::new("x.com", &config, surface.clone(), lock.clone());
        fade.start(t0()).await.unwrap();
        assert_eq!(fade.next_deadline(), Some(t0()));
        assert!(fade.tick(t0()).await.unwrap().is_some());
        assert_eq!(surface.snapshot().mounted[0].1, OverlayKind::Transition);
    }

    #[tokio::test]
    async fn busy_surface_is_reported() {
        let surface = Arc::new(MemorySurface::new(1));
        let lock = SurfaceLock::new();
        let _held = lock
            .try_acquire(crate::surface::SurfaceOwner::Reminder)
            .unwrap();
        let mut fade = FadeTransitionStage::new(
            "x.com",
            &EscalationConfig::default(),
            surface.clone(),
            lock.clone(),
        );
        assert!(matches!(
            fade.start(t0()).await,
            Err(StageError::SurfaceBusy { .. })
        ));
        assert!(surface.snapshot().mounted.is_empty());
    }
}
