//! Periodic "you have been here a while" reminder.
//!
//! The scheduler fires every `reminder.interval_ms` while the page is
//! visible. Hidden time still counts: when the page becomes visible again
//! after a full interval, exactly one catch-up reminder fires.
//!
//! Presenting the prompt requires the [`SurfaceLock`]. When an escalation
//! stage holds it, the presentation is skipped and `last_reminder` keeps its
//! old value.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::ReminderError;
use crate::events::Event;
use crate::site::SiteType;
use crate::storage::{BlockScope, ReminderConfig, TimeManager};
use crate::surface::{
    OverlayId, OverlayKind, OverlayView, Surface, SurfaceGuard, SurfaceLock, SurfaceOwner,
};
use crate::timer::Interval;

/// The user's answer to the reminder prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReminderChoice {
    Continue,
    /// Stop watching for doomscrolling; only track time.
    TimerOnly,
    Block,
}

/// What the page controller should do after a choice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReminderDirective {
    None,
    EnterTimerOnly,
    ShowBlock(BlockScope),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Another owner holds the surface.
    SurfaceBusy,
    /// The previous prompt is still unanswered.
    PromptOpen,
    /// The overlay could not be drawn.
    RenderFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Uninitialized,
    Running,
    CleanedUp,
}

struct Prompt {
    overlay: OverlayId,
    _guard: SurfaceGuard,
}

pub struct ReminderScheduler {
    hostname: String,
    config: ReminderConfig,
    surface: Arc<dyn Surface>,
    lock: SurfaceLock,
    times: Arc<dyn TimeManager>,
    phase: Phase,
    site: Option<SiteType>,
    timer: Interval,
    last_reminder: Option<DateTime<Utc>>,
    visible: bool,
    subscribed: bool,
    prompt: Option<Prompt>,
    timer_only: bool,
    events: Vec<Event>,
}

impl ReminderScheduler {
    pub fn new(
        hostname: impl Into<String>,
        config: ReminderConfig,
        surface: Arc<dyn Surface>,
        lock: SurfaceLock,
        times: Arc<dyn TimeManager>,
    ) -> Self {
        let timer = Interval::new(config.interval());
        Self {
            hostname: hostname.into(),
            config,
            surface,
            lock,
            times,
            phase: Phase::Uninitialized,
            site: None,
            timer,
            last_reminder: None,
            visible: false,
            subscribed: false,
            prompt: None,
            timer_only: false,
            events: Vec::new(),
        }
    }

    fn ensure_running(&self) -> Result<(), ReminderError> {
        match self.phase {
            Phase::Running => Ok(()),
            Phase::Uninitialized => Err(ReminderError::NotInitialized),
            Phase::CleanedUp => Err(ReminderError::CleanedUp),
        }
    }

    pub fn initialize(
        &mut self,
        site: SiteType,
        now: DateTime<Utc>,
        visible: bool,
    ) -> Result<(), ReminderError> {
        match self.phase {
            Phase::Uninitialized => {}
            Phase::Running => return Err(ReminderError::AlreadyInitialized),
            Phase::CleanedUp => return Err(ReminderError::CleanedUp),
        }

        self.phase = Phase::Running;
        self.site = Some(site);
        self.last_reminder = Some(now);
        self.visible = visible;
        self.subscribed = true;
        if visible {
            self.timer.start(now);
        }
        tracing::debug!(
            "Reminder scheduler initialized for {} every {}ms",
            self.hostname,
            self.config.interval_ms
        );
        Ok(())
    }

    pub fn tick(&mut self, now: DateTime<Utc>) -> Result<(), ReminderError> {
        self.ensure_running()?;
        if self.visible && self.timer.poll(now) {
            self.fire(now);
        }
        Ok(())
    }

    pub fn on_visibility_change(
        &mut self,
        visible: bool,
        now: DateTime<Utc>,
    ) -> Result<(), ReminderError> {
        self.ensure_running()?;
        if !self.subscribed || visible == self.visible {
            return Ok(());
        }
        self.visible = visible;

        if !visible {
            self.timer.stop();
            return Ok(());
        }

        let overdue = self
            .last_reminder
            .is_some_and(|last| now - last >= self.config.interval());
        if overdue {
            tracing::debug!("Catch-up reminder for {}", self.hostname);
            self.fire(now);
        }
        self.timer.start(now);
        Ok(())
    }

    fn skip(&mut self, reason: SkipReason, now: DateTime<Utc>) {
        tracing::info!("Reminder on {} skipped: {:?}", self.hostname, reason);
        self.events.push(Event::ReminderSkipped { reason, at: now });
    }

    fn fire(&mut self, now: DateTime<Utc>) {
        if !self.config.enabled {
            return;
        }
        if self.prompt.is_some() {
            return self.skip(SkipReason::PromptOpen, now);
        }
        let Some(guard) = self.lock.try_acquire(SurfaceOwner::Reminder) else {
            return self.skip(SkipReason::SurfaceBusy, now);
        };

        let minutes_since_last = self
            .last_reminder
            .map(|last| (now - last).num_minutes())
            .unwrap_or(0);
        let view = OverlayView::Reminder {
            hostname: self.hostname.clone(),
            minutes_since_last,
        };
        let shown = self.surface.mount_overlay(OverlayKind::Reminder).and_then(|id| {
            match self.surface.render(id, &view) {
                Ok(()) => Ok(id),
                Err(e) => {
                    if let Err(remove) = self.surface.remove_overlay(id) {
                        tracing::warn!("Could not remove reminder overlay {}: {}", id, remove);
                    }
                    Err(e)
                }
            }
        });

        match shown {
            Ok(overlay) => {
                self.last_reminder = Some(now);
                self.prompt = Some(Prompt {
                    overlay,
                    _guard: guard,
                });
                tracing::info!(
                    "Reminder shown on {} after {} minutes",
                    self.hostname,
                    minutes_since_last
                );
                self.events.push(Event::ReminderShown {
                    hostname: self.hostname.clone(),
                    minutes_since_last,
                    at: now,
                });
            }
            Err(e) => {
                tracing::warn!("Reminder overlay failed on {}: {}", self.hostname, e);
                drop(guard);
                self.skip(SkipReason::RenderFailed, now);
            }
        }
    }

    fn close_prompt(&mut self) -> bool {
        match self.prompt.take() {
            Some(prompt) => {
                if let Err(e) = self.surface.remove_overlay(prompt.overlay) {
                    tracing::warn!("Could not remove reminder overlay {}: {}", prompt.overlay, e);
                }
                true
            }
            None => false,
        }
    }

    /// Resolve the open prompt. Persistence failures while creating a block
    /// are logged and yield [`ReminderDirective::None`].
    pub async fn choose(
        &mut self,
        choice: ReminderChoice,
        now: DateTime<Utc>,
    ) -> Result<ReminderDirective, ReminderError> {
        self.ensure_running()?;
        if !self.close_prompt() {
            return Err(ReminderError::NoPromptOpen);
        }
        tracing::info!("Reminder on {} answered: {:?}", self.hostname, choice);
        self.events.push(Event::ReminderChosen { choice, at: now });

        match choice {
            ReminderChoice::Continue => Ok(ReminderDirective::None),
            ReminderChoice::TimerOnly if self.timer_only => Ok(ReminderDirective::None),
            ReminderChoice::TimerOnly => {
                self.timer_only = true;
                Ok(ReminderDirective::EnterTimerOnly)
            }
            ReminderChoice::Block => {
                let scope = self
                    .site
                    .unwrap_or_default()
                    .block_scope(&self.hostname);
                match self.times.create_block(&scope, now).await {
                    Ok(()) => {
                        self.events.push(Event::BlockCreated {
                            scope: scope.clone(),
                            at: now,
                        });
                        Ok(ReminderDirective::ShowBlock(scope))
                    }
                    Err(e) => {
                        tracing::warn!("Failed to create block for {}: {}", scope, e);
                        Ok(ReminderDirective::None)
                    }
                }
            }
        }
    }

    pub fn reset_reminder_timer(&mut self, now: DateTime<Utc>) -> Result<(), ReminderError> {
        self.ensure_running()?;
        self.last_reminder = Some(now);
        if self.visible {
            self.timer.start(now);
        }
        Ok(())
    }

    /// Stop the timer, close any open prompt and forget the site. Idempotent.
    pub fn cleanup(&mut self) {
        if self.phase == Phase::CleanedUp {
            return;
        }
        self.timer.stop();
        self.close_prompt();
        self.subscribed = false;
        self.site = None;
        self.phase = Phase::CleanedUp;
        tracing::debug!("Reminder scheduler cleaned up for {}", self.hostname);
    }

    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        if self.phase == Phase::Running && self.visible {
            self.timer.next_deadline()
        } else {
            None
        }
    }

    pub fn prompt_open(&self) -> bool {
        self.prompt.is_some()
    }

    pub fn last_reminder(&self) -> Option<DateTime<Utc>> {
        self.last_reminder
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscribed
    }

    pub fn is_timer_only(&self) -> bool {
        self.timer_only
    }

    pub fn drain_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::escalation::StageKind;
    use crate::storage::{KvTimeManager, MemoryKv};
    use crate::surface::MemorySurface;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap()
    }

    fn minutes(n: i64) -> DateTime<Utc> {
        t0() + Duration::minutes(n)
    }

    struct Fixture {
        surface: Arc<MemorySurface>,
        lock: SurfaceLock,
        times: Arc<KvTimeManager<MemoryKv>>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                surface: Arc::new(MemorySurface::new(1)),
                lock: SurfaceLock::new(),
                times: Arc::new(KvTimeManager::new(
                    MemoryKv::new(),
                    Duration::minutes(30),
                    20 * 60 * 1000,
                )),
            }
        }

        fn scheduler(&self, hostname: &str) -> ReminderScheduler {
            ReminderScheduler::new(
                hostname,
                ReminderConfig::default(),
                self.surface.clone(),
                self.lock.clone(),
                self.times.clone(),
            )
        }
    }

    fn social() -> SiteType {
        SiteType {
            is_blocked: true,
            is_news: false,
        }
    }

    fn shown_count(events: &[Event]) -> usize {
        events
            .iter()
            .filter(|e| matches!(e, Event::ReminderShown { .. }))
            .count()
    }

    #[test]
    fn fires_every_interval_while_visible() {
        let fx = Fixture::new();
        let mut reminder = fx.scheduler("x.com");
        reminder.initialize(social(), t0(), true).unwrap();
        assert_eq!(reminder.next_deadline(), Some(minutes(5)));

        reminder.tick(minutes(4)).unwrap();
        assert!(!reminder.prompt_open());
        reminder.tick(minutes(5)).unwrap();
        assert!(reminder.prompt_open());
        assert_eq!(reminder.last_reminder(), Some(minutes(5)));
        assert_eq!(fx.lock.owner(), Some(SurfaceOwner::Reminder));
        assert_eq!(
            fx.surface.view_of(OverlayKind::Reminder),
            Some(OverlayView::Reminder {
                hostname: "x.com".into(),
                minutes_since_last: 5,
            })
        );
    }

    #[test]
    fn hidden_across_the_boundary_fires_one_catch_up() {
        let fx = Fixture::new();
        let mut reminder = fx.scheduler("x.com");
        reminder.initialize(social(), t0(), true).unwrap();

        reminder.on_visibility_change(false, minutes(1)).unwrap();
        assert_eq!(reminder.next_deadline(), None);
        for m in 2..=12 {
            reminder.tick(minutes(m)).unwrap();
        }
        assert_eq!(shown_count(&reminder.drain_events()), 0);

        reminder.on_visibility_change(true, minutes(12)).unwrap();
        assert_eq!(shown_count(&reminder.drain_events()), 1);
        assert_eq!(reminder.next_deadline(), Some(minutes(17)));

        reminder.tick(minutes(12)).unwrap();
        assert!(reminder.drain_events().is_empty());
    }

    #[test]
    fn short_absence_does_not_fire() {
        let fx = Fixture::new();
        let mut reminder = fx.scheduler("x.com");
        reminder.initialize(social(), t0(), true).unwrap();
        reminder.on_visibility_change(false, minutes(1)).unwrap();
        reminder.on_visibility_change(true, minutes(3)).unwrap();
        assert!(!reminder.prompt_open());
        assert_eq!(reminder.next_deadline(), Some(minutes(8)));
    }

    #[test]
    fn contended_surface_skips_without_moving_last_reminder() {
        let fx = Fixture::new();
        let mut reminder = fx.scheduler("x.com");
        reminder.initialize(social(), t0(), true).unwrap();

        let stage = fx
            .lock
            .try_acquire(SurfaceOwner::Stage(StageKind::Countdown))
            .unwrap();
        reminder.tick(minutes(5)).unwrap();
        assert!(!reminder.prompt_open());
        assert_eq!(reminder.last_reminder(), Some(t0()));
        assert_eq!(
            reminder.drain_events(),
            vec![Event::ReminderSkipped {
                reason: SkipReason::SurfaceBusy,
                at: minutes(5),
            }]
        );
        drop(stage);

        reminder.tick(minutes(10)).unwrap();
        assert!(reminder.prompt_open());
    }

    #[test]
    fn render_failure_removes_the_half_built_prompt() {
        let fx = Fixture::new();
        fx.surface.fail_renders(true);
        let mut reminder = fx.scheduler("x.com");
        reminder.initialize(social(), t0(), true).unwrap();

        reminder.tick(minutes(5)).unwrap();
        assert!(!reminder.prompt_open());
        assert_eq!(reminder.last_reminder(), Some(t0()));
        assert!(!fx.lock.is_owned());
        let snap = fx.surface.snapshot();
        assert!(snap.mounted.is_empty());
        assert_eq!(snap.removals, 1);
        assert!(reminder.drain_events().iter().any(|e| matches!(
            e,
            Event::ReminderSkipped {
                reason: SkipReason::RenderFailed,
                ..
            }
        )));
    }

    #[tokio::test]
    async fn choose_resolves_exactly_once() {
        let fx = Fixture::new();
        let mut reminder = fx.scheduler("x.com");
        reminder.initialize(social(), t0(), true).unwrap();
        assert_eq!(
            reminder.choose(ReminderChoice::Continue, t0()).await,
            Err(ReminderError::NoPromptOpen)
        );

        reminder.tick(minutes(5)).unwrap();
        assert_eq!(
            reminder.choose(ReminderChoice::Continue, minutes(5)).await,
            Ok(ReminderDirective::None)
        );
        assert!(!fx.lock.is_owned());
        assert!(fx.surface.snapshot().mounted.is_empty());
        assert_eq!(
            reminder.choose(ReminderChoice::Continue, minutes(5)).await,
            Err(ReminderError::NoPromptOpen)
        );
    }

    #[tokio::test]
    async fn timer_only_is_idempotent() {
        let fx = Fixture::new();
        let mut reminder = fx.scheduler("x.com");
        reminder.initialize(social(), t0(), true).unwrap();

        reminder.tick(minutes(5)).unwrap();
        assert_eq!(
            reminder.choose(ReminderChoice::TimerOnly, minutes(5)).await,
            Ok(ReminderDirective::EnterTimerOnly)
        );
        reminder.tick(minutes(10)).unwrap();
        assert_eq!(
            reminder.choose(ReminderChoice::TimerOnly, minutes(10)).await,
            Ok(ReminderDirective::None)
        );
        assert!(reminder.is_timer_only());
    }

    #[tokio::test]
    async fn block_on_a_news_site_is_category_scoped() {
        let fx = Fixture::new();
        let mut reminder = fx.scheduler("cnn.com");
        let news = SiteType {
            is_blocked: false,
            is_news: true,
        };
        reminder.initialize(news, t0(), true).unwrap();
        reminder.tick(minutes(5)).unwrap();

        let directive = reminder.choose(ReminderChoice::Block, minutes(5)).await;
        assert_eq!(directive, Ok(ReminderDirective::ShowBlock(BlockScope::news())));
        assert!(fx.times.is_news_time_blocked(minutes(5)).await.unwrap());
        assert!(!fx.times.is_time_blocked("cnn.com", minutes(5)).await.unwrap());
    }

    #[tokio::test]
    async fn cleanup_closes_the_prompt_and_rejects_further_use() {
        let fx = Fixture::new();
        let mut reminder = fx.scheduler("x.com");
        reminder.initialize(social(), t0(), true).unwrap();
        reminder.tick(minutes(5)).unwrap();

        reminder.cleanup();
        reminder.cleanup();
        assert!(!fx.lock.is_owned());
        assert_eq!(fx.surface.snapshot().removals, 1);
        assert!(!reminder.is_subscribed());
        assert_eq!(reminder.next_deadline(), None);
        assert_eq!(reminder.tick(minutes(10)), Err(ReminderError::CleanedUp));
        assert_eq!(
            reminder.initialize(social(), t0(), true),
            Err(ReminderError::CleanedUp)
        );
        assert_eq!(
            reminder.choose(ReminderChoice::Block, minutes(10)).await,
            Err(ReminderError::CleanedUp)
        );
    }

    #[test]
    fn initialize_twice_is_misuse() {
        let fx = Fixture::new();
        let mut reminder = fx.scheduler("x.com");
        assert_eq!(reminder.tick(t0()), Err(ReminderError::NotInitialized));
        reminder.initialize(social(), t0(), false).unwrap();
        assert_eq!(
            reminder.initialize(social(), t0(), true),
            Err(ReminderError::AlreadyInitialized)
        );
    }

    #[test]
    fn reset_restarts_from_now() {
        let fx = Fixture::new();
        let mut reminder = fx.scheduler("x.com");
        reminder.initialize(social(), t0(), true).unwrap();
        reminder.reset_reminder_timer(minutes(3)).unwrap();
        assert_eq!(reminder.last_reminder(), Some(minutes(3)));
        assert_eq!(reminder.next_deadline(), Some(minutes(8)));
    }
}
