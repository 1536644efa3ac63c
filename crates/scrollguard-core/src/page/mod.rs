//! Per-page wiring of the escalation coordinator, the reminder scheduler and
//! news time tracking.
//!
//! A [`PageController`] lives for one page load. Like the rest of the crate
//! it has no internal thread: the owner calls [`PageController::tick`] at
//! [`PageController::next_deadline`] and feeds it page input. [`run_page`]
//! does exactly that on a tokio runtime.

mod driver;
mod tracker;

pub use driver::{run_page, PageExit, PageInput};
pub use tracker::NewsTimeTracker;

use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::error::CoreError;
use crate::escalation::{EscalationCoordinator, EscalationState};
use crate::events::Event;
use crate::reminder::{ReminderChoice, ReminderDirective, ReminderScheduler};
use crate::site::{hostname_from_url, SiteClassifier, SiteType};
use crate::storage::{BlockScope, Config, TimeManager};
use crate::surface::{Surface, SurfaceLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PagePhase {
    Created,
    Loaded,
    TornDown,
}

pub struct PageController {
    hostname: String,
    site: SiteType,
    reminder_enabled: bool,
    lock: SurfaceLock,
    times: Arc<dyn TimeManager>,
    coordinator: EscalationCoordinator,
    reminder: ReminderScheduler,
    tracker: NewsTimeTracker,
    visible: bool,
    phase: PagePhase,
    events: Vec<Event>,
}

impl PageController {
    pub fn new(
        hostname: impl Into<String>,
        site: SiteType,
        config: &Config,
        surface: Arc<dyn Surface>,
        times: Arc<dyn TimeManager>,
    ) -> Self {
        let hostname = hostname.into();
        let lock = SurfaceLock::new();
        let coordinator = EscalationCoordinator::new(
            hostname.clone(),
            site,
            config.escalation.clone(),
            Arc::clone(&surface),
            lock.clone(),
            Arc::clone(&times),
        );
        let reminder = ReminderScheduler::new(
            hostname.clone(),
            config.reminder.clone(),
            Arc::clone(&surface),
            lock.clone(),
            Arc::clone(&times),
        );
        let tracker = NewsTimeTracker::new(
            config.escalation.update_interval(),
            config.news.max_tracking_gap(),
        );
        Self {
            hostname,
            site,
            reminder_enabled: config.reminder.enabled,
            lock,
            times,
            coordinator,
            reminder,
            tracker,
            visible: false,
            phase: PagePhase::Created,
            events: Vec::new(),
        }
    }

    /// Classify `url` and build a controller for it.
    pub fn for_url(
        url: &str,
        classifier: &dyn SiteClassifier,
        config: &Config,
        surface: Arc<dyn Surface>,
        times: Arc<dyn TimeManager>,
    ) -> Result<Self, CoreError> {
        let hostname = hostname_from_url(url)?;
        let site = classifier.current_site_type(url, &hostname);
        Ok(Self::new(hostname, site, config, surface, times))
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn site(&self) -> SiteType {
        self.site
    }

    pub fn lock(&self) -> &SurfaceLock {
        &self.lock
    }

    pub fn coordinator(&self) -> &EscalationCoordinator {
        &self.coordinator
    }

    pub fn reminder(&self) -> &ReminderScheduler {
        &self.reminder
    }

    pub fn is_tracking_news(&self) -> bool {
        self.tracker.is_running()
    }

    /// Set up the page: show the block screen if a block is active,
    /// otherwise start reminders, doomscroll detection and news tracking.
    pub async fn load(&mut self, now: DateTime<Utc>, visible: bool) -> Result<(), CoreError> {
        if self.phase != PagePhase::Created {
            tracing::warn!("Page {} loaded twice, ignoring", self.hostname);
            return Ok(());
        }
        self.phase = PagePhase::Loaded;
        self.visible = visible;

        if !self.site.is_tracked() {
            tracing::debug!("{} is not a tracked site", self.hostname);
            self.coordinator.set_detection_enabled(false);
            return Ok(());
        }

        if let Some(scope) = self.active_block(now).await {
            tracing::info!("{} is blocked ({}), showing block screen", self.hostname, scope);
            self.coordinator.set_detection_enabled(false);
            self.coordinator.show_block(scope, now).await?;
            return Ok(());
        }

        if self.reminder_enabled {
            self.reminder.initialize(self.site, now, visible)?;
        }
        if self.should_track_news() {
            self.tracker.resume(now);
        }
        tracing::info!(
            "Watching {} (blocked: {}, news: {})",
            self.hostname,
            self.site.is_blocked,
            self.site.is_news
        );
        Ok(())
    }

    /// The block that applies to this page right now, if any. Persistence
    /// failures count as "not blocked".
    async fn active_block(&self, now: DateTime<Utc>) -> Option<BlockScope> {
        let mut scopes = vec![BlockScope::host(self.hostname.clone())];
        if self.site.is_news {
            scopes.push(BlockScope::news());
        }
        for scope in scopes {
            match self.times.is_blocked(&scope, now).await {
                Ok(true) => return Some(scope),
                Ok(false) => {}
                Err(e) => tracing::warn!("Could not check block for {}: {}", scope, e),
            }
        }
        None
    }

    fn should_track_news(&self) -> bool {
        self.site.is_news
            && self.visible
            && self.phase == PagePhase::Loaded
            && self.coordinator.state() == EscalationState::Idle
    }

    pub async fn on_doomscroll_detected(&mut self, now: DateTime<Utc>) -> Result<bool, CoreError> {
        if self.phase != PagePhase::Loaded {
            return Ok(false);
        }
        let started = self.coordinator.on_doomscroll_detected(now).await?;
        if started {
            self.stop_news_tracking(now).await?;
        }
        Ok(started)
    }

    pub async fn on_visibility_change(
        &mut self,
        visible: bool,
        now: DateTime<Utc>,
    ) -> Result<(), CoreError> {
        if self.phase != PagePhase::Loaded {
            return Ok(());
        }
        self.visible = visible;
        if self.reminder.is_subscribed() {
            self.reminder.on_visibility_change(visible, now)?;
        }
        if self.should_track_news() {
            self.tracker.resume(now);
        } else {
            self.stop_news_tracking(now).await?;
        }
        Ok(())
    }

    /// Answer the open reminder prompt and act on the result.
    pub async fn choose_reminder(
        &mut self,
        choice: ReminderChoice,
        now: DateTime<Utc>,
    ) -> Result<ReminderDirective, CoreError> {
        let directive = self.reminder.choose(choice, now).await?;
        match &directive {
            ReminderDirective::None => {}
            // Reading time keeps being counted on news pages; other sites
            // have no usage counter to feed.
            ReminderDirective::EnterTimerOnly => {
                tracing::info!("{} switched to timer-only mode", self.hostname);
                self.coordinator.set_detection_enabled(false);
                self.reminder.cleanup();
            }
            ReminderDirective::ShowBlock(scope) => {
                self.enter_block(scope.clone(), now).await?;
            }
        }
        Ok(directive)
    }

    async fn enter_block(&mut self, scope: BlockScope, now: DateTime<Utc>) -> Result<(), CoreError> {
        // The sub-interval remainder is not recorded once the page is blocked.
        self.tracker.pause(now);
        self.reminder.cleanup();
        self.coordinator.set_detection_enabled(false);
        self.coordinator.show_block(scope, now).await?;
        Ok(())
    }

    pub async fn tick(&mut self, now: DateTime<Utc>) -> Result<(), CoreError> {
        if self.phase != PagePhase::Loaded {
            return Ok(());
        }
        self.coordinator.tick(now).await?;
        if self.reminder.is_subscribed() {
            self.reminder.tick(now)?;
        }

        if !self.should_track_news() {
            self.stop_news_tracking(now).await?;
        } else if let Some(delta) = self.tracker.poll(now) {
            self.record_news(delta, now).await?;
        }
        Ok(())
    }

    async fn stop_news_tracking(&mut self, now: DateTime<Utc>) -> Result<(), CoreError> {
        if self.tracker.is_running() {
            let delta = self.tracker.pause(now);
            self.record_news(delta, now).await?;
        }
        Ok(())
    }

    async fn record_news(&mut self, delta_ms: u64, now: DateTime<Utc>) -> Result<(), CoreError> {
        if delta_ms == 0 {
            return Ok(());
        }
        match self.times.add_news_time(delta_ms, now).await {
            Ok(false) => Ok(()),
            Ok(true) => self.on_news_limit(now).await,
            Err(e) => {
                tracing::warn!("Failed to record news time on {}: {}", self.hostname, e);
                Ok(())
            }
        }
    }

    async fn on_news_limit(&mut self, now: DateTime<Utc>) -> Result<(), CoreError> {
        tracing::info!("Daily news limit reached on {}", self.hostname);
        self.events.push(Event::NewsLimitReached { at: now });

        let scope = BlockScope::news();
        if let Err(e) = self.times.create_block(&scope, now).await {
            tracing::warn!("Failed to create news block: {}", e);
            return Ok(());
        }
        self.events.push(Event::BlockCreated {
            scope: scope.clone(),
            at: now,
        });
        self.enter_block(scope, now).await
    }

    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        [
            self.coordinator.next_deadline(),
            self.reminder.next_deadline(),
            self.tracker.next_deadline(),
        ]
        .into_iter()
        .flatten()
        .min()
    }

    pub fn reload_requested(&self) -> bool {
        self.coordinator.reload_requested()
    }

    pub fn drain_events(&mut self) -> Vec<Event> {
        let mut events = self.coordinator.drain_events();
        events.extend(self.reminder.drain_events());
        events.append(&mut self.events);
        events
    }

    /// Stop everything on page unload. Idempotent.
    pub async fn teardown(&mut self, now: DateTime<Utc>) {
        if self.phase == PagePhase::TornDown {
            return;
        }
        if let Err(e) = self.stop_news_tracking(now).await {
            tracing::warn!("News time lost on teardown of {}: {}", self.hostname, e);
        }
        self.coordinator.abort(now);
        self.reminder.cleanup();
        self.phase = PagePhase::TornDown;
        tracing::debug!("Page {} torn down", self.hostname);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::site::ListClassifier;
    use crate::storage::{KvTimeManager, MemoryKv};
    use crate::surface::{MemorySurface, OverlayKind, SurfaceOwner};
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap()
    }

    struct Fixture {
        config: Config,
        surface: Arc<MemorySurface>,
        times: Arc<KvTimeManager<MemoryKv>>,
    }

    impl Fixture {
        fn new() -> Self {
            Self::with_config(Config::default())
        }

        fn with_config(config: Config) -> Self {
            Self {
                times: Arc::new(KvTimeManager::from_config(MemoryKv::new(), &config)),
                surface: Arc::new(MemorySurface::new(3)),
                config,
            }
        }

        fn page(&self, url: &str) -> PageController {
            let classifier = ListClassifier::from_config(&self.config.sites);
            PageController::for_url(
                url,
                &classifier,
                &self.config,
                self.surface.clone(),
                self.times.clone(),
            )
            .unwrap()
        }
    }

    #[tokio::test]
    async fn untracked_page_does_nothing() {
        let fx = Fixture::new();
        let mut page = fx.page("https://example.org/");
        page.load(t0(), true).await.unwrap();
        assert!(!page.on_doomscroll_detected(t0()).await.unwrap());
        assert_eq!(page.next_deadline(), None);
        assert!(!page.reminder().is_subscribed());
    }

    #[tokio::test]
    async fn blocked_host_shows_the_block_screen_on_load() {
        let fx = Fixture::new();
        fx.times.create_time_block("reddit.com", t0()).await.unwrap();

        let mut page = fx.page("https://www.reddit.com/r/all");
        assert_eq!(page.hostname(), "reddit.com");
        page.load(t0() + Duration::minutes(1), true).await.unwrap();

        assert_eq!(page.coordinator().state(), EscalationState::Blocked);
        assert!(!page.reminder().is_subscribed());
        assert_eq!(fx.surface.snapshot().mounted[0].1, OverlayKind::Block);
    }

    #[tokio::test]
    async fn news_block_covers_every_news_site() {
        let fx = Fixture::new();
        fx.times.create_news_time_block(t0()).await.unwrap();
        let mut page = fx.page("https://www.bbc.com/news");
        page.load(t0(), true).await.unwrap();
        assert_eq!(page.coordinator().state(), EscalationState::Blocked);
    }

    #[tokio::test]
    async fn reminder_block_choice_shows_the_block_screen() {
        let fx = Fixture::new();
        let mut page = fx.page("https://x.com/home");
        page.load(t0(), true).await.unwrap();

        let at = t0() + Duration::minutes(5);
        page.tick(at).await.unwrap();
        assert!(page.reminder().prompt_open());
        assert_eq!(page.lock().owner(), Some(SurfaceOwner::Reminder));

        let directive = page.choose_reminder(ReminderChoice::Block, at).await.unwrap();
        assert_eq!(directive, ReminderDirective::ShowBlock(BlockScope::host("x.com")));
        assert_eq!(page.coordinator().state(), EscalationState::Blocked);
        assert!(!page.reminder().is_subscribed());
        assert!(fx.times.is_time_blocked("x.com", at).await.unwrap());
    }

    #[tokio::test]
    async fn timer_only_disables_detection_and_reminders() {
        let fx = Fixture::new();
        let mut page = fx.page("https://x.com/home");
        page.load(t0(), true).await.unwrap();
        let at = t0() + Duration::minutes(5);
        page.tick(at).await.unwrap();

        let directive = page
            .choose_reminder(ReminderChoice::TimerOnly, at)
            .await
            .unwrap();
        assert_eq!(directive, ReminderDirective::EnterTimerOnly);
        assert!(!page.coordinator().detection_enabled());
        assert!(!page.reminder().is_subscribed());
        assert!(!page.on_doomscroll_detected(at).await.unwrap());
    }

    #[tokio::test]
    async fn timer_only_keeps_counting_news_time() {
        let fx = Fixture::new();
        let mut page = fx.page("https://edition.cnn.com/");
        page.load(t0(), true).await.unwrap();
        let at = t0() + Duration::minutes(5);
        page.tick(at).await.unwrap();
        page.choose_reminder(ReminderChoice::TimerOnly, at)
            .await
            .unwrap();
        assert!(page.is_tracking_news());

        let before = fx.times.news_usage(at).unwrap().total_time_ms;
        for second in 1..=10 {
            page.tick(at + Duration::seconds(second)).await.unwrap();
        }
        let after = fx.times.news_usage(at + Duration::seconds(10)).unwrap();
        assert_eq!(after.total_time_ms - before, 10_000);
        assert_eq!(page.reminder().next_deadline(), None);
    }

    #[tokio::test]
    async fn reminder_is_skipped_during_an_escalation() {
        let fx = Fixture::new();
        let mut page = fx.page("https://x.com/home");
        page.load(t0(), true).await.unwrap();

        let start = t0() + Duration::minutes(4) + Duration::seconds(55);
        assert!(page.on_doomscroll_detected(start).await.unwrap());
        page.tick(t0() + Duration::minutes(5)).await.unwrap();

        assert!(!page.reminder().prompt_open());
        assert_eq!(page.reminder().last_reminder(), Some(t0()));
        assert!(page
            .drain_events()
            .iter()
            .any(|e| matches!(e, Event::ReminderSkipped { .. })));
    }

    #[tokio::test]
    async fn hidden_news_page_stops_counting() {
        let fx = Fixture::new();
        let mut page = fx.page("https://edition.cnn.com/");
        page.load(t0(), true).await.unwrap();
        assert!(page.is_tracking_news());

        page.tick(t0() + Duration::seconds(1)).await.unwrap();
        page.on_visibility_change(false, t0() + Duration::milliseconds(1500))
            .await
            .unwrap();
        assert!(!page.is_tracking_news());

        let usage = fx.times.news_usage(t0() + Duration::seconds(2)).unwrap();
        assert_eq!(usage.total_time_ms, 1500);

        page.on_visibility_change(true, t0() + Duration::seconds(60))
            .await
            .unwrap();
        assert!(page.is_tracking_news());
    }

    #[tokio::test]
    async fn news_limit_blocks_the_category() {
        let mut config = Config::default();
        config.news.daily_limit_min = 1;
        config.reminder.enabled = false;
        let fx = Fixture::with_config(config);

        let mut page = fx.page("https://news.ycombinator.com/");
        page.load(t0(), true).await.unwrap();
        while page.coordinator().state() == EscalationState::Idle {
            let deadline = page.next_deadline().unwrap();
            page.tick(deadline).await.unwrap();
        }

        assert_eq!(page.coordinator().state(), EscalationState::Blocked);
        assert!(fx.times.is_news_time_blocked(t0() + Duration::seconds(60)).await.unwrap());
        let events = page.drain_events();
        assert!(events.iter().any(|e| matches!(e, Event::NewsLimitReached { .. })));
        assert!(!page.is_tracking_news());
    }

    #[tokio::test]
    async fn teardown_releases_everything() {
        let fx = Fixture::new();
        let mut page = fx.page("https://x.com/home");
        page.load(t0(), true).await.unwrap();
        page.on_doomscroll_detected(t0()).await.unwrap();

        page.teardown(t0() + Duration::seconds(1)).await;
        page.teardown(t0() + Duration::seconds(1)).await;
        assert!(!page.lock().is_owned());
        assert!(fx.surface.snapshot().mounted.is_empty());
        assert_eq!(page.next_deadline(), None);
    }
}
