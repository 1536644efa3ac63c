//! Tokio driver for a [`PageController`].
//!
//! The loop selects over:
//! 1. a sleep until the controller's next deadline (disabled when there is none)
//! 2. page input from an mpsc channel (detections, visibility, prompt answers)
//!
//! Every reload request ends the page session; the host reloads and builds a
//! fresh controller for the new page.

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use super::PageController;
use crate::error::CoreError;
use crate::events::Event;
use crate::reminder::ReminderChoice;

/// Input delivered to a running page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageInput {
    /// The host detected doomscrolling.
    Detected,
    Visibility(bool),
    /// Answer to the reminder prompt.
    Choice(ReminderChoice),
    Shutdown,
}

/// Why [`run_page`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageExit {
    Reload,
    Shutdown,
    InputClosed,
}

fn sleep_duration(deadline: Option<DateTime<Utc>>) -> std::time::Duration {
    deadline
        .and_then(|d| (d - Utc::now()).to_std().ok())
        .unwrap_or(std::time::Duration::ZERO)
}

/// Drive a loaded controller on wall-clock time until the page reloads or
/// input stops. Drained events are handed to `on_events` after every step.
///
/// The receiver is borrowed so a host can keep feeding the page that
/// replaces this one after a reload. The controller is torn down on every
/// exit, including an error.
pub async fn run_page<F>(
    controller: &mut PageController,
    inputs: &mut mpsc::Receiver<PageInput>,
    mut on_events: F,
) -> Result<PageExit, CoreError>
where
    F: FnMut(Vec<Event>),
{
    let outcome = drive(controller, inputs, &mut on_events).await;

    controller.teardown(Utc::now()).await;
    let events = controller.drain_events();
    if !events.is_empty() {
        on_events(events);
    }
    match &outcome {
        Ok(exit) => tracing::info!("Page {} ended: {:?}", controller.hostname(), exit),
        Err(e) => tracing::error!("Page {} failed: {}", controller.hostname(), e),
    }
    outcome
}

async fn drive<F>(
    controller: &mut PageController,
    inputs: &mut mpsc::Receiver<PageInput>,
    on_events: &mut F,
) -> Result<PageExit, CoreError>
where
    F: FnMut(Vec<Event>),
{
    loop {
        let deadline = controller.next_deadline();
        let sleep = tokio::time::sleep(sleep_duration(deadline));

        tokio::select! {
            _ = sleep, if deadline.is_some() => {
                controller.tick(Utc::now()).await?;
            }
            input = inputs.recv() => {
                let now = Utc::now();
                match input {
                    Some(PageInput::Detected) => {
                        controller.on_doomscroll_detected(now).await?;
                    }
                    Some(PageInput::Visibility(visible)) => {
                        controller.on_visibility_change(visible, now).await?;
                    }
                    Some(PageInput::Choice(choice)) => {
                        match controller.choose_reminder(choice, now).await {
                            Ok(directive) => {
                                tracing::debug!("Reminder directive: {:?}", directive);
                            }
                            // A stale answer from the host, e.g. after timer-only.
                            Err(e) if e.is_misuse() => {
                                tracing::warn!("Ignoring {:?}: {}", choice, e);
                            }
                            Err(e) => return Err(e),
                        }
                    }
                    Some(PageInput::Shutdown) => return Ok(PageExit::Shutdown),
                    None => return Ok(PageExit::InputClosed),
                }
            }
        }

        let events = controller.drain_events();
        if !events.is_empty() {
            on_events(events);
        }
        if controller.reload_requested() {
            return Ok(PageExit::Reload);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::site::ListClassifier;
    use crate::storage::{Config, KvTimeManager, MemoryKv, TimeManager};
    use crate::surface::MemorySurface;
    use std::sync::Arc;

    fn fast_config() -> Config {
        let mut config = Config::default();
        config.escalation.flash_interval_ms = 10;
        config.escalation.screen_decay_ms = 40;
        config.escalation.fade_countdown_secs = 0;
        config.escalation.transition_duration_ms = 20;
        config
    }

    #[tokio::test]
    async fn escalation_ends_in_a_reload() {
        let config = fast_config();
        let times = Arc::new(KvTimeManager::from_config(MemoryKv::new(), &config));
        let surface = Arc::new(MemorySurface::new(2));
        let mut page = PageController::for_url(
            "https://x.com/home",
            &ListClassifier::from_config(&config.sites),
            &config,
            surface.clone(),
            times.clone(),
        )
        .unwrap();
        page.load(Utc::now(), true).await.unwrap();

        let (tx, mut rx) = mpsc::channel(8);
        tx.send(PageInput::Detected).await.unwrap();

        let mut seen = Vec::new();
        let exit = run_page(&mut page, &mut rx, |events| seen.extend(events))
            .await
            .unwrap();

        assert_eq!(exit, PageExit::Reload);
        assert!(times.is_time_blocked("x.com", Utc::now()).await.unwrap());
        assert_eq!(surface.snapshot().reloads, 1);
        assert!(seen
            .iter()
            .any(|e| matches!(e, Event::TransitionScreenComplete { .. })));
        assert!(!page.lock().is_owned());
    }

    #[tokio::test]
    async fn shutdown_tears_the_page_down() {
        let config = fast_config();
        let times = Arc::new(KvTimeManager::from_config(MemoryKv::new(), &config));
        let surface = Arc::new(MemorySurface::new(2));
        let mut page = PageController::for_url(
            "https://x.com/home",
            &ListClassifier::from_config(&config.sites),
            &config,
            surface.clone(),
            times,
        )
        .unwrap();
        page.load(Utc::now(), true).await.unwrap();

        let (tx, mut rx) = mpsc::channel(8);
        tx.send(PageInput::Choice(ReminderChoice::Continue)).await.unwrap();
        tx.send(PageInput::Shutdown).await.unwrap();

        let exit = run_page(&mut page, &mut rx, |_| {}).await.unwrap();
        assert_eq!(exit, PageExit::Shutdown);
        assert!(!page.reminder().is_subscribed());
        assert!(surface.snapshot().mounted.is_empty());
    }

    #[tokio::test]
    async fn shutdown_mid_escalation_releases_the_surface() {
        let config = Config::default();
        let times = Arc::new(KvTimeManager::from_config(MemoryKv::new(), &config));
        let surface = Arc::new(MemorySurface::new(3));
        let mut page = PageController::for_url(
            "https://reddit.com/r/all",
            &ListClassifier::from_config(&config.sites),
            &config,
            surface.clone(),
            times,
        )
        .unwrap();
        page.load(Utc::now(), true).await.unwrap();

        let (tx, mut rx) = mpsc::channel(8);
        // No prompt is open, so the answer is ignored rather than fatal.
        tx.send(PageInput::Choice(ReminderChoice::Block)).await.unwrap();
        tx.send(PageInput::Detected).await.unwrap();
        tx.send(PageInput::Shutdown).await.unwrap();

        let mut seen = Vec::new();
        let exit = run_page(&mut page, &mut rx, |events| seen.extend(events))
            .await
            .unwrap();

        assert_eq!(exit, PageExit::Shutdown);
        assert!(seen.iter().any(|e| matches!(
            e,
            Event::StageCleanedUp {
                stage: crate::escalation::StageKind::Warning,
                ..
            }
        )));
        assert!(!page.lock().is_owned());
        let snap = surface.snapshot();
        assert!(snap.mounted.is_empty());
        assert_eq!(snap.removals, 1);
    }

    #[tokio::test]
    async fn closed_channel_ends_the_session() {
        let config = fast_config();
        let times = Arc::new(KvTimeManager::from_config(MemoryKv::new(), &config));
        let mut page = PageController::for_url(
            "https://example.org/",
            &ListClassifier::from_config(&config.sites),
            &config,
            Arc::new(MemorySurface::new(1)),
            times,
        )
        .unwrap();
        page.load(Utc::now(), true).await.unwrap();

        let (tx, mut rx) = mpsc::channel(1);
        drop(tx);
        let exit = run_page(&mut page, &mut rx, |_| {}).await.unwrap();
        assert_eq!(exit, PageExit::InputClosed);
    }
}
